// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `deployment.rs`

#[cfg(test)]
mod tests {
    use crate::crd::{AwgSpec, CloudflaredSpec, SecretKeyReference, TunnelConfigSpec, TunnelProtocol};
    use crate::deployment::{build_deployment, deployed_version, DeploymentValues, ReleaseKey};
    use crate::errors::ControllerError;
    use crate::labels::{RELEASE_VERSION_ANNOTATION, TUNNEL_ID_ANNOTATION};

    const TUNNEL_ID: &str = "6ff42ae2-765d-4adf-8112-31c55c1551ef";

    fn spec() -> TunnelConfigSpec {
        TunnelConfigSpec {
            tunnel_id: TUNNEL_ID.to_string(),
            account_id: None,
            cloudflare_credentials_secret_ref: SecretKeyReference {
                name: "cloudflare".to_string(),
                namespace: None,
                key: None,
            },
            tunnel_token_secret_ref: Some(SecretKeyReference {
                name: "tunnel".to_string(),
                namespace: None,
                key: None,
            }),
            cloudflared: CloudflaredSpec {
                replicas: 2,
                protocol: TunnelProtocol::Quic,
                ..CloudflaredSpec::default()
            },
        }
    }

    fn values(spec: &TunnelConfigSpec) -> DeploymentValues {
        DeploymentValues::from_tunnel_config(spec, "web", "public").unwrap()
    }

    fn release() -> ReleaseKey {
        ReleaseKey::for_gateway("web", "public", "cloudflare-tunnel-system")
    }

    #[test]
    fn test_release_name() {
        let key = release();
        assert_eq!(key.name, "cloudflared-web-public");
        assert_eq!(key.namespace, "cloudflare-tunnel-system");
    }

    #[test]
    fn test_long_release_names_are_shortened_without_collisions() {
        let long = "a".repeat(60);
        let first = ReleaseKey::for_gateway("team", &format!("{long}-one"), "ns");
        let second = ReleaseKey::for_gateway("team", &format!("{long}-two"), "ns");

        assert!(first.name.len() <= 63, "{}", first.name);
        assert!(second.name.len() <= 63, "{}", second.name);
        assert_ne!(first.name, second.name);
    }

    #[test]
    fn test_values_from_tunnel_config() {
        let v = values(&spec());
        assert_eq!(v.replicas, 2);
        assert_eq!(v.token_secret.name, "tunnel");
        assert_eq!(v.token_secret.key, "tunnel-token");
        assert!(v.awg.is_none());
    }

    #[test]
    fn test_token_secret_must_live_with_the_deployment() {
        let mut s = spec();
        s.tunnel_token_secret_ref = Some(SecretKeyReference {
            name: "tunnel".to_string(),
            namespace: Some("elsewhere".to_string()),
            key: None,
        });
        assert!(matches!(
            DeploymentValues::from_tunnel_config(&s, "web", "public"),
            Err(ControllerError::Validation(_))
        ));
    }

    #[test]
    fn test_missing_token_is_validation_error() {
        let mut s = spec();
        s.tunnel_token_secret_ref = None;
        assert!(matches!(
            DeploymentValues::from_tunnel_config(&s, "web", "public"),
            Err(ControllerError::Validation(_))
        ));
    }

    #[test]
    fn test_version_tracks_values() {
        let base = values(&spec());
        assert_eq!(base.version(), values(&spec()).version(), "stable for equal values");
        assert!(base.version().starts_with("2025.4.0-"));

        let mut scaled = spec();
        scaled.cloudflared.replicas = 3;
        assert_ne!(base.version(), values(&scaled).version());

        let mut protocol = spec();
        protocol.cloudflared.protocol = TunnelProtocol::Http2;
        assert_ne!(base.version(), values(&protocol).version());
    }

    #[test]
    fn test_deployment_shape() {
        let v = values(&spec());
        let deployment = build_deployment(&release(), &v);

        assert_eq!(deployment.metadata.name.as_deref(), Some("cloudflared-web-public"));
        assert_eq!(deployed_version(&deployment), Some(v.version().as_str()));
        let annotations = deployment.metadata.annotations.as_ref().unwrap();
        assert_eq!(annotations.get(TUNNEL_ID_ANNOTATION).map(String::as_str), Some(TUNNEL_ID));
        assert!(annotations.contains_key(RELEASE_VERSION_ANNOTATION));

        let spec = deployment.spec.as_ref().unwrap();
        assert_eq!(spec.replicas, Some(2));

        let pod = spec.template.spec.as_ref().unwrap();
        assert_eq!(pod.containers.len(), 1);
        let container = &pod.containers[0];
        assert_eq!(container.image.as_deref(), Some("cloudflare/cloudflared:2025.4.0"));

        let args = container.args.as_ref().unwrap();
        assert_eq!(args.first().map(String::as_str), Some("tunnel"));
        assert_eq!(args.last().map(String::as_str), Some("run"));
        let protocol = args.iter().position(|a| a == "--protocol").unwrap();
        assert_eq!(args[protocol + 1], "quic");

        let env = container.env.as_ref().unwrap();
        let token = env.iter().find(|e| e.name == "TUNNEL_TOKEN").unwrap();
        let selector = token
            .value_from
            .as_ref()
            .and_then(|v| v.secret_key_ref.as_ref())
            .unwrap();
        assert_eq!(selector.name, "tunnel");
        assert_eq!(selector.key, "tunnel-token");
    }

    #[test]
    fn test_unset_protocol_omits_flag() {
        let mut s = spec();
        s.cloudflared.protocol = TunnelProtocol::Unset;
        let deployment = build_deployment(&release(), &values(&s));

        let pod = deployment.spec.unwrap().template.spec.unwrap();
        let args = pod.containers[0].args.clone().unwrap();
        assert!(!args.iter().any(|a| a == "--protocol"));
    }

    #[test]
    fn test_awg_sidecar() {
        let mut s = spec();
        s.cloudflared.awg = Some(AwgSpec {
            secret_name: Some("awg-conf".to_string()),
            interface_prefix: Some("wg".to_string()),
        });
        let v = values(&s);
        assert_eq!(v.awg.as_ref().unwrap().interface_name, "wg0");

        let pod = build_deployment(&release(), &v)
            .spec
            .unwrap()
            .template
            .spec
            .unwrap();
        assert_eq!(pod.containers.len(), 2);
        assert_eq!(pod.containers[1].name, "amneziawg");
        let volumes = pod.volumes.unwrap();
        assert_eq!(
            volumes[0].secret.as_ref().and_then(|s| s.secret_name.as_deref()),
            Some("awg-conf")
        );
    }

    #[test]
    fn test_awg_without_secret_is_ignored() {
        let mut s = spec();
        s.cloudflared.awg = Some(AwgSpec::default());
        assert!(values(&s).awg.is_none());
    }
}
