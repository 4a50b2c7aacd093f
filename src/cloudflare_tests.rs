// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `cloudflare.rs`

#[cfg(test)]
mod tests {
    use crate::cloudflare::{ClientCache, CloudflareClient, TunnelConfigApi};
    use crate::errors::ControllerError;
    use crate::ingress::IngressEntry;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const ACCOUNT: &str = "acc-123";
    const TUNNEL: &str = "6ff42ae2-765d-4adf-8112-31c55c1551ef";
    const TOKEN: &str = "secret-token";

    fn config_path() -> String {
        format!("/accounts/{ACCOUNT}/cfd_tunnel/{TUNNEL}/configurations")
    }

    async fn client(server: &MockServer, account: Option<&str>) -> Result<CloudflareClient, ControllerError> {
        let http = CloudflareClient::http_client(Duration::from_secs(5))?;
        CloudflareClient::connect(http, &server.uri(), TOKEN.to_string(), account.map(String::from))
            .await
    }

    fn ok(result: serde_json::Value) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "errors": [],
            "messages": [],
            "result": result
        }))
    }

    #[tokio::test]
    async fn test_get_configuration_parses_ingress() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(config_path()))
            .and(header("Authorization", "Bearer secret-token"))
            .respond_with(ok(json!({
                "tunnel_id": TUNNEL,
                "version": 7,
                "source": "cloudflare",
                "config": {
                    "ingress": [
                        { "hostname": "app.example.com", "path": "/*", "service": "http://app.web.svc.cluster.local:80", "originRequest": {} },
                        { "service": "http_status:404" }
                    ],
                    "warp-routing": { "enabled": false }
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server, Some(ACCOUNT)).await.unwrap();
        let ingress = client.get_configuration(TUNNEL).await.unwrap();

        assert_eq!(ingress.len(), 2);
        assert_eq!(ingress[0].hostname.as_deref(), Some("app.example.com"));
        assert_eq!(ingress[1], IngressEntry::catch_all());
    }

    #[tokio::test]
    async fn test_get_configuration_of_unconfigured_tunnel_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(config_path()))
            .respond_with(ok(json!({ "tunnel_id": TUNNEL, "version": 0, "config": null })))
            .mount(&server)
            .await;

        let client = client(&server, Some(ACCOUNT)).await.unwrap();
        assert!(client.get_configuration(TUNNEL).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_put_configuration_sends_whole_document() {
        let server = MockServer::start().await;
        let ingress = vec![
            IngressEntry {
                hostname: Some("app.example.com".to_string()),
                path: Some("/api*".to_string()),
                service: "http://api.web.svc.cluster.local:8080".to_string(),
            },
            IngressEntry::catch_all(),
        ];
        Mock::given(method("PUT"))
            .and(path(config_path()))
            .and(body_json(json!({
                "config": {
                    "ingress": [
                        { "hostname": "app.example.com", "path": "/api*", "service": "http://api.web.svc.cluster.local:8080" },
                        { "service": "http_status:404" }
                    ]
                }
            })))
            .respond_with(ok(json!({ "tunnel_id": TUNNEL, "version": 8 })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server, Some(ACCOUNT)).await.unwrap();
        client.put_configuration(TUNNEL, &ingress).await.unwrap();
    }

    #[tokio::test]
    async fn test_account_discovery() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/accounts"))
            .respond_with(ok(json!([{ "id": ACCOUNT, "name": "Example" }])))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server, None).await.unwrap();
        assert_eq!(client.account_id(), ACCOUNT);
    }

    #[tokio::test]
    async fn test_account_discovery_without_accounts_is_validation_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/accounts"))
            .respond_with(ok(json!([])))
            .mount(&server)
            .await;

        let err = client(&server, None).await.unwrap_err();
        assert!(matches!(err, ControllerError::Validation(_)));
    }

    #[tokio::test]
    async fn test_error_statuses_are_classified() {
        let cases = [
            (401, "auth"),
            (403, "auth"),
            (404, "not_found"),
            (400, "validation"),
            (429, "transient"),
            (503, "transient"),
        ];

        for (status, category) in cases {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path(config_path()))
                .respond_with(ResponseTemplate::new(status).set_body_json(json!({
                    "success": false,
                    "errors": [{ "code": 10000, "message": "nope" }],
                    "result": null
                })))
                .mount(&server)
                .await;

            let client = client(&server, Some(ACCOUNT)).await.unwrap();
            let err = client.get_configuration(TUNNEL).await.unwrap_err();
            assert_eq!(err.category(), category, "HTTP {status}");
            assert!(err.to_string().contains("nope"));
        }
    }

    #[tokio::test]
    async fn test_unsuccessful_envelope_is_validation_error() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path(config_path()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": false,
                "errors": [{ "code": 1056, "message": "invalid ingress rule" }],
                "result": null
            })))
            .mount(&server)
            .await;

        let client = client(&server, Some(ACCOUNT)).await.unwrap();
        let err = client
            .put_configuration(TUNNEL, &[IngressEntry::catch_all()])
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::Validation(ref m) if m.contains("invalid ingress rule")));
    }

    #[tokio::test]
    async fn test_client_cache_reconnects_only_on_credential_change() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/accounts"))
            .respond_with(ok(json!([{ "id": ACCOUNT, "name": "main" }])))
            .expect(2)
            .mount(&server)
            .await;

        let cache = ClientCache::new();
        let http = CloudflareClient::http_client(Duration::from_secs(5)).unwrap();
        let first = cache
            .get_or_connect("production", &http, &server.uri(), TOKEN.to_string(), None)
            .await
            .unwrap();
        let again = cache
            .get_or_connect("production", &http, &server.uri(), TOKEN.to_string(), None)
            .await
            .unwrap();
        assert!(std::sync::Arc::ptr_eq(&first, &again));

        let rotated = cache
            .get_or_connect("production", &http, &server.uri(), "rotated".to_string(), None)
            .await
            .unwrap();
        assert!(!std::sync::Arc::ptr_eq(&first, &rotated));
        assert_eq!(cache.len(), 1);

        cache.evict("production");
        assert!(cache.is_empty());
    }
}
