// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `ingress.rs`

#[cfg(test)]
mod tests {
    use crate::gateway_api::{GRPCRouteMatch, HTTPRouteMatch};
    use crate::ingress::{
        build_document, build_rules, grpc_rule_matches, http_rule_matches, BackendTarget,
        IngressEntry, PathMatch, RouteContribution, RouteKind, RuleContribution,
        TunnelDocument,
    };
    use serde_json::json;

    fn route(
        name: &str,
        hostnames: &[&str],
        matches: Vec<PathMatch>,
        service: &str,
    ) -> RouteContribution {
        RouteContribution {
            kind: RouteKind::Http,
            namespace: "default".to_string(),
            name: name.to_string(),
            hostnames: hostnames.iter().map(ToString::to_string).collect(),
            rules: vec![RuleContribution {
                index: 0,
                matches,
                targets: vec![BackendTarget::new(service, "default", 80)],
            }],
        }
    }

    fn exact(path: &str) -> PathMatch {
        PathMatch::Exact(path.to_string())
    }

    fn prefix(path: &str) -> PathMatch {
        PathMatch::Prefix(path.to_string())
    }

    fn summary(document: &TunnelDocument) -> Vec<(Option<&str>, Option<&str>)> {
        document
            .ingress()
            .iter()
            .map(|e| (e.hostname.as_deref(), e.path.as_deref()))
            .collect()
    }

    #[test]
    fn test_ordering_example() {
        let routes = vec![
            route("b-exact", &["b"], vec![exact("/")], "b"),
            route("a-prefix", &["a"], vec![prefix("/")], "a"),
            route("a-exact", &["a"], vec![exact("/x")], "a"),
        ];

        let document = build_document(&routes);

        assert_eq!(
            summary(&document),
            vec![
                (Some("a"), Some("/x")),
                (Some("a"), Some("/*")),
                (Some("b"), Some("/")),
                (None, None),
            ]
        );
    }

    #[test]
    fn test_exact_before_prefix_then_longest_path() {
        let routes = vec![route(
            "site",
            &["app.example.com"],
            vec![prefix("/api"), exact("/"), prefix("/api/v1"), exact("/login")],
            "site",
        )];

        let document = build_document(&routes);

        assert_eq!(
            summary(&document),
            vec![
                (Some("app.example.com"), Some("/login")),
                (Some("app.example.com"), Some("/")),
                (Some("app.example.com"), Some("/api/v1*")),
                (Some("app.example.com"), Some("/api*")),
                (None, None),
            ]
        );
    }

    #[test]
    fn test_tie_break_on_route_name_then_rule_index() {
        let mut second = route("zeta", &["h"], vec![prefix("/a")], "zeta");
        second.rules.push(RuleContribution {
            index: 1,
            matches: vec![prefix("/b")],
            targets: vec![BackendTarget::new("zeta-b", "default", 80)],
        });
        let first = route("alpha", &["h"], vec![prefix("/c")], "alpha");

        let rules = build_rules(&[second, first]);

        let order: Vec<(&str, usize)> = rules
            .iter()
            .map(|r| (r.source_route_name.as_str(), r.source_rule_index))
            .collect();
        assert_eq!(
            order,
            vec![("default/alpha", 0), ("default/zeta", 0), ("default/zeta", 1)]
        );
    }

    #[test]
    fn test_determinism_across_permutations() {
        let routes = vec![
            route("one", &["x.example.com", "y.example.com"], vec![prefix("/")], "one"),
            route("two", &["x.example.com"], vec![exact("/health")], "two"),
            route("three", &["y.example.com"], vec![prefix("/static")], "three"),
            route("four", &["x.example.com"], vec![prefix("/")], "four"),
        ];
        let expected = serde_json::to_vec(&build_document(&routes)).unwrap();

        let permutations: [[usize; 4]; 6] = [
            [3, 2, 1, 0],
            [1, 0, 3, 2],
            [2, 3, 0, 1],
            [0, 2, 1, 3],
            [3, 0, 2, 1],
            [1, 3, 2, 0],
        ];
        for order in permutations {
            let shuffled: Vec<RouteContribution> =
                order.iter().map(|&i| routes[i].clone()).collect();
            let actual = serde_json::to_vec(&build_document(&shuffled)).unwrap();
            assert_eq!(actual, expected, "order {order:?} changed the document");
        }
    }

    #[test]
    fn test_catch_all_always_last_and_unique() {
        let inputs = vec![
            vec![],
            vec![route("r", &["h"], vec![prefix("/")], "svc")],
            vec![
                route("r", &["h"], vec![prefix("/")], "svc"),
                route("s", &["h", "i"], vec![exact("/a"), prefix("/b")], "svc"),
            ],
        ];

        for routes in inputs {
            let document = build_document(&routes);
            let catch_alls = document
                .ingress()
                .iter()
                .filter(|e| **e == IngressEntry::catch_all())
                .count();
            assert_eq!(catch_alls, 1);
            assert_eq!(document.ingress().last(), Some(&IngressEntry::catch_all()));
        }
    }

    #[test]
    fn test_empty_input_yields_only_catch_all() {
        let document = build_document(&[]);
        assert_eq!(document.rule_count(), 0);
        assert_eq!(
            serde_json::to_value(document.ingress()).unwrap(),
            json!([{ "service": "http_status:404" }])
        );
    }

    #[test]
    fn test_route_without_hostnames_contributes_nothing() {
        let document = build_document(&[route("r", &[], vec![prefix("/")], "svc")]);
        assert_eq!(document.rule_count(), 0);
    }

    #[test]
    fn test_grpc_targets_use_h2c() {
        let mut grpc = route("grpc", &["rpc.example.com"], vec![prefix("/")], "api");
        grpc.kind = RouteKind::Grpc;
        grpc.rules[0].targets = vec![BackendTarget::new("api", "rpc", 9090)];

        let document = build_document(&[grpc]);

        assert_eq!(
            document.ingress()[0].service,
            "h2c://api.rpc.svc.cluster.local:9090"
        );
    }

    #[test]
    fn test_every_target_yields_a_rule() {
        let mut r = route("r", &["h"], vec![prefix("/")], "a");
        r.rules[0].targets.push(BackendTarget::new("b", "default", 81));

        assert_eq!(build_document(&[r]).rule_count(), 2);
    }

    #[test]
    fn test_hostnames_are_lowercased() {
        let document = build_document(&[route("r", &["App.Example.COM"], vec![prefix("/")], "a")]);
        assert_eq!(
            document.ingress()[0].hostname.as_deref(),
            Some("app.example.com")
        );
    }

    #[test]
    fn test_http_match_mapping() {
        let matches: Vec<HTTPRouteMatch> = serde_json::from_value(json!([
            { "path": { "type": "Exact", "value": "/exact" } },
            { "path": { "type": "PathPrefix", "value": "/prefix" } },
            { "path": { "type": "RegularExpression", "value": "/re.*" } },
            {}
        ]))
        .unwrap();

        assert_eq!(
            http_rule_matches(&matches),
            vec![exact("/exact"), prefix("/prefix"), prefix("/")]
        );
        assert_eq!(http_rule_matches(&[]), vec![prefix("/")]);
    }

    #[test]
    fn test_http_matches_beyond_the_path_are_dropped() {
        let matches: Vec<HTTPRouteMatch> = serde_json::from_value(json!([
            {
                "path": { "type": "PathPrefix", "value": "/admin" },
                "headers": [{ "name": "x-role", "value": "admin" }]
            },
            {
                "path": { "type": "PathPrefix", "value": "/search" },
                "queryParams": [{ "type": "Exact", "name": "beta", "value": "1" }]
            },
            { "path": { "type": "Exact", "value": "/upload" }, "method": "POST" },
            { "path": { "type": "PathPrefix", "value": "/public" } }
        ]))
        .unwrap();

        assert!(matches[0].has_non_path_conditions());
        assert_eq!(http_rule_matches(&matches), vec![prefix("/public")]);
    }

    #[test]
    fn test_grpc_header_matches_are_dropped() {
        let matches: Vec<GRPCRouteMatch> = serde_json::from_value(json!([
            {
                "method": { "service": "pkg.Echo" },
                "headers": [{ "name": "tenant", "value": "blue" }]
            },
            { "method": { "service": "pkg.Echo", "method": "Say" } }
        ]))
        .unwrap();

        assert_eq!(grpc_rule_matches(&matches), vec![exact("/pkg.Echo/Say")]);
    }

    #[test]
    fn test_grpc_match_mapping() {
        let matches: Vec<GRPCRouteMatch> = serde_json::from_value(json!([
            { "method": { "service": "pkg.Echo", "method": "Say" } },
            { "method": { "service": "pkg.Health" } },
            { "method": { "method": "Orphan" } },
            { "method": { "type": "RegularExpression", "service": "pkg.*" } },
            {}
        ]))
        .unwrap();

        assert_eq!(
            grpc_rule_matches(&matches),
            vec![exact("/pkg.Echo/Say"), prefix("/pkg.Health/"), prefix("/")]
        );
    }

    #[test]
    fn test_matches_remote_ignores_cosmetic_differences() {
        let document = build_document(&[route("r", &["app.example.com"], vec![prefix("/")], "a")]);
        let remote: Vec<IngressEntry> = serde_json::from_value(json!([
            {
                "hostname": "APP.example.com",
                "path": "/*",
                "service": "http://a.default.svc.cluster.local:80",
                "originRequest": {}
            },
            { "hostname": "", "service": "http_status:404" }
        ]))
        .unwrap();

        assert!(document.matches_remote(&remote));
    }

    #[test]
    fn test_matches_remote_is_order_sensitive() {
        let document = build_document(&[
            route("a", &["h"], vec![exact("/a")], "a"),
            route("b", &["h"], vec![exact("/b")], "b"),
        ]);
        let mut remote = document.ingress().to_vec();
        remote.swap(0, 1);

        assert!(!document.matches_remote(&remote));
        assert!(document.matches_remote(document.ingress()));
    }
}
