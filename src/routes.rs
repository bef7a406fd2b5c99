use crate::config::{BackendId, GatewayConfig};
use crate::ratelimit::Tier;

/// Paths under this prefix are administrative and never proxied, regardless
/// of authentication.
pub const INTERNAL_PREFIX: &str = "/api/internal";

/// One configured prefix mapping. Matching is longest-prefix at path-segment
/// boundaries; the outgoing path is `rewrite_to` plus the matched remainder.
#[derive(Debug, Clone)]
pub struct Route {
    pub prefix: &'static str,
    pub rewrite_to: &'static str,
    pub backend: BackendId,
    pub auth_required: bool,
    pub tier: Option<Tier>,
}

impl Route {
    fn matches(&self, path: &str) -> bool {
        match path.strip_prefix(self.prefix) {
            Some("") => true,
            Some(rest) => rest.starts_with('/'),
            None => false,
        }
    }

    /// Apply this route's rewrite rule to an inbound path.
    pub fn rewrite(&self, path: &str) -> String {
        let remainder = &path[self.prefix.len()..];
        format!("{}{}", self.rewrite_to, remainder)
    }
}

/// Immutable prefix → backend mapping, built once at startup. An explicit
/// ordered list rather than match arms scattered through handler code, so a
/// new backend is one entry here plus its config keys.
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn build(_config: &GatewayConfig) -> Self {
        let routes = vec![
            Route {
                prefix: "/api/v1/users",
                rewrite_to: "/users",
                backend: BackendId::User,
                auth_required: true,
                tier: Some(Tier::Standard),
            },
            Route {
                prefix: "/api/v1/chat",
                rewrite_to: "/chat",
                backend: BackendId::Chat,
                auth_required: true,
                tier: Some(Tier::Strict),
            },
            // Externally shared assistant responses are readable without a
            // token, but still filtered and rate limited.
            Route {
                prefix: "/api/v1/chat/shared",
                rewrite_to: "/chat/shared",
                backend: BackendId::Chat,
                auth_required: false,
                tier: Some(Tier::Standard),
            },
            Route {
                prefix: "/api/v1/office",
                rewrite_to: "/office",
                backend: BackendId::Office,
                auth_required: true,
                tier: Some(Tier::Standard),
            },
            Route {
                prefix: "/api/v1/shipments",
                rewrite_to: "/shipments",
                backend: BackendId::Shipments,
                auth_required: true,
                tier: Some(Tier::Standard),
            },
            Route {
                prefix: "/api/v1/meetings",
                rewrite_to: "/meetings",
                backend: BackendId::Meetings,
                auth_required: true,
                tier: Some(Tier::Standard),
            },
            // Public booking pages shared with external invitees.
            Route {
                prefix: "/api/v1/meetings/public",
                rewrite_to: "/meetings/public",
                backend: BackendId::Meetings,
                auth_required: false,
                tier: Some(Tier::Standard),
            },
            Route {
                prefix: "/api/v1/search",
                rewrite_to: "/search",
                backend: BackendId::Search,
                auth_required: true,
                tier: Some(Tier::Strict),
            },
        ];

        Self { routes }
    }

    /// Longest-prefix match against the configured routes.
    pub fn find(&self, path: &str) -> Option<&Route> {
        self.routes
            .iter()
            .filter(|route| route.matches(path))
            .max_by_key(|route| route.prefix.len())
    }

    pub fn is_internal(path: &str) -> bool {
        path == INTERNAL_PREFIX
            || path
                .strip_prefix(INTERNAL_PREFIX)
                .map(|rest| rest.starts_with('/'))
                .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendConfig, GatewayConfig};

    fn config() -> GatewayConfig {
        GatewayConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            auth_secret: "secret".to_string(),
            frontend_origin: "https://app.example.com".to_string(),
            backends: BackendId::ALL
                .iter()
                .map(|id| BackendConfig {
                    id: *id,
                    base_url: format!("http://{}.internal", id.name()),
                    service_key: format!("{}-key", id.name()),
                })
                .collect(),
            upstream_timeout_secs: 60,
            dev_mode: false,
            log_level: "warn".to_string(),
        }
    }

    #[test]
    fn matches_and_rewrites_prefixes() {
        let table = RouteTable::build(&config());

        let route = table.find("/api/v1/users/me").expect("route should match");
        assert_eq!(route.backend, BackendId::User);
        assert_eq!(route.rewrite("/api/v1/users/me"), "/users/me");

        let route = table.find("/api/v1/shipments").expect("bare prefix matches");
        assert_eq!(route.rewrite("/api/v1/shipments"), "/shipments");
    }

    #[test]
    fn longest_prefix_wins() {
        let table = RouteTable::build(&config());

        let route = table
            .find("/api/v1/chat/shared/abc123")
            .expect("route should match");
        assert_eq!(route.backend, BackendId::Chat);
        assert!(!route.auth_required);
        assert_eq!(route.tier, Some(Tier::Standard));
        assert_eq!(
            route.rewrite("/api/v1/chat/shared/abc123"),
            "/chat/shared/abc123"
        );

        // The parent prefix still gets the strict, authenticated route.
        let route = table
            .find("/api/v1/chat/sessions/9")
            .expect("route should match");
        assert!(route.auth_required);
        assert_eq!(route.tier, Some(Tier::Strict));
    }

    #[test]
    fn prefix_match_respects_segment_boundaries() {
        let table = RouteTable::build(&config());
        // "/api/v1/usersextra" must not match the users prefix.
        assert!(table.find("/api/v1/usersextra").is_none());
    }

    #[test]
    fn unmatched_paths_have_no_route() {
        let table = RouteTable::build(&config());
        assert!(table.find("/api/v2/users/me").is_none());
        assert!(table.find("/").is_none());
    }

    #[test]
    fn credential_follows_the_matched_backend() {
        let cfg = config();
        let table = RouteTable::build(&cfg);

        let route = table.find("/api/v1/search/messages").unwrap();
        assert_eq!(cfg.backend(route.backend).service_key, "search-key");

        let route = table.find("/api/v1/meetings/public/slot").unwrap();
        assert_eq!(cfg.backend(route.backend).service_key, "meetings-key");
    }

    #[test]
    fn internal_prefix_is_detected() {
        assert!(RouteTable::is_internal("/api/internal"));
        assert!(RouteTable::is_internal("/api/internal/metrics"));
        assert!(!RouteTable::is_internal("/api/internals"));
        assert!(!RouteTable::is_internal("/api/v1/users"));
    }
}
