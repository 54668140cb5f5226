//! Route table resolved from the proxy configuration
//!
//! The proxy map is resolved once at startup: each target is parsed and its
//! authority captured as a ready-to-use Host header value. Lookups are
//! longest-prefix-wins, so nested prefixes behave deterministically
//! regardless of map iteration order.

use crate::config::ProxyRule;
use hyper::header::HeaderValue;
use std::collections::HashMap;

/// A proxy rule with its target parsed and pre-resolved
#[derive(Debug, Clone)]
pub struct Route {
    /// The raw path prefix this route matches
    pub prefix: String,
    /// Target authority, e.g. "localhost:8000"
    pub authority: String,
    /// Pre-built Host header value for `change_origin` rewrites
    pub host_value: HeaderValue,
    /// Whether the outbound Host header is rewritten to the target
    pub change_origin: bool,
    /// Whether upgrade requests are tunneled to the target
    pub ws: bool,
}

/// Immutable route table for the server's lifetime
#[derive(Debug, Clone, Default)]
pub struct Router {
    /// Routes sorted by prefix length, longest first
    routes: Vec<Route>,
}

impl Router {
    /// Resolve the configured proxy map into a route table
    ///
    /// Rules are assumed to have passed `Config::validate`; a target that
    /// still fails to parse here is a hard error.
    pub fn from_config(proxy: &HashMap<String, ProxyRule>) -> anyhow::Result<Self> {
        let mut routes = Vec::with_capacity(proxy.len());

        for (prefix, rule) in proxy {
            let uri: http::Uri = rule
                .target
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid proxy target '{}': {}", rule.target, e))?;
            let authority = uri
                .authority()
                .ok_or_else(|| anyhow::anyhow!("Proxy target '{}' has no host", rule.target))?
                .to_string();
            let host_value = HeaderValue::from_str(&authority).map_err(|e| {
                anyhow::anyhow!("Proxy target host '{}' is not a valid header: {}", authority, e)
            })?;

            routes.push(Route {
                prefix: prefix.clone(),
                authority,
                host_value,
                change_origin: rule.change_origin,
                ws: rule.ws,
            });
        }

        // Longest prefix first so /api/admin beats /api
        routes.sort_by(|a, b| {
            b.prefix
                .len()
                .cmp(&a.prefix.len())
                .then_with(|| a.prefix.cmp(&b.prefix))
        });

        Ok(Self { routes })
    }

    /// Find the route for a request path, if any
    ///
    /// Matching is by raw string prefix: "/api" matches "/api", "/api/users"
    /// and also "/apiary", mirroring the prefix semantics of the proxy map.
    pub fn match_path(&self, path: &str) -> Option<&Route> {
        self.routes
            .iter()
            .find(|route| path.starts_with(&route.prefix))
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Iterate routes in match order (for the startup banner)
    pub fn routes(&self) -> impl Iterator<Item = &Route> {
        self.routes.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProxyRule;

    fn table(rules: &[(&str, ProxyRule)]) -> Router {
        let map: HashMap<String, ProxyRule> = rules
            .iter()
            .map(|(p, r)| (p.to_string(), r.clone()))
            .collect();
        Router::from_config(&map).unwrap()
    }

    #[test]
    fn test_empty_router() {
        let router = Router::default();
        assert!(router.is_empty());
        assert!(router.match_path("/api/users").is_none());
    }

    #[test]
    fn test_prefix_match() {
        let router = table(&[("/api", ProxyRule::new("http://localhost:8000"))]);

        assert!(router.match_path("/api").is_some());
        assert!(router.match_path("/api/users?limit=10").is_some());
        assert!(router.match_path("/").is_none());
        assert!(router.match_path("/assets/app.js").is_none());
    }

    #[test]
    fn test_raw_string_prefix_semantics() {
        let router = table(&[("/api", ProxyRule::new("http://localhost:8000"))]);
        // Raw prefix match, not segment match
        assert!(router.match_path("/apiary").is_some());
    }

    #[test]
    fn test_longest_prefix_wins() {
        let router = table(&[
            ("/api", ProxyRule::new("http://localhost:8000")),
            ("/api/admin", ProxyRule::new("http://localhost:9000")),
        ]);

        let route = router.match_path("/api/admin/users").unwrap();
        assert_eq!(route.authority, "localhost:9000");

        let route = router.match_path("/api/users").unwrap();
        assert_eq!(route.authority, "localhost:8000");
    }

    #[test]
    fn test_resolved_host_value() {
        let router = table(&[(
            "/api",
            ProxyRule::new("http://localhost:8000").with_change_origin(),
        )]);

        let route = router.match_path("/api/ping").unwrap();
        assert_eq!(route.host_value, "localhost:8000");
        assert!(route.change_origin);
        assert!(!route.ws);
    }

    #[test]
    fn test_authority_without_port() {
        let router = table(&[("/api", ProxyRule::new("http://backend.local"))]);
        let route = router.match_path("/api").unwrap();
        assert_eq!(route.authority, "backend.local");
    }

    #[test]
    fn test_from_config_rejects_bad_target() {
        let mut map = HashMap::new();
        map.insert("/api".to_string(), ProxyRule::new("not a uri"));
        assert!(Router::from_config(&map).is_err());
    }
}
