use crate::config::RateLimitConfig;
use std::collections::HashMap;

/// Inputs for key resolution: whatever the edge knows about the caller.
#[derive(Debug, Clone, Copy)]
pub struct RateKey<'a> {
    pub user_id: Option<&'a str>,
    pub source_addr: Option<&'a str>,
    pub route: &'a str,
}

/// Override tables consulted in precedence order: per-user, then
/// per-source-address, then per-route pattern, then the global default.
#[derive(Debug, Clone)]
pub struct RateLimitRules {
    pub default: RateLimitConfig,
    pub per_user: HashMap<String, RateLimitConfig>,
    pub per_addr: HashMap<String, RateLimitConfig>,
    /// Route patterns: exact match or a single trailing `*` segment.
    pub per_route: Vec<(String, RateLimitConfig)>,
}

impl RateLimitRules {
    pub fn with_default(default: RateLimitConfig) -> Self {
        RateLimitRules {
            default,
            per_user: HashMap::new(),
            per_addr: HashMap::new(),
            per_route: Vec::new(),
        }
    }

    /// Resolves the logical counting key and the config that applies.
    pub fn resolve(&self, req: &RateKey<'_>) -> (String, RateLimitConfig) {
        if let Some(user_id) = req.user_id {
            if let Some(config) = self.per_user.get(user_id) {
                return (format!("user:{user_id}"), *config);
            }
        }
        if let Some(addr) = req.source_addr {
            if let Some(config) = self.per_addr.get(addr) {
                return (format!("addr:{addr}"), *config);
            }
        }
        for (pattern, config) in &self.per_route {
            if route_matches(pattern, req.route) {
                return (
                    format!("route:{pattern}:{}", client_id(req)),
                    *config,
                );
            }
        }
        (format!("global:{}", client_id(req)), self.default)
    }
}

/// The per-client discriminator folded into route/global keys.
fn client_id(req: &RateKey<'_>) -> String {
    match (req.user_id, req.source_addr) {
        (Some(user), _) => format!("user:{user}"),
        (None, Some(addr)) => format!("addr:{addr}"),
        (None, None) => "anon".to_string(),
    }
}

/// Matches a route against a pattern: exact, or equal segment count with a
/// single trailing `*` segment standing in for the last one.
pub fn route_matches(pattern: &str, route: &str) -> bool {
    if pattern == route {
        return true;
    }
    let Some(prefix) = pattern.strip_suffix("*") else {
        return false;
    };
    if !prefix.ends_with('/') {
        return false;
    }
    let pattern_segments = pattern.split('/').count();
    let route_segments = route.split('/').count();
    pattern_segments == route_segments && route.starts_with(prefix)
}
