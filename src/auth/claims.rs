use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// JWT claim set understood by the gateway.
///
/// Standard time/identity claims plus the custom authorization claims the
/// platform issues: a flat role list, a per-resource role map, and group
/// memberships.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub iss: String,
    pub sub: String,
    pub aud: Vec<String>,
    pub exp: i64,
    pub iat: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub resource_roles: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(flatten)]
    pub custom: HashMap<String, serde_json::Value>,
}

impl Claims {
    pub fn is_expired(&self) -> bool {
        let now = chrono::Utc::now().timestamp();
        self.exp < now
    }
}
