use crate::auth::Claims;
use std::collections::{HashMap, HashSet};

/// Normalized caller identity built from a validated token.
///
/// Immutable once constructed; lives for one request or one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: String,
    pub email: Option<String>,
    pub roles: HashSet<String>,
    pub resource_roles: HashMap<String, HashSet<String>>,
    pub groups: HashSet<String>,
}

impl Principal {
    /// Builds a principal from a validated claim set.
    pub fn from_claims(claims: &Claims) -> Self {
        Principal {
            user_id: claims.sub.clone(),
            email: claims.email.clone(),
            roles: claims.roles.iter().cloned().collect(),
            resource_roles: claims
                .resource_roles
                .iter()
                .map(|(resource, roles)| (resource.clone(), roles.iter().cloned().collect()))
                .collect(),
            groups: claims.groups.iter().cloned().collect(),
        }
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    pub fn has_resource_role(&self, resource: &str, role: &str) -> bool {
        self.resource_roles
            .get(resource)
            .is_some_and(|roles| roles.contains(role))
    }

    pub fn in_group(&self, group: &str) -> bool {
        self.groups.contains(group)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn principal_with(roles: &[&str], groups: &[&str]) -> Principal {
        Principal {
            user_id: "user-1".to_string(),
            email: None,
            roles: roles.iter().map(|s| s.to_string()).collect(),
            resource_roles: HashMap::new(),
            groups: groups.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn resource_role_lookup_is_scoped() {
        let mut principal = principal_with(&[], &[]);
        principal
            .resource_roles
            .insert("room-1".to_string(), ["moderator".to_string()].into());

        assert!(principal.has_resource_role("room-1", "moderator"));
        assert!(!principal.has_resource_role("room-2", "moderator"));
        assert!(!principal.has_role("moderator"));
    }
}
