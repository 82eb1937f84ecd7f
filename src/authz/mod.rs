//! Authorization gate: a pure capability check over a [`Principal`].
//!
//! Used identically for HTTP requests, socket upgrades and RPC calls. A
//! denial is silent about which capabilities the caller actually holds.

use crate::auth::Principal;
use crate::error::GatewayError;
use tracing::debug;

/// A capability a route or call can require.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capability {
    /// A plain role name.
    Role(String),
    /// A role scoped to a single resource.
    ResourceRole { resource: String, role: String },
    /// A group membership.
    Group(String),
}

/// Checks whether the principal holds the required capability.
///
/// Pure function: no I/O, no mutation, safe from any number of concurrent
/// callers.
pub fn authorize(principal: &Principal, required: &Capability) -> bool {
    match required {
        Capability::Role(role) => principal.has_role(role),
        Capability::ResourceRole { resource, role } => {
            principal.has_resource_role(resource, role)
        }
        Capability::Group(group) => principal.in_group(group),
    }
}

/// Like [`authorize`] but converts a denial into the category-only error.
pub fn require(principal: &Principal, required: &Capability) -> Result<(), GatewayError> {
    if authorize(principal, required) {
        Ok(())
    } else {
        debug!(
            user_id = %principal.user_id,
            required = ?required,
            "authorization denied"
        );
        Err(GatewayError::InsufficientRole)
    }
}
