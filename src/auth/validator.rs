use crate::auth::{Claims, Principal, TrustedKeys};
use crate::config::AuthConfig;
use crate::error::{sanitize_message, GatewayError};
use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, decode_header, Algorithm, Validation};
use std::sync::Arc;
use tracing::debug;

/// Validates bearer tokens and produces normalized principals.
///
/// Verification order: parse -> signature -> time claims -> issuer/audience.
/// Time claims are compared with zero grace period. Only an error category
/// ever leaves this module; detail goes to the diagnostic log.
pub struct CredentialValidator {
    keys: Arc<TrustedKeys>,
    issuer: String,
    audience: String,
    algorithms: Vec<Algorithm>,
}

impl CredentialValidator {
    pub fn new(keys: Arc<TrustedKeys>, config: &AuthConfig) -> Self {
        CredentialValidator {
            keys,
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            algorithms: vec![Algorithm::HS256],
        }
    }

    /// Validates a raw bearer token.
    pub fn validate(&self, raw_token: &str) -> Result<Principal, GatewayError> {
        let header = decode_header(raw_token).map_err(|e| GatewayError::TokenMalformed {
            reason: sanitize_message(&e.to_string()),
        })?;

        if !self.algorithms.contains(&header.alg) {
            debug!(alg = ?header.alg, "rejecting token signed with untrusted algorithm");
            return Err(GatewayError::TokenMalformed {
                reason: "unsupported signing algorithm".to_string(),
            });
        }

        let key = self
            .keys
            .get(header.kid.as_deref())
            .ok_or(GatewayError::SignatureInvalid)?;

        // Decode checks parse and signature only; claim checks below carry
        // the actual claim values into their errors.
        let mut validation = Validation::new(header.alg);
        validation.leeway = 0;
        validation.required_spec_claims = Default::default();
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;

        let data = decode::<Claims>(raw_token, &key, &validation).map_err(|e| {
            let err = GatewayError::from(e);
            debug!(error = %err, "credential parse or signature check failed");
            err
        })?;
        let claims = data.claims;

        let now = Utc::now();
        let expired_at = DateTime::from_timestamp(claims.exp, 0).unwrap_or_default();
        if expired_at <= now {
            debug!(%expired_at, "credential expired");
            return Err(GatewayError::TokenExpired { expired_at });
        }
        if let Some(nbf) = claims.nbf {
            let valid_from = DateTime::from_timestamp(nbf, 0).unwrap_or_default();
            if valid_from > now {
                debug!(%valid_from, "credential not yet valid");
                return Err(GatewayError::TokenNotYetValid { valid_from });
            }
        }
        if claims.iss != self.issuer {
            debug!("credential issuer mismatch");
            return Err(GatewayError::IssuerMismatch);
        }
        if !claims.aud.iter().any(|aud| aud == &self.audience) {
            debug!("credential audience mismatch");
            return Err(GatewayError::AudienceMismatch);
        }

        Ok(Principal::from_claims(&claims))
    }
}
