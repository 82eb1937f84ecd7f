//! Property-based tests for credential validation.

use gateway_core::auth::{Claims, CredentialValidator, TrustedKeys};
use gateway_core::config::AuthConfig;
use gateway_core::GatewayError;
use jsonwebtoken::{encode, EncodingKey, Header};
use proptest::prelude::*;
use std::sync::Arc;

const SECRET: &[u8] = b"property-test-secret";

fn validator() -> CredentialValidator {
    let config = AuthConfig {
        issuer: "https://issuer.test".to_string(),
        audience: "gateway".to_string(),
        hs256_secret: SECRET.to_vec(),
    };
    CredentialValidator::new(Arc::new(TrustedKeys::hs256(SECRET)), &config)
}

fn claims(sub: &str, roles: Vec<String>, exp_offset: i64) -> Claims {
    let now = chrono::Utc::now().timestamp();
    Claims {
        iss: "https://issuer.test".to_string(),
        sub: sub.to_string(),
        aud: vec!["gateway".to_string()],
        exp: now + exp_offset,
        iat: now,
        nbf: None,
        email: None,
        roles,
        resource_roles: Default::default(),
        groups: Vec::new(),
        custom: Default::default(),
    }
}

fn sign(claims: &Claims) -> String {
    encode(&Header::default(), claims, &EncodingKey::from_secret(SECRET)).unwrap()
}

fn arb_subject() -> impl Strategy<Value = String> {
    "[a-z0-9][a-z0-9-]{0,31}"
}

fn arb_roles() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("[a-z_]{1,12}", 0..4)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// A token with a valid signature and a future expiry always yields a
    /// principal whose user id equals the subject claim.
    #[test]
    fn valid_token_subject_becomes_principal_user_id(
        sub in arb_subject(),
        roles in arb_roles(),
    ) {
        let validator = validator();
        let token = sign(&claims(&sub, roles.clone(), 3600));
        let principal = validator.validate(&token).unwrap();
        prop_assert_eq!(&principal.user_id, &sub);
        for role in &roles {
            prop_assert!(principal.has_role(role));
        }
    }

    /// A token with `exp` in the past always fails as expired, never with a
    /// different category.
    #[test]
    fn expired_token_always_fails_as_expired(
        sub in arb_subject(),
        age in 60i64..86_400,
    ) {
        let validator = validator();
        let token = sign(&claims(&sub, Vec::new(), -age));
        let err = validator.validate(&token).unwrap_err();
        prop_assert!(
            matches!(err, GatewayError::TokenExpired { .. }),
            "expected TokenExpired, got {:?}",
            err
        );
    }

    /// Validation errors never echo the presented credential back.
    #[test]
    fn errors_never_echo_the_credential(garbage in "[A-Za-z0-9+/=.]{16,64}") {
        let validator = validator();
        if let Err(err) = validator.validate(&garbage) {
            prop_assert!(!err.to_string().contains(&garbage));
        }
    }

    /// Tokens signed with an unknown secret never validate, regardless of
    /// their claims.
    #[test]
    fn foreign_signatures_never_validate(
        sub in arb_subject(),
        secret in prop::collection::vec(1u8..255, 8..32),
    ) {
        prop_assume!(secret.as_slice() != SECRET);
        let token = encode(
            &Header::default(),
            &claims(&sub, Vec::new(), 3600),
            &EncodingKey::from_secret(&secret),
        )
        .unwrap();
        let err = validator().validate(&token).unwrap_err();
        prop_assert!(matches!(err, GatewayError::SignatureInvalid));
    }
}
