//! Credential validation: bearer token -> normalized [`Principal`].

mod claims;
mod keys;
mod principal;
mod validator;

pub use claims::Claims;
pub use keys::TrustedKeys;
pub use principal::Principal;
pub use validator::CredentialValidator;
