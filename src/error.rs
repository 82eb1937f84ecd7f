//! Unified error handling for the gateway core.
//!
//! Every externally visible failure maps onto a small closed set of error
//! codes; full detail is only ever written to the diagnostic log. Raw token
//! material and signatures must never appear in an error message.

use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;
use tonic::{Code, Status};

/// Sensitive patterns that must not leak through error messages.
const SENSITIVE_PATTERNS: &[&str] = &[
    "password",
    "secret",
    "token",
    "signature",
    "key",
    "credential",
    "bearer",
    "authorization",
];

/// Gateway core error taxonomy.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum GatewayError {
    /// No bearer token was supplied with the request or upgrade.
    #[error("credential missing from request")]
    TokenMissing,

    /// Token could not be parsed into header/payload/signature.
    #[error("credential malformed: {reason}")]
    TokenMalformed {
        /// Sanitized description of the malformation.
        reason: String,
    },

    /// Cryptographic verification against the trusted keys failed.
    #[error("credential signature invalid")]
    SignatureInvalid,

    /// The `exp` claim is in the past (zero grace period).
    #[error("credential expired at {expired_at}")]
    TokenExpired {
        /// When the token expired.
        expired_at: DateTime<Utc>,
    },

    /// The `nbf` claim is in the future (zero grace period).
    #[error("credential not yet valid until {valid_from}")]
    TokenNotYetValid {
        /// When the token becomes valid.
        valid_from: DateTime<Utc>,
    },

    /// The `iss` claim does not match the configured issuer.
    #[error("credential issuer mismatch")]
    IssuerMismatch,

    /// The `aud` claim does not match the configured audience.
    #[error("credential audience mismatch")]
    AudienceMismatch,

    /// The principal lacks the required capability. Deliberately carries no
    /// detail about which capabilities the principal actually holds.
    #[error("insufficient role")]
    InsufficientRole,

    /// Rate limit exceeded for the resolved key.
    #[error("rate limit exceeded")]
    RateLimited {
        /// When the client may retry.
        retry_after: Duration,
        /// When the current window resets.
        reset_at: DateTime<Utc>,
        /// The limit that applied.
        limit: u32,
    },

    /// Global concurrent-session ceiling reached at upgrade time.
    #[error("connection limit reached")]
    ConnectionLimitReached,

    /// Per-user concurrent-session ceiling reached at upgrade time.
    #[error("per-user connection limit reached")]
    UserConnectionLimit,

    /// The upgrade handshake failed for a non-auth reason.
    #[error("upgrade failed: {reason}")]
    UpgradeFailed {
        /// Sanitized description.
        reason: String,
    },

    /// A point-to-point send did not complete within the bounded wait.
    #[error("send timed out after {waited:?}")]
    SendTimeout {
        /// How long the sender waited.
        waited: Duration,
    },

    /// The peer cancelled an active stream. Not an application error.
    #[error("stream cancelled by peer")]
    StreamCancelled,

    /// Internal failure; details are sanitized out of every response.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Stable machine-readable error codes for external surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    AuthenticationRequired,
    AuthenticationFailed,
    PermissionDenied,
    RateLimitExceeded,
    ConnectionLimitReached,
    UserConnectionLimit,
    SendTimeout,
    StreamCancelled,
    Internal,
}

impl ErrorCode {
    /// String form used in JSON error bodies.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthenticationRequired => "AUTHENTICATION_REQUIRED",
            Self::AuthenticationFailed => "AUTHENTICATION_FAILED",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            Self::ConnectionLimitReached => "CONNECTION_LIMIT_REACHED",
            Self::UserConnectionLimit => "USER_CONNECTION_LIMIT",
            Self::SendTimeout => "SEND_TIMEOUT",
            Self::StreamCancelled => "STREAM_CANCELLED",
            Self::Internal => "INTERNAL_ERROR",
        }
    }

    /// gRPC status code for this error.
    pub fn grpc_code(&self) -> Code {
        match self {
            Self::AuthenticationRequired | Self::AuthenticationFailed => Code::Unauthenticated,
            Self::PermissionDenied => Code::PermissionDenied,
            Self::RateLimitExceeded
            | Self::ConnectionLimitReached
            | Self::UserConnectionLimit => Code::ResourceExhausted,
            Self::SendTimeout => Code::DeadlineExceeded,
            Self::StreamCancelled => Code::Cancelled,
            Self::Internal => Code::Internal,
        }
    }

    /// HTTP status code for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::AuthenticationRequired | Self::AuthenticationFailed => 401,
            Self::PermissionDenied => 403,
            Self::RateLimitExceeded => 429,
            Self::ConnectionLimitReached | Self::UserConnectionLimit => 503,
            Self::SendTimeout => 504,
            Self::StreamCancelled => 499,
            Self::Internal => 500,
        }
    }
}

impl GatewayError {
    /// Maps the error onto its external code. Every credential validation
    /// failure collapses into `AUTHENTICATION_FAILED`: the caller learns the
    /// category, the diagnostic log keeps the distinction.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::TokenMissing => ErrorCode::AuthenticationRequired,
            Self::TokenMalformed { .. }
            | Self::SignatureInvalid
            | Self::TokenExpired { .. }
            | Self::TokenNotYetValid { .. }
            | Self::IssuerMismatch
            | Self::AudienceMismatch => ErrorCode::AuthenticationFailed,
            Self::InsufficientRole => ErrorCode::PermissionDenied,
            Self::RateLimited { .. } => ErrorCode::RateLimitExceeded,
            Self::ConnectionLimitReached => ErrorCode::ConnectionLimitReached,
            Self::UserConnectionLimit => ErrorCode::UserConnectionLimit,
            Self::UpgradeFailed { .. } => ErrorCode::AuthenticationFailed,
            Self::SendTimeout { .. } => ErrorCode::SendTimeout,
            Self::StreamCancelled => ErrorCode::StreamCancelled,
            Self::Internal(_) => ErrorCode::Internal,
        }
    }

    /// External message for the error. Category only, never internal detail.
    pub fn public_message(&self) -> &'static str {
        match self.code() {
            ErrorCode::AuthenticationRequired => "Authentication required",
            ErrorCode::AuthenticationFailed => "Authentication failed",
            ErrorCode::PermissionDenied => "Permission denied",
            ErrorCode::RateLimitExceeded => "Rate limit exceeded",
            ErrorCode::ConnectionLimitReached => "Connection limit reached",
            ErrorCode::UserConnectionLimit => "Too many connections for user",
            ErrorCode::SendTimeout => "Peer unresponsive",
            ErrorCode::StreamCancelled => "Stream cancelled",
            ErrorCode::Internal => "Internal error",
        }
    }

    /// Retry-after duration, when the error carries one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }

    /// Converts to a gRPC status carrying only the external category.
    pub fn to_status(&self) -> Status {
        Status::new(self.code().grpc_code(), self.public_message())
    }
}

/// Sanitizes a message by replacing anything token-like wholesale.
pub fn sanitize_message(message: &str) -> String {
    let lower = message.to_lowercase();
    for pattern in SENSITIVE_PATTERNS {
        if lower.contains(pattern) {
            return "invalid credential format".to_string();
        }
    }
    message.to_string()
}

/// Covers the parse and signature failures `decode` can produce. Time and
/// issuer/audience claims are checked by the validator itself, which has the
/// claim values to put in those errors.
impl From<jsonwebtoken::errors::Error> for GatewayError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::InvalidSignature => GatewayError::SignatureInvalid,
            ErrorKind::InvalidIssuer => GatewayError::IssuerMismatch,
            ErrorKind::InvalidAudience => GatewayError::AudienceMismatch,
            ErrorKind::MissingRequiredClaim(claim) => GatewayError::TokenMalformed {
                reason: format!("missing claim: {claim}"),
            },
            _ => GatewayError::TokenMalformed {
                reason: sanitize_message(&err.to_string()),
            },
        }
    }
}
