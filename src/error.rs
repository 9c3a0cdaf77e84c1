//!
//! # Error Handling
//!
//! This module defines the error types shared by all three service roles.
//!
//! Domain errors (`AuthError`, `KeyError`, `BusError`, `ConfigError`) classify
//! what went wrong inside the trust and event layers. `AppError` is the type
//! handlers return: it implements `actix_web::error::ResponseError` so every
//! failure turns into an HTTP status plus a JSON body of the form
//! `{"error": "..."}`. `From` implementations allow the `?` operator to lift
//! domain, validation, hashing, and upstream errors into `AppError`.

use actix_web::{
    error::ResponseError,
    http::{header::RETRY_AFTER, StatusCode},
    HttpResponse,
};
use serde_json::json;
use thiserror::Error;
use validator::ValidationErrors;

use crate::events::Topic;

/// Classified outcome of a failed authentication step.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// No verification key has been acquired yet. Retryable by the client.
    #[error("verification key not yet available")]
    ServiceNotReady,
    /// The credential (or a forwarded identity blob) could not be parsed.
    #[error("malformed credential: {0}")]
    Malformed(String),
    /// The signature does not verify against the current key.
    #[error("credential signature is invalid")]
    SignatureInvalid,
    /// The credential's expiry instant has passed.
    #[error("credential has expired")]
    Expired,
    /// No identity is present where one is required.
    #[error("no authenticated identity present")]
    Unauthenticated,
}

impl AuthError {
    /// Short machine-readable reason code sent to clients alongside the message.
    pub fn reason(&self) -> &'static str {
        match self {
            AuthError::ServiceNotReady => "service_not_ready",
            AuthError::Malformed(_) => "malformed",
            AuthError::SignatureInvalid => "signature_invalid",
            AuthError::Expired => "expired",
            AuthError::Unauthenticated => "unauthenticated",
        }
    }
}

/// Maps `jsonwebtoken` failures onto the verification taxonomy.
///
/// A token whose header names an algorithm outside the key's family cannot be
/// verified with that key, so it is reported as `SignatureInvalid`.
impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => AuthError::SignatureInvalid,
            ErrorKind::ExpiredSignature => AuthError::Expired,
            _ => AuthError::Malformed(err.to_string()),
        }
    }
}

/// Failure to obtain usable key material from the key source.
///
/// These never reach request callers; the key provider absorbs them into its
/// retry loop.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("key source request failed: {0}")]
    Fetch(#[from] reqwest::Error),
    #[error("key source responded with status {0}")]
    Status(u16),
    #[error("key material rejected: {0}")]
    InvalidMaterial(String),
    #[error("key source unavailable: {0}")]
    Unavailable(String),
}

/// Errors raised by the event bus and subscription sessions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    /// The subscriber fell too far behind and was disconnected from the topic.
    #[error("subscriber to {0} overflowed its delivery queue and was disconnected")]
    TopicDeliveryOverflow(Topic),
    /// The session is draining or closed and accepts no new subscriptions.
    #[error("subscription session is closed")]
    SessionClosed,
    #[error("unknown topic: {0}")]
    UnknownTopic(String),
}

/// Startup configuration problems. These are the only fatal errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Represents all errors a request handler can return.
///
/// Each variant maps onto one HTTP status; see the `ResponseError` impl.
#[derive(Debug, Error)]
pub enum AppError {
    /// Authentication failure classified by the trust layer.
    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),
    /// Client-side error due to a malformed or invalid request (HTTP 400).
    #[error("Bad Request: {0}")]
    BadRequest(String),
    /// Credentials were supplied but rejected, e.g. a wrong password (HTTP 401).
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    /// The requested resource does not exist (HTTP 404).
    #[error("Not Found: {0}")]
    NotFound(String),
    /// The request conflicts with existing state (HTTP 409).
    #[error("Conflict: {0}")]
    Conflict(String),
    /// Input validation failed (HTTP 422).
    #[error("Validation Error: {0}")]
    ValidationError(String),
    /// The caller exceeded the edge rate limit (HTTP 429).
    #[error("Too Many Requests: retry after {}s", .retry_after.as_secs())]
    TooManyRequests { retry_after: std::time::Duration },
    /// An upstream service could not be reached (HTTP 502).
    #[error("Bad Gateway: {0}")]
    BadGateway(String),
    /// Unexpected server-side error (HTTP 500).
    #[error("Internal Server Error: {0}")]
    InternalServerError(String),
}

impl AppError {
    /// JSON body sent to the client. Authentication failures carry a
    /// `reason` code next to the message.
    pub fn body(&self) -> serde_json::Value {
        match self {
            AppError::Auth(AuthError::ServiceNotReady) => json!({
                "error": "Public key not available. Service starting up.",
                "reason": AuthError::ServiceNotReady.reason(),
            }),
            AppError::Auth(AuthError::Unauthenticated) => json!({
                "error": "No token provided",
                "reason": AuthError::Unauthenticated.reason(),
            }),
            AppError::Auth(err) => json!({
                "error": "Invalid or expired token",
                "reason": err.reason(),
            }),
            AppError::TooManyRequests { retry_after } => json!({
                "error": "Too many requests from this IP, please try again later.",
                "retryAfter": retry_after.as_secs().max(1),
            }),
            AppError::BadRequest(msg)
            | AppError::Unauthorized(msg)
            | AppError::NotFound(msg)
            | AppError::Conflict(msg)
            | AppError::ValidationError(msg)
            | AppError::BadGateway(msg)
            | AppError::InternalServerError(msg) => json!({ "error": msg }),
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Auth(AuthError::ServiceNotReady) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Auth(AuthError::Unauthenticated) => StatusCode::UNAUTHORIZED,
            AppError::Auth(_) => StatusCode::FORBIDDEN,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::ValidationError(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            AppError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let mut response = HttpResponse::build(self.status_code());
        if let AppError::TooManyRequests { retry_after } = self {
            response.insert_header((RETRY_AFTER, retry_after.as_secs().max(1).to_string()));
        }
        response.json(self.body())
    }
}

/// The detailed validation messages are preserved.
impl From<ValidationErrors> for AppError {
    fn from(error: ValidationErrors) -> AppError {
        AppError::ValidationError(error.to_string())
    }
}

/// Password hashing failures are server-side problems.
impl From<bcrypt::BcryptError> for AppError {
    fn from(error: bcrypt::BcryptError) -> AppError {
        AppError::InternalServerError(error.to_string())
    }
}

/// Upstream transport failures seen by the gateway proxy.
impl From<reqwest::Error> for AppError {
    fn from(error: reqwest::Error) -> AppError {
        AppError::BadGateway(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::errors::{Error as JwtError, ErrorKind};

    #[test]
    fn test_error_responses() {
        let cases = vec![
            (AppError::Auth(AuthError::ServiceNotReady), 503),
            (AppError::Auth(AuthError::Unauthenticated), 401),
            (AppError::Auth(AuthError::Expired), 403),
            (AppError::Auth(AuthError::SignatureInvalid), 403),
            (AppError::Auth(AuthError::Malformed("bad".into())), 403),
            (AppError::BadRequest("Invalid input".into()), 400),
            (AppError::Unauthorized("Invalid credentials".into()), 401),
            (AppError::NotFound("Resource not found".into()), 404),
            (AppError::Conflict("Email already exists".into()), 409),
            (AppError::ValidationError("title".into()), 422),
            (
                AppError::TooManyRequests {
                    retry_after: std::time::Duration::from_secs(9),
                },
                429,
            ),
            (AppError::BadGateway("connection refused".into()), 502),
            (AppError::InternalServerError("Server error".into()), 500),
        ];

        for (error, expected) in cases {
            let response = error.error_response();
            assert_eq!(response.status().as_u16(), expected, "status for {}", error);
        }
    }

    #[test]
    fn test_jwt_error_classification() {
        let expired: AuthError = JwtError::from(ErrorKind::ExpiredSignature).into();
        assert_eq!(expired, AuthError::Expired);

        let bad_sig: AuthError = JwtError::from(ErrorKind::InvalidSignature).into();
        assert_eq!(bad_sig, AuthError::SignatureInvalid);

        let wrong_alg: AuthError = JwtError::from(ErrorKind::InvalidAlgorithm).into();
        assert_eq!(wrong_alg, AuthError::SignatureInvalid);

        let garbage: AuthError = JwtError::from(ErrorKind::InvalidToken).into();
        assert!(matches!(garbage, AuthError::Malformed(_)));
    }

    #[test]
    fn test_not_ready_is_distinct_from_rejection() {
        let not_ready = AppError::from(AuthError::ServiceNotReady);
        let rejected = AppError::from(AuthError::SignatureInvalid);
        assert_ne!(not_ready.status_code(), rejected.status_code());
        assert!(not_ready.status_code().is_server_error());
    }
}
