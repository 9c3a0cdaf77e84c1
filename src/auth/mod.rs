pub mod claims;
pub mod extractors;
pub mod forwarding;
pub mod key_provider;
pub mod middleware;
pub mod password;
pub mod token;
pub mod verifier;

#[cfg(test)]
pub(crate) mod testutil;

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use validator::Validate;

// Re-export necessary items
pub use claims::ClaimSet;
pub use extractors::AuthenticatedUser;
pub use forwarding::{
    is_identity_header, ForwardedIdentity, IdentityForwarder, USER_PAYLOAD_HEADER,
    USER_PAYLOAD_SIGNATURE_HEADER,
};
pub use key_provider::{HttpKeySource, KeyProvider, KeySource, VerificationKey};
pub use middleware::{AuthMiddleware, ForwardedIdentityMiddleware};
pub use password::{hash_password, verify_password};
pub use token::TokenIssuer;
pub use verifier::{bearer_credential, TokenVerifier};

lazy_static! {
    // Display names: letters first, then letters, spaces, dots, apostrophes or hyphens
    static ref NAME_REGEX: regex::Regex = regex::Regex::new(r"^\p{L}[\p{L} .'-]*$").unwrap();
}

/// Represents the payload for a user login request.
#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1))]
    pub password: String,
}

/// Represents the payload for a new user registration request.
#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    /// Display name, 2 to 50 characters.
    #[validate(
        length(min = 2, max = 50),
        regex(
            path = "NAME_REGEX",
            message = "Name must start with a letter and contain only letters, spaces, dots, apostrophes or hyphens"
        )
    )]
    pub name: String,
    #[validate(email)]
    pub email: String,
    /// Must be at least 6 characters long.
    #[validate(length(min = 6))]
    pub password: String,
}

/// Returned by a successful login.
#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub message: String,
    /// Signed credential to present as `Authorization: Bearer <token>`.
    pub token: String,
}
