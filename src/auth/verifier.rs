use std::sync::Arc;

use jsonwebtoken::{decode, Validation};

use super::claims::ClaimSet;
use super::key_provider::{KeyProvider, VerificationKey};
use crate::error::AuthError;

/// Validates bearer credentials against the key held by a [`KeyProvider`].
///
/// Holds no mutable state of its own; clones share the provider.
#[derive(Clone)]
pub struct TokenVerifier {
    keys: Arc<KeyProvider>,
}

impl TokenVerifier {
    pub fn new(keys: Arc<KeyProvider>) -> Self {
        Self { keys }
    }

    pub fn key_provider(&self) -> &Arc<KeyProvider> {
        &self.keys
    }

    /// Verifies a credential and returns its claims.
    ///
    /// Fails with `ServiceNotReady` while no key has been acquired,
    /// `Malformed` for anything that is not a well-formed token carrying a
    /// claim set, `SignatureInvalid` when the signature does not verify under
    /// the key's algorithm, and `Expired` once `exp` has passed.
    pub fn verify(&self, credential: &str) -> Result<ClaimSet, AuthError> {
        let key = self.keys.current().ok_or(AuthError::ServiceNotReady)?;
        verify_with_key(credential, &key)
    }

    /// Verifies an optional credential as presented on an inbound request.
    ///
    /// Readiness is checked first, so a missing credential is reported as
    /// `ServiceNotReady` until a key is available and as `Unauthenticated`
    /// afterwards.
    pub fn authenticate(&self, credential: Option<&str>) -> Result<ClaimSet, AuthError> {
        match credential {
            Some(credential) => self.verify(credential),
            None if !self.keys.is_ready() => Err(AuthError::ServiceNotReady),
            None => Err(AuthError::Unauthenticated),
        }
    }
}

/// Extracts the credential from an `Authorization: Bearer <token>` value.
pub fn bearer_credential(header_value: &str) -> Option<&str> {
    let (scheme, credential) = header_value.trim().split_once(' ')?;
    let credential = credential.trim();
    if scheme.eq_ignore_ascii_case("bearer") && !credential.is_empty() {
        Some(credential)
    } else {
        None
    }
}

/// Verifies a credential against an explicit key.
pub fn verify_with_key(credential: &str, key: &VerificationKey) -> Result<ClaimSet, AuthError> {
    let mut validation = Validation::new(key.algorithm());
    validation.leeway = 0;
    validation.validate_exp = true;
    validation.validate_aud = false;
    validation.set_required_spec_claims(&["exp"]);

    decode::<ClaimSet>(credential, key.decoding_key(), &validation)
        .map(|data| data.claims)
        .map_err(AuthError::from)
}
