use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};

use super::claims::ClaimSet;
use crate::error::{AppError, KeyError};
use crate::models::User;

/// Default credential lifetime in seconds: one hour.
pub const DEFAULT_TOKEN_TTL_SECS: i64 = 3600;

/// Signs credentials for the identity service.
///
/// Holds the private key used for signing and the PEM text of the matching
/// public key, which the identity service hands out to verifiers.
#[derive(Clone)]
pub struct TokenIssuer {
    algorithm: Algorithm,
    encoding_key: EncodingKey,
    public_key_pem: String,
    ttl: chrono::Duration,
}

impl TokenIssuer {
    /// Builds an issuer from a PEM key pair.
    ///
    /// The public half is checked to parse for `algorithm` so that a
    /// misconfigured pair fails at startup rather than on the first login.
    pub fn from_pem(
        private_pem: &str,
        public_pem: &str,
        algorithm: Algorithm,
    ) -> Result<Self, KeyError> {
        let private = private_pem.trim().as_bytes();
        let encoding_key = match algorithm {
            Algorithm::RS256
            | Algorithm::RS384
            | Algorithm::RS512
            | Algorithm::PS256
            | Algorithm::PS384
            | Algorithm::PS512 => EncodingKey::from_rsa_pem(private),
            Algorithm::ES256 | Algorithm::ES384 => EncodingKey::from_ec_pem(private),
            Algorithm::EdDSA => EncodingKey::from_ed_pem(private),
            other => {
                return Err(KeyError::InvalidMaterial(format!(
                    "{:?} is not an asymmetric algorithm",
                    other
                )))
            }
        }
        .map_err(|e| KeyError::InvalidMaterial(format!("not a {:?} private key: {}", algorithm, e)))?;

        super::VerificationKey::from_pem(public_pem, algorithm)?;

        Ok(Self {
            algorithm,
            encoding_key,
            public_key_pem: public_pem.trim().to_string() + "\n",
            ttl: chrono::Duration::seconds(DEFAULT_TOKEN_TTL_SECS),
        })
    }

    pub fn with_ttl(mut self, ttl: chrono::Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// PEM text of the public key that verifies this issuer's credentials.
    pub fn public_key_pem(&self) -> &str {
        &self.public_key_pem
    }

    /// Issues a credential for `user`, expiring after the configured lifetime.
    pub fn issue(&self, user: &User) -> Result<String, AppError> {
        let exp = chrono::Utc::now()
            .checked_add_signed(self.ttl)
            .ok_or_else(|| AppError::InternalServerError("token expiry out of range".into()))?
            .timestamp();

        let claims = ClaimSet::new(
            user.id.clone(),
            user.email.clone(),
            user.role.as_str(),
            Some(user.team_id.clone()),
            exp.max(0) as u64,
        );
        self.sign(&claims)
    }

    pub(crate) fn sign(&self, claims: &ClaimSet) -> Result<String, AppError> {
        encode(&Header::new(self.algorithm), claims, &self.encoding_key)
            .map_err(|e| AppError::InternalServerError(format!("Failed to generate token: {}", e)))
    }
}

impl std::fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("algorithm", &self.algorithm)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}
