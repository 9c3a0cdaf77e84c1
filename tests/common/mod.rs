#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use ed25519_dalek::SigningKey;
use jsonwebtoken::Algorithm;
use taskmesh::auth::{KeyProvider, KeySource, TokenIssuer, TokenVerifier};
use taskmesh::error::KeyError;
use taskmesh::models::{Role, User};

/// `(private_pem, public_pem)` for a deterministic Ed25519 key pair.
pub fn ed25519_pem_pair(seed: u8) -> (String, String) {
    let signing_key = SigningKey::from_bytes(&[seed; 32]);

    let mut pkcs8 = vec![
        0x30, 0x2e, 0x02, 0x01, 0x00, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70, 0x04, 0x22, 0x04,
        0x20,
    ];
    pkcs8.extend_from_slice(&signing_key.to_bytes());

    let mut spki = vec![0x30, 0x2a, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70, 0x03, 0x21, 0x00];
    spki.extend_from_slice(&signing_key.verifying_key().to_bytes());

    (pem("PRIVATE KEY", &pkcs8), pem("PUBLIC KEY", &spki))
}

fn pem(label: &str, der: &[u8]) -> String {
    format!(
        "-----BEGIN {label}-----\n{}\n-----END {label}-----\n",
        STANDARD.encode(der)
    )
}

pub fn issuer(seed: u8) -> TokenIssuer {
    let (private_pem, public_pem) = ed25519_pem_pair(seed);
    TokenIssuer::from_pem(&private_pem, &public_pem, Algorithm::EdDSA).unwrap()
}

pub fn user(id: &str, email: &str) -> User {
    let now = chrono::Utc::now();
    User {
        id: id.into(),
        name: "Test User".into(),
        email: email.into(),
        password_hash: String::new(),
        role: Role::User,
        team_id: "t1".into(),
        created_at: now,
        updated_at: now,
    }
}

/// Key source serving fixed material, or failing when there is none.
pub struct StaticKeySource(pub Option<String>);

#[async_trait]
impl KeySource for StaticKeySource {
    async fn fetch(&self) -> Result<String, KeyError> {
        self.0
            .clone()
            .ok_or_else(|| KeyError::Unavailable("identity service down".into()))
    }

    fn describe(&self) -> String {
        "static test key".into()
    }
}

/// A verifier whose key has been acquired from `issuer`.
pub async fn ready_verifier(issuer: &TokenIssuer) -> TokenVerifier {
    let source = Arc::new(StaticKeySource(Some(issuer.public_key_pem().to_string())));
    let keys = Arc::new(KeyProvider::new(
        source,
        Algorithm::EdDSA,
        Duration::from_secs(60),
    ));
    keys.try_acquire().await.unwrap();
    TokenVerifier::new(keys)
}

/// A verifier that has no key yet; the retry loop is never started.
pub fn unready_verifier() -> TokenVerifier {
    let keys = Arc::new(KeyProvider::new(
        Arc::new(StaticKeySource(None)),
        Algorithm::EdDSA,
        Duration::from_secs(60),
    ));
    TokenVerifier::new(keys)
}
