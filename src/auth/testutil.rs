//! Ed25519 key fixtures for unit tests.

use base64::{engine::general_purpose::STANDARD, Engine};
use ed25519_dalek::SigningKey;

/// Returns `(private_pem, public_pem)` for a deterministic Ed25519 key pair.
///
/// Different seeds give unrelated key pairs.
pub fn ed25519_pem_pair(seed: u8) -> (String, String) {
    let signing_key = SigningKey::from_bytes(&[seed; 32]);

    let mut pkcs8 = vec![
        0x30, 0x2e, 0x02, 0x01, 0x00, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70, 0x04, 0x22, 0x04,
        0x20,
    ];
    pkcs8.extend_from_slice(&signing_key.to_bytes());

    let mut spki = vec![
        0x30, 0x2a, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70, 0x03, 0x21, 0x00,
    ];
    spki.extend_from_slice(&signing_key.verifying_key().to_bytes());

    (pem("PRIVATE KEY", &pkcs8), pem("PUBLIC KEY", &spki))
}

fn pem(label: &str, der: &[u8]) -> String {
    format!(
        "-----BEGIN {label}-----\n{}\n-----END {label}-----\n",
        STANDARD.encode(der)
    )
}
