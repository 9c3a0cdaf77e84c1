//! Carries a verified identity from the gateway to internal services.
//!
//! The gateway serializes the [`ClaimSet`] it verified into the
//! `x-user-payload` header of the outbound request. Internal services read
//! the header back without re-verifying the credential. A malformed header
//! is logged and the request proceeds unauthenticated.
//!
//! When a forwarding secret is shared between both sides, the gateway also
//! attaches `x-user-payload-signature`, the hex HMAC-SHA256 of the payload,
//! and internal services refuse payloads whose signature is missing or wrong.
//! Without a secret, internal services must only be reachable through the
//! gateway.

use std::sync::Arc;

use hmac::{Hmac, Mac};
use log::warn;
use sha2::Sha256;

use super::claims::ClaimSet;
use crate::error::AuthError;

type HmacSha256 = Hmac<Sha256>;

pub const USER_PAYLOAD_HEADER: &str = "x-user-payload";
pub const USER_PAYLOAD_SIGNATURE_HEADER: &str = "x-user-payload-signature";

/// Returns true for headers that only the gateway may set.
pub fn is_identity_header(name: &str) -> bool {
    name.eq_ignore_ascii_case(USER_PAYLOAD_HEADER)
        || name.eq_ignore_ascii_case(USER_PAYLOAD_SIGNATURE_HEADER)
}

/// Header values produced by [`IdentityForwarder::encode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardedIdentity {
    pub payload: String,
    pub signature: Option<String>,
}

impl ForwardedIdentity {
    /// `(name, value)` pairs ready to attach to an outbound request.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![(USER_PAYLOAD_HEADER, self.payload.clone())];
        if let Some(signature) = &self.signature {
            headers.push((USER_PAYLOAD_SIGNATURE_HEADER, signature.clone()));
        }
        headers
    }
}

#[derive(Clone, Default)]
pub struct IdentityForwarder {
    secret: Option<Arc<[u8]>>,
}

impl IdentityForwarder {
    /// Forwarder that neither signs nor expects signatures.
    pub fn trusted() -> Self {
        Self { secret: None }
    }

    pub fn signed(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: Some(Arc::from(secret.as_ref())),
        }
    }

    /// Signed when a non-empty secret is given, trusted otherwise.
    pub fn from_secret(secret: Option<&str>) -> Self {
        match secret {
            Some(secret) if !secret.is_empty() => Self::signed(secret),
            _ => Self::trusted(),
        }
    }

    pub fn is_signed(&self) -> bool {
        self.secret.is_some()
    }

    /// Serializes verified claims into forwarding header values.
    pub fn encode(&self, claims: &ClaimSet) -> Result<ForwardedIdentity, AuthError> {
        let payload =
            serde_json::to_string(claims).map_err(|e| AuthError::Malformed(e.to_string()))?;
        let signature = match &self.secret {
            Some(secret) => Some(hex::encode(mac(secret, payload.as_bytes())?.finalize().into_bytes())),
            None => None,
        };
        Ok(ForwardedIdentity { payload, signature })
    }

    /// Reads forwarded header values back into claims.
    ///
    /// `Ok(None)` means no identity was forwarded. Errors classify a payload
    /// that is present but unusable.
    pub fn parse(
        &self,
        payload: Option<&[u8]>,
        signature: Option<&[u8]>,
    ) -> Result<Option<ClaimSet>, AuthError> {
        let payload = match payload {
            Some(payload) => payload,
            None => return Ok(None),
        };

        if let Some(secret) = &self.secret {
            let signature = signature
                .ok_or_else(|| AuthError::Malformed("missing identity signature".into()))?;
            let signature = hex::decode(signature)
                .map_err(|e| AuthError::Malformed(format!("identity signature is not hex: {}", e)))?;
            mac(secret, payload)?
                .verify_slice(&signature)
                .map_err(|_| AuthError::SignatureInvalid)?;
        }

        serde_json::from_slice::<ClaimSet>(payload)
            .map(Some)
            .map_err(|e| AuthError::Malformed(format!("invalid identity payload: {}", e)))
    }

    /// Like [`parse`](Self::parse), but an unusable payload is logged and
    /// treated as absent.
    pub fn resolve(&self, payload: Option<&[u8]>, signature: Option<&[u8]>) -> Option<ClaimSet> {
        match self.parse(payload, signature) {
            Ok(claims) => claims,
            Err(e) => {
                warn!("Ignoring forwarded identity, proceeding unauthenticated: {}", e);
                None
            }
        }
    }
}

fn mac(secret: &[u8], payload: &[u8]) -> Result<HmacSha256, AuthError> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| AuthError::Malformed(format!("unusable forwarding secret: {}", e)))?;
    mac.update(payload);
    Ok(mac)
}

impl std::fmt::Debug for IdentityForwarder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityForwarder")
            .field("signed", &self.is_signed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn claims() -> ClaimSet {
        ClaimSet::new("1", "john@example.com", "admin", Some("t1".into()), 1_900_000_000)
    }

    #[test]
    fn test_parse_inverts_encode() {
        for forwarder in [IdentityForwarder::trusted(), IdentityForwarder::signed("s3cret")] {
            let forwarded = forwarder.encode(&claims()).unwrap();
            let parsed = forwarder
                .parse(
                    Some(forwarded.payload.as_bytes()),
                    forwarded.signature.as_deref().map(str::as_bytes),
                )
                .unwrap();
            assert_eq!(parsed, Some(claims()));
        }
    }

    #[test]
    fn test_absent_header_is_unauthenticated() {
        let forwarder = IdentityForwarder::signed("s3cret");
        assert_eq!(forwarder.parse(None, None), Ok(None));
        assert_eq!(forwarder.resolve(None, Some(b"abcd")), None);
    }

    #[test]
    fn test_invalid_json_is_malformed_and_resolves_to_none() {
        let forwarder = IdentityForwarder::trusted();
        assert!(matches!(
            forwarder.parse(Some(b"{not json"), None),
            Err(AuthError::Malformed(_))
        ));
        assert!(matches!(
            forwarder.parse(Some(br#"{"email":"a@b.c"}"#), None),
            Err(AuthError::Malformed(_))
        ));
        assert_eq!(forwarder.resolve(Some(b"{not json"), None), None);
    }

    #[test]
    fn test_signed_forwarder_rejects_tampering() {
        let forwarder = IdentityForwarder::signed("s3cret");
        let forwarded = forwarder.encode(&claims()).unwrap();
        let signature = forwarded.signature.clone().unwrap();

        let tampered = forwarded.payload.replace("admin", "owner");
        assert_eq!(
            forwarder.parse(Some(tampered.as_bytes()), Some(signature.as_bytes())),
            Err(AuthError::SignatureInvalid)
        );

        // A payload minted without the secret carries no signature.
        let unsigned = IdentityForwarder::trusted().encode(&claims()).unwrap();
        assert!(unsigned.signature.is_none());
        assert!(matches!(
            forwarder.parse(Some(unsigned.payload.as_bytes()), None),
            Err(AuthError::Malformed(_))
        ));

        let other = IdentityForwarder::signed("other").encode(&claims()).unwrap();
        assert_eq!(
            forwarder.parse(
                Some(other.payload.as_bytes()),
                other.signature.as_deref().map(str::as_bytes)
            ),
            Err(AuthError::SignatureInvalid)
        );
    }

    #[test]
    fn test_headers_and_identity_header_names() {
        let forwarded = IdentityForwarder::signed("s3cret").encode(&claims()).unwrap();
        let names: Vec<_> = forwarded.headers().into_iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec![USER_PAYLOAD_HEADER, USER_PAYLOAD_SIGNATURE_HEADER]);

        assert!(is_identity_header("X-User-Payload"));
        assert!(is_identity_header("x-user-payload-signature"));
        assert!(!is_identity_header("authorization"));
    }

    #[test]
    fn test_from_secret() {
        assert!(!IdentityForwarder::from_secret(None).is_signed());
        assert!(!IdentityForwarder::from_secret(Some("")).is_signed());
        assert!(IdentityForwarder::from_secret(Some("k")).is_signed());
    }
}
