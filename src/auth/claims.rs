use serde::{Deserialize, Serialize};

/// Identity decoded from a verified credential.
///
/// Outside this crate a `ClaimSet` only comes from [`TokenVerifier::verify`]
/// or from parsing a forwarded identity header, never from client input
/// directly.
///
/// [`TokenVerifier::verify`]: crate::auth::TokenVerifier::verify
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimSet {
    sub: String,
    email: String,
    role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    team_id: Option<String>,
    exp: u64,
}

impl ClaimSet {
    pub(crate) fn new(
        sub: impl Into<String>,
        email: impl Into<String>,
        role: impl Into<String>,
        team_id: Option<String>,
        exp: u64,
    ) -> Self {
        Self {
            sub: sub.into(),
            email: email.into(),
            role: role.into(),
            team_id,
            exp,
        }
    }

    /// Subject: the user's id.
    pub fn sub(&self) -> &str {
        &self.sub
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn team_id(&self) -> Option<&str> {
        self.team_id.as_deref()
    }

    /// Expiry instant, seconds since the Unix epoch.
    pub fn exp(&self) -> u64 {
        self.exp
    }
}
