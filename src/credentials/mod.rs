//! The live session credential and everything that holds it.
//!
//! A [`Credential`] is the `{access, refresh, expires_at, error}` tuple for
//! one authenticated session. It is created on login, replaced on every
//! renewal, and marked with a [`CredentialErrorKind`] once it must no longer
//! authorize requests.

pub mod clock;
pub mod expiry;
pub mod storage;
pub mod store;

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub use clock::{Clock, ManualClock, SystemClock};
pub use expiry::ExpiryPolicy;
pub use store::CredentialStore;

/// Why a credential stopped being usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialErrorKind {
    /// The backend refused the refresh token.
    InvalidRefreshToken,
    /// The renewal endpoint answered without a usable token pair.
    MalformedResponse,
    /// Renewal kept failing at the network level.
    RenewalExhausted,
    /// The backend rejected a request even after a fresh renewal.
    Rejected,
}

impl fmt::Display for CredentialErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidRefreshToken => write!(f, "invalid_refresh_token"),
            Self::MalformedResponse => write!(f, "malformed_response"),
            Self::RenewalExhausted => write!(f, "renewal_exhausted"),
            Self::Rejected => write!(f, "rejected"),
        }
    }
}

/// Access/refresh token pair with its expiry and error marker.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<CredentialErrorKind>,
}

impl Credential {
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            expires_at,
            error_kind: None,
        }
    }

    /// Copy of this credential marked as unusable.
    #[must_use]
    pub fn with_error(&self, kind: CredentialErrorKind) -> Self {
        Self {
            error_kind: Some(kind),
            ..self.clone()
        }
    }

    /// `false` once an error has been recorded; the tokens are then kept for
    /// diagnostics only.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        self.error_kind.is_none()
    }

    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Whether `now` falls inside the renewal window before expiry
    /// (or past expiry altogether).
    #[must_use]
    pub fn needs_renewal_at(&self, now: DateTime<Utc>, buffer: Duration) -> bool {
        self.expires_at
            .checked_sub_signed(buffer)
            .is_none_or(|renew_at| now >= renew_at)
    }

    /// Remaining lifetime, clamped at zero.
    #[must_use]
    pub fn time_until_expiry(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).max(Duration::zero())
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &fingerprint(&self.access_token))
            .field("refresh_token", &fingerprint(&self.refresh_token))
            .field("expires_at", &self.expires_at)
            .field("error_kind", &self.error_kind)
            .finish()
    }
}

/// Short, non-reversible tag for a token, safe to log.
pub fn fingerprint(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    let hex: String = digest.iter().take(4).map(|b| format!("{b:02x}")).collect();
    format!("sha256:{hex}")
}
