//! Session states, derived on demand from the stored credential and clock.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use super::error::ReauthReason;
use crate::credentials::Credential;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Anonymous,
    Fresh,
    /// Inside the renewal window, or already past expiry.
    NearExpiry,
    Renewing,
    Errored,
}

impl SessionState {
    /// Classify `credential` at `now`. `renewing` reports whether a renewal
    /// attempt is currently in flight.
    pub fn classify(
        credential: Option<&Credential>,
        now: DateTime<Utc>,
        buffer: Duration,
        renewing: bool,
    ) -> Self {
        match credential {
            None => Self::Anonymous,
            Some(c) if !c.is_usable() => Self::Errored,
            Some(_) if renewing => Self::Renewing,
            Some(c) if c.needs_renewal_at(now, buffer) => Self::NearExpiry,
            Some(_) => Self::Fresh,
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Anonymous => "anonymous",
            Self::Fresh => "fresh",
            Self::NearExpiry => "near_expiry",
            Self::Renewing => "renewing",
            Self::Errored => "errored",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of the session for diagnostics and UIs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    pub state: SessionState,
    /// Seconds until the access token expires; zero once expired.
    pub expires_in_secs: Option<i64>,
    pub error: Option<ReauthReason>,
    /// Consecutive network failures of proactive/reactive renewal.
    pub renewal_failures: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::CredentialErrorKind;

    #[test]
    fn test_classify_table() {
        let now = Utc::now();
        let buffer = Duration::minutes(5);
        let cred = Credential::new("A1", "R1", now + Duration::minutes(30));

        assert_eq!(SessionState::classify(None, now, buffer, false), SessionState::Anonymous);
        assert_eq!(SessionState::classify(Some(&cred), now, buffer, false), SessionState::Fresh);
        assert_eq!(
            SessionState::classify(Some(&cred), now + Duration::minutes(26), buffer, false),
            SessionState::NearExpiry
        );
        assert_eq!(
            SessionState::classify(Some(&cred), now + Duration::minutes(45), buffer, false),
            SessionState::NearExpiry
        );
        assert_eq!(SessionState::classify(Some(&cred), now, buffer, true), SessionState::Renewing);

        let errored = cred.with_error(CredentialErrorKind::InvalidRefreshToken);
        assert_eq!(
            SessionState::classify(Some(&errored), now, buffer, true),
            SessionState::Errored
        );
    }

    #[test]
    fn test_buffer_boundary_is_near_expiry() {
        let now = Utc::now();
        let cred = Credential::new("A1", "R1", now + Duration::minutes(5));
        assert_eq!(
            SessionState::classify(Some(&cred), now, Duration::minutes(5), false),
            SessionState::NearExpiry
        );
    }
}
