//! Error types for the session layer.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::credentials::CredentialErrorKind;

/// Machine-readable reason carried to the login screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReauthReason {
    /// Nobody is logged in.
    NotAuthenticated,
    /// The access token ran out and was not renewed.
    Expired,
    /// The backend rejected the refresh token.
    InvalidRefreshToken,
    /// The backend broke the token-pair contract.
    MalformedResponse,
    /// Renewal kept failing on the network.
    NetworkDuringRefresh,
    /// Requests were rejected even with a freshly renewed token.
    Rejected,
}

impl ReauthReason {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NotAuthenticated => "not_authenticated",
            Self::Expired => "expired",
            Self::InvalidRefreshToken => "invalid_refresh_token",
            Self::MalformedResponse => "malformed_response",
            Self::NetworkDuringRefresh => "network_during_refresh",
            Self::Rejected => "rejected",
        }
    }
}

impl fmt::Display for ReauthReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReauthReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_authenticated" => Ok(Self::NotAuthenticated),
            "expired" => Ok(Self::Expired),
            "invalid_refresh_token" => Ok(Self::InvalidRefreshToken),
            "malformed_response" => Ok(Self::MalformedResponse),
            "network_during_refresh" => Ok(Self::NetworkDuringRefresh),
            "rejected" => Ok(Self::Rejected),
            _ => Err(format!("Unknown reauth reason: {s}")),
        }
    }
}

impl From<CredentialErrorKind> for ReauthReason {
    fn from(kind: CredentialErrorKind) -> Self {
        match kind {
            CredentialErrorKind::InvalidRefreshToken => Self::InvalidRefreshToken,
            CredentialErrorKind::MalformedResponse => Self::MalformedResponse,
            CredentialErrorKind::RenewalExhausted => Self::NetworkDuringRefresh,
            CredentialErrorKind::Rejected => Self::Rejected,
        }
    }
}

/// Outcome of a failed call to the renewal endpoint.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenewalError {
    /// Transport failure or timeout; the refresh token may still be good.
    #[error("Renewal network failure: {0}")]
    NetworkFailure(String),

    /// The refresh token was rejected or rotated elsewhere.
    #[error("Refresh token rejected (HTTP {status})")]
    InvalidRefreshToken { status: u16 },

    /// The endpoint answered without a usable token pair.
    #[error("Malformed renewal response: {0}")]
    MalformedResponse(String),
}

impl RenewalError {
    /// Terminal errors end the session; network failures do not.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::NetworkFailure(_))
    }

    /// Marker recorded on the credential for a terminal error.
    pub fn credential_error(&self) -> Option<CredentialErrorKind> {
        match self {
            Self::NetworkFailure(_) => None,
            Self::InvalidRefreshToken { .. } => Some(CredentialErrorKind::InvalidRefreshToken),
            Self::MalformedResponse(_) => Some(CredentialErrorKind::MalformedResponse),
        }
    }
}

/// Failure to log in.
#[derive(Debug, thiserror::Error)]
pub enum LoginError {
    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("Login network failure: {0}")]
    Network(String),

    #[error("Malformed login response: {0}")]
    MalformedResponse(String),

    #[error("Login failed with HTTP {status}: {message}")]
    Upstream { status: u16, message: String },
}

/// Why `acquire` could not hand out an access token.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// The session is anonymous or errored; the user must log in again.
    #[error("Re-authentication required ({0})")]
    ReauthRequired(ReauthReason),

    /// No usable token right now, but the session is intact.
    #[error("Session temporarily unavailable: {0}")]
    Unavailable(String),

    #[error("Cancelled")]
    Cancelled,
}

impl SessionError {
    #[must_use]
    pub fn requires_reauth(&self) -> bool {
        matches!(self, Self::ReauthRequired(_))
    }

    pub fn reauth_reason(&self) -> Option<ReauthReason> {
        match self {
            Self::ReauthRequired(reason) => Some(*reason),
            _ => None,
        }
    }
}
