use crate::config::ConfigError;
use crate::credentials::storage::StorageError;
use crate::dispatch::DispatchError;
use crate::session::{LoginError, ReauthReason, RenewalError, SessionError};
use crate::stream::StreamError;

/// How a failure should be treated by whoever sits above this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Retry later; nothing for the user to do.
    TransientNetwork,
    /// Send the user to the login screen with the attached reason.
    ReauthRequired,
    /// The backend broke its contract.
    MalformedUpstream,
    /// A stream fragment could not be interpreted.
    StreamProtocolAnomaly,
    /// Non-401 error status from the backend.
    Upstream,
    /// Configuration, storage, or cancellation on this side.
    Local,
}

/// Crate-level error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // ── Session ─────────────────────────────────────────────────────
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Renewal(#[from] RenewalError),

    #[error(transparent)]
    Login(#[from] LoginError),

    // ── Requests ────────────────────────────────────────────────────
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Stream(#[from] StreamError),

    // ── Local ───────────────────────────────────────────────────────
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl Error {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Session(e) => match e {
                SessionError::ReauthRequired(_) => ErrorCategory::ReauthRequired,
                SessionError::Unavailable(_) => ErrorCategory::TransientNetwork,
                SessionError::Cancelled => ErrorCategory::Local,
            },
            Self::Renewal(e) => match e {
                RenewalError::NetworkFailure(_) => ErrorCategory::TransientNetwork,
                RenewalError::InvalidRefreshToken { .. } => ErrorCategory::ReauthRequired,
                RenewalError::MalformedResponse(_) => ErrorCategory::MalformedUpstream,
            },
            Self::Login(e) => match e {
                LoginError::InvalidCredentials => ErrorCategory::ReauthRequired,
                LoginError::Network(_) => ErrorCategory::TransientNetwork,
                LoginError::MalformedResponse(_) => ErrorCategory::MalformedUpstream,
                LoginError::Upstream { .. } => ErrorCategory::Upstream,
            },
            Self::Dispatch(e) => match e {
                DispatchError::AuthRequired(_) => ErrorCategory::ReauthRequired,
                DispatchError::Upstream { .. } => ErrorCategory::Upstream,
                DispatchError::Transient(_) => ErrorCategory::TransientNetwork,
                DispatchError::MalformedResponse(_) => ErrorCategory::MalformedUpstream,
                DispatchError::InvalidRequest(_) | DispatchError::Cancelled => ErrorCategory::Local,
            },
            Self::Stream(e) => match e {
                StreamError::Transport(_) => ErrorCategory::TransientNetwork,
                StreamError::Incomplete => ErrorCategory::StreamProtocolAnomaly,
                StreamError::Cancelled => ErrorCategory::Local,
            },
            Self::Config(_) | Self::Storage(_) => ErrorCategory::Local,
        }
    }

    /// Whether the user must log in again.
    pub fn requires_reauth(&self) -> bool {
        self.category() == ErrorCategory::ReauthRequired
    }

    /// Reason code for the login screen, when there is one.
    pub fn reauth_reason(&self) -> Option<ReauthReason> {
        match self {
            Self::Session(e) => e.reauth_reason(),
            Self::Dispatch(e) => e.reauth_reason(),
            Self::Renewal(e) => e.credential_error().map(ReauthReason::from),
            Self::Login(LoginError::InvalidCredentials) => Some(ReauthReason::NotAuthenticated),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
