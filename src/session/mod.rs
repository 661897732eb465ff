//! Session lifecycle: login, lazy expiry checks, single-flight renewal.

pub mod error;
pub mod manager;
pub mod renewer;
pub mod state;

pub use error::{LoginError, ReauthReason, RenewalError, SessionError};
pub use manager::{SessionManager, SessionPolicy};
pub use renewer::{Authenticator, HttpAuthClient, LoginCredentials, LoginOutcome, TokenRenewer};
pub use state::{SessionState, SessionStatus};
