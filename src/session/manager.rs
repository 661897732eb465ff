//! Session lifecycle manager.
//!
//! Owns every write to the [`CredentialStore`] and decides, on each access,
//! whether the stored access token can be handed out or must be renewed
//! first. State is evaluated lazily against the clock; nothing runs in the
//! background except a renewal that somebody asked for.
//!
//! At most one renewal is in flight at a time. It runs on its own task and is
//! shared by every caller that needs it, so cancelling one caller never
//! cancels the renewal the others are waiting on. The task writes its outcome
//! to the store before completing, which means a waiter always observes the
//! post-renewal credential.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration as StdDuration;

use chrono::Duration;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tracing::{debug, error, info, instrument, warn};

use super::error::{LoginError, ReauthReason, RenewalError, SessionError};
use super::renewer::{Authenticator, LoginCredentials, TokenRenewer};
use super::state::{SessionState, SessionStatus};
use crate::config::SessionConfig;
use crate::credentials::{Clock, Credential, CredentialErrorKind, CredentialStore, fingerprint};
use crate::dispatch::RequestContext;

type RenewalOutcome = Result<Credential, RenewalError>;
type SharedRenewal = Shared<BoxFuture<'static, RenewalOutcome>>;

/// Timing and retry knobs for the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionPolicy {
    /// How long before expiry a renewal is triggered.
    pub renewal_buffer: Duration,
    /// Upper bound on a single renewal call.
    pub renewal_timeout: StdDuration,
    /// Consecutive network failures tolerated before the session errors.
    pub max_renewal_failures: u32,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            renewal_buffer: Duration::minutes(5),
            renewal_timeout: StdDuration::from_secs(15),
            max_renewal_failures: 3,
        }
    }
}

impl From<&SessionConfig> for SessionPolicy {
    fn from(config: &SessionConfig) -> Self {
        Self {
            renewal_buffer: crate::config::seconds(config.renewal_buffer_secs),
            renewal_timeout: StdDuration::from_secs(config.renewal_timeout_secs),
            max_renewal_failures: config.max_renewal_failures,
        }
    }
}

/// Handle to the session. Clones share the same session.
#[derive(Clone)]
pub struct SessionManager {
    core: Arc<Core>,
}

struct Core {
    store: CredentialStore,
    renewer: Arc<dyn TokenRenewer>,
    authenticator: Arc<dyn Authenticator>,
    clock: Arc<dyn Clock>,
    policy: SessionPolicy,
    flight: Mutex<Flight>,
}

#[derive(Default)]
struct Flight {
    current: Option<(u64, SharedRenewal)>,
    next_id: u64,
    /// Bumped on login and logout; outcomes of renewals started under an
    /// older generation are discarded.
    generation: u64,
    failures: u32,
}

impl Flight {
    fn in_flight(&self) -> Option<SharedRenewal> {
        self.current.as_ref().map(|(_, renewal)| renewal.clone())
    }
}

impl SessionManager {
    /// Manager backed by one client that serves both login and renewal.
    pub fn new<B>(
        store: CredentialStore,
        backend: Arc<B>,
        policy: SessionPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self
    where
        B: TokenRenewer + Authenticator + 'static,
    {
        Self::from_parts(store, backend.clone(), backend, policy, clock)
    }

    pub fn from_parts(
        store: CredentialStore,
        renewer: Arc<dyn TokenRenewer>,
        authenticator: Arc<dyn Authenticator>,
        policy: SessionPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            core: Arc::new(Core {
                store,
                renewer,
                authenticator,
                clock,
                policy,
                flight: Mutex::new(Flight::default()),
            }),
        }
    }

    /// Read-only handle to the underlying store.
    pub fn store(&self) -> &CredentialStore {
        &self.core.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.core.clock
    }

    pub fn policy(&self) -> &SessionPolicy {
        &self.core.policy
    }

    // MARK: - Login / logout

    /// Log in and replace whatever session existed before, errored or not.
    #[instrument(skip_all, fields(username = %credentials.username))]
    pub async fn login(&self, credentials: &LoginCredentials) -> Result<serde_json::Value, LoginError> {
        let outcome = self.core.authenticator.login(credentials).await?;
        {
            let mut flight = self.core.lock_flight();
            flight.generation += 1;
            flight.failures = 0;
            flight.current = None;
            self.core.store.set(outcome.credential.clone());
        }
        info!(
            expires_at = %outcome.credential.expires_at,
            access_fp = %fingerprint(&outcome.credential.access_token),
            "Logged in"
        );
        Ok(outcome.user)
    }

    /// End the session. A renewal still in flight completes, but its result
    /// is thrown away.
    pub fn logout(&self) {
        let mut flight = self.core.lock_flight();
        flight.generation += 1;
        flight.failures = 0;
        flight.current = None;
        self.core.store.clear();
        info!("Logged out");
    }

    // MARK: - State

    pub fn state(&self) -> SessionState {
        let renewing = self.core.lock_flight().current.is_some();
        SessionState::classify(
            self.core.store.get().as_ref(),
            self.core.clock.now(),
            self.core.policy.renewal_buffer,
            renewing,
        )
    }

    pub fn status(&self) -> SessionStatus {
        let (renewing, failures) = {
            let flight = self.core.lock_flight();
            (flight.current.is_some(), flight.failures)
        };
        let credential = self.core.store.get();
        let now = self.core.clock.now();
        SessionStatus {
            state: SessionState::classify(
                credential.as_ref(),
                now,
                self.core.policy.renewal_buffer,
                renewing,
            ),
            expires_in_secs: credential
                .as_ref()
                .map(|c| c.time_until_expiry(now).num_seconds()),
            error: credential
                .as_ref()
                .and_then(|c| c.error_kind)
                .map(ReauthReason::from),
            renewal_failures: failures,
        }
    }

    // MARK: - Acquire

    /// Hand out an access token that is fresh enough to use, renewing first
    /// if the credential is inside the renewal window.
    #[instrument(skip_all, fields(request_id = %ctx.request_id()))]
    pub async fn acquire(&self, ctx: &RequestContext) -> Result<String, SessionError> {
        if ctx.is_cancelled() {
            return Err(SessionError::Cancelled);
        }

        let renewal = {
            let mut flight = self.core.lock_flight();
            let credential = usable(self.core.store.get())?;

            match flight.in_flight() {
                Some(renewal) => renewal,
                None => {
                    let now = self.core.clock.now();
                    if !credential.needs_renewal_at(now, self.core.policy.renewal_buffer) {
                        return Ok(credential.access_token);
                    }
                    debug!(expires_at = %credential.expires_at, "Credential near expiry, renewing");
                    self.core.begin_renewal(&mut flight, credential.refresh_token)
                }
            }
        };

        if !ctx.waits_for_renewal() {
            return Err(SessionError::Unavailable("renewal in progress".to_string()));
        }
        let outcome = self.await_renewal(renewal, ctx).await?;
        self.settle(outcome, false)
    }

    /// Renew after the backend rejected `rejected_token`, even if the clock
    /// says it is still fresh.
    ///
    /// If the store already holds a different token, another caller has
    /// renewed in the meantime and that token is returned without a new
    /// renewal call.
    #[instrument(skip_all, fields(request_id = %ctx.request_id(), token_fp = %fingerprint(rejected_token)))]
    pub async fn renew_rejected(
        &self,
        rejected_token: &str,
        ctx: &RequestContext,
    ) -> Result<String, SessionError> {
        if ctx.is_cancelled() {
            return Err(SessionError::Cancelled);
        }

        let renewal = {
            let mut flight = self.core.lock_flight();
            let credential = usable(self.core.store.get())?;

            match flight.in_flight() {
                Some(renewal) => renewal,
                None if credential.access_token != rejected_token => {
                    debug!("Token already renewed by another caller");
                    return Ok(credential.access_token);
                }
                None => {
                    info!("Backend rejected access token, renewing reactively");
                    self.core.begin_renewal(&mut flight, credential.refresh_token)
                }
            }
        };

        let outcome = self.await_renewal(renewal, ctx).await?;
        self.settle(outcome, true)
    }

    /// Mark the session errored because a freshly renewed token was refused
    /// as well. No-op if the stored token has changed since.
    pub fn mark_rejected(&self, rejected_token: &str) {
        let _flight = self.core.lock_flight();
        let changed = self.core.store.update(|slot| match slot {
            Some(c) if c.is_usable() && c.access_token == rejected_token => {
                c.error_kind = Some(CredentialErrorKind::Rejected);
                true
            }
            _ => false,
        });
        if changed {
            warn!(token_fp = %fingerprint(rejected_token), "Renewed token rejected, session errored");
        }
    }

    async fn await_renewal(
        &self,
        renewal: SharedRenewal,
        ctx: &RequestContext,
    ) -> Result<RenewalOutcome, SessionError> {
        tokio::select! {
            biased;
            _ = ctx.cancellation().cancelled() => Err(SessionError::Cancelled),
            outcome = renewal => Ok(outcome),
        }
    }

    /// Decide what a waiter gets once the renewal it joined has finished.
    /// The store already reflects the outcome, so it is the source of truth.
    fn settle(&self, outcome: RenewalOutcome, reactive: bool) -> Result<String, SessionError> {
        let credential = usable(self.core.store.get())?;
        match outcome {
            Ok(_) => Ok(credential.access_token),
            Err(RenewalError::NetworkFailure(message)) => {
                let expired = credential.is_expired_at(self.core.clock.now());
                if reactive || expired {
                    Err(SessionError::Unavailable(message))
                } else {
                    Ok(credential.access_token)
                }
            }
            Err(err) => Err(SessionError::ReauthRequired(
                err.credential_error()
                    .map(ReauthReason::from)
                    .unwrap_or(ReauthReason::Expired),
            )),
        }
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("state", &self.state())
            .field("policy", &self.core.policy)
            .finish()
    }
}

impl Core {
    fn lock_flight(&self) -> MutexGuard<'_, Flight> {
        self.flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start the one renewal for the current generation. Caller holds the
    /// flight lock and has checked that nothing is in flight.
    fn begin_renewal(self: &Arc<Self>, flight: &mut Flight, refresh_token: String) -> SharedRenewal {
        let id = flight.next_id;
        flight.next_id += 1;
        let generation = flight.generation;

        let core = Arc::clone(self);
        let refresh = refresh_token.clone();
        let task = tokio::spawn(async move { core.run_renewal(id, generation, refresh).await });
        let core = Arc::downgrade(self);
        let shared = async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(error = %e, "Renewal task aborted");
                    let outcome =
                        Err(RenewalError::NetworkFailure(format!("renewal task failed: {e}")));
                    if let Some(core) = core.upgrade() {
                        core.finish(id, generation, &refresh_token, &outcome);
                    }
                    outcome
                }
            }
        }
        .boxed()
        .shared();

        flight.current = Some((id, shared.clone()));
        shared
    }

    async fn run_renewal(&self, id: u64, generation: u64, refresh_token: String) -> RenewalOutcome {
        let timeout = self.policy.renewal_timeout;
        let outcome = match tokio::time::timeout(timeout, self.renewer.renew(&refresh_token)).await {
            Ok(result) => result,
            Err(_) => Err(RenewalError::NetworkFailure(format!(
                "renewal timed out after {}ms",
                timeout.as_millis()
            ))),
        };

        self.finish(id, generation, &refresh_token, &outcome);
        outcome
    }

    /// Record the outcome of flight `id` and retire it. Runs exactly once per
    /// flight, either from the task or after the task died.
    fn finish(&self, id: u64, generation: u64, refresh_token: &str, outcome: &RenewalOutcome) {
        let mut flight = self.lock_flight();
        if flight.current.as_ref().is_none_or(|(current, _)| *current != id) {
            return;
        }
        flight.current = None;
        if flight.generation == generation {
            self.apply(&mut flight, refresh_token, outcome);
        } else {
            debug!("Session ended during renewal, discarding outcome");
        }
    }

    fn apply(&self, flight: &mut Flight, refresh_token: &str, outcome: &RenewalOutcome) {
        match outcome {
            Ok(credential) => {
                flight.failures = 0;
                self.store.set(credential.clone());
                info!(
                    expires_at = %credential.expires_at,
                    access_fp = %fingerprint(&credential.access_token),
                    "Session renewed"
                );
            }
            Err(err) if err.is_terminal() => {
                let kind = err
                    .credential_error()
                    .unwrap_or(CredentialErrorKind::InvalidRefreshToken);
                self.mark_errored(refresh_token, kind);
                warn!(error = %err, "Renewal failed, session errored");
            }
            Err(err) => {
                flight.failures += 1;
                warn!(
                    error = %err,
                    attempt = flight.failures,
                    max = self.policy.max_renewal_failures,
                    "Renewal network failure"
                );
                if flight.failures >= self.policy.max_renewal_failures {
                    self.mark_errored(refresh_token, CredentialErrorKind::RenewalExhausted);
                    warn!("Renewal attempts exhausted, session errored");
                }
            }
        }
    }

    fn mark_errored(&self, refresh_token: &str, kind: CredentialErrorKind) {
        self.store.update(|slot| match slot {
            Some(c) if c.is_usable() && c.refresh_token == refresh_token => {
                c.error_kind = Some(kind);
                true
            }
            _ => false,
        });
    }
}

/// The stored credential, if it may authorize requests.
fn usable(credential: Option<Credential>) -> Result<Credential, SessionError> {
    let credential =
        credential.ok_or(SessionError::ReauthRequired(ReauthReason::NotAuthenticated))?;
    match credential.error_kind {
        Some(kind) => Err(SessionError::ReauthRequired(kind.into())),
        None => Ok(credential),
    }
}
