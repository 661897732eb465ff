//! Per-call request context.

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// State carried by one logical outbound call across its (at most two)
/// attempts.
#[derive(Debug, Clone)]
pub struct RequestContext {
    retries_used: u8,
    cancellation: CancellationToken,
    wait_for_renewal: bool,
    request_id: Uuid,
}

impl RequestContext {
    pub fn new() -> Self {
        Self {
            retries_used: 0,
            cancellation: CancellationToken::new(),
            wait_for_renewal: true,
            request_id: Uuid::new_v4(),
        }
    }

    /// Tie this call to an externally owned cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Fail with `Unavailable` instead of suspending on an in-flight renewal.
    #[must_use]
    pub fn without_waiting(mut self) -> Self {
        self.wait_for_renewal = false;
        self
    }

    pub fn retries_used(&self) -> u8 {
        self.retries_used
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn waits_for_renewal(&self) -> bool {
        self.wait_for_renewal
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// Consume the single retry. Returns `false` if it was already used.
    pub(crate) fn take_retry(&mut self) -> bool {
        if self.retries_used >= 1 {
            return false;
        }
        self.retries_used = 1;
        true
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_retry_budget() {
        let mut ctx = RequestContext::new();
        assert_eq!(ctx.retries_used(), 0);
        assert!(ctx.take_retry());
        assert_eq!(ctx.retries_used(), 1);
        assert!(!ctx.take_retry());
        assert_eq!(ctx.retries_used(), 1);
    }

    #[test]
    fn test_external_cancellation() {
        let token = CancellationToken::new();
        let ctx = RequestContext::new().with_cancellation(token.clone());
        assert!(!ctx.is_cancelled());
        token.cancel();
        assert!(ctx.is_cancelled());
    }

    #[test]
    fn test_request_ids_are_unique() {
        assert_ne!(RequestContext::new().request_id(), RequestContext::new().request_id());
    }
}
