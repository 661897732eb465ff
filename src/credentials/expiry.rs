//! Deciding when an access token expires.
//!
//! The backend may declare a lifetime (`expires_in`), the token may carry an
//! `exp` claim, and the client has a configured TTL that is supposed to
//! mirror the backend's. These can drift apart, so the earliest known source
//! wins and a disagreement with the configured TTL is logged.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

/// Tolerance before a claim/TTL mismatch is reported.
const DRIFT_TOLERANCE_SECS: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiryPolicy {
    /// Assumed token lifetime when nothing better is known.
    pub token_ttl: Duration,
    /// Read the `exp` claim from JWT-shaped access tokens.
    pub trust_token_claims: bool,
}

impl ExpiryPolicy {
    pub fn new(token_ttl: Duration, trust_token_claims: bool) -> Self {
        Self {
            token_ttl,
            trust_token_claims,
        }
    }

    /// Compute `expires_at` for a freshly issued access token.
    pub fn resolve(
        &self,
        now: DateTime<Utc>,
        declared_expires_in: Option<i64>,
        access_token: &str,
    ) -> DateTime<Utc> {
        let configured = now
            .checked_add_signed(self.token_ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let declared = declared_expires_in
            .filter(|secs| *secs > 0)
            .and_then(|secs| {
                let at = Duration::try_seconds(secs).and_then(|d| now.checked_add_signed(d));
                if at.is_none() {
                    warn!(expires_in = secs, "Declared token lifetime out of range, ignoring");
                }
                at
            });
        let claimed = if self.trust_token_claims {
            jwt_expiry(access_token)
        } else {
            None
        };

        if let Some(claim) = claimed {
            let drift = (claim - configured).num_seconds().abs();
            if drift > DRIFT_TOLERANCE_SECS {
                warn!(
                    drift_secs = drift,
                    configured_ttl_secs = self.token_ttl.num_seconds(),
                    "Token exp claim disagrees with configured TTL"
                );
            }
        }

        match (declared, claimed) {
            (Some(d), Some(c)) => d.min(c),
            (Some(d), None) => d,
            (None, Some(c)) => c,
            (None, None) => {
                debug!("No expiry information from backend, using configured TTL");
                configured
            }
        }
    }
}

/// Extract the `exp` claim from a JWT without verifying it.
///
/// Returns `None` for opaque tokens or payloads without a numeric `exp`.
pub fn jwt_expiry(token: &str) -> Option<DateTime<Utc>> {
    let mut parts = token.split('.');
    let (_header, payload, _sig) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }

    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    let exp = claims.get("exp")?;
    let secs = exp.as_i64().or_else(|| exp.as_f64().map(|f| f as i64))?;
    DateTime::from_timestamp(secs, 0)
}
