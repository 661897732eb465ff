//! Navigation gate.
//!
//! Decides synchronously, from the credential store snapshot alone, whether a
//! route may be entered. It never renews and never touches the network.

use std::sync::Arc;

use tracing::debug;

use crate::config::GuardConfig;
use crate::credentials::{Clock, CredentialStore};
use crate::session::ReauthReason;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteClass {
    /// Reachable by anyone.
    Public,
    /// Requires a valid session.
    Protected,
    /// Login and registration pages.
    Auth,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    Allow,
    RedirectToLogin {
        /// Where the user was headed, for after login.
        next: Option<String>,
        reason: Option<ReauthReason>,
    },
    RedirectToLanding {
        path: String,
    },
}

impl GuardDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }

    /// Redirect target, or `None` for [`GuardDecision::Allow`].
    ///
    /// Login redirects render as `{login_path}?next=<path>&reason=<code>`,
    /// omitting whichever parameter is absent.
    pub fn location(&self, login_path: &str) -> Option<String> {
        match self {
            Self::Allow => None,
            Self::RedirectToLanding { path } => Some(path.clone()),
            Self::RedirectToLogin { next, reason } => {
                let mut params = Vec::with_capacity(2);
                if let Some(next) = next {
                    params.push(format!("next={}", urlencoding::encode(next)));
                }
                if let Some(reason) = reason {
                    params.push(format!("reason={}", reason.as_str()));
                }
                if params.is_empty() {
                    Some(login_path.to_string())
                } else {
                    Some(format!("{login_path}?{}", params.join("&")))
                }
            }
        }
    }
}

/// Route gate reading the shared credential store.
#[derive(Clone)]
pub struct RouteGuard {
    store: CredentialStore,
    clock: Arc<dyn Clock>,
    config: GuardConfig,
}

impl RouteGuard {
    pub fn new(store: CredentialStore, clock: Arc<dyn Clock>, config: GuardConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    /// Classify by path only; query strings and fragments are ignored.
    pub fn classify(&self, path: &str) -> RouteClass {
        let path = strip_query(path);
        if self.config.auth_routes.iter().any(|r| r == path) {
            RouteClass::Auth
        } else if self.config.public_routes.iter().any(|r| r == path)
            || self
                .config
                .public_prefixes
                .iter()
                .any(|p| path.starts_with(p.as_str()))
        {
            RouteClass::Public
        } else {
            RouteClass::Protected
        }
    }

    pub fn check(&self, path: &str) -> GuardDecision {
        let class = self.classify(path);
        let credential = self.store.get();
        let now = self.clock.now();

        let decision = match (credential, class) {
            (_, RouteClass::Public) => GuardDecision::Allow,
            (None, RouteClass::Auth) => GuardDecision::Allow,
            (None, RouteClass::Protected) => GuardDecision::RedirectToLogin {
                next: Some(path.to_string()),
                reason: None,
            },
            // Errored sessions must be able to reach the login page again.
            (Some(c), RouteClass::Auth) if !c.is_usable() || c.is_expired_at(now) => {
                GuardDecision::Allow
            }
            (Some(_), RouteClass::Auth) => GuardDecision::RedirectToLanding {
                path: self.config.landing_path.clone(),
            },
            (Some(c), RouteClass::Protected) => match c.error_kind {
                Some(kind) => GuardDecision::RedirectToLogin {
                    next: Some(path.to_string()),
                    reason: Some(ReauthReason::from(kind)),
                },
                None if c.is_expired_at(now) => GuardDecision::RedirectToLogin {
                    next: Some(path.to_string()),
                    reason: Some(ReauthReason::Expired),
                },
                None => GuardDecision::Allow,
            },
        };

        debug!(path, ?class, ?decision, "Route guard decision");
        decision
    }

    /// [`RouteGuard::check`] rendered as a redirect target.
    pub fn redirect_for(&self, path: &str) -> Option<String> {
        self.check(path).location(&self.config.login_path)
    }
}

impl std::fmt::Debug for RouteGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteGuard")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn strip_query(path: &str) -> &str {
    let end = path.find(['?', '#']).unwrap_or(path.len());
    &path[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{Credential, CredentialErrorKind, ManualClock};
    use chrono::Duration;

    fn guard_at(clock: &Arc<ManualClock>, credential: Option<Credential>) -> RouteGuard {
        let store = match credential {
            Some(c) => CredentialStore::with_credential(c),
            None => CredentialStore::new(),
        };
        RouteGuard::new(store, clock.clone(), GuardConfig::default())
    }

    fn guard_with(credential: Option<Credential>) -> RouteGuard {
        guard_at(&Arc::new(ManualClock::starting_now()), credential)
    }

    fn valid(now: chrono::DateTime<chrono::Utc>) -> Credential {
        Credential::new("A1", "R1", now + Duration::minutes(30))
    }

    #[test]
    fn test_classify() {
        let guard = guard_with(None);
        assert_eq!(guard.classify("/"), RouteClass::Public);
        assert_eq!(guard.classify("/about"), RouteClass::Public);
        assert_eq!(guard.classify("/static/app.css"), RouteClass::Public);
        assert_eq!(guard.classify("/login"), RouteClass::Auth);
        assert_eq!(guard.classify("/login?next=%2Fx"), RouteClass::Auth);
        assert_eq!(guard.classify("/register"), RouteClass::Auth);
        assert_eq!(guard.classify("/documents"), RouteClass::Protected);
        assert_eq!(guard.classify("/about/team"), RouteClass::Protected);
        assert_eq!(guard.classify("/staticfoo"), RouteClass::Protected);
    }

    #[test]
    fn test_anonymous() {
        let guard = guard_with(None);
        assert_eq!(guard.check("/"), GuardDecision::Allow);
        assert_eq!(guard.check("/login"), GuardDecision::Allow);
        assert_eq!(
            guard.check("/documents"),
            GuardDecision::RedirectToLogin {
                next: Some("/documents".into()),
                reason: None,
            }
        );
    }

    #[test]
    fn test_valid_session() {
        let now = chrono::Utc::now();
        let guard = guard_with(Some(valid(now)));
        assert!(guard.check("/documents").is_allowed());
        assert!(guard.check("/").is_allowed());
        assert_eq!(
            guard.check("/login"),
            GuardDecision::RedirectToLanding {
                path: "/dashboard".into()
            }
        );
    }

    #[test]
    fn test_errored_session() {
        let now = chrono::Utc::now();
        let cred = valid(now).with_error(CredentialErrorKind::InvalidRefreshToken);
        let guard = guard_with(Some(cred));

        assert!(guard.check("/about").is_allowed());
        assert!(guard.check("/login").is_allowed());
        assert_eq!(
            guard.check("/pipelines/7"),
            GuardDecision::RedirectToLogin {
                next: Some("/pipelines/7".into()),
                reason: Some(ReauthReason::InvalidRefreshToken),
            }
        );
    }

    #[test]
    fn test_expired_session_redirects_without_renewal() {
        let clock = Arc::new(ManualClock::starting_now());
        let guard = guard_at(&clock, Some(valid(clock.now())));
        // Near expiry is still allowed; renewal happens on dispatch.
        clock.advance(Duration::minutes(28));
        assert!(guard.check("/documents").is_allowed());

        clock.advance(Duration::minutes(3));
        assert_eq!(
            guard.check("/documents"),
            GuardDecision::RedirectToLogin {
                next: Some("/documents".into()),
                reason: Some(ReauthReason::Expired),
            }
        );
        assert!(guard.check("/login").is_allowed());
        assert_eq!(guard.store.get().map(|c| c.access_token), Some("A1".to_string()));
    }

    #[test]
    fn test_location_rendering() {
        let login = GuardDecision::RedirectToLogin {
            next: Some("/chat?id=c 1".into()),
            reason: Some(ReauthReason::Expired),
        };
        assert_eq!(
            login.location("/login").as_deref(),
            Some("/login?next=%2Fchat%3Fid%3Dc%201&reason=expired")
        );

        let bare = GuardDecision::RedirectToLogin {
            next: None,
            reason: None,
        };
        assert_eq!(bare.location("/login").as_deref(), Some("/login"));

        let reason_only = GuardDecision::RedirectToLogin {
            next: None,
            reason: Some(ReauthReason::Rejected),
        };
        assert_eq!(reason_only.location("/login").as_deref(), Some("/login?reason=rejected"));

        let landing = GuardDecision::RedirectToLanding {
            path: "/dashboard".into(),
        };
        assert_eq!(landing.location("/login").as_deref(), Some("/dashboard"));
        assert_eq!(GuardDecision::Allow.location("/login"), None);
    }

    #[test]
    fn test_redirect_for_preserves_query() {
        let guard = guard_with(None);
        assert_eq!(
            guard.redirect_for("/documents?page=2").as_deref(),
            Some("/login?next=%2Fdocuments%3Fpage%3D2")
        );
        assert_eq!(guard.redirect_for("/"), None);
    }
}
