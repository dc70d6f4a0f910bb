//! Bearer token validation backed by an OAuth2 introspection endpoint.
//!
//! Results are cached per token until the token's `exp` (bounded by
//! `max_cache_ttl`). Concurrent validations of the same uncached token share
//! one in-flight introspection. When the authorization server cannot be
//! reached, validations fail closed and further introspections are held off
//! with exponential backoff; such failures are never cached against the token.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::auth::{AuthError, IntrospectionResponse, Principal};
use crate::time::{Clock, SystemClock};

pub const DEFAULT_MAX_CACHE_TTL: Duration = Duration::from_secs(300);
pub const DEFAULT_BACKOFF_INITIAL: Duration = Duration::from_secs(1);
pub const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(30);

/// Asks the issuing authority about a token.
#[async_trait]
pub trait Introspector: Send + Sync {
    async fn introspect(&self, token: &str) -> Result<IntrospectionResponse, AuthError>;
}

/// Turns a bearer token into the principal it was issued to.
#[async_trait]
pub trait TokenValidator: Send + Sync {
    async fn validate(&self, token: &str) -> Result<Principal, AuthError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorSettings {
    pub max_cache_ttl: Duration,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
}

impl Default for ValidatorSettings {
    fn default() -> Self {
        Self {
            max_cache_ttl: DEFAULT_MAX_CACHE_TTL,
            backoff_initial: DEFAULT_BACKOFF_INITIAL,
            backoff_max: DEFAULT_BACKOFF_MAX,
        }
    }
}

#[derive(Debug, Clone)]
struct CachedToken {
    principal: Principal,
    cached_until: u64,
    /// Token expiry in epoch millis, when the authority reported one.
    expires_at: Option<u64>,
}

#[derive(Debug, Default)]
struct Backoff {
    failures: u32,
    retry_at: Option<u64>,
}

type PendingIntrospection = Shared<BoxFuture<'static, Result<Principal, AuthError>>>;

/// An introspection running in its own task. `id` tells a finished task
/// whether the entry it is about to settle is still its own.
struct InFlight {
    id: u64,
    pending: PendingIntrospection,
}

struct ValidatorInner {
    introspector: Arc<dyn Introspector>,
    clock: Arc<dyn Clock>,
    settings: ValidatorSettings,
    cache: DashMap<String, CachedToken>,
    in_flight: DashMap<String, InFlight>,
    next_id: AtomicU64,
    backoff: Mutex<Backoff>,
}

pub struct CachingValidator {
    inner: Arc<ValidatorInner>,
}

impl CachingValidator {
    pub fn new(introspector: Arc<dyn Introspector>, settings: ValidatorSettings) -> Self {
        Self::with_clock(introspector, settings, Arc::new(SystemClock))
    }

    pub fn with_clock(
        introspector: Arc<dyn Introspector>,
        settings: ValidatorSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(ValidatorInner {
                introspector,
                clock,
                settings,
                cache: DashMap::new(),
                in_flight: DashMap::new(),
                next_id: AtomicU64::new(0),
                backoff: Mutex::new(Backoff::default()),
            }),
        }
    }

    pub fn settings(&self) -> &ValidatorSettings {
        &self.inner.settings
    }

    pub async fn validate(&self, token: &str) -> Result<Principal, AuthError> {
        if token.is_empty() {
            return Err(AuthError::Invalid("missing bearer token".to_string()));
        }

        let now = self.inner.clock.now_millis();
        if let Some(principal) = self.inner.cached(token, now)? {
            return Ok(principal);
        }

        // The introspection runs in a spawned task so that it settles (and
        // leaves the in-flight map) even when every waiter is cancelled.
        let pending = match self.inner.in_flight.entry(token.to_string()) {
            Entry::Occupied(occupied) => occupied.get().pending.clone(),
            Entry::Vacant(vacant) => {
                // A leader that finished between the cache check and here has
                // already filled the cache.
                if let Some(principal) = self.inner.cached(token, now)? {
                    return Ok(principal);
                }
                self.inner.check_backoff(now)?;

                let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
                let task = tokio::spawn(
                    Arc::clone(&self.inner).introspect_and_cache(token.to_string(), id),
                );
                let pending = async move {
                    task.await.unwrap_or_else(|e| {
                        Err(AuthError::Unreachable(format!("introspection task failed: {e}")))
                    })
                }
                .boxed()
                .shared();
                vacant.insert(InFlight {
                    id,
                    pending: pending.clone(),
                });
                pending
            }
        };

        pending.await
    }

    /// Drops any cached or in-flight validation of `token`. Returns whether
    /// there was one.
    ///
    /// Callers already waiting on an in-flight introspection of the token get
    /// [`AuthError::Invalid`], and its result is not cached.
    pub fn revoke(&self, token: &str) -> bool {
        let in_flight = self.inner.in_flight.remove(token).is_some();
        let cached = self.inner.cache.remove(token).is_some();
        in_flight || cached
    }

    /// Drops every cache entry past its lifetime. Returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = self.inner.clock.now_millis();
        let before = self.inner.cache.len();
        self.inner.cache.retain(|_, entry| entry.cached_until > now);
        before.saturating_sub(self.inner.cache.len())
    }

    pub fn cached_tokens(&self) -> usize {
        self.inner.cache.len()
    }
}

#[async_trait]
impl TokenValidator for CachingValidator {
    async fn validate(&self, token: &str) -> Result<Principal, AuthError> {
        CachingValidator::validate(self, token).await
    }
}

impl ValidatorInner {
    fn cached(&self, token: &str, now: u64) -> Result<Option<Principal>, AuthError> {
        let entry = match self.cache.get(token) {
            Some(entry) => entry.value().clone(),
            None => return Ok(None),
        };

        if now < entry.cached_until {
            return Ok(Some(entry.principal));
        }

        self.cache.remove(token);
        if entry.expires_at.is_some_and(|exp| exp <= now) {
            debug!(subject = %entry.principal.subject, "Cached token expired");
            return Err(AuthError::Expired);
        }
        Ok(None)
    }

    fn check_backoff(&self, now: u64) -> Result<(), AuthError> {
        let backoff = self.backoff.lock();
        match backoff.retry_at {
            Some(retry_at) if now < retry_at => Err(AuthError::Unreachable(format!(
                "authorization server backing off for {}ms",
                retry_at - now
            ))),
            _ => Ok(()),
        }
    }

    fn arm_backoff(&self, now: u64) -> u64 {
        let initial = self.settings.backoff_initial.as_millis() as u64;
        let max = self.settings.backoff_max.as_millis() as u64;

        let mut backoff = self.backoff.lock();
        let delay = initial
            .saturating_mul(1u64 << backoff.failures.min(32))
            .min(max);
        backoff.failures = backoff.failures.saturating_add(1);
        backoff.retry_at = Some(now.saturating_add(delay));
        delay
    }

    fn reset_backoff(&self) {
        let mut backoff = self.backoff.lock();
        backoff.failures = 0;
        backoff.retry_at = None;
    }

    async fn introspect_and_cache(
        self: Arc<Self>,
        token: String,
        id: u64,
    ) -> Result<Principal, AuthError> {
        let outcome = match self.introspect(&token).await {
            Ok(entry) => self.store_unless_revoked(&token, id, entry),
            Err(e) => Err(e),
        };
        self.in_flight.remove_if(&token, |_, current| current.id == id);
        outcome
    }

    /// Caches `entry` only while the in-flight entry `id` is still present.
    /// The entry is held across the insert so a concurrent revoke either
    /// happens before (nothing cached) or after (cache entry dropped).
    fn store_unless_revoked(
        &self,
        token: &str,
        id: u64,
        entry: CachedToken,
    ) -> Result<Principal, AuthError> {
        let current = self.in_flight.get(token);
        if !current.as_ref().is_some_and(|flight| flight.id == id) {
            debug!(subject = %entry.principal.subject, "Token revoked during introspection");
            return Err(AuthError::Invalid("token revoked".to_string()));
        }

        let principal = entry.principal.clone();
        self.cache.insert(token.to_string(), entry);
        drop(current);
        Ok(principal)
    }

    async fn introspect(&self, token: &str) -> Result<CachedToken, AuthError> {
        let result = self.introspector.introspect(token).await;
        let now = self.clock.now_millis();

        let response = match result {
            Ok(response) => response,
            Err(AuthError::Unreachable(reason)) => {
                let delay = self.arm_backoff(now);
                warn!(error = %reason, backoff_ms = delay, "Token introspection failed, backing off");
                return Err(AuthError::Unreachable(reason));
            }
            Err(other) => {
                self.reset_backoff();
                return Err(other);
            }
        };

        self.reset_backoff();

        if !response.active {
            return Err(AuthError::Invalid("token is not active".to_string()));
        }

        let expires_at = response.exp.map(|secs| secs.saturating_mul(1000));
        if expires_at.is_some_and(|exp| exp <= now) {
            return Err(AuthError::Expired);
        }

        let principal = Principal::from_introspection(&response).ok_or_else(|| {
            AuthError::Invalid("introspection response names no subject".to_string())
        })?;

        let ttl_cap = now.saturating_add(self.settings.max_cache_ttl.as_millis() as u64);
        let cached_until = expires_at.map_or(ttl_cap, |exp| exp.min(ttl_cap));

        debug!(subject = %principal.subject, cached_until, "Token introspected");
        Ok(CachedToken {
            principal,
            cached_until,
            expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use crate::time::ManualClock;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const START_MILLIS: u64 = 1_700_000_000_000;
    const START_SECS: u64 = START_MILLIS / 1000;

    #[derive(Default)]
    struct ScriptedIntrospector {
        tokens: HashMap<String, IntrospectionResponse>,
        calls: AtomicUsize,
        delay: Option<Duration>,
        failure: Mutex<Option<AuthError>>,
    }

    impl ScriptedIntrospector {
        fn with_token(mut self, token: &str, username: &str, exp: Option<u64>) -> Self {
            self.tokens.insert(
                token.to_string(),
                IntrospectionResponse {
                    active: true,
                    sub: Some("1234567890".to_string()),
                    preferred_username: Some(username.to_string()),
                    groups: vec!["user".to_string()],
                    exp,
                },
            );
            self
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn fail_with(&self, error: Option<AuthError>) {
            *self.failure.lock() = error;
        }
    }

    #[async_trait]
    impl Introspector for ScriptedIntrospector {
        async fn introspect(&self, token: &str) -> Result<IntrospectionResponse, AuthError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(error) = self.failure.lock().clone() {
                return Err(error);
            }
            Ok(self
                .tokens
                .get(token)
                .cloned()
                .unwrap_or_else(IntrospectionResponse::inactive))
        }
    }

    fn validator(
        introspector: &Arc<ScriptedIntrospector>,
        clock: &Arc<ManualClock>,
        settings: ValidatorSettings,
    ) -> CachingValidator {
        CachingValidator::with_clock(introspector.clone(), settings, clock.clone())
    }

    #[tokio::test]
    async fn valid_token_is_introspected_once_until_expiry() {
        let introspector = Arc::new(
            ScriptedIntrospector::default().with_token("tok-jdoe", "jdoe", Some(START_SECS + 60)),
        );
        let clock = Arc::new(ManualClock::new(START_MILLIS));
        let validator = validator(&introspector, &clock, ValidatorSettings::default());

        let principal = validator.validate("tok-jdoe").await.unwrap();
        assert_eq!(principal.subject, "jdoe");
        assert_eq!(principal.roles, vec![Role::User]);

        clock.advance(30_000);
        validator.validate("tok-jdoe").await.unwrap();
        assert_eq!(introspector.calls(), 1);

        clock.advance(31_000);
        assert_eq!(validator.validate("tok-jdoe").await, Err(AuthError::Expired));
        assert_eq!(introspector.calls(), 1);
        assert_eq!(validator.cached_tokens(), 0);
    }

    #[tokio::test]
    async fn concurrent_validations_share_one_introspection() {
        let introspector = Arc::new(ScriptedIntrospector {
            delay: Some(Duration::from_millis(50)),
            ..ScriptedIntrospector::default().with_token("tok-alice", "alice", None)
        });
        let clock = Arc::new(ManualClock::new(START_MILLIS));
        let validator = Arc::new(validator(&introspector, &clock, ValidatorSettings::default()));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let validator = validator.clone();
                tokio::spawn(async move { validator.validate("tok-alice").await })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap().subject, "alice");
        }
        assert_eq!(introspector.calls(), 1);
    }

    #[tokio::test]
    async fn distinct_tokens_are_introspected_independently() {
        let introspector = Arc::new(
            ScriptedIntrospector::default()
                .with_token("tok-a", "alice", None)
                .with_token("tok-b", "jdoe", None),
        );
        let clock = Arc::new(ManualClock::new(START_MILLIS));
        let validator = validator(&introspector, &clock, ValidatorSettings::default());

        let (a, b) = tokio::join!(validator.validate("tok-a"), validator.validate("tok-b"));
        assert_eq!(a.unwrap().subject, "alice");
        assert_eq!(b.unwrap().subject, "jdoe");
        assert_eq!(introspector.calls(), 2);
    }

    #[tokio::test]
    async fn inactive_token_is_invalid_and_not_cached() {
        let introspector = Arc::new(ScriptedIntrospector::default());
        let clock = Arc::new(ManualClock::new(START_MILLIS));
        let validator = validator(&introspector, &clock, ValidatorSettings::default());

        for _ in 0..2 {
            let err = validator.validate("forged").await.unwrap_err();
            assert_eq!(err.reason(), "invalid");
        }
        assert_eq!(introspector.calls(), 2);
    }

    #[tokio::test]
    async fn empty_token_never_reaches_the_authority() {
        let introspector = Arc::new(ScriptedIntrospector::default());
        let clock = Arc::new(ManualClock::new(START_MILLIS));
        let validator = validator(&introspector, &clock, ValidatorSettings::default());

        assert!(matches!(validator.validate("").await, Err(AuthError::Invalid(_))));
        assert_eq!(introspector.calls(), 0);
    }

    #[tokio::test]
    async fn token_already_expired_at_introspection() {
        let introspector = Arc::new(
            ScriptedIntrospector::default().with_token("old", "jdoe", Some(START_SECS - 1)),
        );
        let clock = Arc::new(ManualClock::new(START_MILLIS));
        let validator = validator(&introspector, &clock, ValidatorSettings::default());

        assert_eq!(validator.validate("old").await, Err(AuthError::Expired));
        assert_eq!(validator.cached_tokens(), 0);
    }

    #[tokio::test]
    async fn unreachable_authority_backs_off_then_recovers() {
        let introspector = Arc::new(
            ScriptedIntrospector::default().with_token("tok-jdoe", "jdoe", None),
        );
        introspector.fail_with(Some(AuthError::Unreachable("connection refused".into())));
        let clock = Arc::new(ManualClock::new(START_MILLIS));
        let validator = validator(&introspector, &clock, ValidatorSettings::default());

        let err = validator.validate("tok-jdoe").await.unwrap_err();
        assert_eq!(err.reason(), "unreachable");
        assert_eq!(introspector.calls(), 1);

        // Inside the backoff window the authority is not contacted.
        let err = validator.validate("tok-jdoe").await.unwrap_err();
        assert_eq!(err.reason(), "unreachable");
        assert_eq!(introspector.calls(), 1);

        // Second failure doubles the window to 2s.
        clock.advance(1_000);
        validator.validate("tok-jdoe").await.unwrap_err();
        assert_eq!(introspector.calls(), 2);
        clock.advance(1_500);
        validator.validate("tok-jdoe").await.unwrap_err();
        assert_eq!(introspector.calls(), 2);

        introspector.fail_with(None);
        clock.advance(500);
        assert_eq!(validator.validate("tok-jdoe").await.unwrap().subject, "jdoe");
        assert_eq!(introspector.calls(), 3);
    }

    #[tokio::test]
    async fn rejected_introspection_does_not_arm_backoff() {
        let introspector = Arc::new(ScriptedIntrospector::default());
        introspector.fail_with(Some(AuthError::Invalid("authority answered 400".into())));
        let clock = Arc::new(ManualClock::new(START_MILLIS));
        let validator = validator(&introspector, &clock, ValidatorSettings::default());

        validator.validate("tok").await.unwrap_err();
        validator.validate("tok").await.unwrap_err();
        assert_eq!(introspector.calls(), 2);
    }

    #[tokio::test]
    async fn cache_lifetime_is_capped_by_max_ttl() {
        let introspector = Arc::new(
            ScriptedIntrospector::default().with_token("tok", "jdoe", Some(START_SECS + 3600)),
        );
        let clock = Arc::new(ManualClock::new(START_MILLIS));
        let settings = ValidatorSettings {
            max_cache_ttl: Duration::from_secs(10),
            ..ValidatorSettings::default()
        };
        let validator = validator(&introspector, &clock, settings);

        validator.validate("tok").await.unwrap();
        clock.advance(11_000);
        // Past the cache cap but not the token's own expiry: introspect again.
        validator.validate("tok").await.unwrap();
        assert_eq!(introspector.calls(), 2);
    }

    #[tokio::test]
    async fn revoke_and_purge_drop_entries() {
        let introspector = Arc::new(
            ScriptedIntrospector::default()
                .with_token("short", "jdoe", Some(START_SECS + 5))
                .with_token("long", "alice", Some(START_SECS + 600)),
        );
        let clock = Arc::new(ManualClock::new(START_MILLIS));
        let validator = validator(&introspector, &clock, ValidatorSettings::default());

        validator.validate("short").await.unwrap();
        validator.validate("long").await.unwrap();
        assert_eq!(validator.cached_tokens(), 2);

        clock.advance(6_000);
        assert_eq!(validator.purge_expired(), 1);

        assert!(validator.revoke("long"));
        assert!(!validator.revoke("long"));
        validator.validate("long").await.unwrap();
        assert_eq!(introspector.calls(), 3);
    }

    #[tokio::test]
    async fn cancelled_caller_does_not_strand_the_introspection() {
        let introspector = Arc::new(ScriptedIntrospector {
            delay: Some(Duration::from_millis(200)),
            ..ScriptedIntrospector::default().with_token("tok", "jdoe", None)
        });
        let clock = Arc::new(ManualClock::new(START_MILLIS));
        let validator = Arc::new(validator(&introspector, &clock, ValidatorSettings::default()));

        let caller = {
            let validator = validator.clone();
            tokio::spawn(async move { validator.validate("tok").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        caller.abort();
        assert!(caller.await.unwrap_err().is_cancelled());

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(validator.inner.in_flight.len(), 0);
        assert_eq!(validator.cached_tokens(), 1);

        assert_eq!(validator.validate("tok").await.unwrap().subject, "jdoe");
        assert_eq!(introspector.calls(), 1);
    }

    #[tokio::test]
    async fn revoke_during_introspection_is_not_undone() {
        let introspector = Arc::new(ScriptedIntrospector {
            delay: Some(Duration::from_millis(100)),
            ..ScriptedIntrospector::default().with_token("tok", "jdoe", None)
        });
        let clock = Arc::new(ManualClock::new(START_MILLIS));
        let validator = Arc::new(validator(&introspector, &clock, ValidatorSettings::default()));

        let caller = {
            let validator = validator.clone();
            tokio::spawn(async move { validator.validate("tok").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(validator.revoke("tok"));

        let err = caller.await.unwrap().unwrap_err();
        assert_eq!(err, AuthError::Invalid("token revoked".to_string()));
        assert_eq!(validator.cached_tokens(), 0);
        assert_eq!(validator.inner.in_flight.len(), 0);

        // The next validation asks the authority again.
        validator.validate("tok").await.unwrap();
        assert_eq!(introspector.calls(), 2);
        assert_eq!(validator.cached_tokens(), 1);
    }
}
