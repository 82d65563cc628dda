//! The blocking policy: reads a client's record, decides allow/count/block,
//! and writes the updated record back.

use crate::clock::UnixMillis;
use crate::error::{ConfigError, GuardError};
use crate::identity::{Method, RequestIdentity};
use crate::record::ClientRecord;
use crate::store::{Expected, RecordPatch, RecordStore};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Max matching requests allowed per window before blocking.
pub const DEFAULT_PAGE_COUNT: u32 = 5;
/// Window length for counting identical requests.
pub const DEFAULT_PAGE_INTERVAL: Duration = Duration::from_secs(10);
/// How long a blocked client stays blocked.
pub const DEFAULT_BLOCKING_PERIOD: Duration = Duration::from_secs(60);

/// Bound on the optimistic read-modify-write loop. Each failed attempt means
/// another writer committed for the same key, so exhausting this many implies
/// pathological contention; we surface it rather than guess a verdict.
const MAX_WRITE_ATTEMPTS: usize = 16;

fn default_tracked_methods() -> HashSet<Method> {
    [Method::Get, Method::Post, Method::Delete].into_iter().collect()
}

/// Validated configuration for [`RateGuard`].
#[derive(Debug, Clone)]
pub struct GuardConfig {
    page_count: u32,
    page_interval: Duration,
    blocking_period: Duration,
    tracked_methods: HashSet<Method>,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            page_count: DEFAULT_PAGE_COUNT,
            page_interval: DEFAULT_PAGE_INTERVAL,
            blocking_period: DEFAULT_BLOCKING_PERIOD,
            tracked_methods: default_tracked_methods(),
        }
    }
}

impl GuardConfig {
    /// Start from the defaults and override selectively.
    pub fn builder() -> GuardConfigBuilder {
        GuardConfigBuilder { config: Self::default() }
    }

    /// Requests allowed per window before blocking.
    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    /// Window length for counting identical requests.
    pub fn page_interval(&self) -> Duration {
        self.page_interval
    }

    /// How long a blocked client stays blocked.
    pub fn blocking_period(&self) -> Duration {
        self.blocking_period
    }

    /// Methods subject to tracking; others pass through untracked.
    pub fn tracked_methods(&self) -> &HashSet<Method> {
        &self.tracked_methods
    }

    fn tracks(&self, method: Method) -> bool {
        self.tracked_methods.contains(&method)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.page_count == 0 {
            return Err(ConfigError::InvalidPageCount { provided: self.page_count });
        }
        if self.page_interval.is_zero() {
            return Err(ConfigError::InvalidPageInterval { provided: self.page_interval });
        }
        if self.blocking_period.is_zero() {
            return Err(ConfigError::InvalidBlockingPeriod { provided: self.blocking_period });
        }
        if self.tracked_methods.is_empty() {
            return Err(ConfigError::EmptyTrackedMethods);
        }
        Ok(())
    }
}

/// Builder for [`GuardConfig`]; `build` validates.
#[derive(Debug, Clone)]
pub struct GuardConfigBuilder {
    config: GuardConfig,
}

impl GuardConfigBuilder {
    /// Override the per-window request threshold.
    pub fn page_count(mut self, page_count: u32) -> Self {
        self.config.page_count = page_count;
        self
    }

    /// Override the window length.
    pub fn page_interval(mut self, page_interval: Duration) -> Self {
        self.config.page_interval = page_interval;
        self
    }

    /// Override the block duration.
    pub fn blocking_period(mut self, blocking_period: Duration) -> Self {
        self.config.blocking_period = blocking_period;
        self
    }

    /// Replace the set of monitored HTTP methods.
    pub fn tracked_methods(mut self, methods: impl IntoIterator<Item = Method>) -> Self {
        self.config.tracked_methods = methods.into_iter().collect();
        self
    }

    /// Validate and produce the config.
    pub fn build(self) -> Result<GuardConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// The engine's answer for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Let the request through.
    Allow {
        /// Matching requests left in the current window. Feeds
        /// `X-RateLimit-Remaining` style headers.
        remaining: u32,
    },
    /// Reject the request; the host owes the client a 403-equivalent.
    Block {
        /// Time until the block expires. Feeds `Retry-After`.
        retry_after: Duration,
    },
}

impl Verdict {
    /// Helper to check if allowed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Verdict::Allow { .. })
    }
}

/// Outcome of one optimistic attempt: a verdict, or "lost a write race,
/// re-read and try again".
enum Attempt {
    Settled(Verdict),
    Raced,
}

/// The request-flood decision engine.
///
/// Holds only immutable configuration and a handle to the storage backend;
/// clone it freely across request handlers. Two concurrent evaluations of
/// different keys never contend, while evaluations of the same key are
/// serialized through the store's write stamps.
#[derive(Debug)]
pub struct RateGuard<S> {
    store: Arc<S>,
    config: GuardConfig,
}

impl<S> Clone for RateGuard<S> {
    fn clone(&self) -> Self {
        Self { store: Arc::clone(&self.store), config: self.config.clone() }
    }
}

impl<S> RateGuard<S>
where
    S: RecordStore,
{
    /// Create a guard backed by `store`.
    pub fn new(store: S, config: GuardConfig) -> Self {
        Self { store: Arc::new(store), config }
    }

    /// Create a guard sharing an existing backend handle.
    pub fn with_shared_store(store: Arc<S>, config: GuardConfig) -> Self {
        Self { store, config }
    }

    /// The active configuration.
    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    /// Decide whether this request may proceed.
    ///
    /// Exactly one read-modify-write cycle against the store per call in the
    /// uncontended case; a storage failure surfaces as [`GuardError`], never
    /// as a silent Allow or Block.
    pub async fn evaluate(&self, identity: &RequestIdentity) -> Result<Verdict, GuardError> {
        for _ in 0..MAX_WRITE_ATTEMPTS {
            match self.try_evaluate(identity).await? {
                Attempt::Settled(verdict) => return Ok(verdict),
                Attempt::Raced => continue,
            }
        }
        Err(GuardError::Contention { attempts: MAX_WRITE_ATTEMPTS })
    }

    async fn try_evaluate(&self, identity: &RequestIdentity) -> Result<Attempt, GuardError> {
        let now = identity.now;

        let Some((record, stamp)) = self.store.get(&identity.key).await? else {
            return self.open_fresh_window(identity, Expected::Absent).await;
        };

        // An active block wins over everything, method and identity included.
        if let Some(blocked_at) = record.blocked_at {
            let elapsed = now.saturating_sub(blocked_at);
            let blocking_period = as_millis(self.config.blocking_period);
            if elapsed < blocking_period {
                tracing::debug!(
                    key = %identity.key,
                    ip = %identity.ip_address,
                    "rejected request from client inside an active block window"
                );
                return Ok(Attempt::Settled(Verdict::Block {
                    retry_after: Duration::from_millis(blocking_period - elapsed),
                }));
            }
        }

        // Untracked methods are never recorded and never counted.
        if !self.config.tracks(identity.method) {
            return Ok(Attempt::Settled(Verdict::Allow { remaining: self.config.page_count }));
        }

        let in_window = record.ip_address == identity.ip_address
            && record.request_uri == identity.uri
            && now.saturating_sub(record.timestamp) < as_millis(self.config.page_interval);
        if !in_window {
            // Different page, different address, or the window expired: the
            // old record is superseded by a fresh window.
            return self.open_fresh_window(identity, Expected::Stamp(stamp)).await;
        }

        if record.request_count >= self.config.page_count {
            match self.store.update(&identity.key, &RecordPatch::block_at(now), stamp).await {
                Ok(true) => {
                    tracing::info!(
                        key = %identity.key,
                        ip = %identity.ip_address,
                        uri = %identity.uri,
                        request_count = record.request_count,
                        "blocked a request flood"
                    );
                    Ok(Attempt::Settled(Verdict::Block {
                        retry_after: self.config.blocking_period,
                    }))
                }
                Ok(false) => Ok(Attempt::Raced),
                Err(err) if err.is_not_found() => Ok(Attempt::Raced),
                Err(err) => Err(err.into()),
            }
        } else {
            let request_count = record.request_count + 1;
            match self.store.update(&identity.key, &RecordPatch::count(request_count), stamp).await
            {
                Ok(true) => Ok(Attempt::Settled(Verdict::Allow {
                    remaining: self.config.page_count - request_count,
                })),
                Ok(false) => Ok(Attempt::Raced),
                Err(err) if err.is_not_found() => Ok(Attempt::Raced),
                Err(err) => Err(err.into()),
            }
        }
    }

    async fn open_fresh_window(
        &self,
        identity: &RequestIdentity,
        expected: Expected,
    ) -> Result<Attempt, GuardError> {
        if !self.config.tracks(identity.method) {
            return Ok(Attempt::Settled(Verdict::Allow { remaining: self.config.page_count }));
        }
        let record = ClientRecord::open_window(identity);
        if self.store.store(&identity.key, &record, expected).await? {
            Ok(Attempt::Settled(Verdict::Allow { remaining: self.config.page_count - 1 }))
        } else {
            Ok(Attempt::Raced)
        }
    }
}

fn as_millis(duration: Duration) -> UnixMillis {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_policy() {
        let config = GuardConfig::default();
        assert_eq!(config.page_count(), 5);
        assert_eq!(config.page_interval(), Duration::from_secs(10));
        assert_eq!(config.blocking_period(), Duration::from_secs(60));
        let expected: HashSet<Method> = [Method::Get, Method::Post, Method::Delete].into_iter().collect();
        assert_eq!(config.tracked_methods(), &expected);
    }

    #[test]
    fn builder_rejects_zero_page_count() {
        let err = GuardConfig::builder().page_count(0).build().expect_err("must fail");
        assert_eq!(err, ConfigError::InvalidPageCount { provided: 0 });
    }

    #[test]
    fn builder_rejects_zero_durations() {
        assert!(matches!(
            GuardConfig::builder().page_interval(Duration::ZERO).build(),
            Err(ConfigError::InvalidPageInterval { .. })
        ));
        assert!(matches!(
            GuardConfig::builder().blocking_period(Duration::ZERO).build(),
            Err(ConfigError::InvalidBlockingPeriod { .. })
        ));
    }

    #[test]
    fn builder_rejects_empty_method_set() {
        let err = GuardConfig::builder().tracked_methods([]).build().expect_err("must fail");
        assert_eq!(err, ConfigError::EmptyTrackedMethods);
    }

    #[test]
    fn builder_overrides_stick() {
        let config = GuardConfig::builder()
            .page_count(3)
            .page_interval(Duration::from_secs(2))
            .tracked_methods([Method::Put])
            .build()
            .expect("valid config");
        assert_eq!(config.page_count(), 3);
        assert!(config.tracks(Method::Put));
        assert!(!config.tracks(Method::Get));
    }

    #[test]
    fn verdict_helpers() {
        assert!(Verdict::Allow { remaining: 0 }.is_allowed());
        assert!(!Verdict::Block { retry_after: Duration::from_secs(1) }.is_allowed());
    }
}
