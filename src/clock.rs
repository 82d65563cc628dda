//! Clock abstractions used to stamp request identities.

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the unix epoch.
pub type UnixMillis = u64;

/// Clock abstraction so timing can be faked in tests.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now_millis(&self) -> UnixMillis;
}

/// Wall clock backed by `SystemTime::now()`.
///
/// Notes: records persist across process restarts, so the guard needs wall
/// time rather than a monotonic instant; a backwards clock jump may briefly
/// widen or narrow a window but never corrupts a record.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> UnixMillis {
        let since_epoch = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
        u64::try_from(since_epoch.as_millis()).unwrap_or(u64::MAX)
    }
}
