//! Compile-only check that the prelude exposes the working surface.

use floodguard::prelude::*;

#[allow(dead_code)]
fn wires_up(clock: &dyn Clock) -> Result<RateGuard<MemoryRecordStore>, ConfigError> {
    let config = GuardConfig::builder().tracked_methods([Method::Get, Method::Post]).build()?;
    let guard = RateGuard::new(MemoryRecordStore::new(), config);
    let _identity = RequestIdentity::new("k", "10.0.0.1", "/", Method::Get, clock.now_millis());
    Ok(guard)
}

#[test]
fn prelude_compiles() {
    let guard = wires_up(&SystemClock).expect("default-ish config is valid");
    assert_eq!(guard.config().page_count(), 5);
}
