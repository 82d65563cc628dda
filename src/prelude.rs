//! Convenient re-exports for common floodguard types.
pub use crate::{
    clock::{Clock, SystemClock, UnixMillis},
    error::{ConfigError, GuardError, StorageError},
    guard::{GuardConfig, GuardConfigBuilder, RateGuard, Verdict},
    identity::{Method, RequestIdentity},
    middleware::{GuardLayer, GuardServiceError, GuardedService},
    record::ClientRecord,
    store::{memory::MemoryRecordStore, Expected, RecordPatch, RecordStore, WriteStamp},
};
