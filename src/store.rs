//! Abstract storage port for per-client records.
//!
//! Backends file one [`ClientRecord`] per key and serialize concurrent writers
//! on the same key through optimistic concurrency: every stored record carries
//! a [`WriteStamp`] that changes on every write, reads return it, and writes
//! state which stamp they expect. A write that finds a different stamp returns
//! `Ok(false)` and the caller re-runs its read-modify-write cycle. Writers on
//! *different* keys never contend.

use crate::error::StorageError;
use crate::record::ClientRecord;
use crate::UnixMillis;
use async_trait::async_trait;
use std::time::{SystemTime, UNIX_EPOCH};

pub mod memory;

/// Token identifying one committed write: unix nanoseconds of the write,
/// bumped past the previous stamp when the clock does not advance. Doubles as
/// the "last write" timestamp relational backends reap on.
pub type WriteStamp = u64;

/// What a conditional write expects to find for its key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expected {
    /// No record may exist yet (fresh create).
    Absent,
    /// The record must still carry this stamp. A record that vanished in the
    /// meantime (reaped) counts as replaceable, not as a conflict.
    Stamp(WriteStamp),
    /// Unconditional create-or-replace. Idempotent.
    Any,
}

/// Partial fields merged into an existing record by [`RecordStore::update`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordPatch {
    /// Replace the request counter.
    pub request_count: Option<u32>,
    /// Mark the client blocked as of this instant.
    pub blocked_at: Option<UnixMillis>,
}

impl RecordPatch {
    /// Patch that sets the request counter.
    pub fn count(request_count: u32) -> Self {
        Self { request_count: Some(request_count), ..Self::default() }
    }

    /// Patch that marks the client blocked.
    pub fn block_at(blocked_at: UnixMillis) -> Self {
        Self { blocked_at: Some(blocked_at), ..Self::default() }
    }

    /// Merge this patch into `record`. Fields left `None` are untouched.
    pub fn apply(&self, record: &mut ClientRecord) {
        if let Some(count) = self.request_count {
            record.request_count = count;
        }
        if let Some(at) = self.blocked_at {
            record.blocked_at = Some(at);
        }
    }
}

/// Abstract storage interface for per-client request records.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Fetch the current record and its write stamp for `key`.
    ///
    /// A missing record is `Ok(None)`, never an error; `Err` is reserved for
    /// genuine I/O or decode failure.
    async fn get(&self, key: &str) -> Result<Option<(ClientRecord, WriteStamp)>, StorageError>;

    /// Create or replace the record for `key`, subject to `expected`.
    ///
    /// Returns `Ok(false)` when a concurrent writer invalidated `expected`;
    /// the caller should re-read and retry.
    async fn store(
        &self,
        key: &str,
        record: &ClientRecord,
        expected: Expected,
    ) -> Result<bool, StorageError>;

    /// Merge `patch` into the existing record for `key`.
    ///
    /// Fails with [`StorageError::NotFound`] when no record exists; callers
    /// must `get` first and use [`store`](Self::store) for fresh keys.
    /// Returns `Ok(false)` on a stamp mismatch, as with `store`.
    async fn update(
        &self,
        key: &str,
        patch: &RecordPatch,
        expected: WriteStamp,
    ) -> Result<bool, StorageError>;
}

/// Produce the stamp for a new write: wall-clock nanos, forced past `prev` so
/// two writes to the same key never share a stamp even on a stalled clock.
pub fn next_write_stamp(prev: Option<WriteStamp>) -> WriteStamp {
    let now_nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos();
    let now = u64::try_from(now_nanos).unwrap_or(u64::MAX);
    match prev {
        Some(prev) if now <= prev => prev + 1,
        _ => now,
    }
}
