//! In-process storage backend.
//!
//! State lives and dies with the owning process; the caller owns the instance
//! rather than reaching into any ambient session state. Suitable for tests and
//! single-process deployments.

use super::{next_write_stamp, Expected, RecordPatch, RecordStore, WriteStamp};
use crate::error::StorageError;
use crate::record::ClientRecord;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

type RecordMap = HashMap<String, (ClientRecord, WriteStamp)>;

/// Simple in-memory record store. Cloning shares the underlying map.
#[derive(Default, Clone, Debug)]
pub struct MemoryRecordStore {
    data: Arc<Mutex<RecordMap>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> Result<MutexGuard<'_, RecordMap>, StorageError> {
        self.data.lock().map_err(|_| StorageError::backend("record map mutex poisoned"))
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn get(&self, key: &str) -> Result<Option<(ClientRecord, WriteStamp)>, StorageError> {
        Ok(self.guard()?.get(key).cloned())
    }

    async fn store(
        &self,
        key: &str,
        record: &ClientRecord,
        expected: Expected,
    ) -> Result<bool, StorageError> {
        let mut map = self.guard()?;
        let current = map.get(key).map(|(_, stamp)| *stamp);
        match expected {
            Expected::Absent if current.is_some() => return Ok(false),
            Expected::Stamp(stamp) if current.is_some() && current != Some(stamp) => {
                return Ok(false)
            }
            _ => {}
        }
        map.insert(key.to_string(), (record.clone(), next_write_stamp(current)));
        Ok(true)
    }

    async fn update(
        &self,
        key: &str,
        patch: &RecordPatch,
        expected: WriteStamp,
    ) -> Result<bool, StorageError> {
        let mut map = self.guard()?;
        let Some((record, stamp)) = map.get_mut(key) else {
            return Err(StorageError::not_found(key));
        };
        if *stamp != expected {
            return Ok(false);
        }
        patch.apply(record);
        *stamp = next_write_stamp(Some(*stamp));
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{Method, RequestIdentity};

    fn record(uri: &str) -> ClientRecord {
        let identity = RequestIdentity::new("k", "10.0.0.1", uri, Method::Get, 1_000);
        ClientRecord::open_window(&identity)
    }

    #[tokio::test]
    async fn absent_create_wins_once() {
        let store = MemoryRecordStore::new();
        assert!(store.store("k", &record("/a"), Expected::Absent).await.expect("store"));
        assert!(!store.store("k", &record("/b"), Expected::Absent).await.expect("store"));

        let (current, _) = store.get("k").await.expect("get").expect("present");
        assert_eq!(current.request_uri, "/a");
    }

    #[tokio::test]
    async fn stamped_replace_rejects_stale_readers() {
        let store = MemoryRecordStore::new();
        store.store("k", &record("/a"), Expected::Absent).await.expect("store");
        let (_, stamp) = store.get("k").await.expect("get").expect("present");

        assert!(store.store("k", &record("/b"), Expected::Stamp(stamp)).await.expect("store"));
        // The old stamp is now stale.
        assert!(!store.store("k", &record("/c"), Expected::Stamp(stamp)).await.expect("store"));
    }

    #[tokio::test]
    async fn unconditional_store_is_idempotent() {
        let store = MemoryRecordStore::new();
        let rec = record("/a");
        assert!(store.store("k", &rec, Expected::Any).await.expect("store"));
        assert!(store.store("k", &rec, Expected::Any).await.expect("store"));
        let (current, _) = store.get("k").await.expect("get").expect("present");
        assert_eq!(current, rec);
    }

    #[tokio::test]
    async fn update_requires_an_existing_record() {
        let store = MemoryRecordStore::new();
        let err = store
            .update("missing", &RecordPatch::count(2), 1)
            .await
            .expect_err("must be NotFound");
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn update_applies_patch_and_bumps_stamp() {
        let store = MemoryRecordStore::new();
        store.store("k", &record("/a"), Expected::Absent).await.expect("store");
        let (_, stamp) = store.get("k").await.expect("get").expect("present");

        assert!(store.update("k", &RecordPatch::count(2), stamp).await.expect("update"));
        let (current, new_stamp) = store.get("k").await.expect("get").expect("present");
        assert_eq!(current.request_count, 2);
        assert!(new_stamp > stamp);

        // Stale stamp after the successful update.
        assert!(!store.update("k", &RecordPatch::count(3), stamp).await.expect("update"));
    }

    #[tokio::test]
    async fn keys_do_not_interfere() {
        let store = MemoryRecordStore::new();
        store.store("a", &record("/a"), Expected::Absent).await.expect("store");
        store.store("b", &record("/b"), Expected::Absent).await.expect("store");
        let (_, stamp_a) = store.get("a").await.expect("get").expect("present");
        store.update("a", &RecordPatch::count(5), stamp_a).await.expect("update");

        let (b, _) = store.get("b").await.expect("get").expect("present");
        assert_eq!(b.request_count, 1);
    }
}
