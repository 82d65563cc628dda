#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! SQLite storage backend for `floodguard` (companion crate).
//!
//! Bring your own [`sqlx::SqlitePool`]; records live one row per client key in
//! a table of `(id, data, timestamp)` where `data` is the core crate's
//! versioned payload and `timestamp` is the write stamp (unix nanoseconds,
//! also the reaping criterion). All writes are single-statement native
//! upserts, so two requests from the same client arriving concurrently can
//! neither trip the primary-key constraint nor silently no-op.
//!
//! ```no_run
//! use floodguard::{GuardConfig, RateGuard};
//! use floodguard_sqlite::{SqliteRecordStore, TableConfig};
//! use sqlx::SqlitePool;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = SqlitePool::connect("sqlite://floodguard.db").await?;
//! let store = SqliteRecordStore::connect(pool, TableConfig::default()).await?;
//! let guard = RateGuard::new(store, GuardConfig::default());
//! # let _ = guard;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use floodguard::record::{decode_record, encode_record, ClientRecord};
use floodguard::store::{next_write_stamp, Expected, RecordPatch, RecordStore, WriteStamp};
use floodguard::{ConfigError, StorageError};
use sqlx::SqlitePool;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Rows whose last write is older than this are garbage, reaped as advisory
/// cleanup. Deliberately far above any sane `blocking_period`.
pub const RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// Table and column names the store writes through.
///
/// Names are validated as SQL identifiers up front because they are
/// interpolated into statements; values are always bound.
#[derive(Debug, Clone)]
pub struct TableConfig {
    table: String,
    id_col: String,
    data_col: String,
    time_col: String,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            table: "floodguard".into(),
            id_col: "id".into(),
            data_col: "data".into(),
            time_col: "timestamp".into(),
        }
    }
}

impl TableConfig {
    /// Custom table/column names, validated.
    pub fn new(
        table: impl Into<String>,
        id_col: impl Into<String>,
        data_col: impl Into<String>,
        time_col: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            table: table.into(),
            id_col: id_col.into(),
            data_col: data_col.into(),
            time_col: time_col.into(),
        };
        for name in [&config.table, &config.id_col, &config.data_col, &config.time_col] {
            if !is_identifier(name) {
                return Err(ConfigError::InvalidBackendOption {
                    detail: format!("{name:?} is not a valid SQL identifier"),
                });
            }
        }
        Ok(config)
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Statements are rendered once at connect time; only values are bound later.
#[derive(Debug)]
struct Statements {
    create: String,
    select: String,
    insert_if_absent: String,
    upsert: String,
    guarded_upsert: String,
    guarded_update: String,
    reap: String,
}

impl Statements {
    fn render(c: &TableConfig) -> Self {
        let TableConfig { table, id_col, data_col, time_col } = c;
        Self {
            create: format!(
                "CREATE TABLE IF NOT EXISTS {table} \
                 ({id_col} TEXT NOT NULL PRIMARY KEY, \
                  {data_col} TEXT NOT NULL, \
                  {time_col} INTEGER NOT NULL)"
            ),
            select: format!("SELECT {data_col}, {time_col} FROM {table} WHERE {id_col} = ?1"),
            insert_if_absent: format!(
                "INSERT INTO {table} ({id_col}, {data_col}, {time_col}) VALUES (?1, ?2, ?3) \
                 ON CONFLICT({id_col}) DO NOTHING"
            ),
            upsert: format!(
                "INSERT INTO {table} ({id_col}, {data_col}, {time_col}) VALUES (?1, ?2, ?3) \
                 ON CONFLICT({id_col}) DO UPDATE \
                 SET {data_col} = excluded.{data_col}, {time_col} = excluded.{time_col}"
            ),
            guarded_upsert: format!(
                "INSERT INTO {table} ({id_col}, {data_col}, {time_col}) VALUES (?1, ?2, ?3) \
                 ON CONFLICT({id_col}) DO UPDATE \
                 SET {data_col} = excluded.{data_col}, {time_col} = excluded.{time_col} \
                 WHERE {table}.{time_col} = ?4"
            ),
            guarded_update: format!(
                "UPDATE {table} SET {data_col} = ?1, {time_col} = ?2 \
                 WHERE {id_col} = ?3 AND {time_col} = ?4"
            ),
            reap: format!("DELETE FROM {table} WHERE {time_col} < ?1"),
        }
    }
}

/// [`RecordStore`] backed by a SQLite table.
#[derive(Debug, Clone)]
pub struct SqliteRecordStore {
    pool: SqlitePool,
    sql: std::sync::Arc<Statements>,
}

impl SqliteRecordStore {
    /// Attach to `pool`: creates the table if missing and runs one best-effort
    /// reaping pass, mirroring how the guard expects to be wired at startup.
    pub async fn connect(pool: SqlitePool, config: TableConfig) -> Result<Self, StorageError> {
        let sql = Statements::render(&config);
        sqlx::query(&sql.create).execute(&pool).await.map_err(StorageError::backend)?;

        let store = Self { pool, sql: std::sync::Arc::new(sql) };
        if let Err(error) = store.reap().await {
            // Reaping is advisory; a failure must not keep the guard offline.
            tracing::warn!(error = %error, "initial reap of stale records failed");
        }
        Ok(store)
    }

    /// Delete records whose last write is older than [`RETENTION`].
    ///
    /// Best-effort housekeeping; call it from a low-priority schedule if the
    /// table grows, never from a request's critical path.
    pub async fn reap(&self) -> Result<u64, StorageError> {
        let cutoff = now_nanos().saturating_sub(as_nanos(RETENTION));
        let removed = sqlx::query(&self.sql.reap)
            .bind(to_db_stamp(cutoff)?)
            .execute(&self.pool)
            .await
            .map_err(StorageError::backend)?
            .rows_affected();
        if removed > 0 {
            tracing::debug!(removed, "reaped stale client records");
        }
        Ok(removed)
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn get(&self, key: &str) -> Result<Option<(ClientRecord, WriteStamp)>, StorageError> {
        let row: Option<(String, i64)> = sqlx::query_as(&self.sql.select)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::backend)?;
        match row {
            None => Ok(None),
            Some((payload, stamp)) => {
                let record = decode_record(&payload)?;
                Ok(Some((record, from_db_stamp(stamp)?)))
            }
        }
    }

    async fn store(
        &self,
        key: &str,
        record: &ClientRecord,
        expected: Expected,
    ) -> Result<bool, StorageError> {
        let payload = encode_record(record)?;
        let committed = match expected {
            Expected::Absent => sqlx::query(&self.sql.insert_if_absent)
                .bind(key)
                .bind(&payload)
                .bind(to_db_stamp(next_write_stamp(None))?)
                .execute(&self.pool)
                .await
                .map_err(StorageError::backend)?
                .rows_affected(),
            Expected::Any => sqlx::query(&self.sql.upsert)
                .bind(key)
                .bind(&payload)
                .bind(to_db_stamp(next_write_stamp(None))?)
                .execute(&self.pool)
                .await
                .map_err(StorageError::backend)?
                .rows_affected(),
            Expected::Stamp(stamp) => sqlx::query(&self.sql.guarded_upsert)
                .bind(key)
                .bind(&payload)
                .bind(to_db_stamp(next_write_stamp(Some(stamp)))?)
                .bind(to_db_stamp(stamp)?)
                .execute(&self.pool)
                .await
                .map_err(StorageError::backend)?
                .rows_affected(),
        };
        Ok(committed == 1)
    }

    async fn update(
        &self,
        key: &str,
        patch: &RecordPatch,
        expected: WriteStamp,
    ) -> Result<bool, StorageError> {
        let row: Option<(String, i64)> = sqlx::query_as(&self.sql.select)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::backend)?;
        let Some((payload, stamp)) = row else {
            return Err(StorageError::not_found(key));
        };
        if from_db_stamp(stamp)? != expected {
            return Ok(false);
        }

        let mut record = decode_record(&payload)?;
        patch.apply(&mut record);

        // The stamp predicate makes the merge commit atomic: a concurrent
        // writer between our read and this statement changes the stamp and we
        // report the race instead of clobbering it.
        let committed = sqlx::query(&self.sql.guarded_update)
            .bind(encode_record(&record)?)
            .bind(to_db_stamp(next_write_stamp(Some(expected)))?)
            .bind(key)
            .bind(to_db_stamp(expected)?)
            .execute(&self.pool)
            .await
            .map_err(StorageError::backend)?
            .rows_affected();
        Ok(committed == 1)
    }
}

fn now_nanos() -> u64 {
    let since_epoch = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    u64::try_from(since_epoch.as_nanos()).unwrap_or(u64::MAX)
}

fn as_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

fn to_db_stamp(stamp: WriteStamp) -> Result<i64, StorageError> {
    i64::try_from(stamp).map_err(|_| StorageError::codec("write stamp exceeds the i64 column"))
}

fn from_db_stamp(stamp: i64) -> Result<WriteStamp, StorageError> {
    u64::try_from(stamp).map_err(|_| StorageError::codec("negative write stamp in storage"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_validation() {
        assert!(is_identifier("floodguard"));
        assert!(is_identifier("_t1"));
        assert!(!is_identifier(""));
        assert!(!is_identifier("1abc"));
        assert!(!is_identifier("evil; drop table users"));
        assert!(!is_identifier("name-with-dash"));
    }

    #[test]
    fn bad_names_are_config_errors() {
        let err = TableConfig::new("ok", "id", "data", "time stamp").expect_err("must reject");
        assert!(matches!(err, ConfigError::InvalidBackendOption { .. }));
        assert!(TableConfig::new("requests", "id", "data", "ts").is_ok());
    }

    #[test]
    fn statements_use_the_configured_names() {
        let config = TableConfig::new("req_log", "sid", "body", "ts").expect("valid");
        let sql = Statements::render(&config);
        assert!(sql.select.contains("FROM req_log"));
        assert!(sql.upsert.contains("ON CONFLICT(sid)"));
        assert!(sql.guarded_upsert.contains("WHERE req_log.ts = ?4"));
        assert!(sql.reap.contains("WHERE ts < ?1"));
    }
}
