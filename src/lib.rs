#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # Floodguard
//!
//! An inline request-flood guard. Call it once per inbound request, before the
//! request reaches application logic, and it tells you whether the client is
//! hammering the same resource hard enough to deserve a timeout.
//!
//! ## How it works
//!
//! For each client key the guard tracks one *window*: the ip address, URI, and
//! timestamp of a tracked request plus a counter of identical requests seen
//! since. Requests matching the window within `page_interval` increment the
//! counter; once the counter reaches `page_count` the client is blocked for
//! `blocking_period`. The window is anchored to its first request, so a
//! persistent client gets exactly `page_count` requests per interval and
//! cannot postpone the reset by re-requesting just under the boundary.
//!
//! ## Architecture
//!
//! - **Engine**: [`RateGuard`] applies the policy. It holds no mutable state
//!   beyond its configuration and is safe to share across request handlers.
//! - **Storage**: [`RecordStore`](store::RecordStore) persists one
//!   [`ClientRecord`] per key. [`MemoryRecordStore`] ships in this crate;
//!   `floodguard-sqlite` provides a relational backend.
//! - **Middleware**: [`GuardLayer`] wires the engine into a tower service
//!   stack. Emitting the actual 403 stays the host's job.
//!
//! ## Quick start
//!
//! ```rust
//! use floodguard::{GuardConfig, MemoryRecordStore, Method, RateGuard, RequestIdentity, Verdict};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = GuardConfig::builder().page_count(3).build()?;
//!     let guard = RateGuard::new(MemoryRecordStore::new(), config);
//!
//!     let identity =
//!         RequestIdentity::new("session-1", "203.0.113.7", "/login?next=/", Method::Post, 1_000);
//!     match guard.evaluate(&identity).await? {
//!         Verdict::Allow { remaining } => assert_eq!(remaining, 2),
//!         Verdict::Block { retry_after } => unreachable!("first request, {retry_after:?}"),
//!     }
//!     Ok(())
//! }
//! ```

pub mod clock;
pub mod error;
pub mod guard;
pub mod identity;
pub mod middleware;
pub mod prelude;
pub mod record;
pub mod store;

// Re-exports
pub use clock::{Clock, SystemClock, UnixMillis};
pub use error::{ConfigError, GuardError, StorageError};
pub use guard::{GuardConfig, GuardConfigBuilder, RateGuard, Verdict};
pub use identity::{Method, RequestIdentity, UnknownMethod};
pub use middleware::{GuardLayer, GuardServiceError, GuardedService};
pub use record::ClientRecord;
pub use store::{memory::MemoryRecordStore, Expected, RecordPatch, RecordStore, WriteStamp};
