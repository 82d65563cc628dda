//! The per-client record and its versioned persistence codec.

use crate::clock::UnixMillis;
use crate::error::StorageError;
use crate::identity::{Method, RequestIdentity};
use serde::{Deserialize, Serialize};

/// Version tag written into every persisted payload. Bump only with a
/// migration path for the previous version.
pub const RECORD_FORMAT_VERSION: u16 = 1;

/// The most recent tracked request window for one client key.
///
/// The key itself is not part of the record; it is the handle the storage
/// backend files the record under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRecord {
    /// Client network address at the last tracked request.
    pub ip_address: String,
    /// Path of the tracked request, query string stripped.
    pub request_uri: String,
    /// HTTP method of the tracked request.
    pub request_method: Method,
    /// Time of the request that opened the current window. Intentionally not
    /// advanced by later matches, so the window cannot slide.
    pub timestamp: UnixMillis,
    /// Matching requests seen inside the current window, starting at 1.
    pub request_count: u32,
    /// Set when the client transitioned into a block; `None` while unblocked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_at: Option<UnixMillis>,
}

impl ClientRecord {
    /// Fresh record opening a new window for `identity`.
    pub fn open_window(identity: &RequestIdentity) -> Self {
        Self {
            ip_address: identity.ip_address.clone(),
            request_uri: identity.uri.clone(),
            request_method: identity.method,
            timestamp: identity.now,
            request_count: 1,
            blocked_at: None,
        }
    }
}

#[derive(Serialize)]
struct EncodeEnvelope<'a> {
    v: u16,
    #[serde(flatten)]
    record: &'a ClientRecord,
}

#[derive(Deserialize)]
struct DecodeEnvelope {
    v: u16,
    #[serde(flatten)]
    record: ClientRecord,
}

/// Encode a record into its stable persisted form (versioned JSON).
///
/// Backends must persist this payload rather than any driver-native encoding,
/// so records written by one build stay readable by later compatible builds.
pub fn encode_record(record: &ClientRecord) -> Result<String, StorageError> {
    serde_json::to_string(&EncodeEnvelope { v: RECORD_FORMAT_VERSION, record })
        .map_err(StorageError::codec)
}

/// Decode a payload produced by [`encode_record`].
pub fn decode_record(payload: &str) -> Result<ClientRecord, StorageError> {
    let envelope: DecodeEnvelope = serde_json::from_str(payload).map_err(StorageError::codec)?;
    if envelope.v != RECORD_FORMAT_VERSION {
        return Err(StorageError::codec(format!(
            "unsupported record format version {} (this build reads {})",
            envelope.v, RECORD_FORMAT_VERSION
        )));
    }
    Ok(envelope.record)
}
