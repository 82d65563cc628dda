//! The request identity a host hands to the guard.
//!
//! The guard never reads ambient request state; the host extracts whatever it
//! trusts (session id, forwarded-for address, path) from its own transport and
//! passes it in here.

use crate::clock::UnixMillis;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// HTTP request method, as a closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Patch,
    Options,
    Trace,
    Connect,
}

impl Method {
    /// Canonical uppercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Patch => "PATCH",
            Method::Options => "OPTIONS",
            Method::Trace => "TRACE",
            Method::Connect => "CONNECT",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The method string did not name a known HTTP method.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown HTTP method {0:?}")]
pub struct UnknownMethod(pub String);

impl FromStr for Method {
    type Err = UnknownMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "HEAD" => Ok(Method::Head),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "DELETE" => Ok(Method::Delete),
            "PATCH" => Ok(Method::Patch),
            "OPTIONS" => Ok(Method::Options),
            "TRACE" => Ok(Method::Trace),
            "CONNECT" => Ok(Method::Connect),
            other => Err(UnknownMethod(other.to_string())),
        }
    }
}

/// Everything the guard needs to know about one inbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestIdentity {
    /// Opaque key grouping requests from the same client (e.g. a session id).
    pub key: String,
    /// Client network address as the host resolved it.
    pub ip_address: String,
    /// Request path, query string stripped.
    pub uri: String,
    /// HTTP method.
    pub method: Method,
    /// Wall-clock time of the request, supplied by the host so the decision
    /// stays deterministic and testable.
    pub now: UnixMillis,
}

impl RequestIdentity {
    /// Build an identity, stripping any query string from `uri`.
    pub fn new(
        key: impl Into<String>,
        ip_address: impl Into<String>,
        uri: impl Into<String>,
        method: Method,
        now: UnixMillis,
    ) -> Self {
        let uri: String = uri.into();
        let uri = match uri.split_once('?') {
            Some((path, _query)) => path.to_string(),
            None => uri,
        };
        Self { key: key.into(), ip_address: ip_address.into(), uri, method, now }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_round_trips_through_str() {
        for m in [Method::Get, Method::Post, Method::Delete, Method::Options] {
            assert_eq!(m.as_str().parse::<Method>(), Ok(m));
        }
        assert_eq!("delete".parse::<Method>(), Ok(Method::Delete));
        assert!("BREW".parse::<Method>().is_err());
    }

    #[test]
    fn query_string_is_stripped() {
        let id = RequestIdentity::new("k", "10.0.0.1", "/search?q=a&page=2", Method::Get, 0);
        assert_eq!(id.uri, "/search");
        let id = RequestIdentity::new("k", "10.0.0.1", "/plain", Method::Get, 0);
        assert_eq!(id.uri, "/plain");
    }

    #[test]
    fn method_serializes_uppercase() {
        let json = serde_json::to_string(&Method::Delete).expect("serialize");
        assert_eq!(json, "\"DELETE\"");
    }
}
