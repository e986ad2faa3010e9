//! Jar and captured-request records

use std::collections::BTreeMap;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{JarId, RequestId};

/// Metadata of a capture endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Jar {
    /// Generated identifier
    pub id: JarId,
    /// Display name, may be empty
    pub name: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// Fields of an inbound HTTP request as seen by the capture endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IncomingRequest {
    /// HTTP method
    pub method: String,
    /// Full request path
    pub path: String,
    /// Header name to first value
    pub headers: BTreeMap<String, String>,
    /// Query parameter to first value
    pub query: BTreeMap<String, String>,
    /// Peer address (`ip:port`)
    pub client_ip: String,
    /// Raw body
    pub body: Bytes,
}

/// A request recorded under a jar
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedRequest {
    /// Identifier, unique within the owning jar
    pub id: RequestId,
    /// Capture time
    pub created_at: DateTime<Utc>,
    /// HTTP method
    pub method: String,
    /// Full request path
    pub path: String,
    /// Header name to first value
    pub headers: BTreeMap<String, String>,
    /// Peer address (`ip:port`)
    #[serde(rename = "clientIP")]
    pub client_ip: String,
    /// Raw body, base64 in JSON
    #[serde(with = "base64_body")]
    pub body: Bytes,
    /// Query parameter to first value
    pub query: BTreeMap<String, String>,
}

impl CapturedRequest {
    /// Stamp an incoming request with its server-assigned ID and time
    #[must_use]
    pub fn new(id: RequestId, created_at: DateTime<Utc>, incoming: IncomingRequest) -> Self {
        let IncomingRequest {
            method,
            path,
            headers,
            query,
            client_ip,
            body,
        } = incoming;

        Self {
            id,
            created_at,
            method,
            path,
            headers,
            client_ip,
            body,
            query,
        }
    }
}

mod base64_body {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}
