//! Host/port pair published to the coordination storage.
//!
//! The same payload is written by whichever agent currently holds the master
//! mutex and decoded by every follower, so the encoding must be stable across
//! agent versions. Bincode with the standard configuration gives a
//! deterministic length-prefixed layout for `{host, port}`.

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Address of a PostgreSQL instance as seen by its peers.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub struct HostInfo {
    pub host: String,
    pub port: u16,
}

impl HostInfo {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl std::fmt::Display for HostInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Encode a [`HostInfo`] into the wire payload stored under `master-info`.
pub fn encode(info: &HostInfo) -> Result<Vec<u8>> {
    bincode::encode_to_vec(info, bincode::config::standard())
        .map_err(|e| Error::Encoding(e.to_string()))
}

/// Decode a `master-info` payload produced by [`encode`].
pub fn decode(payload: &[u8]) -> Result<HostInfo> {
    let (info, _) = bincode::decode_from_slice(payload, bincode::config::standard())
        .map_err(|e| Error::Encoding(e.to_string()))?;
    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let info = HostInfo::new("pg-1.cluster.local", 5432);
        let payload = encode(&info).unwrap();
        let decoded = decode(&payload).unwrap();
        assert_eq!(info, decoded);
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let a = encode(&HostInfo::new("m", 5432)).unwrap();
        let b = encode(&HostInfo::new("m", 5432)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode(&[0xff, 0xff, 0xff, 0xff, 0xff]).is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(HostInfo::new("db", 5433).to_string(), "db:5433");
    }
}
