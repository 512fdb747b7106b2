// Relay configuration.
//
// `RelayConfig` is built once at startup (defaults, then an optional JSON
// file, then command-line overrides in `main.rs`) and moved into the server.
// Nothing reads it after that point except the server itself; there is no
// global config state.
//
// Example file:
//
//   { "source_port": 33333, "listener_port": 44444, "magic": 204 }
//
// Missing fields take their defaults.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use ctmp_protocol::ProtocolConstants;
use serde::{Deserialize, Serialize};

use crate::error::{RelayError, Result};

/// Configuration for starting a relay server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Interface both ports bind to.
    pub bind_address: IpAddr,
    /// Port for the single upstream producer.
    pub source_port: u16,
    /// Port for downstream listeners.
    pub listener_port: u16,
    /// Magic and padding bytes.
    #[serde(flatten)]
    pub protocol: ProtocolConstants,
    /// Upper bound on one readiness wait, so pruning runs even when idle.
    pub poll_interval_ms: u64,
    /// Write timeout applied to every listener socket. 0 disables it.
    pub listener_write_timeout_ms: u64,
    /// Size of the scratch buffer the source reader reads into.
    pub read_chunk_size: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            source_port: 33333,
            listener_port: 44444,
            protocol: ProtocolConstants::default(),
            poll_interval_ms: 100,
            listener_write_timeout_ms: 5000,
            read_chunk_size: 1024,
        }
    }
}

impl RelayConfig {
    /// Load a config from a JSON file. Fields absent from the file keep
    /// their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| RelayError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn protocol(&self) -> ProtocolConstants {
        self.protocol
    }

    pub fn source_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.source_port)
    }

    pub fn listener_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.listener_port)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn listener_write_timeout(&self) -> Option<Duration> {
        (self.listener_write_timeout_ms > 0).then(|| Duration::from_millis(self.listener_write_timeout_ms))
    }

    /// Scratch size for source reads; never zero, since a zero-length read
    /// would look like a disconnect.
    pub fn read_chunk_size(&self) -> usize {
        self.read_chunk_size.max(1)
    }
}
