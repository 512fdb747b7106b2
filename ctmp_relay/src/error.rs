// Error type for relay setup and the client helpers.
//
// Steady-state faults (bad frames, dropped peers, failed accepts) never reach
// this type; the server logs them and keeps going. `RelayError` covers what
// can stop the relay from starting at all, plus codec and I/O failures
// surfaced by `client.rs`.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

use ctmp_protocol::CodecError;
use thiserror::Error;

/// Errors returned by relay startup, config loading, and clients.
#[derive(Debug, Error)]
pub enum RelayError {
    /// A listening socket could not be bound or configured.
    #[error("failed to bind {role} socket on {addr}: {source}")]
    Bind {
        role: &'static str,
        addr: SocketAddr,
        source: io::Error,
    },

    /// The config file could not be read.
    #[error("failed to read config file {}: {source}", path.display())]
    ConfigRead { path: PathBuf, source: io::Error },

    /// The config file is not valid JSON for `RelayConfig`.
    #[error("invalid config: {0}")]
    ConfigParse(#[from] serde_json::Error),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result alias for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;
