// ctmp_relay — single-source, multi-listener TCP relay for CTMP frames.
//
// One upstream producer connects to the source port and streams CTMP frames.
// The relay reassembles them, drops anything that fails validation, and
// writes a canonical copy of each valid frame to every connected listener.
// It never interprets payloads and never answers either side.
//
// Module overview:
// - `server.rs`:     Listening sockets, the accept/prune main loop, the
//                    source slot, the listener set, and broadcast.
// - `connection.rs`: One accepted socket plus its reader thread, which
//                    reassembles frames and hands valid ones to a callback.
// - `client.rs`:     Blocking `SourceClient`/`ListenerClient` helpers.
// - `config.rs`:     `RelayConfig` (defaults, JSON file).
// - `stats.rs`:      Atomic counters and their snapshot.
// - `error.rs`:      `RelayError`.
// - `sys.rs`:        Socket options and readiness waits std lacks.
//
// Dependencies: `ctmp_protocol` (frame codec and reassembly).
//
// The relay can run as a standalone binary (`main.rs`) or be embedded via the
// library API (`start_relay`). Unix only: `sys.rs` calls `listen`, `poll`,
// `setsockopt` and `recv` through `libc`.

#[cfg(not(unix))]
compile_error!("ctmp_relay requires a unix target");

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod server;
pub mod stats;
mod sys;

pub use config::RelayConfig;
pub use error::{RelayError, Result};
pub use server::{RelayAddrs, RelayHandle, serve, start_relay};
pub use stats::StatsSnapshot;
