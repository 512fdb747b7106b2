// TCP server and main loop for the CTMP relay.
//
// Architecture: one main thread plus one reader thread per source.
//
// - **Main thread** (`Relay::run`): owns the two listening sockets. Each
//   iteration waits (bounded by `poll_interval`) until either socket has a
//   pending connection, accepts at most one on each, then prunes dead
//   listeners and releases a stopped source.
// - **Source reader thread** (`connection.rs`): reassembles frames from the
//   single source socket and calls `Shared::broadcast` for each valid one.
//   Broadcast runs on this thread, not the main thread.
//
// Shared state is `Clients` (the source slot and the listener list) behind
// one `Mutex`. Broadcast writes and every mutation of the listener list take
// that same lock, so a listener is never written to half-registered and never
// pruned mid-write. Listeners are write-only: they get no thread of their own.
//
// Single-source rule: while the slot holds a Running connection, any new
// source connection is closed straight away. A source whose reader has
// stopped stays in the slot until the main loop releases it; the reader
// thread never clears its own slot.
//
// A listener is dropped as soon as a write to it fails, and the main loop's
// liveness probe catches the ones that closed without a write noticing.
//
// Shutdown: `RelayHandle::stop` clears `keep_running`; the main loop exits,
// shuts down every client socket, and drops the listening sockets. There is
// no drain of in-flight writes.

use std::io::{self, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use ctmp_protocol::Frame;
use tracing::{debug, error, info, warn};

use crate::config::RelayConfig;
use crate::connection::Connection;
use crate::error::{RelayError, Result};
use crate::stats::{RelayStats, StatsSnapshot};
use crate::sys;

/// A registered downstream socket.
struct Listener {
    stream: TcpStream,
    peer: SocketAddr,
}

/// The source slot and the listener set. Always accessed under one lock.
#[derive(Default)]
struct Clients {
    source: Option<Connection>,
    listeners: Vec<Listener>,
}

/// State reachable from both the main loop and the source reader thread.
struct Shared {
    clients: Mutex<Clients>,
    stats: RelayStats,
    padding: u8,
}

impl Shared {
    fn new(padding: u8) -> Self {
        Self {
            clients: Mutex::new(Clients::default()),
            stats: RelayStats::default(),
            padding,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Clients> {
        // A panic while holding the lock leaves the client lists intact.
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Re-serialize a frame and write it to every listener.
    fn broadcast(&self, frame: &Frame) {
        if !frame.valid {
            RelayStats::bump(&self.stats.frames_rejected);
            debug!(length = frame.length, "invalid frame dropped before broadcast");
            return;
        }

        let wire = frame.to_wire(self.padding);

        let mut clients = self.lock();
        let before = clients.listeners.len();
        clients.listeners.retain(|listener| match (&listener.stream).write_all(&wire) {
            Ok(()) => true,
            Err(e) => {
                warn!(peer = %listener.peer, error = %e, "write to listener failed; dropping listener");
                false
            }
        });
        let remaining = clients.listeners.len();
        self.record_pruned(before - remaining, remaining);
        RelayStats::bump(&self.stats.frames_relayed);
        drop(clients);

        debug!(bytes = wire.len(), listeners = remaining, "frame relayed");
    }

    fn record_pruned(&self, pruned: usize, remaining: usize) {
        if pruned > 0 {
            self.stats
                .listeners_pruned
                .fetch_add(pruned as u64, Ordering::Relaxed);
        }
        self.stats.listeners.store(remaining, Ordering::Relaxed);
    }
}

/// Actual bound addresses of a relay (useful when port 0 was requested).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RelayAddrs {
    pub source: SocketAddr,
    pub listener: SocketAddr,
}

/// Handle returned by `start_relay` to control the running server.
pub struct RelayHandle {
    keep_running: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
    shared: Arc<Shared>,
}

impl RelayHandle {
    /// Signal the relay to stop and wait for it to shut down.
    pub fn stop(self) {
        self.keep_running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread {
            let _ = handle.join();
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }
}

/// The relay: two listening sockets plus the shared client state.
pub struct Relay {
    config: RelayConfig,
    source_socket: TcpListener,
    listener_socket: TcpListener,
    shared: Arc<Shared>,
}

impl Relay {
    /// Bind both listening sockets. Failure here is the only fatal error the
    /// relay has.
    pub fn bind(config: RelayConfig) -> Result<Self> {
        let source_socket = bind_listener("source", config.source_addr(), 1)?;
        let listener_socket = bind_listener("listener", config.listener_addr(), sys::max_backlog())?;
        let shared = Arc::new(Shared::new(config.protocol().padding));

        Ok(Self {
            config,
            source_socket,
            listener_socket,
            shared,
        })
    }

    pub fn local_addrs(&self) -> Result<RelayAddrs> {
        Ok(RelayAddrs {
            source: self.source_socket.local_addr()?,
            listener: self.listener_socket.local_addr()?,
        })
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Run the main loop until `keep_running` is cleared.
    pub fn run(self, keep_running: &AtomicBool) {
        while keep_running.load(Ordering::SeqCst) {
            self.poll_once();
        }
        self.shutdown();
    }

    fn poll_once(&self) {
        let interval = self.config.poll_interval();
        match sys::wait_readable(&self.source_socket, &self.listener_socket, interval) {
            Ok((source_ready, listener_ready)) => {
                if source_ready {
                    self.accept_source();
                }
                if listener_ready {
                    self.accept_listener();
                }
            }
            Err(e) => {
                error!(error = %e, "waiting for connections failed");
                thread::sleep(interval);
            }
        }
        self.prune();
    }

    fn accept_source(&self) {
        let Some((stream, peer)) = accept(&self.source_socket, "source") else {
            return;
        };
        if let Err(e) = sys::set_linger_zero(&stream) {
            warn!(%peer, error = %e, "failed to set SO_LINGER on source socket");
        }

        let mut clients = self.shared.lock();
        if let Some(existing) = clients.source.as_ref().filter(|c| c.is_running()) {
            warn!(
                existing = %existing.peer_addr(),
                rejected = %peer,
                "source already connected; rejecting new connection"
            );
            RelayStats::bump(&self.shared.stats.sources_rejected);
            return;
        }
        if let Some(stale) = clients.source.take() {
            self.release_source(stale);
        }

        let connection = match Connection::new(stream) {
            Ok(connection) => connection,
            Err(e) => {
                warn!(%peer, error = %e, "failed to set up source connection");
                return;
            }
        };

        let shared = Arc::clone(&self.shared);
        let magic = self.config.protocol().magic;
        let started = connection.start(magic, self.config.read_chunk_size(), move |frame| {
            shared.broadcast(&frame);
        });
        if let Err(e) = started {
            warn!(%peer, error = %e, "failed to start source reader");
            return;
        }

        info!(%peer, "source connected");
        RelayStats::bump(&self.shared.stats.sources_accepted);
        clients.source = Some(connection);
    }

    fn accept_listener(&self) {
        let Some((stream, peer)) = accept(&self.listener_socket, "listener") else {
            return;
        };
        if let Err(e) = stream.set_write_timeout(self.config.listener_write_timeout()) {
            warn!(%peer, error = %e, "failed to set listener write timeout");
        }

        let mut clients = self.shared.lock();
        clients.listeners.push(Listener { stream, peer });
        let count = clients.listeners.len();
        self.shared.stats.listeners.store(count, Ordering::Relaxed);
        RelayStats::bump(&self.shared.stats.listeners_accepted);
        info!(%peer, listeners = count, "listener connected");
    }

    /// Drop dead listeners and release a stopped source.
    fn prune(&self) {
        let mut clients = self.shared.lock();

        let before = clients.listeners.len();
        clients.listeners.retain(|listener| {
            let gone = sys::is_peer_gone(&listener.stream);
            if gone {
                info!(peer = %listener.peer, "listener disconnected");
            }
            !gone
        });
        let remaining = clients.listeners.len();
        self.shared.record_pruned(before - remaining, remaining);

        if let Some(stale) = clients.source.take_if(|c| !c.is_running()) {
            self.release_source(stale);
        }
    }

    fn release_source(&self, source: Connection) {
        info!(peer = %source.peer_addr(), "source released");
        RelayStats::bump(&self.shared.stats.sources_released);
        drop(source);
    }

    fn shutdown(self) {
        let mut clients = self.shared.lock();
        clients.source = None;
        for listener in clients.listeners.drain(..) {
            let _ = listener.stream.shutdown(std::net::Shutdown::Both);
        }
        self.shared.stats.listeners.store(0, Ordering::Relaxed);
        drop(clients);
        info!("relay stopped");
    }
}

/// Start the relay on a background thread. Returns a handle for stopping it
/// and the actual bound addresses.
pub fn start_relay(config: RelayConfig) -> Result<(RelayHandle, RelayAddrs)> {
    let relay = Relay::bind(config)?;
    let addrs = relay.local_addrs()?;
    let shared = Arc::clone(&relay.shared);
    let keep_running = Arc::new(AtomicBool::new(true));
    let keep_running_clone = Arc::clone(&keep_running);

    info!(source = %addrs.source, listener = %addrs.listener, "relay started");
    let thread = thread::Builder::new()
        .name("ctmp-relay".into())
        .spawn(move || relay.run(&keep_running_clone))?;

    Ok((
        RelayHandle {
            keep_running,
            thread: Some(thread),
            shared,
        },
        addrs,
    ))
}

/// Bind and run the relay on the calling thread. Returns only if binding
/// fails.
pub fn serve(config: RelayConfig) -> Result<()> {
    let relay = Relay::bind(config)?;
    let addrs = relay.local_addrs()?;
    info!(source = %addrs.source, listener = %addrs.listener, "relay started");
    relay.run(&AtomicBool::new(true));
    Ok(())
}

fn bind_listener(role: &'static str, addr: SocketAddr, backlog: i32) -> Result<TcpListener> {
    let bind_error = move |source: io::Error| RelayError::Bind { role, addr, source };

    let listener = TcpListener::bind(addr).map_err(bind_error)?;
    sys::set_backlog(&listener, backlog).map_err(bind_error)?;
    // Non-blocking so a connection that vanishes between the readiness wait
    // and accept() cannot stall the loop.
    listener.set_nonblocking(true).map_err(bind_error)?;
    Ok(listener)
}

/// Accept one pending connection, logging failures. Returns `None` when
/// nothing was pending or the accept failed.
fn accept(socket: &TcpListener, role: &'static str) -> Option<(TcpStream, SocketAddr)> {
    match socket.accept() {
        Ok((stream, peer)) => {
            // Some platforms hand back sockets that inherit O_NONBLOCK.
            if let Err(e) = stream.set_nonblocking(false) {
                warn!(role, %peer, error = %e, "failed to configure accepted socket");
                return None;
            }
            Some((stream, peer))
        }
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => None,
        Err(e) => {
            error!(role, error = %e, "accept failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;
    use std::time::Duration;

    use ctmp_protocol::{CTMP_MAGIC, ProtocolConstants, decode, encode_frame};

    use super::*;

    /// Create a TCP pair: (client_stream, server_stream) on localhost.
    fn tcp_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    fn shared_with_listener() -> (Shared, TcpStream) {
        let (client, server) = tcp_pair();
        let shared = Shared::new(0x00);
        let peer = server.peer_addr().unwrap();
        shared.lock().listeners.push(Listener { stream: server, peer });
        (shared, client)
    }

    #[test]
    fn broadcast_writes_canonical_bytes() {
        let (shared, mut client) = shared_with_listener();
        let wire = [0xCC, 0x00, 0x00, 0x02, 0xAB, 0xCD, 0x77, 0x77, 0x68, 0x69];
        let frame = decode(&wire, CTMP_MAGIC).unwrap();

        shared.broadcast(&frame);

        let mut received = [0u8; 10];
        client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        client.read_exact(&mut received).unwrap();
        assert_eq!(received, [0xCC, 0x00, 0x00, 0x02, 0xAB, 0xCD, 0x00, 0x00, 0x68, 0x69]);
        assert_eq!(shared.stats.snapshot().frames_relayed, 1);
    }

    #[test]
    fn broadcast_gate_rejects_invalid_frame() {
        let (shared, mut client) = shared_with_listener();
        let mut wire = encode_frame(&ProtocolConstants::default(), 0, b"nope").unwrap();
        wire[0] = 0x00;
        let frame = decode(&wire, CTMP_MAGIC).unwrap();
        assert!(!frame.valid);

        shared.broadcast(&frame);

        let stats = shared.stats.snapshot();
        assert_eq!(stats.frames_rejected, 1);
        assert_eq!(stats.frames_relayed, 0);

        client.set_read_timeout(Some(Duration::from_millis(100))).unwrap();
        let mut buf = [0u8; 1];
        assert!(client.read(&mut buf).is_err(), "nothing should have been written");
    }

    #[test]
    fn broadcast_drops_listener_whose_write_fails() {
        let (shared, client) = shared_with_listener();
        shared
            .lock()
            .listeners
            .iter()
            .for_each(|l| l.stream.shutdown(std::net::Shutdown::Write).unwrap());
        drop(client);

        let frame = decode(&encode_frame(&ProtocolConstants::default(), 0, b"x").unwrap(), CTMP_MAGIC).unwrap();
        shared.broadcast(&frame);

        let stats = shared.stats.snapshot();
        assert_eq!(stats.listeners, 0);
        assert_eq!(stats.listeners_pruned, 1);
    }

    #[test]
    fn bind_failure_names_the_role() {
        let taken = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = taken.local_addr().unwrap().port();
        let config = RelayConfig {
            bind_address: "127.0.0.1".parse().unwrap(),
            source_port: 0,
            listener_port: port,
            ..RelayConfig::default()
        };

        match Relay::bind(config) {
            Err(RelayError::Bind { role, .. }) => assert_eq!(role, "listener"),
            Err(other) => panic!("expected bind error, got {other:?}"),
            Ok(_) => panic!("expected bind error"),
        }
    }
}
