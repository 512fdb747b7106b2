// One peer connection and, for the source role, its reader thread.
//
// `Connection` owns a `TcpStream`. `start` clones the stream and spawns a
// detached reader thread that reads into a fixed scratch buffer, feeds a
// `FrameAssembler`, and calls the frame callback once per complete, valid
// frame. Invalid frames are logged and counted, never forwarded.
//
// Lifecycle: Running -> Stopped. The reader flips the shared `running` flag
// to false when a read returns 0 or fails; that is the only way the loop
// ends on its own. `stop()` only clears the flag. Closing the socket belongs
// to whoever owns the `Connection`: dropping it shuts the stream down, which
// also unblocks a reader parked in `read()`. The reader thread never drops
// its own `Connection`; the server clears the slot from its main loop.
//
// The assembler lives on the reader thread's stack, so the receive buffer is
// never shared and needs no lock.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;

use ctmp_protocol::{Frame, FrameAssembler};
use tracing::{debug, info, warn};

/// Shared between a `Connection` and its reader thread.
#[derive(Debug)]
struct ConnectionState {
    running: AtomicBool,
    frames_received: AtomicU64,
    frames_dropped: AtomicU64,
}

/// A handle to one accepted peer socket.
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    state: Arc<ConnectionState>,
}

impl Connection {
    /// Wrap an accepted stream. The connection starts out Running.
    pub fn new(stream: TcpStream) -> io::Result<Self> {
        let peer = stream.peer_addr()?;
        Ok(Self {
            stream,
            peer,
            state: Arc::new(ConnectionState {
                running: AtomicBool::new(true),
                frames_received: AtomicU64::new(0),
                frames_dropped: AtomicU64::new(0),
            }),
        })
    }

    /// Spawn the reader thread. `on_frame` runs on that thread, once per
    /// valid frame, in stream order.
    pub fn start<F>(&self, magic: u8, read_chunk_size: usize, on_frame: F) -> io::Result<()>
    where
        F: FnMut(Frame) + Send + 'static,
    {
        let reader = self.stream.try_clone()?;
        let state = Arc::clone(&self.state);
        let peer = self.peer;
        let assembler = FrameAssembler::new(magic);

        thread::Builder::new()
            .name(format!("ctmp-reader-{peer}"))
            .spawn(move || {
                receive_loop(reader, peer, &state, assembler, read_chunk_size.max(1), on_frame);
            })?;
        Ok(())
    }

    /// Mark the connection stopped. Idempotent; does not touch the socket.
    pub fn stop(&self) {
        self.state.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::SeqCst)
    }

    /// Best-effort write to the peer. A failed write stops the connection.
    pub fn send(&self, bytes: &[u8]) {
        if let Err(e) = (&self.stream).write_all(bytes) {
            warn!(peer = %self.peer, error = %e, "send failed; stopping connection");
            self.stop();
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Valid frames delivered to the callback so far.
    pub fn frames_received(&self) -> u64 {
        self.state.frames_received.load(Ordering::Relaxed)
    }

    /// Complete frames discarded for failing validation.
    pub fn frames_dropped(&self) -> u64 {
        self.state.frames_dropped.load(Ordering::Relaxed)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.stop();
        // Wakes the reader thread if it is blocked in read().
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

/// Reader thread body.
fn receive_loop<F>(
    mut reader: TcpStream,
    peer: SocketAddr,
    state: &ConnectionState,
    mut assembler: FrameAssembler,
    read_chunk_size: usize,
    mut on_frame: F,
) where
    F: FnMut(Frame),
{
    let mut scratch = vec![0u8; read_chunk_size];

    while state.running.load(Ordering::SeqCst) {
        let n = match reader.read(&mut scratch) {
            Ok(0) => {
                info!(%peer, "peer closed connection");
                break;
            }
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                info!(%peer, error = %e, "read failed; closing connection");
                break;
            }
        };

        assembler.extend(&scratch[..n]);
        drain_frames(&mut assembler, peer, state, &mut on_frame);
    }

    state.running.store(false, Ordering::SeqCst);
}

/// Hand every complete frame in the assembler to the callback.
fn drain_frames<F>(assembler: &mut FrameAssembler, peer: SocketAddr, state: &ConnectionState, on_frame: &mut F)
where
    F: FnMut(Frame),
{
    loop {
        match assembler.next_frame() {
            Ok(Some(frame)) if frame.valid => {
                state.frames_received.fetch_add(1, Ordering::Relaxed);
                on_frame(frame);
            }
            Ok(Some(frame)) => {
                state.frames_dropped.fetch_add(1, Ordering::Relaxed);
                debug!(
                    %peer,
                    magic = frame.magic,
                    options = frame.options,
                    length = frame.length,
                    "invalid frame dropped"
                );
            }
            Ok(None) => break,
            Err(e) => {
                assembler.clear();
                warn!(%peer, error = %e, "malformed stream; receive buffer cleared");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;
    use std::sync::mpsc;
    use std::time::{Duration, Instant};

    use ctmp_protocol::{CTMP_MAGIC, ProtocolConstants, SENSITIVE_FLAG, encode_frame};

    use super::*;

    /// Create a TCP pair: (client_stream, server_stream) on localhost.
    fn tcp_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    /// Start a source connection whose callback forwards frames to a channel.
    fn started_source(chunk: usize) -> (TcpStream, Connection, mpsc::Receiver<Frame>) {
        let (client, server) = tcp_pair();
        let connection = Connection::new(server).unwrap();
        let (tx, rx) = mpsc::channel();
        connection
            .start(CTMP_MAGIC, chunk, move |frame| {
                let _ = tx.send(frame);
            })
            .unwrap();
        (client, connection, rx)
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn delivers_frame_sent_in_one_write() {
        let (mut client, connection, rx) = started_source(1024);
        let wire = encode_frame(&ProtocolConstants::default(), SENSITIVE_FLAG, b"whole").unwrap();
        client.write_all(&wire).unwrap();

        let frame = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(frame.payload, b"whole");
        assert!(frame.valid);
        assert!(connection.is_running());
    }

    #[test]
    fn fragmented_and_whole_delivery_match() {
        let wire = encode_frame(&ProtocolConstants::default(), SENSITIVE_FLAG, b"split me up").unwrap();

        let (mut whole_client, _whole_conn, whole_rx) = started_source(1024);
        whole_client.write_all(&wire).unwrap();
        let expected = whole_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let (mut trickle_client, _trickle_conn, trickle_rx) = started_source(1024);
        trickle_client.set_nodelay(true).unwrap();
        for byte in &wire {
            trickle_client.write_all(std::slice::from_ref(byte)).unwrap();
            thread::sleep(Duration::from_millis(1));
        }
        let got = trickle_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        assert_eq!(got, expected);
        assert!(trickle_rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn coalesced_frames_arrive_in_order() {
        let constants = ProtocolConstants::default();
        let mut wire = encode_frame(&constants, SENSITIVE_FLAG, b"first").unwrap();
        wire.extend(encode_frame(&constants, 0, b"second").unwrap());

        let (mut client, _connection, rx) = started_source(1024);
        client.write_all(&wire).unwrap();

        let first = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        let second = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(first.payload, b"first");
        assert_eq!(second.payload, b"second");
    }

    #[test]
    fn small_read_chunks_still_reassemble() {
        let payload = vec![0x5A; 300];
        let wire = encode_frame(&ProtocolConstants::default(), SENSITIVE_FLAG, &payload).unwrap();

        let (mut client, _connection, rx) = started_source(7);
        client.write_all(&wire).unwrap();

        let frame = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(frame.payload, payload);
    }

    #[test]
    fn invalid_frames_are_not_forwarded() {
        let constants = ProtocolConstants::default();
        let mut bad = encode_frame(&constants, SENSITIVE_FLAG, b"tampered").unwrap();
        bad[9] ^= 0x01;
        let good = encode_frame(&constants, 0, b"fine").unwrap();

        let (mut client, connection, rx) = started_source(1024);
        client.write_all(&bad).unwrap();
        client.write_all(&good).unwrap();

        let frame = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(frame.payload, b"fine");
        assert!(wait_until(|| connection.frames_dropped() == 1));
        assert_eq!(connection.frames_received(), 1);
    }

    #[test]
    fn peer_close_stops_connection() {
        let (client, connection, _rx) = started_source(1024);
        assert!(connection.is_running());
        drop(client);
        assert!(wait_until(|| !connection.is_running()));
    }

    #[test]
    fn stop_is_idempotent() {
        let (_client, server) = tcp_pair();
        let connection = Connection::new(server).unwrap();
        connection.stop();
        connection.stop();
        assert!(!connection.is_running());
    }

    #[test]
    fn drop_unblocks_reader() {
        let (mut client, connection, rx) = started_source(1024);
        drop(connection);
        // The callback's sender is dropped when the reader thread exits.
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)),
            Err(mpsc::RecvTimeoutError::Disconnected)
        );
        let mut buf = [0u8; 1];
        assert_eq!(client.read(&mut buf).unwrap_or(0), 0);
    }

    #[test]
    fn send_writes_to_peer() {
        let (mut client, server) = tcp_pair();
        let connection = Connection::new(server).unwrap();
        connection.send(b"pong");

        let mut buf = [0u8; 4];
        client.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"pong");
        assert!(connection.is_running());
    }

    #[test]
    fn failed_send_stops_connection() {
        let (client, server) = tcp_pair();
        let connection = Connection::new(server).unwrap();
        connection.stream.shutdown(Shutdown::Write).unwrap();
        drop(client);
        connection.send(b"nobody home");
        assert!(!connection.is_running());
    }
}
