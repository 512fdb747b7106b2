// Blocking TCP clients for the two sides of the relay.
//
// - `SourceClient` connects to the source port and writes frames. It never
//   reads: the relay sends nothing back to a source.
// - `ListenerClient` connects to the listener port and reads broadcast
//   frames. It keeps its own `FrameAssembler`, since the relay's writes and
//   the client's reads do not line up with frame boundaries.
//
// Both are plain blocking sockets driven from the calling thread. The
// integration tests use them to exercise a real relay, and small tools can
// use them to feed or tap one.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use ctmp_protocol::{Frame, FrameAssembler, ProtocolConstants, encode_frame};

use crate::error::Result;

/// Producer side: writes frames to the relay's source port.
pub struct SourceClient {
    stream: TcpStream,
    constants: ProtocolConstants,
}

impl SourceClient {
    pub fn connect(addr: impl ToSocketAddrs, constants: ProtocolConstants) -> Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        Ok(Self { stream, constants })
    }

    /// Encode and send one frame. When `options` has the sensitive flag the
    /// checksum is filled in.
    pub fn send_frame(&mut self, options: u8, payload: &[u8]) -> Result<()> {
        let wire = encode_frame(&self.constants, options, payload)?;
        self.send_raw(&wire)
    }

    /// Send bytes as-is, for partial, coalesced, or deliberately broken frames.
    pub fn send_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.stream.write_all(bytes)?;
        Ok(())
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.stream.local_addr()?)
    }

    /// Read whatever the relay sent back. Only ever returns `Ok(0)` (closed)
    /// or an error, since the relay does not write to sources.
    pub fn read_closed(&mut self, timeout: Duration) -> io::Result<usize> {
        self.stream.set_read_timeout(Some(timeout))?;
        let mut buf = [0u8; 1];
        self.stream.read(&mut buf)
    }

    pub fn shutdown(&self) -> Result<()> {
        self.stream.shutdown(Shutdown::Both)?;
        Ok(())
    }
}

/// Consumer side: reads broadcast frames from the relay's listener port.
pub struct ListenerClient {
    stream: TcpStream,
    assembler: FrameAssembler,
    scratch: Vec<u8>,
}

impl ListenerClient {
    pub fn connect(addr: impl ToSocketAddrs, magic: u8) -> Result<Self> {
        let stream = TcpStream::connect(addr)?;
        Ok(Self {
            stream,
            assembler: FrameAssembler::new(magic),
            scratch: vec![0u8; 1024],
        })
    }

    /// Bound how long `recv_frame`/`recv_raw` block. `None` waits forever.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.stream.set_read_timeout(timeout)?;
        Ok(())
    }

    /// Block until a full frame has arrived and return it decoded. Returns
    /// `Ok(None)` once the relay closes the connection.
    pub fn recv_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            if let Some(frame) = self.assembler.next_frame()? {
                return Ok(Some(frame));
            }
            if !self.fill()? {
                return Ok(None);
            }
        }
    }

    /// Like `recv_frame`, but returns the frame's exact bytes as broadcast.
    pub fn recv_raw(&mut self) -> Result<Option<Vec<u8>>> {
        loop {
            if let Some(raw) = self.assembler.next_raw_frame()? {
                return Ok(Some(raw));
            }
            if !self.fill()? {
                return Ok(None);
            }
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.stream.local_addr()?)
    }

    /// One read into the assembler. False on EOF.
    fn fill(&mut self) -> Result<bool> {
        loop {
            match self.stream.read(&mut self.scratch) {
                Ok(0) => return Ok(false),
                Ok(n) => {
                    self.assembler.extend(&self.scratch[..n]);
                    return Ok(true);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}
