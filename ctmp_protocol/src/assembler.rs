// Incremental frame reassembly over a byte stream.
//
// TCP delivers bytes, not frames: one read may hold half a header, or three
// frames and the start of a fourth. `FrameAssembler` owns a growing buffer
// that the reader appends to after every read, then hands out complete frames
// from the front in arrival order.
//
// Algorithm, per call to `next_frame`:
// - fewer than 8 buffered bytes: wait for more;
// - read the declared length from header bytes 2..4; if fewer than
//   `8 + length` bytes are buffered, leave the buffer untouched and wait;
// - otherwise decode the frame, remove exactly `8 + length` bytes, and
//   return it, valid or not.
//
// The full decode (payload copy and, for sensitive frames, the checksum) runs
// once per frame, not once per read, so a large frame arriving in small
// segments costs linear work. `decode` cannot fail here because a whole
// header is always buffered by then; the error is still propagated.
//
// No I/O and no locking. The connection handler owns one assembler per
// socket, and so does the listener-side client.

use crate::constants::HEADER_LEN;
use crate::error::Result;
use crate::frame::{Frame, decode};

/// Reassembles CTMP frames from arbitrarily chunked input.
#[derive(Debug)]
pub struct FrameAssembler {
    magic: u8,
    buffer: Vec<u8>,
}

impl FrameAssembler {
    pub fn new(magic: u8) -> Self {
        Self {
            magic,
            buffer: Vec::new(),
        }
    }

    /// Append freshly read bytes.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Number of bytes waiting for a complete frame.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Drop everything buffered.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Take the next complete frame, if one is buffered.
    ///
    /// Returns `Ok(None)` when more bytes are needed. Invalid frames are
    /// returned too (with `valid == false`) so the caller can log them; they
    /// are consumed either way.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        Ok(self.take_complete()?.map(|(frame, _)| frame))
    }

    /// Like `next_frame`, but returns the frame's exact wire bytes instead.
    pub fn next_raw_frame(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(self.take_complete()?.map(|(_, raw)| raw))
    }

    /// Wire size of the frame at the front of the buffer, once its header
    /// has arrived.
    fn declared_frame_len(&self) -> Option<usize> {
        let header = self.buffer.get(..HEADER_LEN)?;
        Some(HEADER_LEN + usize::from(u16::from_be_bytes([header[2], header[3]])))
    }

    fn take_complete(&mut self) -> Result<Option<(Frame, Vec<u8>)>> {
        let Some(frame_len) = self.declared_frame_len() else {
            return Ok(None);
        };
        if frame_len > self.buffer.len() {
            return Ok(None);
        }

        let frame = decode(&self.buffer[..frame_len], self.magic)?;
        let raw: Vec<u8> = self.buffer.drain(..frame_len).collect();
        Ok(Some((frame, raw)))
    }
}
