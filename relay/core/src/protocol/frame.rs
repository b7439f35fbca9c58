//! Frame Protocol
//!
//! Envelopes travel over byte-stream transports as length-prefixed frames
//! with a CRC32 checksum.
//!
//! # Frame Format
//!
//! ```text
//! +----------------+----------------+------------------------------------------+
//! | Length (4)     | Checksum (4)   | Payload (variable)                       |
//! | big-endian u32 | CRC32          | encoded Envelope                         |
//! +----------------+----------------+------------------------------------------+
//! ```
//!
//! The Length field is the size of the payload only. A corrupt frame is
//! skipped by the decoder so a single bad message never poisons the rest of
//! the connection.

use thiserror::Error;

/// Maximum payload size (10 MB)
pub const MAX_FRAME_SIZE: usize = 10 * 1024 * 1024;

/// Minimum buffer capacity for decoder
const MIN_BUFFER_CAPACITY: usize = 4096;

/// Frame header size: 4 bytes length + 4 bytes checksum
pub const HEADER_SIZE: usize = 8;

/// Errors produced while framing or unframing payloads
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// Payload exceeds [`MAX_FRAME_SIZE`]
    #[error("frame too large: {size} bytes (max: {MAX_FRAME_SIZE})")]
    TooLarge {
        /// Offending size
        size: usize,
    },

    /// Payload does not match its checksum
    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        /// Checksum carried in the header
        expected: u32,
        /// Checksum of the received payload
        actual: u32,
    },
}

#[inline]
fn compute_checksum(payload: &[u8]) -> u32 {
    crc32fast::hash(payload)
}

/// Wrap a payload in a frame header
///
/// # Errors
///
/// Returns [`FrameError::TooLarge`] if the payload exceeds [`MAX_FRAME_SIZE`].
pub fn encode(payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    if payload.len() > MAX_FRAME_SIZE {
        return Err(FrameError::TooLarge {
            size: payload.len(),
        });
    }

    #[allow(clippy::cast_possible_truncation)]
    let len = payload.len() as u32;
    let checksum = compute_checksum(payload);

    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(&checksum.to_be_bytes());
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Decoder state machine for streaming frame parsing
///
/// Buffers incoming bytes and yields complete payloads.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    /// Position where we've consumed up to
    read_pos: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    /// Create a new decoder with default buffer capacity
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(MIN_BUFFER_CAPACITY),
            read_pos: 0,
        }
    }

    /// Append bytes to the buffer
    pub fn push(&mut self, data: &[u8]) {
        if self.read_pos > self.buffer.len() / 2 && self.read_pos > MIN_BUFFER_CAPACITY {
            self.buffer.drain(..self.read_pos);
            self.read_pos = 0;
        }
        self.buffer.extend_from_slice(data);
    }

    /// Number of buffered, unconsumed bytes
    #[must_use]
    pub fn available(&self) -> usize {
        self.buffer.len() - self.read_pos
    }

    /// Try to take the next complete payload
    ///
    /// Returns `Ok(None)` when more data is needed. A checksum mismatch
    /// consumes the bad frame before returning the error, so the next call
    /// continues with the following frame. An oversized length header leaves
    /// the stream unrecoverable; the buffer is cleared.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError`] for corrupt or oversized frames.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, FrameError> {
        let available = self.available();

        if available < HEADER_SIZE {
            return Ok(None);
        }

        let header = &self.buffer[self.read_pos..self.read_pos + HEADER_SIZE];
        let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let expected = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);

        if len > MAX_FRAME_SIZE {
            self.clear();
            return Err(FrameError::TooLarge { size: len });
        }

        if available < HEADER_SIZE + len {
            return Ok(None);
        }

        let payload_start = self.read_pos + HEADER_SIZE;
        let payload_end = payload_start + len;
        self.read_pos = payload_end;

        let payload = &self.buffer[payload_start..payload_end];
        let actual = compute_checksum(payload);
        if actual != expected {
            return Err(FrameError::ChecksumMismatch { expected, actual });
        }

        Ok(Some(payload.to_vec()))
    }

    /// Clear the buffer
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.read_pos = 0;
    }
}
