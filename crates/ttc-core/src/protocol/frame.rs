//! Binary codec for length-prefixed TTC frames.
//!
//! Wire format:
//! ```text
//! [payload_len:4][payload:N]
//! ```
//! The length prefix is a little-endian `u32`.  A length of zero is the
//! shutdown sentinel: it asks the receiver to close the connection and is
//! never used for an application message.
//!
//! The socket-facing reader and writer loops live in `ttc-node`; this module
//! only knows how to turn payloads into bytes and back, which keeps it easy
//! to test and benchmark without a network.

use thiserror::Error;

/// Size of the length prefix that precedes every payload.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Largest payload accepted on encode or decode (16 MiB).
///
/// A corrupt or hostile length prefix would otherwise make the reader
/// allocate up to 4 GiB before the first payload byte arrives.
pub const MAX_PAYLOAD_LEN: usize = 16 * 1024 * 1024;

/// Errors that can occur during frame encoding or decoding.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// Zero-length payloads are reserved for the shutdown sentinel.
    #[error("empty payload: a zero length is reserved for the shutdown sentinel")]
    EmptyPayload,

    /// The payload (or the declared length) exceeds [`MAX_PAYLOAD_LEN`].
    #[error("payload of {len} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { len: usize, max: usize },

    /// The byte slice is shorter than the frame it starts.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },
}

/// The meaning of a decoded length prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameHeader {
    /// Length zero: the peer asks for the connection to be closed.
    Close,
    /// A payload of this many bytes follows.
    Payload(usize),
}

/// A frame decoded from the front of a byte buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame<'a> {
    /// The shutdown sentinel.
    Close,
    /// An application payload (always at least one byte).
    Payload(&'a [u8]),
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes the length prefix for a payload of `len` bytes.
///
/// # Errors
///
/// Returns [`FrameError::EmptyPayload`] for `len == 0` and
/// [`FrameError::PayloadTooLarge`] above [`MAX_PAYLOAD_LEN`].
pub fn encode_length(len: usize) -> Result<[u8; LENGTH_PREFIX_SIZE], FrameError> {
    check_len(len)?;
    Ok((len as u32).to_le_bytes())
}

/// Encodes a payload into a complete frame (length prefix + payload).
///
/// # Errors
///
/// Returns [`FrameError`] if the payload is empty or too large.
///
/// # Examples
///
/// ```rust
/// use ttc_core::protocol::frame::{decode_frame, encode_frame, Frame};
///
/// let bytes = encode_frame(b"turnout 3 thrown").unwrap();
/// let (frame, consumed) = decode_frame(&bytes).unwrap();
/// assert_eq!(frame, Frame::Payload(b"turnout 3 thrown"));
/// assert_eq!(consumed, bytes.len());
/// ```
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    let prefix = encode_length(payload.len())?;

    let mut buf = Vec::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    buf.extend_from_slice(&prefix);
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Returns the encoded shutdown sentinel (a zero length prefix, no payload).
pub fn encode_close() -> [u8; LENGTH_PREFIX_SIZE] {
    0u32.to_le_bytes()
}

/// Interprets a 4-byte length prefix.
///
/// # Errors
///
/// Returns [`FrameError::PayloadTooLarge`] if the declared length exceeds
/// [`MAX_PAYLOAD_LEN`].
pub fn parse_header(prefix: [u8; LENGTH_PREFIX_SIZE]) -> Result<FrameHeader, FrameError> {
    match u32::from_le_bytes(prefix) as usize {
        0 => Ok(FrameHeader::Close),
        len if len > MAX_PAYLOAD_LEN => Err(FrameError::PayloadTooLarge {
            len,
            max: MAX_PAYLOAD_LEN,
        }),
        len => Ok(FrameHeader::Payload(len)),
    }
}

/// Decodes one frame from the beginning of `bytes`.
///
/// Returns the frame and the total number of bytes consumed (prefix +
/// payload), so the caller can advance their read cursor.
///
/// # Errors
///
/// Returns [`FrameError::InsufficientData`] while the buffer does not yet
/// hold a complete frame, and [`FrameError::PayloadTooLarge`] for an
/// oversized length prefix.
pub fn decode_frame(bytes: &[u8]) -> Result<(Frame<'_>, usize), FrameError> {
    if bytes.len() < LENGTH_PREFIX_SIZE {
        return Err(FrameError::InsufficientData {
            needed: LENGTH_PREFIX_SIZE,
            available: bytes.len(),
        });
    }

    let prefix = [bytes[0], bytes[1], bytes[2], bytes[3]];
    let len = match parse_header(prefix)? {
        FrameHeader::Close => return Ok((Frame::Close, LENGTH_PREFIX_SIZE)),
        FrameHeader::Payload(len) => len,
    };

    let total_needed = LENGTH_PREFIX_SIZE + len;
    if bytes.len() < total_needed {
        return Err(FrameError::InsufficientData {
            needed: total_needed,
            available: bytes.len(),
        });
    }

    Ok((
        Frame::Payload(&bytes[LENGTH_PREFIX_SIZE..total_needed]),
        total_needed,
    ))
}

fn check_len(len: usize) -> Result<(), FrameError> {
    if len == 0 {
        return Err(FrameError::EmptyPayload);
    }
    if len > MAX_PAYLOAD_LEN {
        return Err(FrameError::PayloadTooLarge {
            len,
            max: MAX_PAYLOAD_LEN,
        });
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
