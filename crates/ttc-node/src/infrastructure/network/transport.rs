//! Socket-facing reader and writer loops for length-prefixed frames.
//!
//! # Wire format (for beginners)
//!
//! Every message on a TTC connection is a *frame*:
//!
//! ```text
//! ┌──────────────────────┬──────────────────────────┐
//! │ length: u32 (LE, 4B) │ payload: `length` bytes  │
//! └──────────────────────┴──────────────────────────┘
//! ```
//!
//! A length of zero carries no payload and means "please close".  Inside the
//! process the same meaning travels through the outbound queue as
//! [`Outbound::Shutdown`]; the writer reacts to it by shutting down the write
//! half of the socket, which the peer's reader sees as end-of-stream.
//!
//! Both loops are generic over `AsyncRead`/`AsyncWrite`, so the tests drive
//! them through an in-memory `tokio::io::duplex` pipe instead of a socket.

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use ttc_core::protocol::frame::{encode_length, parse_header, LENGTH_PREFIX_SIZE};
use ttc_core::{FrameError, FrameHeader, Outbound, OutboundReceiver};

/// Errors that end a reader or writer loop.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The underlying stream failed (including EOF in the middle of a frame).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A frame could not be encoded or the peer sent an invalid length.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
}

/// Writes one frame: the length prefix, then the payload, flushing after each.
///
/// # Errors
///
/// Returns [`TransportError::Frame`] for an empty or oversized payload and
/// [`TransportError::Io`] if the stream fails.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let prefix = encode_length(payload.len())?;
    writer.write_all(&prefix).await?;
    writer.flush().await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Drains `queue` into `writer` until the shutdown sentinel arrives.
///
/// On [`Outbound::Shutdown`] the write half is shut down and the loop
/// returns `Ok(())`.  A write error ends the loop early.
///
/// # Errors
///
/// Returns the first [`TransportError`] raised while writing.
pub async fn write_frames<W>(mut writer: W, mut queue: OutboundReceiver) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    loop {
        match queue.recv().await {
            Outbound::Frame { payload, .. } => {
                trace!("writing {} byte frame", payload.len());
                write_frame(&mut writer, &payload).await?;
            }
            Outbound::Shutdown => {
                // The peer may already be gone; a failed FIN is not an error
                // worth reporting at this point.
                let _ = writer.shutdown().await;
                return Ok(());
            }
        }
    }
}

/// Reads frames from `reader` and hands each payload to `on_payload`.
///
/// Returns `Ok(())` on a clean end-of-stream between frames or when the
/// peer sends a zero-length frame.
///
/// # Errors
///
/// Returns [`TransportError::Io`] on a read failure (including EOF in the
/// middle of a frame) and [`TransportError::Frame`] when the declared length
/// exceeds the payload limit.
pub async fn read_frames<R, F>(reader: &mut R, mut on_payload: F) -> Result<(), TransportError>
where
    R: AsyncRead + Unpin + ?Sized,
    F: FnMut(Vec<u8>),
{
    loop {
        let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
        match reader.read_exact(&mut prefix).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e.into()),
        }

        let len = match parse_header(prefix)? {
            FrameHeader::Close => {
                trace!("peer sent close frame");
                return Ok(());
            }
            FrameHeader::Payload(len) => len,
        };

        let mut payload = vec![0u8; len];
        reader.read_exact(&mut payload).await?;
        on_payload(payload);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;
    use tokio_test::assert_ok;
    use ttc_core::protocol::frame::{encode_close, encode_frame};
    use ttc_core::outbound_queue;

    #[tokio::test]
    async fn test_written_frames_are_read_back_in_order() {
        // Arrange
        let (mut a, mut b) = duplex(1024);

        // Act
        assert_ok!(write_frame(&mut a, b"first").await);
        assert_ok!(write_frame(&mut a, b"second").await);
        drop(a);
        let mut seen = Vec::new();
        assert_ok!(read_frames(&mut b, |p| seen.push(p)).await);

        // Assert
        assert_eq!(seen, vec![b"first".to_vec(), b"second".to_vec()]);
    }

    #[tokio::test]
    async fn test_write_frame_rejects_empty_payload() {
        let (mut a, _b) = duplex(64);
        let result = write_frame(&mut a, &[]).await;
        assert!(matches!(
            result,
            Err(TransportError::Frame(FrameError::EmptyPayload))
        ));
    }

    #[tokio::test]
    async fn test_reader_stops_at_close_frame() {
        // Arrange: a payload, the close sentinel, then bytes that must be ignored
        let (mut a, mut b) = duplex(1024);
        a.write_all(&encode_frame(b"x").unwrap()).await.unwrap();
        a.write_all(&encode_close()).await.unwrap();
        a.write_all(&encode_frame(b"after").unwrap()).await.unwrap();

        // Act
        let mut seen = Vec::new();
        assert_ok!(read_frames(&mut b, |p| seen.push(p)).await);

        // Assert
        assert_eq!(seen, vec![b"x".to_vec()]);
    }

    #[tokio::test]
    async fn test_reader_reports_eof_inside_payload() {
        // Arrange: prefix announces 10 bytes but only 3 arrive
        let (mut a, mut b) = duplex(64);
        a.write_all(&10u32.to_le_bytes()).await.unwrap();
        a.write_all(b"abc").await.unwrap();
        drop(a);

        // Act
        let result = read_frames(&mut b, |_| {}).await;

        // Assert
        assert!(matches!(result, Err(TransportError::Io(_))));
    }

    #[tokio::test]
    async fn test_reader_rejects_oversized_length() {
        let (mut a, mut b) = duplex(64);
        a.write_all(&u32::MAX.to_le_bytes()).await.unwrap();
        let result = read_frames(&mut b, |_| {}).await;
        assert!(matches!(
            result,
            Err(TransportError::Frame(FrameError::PayloadTooLarge { .. }))
        ));
    }

    #[tokio::test]
    async fn test_writer_drains_queue_then_closes_on_shutdown() {
        // Arrange
        let (a, mut b) = duplex(1024);
        let (queue, rx) = outbound_queue(8);
        assert_ok!(queue.push(b"one".to_vec()));
        assert_ok!(queue.push(b"two".to_vec()));
        assert!(queue.shutdown().await);

        // Act
        assert_ok!(write_frames(a, rx).await);
        let mut seen = Vec::new();
        assert_ok!(read_frames(&mut b, |p| seen.push(p)).await);

        // Assert: both payloads arrive and the reader sees a clean EOF
        assert_eq!(seen, vec![b"one".to_vec(), b"two".to_vec()]);
    }

    #[tokio::test]
    async fn test_large_payload_crosses_small_pipe() {
        // Arrange: payload far larger than the pipe buffer
        let (mut a, mut b) = duplex(256);
        let payload: Vec<u8> = (0..70_000u32).map(|i| (i % 251) as u8).collect();
        let expected = payload.clone();

        // Act
        let writer = tokio::spawn(async move {
            write_frame(&mut a, &payload).await.unwrap();
        });
        let mut seen = Vec::new();
        assert_ok!(read_frames(&mut b, |p| seen.push(p)).await);
        writer.await.unwrap();

        // Assert
        assert_eq!(seen, vec![expected]);
    }
}
