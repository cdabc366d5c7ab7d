//! Integration tests for the ttc-core frame codec.
//!
//! These tests verify encoding and decoding through the public API at the
//! payload sizes that matter on the wire: the smallest legal payload, the
//! largest payload whose length fits in 16 bits, and a payload large enough
//! to span many socket reads.

use ttc_core::{
    decode_frame, encode_frame,
    protocol::frame::{encode_close, LENGTH_PREFIX_SIZE, MAX_PAYLOAD_LEN},
    Frame, FrameError,
};

/// Encodes a payload and then decodes it, asserting every byte is consumed.
fn roundtrip(payload: &[u8]) -> Vec<u8> {
    let bytes = encode_frame(payload).expect("encode must succeed");
    let (frame, consumed) = decode_frame(&bytes).expect("decode must succeed");
    assert_eq!(consumed, bytes.len(), "all bytes must be consumed");
    match frame {
        Frame::Payload(p) => p.to_vec(),
        Frame::Close => panic!("a non-empty payload must not decode as the sentinel"),
    }
}

fn patterned(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[test]
fn test_roundtrip_rejects_zero_length_payload() {
    assert_eq!(encode_frame(&[]), Err(FrameError::EmptyPayload));
}

#[test]
fn test_roundtrip_single_byte_payload() {
    assert_eq!(roundtrip(&[0x2A]), vec![0x2A]);
}

#[test]
fn test_roundtrip_65535_byte_payload() {
    let payload = patterned(65_535);
    assert_eq!(roundtrip(&payload), payload);
}

#[test]
fn test_roundtrip_large_payload_crossing_many_buffer_boundaries() {
    // 1 MiB + 3 bytes: not a multiple of any common socket buffer size.
    let payload = patterned(1024 * 1024 + 3);
    assert_eq!(roundtrip(&payload), payload);
}

#[test]
fn test_sentinel_decodes_as_close() {
    let close = encode_close();
    let (frame, consumed) = decode_frame(&close).unwrap();
    assert_eq!(frame, Frame::Close);
    assert_eq!(consumed, LENGTH_PREFIX_SIZE);
}

#[test]
fn test_stream_of_frames_decodes_when_fed_byte_by_byte() {
    // Arrange: three frames back to back, followed by the sentinel
    let payloads: Vec<Vec<u8>> = vec![b"a".to_vec(), patterned(300), b"last".to_vec()];
    let mut wire = Vec::new();
    for p in &payloads {
        wire.extend_from_slice(&encode_frame(p).unwrap());
    }
    wire.extend_from_slice(&encode_close());

    // Act: feed the decoder one byte at a time, as a slow socket would
    let mut buf = Vec::new();
    let mut decoded = Vec::new();
    let mut closed = false;
    for byte in wire {
        buf.push(byte);
        loop {
            match decode_frame(&buf) {
                Ok((Frame::Payload(p), n)) => {
                    decoded.push(p.to_vec());
                    buf.drain(..n);
                }
                Ok((Frame::Close, n)) => {
                    closed = true;
                    buf.drain(..n);
                }
                Err(FrameError::InsufficientData { .. }) => break,
                Err(e) => panic!("unexpected decode error: {e}"),
            }
        }
    }

    // Assert
    assert_eq!(decoded, payloads);
    assert!(closed, "the trailing sentinel must be seen");
    assert!(buf.is_empty());
}

#[test]
fn test_oversized_declared_length_is_rejected() {
    let declared = (MAX_PAYLOAD_LEN as u32 + 1).to_le_bytes();
    assert!(matches!(
        decode_frame(&declared),
        Err(FrameError::PayloadTooLarge { .. })
    ));
}
