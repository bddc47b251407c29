//! Framed stream codec.
//!
//! One message on the wire is a 4-byte big-endian signed length followed by
//! exactly that many bytes of JSON:
//!
//! ```text
//! [i32 BE length] [JSON document: length bytes]
//! ```
//!
//! Lengths below zero or above the configured bound are rejected before any
//! body buffer is allocated.

use crate::config::DEFAULT_MAX_FRAME_LENGTH;
use crate::error::CodecError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::codec::{Decoder, Encoder};

/// Size of the length prefix.
pub const LENGTH_FIELD_LEN: usize = 4;

/// Typed JSON framing for `FramedRead` / `FramedWrite`.
///
/// Also used by [`encode_frame`] to build a ready-to-send buffer.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec<T> {
    max_frame_length: usize,
    _message: PhantomData<fn() -> T>,
}

impl<T> FrameCodec<T> {
    pub fn new(max_frame_length: usize) -> Self {
        Self {
            max_frame_length,
            _message: PhantomData,
        }
    }

    pub fn max_frame_length(&self) -> usize {
        self.max_frame_length
    }
}

impl<T> Default for FrameCodec<T> {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LENGTH)
    }
}

impl<T: DeserializeOwned> Decoder for FrameCodec<T> {
    type Item = T;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<T>, CodecError> {
        if src.len() < LENGTH_FIELD_LEN {
            return Ok(None);
        }

        let length = i32::from_be_bytes([src[0], src[1], src[2], src[3]]);
        let length = check_length(length, self.max_frame_length)?;

        let total = LENGTH_FIELD_LEN + length;
        if src.len() < total {
            // Wait for the rest of the body
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_FIELD_LEN);
        let body = src.split_to(length);
        decode_body(&body).map(Some)
    }
}

impl<T: Serialize> Encoder<&T> for FrameCodec<T> {
    type Error = CodecError;

    fn encode(&mut self, message: &T, dst: &mut BytesMut) -> Result<(), CodecError> {
        let body = serde_json::to_vec(message)?;
        let length = i32::try_from(body.len())
            .ok()
            .filter(|_| body.len() <= self.max_frame_length)
            .ok_or(CodecError::FrameTooLarge {
                length: body.len() as i64,
                max: self.max_frame_length,
            })?;

        dst.reserve(LENGTH_FIELD_LEN + body.len());
        dst.put_i32(length);
        dst.extend_from_slice(&body);
        Ok(())
    }
}

fn check_length(length: i32, max: usize) -> Result<usize, CodecError> {
    match usize::try_from(length) {
        Ok(len) if len <= max => Ok(len),
        _ => Err(CodecError::FrameTooLarge {
            length: i64::from(length),
            max,
        }),
    }
}

/// Serialize `message` and prepend its length, ready for a single `write_all`.
pub fn encode_frame<T: Serialize>(message: &T) -> Result<Bytes, CodecError> {
    let mut buf = BytesMut::new();
    FrameCodec::<T>::default().encode(message, &mut buf)?;
    Ok(buf.freeze())
}

/// Parse a frame body (without its length prefix).
pub fn decode_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, CodecError> {
    Ok(serde_json::from_slice(body)?)
}

/// Read exactly one frame from `reader`.
///
/// Consumes only the bytes of that frame. A stream that ends before the frame
/// is complete yields `CodecError::Io` with `UnexpectedEof`.
pub async fn read_frame<R, T>(reader: &mut R, max_frame_length: usize) -> Result<T, CodecError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let length = check_length(reader.read_i32().await?, max_frame_length)?;
    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await?;
    decode_body(&body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use circum_env::{EndpointSnapshot, FusedSnapshot, Position, TrackReport};
    use futures_util::StreamExt;
    use tokio::io::AsyncWriteExt;
    use tokio_util::codec::FramedRead;

    #[test]
    fn test_frame_layout() {
        let frame = encode_frame(&EndpointSnapshot::default()).unwrap();
        let body = br#"{"objects":[]}"#;

        assert_eq!(&frame[..4], &(body.len() as i32).to_be_bytes());
        assert_eq!(&frame[4..], body);
    }

    #[test]
    fn test_decode_empty_snapshot() {
        let mut codec = FrameCodec::<EndpointSnapshot>::default();
        let mut buf = BytesMut::from(&encode_frame(&EndpointSnapshot::default()).unwrap()[..]);

        let decoded = codec.decode(&mut buf).unwrap();

        assert_eq!(decoded, Some(EndpointSnapshot::default()));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_fused_snapshot() {
        let fused = FusedSnapshot {
            objects: vec![
                TrackReport { x: 1.0, y: 2.0, z: 3.0, id: 7 },
                TrackReport { x: -1.5, y: 0.0, z: 0.25, id: 8 },
            ],
        };
        let mut codec = FrameCodec::<FusedSnapshot>::default();
        let mut buf = BytesMut::from(&encode_frame(&fused).unwrap()[..]);

        assert_eq!(codec.decode(&mut buf).unwrap(), Some(fused));
    }

    #[test]
    fn test_partial_frame_waits_for_more() {
        let frame = encode_frame(&EndpointSnapshot::new(vec![Position::new(1.0, 2.0, 3.0)])).unwrap();
        let mut codec = FrameCodec::<EndpointSnapshot>::default();

        let mut buf = BytesMut::from(&frame[..2]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(&frame[2..frame.len() - 1]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(&frame[frame.len() - 1..]);
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.objects, vec![Position::new(1.0, 2.0, 3.0)]);
    }

    #[test]
    fn test_oversize_length_rejected() {
        let mut codec = FrameCodec::<EndpointSnapshot>::new(16);
        let mut buf = BytesMut::new();
        buf.put_i32(17);

        match codec.decode(&mut buf) {
            Err(CodecError::FrameTooLarge { length, max }) => {
                assert_eq!(length, 17);
                assert_eq!(max, 16);
            }
            other => panic!("Expected FrameTooLarge, got: {other:?}"),
        }
    }

    #[test]
    fn test_negative_length_rejected() {
        let mut codec = FrameCodec::<EndpointSnapshot>::default();
        let mut buf = BytesMut::new();
        buf.put_i32(-4);

        assert!(matches!(
            codec.decode(&mut buf),
            Err(CodecError::FrameTooLarge { length: -4, .. })
        ));
    }

    #[test]
    fn test_malformed_body_rejected() {
        let mut codec = FrameCodec::<EndpointSnapshot>::default();
        let mut buf = BytesMut::new();
        buf.put_i32(3);
        buf.put_slice(b"{x}");

        assert!(matches!(codec.decode(&mut buf), Err(CodecError::Json(_))));
    }

    #[test]
    fn test_encode_respects_bound() {
        let mut codec = FrameCodec::<EndpointSnapshot>::new(8);
        let big = EndpointSnapshot::new(vec![Position::default(); 4]);

        let result = codec.encode(&big, &mut BytesMut::new());

        assert!(matches!(result, Err(CodecError::FrameTooLarge { .. })));
    }

    #[tokio::test]
    async fn test_stream_of_frames() {
        let (mut tx, rx) = tokio::io::duplex(1024);
        let first = EndpointSnapshot::new(vec![Position::new(0.0, 0.0, 0.0)]);
        let second = EndpointSnapshot::new(vec![Position::new(1.0, 0.0, 0.0), Position::new(2.0, 0.0, 0.0)]);

        tx.write_all(&encode_frame(&first).unwrap()).await.unwrap();
        tx.write_all(&encode_frame(&second).unwrap()).await.unwrap();
        drop(tx);

        let frames: Vec<EndpointSnapshot> = FramedRead::new(rx, FrameCodec::default())
            .map(|r| r.unwrap())
            .collect()
            .await;

        assert_eq!(frames, vec![first, second]);
    }

    #[tokio::test]
    async fn test_read_frame_one_shot() {
        let snapshot = EndpointSnapshot::new(vec![Position::new(4.0, 5.0, 6.0)]);
        let mut bytes = encode_frame(&snapshot).unwrap().to_vec();
        bytes.extend_from_slice(b"trailing");

        let mut reader = &bytes[..];
        let decoded: EndpointSnapshot = read_frame(&mut reader, DEFAULT_MAX_FRAME_LENGTH).await.unwrap();

        assert_eq!(decoded, snapshot);
        assert_eq!(reader, b"trailing");
    }

    #[tokio::test]
    async fn test_read_frame_short_read_is_error() {
        let frame = encode_frame(&EndpointSnapshot::default()).unwrap();
        let mut reader = &frame[..frame.len() - 1];

        let result: Result<EndpointSnapshot, _> = read_frame(&mut reader, DEFAULT_MAX_FRAME_LENGTH).await;

        match result {
            Err(CodecError::Io(e)) => assert_eq!(e.kind(), std::io::ErrorKind::UnexpectedEof),
            other => panic!("Expected UnexpectedEof, got: {other:?}"),
        }
    }
}
