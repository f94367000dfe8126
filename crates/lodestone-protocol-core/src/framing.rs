use crate::buffer::varint_len;
use bytes::{Buf, BufMut, BytesMut};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Read as _, Write as _};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame of {len} bytes exceeds the {max} byte cap")]
    FrameTooLarge { len: usize, max: usize },
    #[error("malformed length prefix")]
    BadLengthPrefix,
    #[error("bad compressed frame: {0}")]
    BadCompression(String),
}

/// Splits the raw byte stream into length-prefixed frames and joins
/// outgoing payloads back into it.
///
/// Feed-then-pull: `feed` appends raw bytes, `next_frame` yields one
/// complete frame or `None` while data is still partial. Never blocks.
/// When a compression threshold is set (negotiated during login), frame
/// payloads carry a leading data-length varint and bodies at or above the
/// threshold are zlib-deflated.
pub struct LengthFramer {
    incoming: BytesMut,
    compression_threshold: Option<i32>,
}

impl LengthFramer {
    pub fn new() -> Self {
        Self {
            incoming: BytesMut::with_capacity(4096),
            compression_threshold: None,
        }
    }

    pub fn enable_compression(&mut self, threshold: i32) {
        self.compression_threshold = Some(threshold);
    }

    pub fn feed(&mut self, data: &[u8]) {
        self.incoming.extend_from_slice(data);
    }

    /// Bytes buffered but not yet assembled into a frame.
    pub fn buffered(&self) -> usize {
        self.incoming.len()
    }

    /// Try to assemble the next frame. `max_len` is the cap for the current
    /// protocol state; exceeding it is fatal. Zero-length frames are legal.
    pub fn next_frame(&mut self, max_len: usize) -> Result<Option<BytesMut>, FrameError> {
        let (length, prefix_bytes) = match peek_varint(&self.incoming) {
            Some(Ok((length, prefix_bytes))) => (length, prefix_bytes),
            Some(Err(())) => return Err(FrameError::BadLengthPrefix),
            None => return Ok(None),
        };
        if length < 0 {
            return Err(FrameError::BadLengthPrefix);
        }
        let length = length as usize;
        if length > max_len {
            return Err(FrameError::FrameTooLarge {
                len: length,
                max: max_len,
            });
        }
        if self.incoming.len() - prefix_bytes < length {
            return Ok(None);
        }

        self.incoming.advance(prefix_bytes);
        let mut frame = self.incoming.split_to(length);

        if self.compression_threshold.is_some() && !frame.is_empty() {
            frame = inflate_frame(frame, max_len)?;
        }
        Ok(Some(frame))
    }

    /// Prepend the length prefix (and compression header, if negotiated) to
    /// an outgoing payload.
    pub fn encode_frame(&self, payload: &[u8]) -> BytesMut {
        let mut frame = BytesMut::with_capacity(payload.len() + 6);
        match self.compression_threshold {
            Some(threshold) if payload.len() as i32 >= threshold => {
                let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
                let _ = encoder.write_all(payload);
                let compressed = encoder.finish().unwrap_or_default();

                let data_length = payload.len() as i32;
                put_varint(&mut frame, (varint_len(data_length) + compressed.len()) as i32);
                put_varint(&mut frame, data_length);
                frame.extend_from_slice(&compressed);
            }
            Some(_) => {
                put_varint(&mut frame, (1 + payload.len()) as i32);
                put_varint(&mut frame, 0);
                frame.extend_from_slice(payload);
            }
            None => {
                put_varint(&mut frame, payload.len() as i32);
                frame.extend_from_slice(payload);
            }
        }
        frame
    }
}

impl Default for LengthFramer {
    fn default() -> Self {
        Self::new()
    }
}

fn inflate_frame(mut frame: BytesMut, max_len: usize) -> Result<BytesMut, FrameError> {
    let (data_length, prefix_bytes) = match peek_varint(&frame) {
        Some(Ok(parsed)) => parsed,
        _ => return Err(FrameError::BadCompression("missing data length".into())),
    };
    frame.advance(prefix_bytes);
    if data_length == 0 {
        // Below-threshold payload, sent uncompressed.
        return Ok(frame);
    }
    if data_length < 0 || data_length as usize > max_len {
        return Err(FrameError::FrameTooLarge {
            len: data_length.max(0) as usize,
            max: max_len,
        });
    }
    let mut decompressed = vec![0u8; data_length as usize];
    let mut decoder = ZlibDecoder::new(&frame[..]);
    decoder
        .read_exact(&mut decompressed)
        .map_err(|e| FrameError::BadCompression(e.to_string()))?;
    Ok(BytesMut::from(&decompressed[..]))
}

/// Read a varint off the front of `buf` without consuming it. Returns
/// `None` while incomplete, `Some(Err(()))` when over five bytes.
fn peek_varint(buf: &[u8]) -> Option<Result<(i32, usize), ()>> {
    let mut result: i32 = 0;
    let mut shift: u32 = 0;
    for (index, byte) in buf.iter().enumerate() {
        result |= ((byte & 0x7F) as i32) << shift;
        if byte & 0x80 == 0 {
            return Some(Ok((result, index + 1)));
        }
        shift += 7;
        if shift >= 32 {
            return Some(Err(()));
        }
    }
    None
}

fn put_varint(buf: &mut BytesMut, mut value: i32) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value = ((value as u32) >> 7) as i32;
        if value != 0 {
            byte |= 0x80;
        }
        buf.put_u8(byte);
        if value == 0 {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX: usize = 1 << 21;

    #[test]
    fn test_single_frame() {
        let mut framer = LengthFramer::new();
        framer.feed(&[0x03, 0x00, 0x01, 0x02]);
        let frame = framer.next_frame(MAX).unwrap().unwrap();
        assert_eq!(&frame[..], &[0x00, 0x01, 0x02]);
        assert!(framer.next_frame(MAX).unwrap().is_none());
    }

    #[test]
    fn test_chunk_boundary_independence() {
        // One frame delivered whole must equal the same frame delivered
        // byte by byte, regardless of where the splits fall.
        let payload: Vec<u8> = (0u8..200).collect();
        let mut encoded = LengthFramer::new().encode_frame(&payload).to_vec();
        encoded.extend_from_slice(&LengthFramer::new().encode_frame(&[0xAA]));

        for split in 0..encoded.len() {
            let mut framer = LengthFramer::new();
            framer.feed(&encoded[..split]);
            let mut frames = Vec::new();
            while let Some(frame) = framer.next_frame(MAX).unwrap() {
                frames.push(frame);
            }
            framer.feed(&encoded[split..]);
            while let Some(frame) = framer.next_frame(MAX).unwrap() {
                frames.push(frame);
            }
            assert_eq!(frames.len(), 2, "split at {}", split);
            assert_eq!(&frames[0][..], &payload[..]);
            assert_eq!(&frames[1][..], &[0xAA]);
        }
    }

    #[test]
    fn test_incomplete_returns_none() {
        let mut framer = LengthFramer::new();
        framer.feed(&[0x05, 0x01, 0x02]);
        assert!(framer.next_frame(MAX).unwrap().is_none());
        framer.feed(&[0x03, 0x04]);
        assert!(framer.next_frame(MAX).unwrap().is_none());
        framer.feed(&[0x05]);
        let frame = framer.next_frame(MAX).unwrap().unwrap();
        assert_eq!(&frame[..], &[0x01, 0x02, 0x03, 0x04, 0x05]);
    }

    #[test]
    fn test_zero_length_frame() {
        let mut framer = LengthFramer::new();
        framer.feed(&[0x00, 0x01, 0x07]);
        let frame = framer.next_frame(MAX).unwrap().unwrap();
        assert!(frame.is_empty());
        let frame = framer.next_frame(MAX).unwrap().unwrap();
        assert_eq!(&frame[..], &[0x07]);
    }

    #[test]
    fn test_frame_too_large() {
        let mut framer = LengthFramer::new();
        // length = 300 as varint
        framer.feed(&[0xAC, 0x02]);
        match framer.next_frame(256) {
            Err(FrameError::FrameTooLarge { len: 300, max: 256 }) => {}
            other => panic!("expected FrameTooLarge, got {:?}", other),
        }
    }

    #[test]
    fn test_bogus_length_prefix() {
        let mut framer = LengthFramer::new();
        framer.feed(&[0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
        assert!(matches!(
            framer.next_frame(MAX),
            Err(FrameError::BadLengthPrefix)
        ));
    }

    #[test]
    fn test_compression_roundtrip() {
        let mut sender = LengthFramer::new();
        sender.enable_compression(64);
        let mut receiver = LengthFramer::new();
        receiver.enable_compression(64);

        // Above threshold: compressed on the wire.
        let big: Vec<u8> = std::iter::repeat(0x42).take(512).collect();
        let encoded = sender.encode_frame(&big);
        assert!(encoded.len() < big.len());
        receiver.feed(&encoded);
        let frame = receiver.next_frame(MAX).unwrap().unwrap();
        assert_eq!(&frame[..], &big[..]);

        // Below threshold: data length 0, sent verbatim.
        let small = [0x01, 0x02, 0x03];
        let encoded = sender.encode_frame(&small);
        receiver.feed(&encoded);
        let frame = receiver.next_frame(MAX).unwrap().unwrap();
        assert_eq!(&frame[..], &small[..]);
    }
}
