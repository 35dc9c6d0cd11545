//! Pipe framing over a byte stream.
//!
//! [`FrameCodec`] is a `tokio_util` codec: the decoder yields raw frame
//! bytes (everything up to the next `|`, which may legally contain NULs the
//! dispatcher deals with), the encoder appends the terminator when the
//! caller did not. [`ZPipeWriter`] wraps batches of outbound frames into a
//! `$ZOn|` zlib block for clients that negotiated `ZPipe0`.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::Write;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ProtocolError;
use crate::PIPE;

/// Default cap for a single inbound frame. Individual commands carry their
/// own tighter caps; this one only bounds buffer growth.
pub const DEFAULT_MAX_FRAME_LEN: usize = 128 * 1024;

/// Codec for `|`-terminated frames.
#[derive(Debug)]
pub struct FrameCodec {
    max_frame_len: usize,
    /// Scan resume offset so partial reads are not rescanned.
    next_index: usize,
}

impl FrameCodec {
    pub fn new(max_frame_len: usize) -> FrameCodec {
        FrameCodec {
            max_frame_len,
            next_index: 0,
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LEN)
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, ProtocolError> {
        if let Some(pos) = src[self.next_index..].iter().position(|&b| b == PIPE) {
            let pos = self.next_index + pos;
            let frame = src.split_to(pos).freeze();
            src.advance(1);
            self.next_index = 0;

            if frame.len() > self.max_frame_len {
                return Err(ProtocolError::FrameTooLong {
                    actual: frame.len(),
                    limit: self.max_frame_len,
                });
            }

            return Ok(Some(frame));
        }

        if src.len() > self.max_frame_len {
            return Err(ProtocolError::FrameTooLong {
                actual: src.len(),
                limit: self.max_frame_len,
            });
        }

        self.next_index = src.len();
        Ok(None)
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        dst.reserve(item.len() + 1);
        dst.put_slice(&item);

        if item.last() != Some(&PIPE) {
            dst.put_u8(PIPE);
        }

        Ok(())
    }
}

impl Encoder<String> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        self.encode(Bytes::from(item), dst)
    }
}

impl<'a> Encoder<&'a str> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: &'a str, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        self.encode(Bytes::copy_from_slice(item.as_bytes()), dst)
    }
}

/// Batch compressor for the `ZPipe0` extension.
///
/// Callers feed complete terminated frames; [`ZPipeWriter::take`] wraps the
/// batch as `$ZOn|<zlib>` when compression is worth it, or returns the plain
/// bytes otherwise. Saved bytes are reported so the daemon can account for
/// them.
#[derive(Debug)]
pub struct ZPipeWriter {
    /// Batches smaller than this go out uncompressed.
    min_len: usize,
    buf: Vec<u8>,
}

/// Result of draining a [`ZPipeWriter`] batch.
#[derive(Debug, PartialEq, Eq)]
pub enum ZPipeBatch {
    /// Batch was below the threshold or grew under compression.
    Plain(Vec<u8>),
    /// Compressed batch and the number of bytes saved on the wire.
    Compressed {
        frame: Vec<u8>,
        saved: usize,
    },
}

impl ZPipeWriter {
    pub fn new(min_len: usize) -> ZPipeWriter {
        ZPipeWriter {
            min_len,
            buf: Vec::new(),
        }
    }

    /// Queue one terminated frame into the current batch.
    pub fn push(&mut self, frame: &[u8]) {
        self.buf.extend_from_slice(frame);

        if frame.last() != Some(&PIPE) {
            self.buf.push(PIPE);
        }
    }

    /// Bytes pending in the current batch.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Drain the batch, compressing when it pays off.
    pub fn take(&mut self) -> ZPipeBatch {
        let plain = std::mem::take(&mut self.buf);

        if plain.len() < self.min_len {
            return ZPipeBatch::Plain(plain);
        }

        let mut frame = b"$ZOn|".to_vec();
        let mut encoder = ZlibEncoder::new(&mut frame, Compression::default());

        if encoder.write_all(&plain).is_err() || encoder.finish().is_err() {
            return ZPipeBatch::Plain(plain);
        }

        if frame.len() >= plain.len() {
            // Compression made it bigger; send as-is.
            return ZPipeBatch::Plain(plain);
        }

        let saved = plain.len() - frame.len();
        ZPipeBatch::Compressed { frame, saved }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_splits_on_pipe() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::from(&b"$Key abc|$Supports NoHello|partial"[..]);

        let one = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&one[..], b"$Key abc");
        let two = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&two[..], b"$Supports NoHello");
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(&buf[..], b"partial");
    }

    #[test]
    fn decode_yields_heartbeat_frames() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::from(&b"||"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().len(), 0);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().len(), 0);
    }

    #[test]
    fn decode_enforces_max_len() {
        let mut codec = FrameCodec::new(8);
        let mut buf = BytesMut::from(&b"0123456789"[..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::FrameTooLong { .. })
        ));
    }

    #[test]
    fn decode_resumes_partial_scan() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::from(&b"$MyINFO $ALL ali"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"ce x$ $1\x01$$0$|");
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert!(frame.starts_with(b"$MyINFO"));
    }

    #[test]
    fn encode_appends_terminator_once() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::new();
        codec.encode("$Hello alice", &mut buf).unwrap();
        codec.encode("$HubName x|", &mut buf).unwrap();
        assert_eq!(&buf[..], b"$Hello alice|$HubName x|");
    }

    #[test]
    fn zpipe_small_batches_stay_plain() {
        let mut zp = ZPipeWriter::new(256);
        zp.push(b"$Hello alice");
        match zp.take() {
            ZPipeBatch::Plain(bytes) => assert_eq!(bytes, b"$Hello alice|".to_vec()),
            other => panic!("expected plain batch, got {:?}", other),
        }
        assert_eq!(zp.pending(), 0);
    }

    #[test]
    fn zpipe_compresses_large_batches() {
        let mut zp = ZPipeWriter::new(64);
        let frame = format!("$MyINFO $ALL u{} {}$ $1\u{1}$$0$", 1, "d".repeat(300));

        for _ in 0..4 {
            zp.push(frame.as_bytes());
        }

        let pending = zp.pending();
        match zp.take() {
            ZPipeBatch::Compressed { frame, saved } => {
                assert!(frame.starts_with(b"$ZOn|"));
                assert_eq!(saved, pending - frame.len());
            }
            other => panic!("expected compressed batch, got {:?}", other),
        }
    }
}
