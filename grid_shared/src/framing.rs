//! Delimiter framing over a byte stream.
//!
//! A frame is a payload followed by [`DELIMITER`]. TCP gives no message
//! boundaries, so receivers keep a per-connection [`FrameBuffer`]: every
//! received chunk is appended and each complete prefix is split off. Several
//! frames can arrive in one chunk and one frame can span several chunks.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::warn;

use crate::error::SyncError;

/// Frame terminator. Never produced by a well-formed JSON array payload.
pub const DELIMITER: u8 = b'|';

/// Default receive chunk size.
pub const DEFAULT_RECV_BUFFER: usize = 2048;

/// Default upper bound on an undelimited tail.
pub const DEFAULT_MAX_FRAME_LEN: usize = 64 * 1024;

/// Appends the delimiter so the frame can be written in one call.
pub fn frame(payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(payload.len() + 1);
    buf.extend_from_slice(payload);
    buf.put_u8(DELIMITER);
    buf.freeze()
}

/// Per-connection reassembly buffer.
#[derive(Debug)]
pub struct FrameBuffer {
    buf: BytesMut,
    max_frame_len: usize,
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LEN)
    }
}

impl FrameBuffer {
    pub fn new(max_frame_len: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            max_frame_len,
        }
    }

    /// Appends a received chunk.
    ///
    /// If the data after the last delimiter grows past `max_frame_len` that
    /// tail can never become a valid frame and is discarded. Returns the
    /// number of discarded bytes.
    pub fn push(&mut self, chunk: &[u8]) -> usize {
        self.buf.extend_from_slice(chunk);

        let tail_start = self
            .buf
            .iter()
            .rposition(|b| *b == DELIMITER)
            .map_or(0, |i| i + 1);
        let tail_len = self.buf.len() - tail_start;
        if tail_len > self.max_frame_len {
            self.buf.truncate(tail_start);
            return tail_len;
        }
        0
    }

    /// Splits off the next complete payload, skipping empty segments.
    pub fn next_frame(&mut self) -> Option<Bytes> {
        loop {
            let pos = self.buf.iter().position(|b| *b == DELIMITER)?;
            let payload = self.buf.split_to(pos).freeze();
            self.buf.advance(1);
            if !payload.is_empty() {
                return Some(payload);
            }
        }
    }

    /// Drains every complete payload currently buffered.
    pub fn drain_frames(&mut self) -> Vec<Bytes> {
        std::iter::from_fn(|| self.next_frame()).collect()
    }

    /// Bytes of an incomplete frame waiting for more data.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

/// Reads frames from an async byte stream.
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
    chunk: Vec<u8>,
    frames: FrameBuffer,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R, recv_buffer_size: usize, max_frame_len: usize) -> Self {
        Self {
            inner,
            chunk: vec![0u8; recv_buffer_size.max(1)],
            frames: FrameBuffer::new(max_frame_len),
        }
    }

    /// Performs one receive and returns every frame it completed.
    ///
    /// The result may be empty when the chunk only carried part of a frame.
    /// A clean close by the peer is reported as [`SyncError::Closed`].
    /// Cancel safe: a cancelled call loses no buffered data.
    pub async fn read_frames(&mut self) -> Result<Vec<Bytes>, SyncError> {
        let n = self.inner.read(&mut self.chunk).await?;
        if n == 0 {
            return Err(SyncError::Closed);
        }
        let dropped = self.frames.push(&self.chunk[..n]);
        if dropped > 0 {
            warn!(dropped, "Discarded oversized undelimited data");
        }
        Ok(self.frames.drain_frames())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn stream_of(payloads: &[&[u8]]) -> Vec<u8> {
        payloads.iter().flat_map(|p| frame(p).to_vec()).collect()
    }

    #[test]
    fn batched_frames_in_one_chunk() {
        let mut fb = FrameBuffer::default();
        fb.push(b"[1,2,\"up\"]|[3,4,\"down\"]|[]|");
        assert_eq!(
            fb.drain_frames(),
            vec![
                Bytes::from_static(b"[1,2,\"up\"]"),
                Bytes::from_static(b"[3,4,\"down\"]"),
                Bytes::from_static(b"[]"),
            ]
        );
        assert_eq!(fb.pending(), 0);
    }

    #[test]
    fn frame_split_across_two_chunks() {
        let mut fb = FrameBuffer::default();
        fb.push(b"[0,5,5,");
        assert_eq!(fb.next_frame(), None);
        assert_eq!(fb.pending(), 7);
        fb.push(b"\"up\"]|[1,");
        assert_eq!(fb.drain_frames(), vec![Bytes::from_static(b"[0,5,5,\"up\"]")]);
        fb.push(b"0,0,\"down\"]|");
        assert_eq!(fb.drain_frames(), vec![Bytes::from_static(b"[1,0,0,\"down\"]")]);
    }

    #[test]
    fn empty_segments_are_skipped() {
        let mut fb = FrameBuffer::default();
        fb.push(b"||[]||");
        assert_eq!(fb.drain_frames(), vec![Bytes::from_static(b"[]")]);
    }

    #[test]
    fn oversized_tail_is_discarded() {
        let mut fb = FrameBuffer::new(8);
        assert_eq!(fb.push(b"[1,2,\"up\"]|0123456789"), 10);
        assert_eq!(fb.drain_frames(), vec![Bytes::from_static(b"[1,2,\"up\"]")]);
        fb.push(b"[]|");
        assert_eq!(fb.drain_frames(), vec![Bytes::from_static(b"[]")]);
    }

    #[test]
    fn arbitrary_chunking_preserves_frames() {
        let payloads: Vec<Vec<u8>> = (0..40)
            .map(|i| format!("[{i},{},{},\"left\"]", i * 2, i * 3).into_bytes())
            .collect();
        let refs: Vec<&[u8]> = payloads.iter().map(Vec::as_slice).collect();
        let wire = stream_of(&refs);

        let mut rng = StdRng::seed_from_u64(0x5eed);
        for _ in 0..50 {
            let mut fb = FrameBuffer::default();
            let mut out = Vec::new();
            let mut rest = &wire[..];
            while !rest.is_empty() {
                let n = rng.gen_range(1..=rest.len().min(17));
                let (chunk, tail) = rest.split_at(n);
                fb.push(chunk);
                out.extend(fb.drain_frames());
                rest = tail;
            }
            let got: Vec<&[u8]> = out.iter().map(|b| &b[..]).collect();
            assert_eq!(got, refs);
            assert_eq!(fb.pending(), 0);
        }
    }

    #[tokio::test]
    async fn reader_reports_close() {
        let (mut client, server) = tokio::io::duplex(64);
        let mut reader = FrameReader::new(server, 4, DEFAULT_MAX_FRAME_LEN);

        tokio::io::AsyncWriteExt::write_all(&mut client, b"[7,1,1,\"up\"]|")
            .await
            .unwrap();
        drop(client);

        let mut frames = Vec::new();
        loop {
            match reader.read_frames().await {
                Ok(batch) => frames.extend(batch),
                Err(SyncError::Closed) => break,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(frames, vec![Bytes::from_static(b"[7,1,1,\"up\"]")]);
    }
}
