//! Streaming zlib inflation for the gateway's `zlib-stream` transport.
//!
//! The gateway compresses the whole connection with a single deflate
//! context. A logical frame may span several websocket messages; the frame
//! is complete once the payload ends with the zlib flush suffix
//! `00 00 FF FF`, at which point the accumulated bytes inflate to one JSON
//! document.

use flate2::{Decompress, FlushDecompress, Status};

use crate::{Error, Result};

/// Suffix terminating a complete zlib-stream frame.
pub const FRAME_SUFFIX: [u8; 4] = [0x00, 0x00, 0xFF, 0xFF];

/// Per-connection streaming inflator.
///
/// Must be reset on every fresh (non-resume) handshake, since the deflate
/// context is scoped to a gateway connection.
pub struct StreamInflator {
    ctx: Decompress,
    pending: Vec<u8>,
}

impl StreamInflator {
    pub fn new() -> Self {
        StreamInflator {
            ctx: Decompress::new(true),
            pending: Vec::new(),
        }
    }

    /// Forget the deflate context and any partial frame.
    pub fn reset(&mut self) {
        self.ctx.reset(true);
        self.pending.clear();
    }

    /// Feed one websocket message worth of compressed bytes.
    ///
    /// Returns `Ok(Some(bytes))` with the inflated frame when the suffix
    /// completes it, `Ok(None)` when more chunks are needed.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Option<Vec<u8>>> {
        self.pending.extend_from_slice(chunk);
        if self.pending.len() < 4 || self.pending[self.pending.len() - 4..] != FRAME_SUFFIX {
            return Ok(None);
        }

        let mut out = Vec::with_capacity(self.pending.len() * 4);
        let mut buf = [0u8; 16 * 1024];
        let mut consumed = 0usize;
        while consumed < self.pending.len() {
            let before_in = self.ctx.total_in();
            let before_out = self.ctx.total_out();
            let status = self
                .ctx
                .decompress(&self.pending[consumed..], &mut buf, FlushDecompress::Sync)
                .map_err(|_| Error::Protocol("corrupt zlib-stream frame"))?;
            consumed += (self.ctx.total_in() - before_in) as usize;
            out.extend_from_slice(&buf[..(self.ctx.total_out() - before_out) as usize]);
            match status {
                Status::Ok | Status::BufError => {
                    if self.ctx.total_in() == before_in && self.ctx.total_out() == before_out {
                        break;
                    }
                }
                Status::StreamEnd => break,
            }
        }
        self.pending.clear();
        Ok(Some(out))
    }
}

impl Default for StreamInflator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use flate2::{Compress, Compression, FlushCompress};

    use super::*;

    fn deflate_chunk(ctx: &mut Compress, data: &[u8]) -> Vec<u8> {
        let mut out = vec![0u8; data.len() + 64];
        let before = ctx.total_out();
        ctx.compress(data, &mut out, FlushCompress::Sync).unwrap();
        out.truncate((ctx.total_out() - before) as usize);
        out
    }

    #[test]
    fn inflates_suffix_terminated_frames() {
        let mut deflate = Compress::new(Compression::default(), true);
        let mut inflate = StreamInflator::new();

        for payload in [&br#"{"op":10}"#[..], &br#"{"op":0,"t":"READY"}"#[..]] {
            let compressed = deflate_chunk(&mut deflate, payload);
            assert!(compressed.ends_with(&FRAME_SUFFIX));
            let frame = inflate.push(&compressed).unwrap().expect("complete frame");
            assert_eq!(frame, payload);
        }
    }

    #[test]
    fn buffers_partial_frames() {
        let mut deflate = Compress::new(Compression::default(), true);
        let mut inflate = StreamInflator::new();

        let compressed = deflate_chunk(&mut deflate, br#"{"op":11}"#);
        let (a, b) = compressed.split_at(compressed.len() / 2);
        assert!(inflate.push(a).unwrap().is_none());
        let frame = inflate.push(b).unwrap().expect("complete frame");
        assert_eq!(frame, br#"{"op":11}"#);
    }

    #[test]
    fn reset_discards_partial_input() {
        let mut deflate = Compress::new(Compression::default(), true);
        let mut inflate = StreamInflator::new();

        let compressed = deflate_chunk(&mut deflate, br#"{"op":1,"d":42}"#);
        assert!(inflate.push(&compressed[..3]).unwrap().is_none());
        inflate.reset();

        // a fresh deflate context after reset inflates cleanly
        let mut deflate = Compress::new(Compression::default(), true);
        let compressed = deflate_chunk(&mut deflate, br#"{"op":1,"d":43}"#);
        let frame = inflate.push(&compressed).unwrap().expect("complete frame");
        assert_eq!(frame, br#"{"op":1,"d":43}"#);
    }
}
