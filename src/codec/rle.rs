//! Run-length codec.
//!
//! # On-disk layout
//!
//! ```text
//! original_size   u64 LE
//! runs            (count: u8 in 1..=255, value: u8)*
//! ```
//!
//! A run longer than 255 bytes is split into consecutive runs of 255.  The
//! decoder emits pairs until exactly `original_size` bytes have been
//! produced; a stream that ends early, carries a zero count, or carries a
//! dangling half-pair is `Corrupt`.
//!
//! The streaming encoder merges runs across chunk boundaries (the open run
//! rides in the context until `finalize`), so chunked output is
//! byte-identical to the whole-buffer output.

use byteorder::{ByteOrder, LittleEndian};

use super::{Codec, CodecKind};
use crate::error::{Error, Result};

const MAX_RUN: u64 = 255;
const SIZE_HEADER_LEN: usize = 8;

// ── Streaming encoder ────────────────────────────────────────────────────────

/// Streaming compression context; carries the open run between chunks.
#[derive(Debug, Default)]
pub struct RleEncoder {
    run: Option<(u8, u64)>, // (value, length so far)
    total_bytes: u64,
}

impl RleEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// `original_size` header.  Callable before or after the data passes —
    /// the caller supplies the total when it is known up front.
    pub fn stream_header(total_bytes: u64) -> [u8; SIZE_HEADER_LEN] {
        let mut out = [0u8; SIZE_HEADER_LEN];
        LittleEndian::write_u64(&mut out, total_bytes);
        out
    }

    pub fn compress_chunk(&mut self, input: &[u8], out: &mut Vec<u8>) {
        self.total_bytes += input.len() as u64;
        for &b in input {
            match &mut self.run {
                Some((value, len)) if *value == b => *len += 1,
                Some((value, len)) => {
                    emit_run(*value, *len, out);
                    *value = b;
                    *len = 1;
                }
                None => self.run = Some((b, 1)),
            }
        }
    }

    /// Flush the open run.
    pub fn finalize(&mut self, out: &mut Vec<u8>) {
        if let Some((value, len)) = self.run.take() {
            emit_run(value, len, out);
        }
    }

    #[inline]
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }
}

fn emit_run(value: u8, mut len: u64, out: &mut Vec<u8>) {
    while len > 0 {
        let count = len.min(MAX_RUN) as u8;
        out.push(count);
        out.push(value);
        len -= count as u64;
    }
}

// ── Streaming decoder ────────────────────────────────────────────────────────

/// Streaming decompression context; tracks how much of `original_size`
/// remains and tolerates pairs split across chunk boundaries.
#[derive(Debug)]
pub struct RleDecoder {
    remaining: u64,
    pending_count: Option<u8>,
}

impl RleDecoder {
    /// Parse the size header from the front of `input`; returns the decoder
    /// and the header length.
    pub fn from_stream(input: &[u8]) -> Result<(Self, usize)> {
        if input.len() < SIZE_HEADER_LEN {
            return Err(Error::corrupt("rle header too short"));
        }
        let remaining = LittleEndian::read_u64(&input[..SIZE_HEADER_LEN]);
        Ok((Self { remaining, pending_count: None }, SIZE_HEADER_LEN))
    }

    #[inline]
    pub fn is_finished(&self) -> bool {
        self.remaining == 0
    }

    /// Decode one chunk of compressed pairs into `out`.
    pub fn decode_chunk(&mut self, input: &[u8], out: &mut Vec<u8>) -> Result<()> {
        let mut pos = 0usize;
        while pos < input.len() {
            if self.remaining == 0 {
                return Err(Error::corrupt("rle stream has trailing data"));
            }
            let count = match self.pending_count.take() {
                Some(c) => c,
                None => {
                    let c = input[pos];
                    pos += 1;
                    c
                }
            };
            if count == 0 {
                return Err(Error::corrupt("rle run of length zero"));
            }
            if pos == input.len() {
                // Pair split across the chunk boundary.
                self.pending_count = Some(count);
                return Ok(());
            }
            let value = input[pos];
            pos += 1;
            if count as u64 > self.remaining {
                return Err(Error::corrupt("rle runs exceed original size"));
            }
            out.extend(std::iter::repeat(value).take(count as usize));
            self.remaining -= count as u64;
        }
        Ok(())
    }

    /// End of compressed input: anything still owed is corruption.
    pub fn finish(&self) -> Result<()> {
        if self.pending_count.is_some() {
            return Err(Error::corrupt("rle stream ends mid-pair"));
        }
        if self.remaining > 0 {
            return Err(Error::corrupt("rle stream truncated"));
        }
        Ok(())
    }
}

// ── Whole-buffer codec ───────────────────────────────────────────────────────

/// Whole-buffer RLE codec; wraps the streaming contexts.
pub struct RleCodec;

impl Codec for RleCodec {
    fn kind(&self) -> CodecKind {
        CodecKind::Rle
    }

    fn compress(&self, input: &[u8]) -> Result<Vec<u8>> {
        let mut out = RleEncoder::stream_header(input.len() as u64).to_vec();
        let mut enc = RleEncoder::new();
        enc.compress_chunk(input, &mut out);
        enc.finalize(&mut out);
        Ok(out)
    }

    fn decompress(&self, input: &[u8]) -> Result<Vec<u8>> {
        let (mut dec, header_len) = RleDecoder::from_stream(input)?;
        let mut out = Vec::new();
        dec.decode_chunk(&input[header_len..], &mut out)?;
        dec.finish()?;
        Ok(out)
    }
}
