//! LZ77 codec — sliding-window match search over runtime parameters.
//!
//! # On-disk layout
//!
//! ```text
//! original_size   u64 LE
//! tokens          flag 0x00: literal byte follows
//!                 flag 0x01: offset u16 BE, length u8
//! ```
//!
//! # Matching rules
//! For every position the encoder searches the previous `window_size`
//! bytes for the longest match against the lookahead; ties go to the
//! smallest offset (the nearest copy).  A match shorter than `min_match`
//! is emitted as a literal.  Match length is capped at
//! `min(lookahead, 255)`; a longer repeat is covered by consecutive match
//! tokens — nothing is truncated away.
//!
//! The decoder copies matches byte-by-byte, which is what makes
//! overlapping references (`offset < length`) produce the run-extension
//! behavior the encoder relies on.

use byteorder::{ByteOrder, LittleEndian};

use super::{Codec, CodecKind};
use crate::error::{Error, Result};

const SIZE_HEADER_LEN: usize = 8;
const FLAG_LITERAL: u8 = 0;
const FLAG_MATCH: u8 = 1;
/// Longest match one token can encode.
pub const MAX_MATCH_LEN: usize = 255;
/// Largest offset a token can encode (u16).
const MAX_OFFSET: usize = u16::MAX as usize;

// ── Parameters ───────────────────────────────────────────────────────────────

/// Window geometry, chosen by the orchestrator's optimization preset and
/// passed in as plain runtime values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lz77Params {
    pub window_size: usize,
    pub lookahead: usize,
    pub min_match: usize,
}

impl Lz77Params {
    /// Balanced default: 4 KiB window.
    pub const DEFAULT: Lz77Params =
        Lz77Params { window_size: 4096, lookahead: 16, min_match: 3 };
    /// Speed preset: small window, long minimum match.
    pub const SPEED: Lz77Params =
        Lz77Params { window_size: 1024, lookahead: 8, min_match: 4 };
    /// Size preset: large window, aggressive matching.
    pub const SIZE: Lz77Params =
        Lz77Params { window_size: 8192, lookahead: 32, min_match: 2 };

    pub fn validate(&self) -> Result<()> {
        if self.window_size == 0 || self.window_size > MAX_OFFSET {
            return Err(Error::invalid_config(format!(
                "lz77 window size {} out of range 1..={MAX_OFFSET}",
                self.window_size
            )));
        }
        if self.lookahead == 0 || self.min_match == 0 {
            return Err(Error::invalid_config("lz77 lookahead and min match must be nonzero"));
        }
        Ok(())
    }
}

impl Default for Lz77Params {
    fn default() -> Self {
        Self::DEFAULT
    }
}

// ── Streaming encoder ────────────────────────────────────────────────────────

/// Streaming compression context.  Keeps the last `window_size` bytes of
/// history so matches reach back across chunk boundaries; matches never
/// extend forward past the current chunk.
pub struct Lz77Encoder {
    params: Lz77Params,
    history: Vec<u8>,
    total_bytes: u64,
}

impl Lz77Encoder {
    pub fn new(params: Lz77Params) -> Self {
        Self { params, history: Vec::new(), total_bytes: 0 }
    }

    /// `original_size` header.
    pub fn stream_header(total_bytes: u64) -> [u8; SIZE_HEADER_LEN] {
        let mut out = [0u8; SIZE_HEADER_LEN];
        LittleEndian::write_u64(&mut out, total_bytes);
        out
    }

    pub fn compress_chunk(&mut self, input: &[u8], out: &mut Vec<u8>) {
        self.total_bytes += input.len() as u64;

        // Search space: retained history followed by the chunk itself.
        let mut data = Vec::with_capacity(self.history.len() + input.len());
        data.extend_from_slice(&self.history);
        data.extend_from_slice(input);

        let mut pos = self.history.len();
        while pos < data.len() {
            let max_len = self.params.lookahead.min(MAX_MATCH_LEN).min(data.len() - pos);
            let (best_offset, best_len) = find_match(&data, pos, self.params.window_size, max_len);
            if best_len >= self.params.min_match {
                out.push(FLAG_MATCH);
                out.extend_from_slice(&(best_offset as u16).to_be_bytes());
                out.push(best_len as u8);
                pos += best_len;
            } else {
                out.push(FLAG_LITERAL);
                out.push(data[pos]);
                pos += 1;
            }
        }

        // Retain the window tail for the next chunk.
        let keep = self.params.window_size.min(data.len());
        self.history = data.split_off(data.len() - keep);
    }

    #[inline]
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }
}

/// Longest match ending the tie-break at the smallest offset: offsets are
/// scanned nearest-first and only a strictly longer match replaces the
/// current best.
fn find_match(data: &[u8], pos: usize, window: usize, max_len: usize) -> (usize, usize) {
    let mut best_offset = 0usize;
    let mut best_len = 0usize;
    if max_len == 0 {
        return (0, 0);
    }
    let max_offset = window.min(pos);
    for offset in 1..=max_offset {
        let start = pos - offset;
        if data[start] != data[pos] {
            continue;
        }
        let mut len = 1usize;
        // Overlapping comparison: source may run into the lookahead itself.
        while len < max_len && data[start + len] == data[pos + len] {
            len += 1;
        }
        if len > best_len {
            best_offset = offset;
            best_len = len;
            if best_len == max_len {
                break;
            }
        }
    }
    (best_offset, best_len)
}

// ── Streaming decoder ────────────────────────────────────────────────────────

/// Streaming decompression context.  Keeps a full 64 KiB history window
/// (the largest offset a token can encode) so it never depends on the
/// encoder's parameters, and tolerates tokens split across chunk
/// boundaries.
pub struct Lz77Decoder {
    remaining: u64,
    produced: u64,
    history: Vec<u8>,
    pending: Vec<u8>,
}

impl Lz77Decoder {
    /// Parse the size header from the front of `input`; returns the decoder
    /// and the header length.
    pub fn from_stream(input: &[u8]) -> Result<(Self, usize)> {
        if input.len() < SIZE_HEADER_LEN {
            return Err(Error::corrupt("lz77 header too short"));
        }
        let remaining = LittleEndian::read_u64(&input[..SIZE_HEADER_LEN]);
        Ok((
            Self { remaining, produced: 0, history: Vec::new(), pending: Vec::new() },
            SIZE_HEADER_LEN,
        ))
    }

    #[inline]
    pub fn is_finished(&self) -> bool {
        self.remaining == 0
    }

    /// Decode one chunk of tokens, appending plaintext to `out`.
    pub fn decode_chunk(&mut self, input: &[u8], out: &mut Vec<u8>) -> Result<()> {
        let start = out.len();
        let mut pos = 0usize;

        loop {
            if self.pending.is_empty() {
                if pos == input.len() {
                    break;
                }
                self.pending.push(input[pos]);
                pos += 1;
            }
            let needed = match self.pending[0] {
                FLAG_LITERAL => 2,
                FLAG_MATCH => 4,
                _ => return Err(Error::corrupt("bad lz77 token flag")),
            };
            while self.pending.len() < needed && pos < input.len() {
                self.pending.push(input[pos]);
                pos += 1;
            }
            if self.pending.len() < needed {
                break; // token split across chunks; wait for more input
            }

            if self.remaining == 0 {
                return Err(Error::corrupt("lz77 stream has trailing tokens"));
            }

            if self.pending[0] == FLAG_LITERAL {
                out.push(self.pending[1]);
                self.produced += 1;
                self.remaining -= 1;
            } else {
                let offset = u16::from_be_bytes([self.pending[1], self.pending[2]]) as usize;
                let length = self.pending[3] as usize;
                if offset == 0 || offset as u64 > self.produced {
                    return Err(Error::corrupt("lz77 back-reference out of range"));
                }
                if length as u64 > self.remaining {
                    return Err(Error::corrupt("lz77 match overruns original size"));
                }
                // Byte-by-byte copy; overlapping references extend the
                // bytes this very loop appends.
                for _ in 0..length {
                    let avail = self.history.len() + (out.len() - start);
                    let src = avail - offset;
                    let byte = if src < self.history.len() {
                        self.history[src]
                    } else {
                        out[start + (src - self.history.len())]
                    };
                    out.push(byte);
                }
                self.produced += length as u64;
                self.remaining -= length as u64;
            }
            self.pending.clear();
        }

        // Fold this call's output into the retained history window.
        self.history.extend_from_slice(&out[start..]);
        if self.history.len() > MAX_OFFSET {
            let cut = self.history.len() - MAX_OFFSET;
            self.history.drain(..cut);
        }
        Ok(())
    }

    /// End of compressed input: anything still owed is corruption.
    pub fn finish(&self) -> Result<()> {
        if !self.pending.is_empty() {
            return Err(Error::corrupt("lz77 stream ends mid-token"));
        }
        if self.remaining > 0 {
            return Err(Error::corrupt("lz77 stream truncated"));
        }
        Ok(())
    }
}

// ── Whole-buffer codec ───────────────────────────────────────────────────────

/// Whole-buffer LZ77 codec; wraps the streaming contexts.
pub struct Lz77Codec {
    params: Lz77Params,
}

impl Lz77Codec {
    pub fn new(params: Lz77Params) -> Self {
        Self { params }
    }
}

impl Codec for Lz77Codec {
    fn kind(&self) -> CodecKind {
        CodecKind::Lz77
    }

    fn compress(&self, input: &[u8]) -> Result<Vec<u8>> {
        self.params.validate()?;
        let mut out = Lz77Encoder::stream_header(input.len() as u64).to_vec();
        let mut enc = Lz77Encoder::new(self.params);
        enc.compress_chunk(input, &mut out);
        Ok(out)
    }

    fn decompress(&self, input: &[u8]) -> Result<Vec<u8>> {
        let (mut dec, header_len) = Lz77Decoder::from_stream(input)?;
        let mut out = Vec::new();
        dec.decode_chunk(&input[header_len..], &mut out)?;
        dec.finish()?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> Lz77Codec {
        Lz77Codec::new(Lz77Params::DEFAULT)
    }

    /// Walk the token stream, asserting the emission invariants.
    fn check_token_bounds(packed: &[u8], params: Lz77Params) {
        let mut pos = SIZE_HEADER_LEN;
        let mut produced = 0usize;
        while pos < packed.len() {
            match packed[pos] {
                FLAG_LITERAL => {
                    produced += 1;
                    pos += 2;
                }
                FLAG_MATCH => {
                    let offset = u16::from_be_bytes([packed[pos + 1], packed[pos + 2]]) as usize;
                    let length = packed[pos + 3] as usize;
                    assert!(length >= params.min_match, "match below min_match");
                    assert!(offset > 0 && offset <= produced, "offset out of range");
                    assert!(offset <= params.window_size, "offset beyond window");
                    produced += length;
                    pos += 4;
                }
                other => panic!("bad flag {other}"),
            }
        }
    }

    #[test]
    fn empty_input() {
        let packed = codec().compress(b"").unwrap();
        assert_eq!(packed, vec![0u8; 8]);
        assert_eq!(codec().decompress(&packed).unwrap(), b"");
    }

    #[test]
    fn single_byte_is_one_literal() {
        let packed = codec().compress(b"q").unwrap();
        assert_eq!(&packed[8..], &[FLAG_LITERAL, b'q']);
        assert_eq!(codec().decompress(&packed).unwrap(), b"q");
    }

    #[test]
    fn overlapping_copy_roundtrips() {
        let data = b"aaaaaaaaaa";
        let packed = codec().compress(data).unwrap();
        // One literal then one overlapping match with offset 1.
        assert_eq!(
            &packed[8..],
            &[FLAG_LITERAL, b'a', FLAG_MATCH, 0x00, 0x01, 0x09]
        );
        assert_eq!(codec().decompress(&packed).unwrap(), data);
    }

    #[test]
    fn repeated_phrase_roundtrips_with_bounds() {
        let data: Vec<u8> = b"the rain in spain falls mainly on the plain. "
            .iter()
            .cycle()
            .take(4000)
            .copied()
            .collect();
        for params in [Lz77Params::SPEED, Lz77Params::DEFAULT, Lz77Params::SIZE] {
            let c = Lz77Codec::new(params);
            let packed = c.compress(&data).unwrap();
            check_token_bounds(&packed, params);
            assert_eq!(c.decompress(&packed).unwrap(), data);
        }
    }

    #[test]
    fn long_run_emits_consecutive_match_tokens() {
        // A run far beyond one token's 255-byte cap must still be fully
        // covered by follow-up tokens.
        let data = vec![b'x'; 2000];
        let c = Lz77Codec::new(Lz77Params { window_size: 4096, lookahead: 300, min_match: 3 });
        let packed = c.compress(&data).unwrap();
        let matches = packed[8..]
            .iter()
            .enumerate()
            .filter(|&(i, &b)| b == FLAG_MATCH && token_boundary(&packed[8..], i))
            .count();
        assert!(matches >= 2, "expected split match tokens, got {matches}");
        assert_eq!(c.decompress(&packed).unwrap(), data);
    }

    fn token_boundary(stream: &[u8], at: usize) -> bool {
        let mut pos = 0usize;
        while pos < stream.len() {
            if pos == at {
                return true;
            }
            pos += if stream[pos] == FLAG_MATCH { 4 } else { 2 };
        }
        false
    }

    #[test]
    fn bad_back_reference_is_corrupt() {
        let mut packed = Lz77Encoder::stream_header(5).to_vec();
        packed.extend_from_slice(&[FLAG_MATCH, 0x00, 0x03, 0x05]); // offset 3, nothing produced
        assert!(matches!(
            codec().decompress(&packed).unwrap_err(),
            Error::Corrupt { .. }
        ));
    }

    #[test]
    fn match_overrunning_size_is_corrupt() {
        let mut packed = Lz77Encoder::stream_header(3).to_vec();
        packed.extend_from_slice(&[FLAG_LITERAL, b'a']);
        packed.extend_from_slice(&[FLAG_MATCH, 0x00, 0x01, 0x09]); // 9 > 2 remaining
        assert!(matches!(
            codec().decompress(&packed).unwrap_err(),
            Error::Corrupt { .. }
        ));
    }

    #[test]
    fn truncated_stream_is_corrupt() {
        let data = b"abcabcabcabcabc";
        let packed = codec().compress(data).unwrap();
        assert!(matches!(
            codec().decompress(&packed[..packed.len() - 1]).unwrap_err(),
            Error::Corrupt { .. }
        ));
    }

    #[test]
    fn chunked_encoding_reaches_into_previous_chunk() {
        let data: Vec<u8> = b"windowed history, windowed history, windowed history"
            .iter()
            .cycle()
            .take(1024)
            .copied()
            .collect();

        let mut streamed = Lz77Encoder::stream_header(data.len() as u64).to_vec();
        let mut enc = Lz77Encoder::new(Lz77Params::DEFAULT);
        for chunk in data.chunks(100) {
            enc.compress_chunk(chunk, &mut streamed);
        }

        // Chunked output tokenizes differently but must decode identically.
        assert_eq!(codec().decompress(&streamed).unwrap(), data);

        // And the streaming decoder agrees even when fed byte by byte.
        let (mut dec, header_len) = Lz77Decoder::from_stream(&streamed).unwrap();
        let mut out = Vec::new();
        for b in &streamed[header_len..] {
            dec.decode_chunk(std::slice::from_ref(b), &mut out).unwrap();
        }
        dec.finish().unwrap();
        assert_eq!(out, data);
    }
}
