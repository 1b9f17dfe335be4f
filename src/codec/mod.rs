//! Codec registry — the three primitive codecs plus the algorithm table
//! the CLI and the file extensions are numbered by.
//!
//! # Identity rules
//! An [`Algorithm`] index is what `-c`/`-d` accept, what the progressive
//! header's `algorithm` byte stores, and what picks the default file
//! extension.  Indices are frozen:
//!
//! | Index | Algorithm            | Extension |
//! |-------|----------------------|-----------|
//! | 0     | Huffman              | `.huf`    |
//! | 1     | RLE                  | `.rle`    |
//! | 2     | Huffman, parallel    | `.hufp`   |
//! | 3     | RLE, parallel        | `.rlep`   |
//! | 4     | LZ77                 | `.lz77`   |
//! | 5     | LZ77, parallel       | `.lz77p`  |
//! | 6     | LZ77 + encryption    | `.lz77e`  |
//! | 7     | Progressive (Huffman)| `.prog`   |
//!
//! A [`CodecKind`] is the primitive actually transforming bytes; the
//! parallel/encrypted/progressive wrappers around it are the pipeline's
//! business.

pub mod huffman;
pub mod lz77;
pub mod rle;

use std::path::Path;

use crate::config::Tuning;
use crate::error::Result;

pub use huffman::HuffmanCodec;
pub use lz77::{Lz77Codec, Lz77Params};
pub use rle::RleCodec;

// ── Primitive codecs ─────────────────────────────────────────────────────────

/// The three byte-transforming algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecKind {
    Huffman,
    Rle,
    Lz77,
}

impl CodecKind {
    pub fn name(self) -> &'static str {
        match self {
            CodecKind::Huffman => "huffman",
            CodecKind::Rle => "rle",
            CodecKind::Lz77 => "lz77",
        }
    }
}

/// A primitive codec: whole-buffer operations plus file convenience
/// wrappers.  Implementations also expose streaming contexts in their own
/// modules; the buffer interface here is the single-chunk special case and
/// produces identical bytes.
pub trait Codec: Send + Sync {
    fn kind(&self) -> CodecKind;

    fn compress(&self, input: &[u8]) -> Result<Vec<u8>>;
    fn decompress(&self, input: &[u8]) -> Result<Vec<u8>>;

    /// Whole-file compression through the buffer interface.
    fn compress_file(&self, input: &Path, output: &Path) -> Result<()> {
        let data = crate::read_file(input)?;
        let packed = self.compress(&data)?;
        crate::write_file(output, &packed)
    }

    /// Whole-file decompression through the buffer interface.
    fn decompress_file(&self, input: &Path, output: &Path) -> Result<()> {
        let data = crate::read_file(input)?;
        let plain = self.decompress(&data)?;
        crate::write_file(output, &plain)
    }
}

/// Resolve a primitive codec configured by `tuning` (LZ77 window geometry,
/// Huffman depth cap).
pub fn get_codec(kind: CodecKind, tuning: &Tuning) -> Box<dyn Codec> {
    match kind {
        CodecKind::Huffman => Box::new(HuffmanCodec::new(tuning.huffman_depth_limit)),
        CodecKind::Rle => Box::new(RleCodec),
        CodecKind::Lz77 => Box::new(Lz77Codec::new(tuning.lz77)),
    }
}

// ── Algorithm table ──────────────────────────────────────────────────────────

/// CLI-visible algorithm index (0..7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Algorithm {
    Huffman = 0,
    Rle = 1,
    HuffmanParallel = 2,
    RleParallel = 3,
    Lz77 = 4,
    Lz77Parallel = 5,
    Lz77Encrypted = 6,
    Progressive = 7,
}

/// Every algorithm, in index order.  What `-a` prints.
pub const ALGORITHMS: [Algorithm; 8] = [
    Algorithm::Huffman,
    Algorithm::Rle,
    Algorithm::HuffmanParallel,
    Algorithm::RleParallel,
    Algorithm::Lz77,
    Algorithm::Lz77Parallel,
    Algorithm::Lz77Encrypted,
    Algorithm::Progressive,
];

impl Algorithm {
    pub fn from_index(idx: u8) -> Option<Self> {
        ALGORITHMS.get(idx as usize).copied()
    }

    #[inline]
    pub fn index(self) -> u8 {
        self as u8
    }

    /// The primitive codec this algorithm runs.
    pub fn primitive(self) -> CodecKind {
        match self {
            Algorithm::Huffman | Algorithm::HuffmanParallel | Algorithm::Progressive => {
                CodecKind::Huffman
            }
            Algorithm::Rle | Algorithm::RleParallel => CodecKind::Rle,
            Algorithm::Lz77 | Algorithm::Lz77Parallel | Algorithm::Lz77Encrypted => {
                CodecKind::Lz77
            }
        }
    }

    #[inline]
    pub fn is_parallel(self) -> bool {
        matches!(
            self,
            Algorithm::HuffmanParallel | Algorithm::RleParallel | Algorithm::Lz77Parallel
        )
    }

    #[inline]
    pub fn is_encrypted(self) -> bool {
        matches!(self, Algorithm::Lz77Encrypted)
    }

    #[inline]
    pub fn is_progressive(self) -> bool {
        matches!(self, Algorithm::Progressive)
    }

    /// Default output extension (without the dot).
    pub fn extension(self) -> &'static str {
        match self {
            Algorithm::Huffman => "huf",
            Algorithm::Rle => "rle",
            Algorithm::HuffmanParallel => "hufp",
            Algorithm::RleParallel => "rlep",
            Algorithm::Lz77 => "lz77",
            Algorithm::Lz77Parallel => "lz77p",
            Algorithm::Lz77Encrypted => "lz77e",
            Algorithm::Progressive => "prog",
        }
    }

    /// Inverse of [`Algorithm::extension`], for decompression sniffing.
    pub fn from_extension(ext: &str) -> Option<Self> {
        ALGORITHMS.iter().copied().find(|a| a.extension() == ext)
    }

    /// Human-readable description for the `-a` listing.
    pub fn describe(self) -> &'static str {
        match self {
            Algorithm::Huffman => "Huffman coding",
            Algorithm::Rle => "Run-length encoding",
            Algorithm::HuffmanParallel => "Huffman coding, multi-threaded",
            Algorithm::RleParallel => "Run-length encoding, multi-threaded",
            Algorithm::Lz77 => "LZ77 sliding-window compression",
            Algorithm::Lz77Parallel => "LZ77, multi-threaded",
            Algorithm::Lz77Encrypted => "LZ77 with XOR encryption",
            Algorithm::Progressive => "Progressive block container (Huffman blocks)",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indices_and_extensions_are_frozen() {
        let expected = [
            (0u8, "huf"),
            (1, "rle"),
            (2, "hufp"),
            (3, "rlep"),
            (4, "lz77"),
            (5, "lz77p"),
            (6, "lz77e"),
            (7, "prog"),
        ];
        for (idx, ext) in expected {
            let a = Algorithm::from_index(idx).unwrap();
            assert_eq!(a.index(), idx);
            assert_eq!(a.extension(), ext);
            assert_eq!(Algorithm::from_extension(ext), Some(a));
        }
        assert!(Algorithm::from_index(8).is_none());
    }

    #[test]
    fn rle_family_is_indices_1_and_3() {
        assert_eq!(Algorithm::Rle.primitive(), CodecKind::Rle);
        assert_eq!(Algorithm::RleParallel.primitive(), CodecKind::Rle);
        assert!(Algorithm::RleParallel.is_parallel());
        assert!(!Algorithm::Rle.is_parallel());
    }

    #[test]
    fn file_interface_matches_buffer_interface() {
        let dir = tempfile::TempDir::new().unwrap();
        let data = b"abababababab file and buffer must agree".repeat(20);
        let input = dir.path().join("in.bin");
        std::fs::write(&input, &data).unwrap();

        let tuning = crate::config::Config::default().tuning();
        for kind in [CodecKind::Huffman, CodecKind::Rle, CodecKind::Lz77] {
            let codec = get_codec(kind, &tuning);
            let packed_path = dir.path().join("packed.bin");
            let restored_path = dir.path().join("restored.bin");

            codec.compress_file(&input, &packed_path).unwrap();
            assert_eq!(
                std::fs::read(&packed_path).unwrap(),
                codec.compress(&data).unwrap(),
                "{kind:?}"
            );
            codec.decompress_file(&packed_path, &restored_path).unwrap();
            assert_eq!(std::fs::read(&restored_path).unwrap(), data, "{kind:?}");
        }
    }
}
