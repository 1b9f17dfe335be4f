//! # filecompressor — multi-codec file compression engine
//!
//! Format guarantees (frozen in v1):
//! - All numeric fields are little-endian unless a field says otherwise
//!   (LZ77 match offsets are big-endian u16 inside their token)
//! - Every primitive codec stream starts with the 64-bit original size
//! - Container magics are fixed ASCII: `PROG`, `SPLT`, `DEDUP`, and the
//!   XOR filter's `ENCRYPTED` header
//! - Algorithm indices 0..7 and their file extensions are frozen; see
//!   `codec::Algorithm`
//! - Every component returns an explicit `Result` — no sentinel integers,
//!   no global mutable state; jobs are configured by one `Config` record

pub mod checksum;
pub mod chunk_io;
pub mod codec;
pub mod config;
pub mod crypto;
pub mod dedup;
pub mod error;
pub mod parallel;
pub mod pipeline;
pub mod progressive;
pub mod split;

// Flat re-exports for the most common types.
pub use checksum::{Checksum, ChecksumKind, DedupHashKind};
pub use codec::{get_codec, Algorithm, Codec, CodecKind, Lz77Params};
pub use config::{Config, OptimizationGoal};
pub use dedup::{DedupConfig, DedupMode, DedupStats};
pub use error::{Error, Result};
pub use pipeline::{run, JobReport, Mode, Request};

use std::path::Path;

/// Whole-file read with the crate's error mapping.
pub(crate) fn read_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| Error::open(path, e))
}

/// Whole-file write with the crate's error mapping.
pub(crate) fn write_file(path: &Path, data: &[u8]) -> Result<()> {
    std::fs::write(path, data).map_err(Error::Write)
}
