//! Uniform error type for the whole crate.
//!
//! Every component returns `Result<T>` to its caller — there is no
//! sentinel-integer signalling anywhere, and no component maps another
//! component's success value.  The binary turns any `Err` into a one-line
//! stderr diagnostic and a non-zero exit code.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // ── Filesystem boundary ─────────────────────────────────────────────────
    #[error("Input file not found or unreadable: {}: {source}", .path.display())]
    Open { path: PathBuf, source: io::Error },
    #[error("Read error: {0}")]
    Read(io::Error),
    #[error("Write error: {0}")]
    Write(io::Error),
    #[error("Seek error: {0}")]
    Seek(io::Error),

    // ── Configuration ───────────────────────────────────────────────────────
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Codec layer ─────────────────────────────────────────────────────────
    /// Malformed header, truncated stream, bad back-reference, bad tree.
    #[error("Invalid file format ({context})")]
    Corrupt { context: &'static str },

    // ── Container layer ─────────────────────────────────────────────────────
    #[error("Invalid file format (bad {expected} magic)")]
    BadFormat { expected: &'static str },
    #[error("Unsupported format version {found} (this build handles up to v{supported})")]
    UnsupportedVersion { found: u8, supported: u8 },
    #[error("Split archive part {0} is missing or out of order")]
    MissingPart(u32),
    #[error("Checksum mismatch{}", block_label(.block_id))]
    ChecksumMismatch { block_id: Option<u32> },

    // ── Resources ───────────────────────────────────────────────────────────
    #[error("Out of memory")]
    Memory,

    // ── Worker pool ─────────────────────────────────────────────────────────
    /// First failing worker; remaining failures are dropped, not chained.
    #[error("Worker {thread_id} failed: {source}")]
    Worker {
        thread_id: usize,
        #[source]
        source: Box<Error>,
    },
}

fn block_label(block_id: &Option<u32>) -> String {
    match block_id {
        Some(id) => format!(" in block {id}"),
        None => String::new(),
    }
}

impl Error {
    pub fn open(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Open { path: path.into(), source }
    }

    pub fn corrupt(context: &'static str) -> Self {
        Error::Corrupt { context }
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Error::InvalidConfig(msg.into())
    }

    /// True when the error indicates damaged input rather than an
    /// environment or usage problem.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Error::Corrupt { .. }
                | Error::BadFormat { .. }
                | Error::ChecksumMismatch { .. }
                | Error::UnsupportedVersion { .. }
        )
    }
}
