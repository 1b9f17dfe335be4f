//! Job configuration — one explicit record, no process-wide mutable state.
//!
//! The CLI (or any embedding caller) constructs a [`Config`], optionally
//! seeded from the environment, and hands it to the pipeline.  Nothing in
//! the core reads globals; the encryption key, thread count, buffer size
//! and optimization goal all travel through this record.
//!
//! Environment fallbacks (CLI flags override both):
//! - `OMP_NUM_THREADS`          — worker thread count
//! - `COMPRESSION_BUFFER_SIZE`  — chunked I/O buffer size in bytes

use crate::checksum::ChecksumKind;
use crate::codec::Lz77Params;
use crate::error::{Error, Result};

/// Default chunked-I/O buffer size.
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;
/// Smallest accepted buffer size; smaller requests are clamped up.
pub const MIN_BUFFER_SIZE: usize = 1024;

/// Codec parameter preset selected by `-O`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OptimizationGoal {
    #[default]
    Default,
    Speed,
    Size,
}

impl OptimizationGoal {
    pub fn from_name(s: &str) -> Option<Self> {
        match s {
            "speed" => Some(OptimizationGoal::Speed),
            "size" => Some(OptimizationGoal::Size),
            _ => None,
        }
    }
}

/// Codec parameters derived from the optimization goal.
#[derive(Debug, Clone, Copy)]
pub struct Tuning {
    pub lz77: Lz77Params,
    pub huffman_depth_limit: usize,
}

/// One job's worth of settings.
#[derive(Debug, Clone)]
pub struct Config {
    /// Worker threads; 0 means auto-detect.
    pub threads: usize,
    /// Chunked-I/O buffer size in bytes.
    pub buffer_size: usize,
    pub goal: OptimizationGoal,
    /// Integrity checksum for containers and framed I/O.
    pub integrity: ChecksumKind,
    /// Encryption key; `Some` turns the XOR filter on.
    pub key: Option<Vec<u8>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            threads: 0,
            buffer_size: DEFAULT_BUFFER_SIZE,
            goal: OptimizationGoal::Default,
            integrity: ChecksumKind::None,
            key: None,
        }
    }
}

impl Config {
    /// Defaults with environment fallbacks applied.  Unparsable values are
    /// ignored rather than fatal — the variables are advisory.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(v) = std::env::var("OMP_NUM_THREADS") {
            if let Ok(n) = v.trim().parse::<usize>() {
                cfg.threads = n;
            }
        }
        if let Ok(v) = std::env::var("COMPRESSION_BUFFER_SIZE") {
            if let Ok(n) = v.trim().parse::<usize>() {
                cfg.buffer_size = n;
            }
        }
        cfg
    }

    /// Codec parameters for the selected goal.
    pub fn tuning(&self) -> Tuning {
        match self.goal {
            OptimizationGoal::Default => Tuning {
                lz77: Lz77Params::DEFAULT,
                huffman_depth_limit: 256,
            },
            OptimizationGoal::Speed => Tuning {
                lz77: Lz77Params::SPEED,
                huffman_depth_limit: 32,
            },
            OptimizationGoal::Size => Tuning {
                lz77: Lz77Params::SIZE,
                huffman_depth_limit: 512,
            },
        }
    }

    /// Validate and clamp, returning warning lines for the caller to print.
    /// Hard errors (an empty key) fail instead of warning.
    pub fn normalize(&mut self) -> Result<Vec<String>> {
        let mut warnings = Vec::new();
        if let Some(key) = &self.key {
            if key.is_empty() {
                return Err(Error::invalid_config("encryption key must not be empty"));
            }
        }
        if self.buffer_size < MIN_BUFFER_SIZE {
            warnings.push(format!(
                "buffer size {} below minimum, clamped to {MIN_BUFFER_SIZE}",
                self.buffer_size
            ));
            self.buffer_size = MIN_BUFFER_SIZE;
        }
        Ok(warnings)
    }
}
