//! Deduplication filter — unique chunks stored once, duplicates stored as
//! references to the first occurrence.
//!
//! # On-disk layout (numeric fields little-endian)
//!
//! ```text
//! magic           "DEDUP" (5 ASCII bytes)
//! original_size   u64
//! total_chunks    u64
//! per chunk:
//!   chunk_size    u32
//!   is_ref        u8   0 = literal, 1 = reference
//!   literal:      chunk_size raw bytes
//!   reference:    original_offset u64 — where the first occurrence
//!                 starts in the *decoded* stream
//! ```
//!
//! # Hash table
//! 65536 bucket heads indexed by the first two bytes of the chunk hash;
//! collisions resolve through a per-bucket singly linked list threaded by
//! arena indices (no pointer chasing to free).  Equality compares all 20
//! hash bytes **and** the chunk size.  The table lives for one invocation
//! and is dropped with it.

pub mod chunker;

use byteorder::{ByteOrder, LittleEndian};

use crate::checksum::{DedupHashKind, DEDUP_HASH_LEN};
use crate::error::{Error, Result};
use chunker::{ContentChunker, FixedChunker};

pub const DEDUP_MAGIC: &[u8; 5] = b"DEDUP";
pub const MIN_DEDUP_CHUNK_SIZE: u32 = 4 * 1024;
pub const MAX_DEDUP_CHUNK_SIZE: u32 = 1024 * 1024;
pub const DEFAULT_DEDUP_CHUNK_SIZE: u32 = 64 * 1024;

const HEADER_LEN: usize = 5 + 8 + 8;
const BUCKET_COUNT: usize = 1 << 16;
const NIL: u32 = u32::MAX;

// ── Configuration ────────────────────────────────────────────────────────────

/// Chunking strategy, in `-V` flag order.  `Smart` currently behaves
/// exactly like `Variable`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum DedupMode {
    #[default]
    Fixed = 0,
    Variable = 1,
    Smart = 2,
}

impl DedupMode {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(DedupMode::Fixed),
            1 => Some(DedupMode::Variable),
            2 => Some(DedupMode::Smart),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DedupMode::Fixed => "fixed",
            DedupMode::Variable => "variable",
            DedupMode::Smart => "smart",
        }
    }
}

#[derive(Debug, Clone)]
pub struct DedupConfig {
    pub mode: DedupMode,
    pub hash: DedupHashKind,
    /// Fixed-mode chunk size / variable-mode maximum chunk size.
    pub chunk_size: u32,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            mode: DedupMode::Fixed,
            hash: DedupHashKind::Sha1,
            chunk_size: DEFAULT_DEDUP_CHUNK_SIZE,
        }
    }
}

impl DedupConfig {
    /// Clamp the chunk size into its legal range, returning warning lines
    /// for the caller to print.
    pub fn normalize(&mut self) -> Vec<String> {
        let mut warnings = Vec::new();
        let clamped = self.chunk_size.clamp(MIN_DEDUP_CHUNK_SIZE, MAX_DEDUP_CHUNK_SIZE);
        if clamped != self.chunk_size {
            warnings.push(format!(
                "dedup chunk size {} out of range, clamped to {clamped}",
                self.chunk_size
            ));
            self.chunk_size = clamped;
        }
        warnings
    }
}

// ── Statistics ───────────────────────────────────────────────────────────────

/// Read-only outcome counters for one dedup invocation.
#[derive(Debug, Clone, Copy, Default)]
pub struct DedupStats {
    pub total_chunks: u64,
    pub unique_chunks: u64,
    pub duplicate_chunks: u64,
    pub original_size: u64,
    pub encoded_size: u64,
}

impl DedupStats {
    /// Fraction of the input removed by deduplication.
    pub fn savings_ratio(&self) -> f64 {
        if self.original_size == 0 {
            0.0
        } else {
            1.0 - self.encoded_size as f64 / self.original_size as f64
        }
    }
}

// ── Hash table ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct DedupEntry {
    hash: [u8; DEDUP_HASH_LEN],
    original_offset: u64,
    size: u32,
    ref_count: u32,
    next: u32,
}

struct DedupTable {
    buckets: Vec<u32>,
    entries: Vec<DedupEntry>,
}

impl DedupTable {
    fn new() -> Self {
        Self { buckets: vec![NIL; BUCKET_COUNT], entries: Vec::new() }
    }

    #[inline]
    fn bucket_of(hash: &[u8; DEDUP_HASH_LEN]) -> usize {
        usize::from(hash[0]) << 8 | usize::from(hash[1])
    }

    /// Find a matching entry (all hash bytes and the size must agree) and
    /// bump its reference count.
    fn find_mut(&mut self, hash: &[u8; DEDUP_HASH_LEN], size: u32) -> Option<&mut DedupEntry> {
        let mut cursor = self.buckets[Self::bucket_of(hash)];
        while cursor != NIL {
            let idx = cursor as usize;
            if self.entries[idx].hash == *hash && self.entries[idx].size == size {
                return Some(&mut self.entries[idx]);
            }
            cursor = self.entries[idx].next;
        }
        None
    }

    /// Insert a new unique chunk at the head of its bucket's list.
    fn insert(&mut self, hash: [u8; DEDUP_HASH_LEN], original_offset: u64, size: u32) {
        let bucket = Self::bucket_of(&hash);
        let entry = DedupEntry {
            hash,
            original_offset,
            size,
            ref_count: 1,
            next: self.buckets[bucket],
        };
        self.buckets[bucket] = self.entries.len() as u32;
        self.entries.push(entry);
    }
}

// ── Encoding ─────────────────────────────────────────────────────────────────

/// True when `data` starts with the dedup stream magic.
pub fn is_dedup_stream(data: &[u8]) -> bool {
    data.len() >= DEDUP_MAGIC.len() && &data[..DEDUP_MAGIC.len()] == DEDUP_MAGIC
}

pub fn encode(input: &[u8], config: &DedupConfig) -> Result<(Vec<u8>, DedupStats)> {
    let chunk_size = config.chunk_size.clamp(MIN_DEDUP_CHUNK_SIZE, MAX_DEDUP_CHUNK_SIZE) as usize;

    let chunks: Vec<&[u8]> = match config.mode {
        DedupMode::Fixed => FixedChunker::new(input, chunk_size).collect(),
        DedupMode::Variable | DedupMode::Smart => {
            ContentChunker::new(input, chunk_size).collect()
        }
    };

    let mut out = Vec::with_capacity(HEADER_LEN + input.len() / 2);
    out.extend_from_slice(DEDUP_MAGIC);
    let mut field = [0u8; 8];
    LittleEndian::write_u64(&mut field, input.len() as u64);
    out.extend_from_slice(&field);
    LittleEndian::write_u64(&mut field, chunks.len() as u64);
    out.extend_from_slice(&field);

    let mut table = DedupTable::new();
    let mut stats = DedupStats { original_size: input.len() as u64, ..Default::default() };
    let mut offset = 0u64;

    for chunk in chunks {
        stats.total_chunks += 1;
        let hash = config.hash.digest20(chunk);

        let mut size_field = [0u8; 4];
        LittleEndian::write_u32(&mut size_field, chunk.len() as u32);
        out.extend_from_slice(&size_field);

        match table.find_mut(&hash, chunk.len() as u32) {
            Some(entry) => {
                entry.ref_count += 1;
                stats.duplicate_chunks += 1;
                out.push(1);
                LittleEndian::write_u64(&mut field, entry.original_offset);
                out.extend_from_slice(&field);
            }
            None => {
                table.insert(hash, offset, chunk.len() as u32);
                stats.unique_chunks += 1;
                out.push(0);
                out.extend_from_slice(chunk);
            }
        }
        offset += chunk.len() as u64;
    }

    stats.encoded_size = out.len() as u64;
    Ok((out, stats))
}

// ── Decoding ─────────────────────────────────────────────────────────────────

pub fn decode(input: &[u8]) -> Result<Vec<u8>> {
    if input.len() < HEADER_LEN || !is_dedup_stream(input) {
        return Err(Error::BadFormat { expected: "DEDUP" });
    }
    let original_size = LittleEndian::read_u64(&input[5..13]);
    let total_chunks = LittleEndian::read_u64(&input[13..21]);

    let original_size = usize::try_from(original_size).map_err(|_| Error::Memory)?;
    let mut out = Vec::with_capacity(original_size);
    let mut pos = HEADER_LEN;

    for _ in 0..total_chunks {
        if pos + 5 > input.len() {
            return Err(Error::corrupt("dedup record truncated"));
        }
        let size = LittleEndian::read_u32(&input[pos..pos + 4]) as usize;
        let is_ref = input[pos + 4];
        pos += 5;

        match is_ref {
            0 => {
                if pos + size > input.len() {
                    return Err(Error::corrupt("dedup literal truncated"));
                }
                out.extend_from_slice(&input[pos..pos + size]);
                pos += size;
            }
            1 => {
                if pos + 8 > input.len() {
                    return Err(Error::corrupt("dedup reference truncated"));
                }
                let offset = LittleEndian::read_u64(&input[pos..pos + 8]);
                pos += 8;
                let offset = usize::try_from(offset)
                    .map_err(|_| Error::corrupt("dedup reference out of range"))?;
                if offset + size > out.len() {
                    return Err(Error::corrupt("dedup reference out of range"));
                }
                out.extend_from_within(offset..offset + size);
            }
            _ => return Err(Error::corrupt("bad dedup record flag")),
        }
    }

    if pos != input.len() {
        return Err(Error::corrupt("dedup stream has trailing bytes"));
    }
    if out.len() != original_size {
        return Err(Error::corrupt("dedup stream decoded to wrong size"));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::chunker::ROLLING_WINDOW;
    use super::*;

    fn pseudo_random(len: usize, seed: u32) -> Vec<u8> {
        let mut state = seed;
        (0..len)
            .map(|_| {
                state = state.wrapping_mul(1664525).wrapping_add(1013904223);
                (state >> 24) as u8
            })
            .collect()
    }

    #[test]
    fn identical_regions_become_references() {
        // Two identical 64 KiB regions, fixed chunking, SHA-1.
        let region = pseudo_random(64 * 1024, 11);
        let mut data = region.clone();
        data.extend_from_slice(&region);

        let config = DedupConfig::default();
        let (encoded, stats) = encode(&data, &config).unwrap();

        assert_eq!(stats.total_chunks, 2);
        assert_eq!(stats.unique_chunks, 1);
        assert!(stats.duplicate_chunks >= 1);
        assert!(stats.savings_ratio() > 0.4);

        // The second record is a reference to offset 0.
        let second = HEADER_LEN + 4 + 1 + region.len();
        assert_eq!(encoded[second + 4], 1, "is_ref flag");
        assert_eq!(LittleEndian::read_u64(&encoded[second + 5..second + 13]), 0);

        assert_eq!(decode(&encoded).unwrap(), data);
    }

    #[test]
    fn every_hash_kind_roundtrips() {
        let mut data = pseudo_random(100_000, 5);
        let dup = data[..20_000].to_vec();
        data.extend_from_slice(&dup);
        for hash in [
            DedupHashKind::Sha1,
            DedupHashKind::Md5,
            DedupHashKind::Crc32,
            DedupHashKind::Xxh64,
        ] {
            let config = DedupConfig { hash, chunk_size: MIN_DEDUP_CHUNK_SIZE, ..Default::default() };
            let (encoded, stats) = encode(&data, &config).unwrap();
            assert!(stats.duplicate_chunks > 0, "{hash:?}");
            assert_eq!(decode(&encoded).unwrap(), data, "{hash:?}");
        }
    }

    #[test]
    fn variable_and_smart_modes_agree() {
        let data = pseudo_random(300_000, 23);
        let base = DedupConfig { mode: DedupMode::Variable, ..Default::default() };
        let smart = DedupConfig { mode: DedupMode::Smart, ..Default::default() };
        let (a, _) = encode(&data, &base).unwrap();
        let (b, _) = encode(&data, &smart).unwrap();
        assert_eq!(a, b);
        assert_eq!(decode(&a).unwrap(), data);
    }

    #[test]
    fn variable_mode_finds_shifted_duplicates() {
        // A large repeated region at a shifted position still dedups under
        // content-defined chunking.
        let region = pseudo_random(256 * 1024, 9);
        let mut data = region.clone();
        data.extend_from_slice(b"wedge");
        data.extend_from_slice(&region);

        let config = DedupConfig {
            mode: DedupMode::Variable,
            chunk_size: 16 * 1024,
            ..Default::default()
        };
        let (encoded, stats) = encode(&data, &config).unwrap();
        assert!(stats.duplicate_chunks > 0);
        assert_eq!(decode(&encoded).unwrap(), data);
    }

    #[test]
    fn empty_input() {
        let (encoded, stats) = encode(b"", &DedupConfig::default()).unwrap();
        assert_eq!(stats.total_chunks, 0);
        assert_eq!(encoded.len(), HEADER_LEN);
        assert_eq!(decode(&encoded).unwrap(), b"");
    }

    #[test]
    fn chunk_size_clamps_with_warning() {
        let mut config = DedupConfig { chunk_size: 16, ..Default::default() };
        let warnings = config.normalize();
        assert_eq!(config.chunk_size, MIN_DEDUP_CHUNK_SIZE);
        assert_eq!(warnings.len(), 1);

        let mut config = DedupConfig { chunk_size: u32::MAX, ..Default::default() };
        config.normalize();
        assert_eq!(config.chunk_size, MAX_DEDUP_CHUNK_SIZE);
    }

    #[test]
    fn forward_reference_is_corrupt() {
        let mut encoded = Vec::new();
        encoded.extend_from_slice(DEDUP_MAGIC);
        let mut field = [0u8; 8];
        LittleEndian::write_u64(&mut field, 10);
        encoded.extend_from_slice(&field); // original_size
        LittleEndian::write_u64(&mut field, 1);
        encoded.extend_from_slice(&field); // total_chunks
        let mut size = [0u8; 4];
        LittleEndian::write_u32(&mut size, 10);
        encoded.extend_from_slice(&size);
        encoded.push(1); // reference with nothing decoded yet
        LittleEndian::write_u64(&mut field, 0);
        encoded.extend_from_slice(&field);

        assert!(matches!(decode(&encoded).unwrap_err(), Error::Corrupt { .. }));
    }

    #[test]
    fn bad_magic_is_rejected() {
        assert!(matches!(
            decode(b"NOTDEDUPxxxxxxxxxxxxxxxx").unwrap_err(),
            Error::BadFormat { expected: "DEDUP" }
        ));
    }

    #[test]
    fn equality_requires_size_match_not_just_hash() {
        // Construct two chunks with equal CRC32-padded hashes but different
        // sizes by using different inputs that CRC to different values —
        // instead verify directly that find_mut keys on (hash, size).
        let mut table = DedupTable::new();
        let hash = [7u8; DEDUP_HASH_LEN];
        table.insert(hash, 0, 100);
        assert!(table.find_mut(&hash, 100).is_some());
        assert!(table.find_mut(&hash, 200).is_none());
    }

    #[test]
    fn bucket_collisions_chain() {
        let mut table = DedupTable::new();
        // Same first two bytes → same bucket; different tails must coexist.
        let mut h1 = [0u8; DEDUP_HASH_LEN];
        let mut h2 = [0u8; DEDUP_HASH_LEN];
        h1[0] = 0xAB;
        h1[1] = 0xCD;
        h1[19] = 1;
        h2[0] = 0xAB;
        h2[1] = 0xCD;
        h2[19] = 2;
        table.insert(h1, 0, 50);
        table.insert(h2, 50, 60);
        assert_eq!(table.find_mut(&h1, 50).unwrap().original_offset, 0);
        assert_eq!(table.find_mut(&h2, 60).unwrap().original_offset, 50);
    }

    #[test]
    fn roundtrip_mixed_content() {
        let mut data = Vec::new();
        data.extend_from_slice(&pseudo_random(150_000, 2));
        data.extend_from_slice(&data.clone()[..70_000]);
        data.extend_from_slice(&vec![0u8; 90_000]);
        for mode in [DedupMode::Fixed, DedupMode::Variable, DedupMode::Smart] {
            let config = DedupConfig { mode, chunk_size: 8 * 1024, ..Default::default() };
            let (encoded, _) = encode(&data, &config).unwrap();
            assert_eq!(decode(&encoded).unwrap(), data, "{mode:?}");
        }
    }

    #[test]
    fn zero_runs_collapse_heavily() {
        let data = vec![0u8; 512 * 1024];
        let config = DedupConfig { chunk_size: MIN_DEDUP_CHUNK_SIZE, ..Default::default() };
        let (encoded, stats) = encode(&data, &config).unwrap();
        assert_eq!(stats.unique_chunks, 1);
        assert_eq!(stats.total_chunks, 128);
        assert!(encoded.len() < data.len() / 10);
        assert_eq!(decode(&encoded).unwrap(), data);
    }

    #[test]
    fn min_chunks_not_smaller_than_window_except_tail() {
        let data = pseudo_random(100_000, 77);
        let chunks: Vec<&[u8]> =
            ContentChunker::new(&data, MIN_DEDUP_CHUNK_SIZE as usize).collect();
        for c in &chunks[..chunks.len() - 1] {
            assert!(c.len() >= ROLLING_WINDOW);
        }
    }
}
