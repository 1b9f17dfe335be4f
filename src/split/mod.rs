//! Split-archive wrapper — one logical compressed output spread across
//! numbered part files.
//!
//! # Part header (61 bytes, numeric fields little-endian)
//!
//! ```text
//! magic           "SPLT" (4 ASCII bytes)
//! part_number     u32   1-based
//! total_parts     u32
//! part_size       u64   source bytes consumed by this part
//! total_size      u64   original input size
//! checksum_type   u8    ChecksumKind
//! checksum        32 B  whole-input checksum payload, zero-padded
//! ```
//!
//! Every part carries the same global checksum so a reader can start from
//! part 1 alone.  Parts are named `<base>.partNNNN` (4 digits, 1-based);
//! each part's payload is the codec's whole-buffer compression of that
//! part's slice of the source, so parts decode independently and
//! concatenate in order.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::checksum::{Checksum, ChecksumHasher, ChecksumKind};
use crate::chunk_io::ChunkReader;
use crate::codec::Codec;
use crate::error::{Error, Result};

pub const SPLIT_MAGIC: &[u8; 4] = b"SPLT";
/// Smallest allowed part size; smaller requests are clamped up.
pub const MIN_SPLIT_SIZE: u64 = 1024 * 1024;
/// Default maximum part size (100 MiB).
pub const DEFAULT_MAX_PART_SIZE: u64 = 100 * 1024 * 1024;
/// Part numbers are 4 decimal digits.
pub const MAX_PARTS: u64 = 9999;

const CHECKSUM_FIELD_LEN: usize = 32;

// ── Part header ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SplitPartHeader {
    pub part_number: u32,
    pub total_parts: u32,
    pub part_size: u64,
    pub total_size: u64,
    pub checksum_kind: ChecksumKind,
    pub checksum: [u8; CHECKSUM_FIELD_LEN],
}

impl SplitPartHeader {
    pub fn write<W: Write>(&self, mut w: W) -> Result<()> {
        w.write_all(SPLIT_MAGIC).map_err(Error::Write)?;
        w.write_u32::<LittleEndian>(self.part_number).map_err(Error::Write)?;
        w.write_u32::<LittleEndian>(self.total_parts).map_err(Error::Write)?;
        w.write_u64::<LittleEndian>(self.part_size).map_err(Error::Write)?;
        w.write_u64::<LittleEndian>(self.total_size).map_err(Error::Write)?;
        w.write_u8(self.checksum_kind as u8).map_err(Error::Write)?;
        w.write_all(&self.checksum).map_err(Error::Write)?;
        Ok(())
    }

    pub fn read<R: Read>(mut r: R) -> Result<Self> {
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic).map_err(Error::Read)?;
        if &magic != SPLIT_MAGIC {
            return Err(Error::BadFormat { expected: "SPLT" });
        }
        let part_number = r.read_u32::<LittleEndian>().map_err(Error::Read)?;
        let total_parts = r.read_u32::<LittleEndian>().map_err(Error::Read)?;
        let part_size = r.read_u64::<LittleEndian>().map_err(Error::Read)?;
        let total_size = r.read_u64::<LittleEndian>().map_err(Error::Read)?;
        let checksum_kind = ChecksumKind::from_u8(r.read_u8().map_err(Error::Read)?)
            .ok_or(Error::corrupt("unknown split checksum kind"))?;
        let mut checksum = [0u8; CHECKSUM_FIELD_LEN];
        r.read_exact(&mut checksum).map_err(Error::Read)?;
        Ok(Self { part_number, total_parts, part_size, total_size, checksum_kind, checksum })
    }
}

/// `<base>.partNNNN`
pub fn part_path(base: &Path, part: u32) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(format!(".part{part:04}"));
    PathBuf::from(name)
}

/// Strip a `.partNNNN` suffix; `None` when `path` is already a base.
pub fn base_from_part_path(path: &Path) -> Option<PathBuf> {
    let s = path.to_str()?;
    let (base, suffix) = s.rsplit_once(".part")?;
    if suffix.len() == 4 && suffix.bytes().all(|b| b.is_ascii_digit()) {
        Some(PathBuf::from(base))
    } else {
        None
    }
}

// ── Compression ──────────────────────────────────────────────────────────────

/// Outcome summary for a split-compress job.
#[derive(Debug, Clone, Copy)]
pub struct SplitReport {
    pub total_parts: u32,
    pub total_size: u64,
    /// True when `max_part_size` was clamped up to [`MIN_SPLIT_SIZE`].
    pub clamped: bool,
}

/// Split `input` into parts of at most `max_part_size` source bytes each,
/// compressing every part with `codec` and writing `<base>.partNNNN`
/// files.
pub fn compress_file(
    input: &Path,
    output_base: &Path,
    codec: &dyn Codec,
    max_part_size: u64,
    checksum_kind: ChecksumKind,
    buffer_size: usize,
) -> Result<SplitReport> {
    let clamped = max_part_size < MIN_SPLIT_SIZE;
    let part_size = max_part_size.max(MIN_SPLIT_SIZE);

    let mut reader = ChunkReader::open(input, buffer_size)?;
    let total_size = reader.file_size();
    let total_parts = if total_size == 0 { 1 } else { total_size.div_ceil(part_size) };
    if total_parts > MAX_PARTS {
        return Err(Error::invalid_config(format!(
            "input needs {total_parts} parts; the maximum is {MAX_PARTS}"
        )));
    }

    // Pass 1: global checksum over the whole input.
    let mut checksum = [0u8; CHECKSUM_FIELD_LEN];
    if checksum_kind != ChecksumKind::None {
        let mut hasher = ChecksumHasher::new(checksum_kind);
        while let Some(chunk) = reader.next_chunk()? {
            hasher.update(&chunk);
        }
        let payload = hasher.finalize().payload();
        checksum[..payload.len()].copy_from_slice(&payload);
        reader = ChunkReader::open(input, buffer_size)?;
    }

    // Pass 2: compress one part at a time.
    let mut part_number = 0u32;
    let mut carry: Vec<u8> = Vec::new();
    loop {
        let mut source = std::mem::take(&mut carry);
        while (source.len() as u64) < part_size {
            match reader.next_chunk()? {
                Some(chunk) => source.extend_from_slice(&chunk),
                None => break,
            }
        }
        if source.len() as u64 > part_size {
            carry = source.split_off(part_size as usize);
        }
        if source.is_empty() && part_number > 0 {
            break;
        }
        part_number += 1;

        let header = SplitPartHeader {
            part_number,
            total_parts: total_parts as u32,
            part_size: source.len() as u64,
            total_size,
            checksum_kind,
            checksum,
        };
        let path = part_path(output_base, part_number);
        let mut file = std::fs::File::create(&path).map_err(|e| Error::open(&path, e))?;
        header.write(&mut file)?;
        let payload = codec.compress(&source)?;
        file.write_all(&payload).map_err(Error::Write)?;

        if carry.is_empty() && reader.position() == reader.file_size() {
            break;
        }
    }
    debug_assert_eq!(part_number as u64, total_parts);

    Ok(SplitReport { total_parts: total_parts as u32, total_size, clamped })
}

/// In-memory variant of [`compress_file`] for pipeline stages that already
/// hold the source bytes (the dedup filter chains through here without any
/// temporary file).
pub fn compress_buffer(
    data: &[u8],
    output_base: &Path,
    codec: &dyn Codec,
    max_part_size: u64,
    checksum_kind: ChecksumKind,
) -> Result<SplitReport> {
    let clamped = max_part_size < MIN_SPLIT_SIZE;
    let part_size = max_part_size.max(MIN_SPLIT_SIZE);

    let total_size = data.len() as u64;
    let total_parts = if total_size == 0 { 1 } else { total_size.div_ceil(part_size) };
    if total_parts > MAX_PARTS {
        return Err(Error::invalid_config(format!(
            "input needs {total_parts} parts; the maximum is {MAX_PARTS}"
        )));
    }

    let mut checksum = [0u8; CHECKSUM_FIELD_LEN];
    if checksum_kind != ChecksumKind::None {
        let payload = Checksum::compute(checksum_kind, data).payload();
        checksum[..payload.len()].copy_from_slice(&payload);
    }

    let mut sources: Vec<&[u8]> = data.chunks(part_size as usize).collect();
    if sources.is_empty() {
        sources.push(&[]);
    }
    for (idx, source) in sources.iter().enumerate() {
        let part_number = idx as u32 + 1;
        let header = SplitPartHeader {
            part_number,
            total_parts: total_parts as u32,
            part_size: source.len() as u64,
            total_size,
            checksum_kind,
            checksum,
        };
        let path = part_path(output_base, part_number);
        let mut file = std::fs::File::create(&path).map_err(|e| Error::open(&path, e))?;
        header.write(&mut file)?;
        let payload = codec.compress(source)?;
        file.write_all(&payload).map_err(Error::Write)?;
    }

    Ok(SplitReport { total_parts: total_parts as u32, total_size, clamped })
}

// ── Decompression ────────────────────────────────────────────────────────────

/// Reassemble a split archive into `output`.  `input` may be the output
/// base or any `.partNNNN` path.
pub fn decompress_file(input: &Path, output: &Path, codec: &dyn Codec) -> Result<u64> {
    let base = base_from_part_path(input).unwrap_or_else(|| input.to_path_buf());

    let first = read_part(&base, 1)?;
    let total_parts = first.0.total_parts;
    let checksum_kind = first.0.checksum_kind;
    let expected_checksum = first.0.checksum;
    let total_size = first.0.total_size;

    let mut out = std::fs::File::create(output).map_err(|e| Error::open(output, e))?;
    let mut hasher = ChecksumHasher::new(checksum_kind);
    let mut written = 0u64;

    for part in 1..=total_parts {
        let (header, payload) = if part == 1 { first.clone() } else { read_part(&base, part)? };
        if header.total_parts != total_parts || header.total_size != total_size {
            return Err(Error::corrupt("split part headers disagree"));
        }
        let decoded = codec.decompress(&payload)?;
        if decoded.len() as u64 != header.part_size {
            return Err(Error::corrupt("split part decoded to wrong size"));
        }
        hasher.update(&decoded);
        out.write_all(&decoded).map_err(Error::Write)?;
        written += decoded.len() as u64;
    }

    if written != total_size {
        return Err(Error::corrupt("split archive reassembled to wrong size"));
    }
    if checksum_kind != ChecksumKind::None {
        let payload = hasher.finalize().payload();
        if expected_checksum[..payload.len()] != payload[..] {
            return Err(Error::ChecksumMismatch { block_id: None });
        }
    }
    Ok(written)
}

fn read_part(base: &Path, part: u32) -> Result<(SplitPartHeader, Vec<u8>)> {
    let path = part_path(base, part);
    let data = std::fs::read(&path).map_err(|_| Error::MissingPart(part))?;
    let mut cursor = std::io::Cursor::new(&data);
    let header = SplitPartHeader::read(&mut cursor)?;
    if header.part_number != part {
        return Err(Error::MissingPart(part));
    }
    let start = cursor.position() as usize;
    Ok((header, data[start..].to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::RleCodec;
    use tempfile::TempDir;

    fn write_input(dir: &TempDir, data: &[u8]) -> PathBuf {
        let path = dir.path().join("input.bin");
        std::fs::write(&path, data).unwrap();
        path
    }

    #[test]
    fn part_path_naming() {
        assert_eq!(
            part_path(Path::new("/tmp/out.rle"), 3),
            PathBuf::from("/tmp/out.rle.part0003")
        );
        assert_eq!(
            base_from_part_path(Path::new("/tmp/out.rle.part0003")),
            Some(PathBuf::from("/tmp/out.rle"))
        );
        assert_eq!(base_from_part_path(Path::new("/tmp/out.rle")), None);
        assert_eq!(base_from_part_path(Path::new("/tmp/out.partial")), None);
    }

    #[test]
    fn three_part_roundtrip_with_headers() {
        let dir = TempDir::new().unwrap();
        // 2.5 MiB of patterned data at the 1 MiB minimum part size → 3 parts.
        let data: Vec<u8> = (0..2_621_440usize).map(|i| (i / 1000) as u8).collect();
        let input = write_input(&dir, &data);
        let base = dir.path().join("archive.rle");

        let report = compress_file(
            &input,
            &base,
            &RleCodec,
            MIN_SPLIT_SIZE,
            ChecksumKind::Crc32,
            64 * 1024,
        )
        .unwrap();
        assert_eq!(report.total_parts, 3);
        assert!(!report.clamped);

        for part in 1..=3u32 {
            let raw = std::fs::read(part_path(&base, part)).unwrap();
            let header = SplitPartHeader::read(&raw[..]).unwrap();
            assert_eq!(header.part_number, part);
            assert_eq!(header.total_parts, 3);
            assert_eq!(header.total_size, data.len() as u64);
        }

        let output = dir.path().join("restored.bin");
        let n = decompress_file(&base, &output, &RleCodec).unwrap();
        assert_eq!(n, data.len() as u64);
        assert_eq!(std::fs::read(&output).unwrap(), data);
    }

    #[test]
    fn tiny_part_size_is_clamped() {
        let dir = TempDir::new().unwrap();
        let data = vec![9u8; 4096];
        let input = write_input(&dir, &data);
        let base = dir.path().join("clamped.rle");

        let report =
            compress_file(&input, &base, &RleCodec, 512, ChecksumKind::None, 8192).unwrap();
        assert!(report.clamped);
        assert_eq!(report.total_parts, 1);

        let output = dir.path().join("clamped.out");
        decompress_file(&base, &output, &RleCodec).unwrap();
        assert_eq!(std::fs::read(&output).unwrap(), data);
    }

    #[test]
    fn missing_part_is_reported_by_number() {
        let dir = TempDir::new().unwrap();
        let data = vec![1u8; 3 * 1024 * 1024];
        let input = write_input(&dir, &data);
        let base = dir.path().join("holey.rle");

        compress_file(&input, &base, &RleCodec, MIN_SPLIT_SIZE, ChecksumKind::Crc32, 65536)
            .unwrap();
        std::fs::remove_file(part_path(&base, 2)).unwrap();

        let err = decompress_file(&base, &dir.path().join("x"), &RleCodec).unwrap_err();
        assert!(matches!(err, Error::MissingPart(2)));
    }

    #[test]
    fn renumbered_part_is_out_of_order() {
        let dir = TempDir::new().unwrap();
        let data = vec![5u8; 2 * 1024 * 1024 + 10];
        let input = write_input(&dir, &data);
        let base = dir.path().join("swapped.rle");

        compress_file(&input, &base, &RleCodec, MIN_SPLIT_SIZE, ChecksumKind::None, 65536)
            .unwrap();
        // Masquerade part 3 as part 2.
        std::fs::remove_file(part_path(&base, 2)).unwrap();
        std::fs::rename(part_path(&base, 3), part_path(&base, 2)).unwrap();

        let err = decompress_file(&base, &dir.path().join("y"), &RleCodec).unwrap_err();
        assert!(matches!(err, Error::MissingPart(2)));
    }

    #[test]
    fn global_checksum_mismatch_detected() {
        let dir = TempDir::new().unwrap();
        let data = vec![3u8; 1_500_000];
        let input = write_input(&dir, &data);
        let base = dir.path().join("sum.rle");

        compress_file(&input, &base, &RleCodec, MIN_SPLIT_SIZE, ChecksumKind::Sha256, 65536)
            .unwrap();

        // Corrupt the stored checksum field of part 1 (offset 29..61).
        let p1 = part_path(&base, 1);
        let mut raw = std::fs::read(&p1).unwrap();
        raw[29] ^= 0xFF;
        std::fs::write(&p1, &raw).unwrap();

        let err = decompress_file(&base, &dir.path().join("z"), &RleCodec).unwrap_err();
        assert!(matches!(err, Error::ChecksumMismatch { block_id: None }));
    }

    #[test]
    fn empty_input_yields_one_empty_part() {
        let dir = TempDir::new().unwrap();
        let input = write_input(&dir, b"");
        let base = dir.path().join("empty.rle");

        let report =
            compress_file(&input, &base, &RleCodec, MIN_SPLIT_SIZE, ChecksumKind::Crc32, 4096)
                .unwrap();
        assert_eq!(report.total_parts, 1);

        let output = dir.path().join("empty.out");
        let n = decompress_file(&base, &output, &RleCodec).unwrap();
        assert_eq!(n, 0);
        assert_eq!(std::fs::read(&output).unwrap(), b"");
    }

    #[test]
    fn buffer_and_file_entry_points_write_identical_parts() {
        let dir = TempDir::new().unwrap();
        let data: Vec<u8> = (0..1_600_000usize).map(|i| (i % 13) as u8).collect();
        let input = write_input(&dir, &data);

        let from_file = dir.path().join("a.rle");
        let from_buffer = dir.path().join("b.rle");
        compress_file(&input, &from_file, &RleCodec, MIN_SPLIT_SIZE, ChecksumKind::Crc32, 32768)
            .unwrap();
        compress_buffer(&data, &from_buffer, &RleCodec, MIN_SPLIT_SIZE, ChecksumKind::Crc32)
            .unwrap();

        for part in 1..=2u32 {
            assert_eq!(
                std::fs::read(part_path(&from_file, part)).unwrap(),
                std::fs::read(part_path(&from_buffer, part)).unwrap(),
                "part {part}"
            );
        }
    }
}
