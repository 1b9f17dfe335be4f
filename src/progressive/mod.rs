//! Progressive container — independently decodable blocks with optional
//! per-block checksums, partial-range decode, and a streaming callback.
//!
//! # On-disk layout (all numeric fields little-endian)
//!
//! ```text
//! File header (23 bytes + optional checksum record):
//!   magic          "PROG" (4 ASCII bytes)
//!   version        u8  = 1
//!   algorithm      u8  primitive codec index (0 Huffman, 1 RLE, 4 LZ77)
//!   flags          u8  bit0 has-checksum, bit1 streaming-optimized,
//!                      bit2 encrypted
//!   block_size     u32
//!   total_blocks   u32
//!   original_size  u64
//!   file checksum  tag: u8 + payload        (only when bit0 is set)
//!
//! Each block (12-byte header + optional checksum record + payload):
//!   block_id         u32  equals the block's sequence index
//!   compressed_size  u32  on-disk payload bytes
//!   original_size    u32  ≤ block_size; the last block carries the tail
//!   block checksum   tag: u8 + payload      (only when bit0 is set)
//!   payload          compressed_size bytes
//! ```
//!
//! Block checksums cover the on-disk payload, so corruption is caught
//! before any decode is attempted; the file checksum covers the original
//! input bytes and is patched into the header after the last block.
//!
//! # Stored blocks
//! A block whose codec output would not be smaller than its original bytes
//! is stored verbatim.  The reader detects this by
//! `payload_len == original_size` (after decryption).  This bounds every
//! payload by `original_size ≤ block_size`.
//!
//! # Streaming-optimized layout (bit1)
//! Every block's payload lives in a fixed slot of exactly `block_size`
//! bytes (plus the 9-byte XOR header when bit2 is set), zero-padded past
//! `compressed_size`.  Block `k` then starts at the computable offset
//! `header_len + k × (block_header_len + slot_len)` and range decodes seek
//! straight to it.  Files written without bit1 are never padded and the
//! reader skips forward using each block's `compressed_size`.

use std::io::{Read, Seek, SeekFrom, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::checksum::{Checksum, ChecksumHasher, ChecksumKind};
use crate::codec::{get_codec, Codec, CodecKind};
use crate::config::Tuning;
use crate::crypto;
use crate::error::{Error, Result};

pub const PROGRESSIVE_MAGIC: &[u8; 4] = b"PROG";
pub const CURRENT_VERSION: u8 = 1;

pub const FLAG_HAS_CHECKSUM: u8 = 0b0000_0001;
pub const FLAG_STREAMING_OPTIMIZED: u8 = 0b0000_0010;
pub const FLAG_ENCRYPTED: u8 = 0b0000_0100;

pub const DEFAULT_BLOCK_SIZE: u32 = 1024 * 1024;

const HEADER_CORE_LEN: u64 = 23;
const BLOCK_HEADER_CORE_LEN: u64 = 12;

fn algorithm_byte(kind: CodecKind) -> u8 {
    match kind {
        CodecKind::Huffman => 0,
        CodecKind::Rle => 1,
        CodecKind::Lz77 => 4,
    }
}

fn codec_kind_from_byte(b: u8) -> Option<CodecKind> {
    match b {
        0 => Some(CodecKind::Huffman),
        1 => Some(CodecKind::Rle),
        4 => Some(CodecKind::Lz77),
        _ => None,
    }
}

// ── File header ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ProgressiveHeader {
    pub version: u8,
    pub codec: CodecKind,
    pub flags: u8,
    pub block_size: u32,
    pub total_blocks: u32,
    pub original_size: u64,
    /// `Checksum::None` unless `FLAG_HAS_CHECKSUM` is set.
    pub file_checksum: Checksum,
}

impl ProgressiveHeader {
    #[inline]
    pub fn has_checksum(&self) -> bool {
        self.flags & FLAG_HAS_CHECKSUM != 0
    }

    #[inline]
    pub fn is_streaming_optimized(&self) -> bool {
        self.flags & FLAG_STREAMING_OPTIMIZED != 0
    }

    #[inline]
    pub fn is_encrypted(&self) -> bool {
        self.flags & FLAG_ENCRYPTED != 0
    }

    /// Checksum record width: tag byte + payload.
    fn checksum_record_len(&self) -> u64 {
        if self.has_checksum() {
            1 + self.file_checksum.kind().payload_len() as u64
        } else {
            0
        }
    }

    pub fn header_len(&self) -> u64 {
        HEADER_CORE_LEN + self.checksum_record_len()
    }

    pub fn block_header_len(&self) -> u64 {
        BLOCK_HEADER_CORE_LEN + self.checksum_record_len()
    }

    /// Fixed payload slot length in the streaming-optimized layout.
    pub fn slot_len(&self) -> u64 {
        self.block_size as u64
            + if self.is_encrypted() { crypto::ENCRYPTION_MAGIC.len() as u64 } else { 0 }
    }

    /// Expected original size of block `id` per the size invariants.
    pub fn expected_block_size(&self, id: u32) -> u32 {
        if id + 1 < self.total_blocks {
            self.block_size
        } else {
            let tail = (self.original_size % self.block_size as u64) as u32;
            if tail == 0 && self.original_size > 0 {
                self.block_size
            } else {
                tail
            }
        }
    }

    pub fn write<W: Write>(&self, mut w: W) -> Result<()> {
        w.write_all(PROGRESSIVE_MAGIC).map_err(Error::Write)?;
        w.write_u8(self.version).map_err(Error::Write)?;
        w.write_u8(algorithm_byte(self.codec)).map_err(Error::Write)?;
        w.write_u8(self.flags).map_err(Error::Write)?;
        w.write_u32::<LittleEndian>(self.block_size).map_err(Error::Write)?;
        w.write_u32::<LittleEndian>(self.total_blocks).map_err(Error::Write)?;
        w.write_u64::<LittleEndian>(self.original_size).map_err(Error::Write)?;
        if self.has_checksum() {
            w.write_u8(self.file_checksum.kind() as u8).map_err(Error::Write)?;
            self.file_checksum.write_payload(&mut w)?;
        }
        Ok(())
    }

    pub fn read<R: Read>(mut r: R) -> Result<Self> {
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic).map_err(Error::Read)?;
        if &magic != PROGRESSIVE_MAGIC {
            return Err(Error::BadFormat { expected: "PROG" });
        }
        let version = r.read_u8().map_err(Error::Read)?;
        if version > CURRENT_VERSION {
            return Err(Error::UnsupportedVersion { found: version, supported: CURRENT_VERSION });
        }
        let codec = codec_kind_from_byte(r.read_u8().map_err(Error::Read)?)
            .ok_or(Error::corrupt("unknown progressive algorithm"))?;
        let flags = r.read_u8().map_err(Error::Read)?;
        let block_size = r.read_u32::<LittleEndian>().map_err(Error::Read)?;
        let total_blocks = r.read_u32::<LittleEndian>().map_err(Error::Read)?;
        let original_size = r.read_u64::<LittleEndian>().map_err(Error::Read)?;
        if block_size == 0 && total_blocks > 0 {
            return Err(Error::corrupt("progressive block size of zero"));
        }
        let file_checksum = if flags & FLAG_HAS_CHECKSUM != 0 {
            let kind = ChecksumKind::from_u8(r.read_u8().map_err(Error::Read)?)
                .filter(|k| *k != ChecksumKind::None)
                .ok_or(Error::corrupt("unknown progressive checksum kind"))?;
            Checksum::read_payload(kind, &mut r)?
        } else {
            Checksum::None
        };
        Ok(Self { version, codec, flags, block_size, total_blocks, original_size, file_checksum })
    }
}

// ── Block header ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct BlockHeader {
    pub block_id: u32,
    pub compressed_size: u32,
    pub original_size: u32,
    pub checksum: Option<Checksum>,
}

impl BlockHeader {
    fn write<W: Write>(&self, mut w: W) -> Result<()> {
        w.write_u32::<LittleEndian>(self.block_id).map_err(Error::Write)?;
        w.write_u32::<LittleEndian>(self.compressed_size).map_err(Error::Write)?;
        w.write_u32::<LittleEndian>(self.original_size).map_err(Error::Write)?;
        if let Some(checksum) = &self.checksum {
            w.write_u8(checksum.kind() as u8).map_err(Error::Write)?;
            checksum.write_payload(&mut w)?;
        }
        Ok(())
    }

    fn read<R: Read>(mut r: R, with_checksum: bool) -> Result<Self> {
        let block_id = r.read_u32::<LittleEndian>().map_err(Error::Read)?;
        let compressed_size = r.read_u32::<LittleEndian>().map_err(Error::Read)?;
        let original_size = r.read_u32::<LittleEndian>().map_err(Error::Read)?;
        let checksum = if with_checksum {
            let kind = ChecksumKind::from_u8(r.read_u8().map_err(Error::Read)?)
                .filter(|k| *k != ChecksumKind::None)
                .ok_or(Error::corrupt("unknown block checksum kind"))?;
            Some(Checksum::read_payload(kind, &mut r)?)
        } else {
            None
        };
        Ok(Self { block_id, compressed_size, original_size, checksum })
    }
}

// ── Compression ──────────────────────────────────────────────────────────────

/// Writer-side options.
#[derive(Debug, Clone)]
pub struct ProgressiveOptions {
    pub codec: CodecKind,
    pub block_size: u32,
    pub checksum: ChecksumKind,
    pub streaming_optimized: bool,
    pub key: Option<Vec<u8>>,
}

impl Default for ProgressiveOptions {
    fn default() -> Self {
        Self {
            codec: CodecKind::Huffman,
            block_size: DEFAULT_BLOCK_SIZE,
            checksum: ChecksumKind::None,
            streaming_optimized: false,
            key: None,
        }
    }
}

/// Compress `input` into a progressive container written at the sink's
/// current position (the header is patched in place afterwards, so the
/// sink must support seeking).
pub fn compress<W: Write + Seek>(
    input: &[u8],
    mut w: W,
    opts: &ProgressiveOptions,
    tuning: &Tuning,
) -> Result<()> {
    if opts.block_size == 0 {
        return Err(Error::invalid_config("progressive block size must be nonzero"));
    }
    if let Some(key) = &opts.key {
        if key.is_empty() {
            return Err(Error::invalid_config("encryption key must not be empty"));
        }
    }

    let block_size = opts.block_size as u64;
    let total_blocks = u32::try_from(input.len() as u64 / block_size
        + u64::from(input.len() as u64 % block_size != 0))
        .map_err(|_| Error::invalid_config("input needs too many progressive blocks"))?;

    let mut flags = 0u8;
    if opts.checksum != ChecksumKind::None {
        flags |= FLAG_HAS_CHECKSUM;
    }
    if opts.streaming_optimized {
        flags |= FLAG_STREAMING_OPTIMIZED;
    }
    if opts.key.is_some() {
        flags |= FLAG_ENCRYPTED;
    }

    let mut header = ProgressiveHeader {
        version: CURRENT_VERSION,
        codec: opts.codec,
        flags,
        block_size: opts.block_size,
        total_blocks,
        original_size: input.len() as u64,
        // Placeholder; same width as the final value, patched below.
        file_checksum: Checksum::compute(opts.checksum, b""),
    };

    let start = w.stream_position().map_err(Error::Seek)?;
    header.write(&mut w)?;

    let codec = get_codec(opts.codec, tuning);
    let mut hasher = ChecksumHasher::new(opts.checksum);
    let slot_len = header.slot_len();

    for (id, block) in input.chunks(opts.block_size as usize).enumerate() {
        hasher.update(block);

        let payload = encode_block_payload(codec.as_ref(), block, opts.key.as_deref())?;
        debug_assert!(payload.len() as u64 <= slot_len);

        let block_checksum = match opts.checksum {
            ChecksumKind::None => None,
            kind => Some(Checksum::compute(kind, &payload)),
        };
        BlockHeader {
            block_id: id as u32,
            compressed_size: payload.len() as u32,
            original_size: block.len() as u32,
            checksum: block_checksum,
        }
        .write(&mut w)?;
        w.write_all(&payload).map_err(Error::Write)?;

        if opts.streaming_optimized {
            let pad = slot_len - payload.len() as u64;
            if pad > 0 {
                w.write_all(&vec![0u8; pad as usize]).map_err(Error::Write)?;
            }
        }
    }

    // Patch the final file checksum into the header.
    header.file_checksum = hasher.finalize();
    let end = w.stream_position().map_err(Error::Seek)?;
    w.seek(SeekFrom::Start(start)).map_err(Error::Seek)?;
    header.write(&mut w)?;
    w.seek(SeekFrom::Start(end)).map_err(Error::Seek)?;
    w.flush().map_err(Error::Write)?;
    Ok(())
}

/// Codec output when it wins, the raw bytes when it does not (stored
/// block), then the XOR filter when a key is present.
fn encode_block_payload(
    codec: &dyn Codec,
    block: &[u8],
    key: Option<&[u8]>,
) -> Result<Vec<u8>> {
    let compressed = codec.compress(block)?;
    let plain = if compressed.len() < block.len() { compressed } else { block.to_vec() };
    match key {
        Some(key) => crypto::encrypt(key, &plain),
        None => Ok(plain),
    }
}

// ── Decode context ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContextState {
    HeaderLoaded,
    Positioned,
    BlockDecoded,
    Closed,
}

/// Decode-side state machine over a seekable source.
///
/// `open` reads the header (`HeaderLoaded`); `seek` positions the cursor in
/// front of a block (`Positioned`); `decode_block` is valid only in those
/// two states and leaves the context in `BlockDecoded`; `close` is
/// terminal.
pub struct ProgressiveContext<R: Read + Seek> {
    reader: R,
    header: ProgressiveHeader,
    codec: Box<dyn Codec>,
    key: Option<Vec<u8>>,
    state: ContextState,
    /// Block index the cursor currently sits in front of.
    next_block: u32,
    data_start: u64,
}

impl<R: Read + Seek> std::fmt::Debug for ProgressiveContext<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressiveContext")
            .field("header", &self.header)
            .field("key", &self.key)
            .field("state", &self.state)
            .field("next_block", &self.next_block)
            .field("data_start", &self.data_start)
            .finish()
    }
}

impl<R: Read + Seek> ProgressiveContext<R> {
    pub fn open(mut reader: R, key: Option<Vec<u8>>) -> Result<Self> {
        let base = reader.stream_position().map_err(Error::Seek)?;
        let header = ProgressiveHeader::read(&mut reader)?;
        if header.is_encrypted() && key.is_none() {
            return Err(Error::invalid_config(
                "progressive file is encrypted but no key was provided",
            ));
        }
        let data_start = base + header.header_len();
        let codec = get_codec(header.codec, &crate::config::Config::default().tuning());
        Ok(Self {
            reader,
            header,
            codec,
            key,
            state: ContextState::HeaderLoaded,
            next_block: 0,
            data_start,
        })
    }

    #[inline]
    pub fn header(&self) -> &ProgressiveHeader {
        &self.header
    }

    /// Position the cursor in front of `block_id`.
    pub fn seek(&mut self, block_id: u32) -> Result<()> {
        if self.state == ContextState::Closed {
            return Err(Error::invalid_config("progressive context is closed"));
        }
        if block_id >= self.header.total_blocks {
            return Err(Error::invalid_config(format!(
                "block {block_id} out of range 0..{}",
                self.header.total_blocks
            )));
        }

        if self.header.is_streaming_optimized() {
            // Fixed slots make every block offset computable.
            let stride = self.header.block_header_len() + self.header.slot_len();
            let offset = self.data_start + block_id as u64 * stride;
            self.reader.seek(SeekFrom::Start(offset)).map_err(Error::Seek)?;
            self.next_block = block_id;
        } else {
            // Linear skip over preceding block headers.
            if block_id < self.next_block || self.state == ContextState::HeaderLoaded {
                self.reader.seek(SeekFrom::Start(self.data_start)).map_err(Error::Seek)?;
                self.next_block = 0;
            }
            while self.next_block < block_id {
                let bh = BlockHeader::read(&mut self.reader, self.header.has_checksum())?;
                self.reader
                    .seek(SeekFrom::Current(bh.compressed_size as i64))
                    .map_err(Error::Seek)?;
                self.next_block += 1;
            }
        }
        self.state = ContextState::Positioned;
        Ok(())
    }

    /// Decode the block the cursor is positioned at.
    pub fn decode_block(&mut self) -> Result<Vec<u8>> {
        match self.state {
            ContextState::HeaderLoaded | ContextState::Positioned => {}
            ContextState::BlockDecoded => {
                return Err(Error::invalid_config(
                    "decode_block requires a seek between blocks",
                ));
            }
            ContextState::Closed => {
                return Err(Error::invalid_config("progressive context is closed"));
            }
        }
        if self.state == ContextState::HeaderLoaded {
            self.reader.seek(SeekFrom::Start(self.data_start)).map_err(Error::Seek)?;
            self.next_block = 0;
        }
        if self.next_block >= self.header.total_blocks {
            return Err(Error::invalid_config("no block to decode at the cursor"));
        }

        let id = self.next_block;
        let bh = BlockHeader::read(&mut self.reader, self.header.has_checksum())?;
        if bh.block_id != id {
            return Err(Error::corrupt("progressive block out of sequence"));
        }
        if bh.original_size > self.header.block_size
            || bh.original_size != self.header.expected_block_size(id)
        {
            return Err(Error::corrupt("progressive block size invariant broken"));
        }
        if bh.compressed_size as u64 > self.header.slot_len() {
            return Err(Error::corrupt("progressive block payload too large"));
        }

        let mut payload = vec![0u8; bh.compressed_size as usize];
        self.reader.read_exact(&mut payload).map_err(Error::Read)?;
        if self.header.is_streaming_optimized() {
            let pad = self.header.slot_len() - bh.compressed_size as u64;
            self.reader.seek(SeekFrom::Current(pad as i64)).map_err(Error::Seek)?;
        }

        if let Some(stored) = &bh.checksum {
            if !stored.verify(&payload) {
                return Err(Error::ChecksumMismatch { block_id: Some(id) });
            }
        }

        let plain = match (&self.key, self.header.is_encrypted()) {
            (Some(key), true) => crypto::decrypt(key, &payload)?,
            _ => payload,
        };

        // Stored block: the payload is the original bytes.
        let decoded = if plain.len() == bh.original_size as usize {
            plain
        } else {
            self.codec.decompress(&plain)?
        };
        if decoded.len() != bh.original_size as usize {
            return Err(Error::corrupt("progressive block decoded to wrong size"));
        }

        self.next_block = id + 1;
        self.state = ContextState::BlockDecoded;
        Ok(decoded)
    }

    /// Terminal; every later call fails.
    pub fn close(&mut self) {
        self.state = ContextState::Closed;
    }
}

// ── Whole-container decode paths ─────────────────────────────────────────────

/// Decode every block, writing plaintext to `w`.  Verifies the file
/// checksum when present; earlier blocks are already written when a
/// mismatch is reported.
pub fn decompress_full<R: Read + Seek, W: Write>(
    reader: R,
    mut w: W,
    key: Option<Vec<u8>>,
) -> Result<u64> {
    let mut ctx = ProgressiveContext::open(reader, key)?;
    let total = ctx.header().total_blocks;
    let checksum = ctx.header().file_checksum.clone();
    let mut hasher = ChecksumHasher::new(checksum.kind());
    let mut written = 0u64;
    for id in 0..total {
        ctx.seek(id)?;
        let block = ctx.decode_block()?;
        hasher.update(&block);
        w.write_all(&block).map_err(Error::Write)?;
        written += block.len() as u64;
    }
    ctx.close();
    if checksum != Checksum::None && hasher.finalize() != checksum {
        return Err(Error::ChecksumMismatch { block_id: None });
    }
    Ok(written)
}

/// Decode blocks `start..=end`, writing plaintext to `w`.
pub fn decompress_range<R: Read + Seek, W: Write>(
    reader: R,
    start: u32,
    end: u32,
    mut w: W,
    key: Option<Vec<u8>>,
) -> Result<u64> {
    if start > end {
        return Err(Error::invalid_config(format!("bad block range {start}-{end}")));
    }
    let mut ctx = ProgressiveContext::open(reader, key)?;
    let mut written = 0u64;
    for id in start..=end {
        ctx.seek(id)?;
        let block = ctx.decode_block()?;
        w.write_all(&block).map_err(Error::Write)?;
        written += block.len() as u64;
    }
    ctx.close();
    Ok(written)
}

/// Decode every block, handing each to `callback`; a `false` return stops
/// the iteration early.
pub fn decompress_stream<R: Read + Seek, F: FnMut(&[u8]) -> bool>(
    reader: R,
    key: Option<Vec<u8>>,
    mut callback: F,
) -> Result<u64> {
    let mut ctx = ProgressiveContext::open(reader, key)?;
    let total = ctx.header().total_blocks;
    let mut written = 0u64;
    for id in 0..total {
        ctx.seek(id)?;
        let block = ctx.decode_block()?;
        written += block.len() as u64;
        if !callback(&block) {
            break;
        }
    }
    ctx.close();
    Ok(written)
}
