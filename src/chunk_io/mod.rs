//! Chunked file I/O — buffered sequential reader/writer with an optional
//! framed variant that wraps every chunk in a checksum record.
//!
//! # Framed record layout (all fields little-endian)
//!
//! ```text
//! Offset  Size  Field
//!    0      4   tag          ChecksumKind as u32
//!    4      W   checksum     payload, W = kind.payload_len()
//!  4+W      4   data_len
//!  8+W      N   data
//! ```
//!
//! The framed reader verifies the checksum after reading `data_len` bytes
//! and *reports* a mismatch without repairing it — whether to abort is the
//! caller's decision.

use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::checksum::{Checksum, ChecksumKind};
use crate::error::{Error, Result};

/// Hard ceiling on a single framed record's data length; anything above
/// this is treated as stream corruption rather than attempted allocation.
const MAX_FRAMED_CHUNK: u32 = 256 * 1024 * 1024;

// ── Reader ───────────────────────────────────────────────────────────────────

/// Sequential reader that hands out chunks of at most `chunk_size` bytes.
#[derive(Debug)]
pub struct ChunkReader {
    inner: BufReader<File>,
    chunk_size: usize,
    file_size: u64,
    position: u64,
    eos: bool,
}

impl ChunkReader {
    pub fn open<P: AsRef<Path>>(path: P, chunk_size: usize) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| Error::open(path, e))?;
        let file_size = file.metadata().map_err(|e| Error::open(path, e))?.len();
        Ok(Self {
            inner: BufReader::new(file),
            chunk_size: chunk_size.max(1),
            file_size,
            position: 0,
            eos: false,
        })
    }

    #[inline]
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    #[inline]
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Next chunk of up to `chunk_size` bytes, or `None` at end of stream.
    /// Idempotent after the end-of-stream marker has been returned.
    pub fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        if self.eos {
            return Ok(None);
        }
        let mut buf = vec![0u8; self.chunk_size];
        let mut filled = 0usize;
        while filled < buf.len() {
            match self.inner.read(&mut buf[filled..]).map_err(Error::Read)? {
                0 => break,
                n => filled += n,
            }
        }
        if filled == 0 {
            self.eos = true;
            return Ok(None);
        }
        buf.truncate(filled);
        self.position += filled as u64;
        Ok(Some(buf))
    }
}

// ── Writer ───────────────────────────────────────────────────────────────────

/// Buffered writer that flushes whenever the internal buffer exceeds
/// `chunk_size`.  `close()` flushes the remainder; dropping without closing
/// flushes on a best-effort basis.
pub struct ChunkWriter {
    inner: Option<File>,
    buf: Vec<u8>,
    chunk_size: usize,
    bytes_written: u64,
}

impl ChunkWriter {
    pub fn open<P: AsRef<Path>>(path: P, chunk_size: usize) -> Result<Self> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|e| Error::open(path, e))?;
        let chunk_size = chunk_size.max(1);
        Ok(Self {
            inner: Some(file),
            buf: Vec::with_capacity(chunk_size),
            chunk_size,
            bytes_written: 0,
        })
    }

    #[inline]
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        self.buf.extend_from_slice(data);
        self.bytes_written += data.len() as u64;
        if self.buf.len() >= self.chunk_size {
            self.flush_buf()?;
        }
        Ok(())
    }

    fn flush_buf(&mut self) -> Result<()> {
        if !self.buf.is_empty() {
            let file = self.inner.as_mut().expect("writer already closed");
            file.write_all(&self.buf).map_err(Error::Write)?;
            self.buf.clear();
        }
        Ok(())
    }

    pub fn close(&mut self) -> Result<()> {
        self.flush_buf()?;
        if let Some(file) = self.inner.take() {
            drop(file);
        }
        Ok(())
    }
}

impl Drop for ChunkWriter {
    fn drop(&mut self) {
        let _ = self.flush_buf();
    }
}

// ── Framed variant ───────────────────────────────────────────────────────────

/// One record read back from a framed stream.
#[derive(Debug)]
pub struct FramedChunk {
    pub data: Vec<u8>,
    /// `None` when the stream carries no checksum, otherwise whether the
    /// stored checksum matched the data.
    pub verified: Option<bool>,
}

/// Writer emitting one checksum record per `write` call.
pub struct FramedChunkWriter {
    inner: ChunkWriter,
    kind: ChecksumKind,
}

impl FramedChunkWriter {
    pub fn open<P: AsRef<Path>>(path: P, chunk_size: usize, kind: ChecksumKind) -> Result<Self> {
        Ok(Self { inner: ChunkWriter::open(path, chunk_size)?, kind })
    }

    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        let mut record = Vec::with_capacity(8 + self.kind.payload_len() + data.len());
        record
            .write_u32::<LittleEndian>(self.kind as u32)
            .map_err(Error::Write)?;
        Checksum::compute(self.kind, data).write_payload(&mut record)?;
        record
            .write_u32::<LittleEndian>(data.len() as u32)
            .map_err(Error::Write)?;
        record.extend_from_slice(data);
        self.inner.write(&record)
    }

    pub fn close(&mut self) -> Result<()> {
        self.inner.close()
    }
}

/// Reader for streams produced by [`FramedChunkWriter`].
pub struct FramedChunkReader {
    inner: BufReader<File>,
    eos: bool,
}

impl FramedChunkReader {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| Error::open(path, e))?;
        Ok(Self { inner: BufReader::new(file), eos: false })
    }

    /// Read the next record, or `None` at a clean end of stream.  A record
    /// cut off mid-way is `Corrupt`; a checksum mismatch is reported via
    /// `verified`, not as an error.
    pub fn next_chunk(&mut self) -> Result<Option<FramedChunk>> {
        if self.eos {
            return Ok(None);
        }
        let tag = match self.inner.read_u32::<LittleEndian>() {
            Ok(v) => v,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                self.eos = true;
                return Ok(None);
            }
            Err(e) => return Err(Error::Read(e)),
        };
        let kind = u8::try_from(tag)
            .ok()
            .and_then(ChecksumKind::from_u8)
            .ok_or(Error::corrupt("unknown checksum tag in framed chunk"))?;
        let stored = Checksum::read_payload(kind, &mut self.inner)
            .map_err(|_| Error::corrupt("truncated framed chunk checksum"))?;
        let data_len = self
            .inner
            .read_u32::<LittleEndian>()
            .map_err(|_| Error::corrupt("truncated framed chunk length"))?;
        if data_len > MAX_FRAMED_CHUNK {
            return Err(Error::corrupt("framed chunk length out of range"));
        }
        let mut data = vec![0u8; data_len as usize];
        self.inner
            .read_exact(&mut data)
            .map_err(|_| Error::corrupt("truncated framed chunk data"))?;

        let verified = match kind {
            ChecksumKind::None => None,
            _ => Some(stored.verify(&data)),
        };
        Ok(Some(FramedChunk { data, verified }))
    }
}
