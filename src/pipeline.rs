//! Orchestrator — resolve a [`Request`] into a stage chain and drive it.
//!
//! Compression assembles, in order:
//! `source → [dedup] → [codec | parallel driver] → [encryption] →
//! [progressive | split | raw] → sink`, and decompression inverts the
//! chain.  Stage presence comes from the request flags; when a
//! decompression request leaves them unset, the input's magic bytes
//! (`PROG`, `SPLT` part files, `DEDUP`, `ENCRYPTED`) and extension decide.
//!
//! All stage hand-offs are in-memory buffers — no stage ever bridges to
//! the next through a temporary file.  The large-file path (`-L`) instead
//! streams a single raw codec through the chunked I/O layer.
//!
//! Failure cleanup: any output files already created by a failed job are
//! removed on a best-effort basis before the error is surfaced.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::chunk_io::{ChunkReader, ChunkWriter};
use crate::codec::huffman::{DecodeProgress, HuffmanDecoder, HuffmanEncoder};
use crate::codec::lz77::{Lz77Decoder, Lz77Encoder};
use crate::codec::rle::{RleDecoder, RleEncoder};
use crate::codec::{get_codec, Algorithm, CodecKind};
use crate::config::Config;
use crate::crypto;
use crate::dedup::{self, DedupConfig, DedupStats};
use crate::error::{Error, Result};
use crate::parallel;
use crate::progressive::{self, ProgressiveOptions, PROGRESSIVE_MAGIC};
use crate::split;

// ── Request ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Compress,
    Decompress,
}

/// Everything one job needs; the CLI builds this and nothing else.
#[derive(Debug, Clone)]
pub struct Request {
    pub mode: Mode,
    pub algorithm: Algorithm,
    /// False when the caller left the codec index to extension sniffing.
    pub algorithm_given: bool,
    pub input: PathBuf,
    pub output: Option<PathBuf>,
    pub large_file: bool,
    pub progressive: bool,
    pub split: bool,
    pub dedup: bool,
    pub stream: bool,
    /// Progressive block range for partial decompression.
    pub range: Option<(u32, u32)>,
    pub max_part_size: u64,
    pub dedup_config: DedupConfig,
    pub config: Config,
}

impl Request {
    pub fn new(mode: Mode, input: PathBuf) -> Self {
        Self {
            mode,
            algorithm: Algorithm::Huffman,
            algorithm_given: false,
            input,
            output: None,
            large_file: false,
            progressive: false,
            split: false,
            dedup: false,
            stream: false,
            range: None,
            max_part_size: split::DEFAULT_MAX_PART_SIZE,
            dedup_config: DedupConfig::default(),
            config: Config::default(),
        }
    }
}

/// What a finished job tells the caller.
#[derive(Debug, Clone)]
pub struct JobReport {
    pub output: PathBuf,
    pub input_size: u64,
    pub output_size: u64,
    pub total_parts: Option<u32>,
    pub dedup: Option<DedupStats>,
}

pub fn run(request: &Request) -> Result<JobReport> {
    match request.mode {
        Mode::Compress => compress(request),
        Mode::Decompress => decompress(request),
    }
}

// ── Compression ──────────────────────────────────────────────────────────────

fn compress(req: &Request) -> Result<JobReport> {
    let progressive = req.progressive || req.algorithm.is_progressive();
    let output = req
        .output
        .clone()
        .unwrap_or_else(|| default_compress_output(&req.input, req.algorithm, progressive));

    let result = compress_inner(req, progressive, &output);
    if result.is_err() {
        remove_outputs(&output, req.split);
    }
    result
}

fn compress_inner(req: &Request, progressive: bool, output: &Path) -> Result<JobReport> {
    let cfg = &req.config;
    let tuning = cfg.tuning();
    let kind = req.algorithm.primitive();

    if req.algorithm.is_encrypted() && cfg.key.is_none() {
        return Err(Error::invalid_config("this algorithm requires an encryption key (-k)"));
    }
    if req.split && cfg.key.is_some() {
        return Err(Error::invalid_config("split archives do not support encryption"));
    }

    let input_size = file_size(&req.input)?;

    // Large-file streaming path: a single raw codec over chunked I/O.
    if req.large_file
        && !progressive
        && !req.split
        && !req.dedup
        && !req.algorithm.is_parallel()
        && cfg.key.is_none()
    {
        compress_streaming(&req.input, output, kind, cfg)?;
        return Ok(JobReport {
            output: output.to_path_buf(),
            input_size,
            output_size: file_size(output)?,
            total_parts: None,
            dedup: None,
        });
    }

    // Split without a preceding dedup stage streams straight from disk.
    if req.split && !req.dedup {
        let codec = get_codec(kind, &tuning);
        let report = split::compress_file(
            &req.input,
            output,
            codec.as_ref(),
            req.max_part_size,
            cfg.integrity,
            cfg.buffer_size,
        )?;
        return Ok(JobReport {
            output: output.to_path_buf(),
            input_size,
            output_size: split_output_size(output, report.total_parts)?,
            total_parts: Some(report.total_parts),
            dedup: None,
        });
    }

    let mut data = crate::read_file(&req.input)?;
    let mut dedup_stats = None;
    if req.dedup {
        let mut dc = req.dedup_config.clone();
        dc.normalize();
        let (encoded, stats) = dedup::encode(&data, &dc)?;
        data = encoded;
        dedup_stats = Some(stats);
    }

    let (output_size, total_parts) = if progressive {
        let opts = ProgressiveOptions {
            codec: kind,
            block_size: progressive::DEFAULT_BLOCK_SIZE,
            checksum: cfg.integrity,
            streaming_optimized: req.stream,
            key: cfg.key.clone(),
        };
        let sink = File::create(output).map_err(|e| Error::open(output, e))?;
        progressive::compress(&data, sink, &opts, &tuning)?;
        (file_size(output)?, None)
    } else if req.split {
        let codec = get_codec(kind, &tuning);
        let report =
            split::compress_buffer(&data, output, codec.as_ref(), req.max_part_size, cfg.integrity)?;
        (split_output_size(output, report.total_parts)?, Some(report.total_parts))
    } else {
        let codec = get_codec(kind, &tuning);
        let mut bytes = if req.algorithm.is_parallel() {
            parallel::compress(&data, codec.as_ref(), cfg.threads)?
        } else {
            codec.compress(&data)?
        };
        if let Some(key) = &cfg.key {
            bytes = crypto::encrypt(key, &bytes)?;
        }
        crate::write_file(output, &bytes)?;
        (bytes.len() as u64, None)
    };

    Ok(JobReport {
        output: output.to_path_buf(),
        input_size,
        output_size,
        total_parts,
        dedup: dedup_stats,
    })
}

// ── Decompression ────────────────────────────────────────────────────────────

fn decompress(req: &Request) -> Result<JobReport> {
    let cfg = &req.config;
    let tuning = cfg.tuning();

    // Split detection: explicit flag, a .partNNNN input, or part 1 nearby.
    let split_base = if req.split {
        Some(split::base_from_part_path(&req.input).unwrap_or_else(|| req.input.clone()))
    } else if let Some(base) = split::base_from_part_path(&req.input) {
        Some(base)
    } else if split::part_path(&req.input, 1).exists() {
        Some(req.input.clone())
    } else {
        None
    };

    let sniff_source = split_base.as_deref().unwrap_or(&req.input);
    let algorithm = resolve_algorithm(req, sniff_source)?;
    let output = req
        .output
        .clone()
        .unwrap_or_else(|| default_decompress_output(sniff_source, algorithm));

    let result = decompress_inner(req, algorithm, split_base.as_deref(), &output, &tuning);
    if result.is_err() {
        let _ = std::fs::remove_file(&output);
    }
    result.map(|(input_size, total_parts)| JobReport {
        output: output.clone(),
        input_size,
        output_size: file_size(&output).unwrap_or(0),
        total_parts,
        dedup: None,
    })
}

fn decompress_inner(
    req: &Request,
    algorithm: Algorithm,
    split_base: Option<&Path>,
    output: &Path,
    tuning: &crate::config::Tuning,
) -> Result<(u64, Option<u32>)> {
    let cfg = &req.config;

    if let Some(base) = split_base {
        let codec = get_codec(algorithm.primitive(), tuning);
        split::decompress_file(base, output, codec.as_ref())?;
        unwrap_dedup_layer(output, req.dedup)?;
        let input_size = split_input_size(base);
        let parts = split::SplitPartHeader::read(
            File::open(split::part_path(base, 1))
                .map_err(|_| Error::MissingPart(1))?,
        )?
        .total_parts;
        return Ok((input_size, Some(parts)));
    }

    let input_size = file_size(&req.input)?;
    let progressive =
        req.progressive || algorithm.is_progressive() || has_magic(&req.input, PROGRESSIVE_MAGIC)?;

    if progressive {
        let source = File::open(&req.input).map_err(|e| Error::open(&req.input, e))?;
        let mut sink = File::create(output).map_err(|e| Error::open(output, e))?;
        match req.range {
            Some((start, end)) => {
                progressive::decompress_range(source, start, end, &mut sink, cfg.key.clone())?;
                // A block range is a fragment; any dedup layer underneath
                // cannot be resolved from it.
            }
            None if req.stream => {
                let mut write_err = None;
                progressive::decompress_stream(source, cfg.key.clone(), |block| {
                    match sink.write_all(block) {
                        Ok(()) => true,
                        Err(e) => {
                            write_err = Some(e);
                            false
                        }
                    }
                })?;
                if let Some(e) = write_err {
                    return Err(Error::Write(e));
                }
                unwrap_dedup_layer(output, req.dedup)?;
            }
            None => {
                progressive::decompress_full(source, &mut sink, cfg.key.clone())?;
                unwrap_dedup_layer(output, req.dedup)?;
            }
        }
        return Ok((input_size, None));
    }

    // Large-file streaming path mirrors the streaming compressor.
    if req.large_file
        && !req.dedup
        && !algorithm.is_parallel()
        && cfg.key.is_none()
        && !has_magic(&req.input, crypto::ENCRYPTION_MAGIC)?
    {
        decompress_streaming(&req.input, output, algorithm.primitive(), cfg)?;
        return Ok((input_size, None));
    }

    let mut bytes = crate::read_file(&req.input)?;
    if crypto::is_encrypted(&bytes) {
        let key = cfg
            .key
            .as_ref()
            .ok_or_else(|| Error::invalid_config("input is encrypted; a key (-k) is required"))?;
        bytes = crypto::decrypt(key, &bytes)?;
    }

    let codec = get_codec(algorithm.primitive(), tuning);
    let mut plain = if algorithm.is_parallel() {
        parallel::decompress(&bytes, codec.as_ref(), cfg.threads)?
    } else {
        codec.decompress(&bytes)?
    };
    if req.dedup || dedup::is_dedup_stream(&plain) {
        plain = dedup::decode(&plain)?;
    }
    crate::write_file(output, &plain)?;
    Ok((input_size, None))
}

/// Rewrite `path` through the dedup decoder when it holds a dedup stream.
/// An explicit `-D` on input that is not a dedup stream is an error; a
/// sniffed layer is decoded opportunistically.
fn unwrap_dedup_layer(path: &Path, explicit: bool) -> Result<()> {
    let bytes = crate::read_file(path)?;
    if dedup::is_dedup_stream(&bytes) {
        let plain = dedup::decode(&bytes)?;
        crate::write_file(path, &plain)?;
    } else if explicit {
        return Err(Error::BadFormat { expected: "DEDUP" });
    }
    Ok(())
}

// ── Resolution helpers ───────────────────────────────────────────────────────

fn resolve_algorithm(req: &Request, source: &Path) -> Result<Algorithm> {
    if req.algorithm_given {
        return Ok(req.algorithm);
    }
    if let Some(ext) = source.extension().and_then(|e| e.to_str()) {
        if let Some(algorithm) = Algorithm::from_extension(ext) {
            return Ok(algorithm);
        }
    }
    if source.exists() && has_magic(source, PROGRESSIVE_MAGIC)? {
        return Ok(Algorithm::Progressive);
    }
    // Extension hints exhausted; fall back to the default codec index.
    Ok(req.algorithm)
}

fn default_compress_output(input: &Path, algorithm: Algorithm, progressive: bool) -> PathBuf {
    let ext = if progressive { Algorithm::Progressive.extension() } else { algorithm.extension() };
    let mut name = input.as_os_str().to_owned();
    name.push(format!(".{ext}"));
    PathBuf::from(name)
}

fn default_decompress_output(source: &Path, algorithm: Algorithm) -> PathBuf {
    match source.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext == algorithm.extension() => source.with_extension(""),
        _ => {
            let mut name = source.as_os_str().to_owned();
            name.push(".out");
            PathBuf::from(name)
        }
    }
}

fn has_magic(path: &Path, magic: &[u8]) -> Result<bool> {
    use std::io::Read;
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(e) => return Err(Error::open(path, e)),
    };
    let mut buf = vec![0u8; magic.len()];
    match file.read_exact(&mut buf) {
        Ok(()) => Ok(buf == magic),
        Err(_) => Ok(false), // shorter than the magic — cannot match
    }
}

fn file_size(path: &Path) -> Result<u64> {
    std::fs::metadata(path).map(|m| m.len()).map_err(|e| Error::open(path, e))
}

fn split_output_size(base: &Path, parts: u32) -> Result<u64> {
    let mut total = 0u64;
    for p in 1..=parts {
        total += file_size(&split::part_path(base, p))?;
    }
    Ok(total)
}

fn split_input_size(base: &Path) -> u64 {
    let mut total = 0u64;
    let mut p = 1u32;
    while let Ok(meta) = std::fs::metadata(split::part_path(base, p)) {
        total += meta.len();
        p += 1;
    }
    total
}

fn remove_outputs(output: &Path, is_split: bool) {
    if is_split {
        let mut p = 1u32;
        while std::fs::remove_file(split::part_path(output, p)).is_ok() {
            p += 1;
        }
    } else {
        let _ = std::fs::remove_file(output);
    }
}

// ── Large-file streaming paths ───────────────────────────────────────────────

fn compress_streaming(input: &Path, output: &Path, kind: CodecKind, cfg: &Config) -> Result<()> {
    let tuning = cfg.tuning();
    let buffer = cfg.buffer_size;
    let mut writer = ChunkWriter::open(output, buffer)?;

    match kind {
        CodecKind::Huffman => {
            // Pass 1: frequencies.
            let mut enc = HuffmanEncoder::new(tuning.huffman_depth_limit);
            let mut reader = ChunkReader::open(input, buffer)?;
            while let Some(chunk) = reader.next_chunk()? {
                enc.count_frequencies(&chunk);
            }
            enc.build()?;
            writer.write(&enc.stream_header()?)?;
            // Pass 2: codes.
            let mut reader = ChunkReader::open(input, buffer)?;
            let mut out = Vec::new();
            while let Some(chunk) = reader.next_chunk()? {
                enc.compress_chunk(&chunk, &mut out)?;
                writer.write(&out)?;
                out.clear();
            }
            enc.finalize(&mut out);
            writer.write(&out)?;
        }
        CodecKind::Rle => {
            let mut reader = ChunkReader::open(input, buffer)?;
            writer.write(&RleEncoder::stream_header(reader.file_size()))?;
            let mut enc = RleEncoder::new();
            let mut out = Vec::new();
            while let Some(chunk) = reader.next_chunk()? {
                enc.compress_chunk(&chunk, &mut out);
                writer.write(&out)?;
                out.clear();
            }
            enc.finalize(&mut out);
            writer.write(&out)?;
        }
        CodecKind::Lz77 => {
            let mut reader = ChunkReader::open(input, buffer)?;
            writer.write(&Lz77Encoder::stream_header(reader.file_size()))?;
            let mut enc = Lz77Encoder::new(tuning.lz77);
            let mut out = Vec::new();
            while let Some(chunk) = reader.next_chunk()? {
                enc.compress_chunk(&chunk, &mut out);
                writer.write(&out)?;
                out.clear();
            }
        }
    }
    writer.close()
}

fn decompress_streaming(input: &Path, output: &Path, kind: CodecKind, cfg: &Config) -> Result<()> {
    let buffer = cfg.buffer_size;
    let mut reader = ChunkReader::open(input, buffer)?;
    let mut writer = ChunkWriter::open(output, buffer)?;

    // The first chunk always covers the stream header: the buffer floor
    // (1 KiB) exceeds the largest possible header, a Huffman size field
    // plus a full 256-symbol tree.
    let first = reader.next_chunk()?.unwrap_or_default();

    match kind {
        CodecKind::Huffman => {
            let (mut dec, consumed) = HuffmanDecoder::from_stream(&first)?;
            let mut out = vec![0u8; buffer];
            let mut chunk = first;
            let mut offset = consumed;
            loop {
                let (read, written, progress) = dec.decode_chunk(&chunk[offset..], &mut out)?;
                offset += read;
                writer.write(&out[..written])?;
                match progress {
                    DecodeProgress::Finished => break,
                    DecodeProgress::OutputFull => {}
                    DecodeProgress::InputExhausted => match reader.next_chunk()? {
                        Some(next) => {
                            chunk = next;
                            offset = 0;
                        }
                        None => return Err(Error::corrupt("huffman stream truncated")),
                    },
                }
            }
        }
        CodecKind::Rle => {
            let (mut dec, consumed) = RleDecoder::from_stream(&first)?;
            let mut out = Vec::new();
            dec.decode_chunk(&first[consumed..], &mut out)?;
            writer.write(&out)?;
            while let Some(chunk) = reader.next_chunk()? {
                out.clear();
                dec.decode_chunk(&chunk, &mut out)?;
                writer.write(&out)?;
            }
            dec.finish()?;
        }
        CodecKind::Lz77 => {
            let (mut dec, consumed) = Lz77Decoder::from_stream(&first)?;
            let mut out = Vec::new();
            dec.decode_chunk(&first[consumed..], &mut out)?;
            writer.write(&out)?;
            while let Some(chunk) = reader.next_chunk()? {
                out.clear();
                dec.decode_chunk(&chunk, &mut out)?;
                writer.write(&out)?;
            }
            dec.finish()?;
        }
    }
    writer.close()
}
