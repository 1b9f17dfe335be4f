//! Worker-pool driver — run any primitive codec over independent chunks.
//!
//! # Wrapper layout (little-endian)
//!
//! ```text
//! thread_count    i32   number of chunks that follow
//! per chunk:
//!   chunk_size    i64   compressed byte count
//!   chunk_bytes   …     the primitive codec's whole-buffer output
//! ```
//!
//! Chunks are contiguous slices of the input, all equal-sized except the
//! last.  Workers never share state: each owns its slice and its output
//! buffer, and results are reassembled by index, so the output order always
//! equals the input order no matter how the pool schedules.
//!
//! Failure: the first failing chunk (in chunk order) aborts the job as
//! `Worker { thread_id, .. }`; other failures are dropped.

use byteorder::{ByteOrder, LittleEndian};
use rayon::prelude::*;

use crate::codec::Codec;
use crate::error::{Error, Result};

/// Hard cap on worker threads.
pub const MAX_THREADS: usize = 64;

/// Inputs smaller than this per thread are not worth splitting.
const MIN_BYTES_PER_CHUNK: u64 = 1024;

/// Sanity bound when parsing a wrapper; a count beyond this is corruption,
/// not a job we ever wrote.
const MAX_CHUNKS: i32 = 1 << 20;

/// Resolve a requested thread count: 0 means auto (logical cores), and
/// everything is clamped to `1..=MAX_THREADS`.
pub fn resolve_thread_count(requested: usize) -> usize {
    if requested == 0 {
        num_cpus::get().clamp(1, MAX_THREADS)
    } else {
        requested.clamp(1, MAX_THREADS)
    }
}

/// How many chunks an input of `file_size` bytes splits into for `threads`
/// workers: one chunk when the input is too small to be worth splitting,
/// otherwise at most one chunk per KiB.
fn chunk_count(file_size: u64, threads: usize) -> usize {
    if file_size < MIN_BYTES_PER_CHUNK * threads as u64 {
        1
    } else {
        threads.min((file_size / MIN_BYTES_PER_CHUNK) as usize).max(1)
    }
}

fn build_pool(threads: usize) -> Result<rayon::ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .map_err(|e| Error::invalid_config(format!("cannot build worker pool: {e}")))
}

/// Surface the first failure in chunk order as a `Worker` error.
fn first_failure<T>(results: Vec<std::result::Result<T, Error>>) -> Result<Vec<T>> {
    let mut out = Vec::with_capacity(results.len());
    for (thread_id, r) in results.into_iter().enumerate() {
        match r {
            Ok(v) => out.push(v),
            Err(e) => return Err(Error::Worker { thread_id, source: Box::new(e) }),
        }
    }
    Ok(out)
}

// ── Compression ──────────────────────────────────────────────────────────────

pub fn compress(input: &[u8], codec: &dyn Codec, requested_threads: usize) -> Result<Vec<u8>> {
    let threads = resolve_thread_count(requested_threads);
    let n = chunk_count(input.len() as u64, threads);

    // Equal-size partition; the last chunk absorbs the remainder.
    let base = input.len() / n;
    let chunks: Vec<&[u8]> = (0..n)
        .map(|i| {
            let start = i * base;
            let end = if i + 1 == n { input.len() } else { start + base };
            &input[start..end]
        })
        .collect();

    let pool = build_pool(threads)?;
    let results: Vec<Result<Vec<u8>>> =
        pool.install(|| chunks.par_iter().map(|chunk| codec.compress(chunk)).collect());
    let compressed = first_failure(results)?;

    let total: usize = compressed.iter().map(|c| c.len() + 8).sum();
    let mut out = Vec::with_capacity(4 + total);
    let mut count = [0u8; 4];
    LittleEndian::write_i32(&mut count, n as i32);
    out.extend_from_slice(&count);
    for chunk in &compressed {
        let mut size = [0u8; 8];
        LittleEndian::write_i64(&mut size, chunk.len() as i64);
        out.extend_from_slice(&size);
        out.extend_from_slice(chunk);
    }
    Ok(out)
}

// ── Decompression ────────────────────────────────────────────────────────────

pub fn decompress(input: &[u8], codec: &dyn Codec, requested_threads: usize) -> Result<Vec<u8>> {
    if input.len() < 4 {
        return Err(Error::corrupt("parallel wrapper too short"));
    }
    let n = LittleEndian::read_i32(&input[..4]);
    if n < 1 || n > MAX_CHUNKS {
        return Err(Error::corrupt("parallel wrapper chunk count out of range"));
    }

    // Walk the size records first so each worker gets an exact slice.
    let mut slices = Vec::with_capacity(n as usize);
    let mut pos = 4usize;
    for _ in 0..n {
        if pos + 8 > input.len() {
            return Err(Error::corrupt("parallel wrapper truncated"));
        }
        let size = LittleEndian::read_i64(&input[pos..pos + 8]);
        pos += 8;
        let size = usize::try_from(size)
            .map_err(|_| Error::corrupt("parallel wrapper negative chunk size"))?;
        if pos + size > input.len() {
            return Err(Error::corrupt("parallel wrapper truncated"));
        }
        slices.push(&input[pos..pos + size]);
        pos += size;
    }
    if pos != input.len() {
        return Err(Error::corrupt("parallel wrapper has trailing bytes"));
    }

    let threads = resolve_thread_count(requested_threads);
    let pool = build_pool(threads)?;
    let results: Vec<Result<Vec<u8>>> =
        pool.install(|| slices.par_iter().map(|chunk| codec.decompress(chunk)).collect());
    let decoded = first_failure(results)?;

    let mut out = Vec::with_capacity(decoded.iter().map(Vec::len).sum());
    for chunk in decoded {
        out.extend_from_slice(&chunk);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{HuffmanCodec, RleCodec};

    #[test]
    fn thread_count_resolution() {
        assert!(resolve_thread_count(0) >= 1);
        assert!(resolve_thread_count(0) <= MAX_THREADS);
        assert_eq!(resolve_thread_count(1), 1);
        assert_eq!(resolve_thread_count(500), MAX_THREADS);
    }

    #[test]
    fn small_inputs_stay_single_chunk() {
        assert_eq!(chunk_count(100, 8), 1);
        assert_eq!(chunk_count(8 * 1024 - 1, 8), 1);
        assert_eq!(chunk_count(8 * 1024, 8), 8);
        assert_eq!(chunk_count(1 << 20, 4), 4);
    }

    #[test]
    fn wrapper_roundtrip_and_chunk_count_field() {
        let data: Vec<u8> = (0..64 * 1024u32).map(|i| (i * 31 % 251) as u8).collect();
        let codec = HuffmanCodec::new(256);
        let packed = compress(&data, &codec, 4).unwrap();
        assert_eq!(&packed[..4], &[0x04, 0x00, 0x00, 0x00]);
        assert_eq!(decompress(&packed, &codec, 4).unwrap(), data);
    }

    #[test]
    fn decoded_output_independent_of_thread_count() {
        let data: Vec<u8> = b"deterministic across schedulers "
            .iter()
            .cycle()
            .take(128 * 1024)
            .copied()
            .collect();
        let codec = RleCodec;
        for t in [1usize, 2, 3, 8] {
            let packed = compress(&data, &codec, t).unwrap();
            for dt in [1usize, 4] {
                assert_eq!(decompress(&packed, &codec, dt).unwrap(), data, "t={t} dt={dt}");
            }
        }
    }

    #[test]
    fn empty_input_roundtrips_as_one_chunk() {
        let codec = RleCodec;
        let packed = compress(b"", &codec, 8).unwrap();
        assert_eq!(&packed[..4], &[0x01, 0x00, 0x00, 0x00]);
        assert_eq!(decompress(&packed, &codec, 8).unwrap(), b"");
    }

    #[test]
    fn corrupt_chunk_surfaces_worker_error() {
        let data = vec![42u8; 8 * 1024];
        let codec = RleCodec;
        let mut packed = compress(&data, &codec, 2).unwrap();
        // Damage the first chunk's RLE size header.
        let n = packed.len();
        packed[12] ^= 0xFF;
        assert!(n > 12);
        let err = decompress(&packed, &codec, 2).unwrap_err();
        assert!(matches!(err, Error::Worker { .. } | Error::Corrupt { .. }));
    }

    #[test]
    fn truncated_wrapper_is_corrupt() {
        let data = vec![7u8; 4096];
        let packed = compress(&data, &RleCodec, 1).unwrap();
        let err = decompress(&packed[..packed.len() - 3], &RleCodec, 1).unwrap_err();
        assert!(matches!(err, Error::Corrupt { .. }));
    }
}
