use std::path::PathBuf;

use clap::Parser;
use filecompressor::checksum::{ChecksumKind, DedupHashKind};
use filecompressor::codec::{Algorithm, ALGORITHMS};
use filecompressor::config::{Config, OptimizationGoal};
use filecompressor::dedup::{DedupConfig, DedupMode};
use filecompressor::pipeline::{run, Mode, Request};
use filecompressor::split::MIN_SPLIT_SIZE;
use filecompressor::Error;

#[derive(Parser)]
#[command(
    name = "filecompressor",
    version = "1.0.0",
    about = "Multi-codec file compression engine",
    disable_version_flag = true
)]
struct Cli {
    /// Compress with codec index N (0..7, default 0)
    #[arg(short = 'c', value_name = "N", num_args = 0..=1)]
    compress: Option<Option<u8>>,

    /// Decompress; codec index N, or sniffed from the input when omitted
    #[arg(short = 'd', value_name = "N", num_args = 0..=1)]
    decompress: Option<Option<u8>>,

    /// List available codecs and exit
    #[arg(short = 'a')]
    list_algorithms: bool,

    /// Worker thread count; 0 or below means auto (CPU count)
    #[arg(short = 't', value_name = "N", allow_negative_numbers = true)]
    threads: Option<i64>,

    /// Encryption key
    #[arg(short = 'k', value_name = "KEY")]
    key: Option<String>,

    /// Optimization preset: speed or size
    #[arg(short = 'O', value_name = "PRESET")]
    optimize: Option<String>,

    /// I/O buffer size in bytes (min 1024 recommended)
    #[arg(short = 'B', value_name = "N")]
    buffer_size: Option<usize>,

    /// Large-file path: stream through chunked buffers
    #[arg(short = 'L')]
    large_file: bool,

    /// Integrity checksum kind: 0 none, 1 crc32, 2 md5, 3 sha256
    #[arg(short = 'I', value_name = "N")]
    integrity: Option<u8>,

    /// Progressive block container
    #[arg(short = 'P')]
    progressive: bool,

    /// Partial progressive decode, blocks a through b
    #[arg(short = 'R', value_name = "a-b")]
    range: Option<String>,

    /// Streaming decode via callback (and streaming-optimized layout on
    /// compress)
    #[arg(short = 'S')]
    stream: bool,

    /// Split archive mode
    #[arg(short = 'X')]
    split: bool,

    /// Maximum split-part size in bytes (default 100 MiB, clamped to >= 1 MiB)
    #[arg(short = 'M', value_name = "N")]
    max_part_size: Option<u64>,

    /// Deduplication filter
    #[arg(short = 'D')]
    dedup: bool,

    /// Dedup chunk size in bytes
    #[arg(short = 'C', value_name = "N")]
    dedup_chunk_size: Option<u32>,

    /// Dedup hash: 0 sha1, 1 md5, 2 crc32, 3 xxh64
    #[arg(short = 'H', value_name = "N")]
    dedup_hash: Option<u8>,

    /// Dedup chunking mode: 0 fixed, 1 variable, 2 smart
    #[arg(short = 'V', value_name = "N")]
    dedup_mode: Option<u8>,

    input: Option<PathBuf>,
    output: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = real_main(cli) {
        eprintln!("filecompressor: {e}");
        std::process::exit(1);
    }
}

fn real_main(cli: Cli) -> Result<(), Error> {
    if cli.list_algorithms {
        println!("Available codecs:");
        for algorithm in ALGORITHMS {
            println!(
                "  {}  .{:<6} {}",
                algorithm.index(),
                algorithm.extension(),
                algorithm.describe()
            );
        }
        return Ok(());
    }

    let (mode, algorithm, algorithm_given) = match (cli.compress, cli.decompress) {
        (Some(_), Some(_)) => {
            return Err(Error::invalid_config("-c and -d are mutually exclusive"));
        }
        (Some(idx), None) => {
            let idx = idx.unwrap_or(0);
            let algorithm = Algorithm::from_index(idx)
                .ok_or_else(|| Error::invalid_config(format!("bad codec index {idx}")))?;
            (Mode::Compress, algorithm, true)
        }
        (None, Some(Some(idx))) => {
            let algorithm = Algorithm::from_index(idx)
                .ok_or_else(|| Error::invalid_config(format!("bad codec index {idx}")))?;
            (Mode::Decompress, algorithm, true)
        }
        (None, Some(None)) => (Mode::Decompress, Algorithm::Huffman, false),
        (None, None) => {
            return Err(Error::invalid_config("one of -c or -d is required (see -h)"));
        }
    };

    let input = cli
        .input
        .ok_or_else(|| Error::invalid_config("an input file is required"))?;

    // Environment fallbacks first; explicit flags override.
    let mut config = Config::from_env();
    if let Some(t) = cli.threads {
        config.threads = if t <= 0 { 0 } else { t as usize };
    }
    if let Some(b) = cli.buffer_size {
        config.buffer_size = b;
    }
    if let Some(preset) = &cli.optimize {
        config.goal = OptimizationGoal::from_name(preset)
            .ok_or_else(|| Error::invalid_config(format!("unknown preset '{preset}'")))?;
    }
    if let Some(kind) = cli.integrity {
        config.integrity = ChecksumKind::from_u8(kind)
            .ok_or_else(|| Error::invalid_config(format!("bad checksum kind {kind}")))?;
    }
    config.key = cli.key.map(String::into_bytes);
    for warning in config.normalize()? {
        eprintln!("filecompressor: warning: {warning}");
    }

    let mut dedup_config = DedupConfig::default();
    if let Some(size) = cli.dedup_chunk_size {
        dedup_config.chunk_size = size;
    }
    if let Some(hash) = cli.dedup_hash {
        dedup_config.hash = DedupHashKind::from_u8(hash)
            .ok_or_else(|| Error::invalid_config(format!("bad dedup hash {hash}")))?;
    }
    if let Some(mode) = cli.dedup_mode {
        dedup_config.mode = DedupMode::from_u8(mode)
            .ok_or_else(|| Error::invalid_config(format!("bad dedup mode {mode}")))?;
    }
    if cli.dedup {
        for warning in dedup_config.normalize() {
            eprintln!("filecompressor: warning: {warning}");
        }
    }

    let max_part_size = cli.max_part_size.unwrap_or(filecompressor::split::DEFAULT_MAX_PART_SIZE);
    if cli.split && max_part_size < MIN_SPLIT_SIZE {
        eprintln!(
            "filecompressor: warning: part size {max_part_size} below minimum, clamped to {MIN_SPLIT_SIZE}"
        );
    }

    let mut request = Request::new(mode, input);
    request.algorithm = algorithm;
    request.algorithm_given = algorithm_given;
    request.output = cli.output;
    request.large_file = cli.large_file;
    request.progressive = cli.progressive;
    request.split = cli.split;
    request.dedup = cli.dedup;
    request.stream = cli.stream;
    request.range = cli.range.as_deref().map(parse_range).transpose()?;
    request.max_part_size = max_part_size;
    request.dedup_config = dedup_config;
    request.config = config;

    let report = run(&request)?;

    match mode {
        Mode::Compress => {
            let ratio = if report.input_size > 0 {
                report.output_size as f64 / report.input_size as f64 * 100.0
            } else {
                100.0
            };
            println!(
                "Compressed: {} ({} B) -> {} ({} B, {ratio:.1}%)",
                request.input.display(),
                report.input_size,
                report.output.display(),
                report.output_size,
            );
        }
        Mode::Decompress => {
            println!(
                "Decompressed: {} ({} B) -> {} ({} B)",
                request.input.display(),
                report.input_size,
                report.output.display(),
                report.output_size,
            );
        }
    }
    if let Some(parts) = report.total_parts {
        println!("  parts:  {parts}");
    }
    if let Some(stats) = report.dedup {
        println!(
            "  dedup:  {} chunks, {} unique, {} duplicate ({:.1}% saved)",
            stats.total_chunks,
            stats.unique_chunks,
            stats.duplicate_chunks,
            stats.savings_ratio() * 100.0,
        );
    }
    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn parse_range(s: &str) -> Result<(u32, u32), Error> {
    let (a, b) = s
        .split_once('-')
        .ok_or_else(|| Error::invalid_config(format!("bad block range '{s}' (expected a-b)")))?;
    let parse = |v: &str| {
        v.trim()
            .parse::<u32>()
            .map_err(|_| Error::invalid_config(format!("bad block range '{s}' (expected a-b)")))
    };
    let (start, end) = (parse(a)?, parse(b)?);
    if start > end {
        return Err(Error::invalid_config(format!("bad block range '{s}' (start after end)")));
    }
    Ok((start, end))
}
