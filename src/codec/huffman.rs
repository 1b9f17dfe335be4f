//! Huffman codec — arena-indexed tree, two-pass streaming contexts.
//!
//! # On-disk layout
//!
//! ```text
//! original_size   u64 LE
//! tree            pre-order: 0x00 = internal (left subtree, right subtree),
//!                 0x01 = leaf, followed by the symbol byte
//! code stream     MSB-first bit-packed codes, final byte zero-padded
//! ```
//!
//! An empty input serializes as the 8-byte size header alone — no tree, no
//! code stream.
//!
//! # Tree construction
//! Nodes live in an arena (`Vec<Node>`) and reference children by `u32`
//! index, so the tree is plainly cloneable across worker threads and owns
//! nothing beyond the arena.  The build repeatedly extracts the two
//! lowest-frequency nodes from a min-heap ordered by `(frequency,
//! insertion sequence)`, with leaves seeded in ascending byte order; the
//! first-extracted node becomes the **left** child.  That ordering is what
//! makes the output deterministic: for two equal-frequency symbols the
//! smaller byte codes as `0`.
//!
//! A single-distinct-byte input degenerates to a root whose left and right
//! both point at the one leaf, giving that symbol the one-bit code `0`.
//!
//! # Depth cap
//! Code lengths are capped by the configured limit (`Tuning`): a leaf
//! deeper than the cap receives the code equal to its DFS path truncated
//! at the cap.  Streams written under a cap that actually truncated are
//! not prefix-free; the cap exists to bound worst-case code length and the
//! default of 256 never truncates a 256-symbol alphabet.

use std::collections::BinaryHeap;
use std::cmp::Reverse;

use byteorder::{ByteOrder, LittleEndian};

use super::{Codec, CodecKind};
use crate::error::{Error, Result};

/// Alphabet size; frequency and code tables are indexed by byte value.
pub const SYMBOL_COUNT: usize = 256;

/// Upper bound accepted when deserializing a tree.  A valid tree over 256
/// symbols holds at most 511 nodes; anything larger is corruption.
const MAX_TREE_NODES: usize = 2 * SYMBOL_COUNT;

const SIZE_HEADER_LEN: usize = 8;

// ── Tree arena ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
enum Node {
    Leaf(u8),
    Internal { left: u32, right: u32 },
}

/// Huffman tree backed by an index arena; lifetime equals one job.
#[derive(Debug, Clone)]
pub struct Tree {
    nodes: Vec<Node>,
    root: u32,
}

impl Tree {
    /// Build from a frequency table.  Returns `None` when no symbol has a
    /// nonzero frequency (empty input).
    pub fn build(freqs: &[u64; SYMBOL_COUNT]) -> Option<Self> {
        let mut nodes = Vec::new();
        // (frequency, insertion sequence, node index) — min-heap via Reverse.
        let mut heap: BinaryHeap<Reverse<(u64, u32, u32)>> = BinaryHeap::new();
        let mut seq = 0u32;

        for (byte, &freq) in freqs.iter().enumerate() {
            if freq > 0 {
                let idx = nodes.len() as u32;
                nodes.push(Node::Leaf(byte as u8));
                heap.push(Reverse((freq, seq, idx)));
                seq += 1;
            }
        }

        let Reverse((first_freq, _, first_idx)) = heap.pop()?;

        if heap.is_empty() {
            // Degenerate single-symbol tree: one internal node over the leaf.
            let root = nodes.len() as u32;
            nodes.push(Node::Internal { left: first_idx, right: first_idx });
            return Some(Tree { nodes, root });
        }

        // Re-seed and merge until one node remains.
        heap.push(Reverse((first_freq, 0, first_idx)));
        while heap.len() > 1 {
            let Reverse((fa, _, a)) = heap.pop().expect("heap len checked");
            let Reverse((fb, _, b)) = heap.pop().expect("heap len checked");
            let idx = nodes.len() as u32;
            // First-extracted node goes left.
            nodes.push(Node::Internal { left: a, right: b });
            heap.push(Reverse((fa + fb, seq, idx)));
            seq += 1;
        }
        let Reverse((_, _, root)) = heap.pop().expect("one node remains");
        Some(Tree { nodes, root })
    }

    /// Pre-order serialization: `0x00 left right` / `0x01 byte`.
    pub fn serialize(&self, out: &mut Vec<u8>) {
        self.serialize_node(self.root, out);
    }

    fn serialize_node(&self, idx: u32, out: &mut Vec<u8>) {
        match self.nodes[idx as usize] {
            Node::Leaf(byte) => {
                out.push(0x01);
                out.push(byte);
            }
            Node::Internal { left, right } => {
                out.push(0x00);
                self.serialize_node(left, out);
                self.serialize_node(right, out);
            }
        }
    }

    /// Rebuild a tree from its serialized form, returning the byte count
    /// consumed.  Any malformed shape is `Corrupt`.
    pub fn deserialize(input: &[u8]) -> Result<(Self, usize)> {
        let mut nodes = Vec::new();
        let mut pos = 0usize;
        let root = Self::deserialize_node(input, &mut pos, &mut nodes, 0)?;
        Ok((Tree { nodes, root }, pos))
    }

    fn deserialize_node(
        input: &[u8],
        pos: &mut usize,
        nodes: &mut Vec<Node>,
        depth: usize,
    ) -> Result<u32> {
        if depth > SYMBOL_COUNT || nodes.len() > MAX_TREE_NODES {
            return Err(Error::corrupt("huffman tree too deep"));
        }
        let tag = *input.get(*pos).ok_or(Error::corrupt("truncated huffman tree"))?;
        *pos += 1;
        match tag {
            0x01 => {
                let byte = *input.get(*pos).ok_or(Error::corrupt("truncated huffman tree"))?;
                *pos += 1;
                let idx = nodes.len() as u32;
                nodes.push(Node::Leaf(byte));
                Ok(idx)
            }
            0x00 => {
                let left = Self::deserialize_node(input, pos, nodes, depth + 1)?;
                let right = Self::deserialize_node(input, pos, nodes, depth + 1)?;
                let idx = nodes.len() as u32;
                nodes.push(Node::Internal { left, right });
                Ok(idx)
            }
            _ => Err(Error::corrupt("bad huffman tree tag")),
        }
    }

    #[inline]
    fn root(&self) -> u32 {
        self.root
    }

    #[inline]
    fn step(&self, node: u32, bit: u8) -> u32 {
        match self.nodes[node as usize] {
            Node::Internal { left, right } => {
                if bit == 0 {
                    left
                } else {
                    right
                }
            }
            Node::Leaf(_) => node,
        }
    }

    #[inline]
    fn leaf_value(&self, node: u32) -> Option<u8> {
        match self.nodes[node as usize] {
            Node::Leaf(b) => Some(b),
            Node::Internal { .. } => None,
        }
    }
}

// ── Code table ───────────────────────────────────────────────────────────────

/// One prefix code: bit values in emission order.
#[derive(Debug, Clone, Default)]
struct Code {
    bits: Vec<u8>,
}

fn assign_codes(tree: &Tree, depth_limit: usize) -> Vec<Code> {
    let mut codes = vec![Code::default(); SYMBOL_COUNT];
    let mut path = Vec::with_capacity(depth_limit.min(SYMBOL_COUNT));
    assign_codes_node(tree, tree.root(), depth_limit, &mut path, &mut codes);
    codes
}

fn assign_codes_node(
    tree: &Tree,
    node: u32,
    depth_limit: usize,
    path: &mut Vec<u8>,
    codes: &mut [Code],
) {
    if let Some(byte) = tree.leaf_value(node) {
        // Shared child indices (degenerate tree) visit a leaf twice; the
        // first (left) assignment wins.
        if codes[byte as usize].bits.is_empty() {
            codes[byte as usize].bits = if path.is_empty() { vec![0] } else { path.clone() };
        }
        return;
    }
    if path.len() == depth_limit {
        // Depth cap reached: every leaf below shares the truncated path.
        assign_truncated(tree, node, path, codes);
        return;
    }
    let (left, right) = match tree.nodes[node as usize] {
        Node::Internal { left, right } => (left, right),
        Node::Leaf(_) => unreachable!("leaf handled above"),
    };
    path.push(0);
    assign_codes_node(tree, left, depth_limit, path, codes);
    path.pop();
    path.push(1);
    assign_codes_node(tree, right, depth_limit, path, codes);
    path.pop();
}

fn assign_truncated(tree: &Tree, node: u32, path: &[u8], codes: &mut [Code]) {
    match tree.nodes[node as usize] {
        Node::Leaf(byte) => {
            if codes[byte as usize].bits.is_empty() {
                codes[byte as usize].bits = path.to_vec();
            }
        }
        Node::Internal { left, right } => {
            assign_truncated(tree, left, path, codes);
            assign_truncated(tree, right, path, codes);
        }
    }
}

// ── Bit packing ──────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct BitWriter {
    cur: u8,
    filled: u8,
}

impl BitWriter {
    #[inline]
    fn push(&mut self, bit: u8, out: &mut Vec<u8>) {
        if bit != 0 {
            self.cur |= 1 << (7 - self.filled);
        }
        self.filled += 1;
        if self.filled == 8 {
            out.push(self.cur);
            self.cur = 0;
            self.filled = 0;
        }
    }

    /// Flush the final partial byte, zero-padded.
    fn finish(&mut self, out: &mut Vec<u8>) {
        if self.filled > 0 {
            out.push(self.cur);
            self.cur = 0;
            self.filled = 0;
        }
    }
}

// ── Streaming encoder ────────────────────────────────────────────────────────

/// Two-pass streaming compression context: feed every chunk to
/// [`count_frequencies`](HuffmanEncoder::count_frequencies), call
/// [`build`](HuffmanEncoder::build), emit the header, then feed the chunks
/// again through [`compress_chunk`](HuffmanEncoder::compress_chunk) and
/// [`finalize`](HuffmanEncoder::finalize).
pub struct HuffmanEncoder {
    depth_limit: usize,
    freqs: [u64; SYMBOL_COUNT],
    total_bytes: u64,
    plan: Option<(Tree, Vec<Code>)>,
    bits: BitWriter,
}

impl HuffmanEncoder {
    pub fn new(depth_limit: usize) -> Self {
        Self {
            depth_limit: depth_limit.max(1),
            freqs: [0u64; SYMBOL_COUNT],
            total_bytes: 0,
            plan: None,
            bits: BitWriter::default(),
        }
    }

    /// Pass 1: accumulate byte frequencies.
    pub fn count_frequencies(&mut self, input: &[u8]) {
        for &b in input {
            self.freqs[b as usize] += 1;
        }
        self.total_bytes += input.len() as u64;
    }

    /// Between passes: build the tree and the code table.
    pub fn build(&mut self) -> Result<()> {
        if self.plan.is_some() {
            return Err(Error::invalid_config("huffman encoder already built"));
        }
        if let Some(tree) = Tree::build(&self.freqs) {
            let codes = assign_codes(&tree, self.depth_limit);
            self.plan = Some((tree, codes));
        }
        Ok(())
    }

    /// `original_size` header plus the serialized tree.  Empty inputs get
    /// the size header alone.
    pub fn stream_header(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut size = [0u8; SIZE_HEADER_LEN];
        LittleEndian::write_u64(&mut size, self.total_bytes);
        out.extend_from_slice(&size);
        if let Some((tree, _)) = &self.plan {
            tree.serialize(&mut out);
        } else if self.total_bytes > 0 {
            return Err(Error::invalid_config("huffman encoder used before build"));
        }
        Ok(out)
    }

    /// Pass 2: emit the bit codes for one chunk.
    pub fn compress_chunk(&mut self, input: &[u8], out: &mut Vec<u8>) -> Result<()> {
        let (_, codes) = self
            .plan
            .as_ref()
            .ok_or(Error::invalid_config("huffman encoder used before build"))?;
        for &b in input {
            for &bit in &codes[b as usize].bits {
                self.bits.push(bit, out);
            }
        }
        Ok(())
    }

    /// Flush the final partial byte with zero padding.
    pub fn finalize(&mut self, out: &mut Vec<u8>) {
        self.bits.finish(out);
    }
}

// ── Streaming decoder ────────────────────────────────────────────────────────

/// Where a streaming decode call stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeProgress {
    /// All `original_size` bytes have been produced.
    Finished,
    /// The input ran out first; feed more compressed bytes.
    InputExhausted,
    /// The output buffer ran out first; drain it and call again.
    OutputFull,
}

/// Resumable decompression state: tree, current node, pending partial byte.
pub struct HuffmanDecoder {
    tree: Option<Tree>,
    node: u32,
    total: u64,
    produced: u64,
    pending_byte: u8,
    pending_bits: u8,
}

impl HuffmanDecoder {
    /// Parse the stream header (size + tree) from the front of `input`;
    /// returns the decoder and the header length.
    pub fn from_stream(input: &[u8]) -> Result<(Self, usize)> {
        if input.len() < SIZE_HEADER_LEN {
            return Err(Error::corrupt("huffman header too short"));
        }
        let total = LittleEndian::read_u64(&input[..SIZE_HEADER_LEN]);
        if total == 0 {
            return Ok((
                Self {
                    tree: None,
                    node: 0,
                    total,
                    produced: 0,
                    pending_byte: 0,
                    pending_bits: 0,
                },
                SIZE_HEADER_LEN,
            ));
        }
        let (tree, tree_len) = Tree::deserialize(&input[SIZE_HEADER_LEN..])?;
        let node = tree.root();
        Ok((
            Self {
                tree: Some(tree),
                node,
                total,
                produced: 0,
                pending_byte: 0,
                pending_bits: 0,
            },
            SIZE_HEADER_LEN + tree_len,
        ))
    }

    #[inline]
    pub fn original_size(&self) -> u64 {
        self.total
    }

    #[inline]
    pub fn is_finished(&self) -> bool {
        self.produced == self.total
    }

    /// Decode from `input` into `out` until one of them is exhausted.
    /// Returns `(input_bytes_consumed, output_bytes_written, progress)`.
    /// Trailing padding bits after the final symbol are ignored.
    pub fn decode_chunk(
        &mut self,
        input: &[u8],
        out: &mut [u8],
    ) -> Result<(usize, usize, DecodeProgress)> {
        if self.is_finished() {
            return Ok((0, 0, DecodeProgress::Finished));
        }
        let tree = self.tree.as_ref().ok_or(Error::corrupt("huffman stream truncated"))?;

        let mut consumed = 0usize;
        let mut written = 0usize;

        loop {
            if self.pending_bits == 0 {
                if consumed == input.len() {
                    return Ok((consumed, written, DecodeProgress::InputExhausted));
                }
                self.pending_byte = input[consumed];
                self.pending_bits = 8;
                consumed += 1;
            }
            while self.pending_bits > 0 {
                if written == out.len() {
                    return Ok((consumed, written, DecodeProgress::OutputFull));
                }
                let bit = (self.pending_byte >> (self.pending_bits - 1)) & 1;
                self.pending_bits -= 1;
                self.node = tree.step(self.node, bit);
                if let Some(byte) = tree.leaf_value(self.node) {
                    out[written] = byte;
                    written += 1;
                    self.produced += 1;
                    self.node = tree.root();
                    if self.is_finished() {
                        return Ok((consumed, written, DecodeProgress::Finished));
                    }
                }
            }
        }
    }
}

// ── Whole-buffer codec ───────────────────────────────────────────────────────

/// Whole-buffer Huffman codec; wraps the streaming contexts.
pub struct HuffmanCodec {
    depth_limit: usize,
}

impl HuffmanCodec {
    pub fn new(depth_limit: usize) -> Self {
        Self { depth_limit }
    }
}

impl Codec for HuffmanCodec {
    fn kind(&self) -> CodecKind {
        CodecKind::Huffman
    }

    fn compress(&self, input: &[u8]) -> Result<Vec<u8>> {
        let mut enc = HuffmanEncoder::new(self.depth_limit);
        enc.count_frequencies(input);
        enc.build()?;
        let mut out = enc.stream_header()?;
        enc.compress_chunk(input, &mut out)?;
        enc.finalize(&mut out);
        Ok(out)
    }

    fn decompress(&self, input: &[u8]) -> Result<Vec<u8>> {
        let (mut dec, header_len) = HuffmanDecoder::from_stream(input)?;
        let total = usize::try_from(dec.original_size())
            .map_err(|_| Error::Memory)?;
        let mut out = vec![0u8; total];
        let (_, written, progress) = dec.decode_chunk(&input[header_len..], &mut out)?;
        match progress {
            DecodeProgress::Finished => Ok(out),
            DecodeProgress::InputExhausted | DecodeProgress::OutputFull => {
                debug_assert!(written <= total);
                Err(Error::corrupt("huffman stream truncated"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> HuffmanCodec {
        HuffmanCodec::new(SYMBOL_COUNT)
    }

    #[test]
    fn two_symbol_vector() {
        // "ab": size header, tree 00 01 61 01 62, stream byte 0x40.
        let packed = codec().compress(b"ab").unwrap();
        assert_eq!(
            packed,
            vec![
                0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // original_size
                0x00, 0x01, 0x61, 0x01, 0x62, // pre-order tree
                0x40, // 'a' = 0, 'b' = 1, zero-padded
            ]
        );
        assert_eq!(codec().decompress(&packed).unwrap(), b"ab");
    }

    #[test]
    fn empty_input_is_header_only() {
        let packed = codec().compress(b"").unwrap();
        assert_eq!(packed, vec![0u8; 8]);
        assert_eq!(codec().decompress(&packed).unwrap(), b"");
    }

    #[test]
    fn single_distinct_byte_degenerates() {
        let packed = codec().compress(b"zzzz").unwrap();
        // Tree: internal + the same leaf serialized down both branches.
        assert_eq!(&packed[8..13], &[0x00, 0x01, b'z', 0x01, b'z']);
        // Four one-bit codes of 0 pack into a single zero byte.
        assert_eq!(&packed[13..], &[0x00]);
        assert_eq!(codec().decompress(&packed).unwrap(), b"zzzz");
    }

    #[test]
    fn all_symbols_roundtrip() {
        let data: Vec<u8> = (0u8..=255).flat_map(|b| std::iter::repeat(b).take(3)).collect();
        let packed = codec().compress(&data).unwrap();
        assert_eq!(codec().decompress(&packed).unwrap(), data);
    }

    #[test]
    fn skewed_distribution_roundtrip() {
        let mut data = vec![b'a'; 10_000];
        data.extend_from_slice(b"the quick brown fox");
        data.extend(vec![0u8; 500]);
        let packed = codec().compress(&data).unwrap();
        assert_eq!(codec().decompress(&packed).unwrap(), data);
    }

    #[test]
    fn truncated_stream_is_corrupt() {
        let packed = codec().compress(b"hello world, hello huffman").unwrap();
        let cut = &packed[..packed.len() - 2];
        assert!(matches!(
            codec().decompress(cut).unwrap_err(),
            Error::Corrupt { .. }
        ));
    }

    #[test]
    fn malformed_tree_is_corrupt() {
        let mut packed = vec![0u8; 8];
        packed[0] = 4; // claims 4 bytes follow
        packed.extend_from_slice(&[0x00, 0x01, 0x61]); // internal missing right child
        assert!(matches!(
            codec().decompress(&packed).unwrap_err(),
            Error::Corrupt { .. }
        ));
    }

    #[test]
    fn streaming_matches_whole_buffer() {
        let data: Vec<u8> = b"abracadabra, abracadabra, abracadabra"
            .iter()
            .cycle()
            .take(1000)
            .copied()
            .collect();

        let whole = codec().compress(&data).unwrap();

        let mut enc = HuffmanEncoder::new(SYMBOL_COUNT);
        for chunk in data.chunks(17) {
            enc.count_frequencies(chunk);
        }
        enc.build().unwrap();
        let mut streamed = enc.stream_header().unwrap();
        for chunk in data.chunks(17) {
            enc.compress_chunk(chunk, &mut streamed).unwrap();
        }
        enc.finalize(&mut streamed);

        assert_eq!(streamed, whole);
    }

    #[test]
    fn decoder_distinguishes_output_full_from_input_exhausted() {
        let data = b"mississippi river banks";
        let packed = codec().compress(data).unwrap();
        let (mut dec, header_len) = HuffmanDecoder::from_stream(&packed).unwrap();
        let body = &packed[header_len..];

        // Tiny output buffer: must report OutputFull mid-way.
        let mut out = [0u8; 5];
        let (consumed, written, progress) = dec.decode_chunk(body, &mut out).unwrap();
        assert_eq!(progress, DecodeProgress::OutputFull);
        assert_eq!(written, 5);
        assert_eq!(&out[..], &data[..5]);

        // Resume past the partial byte held in the context and finish.
        let mut rest = Vec::new();
        let mut buf = [0u8; 64];
        let mut offset = consumed;
        loop {
            let (read, w, p) = dec.decode_chunk(&body[offset..], &mut buf).unwrap();
            offset += read;
            rest.extend_from_slice(&buf[..w]);
            match p {
                DecodeProgress::Finished => break,
                DecodeProgress::OutputFull => {}
                DecodeProgress::InputExhausted => panic!("stream should be complete"),
            }
        }
        assert_eq!(&rest, &data[5..]);

        // A decoder starved of input reports InputExhausted, not OutputFull.
        let (mut starved, _) = HuffmanDecoder::from_stream(&packed).unwrap();
        let mut big = [0u8; 64];
        let (_, _, progress) = starved.decode_chunk(&body[..1], &mut big).unwrap();
        assert_eq!(progress, DecodeProgress::InputExhausted);
    }

    #[test]
    fn depth_cap_stays_deterministic() {
        // Fibonacci-ish frequencies force a deep skewed tree; a tight cap
        // must still produce identical output across runs.
        let mut data = Vec::new();
        let mut f = 1u64;
        for byte in 0u8..16 {
            for _ in 0..f.min(5000) {
                data.push(byte);
            }
            f = f.saturating_mul(2);
        }
        let a = HuffmanCodec::new(4).compress(&data).unwrap();
        let b = HuffmanCodec::new(4).compress(&data).unwrap();
        assert_eq!(a, b);
    }
}
