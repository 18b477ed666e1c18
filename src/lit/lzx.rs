//! LZX compressor for the `MSCompressed` storage section.
//!
//! Produces the LZX variant used by ITSF/ITOL containers: a 2^17 byte
//! window, input cut into 0x8000-byte frames with one verbatim block per
//! frame, the bit stream aligned to 16 bits after every frame, and a full
//! state reset every 0x20000 bytes so readers can start decoding at any
//! reset point.
//!
//! The bit stream is a sequence of 16-bit little-endian words whose bits
//! are consumed most significant first.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Bytes per frame; every frame starts a new block.
pub const FRAME_SIZE: usize = 0x8000;
/// Bytes between full state resets.
pub const RESET_INTERVAL: usize = 0x20000;
const FRAMES_PER_RESET: usize = RESET_INTERVAL / FRAME_SIZE;

const NUM_CHARS: usize = 256;
const NUM_POSITION_SLOTS: usize = 34;
const MAIN_TREE_SIZE: usize = NUM_CHARS + NUM_POSITION_SLOTS * 8;
const LENGTH_TREE_SIZE: usize = 249;
const PRETREE_SIZE: usize = 20;
const NUM_PRIMARY_LENGTHS: usize = 7;

const MIN_MATCH: usize = 2;
const MAX_MATCH: usize = 257;
/// Shortest match worth encoding.
const MIN_ENCODED_MATCH: usize = 3;
const MAX_OFFSET: usize = (1 << 17) - 3;

const MAX_CODE_BITS: u8 = 16;
const MAX_PRETREE_BITS: u8 = 15;

const BLOCKTYPE_VERBATIM: u32 = 1;

const HASH_BITS: u32 = 15;
const MAX_CHAIN: usize = 64;
const NO_POS: u32 = u32::MAX;

const fn build_position_tables() -> ([u8; 51], [u32; 51]) {
    let mut extra = [0u8; 51];
    let mut base = [0u32; 51];
    let mut i = 0;
    let mut j = 0u8;
    while i < 50 {
        extra[i] = j;
        extra[i + 1] = j;
        if i != 0 && j < 17 {
            j += 1;
        }
        i += 2;
    }
    extra[50] = 17;
    let mut acc = 0u32;
    i = 0;
    while i < 51 {
        base[i] = acc;
        acc += 1 << extra[i];
        i += 1;
    }
    (extra, base)
}

const POSITION_TABLES: ([u8; 51], [u32; 51]) = build_position_tables();
const EXTRA_BITS: [u8; 51] = POSITION_TABLES.0;
const POSITION_BASE: [u32; 51] = POSITION_TABLES.1;

/// Position slot for a formatted offset (real offset + 2).
fn position_slot(formatted: u32) -> usize {
    POSITION_BASE[..NUM_POSITION_SLOTS].partition_point(|&base| base <= formatted) - 1
}

/// Compressed stream plus the reset table.
#[derive(Debug, Clone, Default)]
pub struct LzxOutput {
    pub data: Vec<u8>,
    /// `(uncompressed, compressed)` offsets at every frame end. The last
    /// pair is the end of the stream. Empty input records a single `(0, 0)`.
    pub reset_table: Vec<(u64, u64)>,
}

/// Compress a buffer.
pub fn compress(input: &[u8]) -> LzxOutput {
    let mut encoder = Encoder::new();
    let mut reset_table = Vec::with_capacity(input.len().div_ceil(FRAME_SIZE) + 1);

    for (chunk_index, chunk) in input.chunks(RESET_INTERVAL).enumerate() {
        let chunk_start = chunk_index * RESET_INTERVAL;
        encoder.reset(chunk.len());
        for (i, frame_start) in (0..chunk.len()).step_by(FRAME_SIZE).enumerate() {
            let frame_end = (frame_start + FRAME_SIZE).min(chunk.len());
            encoder.encode_frame(chunk, frame_start, frame_end, i == 0);
            reset_table.push((
                (chunk_start + frame_end) as u64,
                encoder.bits.out.len() as u64,
            ));
        }
    }

    if reset_table.is_empty() {
        reset_table.push((0, 0));
    }
    LzxOutput {
        data: encoder.bits.out,
        reset_table,
    }
}

/// Frame the reset table as stored in `InstanceData/ResetTable`.
///
/// Entry `n` is the compressed offset where frame `n` starts. The header's
/// trailing zero doubles as entry 0, so the end of each frame but the last
/// follows it.
pub fn reset_table_bytes(output: &LzxOutput, uncompressed_len: u64) -> Vec<u8> {
    let table = &output.reset_table;
    let mut out = Vec::with_capacity(40 + table.len() * 8);
    out.extend_from_slice(&3u32.to_le_bytes());
    out.extend_from_slice(&(table.len() as u32).to_le_bytes());
    out.extend_from_slice(&8u32.to_le_bytes());
    out.extend_from_slice(&0x28u32.to_le_bytes());
    out.extend_from_slice(&uncompressed_len.to_le_bytes());
    out.extend_from_slice(&(output.data.len() as u64).to_le_bytes());
    out.extend_from_slice(&(FRAME_SIZE as u64).to_le_bytes());
    out.extend_from_slice(&0u64.to_le_bytes());
    for &(_, compressed) in &table[..table.len().saturating_sub(1)] {
        out.extend_from_slice(&compressed.to_le_bytes());
    }
    out
}

// ============================================================================
// Bit output
// ============================================================================

#[derive(Debug, Default)]
struct BitWriter {
    out: Vec<u8>,
    acc: u64,
    nbits: u32,
}

impl BitWriter {
    fn write(&mut self, value: u32, bits: u32) {
        if bits == 0 {
            return;
        }
        self.acc = (self.acc << bits) | (value as u64 & ((1u64 << bits) - 1));
        self.nbits += bits;
        while self.nbits >= 16 {
            let word = (self.acc >> (self.nbits - 16)) as u16;
            self.out.extend_from_slice(&word.to_le_bytes());
            self.nbits -= 16;
        }
        self.acc &= (1u64 << self.nbits) - 1;
    }

    /// Pad with zero bits to the next 16-bit boundary.
    fn align(&mut self) {
        if self.nbits > 0 {
            self.write(0, 16 - self.nbits);
        }
    }
}

// ============================================================================
// Huffman trees
// ============================================================================

/// Optimal code lengths for the given frequencies (unbounded depth).
fn huffman_lengths(freqs: &[u32]) -> Vec<u8> {
    let mut lengths = vec![0u8; freqs.len()];
    let mut parent: Vec<usize> = Vec::with_capacity(freqs.len() * 2);
    let mut heap = BinaryHeap::new();

    for (sym, &f) in freqs.iter().enumerate() {
        if f > 0 {
            heap.push(Reverse((f as u64, parent.len(), sym)));
            parent.push(usize::MAX);
        }
    }
    let leaves: Vec<usize> = freqs
        .iter()
        .enumerate()
        .filter(|&(_, &f)| f > 0)
        .map(|(sym, _)| sym)
        .collect();

    if leaves.len() == 1 {
        lengths[leaves[0]] = 1;
        return lengths;
    }

    while heap.len() > 1 {
        let Some(Reverse((fa, a, _))) = heap.pop() else {
            break;
        };
        let Some(Reverse((fb, b, _))) = heap.pop() else {
            break;
        };
        let node = parent.len();
        parent.push(usize::MAX);
        parent[a] = node;
        parent[b] = node;
        heap.push(Reverse((fa + fb, node, usize::MAX)));
    }

    for (leaf, &sym) in leaves.iter().enumerate() {
        let mut depth = 0u8;
        let mut node = leaf;
        while parent[node] != usize::MAX {
            node = parent[node];
            depth = depth.saturating_add(1);
        }
        lengths[sym] = depth;
    }
    lengths
}

/// Code lengths no longer than `max_bits`.
///
/// Trees with a single used symbol get a second one so the code is
/// complete. An all-zero tree is only returned when `allow_empty` is set.
fn tree_lengths(freqs: &[u32], max_bits: u8, allow_empty: bool) -> Vec<u8> {
    let mut freqs = freqs.to_vec();
    let mut used = freqs.iter().filter(|&&f| f > 0).count();
    if used == 0 && allow_empty {
        return vec![0; freqs.len()];
    }
    for slot in freqs.iter_mut() {
        if used >= 2 {
            break;
        }
        if *slot == 0 {
            *slot = 1;
            used += 1;
        }
    }

    loop {
        let lengths = huffman_lengths(&freqs);
        if lengths.iter().all(|&l| l <= max_bits) {
            return lengths;
        }
        for f in freqs.iter_mut().filter(|f| **f > 0) {
            *f = f.div_ceil(2);
        }
    }
}

/// Canonical codes: shorter codes first, ties broken by symbol order.
fn canonical_codes(lengths: &[u8]) -> Vec<u32> {
    let mut bl_count = [0u32; 17];
    for &l in lengths {
        if l > 0 {
            bl_count[l as usize] += 1;
        }
    }
    let mut next_code = [0u32; 17];
    let mut code = 0u32;
    for bits in 1..17 {
        code = (code + bl_count[bits - 1]) << 1;
        next_code[bits] = code;
    }
    lengths
        .iter()
        .map(|&l| {
            if l == 0 {
                0
            } else {
                let c = next_code[l as usize];
                next_code[l as usize] += 1;
                c
            }
        })
        .collect()
}

/// Pretree symbols (with their extra bits) describing `new` relative to `prev`.
fn pretree_symbols(prev: &[u8], new: &[u8]) -> Vec<(usize, u32, u32)> {
    let delta = |p: u8, n: u8| ((p as usize + 17 - n as usize) % 17, 0, 0);
    let mut symbols = Vec::new();
    let mut x = 0;
    while x < new.len() {
        if new[x] != 0 {
            symbols.push(delta(prev[x], new[x]));
            x += 1;
            continue;
        }
        let mut run = 1;
        while x + run < new.len() && new[x + run] == 0 {
            run += 1;
        }
        let mut left = run;
        while left >= 20 {
            let n = left.min(51);
            symbols.push((18, (n - 20) as u32, 5));
            left -= n;
        }
        if left >= 4 {
            symbols.push((17, (left - 4) as u32, 4));
            left = 0;
        }
        for idx in x + run - left..x + run {
            symbols.push(delta(prev[idx], 0));
        }
        x += run;
    }
    symbols
}

fn write_lengths(bits: &mut BitWriter, prev: &[u8], new: &[u8]) {
    let symbols = pretree_symbols(prev, new);
    let mut freqs = [0u32; PRETREE_SIZE];
    for &(sym, _, _) in &symbols {
        freqs[sym] += 1;
    }
    let lengths = tree_lengths(&freqs, MAX_PRETREE_BITS, false);
    let codes = canonical_codes(&lengths);
    for &l in &lengths {
        bits.write(l as u32, 4);
    }
    for (sym, extra, extra_bits) in symbols {
        bits.write(codes[sym], lengths[sym] as u32);
        bits.write(extra, extra_bits);
    }
}

// ============================================================================
// Encoder
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum Token {
    Literal(u8),
    Match {
        main: u16,
        length: Option<u8>,
        verbatim: u32,
        verbatim_bits: u8,
    },
}

struct Encoder {
    bits: BitWriter,
    main_lengths: Vec<u8>,
    length_lengths: Vec<u8>,
    r: [usize; 3],
    head: Vec<u32>,
    prev: Vec<u32>,
}

impl Encoder {
    fn new() -> Self {
        Self {
            bits: BitWriter::default(),
            main_lengths: vec![0; MAIN_TREE_SIZE],
            length_lengths: vec![0; LENGTH_TREE_SIZE],
            r: [1; 3],
            head: vec![NO_POS; 1 << HASH_BITS],
            prev: Vec::new(),
        }
    }

    fn reset(&mut self, chunk_len: usize) {
        self.main_lengths.fill(0);
        self.length_lengths.fill(0);
        self.r = [1; 3];
        self.head.fill(NO_POS);
        self.prev.clear();
        self.prev.resize(chunk_len, NO_POS);
    }

    fn hash(data: &[u8], pos: usize) -> usize {
        let v = (data[pos] as u32) << 16 | (data[pos + 1] as u32) << 8 | data[pos + 2] as u32;
        (v.wrapping_mul(2_654_435_761) >> (32 - HASH_BITS)) as usize
    }

    fn insert(&mut self, data: &[u8], pos: usize) {
        if pos + 2 < data.len() {
            let h = Self::hash(data, pos);
            self.prev[pos] = self.head[h];
            self.head[h] = pos as u32;
        }
    }

    fn match_len(data: &[u8], a: usize, b: usize, max: usize) -> usize {
        data[a..]
            .iter()
            .zip(&data[b..b + max])
            .take_while(|(x, y)| x == y)
            .count()
    }

    /// Longest match for `pos`, as `(length, offset)`.
    fn find_match(&self, data: &[u8], pos: usize, max_len: usize) -> (usize, usize) {
        let mut best = (0, 0);
        if max_len < MIN_ENCODED_MATCH || pos + 2 >= data.len() {
            return best;
        }

        let mut cand = self.head[Self::hash(data, pos)];
        let mut chain = MAX_CHAIN;
        while cand != NO_POS && chain > 0 {
            let cpos = cand as usize;
            let offset = pos - cpos;
            if offset > MAX_OFFSET {
                break;
            }
            let len = Self::match_len(data, cpos, pos, max_len);
            if len > best.0 {
                best = (len, offset);
                if len == max_len {
                    break;
                }
            }
            cand = self.prev[cpos];
            chain -= 1;
        }

        // A repeat of the last offset is cheaper at equal length
        let r0 = self.r[0];
        if r0 <= pos {
            let len = Self::match_len(data, pos - r0, pos, max_len);
            if len >= MIN_ENCODED_MATCH && len >= best.0 {
                best = (len, r0);
            }
        }
        best
    }

    fn match_token(&mut self, len: usize, offset: usize) -> Token {
        let (slot, verbatim, verbatim_bits) = if offset == self.r[0] {
            (0, 0, 0)
        } else {
            let formatted = (offset + 2) as u32;
            let slot = position_slot(formatted);
            self.r = [offset, self.r[0], self.r[1]];
            (slot, formatted - POSITION_BASE[slot], EXTRA_BITS[slot])
        };
        let header = (len - MIN_MATCH).min(NUM_PRIMARY_LENGTHS);
        let length = (header == NUM_PRIMARY_LENGTHS).then(|| (len - MIN_MATCH - header) as u8);
        Token::Match {
            main: (NUM_CHARS + slot * 8 + header) as u16,
            length,
            verbatim,
            verbatim_bits,
        }
    }

    fn encode_frame(&mut self, chunk: &[u8], start: usize, end: usize, after_reset: bool) {
        let mut tokens = Vec::with_capacity(end - start);
        let mut pos = start;
        while pos < end {
            let max_len = (end - pos).min(MAX_MATCH);
            let (len, offset) = self.find_match(chunk, pos, max_len);
            if len >= MIN_ENCODED_MATCH {
                tokens.push(self.match_token(len, offset));
                for p in pos..pos + len {
                    self.insert(chunk, p);
                }
                pos += len;
            } else {
                tokens.push(Token::Literal(chunk[pos]));
                self.insert(chunk, pos);
                pos += 1;
            }
        }

        let mut main_freqs = vec![0u32; MAIN_TREE_SIZE];
        let mut length_freqs = vec![0u32; LENGTH_TREE_SIZE];
        for token in &tokens {
            match *token {
                Token::Literal(b) => main_freqs[b as usize] += 1,
                Token::Match { main, length, .. } => {
                    main_freqs[main as usize] += 1;
                    if let Some(l) = length {
                        length_freqs[l as usize] += 1;
                    }
                }
            }
        }
        let main_lengths = tree_lengths(&main_freqs, MAX_CODE_BITS, false);
        let length_lengths = tree_lengths(&length_freqs, MAX_CODE_BITS, true);
        let main_codes = canonical_codes(&main_lengths);
        let length_codes = canonical_codes(&length_lengths);

        let bits = &mut self.bits;
        if after_reset {
            // No E8 translation
            bits.write(0, 1);
        }
        let block_len = (end - start) as u32;
        bits.write(BLOCKTYPE_VERBATIM, 3);
        bits.write(block_len >> 8, 16);
        bits.write(block_len & 0xFF, 8);

        write_lengths(bits, &self.main_lengths[..NUM_CHARS], &main_lengths[..NUM_CHARS]);
        write_lengths(bits, &self.main_lengths[NUM_CHARS..], &main_lengths[NUM_CHARS..]);
        write_lengths(bits, &self.length_lengths, &length_lengths);

        for token in tokens {
            match token {
                Token::Literal(b) => {
                    bits.write(main_codes[b as usize], main_lengths[b as usize] as u32);
                }
                Token::Match {
                    main,
                    length,
                    verbatim,
                    verbatim_bits,
                } => {
                    let m = main as usize;
                    bits.write(main_codes[m], main_lengths[m] as u32);
                    if let Some(l) = length {
                        let l = l as usize;
                        bits.write(length_codes[l], length_lengths[l] as u32);
                    }
                    bits.write(verbatim, verbatim_bits as u32);
                }
            }
        }
        bits.align();

        self.main_lengths = main_lengths;
        self.length_lengths = length_lengths;
    }
}
