//! Directory chunk packing (AOLL / AOLI / count chunk).
//!
//! Directory entries are sorted case-insensitively and packed greedily into
//! fixed-size AOLL leaf chunks. When more than one leaf is needed an AOLI
//! index chunk lists the first name of each leaf. A separate 512-byte count
//! chunk records how many entries each leaf holds.

use crate::error::{Error, Result};

use super::directory::DirEntry;
use super::{CCHUNK_SIZE, DCHUNK_SIZE, QUICKREF_DENSITY};

const NEG1: u64 = u64::MAX;

/// AOLL header (tag + six fields) plus the trailing entry count.
const AOLL_OVERHEAD: usize = 50;
const AOLI_OVERHEAD: usize = 16;

/// Encode a variable-length quantity: 7 bits per byte, most significant
/// group first, high bit set on every byte except the last.
pub fn encode_vlq(value: u64) -> Vec<u8> {
    let mut groups = vec![(value & 0x7F) as u8];
    let mut v = value >> 7;
    while v > 0 {
        groups.push((v & 0x7F) as u8 | 0x80);
        v >>= 7;
    }
    groups.reverse();
    groups
}

/// Decode a variable-length quantity, returning the value and bytes consumed.
///
/// Returns `None` for truncated input or values that overflow 64 bits.
pub fn decode_vlq(data: &[u8]) -> Option<(u64, usize)> {
    let mut value: u64 = 0;
    for (i, &byte) in data.iter().enumerate() {
        if value > (u64::MAX >> 7) {
            return None;
        }
        value = (value << 7) | (byte & 0x7F) as u64;
        if byte & 0x80 == 0 {
            return Some((value, i + 1));
        }
    }
    None
}

/// Packed directory, ready for the writer.
#[derive(Debug, Clone)]
pub struct DirectoryChunks {
    /// AOLL leaf chunks, `DCHUNK_SIZE` bytes each.
    pub dchunks: Vec<Vec<u8>>,
    /// AOLI index chunk, present when there is more than one leaf.
    pub index: Option<Vec<u8>>,
    /// AOLL-framed count chunk, `CCHUNK_SIZE` bytes.
    pub count_chunk: Vec<u8>,
}

impl DirectoryChunks {
    pub fn has_index(&self) -> bool {
        self.index.is_some()
    }
}

/// Leaf contents before framing.
struct Leaf {
    content: Vec<u8>,
    quickrefs: Vec<u16>,
    count: usize,
    first_name: String,
}

fn serialize_entry(entry: &DirEntry) -> Vec<u8> {
    let name = entry.name.as_bytes();
    let mut out = encode_vlq(name.len() as u64);
    out.extend_from_slice(name);
    out.extend(encode_vlq(entry.section as u64));
    out.extend(encode_vlq(entry.offset));
    out.extend(encode_vlq(entry.size));
    out
}

fn aoll_header(out: &mut Vec<u8>, rem: usize, cid: u64, prev: u64, next: u64, prior: u64) {
    out.extend_from_slice(b"AOLL");
    out.extend_from_slice(&(rem as u32).to_le_bytes());
    out.extend_from_slice(&cid.to_le_bytes());
    out.extend_from_slice(&prev.to_le_bytes());
    out.extend_from_slice(&next.to_le_bytes());
    out.extend_from_slice(&prior.to_le_bytes());
    out.extend_from_slice(&1u64.to_le_bytes());
}

/// Space left in a chunk of `size` bytes after `used` bytes.
fn remaining(size: usize, used: usize, what: &str) -> Result<usize> {
    size.checked_sub(used)
        .ok_or_else(|| Error::DirectoryOverflow(format!("{what} needs {used} of {size} bytes")))
}

/// Sort and pack directory entries into chunks.
///
/// Fails when a single entry, the leaf index or the count chunk cannot fit
/// in its fixed-size chunk.
pub fn build_chunks(entries: &[DirEntry]) -> Result<DirectoryChunks> {
    let mut sorted: Vec<&DirEntry> = entries.iter().collect();
    sorted.sort_by_cached_key(|e| e.name.to_lowercase());

    let mut leaves: Vec<Leaf> = Vec::new();
    let mut current = Leaf {
        content: Vec::new(),
        quickrefs: Vec::new(),
        count: 0,
        first_name: sorted.first().map(|e| e.name.clone()).unwrap_or_default(),
    };

    for entry in sorted {
        let bytes = serialize_entry(entry);
        if bytes.len() + AOLL_OVERHEAD + 2 >= DCHUNK_SIZE {
            return Err(Error::DirectoryOverflow(format!(
                "entry {:?} takes {} bytes",
                entry.name,
                bytes.len()
            )));
        }
        let used = current.content.len() + bytes.len() + current.quickrefs.len() * 2 + 52;
        if used >= DCHUNK_SIZE && current.count > 0 {
            let next = Leaf {
                content: Vec::new(),
                quickrefs: Vec::new(),
                count: 0,
                first_name: entry.name.clone(),
            };
            leaves.push(std::mem::replace(&mut current, next));
        }
        if current.count % QUICKREF_DENSITY == 0 {
            current.quickrefs.push(current.content.len() as u16);
        }
        current.content.extend(bytes);
        current.count += 1;
    }
    leaves.push(current);

    let last = leaves.len() as u64 - 1;
    let mut dchunks = Vec::with_capacity(leaves.len());
    let mut index_entries = Vec::new();
    let mut prior = 0u64;

    for (cid, leaf) in leaves.iter().enumerate() {
        let cid = cid as u64;
        let prev = if cid > 0 { cid - 1 } else { NEG1 };
        let next = if cid < last { cid + 1 } else { NEG1 };
        let rem = remaining(DCHUNK_SIZE, leaf.content.len() + AOLL_OVERHEAD, "leaf chunk")?;
        let pad = remaining(rem, leaf.quickrefs.len() * 2, "leaf quickrefs")?;

        let mut chunk = Vec::with_capacity(DCHUNK_SIZE);
        aoll_header(&mut chunk, rem, cid, prev, next, prior);
        chunk.extend_from_slice(&leaf.content);
        chunk.resize(chunk.len() + pad, 0);
        for &qref in leaf.quickrefs.iter().rev() {
            chunk.extend_from_slice(&qref.to_le_bytes());
        }
        chunk.extend_from_slice(&(leaf.count as u16).to_le_bytes());
        dchunks.push(chunk);

        prior += leaf.count as u64;

        let name = leaf.first_name.as_bytes();
        index_entries.extend(encode_vlq(name.len() as u64));
        index_entries.extend_from_slice(name);
        index_entries.extend(encode_vlq(cid));
    }

    let index = if leaves.len() > 1 {
        let rem = remaining(DCHUNK_SIZE, index_entries.len() + AOLI_OVERHEAD + 2, "index chunk")?;
        let mut chunk = Vec::with_capacity(DCHUNK_SIZE);
        chunk.extend_from_slice(b"AOLI");
        chunk.extend_from_slice(&((rem + 2) as u32).to_le_bytes());
        chunk.extend_from_slice(&(leaves.len() as u64).to_le_bytes());
        chunk.extend_from_slice(&index_entries);
        chunk.resize(chunk.len() + rem, 0);
        chunk.extend_from_slice(&(leaves.len() as u16).to_le_bytes());
        Some(chunk)
    } else {
        None
    };

    Ok(DirectoryChunks {
        dchunks,
        index,
        count_chunk: build_count_chunk(&leaves)?,
    })
}

fn build_count_chunk(leaves: &[Leaf]) -> Result<Vec<u8>> {
    let mut content = Vec::new();
    let mut last = 0u64;
    for (i, leaf) in leaves.iter().enumerate() {
        content.extend(encode_vlq(last));
        content.extend(encode_vlq(leaf.count as u64));
        content.extend(encode_vlq(i as u64));
        last = leaf.count as u64;
    }

    let rem = remaining(CCHUNK_SIZE, content.len() + AOLL_OVERHEAD, "count chunk")?;

    let mut chunk = Vec::with_capacity(CCHUNK_SIZE);
    aoll_header(&mut chunk, rem, 0, NEG1, NEG1, 0);
    chunk.extend_from_slice(&content);
    chunk.resize(chunk.len() + rem, 0);
    chunk.extend_from_slice(&(leaves.len() as u16).to_le_bytes());
    Ok(chunk)
}
