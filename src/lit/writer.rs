//! LIT file assembly.
//!
//! Layout: the `ITOLITLS` header with its piece table, the secondary
//! header, five pieces (file size record, directory chunks, count chunk and
//! two GUID pieces) and finally the section 0 content. Offsets that are only
//! known once everything has been written are patched in at the end.

use std::fs::OpenOptions;
use std::io::{self, Seek, SeekFrom, Write};
use std::path::Path;

use log::{debug, info};

use crate::book::Book;
use crate::error::{Error, Result};
use crate::util::time_now_secs;

use super::chunks::{DirectoryChunks, build_chunks};
use super::sections::{SectionBuilder, prepare_book};
use super::{
    BLOCK_CAOL, BLOCK_ITSF, CCHUNK_SIZE, DCHUNK_SIZE, LITFILE_GUID, PIECE3_GUID, PIECE4_GUID,
    pack_guid,
};

const PRIMARY_SIZE: u32 = 0x28;
const SECONDARY_SIZE: u32 = 0xE8;
const NUM_PIECES: usize = 5;
const NEG1: u64 = u64::MAX;
/// Language id written into the header (en-US).
const LANGUAGE_ID: u32 = 0x409;

/// LIT writer configuration.
#[derive(Debug, Clone, Default)]
pub struct LitConfig {
    /// Fixed document GUID for `ms--guid`; `None` generates a fresh one.
    pub document_guid: Option<String>,
    /// Fixed header timestamp; `None` uses the current time.
    pub timestamp: Option<u32>,
}

/// Write a [`Book`] to a LIT file.
///
/// # Example
///
/// ```no_run
/// use litwriter::{read_epub, write_lit};
///
/// let mut book = read_epub("input.epub")?;
/// write_lit(&mut book, "output.lit")?;
/// # Ok::<(), litwriter::Error>(())
/// ```
pub fn write_lit<P: AsRef<Path>>(book: &mut Book, path: P) -> Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(true)
        .open(path)?;
    let mut writer = io::BufWriter::new(file);
    write_lit_to_writer(book, &mut writer)?;
    writer.flush()?;
    Ok(())
}

/// Write a [`Book`] to any seekable destination.
pub fn write_lit_to_writer<W: Write + Seek>(book: &mut Book, writer: &mut W) -> Result<()> {
    write_lit_with_config(book, writer, &LitConfig::default())
}

/// Write a [`Book`] with explicit configuration.
///
/// The book is updated in place: a version marker is added to its metadata
/// and, when it has a cover, the Microsoft Reader cover guide entries.
pub fn write_lit_with_config<W: Write + Seek>(
    book: &mut Book,
    writer: &mut W,
    config: &LitConfig,
) -> Result<()> {
    let base = writer.stream_position().map_err(Error::NotSeekable)?;

    prepare_book(book);
    let mut directory = SectionBuilder::build(book, config.document_guid.as_deref())?;
    let content = directory.take_section(0);
    let chunks = build_chunks(directory.entries())?;
    debug!(
        "Packed {} directory entries into {} chunks",
        directory.len(),
        chunks.dchunks.len()
    );

    let mut out = PatchWriter { inner: writer, base };
    let timestamp = config.timestamp.unwrap_or_else(time_now_secs);
    let size = write_file(&mut out, &chunks, directory.len(), &content, timestamp)?;
    info!("Wrote LIT file: {size} bytes");
    Ok(())
}

// ============================================================================
// Random-access output
// ============================================================================

/// Writer that addresses positions relative to where the file starts and
/// can overwrite earlier bytes.
struct PatchWriter<'w, W: Write + Seek> {
    inner: &'w mut W,
    base: u64,
}

impl<W: Write + Seek> PatchWriter<'_, W> {
    fn tell(&mut self) -> io::Result<u64> {
        Ok(self.inner.stream_position()? - self.base)
    }

    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.inner.write_all(data)
    }

    fn write_u32(&mut self, value: u32) -> io::Result<()> {
        self.write(&value.to_le_bytes())
    }

    fn write_u64(&mut self, value: u64) -> io::Result<()> {
        self.write(&value.to_le_bytes())
    }

    /// Overwrite bytes at `offset`, then return to the current position.
    fn patch(&mut self, offset: u64, data: &[u8]) -> io::Result<()> {
        let saved = self.inner.stream_position()?;
        self.inner.seek(SeekFrom::Start(self.base + offset))?;
        self.inner.write_all(data)?;
        self.inner.seek(SeekFrom::Start(saved))?;
        Ok(())
    }
}

// ============================================================================
// Layout
// ============================================================================

fn write_file<W: Write + Seek>(
    out: &mut PatchWriter<'_, W>,
    chunks: &DirectoryChunks,
    dir_count: usize,
    content: &[u8],
    timestamp: u32,
) -> Result<u64> {
    let num_dchunks = chunks.dchunks.len() as u64;
    let (aoli1, ddepth) = if chunks.has_index() {
        (num_dchunks, 2u32)
    } else {
        (NEG1, 1u32)
    };

    out.write(b"ITOLITLS")?;
    out.write_u32(1)?;
    out.write_u32(PRIMARY_SIZE)?;
    out.write_u32(NUM_PIECES as u32)?;
    out.write_u32(SECONDARY_SIZE)?;
    out.write(&pack_guid(LITFILE_GUID))?;

    let piece_table = out.tell()?;
    out.write(&[0u8; NUM_PIECES * 16])?;

    // Secondary header
    out.write_u32(2)?;
    out.write_u32(0x98)?;
    out.write_u64(aoli1)?;
    out.write_u64(0)?;
    out.write_u64(num_dchunks - 1)?; // last AOLL chunk
    out.write_u64(0)?;
    out.write_u32(DCHUNK_SIZE as u32)?;
    out.write_u32(2)?;
    out.write_u32(0)?;
    out.write_u32(ddepth)?;
    out.write_u64(0)?;
    out.write_u32(dir_count as u32)?;
    out.write_u32(0)?;
    out.write_u64(NEG1)?;
    out.write_u64(0)?;
    out.write_u64(0)?;
    out.write_u64(0)?;
    out.write_u32(CCHUNK_SIZE as u32)?;
    out.write_u32(2)?;
    out.write_u32(0)?;
    out.write_u32(1)?;
    out.write_u32(0)?;
    out.write_u64(num_dchunks)?;
    out.write_u64(0x100000)?;
    out.write_u64(0x20000)?;
    out.write_u32(0)?;
    out.write(&BLOCK_CAOL)?;
    out.write(&BLOCK_ITSF)?;
    let content_base_pos = out.tell()?;
    out.write_u64(0)?;
    out.write_u32(timestamp)?;
    out.write_u32(LANGUAGE_ID)?;

    let mut pieces = [(0u64, 0u64); NUM_PIECES];

    // Piece 0: file size record
    let start = out.tell()?;
    out.write_u32(0x1FE)?;
    out.write_u32(0)?;
    let file_size_pos = out.tell()?;
    out.write_u64(0)?;
    out.write_u64(0)?;
    pieces[0] = (start, out.tell()? - start);

    // Piece 1: directory chunks
    let start = out.tell()?;
    out.write(b"IFCM")?;
    out.write_u32(1)?;
    out.write_u32(DCHUNK_SIZE as u32)?;
    out.write_u32(0x100000)?;
    out.write_u64(NEG1)?;
    out.write_u64(num_dchunks + chunks.has_index() as u64)?;
    for chunk in &chunks.dchunks {
        out.write(chunk)?;
    }
    if let Some(index) = &chunks.index {
        out.write(index)?;
    }
    pieces[1] = (start, out.tell()? - start);

    // Piece 2: count chunk
    let start = out.tell()?;
    out.write(b"IFCM")?;
    out.write_u32(1)?;
    out.write_u32(CCHUNK_SIZE as u32)?;
    out.write_u32(0x20000)?;
    out.write_u64(NEG1)?;
    out.write_u64(1)?;
    out.write(&chunks.count_chunk)?;
    pieces[2] = (start, out.tell()? - start);

    for (slot, guid) in [(3, PIECE3_GUID), (4, PIECE4_GUID)] {
        let start = out.tell()?;
        out.write(&pack_guid(guid))?;
        pieces[slot] = (start, 16);
    }

    let content_base = out.tell()?;
    out.write(content)?;
    let file_size = out.tell()?;

    for (i, (offset, size)) in pieces.iter().enumerate() {
        let mut entry = [0u8; 16];
        entry[..8].copy_from_slice(&offset.to_le_bytes());
        entry[8..].copy_from_slice(&size.to_le_bytes());
        out.patch(piece_table + i as u64 * 16, &entry)?;
    }
    out.patch(content_base_pos, &content_base.to_le_bytes())?;
    out.patch(file_size_pos, &file_size.to_le_bytes())?;

    Ok(file_size)
}
