//! End-to-end tests of the LIT container: header, directory and the
//! section 0 streams, read back through a minimal reader.

mod common;

use std::io::Cursor;

use des::Des;
use des::cipher::generic_array::GenericArray;
use des::cipher::{BlockDecrypt, KeyInit};

use common::{
    LitFile, book_with_docs, fixed_config, u16_at, u32_at, u64_at, write_to_vec, xhtml,
};
use litwriter::lit::drm::{BOOK_KEY, derive_key, drm_source};
use litwriter::lit::{LZXCOMPRESS_GUID, QUICKREF_DENSITY, decode_vlq};
use litwriter::{Book, Exporter, ItemData, LitExporter, write_lit};

fn des_decrypt(key: &[u8; 8], data: &[u8]) -> Vec<u8> {
    let cipher = Des::new(GenericArray::from_slice(key));
    let mut out = data.to_vec();
    for block in out.chunks_exact_mut(8) {
        cipher.decrypt_block(GenericArray::from_mut_slice(block));
    }
    out
}

fn empty_book() -> Book {
    book_with_docs(&[("c1", "<html><head/><body/></html>", true)])
}

/// Manifest records as `(offset, id, href, media_type)`, grouped in file order.
fn parse_manifest(data: &[u8]) -> Vec<Vec<(u32, String, String, String)>> {
    assert_eq!(&data[..2], &[1, b'\\']);
    let mut pos = 2;
    let mut groups = Vec::new();
    for _ in 0..4 {
        let count = u32_at(data, pos);
        pos += 4;
        let mut group = Vec::new();
        for _ in 0..count {
            let offset = u32_at(data, pos);
            pos += 4;
            let mut strings = Vec::new();
            for _ in 0..3 {
                // Short ASCII strings: the code-point length is one byte
                let len = data[pos] as usize;
                pos += 1;
                strings.push(String::from_utf8(data[pos..pos + len].to_vec()).unwrap());
                pos += len;
            }
            assert_eq!(data[pos], 0);
            pos += 1;
            let media_type = strings.pop().unwrap();
            let href = strings.pop().unwrap();
            let id = strings.pop().unwrap();
            group.push((offset, id, href, media_type));
        }
        groups.push(group);
    }
    assert_eq!(pos, data.len());
    groups
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn test_empty_book_has_required_entries() {
    let lit = LitFile::parse(write_to_vec(&mut empty_book()));

    assert_eq!(&lit.data[..8], b"ITOLITLS");
    for name in [
        "/manifest",
        "/pb1",
        "/pb2",
        "/pb3",
        "/meta",
        "/DRMStorage/DRMSource",
        "/DRMStorage/DRMSealed",
        "/Version",
        "::DataSpace/NameList",
    ] {
        let entry = lit.get(name).unwrap_or_else(|| panic!("missing {name}"));
        assert_eq!(entry.section, 0, "{name}");
    }
    assert!(lit.get("/").is_some());
    assert!(lit.get("/data/c1/content").is_some());
    assert_eq!(lit.file("/Version"), &[8, 0, 1, 0]);
    assert_eq!(lit.dir_count as usize, lit.entries().count());
}

#[test]
fn test_manifest_offsets_follow_linear_content_sizes() {
    let long = "x".repeat(300);
    let mut book = book_with_docs(&[
        ("c1", &xhtml("<p>short</p>"), true),
        ("c2", &xhtml(&format!("<p>{long}</p>")), true),
        ("notes", &xhtml("<p>aside</p>"), false),
    ]);
    book.manifest.add(
        "pic",
        "pic.png",
        "image/png",
        ItemData::Bytes(vec![0x89, b'P', b'N', b'G']),
    );
    let lit = LitFile::parse(write_to_vec(&mut book));

    let c1_size = lit.get("/data/c1/content").unwrap().size as u32;
    let c2_size = lit.get("/data/c2/content").unwrap().size as u32;
    assert!(c1_size > 0 && c2_size > c1_size);

    let groups = parse_manifest(lit.file("/manifest"));
    let linear: Vec<_> = groups[0].iter().map(|(off, id, _, _)| (*off, id.as_str())).collect();
    assert_eq!(linear, vec![(0, "c1"), (c1_size, "c2")]);
    assert_eq!(groups[1].len(), 1);
    assert_eq!(groups[1][0].1, "notes");
    assert_eq!(groups[1][0].0, c1_size + c2_size);
    assert!(groups[2].is_empty());
    let images: Vec<_> = groups[3]
        .iter()
        .map(|(off, id, href, mime)| (*off, id.as_str(), href.as_str(), mime.as_str()))
        .collect();
    assert_eq!(images, vec![(0, "pic", "pic.png", "image/png")]);
    assert_eq!(groups[0][0].3, "application/xhtml+xml");
}

#[test]
fn test_page_break_bits_packed() {
    let div = r#"<div style="page-break-before: always">a</div>"#;
    let markup = format!("<html>{div}{div}{div}</html>");
    let mut book = book_with_docs(&[("c1", &markup, true)]);
    let lit = LitFile::parse(write_to_vec(&mut book));

    assert_eq!(lit.file("/pb3"), &[0b0101_0100]);

    let pb1 = lit.file("/pb1");
    let pb2 = lit.file("/pb2");
    assert_eq!(pb1.len(), 3 * 8);
    let offsets: Vec<u32> = pb1.chunks(8).map(|rec| u32_at(rec, 0)).collect();
    assert!(offsets.windows(2).all(|w| w[0] <= w[1]));
    for rec in pb1.chunks(8) {
        let parents_at = u32_at(rec, 4) as usize;
        assert_eq!(u32_at(pb2, parents_at), 1);
        // The only parent is the root element
        assert_eq!(u32_at(pb2, parents_at + 4), 0);
    }
}

#[test]
fn test_validation_stream_decrypts_with_zero_key() {
    let lit = LitFile::parse(write_to_vec(&mut empty_book()));

    assert_eq!(BOOK_KEY, [0u8; 8]);
    let validation = lit.get("/DRMStorage/ValidationStream").unwrap();
    assert_eq!(validation.section, 3);
    assert_eq!(validation.size, 8);

    let content = lit.file("::DataSpace/Storage/EbEncryptOnlyDS/Content");
    assert_eq!(des_decrypt(&BOOK_KEY, content), b"MSReader");
}

#[test]
fn test_sealed_key_matches_meta() {
    let lit = LitFile::parse(write_to_vec(&mut empty_book()));

    let source = lit.file("/DRMStorage/DRMSource");
    assert_eq!(source, drm_source().as_slice());
    let key = derive_key(&[lit.file("/meta"), source]);
    assert_eq!(des_decrypt(&key, lit.file("/DRMStorage/DRMSealed")), vec![0u8; 16]);
}

#[test]
fn test_compressed_storage_streams() {
    let mut book = book_with_docs(&[
        ("c1", &xhtml("<p>one</p>"), true),
        ("c2", &xhtml("<p>two</p>"), true),
    ]);
    let lit = LitFile::parse(write_to_vec(&mut book));

    let total: u64 = ["c1", "c2"]
        .iter()
        .map(|id| lit.get(&format!("/data/{id}/content")).unwrap().size)
        .sum();
    let span = lit.file("::DataSpace/Storage/MSCompressed/SpanInfo");
    assert_eq!(span, total.to_le_bytes());
    assert!(!lit.file("::DataSpace/Storage/MSCompressed/Content").is_empty());

    let table = lit.file(&format!(
        "::DataSpace/Storage/MSCompressed/Transform/{LZXCOMPRESS_GUID}/InstanceData/ResetTable"
    ));
    assert_eq!(u32_at(table, 0), 3);
    assert_eq!(u32_at(table, 8), 8);
    assert_eq!(u32_at(table, 12), 0x28);
    assert_eq!(u64_at(table, 16), total);
    assert_eq!(u64_at(table, 32), 0x8000);
}

/// First 16-bit word of an LZX frame holding a verbatim block of `len` bytes.
fn frame_header_word(len: usize, after_reset: bool) -> u16 {
    // Bits are read most significant first: [E8 flag] 001 len>>8 (16 bits)
    let block = (1u32 << 16) | (len as u32 >> 8);
    if after_reset {
        (block >> 4) as u16
    } else {
        (block >> 3) as u16
    }
}

#[test]
fn test_reset_table_entries_locate_frames() {
    let body: String = (0..8000)
        .map(|i| format!("<p id=\"p{i}\">Paragraph number {i} of the long chapter.</p>"))
        .collect();
    let mut book = book_with_docs(&[("c1", &xhtml(&body), true)]);
    let lit = LitFile::parse(write_to_vec(&mut book));

    let total = lit.get("/data/c1/content").unwrap().size as usize;
    let frames = total.div_ceil(0x8000);
    assert!(frames > 4, "content spans a reset interval");

    let content = lit.file("::DataSpace/Storage/MSCompressed/Content");
    let table = lit.file(&format!(
        "::DataSpace/Storage/MSCompressed/Transform/{LZXCOMPRESS_GUID}/InstanceData/ResetTable"
    ));
    assert_eq!(u32_at(table, 4) as usize, frames);
    assert_eq!(u32_at(table, 12), 0x28);
    assert_eq!(u64_at(table, 24), content.len() as u64);
    assert_eq!(table.len(), 0x28 + frames * 8);

    let entries: Vec<usize> = (0..frames).map(|n| u64_at(table, 0x28 + n * 8) as usize).collect();
    assert_eq!(entries[0], 0);
    assert!(entries.windows(2).all(|w| w[0] < w[1]));
    for (n, &offset) in entries.iter().enumerate() {
        assert!(offset < content.len());
        assert_eq!(offset % 2, 0, "frames are word aligned");
        let len = (total - n * 0x8000).min(0x8000);
        let after_reset = n % 4 == 0;
        assert_eq!(
            u16_at(content, offset),
            frame_header_word(len, after_reset),
            "frame {n} header"
        );
    }
}

// ============================================================================
// Invariants
// ============================================================================

#[test]
fn test_directory_names_unique() {
    let lit = LitFile::parse(write_to_vec(&mut book_with_docs(&[
        ("c1", &xhtml("<p>a</p>"), true),
        ("c2", &xhtml("<p>b</p>"), false),
    ])));
    let mut names: Vec<&str> = lit.entries().map(|e| e.name.as_str()).collect();
    let total = names.len();
    names.sort_unstable();
    names.dedup();
    assert_eq!(names.len(), total);
}

/// Book large enough to need several directory chunks.
fn many_entry_book() -> Book {
    let mut book = book_with_docs(&[("c1", &xhtml("<p>body</p>"), true)]);
    for i in 0..600 {
        book.manifest.add(
            format!("Image_{i:04}"),
            format!("images/{i:04}.png"),
            "image/png",
            ItemData::Bytes(vec![i as u8; 4]),
        );
    }
    book
}

#[test]
fn test_directory_sorted_across_chunks() {
    let lit = LitFile::parse(write_to_vec(&mut many_entry_book()));
    assert!(lit.chunks.len() > 1);
    assert!(lit.has_index);

    for (_, entries) in &lit.chunks {
        let keys: Vec<String> = entries.iter().map(|e| e.name.to_lowercase()).collect();
        assert!(keys.windows(2).all(|w| w[0] < w[1]), "unsorted chunk");
    }
    let firsts: Vec<String> = lit
        .chunks
        .iter()
        .map(|(_, entries)| entries[0].name.to_lowercase())
        .collect();
    assert!(firsts.windows(2).all(|w| w[0] < w[1]));

    // The index chunk lists each leaf's first name
    let index = lit.index.as_ref().unwrap();
    assert_eq!(&index[..4], b"AOLI");
    let mut pos = 16;
    for (cid, (_, entries)) in lit.chunks.iter().enumerate() {
        let (len, used) = decode_vlq(&index[pos..]).unwrap();
        pos += used;
        let name = std::str::from_utf8(&index[pos..pos + len as usize]).unwrap();
        assert_eq!(name, entries[0].name);
        pos += len as usize;
        let (chunk_id, used) = decode_vlq(&index[pos..]).unwrap();
        pos += used;
        assert_eq!(chunk_id, cid as u64);
    }
}

#[test]
fn test_quickrefs_point_at_entries() {
    let lit = LitFile::parse(write_to_vec(&mut many_entry_book()));
    for (chunk, entries) in &lit.chunks {
        let count = u16_at(chunk, chunk.len() - 2) as usize;
        assert_eq!(count, entries.len());
        let num_refs = count.div_ceil(QUICKREF_DENSITY);
        for k in 0..num_refs {
            let qref = u16_at(chunk, chunk.len() - 4 - 2 * k) as usize;
            assert_eq!(48 + qref, entries[k * QUICKREF_DENSITY].chunk_pos);
        }
    }
}

#[test]
fn test_piece_table_within_file() {
    for mut book in [empty_book(), many_entry_book()] {
        let lit = LitFile::parse(write_to_vec(&mut book));
        let file_size = lit.data.len() as u64;
        for (offset, size) in lit.pieces {
            assert!(offset < file_size);
            assert!(offset + size <= file_size);
        }
        assert_eq!(lit.content_base, lit.pieces[4].0 + 16);
        for entry in lit.entries().filter(|e| e.section == 0 && !e.name.ends_with('/')) {
            assert!(lit.content_base + entry.offset + entry.size <= file_size);
        }
    }
}

// ============================================================================
// Output destinations
// ============================================================================

#[test]
fn test_exporter_matches_writer() {
    let exporter = LitExporter::with_config(fixed_config());
    let mut cursor = Cursor::new(Vec::new());
    exporter.export(&mut empty_book(), &mut cursor).unwrap();
    assert_eq!(cursor.into_inner(), write_to_vec(&mut empty_book()));
}

#[test]
fn test_write_lit_to_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("book.lit");
    write_lit(&mut empty_book(), &path).unwrap();

    let lit = LitFile::parse(std::fs::read(&path).unwrap());
    assert!(lit.get("/meta").is_some());
}
