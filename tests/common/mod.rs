//! Shared fixtures: book builders, an in-memory EPUB builder and a minimal
//! LIT directory reader.

#![allow(dead_code)]

use std::io::{Cursor, Write};

use litwriter::dom::{Dom, NodeData, NodeId, parse_xml};
use litwriter::lit::{
    ATTR_NUMBER, FLAG_CLOSING, FLAG_CUSTOM, FLAG_OPENING, TagMap, decode_vlq,
};
use litwriter::{Book, ItemData, LitConfig, Metadata, write_lit_with_config};

pub const XHTML_NS: &str = "http://www.w3.org/1999/xhtml";

// ============================================================================
// Book fixtures
// ============================================================================

/// Wrap body markup in an XHTML document.
pub fn xhtml(body: &str) -> String {
    format!(r#"<html xmlns="{XHTML_NS}"><head><title>T</title></head><body>{body}</body></html>"#)
}

/// Book whose spine holds the given `(id, markup, linear)` documents.
pub fn book_with_docs(docs: &[(&str, &str, bool)]) -> Book {
    let mut book = Book::new();
    book.metadata = Metadata::new("Fixture")
        .with_author("Test Author")
        .with_language("en")
        .with_identifier("urn:uuid:fixture");
    for &(id, markup, linear) in docs {
        let dom = parse_xml(markup).expect("fixture parses");
        book.manifest.add(
            id,
            format!("{id}.xhtml"),
            "application/xhtml+xml",
            ItemData::Document(dom),
        );
        book.spine.push(id, linear);
    }
    book
}

pub fn fixed_config() -> LitConfig {
    LitConfig {
        document_guid: Some("{12345678-9ABC-DEF0-1234-56789ABCDEF0}".to_string()),
        timestamp: Some(1_000_000),
    }
}

/// Write a book to memory with a fixed configuration.
pub fn write_to_vec(book: &mut Book) -> Vec<u8> {
    let mut cursor = Cursor::new(Vec::new());
    write_lit_with_config(book, &mut cursor, &fixed_config()).expect("write succeeds");
    cursor.into_inner()
}

/// Build an EPUB archive in memory from `(path, contents)` pairs.
pub fn build_epub(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let stored = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Stored);
    zip.start_file("mimetype", stored).unwrap();
    zip.write_all(b"application/epub+zip").unwrap();
    for (path, data) in files {
        zip.start_file(*path, stored).unwrap();
        zip.write_all(data).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

pub const CONTAINER_XML: &str = r#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#;

// ============================================================================
// LIT reader
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub name: String,
    pub section: u64,
    pub offset: u64,
    pub size: u64,
    /// Byte position of the entry inside its chunk.
    pub chunk_pos: usize,
}

/// Parsed view of a LIT file: header fields, directory and section 0.
pub struct LitFile {
    pub data: Vec<u8>,
    pub pieces: [(u64, u64); 5],
    pub content_base: u64,
    pub dir_count: u32,
    pub has_index: bool,
    /// AOLL chunks with their decoded entries.
    pub chunks: Vec<(Vec<u8>, Vec<Entry>)>,
    pub index: Option<Vec<u8>>,
}

pub fn u16_at(data: &[u8], pos: usize) -> u16 {
    u16::from_le_bytes([data[pos], data[pos + 1]])
}

pub fn u32_at(data: &[u8], pos: usize) -> u32 {
    u32::from_le_bytes(data[pos..pos + 4].try_into().unwrap())
}

pub fn u64_at(data: &[u8], pos: usize) -> u64 {
    u64::from_le_bytes(data[pos..pos + 8].try_into().unwrap())
}

const SECONDARY: usize = 120;

impl LitFile {
    pub fn parse(data: Vec<u8>) -> Self {
        assert_eq!(&data[..8], b"ITOLITLS");
        let mut pieces = [(0, 0); 5];
        for (i, piece) in pieces.iter_mut().enumerate() {
            *piece = (u64_at(&data, 40 + i * 16), u64_at(&data, 48 + i * 16));
        }
        let content_base = u64_at(&data, SECONDARY + 216);
        let dir_count = u32_at(&data, SECONDARY + 64);
        let has_index = u32_at(&data, SECONDARY + 52) == 2;

        let (p1, p1_size) = (pieces[1].0 as usize, pieces[1].1 as usize);
        assert_eq!(&data[p1..p1 + 4], b"IFCM");
        let chunk_size = u32_at(&data, p1 + 8) as usize;
        let num_chunks = u64_at(&data, p1 + 24) as usize;
        assert_eq!(32 + num_chunks * chunk_size, p1_size);

        let mut chunks = Vec::new();
        let mut index = None;
        for i in 0..num_chunks {
            let start = p1 + 32 + i * chunk_size;
            let chunk = data[start..start + chunk_size].to_vec();
            match &chunk[..4] {
                b"AOLL" => {
                    let entries = parse_entries(&chunk);
                    chunks.push((chunk, entries));
                }
                b"AOLI" => index = Some(chunk),
                other => panic!("unexpected chunk tag {other:?}"),
            }
        }

        LitFile {
            data,
            pieces,
            content_base,
            dir_count,
            has_index,
            chunks,
            index,
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.chunks.iter().flat_map(|(_, entries)| entries.iter())
    }

    pub fn get(&self, name: &str) -> Option<&Entry> {
        self.entries().find(|e| e.name == name)
    }

    /// Contents of a section 0 file.
    pub fn file(&self, name: &str) -> &[u8] {
        let entry = self
            .get(name)
            .unwrap_or_else(|| panic!("missing entry {name}"));
        assert_eq!(entry.section, 0, "{name} is not in section 0");
        let start = (self.content_base + entry.offset) as usize;
        &self.data[start..start + entry.size as usize]
    }
}

fn parse_entries(chunk: &[u8]) -> Vec<Entry> {
    let count = u16_at(chunk, chunk.len() - 2) as usize;
    let mut pos = 48;
    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        let chunk_pos = pos;
        let mut next = || {
            let (value, used) = decode_vlq(&chunk[pos..]).expect("valid vlq");
            pos += used;
            value
        };
        let len = next() as usize;
        let name = String::from_utf8(chunk[pos..pos + len].to_vec()).expect("utf-8 name");
        pos += len;
        let section = decode_at(chunk, &mut pos);
        let offset = decode_at(chunk, &mut pos);
        let size = decode_at(chunk, &mut pos);
        entries.push(Entry {
            name,
            section,
            offset,
            size,
            chunk_pos,
        });
    }
    entries
}

fn decode_at(chunk: &[u8], pos: &mut usize) -> u64 {
    let (value, used) = decode_vlq(&chunk[*pos..]).expect("valid vlq");
    *pos += used;
    value
}

// ============================================================================
// Token stream reader
// ============================================================================

/// Markup tree rebuilt from a token stream, or read from a `Dom`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Markup {
    Element {
        name: String,
        attrs: Vec<(String, String)>,
        children: Vec<Markup>,
    },
    Text(String),
}

struct TokenReader<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
}

impl TokenReader<'_> {
    fn int(&mut self) -> u32 {
        self.chars.next().expect("token stream truncated") as u32
    }

    fn string(&mut self, len: u32) -> String {
        (0..len).map(|_| self.chars.next().expect("string truncated")).collect()
    }

    /// `code` already read: a custom name, or a dictionary lookup.
    fn name(&mut self, code: u32, lookup: impl Fn(u32) -> Option<&'static str>) -> String {
        if code == FLAG_CUSTOM {
            let len = self.int() - 1;
            self.string(len)
        } else {
            lookup(code)
                .unwrap_or_else(|| panic!("unknown code {code:#x}"))
                .to_string()
        }
    }
}

/// Rebuild the markup tree from ReBinary content.
pub fn detokenize(content: &[u8], map: &TagMap) -> Vec<Markup> {
    let text = std::str::from_utf8(content).expect("token stream is UTF-8");
    let mut reader = TokenReader {
        chars: text.chars().peekable(),
    };
    // (name, attrs, children) of open elements; the outermost holds the result
    let mut stack: Vec<(String, Vec<(String, String)>, Vec<Markup>)> =
        vec![(String::new(), Vec::new(), Vec::new())];

    while let Some(&c) = reader.chars.peek() {
        if c != '\0' {
            let mut run = String::new();
            while let Some(&c) = reader.chars.peek()
                && c != '\0'
            {
                run.push(c);
                reader.chars.next();
            }
            stack.last_mut().unwrap().2.push(Markup::Text(run));
            continue;
        }
        reader.chars.next();
        let flags = reader.int();

        if flags & FLAG_OPENING == 0 {
            assert_ne!(flags & FLAG_CLOSING, 0, "closing token");
            assert_eq!(reader.int(), 0);
            let (name, attrs, children) = stack.pop().unwrap();
            stack.last_mut().unwrap().2.push(Markup::Element {
                name,
                attrs,
                children,
            });
            continue;
        }

        let tag_code = reader.int();
        let tag_index = (tag_code != FLAG_CUSTOM).then_some(tag_code);
        let name = reader.name(tag_code, |c| map.tag_name(c));
        let mut attrs = Vec::new();
        loop {
            let code = reader.int();
            if code == 0 {
                break;
            }
            let attr = reader.name(code, |c| map.attr_name(tag_index, c));
            let len = reader.int();
            let value = if len == ATTR_NUMBER {
                (reader.int() - 1).to_string()
            } else {
                reader.string(len - 1)
            };
            attrs.push((attr, value));
        }

        if flags & FLAG_CLOSING != 0 {
            stack.last_mut().unwrap().2.push(Markup::Element {
                name,
                attrs,
                children: Vec::new(),
            });
        } else {
            stack.push((name, attrs, Vec::new()));
        }
    }

    assert_eq!(stack.len(), 1, "unclosed elements");
    stack.pop().unwrap().2
}

/// The markup a tree should tokenize to, with namespace declarations
/// written as `xmlns` attributes after the element's own.
pub fn markup_of(dom: &Dom, id: NodeId) -> Markup {
    match &dom.get(id).unwrap().data {
        NodeData::Element {
            name,
            attrs,
            namespaces,
        } => {
            let mut all: Vec<(String, String)> = attrs
                .iter()
                .map(|a| (a.name.local.clone(), a.value.clone()))
                .collect();
            all.extend(namespaces.iter().map(|(prefix, uri)| {
                let attr = match prefix {
                    Some(p) => format!("xmlns:{p}"),
                    None => "xmlns".to_string(),
                };
                (attr, uri.clone())
            }));
            Markup::Element {
                name: name.local.clone(),
                attrs: all,
                children: dom.children(id).map(|c| markup_of(dom, c)).collect(),
            }
        }
        NodeData::Text(text) => Markup::Text(text.clone()),
        other => panic!("unexpected node {other:?}"),
    }
}
