//! Section builder.
//!
//! Routes every manifest item into one of the four storage sections, then
//! emits the synthetic entries a reader expects: the manifest, page-break
//! tables, the tokenized package metadata, the DRM stub, the storage
//! namelist and the transformed `::DataSpace/Storage` streams.

use std::collections::HashMap;

use log::{debug, warn};

use crate::book::{
    Book, CSS_MIME, ItemData, ManifestItem, XHTML_MIME, is_lit_image, is_oeb_doc, is_oeb_style,
};
use crate::dom::QName;
use crate::error::Result;
use crate::util::new_guid;

use super::directory::Directory;
use super::drm::{BOOK_KEY, derive_key, des_encrypt, drm_source};
use super::rebinary::{PageBreak, TokenizedItem, tokenize};
use super::{
    DES_GUID, LZXC_CONTROL, LZXCOMPRESS_GUID, MSDES_CONTROL, ROOT_OFFSET, ROOT_SIZE,
    SECTION_NAMES, html_map, lzx, opf_map, pack_guid,
};

/// Guide types Microsoft Reader looks up for cover art.
const COVER_TYPES: [(&str, &str); 4] = [
    ("other.ms-coverimage-standard", "Front Cover Image"),
    ("other.ms-titleimage-standard", "Title Image"),
    ("other.ms-thumbimage-standard", "Front Cover Thumbnail"),
    ("other.ms-thumbimage", "Front Cover Thumbnail"),
];

/// Storage transforms, applied innermost first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transform {
    Lzx,
    Des,
}

impl Transform {
    fn guid(self) -> &'static str {
        match self {
            Transform::Lzx => LZXCOMPRESS_GUID,
            Transform::Des => DES_GUID,
        }
    }

    fn control(self) -> &'static [u8] {
        match self {
            Transform::Lzx => &LZXC_CONTROL,
            Transform::Des => &MSDES_CONTROL,
        }
    }
}

const STORAGE: [(usize, &[Transform]); 3] = [
    (1, &[Transform::Lzx]),
    (2, &[Transform::Lzx, Transform::Des]),
    (3, &[Transform::Des]),
];

/// Add the version marker and point the Microsoft Reader cover types at
/// the cover image.
pub(crate) fn prepare_book(book: &mut Book) {
    book.metadata
        .add("litwriter-version", env!("CARGO_PKG_VERSION"));

    let cover_href = book
        .metadata
        .cover
        .as_deref()
        .and_then(|id| book.manifest.get(id))
        .map(|item| item.href.clone());
    match cover_href {
        Some(href) => {
            for (kind, title) in COVER_TYPES {
                book.guide.add(kind, title, href.clone());
            }
        }
        None => warn!("No suitable cover image found."),
    }
}

/// What was stored for a manifest item.
#[derive(Debug, Default)]
struct Stored {
    size: u64,
    /// Offset into the concatenated spine documents.
    offset: u64,
    page_breaks: Vec<PageBreak>,
}

pub(crate) struct SectionBuilder<'a> {
    book: &'a Book,
    document_guid: String,
    dir: Directory,
    stored: HashMap<&'a str, Stored>,
    meta: Vec<u8>,
}

impl<'a> SectionBuilder<'a> {
    /// Build the complete directory for `book`.
    ///
    /// Sections 1-3 end up empty; their transformed contents live in
    /// section 0 under `::DataSpace/Storage`.
    pub(crate) fn build(book: &'a Book, document_guid: Option<&str>) -> Result<Directory> {
        let document_guid = match document_guid {
            Some(guid) => guid.trim_matches(|c| c == '{' || c == '}').to_uppercase(),
            None => new_guid(),
        };
        let mut builder = Self {
            book,
            document_guid,
            dir: Directory::new(),
            stored: HashMap::new(),
            meta: Vec::new(),
        };

        builder.dir.add_folder_at("/", ROOT_OFFSET, ROOT_SIZE)?;
        builder.build_data()?;
        builder.build_manifest()?;
        builder.build_page_breaks()?;
        builder.build_meta()?;
        builder.build_drm_storage()?;
        builder.build_version()?;
        builder.build_namelist()?;
        builder.build_storage()?;
        builder.build_transforms();

        debug!("Built LIT directory with {} entries", builder.dir.len());
        Ok(builder.dir)
    }

    fn build_data(&mut self) -> Result<()> {
        self.dir.add_folder("/data")?;
        let book = self.book;

        for item in book.manifest.iter() {
            let mime = item.media_type.as_str();
            if !(is_oeb_doc(mime) || is_oeb_style(mime) || is_lit_image(mime)) {
                warn!(
                    "File {:?} of unknown media-type {:?} excluded from output.",
                    item.href, mime
                );
                continue;
            }

            let name = format!("/data/{}", item.id);
            let stored = match &item.data {
                ItemData::Document(dom) => {
                    let tokens = match dom.root() {
                        Some(root) => tokenize(dom, root, Some(item), &book.manifest, html_map()),
                        None => TokenizedItem::default(),
                    };
                    self.dir.add_folder(name.clone())?;
                    self.dir
                        .add_file(format!("{name}/ahc"), &tokens.anchor_catalog, 0)?;
                    self.dir
                        .add_file(format!("{name}/aht"), &tokens.anchor_table, 0)?;
                    self.dir
                        .add_file(format!("{name}/content"), &tokens.content, 1)?;
                    Stored {
                        size: tokens.content.len() as u64,
                        offset: 0,
                        page_breaks: tokens.page_breaks,
                    }
                }
                ItemData::Stylesheet(sheet) => {
                    let bytes = sheet.bytes_representation();
                    self.dir.add_file(name, bytes, 0)?;
                    Stored {
                        size: bytes.len() as u64,
                        ..Default::default()
                    }
                }
                ItemData::Bytes(bytes) => {
                    self.dir.add_file(name, bytes, 0)?;
                    Stored {
                        size: bytes.len() as u64,
                        ..Default::default()
                    }
                }
            };
            self.stored.insert(item.id.as_str(), stored);
        }
        Ok(())
    }

    /// Stored spine documents, split into linear and non-linear reading order.
    fn spine_groups(&self) -> (Vec<&'a ManifestItem>, Vec<&'a ManifestItem>) {
        let book = self.book;
        let mut linear = Vec::new();
        let mut nonlinear = Vec::new();
        for (item, is_linear) in book.spine_items() {
            if !self.stored.contains_key(item.id.as_str()) {
                continue;
            }
            if is_linear {
                linear.push(item);
            } else {
                nonlinear.push(item);
            }
        }
        (linear, nonlinear)
    }

    fn build_manifest(&mut self) -> Result<()> {
        let book = self.book;
        let (linear, nonlinear) = self.spine_groups();
        let mut css = Vec::new();
        let mut images = Vec::new();
        for item in book.manifest.iter() {
            if book.spine.contains(&item.id) || !self.stored.contains_key(item.id.as_str()) {
                continue;
            }
            if is_oeb_style(&item.media_type) {
                css.push(item);
            } else if is_lit_image(&item.media_type) {
                images.push(item);
            }
        }

        let mut data = vec![1, b'\\'];
        let mut offset = 0u64;
        for (in_spine, items) in [(true, linear), (true, nonlinear), (false, css), (false, images)] {
            data.extend_from_slice(&(items.len() as u32).to_le_bytes());
            for item in items {
                let item_offset = if in_spine {
                    let stored = self.stored.entry(item.id.as_str()).or_default();
                    stored.offset = offset;
                    offset += stored.size;
                    stored.offset
                } else {
                    0
                };

                let media_type = if is_oeb_doc(&item.media_type) {
                    XHTML_MIME
                } else if is_oeb_style(&item.media_type) {
                    CSS_MIME
                } else {
                    item.media_type.as_str()
                };

                data.extend_from_slice(&(item_offset as u32).to_le_bytes());
                for value in [item.id.as_str(), item.href.as_str(), media_type] {
                    push_len(&mut data, value.chars().count());
                    data.extend_from_slice(value.as_bytes());
                }
                data.push(0);
            }
        }

        self.dir.add_file("/manifest", &data, 0)
    }

    fn build_page_breaks(&mut self) -> Result<()> {
        let (linear, nonlinear) = self.spine_groups();
        let mut pb1 = Vec::new();
        let mut pb2: Vec<u8> = Vec::new();
        let mut pb3 = Vec::new();
        let mut current = 0u8;
        let mut bits = 0;

        let start = PageBreak {
            offset: 0,
            parents: Vec::new(),
        };
        let groups = linear
            .iter()
            .map(|item| (item, true))
            .chain(nonlinear.iter().map(|item| (item, false)));
        for (item, is_linear) in groups {
            let Some(stored) = self.stored.get(item.id.as_str()) else {
                continue;
            };
            let synthetic = (!is_linear).then_some(&start);
            for page_break in synthetic.into_iter().chain(&stored.page_breaks) {
                current = (current << 2) | 1;
                if page_break.parents.len() > 1 {
                    current |= 2;
                }
                bits += 2;
                if bits >= 8 {
                    pb3.push(current);
                    current = 0;
                    bits = 0;
                }

                let offset = page_break.offset as u64 + stored.offset;
                pb1.extend_from_slice(&(offset as u32).to_le_bytes());
                pb1.extend_from_slice(&(pb2.len() as u32).to_le_bytes());
                pb2.extend_from_slice(&(page_break.parents.len() as u32).to_le_bytes());
                for parent in &page_break.parents {
                    pb2.extend_from_slice(&parent.to_le_bytes());
                }
            }
        }
        if bits != 0 {
            pb3.push(current << (8 - bits));
        }

        self.dir.add_file("/pb1", &pb1, 0)?;
        self.dir.add_file("/pb2", &pb2, 0)?;
        self.dir.add_file("/pb3", &pb3, 0)
    }

    fn build_meta(&mut self) -> Result<()> {
        let mut opf = self.book.to_opf1();
        let package = opf.package;
        let guid = format!("{{{}}}", self.document_guid);
        for (name, value) in [
            ("ms--minimum_level", "0"),
            ("ms--attr5", "1"),
            ("ms--guid", guid.as_str()),
        ] {
            opf.dom.set_attr(package, QName::local(name), value);
        }

        let tokens = tokenize(&opf.dom, package, None, &self.book.manifest, opf_map());
        self.dir.add_file("/meta", &tokens.content, 0)?;
        self.meta = tokens.content;
        Ok(())
    }

    fn build_drm_storage(&mut self) -> Result<()> {
        self.dir.add_folder("/DRMStorage")?;
        let source = drm_source();
        self.dir.add_file("/DRMStorage/DRMSource", &source, 0)?;

        let key = derive_key(&[self.meta.as_slice(), source.as_slice()]);
        self.dir
            .add_file("/DRMStorage/DRMSealed", &des_encrypt(&key, &[0u8; 16]), 0)?;
        self.dir
            .add_file("/DRMStorage/ValidationStream", b"MSReader", 3)
    }

    fn build_version(&mut self) -> Result<()> {
        let mut data = Vec::with_capacity(4);
        data.extend_from_slice(&8u16.to_le_bytes());
        data.extend_from_slice(&1u16.to_le_bytes());
        self.dir.add_file("/Version", &data, 0)
    }

    fn build_namelist(&mut self) -> Result<()> {
        self.dir.ensure_folder("::DataSpace/");
        let mut data = Vec::new();
        data.extend_from_slice(&0x3Cu16.to_le_bytes());
        data.extend_from_slice(&(SECTION_NAMES.len() as u16).to_le_bytes());
        for name in SECTION_NAMES {
            let units: Vec<u16> = name.encode_utf16().collect();
            data.extend_from_slice(&(units.len() as u16).to_le_bytes());
            for unit in units {
                data.extend_from_slice(&unit.to_le_bytes());
            }
            data.extend_from_slice(&0u16.to_le_bytes());
        }
        self.dir.add_file("::DataSpace/NameList", &data, 0)
    }

    fn build_storage(&mut self) -> Result<()> {
        self.dir.ensure_folder("::DataSpace/Storage/");

        for (section, transforms) in STORAGE {
            let prefix = format!("::DataSpace/Storage/{}/", SECTION_NAMES[section]);
            self.dir.ensure_folder(prefix.clone());

            let mut data = self.dir.take_section(section);
            let mut control: Vec<u8> = Vec::new();
            let mut span = Vec::new();
            let mut list: Vec<u8> = Vec::new();
            let mut reset_table = None;

            for &transform in transforms {
                list = [pack_guid(transform.guid()).as_slice(), &list].concat();
                span.extend_from_slice(&(data.len() as u64).to_le_bytes());
                control = [transform.control(), &control].concat();
                if data.is_empty() {
                    continue;
                }
                match transform {
                    Transform::Des => data = des_encrypt(&BOOK_KEY, &data),
                    Transform::Lzx => {
                        let uncompressed_len = data.len() as u64;
                        let output = lzx::compress(&data);
                        debug!(
                            "Compressed {} from {} to {} bytes",
                            SECTION_NAMES[section],
                            uncompressed_len,
                            output.data.len()
                        );
                        reset_table = Some(lzx::reset_table_bytes(&output, uncompressed_len));
                        data = output.data;
                    }
                }
            }

            self.dir.add_file(format!("{prefix}Content"), &data, 0)?;
            self.dir.add_file(format!("{prefix}ControlData"), &control, 0)?;
            self.dir.add_file(format!("{prefix}SpanInfo"), &span, 0)?;
            self.dir.add_file(format!("{prefix}Transform/List"), &list, 0)?;
            if let Some(table) = reset_table {
                self.dir.add_file(
                    format!("{prefix}Transform/{LZXCOMPRESS_GUID}/InstanceData/ResetTable"),
                    &table,
                    0,
                )?;
            }
            for transform in transforms {
                let folder = format!("{prefix}Transform/{}/", transform.guid());
                self.dir.ensure_folder(folder.clone());
                self.dir.ensure_folder(format!("{folder}InstanceData/"));
            }
        }
        Ok(())
    }

    fn build_transforms(&mut self) {
        for guid in [LZXCOMPRESS_GUID, DES_GUID] {
            self.dir.ensure_folder(format!("::Transform/{guid}/"));
        }
    }
}

/// Length prefix for manifest strings: the character count as a code point.
fn push_len(out: &mut Vec<u8>, len: usize) {
    let c = char::from_u32(len as u32).unwrap_or('?');
    let mut buf = [0u8; 4];
    out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::book::Metadata;
    use crate::css::Stylesheet;
    use crate::dom::parse_xml;

    fn doc(book: &mut Book, id: &str, body: &str) {
        let xml = format!(r#"<html xmlns="http://www.w3.org/1999/xhtml"><body>{body}</body></html>"#);
        let dom = parse_xml(&xml).unwrap();
        book.manifest
            .add(id, format!("{id}.xhtml"), XHTML_MIME, ItemData::Document(dom));
    }

    fn file<'d>(dir: &'d Directory, name: &str) -> &'d [u8] {
        let entry = dir.get(name).unwrap_or_else(|| panic!("missing {name}"));
        assert_eq!(entry.section, 0);
        &dir.section(0)[entry.offset as usize..(entry.offset + entry.size) as usize]
    }

    fn sample_book() -> Book {
        let mut book = Book::new();
        book.metadata = Metadata::new("Sample").with_language("en");
        doc(&mut book, "c1", "<p>one</p>");
        doc(&mut book, "c2", "<p>two two two</p>");
        doc(&mut book, "notes", "<p>aside</p>");
        book.manifest.add(
            "css",
            "style.css",
            "text/css",
            ItemData::Stylesheet(Stylesheet::parse("p { margin: 0 }")),
        );
        book.manifest
            .add("pic", "pic.png", "image/png", ItemData::Bytes(vec![0x89, b'P', b'N', b'G']));
        book.manifest
            .add("font", "f.ttf", "font/ttf", ItemData::Bytes(vec![1, 2, 3]));
        book.spine.push("c1", true);
        book.spine.push("c2", true);
        book.spine.push("notes", false);
        book
    }

    #[test]
    fn test_prepare_book_cover() {
        let mut book = sample_book();
        book.metadata.cover = Some("pic".to_string());
        prepare_book(&mut book);
        for (kind, _) in COVER_TYPES {
            assert_eq!(book.guide.get(kind).unwrap().href, "pic.png");
        }
        assert_eq!(
            book.metadata.get("litwriter-version"),
            Some(env!("CARGO_PKG_VERSION"))
        );

        let mut bare = sample_book();
        prepare_book(&mut bare);
        assert!(bare.guide.is_empty());
    }

    #[test]
    fn test_data_routing() {
        let book = sample_book();
        let dir = SectionBuilder::build(&book, Some("{0000}")).unwrap();

        assert!(dir.contains("/"));
        assert!(dir.contains("/data/c1/"));
        assert!(dir.contains("/data/c1/ahc"));
        assert!(dir.contains("/data/c1/aht"));
        assert_eq!(dir.get("/data/c1/content").unwrap().section, 1);
        assert_eq!(file(&dir, "/data/css"), b"p { margin: 0 }");
        assert_eq!(file(&dir, "/data/pic"), &[0x89, b'P', b'N', b'G']);
        // Unknown media types are excluded
        assert!(!dir.contains("/data/font"));

        let root = dir.get("/").unwrap();
        assert_eq!((root.offset, root.size), (ROOT_OFFSET, ROOT_SIZE));
    }

    #[test]
    fn test_manifest_layout() {
        let book = sample_book();
        let dir = SectionBuilder::build(&book, None).unwrap();
        let data = file(&dir, "/manifest");
        assert_eq!(&data[..2], &[1, b'\\']);

        // Linear group: two documents, offsets 0 and len(c1)
        assert_eq!(u32::from_le_bytes(data[2..6].try_into().unwrap()), 2);
        assert_eq!(&data[6..10], &[0, 0, 0, 0]);
        let mut expected = vec![2, b'c', b'1', 8];
        expected.extend_from_slice(b"c1.xhtml");
        expected.push(XHTML_MIME.len() as u8);
        expected.extend_from_slice(XHTML_MIME.as_bytes());
        expected.push(0);
        assert_eq!(&data[10..10 + expected.len()], expected.as_slice());

        let c1_len = dir.get("/data/c1/content").unwrap().size as u32;
        let second = 10 + expected.len();
        assert_eq!(
            u32::from_le_bytes(data[second..second + 4].try_into().unwrap()),
            c1_len
        );
    }

    #[test]
    fn test_nonlinear_page_break_prepended() {
        let book = sample_book();
        let dir = SectionBuilder::build(&book, None).unwrap();
        // Only the synthetic break for the non-linear document
        let pb1 = file(&dir, "/pb1");
        assert_eq!(pb1.len(), 8);
        let c1 = dir.get("/data/c1/content").unwrap().size;
        let c2 = dir.get("/data/c2/content").unwrap().size;
        assert_eq!(
            u32::from_le_bytes(pb1[..4].try_into().unwrap()) as u64,
            c1 + c2
        );
        assert_eq!(file(&dir, "/pb2"), &[0, 0, 0, 0]);
        assert_eq!(file(&dir, "/pb3"), &[0b0100_0000]);
    }

    #[test]
    fn test_storage_streams() {
        let book = sample_book();
        let dir = SectionBuilder::build(&book, None).unwrap();

        assert!(dir.section(1).is_empty());
        assert!(dir.section(3).is_empty());

        let list = file(&dir, "::DataSpace/Storage/EbEncryptDS/Transform/List");
        assert_eq!(&list[..16], &pack_guid(DES_GUID));
        assert_eq!(&list[16..], &pack_guid(LZXCOMPRESS_GUID));

        let control = file(&dir, "::DataSpace/Storage/EbEncryptDS/ControlData");
        assert_eq!(&control[..16], &MSDES_CONTROL);
        assert_eq!(&control[16..], &LZXC_CONTROL);

        let span = file(&dir, "::DataSpace/Storage/MSCompressed/SpanInfo");
        let content_len: u64 = ["c1", "c2", "notes"]
            .iter()
            .map(|id| dir.get(&format!("/data/{id}/content")).unwrap().size)
            .sum();
        assert_eq!(span, &content_len.to_le_bytes());
        assert!(dir.contains(&format!(
            "::DataSpace/Storage/MSCompressed/Transform/{LZXCOMPRESS_GUID}/InstanceData/ResetTable"
        )));
        // Nothing to compress in section 2
        assert!(!dir.contains(&format!(
            "::DataSpace/Storage/EbEncryptDS/Transform/{LZXCOMPRESS_GUID}/InstanceData/ResetTable"
        )));
        assert!(file(&dir, "::DataSpace/Storage/EbEncryptDS/Content").is_empty());

        let validation = file(&dir, "::DataSpace/Storage/EbEncryptOnlyDS/Content");
        assert_eq!(validation, des_encrypt(&BOOK_KEY, b"MSReader").as_slice());

        assert!(dir.contains(&format!("::Transform/{LZXCOMPRESS_GUID}/")));
        assert!(dir.contains(&format!("::Transform/{DES_GUID}/")));
    }

    #[test]
    fn test_namelist_and_version() {
        let book = sample_book();
        let dir = SectionBuilder::build(&book, None).unwrap();
        assert_eq!(file(&dir, "/Version"), &[8, 0, 1, 0]);

        let names = file(&dir, "::DataSpace/NameList");
        assert_eq!(&names[..4], &[0x3C, 0, 4, 0]);
        assert_eq!(&names[4..6], &[12, 0]);
        assert_eq!(&names[6..8], &[b'U', 0]);
    }

    #[test]
    fn test_meta_carries_document_guid() {
        let book = sample_book();
        let dir = SectionBuilder::build(&book, Some("{abcd-1234}")).unwrap();
        let meta = file(&dir, "/meta");
        assert!(meta.windows(11).any(|w| w == b"{ABCD-1234}"));

        // The sealed key depends on the metadata
        let sealed = file(&dir, "/DRMStorage/DRMSealed").to_vec();
        let other = SectionBuilder::build(&book, Some("{ffff}")).unwrap();
        assert_ne!(file(&other, "/DRMStorage/DRMSealed"), sealed.as_slice());
    }
}
