use quick_xml::Reader;
use quick_xml::events::Event;
use std::io::{Read, Seek};
use std::path::Path;
use zip::ZipArchive;

use log::{debug, warn};

use crate::book::{Book, ItemData, Metadata, is_oeb_doc, is_oeb_style};
use crate::css::Stylesheet;
use crate::dom::{Dom, NodeId, parse_xml_bytes};
use crate::error::{Error, Result};
use crate::util::{decode_text, detect_media_format, normalize_href};

/// Parsed package document.
#[derive(Debug, Default)]
struct OpfData {
    metadata: Metadata,
    manifest: Vec<OpfItem>,
    /// `(idref, linear)` in reading order.
    spine: Vec<(String, bool)>,
    /// `(type, title, href)`.
    guide: Vec<(String, String, String)>,
    /// Manifest id of the cover image.
    cover: Option<String>,
}

/// Manifest entry as declared in the OPF.
#[derive(Debug)]
struct OpfItem {
    id: String,
    href: String,
    media_type: String,
    properties: Option<String>,
}

/// Read an EPUB file from disk into a [`Book`].
///
/// Supports EPUB 2 and EPUB 3 packages. Content documents are parsed into
/// element trees, stylesheets are parsed, and everything else is kept as
/// raw bytes.
///
/// # Example
///
/// ```no_run
/// use litwriter::read_epub;
///
/// let book = read_epub("path/to/book.epub")?;
/// println!("Title: {}", book.metadata.title);
/// # Ok::<(), litwriter::Error>(())
/// ```
pub fn read_epub<P: AsRef<Path>>(path: P) -> Result<Book> {
    let file = std::fs::File::open(path)?;
    read_epub_from_reader(file)
}

/// Read an EPUB from any [`Read`] + [`Seek`] source.
///
/// # Example
///
/// ```no_run
/// use std::io::Cursor;
/// use litwriter::epub::read_epub_from_reader;
///
/// let epub_data: Vec<u8> = std::fs::read("book.epub")?;
/// let book = read_epub_from_reader(Cursor::new(epub_data))?;
/// # Ok::<(), litwriter::Error>(())
/// ```
pub fn read_epub_from_reader<R: Read + Seek>(reader: R) -> Result<Book> {
    let mut archive = ZipArchive::new(reader)?;

    // 1. Find the OPF file path from container.xml
    let opf_path = find_opf_path(&mut archive)?;
    let opf_dir = Path::new(&opf_path)
        .parent()
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_default();

    // 2. Parse the OPF file
    let opf_content = read_archive_file_bytes(&mut archive, &opf_path)?;
    let opf = parse_opf(strip_bom(&opf_content))?;

    // 3. Load manifest items, hrefs relative to the package document
    let mut book = Book::new();
    book.metadata = opf.metadata;
    for item in opf.manifest {
        let full_path = resolve_path(&opf_dir, &item.href);
        let data = match read_archive_file_bytes(&mut archive, &full_path) {
            Ok(data) => data,
            Err(e) => {
                warn!("Manifest item {:?} could not be read: {e}", item.href);
                continue;
            }
        };
        let media_type = if item.media_type.is_empty() {
            detect_media_format(&item.href, &data).mime_type().to_string()
        } else {
            item.media_type
        };
        let data = load_item_data(&item.href, &media_type, data);
        book.manifest.add(item.id, &item.href, media_type, data);
    }

    // 4. Spine and guide
    for (idref, linear) in opf.spine {
        if book.manifest.get(&idref).is_some() {
            book.spine.push(idref, linear);
        } else {
            debug!("Spine references missing item {idref:?}");
        }
    }
    for (kind, title, href) in opf.guide {
        book.guide.add(kind, title, normalize_href(&href));
    }

    book.metadata.cover = opf.cover.filter(|id| book.manifest.get(id).is_some());
    Ok(book)
}

/// Parse a manifest item's payload according to its media type.
fn load_item_data(href: &str, media_type: &str, data: Vec<u8>) -> ItemData {
    if is_oeb_doc(media_type) {
        match parse_xml_bytes(&data) {
            Ok(dom) if dom.root().is_some() => ItemData::Document(dom),
            Ok(_) => {
                warn!("Document {href:?} has no root element; keeping raw bytes");
                ItemData::Bytes(data)
            }
            Err(e) => {
                warn!("Failed to parse document {href:?}: {e}; keeping raw bytes");
                ItemData::Bytes(data)
            }
        }
    } else if is_oeb_style(media_type) {
        ItemData::Stylesheet(Stylesheet::parse(&decode_text(&data, None)))
    } else {
        ItemData::Bytes(data)
    }
}

fn find_opf_path<R: Read + Seek>(archive: &mut ZipArchive<R>) -> Result<String> {
    let bytes = read_archive_file_bytes(archive, "META-INF/container.xml")?;
    let container = String::from_utf8(strip_bom(&bytes).to_vec())?;

    let mut reader = Reader::from_str(&container);
    reader.config_mut().trim_text(true);

    loop {
        match reader.read_event() {
            Ok(Event::Empty(e)) | Ok(Event::Start(e)) if e.name().as_ref() == b"rootfile" => {
                for attr in e.attributes().flatten() {
                    if attr.key.as_ref() == b"full-path" {
                        return Ok(String::from_utf8(attr.value.to_vec())?);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(Error::Xml(e)),
            _ => {}
        }
    }

    Err(Error::InvalidEpub(
        "No rootfile found in container.xml".into(),
    ))
}

fn parse_opf(content: &[u8]) -> Result<OpfData> {
    let dom = parse_xml_bytes(content)?;
    let package = dom
        .root()
        .filter(|&root| dom.local_name(root) == Some("package"))
        .ok_or_else(|| Error::InvalidEpub("Package document has no <package> root".into()))?;
    let unique_id = dom.get_attr(package, "unique-identifier").map(str::to_string);

    let mut opf = OpfData::default();
    let mut epub2_cover_id = None;

    for section in dom.element_children(package) {
        match dom.local_name(section) {
            Some("metadata") => {
                epub2_cover_id = parse_metadata(&dom, section, unique_id.as_deref(), &mut opf.metadata);
            }
            Some("manifest") => {
                for item in children_named(&dom, section, "item") {
                    let (Some(id), Some(href)) = (dom.get_attr(item, "id"), dom.get_attr(item, "href"))
                    else {
                        continue;
                    };
                    opf.manifest.push(OpfItem {
                        id: id.to_string(),
                        href: href.to_string(),
                        media_type: dom.get_attr(item, "media-type").unwrap_or_default().to_string(),
                        properties: dom.get_attr(item, "properties").map(str::to_string),
                    });
                }
            }
            Some("spine") => {
                for itemref in children_named(&dom, section, "itemref") {
                    if let Some(idref) = dom.get_attr(itemref, "idref") {
                        let linear = dom.get_attr(itemref, "linear") != Some("no");
                        opf.spine.push((idref.to_string(), linear));
                    }
                }
            }
            Some("guide") => {
                for reference in children_named(&dom, section, "reference") {
                    let (Some(kind), Some(href)) =
                        (dom.get_attr(reference, "type"), dom.get_attr(reference, "href"))
                    else {
                        continue;
                    };
                    let title = dom.get_attr(reference, "title").unwrap_or_default();
                    opf.guide.push((kind.to_string(), title.to_string(), href.to_string()));
                }
            }
            _ => {}
        }
    }

    // Detect cover image: EPUB3 "cover-image" property takes priority over EPUB2 meta
    let epub3_cover = opf.manifest.iter().find(|item| {
        item.properties
            .as_ref()
            .is_some_and(|props| props.split_ascii_whitespace().any(|p| p == "cover-image"))
    });
    opf.cover = match epub3_cover {
        Some(item) => Some(item.id.clone()),
        None => epub2_cover_id.filter(|id| opf.manifest.iter().any(|item| item.id == *id)),
    };

    Ok(opf)
}

/// Fill Dublin Core fields; returns the EPUB2 `<meta name="cover">` id.
fn parse_metadata(
    dom: &Dom,
    metadata_el: NodeId,
    unique_id: Option<&str>,
    metadata: &mut Metadata,
) -> Option<String> {
    let mut cover = None;
    let mut identifiers: Vec<(Option<&str>, String)> = Vec::new();

    for el in dom.descendants(metadata_el) {
        let Some(local) = dom.local_name(el) else {
            continue;
        };
        let text = || dom.text_content(el).trim().to_string();
        match local {
            "title" if metadata.title.is_empty() => metadata.title = text(),
            "creator" => metadata.authors.push(text()),
            "contributor" => metadata.contributors.push(text()),
            "language" if metadata.language.is_empty() => metadata.language = text(),
            "identifier" => identifiers.push((dom.get_attr(el, "id"), text())),
            "publisher" => metadata.publisher = Some(text()),
            "description" => metadata.description = Some(text()),
            "subject" => metadata.subjects.push(text()),
            "date" if metadata.date.is_none() => metadata.date = Some(text()),
            "rights" => metadata.rights = Some(text()),
            "meta" => {
                if dom.get_attr(el, "name") == Some("cover")
                    && let Some(content) = dom.get_attr(el, "content")
                {
                    cover = Some(content.to_string());
                }
            }
            _ => {}
        }
    }

    // Prefer the identifier the package names as unique
    let unique = identifiers
        .iter()
        .find(|(id, _)| id.is_some() && *id == unique_id)
        .or(identifiers.first());
    if let Some((_, value)) = unique {
        metadata.identifier = value.clone();
    }
    cover
}

fn children_named<'a>(dom: &'a Dom, parent: NodeId, local: &'a str) -> impl Iterator<Item = NodeId> + 'a {
    dom.element_children(parent)
        .filter(move |&id| dom.local_name(id) == Some(local))
}

fn read_archive_file_bytes<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    path: &str,
) -> Result<Vec<u8>> {
    // Try direct lookup first
    match archive.by_name(path) {
        Ok(mut file) => {
            let mut contents = Vec::new();
            file.read_to_end(&mut contents)?;
            return Ok(contents);
        }
        Err(zip::result::ZipError::FileNotFound) => {}
        Err(e) => return Err(e.into()),
    }

    // Fallback: try percent-decoded path (handles malformed EPUBs)
    let decoded = percent_encoding::percent_decode_str(path)
        .decode_utf8()
        .map_err(|_| Error::InvalidEpub(format!("Invalid UTF-8 in path: {}", path)))?;

    let mut file = archive.by_name(&decoded)?;
    let mut contents = Vec::new();
    file.read_to_end(&mut contents)?;
    Ok(contents)
}

/// Strip UTF-8 BOM (byte order mark) if present
fn strip_bom(data: &[u8]) -> &[u8] {
    // UTF-8 BOM: EF BB BF
    if data.starts_with(&[0xEF, 0xBB, 0xBF]) {
        &data[3..]
    } else {
        data
    }
}

fn resolve_path(base: &str, href: &str) -> String {
    if base.is_empty() {
        href.to_string()
    } else {
        format!("{}/{}", base, href)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OPF: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="2.0" unique-identifier="uid">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:title>Don&apos;t Stop</dc:title>
    <dc:creator>First Author</dc:creator>
    <dc:identifier id="isbn">978-0</dc:identifier>
    <dc:identifier id="uid">urn:uuid:abc</dc:identifier>
    <dc:language>en</dc:language>
    <meta name="cover" content="cover-img"/>
  </metadata>
  <manifest>
    <item id="c1" href="text/c1.xhtml" media-type="application/xhtml+xml"/>
    <item id="notes" href="text/notes.xhtml" media-type="application/xhtml+xml"/>
    <item id="cover-img" href="images/cover.jpg" media-type="image/jpeg"/>
  </manifest>
  <spine toc="ncx">
    <itemref idref="c1"/>
    <itemref idref="notes" linear="no"/>
  </spine>
  <guide>
    <reference type="text" title="Start" href="text/c1.xhtml#top"/>
  </guide>
</package>"#;

    #[test]
    fn test_parse_opf_metadata() {
        let opf = parse_opf(OPF.as_bytes()).unwrap();
        assert_eq!(opf.metadata.title, "Don't Stop");
        assert_eq!(opf.metadata.authors, vec!["First Author"]);
        assert_eq!(opf.metadata.identifier, "urn:uuid:abc");
        assert_eq!(opf.metadata.language, "en");
        assert_eq!(opf.cover.as_deref(), Some("cover-img"));
    }

    #[test]
    fn test_parse_opf_structure() {
        let opf = parse_opf(OPF.as_bytes()).unwrap();
        let ids: Vec<&str> = opf.manifest.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "notes", "cover-img"]);
        assert_eq!(
            opf.spine,
            vec![("c1".to_string(), true), ("notes".to_string(), false)]
        );
        assert_eq!(opf.guide[0].0, "text");
        assert_eq!(opf.guide[0].2, "text/c1.xhtml#top");
    }

    #[test]
    fn test_epub3_cover_property_wins() {
        let opf = OPF.replace(
            r#"href="text/notes.xhtml" media-type="application/xhtml+xml""#,
            r#"href="text/notes.xhtml" media-type="application/xhtml+xml" properties="cover-image""#,
        );
        let opf = parse_opf(opf.as_bytes()).unwrap();
        assert_eq!(opf.cover.as_deref(), Some("notes"));
    }

    #[test]
    fn test_load_item_data_variants() {
        let doc = load_item_data("a.xhtml", "application/xhtml+xml", b"<html><body/></html>".to_vec());
        assert!(matches!(doc, ItemData::Document(_)));

        let broken = load_item_data("b.xhtml", "application/xhtml+xml", b"<html><body>".to_vec());
        assert!(matches!(broken, ItemData::Bytes(_) | ItemData::Document(_)));

        let css = load_item_data("s.css", "text/css", b"p { color: red }".to_vec());
        assert!(matches!(css, ItemData::Stylesheet(_)));

        let img = load_item_data("i.png", "image/png", vec![1, 2, 3]);
        assert!(matches!(img, ItemData::Bytes(ref b) if b == &[1, 2, 3]));
    }

    #[test]
    fn test_strip_bom_and_resolve_path() {
        assert_eq!(strip_bom(b"\xEF\xBB\xBFabc"), b"abc");
        assert_eq!(strip_bom(b"abc"), b"abc");
        assert_eq!(resolve_path("OEBPS", "c1.xhtml"), "OEBPS/c1.xhtml");
        assert_eq!(resolve_path("", "c1.xhtml"), "c1.xhtml");
    }
}
