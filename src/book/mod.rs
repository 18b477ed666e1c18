//! Open eBook (OEB) intermediate representation.
//!
//! A [`Book`] is what the LIT writer consumes: an ordered manifest of items
//! (parsed documents, parsed stylesheets, raw bytes), a spine, a guide and
//! Dublin Core metadata.

mod opf;

use std::collections::HashMap;

pub use opf::Opf1;

use crate::css::Stylesheet;
use crate::dom::Dom;
use crate::util::{normalize_href, resolve_href};

pub const XHTML_MIME: &str = "application/xhtml+xml";
pub const CSS_MIME: &str = "text/css";
pub const OEB_DOC_MIME: &str = "text/x-oeb1-document";
pub const OEB_CSS_MIME: &str = "text/x-oeb1-css";

/// Media types treated as content documents.
pub const OEB_DOCS: &[&str] = &[
    XHTML_MIME,
    "text/html",
    OEB_DOC_MIME,
    "text/x-oeb-document",
];

/// Media types treated as stylesheets.
pub const OEB_STYLES: &[&str] = &[CSS_MIME, OEB_CSS_MIME, "text/x-oeb-css", "xhtml/css"];

/// Raster image types Microsoft Reader can display.
pub const LIT_IMAGES: &[&str] = &["image/png", "image/jpeg", "image/gif"];

pub fn is_oeb_doc(media_type: &str) -> bool {
    OEB_DOCS.contains(&media_type)
}

pub fn is_oeb_style(media_type: &str) -> bool {
    OEB_STYLES.contains(&media_type)
}

pub fn is_lit_image(media_type: &str) -> bool {
    LIT_IMAGES.contains(&media_type)
}

/// Payload of a manifest item.
#[derive(Debug, Clone)]
pub enum ItemData {
    /// Parsed XML content document.
    Document(Dom),
    /// Parsed stylesheet; serialized with [`Stylesheet::bytes_representation`].
    Stylesheet(Stylesheet),
    /// Anything else, stored verbatim.
    Bytes(Vec<u8>),
}

/// A resource inside the book.
#[derive(Debug, Clone)]
pub struct ManifestItem {
    pub id: String,
    /// Book-relative path, percent-decoded.
    pub href: String,
    pub media_type: String,
    pub data: ItemData,
}

impl ManifestItem {
    /// Resolve a URL found inside this item to a book-relative path.
    pub fn abshref(&self, rel: &str) -> String {
        resolve_href(&self.href, &normalize_href(rel))
    }
}

/// Ordered collection of manifest items, indexed by id and href.
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    items: Vec<ManifestItem>,
    by_id: HashMap<String, usize>,
    by_href: HashMap<String, usize>,
}

impl Manifest {
    /// Add an item. A clashing id is made unique by appending a counter.
    pub fn add(
        &mut self,
        id: impl Into<String>,
        href: impl AsRef<str>,
        media_type: impl Into<String>,
        data: ItemData,
    ) -> &mut ManifestItem {
        let mut id = id.into();
        if self.by_id.contains_key(&id) {
            let base = id.clone();
            let mut n = 1;
            while self.by_id.contains_key(&id) {
                id = format!("{base}{n}");
                n += 1;
            }
        }
        let href = normalize_href(href.as_ref());
        let index = self.items.len();
        self.by_id.insert(id.clone(), index);
        self.by_href.insert(href.clone(), index);
        self.items.push(ManifestItem {
            id,
            href,
            media_type: media_type.into(),
            data,
        });
        &mut self.items[index]
    }

    pub fn get(&self, id: &str) -> Option<&ManifestItem> {
        self.by_id.get(id).map(|&i| &self.items[i])
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut ManifestItem> {
        self.by_id.get(id).map(|&i| &mut self.items[i])
    }

    pub fn get_by_href(&self, href: &str) -> Option<&ManifestItem> {
        self.by_href.get(href).map(|&i| &self.items[i])
    }

    pub fn contains_href(&self, href: &str) -> bool {
        self.by_href.contains_key(href)
    }

    /// Items in insertion order.
    pub fn iter(&self) -> std::slice::Iter<'_, ManifestItem> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// An entry in the reading order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpineItem {
    pub idref: String,
    pub linear: bool,
}

/// Reading order.
#[derive(Debug, Clone, Default)]
pub struct Spine {
    items: Vec<SpineItem>,
}

impl Spine {
    pub fn push(&mut self, idref: impl Into<String>, linear: bool) {
        self.items.push(SpineItem {
            idref: idref.into(),
            linear,
        });
    }

    pub fn contains(&self, idref: &str) -> bool {
        self.items.iter().any(|s| s.idref == idref)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SpineItem> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// A guide reference: semantic role, title and target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuideReference {
    pub kind: String,
    pub title: String,
    pub href: String,
}

/// Semantic landmarks of the book.
#[derive(Debug, Clone, Default)]
pub struct Guide {
    refs: Vec<GuideReference>,
}

impl Guide {
    /// Add a reference, replacing an existing one of the same type.
    pub fn add(&mut self, kind: impl Into<String>, title: impl Into<String>, href: impl Into<String>) {
        let reference = GuideReference {
            kind: kind.into(),
            title: title.into(),
            href: href.into(),
        };
        match self.refs.iter_mut().find(|r| r.kind == reference.kind) {
            Some(existing) => *existing = reference,
            None => self.refs.push(reference),
        }
    }

    pub fn get(&self, kind: &str) -> Option<&GuideReference> {
        self.refs.iter().find(|r| r.kind == kind)
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.get(kind).is_some()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, GuideReference> {
        self.refs.iter()
    }

    pub fn len(&self) -> usize {
        self.refs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }
}

/// Book metadata (Dublin Core + extensions)
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    pub title: String,
    pub authors: Vec<String>,
    pub contributors: Vec<String>,
    pub language: String,
    pub identifier: String,
    pub publisher: Option<String>,
    pub description: Option<String>,
    pub subjects: Vec<String>,
    pub date: Option<String>,
    pub rights: Option<String>,
    /// Manifest id of the cover image.
    pub cover: Option<String>,
    /// Free-form `(name, content)` pairs.
    pub extra: Vec<(String, String)>,
}

impl Metadata {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.authors.push(author.into());
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = identifier.into();
        self
    }

    /// Set a named extension value, replacing any previous one.
    pub fn add(&mut self, name: impl Into<String>, content: impl Into<String>) {
        let name = name.into();
        let content = content.into();
        match self.extra.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = content,
            None => self.extra.push((name, content)),
        }
    }

    /// Look up a named extension value.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.extra
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, c)| c.as_str())
    }
}

/// Intermediate representation of an Open eBook publication.
#[derive(Debug, Clone, Default)]
pub struct Book {
    pub metadata: Metadata,
    pub manifest: Manifest,
    pub spine: Spine,
    pub guide: Guide,
}

impl Book {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spine items resolved to their manifest entries, skipping dangling idrefs.
    pub fn spine_items(&self) -> impl Iterator<Item = (&ManifestItem, bool)> {
        self.spine
            .iter()
            .filter_map(|s| self.manifest.get(&s.idref).map(|item| (item, s.linear)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_indexes() {
        let mut manifest = Manifest::default();
        manifest.add("c1", "text/ch%201.xhtml", XHTML_MIME, ItemData::Bytes(vec![]));
        manifest.add("c1", "text/ch2.xhtml", XHTML_MIME, ItemData::Bytes(vec![]));

        assert_eq!(manifest.len(), 2);
        assert_eq!(manifest.get("c1").unwrap().href, "text/ch 1.xhtml");
        assert_eq!(manifest.get("c11").unwrap().href, "text/ch2.xhtml");
        assert!(manifest.contains_href("text/ch 1.xhtml"));
        assert_eq!(manifest.iter().next().unwrap().id, "c1");
    }

    #[test]
    fn test_abshref() {
        let mut manifest = Manifest::default();
        let item = manifest.add("c1", "text/ch1.xhtml", XHTML_MIME, ItemData::Bytes(vec![]));
        assert_eq!(item.abshref("../images/a%20b.png"), "images/a b.png");
        assert_eq!(item.abshref(""), "text/ch1.xhtml");
    }

    #[test]
    fn test_guide_replaces_same_type() {
        let mut guide = Guide::default();
        guide.add("cover", "Cover", "a.xhtml");
        guide.add("cover", "Cover", "b.xhtml");
        assert_eq!(guide.len(), 1);
        assert_eq!(guide.get("cover").unwrap().href, "b.xhtml");
    }

    #[test]
    fn test_spine_items_skip_dangling() {
        let mut book = Book::new();
        book.manifest.add("c1", "c1.xhtml", XHTML_MIME, ItemData::Bytes(vec![]));
        book.spine.push("c1", true);
        book.spine.push("missing", true);
        book.spine.push("c1", false);
        let items: Vec<_> = book.spine_items().map(|(i, l)| (i.id.as_str(), l)).collect();
        assert_eq!(items, vec![("c1", true), ("c1", false)]);
    }

    #[test]
    fn test_media_type_sets() {
        assert!(is_oeb_doc("text/html"));
        assert!(is_oeb_style("text/x-oeb1-css"));
        assert!(is_lit_image("image/gif"));
        assert!(!is_lit_image("image/svg+xml"));
    }
}
