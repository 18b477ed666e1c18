//! OEB 1.0 package generation.
//!
//! The LIT `/meta` stream is the tokenized form of an OEB 1.0 package: an
//! unqualified `<package>` whose metadata carries capitalised Dublin Core
//! elements and `<meta>` pairs, followed by manifest, spine, tours and guide.

use crate::dom::{Attribute, DC10_NS, Dom, NodeId, OPF1_NS, QName};
use crate::util::truncate_to_date;

use super::{Book, OEB_CSS_MIME, OEB_DOC_MIME, is_oeb_doc, is_oeb_style};

/// An OEB 1.0 package document.
#[derive(Debug, Clone)]
pub struct Opf1 {
    pub dom: Dom,
    /// The `<package>` element.
    pub package: NodeId,
}

const UID_ID: &str = "BookIdentifier";

fn attr(name: &str, value: &str) -> Attribute {
    Attribute {
        name: QName::local(name),
        value: value.to_string(),
    }
}

fn dc(dom: &mut Dom, parent: NodeId, term: &str, value: &str, attrs: Vec<Attribute>) {
    let el = dom.append_element(parent, QName::ns(DC10_NS, term), attrs);
    dom.append_text(el, value);
}

impl Book {
    /// Build the OEB 1.0 package describing this book.
    pub fn to_opf1(&self) -> Opf1 {
        let mut dom = Dom::new();
        let doc = dom.document();
        let meta = &self.metadata;

        let mut package_attrs = Vec::new();
        if !meta.identifier.is_empty() {
            package_attrs.push(attr("unique-identifier", UID_ID));
        }
        let package = dom.append_element(doc, QName::local("package"), package_attrs);

        // Metadata
        let metadata = dom.append_element(package, QName::local("metadata"), vec![]);
        let dc_metadata = dom.append_element(metadata, QName::local("dc-metadata"), vec![]);
        for el in [metadata, dc_metadata] {
            dom.declare_namespace(el, Some("dc"), DC10_NS);
            dom.declare_namespace(el, Some("oebpackage"), OPF1_NS);
        }

        if !meta.title.is_empty() {
            dc(&mut dom, dc_metadata, "Title", &meta.title, vec![]);
        }
        for author in &meta.authors {
            dc(&mut dom, dc_metadata, "Creator", author, vec![attr("role", "aut")]);
        }
        for subject in &meta.subjects {
            dc(&mut dom, dc_metadata, "Subject", subject, vec![]);
        }
        if let Some(description) = &meta.description {
            dc(&mut dom, dc_metadata, "Description", description, vec![]);
        }
        if let Some(publisher) = &meta.publisher {
            dc(&mut dom, dc_metadata, "Publisher", publisher, vec![]);
        }
        for contributor in &meta.contributors {
            dc(&mut dom, dc_metadata, "Contributor", contributor, vec![]);
        }
        if let Some(date) = &meta.date {
            dc(&mut dom, dc_metadata, "Date", &truncate_to_date(date), vec![]);
        }
        if !meta.identifier.is_empty() {
            dc(&mut dom, dc_metadata, "Identifier", &meta.identifier, vec![attr("id", UID_ID)]);
        }
        if !meta.language.is_empty() {
            dc(&mut dom, dc_metadata, "Language", &meta.language, vec![]);
        }
        if let Some(rights) = &meta.rights {
            dc(&mut dom, dc_metadata, "Rights", rights, vec![]);
        }

        let x_metadata = dom.append_element(metadata, QName::local("x-metadata"), vec![]);
        let mut pairs: Vec<(&str, &str)> = Vec::new();
        if let Some(cover) = &meta.cover {
            pairs.push(("cover", cover));
        }
        pairs.extend(meta.extra.iter().map(|(n, c)| (n.as_str(), c.as_str())));
        if meta.get("ms-chaptertour").is_none() {
            pairs.push(("ms-chaptertour", "chaptertour"));
        }
        for (name, content) in pairs {
            dom.append_element(
                x_metadata,
                QName::local("meta"),
                vec![attr("name", name), attr("content", content)],
            );
        }

        // Manifest
        let manifest = dom.append_element(package, QName::local("manifest"), vec![]);
        for item in self.manifest.iter() {
            let media_type = if is_oeb_doc(&item.media_type) {
                OEB_DOC_MIME
            } else if is_oeb_style(&item.media_type) {
                OEB_CSS_MIME
            } else {
                item.media_type.as_str()
            };
            dom.append_element(
                manifest,
                QName::local("item"),
                vec![
                    attr("id", &item.id),
                    attr("href", &item.href),
                    attr("media-type", media_type),
                ],
            );
        }

        // Spine: OEB 1.0 has no non-linear items
        let spine = dom.append_element(package, QName::local("spine"), vec![]);
        for entry in self.spine.iter().filter(|s| s.linear) {
            dom.append_element(spine, QName::local("itemref"), vec![attr("idref", &entry.idref)]);
        }

        let tours = dom.append_element(package, QName::local("tours"), vec![]);
        dom.append_element(
            tours,
            QName::local("tour"),
            vec![attr("id", "chaptertour"), attr("title", "Chapter Tour")],
        );

        // Guide
        if !self.guide.is_empty() {
            let guide = dom.append_element(package, QName::local("guide"), vec![]);
            for reference in self.guide.iter() {
                dom.append_element(
                    guide,
                    QName::local("reference"),
                    vec![
                        attr("type", &reference.kind),
                        attr("title", &reference.title),
                        attr("href", &reference.href),
                    ],
                );
            }
        }

        Opf1 { dom, package }
    }
}
