//! ReBinary tokenizer.
//!
//! Serializes an element tree into the token stream Microsoft Reader reads
//! in place of XML text. Every integer in the stream (flags, dictionary
//! indices, lengths) is written as a UTF-8 encoded code point; text is
//! written as plain UTF-8.
//!
//! An element is written as `0, flags, tag` followed by its attributes
//! (`code, value` pairs) and a `0` terminator, then its text and children,
//! then `0, flags|CLOSING, 0` unless the opening flags already said it was
//! empty.

use crate::book::{CSS_MIME, Manifest, ManifestItem, is_oeb_style};
use crate::css::Stylizer;
use crate::dom::{Dom, EPUB_NS, NodeId, QName, XHTML_NS, XML_NS};
use crate::util::{has_scheme, normalize_href, split_fragment};

use super::maps::TagMap;
use super::{ATTR_NUMBER, FLAG_BLOCK, FLAG_CLOSING, FLAG_CUSTOM, FLAG_HEAD, FLAG_OPENING};

/// A page break recorded while tokenizing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageBreak {
    /// Byte offset into the token stream.
    pub offset: u32,
    /// Offsets of the enclosing elements' opening tokens, outermost first.
    pub parents: Vec<u32>,
}

/// Output of [`tokenize`].
#[derive(Debug, Clone, Default)]
pub struct TokenizedItem {
    pub content: Vec<u8>,
    /// Anchor catalog (`ahc`): anchor names and their token offsets.
    pub anchor_catalog: Vec<u8>,
    /// Anchor table (`aht`).
    pub anchor_table: Vec<u8>,
    pub page_breaks: Vec<PageBreak>,
}

/// Tokenize the subtree rooted at `root`.
///
/// With the HTML dictionary the document is styled (linked and embedded
/// stylesheets are looked up through `manifest` relative to `item`) and an
/// anchor catalog is produced. With the OPF dictionary no styling applies.
pub fn tokenize(
    dom: &Dom,
    root: NodeId,
    item: Option<&ManifestItem>,
    manifest: &Manifest,
    map: &TagMap,
) -> TokenizedItem {
    let stylizer = map.is_html().then(|| match item {
        Some(item) => Stylizer::for_item(dom, item, manifest),
        None => Stylizer::new(dom, &[]),
    });

    let mut tokenizer = Tokenizer {
        dom,
        item,
        manifest,
        map,
        stylizer,
        buf: Vec::new(),
        anchors: Vec::new(),
        page_breaks: Vec::new(),
        parents: Vec::new(),
        namespaces: vec![(XML_NS.to_string(), Some("xml".to_string()))],
    };
    tokenizer.run(root);

    let (anchor_catalog, anchor_table) = if map.is_html() {
        let href = item.map(|i| i.href.as_str()).unwrap_or_default();
        (tokenizer.build_ahc(href), vec![0, 0, 0, 0])
    } else {
        (Vec::new(), Vec::new())
    };

    TokenizedItem {
        content: tokenizer.buf,
        anchor_catalog,
        anchor_table,
        page_breaks: tokenizer.page_breaks,
    }
}

/// Pending work for the tree walk.
enum Step {
    Open {
        node: NodeId,
        tail: String,
        inhead: bool,
        /// Whitespace mode inherited from the parent.
        preserve: bool,
    },
    Close(OpenElement),
}

struct OpenElement {
    node: NodeId,
    tag: String,
    flags: u32,
    tail: String,
    preserve: bool,
    ns_mark: usize,
}

struct Tokenizer<'a> {
    dom: &'a Dom,
    item: Option<&'a ManifestItem>,
    manifest: &'a Manifest,
    map: &'a TagMap,
    stylizer: Option<Stylizer>,
    buf: Vec<u8>,
    anchors: Vec<(String, u32)>,
    page_breaks: Vec<PageBreak>,
    parents: Vec<u32>,
    /// In-scope `(uri, prefix)` mappings, innermost last.
    namespaces: Vec<(String, Option<String>)>,
}

impl Tokenizer<'_> {
    fn run(&mut self, root: NodeId) {
        let mut stack = vec![Step::Open {
            node: root,
            tail: String::new(),
            inhead: false,
            preserve: false,
        }];
        while let Some(step) = stack.pop() {
            match step {
                Step::Open {
                    node,
                    tail,
                    inhead,
                    preserve,
                } => self.open(node, tail, inhead, preserve, &mut stack),
                Step::Close(element) => self.close(element),
            }
        }
    }

    // ------------------------------------------------------------------------
    // Emitter
    // ------------------------------------------------------------------------

    fn pos(&self) -> u32 {
        self.buf.len() as u32
    }

    fn write_int(&mut self, value: u32) {
        match char::from_u32(value) {
            Some(c) => {
                let mut tmp = [0u8; 4];
                self.buf.extend_from_slice(c.encode_utf8(&mut tmp).as_bytes());
            }
            None => {
                log::warn!("Unicode overflow for integer: {value}");
                self.buf.push(b'?');
            }
        }
    }

    fn write_str(&mut self, text: &str) {
        self.buf.extend_from_slice(text.as_bytes());
    }

    fn write_custom(&mut self, name: &str) {
        self.write_int(FLAG_CUSTOM);
        self.write_int(name.chars().count() as u32 + 1);
        self.write_str(name);
    }

    fn write_value(&mut self, value: &str) {
        match numeric_value(value) {
            Some(n) => {
                self.write_int(ATTR_NUMBER);
                self.write_int(n + 1);
            }
            None => {
                self.write_int(value.chars().count() as u32 + 1);
                self.write_str(value);
            }
        }
    }

    // ------------------------------------------------------------------------
    // Names
    // ------------------------------------------------------------------------

    fn prefix_for(&self, uri: &str) -> Option<Option<&str>> {
        self.namespaces
            .iter()
            .rev()
            .find(|(u, _)| u == uri)
            .map(|(_, p)| p.as_deref())
    }

    /// Render a name with the prefix currently bound to its namespace.
    fn prefixed(&self, name: &QName) -> String {
        match name.ns.as_deref() {
            None => name.local.clone(),
            Some(EPUB_NS) => format!("epub-{}", name.local),
            Some(ns) => match self.prefix_for(ns) {
                Some(Some(prefix)) => format!("{prefix}:{}", name.local),
                Some(None) => name.local.clone(),
                None => format!("{{{ns}}}{}", name.local),
            },
        }
    }

    fn style_flags(&self, node: NodeId) -> Option<StyleFlags> {
        let style = self.stylizer.as_ref()?.style(node)?;
        Some(StyleFlags {
            block: style.is_block(),
            preserve: style.preserves_whitespace(),
            break_before: matches!(
                style.page_break_before.as_str(),
                "always" | "left" | "right"
            ),
            break_after: !matches!(style.page_break_after.as_str(), "avoid" | "auto"),
        })
    }

    // ------------------------------------------------------------------------
    // Tree walk
    // ------------------------------------------------------------------------

    fn open(
        &mut self,
        node: NodeId,
        tail: String,
        mut inhead: bool,
        preserve: bool,
        stack: &mut Vec<Step>,
    ) {
        let dom = self.dom;
        let Some(name) = dom.name(node) else {
            return;
        };

        let ns_mark = self.namespaces.len();
        let mut xmlns_attrs: Vec<(String, String)> = Vec::new();
        for (prefix, uri) in dom.namespaces(node) {
            if uri == EPUB_NS {
                continue;
            }
            if self.prefix_for(uri) != Some(prefix.as_deref()) {
                let attr = match prefix {
                    Some(p) => format!("xmlns:{p}"),
                    None => "xmlns".to_string(),
                };
                xmlns_attrs.push((attr, uri.clone()));
            }
            self.namespaces.push((uri.clone(), prefix.clone()));
        }

        let tag = self.prefixed(name);
        let tag_offset = self.pos();
        if tag == "head" {
            inhead = true;
        }

        let html = self.map.is_html();
        let (text, children) = dom.text_segments(node, |id| keep_element(dom, id, html));
        let style = self.style_flags(node);

        let mut flags = FLAG_OPENING;
        if text.is_empty() && children.is_empty() {
            flags |= FLAG_CLOSING;
        }
        if inhead {
            flags |= FLAG_HEAD;
        }
        if style.as_ref().is_some_and(|s| s.block) {
            flags |= FLAG_BLOCK;
        }

        self.write_int(0);
        self.write_int(flags);
        let tag_index = self.map.tag_index(&tag);
        match tag_index {
            Some(index) => self.write_int(index),
            None => self.write_custom(&tag),
        }

        let last_break = self.page_breaks.last().map(|pb| pb.offset);
        if style.as_ref().is_some_and(|s| s.break_before) && last_break != Some(tag_offset) {
            self.page_breaks.push(PageBreak {
                offset: tag_offset,
                parents: self.parents.clone(),
            });
        }

        let mut attrs: Vec<(String, String)> = dom
            .attrs(node)
            .iter()
            .map(|a| (self.prefixed(&a.name), a.value.clone()))
            .collect();
        attrs.extend(xmlns_attrs);

        for (mut attr, mut value) in attrs {
            if attr == "href" || attr == "src" {
                value = self.rewrite_url(&value);
            } else if attr == "id" || attr == "name" {
                self.anchors.push((value.clone(), tag_offset));
            } else if let Some(rest) = attr.strip_prefix("ms--") {
                attr = format!("%{rest}");
            } else if tag == "link" && attr == "type" && is_oeb_style(&value) {
                value = CSS_MIME.to_string();
            }

            match self.map.attr_code(tag_index, &attr) {
                Some(code) => self.write_int(code),
                None => self.write_custom(&attr),
            }
            self.write_value(&value);
        }
        self.write_int(0);

        let mut child_preserve = preserve || style.as_ref().is_some_and(|s| s.preserve);
        match dom.get_attr_ns(node, Some(XML_NS), "space") {
            Some("preserve") => child_preserve = true,
            Some("normal") => child_preserve = false,
            _ => {}
        }

        if !text.is_empty() {
            if child_preserve {
                self.write_str(&text);
            } else if children.is_empty() || !is_space(&text) {
                self.write_str(&collapse_whitespace(&text));
            }
        }

        self.parents.push(tag_offset);
        stack.push(Step::Close(OpenElement {
            node,
            tag,
            flags,
            tail,
            preserve,
            ns_mark,
        }));

        let blocks: Vec<Option<bool>> = children
            .iter()
            .map(|&(id, _)| self.style_flags(id).map(|s| s.block))
            .collect();
        for (i, (child, tail)) in children.into_iter().enumerate().rev() {
            let next = blocks.get(i + 1).copied().flatten();
            let droppable = inhead
                || next.is_none()
                || blocks[i] == Some(true)
                || next == Some(true);
            let tail = if !child_preserve && droppable && is_space(&tail) {
                String::new()
            } else {
                tail
            };
            stack.push(Step::Open {
                node: child,
                tail,
                inhead,
                preserve: child_preserve,
            });
        }
    }

    fn close(&mut self, element: OpenElement) {
        self.parents.pop();
        self.namespaces.truncate(element.ns_mark);

        if element.flags & FLAG_CLOSING == 0 {
            self.write_int(0);
            self.write_int((element.flags & !FLAG_OPENING) | FLAG_CLOSING);
            self.write_int(0);
        }

        if !element.tail.is_empty() && element.tag != "body" {
            if element.preserve {
                self.write_str(&element.tail);
            } else {
                self.write_str(&collapse_whitespace(&element.tail));
            }
        }

        if self.style_flags(element.node).is_some_and(|s| s.break_after) {
            self.page_breaks.push(PageBreak {
                offset: self.pos(),
                parents: self.parents.clone(),
            });
        }
    }

    /// Rewrite a link: `\x02id[#frag]` for manifest targets, `\x03url` otherwise.
    ///
    /// Only the path is percent-decoded, for the manifest lookup. Anything
    /// that is not a manifest item is written back exactly as found.
    fn rewrite_url(&self, value: &str) -> String {
        let (raw_path, frag) = split_fragment(value.trim());
        let path = match self.item {
            Some(item) => item.abshref(raw_path),
            None => normalize_href(raw_path),
        };
        let target = if has_scheme(raw_path) {
            None
        } else {
            self.manifest.get_by_href(&path)
        };
        match target {
            Some(target) => match frag.filter(|f| !f.is_empty()) {
                Some(frag) => format!("\u{2}{}#{}", target.id, normalize_href(frag)),
                None => format!("\u{2}{}", target.id),
            },
            None => format!("\u{3}{value}"),
        }
    }

    fn build_ahc(&self, href: &str) -> Vec<u8> {
        if self.anchors.len() > 6 {
            log::warn!("More than six anchors in file {href:?}. Some links may not work properly.");
        }
        let anchors = if self.anchors.len() > 255 {
            log::warn!("Too many anchors in file {href:?}; truncating to 255");
            &self.anchors[..255]
        } else {
            &self.anchors[..]
        };

        let mut out = vec![anchors.len() as u8];
        for (name, offset) in anchors {
            let len = name.chars().count() as u32;
            match char::from_u32(len) {
                Some(c) => {
                    let mut tmp = [0u8; 4];
                    out.extend_from_slice(c.encode_utf8(&mut tmp).as_bytes());
                }
                None => out.push(b'?'),
            }
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(&offset.to_le_bytes());
        }
        out
    }
}

#[derive(Debug, Clone, Copy)]
struct StyleFlags {
    block: bool,
    preserve: bool,
    break_before: bool,
    break_after: bool,
}

/// Element children that get tokens. `<meta>` and `<base>` are dropped from
/// content documents.
fn keep_element(dom: &Dom, id: NodeId, html: bool) -> bool {
    if !html {
        return true;
    }
    match dom.name(id) {
        Some(name) => {
            let html_ns = matches!(name.ns.as_deref(), None | Some(XHTML_NS));
            !(html_ns && matches!(name.local.as_str(), "meta" | "base"))
        }
        None => false,
    }
}

/// Attribute values that are plain non-negative integers.
fn numeric_value(value: &str) -> Option<u32> {
    let n: u32 = value.trim().parse().ok()?;
    let next = n.checked_add(1)?;
    char::from_u32(next).map(|_| n)
}

/// Non-empty and entirely whitespace.
fn is_space(text: &str) -> bool {
    !text.is_empty() && text.chars().all(char::is_whitespace)
}

/// Collapse runs of ASCII whitespace to a single space.
fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_space = false;
    for c in text.chars() {
        if matches!(c, ' ' | '\t' | '\r' | '\n' | '\x0B') {
            if !in_space {
                out.push(' ');
            }
            in_space = true;
        } else {
            out.push(c);
            in_space = false;
        }
    }
    out
}
