//! CSS support for the tokenizer.
//!
//! The LIT tokenizer only needs four computed properties per element:
//! `display` (block flag), `white-space` (whitespace preservation) and
//! `page-break-before` / `page-break-after` (page-break tables). The
//! [`Stylizer`] cascades the user-agent sheet, linked and embedded author
//! sheets, and `style` attributes to produce them.

mod selector;
mod stylesheet;

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::OnceLock;

use selectors::context::SelectorCaches;

pub use selector::{ElementRef, LitSelectors, Selector, Specificity, parse_selector_list};
pub use stylesheet::{CssRule, Declaration, Origin, Stylesheet};

use stylesheet::MatchedDeclaration;

use crate::book::{ItemData, Manifest, ManifestItem};
use crate::dom::{Dom, NodeId};

/// Browser default styles that matter for block detection and whitespace.
const USER_AGENT_CSS: &str = r#"
html, body, address, blockquote, center, dd, dir, div, dl, dt, fieldset,
form, frame, frameset, h1, h2, h3, h4, h5, h6, hr, menu, noframes, ol, p,
ul, pre, xmp, listing, plaintext, section, article, aside, header, footer,
nav, figure, figcaption, hgroup, main, details, summary, legend { display: block }
li { display: list-item }
head, script, style, title, meta, link, base { display: none }
table { display: table }
caption { display: table-caption }
colgroup { display: table-column-group }
col { display: table-column }
thead { display: table-header-group }
tbody { display: table-row-group }
tfoot { display: table-footer-group }
tr { display: table-row }
td, th { display: table-cell }
img, button, input, select, textarea, object { display: inline-block }
pre, xmp, listing, plaintext { white-space: pre }
textarea { white-space: pre-wrap }
"#;

fn user_agent_sheet() -> &'static Stylesheet {
    static SHEET: OnceLock<Stylesheet> = OnceLock::new();
    SHEET.get_or_init(|| Stylesheet::parse(USER_AGENT_CSS))
}

/// Computed values of the properties the tokenizer reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputedStyle {
    pub display: String,
    pub white_space: String,
    pub page_break_before: String,
    pub page_break_after: String,
}

impl Default for ComputedStyle {
    fn default() -> Self {
        Self {
            display: "inline".to_string(),
            white_space: "normal".to_string(),
            page_break_before: "auto".to_string(),
            page_break_after: "auto".to_string(),
        }
    }
}

impl ComputedStyle {
    /// Anything not laid out inline counts as a block.
    pub fn is_block(&self) -> bool {
        !matches!(self.display.as_str(), "inline" | "inline-block")
    }

    /// `white-space: pre` and `pre-wrap` keep source whitespace.
    pub fn preserves_whitespace(&self) -> bool {
        matches!(self.white_space.as_str(), "pre" | "pre-wrap")
    }

    fn inherit_from(parent: Option<&ComputedStyle>) -> Self {
        let mut style = Self::default();
        if let Some(parent) = parent {
            style.white_space = parent.white_space.clone();
        }
        style
    }

    fn apply(&mut self, decl: &Declaration, parent: Option<&ComputedStyle>) {
        let inherited = ComputedStyle::default();
        let parent = parent.unwrap_or(&inherited);
        let value = decl.value.split_ascii_whitespace().next().unwrap_or("");
        let inherit = value == "inherit";

        match decl.name.as_str() {
            "display" => {
                self.display = if inherit {
                    parent.display.clone()
                } else {
                    value.to_string()
                }
            }
            "white-space" => {
                self.white_space = if inherit {
                    parent.white_space.clone()
                } else {
                    value.to_string()
                }
            }
            "page-break-before" => {
                self.page_break_before = if inherit {
                    parent.page_break_before.clone()
                } else {
                    value.to_string()
                }
            }
            "page-break-after" => {
                self.page_break_after = if inherit {
                    parent.page_break_after.clone()
                } else {
                    value.to_string()
                }
            }
            "break-before" => {
                if let Some(v) = break_to_page_break(value) {
                    self.page_break_before = v.to_string();
                }
            }
            "break-after" => {
                if let Some(v) = break_to_page_break(value) {
                    self.page_break_after = v.to_string();
                }
            }
            _ => {}
        }
    }
}

/// Map CSS3 `break-*` values onto their CSS2 `page-break-*` equivalents.
fn break_to_page_break(value: &str) -> Option<&'static str> {
    match value {
        "page" | "always" => Some("always"),
        "left" | "verso" => Some("left"),
        "right" | "recto" => Some("right"),
        "avoid" | "avoid-page" => Some("avoid"),
        "auto" => Some("auto"),
        _ => None,
    }
}

/// Computed styles for every element of one document.
#[derive(Debug, Default)]
pub struct Stylizer {
    styles: HashMap<NodeId, ComputedStyle>,
}

impl Stylizer {
    /// Style a document using the given author sheets (in cascade order).
    pub fn new(dom: &Dom, author_sheets: &[&Stylesheet]) -> Self {
        let ua = user_agent_sheet();
        let mut styles: HashMap<NodeId, ComputedStyle> = HashMap::new();
        let mut caches = SelectorCaches::default();

        for id in dom.descendants(dom.document()) {
            if !dom.is_element(id) {
                continue;
            }
            let parent = dom.parent(id).and_then(|p| styles.get(&p));

            let mut matched: Vec<MatchedDeclaration<'_>> = Vec::new();
            let mut order = 0usize;
            let origins = std::iter::once((Origin::UserAgent, ua))
                .chain(author_sheets.iter().map(|s| (Origin::Author, *s)));
            for (origin, sheet) in origins {
                for rule in &sheet.rules {
                    order += 1;
                    let element = ElementRef::new(dom, id);
                    let Some(specificity) = rule
                        .selectors
                        .iter()
                        .filter(|sel| selector::matches(sel, element, &mut caches))
                        .map(Specificity::from_selector)
                        .max()
                    else {
                        continue;
                    };
                    matched.extend(rule.declarations.iter().map(|declaration| {
                        MatchedDeclaration {
                            declaration,
                            origin,
                            specificity,
                            order,
                        }
                    }));
                }
            }

            let inline = dom.get_attr(id, "style").map(Stylesheet::parse_inline);
            if let Some(decls) = &inline {
                order += 1;
                matched.extend(decls.iter().map(|declaration| MatchedDeclaration {
                    declaration,
                    origin: Origin::Inline,
                    specificity: Specificity::default(),
                    order,
                }));
            }

            matched.sort_by_key(MatchedDeclaration::cascade_key);

            let mut style = ComputedStyle::inherit_from(parent);
            for m in &matched {
                style.apply(m.declaration, parent);
            }
            styles.insert(id, style);
        }

        Self { styles }
    }

    /// Style a manifest document, pulling in its linked and embedded sheets.
    pub fn for_item(dom: &Dom, item: &ManifestItem, manifest: &Manifest) -> Self {
        let mut sheets: Vec<Cow<'_, Stylesheet>> = Vec::new();

        for id in dom.descendants(dom.document()) {
            match dom.local_name(id) {
                Some("link") => {
                    let is_stylesheet = dom.get_attr(id, "rel").is_some_and(|rel| {
                        rel.split_ascii_whitespace()
                            .any(|r| r.eq_ignore_ascii_case("stylesheet"))
                    });
                    let Some(href) = dom.get_attr(id, "href") else {
                        continue;
                    };
                    if !is_stylesheet {
                        continue;
                    }
                    let target = item.abshref(href);
                    match manifest.get_by_href(&target).map(|t| &t.data) {
                        Some(ItemData::Stylesheet(sheet)) => sheets.push(Cow::Borrowed(sheet)),
                        _ => log::debug!("Stylesheet {target:?} not found in manifest"),
                    }
                }
                Some("style") => {
                    let is_css = dom
                        .get_attr(id, "type")
                        .is_none_or(|t| t.eq_ignore_ascii_case("text/css"));
                    if is_css {
                        sheets.push(Cow::Owned(Stylesheet::parse(&dom.text_content(id))));
                    }
                }
                _ => {}
            }
        }

        let refs: Vec<&Stylesheet> = sheets.iter().map(|s| s.as_ref()).collect();
        Self::new(dom, &refs)
    }

    /// Computed style of an element.
    pub fn style(&self, id: NodeId) -> Option<&ComputedStyle> {
        self.styles.get(&id)
    }
}
