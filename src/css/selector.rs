//! selectors crate Element implementation for the arena tree.
//!
//! Selectors are parsed with `selectors::parser::SelectorList` and matched
//! through [`ElementRef`], so combinators, structural pseudo-classes,
//! `:not()` and `:lang()` behave as in a browser.

use std::cmp::Ordering;
use std::fmt;

use cssparser::{CowRcStr, ParseError, Parser, SourceLocation, ToCss};
use selectors::attr::{AttrSelectorOperation, CaseSensitivity, NamespaceConstraint};
use selectors::context::{MatchingContext, SelectorCaches};
use selectors::matching::ElementSelectorFlags;
use selectors::parser::SelectorParseErrorKind;
use selectors::{OpaqueElement, SelectorImpl};

use crate::dom::{Dom, NodeData, NodeId, XHTML_NS, XML_NS};

/// A parsed complex selector.
pub type Selector = selectors::parser::Selector<LitSelectors>;

/// Our selector implementation for the selectors crate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LitSelectors;

/// String type used for identifiers, names and attribute values.
#[derive(Debug, Clone, PartialEq, Eq, Default, Hash)]
pub struct CssString(pub String);

impl precomputed_hash::PrecomputedHash for CssString {
    fn precomputed_hash(&self) -> u32 {
        self.0
            .bytes()
            .fold(0u32, |h, b| h.wrapping_mul(31).wrapping_add(b as u32))
    }
}

impl ToCss for CssString {
    fn to_css<W: fmt::Write>(&self, dest: &mut W) -> fmt::Result {
        dest.write_str(&self.0)
    }
}

impl From<String> for CssString {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl<'a> From<&'a str> for CssString {
    fn from(s: &'a str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for CssString {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Pseudo-elements never match a static tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PseudoElement {}

impl ToCss for PseudoElement {
    fn to_css<W: fmt::Write>(&self, _dest: &mut W) -> fmt::Result {
        match *self {}
    }
}

impl selectors::parser::PseudoElement for PseudoElement {
    type Impl = LitSelectors;

    fn accepts_state_pseudo_classes(&self) -> bool {
        false
    }

    fn valid_after_slotted(&self) -> bool {
        false
    }
}

/// Pseudo-classes beyond the tree-structural ones the crate handles itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NonTSPseudoClass {
    Link,
    AnyLink,
    Visited,
    Hover,
    Active,
    Focus,
    Lang(String),
}

impl selectors::parser::NonTSPseudoClass for NonTSPseudoClass {
    type Impl = LitSelectors;

    fn is_active_or_hover(&self) -> bool {
        matches!(self, Self::Hover | Self::Active)
    }

    fn is_user_action_state(&self) -> bool {
        matches!(self, Self::Hover | Self::Active | Self::Focus)
    }
}

impl ToCss for NonTSPseudoClass {
    fn to_css<W: fmt::Write>(&self, dest: &mut W) -> fmt::Result {
        match self {
            Self::Link => dest.write_str(":link"),
            Self::AnyLink => dest.write_str(":any-link"),
            Self::Visited => dest.write_str(":visited"),
            Self::Hover => dest.write_str(":hover"),
            Self::Active => dest.write_str(":active"),
            Self::Focus => dest.write_str(":focus"),
            Self::Lang(lang) => {
                dest.write_str(":lang(")?;
                cssparser::serialize_identifier(lang, dest)?;
                dest.write_str(")")
            }
        }
    }
}

impl SelectorImpl for LitSelectors {
    type ExtraMatchingData<'a> = ();
    type AttrValue = CssString;
    type Identifier = CssString;
    type LocalName = CssString;
    type NamespaceUrl = CssString;
    type NamespacePrefix = CssString;
    type BorrowedLocalName = CssString;
    type BorrowedNamespaceUrl = CssString;
    type NonTSPseudoClass = NonTSPseudoClass;
    type PseudoElement = PseudoElement;
}

impl<'i> selectors::parser::Parser<'i> for LitSelectors {
    type Impl = LitSelectors;
    type Error = SelectorParseErrorKind<'i>;

    fn parse_non_ts_pseudo_class(
        &self,
        location: SourceLocation,
        name: CowRcStr<'i>,
    ) -> Result<NonTSPseudoClass, ParseError<'i, Self::Error>> {
        let class = match name.to_ascii_lowercase().as_str() {
            "link" => NonTSPseudoClass::Link,
            "any-link" => NonTSPseudoClass::AnyLink,
            "visited" => NonTSPseudoClass::Visited,
            "hover" => NonTSPseudoClass::Hover,
            "active" => NonTSPseudoClass::Active,
            "focus" => NonTSPseudoClass::Focus,
            _ => {
                return Err(location.new_custom_error(
                    SelectorParseErrorKind::UnsupportedPseudoClassOrElement(name),
                ));
            }
        };
        Ok(class)
    }

    fn parse_non_ts_functional_pseudo_class<'t>(
        &self,
        name: CowRcStr<'i>,
        arguments: &mut Parser<'i, 't>,
        _after_part: bool,
    ) -> Result<NonTSPseudoClass, ParseError<'i, Self::Error>> {
        if name.eq_ignore_ascii_case("lang") {
            let lang = arguments.expect_ident_or_string()?;
            return Ok(NonTSPseudoClass::Lang(lang.as_ref().to_ascii_lowercase()));
        }
        Err(arguments.new_custom_error(
            SelectorParseErrorKind::UnsupportedPseudoClassOrElement(name),
        ))
    }
}

// ============================================================================
// Parsing and specificity
// ============================================================================

/// Parse a comma-separated selector list. One bad selector invalidates the list.
pub fn parse_selector_list<'i>(
    input: &mut Parser<'i, '_>,
) -> Result<Vec<Selector>, ParseError<'i, ()>> {
    let location = input.current_source_location();
    let selectors = selectors::parser::SelectorList::parse(
        &LitSelectors,
        input,
        selectors::parser::ParseRelative::No,
    )
    .map_err(|_| location.new_custom_error(()))?;

    Ok(selectors.slice().to_vec())
}

/// CSS specificity for cascade ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Specificity {
    pub ids: u16,
    pub classes: u16,
    pub elements: u16,
}

impl Specificity {
    pub fn from_selector(selector: &Selector) -> Self {
        let spec = selector.specificity();
        // Packed as (ids << 20) | (classes << 10) | elements
        Self {
            ids: ((spec >> 20) & 0x3FF) as u16,
            classes: ((spec >> 10) & 0x3FF) as u16,
            elements: (spec & 0x3FF) as u16,
        }
    }
}

impl Ord for Specificity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.ids
            .cmp(&other.ids)
            .then(self.classes.cmp(&other.classes))
            .then(self.elements.cmp(&other.elements))
    }
}

impl PartialOrd for Specificity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Check a selector against an element, sharing caches across calls.
pub fn matches(selector: &Selector, element: ElementRef<'_>, caches: &mut SelectorCaches) -> bool {
    let mut context = MatchingContext::new(
        selectors::matching::MatchingMode::Normal,
        None,
        caches,
        selectors::context::QuirksMode::NoQuirks,
        selectors::matching::NeedsSelectorFlags::No,
        selectors::matching::MatchingForInvalidation::No,
    );
    selectors::matching::matches_selector(selector, 0, None, &element, &mut context)
}

// ============================================================================
// Element
// ============================================================================

/// Reference to an element in a [`Dom`] for selector matching.
#[derive(Clone, Copy)]
pub struct ElementRef<'a> {
    pub dom: &'a Dom,
    pub id: NodeId,
}

impl<'a> ElementRef<'a> {
    pub fn new(dom: &'a Dom, id: NodeId) -> Self {
        Self { dom, id }
    }

    fn is_html(&self) -> bool {
        self.dom
            .name(self.id)
            .is_some_and(|n| n.ns.as_deref().is_none_or(|ns| ns == XHTML_NS))
    }

    fn is_hyperlink(&self) -> bool {
        matches!(self.dom.local_name(self.id), Some("a" | "area" | "link"))
            && self.dom.get_attr(self.id, "href").is_some()
    }

    /// Language in scope: the nearest `xml:lang` or `lang` attribute.
    fn language(&self) -> Option<&'a str> {
        let mut cur = Some(self.id);
        while let Some(id) = cur {
            if let Some(lang) = self
                .dom
                .get_attr_ns(id, Some(XML_NS), "lang")
                .or_else(|| self.dom.get_attr(id, "lang"))
            {
                return Some(lang);
            }
            cur = self.dom.parent(id);
        }
        None
    }
}

impl fmt::Debug for ElementRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElementRef")
            .field("id", &self.id)
            .field("name", &self.dom.local_name(self.id))
            .finish()
    }
}

impl<'a> selectors::Element for ElementRef<'a> {
    type Impl = LitSelectors;

    fn opaque(&self) -> OpaqueElement {
        OpaqueElement::new(self)
    }

    fn parent_element(&self) -> Option<Self> {
        self.dom
            .parent(self.id)
            .filter(|&p| self.dom.is_element(p))
            .map(|p| Self::new(self.dom, p))
    }

    fn parent_node_is_shadow_root(&self) -> bool {
        false
    }

    fn containing_shadow_host(&self) -> Option<Self> {
        None
    }

    fn is_pseudo_element(&self) -> bool {
        false
    }

    fn prev_sibling_element(&self) -> Option<Self> {
        self.dom
            .prev_element_sibling(self.id)
            .map(|id| Self::new(self.dom, id))
    }

    fn next_sibling_element(&self) -> Option<Self> {
        self.dom
            .next_element_sibling(self.id)
            .map(|id| Self::new(self.dom, id))
    }

    fn first_element_child(&self) -> Option<Self> {
        self.dom
            .element_children(self.id)
            .next()
            .map(|id| Self::new(self.dom, id))
    }

    fn is_html_element_in_html_document(&self) -> bool {
        self.is_html()
    }

    fn has_local_name(&self, name: &CssString) -> bool {
        self.dom.local_name(self.id).is_some_and(|n| n == name.0)
    }

    fn has_namespace(&self, ns: &CssString) -> bool {
        self.dom
            .name(self.id)
            .is_some_and(|n| n.ns.as_deref().unwrap_or("") == ns.0)
    }

    fn is_same_type(&self, other: &Self) -> bool {
        self.dom.name(self.id) == other.dom.name(other.id)
    }

    fn attr_matches(
        &self,
        ns: &NamespaceConstraint<&CssString>,
        local_name: &CssString,
        operation: &AttrSelectorOperation<&CssString>,
    ) -> bool {
        self.dom.attrs(self.id).iter().any(|attr| {
            let ns_match = match ns {
                NamespaceConstraint::Any => true,
                NamespaceConstraint::Specific(ns) => {
                    attr.name.ns.as_deref().unwrap_or("") == ns.0
                }
            };
            ns_match && attr.name.local == local_name.0 && operation.eval_str(&attr.value)
        })
    }

    fn match_non_ts_pseudo_class(
        &self,
        pc: &NonTSPseudoClass,
        _context: &mut MatchingContext<'_, Self::Impl>,
    ) -> bool {
        match pc {
            NonTSPseudoClass::Link | NonTSPseudoClass::AnyLink => self.is_hyperlink(),
            NonTSPseudoClass::Lang(wanted) => self.language().is_some_and(|lang| {
                let lang = lang.to_ascii_lowercase();
                lang == *wanted
                    || lang
                        .strip_prefix(wanted.as_str())
                        .is_some_and(|rest| rest.starts_with('-'))
            }),
            // User action states never apply to a static book
            _ => false,
        }
    }

    fn match_pseudo_element(
        &self,
        _pe: &PseudoElement,
        _context: &mut MatchingContext<'_, Self::Impl>,
    ) -> bool {
        false
    }

    fn is_link(&self) -> bool {
        self.is_hyperlink()
    }

    fn is_html_slot_element(&self) -> bool {
        false
    }

    fn has_id(&self, id: &CssString, case_sensitivity: CaseSensitivity) -> bool {
        self.dom
            .get_attr(self.id, "id")
            .is_some_and(|value| case_sensitivity.eq(value.as_bytes(), id.0.as_bytes()))
    }

    fn has_class(&self, name: &CssString, case_sensitivity: CaseSensitivity) -> bool {
        self.dom.get_attr(self.id, "class").is_some_and(|classes| {
            classes
                .split_ascii_whitespace()
                .any(|c| case_sensitivity.eq(c.as_bytes(), name.0.as_bytes()))
        })
    }

    fn imported_part(&self, _name: &CssString) -> Option<CssString> {
        None
    }

    fn is_part(&self, _name: &CssString) -> bool {
        false
    }

    fn is_empty(&self) -> bool {
        self.dom
            .children(self.id)
            .all(|child| match self.dom.get(child).map(|n| &n.data) {
                Some(NodeData::Element { .. }) => false,
                Some(NodeData::Text(t)) => t.is_empty(),
                _ => true,
            })
    }

    fn is_root(&self) -> bool {
        self.dom.parent(self.id) == Some(self.dom.document())
    }

    fn apply_selector_flags(&self, _flags: ElementSelectorFlags) {}

    fn add_element_unique_hashes(&self, _filter: &mut selectors::bloom::BloomFilter) -> bool {
        false
    }

    fn has_custom_state(&self, _name: &CssString) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use cssparser::ParserInput;

    use super::*;
    use crate::dom::parse_xml;

    fn parse(text: &str) -> Option<Vec<Selector>> {
        let mut input = ParserInput::new(text);
        let mut parser = Parser::new(&mut input);
        parse_selector_list(&mut parser).ok()
    }

    fn first(text: &str) -> Selector {
        parse(text).unwrap().remove(0)
    }

    fn check(dom: &Dom, selector: &str, id: NodeId) -> bool {
        let mut caches = SelectorCaches::default();
        matches(&first(selector), ElementRef::new(dom, id), &mut caches)
    }

    fn elements(dom: &Dom, tag: &str) -> Vec<NodeId> {
        dom.descendants(dom.document())
            .into_iter()
            .filter(|&id| dom.local_name(id) == Some(tag))
            .collect()
    }

    #[test]
    fn test_specificity() {
        assert_eq!(
            Specificity::from_selector(&first("div#main p.note")),
            Specificity {
                ids: 1,
                classes: 1,
                elements: 2
            }
        );
        assert_eq!(Specificity::from_selector(&first("*")), Specificity::default());
        assert_eq!(
            Specificity::from_selector(&first("a[href]:first-child")).classes,
            2
        );
        assert!(
            Specificity::from_selector(&first("#a")) > Specificity::from_selector(&first(".a.b.c"))
        );
    }

    #[test]
    fn test_invalid_selector_drops_list() {
        assert!(parse("p::before").is_none());
        assert!(parse("p, :frobnicate, h1").is_none());
        assert_eq!(parse("p, a:hover, h1").map(|l| l.len()), Some(3));
    }

    #[test]
    fn test_matching_combinators() {
        let dom = parse_xml(
            r#"<html xmlns="http://www.w3.org/1999/xhtml"><body><div class="a b" id="x"><p>1</p><p lang="en-US">2</p><span/></div></body></html>"#,
        )
        .unwrap();
        let ps = elements(&dom, "p");
        let span = dom.find_by_tag("span").unwrap();

        assert!(check(&dom, "div p", ps[0]));
        assert!(check(&dom, "body > div > p", ps[1]));
        assert!(!check(&dom, "body > p", ps[0]));
        assert!(check(&dom, "p + p", ps[1]));
        assert!(!check(&dom, "p + p", ps[0]));
        assert!(check(&dom, "p ~ span", span));
        assert!(check(&dom, "p:first-child", ps[0]));
        assert!(!check(&dom, "p:first-child", ps[1]));
        assert!(check(&dom, ".a.b > *", span));
        assert!(check(&dom, "#x p", ps[0]));
        assert!(check(&dom, "[lang|=en]", ps[1]));
        assert!(check(&dom, "p[lang^='en']", ps[1]));
        assert!(!check(&dom, "P[lang=fr]", ps[1]));
        assert!(check(&dom, "DIV", dom.find_by_tag("div").unwrap()));
        assert!(check(&dom, "html", dom.root().unwrap()));
        assert!(check(&dom, ":root", dom.root().unwrap()));
    }

    #[test]
    fn test_structural_and_negation_pseudo_classes() {
        let dom = parse_xml(
            r#"<html xml:lang="en"><body><h2 class="a">1</h2><h2>2</h2><h2 lang="fr">3</h2><p/></body></html>"#,
        )
        .unwrap();
        let h2 = elements(&dom, "h2");
        let p = dom.find_by_tag("p").unwrap();

        assert!(check(&dom, "h2:not(.a)", h2[1]));
        assert!(!check(&dom, "h2:not(.a)", h2[0]));
        assert!(check(&dom, "h2:nth-child(2)", h2[1]));
        assert!(check(&dom, "h2:nth-of-type(odd)", h2[2]));
        assert!(check(&dom, "h2:last-of-type", h2[2]));
        assert!(check(&dom, "p:last-child", p));
        assert!(!check(&dom, "h2:last-child", h2[2]));
        assert!(check(&dom, "p:empty", p));
        assert!(check(&dom, "p:lang(en)", p));
        assert!(check(&dom, "h2:lang(fr)", h2[2]));
        assert!(!check(&dom, "h2:lang(en)", h2[2]));
        assert!(!check(&dom, "h2:hover", h2[0]));
    }
}
