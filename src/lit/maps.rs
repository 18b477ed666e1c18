//! Tag and attribute dictionaries for the ReBinary token format.
//!
//! Microsoft Reader stores known element and attribute names as small
//! integers. There is one dictionary for content documents (HTML) and one
//! for the package metadata stream (OPF). Names missing from a dictionary
//! are written out as custom names.

use std::collections::HashMap;
use std::sync::OnceLock;

/// Which dictionary a [`TagMap`] holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapKind {
    Html,
    Opf,
}

/// Name-to-index lookup tables built from the raw dictionaries.
#[derive(Debug)]
pub struct TagMap {
    kind: MapKind,
    tag_names: Vec<Option<&'static str>>,
    tags: HashMap<&'static str, u32>,
    default_attrs: HashMap<&'static str, u32>,
    /// Per-tag attribute maps (overlay merged onto defaults), by tag index.
    tag_attrs: HashMap<u32, HashMap<&'static str, u32>>,
}

impl TagMap {
    fn build(
        kind: MapKind,
        tags: &[Option<&'static str>],
        default_attrs: &[(u32, &'static str)],
        overlays: &[(&'static str, &[(u32, &'static str)])],
    ) -> Self {
        let tag_index: HashMap<&'static str, u32> = tags
            .iter()
            .enumerate()
            .filter_map(|(i, name)| name.map(|n| (n, i as u32)))
            .collect();

        // Later entries win when a name appears twice
        let mut defaults = HashMap::new();
        for &(code, name) in default_attrs {
            defaults.insert(name, code);
        }

        let mut tag_attrs = HashMap::new();
        for &(tag, overlay) in overlays {
            let Some(&index) = tag_index.get(tag) else {
                continue;
            };
            let mut merged = defaults.clone();
            for &(code, name) in overlay {
                merged.insert(name, code);
            }
            tag_attrs.insert(index, merged);
        }

        Self {
            kind,
            tag_names: tags.to_vec(),
            tags: tag_index,
            default_attrs: defaults,
            tag_attrs,
        }
    }

    pub fn kind(&self) -> MapKind {
        self.kind
    }

    pub fn is_html(&self) -> bool {
        self.kind == MapKind::Html
    }

    /// Dictionary index of a (prefixed) tag name.
    pub fn tag_index(&self, tag: &str) -> Option<u32> {
        self.tags.get(tag).copied()
    }

    /// Dictionary code of an attribute on a tag with the given index.
    pub fn attr_code(&self, tag_index: Option<u32>, attr: &str) -> Option<u32> {
        self.attrs_for(tag_index).get(attr).copied()
    }

    /// Tag name stored at a dictionary index.
    pub fn tag_name(&self, index: u32) -> Option<&'static str> {
        self.tag_names.get(index as usize).copied().flatten()
    }

    /// Attribute name for a code. Aliased codes give the smallest name.
    pub fn attr_name(&self, tag_index: Option<u32>, code: u32) -> Option<&'static str> {
        self.attrs_for(tag_index)
            .iter()
            .filter(|&(_, &c)| c == code)
            .map(|(&name, _)| name)
            .min()
    }

    fn attrs_for(&self, tag_index: Option<u32>) -> &HashMap<&'static str, u32> {
        tag_index
            .and_then(|i| self.tag_attrs.get(&i))
            .unwrap_or(&self.default_attrs)
    }
}

/// The content-document dictionary.
pub fn html_map() -> &'static TagMap {
    static MAP: OnceLock<TagMap> = OnceLock::new();
    MAP.get_or_init(|| TagMap::build(MapKind::Html, HTML_TAGS, HTML_ATTRS, HTML_TAG_ATTRS))
}

/// The package-metadata dictionary.
pub fn opf_map() -> &'static TagMap {
    static MAP: OnceLock<TagMap> = OnceLock::new();
    MAP.get_or_init(|| TagMap::build(MapKind::Opf, OPF_TAGS, OPF_ATTRS, &[]))
}

// ============================================================================
// HTML dictionary
// ============================================================================

const HTML_TAGS: &[Option<&str>] = &[
    None,
    None,
    None,
    Some("a"),
    Some("acronym"),
    Some("address"),
    Some("applet"),
    Some("area"),
    Some("b"),
    Some("base"),
    Some("basefont"),
    Some("bdo"),
    Some("bgsound"),
    Some("big"),
    Some("blink"),
    Some("blockquote"),
    Some("body"),
    Some("br"),
    Some("button"),
    Some("caption"),
    Some("center"),
    Some("cite"),
    Some("code"),
    Some("col"),
    Some("colgroup"),
    None,
    None,
    Some("dd"),
    Some("del"),
    Some("dfn"),
    Some("dir"),
    Some("div"),
    Some("dl"),
    Some("dt"),
    None,
    None,
    Some("em"),
    Some("embed"),
    Some("fieldset"),
    Some("font"),
    Some("form"),
    Some("frame"),
    Some("frameset"),
    None,
    None,
    Some("h1"),
    Some("h2"),
    Some("h3"),
    Some("h4"),
    Some("h5"),
    Some("h6"),
    Some("head"),
    Some("hr"),
    Some("html"),
    Some("i"),
    Some("iframe"),
    Some("img"),
    Some("input"),
    Some("ins"),
    Some("kbd"),
    Some("label"),
    Some("legend"),
    Some("li"),
    Some("link"),
    Some("tag61"),
    Some("map"),
    Some("tag63"),
    Some("tag64"),
    Some("meta"),
    Some("nextid"),
    Some("nobr"),
    Some("noembed"),
    Some("noframes"),
    Some("noscript"),
    Some("object"),
    Some("ol"),
    Some("option"),
    Some("p"),
    Some("param"),
    Some("plaintext"),
    Some("pre"),
    Some("q"),
    Some("rp"),
    Some("rt"),
    Some("ruby"),
    Some("s"),
    Some("samp"),
    Some("script"),
    Some("select"),
    Some("small"),
    Some("span"),
    Some("strike"),
    Some("strong"),
    Some("style"),
    Some("sub"),
    Some("sup"),
    Some("table"),
    Some("tbody"),
    Some("tc"),
    Some("td"),
    Some("textarea"),
    Some("tfoot"),
    Some("th"),
    Some("thead"),
    Some("title"),
    Some("tr"),
    Some("tt"),
    Some("u"),
    Some("ul"),
    Some("var"),
    Some("wbr"),
    None,
];

/// Attributes valid on every HTML element.
const HTML_ATTRS: &[(u32, &str)] = &[
    (0x8010, "tabindex"),
    (0x8046, "title"),
    (0x804b, "style"),
    (0x804d, "disabled"),
    (0x83ea, "class"),
    (0x83eb, "id"),
    (0x83fe, "datafld"),
    (0x83ff, "datasrc"),
    (0x8400, "dataformatas"),
    (0x87d6, "accesskey"),
    (0x9392, "lang"),
    (0x93ed, "language"),
    (0x93fe, "dir"),
    (0x9771, "onmouseover"),
    (0x9772, "onmouseout"),
    (0x9773, "onmousedown"),
    (0x9774, "onmouseup"),
    (0x9775, "onmousemove"),
    (0x9776, "onkeydown"),
    (0x9777, "onkeyup"),
    (0x9778, "onkeypress"),
    (0x9779, "onclick"),
    (0x977a, "ondblclick"),
    (0x977e, "onhelp"),
    (0x977f, "onfocus"),
    (0x9780, "onblur"),
    (0x9783, "onrowexit"),
    (0x9784, "onrowenter"),
    (0x9786, "onbeforeupdate"),
    (0x9787, "onafterupdate"),
    (0x978a, "onreadystatechange"),
    (0x9790, "onscroll"),
    (0x9794, "ondragstart"),
    (0x9795, "onresize"),
    (0x9796, "onselectstart"),
    (0x9797, "onerrorupdate"),
    (0x9799, "ondatasetchanged"),
    (0x979a, "ondataavailable"),
    (0x979b, "ondatasetcomplete"),
    (0x979c, "onfilterchange"),
    (0x979f, "onlosecapture"),
    (0x97a0, "onpropertychange"),
    (0x97a2, "ondrag"),
    (0x97a3, "ondragend"),
    (0x97a4, "ondragenter"),
    (0x97a5, "ondragover"),
    (0x97a6, "ondragleave"),
    (0x97a7, "ondrop"),
    (0x97a8, "oncut"),
    (0x97a9, "oncopy"),
    (0x97aa, "onpaste"),
    (0x97ab, "onbeforecut"),
    (0x97ac, "onbeforecopy"),
    (0x97ad, "onbeforepaste"),
    (0x97af, "onrowsdelete"),
    (0x97b0, "onrowsinserted"),
    (0x97b1, "oncellchange"),
    (0x97b2, "oncontextmenu"),
    (0x97b6, "onbeforeeditfocus"),
];

const A_ATTRS: &[(u32, &str)] = &[
    (0x0001, "href"),
    (0x03ec, "target"),
    (0x03ee, "rel"),
    (0x03ef, "rev"),
    (0x03f0, "urn"),
    (0x03f1, "methods"),
    (0x8001, "name"),
    (0x8046, "title"),
];

const AREA_ATTRS: &[(u32, &str)] = &[
    (0x0001, "href"),
    (0x03ea, "shape"),
    (0x03eb, "coords"),
    (0x03ed, "target"),
    (0x03ee, "alt"),
    (0x03ef, "nohref"),
    (0x8046, "title"),
];

const IMG_ATTRS: &[(u32, &str)] = &[
    (0x03eb, "alt"),
    (0x03ec, "src"),
    (0x03ed, "border"),
    (0x03ee, "vspace"),
    (0x03ef, "hspace"),
    (0x03f0, "lowsrc"),
    (0x03f1, "vrml"),
    (0x03f2, "dynsrc"),
    (0x03f4, "loop"),
    (0x03f6, "start"),
    (0x07d3, "ismap"),
    (0x07d9, "usemap"),
    (0x8001, "name"),
    (0x8006, "width"),
    (0x8007, "height"),
    (0x8046, "title"),
    (0x804a, "align"),
];

const LINK_ATTRS: &[(u32, &str)] = &[
    (0x03ee, "href"),
    (0x03ef, "rel"),
    (0x03f0, "rev"),
    (0x03f1, "type"),
    (0x03f9, "media"),
    (0x03fa, "target"),
];

const ALIGNED_ATTRS: &[(u32, &str)] = &[(0x8049, "align")];

const FONT_ATTRS: &[(u32, &str)] = &[
    (0x8007, "color"),
    (0x8008, "face"),
    (0x8009, "size"),
];

const TABLE_ATTRS: &[(u32, &str)] = &[
    (0x03ea, "rules"),
    (0x03eb, "frame"),
    (0x03ec, "cellspacing"),
    (0x03ed, "cols"),
    (0x03ee, "border"),
    (0x03ef, "cellpadding"),
    (0x8006, "width"),
    (0x8007, "height"),
    (0x8049, "align"),
    (0x804a, "bgcolor"),
];

const CELL_ATTRS: &[(u32, &str)] = &[
    (0x03ea, "rowspan"),
    (0x03eb, "colspan"),
    (0x03ec, "nowrap"),
    (0x8006, "width"),
    (0x8007, "height"),
    (0x8049, "align"),
    (0x804a, "bgcolor"),
    (0x804c, "valign"),
];

const LIST_ATTRS: &[(u32, &str)] = &[(0x03eb, "start"), (0x8049, "type")];

const LI_ATTRS: &[(u32, &str)] = &[(0x03ea, "value"), (0x8049, "type")];

const BR_ATTRS: &[(u32, &str)] = &[(0x03ea, "clear")];

const HR_ATTRS: &[(u32, &str)] = &[
    (0x03ea, "noshade"),
    (0x8006, "width"),
    (0x8007, "size"),
    (0x8049, "align"),
    (0x804a, "color"),
];

const HTML_TAG_ATTRS: &[(&str, &[(u32, &str)])] = &[
    ("a", A_ATTRS),
    ("area", AREA_ATTRS),
    ("img", IMG_ATTRS),
    ("link", LINK_ATTRS),
    ("p", ALIGNED_ATTRS),
    ("div", ALIGNED_ATTRS),
    ("h1", ALIGNED_ATTRS),
    ("h2", ALIGNED_ATTRS),
    ("h3", ALIGNED_ATTRS),
    ("h4", ALIGNED_ATTRS),
    ("h5", ALIGNED_ATTRS),
    ("h6", ALIGNED_ATTRS),
    ("caption", ALIGNED_ATTRS),
    ("font", FONT_ATTRS),
    ("table", TABLE_ATTRS),
    ("td", CELL_ATTRS),
    ("th", CELL_ATTRS),
    ("ol", LIST_ATTRS),
    ("ul", LIST_ATTRS),
    ("li", LI_ATTRS),
    ("br", BR_ATTRS),
    ("hr", HR_ATTRS),
];

// ============================================================================
// OPF dictionary
// ============================================================================

const OPF_TAGS: &[Option<&str>] = &[
    None,
    Some("package"),
    Some("dc:Title"),
    Some("dc:Creator"),
    None,
    None,
    None,
    None,
    None,
    None,
    None,
    None,
    None,
    None,
    None,
    None,
    Some("manifest"),
    Some("item"),
    Some("spine"),
    Some("itemref"),
    Some("metadata"),
    Some("dc-metadata"),
    Some("dc:Subject"),
    Some("dc:Description"),
    Some("dc:Publisher"),
    Some("dc:Contributor"),
    Some("dc:Date"),
    Some("dc:Type"),
    Some("dc:Format"),
    Some("dc:Identifier"),
    Some("dc:Source"),
    Some("dc:Language"),
    Some("dc:Relation"),
    Some("dc:Coverage"),
    Some("dc:Rights"),
    Some("x-metadata"),
    Some("meta"),
    Some("tours"),
    Some("tour"),
    Some("site"),
    Some("guide"),
    Some("reference"),
    None,
];

const OPF_ATTRS: &[(u32, &str)] = &[
    (0x0001, "href"),
    (0x0002, "%never-used"),
    (0x0003, "%guid"),
    (0x0004, "%minimum_level"),
    (0x0005, "%attr5"),
    (0x0006, "id"),
    (0x0007, "href"),
    (0x0008, "media-type"),
    (0x0009, "fallback"),
    (0x000A, "idref"),
    (0x000B, "xmlns:dc"),
    (0x000C, "xmlns:oebpackage"),
    (0x000D, "role"),
    (0x000E, "file-as"),
    (0x000F, "event"),
    (0x0010, "scheme"),
    (0x0011, "title"),
    (0x0012, "type"),
    (0x0013, "unique-identifier"),
    (0x0014, "name"),
    (0x0015, "content"),
    (0x0016, "xml:lang"),
];
