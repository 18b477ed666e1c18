//! XML parsing into the arena tree.
//!
//! quick-xml reports raw `prefix:local` names; prefixes are resolved here
//! against a stack of in-scope declarations.

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::error::Result;
use crate::util::{decode_text, extract_xml_encoding};

use super::{Attribute, Dom, NodeId, QName, XML_NS};

/// Parse raw document bytes, detecting the character encoding.
pub fn parse_xml_bytes(bytes: &[u8]) -> Result<Dom> {
    let text = decode_text(bytes, extract_xml_encoding(bytes));
    parse_xml(text.trim_start_matches('\u{feff}'))
}

/// Parse an XML document into a [`Dom`].
pub fn parse_xml(content: &str) -> Result<Dom> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(false);

    let mut dom = Dom::new();
    let mut scopes = NamespaceScopes::default();
    // (element, number of declarations it pushed)
    let mut stack: Vec<(NodeId, usize)> = Vec::new();

    loop {
        let parent = stack.last().map(|&(id, _)| id).unwrap_or(dom.document());
        match reader.read_event()? {
            Event::Start(e) => {
                let (id, pushed) = open_element(&mut dom, &mut scopes, &e);
                dom.append(parent, id);
                stack.push((id, pushed));
            }
            Event::Empty(e) => {
                let (id, pushed) = open_element(&mut dom, &mut scopes, &e);
                dom.append(parent, id);
                scopes.pop(pushed);
            }
            Event::End(_) => {
                if let Some((_, pushed)) = stack.pop() {
                    scopes.pop(pushed);
                }
            }
            Event::Text(e) => {
                if !stack.is_empty() {
                    dom.append_text(parent, &String::from_utf8_lossy(e.as_ref()));
                }
            }
            Event::CData(e) => {
                if !stack.is_empty() {
                    dom.append_text(parent, &String::from_utf8_lossy(&e.into_inner()));
                }
            }
            Event::GeneralRef(e) => {
                if !stack.is_empty() {
                    let entity = String::from_utf8_lossy(e.as_ref());
                    match resolve_entity(&entity) {
                        Some(resolved) => dom.append_text(parent, &resolved),
                        None => dom.append_text(parent, &format!("&{entity};")),
                    }
                }
            }
            Event::Comment(e) => {
                let node = dom.create_comment(String::from_utf8_lossy(&e).into_owned());
                dom.append(parent, node);
            }
            Event::PI(e) => {
                let node = dom.create_pi(String::from_utf8_lossy(&e).into_owned());
                dom.append(parent, node);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(dom)
}

/// Stack of `(prefix, uri)` declarations; an empty uri undeclares the default namespace.
#[derive(Default)]
struct NamespaceScopes {
    decls: Vec<(Option<String>, String)>,
}

impl NamespaceScopes {
    fn push(&mut self, prefix: Option<String>, uri: String) {
        self.decls.push((prefix, uri));
    }

    fn pop(&mut self, count: usize) {
        let keep = self.decls.len().saturating_sub(count);
        self.decls.truncate(keep);
    }

    fn lookup(&self, prefix: Option<&str>) -> Option<&str> {
        if prefix == Some("xml") {
            return Some(XML_NS);
        }
        self.decls
            .iter()
            .rev()
            .find(|(p, _)| p.as_deref() == prefix)
            .map(|(_, uri)| uri.as_str())
            .filter(|uri| !uri.is_empty())
    }

    /// Resolve a raw name. Unprefixed attributes never take the default namespace.
    fn resolve(&self, raw: &str, is_attr: bool) -> QName {
        match raw.split_once(':') {
            Some((prefix, local)) => match self.lookup(Some(prefix)) {
                Some(uri) => QName::ns(uri, local),
                // Undeclared prefix: keep the raw name rather than fail
                None => QName::local(raw),
            },
            None if is_attr => QName::local(raw),
            None => match self.lookup(None) {
                Some(uri) => QName::ns(uri, raw),
                None => QName::local(raw),
            },
        }
    }
}

fn open_element(dom: &mut Dom, scopes: &mut NamespaceScopes, e: &BytesStart) -> (NodeId, usize) {
    let mut raw_attrs: Vec<(String, String)> = Vec::new();
    let mut declared: Vec<(Option<String>, String)> = Vec::new();

    for attr in e.attributes().with_checks(false).flatten() {
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = unescape(&String::from_utf8_lossy(&attr.value));
        if key == "xmlns" {
            declared.push((None, value));
        } else if let Some(prefix) = key.strip_prefix("xmlns:") {
            declared.push((Some(prefix.to_string()), value));
        } else {
            raw_attrs.push((key, value));
        }
    }

    let pushed = declared.len();
    for (prefix, uri) in &declared {
        scopes.push(prefix.clone(), uri.clone());
    }

    let raw_name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let name = scopes.resolve(&raw_name, false);
    let attrs = raw_attrs
        .into_iter()
        .map(|(key, value)| Attribute {
            name: scopes.resolve(&key, true),
            value,
        })
        .collect();

    let id = dom.create_element(name, attrs);
    for (prefix, uri) in declared {
        dom.declare_namespace(id, prefix.as_deref(), &uri);
    }
    (id, pushed)
}

/// Expand character and predefined entity references in an attribute value.
fn unescape(raw: &str) -> String {
    if !raw.contains('&') {
        return raw.to_string();
    }
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let after = &rest[amp + 1..];
        match after.find(';') {
            Some(semi) => match resolve_entity(&after[..semi]) {
                Some(resolved) => {
                    out.push_str(&resolved);
                    rest = &after[semi + 1..];
                }
                None => {
                    out.push('&');
                    rest = after;
                }
            },
            None => {
                out.push('&');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Resolve XML entity references, plus the HTML names common in XHTML books.
fn resolve_entity(entity: &str) -> Option<String> {
    match entity {
        "apos" => return Some("'".to_string()),
        "quot" => return Some("\"".to_string()),
        "lt" => return Some("<".to_string()),
        "gt" => return Some(">".to_string()),
        "amp" => return Some("&".to_string()),
        "nbsp" => return Some("\u{a0}".to_string()),
        "shy" => return Some("\u{ad}".to_string()),
        "mdash" => return Some("\u{2014}".to_string()),
        "ndash" => return Some("\u{2013}".to_string()),
        "hellip" => return Some("\u{2026}".to_string()),
        "copy" => return Some("\u{a9}".to_string()),
        _ => {}
    }

    if let Some(hex) = entity
        .strip_prefix("#x")
        .or_else(|| entity.strip_prefix("#X"))
    {
        if let Ok(code) = u32::from_str_radix(hex, 16)
            && let Some(c) = char::from_u32(code)
        {
            return Some(c.to_string());
        }
    } else if let Some(dec) = entity.strip_prefix('#')
        && let Ok(code) = dec.parse::<u32>()
        && let Some(c) = char::from_u32(code)
    {
        return Some(c.to_string());
    }

    None
}

#[cfg(test)]
mod tests {
    use super::super::{EPUB_NS, NodeData, XHTML_NS};
    use super::*;

    #[test]
    fn test_parse_namespaces() {
        let dom = parse_xml(
            r#"<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops">
<body><section epub:type="chapter" xml:lang="en"><p>Hi</p></section></body></html>"#,
        )
        .unwrap();

        let root = dom.root().unwrap();
        assert!(dom.name(root).unwrap().is(Some(XHTML_NS), "html"));
        assert_eq!(dom.namespaces(root).len(), 2);

        let section = dom.find_by_tag("section").unwrap();
        assert_eq!(dom.get_attr_ns(section, Some(EPUB_NS), "type"), Some("chapter"));
        assert_eq!(dom.get_attr_ns(section, Some(XML_NS), "lang"), Some("en"));
        let p = dom.find_by_tag("p").unwrap();
        assert_eq!(dom.name(p).unwrap().ns.as_deref(), Some(XHTML_NS));
    }

    #[test]
    fn test_parse_entities_and_cdata() {
        let dom = parse_xml(r#"<p title="a &amp; b">x &lt; y&#65;<![CDATA[<z>]]>&nbsp;</p>"#).unwrap();
        let p = dom.root().unwrap();
        assert_eq!(dom.get_attr(p, "title"), Some("a & b"));
        assert_eq!(dom.text_content(p), "x < yA<z>\u{a0}");
    }

    #[test]
    fn test_parse_keeps_comments_and_pis() {
        let dom = parse_xml("<a>one<!-- c --><?pi data?>two</a>").unwrap();
        let a = dom.root().unwrap();
        let kinds: Vec<_> = dom
            .children(a)
            .map(|id| match dom.get(id).unwrap().data {
                NodeData::Text(_) => "text",
                NodeData::Comment(_) => "comment",
                NodeData::ProcessingInstruction(_) => "pi",
                _ => "other",
            })
            .collect();
        assert_eq!(kinds, vec!["text", "comment", "pi", "text"]);
    }

    #[test]
    fn test_parse_scoped_default_namespace() {
        let dom = parse_xml(r#"<a xmlns="urn:x"><b xmlns=""><c/></b><d/></a>"#).unwrap();
        let c = dom.find_by_tag("c").unwrap();
        let d = dom.find_by_tag("d").unwrap();
        assert_eq!(dom.name(c).unwrap().ns, None);
        assert_eq!(dom.name(d).unwrap().ns.as_deref(), Some("urn:x"));
    }

    #[test]
    fn test_parse_bytes_with_bom_and_encoding() {
        let mut bytes = vec![0xEF, 0xBB, 0xBF];
        bytes.extend_from_slice(b"<?xml version=\"1.0\"?><p>caf\xc3\xa9</p>");
        let dom = parse_xml_bytes(&bytes).unwrap();
        assert_eq!(dom.text_content(dom.root().unwrap()), "caf\u{e9}");

        let latin = b"<?xml version=\"1.0\" encoding=\"iso-8859-1\"?><p>caf\xe9</p>";
        let dom = parse_xml_bytes(latin).unwrap();
        assert_eq!(dom.text_content(dom.root().unwrap()), "caf\u{e9}");
    }

    #[test]
    fn test_mismatched_end_tag_is_error() {
        assert!(parse_xml("<a><b></a>").is_err());
    }

    #[test]
    fn test_resolve_entity() {
        assert_eq!(resolve_entity("#x2019"), Some("\u{2019}".to_string()));
        assert_eq!(resolve_entity("#8217"), Some("\u{2019}".to_string()));
        assert_eq!(resolve_entity("bogus"), None);
    }
}
