//! Arena-based XML element tree.
//!
//! Documents and the OEB 1.0 package are held as a [`Dom`]: all nodes live in
//! one vector and link to each other by index. Element and attribute names
//! carry their resolved namespace URI so the tokenizer can re-derive prefixes.

mod parse;

pub use parse::{parse_xml, parse_xml_bytes};

/// XHTML namespace.
pub const XHTML_NS: &str = "http://www.w3.org/1999/xhtml";
/// The implicit `xml:` namespace.
pub const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";
/// EPUB 3 structural-semantics namespace (`epub:type` etc).
pub const EPUB_NS: &str = "http://www.idpf.org/2007/ops";
/// OPF 2.0 package namespace.
pub const OPF2_NS: &str = "http://www.idpf.org/2007/opf";
/// OEB 1.0 package namespace.
pub const OPF1_NS: &str = "http://openebook.org/namespaces/oeb-package/1.0/";
/// Dublin Core 1.0 element namespace.
pub const DC10_NS: &str = "http://purl.org/dc/elements/1.0/";
/// Dublin Core 1.1 element namespace.
pub const DC11_NS: &str = "http://purl.org/dc/elements/1.1/";

/// Unique identifier for a node in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl NodeId {
    /// Sentinel value for no node.
    pub const NONE: NodeId = NodeId(u32::MAX);

    /// Check if this is a valid node ID.
    pub fn is_some(&self) -> bool {
        self.0 != u32::MAX
    }

    /// Check if this is the sentinel value.
    pub fn is_none(&self) -> bool {
        self.0 == u32::MAX
    }

    /// Index of this node in the arena.
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// A namespace-qualified name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QName {
    pub ns: Option<String>,
    pub local: String,
}

impl QName {
    /// A name in no namespace.
    pub fn local(local: &str) -> Self {
        Self {
            ns: None,
            local: local.to_string(),
        }
    }

    /// A name in the given namespace.
    pub fn ns(ns: &str, local: &str) -> Self {
        Self {
            ns: Some(ns.to_string()),
            local: local.to_string(),
        }
    }

    /// Check namespace and local name together.
    pub fn is(&self, ns: Option<&str>, local: &str) -> bool {
        self.ns.as_deref() == ns && self.local == local
    }
}

/// Element attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: QName,
    pub value: String,
}

/// Node payload.
#[derive(Debug, Clone)]
pub enum NodeData {
    /// Document root.
    Document,
    /// Element with name, attributes, and the namespaces it declares.
    Element {
        name: QName,
        attrs: Vec<Attribute>,
        /// `(prefix, uri)` pairs declared on this element; `None` is the default namespace.
        namespaces: Vec<(Option<String>, String)>,
    },
    /// Character data (text and CDATA).
    Text(String),
    Comment(String),
    ProcessingInstruction(String),
}

/// A node in the arena.
#[derive(Debug, Clone)]
pub struct Node {
    pub data: NodeData,
    pub parent: NodeId,
    pub first_child: NodeId,
    pub last_child: NodeId,
    pub prev_sibling: NodeId,
    pub next_sibling: NodeId,
}

impl Node {
    fn new(data: NodeData) -> Self {
        Self {
            data,
            parent: NodeId::NONE,
            first_child: NodeId::NONE,
            last_child: NodeId::NONE,
            prev_sibling: NodeId::NONE,
            next_sibling: NodeId::NONE,
        }
    }
}

/// Arena-based XML tree.
#[derive(Debug, Clone)]
pub struct Dom {
    nodes: Vec<Node>,
    document: NodeId,
}

impl Dom {
    /// Create a new empty tree with a document node.
    pub fn new() -> Self {
        let mut dom = Self {
            nodes: Vec::new(),
            document: NodeId::NONE,
        };
        dom.document = dom.alloc(Node::new(NodeData::Document));
        dom
    }

    fn alloc(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    /// Get the document node ID.
    pub fn document(&self) -> NodeId {
        self.document
    }

    /// The document element, if any.
    pub fn root(&self) -> Option<NodeId> {
        self.children(self.document).find(|&id| self.is_element(id))
    }

    /// Get a node by ID.
    pub fn get(&self, id: NodeId) -> Option<&Node> {
        if id.is_none() {
            return None;
        }
        self.nodes.get(id.index())
    }

    /// Get a mutable node by ID.
    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        if id.is_none() {
            return None;
        }
        self.nodes.get_mut(id.index())
    }

    /// Number of allocated nodes (including the document node).
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when the tree holds nothing but the document node.
    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    /// Create a detached element node.
    pub fn create_element(&mut self, name: QName, attrs: Vec<Attribute>) -> NodeId {
        self.alloc(Node::new(NodeData::Element {
            name,
            attrs,
            namespaces: Vec::new(),
        }))
    }

    pub fn create_text(&mut self, text: String) -> NodeId {
        self.alloc(Node::new(NodeData::Text(text)))
    }

    pub fn create_comment(&mut self, text: String) -> NodeId {
        self.alloc(Node::new(NodeData::Comment(text)))
    }

    pub fn create_pi(&mut self, text: String) -> NodeId {
        self.alloc(Node::new(NodeData::ProcessingInstruction(text)))
    }

    /// Append a child to a parent node.
    pub fn append(&mut self, parent: NodeId, child: NodeId) {
        let last_child = self
            .get(parent)
            .map(|n| n.last_child)
            .unwrap_or(NodeId::NONE);

        if let Some(child_node) = self.get_mut(child) {
            child_node.parent = parent;
            child_node.prev_sibling = last_child;
        }

        if last_child.is_some()
            && let Some(last_node) = self.get_mut(last_child)
        {
            last_node.next_sibling = child;
        }

        if let Some(parent_node) = self.get_mut(parent) {
            if parent_node.first_child.is_none() {
                parent_node.first_child = child;
            }
            parent_node.last_child = child;
        }
    }

    /// Create an element and append it to `parent`.
    pub fn append_element(&mut self, parent: NodeId, name: QName, attrs: Vec<Attribute>) -> NodeId {
        let id = self.create_element(name, attrs);
        self.append(parent, id);
        id
    }

    /// Append text to the last child if it is a text node, or add a new text node.
    pub fn append_text(&mut self, parent: NodeId, text: &str) {
        let last_child = self
            .get(parent)
            .map(|n| n.last_child)
            .unwrap_or(NodeId::NONE);

        if let Some(last) = self.get_mut(last_child)
            && let NodeData::Text(existing) = &mut last.data
        {
            existing.push_str(text);
            return;
        }

        let text_node = self.create_text(text.to_string());
        self.append(parent, text_node);
    }

    /// Record a namespace declaration on an element.
    pub fn declare_namespace(&mut self, id: NodeId, prefix: Option<&str>, uri: &str) {
        if let Some(Node {
            data: NodeData::Element { namespaces, .. },
            ..
        }) = self.get_mut(id)
        {
            namespaces.retain(|(p, _)| p.as_deref() != prefix);
            namespaces.push((prefix.map(str::to_string), uri.to_string()));
        }
    }

    /// Iterate over children of a node.
    pub fn children(&self, parent: NodeId) -> ChildrenIter<'_> {
        let first = self
            .get(parent)
            .map(|n| n.first_child)
            .unwrap_or(NodeId::NONE);
        ChildrenIter {
            dom: self,
            current: first,
        }
    }

    /// Iterate over the element children of a node.
    pub fn element_children(&self, parent: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.children(parent).filter(|&id| self.is_element(id))
    }

    /// Parent of a node, `None` for the document or detached nodes.
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.get(id).map(|n| n.parent).filter(NodeId::is_some)
    }

    /// Previous sibling that is an element.
    pub fn prev_element_sibling(&self, id: NodeId) -> Option<NodeId> {
        let mut cur = self.get(id)?.prev_sibling;
        while cur.is_some() {
            if self.is_element(cur) {
                return Some(cur);
            }
            cur = self.get(cur)?.prev_sibling;
        }
        None
    }

    /// Next sibling that is an element.
    pub fn next_element_sibling(&self, id: NodeId) -> Option<NodeId> {
        let mut cur = self.get(id)?.next_sibling;
        while cur.is_some() {
            if self.is_element(cur) {
                return Some(cur);
            }
            cur = self.get(cur)?.next_sibling;
        }
        None
    }

    /// All nodes below `id` in document order, not including `id`.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(id).collect();
        stack.reverse();
        while let Some(cur) = stack.pop() {
            out.push(cur);
            let mark = stack.len();
            stack.extend(self.children(cur));
            stack[mark..].reverse();
        }
        out
    }

    /// Find the first element with the given local name (document order).
    pub fn find_by_tag(&self, tag: &str) -> Option<NodeId> {
        self.descendants(self.document)
            .into_iter()
            .find(|&id| self.local_name(id) == Some(tag))
    }
}

impl Default for Dom {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator over children of a node.
pub struct ChildrenIter<'a> {
    dom: &'a Dom,
    current: NodeId,
}

impl Iterator for ChildrenIter<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current.is_none() {
            return None;
        }
        let id = self.current;
        self.current = self
            .dom
            .get(id)
            .map(|n| n.next_sibling)
            .unwrap_or(NodeId::NONE);
        Some(id)
    }
}

// ============================================================================
// Element accessors
// ============================================================================

impl Dom {
    /// Get an element's qualified name.
    pub fn name(&self, id: NodeId) -> Option<&QName> {
        self.get(id).and_then(|n| match &n.data {
            NodeData::Element { name, .. } => Some(name),
            _ => None,
        })
    }

    /// Get an element's local name.
    pub fn local_name(&self, id: NodeId) -> Option<&str> {
        self.name(id).map(|n| n.local.as_str())
    }

    /// Element attributes in source order.
    pub fn attrs(&self, id: NodeId) -> &[Attribute] {
        self.get(id)
            .and_then(|n| match &n.data {
                NodeData::Element { attrs, .. } => Some(attrs.as_slice()),
                _ => None,
            })
            .unwrap_or(&[])
    }

    /// Namespace declarations on an element.
    pub fn namespaces(&self, id: NodeId) -> &[(Option<String>, String)] {
        self.get(id)
            .and_then(|n| match &n.data {
                NodeData::Element { namespaces, .. } => Some(namespaces.as_slice()),
                _ => None,
            })
            .unwrap_or(&[])
    }

    /// Get a no-namespace attribute value.
    pub fn get_attr(&self, id: NodeId, local: &str) -> Option<&str> {
        self.get_attr_ns(id, None, local)
    }

    /// Get an attribute value by namespace and local name.
    pub fn get_attr_ns(&self, id: NodeId, ns: Option<&str>, local: &str) -> Option<&str> {
        self.attrs(id)
            .iter()
            .find(|a| a.name.is(ns, local))
            .map(|a| a.value.as_str())
    }

    /// Set an attribute, replacing any existing value with the same name.
    pub fn set_attr(&mut self, id: NodeId, name: QName, value: &str) {
        if let Some(Node {
            data: NodeData::Element { attrs, .. },
            ..
        }) = self.get_mut(id)
        {
            if let Some(existing) = attrs.iter_mut().find(|a| a.name == name) {
                existing.value = value.to_string();
            } else {
                attrs.push(Attribute {
                    name,
                    value: value.to_string(),
                });
            }
        }
    }

    /// Check if node is an element.
    pub fn is_element(&self, id: NodeId) -> bool {
        self.get(id)
            .is_some_and(|n| matches!(n.data, NodeData::Element { .. }))
    }

    /// Text of a text node.
    pub fn text(&self, id: NodeId) -> Option<&str> {
        self.get(id).and_then(|n| match &n.data {
            NodeData::Text(s) => Some(s.as_str()),
            _ => None,
        })
    }

    /// Concatenated descendant text of a node.
    pub fn text_content(&self, id: NodeId) -> String {
        let mut out = String::new();
        for node in self.descendants(id) {
            if let Some(t) = self.text(node) {
                out.push_str(t);
            }
        }
        out
    }

    /// Split an element's content into leading text and `(child, tail)` pairs.
    ///
    /// Only element children accepted by `keep` become pairs. Comments,
    /// processing instructions, and rejected elements are skipped, and the
    /// text on either side of them is joined into one run.
    pub fn text_segments<F>(&self, id: NodeId, keep: F) -> (String, Vec<(NodeId, String)>)
    where
        F: Fn(NodeId) -> bool,
    {
        let mut head = String::new();
        let mut children: Vec<(NodeId, String)> = Vec::new();

        for child in self.children(id) {
            let Some(node) = self.get(child) else {
                continue;
            };
            match &node.data {
                NodeData::Text(t) => match children.last_mut() {
                    Some((_, tail)) => tail.push_str(t),
                    None => head.push_str(t),
                },
                NodeData::Element { .. } if keep(child) => children.push((child, String::new())),
                _ => {}
            }
        }

        (head, children)
    }
}
