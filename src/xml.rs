//! Minimal namespace-aware XML tree on top of `quick-xml`.
//!
//! The metadata model needs three things the streaming reader does not give
//! directly: repeated path lookups, in-place text substitution, and
//! re-serialization. Elements keep their qualified names exactly as written
//! (prefix included) so that a parsed document serializes back with the same
//! prefixes and `xmlns` declarations, while lookups match on the resolved
//! namespace URI and local name.

use quick_xml::events::{BytesDecl, BytesStart, BytesText, Event};
use quick_xml::name::ResolveResult;
use quick_xml::reader::NsReader;
use quick_xml::Writer;

use crate::error::{BagError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    /// Qualified name as written in the source.
    pub name: String,
    pub namespace: Option<String>,
    pub local: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Element(Element),
    Text(String),
    Comment(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    /// Qualified name as written in the source.
    pub name: String,
    pub namespace: Option<String>,
    pub local: String,
    pub attributes: Vec<Attribute>,
    pub children: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub root: Element,
    has_declaration: bool,
}

fn resolved_namespace(result: ResolveResult) -> Option<String> {
    match result {
        ResolveResult::Bound(ns) => Some(String::from_utf8_lossy(ns.as_ref()).into_owned()),
        _ => None,
    }
}

fn unparseable(msg: impl std::fmt::Display) -> BagError {
    BagError::UnparseableMetadata(msg.to_string())
}

fn write_failed(e: impl std::fmt::Display) -> BagError {
    BagError::UnparseableMetadata(format!("unable to serialize XML: {e}"))
}

impl Document {
    /// Parse a document. Trailing NUL padding is ignored.
    pub fn parse(bytes: &[u8]) -> Result<Document> {
        let end = bytes
            .iter()
            .rposition(|&b| b != 0)
            .map(|p| p + 1)
            .unwrap_or(0);
        let bytes = &bytes[..end];

        let mut reader = NsReader::from_reader(bytes);
        let mut stack: Vec<Element> = Vec::new();
        let mut root: Option<Element> = None;
        let mut has_declaration = false;

        loop {
            let (ns, event) = match reader.read_resolved_event() {
                Ok((ns, event)) => (resolved_namespace(ns), event),
                Err(e) => return Err(unparseable(e)),
            };

            match event {
                Event::Decl(_) => has_declaration = true,
                Event::Start(start) => {
                    let element = Self::open_element(&reader, ns, &start)?;
                    stack.push(element);
                }
                Event::Empty(start) => {
                    let element = Self::open_element(&reader, ns, &start)?;
                    Self::attach(&mut stack, &mut root, element)?;
                }
                Event::End(_) => {
                    let element = stack
                        .pop()
                        .ok_or_else(|| unparseable("unexpected closing tag"))?;
                    Self::attach(&mut stack, &mut root, element)?;
                }
                Event::Text(text) => {
                    let text = text.unescape().map_err(unparseable)?;
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(Node::Text(text.into_owned())),
                        None if text.trim().is_empty() => {}
                        None => return Err(unparseable("text content outside of the root element")),
                    }
                }
                Event::CData(data) => {
                    let text = String::from_utf8_lossy(&data.into_inner()).into_owned();
                    if let Some(parent) = stack.last_mut() {
                        parent.children.push(Node::Text(text));
                    }
                }
                Event::Comment(comment) => {
                    if let Some(parent) = stack.last_mut() {
                        let text = String::from_utf8_lossy(&comment.into_inner()).into_owned();
                        parent.children.push(Node::Comment(text));
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if !stack.is_empty() {
            return Err(unparseable(format!(
                "unclosed element <{}>",
                stack[stack.len() - 1].name
            )));
        }
        let root = root.ok_or_else(|| unparseable("document has no root element"))?;

        Ok(Document {
            root,
            has_declaration,
        })
    }

    fn open_element(
        reader: &NsReader<&[u8]>,
        namespace: Option<String>,
        start: &BytesStart,
    ) -> Result<Element> {
        let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
        let local = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();

        let mut attributes = Vec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(unparseable)?;
            let (attr_ns, attr_local) = reader.resolve_attribute(attr.key);
            attributes.push(Attribute {
                name: String::from_utf8_lossy(attr.key.as_ref()).into_owned(),
                namespace: resolved_namespace(attr_ns),
                local: String::from_utf8_lossy(attr_local.as_ref()).into_owned(),
                value: attr.unescape_value().map_err(unparseable)?.into_owned(),
            });
        }

        Ok(Element {
            name,
            namespace,
            local,
            attributes,
            children: Vec::new(),
        })
    }

    fn attach(stack: &mut [Element], root: &mut Option<Element>, element: Element) -> Result<()> {
        match stack.last_mut() {
            Some(parent) => parent.children.push(Node::Element(element)),
            None if root.is_none() => *root = Some(element),
            None => return Err(unparseable("more than one root element")),
        }
        Ok(())
    }

    /// Serialize with two-space indentation. Whitespace-only text nodes are
    /// dropped so that repeated round-trips do not accumulate blank lines.
    pub fn to_pretty_bytes(&self) -> Result<Vec<u8>> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        if self.has_declaration {
            writer
                .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
                .map_err(write_failed)?;
        }
        self.root.write(&mut writer)?;
        let mut out = writer.into_inner();
        out.push(b'\n');
        Ok(out)
    }

    pub fn to_pretty_string(&self) -> Result<String> {
        let bytes = self.to_pretty_bytes()?;
        String::from_utf8(bytes).map_err(|e| BagError::UnparseableMetadata(e.to_string()))
    }
}

impl Element {
    /// Concatenated direct text content.
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|n| match n {
                Node::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Replace the direct text content, leaving child elements in place.
    pub fn set_text(&mut self, text: &str) {
        self.children.retain(|n| !matches!(n, Node::Text(_)));
        self.children.insert(0, Node::Text(text.to_string()));
    }

    pub fn attribute(&self, namespace: Option<&str>, local: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.local == local && a.namespace.as_deref() == namespace)
            .map(|a| a.value.as_str())
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|n| match n {
            Node::Element(e) => Some(e),
            _ => None,
        })
    }

    fn child_mut(&mut self, index: usize) -> Option<&mut Element> {
        match self.children.get_mut(index) {
            Some(Node::Element(e)) => Some(e),
            _ => None,
        }
    }

    /// Walk down a list of child-node indices.
    pub fn descend_mut(&mut self, path: &[usize]) -> Option<&mut Element> {
        let mut current = self;
        for &index in path {
            current = current.child_mut(index)?;
        }
        Some(current)
    }

    pub fn to_pretty_string(&self) -> Result<String> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        self.write(&mut writer)?;
        String::from_utf8(writer.into_inner())
            .map_err(|e| BagError::UnparseableMetadata(e.to_string()))
    }

    fn write(&self, writer: &mut Writer<Vec<u8>>) -> Result<()> {
        let mut start = BytesStart::new(self.name.as_str());
        for attr in &self.attributes {
            start.push_attribute((attr.name.as_str(), attr.value.as_str()));
        }

        let meaningful: Vec<&Node> = self
            .children
            .iter()
            .filter(|n| !matches!(n, Node::Text(t) if t.trim().is_empty()))
            .collect();

        if meaningful.is_empty() {
            writer.write_event(Event::Empty(start)).map_err(write_failed)?;
            return Ok(());
        }

        writer.write_event(Event::Start(start)).map_err(write_failed)?;
        for node in meaningful {
            match node {
                Node::Element(child) => child.write(writer)?,
                Node::Text(text) => writer
                    .write_event(Event::Text(BytesText::new(text)))
                    .map_err(write_failed)?,
                Node::Comment(text) => writer
                    .write_event(Event::Comment(BytesText::from_escaped(text.as_str())))
                    .map_err(write_failed)?,
            }
        }
        writer
            .write_event(Event::End(quick_xml::events::BytesEnd::new(self.name.as_str())))
            .map_err(write_failed)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Step {
    namespace: Option<String>,
    local: String,
}

impl Step {
    fn parse(token: &str, namespaces: &[(&str, &str)]) -> Result<Step> {
        match token.split_once(':') {
            Some((prefix, local)) => {
                let uri = namespaces
                    .iter()
                    .find(|(p, _)| *p == prefix)
                    .map(|(_, uri)| uri.to_string())
                    .ok_or_else(|| {
                        BagError::UnparseableMetadata(format!("unknown namespace prefix: {prefix}"))
                    })?;
                Ok(Step {
                    namespace: Some(uri),
                    local: local.to_string(),
                })
            }
            None => Ok(Step {
                namespace: None,
                local: token.to_string(),
            }),
        }
    }

    fn matches(&self, element: &Element) -> bool {
        element.local == self.local && element.namespace == self.namespace
    }
}

/// A compiled relative location path, evaluated as `//*/<path>`: the first
/// step may match any non-root element, following steps are direct
/// children. A trailing `@name` step selects an attribute value instead of
/// the element text.
#[derive(Debug, Clone, PartialEq)]
pub struct XPath {
    steps: Vec<Step>,
    attribute: Option<Step>,
}

impl XPath {
    pub fn compile(expr: &str, namespaces: &[(&str, &str)]) -> Result<XPath> {
        let mut steps = Vec::new();
        let mut attribute = None;
        for token in expr.split('/').filter(|t| !t.is_empty()) {
            if attribute.is_some() {
                return Err(BagError::UnparseableMetadata(format!(
                    "attribute step must be last: {expr}"
                )));
            }
            match token.strip_prefix('@') {
                Some(attr) => attribute = Some(Step::parse(attr, namespaces)?),
                None => steps.push(Step::parse(token, namespaces)?),
            }
        }
        if steps.is_empty() {
            return Err(BagError::UnparseableMetadata(format!("empty path: {expr}")));
        }
        Ok(XPath { steps, attribute })
    }

    /// Child-index paths from the root to every matching element.
    pub fn select_paths(&self, root: &Element) -> Vec<Vec<usize>> {
        let mut out = Vec::new();
        let mut trail = Vec::new();
        Self::search(root, &self.steps, &mut trail, &mut out);
        out
    }

    fn search(
        parent: &Element,
        steps: &[Step],
        trail: &mut Vec<usize>,
        out: &mut Vec<Vec<usize>>,
    ) {
        for (index, node) in parent.children.iter().enumerate() {
            if let Node::Element(child) = node {
                trail.push(index);
                if steps[0].matches(child) {
                    Self::follow(child, &steps[1..], trail, out);
                }
                Self::search(child, steps, trail, out);
                trail.pop();
            }
        }
    }

    fn follow(
        element: &Element,
        rest: &[Step],
        trail: &mut Vec<usize>,
        out: &mut Vec<Vec<usize>>,
    ) {
        if rest.is_empty() {
            out.push(trail.clone());
            return;
        }
        for (index, node) in element.children.iter().enumerate() {
            if let Node::Element(child) = node {
                if rest[0].matches(child) {
                    trail.push(index);
                    Self::follow(child, &rest[1..], trail, out);
                    trail.pop();
                }
            }
        }
    }

    pub fn select<'a>(&self, root: &'a Element) -> Vec<&'a Element> {
        self.select_paths(root)
            .into_iter()
            .filter_map(|path| {
                let mut current = root;
                for index in path {
                    current = match current.children.get(index) {
                        Some(Node::Element(e)) => e,
                        _ => return None,
                    };
                }
                Some(current)
            })
            .collect()
    }

    /// Text of each matched element, or the attribute value when the path
    /// ends in an attribute step (elements lacking it are skipped).
    pub fn values(&self, root: &Element) -> Vec<String> {
        let elements = self.select(root);
        match &self.attribute {
            Some(attr) => elements
                .into_iter()
                .filter_map(|e| {
                    e.attribute(attr.namespace.as_deref(), &attr.local)
                        .map(str::to_string)
                })
                .collect(),
            None => elements.into_iter().map(Element::text).collect(),
        }
    }
}
