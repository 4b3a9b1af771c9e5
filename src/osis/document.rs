//! Immutable arena representation of a parsed OSIS document.
//!
//! Nodes are stored in document (pre-)order, so a node's descendants occupy
//! the contiguous id range `id + 1 .. subtree_end`. Boundary resolution and
//! structural extraction rely on that ordering instead of mutating the tree.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use quick_xml::escape::{escape, partial_escape};
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::ResolveResult;
use quick_xml::reader::NsReader;
use serde::ser::{Serialize, SerializeMap, Serializer};

pub const OSIS_NAMESPACE: &str = "http://www.bibletechnologies.net/2003/OSIS/namespace";

pub type NodeId = usize;

/// Opaque passthrough attributes of a source element, kept in source order.
///
/// Only a handful of attributes are modelled as columns; everything else is
/// preserved verbatim through this map and stored as a JSON object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes(Vec<(String, String)>);

impl Attributes {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(name, _)| *name == key) {
            Some(entry) => entry.1 = value,
            None => self.0.push((key, value)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

impl Serialize for Attributes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, value) in &self.0 {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone)]
pub struct Element {
    pub name: String,
    pub local_name: String,
    pub namespace: Option<String>,
    pub attributes: Attributes,
}

#[derive(Debug, Clone)]
pub enum NodeData {
    Document,
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone)]
pub struct Node {
    pub data: NodeData,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub next_sibling: Option<NodeId>,
    pub prev_sibling: Option<NodeId>,
    subtree_end: NodeId,
}

#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<Node>,
}

impl Document {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read OSIS document {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("failed to parse OSIS document {}", path.display()))
    }

    pub fn parse(xml: &str) -> Result<Self> {
        let mut reader = NsReader::from_str(xml);
        let mut builder = TreeBuilder::new();
        let mut buf = Vec::new();

        loop {
            let position = reader.buffer_position();
            let event = reader
                .read_resolved_event_into(&mut buf)
                .with_context(|| format!("malformed XML near byte {position}"))?;

            match event {
                (ns, Event::Start(start)) => {
                    let element = element_from_start(&start, &ns)?;
                    builder.open(element);
                }
                (ns, Event::Empty(start)) => {
                    let element = element_from_start(&start, &ns)?;
                    builder.open(element);
                    builder.close();
                }
                (_, Event::End(_)) => builder.close(),
                (_, Event::Text(text)) => {
                    let value = text
                        .unescape()
                        .with_context(|| format!("invalid character data near byte {position}"))?;
                    builder.text(&value);
                }
                (_, Event::CData(data)) => {
                    let value = String::from_utf8_lossy(&data.into_inner()).into_owned();
                    builder.text(&value);
                }
                (_, Event::Eof) => break,
                _ => {}
            }
            buf.clear();
        }

        builder.finish()
    }

    pub fn root(&self) -> NodeId {
        0
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn element(&self, id: NodeId) -> Option<&Element> {
        match &self.nodes.get(id)?.data {
            NodeData::Element(element) => Some(element),
            _ => None,
        }
    }

    pub fn text(&self, id: NodeId) -> Option<&str> {
        match &self.nodes.get(id)?.data {
            NodeData::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }

    /// Local name of an element in the OSIS namespace (or with no namespace).
    pub fn osis_name(&self, id: NodeId) -> Option<&str> {
        let element = self.element(id)?;
        match element.namespace.as_deref() {
            None | Some(OSIS_NAMESPACE) => Some(element.local_name.as_str()),
            Some(_) => None,
        }
    }

    pub fn is_element(&self, id: NodeId, local_name: &str) -> bool {
        self.osis_name(id) == Some(local_name)
    }

    pub fn attr(&self, id: NodeId, key: &str) -> Option<&str> {
        self.element(id)?.attributes.get(key)
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id].children
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id].parent
    }

    pub fn subtree_end(&self, id: NodeId) -> NodeId {
        self.nodes[id].subtree_end
    }

    /// True when `descendant` lies strictly inside the subtree of `ancestor`.
    pub fn contains(&self, ancestor: NodeId, descendant: NodeId) -> bool {
        ancestor < descendant && descendant < self.nodes[ancestor].subtree_end
    }

    pub fn descendants(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        (id + 1)..self.nodes[id].subtree_end
    }

    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.nodes[id].parent, move |current| {
            self.nodes[*current].parent
        })
    }

    pub fn following_siblings(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.nodes[id].next_sibling, move |current| {
            self.nodes[*current].next_sibling
        })
    }

    pub fn preceding_siblings(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.nodes[id].prev_sibling, move |current| {
            self.nodes[*current].prev_sibling
        })
    }

    /// OSIS elements with the given local name, in document order.
    pub fn elements<'a>(&'a self, local_name: &'a str) -> impl Iterator<Item = NodeId> + 'a {
        self.elements_within(self.root(), local_name)
    }

    pub fn elements_within<'a>(
        &'a self,
        scope: NodeId,
        local_name: &'a str,
    ) -> impl Iterator<Item = NodeId> + 'a {
        self.descendants(scope)
            .filter(move |id| self.is_element(*id, local_name))
    }

    pub fn first_child_element(&self, id: NodeId, local_name: &str) -> Option<NodeId> {
        self.children(id)
            .iter()
            .copied()
            .find(|child| self.is_element(*child, local_name))
    }

    pub fn text_content(&self, id: NodeId) -> String {
        self.text_content_before(id, NodeId::MAX)
    }

    /// Text of the subtree, restricted to nodes that precede `limit` in
    /// document order.
    pub fn text_content_before(&self, id: NodeId, limit: NodeId) -> String {
        let mut out = String::new();
        if id >= limit {
            return out;
        }
        if let Some(value) = self.text(id) {
            out.push_str(value);
            return out;
        }
        for node in self.descendants(id).take_while(|node| *node < limit) {
            if let Some(value) = self.text(node) {
                out.push_str(value);
            }
        }
        out
    }

    /// Serialize the subtree of `id`, dropping every node at or after `limit`.
    pub fn write_markup_before(&self, id: NodeId, limit: NodeId, out: &mut String) {
        if id >= limit {
            return;
        }
        match &self.nodes[id].data {
            NodeData::Text(value) => out.push_str(&partial_escape(value.as_str())),
            NodeData::Document => {
                for child in &self.nodes[id].children {
                    self.write_markup_before(*child, limit, out);
                }
            }
            NodeData::Element(element) => {
                out.push('<');
                out.push_str(&element.name);
                for (key, value) in element.attributes.iter() {
                    out.push(' ');
                    out.push_str(key);
                    out.push_str("=\"");
                    out.push_str(&escape(value));
                    out.push('"');
                }

                let visible = self.nodes[id]
                    .children
                    .iter()
                    .copied()
                    .filter(|child| *child < limit)
                    .collect::<Vec<NodeId>>();
                if visible.is_empty() {
                    out.push_str("/>");
                    return;
                }

                out.push('>');
                for child in visible {
                    self.write_markup_before(child, limit, out);
                }
                out.push_str("</");
                out.push_str(&element.name);
                out.push('>');
            }
        }
    }
}

fn element_from_start(start: &BytesStart<'_>, ns: &ResolveResult<'_>) -> Result<Element> {
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let local_name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
    let namespace = match ns {
        ResolveResult::Bound(namespace) => {
            Some(String::from_utf8_lossy(namespace.as_ref()).into_owned())
        }
        ResolveResult::Unbound => None,
        ResolveResult::Unknown(prefix) => {
            bail!(
                "unknown namespace prefix '{}' on element <{name}>",
                String::from_utf8_lossy(prefix)
            )
        }
    };

    let mut attributes = Attributes::new();
    for attr in start.attributes() {
        let attr = attr.with_context(|| format!("malformed attribute on <{name}>"))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .with_context(|| format!("invalid value for attribute {key} on <{name}>"))?;
        attributes.insert(key, value.into_owned());
    }

    Ok(Element {
        name,
        local_name,
        namespace,
        attributes,
    })
}

struct TreeBuilder {
    nodes: Vec<Node>,
    stack: Vec<NodeId>,
}

impl TreeBuilder {
    fn new() -> Self {
        let root = Node {
            data: NodeData::Document,
            parent: None,
            children: Vec::new(),
            next_sibling: None,
            prev_sibling: None,
            subtree_end: 1,
        };
        Self {
            nodes: vec![root],
            stack: vec![0],
        }
    }

    fn current(&self) -> NodeId {
        self.stack.last().copied().unwrap_or(0)
    }

    fn append(&mut self, data: NodeData) -> NodeId {
        let parent = self.current();
        let id = self.nodes.len();
        let prev_sibling = self.nodes[parent].children.last().copied();
        if let Some(prev) = prev_sibling {
            self.nodes[prev].next_sibling = Some(id);
        }
        self.nodes.push(Node {
            data,
            parent: Some(parent),
            children: Vec::new(),
            next_sibling: None,
            prev_sibling,
            subtree_end: id + 1,
        });
        self.nodes[parent].children.push(id);
        id
    }

    fn open(&mut self, element: Element) {
        let id = self.append(NodeData::Element(element));
        self.stack.push(id);
    }

    fn close(&mut self) {
        if self.stack.len() <= 1 {
            return;
        }
        if let Some(id) = self.stack.pop() {
            self.nodes[id].subtree_end = self.nodes.len();
        }
    }

    fn text(&mut self, value: &str) {
        if value.is_empty() {
            return;
        }
        let parent = self.current();
        if let Some(last) = self.nodes[parent].children.last().copied() {
            if let NodeData::Text(existing) = &mut self.nodes[last].data {
                existing.push_str(value);
                return;
            }
        }
        self.append(NodeData::Text(value.to_string()));
    }

    fn finish(mut self) -> Result<Document> {
        if self.stack.len() > 1 {
            let open = self
                .stack
                .iter()
                .skip(1)
                .filter_map(|id| match &self.nodes[*id].data {
                    NodeData::Element(element) => Some(element.name.clone()),
                    _ => None,
                })
                .collect::<Vec<String>>();
            bail!("unexpected end of document; unclosed elements: {}", open.join(" > "));
        }
        let total = self.nodes.len();
        self.nodes[0].subtree_end = total;
        if !self.nodes[0]
            .children
            .iter()
            .any(|child| matches!(self.nodes[*child].data, NodeData::Element(_)))
        {
            bail!("document has no root element");
        }
        Ok(Document { nodes: self.nodes })
    }
}
