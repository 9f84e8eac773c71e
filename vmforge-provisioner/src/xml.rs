//! Generic labeled XML tree.
//!
//! The domain descriptor is assembled as an [`XmlNode`] tree and serialized
//! with a deterministic pretty-printer: children in construction order,
//! attributes in insertion order, two-space indent, UTF-8. The companion
//! parser (quick-xml) turns a document back into a tree so tests can check
//! structural round-trips instead of comparing strings.

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::{ProvisionError, Result};

/// One element: tag, insertion-ordered attributes, optional text content,
/// ordered children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlNode {
    tag: String,
    attrs: Vec<(String, String)>,
    text: Option<String>,
    children: Vec<XmlNode>,
}

impl XmlNode {
    /// Create an empty element.
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            attrs: Vec::new(),
            text: None,
            children: Vec::new(),
        }
    }

    /// Create an element holding only text content.
    pub fn text_node(tag: impl Into<String>, value: impl ToString) -> Self {
        let mut node = Self::new(tag);
        node.text = Some(value.to_string());
        node
    }

    /// Append an attribute (builder form). Insertion order is preserved
    /// in the serialized output.
    pub fn attr(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.attrs.push((name.into(), value.to_string()));
        self
    }

    /// Append a child element (builder form).
    pub fn child(mut self, node: XmlNode) -> Self {
        self.children.push(node);
        self
    }

    /// Append a child element.
    pub fn push(&mut self, node: XmlNode) {
        self.children.push(node);
    }

    /// Element tag.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Text content, if any.
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    /// Attribute value by name.
    pub fn get_attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Child elements in document order.
    pub fn children(&self) -> &[XmlNode] {
        &self.children
    }

    /// First direct child with the given tag.
    pub fn find(&self, tag: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.tag == tag)
    }

    /// Serialize the tree to pretty-printed UTF-8 text.
    ///
    /// Two builds of the same tree always produce byte-identical output.
    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        self.write(&mut out, 0);
        out
    }

    fn write(&self, out: &mut String, depth: usize) {
        for _ in 0..depth {
            out.push_str("  ");
        }
        out.push('<');
        out.push_str(&self.tag);
        for (name, value) in &self.attrs {
            out.push(' ');
            out.push_str(name);
            out.push_str("=\"");
            out.push_str(&escape_attr(value));
            out.push('"');
        }

        match (&self.text, self.children.is_empty()) {
            (None, true) => {
                out.push_str("/>\n");
            }
            (Some(text), true) => {
                out.push('>');
                out.push_str(&escape_text(text));
                out.push_str("</");
                out.push_str(&self.tag);
                out.push_str(">\n");
            }
            (text, false) => {
                out.push_str(">\n");
                if let Some(text) = text {
                    for _ in 0..=depth {
                        out.push_str("  ");
                    }
                    out.push_str(&escape_text(text));
                    out.push('\n');
                }
                for c in &self.children {
                    c.write(out, depth + 1);
                }
                for _ in 0..depth {
                    out.push_str("  ");
                }
                out.push_str("</");
                out.push_str(&self.tag);
                out.push_str(">\n");
            }
        }
    }

    /// Parse a document back into a tree.
    ///
    /// Whitespace-only text (the pretty-printer's indentation) is dropped,
    /// so `parse(node.to_xml())` reproduces `node`.
    pub fn parse(input: &str) -> Result<XmlNode> {
        let mut reader = Reader::from_str(input);
        let mut stack: Vec<XmlNode> = Vec::new();
        let mut root: Option<XmlNode> = None;

        loop {
            let event = reader
                .read_event()
                .map_err(|e| ProvisionError::Xml(e.to_string()))?;
            match event {
                Event::Start(e) => {
                    stack.push(Self::from_start(&e)?);
                }
                Event::Empty(e) => {
                    let node = Self::from_start(&e)?;
                    Self::attach(&mut stack, &mut root, node)?;
                }
                Event::End(_) => {
                    let node = stack
                        .pop()
                        .ok_or_else(|| ProvisionError::Xml("unbalanced end tag".to_string()))?;
                    Self::attach(&mut stack, &mut root, node)?;
                }
                Event::Text(t) => {
                    let text = t
                        .unescape()
                        .map_err(|e| ProvisionError::Xml(e.to_string()))?;
                    let trimmed = text.trim();
                    if !trimmed.is_empty() {
                        let top = stack.last_mut().ok_or_else(|| {
                            ProvisionError::Xml("text outside of any element".to_string())
                        })?;
                        top.text = Some(trimmed.to_string());
                    }
                }
                Event::Eof => break,
                // Declarations, comments, CDATA and PIs never appear in
                // documents we generate.
                _ => {}
            }
        }

        if !stack.is_empty() {
            return Err(ProvisionError::Xml("unclosed element".to_string()));
        }
        root.ok_or_else(|| ProvisionError::Xml("empty document".to_string()))
    }

    fn from_start(e: &quick_xml::events::BytesStart<'_>) -> Result<XmlNode> {
        let tag = String::from_utf8_lossy(e.name().as_ref()).into_owned();
        let mut node = XmlNode::new(tag);
        for attr in e.attributes() {
            let attr = attr.map_err(|e| ProvisionError::Xml(e.to_string()))?;
            let name = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map_err(|e| ProvisionError::Xml(e.to_string()))?
                .into_owned();
            node.attrs.push((name, value));
        }
        Ok(node)
    }

    fn attach(stack: &mut Vec<XmlNode>, root: &mut Option<XmlNode>, node: XmlNode) -> Result<()> {
        match stack.last_mut() {
            Some(parent) => parent.children.push(node),
            None => {
                if root.is_some() {
                    return Err(ProvisionError::Xml(
                        "multiple root elements".to_string(),
                    ));
                }
                *root = Some(node);
            }
        }
        Ok(())
    }
}

fn escape_text(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn escape_attr(value: &str) -> String {
    escape_text(value).replace('"', "&quot;")
}
