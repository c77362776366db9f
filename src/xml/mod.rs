//! Minimal owned XML document model.
//!
//! The sanitizer mutates package, navigation, and content documents in place
//! and re-serializes them, so the usual streaming event approach is not
//! enough on its own: events are parsed into a small owned tree, edited, and
//! written back out. Comments are dropped at parse time; everything else
//! round-trips.
//!
//! This is deliberately not a general XML toolkit. Namespaces are handled
//! textually (prefix-qualified names plus `xmlns` attributes), which is all
//! EPUB package internals need.

mod parse;
mod write;

pub use parse::{parse_document, strip_bom};
pub use write::serialize_document;

/// One node in the tree. Comments and processing instructions are not
/// represented; CDATA is folded into text.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Element(Element),
    Text(String),
}

impl Node {
    pub fn as_element(&self) -> Option<&Element> {
        match self {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        }
    }

    pub fn as_element_mut(&mut self) -> Option<&mut Element> {
        match self {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        }
    }
}

/// An element with its attributes (in document order) and children.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Element {
    /// Name as written, prefix included (`dc:title`).
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<Node>,
}

/// A parsed XML document: optional DOCTYPE plus the root element. The XML
/// declaration is regenerated on write, always UTF-8.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub doctype: Option<String>,
    pub root: Element,
}

/// Extract the local part of a possibly prefixed name (`dc:title` -> `title`).
pub fn local_name(name: &str) -> &str {
    name.rsplit_once(':').map(|(_, local)| local).unwrap_or(name)
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Element {
            name: name.into(),
            attrs: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn local_name(&self) -> &str {
        local_name(&self.name)
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attr(name).is_some()
    }

    /// Set an attribute, replacing any existing value in place.
    pub fn set_attr(&mut self, name: &str, value: &str) {
        match self.attrs.iter_mut().find(|(k, _)| k == name) {
            Some((_, v)) => *v = value.to_string(),
            None => self.attrs.push((name.to_string(), value.to_string())),
        }
    }

    pub fn remove_attr(&mut self, name: &str) -> Option<String> {
        let idx = self.attrs.iter().position(|(k, _)| k == name)?;
        Some(self.attrs.remove(idx).1)
    }

    /// Append a token to the `class` attribute.
    pub fn add_class(&mut self, class: &str) {
        match self.attr("class") {
            Some(existing) if !existing.is_empty() => {
                if !existing.split_ascii_whitespace().any(|c| c == class) {
                    let merged = format!("{existing} {class}");
                    self.set_attr("class", &merged);
                }
            }
            _ => self.set_attr("class", class),
        }
    }

    pub fn push_element(&mut self, child: Element) {
        self.children.push(Node::Element(child));
    }

    pub fn push_text(&mut self, text: impl Into<String>) {
        self.children.push(Node::Text(text.into()));
    }

    /// Concatenated descendant text content.
    pub fn text(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        for child in &self.children {
            match child {
                Node::Text(t) => out.push_str(t),
                Node::Element(e) => e.collect_text(out),
            }
        }
    }

    /// Replace all children with a single text node.
    pub fn set_text(&mut self, text: impl Into<String>) {
        self.children = vec![Node::Text(text.into())];
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(Node::as_element)
    }

    pub fn child_elements_mut(&mut self) -> impl Iterator<Item = &mut Element> {
        self.children.iter_mut().filter_map(Node::as_element_mut)
    }

    /// First descendant (depth-first, self excluded) whose local name matches.
    pub fn find(&self, local: &str) -> Option<&Element> {
        for child in self.child_elements() {
            if child.local_name() == local {
                return Some(child);
            }
            if let Some(found) = child.find(local) {
                return Some(found);
            }
        }
        None
    }

    pub fn find_mut(&mut self, local: &str) -> Option<&mut Element> {
        for child in self.child_elements_mut() {
            if child.local_name() == local {
                return Some(child);
            }
            if let Some(found) = child.find_mut(local) {
                return Some(found);
            }
        }
        None
    }

    /// All descendants (self excluded) with a matching local name, in
    /// document order.
    pub fn find_all(&self, local: &str) -> Vec<&Element> {
        let mut out = Vec::new();
        self.walk(&mut |e| {
            if e.local_name() == local {
                out.push(e);
            }
        });
        out
    }

    /// Visit every descendant element (self excluded), depth-first.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Element)) {
        for child in self.child_elements() {
            visit(child);
            child.walk(visit);
        }
    }

    /// Mutating variant of [`walk`](Self::walk).
    pub fn walk_mut(&mut self, visit: &mut impl FnMut(&mut Element)) {
        for child in self.child_elements_mut() {
            visit(child);
            child.walk_mut(visit);
        }
    }

    /// Drop descendant elements failing the predicate (checked before
    /// recursing, so a removed subtree is not visited).
    pub fn retain_elements(&mut self, keep: &impl Fn(&Element) -> bool) {
        self.children.retain(|node| match node {
            Node::Element(e) => keep(e),
            Node::Text(_) => true,
        });
        for child in self.child_elements_mut() {
            child.retain_elements(keep);
        }
    }

    /// Rewrite descendant elements bottom-up: `transform` may keep the
    /// element (`Some(Node::Element)`), replace it with text, or remove it
    /// (`None`).
    pub fn rewrite_elements(&mut self, transform: &impl Fn(Element) -> Option<Node>) {
        let children = std::mem::take(&mut self.children);
        for node in children {
            match node {
                Node::Element(mut e) => {
                    e.rewrite_elements(transform);
                    if let Some(replacement) = transform(e) {
                        self.children.push(replacement);
                    }
                }
                text => self.children.push(text),
            }
        }
    }
}

impl Document {
    pub fn new(root: Element) -> Self {
        Document {
            doctype: None,
            root,
        }
    }

    /// Parse from a string; see [`parse_document`].
    pub fn parse(content: &str) -> crate::error::Result<Document> {
        parse_document(content)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        serialize_document(self)
    }

    pub fn to_xml_string(&self) -> String {
        // The serializer only ever emits valid UTF-8.
        String::from_utf8(self.to_bytes()).unwrap_or_default()
    }

    /// Rebind a prefixed namespace to the default binding: if the root
    /// declares `xmlns:pref="ns"` and elements carry the `pref:` prefix,
    /// the prefix is stripped from element names and the declaration becomes
    /// `xmlns="ns"`. Documents already using the default binding pass
    /// through untouched.
    pub fn normalize_namespace(&mut self, ns: &str) {
        let prefix = self.root.attrs.iter().find_map(|(k, v)| {
            let p = k.strip_prefix("xmlns:")?;
            (v == ns).then(|| p.to_string())
        });
        let Some(prefix) = prefix else {
            return;
        };
        let qualifier = format!("{prefix}:");
        if !self.root.name.starts_with(&qualifier) {
            // Prefix declared but unused on the document element; leave the
            // document alone rather than guessing.
            return;
        }
        self.root.remove_attr(&format!("xmlns:{prefix}"));
        self.root.set_attr("xmlns", ns);
        strip_prefix_rec(&mut self.root, &qualifier);
    }
}

fn strip_prefix_rec(element: &mut Element, qualifier: &str) {
    if let Some(stripped) = element.name.strip_prefix(qualifier) {
        element.name = stripped.to_string();
    }
    for child in element.child_elements_mut() {
        strip_prefix_rec(child, qualifier);
    }
}
