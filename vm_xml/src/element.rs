// Copyright © 2021 Intel Corporation
//
// SPDX-License-Identifier: Apache-2.0
//

use std::fmt;

use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::{Error, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Node {
    Element(XmlElement),
    Text(String),
}

/// An owned XML element: name, attributes in document order and child
/// nodes. Paths given to the lookup helpers are `/` separated element
/// names relative to `self`, e.g. `devices/disk/source`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct XmlElement {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<Node>,
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

impl XmlElement {
    pub fn new(name: &str) -> Self {
        XmlElement {
            name: name.to_owned(),
            ..Default::default()
        }
    }

    /// Parses a document, returning its root element. Comments,
    /// processing instructions and the XML declaration are dropped.
    pub fn parse(xml: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut stack: Vec<XmlElement> = Vec::new();
        let mut root = None;

        loop {
            let event = reader.read_event().map_err(|e| {
                Error::Parse(format!("at byte {}: {e}", reader.buffer_position()))
            })?;
            match event {
                Event::Start(e) => stack.push(Self::from_start(&e)?),
                Event::Empty(e) => {
                    let element = Self::from_start(&e)?;
                    Self::attach(&mut stack, &mut root, element)?;
                }
                Event::End(_) => {
                    let element = stack
                        .pop()
                        .ok_or_else(|| Error::Parse("unbalanced end tag".to_owned()))?;
                    Self::attach(&mut stack, &mut root, element)?;
                }
                Event::Text(t) => {
                    let text = t.unescape().map_err(|e| Error::Parse(e.to_string()))?;
                    if let Some(parent) = stack.last_mut() {
                        parent.children.push(Node::Text(text.into_owned()));
                    }
                }
                Event::CData(c) => {
                    if let Some(parent) = stack.last_mut() {
                        let text = String::from_utf8_lossy(&c.into_inner()).into_owned();
                        parent.children.push(Node::Text(text));
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if let Some(open) = stack.last() {
            return Err(Error::Parse(format!("<{}> is not closed", open.name)));
        }
        root.ok_or_else(|| Error::Parse("document has no root element".to_owned()))
    }

    fn from_start(start: &BytesStart) -> Result<Self> {
        let mut element = XmlElement::new(&String::from_utf8_lossy(start.name().as_ref()));
        for attr in start.attributes() {
            let attr = attr.map_err(|e| Error::Parse(e.to_string()))?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map_err(|e| Error::Parse(e.to_string()))?
                .into_owned();
            element.attributes.push((key, value));
        }
        Ok(element)
    }

    fn attach(
        stack: &mut [XmlElement],
        root: &mut Option<XmlElement>,
        element: XmlElement,
    ) -> Result<()> {
        match stack.last_mut() {
            Some(parent) => parent.children.push(Node::Element(element)),
            None if root.is_some() => {
                return Err(Error::Parse("more than one root element".to_owned()))
            }
            None => *root = Some(element),
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn set_attr(&mut self, key: &str, value: &str) -> &mut Self {
        match self.attributes.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => *v = value.to_owned(),
            None => self.attributes.push((key.to_owned(), value.to_owned())),
        }
        self
    }

    pub fn remove_attr(&mut self, key: &str) -> Option<String> {
        let index = self.attributes.iter().position(|(k, _)| k == key)?;
        Some(self.attributes.remove(index).1)
    }

    /// The first text node.
    pub fn text(&self) -> Option<&str> {
        self.children.iter().find_map(|n| match n {
            Node::Text(t) => Some(t.as_str()),
            Node::Element(_) => None,
        })
    }

    /// Replaces every text node with `text`, keeping child elements.
    pub fn set_text(&mut self, text: &str) -> &mut Self {
        self.children.retain(|n| matches!(n, Node::Element(_)));
        self.children.insert(0, Node::Text(text.to_owned()));
        self
    }

    pub fn nodes(&self) -> &[Node] {
        &self.children
    }

    pub fn children(&self) -> impl Iterator<Item = &XmlElement> {
        self.children.iter().filter_map(|n| match n {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        })
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlElement> {
        self.children().filter(move |e| e.name == name)
    }

    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.children().find(|e| e.name == name)
    }

    pub fn child_mut(&mut self, name: &str) -> Option<&mut XmlElement> {
        self.children.iter_mut().find_map(|n| match n {
            Node::Element(e) if e.name == name => Some(e),
            _ => None,
        })
    }

    pub fn find(&self, path: &str) -> Option<&XmlElement> {
        segments(path).try_fold(self, |e, s| e.child(s))
    }

    pub fn find_mut(&mut self, path: &str) -> Option<&mut XmlElement> {
        let mut current = self;
        for segment in segments(path) {
            current = current.child_mut(segment)?;
        }
        Some(current)
    }

    /// Every element reachable through `path`, in document order.
    pub fn find_all(&self, path: &str) -> Vec<&XmlElement> {
        let mut current = vec![self];
        for segment in segments(path) {
            current = current
                .into_iter()
                .flat_map(|e| e.children().filter(move |c| c.name == segment))
                .collect();
        }
        current
    }

    /// Text of the element at `path`.
    pub fn find_text(&self, path: &str) -> Option<&str> {
        self.find(path).and_then(XmlElement::text)
    }

    pub fn add_child(&mut self, child: XmlElement) -> &mut XmlElement {
        self.children.push(Node::Element(child));
        match self.children.last_mut() {
            Some(Node::Element(e)) => e,
            _ => unreachable!(),
        }
    }

    /// Returns the element at `path`, creating missing elements on the
    /// way.
    pub fn ensure_path(&mut self, path: &str) -> &mut XmlElement {
        let mut current = self;
        for segment in segments(path) {
            let index = match current
                .children
                .iter()
                .position(|n| matches!(n, Node::Element(e) if e.name == segment))
            {
                Some(index) => index,
                None => {
                    current
                        .children
                        .push(Node::Element(XmlElement::new(segment)));
                    current.children.len() - 1
                }
            };
            current = match &mut current.children[index] {
                Node::Element(e) => e,
                Node::Text(_) => unreachable!(),
            };
        }
        current
    }

    /// Removes every direct child element named `name`, returning how many
    /// were removed.
    pub fn remove_children(&mut self, name: &str) -> usize {
        let before = self.children.len();
        self.children
            .retain(|n| !matches!(n, Node::Element(e) if e.name == name));
        before - self.children.len()
    }

    fn write_indented(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        let indent = "  ".repeat(depth);
        write!(f, "{indent}<{}", self.name)?;
        for (k, v) in &self.attributes {
            write!(f, " {k}=\"{}\"", escape(v.as_str()))?;
        }

        if self.children.is_empty() {
            return writeln!(f, "/>");
        }
        if self.children.iter().all(|n| matches!(n, Node::Text(_))) {
            write!(f, ">")?;
            for node in &self.children {
                if let Node::Text(t) = node {
                    write!(f, "{}", escape(t.as_str()))?;
                }
            }
            return writeln!(f, "</{}>", self.name);
        }

        writeln!(f, ">")?;
        for node in &self.children {
            match node {
                Node::Element(e) => e.write_indented(f, depth + 1)?,
                Node::Text(t) => writeln!(f, "{indent}  {}", escape(t.as_str()))?,
            }
        }
        writeln!(f, "{indent}</{}>", self.name)
    }
}

impl fmt::Display for XmlElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_indented(f, 0)
    }
}
