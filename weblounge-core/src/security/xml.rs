//! A minimal element tree for security definitions.
//!
//! Security contexts are handed an already located element by whoever loads
//! the surrounding site or page document; they never touch files themselves.
//! [`Element::parse`] turns a document into such an element and
//! [`Element::to_xml`] writes one back.

use quick_xml::events::{BytesStart, Event};
use quick_xml::escape::escape;
use quick_xml::Reader;
use std::fmt::Write;

use super::error::{Result, SecurityError};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Element {
    name: String,
    attributes: Vec<(String, String)>,
    text: String,
    children: Vec<Element>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((name.into(), value.into()));
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(child);
        self
    }

    pub fn push_child(&mut self, child: Element) {
        self.children.push(child);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Text content, trimmed
    pub fn text(&self) -> &str {
        self.text.trim()
    }

    pub fn children(&self) -> &[Element] {
        &self.children
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> {
        self.children.iter().filter(move |c| c.name == name)
    }

    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Parse a document and return its root element
    pub fn parse(xml: &str) -> Result<Element> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut stack: Vec<Element> = Vec::new();
        let mut root: Option<Element> = None;

        loop {
            match reader.read_event()? {
                Event::Start(start) => stack.push(Self::from_start(&start)?),
                Event::Empty(start) => {
                    let element = Self::from_start(&start)?;
                    Self::close(&mut stack, &mut root, element)?;
                }
                Event::End(_) => {
                    let element = stack.pop().ok_or_else(|| {
                        SecurityError::configuration("Unexpected closing tag")
                    })?;
                    Self::close(&mut stack, &mut root, element)?;
                }
                Event::Text(text) => {
                    if let Some(current) = stack.last_mut() {
                        current.text.push_str(&text.unescape()?);
                    }
                }
                Event::CData(data) => {
                    if let Some(current) = stack.last_mut() {
                        current
                            .text
                            .push_str(&String::from_utf8_lossy(&data.into_inner()));
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if let Some(open) = stack.last() {
            return Err(SecurityError::configuration(format!(
                "Element <{}> is not closed",
                open.name
            )));
        }
        root.ok_or_else(|| SecurityError::configuration("Document has no root element"))
    }

    fn from_start(start: &BytesStart<'_>) -> Result<Element> {
        let mut element = Element::new(String::from_utf8_lossy(start.name().as_ref()));
        for attribute in start.attributes() {
            let attribute = attribute.map_err(quick_xml::Error::from)?;
            let name = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
            let value = attribute.unescape_value()?.into_owned();
            element.attributes.push((name, value));
        }
        Ok(element)
    }

    fn close(stack: &mut [Element], root: &mut Option<Element>, element: Element) -> Result<()> {
        match stack.last_mut() {
            Some(parent) => parent.children.push(element),
            None if root.is_none() => *root = Some(element),
            None => {
                return Err(SecurityError::configuration(format!(
                    "Unexpected second root element <{}>",
                    element.name
                )))
            }
        }
        Ok(())
    }

    /// Serialize with two-space indentation
    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        self.write_indented(&mut out, 0);
        out
    }

    fn write_indented(&self, out: &mut String, depth: usize) {
        let indent = "  ".repeat(depth);
        let _ = write!(out, "{indent}<{}", self.name);
        for (name, value) in &self.attributes {
            let _ = write!(out, " {name}=\"{}\"", escape(value.as_str()));
        }

        let text = self.text();
        if self.children.is_empty() && text.is_empty() {
            out.push_str("/>\n");
            return;
        }
        out.push('>');
        if self.children.is_empty() {
            let _ = writeln!(out, "{}</{}>", escape(text), self.name);
            return;
        }

        out.push('\n');
        if !text.is_empty() {
            let _ = writeln!(out, "{indent}  {}", escape(text));
        }
        for child in &self.children {
            child.write_indented(out, depth + 1);
        }
        let _ = writeln!(out, "{indent}</{}>", self.name);
    }
}

/// Split an authority id list. Identifiers are separated by any run of
/// spaces, commas and semicolons.
pub fn split_ids(text: &str) -> impl Iterator<Item = &str> {
    text.split([' ', ',', ';', '\t', '\n', '\r'])
        .filter(|id| !id.is_empty())
}

/// Whether an untyped rule body is the wildcard (`all` or `any`)
pub(crate) fn is_wildcard(text: &str) -> bool {
    let text = text.trim();
    text.eq_ignore_ascii_case("all") || text.eq_ignore_ascii_case("any")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nested_document() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
            <security>
              <owner>jdoe</owner>
              <permission id="system:read" type="role">system:editor, system:guest</permission>
              <restriction id="system:write"><deny/></restriction>
            </security>"#;
        let root = Element::parse(xml).unwrap();
        assert_eq!(root.name(), "security");
        assert_eq!(root.child("owner").unwrap().text(), "jdoe");

        let permission = root.children_named("permission").next().unwrap();
        assert_eq!(permission.attribute("id"), Some("system:read"));
        assert_eq!(permission.attribute("type"), Some("role"));
        assert_eq!(permission.attribute("missing"), None);

        let restriction = root.child("restriction").unwrap();
        assert_eq!(restriction.children().len(), 1);
        assert_eq!(restriction.children()[0].text(), "");
    }

    #[test]
    fn test_entities_are_unescaped_and_escaped_again() {
        let root = Element::parse(r#"<owner note="a &amp; b">Smith &amp; Sons</owner>"#).unwrap();
        assert_eq!(root.text(), "Smith & Sons");
        assert_eq!(root.attribute("note"), Some("a & b"));

        let written = root.to_xml();
        assert!(written.contains("Smith &amp; Sons"));
        assert_eq!(Element::parse(&written).unwrap(), root);
    }

    #[test]
    fn test_malformed_documents_are_rejected() {
        assert!(Element::parse("<security><owner></security>").is_err());
        assert!(Element::parse("<security>").is_err());
        assert!(Element::parse("").is_err());
        assert!(Element::parse("<a/><b/>").is_err());
    }

    #[test]
    fn test_serialize_builder_tree() {
        let element = Element::new("restriction")
            .with_attribute("id", "system:read")
            .with_child(Element::new("allow").with_text("all"))
            .with_child(Element::new("deny"));
        let xml = element.to_xml();
        assert_eq!(
            xml,
            "<restriction id=\"system:read\">\n  <allow>all</allow>\n  <deny/>\n</restriction>\n"
        );
    }

    #[test]
    fn test_split_ids() {
        let ids: Vec<_> = split_ids(" a, b;c  d,,;").collect();
        assert_eq!(ids, vec!["a", "b", "c", "d"]);
        assert_eq!(split_ids("").count(), 0);
    }

    #[test]
    fn test_wildcard_bodies() {
        assert!(is_wildcard("all"));
        assert!(is_wildcard(" ANY "));
        assert!(!is_wildcard("system:all"));
    }
}
