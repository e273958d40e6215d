use std::collections::BTreeMap;

use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::delegates::DelegateResponse;
use crate::error::{BadInputCode, MipError};

/// Element of a parsed XML tree
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct XmlNode {
    pub name: String,
    pub attributes: BTreeMap<String, String>,
    pub text: String,
    pub children: Vec<XmlNode>,
}

impl XmlNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    #[must_use]
    pub fn with_child(mut self, child: XmlNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// First child element with the given name
    pub fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlNode> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Text of the named child, empty when absent
    pub fn child_text(&self, name: &str) -> &str {
        self.child(name).map(|c| c.text.as_str()).unwrap_or("")
    }

    fn write_to(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.name);
        for (name, value) in &self.attributes {
            out.push(' ');
            out.push_str(name);
            out.push_str("=\"");
            out.push_str(&escape(value.as_str()));
            out.push('"');
        }
        if self.text.is_empty() && self.children.is_empty() {
            out.push_str("/>");
            return;
        }
        out.push('>');
        out.push_str(&escape(self.text.as_str()));
        for child in &self.children {
            child.write_to(out);
        }
        out.push_str("</");
        out.push_str(&self.name);
        out.push('>');
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlDocument {
    root: XmlNode,
}

impl XmlDocument {
    pub fn new(root: XmlNode) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &XmlNode {
        &self.root
    }

    pub fn into_root(self) -> XmlNode {
        self.root
    }

    /// Serialize with an XML declaration
    pub fn serialize(&self) -> String {
        let mut out = String::from("<?xml version=\"1.0\" encoding=\"utf-8\"?>");
        self.root.write_to(&mut out);
        out
    }
}

/// Pull-style event from an [`XmlReader`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlReaderEvent {
    StartElement {
        name: String,
        attributes: BTreeMap<String, String>,
        depth: usize,
    },
    Text(String),
    EndElement {
        name: String,
        depth: usize,
    },
}

/// Forward-only reader over a document's events
#[derive(Debug, Clone)]
pub struct XmlReader {
    events: Vec<XmlReaderEvent>,
    position: usize,
}

impl XmlReader {
    pub fn new(events: Vec<XmlReaderEvent>) -> Self {
        Self {
            events,
            position: 0,
        }
    }
}

impl Iterator for XmlReader {
    type Item = XmlReaderEvent;

    fn next(&mut self) -> Option<Self::Item> {
        let event = self.events.get(self.position).cloned();
        self.position += 1;
        event
    }
}

/// XML parsing seam
pub trait XmlDelegate: Send + Sync {
    fn create_xml_reader(&self, input: &str) -> DelegateResponse<XmlReader>;

    fn parse_data(&self, data: &str) -> DelegateResponse<XmlDocument>;
}

/// Default delegate built on `quick-xml`
#[derive(Debug, Default, Clone, Copy)]
pub struct QuickXmlDelegate;

fn parse_error(detail: impl std::fmt::Display) -> MipError {
    MipError::bad_input_with_code(
        format!("Invalid XML: {}", detail),
        BadInputCode::ParameterParsing,
    )
}

fn element_parts(start: &BytesStart<'_>) -> DelegateResponse<(String, BTreeMap<String, String>)> {
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let mut attributes = BTreeMap::new();
    for attribute in start.attributes() {
        let attribute = attribute.map_err(parse_error)?;
        let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
        let value = attribute.unescape_value().map_err(parse_error)?.into_owned();
        attributes.insert(key, value);
    }
    Ok((name, attributes))
}

fn read_events(input: &str) -> DelegateResponse<Vec<XmlReaderEvent>> {
    let mut reader = Reader::from_str(input);
    reader.trim_text(true);
    let mut events = Vec::new();
    let mut depth = 0usize;

    loop {
        match reader.read_event().map_err(parse_error)? {
            Event::Start(start) => {
                let (name, attributes) = element_parts(&start)?;
                events.push(XmlReaderEvent::StartElement {
                    name,
                    attributes,
                    depth,
                });
                depth += 1;
            }
            Event::Empty(start) => {
                let (name, attributes) = element_parts(&start)?;
                events.push(XmlReaderEvent::StartElement {
                    name: name.clone(),
                    attributes,
                    depth,
                });
                events.push(XmlReaderEvent::EndElement { name, depth });
            }
            Event::End(end) => {
                depth = depth.saturating_sub(1);
                let name = String::from_utf8_lossy(end.name().as_ref()).into_owned();
                events.push(XmlReaderEvent::EndElement { name, depth });
            }
            Event::Text(text) => {
                let text = text.unescape().map_err(parse_error)?.into_owned();
                events.push(XmlReaderEvent::Text(text));
            }
            Event::CData(data) => {
                events.push(XmlReaderEvent::Text(String::from_utf8_lossy(&data).into_owned()));
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if depth != 0 {
        return Err(parse_error("unexpected end of document"));
    }
    Ok(events)
}

impl XmlDelegate for QuickXmlDelegate {
    fn create_xml_reader(&self, input: &str) -> DelegateResponse<XmlReader> {
        Ok(XmlReader::new(read_events(input)?))
    }

    fn parse_data(&self, data: &str) -> DelegateResponse<XmlDocument> {
        let mut stack: Vec<XmlNode> = Vec::new();
        let mut root = None;

        for event in read_events(data)? {
            match event {
                XmlReaderEvent::StartElement {
                    name, attributes, ..
                } => {
                    if root.is_some() && stack.is_empty() {
                        return Err(parse_error("more than one root element"));
                    }
                    stack.push(XmlNode {
                        name,
                        attributes,
                        ..XmlNode::default()
                    });
                }
                XmlReaderEvent::Text(text) => match stack.last_mut() {
                    Some(node) => node.text.push_str(&text),
                    None => return Err(parse_error("text outside of the root element")),
                },
                XmlReaderEvent::EndElement { .. } => {
                    let node = stack.pop().ok_or_else(|| parse_error("unbalanced end tag"))?;
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(node),
                        None => root = Some(node),
                    }
                }
            }
        }

        root.map(XmlDocument::new)
            .ok_or_else(|| parse_error("document has no root element"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tree() -> DelegateResponse<()> {
        let doc = QuickXmlDelegate.parse_data(
            r#"<?xml version="1.0"?><License version="1"><Owner>a@b.com</Owner><Users><User>x</User><User>y &amp; z</User></Users><Empty/></License>"#,
        )?;
        let root = doc.root();
        assert_eq!(root.name, "License");
        assert_eq!(root.attribute("version"), Some("1"));
        assert_eq!(root.child_text("Owner"), "a@b.com");
        let users: Vec<&str> = root
            .child("Users")
            .map(|u| u.children_named("User").map(|c| c.text.as_str()).collect())
            .unwrap_or_default();
        assert_eq!(users, vec!["x", "y & z"]);
        assert!(root.child("Empty").is_some());
        Ok(())
    }

    #[test]
    fn test_serialize_then_parse_preserves_escaping() -> DelegateResponse<()> {
        let node = XmlNode::new("Data")
            .with_attribute("name", "a\"b")
            .with_child(XmlNode::new("Value").with_text("<tag> & more"));
        let text = XmlDocument::new(node.clone()).serialize();
        let parsed = QuickXmlDelegate.parse_data(&text)?;
        assert_eq!(parsed.root(), &node);
        Ok(())
    }

    #[test]
    fn test_reader_reports_depths() -> DelegateResponse<()> {
        let events: Vec<_> = QuickXmlDelegate.create_xml_reader("<a><b>t</b></a>")?.collect();
        assert_eq!(events.len(), 5);
        assert!(matches!(&events[1], XmlReaderEvent::StartElement { name, depth: 1, .. } if name == "b"));
        assert_eq!(events[2], XmlReaderEvent::Text("t".into()));
        Ok(())
    }

    #[test]
    fn test_malformed_input_is_parameter_parsing() {
        for bad in ["<a><b></a>", "", "<a></a><b></b>", "<a>"] {
            let err = QuickXmlDelegate.parse_data(bad).unwrap_err();
            assert_eq!(err.bad_input_code(), Some(BadInputCode::ParameterParsing), "{}", bad);
        }
    }
}
