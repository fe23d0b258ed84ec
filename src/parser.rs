use crate::error::{Result, VastError};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use regex::Regex;
use std::borrow::Cow;
use std::sync::LazyLock;

/// Synthetic element wrapped around every document so that ad servers may
/// emit sibling top-level elements (e.g. a stray `Error` next to `VAST`).
const ROOT_TAG: &str = "VastDocumentRoot";

/// Deepest element nesting accepted. Real VAST documents nest about a dozen levels.
const MAX_DEPTH: usize = 256;

static XML_PROLOG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<\?.*?\?>").expect("valid regex"));

/// A parsed XML element
///
/// Only the parts VAST processing needs are kept: the tag name, the attributes in
/// document order, child elements and the text that precedes the first child.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Element {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<Element>,
    text: Option<String>,
}

impl Element {
    fn from_start(start: &BytesStart) -> Result<Element> {
        let mut element = Element {
            name: String::from_utf8_lossy(start.name().as_ref()).into_owned(),
            ..Element::default()
        };

        for attr in start.attributes() {
            let attr = attr.map_err(quick_xml::Error::from)?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr.unescape_value()?.into_owned();
            element.attributes.push((key, value));
        }

        Ok(element)
    }

    fn push_text(&mut self, text: &str) {
        // Text after the first child element is not the node's value
        if !self.children.is_empty() {
            return;
        }
        match &mut self.text {
            Some(existing) => existing.push_str(text),
            None => self.text = Some(text.to_string()),
        }
    }

    fn finish(&mut self) {
        self.text = self
            .text
            .take()
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty());
    }

    /// The element's tag name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Trimmed text content, absent when the element has no (non-blank) text
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Attribute value parsed as an integer, absent when missing or not numeric
    pub fn attribute_as_int(&self, name: &str) -> Option<i32> {
        self.attribute(name)?.trim().parse().ok()
    }

    pub fn children(&self) -> &[Element] {
        &self.children
    }

    pub fn first_child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|child| child.name == name)
    }

    pub fn children_named<'a, 'n>(&'a self, name: &'n str) -> impl Iterator<Item = &'a Element> {
        self.children.iter().filter(move |child| child.name == name)
    }

    /// Children with the given tag whose `attribute` is one of `values`
    pub fn children_with_attribute<'a, 'v>(
        &'a self,
        name: &'v str,
        attribute: &'v str,
        values: &'v [&'v str],
    ) -> impl Iterator<Item = &'a Element> {
        self.children_named(name).filter(move |child| {
            child
                .attribute(attribute)
                .is_some_and(|value| values.iter().any(|candidate| *candidate == value))
        })
    }

    /// Text of the first child with the given tag
    pub fn child_text(&self, name: &str) -> Option<&str> {
        self.first_child(name).and_then(Element::text)
    }

    /// All descendants with the given tag, in document order
    pub fn descendants<'a>(&'a self, name: &str) -> Vec<&'a Element> {
        let mut found = Vec::new();
        collect_descendants(self, name, &mut found);
        found
    }
}

fn collect_descendants<'a>(element: &'a Element, name: &str, found: &mut Vec<&'a Element>) {
    for child in &element.children {
        if child.name == name {
            found.push(child);
        }
        collect_descendants(child, name, found);
    }
}

/// A parsed XML document wrapped in the synthetic root element
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    root: Element,
}

impl Document {
    pub fn root(&self) -> &Element {
        &self.root
    }

    /// All elements with the given tag anywhere in the document
    pub fn elements(&self, name: &str) -> Vec<&Element> {
        self.root.descendants(name)
    }

    /// Text of the first element with the given tag that has any text
    pub fn first_text(&self, name: &str) -> Option<&str> {
        self.elements(name).into_iter().find_map(Element::text)
    }

    /// Texts of all elements with the given tag, skipping empty ones
    pub fn texts(&self, name: &str) -> Vec<&str> {
        self.elements(name)
            .into_iter()
            .filter_map(Element::text)
            .collect()
    }
}

/// Parse an XML string into a [`Document`]
///
/// A leading `<?xml ...?>` prolog is stripped since it is only legal as the very first
/// thing in a document and ad servers frequently get it wrong.
pub fn parse_document(xml: &str) -> Result<Document> {
    let body = XML_PROLOG.replacen(xml, 1, "");
    let wrapped = format!("<{ROOT_TAG}>{body}</{ROOT_TAG}>");

    let mut reader = Reader::from_str(&wrapped);
    reader.trim_text(true);

    let mut buf = Vec::new();
    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                if root.is_some() {
                    return Err(VastError::MalformedXml("content after document root".to_string()));
                }
                if stack.len() >= MAX_DEPTH {
                    return Err(VastError::MalformedXml("document nested too deeply".to_string()));
                }
                stack.push(Element::from_start(e)?);
            }
            Ok(Event::Empty(ref e)) => {
                let mut element = Element::from_start(e)?;
                element.finish();
                match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None => {
                        return Err(VastError::MalformedXml(
                            "element outside document root".to_string(),
                        ));
                    }
                }
            }
            Ok(Event::End(_)) => {
                let mut element = stack
                    .pop()
                    .ok_or_else(|| VastError::MalformedXml("unbalanced end tag".to_string()))?;
                element.finish();
                match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None => root = Some(element),
                }
            }
            Ok(Event::Text(e)) => {
                let text = e.unescape()?;
                if let Some(current) = stack.last_mut() {
                    current.push_text(&text);
                }
            }
            Ok(Event::CData(e)) => {
                let text: Cow<str> = String::from_utf8_lossy(&e);
                if let Some(current) = stack.last_mut() {
                    current.push_text(&text);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(VastError::XmlParseError(e)),
            _ => (),
        }
        buf.clear();
    }

    if !stack.is_empty() {
        return Err(VastError::MalformedXml("unexpected end of file".to_string()));
    }

    root.map(|root| Document { root })
        .ok_or_else(|| VastError::MalformedXml("empty document".to_string()))
}
