use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use std::io::Cursor;

use crate::core::{CfdiError, XmlNode};

fn xml_io(e: std::io::Error) -> CfdiError {
    CfdiError::Xml(format!("XML write error: {e}"))
}

/// Attribute list under construction. Absent optional values are skipped.
#[derive(Default)]
pub(crate) struct Attrs(Vec<(&'static str, String)>);

impl Attrs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: &'static str, value: impl ToString) -> &mut Self {
        self.0.push((key, value.to_string()));
        self
    }

    pub fn opt<T: ToString>(&mut self, key: &'static str, value: Option<T>) -> &mut Self {
        if let Some(value) = value {
            self.set(key, value);
        }
        self
    }

    fn start<'a>(&'a self, name: &'a str) -> BytesStart<'a> {
        let mut elem = BytesStart::new(name);
        for (k, v) in &self.0 {
            elem.push_attribute((*k, v.as_str()));
        }
        elem
    }
}

pub(crate) struct XmlWriter {
    writer: Writer<Cursor<Vec<u8>>>,
}

impl XmlWriter {
    pub fn new() -> Result<Self, CfdiError> {
        let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .map_err(xml_io)?;
        Ok(Self { writer })
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.writer.into_inner().into_inner()
    }

    pub fn into_string(self) -> Result<String, CfdiError> {
        String::from_utf8(self.into_bytes())
            .map_err(|e| CfdiError::Xml(format!("XML UTF-8 error: {e}")))
    }

    pub fn start(&mut self, name: &str, attrs: &Attrs) -> Result<&mut Self, CfdiError> {
        self.writer
            .write_event(Event::Start(attrs.start(name)))
            .map_err(xml_io)?;
        Ok(self)
    }

    pub fn empty(&mut self, name: &str, attrs: &Attrs) -> Result<&mut Self, CfdiError> {
        self.writer
            .write_event(Event::Empty(attrs.start(name)))
            .map_err(xml_io)?;
        Ok(self)
    }

    pub fn end(&mut self, name: &str) -> Result<&mut Self, CfdiError> {
        self.writer
            .write_event(Event::End(BytesEnd::new(name)))
            .map_err(xml_io)?;
        Ok(self)
    }

    /// Write an opaque node and its subtree verbatim.
    pub fn node(&mut self, node: &XmlNode) -> Result<&mut Self, CfdiError> {
        let mut elem = BytesStart::new(node.name.as_str());
        for (k, v) in &node.attributes {
            elem.push_attribute((k.as_str(), v.as_str()));
        }
        if node.children.is_empty() && node.text_content().is_none() {
            self.writer.write_event(Event::Empty(elem)).map_err(xml_io)?;
            return Ok(self);
        }
        self.writer.write_event(Event::Start(elem)).map_err(xml_io)?;
        if let Some(text) = node.text_content() {
            self.writer
                .write_event(Event::Text(BytesText::new(text)))
                .map_err(xml_io)?;
        }
        for child in &node.children {
            self.node(child)?;
        }
        self.end(&node.name)
    }
}
