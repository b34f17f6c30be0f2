use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};

use crate::aac::processors::error::{ProcessorError, Result};

/// Decodes an XML entry as UTF-8, dropping a leading byte-order mark.
pub fn decode_utf8<'a>(format: &'static str, bytes: &'a [u8]) -> Result<&'a str> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    std::str::from_utf8(bytes)
        .map_err(|err| ProcessorError::load(format, format!("XML is not UTF-8: {err}")))
}

/// Parses a document, reporting failures as load errors for `format`.
pub fn parse_document<'a>(format: &'static str, text: &'a str) -> Result<roxmltree::Document<'a>> {
    roxmltree::Document::parse(text)
        .map_err(|err| ProcessorError::load(format, format!("malformed XML: {err}")))
}

/// First child element called `name`.
pub fn child<'a, 'input>(
    node: roxmltree::Node<'a, 'input>,
    name: &str,
) -> Option<roxmltree::Node<'a, 'input>> {
    node.children()
        .find(|child| child.is_element() && child.has_tag_name(name))
}

/// Element children called `name`.
pub fn children<'a, 'input: 'a>(
    node: roxmltree::Node<'a, 'input>,
    name: &'a str,
) -> impl Iterator<Item = roxmltree::Node<'a, 'input>> + 'a {
    node.children()
        .filter(move |child| child.is_element() && child.has_tag_name(name))
}

/// Follows a `/`-separated chain of child element names.
pub fn descend<'a, 'input>(
    node: roxmltree::Node<'a, 'input>,
    path: &str,
) -> Option<roxmltree::Node<'a, 'input>> {
    path.split('/')
        .try_fold(node, |current, name| child(current, name))
}

/// Concatenated descendant text, trimmed. `None` when blank.
pub fn text_of(node: roxmltree::Node<'_, '_>) -> Option<String> {
    let text: String = node
        .descendants()
        .filter(|n| n.is_text())
        .filter_map(|n| n.text())
        .collect();
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// Text of the child element called `name`.
pub fn child_text(node: roxmltree::Node<'_, '_>, name: &str) -> Option<String> {
    child(node, name).and_then(text_of)
}

/// Small indenting writer over quick-xml.
pub struct XmlOut {
    writer: Writer<Vec<u8>>,
}

impl XmlOut {
    /// Starts a document with an XML declaration.
    pub fn new() -> Result<Self> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .map_err(ProcessorError::xml)?;
        Ok(Self { writer })
    }

    pub fn start(&mut self, name: &str, attrs: &[(&str, &str)]) -> Result<()> {
        let mut element = BytesStart::new(name);
        for attr in attrs {
            element.push_attribute(*attr);
        }
        self.writer
            .write_event(Event::Start(element))
            .map_err(ProcessorError::xml)
    }

    pub fn end(&mut self, name: &str) -> Result<()> {
        self.writer
            .write_event(Event::End(BytesEnd::new(name)))
            .map_err(ProcessorError::xml)
    }

    pub fn empty(&mut self, name: &str, attrs: &[(&str, &str)]) -> Result<()> {
        let mut element = BytesStart::new(name);
        for attr in attrs {
            element.push_attribute(*attr);
        }
        self.writer
            .write_event(Event::Empty(element))
            .map_err(ProcessorError::xml)
    }

    pub fn text(&mut self, text: &str) -> Result<()> {
        self.writer
            .write_event(Event::Text(BytesText::new(text)))
            .map_err(ProcessorError::xml)
    }

    /// `<name>text</name>`
    pub fn text_element(&mut self, name: &str, text: &str) -> Result<()> {
        self.start(name, &[])?;
        self.text(text)?;
        self.end(name)
    }

    pub fn finish(self) -> Vec<u8> {
        let mut bytes = self.writer.into_inner();
        bytes.push(b'\n');
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_escaped_elements_and_reads_them_back() {
        let mut out = XmlOut::new().expect("writer");
        out.start("Grid", &[("Name", "Fish & Chips")]).expect("start");
        out.text_element("Caption", "<hello>").expect("caption");
        out.end("Grid").expect("end");
        let bytes = out.finish();

        let text = decode_utf8("test", &bytes).expect("utf8");
        let doc = parse_document("test", text).expect("parse");
        let root = doc.root_element();
        assert_eq!(root.attribute("Name"), Some("Fish & Chips"));
        assert_eq!(child_text(root, "Caption").as_deref(), Some("<hello>"));
    }

    #[test]
    fn malformed_documents_are_load_errors() {
        let err = parse_document("opml", "<opml><body>").expect_err("malformed");
        assert!(matches!(err, ProcessorError::Load { format: "opml", .. }));
    }
}
