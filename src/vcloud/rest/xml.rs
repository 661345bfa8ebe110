//! Minimal XML reading and writing for vCloud Director.
//!
//! The API answers with deeply namespaced documents, but the client only needs
//! element names, attributes and nesting, so responses are flattened into a
//! list of [`XmlNode`]s in document order. Request bodies are streamed through
//! [`XmlBody`], which leaves escaping to `quick_xml`.

use std::collections::BTreeMap;
use std::io;

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

/// One element of a parsed document, without namespace prefixes.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub(crate) struct XmlNode {
    pub(crate) name: String,
    pub(crate) depth: usize,
    attrs: BTreeMap<String, String>,
}

impl XmlNode {
    pub(crate) fn attr(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).map(String::as_str)
    }

    fn is(&self, name: &str) -> bool {
        self.name == name
    }
}

/// Flattened view over a parsed document.
#[derive(Clone, Debug, Default)]
pub(crate) struct XmlDoc {
    nodes: Vec<XmlNode>,
}

impl XmlDoc {
    pub(crate) fn parse(xml: &str) -> Result<Self, String> {
        let mut reader = Reader::from_str(xml);
        let mut nodes = Vec::new();
        let mut depth = 0_usize;

        loop {
            match reader.read_event().map_err(|err| err.to_string())? {
                Event::Start(start) => {
                    nodes.push(node_from(&start, depth)?);
                    depth += 1;
                }
                Event::Empty(start) => nodes.push(node_from(&start, depth)?),
                Event::End(_) => depth = depth.saturating_sub(1),
                Event::Eof => break,
                _ => {}
            }
        }

        Ok(Self { nodes })
    }

    /// Root element, if the document had one.
    pub(crate) fn root(&self) -> Option<&XmlNode> {
        self.nodes.first()
    }

    /// All elements with the given local name, at any depth.
    pub(crate) fn elements<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a XmlNode> {
        self.nodes.iter().filter(move |node| node.is(name))
    }

    /// First element with the given local name whose `attr` equals `value`.
    pub(crate) fn find_by_attr(&self, name: &str, attr: &str, value: &str) -> Option<&XmlNode> {
        self.elements(name).find(|node| node.attr(attr) == Some(value))
    }

    /// `<Link>` elements describing resources of the given media type.
    pub(crate) fn links_of_type<'a>(
        &'a self,
        media_type: &str,
    ) -> impl Iterator<Item = &'a XmlNode> {
        self.elements("Link")
            .filter(move |node| node.attr("type") == Some(media_type))
    }

    /// Descendants of `parent`, which must be a node of this document.
    pub(crate) fn children_of<'a>(&'a self, parent: &XmlNode) -> impl Iterator<Item = &'a XmlNode> {
        self.nodes
            .iter()
            .skip_while(move |node| !std::ptr::eq(*node, parent))
            .skip(1)
            .take_while(move |node| node.depth > parent.depth)
    }

    /// Message carried by a vCloud `<Error>` document.
    pub(crate) fn error_message(&self) -> Option<&str> {
        self.elements("Error").find_map(|node| node.attr("message"))
    }
}

fn node_from(start: &BytesStart<'_>, depth: usize) -> Result<XmlNode, String> {
    let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
    let mut attrs = BTreeMap::new();
    for attribute in start.attributes() {
        let attr = attribute.map_err(|err| err.to_string())?;
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
        let value = attr.unescape_value().map_err(|err| err.to_string())?;
        attrs.insert(key, value.into_owned());
    }
    Ok(XmlNode { name, depth, attrs })
}

/// Streaming writer for request bodies.
pub(crate) struct XmlBody {
    writer: Writer<Vec<u8>>,
}

impl XmlBody {
    pub(crate) fn new() -> Self {
        Self {
            writer: Writer::new(Vec::new()),
        }
    }

    /// Opens `name`; every [`open`](Self::open) needs a matching
    /// [`close`](Self::close).
    pub(crate) fn open(&mut self, name: &str, attrs: &[(&str, &str)]) -> io::Result<()> {
        let start = BytesStart::new(name).with_attributes(attrs.iter().copied());
        self.writer.write_event(Event::Start(start))
    }

    pub(crate) fn close(&mut self, name: &str) -> io::Result<()> {
        self.writer.write_event(Event::End(BytesEnd::new(name)))
    }

    /// Writes a self-closing element.
    pub(crate) fn empty(&mut self, name: &str, attrs: &[(&str, &str)]) -> io::Result<()> {
        let start = BytesStart::new(name).with_attributes(attrs.iter().copied());
        self.writer.write_event(Event::Empty(start))
    }

    /// Writes `<name>text</name>`.
    pub(crate) fn text(&mut self, name: &str, text: &str) -> io::Result<()> {
        self.open(name, &[])?;
        self.writer.write_event(Event::Text(BytesText::new(text)))?;
        self.close(name)
    }

    pub(crate) fn finish(self) -> io::Result<String> {
        String::from_utf8(self.writer.into_inner()).map_err(io::Error::other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEMPLATE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<VAppTemplate xmlns="http://www.vmware.com/vcloud/v1.5" name="ops" status="0"
    ovfDescriptorUploaded="true" href="https://vcd/api/vAppTemplate/vappTemplate-1">
  <Files>
    <File name="descriptor.ovf" size="100" bytesTransferred="100">
      <Link rel="upload:default" href="https://vcd/transfer/1/descriptor.ovf"/>
    </File>
    <File name="disk-0.vmdk" size="200" bytesTransferred="0">
      <Link rel="upload:default" href="https://vcd/transfer/1/disk-0.vmdk"/>
    </File>
  </Files>
</VAppTemplate>"#;

    #[test]
    fn root_attributes_are_available() {
        let doc = XmlDoc::parse(TEMPLATE).unwrap_or_else(|err| panic!("parse failed: {err}"));
        let root = doc.root().unwrap_or_else(|| panic!("missing root"));
        assert_eq!(root.name, "VAppTemplate");
        assert_eq!(root.attr("ovfDescriptorUploaded"), Some("true"));
        assert_eq!(root.depth, 0);
    }

    #[test]
    fn children_stay_within_parent() {
        let doc = XmlDoc::parse(TEMPLATE).unwrap_or_else(|err| panic!("parse failed: {err}"));
        let disk = doc
            .find_by_attr("File", "name", "disk-0.vmdk")
            .unwrap_or_else(|| panic!("missing disk file"));
        let links: Vec<_> = doc
            .children_of(disk)
            .filter_map(|node| node.attr("href"))
            .collect();
        assert_eq!(links, ["https://vcd/transfer/1/disk-0.vmdk"]);
    }

    #[test]
    fn error_documents_expose_message() {
        let doc = XmlDoc::parse(
            r#"<Error xmlns="http://www.vmware.com/vcloud/v1.5" majorErrorCode="403" message="Access is forbidden"/>"#,
        )
        .unwrap_or_else(|err| panic!("parse failed: {err}"));
        assert_eq!(doc.error_message(), Some("Access is forbidden"));
    }

    #[test]
    fn body_escapes_attributes_and_text() {
        let mut body = XmlBody::new();
        body.open("Catalog", &[("name", "a<b & \"c\"")])
            .and_then(|()| body.text("Description", "x < y & z"))
            .and_then(|()| body.empty("Entity", &[("href", "https://vcd/a?b=1&c=2")]))
            .and_then(|()| body.close("Catalog"))
            .unwrap_or_else(|err| panic!("write failed: {err}"));
        let xml = body.finish().unwrap_or_else(|err| panic!("finish failed: {err}"));

        assert_eq!(
            xml,
            "<Catalog name=\"a&lt;b &amp; &quot;c&quot;\"><Description>x &lt; y &amp; z</Description>\
             <Entity href=\"https://vcd/a?b=1&amp;c=2\"/></Catalog>"
        );
        let doc = XmlDoc::parse(&xml).unwrap_or_else(|err| panic!("parse failed: {err}"));
        let root = doc.root().unwrap_or_else(|| panic!("missing root"));
        assert_eq!(root.attr("name"), Some("a<b & \"c\""));
        assert_eq!(
            doc.elements("Entity").next().and_then(|node| node.attr("href")),
            Some("https://vcd/a?b=1&c=2")
        );
    }

    #[test]
    fn rejects_malformed_documents() {
        assert!(XmlDoc::parse("<Task><Owner></Task>").is_err());
    }
}
