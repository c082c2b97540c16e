//! # Streaming DocView Parser
//!
//! Pull events from `quick-xml`, push [`DocViewHandler`] events. Only the
//! chain of open elements is kept in memory. Any well-formedness problem is
//! a [`VaultError::Parse`] carrying the line it was detected on, and aborts
//! the import.

use std::io::{self, BufRead, Read};

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use tracing::trace;

use super::{DocNode, DocViewHandler, NamespaceContext};
use crate::formats::name::{decode_name, parse_sns_name};
use crate::formats::property::DocProperty;
use crate::primitives::{JCR_ROOT, MAX_DOCUMENT_DEPTH, MAX_DOCUMENT_SIZE};
use crate::store::{join_path, last_label, parent_path};
use crate::types::{Result, VaultError};

/// Wraps the input to track the current line and the bytes consumed.
struct CountingReader<R> {
    inner: R,
    newlines: u64,
    bytes: u64,
}

impl<R> CountingReader<R> {
    const fn new(inner: R) -> Self {
        Self {
            inner,
            newlines: 0,
            bytes: 0,
        }
    }

    const fn line(&self) -> u64 {
        self.newlines + 1
    }

    fn count(&mut self, consumed: &[u8]) {
        self.newlines += consumed.iter().filter(|b| **b == b'\n').count() as u64;
        self.bytes += consumed.len() as u64;
    }
}

impl<R: BufRead> Read for CountingReader<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(out)?;
        self.count(&out[..n]);
        Ok(n)
    }
}

impl<R: BufRead> BufRead for CountingReader<R> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.inner.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        let (newlines, len) = match self.inner.fill_buf() {
            Ok(buf) => {
                let seen = &buf[..amt.min(buf.len())];
                (
                    seen.iter().filter(|b| **b == b'\n').count() as u64,
                    seen.len() as u64,
                )
            }
            Err(_) => (0, amt as u64),
        };
        self.newlines += newlines;
        self.bytes += len;
        self.inner.consume(amt);
    }
}

/// Parser for one document imported at a target path.
#[derive(Debug, Clone)]
pub struct DocViewParser {
    target: String,
}

impl DocViewParser {
    /// `target` is the path the `jcr:root` element stands for.
    #[must_use]
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
        }
    }

    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Parse a whole document, driving `handler`.
    pub fn parse<R: BufRead, H: DocViewHandler>(&self, input: R, handler: &mut H) -> Result<()> {
        let mut reader = Reader::from_reader(CountingReader::new(input));
        {
            let config = reader.config_mut();
            config.trim_text(true);
            config.expand_empty_elements = true;
        }

        let mut buf = Vec::new();
        let mut namespaces = NamespaceContext::new();
        let mut open: Vec<(String, DocNode)> = Vec::new();
        let mut root_seen = false;

        handler.start_document()?;
        loop {
            let event = match reader.read_event_into(&mut buf) {
                Ok(event) => event,
                Err(e) => return Err(VaultError::parse(reader.get_ref().line(), e.to_string())),
            };
            // line on which the event ends
            let line = reader.get_ref().line();
            if reader.get_ref().bytes > MAX_DOCUMENT_SIZE {
                return Err(VaultError::parse(line, "document exceeds the size limit"));
            }

            match event {
                Event::Start(element) => {
                    if open.is_empty() && root_seen {
                        return Err(VaultError::parse(line, "more than one root element"));
                    }
                    if open.len() >= MAX_DOCUMENT_DEPTH {
                        return Err(VaultError::parse(line, "document nesting too deep"));
                    }
                    namespaces.push_scope();
                    let attributes = read_attributes(&element, line)?;
                    for (prefix, uri) in declared_prefixes(&attributes) {
                        namespaces.declare(prefix, uri);
                        handler.start_prefix_mapping(prefix, uri)?;
                    }

                    let qname = std::str::from_utf8(element.name().as_ref())
                        .map_err(|e| VaultError::parse(line, e.to_string()))?
                        .to_string();
                    if !namespaces.resolves(&qname) {
                        return Err(VaultError::parse(
                            line,
                            format!("element '{qname}' uses an undeclared prefix"),
                        ));
                    }

                    let (path, mut node) = match open.last() {
                        None => self.root_node(&qname, line)?,
                        Some((parent_path, _)) => {
                            let node = named_node(&qname, line)?;
                            (join_path(parent_path, &node.label()), node)
                        }
                    };
                    for (key, value) in &attributes {
                        if is_namespace_declaration(key) {
                            continue;
                        }
                        if !namespaces.resolves(key) {
                            return Err(VaultError::parse(
                                line,
                                format!("attribute '{key}' uses an undeclared prefix"),
                            ));
                        }
                        let name = decode_name(key);
                        let property = DocProperty::parse(&name, value)
                            .map_err(|e| VaultError::parse(line, e.to_string()))?;
                        node.properties.insert(name, property);
                    }

                    trace!(path = %path, line, "start node");
                    handler.start_node(&path, &node, open.last().map(|(_, n)| n), line)?;
                    open.push((path, node));
                    root_seen = true;
                }
                Event::End(_) => {
                    let Some((path, node)) = open.pop() else {
                        return Err(VaultError::parse(line, "unexpected closing tag"));
                    };
                    handler.end_node(&path, &node)?;
                    for (prefix, _) in namespaces.pop_scope() {
                        handler.end_prefix_mapping(&prefix)?;
                    }
                }
                Event::Eof => {
                    if !open.is_empty() {
                        return Err(VaultError::parse(
                            line,
                            format!("{} unclosed element(s) at end of document", open.len()),
                        ));
                    }
                    if !root_seen {
                        return Err(VaultError::parse(line, "document has no root element"));
                    }
                    break;
                }
                Event::Text(text) => {
                    if !text.iter().all(u8::is_ascii_whitespace) {
                        trace!(line, "ignoring character data");
                    }
                }
                _ => {}
            }
            buf.clear();
        }
        handler.end_document()
    }

    /// Path and node of the document element.
    fn root_node(&self, qname: &str, line: u64) -> Result<(String, DocNode)> {
        if qname != JCR_ROOT {
            let node = named_node(qname, line)?;
            let base = parent_path(&self.target).unwrap_or("/");
            return Ok((join_path(base, &node.label()), node));
        }
        if parent_path(&self.target).is_none() {
            return Ok(("/".to_string(), DocNode::default()));
        }
        let (name, index) = parse_sns_name(last_label(&self.target))
            .map_err(|e| VaultError::parse(line, e.to_string()))?;
        Ok((self.target.clone(), DocNode::new(name, index)))
    }
}

fn named_node(qname: &str, line: u64) -> Result<DocNode> {
    let (name, index) =
        parse_sns_name(&decode_name(qname)).map_err(|e| VaultError::parse(line, e.to_string()))?;
    Ok(DocNode::new(name, index))
}

fn read_attributes(element: &BytesStart<'_>, line: u64) -> Result<Vec<(String, String)>> {
    let mut out = Vec::new();
    for attribute in element.attributes() {
        let attribute = attribute.map_err(|e| VaultError::parse(line, e.to_string()))?;
        let key = std::str::from_utf8(attribute.key.as_ref())
            .map_err(|e| VaultError::parse(line, e.to_string()))?
            .to_string();
        let value = attribute
            .unescape_value()
            .map_err(|e| VaultError::parse(line, e.to_string()))?
            .into_owned();
        out.push((key, value));
    }
    Ok(out)
}

fn is_namespace_declaration(key: &str) -> bool {
    key == "xmlns" || key.starts_with("xmlns:")
}

fn declared_prefixes(attributes: &[(String, String)]) -> impl Iterator<Item = (&str, &str)> {
    attributes.iter().filter_map(|(key, value)| {
        key.strip_prefix("xmlns:")
            .map(|prefix| (prefix, value.as_str()))
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::types::PropertyType;

    #[derive(Default)]
    struct Recorder {
        events: Vec<String>,
        prefixes: Vec<String>,
        nodes: Vec<DocNode>,
        parents: Vec<Option<String>>,
    }

    impl DocViewHandler for Recorder {
        fn start_prefix_mapping(&mut self, prefix: &str, _uri: &str) -> Result<()> {
            self.prefixes.push(prefix.to_string());
            Ok(())
        }

        fn start_node(
            &mut self,
            path: &str,
            node: &DocNode,
            parent: Option<&DocNode>,
            _line: u64,
        ) -> Result<()> {
            self.events.push(format!("+{path}"));
            self.nodes.push(node.clone());
            self.parents.push(parent.map(|p| p.name.clone()));
            Ok(())
        }

        fn end_node(&mut self, path: &str, _node: &DocNode) -> Result<()> {
            self.events.push(format!("-{path}"));
            Ok(())
        }
    }

    const NS: &str = r#"xmlns:jcr="http://www.jcp.org/jcr/1.0" xmlns:nt="http://www.jcp.org/jcr/nt/1.0""#;

    fn parse(target: &str, doc: &str) -> Result<Recorder> {
        let mut recorder = Recorder::default();
        DocViewParser::new(target).parse(doc.as_bytes(), &mut recorder)?;
        Ok(recorder)
    }

    #[test]
    fn events_in_document_order() {
        let doc = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<jcr:root {NS} jcr:primaryType="nt:unstructured" title="Home">
    <a jcr:primaryType="nt:unstructured">
        <b/>
    </a>
    <item_x005b_2_x005d_/>
    <my_x0020_node count="{{Long}}3" tags="[x,y]"/>
</jcr:root>"#
        );
        let r = parse("/content/site", &doc).unwrap();
        assert_eq!(
            r.events,
            vec![
                "+/content/site",
                "+/content/site/a",
                "+/content/site/a/b",
                "-/content/site/a/b",
                "-/content/site/a",
                "+/content/site/item[2]",
                "-/content/site/item[2]",
                "+/content/site/my node",
                "-/content/site/my node",
                "-/content/site",
            ]
        );
        assert_eq!(r.prefixes, vec!["jcr", "nt"]);
        assert_eq!(r.nodes[0].name, "site");
        assert_eq!(r.nodes[3].name, "item");
        assert_eq!(r.nodes[3].index, 2);
        let count = r.nodes[4].property("count").unwrap();
        assert_eq!(count.kind, PropertyType::Long);
        assert!(r.nodes[4].property("tags").unwrap().multiple);
        assert_eq!(r.parents[2].as_deref(), Some("a"));
        assert_eq!(r.parents[0], None);
    }

    #[test]
    fn root_marker_at_store_root() {
        let r = parse("/", &format!("<jcr:root {NS}><x/></jcr:root>")).unwrap();
        assert!(r.nodes[0].is_root_marker());
        assert_eq!(r.events[1], "+/x");
    }

    #[test]
    fn other_root_element_is_sibling_of_target() {
        let r = parse("/content/site", &format!("<page {NS}/>")).unwrap();
        assert_eq!(r.events[0], "+/content/page");
        let r = parse("/", &format!("<page {NS}/>")).unwrap();
        assert_eq!(r.events[0], "+/page");
    }

    #[test]
    fn explicit_zero_index() {
        let r = parse("/", &format!("<jcr:root {NS}><node_x005b_0_x005d_/></jcr:root>")).unwrap();
        assert_eq!(r.nodes[1].name, "node");
        assert_eq!(r.nodes[1].index, 0);
        assert_eq!(r.events[1], "+/node");
    }

    #[test]
    fn malformed_documents_are_parse_errors() {
        let cases = [
            String::new(),
            format!("<jcr:root {NS}><a></jcr:root>"),
            format!("<jcr:root {NS}><a>"),
            format!("<jcr:root {NS}/><jcr:root {NS}/>"),
            "<jcr:root/>".to_string(),
            format!(r#"<jcr:root {NS} bad="{{Nope}}x"/>"#),
            format!(r#"<jcr:root {NS} undeclared:p="x"/>"#),
        ];
        for doc in cases {
            match parse("/a", &doc) {
                Err(e @ VaultError::Parse { .. }) => assert!(e.is_fatal()),
                other => panic!("expected parse error for {doc:?}, got {:?}", other.map(|r| r.events)),
            }
        }
    }

    #[test]
    fn parse_errors_carry_line() {
        let doc = format!("<jcr:root {NS}>\n<a>\n<b bad=\"{{Nope}}x\"/>\n</a>\n</jcr:root>");
        match parse("/a", &doc) {
            Err(VaultError::Parse { line, .. }) => assert_eq!(line, 3),
            other => panic!("unexpected {:?}", other.map(|r| r.events)),
        }
    }
}
