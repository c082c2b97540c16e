//! # DocView Documents
//!
//! A DocView document is one XML element per node. The element name is the
//! ISO 9075 encoded node name (with an optional `[n]` sibling index), and
//! every attribute is a property in the grammar of
//! [`crate::formats::property`]. The reserved root element `jcr:root`
//! stands for the node the document is imported into.
//!
//! - [`parser`]: streaming push parser emitting [`DocViewHandler`] events
//! - [`writer`]: serialises a store subtree back into a document

pub mod parser;
pub mod writer;

pub use parser::DocViewParser;
pub use writer::DocViewWriter;

use std::collections::BTreeMap;

use crate::formats::name::sns_label;
use crate::formats::property::DocProperty;
use crate::primitives::{JCR_IS_CHECKED_OUT, JCR_MIXIN_TYPES, JCR_PRIMARY_TYPE, JCR_UUID};
use crate::types::Result;

// =============================================================================
// NODE
// =============================================================================

/// One parsed element. Immutable once handed to a handler.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DocNode {
    /// Decoded qualified name. Empty for the store root.
    pub name: String,
    /// Same-name-sibling index, 0 when the document does not give one.
    pub index: u32,
    pub properties: BTreeMap<String, DocProperty>,
}

impl DocNode {
    #[must_use]
    pub fn new(name: impl Into<String>, index: u32) -> Self {
        Self {
            name: name.into(),
            index,
            properties: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_property(mut self, property: DocProperty) -> Self {
        self.properties.insert(property.name.clone(), property);
        self
    }

    #[must_use]
    pub fn property(&self, name: &str) -> Option<&DocProperty> {
        self.properties.get(name)
    }

    /// Declared stable identifier.
    #[must_use]
    pub fn identifier(&self) -> Option<&str> {
        self.property(JCR_UUID)
            .map(DocProperty::value)
            .filter(|v| !v.is_empty())
    }

    #[must_use]
    pub fn primary_type(&self) -> Option<&str> {
        self.property(JCR_PRIMARY_TYPE)
            .map(DocProperty::value)
            .filter(|v| !v.is_empty())
    }

    #[must_use]
    pub fn mixins(&self) -> Vec<String> {
        self.property(JCR_MIXIN_TYPES)
            .map(|p| p.values.iter().filter(|v| !v.is_empty()).cloned().collect())
            .unwrap_or_default()
    }

    /// Whether the document declares the node as checked in.
    #[must_use]
    pub fn is_checked_in(&self) -> bool {
        self.property(JCR_IS_CHECKED_OUT)
            .is_some_and(|p| p.value().eq_ignore_ascii_case("false"))
    }

    /// Label as used in paths: `name` or `name[n]`.
    #[must_use]
    pub fn label(&self) -> String {
        sns_label(&self.name, self.index)
    }

    /// A `jcr:root` element imported at the store root updates the root
    /// in place.
    #[must_use]
    pub fn is_root_marker(&self) -> bool {
        self.name.is_empty()
    }
}

// =============================================================================
// EVENTS
// =============================================================================

/// Receiver of parser events, in document order.
pub trait DocViewHandler {
    fn start_document(&mut self) -> Result<()> {
        Ok(())
    }

    fn start_prefix_mapping(&mut self, _prefix: &str, _uri: &str) -> Result<()> {
        Ok(())
    }

    fn end_prefix_mapping(&mut self, _prefix: &str) -> Result<()> {
        Ok(())
    }

    fn start_node(
        &mut self,
        path: &str,
        node: &DocNode,
        parent: Option<&DocNode>,
        line: u64,
    ) -> Result<()>;

    fn end_node(&mut self, path: &str, node: &DocNode) -> Result<()>;

    fn end_document(&mut self) -> Result<()> {
        Ok(())
    }
}

// =============================================================================
// NAMESPACES
// =============================================================================

/// Prefix mappings in scope, one frame per open element.
#[derive(Debug, Clone)]
pub struct NamespaceContext {
    scopes: Vec<Vec<(String, String)>>,
}

impl Default for NamespaceContext {
    fn default() -> Self {
        Self::new()
    }
}

impl NamespaceContext {
    /// Context with only the implicit `xml` prefix.
    #[must_use]
    pub fn new() -> Self {
        Self {
            scopes: vec![vec![(
                "xml".to_string(),
                "http://www.w3.org/XML/1998/namespace".to_string(),
            )]],
        }
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(Vec::new());
    }

    /// Close the innermost scope and return what it declared.
    pub fn pop_scope(&mut self) -> Vec<(String, String)> {
        if self.scopes.len() > 1 {
            self.scopes.pop().unwrap_or_default()
        } else {
            Vec::new()
        }
    }

    pub fn declare(&mut self, prefix: &str, uri: &str) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.push((prefix.to_string(), uri.to_string()));
        }
    }

    /// Innermost URI bound to `prefix`.
    #[must_use]
    pub fn uri(&self, prefix: &str) -> Option<&str> {
        self.scopes
            .iter()
            .rev()
            .flat_map(|scope| scope.iter().rev())
            .find(|(p, _)| p == prefix)
            .map(|(_, u)| u.as_str())
    }

    /// Whether the prefix of a qualified name is bound. Unprefixed names
    /// always are.
    #[must_use]
    pub fn resolves(&self, qualified: &str) -> bool {
        match qualified.split_once(':') {
            Some((prefix, _)) => self.uri(prefix).is_some(),
            None => true,
        }
    }
}
