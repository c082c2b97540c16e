//! # DocView Writer
//!
//! Serialises a store subtree into a DocView document that the parser reads
//! back to the same content. The exported node becomes `jcr:root`. Identity
//! properties come first, the rest are sorted by name. Binary content is
//! written as empty `{Binary}` placeholders. Access policies, which the
//! store keeps outside the node tree, are rendered as their conventional
//! child nodes.

use std::collections::BTreeSet;
use std::io::Write;

use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};

use crate::formats::name::{encode_name, sns_label};
use crate::formats::property::DocProperty;
use crate::primitives::{
    JCR_MIXIN_TYPES, JCR_PRIMARY_TYPE, JCR_ROOT, JCR_UUID, REP_ACL, REP_CUG_POLICY,
    REP_CUG_POLICY_NODE, REP_DENY_ACE, REP_EFFECTIVE_PATH, REP_GRANT_ACE, REP_POLICY,
    REP_PRINCIPAL_ENTRY, REP_PRINCIPAL_NAME, REP_PRINCIPAL_NAMES, REP_PRINCIPAL_POLICY,
    REP_PRINCIPAL_POLICY_NODE, REP_PRIVILEGES, REP_RESTRICTIONS, REP_RESTRICTIONS_NODE,
};
use crate::store::{AccessPolicy, ContentStore, PolicyKind};
use crate::types::{NodeId, Property, PropertyType, Result, Value, VaultError};

const POLICY_KINDS: [PolicyKind; 3] = [PolicyKind::Acl, PolicyKind::Cug, PolicyKind::Principal];

fn io_err(e: impl std::fmt::Display) -> VaultError {
    VaultError::IoError(e.to_string())
}

/// One element about to be written: name and attributes in output order.
struct Element {
    name: String,
    attributes: Vec<(String, String)>,
}

impl Element {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
        }
    }

    fn property(mut self, property: &DocProperty) -> Self {
        self.attributes
            .push((encode_name(&property.name), property.format()));
        self
    }

    fn start(&self) -> BytesStart<'_> {
        let mut start = BytesStart::new(self.name.as_str());
        for (key, value) in &self.attributes {
            start.push_attribute((key.as_str(), value.as_str()));
        }
        start
    }
}

enum Step {
    Node(NodeId),
    Policies(String),
    Close(String),
}

/// Writes DocView documents from a store.
pub struct DocViewWriter<'a, S: ContentStore> {
    store: &'a S,
}

impl<'a, S: ContentStore> DocViewWriter<'a, S> {
    #[must_use]
    pub const fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Write the subtree rooted at `node`.
    pub fn write<W: Write>(&self, node: NodeId, out: W) -> Result<()> {
        let mut writer = Writer::new_with_indent(out, b' ', 4);
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .map_err(io_err)?;

        let root_path = self.store.path_of(node)?;
        let mut pending = vec![Step::Node(node)];
        while let Some(step) = pending.pop() {
            match step {
                Step::Node(id) => {
                    let is_root = id == node;
                    let mut element = Element::new(if is_root {
                        JCR_ROOT.to_string()
                    } else {
                        let label = sns_label(&self.store.name_of(id)?, self.store.index_of(id)?);
                        encode_name(&label)
                    });
                    if is_root {
                        for (prefix, uri) in self.namespaces(node)? {
                            element
                                .attributes
                                .push((format!("xmlns:{prefix}"), uri));
                        }
                    }
                    for property in self.ordered_properties(id)? {
                        element = element.property(&doc_property(&property));
                    }

                    let path = self.store.path_of(id)?;
                    let children = self.store.children(id)?;
                    let has_policies = self.has_policies(&path)?;
                    if children.is_empty() && !has_policies {
                        writer
                            .write_event(Event::Empty(element.start()))
                            .map_err(io_err)?;
                        continue;
                    }
                    writer
                        .write_event(Event::Start(element.start()))
                        .map_err(io_err)?;
                    pending.push(Step::Close(element.name));
                    if has_policies {
                        pending.push(Step::Policies(path));
                    }
                    pending.extend(children.into_iter().rev().map(Step::Node));
                }
                Step::Policies(path) => {
                    for kind in POLICY_KINDS {
                        if let Some(policy) = self.store.access_policy(&path, kind)? {
                            write_policy(&mut writer, &policy)?;
                        }
                    }
                }
                Step::Close(name) => {
                    writer
                        .write_event(Event::End(BytesEnd::new(name)))
                        .map_err(io_err)?;
                }
            }
        }
        tracing::debug!(path = %root_path, "docview written");
        Ok(())
    }

    /// Convenience: the document as a string.
    pub fn to_string(&self, node: NodeId) -> Result<String> {
        let mut out = Vec::new();
        self.write(node, &mut out)?;
        String::from_utf8(out).map_err(|e| VaultError::SerializationError(e.to_string()))
    }

    fn has_policies(&self, path: &str) -> Result<bool> {
        for kind in POLICY_KINDS {
            if self.store.access_policy(path, kind)?.is_some() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Identity properties first, then by name.
    fn ordered_properties(&self, node: NodeId) -> Result<Vec<Property>> {
        let mut properties = self.store.properties(node)?;
        let rank = |name: &str| match name {
            JCR_PRIMARY_TYPE => 0,
            JCR_MIXIN_TYPES => 1,
            JCR_UUID => 2,
            _ => 3,
        };
        properties.sort_by(|a, b| {
            (rank(&a.name), a.name.as_str()).cmp(&(rank(&b.name), b.name.as_str()))
        });
        Ok(properties)
    }

    /// Every prefix used by names in the subtree, with its URI.
    fn namespaces(&self, node: NodeId) -> Result<Vec<(String, String)>> {
        let mut prefixes = BTreeSet::from(["jcr".to_string()]);
        let mut note = |qualified: &str| {
            if let Some((prefix, _)) = qualified.split_once(':') {
                prefixes.insert(prefix.to_string());
            }
        };
        let mut pending = vec![node];
        while let Some(id) = pending.pop() {
            note(&self.store.name_of(id)?);
            for property in self.store.properties(id)? {
                note(&property.name);
                if property.kind == PropertyType::Name {
                    property.texts().for_each(&mut note);
                }
            }
            let path = self.store.path_of(id)?;
            if self.has_policies(&path)? {
                note(REP_POLICY);
            }
            pending.extend(self.store.children(id)?);
        }
        Ok(prefixes
            .into_iter()
            .filter_map(|p| self.store.namespace_uri(&p).map(|uri| (p, uri)))
            .collect())
    }
}

/// Document form of a stored property.
#[must_use]
pub fn doc_property(property: &Property) -> DocProperty {
    let binary_ref = property
        .values
        .iter()
        .any(|v| matches!(v, Value::BinaryRef(_)));
    DocProperty {
        name: property.name.clone(),
        values: property
            .values
            .iter()
            .map(|v| v.as_text().unwrap_or_default().to_string())
            .collect(),
        kind: property.kind,
        multiple: property.multiple,
        binary_ref,
    }
}

// =============================================================================
// POLICIES
// =============================================================================

fn names(name: &str, values: &[String]) -> DocProperty {
    DocProperty::multi(name, PropertyType::Name, values.iter().cloned())
}

fn restriction_element<W: Write>(
    writer: &mut Writer<W>,
    restrictions: &std::collections::BTreeMap<String, Vec<String>>,
) -> Result<()> {
    if restrictions.is_empty() {
        return Ok(());
    }
    let mut element = Element::new(REP_RESTRICTIONS_NODE).property(&DocProperty::single(
        JCR_PRIMARY_TYPE,
        PropertyType::Name,
        REP_RESTRICTIONS,
    ));
    for (name, values) in restrictions {
        let property = match values.as_slice() {
            [single] => DocProperty::single(name, PropertyType::String, single.clone()),
            many => DocProperty::multi(name, PropertyType::String, many.iter().cloned()),
        };
        element = element.property(&property);
    }
    writer
        .write_event(Event::Empty(element.start()))
        .map_err(io_err)?;
    Ok(())
}

fn write_policy<W: Write>(writer: &mut Writer<W>, policy: &AccessPolicy) -> Result<()> {
    let primary = |t: &str| DocProperty::single(JCR_PRIMARY_TYPE, PropertyType::Name, t);
    match policy {
        AccessPolicy::Acl(entries) => {
            let element = Element::new(REP_POLICY).property(&primary(REP_ACL));
            if entries.is_empty() {
                writer
                    .write_event(Event::Empty(element.start()))
                    .map_err(io_err)?;
                return Ok(());
            }
            writer
                .write_event(Event::Start(element.start()))
                .map_err(io_err)?;
            for (i, entry) in entries.iter().enumerate() {
                let (prefix, ace_type) = if entry.allow {
                    ("allow", REP_GRANT_ACE)
                } else {
                    ("deny", REP_DENY_ACE)
                };
                let name = if i == 0 {
                    prefix.to_string()
                } else {
                    format!("{prefix}{i}")
                };
                let ace = Element::new(name)
                    .property(&primary(ace_type))
                    .property(&DocProperty::single(
                        REP_PRINCIPAL_NAME,
                        PropertyType::String,
                        entry.principal.clone(),
                    ))
                    .property(&names(REP_PRIVILEGES, &entry.privileges));
                write_with_restrictions(writer, &ace, &entry.restrictions)?;
            }
            writer
                .write_event(Event::End(BytesEnd::new(REP_POLICY)))
                .map_err(io_err)?;
        }
        AccessPolicy::Cug(principals) => {
            let element = Element::new(REP_CUG_POLICY_NODE)
                .property(&primary(REP_CUG_POLICY))
                .property(&DocProperty::multi(
                    REP_PRINCIPAL_NAMES,
                    PropertyType::String,
                    principals.iter().cloned(),
                ));
            writer
                .write_event(Event::Empty(element.start()))
                .map_err(io_err)?;
        }
        AccessPolicy::Principal { principal, entries } => {
            let element = Element::new(REP_PRINCIPAL_POLICY_NODE)
                .property(&primary(REP_PRINCIPAL_POLICY))
                .property(&DocProperty::single(
                    REP_PRINCIPAL_NAME,
                    PropertyType::String,
                    principal.clone(),
                ));
            writer
                .write_event(Event::Start(element.start()))
                .map_err(io_err)?;
            for (i, entry) in entries.iter().enumerate() {
                let mut element = Element::new(format!("entry{i}"))
                    .property(&primary(REP_PRINCIPAL_ENTRY))
                    .property(&names(REP_PRIVILEGES, &entry.privileges));
                if let Some(path) = &entry.effective_path {
                    element = element.property(&DocProperty::single(
                        REP_EFFECTIVE_PATH,
                        PropertyType::Path,
                        path.clone(),
                    ));
                }
                write_with_restrictions(writer, &element, &entry.restrictions)?;
            }
            writer
                .write_event(Event::End(BytesEnd::new(REP_PRINCIPAL_POLICY_NODE)))
                .map_err(io_err)?;
        }
    }
    Ok(())
}

fn write_with_restrictions<W: Write>(
    writer: &mut Writer<W>,
    element: &Element,
    restrictions: &std::collections::BTreeMap<String, Vec<String>>,
) -> Result<()> {
    if restrictions.is_empty() {
        writer
            .write_event(Event::Empty(element.start()))
            .map_err(io_err)?;
        return Ok(());
    }
    writer
        .write_event(Event::Start(element.start()))
        .map_err(io_err)?;
    restriction_element(writer, restrictions)?;
    writer
        .write_event(Event::End(BytesEnd::new(element.name.as_str())))
        .map_err(io_err)?;
    Ok(())
}
