//! # In-Memory Store
//!
//! `MemoryStore` is an arena of node records addressed by [`NodeId`], with an
//! identifier index and SNS-aware ordered child lists.
//!
//! All collections are `BTreeMap`/`BTreeSet` so that iteration, exports and
//! generated identifiers are deterministic.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use super::{
    AccessPolicy, ContentStore, IdentifierBehavior, NodeSpec, PolicyKind, is_descendant_or_self,
    join_path, path_segments,
};
use crate::formats::name::sns_label;
use crate::nodetype::NodeTypeRegistry;
use crate::primitives::{
    BUILTIN_NAMESPACES, JCR_IS_CHECKED_OUT, JCR_MIXIN_TYPES, JCR_PRIMARY_TYPE, JCR_UUID,
    MIX_REFERENCEABLE, MIX_SIMPLE_VERSIONABLE, REP_ACCESS_CONTROLLABLE, REP_AUTHORIZABLE,
    REP_AUTHORIZABLE_ID, REP_CUG_MIXIN, REP_PRINCIPAL_BASED_MIXIN, REP_ROOT, is_protected_property,
};
use crate::types::{NodeId, Property, PropertyType, Result, Value, VaultError};

#[derive(Debug, Clone)]
struct NodeRecord {
    name: String,
    parent: Option<NodeId>,
    primary_type: String,
    mixins: Vec<String>,
    identifier: Option<String>,
    properties: BTreeMap<String, Property>,
    children: Vec<NodeId>,
    checked_out: bool,
}

/// The in-memory content store.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    nodes: BTreeMap<NodeId, NodeRecord>,
    identifiers: BTreeMap<String, NodeId>,
    policies: BTreeMap<(String, PolicyKind), AccessPolicy>,
    namespaces: BTreeMap<String, String>,
    read_only: BTreeSet<String>,
    types: NodeTypeRegistry,
    next_node_id: u64,
    next_identifier: u64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Empty store with the built-in node types.
    #[must_use]
    pub fn new() -> Self {
        Self::with_registry(NodeTypeRegistry::with_builtins())
    }

    /// Empty store using a caller-provided type registry.
    #[must_use]
    pub fn with_registry(types: NodeTypeRegistry) -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            NodeId(0),
            NodeRecord {
                name: String::new(),
                parent: None,
                primary_type: REP_ROOT.to_string(),
                mixins: Vec::new(),
                identifier: None,
                properties: BTreeMap::new(),
                children: Vec::new(),
                checked_out: true,
            },
        );
        Self {
            nodes,
            identifiers: BTreeMap::new(),
            policies: BTreeMap::new(),
            namespaces: BUILTIN_NAMESPACES
                .iter()
                .map(|(p, u)| ((*p).to_string(), (*u).to_string()))
                .collect(),
            read_only: BTreeSet::new(),
            types,
            next_node_id: 1,
            next_identifier: 1,
        }
    }

    pub fn registry_mut(&mut self) -> &mut NodeTypeRegistry {
        &mut self.types
    }

    /// Number of nodes, the root included.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn policy_count(&self) -> usize {
        self.policies.len()
    }

    /// All stored policies keyed by access-controlled path.
    pub fn policies(&self) -> impl Iterator<Item = (&str, &AccessPolicy)> {
        self.policies.iter().map(|((path, _), p)| (path.as_str(), p))
    }

    #[must_use]
    pub fn namespaces(&self) -> &BTreeMap<String, String> {
        &self.namespaces
    }

    /// Mark a subtree as read only for this store.
    pub fn set_read_only(&mut self, path: &str) {
        self.read_only.insert(path.to_string());
    }

    #[must_use]
    pub fn is_read_only(&self, path: &str) -> bool {
        self.read_only
            .iter()
            .any(|ro| is_descendant_or_self(path, ro))
    }

    /// Counter seed of generated identifiers.
    #[must_use]
    pub fn next_identifier_seed(&self) -> u64 {
        self.next_identifier
    }

    // -------------------------------------------------------------------------
    // Snapshot restore
    // -------------------------------------------------------------------------

    /// Append a node under `parent_path` without type or version checks.
    /// Used when rebuilding a store from a snapshot, in document order.
    pub fn restore_node(
        &mut self,
        parent_path: &str,
        spec: &NodeSpec,
    ) -> Result<NodeId> {
        let parent = self
            .node_at(parent_path)?
            .ok_or_else(|| VaultError::ItemNotFound(parent_path.to_string()))?;
        let id = self.insert_record(parent, spec, spec.identifier.clone());
        Ok(id)
    }

    /// Replace the root's mixins and properties from a snapshot.
    pub fn restore_root(&mut self, spec: &NodeSpec) -> Result<()> {
        let root = self.root();
        let record = self.record_mut(root)?;
        record.mixins.clone_from(&spec.mixins);
        record.properties = spec
            .properties
            .iter()
            .filter(|p| !is_synthesized(&p.name))
            .map(|p| (p.name.clone(), p.clone()))
            .collect();
        Ok(())
    }

    /// Store a policy without touching mixins or version state.
    pub fn restore_policy(&mut self, path: &str, policy: AccessPolicy) {
        self.policies
            .insert((path.to_string(), policy.kind()), policy);
    }

    pub fn restore_identifier_seed(&mut self, seed: u64) {
        self.next_identifier = self.next_identifier.max(seed);
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn record(&self, node: NodeId) -> Result<&NodeRecord> {
        self.nodes
            .get(&node)
            .ok_or_else(|| VaultError::ItemNotFound(format!("node {}", node.0)))
    }

    fn record_mut(&mut self, node: NodeId) -> Result<&mut NodeRecord> {
        self.nodes
            .get_mut(&node)
            .ok_or_else(|| VaultError::ItemNotFound(format!("node {}", node.0)))
    }

    fn fresh_identifier(&mut self) -> String {
        loop {
            let candidate = format!("00000000-0000-4000-8000-{:012x}", self.next_identifier);
            self.next_identifier = self.next_identifier.saturating_add(1);
            if !self.identifiers.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    fn is_type(&self, record: &NodeRecord, node_type: &str) -> bool {
        self.types
            .is_node_type(&record.primary_type, &record.mixins, node_type)
    }

    fn insert_record(&mut self, parent: NodeId, spec: &NodeSpec, identifier: Option<String>) -> NodeId {
        let id = NodeId(self.next_node_id);
        self.next_node_id = self.next_node_id.saturating_add(1);
        let properties = spec
            .properties
            .iter()
            .filter(|p| !is_synthesized(&p.name))
            .map(|p| (p.name.clone(), p.clone()))
            .collect();
        if let Some(identifier) = &identifier {
            self.identifiers.insert(identifier.clone(), id);
        }
        self.nodes.insert(
            id,
            NodeRecord {
                name: spec.name.clone(),
                parent: Some(parent),
                primary_type: spec.primary_type.clone(),
                mixins: spec.mixins.clone(),
                identifier,
                properties,
                children: Vec::new(),
                checked_out: spec.checked_out,
            },
        );
        if let Some(parent) = self.nodes.get_mut(&parent) {
            parent.children.push(id);
        }
        id
    }

    fn validate_name(&self, name: &str) -> Result<()> {
        if name.is_empty()
            || name == "."
            || name == ".."
            || name.contains(['/', '[', ']', '|', '*'])
        {
            return Err(VaultError::InvalidName(name.to_string()));
        }
        if let Some((prefix, local)) = name.split_once(':') {
            if local.is_empty() || !self.namespaces.contains_key(prefix) {
                return Err(VaultError::InvalidName(name.to_string()));
            }
        }
        Ok(())
    }

    /// Mutations need the node outside read-only areas and checked out.
    fn ensure_writable(&self, node: NodeId) -> Result<()> {
        let path = self.path_of(node)?;
        if self.is_read_only(&path) {
            return Err(VaultError::AccessDenied(path));
        }
        if !self.is_checked_out(node)? {
            return Err(VaultError::CheckedIn(path));
        }
        Ok(())
    }

    fn check_child_allowed(
        &self,
        parent: NodeId,
        name: &str,
        child_type: &str,
        privileged: bool,
    ) -> Result<()> {
        if !self.types.contains(child_type) || self.types.is_mixin(child_type) {
            return Err(VaultError::constraint(
                self.path_of(parent)?,
                format!("'{child_type}' is not a known primary type"),
            ));
        }
        let record = self.record(parent)?;
        let Some(def) =
            self.types
                .child_definition(&record.primary_type, &record.mixins, name, child_type)
        else {
            return Err(VaultError::constraint(
                self.path_of(parent)?,
                format!("no child definition allows '{name}' of type {child_type}"),
            ));
        };
        if def.protected && !privileged {
            return Err(VaultError::constraint(
                self.path_of(parent)?,
                format!("child '{name}' is protected"),
            ));
        }
        Ok(())
    }

    fn validate_mixins(&self, path: &str, mixins: &[String]) -> Result<()> {
        match mixins.iter().find(|m| !self.types.is_mixin(m)) {
            Some(bad) => Err(VaultError::constraint(
                path,
                format!("'{bad}' is not a known mixin"),
            )),
            None => Ok(()),
        }
    }

    /// Resolve the stored form of a property: definition lookup, protection,
    /// type conversion and value validation.
    fn checked_property(&self, node: NodeId, mut property: Property) -> Result<Property> {
        let record = self.record(node)?;
        let path = self.path_of(node)?;
        if is_protected_property(&property.name) {
            return Err(VaultError::constraint(
                &path,
                format!("property '{}' is protected", property.name),
            ));
        }
        let def = self
            .types
            .property_definition(&record.primary_type, &record.mixins, &property.name)
            .ok_or_else(|| {
                VaultError::constraint(
                    &path,
                    format!("no property definition for '{}'", property.name),
                )
            })?;
        if def.protected {
            return Err(VaultError::constraint(
                &path,
                format!("property '{}' is protected", property.name),
            ));
        }
        if !def.is_residual() && def.multiple != property.multiple {
            return Err(VaultError::constraint(
                &path,
                format!("property '{}' multiplicity mismatch", property.name),
            ));
        }
        if !property.multiple && property.values.len() != 1 {
            return Err(VaultError::InvalidValue {
                name: property.name,
                message: "single-valued property needs exactly one value".to_string(),
            });
        }
        if property.kind == PropertyType::Undefined {
            property.kind = PropertyType::String;
        }
        if def.kind != PropertyType::Undefined && def.kind != property.kind {
            if property.kind != PropertyType::String {
                return Err(VaultError::constraint(
                    &path,
                    format!(
                        "property '{}' must be {}, got {}",
                        property.name, def.kind, property.kind
                    ),
                ));
            }
            property.kind = def.kind;
        }
        for value in &property.values {
            validate_value(&property.name, property.kind, value)?;
        }
        Ok(property)
    }

    fn synthesized(&self, record: &NodeRecord) -> Vec<Property> {
        let mut out = vec![Property::single(
            JCR_PRIMARY_TYPE,
            PropertyType::Name,
            record.primary_type.clone(),
        )];
        if !record.mixins.is_empty() {
            out.push(Property::multi(
                JCR_MIXIN_TYPES,
                PropertyType::Name,
                record.mixins.iter().cloned(),
            ));
        }
        if let Some(identifier) = &record.identifier {
            out.push(Property::single(JCR_UUID, PropertyType::String, identifier.clone()));
        }
        if self.is_type(record, MIX_SIMPLE_VERSIONABLE) {
            out.push(Property::single(
                JCR_IS_CHECKED_OUT,
                PropertyType::Boolean,
                record.checked_out.to_string(),
            ));
        }
        out
    }

    fn subtree(&self, node: NodeId) -> Result<Vec<NodeId>> {
        let mut out = Vec::new();
        let mut pending = vec![node];
        while let Some(current) = pending.pop() {
            out.push(current);
            pending.extend(self.record(current)?.children.iter().copied());
        }
        Ok(out)
    }

    fn mixin_for(kind: PolicyKind) -> &'static str {
        match kind {
            PolicyKind::Acl => REP_ACCESS_CONTROLLABLE,
            PolicyKind::Cug => REP_CUG_MIXIN,
            PolicyKind::Principal => REP_PRINCIPAL_BASED_MIXIN,
        }
    }
}

fn is_synthesized(name: &str) -> bool {
    matches!(name, JCR_PRIMARY_TYPE | JCR_MIXIN_TYPES | JCR_UUID | JCR_IS_CHECKED_OUT)
}

/// Check that a value is a valid lexical form of `kind`.
fn validate_value(name: &str, kind: PropertyType, value: &Value) -> Result<()> {
    let invalid = |message: String| VaultError::InvalidValue {
        name: name.to_string(),
        message,
    };
    let text = match (kind, value) {
        (PropertyType::Binary, Value::Binary(_) | Value::BinaryRef(_)) => return Ok(()),
        (PropertyType::Binary, Value::Text(_)) => {
            return Err(invalid("binary content cannot be given as text".to_string()));
        }
        (_, Value::Binary(_) | Value::BinaryRef(_)) => {
            return Err(invalid(format!("{kind} property cannot hold binary content")));
        }
        (_, Value::Text(t)) => t.as_str(),
    };
    let ok = match kind {
        PropertyType::Long => text.parse::<i64>().is_ok(),
        PropertyType::Double => text.parse::<f64>().is_ok(),
        PropertyType::Decimal => is_decimal(text),
        PropertyType::Boolean => {
            text.eq_ignore_ascii_case("true") || text.eq_ignore_ascii_case("false")
        }
        PropertyType::Date => is_date(text),
        PropertyType::Name => !text.is_empty() && !text.contains('/'),
        PropertyType::Path | PropertyType::Reference | PropertyType::WeakReference => {
            !text.is_empty()
        }
        PropertyType::Uri => !text.chars().any(char::is_whitespace),
        PropertyType::String | PropertyType::Undefined | PropertyType::Binary => true,
    };
    if ok {
        Ok(())
    } else {
        Err(invalid(format!("'{text}' is not a valid {kind}")))
    }
}

fn is_decimal(text: &str) -> bool {
    let body = text.strip_prefix(['-', '+']).unwrap_or(text);
    let (mantissa, exponent) = match body.split_once(['e', 'E']) {
        Some((m, e)) => (m, Some(e)),
        None => (body, None),
    };
    let (int, frac) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    let digits = |s: &str| s.chars().all(|c| c.is_ascii_digit());
    let exponent_ok = exponent.is_none_or(|e| {
        let e = e.strip_prefix(['-', '+']).unwrap_or(e);
        !e.is_empty() && digits(e)
    });
    !(int.is_empty() && frac.is_empty()) && digits(int) && digits(frac) && exponent_ok
}

/// ISO 8601 calendar date with optional time part (`2024-05-01T10:00:00.000Z`).
fn is_date(text: &str) -> bool {
    let bytes = text.as_bytes();
    if bytes.len() < 10 {
        return false;
    }
    let date_ok = bytes[..4].iter().all(u8::is_ascii_digit)
        && bytes[4] == b'-'
        && bytes[5..7].iter().all(u8::is_ascii_digit)
        && bytes[7] == b'-'
        && bytes[8..10].iter().all(u8::is_ascii_digit);
    date_ok && (bytes.len() == 10 || bytes[10] == b'T')
}

impl ContentStore for MemoryStore {
    fn root(&self) -> NodeId {
        NodeId(0)
    }

    fn node_types(&self) -> &NodeTypeRegistry {
        &self.types
    }

    fn node_at(&self, path: &str) -> Result<Option<NodeId>> {
        let mut current = self.root();
        for (name, index) in path_segments(path)? {
            match self.child(current, &name, index)? {
                Some(next) => current = next,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    fn node_by_identifier(&self, identifier: &str) -> Result<Option<NodeId>> {
        Ok(self.identifiers.get(identifier).copied())
    }

    fn path_of(&self, node: NodeId) -> Result<String> {
        let mut labels = Vec::new();
        let mut current = node;
        while let Some(parent) = self.record(current)?.parent {
            labels.push(sns_label(&self.record(current)?.name, self.index_of(current)?));
            current = parent;
        }
        if labels.is_empty() {
            return Ok("/".to_string());
        }
        labels.reverse();
        Ok(format!("/{}", labels.join("/")))
    }

    fn name_of(&self, node: NodeId) -> Result<String> {
        Ok(self.record(node)?.name.clone())
    }

    fn index_of(&self, node: NodeId) -> Result<u32> {
        let record = self.record(node)?;
        let Some(parent) = record.parent else {
            return Ok(1);
        };
        let mut index = 0;
        for sibling in &self.record(parent)?.children {
            if self.record(*sibling)?.name == record.name {
                index += 1;
            }
            if *sibling == node {
                break;
            }
        }
        Ok(index)
    }

    fn parent_of(&self, node: NodeId) -> Result<Option<NodeId>> {
        Ok(self.record(node)?.parent)
    }

    fn identifier_of(&self, node: NodeId) -> Result<Option<String>> {
        Ok(self.record(node)?.identifier.clone())
    }

    fn primary_type(&self, node: NodeId) -> Result<String> {
        Ok(self.record(node)?.primary_type.clone())
    }

    fn set_primary_type(&mut self, node: NodeId, node_type: &str) -> Result<()> {
        self.ensure_writable(node)?;
        let record = self.record(node)?;
        if let Some(parent) = record.parent {
            let name = record.name.clone();
            self.check_child_allowed(parent, &name, node_type, false)?;
        }
        self.record_mut(node)?.primary_type = node_type.to_string();
        Ok(())
    }

    fn mixins(&self, node: NodeId) -> Result<Vec<String>> {
        Ok(self.record(node)?.mixins.clone())
    }

    fn add_mixin(&mut self, node: NodeId, mixin: &str) -> Result<()> {
        self.ensure_writable(node)?;
        let path = self.path_of(node)?;
        self.validate_mixins(&path, &[mixin.to_string()])?;
        if self.record(node)?.mixins.iter().any(|m| m == mixin) {
            return Ok(());
        }
        self.record_mut(node)?.mixins.push(mixin.to_string());
        let record = self.record(node)?;
        if record.identifier.is_none() && self.is_type(record, MIX_REFERENCEABLE) {
            let identifier = self.fresh_identifier();
            self.identifiers.insert(identifier.clone(), node);
            self.record_mut(node)?.identifier = Some(identifier);
        }
        Ok(())
    }

    fn remove_mixin(&mut self, node: NodeId, mixin: &str) -> Result<()> {
        self.ensure_writable(node)?;
        let path = self.path_of(node)?;
        let record = self.record_mut(node)?;
        let before = record.mixins.len();
        record.mixins.retain(|m| m != mixin);
        if record.mixins.len() == before {
            return Err(VaultError::constraint(path, format!("mixin '{mixin}' not present")));
        }
        let record = self.record(node)?;
        if !self.is_type(record, MIX_REFERENCEABLE)
            && let Some(identifier) = record.identifier.clone()
        {
            self.identifiers.remove(&identifier);
            self.record_mut(node)?.identifier = None;
        }
        Ok(())
    }

    fn children(&self, node: NodeId) -> Result<Vec<NodeId>> {
        Ok(self.record(node)?.children.clone())
    }

    fn add_child(
        &mut self,
        parent: NodeId,
        name: &str,
        primary_type: Option<&str>,
    ) -> Result<NodeId> {
        self.ensure_writable(parent)?;
        self.validate_name(name)?;
        let node_type = match primary_type {
            Some(t) => t.to_string(),
            None => {
                let record = self.record(parent)?;
                self.types
                    .default_child_type(&record.primary_type, &record.mixins, name)
                    .ok_or_else(|| {
                        VaultError::constraint(
                            join_path(&self.path_of(parent).unwrap_or_default(), name),
                            "no default primary type",
                        )
                    })?
            }
        };
        self.check_child_allowed(parent, name, &node_type, false)?;
        let spec = NodeSpec::new(name, node_type);
        let identifier = if self.types.is_node_type(&spec.primary_type, &[], MIX_REFERENCEABLE) {
            Some(self.fresh_identifier())
        } else {
            None
        };
        Ok(self.insert_record(parent, &spec, identifier))
    }

    fn import_node(
        &mut self,
        parent: NodeId,
        spec: &NodeSpec,
        behavior: IdentifierBehavior,
    ) -> Result<NodeId> {
        self.ensure_writable(parent)?;
        self.validate_name(&spec.name)?;
        self.check_child_allowed(parent, &spec.name, &spec.primary_type, true)?;
        let path = join_path(&self.path_of(parent)?, &spec.name);
        self.validate_mixins(&path, &spec.mixins)?;

        let referenceable =
            self.types
                .is_node_type(&spec.primary_type, &spec.mixins, MIX_REFERENCEABLE);
        let identifier = match (&spec.identifier, referenceable) {
            (_, false) => {
                if spec.identifier.is_some() {
                    debug!(path = %path, "dropping identifier of non-referenceable node");
                }
                None
            }
            (None, true) => Some(self.fresh_identifier()),
            (Some(id), true) => match self.identifiers.get(id).copied() {
                None => Some(id.clone()),
                Some(holder) => match behavior {
                    IdentifierBehavior::CollisionThrow => {
                        return Err(VaultError::IdentifierCollision {
                            identifier: id.clone(),
                            path: self.path_of(holder)?,
                        });
                    }
                    IdentifierBehavior::CreateNew => Some(self.fresh_identifier()),
                    IdentifierBehavior::RemoveExisting => {
                        let holder_path = self.path_of(holder)?;
                        if is_descendant_or_self(&self.path_of(parent)?, &holder_path) {
                            return Err(VaultError::constraint(
                                holder_path,
                                "cannot remove an ancestor of the new node",
                            ));
                        }
                        self.remove(holder)?;
                        Some(id.clone())
                    }
                },
            },
        };
        Ok(self.insert_record(parent, spec, identifier))
    }

    fn move_node(&mut self, node: NodeId, new_parent: NodeId, new_name: &str) -> Result<()> {
        let Some(old_parent) = self.record(node)?.parent else {
            return Err(VaultError::constraint("/", "cannot move the root node"));
        };
        self.ensure_writable(old_parent)?;
        self.ensure_writable(new_parent)?;
        self.validate_name(new_name)?;
        let node_path = self.path_of(node)?;
        if is_descendant_or_self(&self.path_of(new_parent)?, &node_path) {
            return Err(VaultError::constraint(
                node_path,
                "cannot move a node below itself",
            ));
        }
        let node_type = self.record(node)?.primary_type.clone();
        self.check_child_allowed(new_parent, new_name, &node_type, true)?;

        self.record_mut(old_parent)?.children.retain(|c| *c != node);
        let record = self.record_mut(node)?;
        record.parent = Some(new_parent);
        record.name = new_name.to_string();
        self.record_mut(new_parent)?.children.push(node);
        Ok(())
    }

    fn remove(&mut self, node: NodeId) -> Result<()> {
        let Some(parent) = self.record(node)?.parent else {
            return Err(VaultError::constraint("/", "cannot remove the root node"));
        };
        self.ensure_writable(parent)?;
        let path = self.path_of(node)?;
        if self.is_read_only(&path) {
            return Err(VaultError::AccessDenied(path));
        }
        for id in self.subtree(node)? {
            if let Some(record) = self.nodes.remove(&id)
                && let Some(identifier) = record.identifier
            {
                self.identifiers.remove(&identifier);
            }
        }
        self.policies
            .retain(|(policy_path, _), _| !is_descendant_or_self(policy_path, &path));
        self.record_mut(parent)?.children.retain(|c| *c != node);
        Ok(())
    }

    fn order_before(&mut self, parent: NodeId, child: NodeId, before: Option<NodeId>) -> Result<()> {
        self.ensure_writable(parent)?;
        let path = self.path_of(parent)?;
        let record = self.record(parent)?;
        if !self.types.is_orderable(&record.primary_type, &record.mixins) {
            return Err(VaultError::constraint(path, "child nodes are not orderable"));
        }
        if !record.children.contains(&child) {
            return Err(VaultError::ItemNotFound(format!("{path}: child {}", child.0)));
        }
        if before.is_some_and(|b| !record.children.contains(&b)) {
            return Err(VaultError::ItemNotFound(format!("{path}: sibling")));
        }
        let children = &mut self.record_mut(parent)?.children;
        children.retain(|c| *c != child);
        match before.and_then(|b| children.iter().position(|c| *c == b)) {
            Some(at) => children.insert(at, child),
            None => children.push(child),
        }
        Ok(())
    }

    fn references(&self, node: NodeId) -> Result<Vec<(NodeId, String)>> {
        let Some(identifier) = self.record(node)?.identifier.clone() else {
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        for (id, record) in &self.nodes {
            for property in record.properties.values() {
                if property.kind.is_reference() && property.texts().any(|t| t == identifier) {
                    out.push((*id, property.name.clone()));
                }
            }
        }
        Ok(out)
    }

    fn properties(&self, node: NodeId) -> Result<Vec<Property>> {
        let record = self.record(node)?;
        let mut out = self.synthesized(record);
        out.extend(record.properties.values().cloned());
        Ok(out)
    }

    fn property(&self, node: NodeId, name: &str) -> Result<Option<Property>> {
        let record = self.record(node)?;
        if is_synthesized(name) {
            return Ok(self.synthesized(record).into_iter().find(|p| p.name == name));
        }
        Ok(record.properties.get(name).cloned())
    }

    fn set_property(&mut self, node: NodeId, property: Property) -> Result<()> {
        self.ensure_writable(node)?;
        let property = self.checked_property(node, property)?;
        self.record_mut(node)?
            .properties
            .insert(property.name.clone(), property);
        Ok(())
    }

    fn remove_property(&mut self, node: NodeId, name: &str) -> Result<()> {
        self.ensure_writable(node)?;
        let path = self.path_of(node)?;
        let record = self.record(node)?;
        if self
            .types
            .is_protected_property(&record.primary_type, &record.mixins, name)
        {
            return Err(VaultError::constraint(path, format!("property '{name}' is protected")));
        }
        match self.record_mut(node)?.properties.remove(name) {
            Some(_) => Ok(()),
            None => Err(VaultError::ItemNotFound(join_path(&path, name))),
        }
    }

    fn is_checked_out(&self, node: NodeId) -> Result<bool> {
        let mut current = Some(node);
        while let Some(id) = current {
            let record = self.record(id)?;
            if self.is_type(record, MIX_SIMPLE_VERSIONABLE) {
                return Ok(record.checked_out);
            }
            current = record.parent;
        }
        Ok(true)
    }

    fn checkout(&mut self, node: NodeId) -> Result<()> {
        self.set_version_state(node, true)
    }

    fn checkin(&mut self, node: NodeId) -> Result<()> {
        self.set_version_state(node, false)
    }

    fn access_policy(&self, path: &str, kind: PolicyKind) -> Result<Option<AccessPolicy>> {
        Ok(self.policies.get(&(path.to_string(), kind)).cloned())
    }

    fn set_access_policy(&mut self, path: &str, policy: AccessPolicy) -> Result<()> {
        let node = self
            .node_at(path)?
            .ok_or_else(|| VaultError::ItemNotFound(path.to_string()))?;
        self.ensure_writable(node)?;
        let mixin = Self::mixin_for(policy.kind());
        let record = self.record(node)?;
        if !self.is_type(record, mixin) {
            self.record_mut(node)?.mixins.push(mixin.to_string());
        }
        self.policies
            .insert((path.to_string(), policy.kind()), policy);
        Ok(())
    }

    fn remove_access_policy(&mut self, path: &str, kind: PolicyKind) -> Result<()> {
        let node = self
            .node_at(path)?
            .ok_or_else(|| VaultError::ItemNotFound(path.to_string()))?;
        self.ensure_writable(node)?;
        match self.policies.remove(&(path.to_string(), kind)) {
            Some(_) => Ok(()),
            None => Err(VaultError::ItemNotFound(format!("{path} ({kind:?} policy)"))),
        }
    }

    fn find_authorizable(&self, authorizable_id: &str) -> Result<Option<NodeId>> {
        for (id, record) in &self.nodes {
            if !self.is_type(record, REP_AUTHORIZABLE) {
                continue;
            }
            let matches = match record.properties.get(REP_AUTHORIZABLE_ID) {
                Some(p) => p.first_text() == Some(authorizable_id),
                None => record.name == authorizable_id,
            };
            if matches {
                return Ok(Some(*id));
            }
        }
        Ok(None)
    }

    fn namespace_uri(&self, prefix: &str) -> Option<String> {
        self.namespaces.get(prefix).cloned()
    }

    fn register_namespace(&mut self, prefix: &str, uri: &str) -> Result<()> {
        if let Some(existing) = self.namespaces.get(prefix) {
            if existing == uri {
                return Ok(());
            }
            return Err(VaultError::constraint(
                "/",
                format!("prefix '{prefix}' is already mapped to {existing}"),
            ));
        }
        if let Some((other, _)) = self.namespaces.iter().find(|(_, u)| *u == uri) {
            return Err(VaultError::constraint(
                "/",
                format!("{uri} is already mapped to prefix '{other}'"),
            ));
        }
        self.namespaces.insert(prefix.to_string(), uri.to_string());
        Ok(())
    }
}

impl MemoryStore {
    fn set_version_state(&mut self, node: NodeId, checked_out: bool) -> Result<()> {
        let path = self.path_of(node)?;
        let record = self.record(node)?;
        if !self.is_type(record, MIX_SIMPLE_VERSIONABLE) {
            return Err(VaultError::constraint(path, "node is not versionable"));
        }
        if self.is_read_only(&path) {
            return Err(VaultError::AccessDenied(path));
        }
        self.record_mut(node)?.checked_out = checked_out;
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::{MIX_VERSIONABLE, NT_FILE, NT_FOLDER, NT_UNSTRUCTURED};

    fn store_with(path_names: &[&str]) -> (MemoryStore, Vec<NodeId>) {
        let mut store = MemoryStore::new();
        let mut ids = Vec::new();
        for name in path_names {
            let root = store.root();
            ids.push(
                store
                    .add_child(root, name, Some(NT_UNSTRUCTURED))
                    .expect("child created"),
            );
        }
        (store, ids)
    }

    #[test]
    fn paths_and_sns_indices() {
        let (mut store, ids) = store_with(&["a", "a", "b"]);
        assert_eq!(store.path_of(ids[0]).ok().as_deref(), Some("/a"));
        assert_eq!(store.path_of(ids[1]).ok().as_deref(), Some("/a[2]"));
        assert_eq!(store.node_at("/a[2]").ok().flatten(), Some(ids[1]));
        assert_eq!(store.node_at("/b").ok().flatten(), Some(ids[2]));
        assert_eq!(store.node_at("/missing").ok().flatten(), None);

        let child = store.add_child(ids[2], "c", None).expect("child");
        assert_eq!(store.path_of(child).ok().as_deref(), Some("/b/c"));
        assert_eq!(store.primary_type(child).ok().as_deref(), Some(NT_UNSTRUCTURED));
    }

    #[test]
    fn typed_properties_are_validated() {
        let (mut store, ids) = store_with(&["a"]);
        let ok = Property::single("count", PropertyType::Long, "42");
        assert!(store.set_property(ids[0], ok).is_ok());
        let bad = Property::single("count", PropertyType::Long, "forty-two");
        assert!(matches!(
            store.set_property(ids[0], bad),
            Err(VaultError::InvalidValue { .. })
        ));
        let protected = Property::single(JCR_UUID, PropertyType::String, "x");
        assert!(matches!(
            store.set_property(ids[0], protected),
            Err(VaultError::ConstraintViolation { .. })
        ));
    }

    #[test]
    fn identity_is_not_writable_as_a_property() {
        let (mut store, ids) = store_with(&["a"]);
        for name in [JCR_UUID, JCR_IS_CHECKED_OUT, JCR_PRIMARY_TYPE] {
            let write = Property::single(name, PropertyType::String, "x");
            assert!(
                matches!(
                    store.set_property(ids[0], write),
                    Err(VaultError::ConstraintViolation { .. })
                ),
                "{name} accepted"
            );
        }
        assert_eq!(store.identifier_of(ids[0]).expect("identifier"), None);
        assert_eq!(store.property(ids[0], JCR_UUID).expect("property"), None);
        assert_eq!(
            store.primary_type(ids[0]).ok().as_deref(),
            Some(NT_UNSTRUCTURED)
        );
    }

    #[test]
    fn synthesized_identity_properties() {
        let (mut store, ids) = store_with(&["a"]);
        store.add_mixin(ids[0], MIX_REFERENCEABLE).expect("mixin");
        let props = store.properties(ids[0]).expect("properties");
        let names: Vec<_> = props.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec![JCR_PRIMARY_TYPE, JCR_MIXIN_TYPES, JCR_UUID]);
        let identifier = store.identifier_of(ids[0]).ok().flatten().expect("identifier");
        assert_eq!(store.node_by_identifier(&identifier).ok().flatten(), Some(ids[0]));
    }

    #[test]
    fn checked_in_nodes_reject_writes() {
        let (mut store, ids) = store_with(&["v"]);
        store.add_mixin(ids[0], MIX_VERSIONABLE).expect("mixin");
        store.checkin(ids[0]).expect("checkin");
        assert!(!store.is_checked_out(ids[0]).expect("state"));
        let child = store.add_child(ids[0], "c", None);
        assert!(matches!(child, Err(VaultError::CheckedIn(_))));
        store.checkout(ids[0]).expect("checkout");
        assert!(store.add_child(ids[0], "c", None).is_ok());
    }

    #[test]
    fn child_definitions_are_enforced() {
        let mut store = MemoryStore::new();
        let root = store.root();
        let folder = store.add_child(root, "f", Some(NT_FOLDER)).expect("folder");
        assert!(store.add_child(folder, "x", Some(NT_UNSTRUCTURED)).is_err());
        assert!(store.add_child(folder, "file", Some(NT_FILE)).is_ok());
    }

    #[test]
    fn import_node_identifier_behaviors() {
        let mut store = MemoryStore::new();
        let root = store.root();
        let spec = NodeSpec::new("a", NT_UNSTRUCTURED)
            .with_mixin(MIX_REFERENCEABLE)
            .with_identifier("U1");
        let first = store
            .import_node(root, &spec, IdentifierBehavior::CollisionThrow)
            .expect("created");

        let mut dup = spec.clone();
        dup.name = "b".to_string();
        assert!(matches!(
            store.import_node(root, &dup, IdentifierBehavior::CollisionThrow),
            Err(VaultError::IdentifierCollision { .. })
        ));

        let fresh = store
            .import_node(root, &dup, IdentifierBehavior::CreateNew)
            .expect("fresh id");
        assert_ne!(store.identifier_of(fresh).ok().flatten().as_deref(), Some("U1"));

        let mut third = spec.clone();
        third.name = "c".to_string();
        let replaced = store
            .import_node(root, &third, IdentifierBehavior::RemoveExisting)
            .expect("replaced holder");
        assert_eq!(store.node_by_identifier("U1").ok().flatten(), Some(replaced));
        assert!(store.path_of(first).is_err());
    }

    #[test]
    fn ordering_and_references() {
        let (mut store, ids) = store_with(&["a", "b", "c"]);
        let root = store.root();
        store.order_before(root, ids[2], Some(ids[0])).expect("reorder");
        assert_eq!(store.children(root).ok(), Some(vec![ids[2], ids[0], ids[1]]));

        store.add_mixin(ids[0], MIX_REFERENCEABLE).expect("mixin");
        let target = store.identifier_of(ids[0]).ok().flatten().expect("id");
        store
            .set_property(ids[1], Property::single("ref", PropertyType::Reference, target))
            .expect("reference");
        assert_eq!(store.references(ids[0]).ok(), Some(vec![(ids[1], "ref".to_string())]));
    }

    #[test]
    fn read_only_paths_deny_writes() {
        let (mut store, ids) = store_with(&["tmp"]);
        store.set_read_only("/tmp");
        assert!(matches!(
            store.add_child(ids[0], "x", None),
            Err(VaultError::AccessDenied(_))
        ));
    }

    #[test]
    fn policies_add_access_control_mixin() {
        let (mut store, ids) = store_with(&["a"]);
        let cug = AccessPolicy::Cug(["everyone".to_string()].into_iter().collect());
        store.set_access_policy("/a", cug.clone()).expect("policy");
        assert!(store.is_node_type(ids[0], REP_CUG_MIXIN).expect("type"));
        assert_eq!(store.access_policy("/a", PolicyKind::Cug).ok().flatten(), Some(cug));
        store.remove(ids[0]).expect("remove");
        assert_eq!(store.policy_count(), 0);
    }

    #[test]
    fn namespace_registration() {
        let mut store = MemoryStore::new();
        assert!(store.register_namespace("app", "http://example.com/app").is_ok());
        assert!(store.register_namespace("app", "http://example.com/app").is_ok());
        assert!(store.register_namespace("app", "http://other").is_err());
        assert!(store.register_namespace("other", "http://example.com/app").is_err());
        let root = store.root();
        assert!(store.add_child(root, "app:thing", None).is_ok());
        assert!(store.add_child(root, "nope:thing", None).is_err());
    }
}
