//! # Content Store Capability
//!
//! The import engine never touches storage directly. Everything it does to
//! the target tree goes through [`ContentStore`]:
//! - lookup by path and by stable identifier
//! - child creation, privileged bulk creation, move, remove, reorder
//! - typed property get/set/remove, mixins
//! - checkout/checkin versioning
//! - access-control policy management and authorizable lookup
//!
//! [`MemoryStore`] is the in-process implementation. [`RedbStore`] persists
//! a `MemoryStore` snapshot.

pub mod memory;
pub mod redb_store;

pub use memory::MemoryStore;
pub use redb_store::RedbStore;

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::formats::name::parse_sns_name;
use crate::nodetype::NodeTypeRegistry;
use crate::types::{NodeId, Property, Result, VaultError};

// =============================================================================
// PRIVILEGED CREATION
// =============================================================================

/// What to do when the identifier of a node being created is already taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdentifierBehavior {
    /// Fail with [`VaultError::IdentifierCollision`].
    #[default]
    CollisionThrow,
    /// Assign a fresh identifier to the new node.
    CreateNew,
    /// Remove the node currently holding the identifier.
    RemoveExisting,
}

/// Everything needed to create a node in one privileged step, including
/// properties that ordinary writes may not touch.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NodeSpec {
    pub name: String,
    pub primary_type: String,
    pub mixins: Vec<String>,
    pub identifier: Option<String>,
    /// Protected properties set at creation time.
    pub properties: Vec<Property>,
    /// Initial version state for versionable nodes.
    pub checked_out: bool,
}

impl NodeSpec {
    #[must_use]
    pub fn new(name: impl Into<String>, primary_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary_type: primary_type.into(),
            checked_out: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    #[must_use]
    pub fn with_mixin(mut self, mixin: impl Into<String>) -> Self {
        self.mixins.push(mixin.into());
        self
    }

    #[must_use]
    pub fn with_property(mut self, property: Property) -> Self {
        self.properties.push(property);
        self
    }
}

// =============================================================================
// ACCESS CONTROL
// =============================================================================

/// The three kinds of access policy a node can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyKind {
    /// Resource-based access control list (`rep:policy`).
    Acl,
    /// Closed user group (`rep:cugPolicy`).
    Cug,
    /// Principal-based access control list (`rep:principalPolicy`).
    Principal,
}

/// One entry of a resource-based ACL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessControlEntry {
    pub principal: String,
    pub allow: bool,
    pub privileges: Vec<String>,
    pub restrictions: BTreeMap<String, Vec<String>>,
}

/// One entry of a principal-based ACL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrincipalEntry {
    /// Path the entry applies to. `None` means repository-level.
    pub effective_path: Option<String>,
    pub privileges: Vec<String>,
    pub restrictions: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessPolicy {
    Acl(Vec<AccessControlEntry>),
    Cug(BTreeSet<String>),
    Principal {
        principal: String,
        entries: Vec<PrincipalEntry>,
    },
}

impl AccessPolicy {
    #[must_use]
    pub const fn kind(&self) -> PolicyKind {
        match self {
            Self::Acl(_) => PolicyKind::Acl,
            Self::Cug(_) => PolicyKind::Cug,
            Self::Principal { .. } => PolicyKind::Principal,
        }
    }
}

// =============================================================================
// CAPABILITY TRAIT
// =============================================================================

/// Hierarchical, typed content store.
///
/// Mutating operations honour version state (checked-in nodes and their
/// descendants reject writes), protection rules of the node type registry
/// and read-only areas of the store.
pub trait ContentStore {
    // -------------------------------------------------------------------------
    // Lookup
    // -------------------------------------------------------------------------

    fn root(&self) -> NodeId;

    fn node_types(&self) -> &NodeTypeRegistry;

    /// Node at an absolute path (`/a/b[2]/c`).
    fn node_at(&self, path: &str) -> Result<Option<NodeId>>;

    fn node_by_identifier(&self, identifier: &str) -> Result<Option<NodeId>>;

    fn path_of(&self, node: NodeId) -> Result<String>;

    fn name_of(&self, node: NodeId) -> Result<String>;

    /// 1-based same-name-sibling index.
    fn index_of(&self, node: NodeId) -> Result<u32>;

    fn parent_of(&self, node: NodeId) -> Result<Option<NodeId>>;

    fn identifier_of(&self, node: NodeId) -> Result<Option<String>>;

    // -------------------------------------------------------------------------
    // Types
    // -------------------------------------------------------------------------

    fn primary_type(&self, node: NodeId) -> Result<String>;

    fn set_primary_type(&mut self, node: NodeId, node_type: &str) -> Result<()>;

    fn mixins(&self, node: NodeId) -> Result<Vec<String>>;

    fn add_mixin(&mut self, node: NodeId, mixin: &str) -> Result<()>;

    fn remove_mixin(&mut self, node: NodeId, mixin: &str) -> Result<()>;

    // -------------------------------------------------------------------------
    // Structure
    // -------------------------------------------------------------------------

    /// Children in stored order.
    fn children(&self, node: NodeId) -> Result<Vec<NodeId>>;

    /// Create a child. `None` picks the default type of the child definition.
    fn add_child(&mut self, parent: NodeId, name: &str, primary_type: Option<&str>)
    -> Result<NodeId>;

    /// Privileged creation: protected properties, identifier and version
    /// state are established atomically with the node.
    fn import_node(
        &mut self,
        parent: NodeId,
        spec: &NodeSpec,
        behavior: IdentifierBehavior,
    ) -> Result<NodeId>;

    /// Move `node` under `new_parent` with name `new_name`, appended last.
    fn move_node(&mut self, node: NodeId, new_parent: NodeId, new_name: &str) -> Result<()>;

    /// Remove a node and its subtree.
    fn remove(&mut self, node: NodeId) -> Result<()>;

    /// Place `child` before `before` (or last when `None`).
    fn order_before(&mut self, parent: NodeId, child: NodeId, before: Option<NodeId>) -> Result<()>;

    /// Reference and weak-reference properties pointing at `node`, as
    /// (referring node, property name).
    fn references(&self, node: NodeId) -> Result<Vec<(NodeId, String)>>;

    // -------------------------------------------------------------------------
    // Properties
    // -------------------------------------------------------------------------

    /// All properties, including the synthesized identity properties.
    fn properties(&self, node: NodeId) -> Result<Vec<Property>>;

    fn property(&self, node: NodeId, name: &str) -> Result<Option<Property>>;

    fn set_property(&mut self, node: NodeId, property: Property) -> Result<()>;

    fn remove_property(&mut self, node: NodeId, name: &str) -> Result<()>;

    // -------------------------------------------------------------------------
    // Versioning
    // -------------------------------------------------------------------------

    /// False if the node or its nearest versionable ancestor is checked in.
    fn is_checked_out(&self, node: NodeId) -> Result<bool>;

    fn checkout(&mut self, node: NodeId) -> Result<()>;

    fn checkin(&mut self, node: NodeId) -> Result<()>;

    // -------------------------------------------------------------------------
    // Access control and principals
    // -------------------------------------------------------------------------

    fn access_policy(&self, path: &str, kind: PolicyKind) -> Result<Option<AccessPolicy>>;

    fn set_access_policy(&mut self, path: &str, policy: AccessPolicy) -> Result<()>;

    fn remove_access_policy(&mut self, path: &str, kind: PolicyKind) -> Result<()>;

    /// Node of the user or group with the given authorizable id.
    fn find_authorizable(&self, authorizable_id: &str) -> Result<Option<NodeId>>;

    // -------------------------------------------------------------------------
    // Namespaces
    // -------------------------------------------------------------------------

    fn namespace_uri(&self, prefix: &str) -> Option<String>;

    fn register_namespace(&mut self, prefix: &str, uri: &str) -> Result<()>;

    // -------------------------------------------------------------------------
    // Provided
    // -------------------------------------------------------------------------

    /// Child with `name` and SNS `index` (0 and 1 both mean the first).
    fn child(&self, parent: NodeId, name: &str, index: u32) -> Result<Option<NodeId>> {
        let wanted = index.max(1);
        let mut seen = 0;
        for child in self.children(parent)? {
            if self.name_of(child)? == name {
                seen += 1;
                if seen == wanted {
                    return Ok(Some(child));
                }
            }
        }
        Ok(None)
    }

    fn has_property(&self, node: NodeId, name: &str) -> Result<bool> {
        Ok(self.property(node, name)?.is_some())
    }

    /// Whether the node's primary type or one of its mixins is `node_type`.
    fn is_node_type(&self, node: NodeId, node_type: &str) -> Result<bool> {
        let primary = self.primary_type(node)?;
        let mixins = self.mixins(node)?;
        Ok(self.node_types().is_node_type(&primary, &mixins, node_type))
    }

    /// Whether `node` keeps its children in caller-defined order.
    fn is_orderable(&self, node: NodeId) -> Result<bool> {
        let primary = self.primary_type(node)?;
        let mixins = self.mixins(node)?;
        Ok(self.node_types().is_orderable(&primary, &mixins))
    }
}

// =============================================================================
// PATHS
// =============================================================================

/// Append a label to a path.
#[must_use]
pub fn join_path(parent: &str, label: &str) -> String {
    if parent.ends_with('/') {
        format!("{parent}{label}")
    } else {
        format!("{parent}/{label}")
    }
}

/// Parent of an absolute path. The root has no parent.
#[must_use]
pub fn parent_path(path: &str) -> Option<&str> {
    if path == "/" || path.is_empty() {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(i) => Some(&path[..i]),
        None => None,
    }
}

/// Last label of an absolute path (empty for the root).
#[must_use]
pub fn last_label(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or("")
}

/// Whether `path` is `ancestor` or below it.
#[must_use]
pub fn is_descendant_or_self(path: &str, ancestor: &str) -> bool {
    if ancestor == "/" {
        return path.starts_with('/');
    }
    path == ancestor
        || path
            .strip_prefix(ancestor)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Split an absolute path into (name, index) segments.
pub fn path_segments(path: &str) -> Result<Vec<(String, u32)>> {
    if !path.starts_with('/') {
        return Err(VaultError::InvalidName(path.to_string()));
    }
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(parse_sns_name)
        .collect()
}
