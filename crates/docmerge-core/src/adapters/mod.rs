//! # Sub-Importers
//!
//! Access control policies and users/groups cannot be written as plain
//! nodes. When the merge engine meets one, the whole subtree is handed to
//! one of these importers, which applies it through the policy and
//! principal calls of the store when the subtree closes.
//!
//! Exactly one adapter is active at a time, so dispatch is a plain enum.

pub mod acl;
pub mod authorizable;

pub use acl::{AclImporter, AclState};
pub use authorizable::AuthorizableImporter;

use crate::docview::DocNode;
use crate::ledger::ImportLedger;
use crate::nodetype::NodeTypeRegistry;
use crate::primitives::{REP_ACL, REP_AUTHORIZABLE, REP_CUG_POLICY, REP_PRINCIPAL_POLICY};
use crate::store::{ContentStore, PolicyKind};
use crate::types::{NodeId, Result};

/// Which sub-importer a node needs, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterKind {
    Acl,
    Cug,
    PrincipalAcl,
    Authorizable,
}

impl AdapterKind {
    /// Classify a node by its declared primary type.
    #[must_use]
    pub fn for_node(node: &DocNode, registry: &NodeTypeRegistry) -> Option<Self> {
        let primary = node.primary_type()?;
        match primary {
            REP_ACL => Some(Self::Acl),
            REP_CUG_POLICY => Some(Self::Cug),
            REP_PRINCIPAL_POLICY => Some(Self::PrincipalAcl),
            other if registry.is_subtype(other, REP_AUTHORIZABLE) => Some(Self::Authorizable),
            _ => None,
        }
    }

    /// The policy kind this adapter writes, for access control adapters.
    #[must_use]
    pub const fn policy_kind(self) -> Option<PolicyKind> {
        match self {
            Self::Acl => Some(PolicyKind::Acl),
            Self::Cug => Some(PolicyKind::Cug),
            Self::PrincipalAcl => Some(PolicyKind::Principal),
            Self::Authorizable => None,
        }
    }
}

/// The sub-importer owning the current subtree.
#[derive(Debug)]
pub enum Adapter {
    Acl(AclImporter),
    Authorizable(AuthorizableImporter),
}

impl Adapter {
    /// A descendant of the adapter root opened.
    pub fn start_node(&mut self, node: &DocNode) {
        match self {
            Self::Acl(acl) => acl.start_node(node),
            Self::Authorizable(auth) => auth.start_node(node),
        }
    }

    pub fn end_node(&mut self) {
        match self {
            Self::Acl(acl) => acl.end_node(),
            Self::Authorizable(auth) => auth.end_node(),
        }
    }

    /// Apply the collected subtree. Returns the store node that now stands
    /// for the adapter root, if it is a node of the tree.
    pub fn finish<S: ContentStore>(self, store: &mut S, ledger: &mut ImportLedger) -> Result<Option<NodeId>> {
        match self {
            Self::Acl(acl) => acl.finish(store, ledger).map(|()| None),
            Self::Authorizable(auth) => auth.finish(store, ledger),
        }
    }
}
