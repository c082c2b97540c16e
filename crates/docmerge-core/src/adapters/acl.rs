//! # Access Control Importer
//!
//! Collects a `rep:policy`, `rep:cugPolicy` or `rep:principalPolicy`
//! subtree and applies it to the access controlled node according to the
//! [`AclHandling`] of the import.
//!
//! ```text
//! Initial -> Acl | Cug | PrincipalAcl -> Entry -> Restriction
//!      any unexpected element -> Error (its subtree is ignored)
//! ```

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use crate::docview::DocNode;
use crate::importer::AclHandling;
use crate::ledger::ImportLedger;
use crate::primitives::{
    JCR_PRIMARY_TYPE, REP_ACL, REP_CUG_POLICY, REP_CUG_POLICY_NODE, REP_DENY_ACE,
    REP_EFFECTIVE_PATH, REP_GRANT_ACE, REP_POLICY, REP_PRINCIPAL_ENTRY, REP_PRINCIPAL_NAME,
    REP_PRINCIPAL_NAMES, REP_PRINCIPAL_POLICY, REP_PRINCIPAL_POLICY_NODE, REP_PRIVILEGES,
    REP_RESTRICTIONS,
};
use crate::store::{
    AccessControlEntry, AccessPolicy, ContentStore, PolicyKind, PrincipalEntry, join_path,
};
use crate::types::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AclState {
    Initial,
    Acl,
    Cug,
    PrincipalAcl,
    Entry,
    Restriction,
    Error,
}

#[derive(Debug)]
pub struct AclImporter {
    /// Path of the access controlled node.
    target: String,
    kind: PolicyKind,
    handling: AclHandling,
    states: Vec<AclState>,
    entries: Vec<AccessControlEntry>,
    principals: BTreeSet<String>,
    principal: String,
    principal_entries: Vec<PrincipalEntry>,
}

/// Name of the node a policy kind is serialised as.
#[must_use]
pub const fn policy_node_name(kind: PolicyKind) -> &'static str {
    match kind {
        PolicyKind::Acl => REP_POLICY,
        PolicyKind::Cug => REP_CUG_POLICY_NODE,
        PolicyKind::Principal => REP_PRINCIPAL_POLICY_NODE,
    }
}

impl AclImporter {
    #[must_use]
    pub fn new(target: impl Into<String>, kind: PolicyKind, handling: AclHandling) -> Self {
        Self {
            target: target.into(),
            kind,
            handling,
            states: vec![AclState::Initial],
            entries: Vec::new(),
            principals: BTreeSet::new(),
            principal: String::new(),
            principal_entries: Vec::new(),
        }
    }

    #[must_use]
    pub fn state(&self) -> AclState {
        self.states.last().copied().unwrap_or(AclState::Initial)
    }

    pub fn start_node(&mut self, node: &DocNode) {
        let next = match (self.state(), node.primary_type().unwrap_or_default()) {
            (AclState::Error, _) => AclState::Error,
            (AclState::Initial, REP_ACL) if self.kind == PolicyKind::Acl => AclState::Acl,
            (AclState::Initial, REP_CUG_POLICY) if self.kind == PolicyKind::Cug => {
                if let Some(names) = node.property(REP_PRINCIPAL_NAMES) {
                    self.principals.extend(names.values.iter().filter(|v| !v.is_empty()).cloned());
                }
                AclState::Cug
            }
            (AclState::Initial, REP_PRINCIPAL_POLICY) if self.kind == PolicyKind::Principal => {
                self.principal = value_of(node, REP_PRINCIPAL_NAME);
                AclState::PrincipalAcl
            }
            (AclState::Acl, t @ (REP_GRANT_ACE | REP_DENY_ACE)) => {
                self.entries.push(AccessControlEntry {
                    principal: value_of(node, REP_PRINCIPAL_NAME),
                    allow: t == REP_GRANT_ACE,
                    privileges: values_of(node, REP_PRIVILEGES),
                    restrictions: restrictions(node, &[REP_PRINCIPAL_NAME, REP_PRIVILEGES]),
                });
                AclState::Entry
            }
            (AclState::PrincipalAcl, REP_PRINCIPAL_ENTRY) => {
                let path = value_of(node, REP_EFFECTIVE_PATH);
                self.principal_entries.push(PrincipalEntry {
                    effective_path: (!path.is_empty()).then_some(path),
                    privileges: values_of(node, REP_PRIVILEGES),
                    restrictions: restrictions(node, &[REP_EFFECTIVE_PATH, REP_PRIVILEGES]),
                });
                AclState::Entry
            }
            (AclState::Entry, REP_RESTRICTIONS) => {
                let found = restrictions(node, &[]);
                let target = match self.kind {
                    PolicyKind::Acl => self.entries.last_mut().map(|e| &mut e.restrictions),
                    PolicyKind::Principal => {
                        self.principal_entries.last_mut().map(|e| &mut e.restrictions)
                    }
                    PolicyKind::Cug => None,
                };
                if let Some(target) = target {
                    target.extend(found);
                }
                AclState::Restriction
            }
            (state, t) => {
                warn!(
                    path = %self.target,
                    element = %node.name,
                    node_type = t,
                    state = ?state,
                    "unexpected access control element, ignoring its subtree"
                );
                AclState::Error
            }
        };
        self.states.push(next);
    }

    pub fn end_node(&mut self) {
        if self.states.len() > 1 {
            self.states.pop();
        }
    }

    fn incoming(&mut self) -> AccessPolicy {
        match self.kind {
            PolicyKind::Acl => AccessPolicy::Acl(std::mem::take(&mut self.entries)),
            PolicyKind::Cug => AccessPolicy::Cug(std::mem::take(&mut self.principals)),
            PolicyKind::Principal => AccessPolicy::Principal {
                principal: std::mem::take(&mut self.principal),
                entries: std::mem::take(&mut self.principal_entries),
            },
        }
    }

    /// Apply the collected policy.
    pub fn finish<S: ContentStore>(mut self, store: &mut S, ledger: &mut ImportLedger) -> Result<()> {
        let node_path = join_path(&self.target, policy_node_name(self.kind));
        let existing = store.access_policy(&self.target, self.kind)?;
        let incoming = self.incoming();

        let result = match self.handling {
            AclHandling::Ignore => {
                debug!(path = %node_path, "access control ignored");
                return Ok(());
            }
            AclHandling::Clear => {
                if existing.is_some() {
                    store.remove_access_policy(&self.target, self.kind)?;
                    ledger.on_deleted(&node_path);
                }
                return Ok(());
            }
            AclHandling::Overwrite => incoming,
            AclHandling::Merge => merge_policies(existing.clone(), incoming, false),
            AclHandling::MergePreserve => merge_policies(existing.clone(), incoming, true),
        };

        match existing {
            Some(current) if current == result => {
                ledger.on_nop(&node_path);
            }
            Some(_) => {
                store.set_access_policy(&self.target, result)?;
                ledger.on_modified(&node_path);
            }
            None => {
                store.set_access_policy(&self.target, result)?;
                ledger.on_created(&node_path);
            }
        }
        debug!(path = %node_path, handling = %self.handling, "access control applied");
        Ok(())
    }
}

/// Combine an existing policy with an incoming one. With `preserve`,
/// principals (or effective paths) that already have entries keep them and
/// their incoming entries are dropped; otherwise incoming entries replace
/// them.
fn merge_policies(existing: Option<AccessPolicy>, incoming: AccessPolicy, preserve: bool) -> AccessPolicy {
    match (existing, incoming) {
        (Some(AccessPolicy::Acl(mut current)), AccessPolicy::Acl(new)) => {
            if preserve {
                let known: BTreeSet<String> = current.iter().map(|e| e.principal.clone()).collect();
                current.extend(new.into_iter().filter(|e| !known.contains(&e.principal)));
            } else {
                let replaced: BTreeSet<&str> = new.iter().map(|e| e.principal.as_str()).collect();
                current.retain(|e| !replaced.contains(e.principal.as_str()));
                current.extend(new);
            }
            AccessPolicy::Acl(current)
        }
        (Some(AccessPolicy::Cug(mut current)), AccessPolicy::Cug(new)) => {
            current.extend(new);
            AccessPolicy::Cug(current)
        }
        (
            Some(AccessPolicy::Principal {
                principal,
                entries: mut current,
            }),
            AccessPolicy::Principal {
                principal: incoming_principal,
                entries: new,
            },
        ) if principal == incoming_principal => {
            let known: BTreeSet<Option<String>> =
                current.iter().map(|e| e.effective_path.clone()).collect();
            if preserve {
                current.extend(new.into_iter().filter(|e| !known.contains(&e.effective_path)));
            } else {
                let replaced: BTreeSet<Option<String>> =
                    new.iter().map(|e| e.effective_path.clone()).collect();
                current.retain(|e| !replaced.contains(&e.effective_path));
                current.extend(new);
            }
            AccessPolicy::Principal {
                principal,
                entries: current,
            }
        }
        (_, incoming) => incoming,
    }
}

fn value_of(node: &DocNode, name: &str) -> String {
    node.property(name)
        .map(|p| p.value().to_string())
        .unwrap_or_default()
}

fn values_of(node: &DocNode, name: &str) -> Vec<String> {
    node.property(name)
        .map(|p| p.values.iter().filter(|v| !v.is_empty()).cloned().collect())
        .unwrap_or_default()
}

/// Every property except the type and the `skip` list, as restriction.
fn restrictions(node: &DocNode, skip: &[&str]) -> BTreeMap<String, Vec<String>> {
    node.properties
        .values()
        .filter(|p| p.name != JCR_PRIMARY_TYPE && !skip.contains(&p.name.as_str()))
        .map(|p| (p.name.clone(), p.values.clone()))
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::formats::property::DocProperty;
    use crate::ledger::Mutation;
    use crate::primitives::NT_UNSTRUCTURED;
    use crate::store::MemoryStore;
    use crate::types::PropertyType;

    fn typed(name: &str, t: &str) -> DocNode {
        DocNode::new(name, 0).with_property(DocProperty::single(JCR_PRIMARY_TYPE, PropertyType::Name, t))
    }

    fn ace(name: &str, t: &str, principal: &str, privileges: &[&str]) -> DocNode {
        typed(name, t)
            .with_property(DocProperty::single(REP_PRINCIPAL_NAME, PropertyType::String, principal))
            .with_property(DocProperty::multi(REP_PRIVILEGES, PropertyType::Name, privileges.iter().copied()))
    }

    fn acl_import(handling: AclHandling, entries: &[DocNode]) -> AclImporter {
        let mut importer = AclImporter::new("/content", PolicyKind::Acl, handling);
        importer.start_node(&typed(REP_POLICY, REP_ACL));
        for entry in entries {
            importer.start_node(entry);
            importer.end_node();
        }
        importer.end_node();
        importer
    }

    fn store_with_policy() -> MemoryStore {
        let mut store = MemoryStore::new();
        let root = store.root();
        store.add_child(root, "content", Some(NT_UNSTRUCTURED)).unwrap();
        store
            .set_access_policy(
                "/content",
                AccessPolicy::Acl(vec![
                    AccessControlEntry {
                        principal: "everyone".to_string(),
                        allow: true,
                        privileges: vec!["jcr:read".to_string()],
                        restrictions: BTreeMap::new(),
                    },
                    AccessControlEntry {
                        principal: "editors".to_string(),
                        allow: true,
                        privileges: vec!["jcr:read".to_string()],
                        restrictions: BTreeMap::new(),
                    },
                ]),
            )
            .unwrap();
        store
    }

    fn principals(store: &MemoryStore) -> Vec<(String, Vec<String>)> {
        match store.access_policy("/content", PolicyKind::Acl).unwrap() {
            Some(AccessPolicy::Acl(entries)) => entries
                .into_iter()
                .map(|e| (e.principal, e.privileges))
                .collect(),
            other => panic!("unexpected policy {other:?}"),
        }
    }

    #[test]
    fn overwrite_replaces_everything() {
        let mut store = store_with_policy();
        let mut ledger = ImportLedger::new();
        acl_import(
            AclHandling::Overwrite,
            &[ace("allow", REP_GRANT_ACE, "editors", &["jcr:all"])],
        )
        .finish(&mut store, &mut ledger)
        .unwrap();
        assert_eq!(principals(&store), vec![("editors".to_string(), vec!["jcr:all".to_string()])]);
        assert_eq!(ledger.get("/content/rep:policy"), Some(Mutation::Modified));
    }

    #[test]
    fn merge_replaces_incoming_principals_only() {
        let mut store = store_with_policy();
        let mut ledger = ImportLedger::new();
        acl_import(AclHandling::Merge, &[ace("allow", REP_GRANT_ACE, "editors", &["jcr:all"])])
            .finish(&mut store, &mut ledger)
            .unwrap();
        assert_eq!(
            principals(&store),
            vec![
                ("everyone".to_string(), vec!["jcr:read".to_string()]),
                ("editors".to_string(), vec!["jcr:all".to_string()]),
            ]
        );
    }

    #[test]
    fn merge_preserve_keeps_known_principals() {
        let mut store = store_with_policy();
        let mut ledger = ImportLedger::new();
        acl_import(
            AclHandling::MergePreserve,
            &[
                ace("allow", REP_GRANT_ACE, "editors", &["jcr:all"]),
                ace("deny", REP_DENY_ACE, "guests", &["jcr:write"]),
            ],
        )
        .finish(&mut store, &mut ledger)
        .unwrap();
        let found = principals(&store);
        assert_eq!(found.len(), 3);
        assert_eq!(found[1], ("editors".to_string(), vec!["jcr:read".to_string()]));
        assert_eq!(found[2].0, "guests");
    }

    #[test]
    fn clear_and_ignore() {
        let mut store = store_with_policy();
        let mut ledger = ImportLedger::new();
        acl_import(AclHandling::Ignore, &[]).finish(&mut store, &mut ledger).unwrap();
        assert!(store.access_policy("/content", PolicyKind::Acl).unwrap().is_some());
        assert!(ledger.is_empty());
        acl_import(AclHandling::Clear, &[]).finish(&mut store, &mut ledger).unwrap();
        assert!(store.access_policy("/content", PolicyKind::Acl).unwrap().is_none());
        assert_eq!(ledger.get("/content/rep:policy"), Some(Mutation::Deleted));
    }

    #[test]
    fn identical_policy_is_a_nop() {
        let mut store = store_with_policy();
        let mut ledger = ImportLedger::new();
        acl_import(
            AclHandling::Overwrite,
            &[
                ace("allow", REP_GRANT_ACE, "everyone", &["jcr:read"]),
                ace("allow1", REP_GRANT_ACE, "editors", &["jcr:read"]),
            ],
        )
        .finish(&mut store, &mut ledger)
        .unwrap();
        assert_eq!(ledger.get("/content/rep:policy"), Some(Mutation::Nop));
    }

    #[test]
    fn restrictions_and_unexpected_elements() {
        let mut importer = AclImporter::new("/content", PolicyKind::Acl, AclHandling::Overwrite);
        importer.start_node(&typed(REP_POLICY, REP_ACL));
        importer.start_node(&ace("deny", REP_DENY_ACE, "everyone", &["jcr:write"]));
        importer.start_node(
            &typed("rep:restrictions", REP_RESTRICTIONS)
                .with_property(DocProperty::single("rep:glob", PropertyType::String, "*/x")),
        );
        assert_eq!(importer.state(), AclState::Restriction);
        importer.end_node();
        importer.end_node();
        importer.start_node(&typed("junk", NT_UNSTRUCTURED));
        assert_eq!(importer.state(), AclState::Error);
        importer.start_node(&ace("deny", REP_DENY_ACE, "nobody", &["jcr:all"]));
        assert_eq!(importer.state(), AclState::Error);
        importer.end_node();
        importer.end_node();
        importer.end_node();

        let mut store = store_with_policy();
        importer.finish(&mut store, &mut ImportLedger::new()).unwrap();
        let Some(AccessPolicy::Acl(entries)) = store.access_policy("/content", PolicyKind::Acl).unwrap()
        else {
            unreachable!("policy was just written");
        };
        assert_eq!(entries.len(), 1);
        assert!(!entries[0].allow);
        assert_eq!(entries[0].restrictions["rep:glob"], vec!["*/x".to_string()]);
    }

    #[test]
    fn cug_merge_is_a_union() {
        let mut store = MemoryStore::new();
        let root = store.root();
        store.add_child(root, "content", Some(NT_UNSTRUCTURED)).unwrap();
        store
            .set_access_policy("/content", AccessPolicy::Cug(BTreeSet::from(["a".to_string()])))
            .unwrap();
        let mut importer = AclImporter::new("/content", PolicyKind::Cug, AclHandling::Merge);
        importer.start_node(
            &typed(REP_CUG_POLICY_NODE, REP_CUG_POLICY)
                .with_property(DocProperty::multi(REP_PRINCIPAL_NAMES, PropertyType::String, ["b"])),
        );
        importer.end_node();
        importer.finish(&mut store, &mut ImportLedger::new()).unwrap();
        assert_eq!(
            store.access_policy("/content", PolicyKind::Cug).unwrap(),
            Some(AccessPolicy::Cug(BTreeSet::from(["a".to_string(), "b".to_string()])))
        );
    }
}
