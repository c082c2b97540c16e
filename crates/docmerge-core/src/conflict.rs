//! # Identifier Conflict Resolution
//!
//! Consulted when an incoming node declares an identifier that already
//! belongs to a node at another location. Exactly one [`ConflictPolicy`] is
//! active per import.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::filter::WorkspaceFilter;
use crate::ledger::ImportLedger;
use crate::store::{ContentStore, IdentifierBehavior, is_descendant_or_self};
use crate::types::{ImportMode, NodeId, Property, Result, VaultError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictPolicy {
    /// Remove the holder only if this import replaces it anyway; abort
    /// otherwise.
    #[default]
    Fail,
    /// Create the incoming node with a fresh identifier.
    CreateNewId,
    /// Remove a conflicting sibling, or continue below the holder.
    LegacySiblingCheck,
    /// Remove the holder unconditionally.
    ForceRemoveConflicting,
}

impl ConflictPolicy {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fail => "fail",
            Self::CreateNewId => "create-new-id",
            Self::LegacySiblingCheck => "legacy-sibling-check",
            Self::ForceRemoveConflicting => "force-remove-conflicting",
        }
    }

    /// Identifier behaviour for content created outside the resolver, such
    /// as subtrees rebuilt by the authorizable importer.
    #[must_use]
    pub const fn creation_behavior(self) -> IdentifierBehavior {
        match self {
            Self::CreateNewId => IdentifierBehavior::CreateNew,
            Self::ForceRemoveConflicting => IdentifierBehavior::RemoveExisting,
            Self::Fail | Self::LegacySiblingCheck => IdentifierBehavior::CollisionThrow,
        }
    }
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictPolicy {
    type Err = VaultError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "fail" => Ok(Self::Fail),
            "create-new-id" => Ok(Self::CreateNewId),
            "legacy-sibling-check" => Ok(Self::LegacySiblingCheck),
            "force-remove-conflicting" => Ok(Self::ForceRemoveConflicting),
            other => Err(VaultError::InvalidValue {
                name: "conflict policy".to_string(),
                message: format!("unknown policy '{other}'"),
            }),
        }
    }
}

/// Outcome of a conflict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Create the incoming node through privileged creation.
    Create {
        behavior: IdentifierBehavior,
        /// Path of the node the store will remove to free the identifier.
        displaced: Option<String>,
    },
    /// Skip the incoming node and import its children below `existing`.
    Redirect { existing: NodeId },
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictResolver {
    policy: ConflictPolicy,
}

impl ConflictResolver {
    #[must_use]
    pub const fn new(policy: ConflictPolicy) -> Self {
        Self { policy }
    }

    #[must_use]
    pub const fn policy(&self) -> ConflictPolicy {
        self.policy
    }

    /// Decide what happens to an incoming node at `incoming_path` (to be
    /// created below `parent`) whose identifier is held by `conflicting`.
    #[allow(clippy::too_many_arguments)]
    pub fn resolve<S: ContentStore, F: WorkspaceFilter>(
        &self,
        store: &mut S,
        filter: &F,
        parent: NodeId,
        conflicting: NodeId,
        identifier: &str,
        incoming_path: &str,
        ledger: &mut ImportLedger,
    ) -> Result<Resolution> {
        let conflicting_path = store.path_of(conflicting)?;
        let parent_path = store.path_of(parent)?;
        debug!(
            identifier,
            existing = %conflicting_path,
            incoming = %incoming_path,
            policy = %self.policy,
            "identifier conflict"
        );

        match self.policy {
            ConflictPolicy::Fail => {
                let replaced_here = filter.contains(&conflicting_path)
                    && filter.import_mode(&conflicting_path) == ImportMode::Replace
                    && !is_descendant_or_self(&parent_path, &conflicting_path);
                if !replaced_here {
                    return Err(VaultError::ReferentialIntegrity {
                        path: incoming_path.to_string(),
                        message: format!(
                            "identifier {identifier} is already used by {conflicting_path}"
                        ),
                    });
                }
                remove_references(store, conflicting, identifier, ledger)?;
                store.remove(conflicting)?;
                ledger.on_deleted(&conflicting_path);
                Ok(Resolution::Create {
                    behavior: IdentifierBehavior::CollisionThrow,
                    displaced: None,
                })
            }
            ConflictPolicy::CreateNewId => Ok(Resolution::Create {
                behavior: IdentifierBehavior::CreateNew,
                displaced: None,
            }),
            ConflictPolicy::ForceRemoveConflicting => Ok(Resolution::Create {
                behavior: IdentifierBehavior::RemoveExisting,
                displaced: Some(conflicting_path),
            }),
            ConflictPolicy::LegacySiblingCheck => {
                let sibling = store.parent_of(conflicting)? == Some(parent);
                if sibling && filter.contains(&conflicting_path) {
                    store.remove(conflicting)?;
                    ledger.on_deleted(&conflicting_path);
                    return Ok(Resolution::Create {
                        behavior: IdentifierBehavior::CollisionThrow,
                        displaced: None,
                    });
                }
                info!(
                    incoming = %incoming_path,
                    existing = %conflicting_path,
                    "continuing import below the node holding the identifier"
                );
                ledger.remap(incoming_path, &conflicting_path);
                Ok(Resolution::Redirect {
                    existing: conflicting,
                })
            }
        }
    }
}

/// Drop every reference value pointing at `target`.
fn remove_references<S: ContentStore>(
    store: &mut S,
    target: NodeId,
    identifier: &str,
    ledger: &mut ImportLedger,
) -> Result<()> {
    for (referrer, name) in store.references(target)? {
        let Some(property) = store.property(referrer, &name)? else {
            continue;
        };
        let remaining: Vec<String> = property
            .texts()
            .filter(|t| *t != identifier)
            .map(str::to_string)
            .collect();
        if property.multiple && !remaining.is_empty() {
            store.set_property(referrer, Property::multi(&name, property.kind, remaining))?;
        } else {
            store.remove_property(referrer, &name)?;
        }
        ledger.on_modified(&store.path_of(referrer)?);
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::filter::{FilterSet, PathFilter};
    use crate::ledger::Mutation;
    use crate::primitives::{MIX_REFERENCEABLE, NT_UNSTRUCTURED};
    use crate::store::MemoryStore;
    use crate::types::PropertyType;

    fn setup() -> (MemoryStore, NodeId, NodeId, String) {
        let mut store = MemoryStore::new();
        let root = store.root();
        let a = store.add_child(root, "a", Some(NT_UNSTRUCTURED)).unwrap();
        let b = store.add_child(root, "b", Some(NT_UNSTRUCTURED)).unwrap();
        let held = store.add_child(a, "held", Some(NT_UNSTRUCTURED)).unwrap();
        store.add_mixin(held, MIX_REFERENCEABLE).unwrap();
        let id = store.identifier_of(held).unwrap().unwrap();
        (store, b, held, id)
    }

    #[test]
    fn policy_names_parse() {
        assert_eq!(
            "legacy_sibling_check".parse::<ConflictPolicy>().unwrap(),
            ConflictPolicy::LegacySiblingCheck
        );
        assert_eq!(ConflictPolicy::CreateNewId.to_string(), "create-new-id");
        assert!("nope".parse::<ConflictPolicy>().is_err());
        assert_eq!(
            ConflictPolicy::CreateNewId.creation_behavior(),
            IdentifierBehavior::CreateNew
        );
    }

    #[test]
    fn fail_removes_holder_scheduled_for_replacement() {
        let (mut store, b, held, id) = setup();
        let root = store.root();
        let referrer = store.add_child(root, "ref", Some(NT_UNSTRUCTURED)).unwrap();
        store
            .set_property(referrer, Property::single("link", PropertyType::Reference, id.clone()))
            .unwrap();
        let mut ledger = ImportLedger::new();
        let resolution = ConflictResolver::new(ConflictPolicy::Fail)
            .resolve(&mut store, &PathFilter::new(), b, held, &id, "/b/new", &mut ledger)
            .unwrap();
        assert!(matches!(resolution, Resolution::Create { .. }));
        assert!(store.node_by_identifier(&id).unwrap().is_none());
        assert!(!store.has_property(referrer, "link").unwrap());
        assert_eq!(ledger.get("/a/held"), Some(Mutation::Deleted));
        assert_eq!(ledger.get("/ref"), Some(Mutation::Modified));
    }

    #[test]
    fn fail_aborts_when_holder_is_out_of_scope() {
        let (mut store, b, held, id) = setup();
        let filter = PathFilter::new().with_set(FilterSet::new("/b"));
        let err = ConflictResolver::new(ConflictPolicy::Fail)
            .resolve(&mut store, &filter, b, held, &id, "/b/new", &mut ImportLedger::new())
            .unwrap_err();
        assert!(matches!(err, VaultError::ReferentialIntegrity { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn fail_aborts_when_holder_is_merged() {
        let (mut store, b, held, id) = setup();
        let filter = PathFilter::new().with_set(FilterSet::new("/").with_mode(ImportMode::Merge));
        assert!(
            ConflictResolver::new(ConflictPolicy::Fail)
                .resolve(&mut store, &filter, b, held, &id, "/b/new", &mut ImportLedger::new())
                .is_err()
        );
    }

    #[test]
    fn create_new_and_force_remove_delegate_to_store() {
        let (mut store, b, held, id) = setup();
        let mut ledger = ImportLedger::new();
        let r = ConflictResolver::new(ConflictPolicy::CreateNewId)
            .resolve(&mut store, &PathFilter::new(), b, held, &id, "/b/n", &mut ledger)
            .unwrap();
        assert_eq!(
            r,
            Resolution::Create {
                behavior: IdentifierBehavior::CreateNew,
                displaced: None
            }
        );
        let r = ConflictResolver::new(ConflictPolicy::ForceRemoveConflicting)
            .resolve(&mut store, &PathFilter::new(), b, held, &id, "/b/n", &mut ledger)
            .unwrap();
        assert_eq!(
            r,
            Resolution::Create {
                behavior: IdentifierBehavior::RemoveExisting,
                displaced: Some("/a/held".to_string())
            }
        );
        assert!(ledger.is_empty());
    }

    #[test]
    fn legacy_redirects_to_non_sibling_holder() {
        let (mut store, b, held, id) = setup();
        let mut ledger = ImportLedger::new();
        let r = ConflictResolver::new(ConflictPolicy::LegacySiblingCheck)
            .resolve(&mut store, &PathFilter::new(), b, held, &id, "/b/n", &mut ledger)
            .unwrap();
        assert_eq!(r, Resolution::Redirect { existing: held });
        assert_eq!(ledger.path_remap().map("/b/n/c"), "/a/held/c");
    }

    #[test]
    fn legacy_removes_sibling_holder() {
        let (mut store, _, held, id) = setup();
        let a = store.node_at("/a").unwrap().unwrap();
        let mut ledger = ImportLedger::new();
        let r = ConflictResolver::new(ConflictPolicy::LegacySiblingCheck)
            .resolve(&mut store, &PathFilter::new(), a, held, &id, "/a/other", &mut ledger)
            .unwrap();
        assert!(matches!(r, Resolution::Create { .. }));
        assert_eq!(ledger.get("/a/held"), Some(Mutation::Deleted));
    }
}
