//! # Subtree Stash
//!
//! Parks the children (and optionally the unprotected properties) of a node
//! in a scratch node, so that the node itself can be removed and recreated.
//! Recovery moves everything back. On partial failure the scratch node is
//! left in place with whatever could not be restored.

use std::collections::BTreeSet;

use tracing::{debug, warn};

use crate::ledger::ImportLedger;
use crate::primitives::{NT_UNSTRUCTURED, STASH_NODE_PREFIX, STASH_ROOTS, is_protected_property};
use crate::store::{ContentStore, join_path};
use crate::types::{ImportMode, NodeId, Result, VaultError};

#[derive(Debug)]
pub struct SubtreeStash {
    source: String,
    scratch: NodeId,
    scratch_path: String,
    with_properties: bool,
}

impl SubtreeStash {
    /// Move the children of `node` into a fresh scratch node. With
    /// `with_properties`, also copy its unprotected properties there.
    pub fn stash<S: ContentStore>(store: &mut S, node: NodeId, with_properties: bool) -> Result<Self> {
        let source = store.path_of(node)?;
        let scratch = create_scratch(store)?;
        let scratch_path = store.path_of(scratch)?;

        for child in store.children(node)? {
            let name = store.name_of(child)?;
            store.move_node(child, scratch, &name)?;
        }
        if with_properties {
            let primary = store.primary_type(node)?;
            let mixins = store.mixins(node)?;
            for property in store.properties(node)? {
                if is_protected_property(&property.name)
                    || store
                        .node_types()
                        .is_protected_property(&primary, &mixins, &property.name)
                {
                    continue;
                }
                store.set_property(scratch, property)?;
            }
        }
        debug!(source = %source, scratch = %scratch_path, "subtree stashed");
        Ok(Self {
            source,
            scratch,
            scratch_path,
            with_properties,
        })
    }

    /// Path of the node whose content was stashed.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    #[must_use]
    pub fn scratch_path(&self) -> &str {
        &self.scratch_path
    }

    /// Move the stashed content to `node`. Children whose name already
    /// exists there stay behind. Properties are restored only where unset
    /// when `mode` merges properties. Returns whether the scratch node could
    /// be deleted.
    pub fn recover<S: ContentStore>(
        self,
        store: &mut S,
        node: NodeId,
        mode: ImportMode,
        ledger: &mut ImportLedger,
    ) -> Result<bool> {
        let target = store.path_of(node)?;
        let mut existing = BTreeSet::new();
        for child in store.children(node)? {
            existing.insert(store.name_of(child)?);
        }

        let mut complete = true;
        for child in store.children(self.scratch)? {
            let name = store.name_of(child)?;
            if existing.contains(&name) {
                debug!(path = %join_path(&target, &name), "child already recreated, keeping new one");
                continue;
            }
            if let Err(e) = store.move_node(child, node, &name) {
                let err = VaultError::Recovery {
                    path: join_path(&target, &name),
                    message: e.to_string(),
                };
                warn!(error = %err, scratch = %self.scratch_path, "stashed child not recovered");
                ledger.on_error(&join_path(&target, &name), err.to_string());
                complete = false;
            }
        }

        if self.with_properties {
            let scratch_type = store.primary_type(self.scratch)?;
            for property in store.properties(self.scratch)? {
                if is_protected_property(&property.name)
                    || store
                        .node_types()
                        .is_protected_property(&scratch_type, &[], &property.name)
                {
                    continue;
                }
                if mode.merges_properties() && store.has_property(node, &property.name)? {
                    continue;
                }
                let path = join_path(&target, &property.name);
                if let Err(e) = store.set_property(node, property) {
                    let err = VaultError::Recovery {
                        path: path.clone(),
                        message: e.to_string(),
                    };
                    warn!(error = %err, scratch = %self.scratch_path, "stashed property not recovered");
                    ledger.on_error(&path, err.to_string());
                    complete = false;
                }
            }
        }

        if complete {
            store.remove(self.scratch)?;
            debug!(path = %target, "subtree recovered");
        } else {
            warn!(scratch = %self.scratch_path, "partial recovery, stashed content kept");
        }
        Ok(complete)
    }

    /// Give up on recovery: the content stays in the scratch node and the
    /// source path is recorded as a recovery error naming it.
    pub fn abandon(self, ledger: &mut ImportLedger) {
        let err = VaultError::Recovery {
            path: self.source.clone(),
            message: format!("content left in {}", self.scratch_path),
        };
        warn!(error = %err, "stashed content not recovered");
        ledger.on_error(&self.source, err.to_string());
    }
}

/// Create the scratch node below the first usable stash root.
fn create_scratch<S: ContentStore>(store: &mut S) -> Result<NodeId> {
    let root = store.root();
    let mut candidates = Vec::new();
    for path in STASH_ROOTS {
        if let Some(node) = store.node_at(path)? {
            candidates.push(node);
        }
    }
    candidates.push(root);

    let mut last_error = None;
    for parent in candidates {
        let name = free_name(store, parent)?;
        match store.add_child(parent, &name, Some(NT_UNSTRUCTURED)) {
            Ok(node) => return Ok(node),
            Err(e) => {
                debug!(error = %e, "stash root not writable");
                last_error = Some(e);
            }
        }
    }
    Err(last_error.unwrap_or_else(|| VaultError::constraint("/", "no writable stash location")))
}

fn free_name<S: ContentStore>(store: &S, parent: NodeId) -> Result<String> {
    let mut n: u64 = 0;
    loop {
        let name = format!("{STASH_NODE_PREFIX}{n}");
        if store.child(parent, &name, 1)?.is_none() {
            return Ok(name);
        }
        n += 1;
    }
}
