//! # Authorizable Importer
//!
//! Buffers a user or group subtree and applies it as a whole once it
//! closes. Existing authorizables are found by id, not by path.
//!
//! | mode | existing authorizable |
//! |---|---|
//! | merge, merge-properties | untouched, declared group members recorded in the ledger |
//! | replace | removed and rebuilt from the document |
//! | update, update-properties | properties substituted in place, `rep:externalId` kept, missing children added |

use tracing::{debug, info, warn};

use crate::docview::DocNode;
use crate::importer::apply::{is_creation_only, node_spec, same_content, to_property};
use crate::ledger::ImportLedger;
use crate::primitives::{REP_AUTHORIZABLE_ID, REP_EXTERNAL_ID, REP_GROUP, REP_MEMBERS};
use crate::store::{ContentStore, IdentifierBehavior};
use crate::types::{ImportMode, NodeId, Result, VaultError};

#[derive(Debug, Clone)]
struct Buffered {
    node: DocNode,
    children: Vec<Buffered>,
}

impl Buffered {
    fn new(node: DocNode) -> Self {
        Self {
            node,
            children: Vec::new(),
        }
    }
}

#[derive(Debug)]
pub struct AuthorizableImporter {
    parent: NodeId,
    /// Path the document puts the authorizable at.
    path: String,
    mode: ImportMode,
    behavior: IdentifierBehavior,
    open: Vec<Buffered>,
}

impl AuthorizableImporter {
    /// Start buffering the authorizable `node`, declared at `path` below
    /// `parent`.
    #[must_use]
    pub fn new(
        parent: NodeId,
        path: impl Into<String>,
        node: DocNode,
        mode: ImportMode,
        behavior: IdentifierBehavior,
    ) -> Self {
        Self {
            parent,
            path: path.into(),
            mode,
            behavior,
            open: vec![Buffered::new(node)],
        }
    }

    /// Id the authorizable is looked up by.
    #[must_use]
    pub fn authorizable_id(&self) -> Option<String> {
        self.open.first().map(|root| id_of(&root.node))
    }

    pub fn start_node(&mut self, node: &DocNode) {
        self.open.push(Buffered::new(node.clone()));
    }

    pub fn end_node(&mut self) {
        if self.open.len() < 2 {
            return;
        }
        if let Some(done) = self.open.pop()
            && let Some(parent) = self.open.last_mut()
        {
            parent.children.push(done);
        }
    }

    /// Apply the buffered subtree. Returns the node now holding the
    /// authorizable.
    pub fn finish<S: ContentStore>(mut self, store: &mut S, ledger: &mut ImportLedger) -> Result<Option<NodeId>> {
        while self.open.len() > 1 {
            self.end_node();
        }
        let Some(root) = self.open.pop() else {
            return Ok(None);
        };
        let id = id_of(&root.node);

        let Some(existing) = store.find_authorizable(&id)? else {
            let node = create_tree(store, self.parent, &root, self.behavior)?;
            let path = store.path_of(node)?;
            debug!(path = %path, authorizable = %id, "authorizable created");
            ledger.on_created(&path);
            return Ok(Some(node));
        };

        let existing_path = store.path_of(existing)?;
        if existing_path != self.path {
            info!(
                declared = %self.path,
                existing = %existing_path,
                authorizable = %id,
                "authorizable exists elsewhere"
            );
            ledger.remap(&self.path, &existing_path);
        }

        match self.mode {
            ImportMode::Merge | ImportMode::MergeProperties => {
                if store.is_node_type(existing, REP_GROUP)?
                    && let Some(members) = root.node.property(REP_MEMBERS)
                {
                    let members: Vec<String> =
                        members.values.iter().filter(|m| !m.is_empty()).cloned().collect();
                    if !members.is_empty() {
                        ledger.add_memberships(&id, members);
                    }
                }
                ledger.on_nop(&existing_path);
                Ok(Some(existing))
            }
            ImportMode::Replace => {
                let parent = store.parent_of(existing)?.unwrap_or(self.parent);
                store.remove(existing)?;
                let node = create_tree(store, parent, &root, self.behavior)?;
                ledger.on_replaced(&store.path_of(node)?);
                Ok(Some(node))
            }
            ImportMode::Update | ImportMode::UpdateProperties => {
                if update_in_place(store, existing, &root, self.behavior)? {
                    ledger.on_modified(&existing_path);
                } else {
                    ledger.on_nop(&existing_path);
                }
                Ok(Some(existing))
            }
        }
    }
}

fn id_of(node: &DocNode) -> String {
    node.property(REP_AUTHORIZABLE_ID)
        .map(|p| p.value().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| node.name.clone())
}

/// Create `root` and its buffered descendants below `parent`.
fn create_tree<S: ContentStore>(
    store: &mut S,
    parent: NodeId,
    root: &Buffered,
    behavior: IdentifierBehavior,
) -> Result<NodeId> {
    let mut created_root = None;
    let mut pending = vec![(parent, root)];
    while let Some((at, buffered)) = pending.pop() {
        let spec = node_spec(&*store, at, &buffered.node)?;
        let node = store.import_node(at, &spec, behavior)?;
        created_root.get_or_insert(node);
        set_properties(store, node, &buffered.node)?;
        pending.extend(buffered.children.iter().rev().map(|c| (node, c)));
    }
    created_root.ok_or_else(|| VaultError::constraint("/", "empty authorizable subtree"))
}

/// Best-effort write of the ordinary properties of `doc`. Returns whether
/// anything changed.
fn set_properties<S: ContentStore>(store: &mut S, node: NodeId, doc: &DocNode) -> Result<bool> {
    let primary = store.primary_type(node)?;
    let mixins = store.mixins(node)?;
    let mut changed = false;
    for property in doc.properties.values() {
        if property.is_binary_placeholder()
            || is_creation_only(store.node_types(), &primary, &mixins, &property.name)
        {
            continue;
        }
        let incoming = to_property(property);
        if store
            .property(node, &property.name)?
            .is_some_and(|existing| same_content(&existing, &incoming))
        {
            continue;
        }
        match store.set_property(node, incoming) {
            Ok(()) => changed = true,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(path = %store.path_of(node)?, property = %property.name, error = %e, "authorizable property skipped");
            }
        }
    }
    Ok(changed)
}

fn update_in_place<S: ContentStore>(
    store: &mut S,
    node: NodeId,
    root: &Buffered,
    behavior: IdentifierBehavior,
) -> Result<bool> {
    let mut changed = set_properties(store, node, &root.node)?;

    let primary = store.primary_type(node)?;
    let mixins = store.mixins(node)?;
    for existing in store.properties(node)? {
        let keep = root.node.property(&existing.name).is_some()
            || existing.name == REP_EXTERNAL_ID
            || is_creation_only(store.node_types(), &primary, &mixins, &existing.name);
        if keep {
            continue;
        }
        store.remove_property(node, &existing.name)?;
        changed = true;
    }

    for child in &root.children {
        if store.child(node, &child.node.name, child.node.index)?.is_none() {
            create_tree(store, node, child, behavior)?;
            changed = true;
        }
    }
    Ok(changed)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::formats::property::DocProperty;
    use crate::ledger::Mutation;
    use crate::primitives::{
        JCR_PRIMARY_TYPE, JCR_UUID, NT_UNSTRUCTURED, REP_AUTHORIZABLE_FOLDER, REP_PRINCIPAL_NAME,
        REP_USER,
    };
    use crate::store::MemoryStore;
    use crate::types::{Property, PropertyType};

    fn authorizable(name: &str, t: &str, uuid: &str) -> DocNode {
        DocNode::new(name, 0)
            .with_property(DocProperty::single(JCR_PRIMARY_TYPE, PropertyType::Name, t))
            .with_property(DocProperty::single(JCR_UUID, PropertyType::Undefined, uuid))
            .with_property(DocProperty::single(REP_PRINCIPAL_NAME, PropertyType::String, name))
            .with_property(DocProperty::single(REP_AUTHORIZABLE_ID, PropertyType::String, name))
    }

    fn users() -> (MemoryStore, NodeId) {
        let mut store = MemoryStore::new();
        let root = store.root();
        let home = store.add_child(root, "home", Some(REP_AUTHORIZABLE_FOLDER)).unwrap();
        (store, home)
    }

    fn import(
        store: &mut MemoryStore,
        parent: NodeId,
        node: DocNode,
        children: &[DocNode],
        mode: ImportMode,
    ) -> ImportLedger {
        let path = format!("/home/{}", node.name);
        let mut importer =
            AuthorizableImporter::new(parent, path, node, mode, IdentifierBehavior::CollisionThrow);
        for child in children {
            importer.start_node(child);
            importer.end_node();
        }
        let mut ledger = ImportLedger::new();
        importer.finish(store, &mut ledger).unwrap();
        ledger
    }

    #[test]
    fn creates_missing_authorizable_with_children() {
        let (mut store, home) = users();
        let user = authorizable("alice", REP_USER, "U-alice")
            .with_property(DocProperty::single("email", PropertyType::String, "a@x"));
        let profile = DocNode::new("profile", 0)
            .with_property(DocProperty::single(JCR_PRIMARY_TYPE, PropertyType::Name, NT_UNSTRUCTURED));
        let ledger = import(&mut store, home, user, &[profile], ImportMode::Replace);
        assert_eq!(ledger.get("/home/alice"), Some(Mutation::Created));
        let alice = store.find_authorizable("alice").unwrap().unwrap();
        assert_eq!(store.identifier_of(alice).unwrap().as_deref(), Some("U-alice"));
        assert!(store.node_at("/home/alice/profile").unwrap().is_some());
        let principal = store.property(alice, REP_PRINCIPAL_NAME).unwrap().unwrap();
        assert_eq!(principal.first_text(), Some("alice"));
    }

    #[test]
    fn merge_records_group_members() {
        let (mut store, home) = users();
        import(&mut store, home, authorizable("staff", REP_GROUP, "G1"), &[], ImportMode::Replace);
        let group = authorizable("staff", REP_GROUP, "G1").with_property(DocProperty::multi(
            REP_MEMBERS,
            PropertyType::WeakReference,
            ["U-alice", "U-bob"],
        ));
        let ledger = import(&mut store, home, group, &[], ImportMode::Merge);
        assert_eq!(ledger.get("/home/staff"), Some(Mutation::Nop));
        assert_eq!(
            ledger.memberships()["staff"],
            vec!["U-alice".to_string(), "U-bob".to_string()]
        );
        let staff = store.find_authorizable("staff").unwrap().unwrap();
        assert!(!store.has_property(staff, REP_MEMBERS).unwrap());
    }

    #[test]
    fn replace_rebuilds_the_subtree() {
        let (mut store, home) = users();
        import(&mut store, home, authorizable("bob", REP_USER, "U-bob"), &[], ImportMode::Replace);
        let bob = store.find_authorizable("bob").unwrap().unwrap();
        store.add_child(bob, "stale", None).unwrap();
        let ledger = import(&mut store, home, authorizable("bob", REP_USER, "U-bob"), &[], ImportMode::Replace);
        assert_eq!(ledger.get("/home/bob"), Some(Mutation::Replaced));
        assert!(store.node_at("/home/bob/stale").unwrap().is_none());
        assert!(store.node_by_identifier("U-bob").unwrap().is_some());
    }

    #[test]
    fn update_keeps_external_id_and_remaps() {
        let (mut store, home) = users();
        let root = store.root();
        let elsewhere = store.add_child(root, "system", Some(REP_AUTHORIZABLE_FOLDER)).unwrap();
        import(&mut store, elsewhere, authorizable("carol", REP_USER, "U-carol"), &[], ImportMode::Replace);
        let carol = store.find_authorizable("carol").unwrap().unwrap();
        store
            .set_property(carol, Property::single(REP_EXTERNAL_ID, PropertyType::String, "carol;ldap"))
            .unwrap();
        store
            .set_property(carol, Property::single("old", PropertyType::String, "x"))
            .unwrap();

        let incoming = authorizable("carol", REP_USER, "U-carol")
            .with_property(DocProperty::single("email", PropertyType::String, "c@x"));
        let ledger = import(&mut store, home, incoming, &[], ImportMode::Update);
        assert_eq!(ledger.get("/system/carol"), Some(Mutation::Modified));
        assert_eq!(ledger.path_remap().map("/home/carol"), "/system/carol");
        assert!(store.has_property(carol, REP_EXTERNAL_ID).unwrap());
        assert!(store.has_property(carol, "email").unwrap());
        assert!(!store.has_property(carol, "old").unwrap());
    }
}
