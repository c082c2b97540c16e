//! # Import Engine
//!
//! [`Importer`] receives parser events and merges each node into the store.
//! For every element it decides between:
//!
//! - **create**: nothing exists yet, two-phase creation (privileged node
//!   creation, then best-effort ordinary properties)
//! - **update**: a node exists at the label or holds the declared
//!   identifier, its type, mixins and properties are reconciled
//! - **replace**: the existing node has another identity, it is recreated
//!   and its content restored through a [`SubtreeStash`]
//! - **redirect**: an identifier conflict sends the subtree below the node
//!   holding the identifier
//! - **adapter**: access control and authorizable subtrees are handed to a
//!   sub-importer
//! - **skip**: out of scope or failed, the subtree is ignored
//!
//! Open nodes live on an explicit stack of frames, so document depth is not
//! bounded by recursion. Only parse, conflict and storage errors abort the
//! run; everything else ends up in the [`ImportLedger`].

pub mod apply;
pub mod options;

pub use options::{AclHandling, ImportOptions};

use tracing::{debug, info, warn};

use crate::adapters::{Adapter, AdapterKind, AclImporter, AuthorizableImporter};
use crate::blob::BlobInfo;
use crate::conflict::{ConflictResolver, Resolution};
use crate::docview::{DocNode, DocViewHandler};
use crate::filter::WorkspaceFilter;
use crate::ledger::ImportLedger;
use crate::primitives::{
    ACCESS_CONTROL_MIXINS, JCR_MIXIN_TYPES, JCR_PRIMARY_TYPE, MIX_SIMPLE_VERSIONABLE,
    STASH_NODE_PREFIX,
};
use crate::stash::SubtreeStash;
use crate::store::{ContentStore, IdentifierBehavior, join_path, parent_path};
use crate::types::{ImportMode, NodeId, Result, VaultError};
use apply::{is_creation_only, node_spec, same_content, to_property};

// =============================================================================
// STACK
// =============================================================================

#[derive(Debug)]
struct StackFrame {
    /// Store node standing for the element. `None` skips the subtree.
    node: Option<NodeId>,
    /// Imported children, in document order.
    children: Vec<NodeId>,
    /// Children of a node created by this import need no label lookup.
    created: bool,
    /// Whether unlisted children may be removed and order restored.
    prune: bool,
}

impl StackFrame {
    const fn skipped() -> Self {
        Self {
            node: None,
            children: Vec::new(),
            created: false,
            prune: false,
        }
    }

    const fn on(node: NodeId, created: bool, prune: bool) -> Self {
        Self {
            node: Some(node),
            children: Vec::new(),
            created,
            prune,
        }
    }
}

#[derive(Debug)]
struct ActiveAdapter {
    /// Open descendants of the adapter root.
    depth: usize,
    parent: NodeId,
    path: String,
    mode: ImportMode,
    adapter: Adapter,
}

/// Why a child missing from the document is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Keep {
    Protected,
    LastMandatory,
}

// =============================================================================
// IMPORTER
// =============================================================================

/// Merges one DocView document into a store.
pub struct Importer<'a, S: ContentStore, F: WorkspaceFilter> {
    store: &'a mut S,
    filter: &'a F,
    options: ImportOptions,
    resolver: ConflictResolver,
    stack: Vec<StackFrame>,
    adapter: Option<ActiveAdapter>,
    ledger: ImportLedger,
}

impl<'a, S: ContentStore, F: WorkspaceFilter> Importer<'a, S, F> {
    pub fn new(store: &'a mut S, filter: &'a F, options: ImportOptions) -> Self {
        Self {
            store,
            filter,
            resolver: ConflictResolver::new(options.conflict_policy),
            options,
            stack: Vec::new(),
            adapter: None,
            ledger: ImportLedger::new(),
        }
    }

    #[must_use]
    pub fn ledger(&self) -> &ImportLedger {
        &self.ledger
    }

    /// End the import and hand over the ledger.
    #[must_use]
    pub fn finish(self) -> ImportLedger {
        self.ledger
    }

    // -------------------------------------------------------------------------
    // Resolution
    // -------------------------------------------------------------------------

    fn import(
        &mut self,
        parent: NodeId,
        parent_created: bool,
        path: &str,
        node: &DocNode,
        mode: ImportMode,
    ) -> Result<StackFrame> {
        if !self.filter.contains(path) {
            if let Some(existing) = self.store.child(parent, &node.name, node.index)? {
                return Ok(StackFrame::on(existing, false, false));
            }
            if !self.filter.is_ancestor(path) {
                debug!(path, "outside the filter, skipped");
                return Ok(StackFrame::skipped());
            }
            let behavior = self.options.conflict_policy.creation_behavior();
            let mut frame = self.create(parent, node, mode, behavior, None)?;
            frame.prune = false;
            return Ok(frame);
        }

        let mut behavior = IdentifierBehavior::CollisionThrow;
        let mut displaced = None;
        let mut existing = None;
        if let Some(identifier) = node.identifier()
            && let Some(holder) = self.store.node_by_identifier(identifier)?
        {
            if self.store.child(parent, &node.name, node.index)? == Some(holder) {
                existing = Some(holder);
            } else {
                let resolution = self.resolver.resolve(
                    self.store,
                    self.filter,
                    parent,
                    holder,
                    identifier,
                    path,
                    &mut self.ledger,
                )?;
                match resolution {
                    Resolution::Redirect { existing } => {
                        return Ok(StackFrame::on(existing, false, false));
                    }
                    Resolution::Create {
                        behavior: chosen,
                        displaced: removed,
                    } => {
                        behavior = chosen;
                        displaced = removed;
                    }
                }
            }
        }
        if existing.is_none() && !parent_created {
            existing = self.store.child(parent, &node.name, node.index)?;
        }

        match existing {
            Some(target) => self.update(parent, target, node, mode, behavior),
            None => self.create(parent, node, mode, behavior, displaced),
        }
    }

    fn create(
        &mut self,
        parent: NodeId,
        node: &DocNode,
        mode: ImportMode,
        behavior: IdentifierBehavior,
        displaced: Option<String>,
    ) -> Result<StackFrame> {
        self.ensure_checked_out(parent)?;
        let spec = node_spec(&*self.store, parent, node)?;
        let id = self.store.import_node(parent, &spec, behavior)?;
        let path = self.store.path_of(id)?;
        if let Some(displaced) = displaced {
            self.ledger.on_deleted(&displaced);
        }
        self.ledger.on_created(&path);
        if node.is_checked_in() && self.store.is_node_type(id, MIX_SIMPLE_VERSIONABLE)? {
            self.ledger.register_checkin(&path);
        }
        debug!(path = %path, node_type = %spec.primary_type, "created");
        self.apply_properties(id, &path, node, mode, true)?;
        Ok(StackFrame::on(id, true, true))
    }

    fn update(
        &mut self,
        parent: NodeId,
        target: NodeId,
        node: &DocNode,
        mode: ImportMode,
        behavior: IdentifierBehavior,
    ) -> Result<StackFrame> {
        let path = self.store.path_of(target)?;
        let current = self.store.identifier_of(target)?;
        let mismatch = matches!(
            (node.identifier(), current.as_deref()),
            (Some(declared), Some(held)) if declared != held
        );
        if mismatch && matches!(mode, ImportMode::Replace | ImportMode::Update) {
            return self.replace(parent, target, &path, node, mode, behavior);
        }
        if mode == ImportMode::Merge {
            self.ledger.on_nop(&path);
            return Ok(StackFrame::on(target, false, true));
        }
        if self.update_in_place(target, &path, node, mode)? {
            self.ledger.on_modified(&path);
        } else {
            self.ledger.on_nop(&path);
        }
        Ok(StackFrame::on(target, false, true))
    }

    /// Recreate `target` with the incoming identity, keeping its content.
    fn replace(
        &mut self,
        parent: NodeId,
        target: NodeId,
        path: &str,
        node: &DocNode,
        mode: ImportMode,
        behavior: IdentifierBehavior,
    ) -> Result<StackFrame> {
        info!(path, "identifier differs, recreating node");
        self.ensure_checked_out(parent)?;
        self.ensure_checked_out(target)?;
        let siblings = self.store.children(parent)?;
        let next = siblings
            .iter()
            .position(|c| *c == target)
            .and_then(|i| siblings.get(i + 1).copied());

        let stash = SubtreeStash::stash(self.store, target, mode != ImportMode::Replace)?;
        self.store.remove(target)?;
        let created = node_spec(&*self.store, parent, node)
            .and_then(|spec| self.store.import_node(parent, &spec, behavior));
        let id = match created {
            Ok(id) => id,
            Err(e) => {
                stash.abandon(&mut self.ledger);
                return Err(e);
            }
        };
        // Stashed content goes back even when the new node is incomplete.
        let populated = self.populate_replacement(parent, id, next, node, mode);
        stash.recover(self.store, id, mode, &mut self.ledger)?;
        let new_path = populated?;
        self.ledger.on_replaced(&new_path);
        Ok(StackFrame::on(id, false, true))
    }

    /// Put a recreated node back in its sibling slot and write its
    /// properties. Returns its path.
    fn populate_replacement(
        &mut self,
        parent: NodeId,
        id: NodeId,
        next: Option<NodeId>,
        node: &DocNode,
        mode: ImportMode,
    ) -> Result<String> {
        if next.is_some() && self.store.is_orderable(parent)? {
            self.store.order_before(parent, id, next)?;
        }
        let path = self.store.path_of(id)?;
        self.apply_properties(id, &path, node, mode, true)?;
        Ok(path)
    }

    /// Reconcile type, mixins and properties of an existing node. Returns
    /// whether anything changed.
    fn update_in_place(&mut self, target: NodeId, path: &str, node: &DocNode, mode: ImportMode) -> Result<bool> {
        let mut changed = false;
        if mode == ImportMode::Replace
            && target != self.store.root()
            && let Some(primary) = node.primary_type()
            && primary != self.store.primary_type(target)?
            && self.filter.includes_property(&join_path(path, JCR_PRIMARY_TYPE))
        {
            self.ensure_checked_out(target)?;
            self.store.set_primary_type(target, primary)?;
            changed = true;
        }
        changed |= self.reconcile_mixins(target, path, node, mode)?;
        changed |= self.apply_properties(target, path, node, mode, false)?;
        Ok(changed)
    }

    fn reconcile_mixins(&mut self, target: NodeId, path: &str, node: &DocNode, mode: ImportMode) -> Result<bool> {
        let declared = node.mixins();
        let current = self.store.mixins(target)?;
        let mut changed = false;
        for mixin in declared.iter().filter(|m| !current.contains(m)) {
            self.ensure_checked_out(target)?;
            self.store.add_mixin(target, mixin)?;
            changed = true;
        }
        if mode != ImportMode::Replace
            || !self.filter.includes_property(&join_path(path, JCR_MIXIN_TYPES))
        {
            return Ok(changed);
        }
        for mixin in current.iter().filter(|m| !declared.contains(m)) {
            if ACCESS_CONTROL_MIXINS.contains(&mixin.as_str())
                && !self.options.acl_handling.drops_mixins()
            {
                continue;
            }
            self.ensure_checked_out(target)?;
            self.store.remove_mixin(target, mixin)?;
            changed = true;
        }
        Ok(changed)
    }

    /// Write the ordinary properties of `doc`. Under replace, properties
    /// the document does not list are removed. Failures are logged and
    /// skipped unless the import is strict or the mode is replace.
    fn apply_properties(
        &mut self,
        node: NodeId,
        path: &str,
        doc: &DocNode,
        mode: ImportMode,
        created: bool,
    ) -> Result<bool> {
        let primary = self.store.primary_type(node)?;
        let mixins = self.store.mixins(node)?;
        let escalate = self.options.strict || mode == ImportMode::Replace;
        let mut changed = false;

        for property in doc.properties.values() {
            if is_creation_only(self.store.node_types(), &primary, &mixins, &property.name)
                || !self.filter.includes_property(&join_path(path, &property.name))
            {
                continue;
            }
            let incoming = if property.is_binary_placeholder() {
                let Some(blob) = self.take_binary(path, &property.name) else {
                    debug!(path, property = %property.name, "no binary supplied, keeping stored value");
                    continue;
                };
                match blob.to_property(&property.name) {
                    Ok(incoming) => incoming,
                    Err(e) => {
                        let e = VaultError::InvalidValue {
                            name: property.name.clone(),
                            message: e.to_string(),
                        };
                        property_failed(path, &property.name, e, escalate)?;
                        continue;
                    }
                }
            } else {
                to_property(property)
            };
            if !created && let Some(existing) = self.store.property(node, &property.name)? {
                if mode == ImportMode::MergeProperties || same_content(&existing, &incoming) {
                    continue;
                }
            }
            self.ensure_checked_out(node)?;
            match self.store.set_property(node, incoming) {
                Ok(()) => changed = true,
                Err(e) => property_failed(path, &property.name, e, escalate)?,
            }
        }

        if mode == ImportMode::Replace && !created {
            for existing in self.store.properties(node)? {
                if doc.properties.contains_key(&existing.name)
                    || is_creation_only(self.store.node_types(), &primary, &mixins, &existing.name)
                    || !self.filter.includes_property(&join_path(path, &existing.name))
                {
                    continue;
                }
                self.ensure_checked_out(node)?;
                match self.store.remove_property(node, &existing.name) {
                    Ok(()) => changed = true,
                    Err(e) => property_failed(path, &existing.name, e, escalate)?,
                }
            }
        }
        Ok(changed)
    }

    fn take_binary(&mut self, path: &str, name: &str) -> Option<BlobInfo> {
        let properties = self.options.binaries.get_mut(path)?;
        let blob = properties.remove(name);
        if properties.is_empty() {
            self.options.binaries.remove(path);
        }
        blob
    }

    // -------------------------------------------------------------------------
    // Versioning
    // -------------------------------------------------------------------------

    /// Check out the nearest checked-in versionable node governing `node`
    /// and remember to check it in again. A failed checkout is logged and
    /// the import carries on.
    fn ensure_checked_out(&mut self, node: NodeId) -> Result<()> {
        if self.store.is_checked_out(node)? {
            return Ok(());
        }
        let mut current = Some(node);
        while let Some(id) = current {
            if self.store.is_node_type(id, MIX_SIMPLE_VERSIONABLE)? {
                let path = self.store.path_of(id)?;
                match self.store.checkout(id) {
                    Ok(()) => {
                        debug!(path = %path, "checked out");
                        self.ledger.register_checkin(&path);
                    }
                    Err(e) => warn!(path = %path, error = %e, "checkout failed"),
                }
                return Ok(());
            }
            current = self.store.parent_of(id)?;
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Children
    // -------------------------------------------------------------------------

    /// Register `child` with the open frame of `parent`, if it really is a
    /// child there.
    fn adopt(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        if self.store.parent_of(child)? != Some(parent) {
            return Ok(());
        }
        if let Some(frame) = self.stack.last_mut()
            && frame.node == Some(parent)
            && !frame.children.contains(&child)
        {
            frame.children.push(child);
        }
        Ok(())
    }

    fn keep_reason(&self, parent: NodeId, child: NodeId) -> Result<Option<Keep>> {
        let primary = self.store.primary_type(parent)?;
        let mixins = self.store.mixins(parent)?;
        let name = self.store.name_of(child)?;
        let child_type = self.store.primary_type(child)?;
        let Some(def) = self
            .store
            .node_types()
            .child_definition(&primary, &mixins, &name, &child_type)
        else {
            return Ok(None);
        };
        if def.protected {
            return Ok(Some(Keep::Protected));
        }
        if def.mandatory && !def.is_residual() {
            let mut others = 0;
            for sibling in self.store.children(parent)? {
                if sibling != child && self.store.name_of(sibling)? == name {
                    others += 1;
                }
            }
            if others == 0 {
                return Ok(Some(Keep::LastMandatory));
            }
        }
        Ok(None)
    }

    /// Remove children of `node` that the document does not list.
    fn prune(&mut self, node: NodeId, seen: &[NodeId]) -> Result<()> {
        let mut unlisted = Vec::new();
        for child in self.store.children(node)? {
            if !seen.contains(&child) {
                unlisted.push((child, self.store.path_of(child)?));
            }
        }
        for (child, path) in unlisted {
            if !self.filter.contains(&path)
                || self.filter.import_mode(&path) != ImportMode::Replace
                || self.options.hints.contains(&path)
                || self.store.name_of(child)?.starts_with(STASH_NODE_PREFIX)
            {
                continue;
            }
            match self.keep_reason(node, child)? {
                Some(Keep::Protected) => {
                    debug!(path = %path, "protected child kept");
                    continue;
                }
                Some(Keep::LastMandatory) => {
                    warn!(path = %path, "refusing to delete the last mandatory child");
                    self.ledger
                        .on_error(&path, "cannot delete the last mandatory child node");
                    continue;
                }
                None => {}
            }
            self.ensure_checked_out(node)?;
            match self.store.remove(child) {
                Ok(()) => {
                    debug!(path = %path, "deleted");
                    self.ledger.on_deleted(&path);
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(path = %path, error = %e, "child could not be deleted");
                    self.ledger.on_error(&path, e.to_string());
                }
            }
        }
        Ok(())
    }

    /// Put the listed children of `node` into document order.
    fn restore_order(&mut self, node: NodeId, seen: &[NodeId]) -> Result<()> {
        if seen.len() < 2 || !self.store.is_orderable(node)? {
            return Ok(());
        }
        let current: Vec<NodeId> = self
            .store
            .children(node)?
            .into_iter()
            .filter(|c| seen.contains(c))
            .collect();
        let wanted: Vec<NodeId> = seen.iter().copied().filter(|c| current.contains(c)).collect();
        if current == wanted {
            return Ok(());
        }
        let path = self.store.path_of(node)?;
        self.ensure_checked_out(node)?;
        for pair in wanted.windows(2).rev() {
            if let Err(e) = self.store.order_before(node, pair[0], Some(pair[1])) {
                if e.is_fatal() {
                    return Err(e);
                }
                warn!(path = %path, error = %e, "child order not restored");
                self.ledger.on_error(&path, e.to_string());
                return Ok(());
            }
        }
        debug!(path = %path, "child order restored");
        self.ledger.on_modified(&path);
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Entry points per element
    // -------------------------------------------------------------------------

    fn record_failure(&mut self, path: &str, mode: ImportMode, error: &VaultError) {
        if mode == ImportMode::Replace {
            warn!(path, error = %error, "node failed, subtree skipped");
            self.ledger.on_error(path, error.to_string());
        } else {
            debug!(path, error = %error, mode = %mode, "node not applied, subtree skipped");
            self.ledger.on_nop(path);
        }
    }

    /// A `jcr:root` element imported at `/` updates the store root.
    fn start_root_update(&mut self, node: &DocNode) -> Result<()> {
        let root = self.store.root();
        let in_scope = self.filter.contains("/");
        let mode = self.filter.import_mode("/");
        if in_scope && mode != ImportMode::Merge {
            match self.update_in_place(root, "/", node, mode) {
                Ok(true) => self.ledger.on_modified("/"),
                Ok(false) => self.ledger.on_nop("/"),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => self.record_failure("/", mode, &e),
            }
        }
        self.stack.push(StackFrame::on(root, false, in_scope));
        Ok(())
    }

    fn start_adapter(
        &mut self,
        kind: AdapterKind,
        parent: NodeId,
        path: &str,
        node: &DocNode,
        mode: ImportMode,
    ) -> Result<()> {
        let adapter = match kind.policy_kind() {
            Some(policy_kind) => {
                let target = self.store.path_of(parent)?;
                if self.options.acl_handling == AclHandling::Ignore || !self.filter.contains(&target) {
                    debug!(path, "access control skipped");
                    self.stack.push(StackFrame::skipped());
                    return Ok(());
                }
                self.ensure_checked_out(parent)?;
                let mut acl = AclImporter::new(target, policy_kind, self.options.acl_handling);
                acl.start_node(node);
                Adapter::Acl(acl)
            }
            None => {
                if !self.filter.contains(path) {
                    debug!(path, "authorizable outside the filter, skipped");
                    self.stack.push(StackFrame::skipped());
                    return Ok(());
                }
                self.ensure_checked_out(parent)?;
                Adapter::Authorizable(AuthorizableImporter::new(
                    parent,
                    path,
                    node.clone(),
                    mode,
                    self.options.conflict_policy.creation_behavior(),
                ))
            }
        };
        debug!(path, adapter = ?kind, "subtree handed to sub-importer");
        self.adapter = Some(ActiveAdapter {
            depth: 0,
            parent,
            path: path.to_string(),
            mode,
            adapter,
        });
        Ok(())
    }

    fn finish_adapter(&mut self, active: ActiveAdapter) -> Result<()> {
        match active.adapter.finish(self.store, &mut self.ledger) {
            Ok(Some(node)) => self.adopt(active.parent, node),
            Ok(None) => Ok(()),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                self.record_failure(&active.path, active.mode, &e);
                Ok(())
            }
        }
    }
}

/// Escalate or log a failed property write.
fn property_failed(path: &str, name: &str, error: VaultError, escalate: bool) -> Result<()> {
    if escalate || error.is_fatal() {
        return Err(error);
    }
    warn!(path, property = name, error = %error, "property not applied");
    Ok(())
}

// =============================================================================
// EVENTS
// =============================================================================

impl<S: ContentStore, F: WorkspaceFilter> DocViewHandler for Importer<'_, S, F> {
    fn start_prefix_mapping(&mut self, prefix: &str, uri: &str) -> Result<()> {
        match self.store.namespace_uri(prefix) {
            Some(existing) if existing == uri => {}
            Some(existing) => {
                warn!(prefix, uri, existing = %existing, "prefix already mapped, keeping the store mapping");
            }
            None => {
                if let Err(e) = self.store.register_namespace(prefix, uri) {
                    warn!(prefix, uri, error = %e, "namespace not registered");
                }
            }
        }
        Ok(())
    }

    fn start_node(&mut self, path: &str, node: &DocNode, _parent: Option<&DocNode>, line: u64) -> Result<()> {
        if let Some(active) = self.adapter.as_mut() {
            active.depth += 1;
            active.adapter.start_node(node);
            return Ok(());
        }

        let (parent, parent_created) = match self.stack.last() {
            Some(StackFrame { node: None, .. }) => {
                self.stack.push(StackFrame::skipped());
                return Ok(());
            }
            Some(StackFrame {
                node: Some(parent),
                created,
                ..
            }) => (*parent, *created),
            None if node.is_root_marker() => return self.start_root_update(node),
            None => {
                let at = parent_path(path).unwrap_or("/");
                let parent = self
                    .store
                    .node_at(at)?
                    .ok_or_else(|| VaultError::ItemNotFound(at.to_string()))?;
                (parent, false)
            }
        };

        let path = self.ledger.path_remap().map(path);
        let mode = self.filter.import_mode(&path);
        debug!(path = %path, line, "node");

        if let Some(kind) = AdapterKind::for_node(node, self.store.node_types()) {
            return self.start_adapter(kind, parent, &path, node, mode);
        }

        match self.import(parent, parent_created, &path, node, mode) {
            Ok(frame) => {
                if let Some(child) = frame.node {
                    self.adopt(parent, child)?;
                }
                self.stack.push(frame);
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                self.record_failure(&path, mode, &e);
                if let Some(existing) = self.store.child(parent, &node.name, node.index)? {
                    self.adopt(parent, existing)?;
                }
                self.stack.push(StackFrame::skipped());
            }
        }
        Ok(())
    }

    fn end_node(&mut self, _path: &str, _node: &DocNode) -> Result<()> {
        if let Some(active) = self.adapter.as_mut() {
            if active.depth > 0 {
                active.depth -= 1;
                active.adapter.end_node();
                return Ok(());
            }
            if let Some(active) = self.adapter.take() {
                self.finish_adapter(active)?;
            }
            return Ok(());
        }

        let Some(frame) = self.stack.pop() else {
            return Ok(());
        };
        if let (Some(node), true) = (frame.node, frame.prune) {
            self.prune(node, &frame.children)?;
            self.restore_order(node, &frame.children)?;
        }
        Ok(())
    }

    /// Attachments for nodes the document never mentioned.
    fn end_document(&mut self) -> Result<()> {
        let leftover = std::mem::take(&mut self.options.binaries);
        for (path, properties) in leftover {
            let node = match self.store.node_at(&path) {
                Ok(Some(node)) => node,
                Ok(None) => {
                    debug!(path = %path, "binary target missing");
                    self.ledger.on_missing(&path);
                    continue;
                }
                Err(e) => {
                    self.ledger.on_error(&path, e.to_string());
                    continue;
                }
            };
            for (name, blob) in properties {
                let result = blob.to_property(&name).and_then(|property| {
                    self.ensure_checked_out(node)?;
                    self.store.set_property(node, property)
                });
                match result {
                    Ok(()) => self.ledger.on_modified(&path),
                    Err(e) => {
                        warn!(path = %path, property = %name, error = %e, "binary not applied");
                        self.ledger.on_error(&path, e.to_string());
                    }
                }
            }
        }
        Ok(())
    }
}
