//! # Import Ledger
//!
//! Per-path record of what an import did, plus the obligations it leaves
//! for the caller: pending checkins, path remaps and group memberships.
//!
//! Invariants:
//! - a path marked [`Mutation::Error`] keeps that mark
//! - `modified` never downgrades `created` or `replaced`
//! - `nop` only fills paths with no record yet

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::store::{ContentStore, is_descendant_or_self};
use crate::types::Result;

/// Kind of change recorded for one path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mutation {
    Created,
    Modified,
    Deleted,
    Replaced,
    Missing,
    Nop,
    Error,
}

impl Mutation {
    /// Single-letter code used in listings.
    #[must_use]
    pub const fn code(self) -> char {
        match self {
            Self::Created => 'A',
            Self::Modified => 'U',
            Self::Deleted => 'D',
            Self::Replaced => 'R',
            Self::Missing => '!',
            Self::Nop => '-',
            Self::Error => 'E',
        }
    }

    /// Whether the path's content changed in the store.
    #[must_use]
    pub const fn is_change(self) -> bool {
        matches!(
            self,
            Self::Created | Self::Modified | Self::Deleted | Self::Replaced
        )
    }
}

// =============================================================================
// PATH REMAP
// =============================================================================

/// Old path to new path redirections.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathRemap {
    entries: BTreeMap<String, String>,
}

impl PathRemap {
    pub fn insert(&mut self, from: impl Into<String>, to: impl Into<String>) {
        self.entries.insert(from.into(), to.into());
    }

    /// Map a path through the longest remapped ancestor-or-self.
    #[must_use]
    pub fn map(&self, path: &str) -> String {
        let best = self
            .entries
            .iter()
            .filter(|(from, _)| is_descendant_or_self(path, from))
            .max_by_key(|(from, _)| from.len());
        match best {
            Some((from, to)) if from.as_str() == "/" => {
                format!("{}{}", to.trim_end_matches('/'), path)
            }
            Some((from, to)) => format!("{to}{}", &path[from.len()..]),
            None => path.to_string(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(a, b)| (a.as_str(), b.as_str()))
    }
}

// =============================================================================
// LEDGER
// =============================================================================

/// Everything one import did to the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportLedger {
    mods: BTreeMap<String, Mutation>,
    errors: BTreeMap<String, String>,
    to_version: BTreeSet<String>,
    remap: PathRemap,
    memberships: BTreeMap<String, Vec<String>>,
}

impl ImportLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&mut self, path: &str, mutation: Mutation) {
        match self.mods.get(path) {
            Some(Mutation::Error) => {}
            _ => {
                self.mods.insert(path.to_string(), mutation);
            }
        }
    }

    pub fn on_created(&mut self, path: &str) {
        self.record(path, Mutation::Created);
    }

    pub fn on_modified(&mut self, path: &str) {
        if matches!(
            self.mods.get(path),
            Some(Mutation::Created | Mutation::Replaced)
        ) {
            return;
        }
        self.record(path, Mutation::Modified);
    }

    pub fn on_deleted(&mut self, path: &str) {
        self.record(path, Mutation::Deleted);
    }

    pub fn on_replaced(&mut self, path: &str) {
        self.record(path, Mutation::Replaced);
    }

    pub fn on_missing(&mut self, path: &str) {
        self.record(path, Mutation::Missing);
    }

    pub fn on_nop(&mut self, path: &str) {
        if !self.mods.contains_key(path) {
            self.mods.insert(path.to_string(), Mutation::Nop);
        }
    }

    /// Mark `path` as failed. The first error message is kept.
    pub fn on_error(&mut self, path: &str, message: impl Into<String>) {
        self.mods.insert(path.to_string(), Mutation::Error);
        self.errors
            .entry(path.to_string())
            .or_insert_with(|| message.into());
    }

    #[must_use]
    pub fn get(&self, path: &str) -> Option<Mutation> {
        self.mods.get(path).copied()
    }

    /// Records in path order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, Mutation)> {
        self.mods.iter().map(|(p, m)| (p.as_str(), *m))
    }

    #[must_use]
    pub fn error(&self, path: &str) -> Option<&str> {
        self.errors.get(path).map(String::as_str)
    }

    pub fn errors(&self) -> impl Iterator<Item = (&str, &str)> {
        self.errors.iter().map(|(p, m)| (p.as_str(), m.as_str()))
    }

    /// Number of created, modified, deleted and replaced paths. Missing
    /// and failed paths are counted elsewhere.
    #[must_use]
    pub fn num_modified(&self) -> usize {
        self.mods.values().filter(|m| m.is_change()).count()
    }

    #[must_use]
    pub fn num_errors(&self) -> usize {
        self.errors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mods.is_empty()
    }

    // -------------------------------------------------------------------------
    // Obligations
    // -------------------------------------------------------------------------

    /// Remember that `path` was checked out and must be checked in again.
    pub fn register_checkin(&mut self, path: &str) {
        self.to_version.insert(path.to_string());
    }

    pub fn pending_checkins(&self) -> impl Iterator<Item = &str> {
        self.to_version.iter().map(String::as_str)
    }

    pub fn remap(&mut self, from: impl Into<String>, to: impl Into<String>) {
        self.remap.insert(from, to);
    }

    #[must_use]
    pub fn path_remap(&self) -> &PathRemap {
        &self.remap
    }

    /// Record members declared for a group that were not applied yet.
    pub fn add_memberships(&mut self, group_id: &str, members: impl IntoIterator<Item = String>) {
        let pending = self.memberships.entry(group_id.to_string()).or_default();
        for member in members {
            if !pending.contains(&member) {
                pending.push(member);
            }
        }
    }

    #[must_use]
    pub fn memberships(&self) -> &BTreeMap<String, Vec<String>> {
        &self.memberships
    }

    pub fn take_memberships(&mut self) -> BTreeMap<String, Vec<String>> {
        std::mem::take(&mut self.memberships)
    }

    /// Fold another ledger into this one, honouring the record invariants.
    pub fn merge(&mut self, other: Self) {
        for (path, mutation) in other.mods {
            match mutation {
                Mutation::Error => {
                    let message = other.errors.get(&path).cloned().unwrap_or_default();
                    self.on_error(&path, message);
                }
                Mutation::Modified => self.on_modified(&path),
                Mutation::Nop => self.on_nop(&path),
                other_kind => self.record(&path, other_kind),
            }
        }
        self.to_version.extend(other.to_version);
        for (from, to) in other.remap.entries {
            self.remap.insert(from, to);
        }
        for (group, members) in other.memberships {
            self.add_memberships(&group, members);
        }
    }

    /// Check in every node that the import checked out. Failures become
    /// ledger errors. Returns the number of successful checkins.
    pub fn checkin_pending<S: ContentStore>(&mut self, store: &mut S) -> Result<usize> {
        let pending = std::mem::take(&mut self.to_version);
        let mut done = 0;
        // deepest first, so that a parent checkin does not lock its children
        for path in pending.iter().rev() {
            let Some(node) = store.node_at(path)? else {
                continue;
            };
            match store.checkin(node) {
                Ok(()) => done += 1,
                Err(e) => {
                    warn!(path = %path, error = %e, "checkin failed");
                    self.on_error(path, e.to_string());
                }
            }
        }
        Ok(done)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::primitives::{MIX_VERSIONABLE, NT_UNSTRUCTURED};
    use crate::store::MemoryStore;

    #[test]
    fn error_is_sticky() {
        let mut ledger = ImportLedger::new();
        ledger.on_error("/a", "boom");
        ledger.on_created("/a");
        ledger.on_modified("/a");
        ledger.on_nop("/a");
        ledger.on_deleted("/a");
        assert_eq!(ledger.get("/a"), Some(Mutation::Error));
        assert_eq!(ledger.error("/a"), Some("boom"));
    }

    #[test]
    fn modified_keeps_created() {
        let mut ledger = ImportLedger::new();
        ledger.on_created("/a");
        ledger.on_modified("/a");
        assert_eq!(ledger.get("/a"), Some(Mutation::Created));
        ledger.on_replaced("/b");
        ledger.on_modified("/b");
        assert_eq!(ledger.get("/b"), Some(Mutation::Replaced));
    }

    #[test]
    fn nop_never_overwrites() {
        let mut ledger = ImportLedger::new();
        ledger.on_modified("/a");
        ledger.on_nop("/a");
        ledger.on_nop("/b");
        assert_eq!(ledger.get("/a"), Some(Mutation::Modified));
        assert_eq!(ledger.get("/b"), Some(Mutation::Nop));
        assert_eq!(ledger.num_modified(), 1);
    }

    #[test]
    fn missing_and_errors_are_not_changes() {
        let mut ledger = ImportLedger::new();
        ledger.on_created("/a");
        ledger.on_deleted("/b");
        ledger.on_missing("/c");
        ledger.on_error("/d", "boom");
        assert_eq!(ledger.num_modified(), 2);
        assert_eq!(ledger.num_errors(), 1);
    }

    #[test]
    fn remap_uses_longest_prefix() {
        let mut remap = PathRemap::default();
        remap.insert("/a", "/x");
        remap.insert("/a/b", "/y");
        assert_eq!(remap.map("/a/c"), "/x/c");
        assert_eq!(remap.map("/a/b/c"), "/y/c");
        assert_eq!(remap.map("/a/bc"), "/x/bc");
        assert_eq!(remap.map("/q"), "/q");
    }

    #[test]
    fn merge_respects_invariants() {
        let mut first = ImportLedger::new();
        first.on_created("/a");
        first.on_error("/b", "bad");
        let mut second = ImportLedger::new();
        second.on_modified("/a");
        second.on_created("/b");
        second.on_deleted("/c");
        second.register_checkin("/c");
        second.add_memberships("g", vec!["u1".to_string()]);
        first.merge(second);
        assert_eq!(first.get("/a"), Some(Mutation::Created));
        assert_eq!(first.get("/b"), Some(Mutation::Error));
        assert_eq!(first.get("/c"), Some(Mutation::Deleted));
        assert_eq!(first.pending_checkins().count(), 1);
        assert_eq!(first.memberships()["g"], vec!["u1".to_string()]);
    }

    #[test]
    fn checkin_pending_checks_nodes_in() {
        let mut store = MemoryStore::new();
        let root = store.root();
        let v = store.add_child(root, "v", Some(NT_UNSTRUCTURED)).unwrap();
        store.add_mixin(v, MIX_VERSIONABLE).unwrap();
        let mut ledger = ImportLedger::new();
        ledger.register_checkin("/v");
        ledger.register_checkin("/gone");
        assert_eq!(ledger.checkin_pending(&mut store).unwrap(), 1);
        assert!(!store.is_checked_out(v).unwrap());
        assert_eq!(ledger.pending_checkins().count(), 0);
    }
}
