//! # Session Module
//!
//! A session owns the content tree an import runs against.
//!
//! ## Storage Backends
//!
//! - `InMemory`: the tree lives only in the session
//! - `Persistent`: the tree is loaded from a [`RedbStore`] when the session
//!   opens and written back by [`Session::commit`]
//!
//! Each import is one logical transaction. The session snapshots the tree
//! before the document is parsed and restores the snapshot when the import
//! aborts, so a fatal error never leaves a half-merged tree behind.

use std::io::BufRead;
use std::path::Path;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::docview::{DocViewParser, DocViewWriter};
use crate::export;
use crate::filter::WorkspaceFilter;
use crate::importer::{ImportOptions, Importer};
use crate::ledger::ImportLedger;
use crate::primitives::{REP_GROUP, REP_MEMBERS};
use crate::store::{ContentStore, MemoryStore, RedbStore};
use crate::types::{Property, PropertyType, Result, VaultError};

/// Storage backend for a Session.
#[derive(Debug, Default)]
pub enum StorageBackend {
    /// Nothing outlives the session.
    #[default]
    InMemory,
    /// Disk-backed tree using redb.
    Persistent(RedbStore),
}

/// Outcome of one document import.
#[derive(Debug, Clone, Serialize)]
pub struct ImportResult {
    pub ledger: ImportLedger,
    /// Created, modified, deleted and replaced paths.
    pub modified: usize,
    pub errors: usize,
    /// Versionable nodes checked in after the import.
    pub checked_in: usize,
}

/// A content tree plus the backend it came from.
#[derive(Debug, Default)]
pub struct Session {
    store: MemoryStore,
    backend: StorageBackend,
}

impl Session {
    /// Create a new session with an empty in-memory tree.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_store(store: MemoryStore) -> Self {
        Self {
            store,
            backend: StorageBackend::InMemory,
        }
    }

    /// Open or create a redb database and load its tree.
    pub fn with_redb(path: impl AsRef<Path>) -> Result<Self> {
        let redb = RedbStore::open(path)?;
        let store = redb.load()?;
        info!(path = %redb.path().display(), nodes = store.node_count(), "session opened");
        Ok(Self {
            store,
            backend: StorageBackend::Persistent(redb),
        })
    }

    #[must_use]
    pub fn is_persistent(&self) -> bool {
        matches!(self.backend, StorageBackend::Persistent(_))
    }

    #[must_use]
    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut MemoryStore {
        &mut self.store
    }

    // =========================================================================
    // IMPORT
    // =========================================================================

    /// Import one DocView document rooted at `target`.
    ///
    /// Fatal errors roll the tree back to its state before the call. Pending
    /// group memberships are applied afterwards, and versionable nodes are
    /// checked in again when `options.auto_checkin` is set.
    pub fn import_docview<R: BufRead, F: WorkspaceFilter>(
        &mut self,
        input: R,
        target: &str,
        filter: &F,
        options: ImportOptions,
    ) -> Result<ImportResult> {
        let auto_checkin = options.auto_checkin;
        let snapshot = self.store.clone();

        let outcome = {
            let mut importer = Importer::new(&mut self.store, filter, options);
            DocViewParser::new(target)
                .parse(input, &mut importer)
                .map(|()| importer.finish())
        };
        let mut ledger = match outcome {
            Ok(ledger) => ledger,
            Err(e) => {
                warn!(target_path = target, error = %e, "import aborted, tree rolled back");
                self.store = snapshot;
                return Err(e);
            }
        };

        self.apply_memberships(&mut ledger)?;
        let checked_in = if auto_checkin {
            ledger.checkin_pending(&mut self.store)?
        } else {
            0
        };

        let result = ImportResult {
            modified: ledger.num_modified(),
            errors: ledger.num_errors(),
            checked_in,
            ledger,
        };
        info!(
            target_path = target,
            modified = result.modified,
            errors = result.errors,
            "import finished"
        );
        Ok(result)
    }

    /// Add the members an import collected to their existing groups.
    /// Returns the number of groups changed.
    pub fn apply_memberships(&mut self, ledger: &mut ImportLedger) -> Result<usize> {
        let mut changed = 0;
        for (group_id, members) in ledger.take_memberships() {
            let Some(group) = self.store.find_authorizable(&group_id)? else {
                warn!(group = %group_id, "group not found, memberships dropped");
                continue;
            };
            if !self.store.is_node_type(group, REP_GROUP)? {
                warn!(group = %group_id, "authorizable is not a group");
                continue;
            }
            let mut current: Vec<String> = self
                .store
                .property(group, REP_MEMBERS)?
                .map(|p| p.texts().map(str::to_string).collect())
                .unwrap_or_default();
            let before = current.len();
            for member in members {
                if !current.contains(&member) {
                    current.push(member);
                }
            }
            if current.len() == before {
                continue;
            }
            let path = self.store.path_of(group)?;
            let added = current.len() - before;
            self.store.set_property(
                group,
                Property::multi(REP_MEMBERS, PropertyType::WeakReference, current),
            )?;
            debug!(path = %path, added, "members added");
            ledger.on_modified(&path);
            changed += 1;
        }
        Ok(changed)
    }

    /// Check in the versionable nodes an import left checked out.
    pub fn checkin_pending(&mut self, ledger: &mut ImportLedger) -> Result<usize> {
        ledger.checkin_pending(&mut self.store)
    }

    // =========================================================================
    // EXPORT
    // =========================================================================

    /// Serialize the subtree at `path` as a DocView document.
    pub fn export_docview(&self, path: &str) -> Result<String> {
        let node = self
            .store
            .node_at(path)?
            .ok_or_else(|| VaultError::ItemNotFound(path.to_string()))?;
        DocViewWriter::new(&self.store).to_string(node)
    }

    /// Canonical, byte-stable export of the whole tree.
    pub fn export_canonical(&self) -> Result<Vec<u8>> {
        export::export_canonical(&self.store)
    }

    pub fn checksum(&self) -> Result<u64> {
        export::canonical_checksum(&self.store)
    }

    // =========================================================================
    // PERSISTENCE
    // =========================================================================

    /// Write the tree back to disk. A no-op for in-memory sessions.
    pub fn commit(&self) -> Result<()> {
        match &self.backend {
            StorageBackend::InMemory => Ok(()),
            StorageBackend::Persistent(redb) => {
                redb.save(&self.store)?;
                debug!(path = %redb.path().display(), nodes = self.store.node_count(), "committed");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::filter::PathFilter;
    use crate::ledger::Mutation;

    const DOC: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<jcr:root xmlns:jcr="http://www.jcp.org/jcr/1.0" xmlns:nt="http://www.jcp.org/jcr/nt/1.0"
    jcr:primaryType="nt:unstructured" title="Hello">
    <child jcr:primaryType="nt:unstructured"/>
</jcr:root>"#;

    #[test]
    fn import_then_export() {
        let mut session = Session::new();
        let result = session
            .import_docview(DOC.as_bytes(), "/page", &PathFilter::new(), ImportOptions::new())
            .unwrap();
        assert_eq!(result.modified, 2);
        assert_eq!(result.errors, 0);
        let xml = session.export_docview("/page").unwrap();
        assert!(xml.contains("title=\"Hello\""));
        assert!(session.export_docview("/missing").is_err());
    }

    #[test]
    fn fatal_error_rolls_back() {
        let mut session = Session::new();
        session
            .import_docview(DOC.as_bytes(), "/page", &PathFilter::new(), ImportOptions::new())
            .unwrap();
        let before = session.checksum().unwrap();
        let broken = r#"<jcr:root xmlns:jcr="http://www.jcp.org/jcr/1.0" title="changed"><a></jcr:root>"#;
        let err = session
            .import_docview(broken.as_bytes(), "/page", &PathFilter::new(), ImportOptions::new())
            .unwrap_err();
        assert!(matches!(err, VaultError::Parse { .. }));
        assert_eq!(session.checksum().unwrap(), before);
    }

    #[test]
    fn memberships_are_added_to_groups() {
        let doc = r#"<jcr:root xmlns:jcr="http://www.jcp.org/jcr/1.0" xmlns:rep="internal"
    jcr:primaryType="rep:AuthorizableFolder">
    <staff jcr:primaryType="rep:Group" jcr:uuid="G1" rep:principalName="staff" rep:authorizableId="staff" rep:members="{WeakReference}[U1]"/>
</jcr:root>"#;
        let merge = r#"<jcr:root xmlns:jcr="http://www.jcp.org/jcr/1.0" xmlns:rep="internal"
    jcr:primaryType="rep:AuthorizableFolder">
    <staff jcr:primaryType="rep:Group" jcr:uuid="G1" rep:principalName="staff" rep:authorizableId="staff" rep:members="{WeakReference}[U1,U2]"/>
</jcr:root>"#;
        let mut session = Session::new();
        session
            .import_docview(doc.as_bytes(), "/groups", &PathFilter::new(), ImportOptions::new())
            .unwrap();
        let filter = PathFilter::new().with_set(
            crate::filter::FilterSet::new("/groups").with_mode(crate::types::ImportMode::Merge),
        );
        let result = session
            .import_docview(merge.as_bytes(), "/groups", &filter, ImportOptions::new())
            .unwrap();
        assert_eq!(result.ledger.get("/groups/staff"), Some(Mutation::Modified));
        let staff = session.store().node_at("/groups/staff").unwrap().unwrap();
        let members: Vec<String> = session
            .store()
            .property(staff, REP_MEMBERS)
            .unwrap()
            .unwrap()
            .texts()
            .map(str::to_string)
            .collect();
        assert_eq!(members, vec!["U1", "U2"]);
    }

    #[test]
    fn persistent_session_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("content.redb");
        {
            let mut session = Session::with_redb(&path).unwrap();
            assert!(session.is_persistent());
            session
                .import_docview(DOC.as_bytes(), "/page", &PathFilter::new(), ImportOptions::new())
                .unwrap();
            session.commit().unwrap();
        }
        let session = Session::with_redb(&path).unwrap();
        assert!(session.store().node_at("/page/child").unwrap().is_some());
    }
}
