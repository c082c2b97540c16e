//! # redb-backed Persistence
//!
//! `RedbStore` keeps the content tree in an embedded redb database:
//! - ACID write transactions (one per commit)
//! - crash safety through copy-on-write B-trees
//! - zero configuration
//!
//! Imports never run against the database directly. A session loads the
//! tree into a [`MemoryStore`], the import mutates that, and
//! [`RedbStore::save`] writes the result back in a single transaction. A
//! failed import therefore never leaves a half-merged tree on disk.

use std::path::{Path, PathBuf};

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{MemoryStore, PolicyKind};
use crate::export::{CanonicalNode, CanonicalPolicy, CanonicalTree};
use crate::types::{Result, VaultError};

/// Node records: path -> postcard(`StoredNode`)
const NODES: TableDefinition<&str, &[u8]> = TableDefinition::new("nodes");

/// Access policies: "path#kind" -> postcard(`CanonicalPolicy`)
const POLICIES: TableDefinition<&str, &[u8]> = TableDefinition::new("policies");

/// Namespace registry: prefix -> uri
const NAMESPACES: TableDefinition<&str, &str> = TableDefinition::new("namespaces");

/// Metadata: key -> u64
const METADATA: TableDefinition<&str, u64> = TableDefinition::new("metadata");

const META_NODE_COUNT: &str = "node_count";
const META_POLICY_COUNT: &str = "policy_count";
const META_IDENTIFIER_SEED: &str = "identifier_seed";

/// A node record plus its position in the pre-order walk, so that sibling
/// order survives the path-keyed table.
#[derive(Debug, Serialize, Deserialize)]
struct StoredNode {
    order: u64,
    node: CanonicalNode,
}

fn io_err(e: impl std::fmt::Display) -> VaultError {
    VaultError::IoError(e.to_string())
}

fn ser_err(e: impl std::fmt::Display) -> VaultError {
    VaultError::SerializationError(e.to_string())
}

/// Disk persistence for a content tree.
pub struct RedbStore {
    db: Database,
    path: PathBuf,
}

impl std::fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl RedbStore {
    /// Open or create a database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = Database::create(path.as_ref()).map_err(io_err)?;
        {
            let write_txn = db.begin_write().map_err(io_err)?;
            let _ = write_txn.open_table(NODES).map_err(io_err)?;
            let _ = write_txn.open_table(POLICIES).map_err(io_err)?;
            let _ = write_txn.open_table(NAMESPACES).map_err(io_err)?;
            let _ = write_txn.open_table(METADATA).map_err(io_err)?;
            write_txn.commit().map_err(io_err)?;
        }
        Ok(Self {
            db,
            path: path.as_ref().to_path_buf(),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of stored nodes, read from metadata.
    pub fn node_count(&self) -> Result<u64> {
        self.metadata(META_NODE_COUNT)
    }

    /// Number of stored access policies.
    pub fn policy_count(&self) -> Result<u64> {
        self.metadata(META_POLICY_COUNT)
    }

    fn metadata(&self, key: &str) -> Result<u64> {
        let read_txn = self.db.begin_read().map_err(io_err)?;
        let table = read_txn.open_table(METADATA).map_err(io_err)?;
        Ok(table
            .get(key)
            .map_err(io_err)?
            .map(|v| v.value())
            .unwrap_or(0))
    }

    /// Load the persisted tree. An empty database yields an empty store.
    pub fn load(&self) -> Result<MemoryStore> {
        let read_txn = self.db.begin_read().map_err(io_err)?;

        let mut stored = Vec::new();
        {
            let table = read_txn.open_table(NODES).map_err(io_err)?;
            for entry in table.iter().map_err(io_err)? {
                let (_, value) = entry.map_err(io_err)?;
                let node: StoredNode = postcard::from_bytes(value.value()).map_err(ser_err)?;
                stored.push(node);
            }
        }
        if stored.is_empty() {
            debug!(path = %self.path.display(), "empty database, starting from a new store");
            return Ok(MemoryStore::new());
        }
        stored.sort_by_key(|s| s.order);

        let mut policies = Vec::new();
        {
            let table = read_txn.open_table(POLICIES).map_err(io_err)?;
            for entry in table.iter().map_err(io_err)? {
                let (_, value) = entry.map_err(io_err)?;
                let policy: CanonicalPolicy =
                    postcard::from_bytes(value.value()).map_err(ser_err)?;
                policies.push(policy);
            }
        }

        let mut namespaces = Vec::new();
        {
            let table = read_txn.open_table(NAMESPACES).map_err(io_err)?;
            for entry in table.iter().map_err(io_err)? {
                let (prefix, uri) = entry.map_err(io_err)?;
                namespaces.push((prefix.value().to_string(), uri.value().to_string()));
            }
        }

        let identifier_seed = {
            let table = read_txn.open_table(METADATA).map_err(io_err)?;
            table
                .get(META_IDENTIFIER_SEED)
                .map_err(io_err)?
                .map(|v| v.value())
                .unwrap_or(1)
        };

        CanonicalTree {
            nodes: stored.into_iter().map(|s| s.node).collect(),
            policies,
            namespaces,
            identifier_seed,
        }
        .to_store()
    }

    /// Replace the persisted tree with the content of `store`, atomically.
    pub fn save(&self, store: &MemoryStore) -> Result<()> {
        let tree = CanonicalTree::from_store(store)?;
        let write_txn = self.db.begin_write().map_err(io_err)?;
        {
            write_txn.delete_table(NODES).map_err(io_err)?;
            write_txn.delete_table(POLICIES).map_err(io_err)?;
            write_txn.delete_table(NAMESPACES).map_err(io_err)?;

            let mut nodes = write_txn.open_table(NODES).map_err(io_err)?;
            for (order, node) in tree.nodes.iter().enumerate() {
                let record = StoredNode {
                    order: order as u64,
                    node: node.clone(),
                };
                let bytes = postcard::to_allocvec(&record).map_err(ser_err)?;
                nodes
                    .insert(node.path.as_str(), bytes.as_slice())
                    .map_err(io_err)?;
            }

            let mut policies = write_txn.open_table(POLICIES).map_err(io_err)?;
            for entry in &tree.policies {
                let key = policy_key(&entry.path, entry.policy.kind());
                let bytes = postcard::to_allocvec(entry).map_err(ser_err)?;
                policies
                    .insert(key.as_str(), bytes.as_slice())
                    .map_err(io_err)?;
            }

            let mut namespaces = write_txn.open_table(NAMESPACES).map_err(io_err)?;
            for (prefix, uri) in &tree.namespaces {
                namespaces
                    .insert(prefix.as_str(), uri.as_str())
                    .map_err(io_err)?;
            }

            let mut metadata = write_txn.open_table(METADATA).map_err(io_err)?;
            metadata
                .insert(META_NODE_COUNT, tree.nodes.len() as u64)
                .map_err(io_err)?;
            metadata
                .insert(META_POLICY_COUNT, tree.policies.len() as u64)
                .map_err(io_err)?;
            metadata
                .insert(META_IDENTIFIER_SEED, tree.identifier_seed)
                .map_err(io_err)?;
        }
        write_txn.commit().map_err(io_err)?;
        debug!(nodes = tree.nodes.len(), "tree saved");
        Ok(())
    }
}

fn policy_key(path: &str, kind: PolicyKind) -> String {
    let suffix = match kind {
        PolicyKind::Acl => "acl",
        PolicyKind::Cug => "cug",
        PolicyKind::Principal => "principal",
    };
    format!("{path}#{suffix}")
}
