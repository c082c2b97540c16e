//! # Canonical Export Module
//!
//! A redb file is not bit-identical across runs. The canonical export is:
//! a `postcard` stream of the whole tree in pre-order (children in stored
//! order), followed by the access policies sorted by path and kind, and the
//! namespace table. Two stores with the same content produce the same bytes.
//!
//! The same node records are what [`crate::store::RedbStore`] persists.

use serde::{Deserialize, Serialize};

use crate::formats::name::parse_sns_name;
use crate::primitives::{JCR_IS_CHECKED_OUT, JCR_MIXIN_TYPES, JCR_PRIMARY_TYPE, JCR_UUID};
use crate::store::{
    AccessPolicy, ContentStore, MemoryStore, NodeSpec, PolicyKind, last_label, parent_path,
};
use crate::types::{NodeId, Property, Result, VaultError};

// =============================================================================
// CANONICAL FORMAT
// =============================================================================

/// Magic bytes for canonical export format.
pub const CANONICAL_MAGIC: [u8; 4] = *b"DVMX";

/// Current canonical format version.
pub const CANONICAL_VERSION: u8 = 1;

/// Maximum allowed node count in canonical imports.
///
/// Bounds memory use on corrupted or hostile input.
pub const MAX_IMPORT_NODE_COUNT: u64 = 1_000_000;

/// Header for canonical export files.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CanonicalHeader {
    pub magic: [u8; 4],
    pub version: u8,
    pub node_count: u64,
    pub policy_count: u64,
    /// Checksum of the data section.
    pub checksum: u64,
}

impl CanonicalHeader {
    #[must_use]
    pub fn new(node_count: u64, policy_count: u64, checksum: u64) -> Self {
        Self {
            magic: CANONICAL_MAGIC,
            version: CANONICAL_VERSION,
            node_count,
            policy_count,
            checksum,
        }
    }

    /// Validate the header.
    ///
    /// Error messages stay generic so they do not describe the format.
    pub fn validate(&self) -> Result<()> {
        if self.magic != CANONICAL_MAGIC {
            return Err(VaultError::SerializationError(
                "Invalid file format".to_string(),
            ));
        }
        if self.version != CANONICAL_VERSION {
            return Err(VaultError::SerializationError(
                "Unsupported file version".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// CANONICAL RECORDS
// =============================================================================

/// One node in canonical form. Properties exclude the synthesized identity
/// properties, which are carried by the dedicated fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CanonicalNode {
    pub path: String,
    pub primary_type: String,
    pub mixins: Vec<String>,
    pub identifier: Option<String>,
    pub checked_out: bool,
    pub properties: Vec<Property>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CanonicalPolicy {
    pub path: String,
    pub policy: AccessPolicy,
}

/// A whole store in canonical form.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CanonicalTree {
    /// Pre-order, root first.
    pub nodes: Vec<CanonicalNode>,
    /// Sorted by (path, kind).
    pub policies: Vec<CanonicalPolicy>,
    /// Sorted by prefix.
    pub namespaces: Vec<(String, String)>,
    pub identifier_seed: u64,
}

impl CanonicalTree {
    /// Capture the content of a store.
    pub fn from_store(store: &MemoryStore) -> Result<Self> {
        let mut nodes = Vec::with_capacity(store.node_count());
        let mut pending = vec![store.root()];
        while let Some(node) = pending.pop() {
            nodes.push(canonical_node(store, node)?);
            let mut children = store.children(node)?;
            children.reverse();
            pending.extend(children);
        }

        let mut policies: Vec<(String, PolicyKind, AccessPolicy)> = store
            .policies()
            .map(|(path, p)| (path.to_string(), p.kind(), p.clone()))
            .collect();
        policies.sort_by(|a, b| (&a.0, a.1).cmp(&(&b.0, b.1)));

        Ok(Self {
            nodes,
            policies: policies
                .into_iter()
                .map(|(path, _, policy)| CanonicalPolicy { path, policy })
                .collect(),
            namespaces: store
                .namespaces()
                .iter()
                .map(|(p, u)| (p.clone(), u.clone()))
                .collect(),
            identifier_seed: store.next_identifier_seed(),
        })
    }

    /// Rebuild a store.
    pub fn to_store(&self) -> Result<MemoryStore> {
        let mut store = MemoryStore::new();
        for (prefix, uri) in &self.namespaces {
            store.register_namespace(prefix, uri)?;
        }
        for node in &self.nodes {
            let Some(parent) = parent_path(&node.path) else {
                store.restore_root(&node_spec(node, String::new()))?;
                continue;
            };
            let (name, _) = parse_sns_name(last_label(&node.path))?;
            store.restore_node(parent, &node_spec(node, name))?;
        }
        for entry in &self.policies {
            store.restore_policy(&entry.path, entry.policy.clone());
        }
        store.restore_identifier_seed(self.identifier_seed);
        Ok(store)
    }

    /// Deterministic checksum of the tree.
    ///
    /// Rotate-XOR over the encoded records. Detects accidental corruption.
    /// It is not collision resistant. Use the `crypto-hash` feature for that.
    pub fn checksum(&self) -> Result<u64> {
        let bytes = postcard::to_allocvec(self)
            .map_err(|e| VaultError::SerializationError(format!("Data: {e}")))?;
        let mut hash: u64 = 0;
        for (i, byte) in bytes.iter().enumerate() {
            hash = hash.rotate_left(5) ^ (*byte as u64).rotate_left((i % 61) as u32);
        }
        hash ^= self.identifier_seed.rotate_left(3);
        Ok(hash)
    }
}

/// Canonical record of one store node.
pub fn canonical_node<S: ContentStore>(store: &S, node: NodeId) -> Result<CanonicalNode> {
    let properties = store
        .properties(node)?
        .into_iter()
        .filter(|p| {
            !matches!(
                p.name.as_str(),
                JCR_PRIMARY_TYPE | JCR_MIXIN_TYPES | JCR_UUID | JCR_IS_CHECKED_OUT
            )
        })
        .collect();
    Ok(CanonicalNode {
        path: store.path_of(node)?,
        primary_type: store.primary_type(node)?,
        mixins: store.mixins(node)?,
        identifier: store.identifier_of(node)?,
        checked_out: store.is_checked_out(node)?,
        properties,
    })
}

/// Creation spec for a canonical node.
#[must_use]
pub fn node_spec(node: &CanonicalNode, name: String) -> NodeSpec {
    NodeSpec {
        name,
        primary_type: node.primary_type.clone(),
        mixins: node.mixins.clone(),
        identifier: node.identifier.clone(),
        properties: node.properties.clone(),
        checked_out: node.checked_out,
    }
}

// =============================================================================
// EXPORT FUNCTIONS
// =============================================================================

/// Export a store to canonical postcard format.
///
/// Format:
/// ```text
/// [header_len: u32 LE] [CanonicalHeader (postcard)] [CanonicalTree (postcard)]
/// ```
pub fn export_canonical(store: &MemoryStore) -> Result<Vec<u8>> {
    let canonical = CanonicalTree::from_store(store)?;
    let header = CanonicalHeader::new(
        canonical.nodes.len() as u64,
        canonical.policies.len() as u64,
        canonical.checksum()?,
    );

    let header_bytes = postcard::to_allocvec(&header)
        .map_err(|e| VaultError::SerializationError(format!("Header: {e}")))?;
    let data_bytes = postcard::to_allocvec(&canonical)
        .map_err(|e| VaultError::SerializationError(format!("Data: {e}")))?;

    let mut result = Vec::with_capacity(4 + header_bytes.len() + data_bytes.len());
    result.extend_from_slice(&(header_bytes.len() as u32).to_le_bytes());
    result.extend_from_slice(&header_bytes);
    result.extend_from_slice(&data_bytes);
    Ok(result)
}

/// Import a store from canonical postcard format.
pub fn import_canonical(data: &[u8]) -> Result<MemoryStore> {
    if data.len() < 4 {
        return Err(VaultError::SerializationError("Data too short".to_string()));
    }
    let header_len = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
    if data.len() < 4 + header_len {
        return Err(VaultError::SerializationError(
            "Data too short for header".to_string(),
        ));
    }

    let header: CanonicalHeader = postcard::from_bytes(&data[4..4 + header_len])
        .map_err(|e| VaultError::SerializationError(format!("Header: {e}")))?;
    header.validate()?;

    if header.node_count > MAX_IMPORT_NODE_COUNT {
        return Err(VaultError::SerializationError(format!(
            "Node count {} exceeds maximum allowed {}",
            header.node_count, MAX_IMPORT_NODE_COUNT
        )));
    }

    let canonical: CanonicalTree = postcard::from_bytes(&data[4 + header_len..])
        .map_err(|e| VaultError::SerializationError(format!("Data: {e}")))?;

    let computed = canonical.checksum()?;
    if computed != header.checksum {
        return Err(VaultError::SerializationError(format!(
            "Checksum mismatch: expected {}, got {}",
            header.checksum, computed
        )));
    }
    if canonical.nodes.len() as u64 != header.node_count
        || canonical.policies.len() as u64 != header.policy_count
    {
        return Err(VaultError::SerializationError("Count mismatch".to_string()));
    }

    canonical.to_store()
}

/// Compute the canonical checksum of a store.
pub fn canonical_checksum(store: &MemoryStore) -> Result<u64> {
    CanonicalTree::from_store(store)?.checksum()
}

// =============================================================================
// CRYPTOGRAPHIC HASH SUPPORT
// =============================================================================

/// BLAKE3 hash of the canonical export, as 64 hex characters.
#[cfg(feature = "crypto-hash")]
pub fn canonical_crypto_hash(store: &MemoryStore) -> Result<String> {
    let data = export_canonical(store)?;
    Ok(blake3::hash(&data).to_hex().to_string())
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::primitives::{MIX_REFERENCEABLE, NT_UNSTRUCTURED};
    use crate::types::PropertyType;

    fn sample_store() -> MemoryStore {
        let mut store = MemoryStore::new();
        let root = store.root();
        let a = store.add_child(root, "a", Some(NT_UNSTRUCTURED)).unwrap();
        let b = store.add_child(a, "b", None).unwrap();
        store.add_child(a, "b", None).unwrap();
        store.add_mixin(b, MIX_REFERENCEABLE).unwrap();
        store
            .set_property(b, Property::single("title", PropertyType::String, "Hello"))
            .unwrap();
        store
            .set_access_policy(
                "/a",
                AccessPolicy::Cug(["everyone".to_string()].into_iter().collect()),
            )
            .unwrap();
        store
    }

    #[test]
    fn canonical_roundtrip() {
        let store = sample_store();
        let exported = export_canonical(&store).expect("export");
        let imported = import_canonical(&exported).expect("import");

        assert_eq!(store.node_count(), imported.node_count());
        assert_eq!(
            CanonicalTree::from_store(&store).unwrap(),
            CanonicalTree::from_store(&imported).unwrap()
        );
        let b = imported.node_at("/a/b").unwrap().unwrap();
        assert!(imported.identifier_of(b).unwrap().is_some());
        assert!(imported.node_at("/a/b[2]").unwrap().is_some());
    }

    #[test]
    fn canonical_export_deterministic() {
        let store = sample_store();
        assert_eq!(export_canonical(&store).unwrap(), export_canonical(&store).unwrap());
        assert_eq!(canonical_checksum(&store).unwrap(), canonical_checksum(&store).unwrap());
    }

    #[test]
    fn preorder_keeps_child_order() {
        let store = sample_store();
        let tree = CanonicalTree::from_store(&store).unwrap();
        let paths: Vec<_> = tree.nodes.iter().map(|n| n.path.as_str()).collect();
        assert_eq!(paths, vec!["/", "/a", "/a/b", "/a/b[2]"]);
    }

    #[test]
    fn corruption_is_detected() {
        let store = sample_store();
        let mut exported = export_canonical(&store).unwrap();
        if let Some(last) = exported.last_mut() {
            *last ^= 0xFF;
        }
        assert!(import_canonical(&exported).is_err());
        assert!(import_canonical(&[]).is_err());
        assert!(import_canonical(&[1, 2, 3]).is_err());
    }

    #[test]
    fn header_validation() {
        assert!(CanonicalHeader::new(1, 0, 0).validate().is_ok());
        let mut bad = CanonicalHeader::new(1, 0, 0);
        bad.magic = *b"KREX";
        assert!(bad.validate().is_err());
    }
}
