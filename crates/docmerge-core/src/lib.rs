//! # docmerge-core
//!
//! Streaming DocView import and tree merge engine.
//!
//! A DocView document is an XML serialization of a typed content tree: one
//! element per node, one attribute per property. This crate parses such a
//! document in a single pass and merges it into a [`ContentStore`], honouring
//! a [`WorkspaceFilter`] that scopes which paths are touched and how.
//!
//! ## Pipeline
//!
//! - `docview::DocViewParser` turns XML events into node events
//! - `importer::Importer` merges each node (create, update, replace, skip)
//! - `conflict`, `stash` and `adapters` handle identifier conflicts,
//!   recreated nodes and access-control/authorizable subtrees
//! - `ledger::ImportLedger` records what happened to every path
//!
//! ## Architectural Constraints
//!
//! - Synchronous: the parser drives the importer by direct callbacks
//! - Deterministic: ordered maps everywhere, no randomness
//! - No async, no network dependencies

// =============================================================================
// MODULES
// =============================================================================

pub mod adapters;
pub mod blob;
pub mod conflict;
pub mod docview;
pub mod export;
pub mod filter;
pub mod formats;
pub mod importer;
pub mod ledger;
pub mod nodetype;
pub mod primitives;
pub mod session;
pub mod stash;
pub mod store;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types
// =============================================================================

pub use types::{ErrorKind, ImportMode, NodeId, Property, PropertyType, Result, Value, VaultError};

// =============================================================================
// RE-EXPORTS: Import Engine
// =============================================================================

pub use blob::{BinarySource, BlobInfo};
pub use conflict::{ConflictPolicy, ConflictResolver, Resolution};
pub use docview::{DocNode, DocViewHandler, DocViewParser, DocViewWriter};
pub use filter::{FilterSet, PathFilter, WorkspaceFilter};
pub use importer::{AclHandling, ImportOptions, Importer};
pub use ledger::{ImportLedger, Mutation, PathRemap};
pub use session::{ImportResult, Session, StorageBackend};
pub use stash::SubtreeStash;

// =============================================================================
// RE-EXPORTS: Store
// =============================================================================

pub use nodetype::{ChildDefinition, NodeTypeDefinition, NodeTypeRegistry, PropertyDefinition};
pub use store::{
    AccessControlEntry, AccessPolicy, ContentStore, IdentifierBehavior, MemoryStore, NodeSpec,
    PolicyKind, PrincipalEntry, RedbStore,
};

// =============================================================================
// RE-EXPORTS: Formats
// =============================================================================

pub use export::{
    CanonicalHeader, CanonicalTree, canonical_checksum, export_canonical, import_canonical,
};
pub use formats::{DocProperty, decode_name, encode_name};

#[cfg(feature = "crypto-hash")]
pub use export::canonical_crypto_hash;
