//! # Core Type Definitions
//!
//! This module contains the shared vocabulary of the import engine:
//! - Store node handles (`NodeId`)
//! - Typed property values (`PropertyType`, `Value`, `Property`)
//! - Import modes (`ImportMode`)
//! - Error types (`VaultError`, `ErrorKind`)
//!
//! ## Ordering Guarantees
//!
//! Identifier and value types implement `Ord` so that ledgers and stores can
//! keep them in `BTreeMap`/`BTreeSet` and iterate deterministically.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// =============================================================================
// NODE HANDLES
// =============================================================================

/// Opaque handle of a node inside a content store.
///
/// Handles are only meaningful for the store that issued them and are never
/// written to exports. Paths and identifiers are the portable addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u64);

// =============================================================================
// PROPERTY TYPES
// =============================================================================

/// Declared type of a property value.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub enum PropertyType {
    /// No type given. Stored as a string.
    #[default]
    Undefined,
    String,
    Binary,
    Long,
    Double,
    Date,
    Boolean,
    Name,
    Path,
    Reference,
    WeakReference,
    Uri,
    Decimal,
}

impl PropertyType {
    /// All concrete types, in the order used by error messages.
    pub const ALL: [Self; 13] = [
        Self::Undefined,
        Self::String,
        Self::Binary,
        Self::Long,
        Self::Double,
        Self::Date,
        Self::Boolean,
        Self::Name,
        Self::Path,
        Self::Reference,
        Self::WeakReference,
        Self::Uri,
        Self::Decimal,
    ];

    /// Type name as written inside `{...}` in the value grammar.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::String => "String",
            Self::Binary => "Binary",
            Self::Long => "Long",
            Self::Double => "Double",
            Self::Date => "Date",
            Self::Boolean => "Boolean",
            Self::Name => "Name",
            Self::Path => "Path",
            Self::Reference => "Reference",
            Self::WeakReference => "WeakReference",
            Self::Uri => "URI",
            Self::Decimal => "Decimal",
        }
    }

    /// Look up a type by its grammar name. Matching is case sensitive,
    /// except for `undefined` which is accepted in any case.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        if name.eq_ignore_ascii_case("undefined") {
            return Some(Self::Undefined);
        }
        Self::ALL.into_iter().find(|t| t.name() == name)
    }

    /// Returns true for types whose values name another node by identifier.
    #[must_use]
    pub const fn is_reference(self) -> bool {
        matches!(self, Self::Reference | Self::WeakReference)
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// VALUES
// =============================================================================

/// One value of a property.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Value {
    /// Textual representation of any non-binary value.
    Text(String),
    /// Binary content.
    Binary(Vec<u8>),
    /// Opaque reference to binary content held outside the document.
    BinaryRef(String),
}

impl Value {
    /// Create a text value.
    #[must_use]
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    /// Text of this value, if it has one.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) | Self::BinaryRef(s) => Some(s),
            Self::Binary(_) => None,
        }
    }
}

/// A named, typed, single- or multi-valued property of a store node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Property {
    pub name: String,
    pub kind: PropertyType,
    pub values: Vec<Value>,
    pub multiple: bool,
}

impl Property {
    /// Single-valued text property.
    #[must_use]
    pub fn single(name: impl Into<String>, kind: PropertyType, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            values: vec![Value::Text(value.into())],
            multiple: false,
        }
    }

    /// Multi-valued text property.
    #[must_use]
    pub fn multi<I, V>(name: impl Into<String>, kind: PropertyType, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        Self {
            name: name.into(),
            kind,
            values: values.into_iter().map(|v| Value::Text(v.into())).collect(),
            multiple: true,
        }
    }

    /// First value as text.
    #[must_use]
    pub fn first_text(&self) -> Option<&str> {
        self.values.first().and_then(Value::as_text)
    }

    /// All textual values.
    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.values.iter().filter_map(Value::as_text)
    }
}

// =============================================================================
// IMPORT MODE
// =============================================================================

/// How incoming content is reconciled with content that already exists at
/// the same location.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "kebab-case")]
pub enum ImportMode {
    /// Incoming content fully replaces existing content.
    #[default]
    Replace,
    /// Existing nodes are left untouched, only missing nodes are added.
    Merge,
    /// Existing nodes are updated in place, nothing is removed.
    Update,
    /// Only missing properties are added to existing nodes.
    MergeProperties,
    /// Incoming properties overwrite existing ones, none are removed.
    UpdateProperties,
}

impl ImportMode {
    /// Stable name used in configuration and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Replace => "replace",
            Self::Merge => "merge",
            Self::Update => "update",
            Self::MergeProperties => "merge-properties",
            Self::UpdateProperties => "update-properties",
        }
    }

    /// Whether properties of a replaced node survive its recreation.
    #[must_use]
    pub const fn merges_properties(self) -> bool {
        !matches!(self, Self::Replace)
    }
}

impl fmt::Display for ImportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImportMode {
    type Err = VaultError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "replace" => Ok(Self::Replace),
            "merge" => Ok(Self::Merge),
            "update" => Ok(Self::Update),
            "merge-properties" => Ok(Self::MergeProperties),
            "update-properties" => Ok(Self::UpdateProperties),
            other => Err(VaultError::InvalidValue {
                name: "mode".to_string(),
                message: format!("unknown import mode '{other}'"),
            }),
        }
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Coarse classification of a [`VaultError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// Malformed document or value grammar.
    Parse,
    /// A store mutation was refused.
    Structural,
    /// Identifier conflict that could not be resolved under the policy.
    Conflict,
    /// Stash or recovery of a subtree failed.
    Recovery,
    /// Persistence or I/O failure.
    Storage,
}

/// Errors that can occur while importing or storing content.
///
/// - Parse, conflict and storage errors abort an import
/// - Structural errors are scoped to the node that caused them
/// - Library code never panics
#[derive(Debug, Error)]
pub enum VaultError {
    /// The document is not well formed or violates the DocView layout.
    #[error("Parse error at line {line}: {message}")]
    Parse { line: u64, message: String },

    /// A serialized property value could not be decoded or validated.
    #[error("Invalid value for '{name}': {message}")]
    InvalidValue { name: String, message: String },

    /// The store refused a mutation because of a type or definition constraint.
    #[error("Constraint violation at {path}: {message}")]
    ConstraintViolation { path: String, message: String },

    /// No node exists at the given path or with the given identifier.
    #[error("Item not found: {0}")]
    ItemNotFound(String),

    /// A node already exists where a new one was requested.
    #[error("Item exists: {0}")]
    ItemExists(String),

    /// The node is read only for this session.
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// The node or one of its versionable ancestors is checked in.
    #[error("Node is checked in: {0}")]
    CheckedIn(String),

    /// An incoming identifier is already used by another node.
    #[error("Identifier {identifier} already in use at {path}")]
    IdentifierCollision { identifier: String, path: String },

    /// Removing a conflicting node was refused.
    #[error("Referential integrity violation at {path}: {message}")]
    ReferentialIntegrity { path: String, message: String },

    /// A stashed subtree could not be recreated.
    #[error("Recovery failed at {path}: {message}")]
    Recovery { path: String, message: String },

    /// A name is empty or contains illegal characters.
    #[error("Invalid name: {0}")]
    InvalidName(String),

    /// A serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(String),
}

impl VaultError {
    /// Shorthand for a [`VaultError::Parse`].
    #[must_use]
    pub fn parse(line: u64, message: impl Into<String>) -> Self {
        Self::Parse {
            line,
            message: message.into(),
        }
    }

    /// Shorthand for a [`VaultError::ConstraintViolation`].
    #[must_use]
    pub fn constraint(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConstraintViolation {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Classify this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Parse { .. } | Self::InvalidValue { .. } | Self::InvalidName(_) => {
                ErrorKind::Parse
            }
            Self::ConstraintViolation { .. }
            | Self::ItemNotFound(_)
            | Self::ItemExists(_)
            | Self::AccessDenied(_)
            | Self::CheckedIn(_) => ErrorKind::Structural,
            Self::IdentifierCollision { .. } | Self::ReferentialIntegrity { .. } => {
                ErrorKind::Conflict
            }
            Self::Recovery { .. } => ErrorKind::Recovery,
            Self::SerializationError(_) | Self::IoError(_) => ErrorKind::Storage,
        }
    }

    /// Whether this error must abort the whole import.
    ///
    /// Value-level parse failures (`InvalidValue`, `InvalidName`) are scoped to
    /// one node and therefore not fatal even though they classify as parse
    /// errors.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        match self {
            Self::Parse { .. } => true,
            Self::InvalidValue { .. } | Self::InvalidName(_) => false,
            other => matches!(other.kind(), ErrorKind::Conflict | ErrorKind::Storage),
        }
    }

    /// Store path this error refers to, if any.
    #[must_use]
    pub fn path(&self) -> Option<&str> {
        match self {
            Self::ConstraintViolation { path, .. }
            | Self::IdentifierCollision { path, .. }
            | Self::ReferentialIntegrity { path, .. }
            | Self::Recovery { path, .. } => Some(path),
            Self::ItemNotFound(p) | Self::ItemExists(p) | Self::AccessDenied(p) | Self::CheckedIn(p) => {
                Some(p)
            }
            _ => None,
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, VaultError>;

// =============================================================================
// TESTS
// =============================================================================
