//! # API Request/Response Types

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use docmerge_core::{
    AclHandling, BinarySource, BlobInfo, ConflictPolicy, ImportOptions, ImportResult,
    Mutation, Property, Value, VaultError,
};
use serde::{Deserialize, Serialize};

use crate::config::FilterSection;

// =============================================================================
// HEALTH / STATUS
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub node_count: usize,
    pub policy_count: usize,
    pub namespace_count: usize,
    pub checksum: u64,
    pub persistent: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HashResponse {
    pub algorithm: String,
    pub hash: String,
}

/// Body of every non-2xx answer produced by a handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub kind: String,
    pub error: String,
}

impl From<&VaultError> for ErrorResponse {
    fn from(e: &VaultError) -> Self {
        Self {
            kind: format!("{:?}", e.kind()).to_lowercase(),
            error: e.to_string(),
        }
    }
}

// =============================================================================
// NODE INSPECTION
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeQuery {
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyJson {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub multiple: bool,
    /// Text values; binary values are base64 encoded.
    pub values: Vec<String>,
}

impl From<&Property> for PropertyJson {
    fn from(p: &Property) -> Self {
        Self {
            name: p.name.clone(),
            kind: p.kind.name().to_string(),
            multiple: p.multiple,
            values: p
                .values
                .iter()
                .map(|v| match v {
                    Value::Text(s) | Value::BinaryRef(s) => s.clone(),
                    Value::Binary(bytes) => STANDARD.encode(bytes),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeResponse {
    pub path: String,
    pub primary_type: String,
    pub mixins: Vec<String>,
    pub identifier: Option<String>,
    pub properties: Vec<PropertyJson>,
    /// Child names, with an SNS index when it is not 1.
    pub children: Vec<String>,
}

// =============================================================================
// IMPORT
// =============================================================================

/// One binary value supplied next to the document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentJson {
    /// Path of the node owning the property.
    pub path: String,
    pub property: String,
    /// Base64 encoded content.
    pub data: String,
    /// Slot of a multi-valued property; absent for single values.
    #[serde(default)]
    pub index: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportOptionsJson {
    pub conflict_policy: ConflictPolicy,
    pub acl_handling: AclHandling,
    pub strict: bool,
    pub auto_checkin: bool,
    pub hints: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportRequest {
    /// DocView document text.
    pub document: String,
    /// Path the document root is imported at.
    pub target: String,
    #[serde(default)]
    pub options: ImportOptionsJson,
    /// Filter sets; empty means everything in replace mode.
    #[serde(default)]
    pub filters: Vec<FilterSection>,
    #[serde(default)]
    pub attachments: Vec<AttachmentJson>,
}

impl ImportRequest {
    /// Build engine options, decoding the attachments.
    pub fn to_options(&self) -> Result<ImportOptions, VaultError> {
        let o = &self.options;
        let mut options = ImportOptions::new()
            .with_conflict_policy(o.conflict_policy)
            .with_acl_handling(o.acl_handling)
            .strict(o.strict)
            .auto_checkin(o.auto_checkin);
        for hint in &o.hints {
            options = options.with_hint(hint.as_str());
        }

        for attachment in &self.attachments {
            let bytes = STANDARD
                .decode(&attachment.data)
                .map_err(|e| VaultError::InvalidValue {
                    name: attachment.property.clone(),
                    message: format!("attachment is not base64: {e}"),
                })?;
            let source = BinarySource::Inline(bytes);
            let properties = options
                .binaries
                .entry(attachment.path.clone())
                .or_default();
            match attachment.index {
                None => {
                    properties.insert(attachment.property.clone(), BlobInfo::single(source));
                }
                Some(index) => properties
                    .entry(attachment.property.clone())
                    .or_insert_with(BlobInfo::multi)
                    .add(index, source),
            }
        }
        Ok(options)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportResponse {
    pub success: bool,
    pub modified: usize,
    pub errors: usize,
    pub checked_in: usize,
    /// Path to mutation, in path order.
    pub entries: BTreeMap<String, Mutation>,
    /// Path to error message for failed paths.
    pub messages: BTreeMap<String, String>,
}

impl From<&ImportResult> for ImportResponse {
    fn from(result: &ImportResult) -> Self {
        Self {
            success: result.errors == 0,
            modified: result.modified,
            errors: result.errors,
            checked_in: result.checked_in,
            entries: result
                .ledger
                .entries()
                .map(|(path, m)| (path.to_string(), m))
                .collect(),
            messages: result
                .ledger
                .errors()
                .map(|(path, msg)| (path.to_string(), msg.to_string()))
                .collect(),
        }
    }
}

// =============================================================================
// EXPORT
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Docview,
    Canonical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportRequest {
    /// Subtree to export; ignored by the canonical format.
    #[serde(default = "root_path")]
    pub path: String,
    #[serde(default)]
    pub format: ExportFormat,
}

fn root_path() -> String {
    "/".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportResponse {
    pub format: ExportFormat,
    /// Document text for `docview`, base64 bytes for `canonical`.
    pub data: String,
    pub checksum: u64,
}

impl ExportResponse {
    pub fn docview(document: String, checksum: u64) -> Self {
        Self {
            format: ExportFormat::Docview,
            data: document,
            checksum,
        }
    }

    pub fn canonical(bytes: &[u8], checksum: u64) -> Self {
        Self {
            format: ExportFormat::Canonical,
            data: STANDARD.encode(bytes),
            checksum,
        }
    }
}
