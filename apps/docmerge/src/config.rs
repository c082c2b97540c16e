//! # Configuration
//!
//! Import options and workspace filters read from a TOML file.
//!
//! ```toml
//! [import]
//! conflict_policy = "create-new-id"
//! acl_handling = "merge"
//! strict = false
//! auto_checkin = true
//! hints = ["/content/site/page/jcr:content/par"]
//!
//! [[filter]]
//! root = "/content/site"
//! mode = "merge"
//! includes = ["/content/site/en/**"]
//! excludes = ["/content/site/en/archive/**"]
//! exclude_properties = ["/content/site/**/cq:lastModified"]
//! ```
//!
//! A missing file yields the defaults: no filter sets (everything in scope,
//! replace mode), conflict policy `fail`, access control ignored.

use std::path::Path;

use docmerge_core::{
    AclHandling, ConflictPolicy, FilterSet, ImportMode, ImportOptions, PathFilter, Result,
    VaultError,
};
use serde::{Deserialize, Serialize};

/// Maximum configuration file size (1 MB).
const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

/// The `[import]` table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImportSection {
    pub conflict_policy: ConflictPolicy,
    pub acl_handling: AclHandling,
    pub strict: bool,
    pub auto_checkin: bool,
    pub hints: Vec<String>,
}

/// One `[[filter]]` set.
///
/// Rules are applied in order: every include first, then every exclude, then
/// the property excludes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilterSection {
    pub root: String,
    #[serde(default)]
    pub mode: ImportMode,
    #[serde(default)]
    pub includes: Vec<String>,
    #[serde(default)]
    pub excludes: Vec<String>,
    #[serde(default)]
    pub exclude_properties: Vec<String>,
}

impl FilterSection {
    fn to_filter_set(&self) -> Result<FilterSet> {
        let mut set = FilterSet::new(self.root.as_str()).with_mode(self.mode);
        for pattern in &self.includes {
            set = set.include(pattern)?;
        }
        for pattern in &self.excludes {
            set = set.exclude(pattern)?;
        }
        for pattern in &self.exclude_properties {
            set = set.exclude_property(pattern)?;
        }
        Ok(set)
    }
}

/// Contents of a `docmerge.toml` file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DocmergeConfig {
    pub import: ImportSection,
    #[serde(rename = "filter")]
    pub filters: Vec<FilterSection>,
}

impl DocmergeConfig {
    /// Parse a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| VaultError::SerializationError(format!("config: {e}")))
    }

    /// Read the file at `path`, or fall back to defaults when it does not
    /// exist.
    pub fn load(path: &Path) -> Result<Self> {
        let metadata = match std::fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(VaultError::IoError(format!("{}: {e}", path.display())));
            }
        };
        if metadata.len() > MAX_CONFIG_FILE_SIZE {
            return Err(VaultError::SerializationError(format!(
                "Config size {} bytes exceeds maximum {} bytes",
                metadata.len(),
                MAX_CONFIG_FILE_SIZE
            )));
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| VaultError::IoError(format!("{}: {e}", path.display())))?;
        let config = Self::from_toml_str(&text)?;
        tracing::info!(
            path = %path.display(),
            filters = config.filters.len(),
            policy = %config.import.conflict_policy,
            "config loaded"
        );
        Ok(config)
    }

    /// Import options described by the `[import]` table.
    #[must_use]
    pub fn import_options(&self) -> ImportOptions {
        let section = &self.import;
        let mut options = ImportOptions::new()
            .with_conflict_policy(section.conflict_policy)
            .with_acl_handling(section.acl_handling)
            .strict(section.strict)
            .auto_checkin(section.auto_checkin);
        for hint in &section.hints {
            options = options.with_hint(hint.as_str());
        }
        options
    }

    /// Workspace filter built from the `[[filter]]` sets.
    pub fn path_filter(&self) -> Result<PathFilter> {
        let mut filter = PathFilter::new();
        for section in &self.filters {
            filter.add(section.to_filter_set()?);
        }
        Ok(filter)
    }
}
