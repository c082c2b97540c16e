//! Import configuration.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::blob::BlobInfo;
use crate::conflict::ConflictPolicy;
use crate::types::VaultError;

/// How access control content of a document is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AclHandling {
    /// Leave existing policies untouched and drop incoming ones.
    #[default]
    Ignore,
    /// Replace the existing policy with the incoming one.
    Overwrite,
    /// Replace entries of incoming principals, keep the others.
    Merge,
    /// Only add entries for principals that have none yet.
    MergePreserve,
    /// Remove the existing policy.
    Clear,
}

impl AclHandling {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ignore => "ignore",
            Self::Overwrite => "overwrite",
            Self::Merge => "merge",
            Self::MergePreserve => "merge-preserve",
            Self::Clear => "clear",
        }
    }

    /// Whether access control mixins may be dropped by a replace.
    #[must_use]
    pub const fn drops_mixins(self) -> bool {
        matches!(self, Self::Overwrite | Self::Clear)
    }
}

impl fmt::Display for AclHandling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AclHandling {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "ignore" => Ok(Self::Ignore),
            "overwrite" => Ok(Self::Overwrite),
            "merge" => Ok(Self::Merge),
            "merge-preserve" => Ok(Self::MergePreserve),
            "clear" => Ok(Self::Clear),
            other => Err(VaultError::InvalidValue {
                name: "acl handling".to_string(),
                message: format!("unknown mode '{other}'"),
            }),
        }
    }
}

/// Options of one import run.
#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    pub conflict_policy: ConflictPolicy,
    pub acl_handling: AclHandling,
    /// Property application failures fail the node in every mode, not only
    /// under replace.
    pub strict: bool,
    /// Paths that are never deleted even when missing from the document.
    pub hints: BTreeSet<String>,
    /// Binary values supplied next to the document: node path to property
    /// name to content.
    pub binaries: BTreeMap<String, BTreeMap<String, BlobInfo>>,
    /// Check in every node the import checked out when it finishes.
    pub auto_checkin: bool,
}

impl ImportOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    #[must_use]
    pub fn with_acl_handling(mut self, handling: AclHandling) -> Self {
        self.acl_handling = handling;
        self
    }

    #[must_use]
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    #[must_use]
    pub fn with_hint(mut self, path: impl Into<String>) -> Self {
        self.hints.insert(path.into());
        self
    }

    /// Attach the binary content of `property` on the node at `path`.
    #[must_use]
    pub fn with_binary(mut self, path: impl Into<String>, property: impl Into<String>, blob: BlobInfo) -> Self {
        self.binaries
            .entry(path.into())
            .or_default()
            .insert(property.into(), blob);
        self
    }

    #[must_use]
    pub fn auto_checkin(mut self, enabled: bool) -> Self {
        self.auto_checkin = enabled;
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::blob::BinarySource;

    #[test]
    fn acl_handling_names() {
        assert_eq!("merge_preserve".parse::<AclHandling>().unwrap(), AclHandling::MergePreserve);
        assert_eq!(AclHandling::Clear.to_string(), "clear");
        assert!("sometimes".parse::<AclHandling>().is_err());
        assert!(AclHandling::Overwrite.drops_mixins());
        assert!(!AclHandling::Merge.drops_mixins());
    }

    #[test]
    fn builder_collects_binaries() {
        let options = ImportOptions::new()
            .with_binary("/a", "data", BlobInfo::single(BinarySource::Inline(vec![1])))
            .with_binary("/a", "thumb", BlobInfo::single(BinarySource::Inline(vec![2])))
            .with_hint("/a/keep");
        assert_eq!(options.binaries["/a"].len(), 2);
        assert!(options.hints.contains("/a/keep"));
        assert_eq!(options.conflict_policy, ConflictPolicy::Fail);
    }
}
