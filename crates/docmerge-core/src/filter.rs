//! # Workspace Filter
//!
//! Decides which paths an import may touch and with which [`ImportMode`].
//!
//! A [`PathFilter`] is an ordered list of [`FilterSet`]s. Each set has a root
//! path, a mode and ordered include/exclude rules. Rules are glob patterns
//! matched against the whole path: `*` stays within one segment, `**` spans
//! segments.

use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};

use crate::store::{is_descendant_or_self, parent_path};
use crate::types::{ImportMode, Result, VaultError};

/// Scope and import-mode oracle consulted by the import engine per path.
pub trait WorkspaceFilter {
    /// Whether `path` is in scope.
    fn contains(&self, path: &str) -> bool;

    /// Effective import mode for `path`.
    fn import_mode(&self, path: &str) -> ImportMode;

    /// Whether some filter root lies strictly below `path`, so that `path`
    /// has to exist for in-scope content to be created.
    fn is_ancestor(&self, path: &str) -> bool;

    /// Whether the property at `path` (node path + "/" + name) is in scope.
    fn includes_property(&self, path: &str) -> bool {
        parent_path(path).is_some_and(|node| self.contains(node))
    }
}

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

// =============================================================================
// FILTER SET
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleKind {
    Include,
    Exclude,
}

#[derive(Debug, Clone)]
struct Rule {
    kind: RuleKind,
    pattern: Pattern,
}

/// One filter root with its mode and rules.
#[derive(Debug, Clone)]
pub struct FilterSet {
    root: String,
    mode: ImportMode,
    rules: Vec<Rule>,
    property_excludes: Vec<Pattern>,
}

fn compile(pattern: &str) -> Result<Pattern> {
    Pattern::new(pattern).map_err(|e| VaultError::InvalidValue {
        name: pattern.to_string(),
        message: e.to_string(),
    })
}

impl FilterSet {
    #[must_use]
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            mode: ImportMode::Replace,
            rules: Vec::new(),
            property_excludes: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_mode(mut self, mode: ImportMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn include(mut self, pattern: &str) -> Result<Self> {
        self.rules.push(Rule {
            kind: RuleKind::Include,
            pattern: compile(pattern)?,
        });
        Ok(self)
    }

    pub fn exclude(mut self, pattern: &str) -> Result<Self> {
        self.rules.push(Rule {
            kind: RuleKind::Exclude,
            pattern: compile(pattern)?,
        });
        Ok(self)
    }

    /// Exclude matching property paths while keeping their nodes in scope.
    pub fn exclude_property(mut self, pattern: &str) -> Result<Self> {
        self.property_excludes.push(compile(pattern)?);
        Ok(self)
    }

    #[must_use]
    pub fn root(&self) -> &str {
        &self.root
    }

    #[must_use]
    pub const fn mode(&self) -> ImportMode {
        self.mode
    }

    /// Whether `path` lies under this set's root.
    #[must_use]
    pub fn covers(&self, path: &str) -> bool {
        is_descendant_or_self(path, &self.root)
    }

    /// Root coverage, then the last matching rule decides. When no rule
    /// matches, the result is the opposite of the first rule's kind.
    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        if !self.covers(path) {
            return false;
        }
        let Some(first) = self.rules.first() else {
            return true;
        };
        match self
            .rules
            .iter()
            .rev()
            .find(|r| r.pattern.matches_with(path, MATCH_OPTIONS))
        {
            Some(rule) => rule.kind == RuleKind::Include,
            None => first.kind == RuleKind::Exclude,
        }
    }

    fn excludes_property(&self, path: &str) -> bool {
        self.property_excludes
            .iter()
            .any(|p| p.matches_with(path, MATCH_OPTIONS))
    }
}

// =============================================================================
// PATH FILTER
// =============================================================================

/// Ordered filter sets. The first set covering a path decides for it.
#[derive(Debug, Clone, Default)]
pub struct PathFilter {
    sets: Vec<FilterSet>,
}

impl PathFilter {
    /// Filter without sets: everything is in scope in replace mode.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_set(mut self, set: FilterSet) -> Self {
        self.sets.push(set);
        self
    }

    pub fn add(&mut self, set: FilterSet) {
        self.sets.push(set);
    }

    #[must_use]
    pub fn sets(&self) -> &[FilterSet] {
        &self.sets
    }

    fn covering(&self, path: &str) -> Option<&FilterSet> {
        self.sets.iter().find(|s| s.covers(path))
    }
}

impl WorkspaceFilter for PathFilter {
    fn contains(&self, path: &str) -> bool {
        if self.sets.is_empty() {
            return true;
        }
        self.covering(path).is_some_and(|s| s.contains(path))
    }

    fn import_mode(&self, path: &str) -> ImportMode {
        self.covering(path).map_or(ImportMode::Replace, FilterSet::mode)
    }

    fn is_ancestor(&self, path: &str) -> bool {
        self.sets
            .iter()
            .any(|s| s.root != path && is_descendant_or_self(&s.root, path))
    }

    fn includes_property(&self, path: &str) -> bool {
        let Some(node) = parent_path(path) else {
            return false;
        };
        if !self.contains(node) {
            return false;
        }
        self.covering(node)
            .is_none_or(|s| !s.excludes_property(path))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn empty_filter_contains_everything() {
        let filter = PathFilter::new();
        assert!(filter.contains("/"));
        assert!(filter.contains("/a/b"));
        assert_eq!(filter.import_mode("/a"), ImportMode::Replace);
        assert!(!filter.is_ancestor("/a"));
        assert!(filter.includes_property("/a/title"));
    }

    #[test]
    fn root_coverage_and_mode() {
        let filter = PathFilter::new()
            .with_set(FilterSet::new("/content/site").with_mode(ImportMode::Merge));
        assert!(filter.contains("/content/site/page"));
        assert!(!filter.contains("/content/other"));
        assert!(!filter.contains("/content/sites"));
        assert_eq!(filter.import_mode("/content/site/x"), ImportMode::Merge);
        assert!(filter.is_ancestor("/content"));
        assert!(filter.is_ancestor("/"));
        assert!(!filter.is_ancestor("/content/site"));
    }

    #[test]
    fn last_matching_rule_wins() {
        let set = FilterSet::new("/apps")
            .exclude("/apps/*/cache")
            .unwrap()
            .include("/apps/keep/cache")
            .unwrap();
        assert!(set.contains("/apps/foo"));
        assert!(!set.contains("/apps/foo/cache"));
        assert!(set.contains("/apps/keep/cache"));
    }

    #[test]
    fn include_rules_default_to_excluded() {
        let set = FilterSet::new("/etc").include("/etc/map/**").unwrap();
        assert!(set.contains("/etc/map/http/a"));
        assert!(!set.contains("/etc/other"));
    }

    #[test]
    fn property_excludes_keep_node_in_scope() {
        let filter = PathFilter::new().with_set(
            FilterSet::new("/a")
                .exclude_property("/a/*/jcr:primaryType")
                .unwrap(),
        );
        assert!(filter.contains("/a/b"));
        assert!(!filter.includes_property("/a/b/jcr:primaryType"));
        assert!(filter.includes_property("/a/b/title"));
    }

    #[test]
    fn first_covering_set_decides() {
        let filter = PathFilter::new()
            .with_set(FilterSet::new("/a/b").with_mode(ImportMode::Update))
            .with_set(FilterSet::new("/a"));
        assert_eq!(filter.import_mode("/a/b/c"), ImportMode::Update);
        assert_eq!(filter.import_mode("/a/c"), ImportMode::Replace);
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        assert!(FilterSet::new("/a").include("/a/[").is_err());
    }
}
