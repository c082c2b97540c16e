//! # Node Type Registry
//!
//! Effective type information the store and the merge engine consult:
//! which properties are protected, which child definition applies to a
//! child, whether a type keeps its children ordered, and supertype closure.
//!
//! Definitions are registered programmatically. A registry created with
//! [`NodeTypeRegistry::with_builtins`] knows the standard `nt:`, `mix:`,
//! `oak:` and the access-control/authorizable `rep:` types.

use std::collections::{BTreeMap, BTreeSet};

use crate::primitives::*;
use crate::types::{PropertyType, Result, VaultError};

/// Name of residual (catch-all) definitions.
pub const RESIDUAL: &str = "*";

// =============================================================================
// DEFINITIONS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyDefinition {
    pub name: String,
    pub kind: PropertyType,
    pub multiple: bool,
    pub protected: bool,
    pub mandatory: bool,
}

impl PropertyDefinition {
    #[must_use]
    pub fn new(name: impl Into<String>, kind: PropertyType) -> Self {
        Self {
            name: name.into(),
            kind,
            multiple: false,
            protected: false,
            mandatory: false,
        }
    }

    /// Residual definition accepting any property.
    #[must_use]
    pub fn residual() -> Self {
        Self::new(RESIDUAL, PropertyType::Undefined)
    }

    #[must_use]
    pub fn multiple(mut self) -> Self {
        self.multiple = true;
        self
    }

    #[must_use]
    pub fn protected(mut self) -> Self {
        self.protected = true;
        self
    }

    #[must_use]
    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }

    #[must_use]
    pub fn is_residual(&self) -> bool {
        self.name == RESIDUAL
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildDefinition {
    pub name: String,
    /// Every listed type must be a supertype of the child's primary type.
    pub required_types: Vec<String>,
    pub default_type: Option<String>,
    pub protected: bool,
    pub mandatory: bool,
}

impl ChildDefinition {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required_types: vec![NT_BASE.to_string()],
            default_type: None,
            protected: false,
            mandatory: false,
        }
    }

    #[must_use]
    pub fn residual() -> Self {
        Self::new(RESIDUAL)
    }

    #[must_use]
    pub fn requires(mut self, node_type: impl Into<String>) -> Self {
        self.required_types = vec![node_type.into()];
        self
    }

    #[must_use]
    pub fn default_type(mut self, node_type: impl Into<String>) -> Self {
        self.default_type = Some(node_type.into());
        self
    }

    #[must_use]
    pub fn protected(mut self) -> Self {
        self.protected = true;
        self
    }

    #[must_use]
    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }

    #[must_use]
    pub fn is_residual(&self) -> bool {
        self.name == RESIDUAL
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeTypeDefinition {
    pub name: String,
    pub mixin: bool,
    pub orderable: bool,
    pub supertypes: Vec<String>,
    pub properties: Vec<PropertyDefinition>,
    pub children: Vec<ChildDefinition>,
}

impl NodeTypeDefinition {
    /// A primary type. Implicitly extends `nt:base`.
    #[must_use]
    pub fn primary(name: impl Into<String>) -> Self {
        let name = name.into();
        let supertypes = if name == NT_BASE {
            Vec::new()
        } else {
            vec![NT_BASE.to_string()]
        };
        Self {
            name,
            mixin: false,
            orderable: false,
            supertypes,
            properties: Vec::new(),
            children: Vec::new(),
        }
    }

    #[must_use]
    pub fn mixin(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mixin: true,
            orderable: false,
            supertypes: Vec::new(),
            properties: Vec::new(),
            children: Vec::new(),
        }
    }

    #[must_use]
    pub fn extends(mut self, supertype: impl Into<String>) -> Self {
        let supertype = supertype.into();
        if !self.supertypes.contains(&supertype) {
            self.supertypes.push(supertype);
        }
        self
    }

    #[must_use]
    pub fn orderable(mut self) -> Self {
        self.orderable = true;
        self
    }

    #[must_use]
    pub fn property(mut self, def: PropertyDefinition) -> Self {
        self.properties.push(def);
        self
    }

    #[must_use]
    pub fn child(mut self, def: ChildDefinition) -> Self {
        self.children.push(def);
        self
    }
}

// =============================================================================
// REGISTRY
// =============================================================================

#[derive(Debug, Clone, Default)]
pub struct NodeTypeRegistry {
    types: BTreeMap<String, NodeTypeDefinition>,
}

impl NodeTypeRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the standard types.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for def in builtin_types() {
            registry.types.insert(def.name.clone(), def);
        }
        registry
    }

    /// Register a type. All supertypes must already be known.
    pub fn register(&mut self, def: NodeTypeDefinition) -> Result<()> {
        if let Some(missing) = def.supertypes.iter().find(|s| !self.types.contains_key(*s)) {
            return Err(VaultError::InvalidValue {
                name: def.name.clone(),
                message: format!("unknown supertype '{missing}'"),
            });
        }
        self.types.insert(def.name.clone(), def);
        Ok(())
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&NodeTypeDefinition> {
        self.types.get(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    #[must_use]
    pub fn is_mixin(&self, name: &str) -> bool {
        self.types.get(name).is_some_and(|t| t.mixin)
    }

    /// Names of `name` and all its transitive supertypes.
    #[must_use]
    pub fn supertype_closure(&self, name: &str) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut pending = vec![name.to_string()];
        while let Some(current) = pending.pop() {
            if !seen.insert(current.clone()) {
                continue;
            }
            if let Some(def) = self.types.get(&current) {
                pending.extend(def.supertypes.iter().cloned());
            }
        }
        seen
    }

    /// Whether `node_type` is `of` or one of its subtypes.
    #[must_use]
    pub fn is_subtype(&self, node_type: &str, of: &str) -> bool {
        node_type == of || self.supertype_closure(node_type).contains(of)
    }

    /// Whether a node with these types is of type `of`.
    #[must_use]
    pub fn is_node_type(&self, primary: &str, mixins: &[String], of: &str) -> bool {
        self.is_subtype(primary, of) || mixins.iter().any(|m| self.is_subtype(m, of))
    }

    /// Effective definitions, primary type closure first, then mixins.
    fn effective(&self, primary: &str, mixins: &[String]) -> Vec<&NodeTypeDefinition> {
        let mut names = Vec::new();
        for root in std::iter::once(primary).chain(mixins.iter().map(String::as_str)) {
            for name in self.supertype_closure(root) {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }
        names.iter().filter_map(|n| self.types.get(n)).collect()
    }

    /// Definition applying to property `name`. Named definitions win over
    /// residual ones.
    #[must_use]
    pub fn property_definition(
        &self,
        primary: &str,
        mixins: &[String],
        name: &str,
    ) -> Option<&PropertyDefinition> {
        let effective = self.effective(primary, mixins);
        let all = || effective.iter().flat_map(|t| t.properties.iter());
        all()
            .find(|d| d.name == name)
            .or_else(|| all().find(|d| d.is_residual()))
    }

    /// Whether property `name` may only be written by privileged creation.
    #[must_use]
    pub fn is_protected_property(&self, primary: &str, mixins: &[String], name: &str) -> bool {
        self.property_definition(primary, mixins, name)
            .is_some_and(|d| d.protected)
    }

    /// Definition applying to a child called `name` of type `child_type`.
    #[must_use]
    pub fn child_definition(
        &self,
        primary: &str,
        mixins: &[String],
        name: &str,
        child_type: &str,
    ) -> Option<&ChildDefinition> {
        let effective = self.effective(primary, mixins);
        let satisfied = |d: &&ChildDefinition| {
            d.required_types
                .iter()
                .all(|req| self.is_subtype(child_type, req))
        };
        let all = || effective.iter().flat_map(|t| t.children.iter());
        all()
            .filter(|d| d.name == name)
            .find(satisfied)
            .or_else(|| all().filter(|d| d.is_residual()).find(satisfied))
    }

    /// Default primary type for a new child called `name`.
    #[must_use]
    pub fn default_child_type(&self, primary: &str, mixins: &[String], name: &str) -> Option<String> {
        let effective = self.effective(primary, mixins);
        let all = || effective.iter().flat_map(|t| t.children.iter());
        all()
            .find(|d| d.name == name && d.default_type.is_some())
            .or_else(|| all().find(|d| d.is_residual() && d.default_type.is_some()))
            .and_then(|d| d.default_type.clone())
    }

    /// Named child definitions that are mandatory for this node.
    #[must_use]
    pub fn mandatory_children(&self, primary: &str, mixins: &[String]) -> Vec<&ChildDefinition> {
        self.effective(primary, mixins)
            .into_iter()
            .flat_map(|t| t.children.iter())
            .filter(|d| d.mandatory && !d.is_residual())
            .collect()
    }

    /// Whether children keep a caller-defined order.
    #[must_use]
    pub fn is_orderable(&self, primary: &str, mixins: &[String]) -> bool {
        self.effective(primary, mixins).iter().any(|t| t.orderable)
    }
}

// =============================================================================
// BUILTINS
// =============================================================================

fn builtin_types() -> Vec<NodeTypeDefinition> {
    use PropertyType as T;
    let any_props = PropertyDefinition::residual;
    let any_multi = || PropertyDefinition::residual().multiple();

    vec![
        NodeTypeDefinition::primary(NT_BASE)
            .property(PropertyDefinition::new(JCR_PRIMARY_TYPE, T::Name).protected().mandatory())
            .property(PropertyDefinition::new(JCR_MIXIN_TYPES, T::Name).protected().multiple()),
        // mixins
        NodeTypeDefinition::mixin(MIX_REFERENCEABLE)
            .property(PropertyDefinition::new(JCR_UUID, T::String).protected().mandatory()),
        NodeTypeDefinition::mixin(MIX_SIMPLE_VERSIONABLE)
            .property(PropertyDefinition::new(JCR_IS_CHECKED_OUT, T::Boolean).protected()),
        NodeTypeDefinition::mixin(MIX_VERSIONABLE)
            .extends(MIX_SIMPLE_VERSIONABLE)
            .extends(MIX_REFERENCEABLE)
            .property(PropertyDefinition::new(JCR_VERSION_HISTORY, T::Reference).protected())
            .property(PropertyDefinition::new(JCR_BASE_VERSION, T::Reference).protected())
            .property(PropertyDefinition::new(JCR_PREDECESSORS, T::Reference).protected().multiple())
            .property(PropertyDefinition::new(JCR_SUCCESSORS, T::Reference).protected().multiple()),
        NodeTypeDefinition::mixin(MIX_CREATED)
            .property(PropertyDefinition::new("jcr:created", T::Date).protected())
            .property(PropertyDefinition::new("jcr:createdBy", T::String).protected()),
        NodeTypeDefinition::mixin(MIX_LAST_MODIFIED)
            .property(PropertyDefinition::new("jcr:lastModified", T::Date))
            .property(PropertyDefinition::new("jcr:lastModifiedBy", T::String)),
        NodeTypeDefinition::mixin(MIX_TITLE)
            .property(PropertyDefinition::new("jcr:title", T::String))
            .property(PropertyDefinition::new("jcr:description", T::String)),
        NodeTypeDefinition::mixin(MIX_LOCKABLE)
            .property(PropertyDefinition::new("jcr:lockOwner", T::String).protected())
            .property(PropertyDefinition::new("jcr:lockIsDeep", T::Boolean).protected()),
        NodeTypeDefinition::mixin("mix:mimeType")
            .property(PropertyDefinition::new("jcr:mimeType", T::String))
            .property(PropertyDefinition::new("jcr:encoding", T::String)),
        // unstructured
        NodeTypeDefinition::primary(NT_UNSTRUCTURED)
            .orderable()
            .property(any_props())
            .property(any_multi())
            .child(ChildDefinition::residual().default_type(NT_UNSTRUCTURED)),
        NodeTypeDefinition::primary(OAK_UNSTRUCTURED)
            .orderable()
            .property(any_props())
            .property(any_multi())
            .child(ChildDefinition::residual().default_type(OAK_UNSTRUCTURED)),
        // hierarchy
        NodeTypeDefinition::primary(NT_HIERARCHY_NODE).extends(MIX_CREATED),
        NodeTypeDefinition::primary(NT_FOLDER)
            .extends(NT_HIERARCHY_NODE)
            .child(ChildDefinition::residual().requires(NT_HIERARCHY_NODE)),
        NodeTypeDefinition::primary(NT_FILE)
            .extends(NT_HIERARCHY_NODE)
            .child(ChildDefinition::new(JCR_CONTENT).mandatory()),
        NodeTypeDefinition::primary(NT_RESOURCE)
            .extends("mix:mimeType")
            .extends(MIX_LAST_MODIFIED)
            .extends(MIX_REFERENCEABLE)
            .property(PropertyDefinition::new(JCR_DATA, T::Binary).mandatory()),
        // access control
        NodeTypeDefinition::mixin(REP_ACCESS_CONTROLLABLE)
            .child(ChildDefinition::new(REP_POLICY).requires(REP_ACL).protected()),
        NodeTypeDefinition::mixin(REP_CUG_MIXIN)
            .child(ChildDefinition::new(REP_CUG_POLICY_NODE).requires(REP_CUG_POLICY).protected()),
        NodeTypeDefinition::mixin(REP_PRINCIPAL_BASED_MIXIN).child(
            ChildDefinition::new(REP_PRINCIPAL_POLICY_NODE)
                .requires(REP_PRINCIPAL_POLICY)
                .protected(),
        ),
        NodeTypeDefinition::primary(REP_ACL)
            .orderable()
            .child(ChildDefinition::residual().requires(REP_ACE).protected()),
        NodeTypeDefinition::primary(REP_ACE)
            .property(PropertyDefinition::new(REP_PRINCIPAL_NAME, T::String).protected().mandatory())
            .property(PropertyDefinition::new(REP_PRIVILEGES, T::Name).protected().multiple())
            .property(any_props().protected())
            .property(any_multi().protected())
            .child(ChildDefinition::new(REP_RESTRICTIONS_NODE).requires(REP_RESTRICTIONS).protected()),
        NodeTypeDefinition::primary(REP_GRANT_ACE).extends(REP_ACE),
        NodeTypeDefinition::primary(REP_DENY_ACE).extends(REP_ACE),
        NodeTypeDefinition::primary(REP_RESTRICTIONS)
            .property(any_props().protected())
            .property(any_multi().protected()),
        NodeTypeDefinition::primary(REP_CUG_POLICY)
            .property(PropertyDefinition::new(REP_PRINCIPAL_NAMES, T::String).protected().multiple()),
        NodeTypeDefinition::primary(REP_PRINCIPAL_POLICY)
            .property(PropertyDefinition::new(REP_PRINCIPAL_NAME, T::String).protected())
            .child(ChildDefinition::residual().requires(REP_PRINCIPAL_ENTRY).protected()),
        NodeTypeDefinition::primary(REP_PRINCIPAL_ENTRY)
            .property(PropertyDefinition::new(REP_EFFECTIVE_PATH, T::Path).protected())
            .property(PropertyDefinition::new(REP_PRIVILEGES, T::Name).protected().multiple())
            .child(ChildDefinition::new(REP_RESTRICTIONS_NODE).requires(REP_RESTRICTIONS).protected()),
        NodeTypeDefinition::primary(REP_ROOT)
            .extends(NT_UNSTRUCTURED)
            .extends(REP_ACCESS_CONTROLLABLE)
            .orderable(),
        // authorizables
        NodeTypeDefinition::primary(REP_AUTHORIZABLE)
            .extends(MIX_REFERENCEABLE)
            .property(PropertyDefinition::new(REP_PRINCIPAL_NAME, T::String).protected().mandatory())
            .property(PropertyDefinition::new(REP_AUTHORIZABLE_ID, T::String).protected())
            .property(any_props())
            .property(any_multi())
            .child(ChildDefinition::residual().default_type(NT_UNSTRUCTURED)),
        NodeTypeDefinition::primary(REP_USER)
            .extends(REP_AUTHORIZABLE)
            .property(PropertyDefinition::new("rep:password", T::String).protected()),
        NodeTypeDefinition::primary(REP_SYSTEM_USER).extends(REP_USER),
        NodeTypeDefinition::primary(REP_GROUP)
            .extends(REP_AUTHORIZABLE)
            .property(PropertyDefinition::new(REP_MEMBERS, T::WeakReference).multiple()),
        NodeTypeDefinition::primary(REP_AUTHORIZABLE_FOLDER)
            .child(ChildDefinition::residual().requires(REP_AUTHORIZABLE))
            .child(ChildDefinition::residual().requires(REP_AUTHORIZABLE_FOLDER).default_type(REP_AUTHORIZABLE_FOLDER)),
    ]
}

// =============================================================================
// TESTS
// =============================================================================
