//! Conversions from document nodes to store writes.

use crate::docview::DocNode;
use crate::formats::property::DocProperty;
use crate::nodetype::NodeTypeRegistry;
use crate::primitives;
use crate::store::{ContentStore, NodeSpec, join_path};
use crate::types::{NodeId, Property, PropertyType, Result, Value, VaultError};

/// Store form of a document property. Binary placeholders have no content
/// and must be resolved from attachments instead.
#[must_use]
pub fn to_property(doc: &DocProperty) -> Property {
    let values = doc
        .values
        .iter()
        .map(|v| {
            if doc.binary_ref {
                Value::BinaryRef(v.clone())
            } else {
                Value::Text(v.clone())
            }
        })
        .collect();
    Property {
        name: doc.name.clone(),
        kind: doc.kind,
        values,
        multiple: doc.multiple,
    }
}

/// Whether writing `incoming` over `existing` would change nothing.
/// Untyped and string values match whatever type the store converted them to.
#[must_use]
pub fn same_content(existing: &Property, incoming: &Property) -> bool {
    let kinds_agree = existing.kind == incoming.kind
        || matches!(incoming.kind, PropertyType::Undefined | PropertyType::String);
    kinds_agree && existing.multiple == incoming.multiple && existing.values == incoming.values
}

/// Properties that only privileged creation may establish.
#[must_use]
pub fn is_creation_only(registry: &NodeTypeRegistry, primary: &str, mixins: &[String], name: &str) -> bool {
    primitives::is_protected_property(name) || registry.is_protected_property(primary, mixins, name)
}

/// Privileged creation request for `node` below `parent`.
pub fn node_spec<S: ContentStore>(store: &S, parent: NodeId, node: &DocNode) -> Result<NodeSpec> {
    let registry = store.node_types();
    let primary = match node.primary_type() {
        Some(t) => t.to_string(),
        None => {
            let parent_type = store.primary_type(parent)?;
            let parent_mixins = store.mixins(parent)?;
            registry
                .default_child_type(&parent_type, &parent_mixins, &node.name)
                .ok_or_else(|| {
                    VaultError::constraint(
                        join_path(&store.path_of(parent).unwrap_or_default(), &node.name),
                        "no primary type declared and no default applies",
                    )
                })?
        }
    };

    let mut spec = NodeSpec::new(node.name.clone(), primary);
    spec.mixins = node.mixins();
    spec.identifier = node.identifier().map(str::to_string);
    for doc in node.properties.values() {
        if primitives::is_protected_property(&doc.name) || doc.is_binary_placeholder() {
            continue;
        }
        if registry.is_protected_property(&spec.primary_type, &spec.mixins, &doc.name) {
            spec.properties.push(to_property(doc));
        }
    }
    Ok(spec)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::primitives::{
        JCR_MIXIN_TYPES, JCR_PRIMARY_TYPE, JCR_UUID, MIX_REFERENCEABLE, NT_UNSTRUCTURED,
        REP_AUTHORIZABLE_ID, REP_PRINCIPAL_NAME, REP_USER,
    };
    use crate::store::MemoryStore;

    #[test]
    fn binary_references_stay_opaque() {
        let doc = DocProperty::parse("data", "{BinaryRef}abc:123").unwrap();
        let property = to_property(&doc);
        assert_eq!(property.values, vec![Value::BinaryRef("abc:123".to_string())]);
        assert_eq!(property.kind, PropertyType::Binary);
    }

    #[test]
    fn untyped_values_match_converted_ones() {
        let stored = Property::single("count", PropertyType::Long, "5");
        assert!(same_content(&stored, &Property::single("count", PropertyType::Undefined, "5")));
        assert!(!same_content(&stored, &Property::single("count", PropertyType::Double, "5")));
        assert!(!same_content(&stored, &Property::multi("count", PropertyType::Long, ["5"])));
    }

    #[test]
    fn spec_carries_identity_and_protected_properties() {
        let store = MemoryStore::new();
        let node = DocNode::new("alice", 0)
            .with_property(DocProperty::single(JCR_PRIMARY_TYPE, PropertyType::Name, REP_USER))
            .with_property(DocProperty::single(JCR_UUID, PropertyType::Undefined, "U1"))
            .with_property(DocProperty::single(REP_PRINCIPAL_NAME, PropertyType::Undefined, "alice"))
            .with_property(DocProperty::single(REP_AUTHORIZABLE_ID, PropertyType::Undefined, "alice"))
            .with_property(DocProperty::single("profile", PropertyType::Undefined, "x"));
        let spec = node_spec(&store, store.root(), &node).unwrap();
        assert_eq!(spec.primary_type, REP_USER);
        assert_eq!(spec.identifier.as_deref(), Some("U1"));
        let names: Vec<_> = spec.properties.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec![REP_AUTHORIZABLE_ID, REP_PRINCIPAL_NAME]);
    }

    #[test]
    fn missing_type_uses_parent_default() {
        let store = MemoryStore::new();
        let node = DocNode::new("plain", 0)
            .with_property(DocProperty::multi(JCR_MIXIN_TYPES, PropertyType::Name, [MIX_REFERENCEABLE]));
        let spec = node_spec(&store, store.root(), &node).unwrap();
        assert_eq!(spec.primary_type, NT_UNSTRUCTURED);
        assert_eq!(spec.mixins, vec![MIX_REFERENCEABLE.to_string()]);
    }
}
