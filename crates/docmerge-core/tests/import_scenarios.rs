//! # Import Scenario Tests
//!
//! End-to-end imports through [`Session`]: reference scenarios, idempotence,
//! the resolution matrix, stash recovery and group memberships.

use docmerge_core::{
    AclHandling, ConflictPolicy, ContentStore, FilterSet, ImportLedger, ImportMode, ImportOptions,
    MemoryStore, Mutation, PathFilter, Session, SubtreeStash,
};
use docmerge_core::primitives::{NT_UNSTRUCTURED, REP_MEMBERS, STASH_NODE_PREFIX};

const NS: &str = r#"xmlns:jcr="http://www.jcp.org/jcr/1.0" xmlns:nt="http://www.jcp.org/jcr/nt/1.0" xmlns:mix="http://www.jcp.org/jcr/mix/1.0" xmlns:rep="internal""#;

fn doc(body: &str) -> String {
    format!(r#"<?xml version="1.0" encoding="UTF-8"?><jcr:root {NS} {body}"#)
}

fn import(session: &mut Session, target: &str, body: &str) -> ImportLedger {
    import_with(session, target, body, &PathFilter::new(), ImportOptions::new())
}

fn import_with(
    session: &mut Session,
    target: &str,
    body: &str,
    filter: &PathFilter,
    options: ImportOptions,
) -> ImportLedger {
    session
        .import_docview(doc(body).as_bytes(), target, filter, options)
        .expect("import succeeds")
        .ledger
}

fn only_nops(ledger: &ImportLedger) -> Vec<(String, Mutation)> {
    ledger
        .entries()
        .filter(|(_, m)| *m != Mutation::Nop)
        .map(|(p, m)| (p.to_string(), m))
        .collect()
}

// =============================================================================
// REFERENCE SCENARIOS
// =============================================================================

mod scenarios {
    use super::*;

    const NODE: &str = r#"jcr:primaryType="nt:unstructured" jcr:mixinTypes="[mix:versionable]" jcr:uuid="U1" jcr:isCheckedOut="{Boolean}false" title="one" extra="x"/>"#;

    /// A: a new versionable node is created and scheduled for checkin.
    #[test]
    fn create_into_empty_store() {
        let mut session = Session::new();
        let ledger = import(&mut session, "/node", NODE);
        let entries: Vec<_> = ledger.entries().collect();
        assert_eq!(entries, vec![("/node", Mutation::Created)]);
        assert_eq!(ledger.pending_checkins().collect::<Vec<_>>(), vec!["/node"]);
        let node = session.store().node_at("/node").expect("lookup").expect("node");
        assert_eq!(
            session.store().identifier_of(node).expect("identifier").as_deref(),
            Some("U1")
        );
    }

    /// B: a changed value under replace modifies the node and drops
    /// properties the document no longer lists.
    #[test]
    fn replace_modifies_and_removes() {
        let mut session = Session::new();
        import(&mut session, "/node", NODE);
        let ledger = import(
            &mut session,
            "/node",
            r#"jcr:primaryType="nt:unstructured" jcr:mixinTypes="[mix:versionable]" jcr:uuid="U1" jcr:isCheckedOut="{Boolean}false" title="two"/>"#,
        );
        assert_eq!(ledger.get("/node"), Some(Mutation::Modified));
        let store = session.store();
        let node = store.node_at("/node").expect("lookup").expect("node");
        assert_eq!(
            store.property(node, "title").expect("get").expect("title").first_text(),
            Some("two")
        );
        assert!(!store.has_property(node, "extra").expect("has"));
    }

    /// C: under the legacy policy, a node whose identifier lives elsewhere is
    /// skipped and its children land below the existing holder.
    #[test]
    fn legacy_redirect_to_holder() {
        let mut session = Session::new();
        import(
            &mut session,
            "/a",
            r#"jcr:primaryType="nt:unstructured"><held jcr:mixinTypes="[mix:referenceable]" jcr:uuid="U1" keep="yes"/></jcr:root>"#,
        );
        let options = ImportOptions::new().with_conflict_policy(ConflictPolicy::LegacySiblingCheck);
        let ledger = import_with(
            &mut session,
            "/b",
            r#"jcr:primaryType="nt:unstructured"><moved jcr:mixinTypes="[mix:referenceable]" jcr:uuid="U1"><c/></moved></jcr:root>"#,
            &PathFilter::new(),
            options,
        );

        let store = session.store();
        assert!(store.node_at("/b/moved").expect("lookup").is_none());
        assert!(store.node_at("/a/held/c").expect("lookup").is_some());
        let held = store.node_at("/a/held").expect("lookup").expect("held");
        assert!(store.has_property(held, "keep").expect("has"));
        assert_eq!(ledger.path_remap().map("/b/moved"), "/a/held");
        assert_eq!(ledger.get("/a/held/c"), Some(Mutation::Created));
    }
}

// =============================================================================
// IDEMPOTENCE
// =============================================================================

mod idempotence {
    use super::*;

    const TREE: &str = r#"jcr:primaryType="nt:unstructured" title="Home" count="{Long}3" tags="[a,b\,c]">
        <hero jcr:primaryType="nt:unstructured" jcr:mixinTypes="[mix:referenceable]" jcr:uuid="H1" flag="{Boolean}true"/>
        <item jcr:primaryType="nt:unstructured" pos="1"/>
        <item_x005b_2_x005d_ jcr:primaryType="nt:unstructured" pos="2"/>
        <folder jcr:primaryType="nt:folder"/>
    </jcr:root>"#;

    #[test]
    fn same_document_twice_is_all_nop() {
        let mut session = Session::new();
        let first = import(&mut session, "/page", TREE);
        assert_eq!(first.get("/page/item[2]"), Some(Mutation::Created));
        let checksum = session.checksum().expect("checksum");

        let second = import(&mut session, "/page", TREE);
        assert!(only_nops(&second).is_empty(), "{:?}", only_nops(&second));
        let first_paths: Vec<_> = first.entries().map(|(p, _)| p.to_string()).collect();
        let second_paths: Vec<_> = second.entries().map(|(p, _)| p.to_string()).collect();
        assert_eq!(first_paths, second_paths);
        assert_eq!(session.checksum().expect("checksum"), checksum);
    }

    #[test]
    fn exported_document_reimports_as_nop() {
        let mut session = Session::new();
        import(&mut session, "/page", TREE);
        let exported = session.export_docview("/page").expect("export");
        let ledger = session
            .import_docview(exported.as_bytes(), "/page", &PathFilter::new(), ImportOptions::new())
            .expect("reimport")
            .ledger;
        assert!(only_nops(&ledger).is_empty(), "{:?}", only_nops(&ledger));
        assert_eq!(ledger.get("/page/hero"), Some(Mutation::Nop));
    }

    #[test]
    fn exported_access_control_reimports_as_nop() {
        let mut session = Session::new();
        let body = r#"jcr:primaryType="nt:unstructured"><rep:policy jcr:primaryType="rep:ACL"><allow jcr:primaryType="rep:GrantACE" rep:principalName="everyone" rep:privileges="{Name}[jcr:read]"/></rep:policy></jcr:root>"#;
        let options = || ImportOptions::new().with_acl_handling(AclHandling::Overwrite);
        import_with(&mut session, "/page", body, &PathFilter::new(), options());
        let exported = session.export_docview("/page").expect("export");
        let ledger = session
            .import_docview(exported.as_bytes(), "/page", &PathFilter::new(), options())
            .expect("reimport")
            .ledger;
        assert_eq!(ledger.get("/page/rep:policy"), Some(Mutation::Nop));
    }
}

// =============================================================================
// RESOLUTION MATRIX
// =============================================================================

mod resolution {
    use super::*;

    fn seeded() -> Session {
        let mut session = Session::new();
        import(
            &mut session,
            "/page",
            r#"jcr:primaryType="nt:unstructured"><x jcr:mixinTypes="[mix:referenceable]" jcr:uuid="X1" v="1"/><plain v="1"/></jcr:root>"#,
        );
        session
    }

    fn in_mode(mode: ImportMode) -> PathFilter {
        PathFilter::new().with_set(FilterSet::new("/page").with_mode(mode))
    }

    #[test]
    fn no_identifier_no_child_creates() {
        let mut session = seeded();
        let ledger = import_with(
            &mut session,
            "/page",
            r#"jcr:primaryType="nt:unstructured"><fresh/></jcr:root>"#,
            &in_mode(ImportMode::Merge),
            ImportOptions::new(),
        );
        assert_eq!(ledger.get("/page/fresh"), Some(Mutation::Created));
    }

    #[test]
    fn no_identifier_with_child_updates() {
        let mut session = seeded();
        let ledger = import_with(
            &mut session,
            "/page",
            r#"jcr:primaryType="nt:unstructured"><plain v="2"/></jcr:root>"#,
            &in_mode(ImportMode::Update),
            ImportOptions::new(),
        );
        assert_eq!(ledger.get("/page/plain"), Some(Mutation::Modified));
        assert_eq!(ledger.get("/page/x"), None);
    }

    #[test]
    fn identifier_at_target_updates_in_place() {
        let mut session = seeded();
        let ledger = import(
            &mut session,
            "/page",
            r#"jcr:primaryType="nt:unstructured"><x jcr:primaryType="nt:unstructured" jcr:mixinTypes="[mix:referenceable]" jcr:uuid="X1" v="2"/><plain v="1"/></jcr:root>"#,
        );
        assert_eq!(ledger.get("/page/x"), Some(Mutation::Modified));
        let store = session.store();
        let x = store.node_at("/page/x").expect("lookup").expect("x");
        assert_eq!(store.identifier_of(x).expect("id").as_deref(), Some("X1"));
    }

    #[test]
    fn identity_mismatch_replaces_under_replace() {
        let mut session = seeded();
        let ledger = import(
            &mut session,
            "/page",
            r#"jcr:primaryType="nt:unstructured"><x jcr:primaryType="nt:unstructured" jcr:mixinTypes="[mix:referenceable]" jcr:uuid="X2"/><plain v="1"/></jcr:root>"#,
        );
        assert_eq!(ledger.get("/page/x"), Some(Mutation::Replaced));
        let store = session.store();
        let x = store.node_at("/page/x").expect("lookup").expect("x");
        assert_eq!(store.identifier_of(x).expect("id").as_deref(), Some("X2"));
        assert!(!store.has_property(x, "v").expect("has"));
        let children: Vec<_> = store
            .children(store.node_at("/page").expect("lookup").expect("page"))
            .expect("children")
            .into_iter()
            .map(|c| store.name_of(c).expect("name"))
            .collect();
        assert_eq!(children, vec!["x", "plain"]);
    }

    #[test]
    fn identity_mismatch_keeps_identity_under_merge() {
        let mut session = seeded();
        let ledger = import_with(
            &mut session,
            "/page",
            r#"jcr:primaryType="nt:unstructured"><x jcr:mixinTypes="[mix:referenceable]" jcr:uuid="X2"/></jcr:root>"#,
            &in_mode(ImportMode::Merge),
            ImportOptions::new(),
        );
        assert_eq!(ledger.get("/page/x"), Some(Mutation::Nop));
        let store = session.store();
        let x = store.node_at("/page/x").expect("lookup").expect("x");
        assert_eq!(store.identifier_of(x).expect("id").as_deref(), Some("X1"));
    }

    #[test]
    fn type_change_only_under_replace() {
        let mut session = seeded();
        let body = r#"jcr:primaryType="nt:unstructured"><x jcr:mixinTypes="[mix:referenceable]" jcr:uuid="X1" v="1"/><plain jcr:primaryType="oak:Unstructured" v="1"/></jcr:root>"#;
        import_with(&mut session, "/page", body, &in_mode(ImportMode::Update), ImportOptions::new());
        let plain = session.store().node_at("/page/plain").expect("lookup").expect("plain");
        assert_eq!(session.store().primary_type(plain).expect("type"), NT_UNSTRUCTURED);

        let ledger = import(&mut session, "/page", body);
        assert_eq!(ledger.get("/page/plain"), Some(Mutation::Modified));
        assert_eq!(session.store().primary_type(plain).expect("type"), "oak:Unstructured");
    }

    #[test]
    fn elsewhere_with_force_remove_moves_identity() {
        let mut session = seeded();
        let options = ImportOptions::new().with_conflict_policy(ConflictPolicy::ForceRemoveConflicting);
        let ledger = import_with(
            &mut session,
            "/other",
            r#"jcr:primaryType="nt:unstructured"><y jcr:mixinTypes="[mix:referenceable]" jcr:uuid="X1"/></jcr:root>"#,
            &PathFilter::new().with_set(FilterSet::new("/other")),
            options,
        );
        assert_eq!(ledger.get("/page/x"), Some(Mutation::Deleted));
        assert_eq!(ledger.get("/other/y"), Some(Mutation::Created));
        let store = session.store();
        let holder = store.node_by_identifier("X1").expect("lookup").expect("holder");
        assert_eq!(store.path_of(holder).expect("path"), "/other/y");
    }
}

// =============================================================================
// STASH
// =============================================================================

mod stash {
    use super::*;
    use docmerge_core::{Property, PropertyType};

    fn snapshot(store: &MemoryStore, path: &str) -> (Vec<String>, Vec<Property>) {
        let node = store.node_at(path).expect("lookup").expect("node");
        let children = store
            .children(node)
            .expect("children")
            .into_iter()
            .map(|c| store.name_of(c).expect("name"))
            .collect();
        (children, store.properties(node).expect("properties"))
    }

    #[test]
    fn stash_then_recover_restores_everything() {
        let mut store = MemoryStore::new();
        let root = store.root();
        let page = store.add_child(root, "page", Some(NT_UNSTRUCTURED)).expect("add");
        store.add_child(page, "a", None).expect("add");
        store.add_child(page, "b", None).expect("add");
        store
            .set_property(page, Property::single("title", PropertyType::String, "t"))
            .expect("set");
        store
            .set_property(page, Property::multi("tags", PropertyType::String, ["x", "y"]))
            .expect("set");
        let before = snapshot(&store, "/page");

        let stash = SubtreeStash::stash(&mut store, page, true).expect("stash");
        assert!(store.children(page).expect("children").is_empty());
        assert!(store.node_at(stash.scratch_path()).expect("lookup").is_some());
        let scratch = stash.scratch_path().to_string();

        let mut ledger = ImportLedger::new();
        let complete = stash
            .recover(&mut store, page, ImportMode::Replace, &mut ledger)
            .expect("recover");
        assert!(complete);
        assert_eq!(snapshot(&store, "/page"), before);
        assert!(store.node_at(&scratch).expect("lookup").is_none());
        assert_eq!(ledger.num_errors(), 0);
    }

    /// A rejected property on a recreated node must not strand the old
    /// children in the scratch area.
    #[test]
    fn failed_replace_recovers_children() {
        let mut session = Session::new();
        import(
            &mut session,
            "/page",
            r#"jcr:primaryType="nt:unstructured" jcr:mixinTypes="[mix:referenceable]" jcr:uuid="OLD"><child jcr:primaryType="nt:unstructured"/></jcr:root>"#,
        );

        let ledger = import(
            &mut session,
            "/page",
            r#"jcr:primaryType="nt:unstructured" jcr:mixinTypes="[mix:referenceable]" jcr:uuid="NEW" count="{Long}abc"/>"#,
        );
        assert_eq!(ledger.get("/page"), Some(Mutation::Error));
        assert!(ledger.errors().any(|(p, m)| p == "/page" && m.contains("count")));

        let store = session.store();
        assert!(store.node_at("/page/child").expect("lookup").is_some());
        let root_children: Vec<_> = store
            .children(store.root())
            .expect("children")
            .into_iter()
            .map(|c| store.name_of(c).expect("name"))
            .collect();
        assert!(
            root_children.iter().all(|n| !n.starts_with(STASH_NODE_PREFIX)),
            "scratch node left behind: {root_children:?}"
        );
    }
}

// =============================================================================
// MEMBERSHIPS
// =============================================================================

mod memberships {
    use super::*;
    use docmerge_core::PropertyType;

    #[test]
    fn membership_property_is_a_weak_reference_list() {
        let mut session = Session::new();
        import(
            &mut session,
            "/groups",
            r#"jcr:primaryType="rep:AuthorizableFolder"><g jcr:primaryType="rep:Group" jcr:uuid="G1" rep:principalName="g" rep:authorizableId="g" rep:members="{WeakReference}[M1]"/></jcr:root>"#,
        );
        let store = session.store();
        let group = store.node_at("/groups/g").expect("lookup").expect("group");
        let members = store.property(group, REP_MEMBERS).expect("get").expect("members");
        assert_eq!(members.kind, PropertyType::WeakReference);
        assert!(members.multiple);
    }
}
