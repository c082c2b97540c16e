//! # Reserved Names and Constants
//!
//! Fixed names and limits the import engine relies on.
//!
//! These are compiled in and immutable at runtime:
//! - reserved element and property names of the DocView format
//! - the set of identity/versioning properties that can only be established
//!   through privileged node creation
//! - candidate roots for the stash scratch location
//! - format magic for canonical exports

/// Reserved root element name. Its effective name is taken from the target path.
pub const JCR_ROOT: &str = "jcr:root";

pub const JCR_PRIMARY_TYPE: &str = "jcr:primaryType";
pub const JCR_MIXIN_TYPES: &str = "jcr:mixinTypes";
pub const JCR_UUID: &str = "jcr:uuid";
pub const JCR_IS_CHECKED_OUT: &str = "jcr:isCheckedOut";
pub const JCR_BASE_VERSION: &str = "jcr:baseVersion";
pub const JCR_PREDECESSORS: &str = "jcr:predecessors";
pub const JCR_SUCCESSORS: &str = "jcr:successors";
pub const JCR_VERSION_HISTORY: &str = "jcr:versionHistory";
pub const JCR_CONTENT: &str = "jcr:content";
pub const JCR_DATA: &str = "jcr:data";

pub const NT_BASE: &str = "nt:base";
pub const NT_UNSTRUCTURED: &str = "nt:unstructured";
pub const NT_FOLDER: &str = "nt:folder";
pub const NT_FILE: &str = "nt:file";
pub const NT_RESOURCE: &str = "nt:resource";
pub const NT_HIERARCHY_NODE: &str = "nt:hierarchyNode";
pub const OAK_UNSTRUCTURED: &str = "oak:Unstructured";
pub const REP_ROOT: &str = "rep:root";

pub const MIX_REFERENCEABLE: &str = "mix:referenceable";
pub const MIX_SIMPLE_VERSIONABLE: &str = "mix:simpleVersionable";
pub const MIX_VERSIONABLE: &str = "mix:versionable";
pub const MIX_CREATED: &str = "mix:created";
pub const MIX_LAST_MODIFIED: &str = "mix:lastModified";
pub const MIX_LOCKABLE: &str = "mix:lockable";
pub const MIX_TITLE: &str = "mix:title";

// =============================================================================
// ACCESS CONTROL
// =============================================================================

pub const REP_POLICY: &str = "rep:policy";
pub const REP_CUG_POLICY_NODE: &str = "rep:cugPolicy";
pub const REP_PRINCIPAL_POLICY_NODE: &str = "rep:principalPolicy";
pub const REP_RESTRICTIONS_NODE: &str = "rep:restrictions";

pub const REP_ACCESS_CONTROLLABLE: &str = "rep:AccessControllable";
pub const REP_CUG_MIXIN: &str = "rep:CugMixin";
pub const REP_PRINCIPAL_BASED_MIXIN: &str = "rep:PrincipalBasedMixin";

pub const REP_ACL: &str = "rep:ACL";
pub const REP_ACE: &str = "rep:ACE";
pub const REP_GRANT_ACE: &str = "rep:GrantACE";
pub const REP_DENY_ACE: &str = "rep:DenyACE";
pub const REP_RESTRICTIONS: &str = "rep:Restrictions";
pub const REP_CUG_POLICY: &str = "rep:CugPolicy";
pub const REP_PRINCIPAL_POLICY: &str = "rep:PrincipalPolicy";
pub const REP_PRINCIPAL_ENTRY: &str = "rep:PrincipalEntry";

pub const REP_PRINCIPAL_NAME: &str = "rep:principalName";
pub const REP_PRINCIPAL_NAMES: &str = "rep:principalNames";
pub const REP_PRIVILEGES: &str = "rep:privileges";
pub const REP_EFFECTIVE_PATH: &str = "rep:effectivePath";

/// Mixins that carry access control content and are never dropped by a
/// property/mixin reconciliation unless ACL handling is overwrite or clear.
pub const ACCESS_CONTROL_MIXINS: [&str; 3] =
    [REP_ACCESS_CONTROLLABLE, REP_CUG_MIXIN, REP_PRINCIPAL_BASED_MIXIN];

// =============================================================================
// AUTHORIZABLES
// =============================================================================

pub const REP_AUTHORIZABLE: &str = "rep:Authorizable";
pub const REP_AUTHORIZABLE_FOLDER: &str = "rep:AuthorizableFolder";
pub const REP_USER: &str = "rep:User";
pub const REP_SYSTEM_USER: &str = "rep:SystemUser";
pub const REP_GROUP: &str = "rep:Group";
pub const REP_AUTHORIZABLE_ID: &str = "rep:authorizableId";
pub const REP_MEMBERS: &str = "rep:members";
/// External security identifier kept across authorizable updates.
pub const REP_EXTERNAL_ID: &str = "rep:externalId";

// =============================================================================
// IMPORT RULES
// =============================================================================

/// Properties of a DocView node that are never applied through ordinary
/// property writes. They establish identity, type and version state and are
/// only honoured by privileged node creation.
pub const PROTECTED_PROPERTIES: [&str; 8] = [
    JCR_PRIMARY_TYPE,
    JCR_MIXIN_TYPES,
    JCR_UUID,
    JCR_IS_CHECKED_OUT,
    JCR_BASE_VERSION,
    JCR_PREDECESSORS,
    JCR_SUCCESSORS,
    JCR_VERSION_HISTORY,
];

/// Returns true if `name` is one of the [`PROTECTED_PROPERTIES`].
#[must_use]
pub fn is_protected_property(name: &str) -> bool {
    PROTECTED_PROPERTIES.contains(&name)
}

/// Candidate parents for the stash scratch node, tried in order.
pub const STASH_ROOTS: [&str; 4] = ["/tmp", "/var", "/etc", "/content"];

/// Name prefix of stash scratch nodes.
pub const STASH_NODE_PREFIX: &str = "docmerge-stash-";

/// Type tag marking a binary value as an opaque external reference.
pub const BINARY_REF: &str = "BinaryRef";

// =============================================================================
// NAMESPACES
// =============================================================================

/// Namespaces every store knows about.
pub const BUILTIN_NAMESPACES: [(&str, &str); 8] = [
    ("jcr", "http://www.jcp.org/jcr/1.0"),
    ("nt", "http://www.jcp.org/jcr/nt/1.0"),
    ("mix", "http://www.jcp.org/jcr/mix/1.0"),
    ("sv", "http://www.jcp.org/jcr/sv/1.0"),
    ("rep", "internal"),
    ("oak", "http://jackrabbit.apache.org/oak/ns/1.0"),
    ("sling", "http://sling.apache.org/jcr/sling/1.0"),
    ("xml", "http://www.w3.org/XML/1998/namespace"),
];

// =============================================================================
// LIMITS
// =============================================================================

/// Maximum nesting depth accepted by the parser.
///
/// The importer stack is vector backed, this only bounds hostile input.
pub const MAX_DOCUMENT_DEPTH: usize = 4096;

/// Maximum size of a single document accepted by the binary (64 MB).
pub const MAX_DOCUMENT_SIZE: u64 = 64 * 1024 * 1024;
