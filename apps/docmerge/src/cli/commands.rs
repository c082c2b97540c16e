//! # CLI Command Implementations

use crate::api;
use crate::config::DocmergeConfig;
use docmerge_core::{
    BinarySource, BlobInfo, ImportOptions, ImportResult, Session, VaultError,
    canonical_crypto_hash, primitives::MAX_DOCUMENT_SIZE,
};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

// =============================================================================
// PATH VALIDATION
// =============================================================================

/// Reject files larger than `max_size` before opening them.
fn validate_file_size(path: &Path, max_size: u64) -> Result<(), VaultError> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| VaultError::IoError(format!("Cannot read file metadata: {}", e)))?;

    if metadata.len() > max_size {
        return Err(VaultError::SerializationError(format!(
            "File size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            max_size
        )));
    }
    Ok(())
}

/// Canonicalize an input path and make sure it is a regular file.
fn validate_file_path(path: &Path) -> Result<PathBuf, VaultError> {
    let canonical = path.canonicalize().map_err(|e| {
        VaultError::IoError(format!("Invalid file path '{}': {}", path.display(), e))
    })?;

    if !canonical.is_file() {
        return Err(VaultError::IoError(format!(
            "Path '{}' is not a regular file",
            path.display()
        )));
    }

    Ok(canonical)
}

/// Resolve an output path against its canonical parent directory.
fn validate_output_path(path: &Path) -> Result<PathBuf, VaultError> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let canonical_parent = parent.canonicalize().map_err(|e| {
        VaultError::IoError(format!(
            "Invalid output directory '{}': {}",
            parent.display(),
            e
        ))
    })?;

    if !canonical_parent.is_dir() {
        return Err(VaultError::IoError(format!(
            "Output directory '{}' is not a valid directory",
            parent.display()
        )));
    }

    let filename = path
        .file_name()
        .ok_or_else(|| VaultError::IoError("Output path has no filename".to_string()))?;

    Ok(canonical_parent.join(filename))
}

// =============================================================================
// SERVER COMMAND
// =============================================================================

/// Start the HTTP server.
pub async fn cmd_server(db_path: &Path, host: &str, port: u16) -> Result<(), VaultError> {
    let session = open_session(db_path)?;

    println!("docmerge server starting");
    println!();
    println!("  Host:     {}", host);
    println!("  Port:     {}", port);
    println!("  Database: {}", db_path.display());
    println!();
    println!("Endpoints:");
    println!("  GET  /health       - Health check");
    println!("  GET  /status       - Tree status");
    println!("  GET  /node?path=   - Inspect one node");
    println!("  POST /import       - Import a DocView document");
    println!("  POST /export       - Export a subtree or the whole tree");
    println!("  GET  /hash         - BLAKE3 hash of the tree");
    println!();

    let addr = format!("{}:{}", host, port);
    api::run_server(&addr, session).await
}

// =============================================================================
// STATUS COMMAND
// =============================================================================

/// Show tree status.
pub fn cmd_status(db_path: &Path, json_mode: bool) -> Result<(), VaultError> {
    let session = open_session(db_path)?;
    let store = session.store();
    let checksum = session.checksum()?;

    if json_mode {
        let output = serde_json::json!({
            "database": db_path.to_string_lossy(),
            "node_count": store.node_count(),
            "policy_count": store.policy_count(),
            "namespace_count": store.namespaces().len(),
            "checksum": checksum,
        });
        print_json(&output);
        return Ok(());
    }

    println!("docmerge Tree Status");
    println!("====================");
    println!("Database:   {}", db_path.display());
    println!();
    println!("Nodes:      {}", store.node_count());
    println!("Policies:   {}", store.policy_count());
    println!("Namespaces: {}", store.namespaces().len());
    println!("Checksum:   {:016x}", checksum);

    Ok(())
}

// =============================================================================
// IMPORT COMMAND
// =============================================================================

/// Arguments of the `import` command.
#[derive(Debug, Clone)]
pub struct ImportArgs {
    pub file: PathBuf,
    pub target: String,
    pub attachments: Vec<String>,
    pub dry_run: bool,
}

/// Split `NODE_PATH@PROPERTY=FILE` into its parts.
pub fn parse_attachment(spec: &str) -> Result<(String, String, PathBuf), VaultError> {
    let invalid = || VaultError::InvalidValue {
        name: "attach".to_string(),
        message: format!("expected NODE_PATH@PROPERTY=FILE, got '{spec}'"),
    };
    let (location, file) = spec.split_once('=').ok_or_else(invalid)?;
    let (path, property) = location.rsplit_once('@').ok_or_else(invalid)?;
    if !path.starts_with('/') || property.is_empty() || file.is_empty() {
        return Err(invalid());
    }
    Ok((path.to_string(), property.to_string(), PathBuf::from(file)))
}

/// Merge a document into the tree and commit it.
pub fn cmd_import(
    db_path: &Path,
    config_path: &Path,
    json_mode: bool,
    args: &ImportArgs,
) -> Result<(), VaultError> {
    let config = DocmergeConfig::load(config_path)?;
    let filter = config.path_filter()?;
    let mut options: ImportOptions = config.import_options();

    for spec in &args.attachments {
        let (path, property, file) = parse_attachment(spec)?;
        let file = validate_file_path(&file)?;
        options = options.with_binary(path, property, BlobInfo::single(BinarySource::File(file)));
    }

    let validated = validate_file_path(&args.file)?;
    validate_file_size(&validated, MAX_DOCUMENT_SIZE)?;
    let input = File::open(&validated)
        .map_err(|e| VaultError::IoError(format!("{}: {e}", validated.display())))?;

    tracing::info!(file = %validated.display(), target_path = %args.target, "importing");

    let mut session = open_session(db_path)?;
    let result = session.import_docview(BufReader::new(input), &args.target, &filter, options)?;

    if args.dry_run {
        tracing::info!("dry run, nothing committed");
    } else {
        session.commit()?;
    }

    if json_mode {
        print_json(&result);
    } else {
        print_ledger(&result);
    }
    Ok(())
}

/// One line per recorded path, like `A /content/page`.
fn print_ledger(result: &ImportResult) {
    for (path, mutation) in result.ledger.entries() {
        match result.ledger.error(path) {
            Some(message) => println!("{} {}  ({})", mutation.code(), path, message),
            None => println!("{} {}", mutation.code(), path),
        }
    }
    println!();
    println!(
        "{} modified, {} errors, {} checked in",
        result.modified, result.errors, result.checked_in
    );
}

// =============================================================================
// EXPORT COMMAND
// =============================================================================

/// Export a subtree as DocView, or the whole tree in canonical form.
pub fn cmd_export(
    db_path: &Path,
    output: &Path,
    path: &str,
    format: &str,
) -> Result<(), VaultError> {
    let validated_output = validate_output_path(output)?;
    let session = open_session(db_path)?;

    let data = match format {
        "docview" | "xml" => session.export_docview(path)?.into_bytes(),
        "canonical" => {
            let data = session.export_canonical()?;
            println!("Checksum: {}", session.checksum()?);
            data
        }
        _ => {
            return Err(VaultError::SerializationError(format!(
                "Unknown format: {}. Use: docview, canonical",
                format
            )));
        }
    };

    std::fs::write(&validated_output, &data)
        .map_err(|e| VaultError::IoError(format!("Write file: {}", e)))?;

    println!("Exported {} bytes to {}", data.len(), validated_output.display());

    Ok(())
}

// =============================================================================
// INIT COMMAND
// =============================================================================

/// Create an empty database.
pub fn cmd_init(db_path: &Path, force: bool) -> Result<(), VaultError> {
    if db_path.exists() {
        if !force {
            return Err(VaultError::ItemExists(format!(
                "{} (use --force to overwrite)",
                db_path.display()
            )));
        }
        std::fs::remove_file(db_path)
            .map_err(|e| VaultError::IoError(format!("{}: {e}", db_path.display())))?;
    }

    let session = open_session(db_path)?;
    session.commit()?;
    println!("Initialized new database at {}", db_path.display());

    Ok(())
}

// =============================================================================
// HASH COMMAND
// =============================================================================

/// BLAKE3 hash of the canonical export.
pub fn cmd_hash(db_path: &Path, json_mode: bool) -> Result<(), VaultError> {
    let session = open_session(db_path)?;
    let hash = canonical_crypto_hash(session.store())?;

    if json_mode {
        let output = serde_json::json!({
            "algorithm": "blake3",
            "hash": hash,
            "node_count": session.store().node_count(),
        });
        print_json(&output);
    } else {
        println!("{}", hash);
    }
    Ok(())
}

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

/// Open the redb database at `db_path`, creating it when missing.
pub fn open_session(db_path: &Path) -> Result<Session, VaultError> {
    Session::with_redb(db_path)
}

fn print_json<T: serde::Serialize>(value: &T) {
    println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use docmerge_core::ContentStore;

    const DOC: &str = r#"<jcr:root xmlns:jcr="http://www.jcp.org/jcr/1.0" xmlns:nt="http://www.jcp.org/jcr/nt/1.0" jcr:primaryType="nt:unstructured" title="Home"><teaser jcr:primaryType="nt:unstructured"/></jcr:root>"#;

    #[test]
    fn attachment_specs() {
        let (path, property, file) =
            parse_attachment("/content/file/jcr:content@jcr:data=./logo.png").unwrap();
        assert_eq!(path, "/content/file/jcr:content");
        assert_eq!(property, "jcr:data");
        assert_eq!(file, PathBuf::from("./logo.png"));

        assert!(parse_attachment("no-separator").is_err());
        assert!(parse_attachment("relative@jcr:data=x").is_err());
        assert!(parse_attachment("/a@=x").is_err());
        assert!(parse_attachment("/a@p=").is_err());
    }

    #[test]
    fn import_commits_to_database() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("tree.redb");
        let doc = dir.path().join("page.xml");
        std::fs::write(&doc, DOC).unwrap();

        cmd_init(&db, false).unwrap();
        assert!(cmd_init(&db, false).is_err());

        let args = ImportArgs {
            file: doc,
            target: "/home".to_string(),
            attachments: Vec::new(),
            dry_run: false,
        };
        cmd_import(&db, &dir.path().join("absent.toml"), true, &args).unwrap();

        let session = open_session(&db).unwrap();
        assert!(
            session
                .store()
                .node_at("/home/teaser")
                .unwrap()
                .is_some()
        );
    }

    #[test]
    fn dry_run_leaves_database_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("tree.redb");
        let doc = dir.path().join("page.xml");
        std::fs::write(&doc, DOC).unwrap();

        let args = ImportArgs {
            file: doc,
            target: "/home".to_string(),
            attachments: Vec::new(),
            dry_run: true,
        };
        cmd_import(&db, &dir.path().join("absent.toml"), false, &args).unwrap();

        let session = open_session(&db).unwrap();
        assert!(session.store().node_at("/home").unwrap().is_none());
    }

    #[test]
    fn export_writes_docview() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("tree.redb");
        let doc = dir.path().join("page.xml");
        std::fs::write(&doc, DOC).unwrap();
        let args = ImportArgs {
            file: doc,
            target: "/home".to_string(),
            attachments: Vec::new(),
            dry_run: false,
        };
        cmd_import(&db, &dir.path().join("absent.toml"), true, &args).unwrap();

        let out = dir.path().join("home.xml");
        cmd_export(&db, &out, "/home", "docview").unwrap();
        let xml = std::fs::read_to_string(&out).unwrap();
        assert!(xml.contains("title=\"Home\""));
        assert!(xml.contains("<teaser"));

        assert!(cmd_export(&db, &out, "/", "yaml").is_err());
    }
}
