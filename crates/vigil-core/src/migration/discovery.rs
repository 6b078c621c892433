//! Migration discovery
//!
//! Scripts live in `<root>/<backend kind>/` and are named
//! `V{version}__{description}.{ext}`, e.g. `V003__create_prompts.sql`.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::fs;
use std::path::Path;

use super::checksum::checksum;
use super::types::Migration;
use crate::error::{StorageError, StorageResult};
use crate::storage::BackendKind;

static FILE_NAME: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^V([0-9]+)__([^.]+(?:\.[^.]+)*?)\.([A-Za-z0-9]+)$").ok());

/// Split a script file name into version and description
pub fn parse_file_name(file_name: &str) -> Option<(String, String)> {
    let caps = FILE_NAME.as_ref()?.captures(file_name)?;
    let version = caps.get(1)?.as_str().to_string();
    let description = caps.get(2)?.as_str().to_string();
    Some((version, description))
}

/// Load every script for `kind` under `root`, ordered by version
///
/// A missing directory yields no migrations. Unparseable names, duplicate
/// versions and mixed version widths are configuration errors.
pub fn discover(root: &Path, kind: BackendKind) -> StorageResult<Vec<Migration>> {
    let dir = root.join(kind.as_str());
    if !dir.is_dir() {
        tracing::debug!(dir = %dir.display(), "no migration directory for backend");
        return Ok(Vec::new());
    }

    let mut migrations = Vec::new();
    for entry in fs::read_dir(&dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            return Err(StorageError::config(format!(
                "migration file name is not valid UTF-8: {}",
                path.display()
            )));
        };
        if file_name.starts_with('.') || !path.is_file() {
            continue;
        }

        let (version, name) = parse_file_name(file_name).ok_or_else(|| {
            StorageError::config(format!(
                "unrecognized migration file '{}' in {} (expected V{{version}}__{{description}}.{{ext}})",
                file_name,
                dir.display()
            ))
        })?;

        let bytes = fs::read(&path)?;
        let checksum = checksum(&bytes);
        let content = String::from_utf8(bytes).map_err(|_| {
            StorageError::config(format!("migration {} is not valid UTF-8", path.display()))
        })?;

        migrations.push(Migration {
            version,
            name,
            content,
            checksum,
            path,
        });
    }

    migrations.sort_by(|a, b| Migration::compare_versions(&a.version, &b.version));
    check_versions(&migrations, &dir)?;
    Ok(migrations)
}

fn check_versions(migrations: &[Migration], dir: &Path) -> StorageResult<()> {
    let mut seen = HashSet::new();
    for migration in migrations {
        if !seen.insert(migration.version.as_str()) {
            return Err(StorageError::config(format!(
                "duplicate migration version {} in {}",
                migration.version,
                dir.display()
            )));
        }
    }

    let mut widths = migrations.iter().map(|m| m.version.len());
    if let Some(first) = widths.next() {
        if widths.any(|w| w != first) {
            let versions: Vec<&str> = migrations.iter().map(|m| m.version.as_str()).collect();
            return Err(StorageError::config(format!(
                "migration versions in {} mix widths: {}",
                dir.display(),
                versions.join(", ")
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tree(files: &[(&str, &str)]) -> TempDir {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("sqlite");
        fs::create_dir_all(&dir).unwrap();
        for (name, content) in files {
            fs::write(dir.join(name), content).unwrap();
        }
        root
    }

    #[test]
    fn test_parse_file_name() {
        assert_eq!(
            parse_file_name("V001__create_sessions.sql"),
            Some(("001".to_string(), "create_sessions".to_string()))
        );
        assert_eq!(
            parse_file_name("V20240501120000__add.index.v2.sql"),
            Some(("20240501120000".to_string(), "add.index.v2".to_string()))
        );
        assert_eq!(parse_file_name("V1_create.sql"), None);
        assert_eq!(parse_file_name("001__create.sql"), None);
        assert_eq!(parse_file_name("Vx__create.sql"), None);
        assert_eq!(parse_file_name("V1__.sql"), None);
    }

    #[test]
    fn test_discover_orders_numerically() {
        let root = tree(&[
            ("V010__later.sql", "SELECT 10;"),
            ("V002__second.sql", "SELECT 2;"),
            ("V001__first.sql", "SELECT 1;"),
        ]);

        let found = discover(root.path(), BackendKind::Sqlite).unwrap();
        let versions: Vec<&str> = found.iter().map(|m| m.version.as_str()).collect();
        assert_eq!(versions, ["001", "002", "010"]);
        assert_eq!(found[0].name, "first");
        assert_eq!(found[0].content, "SELECT 1;");
        assert_eq!(found[0].checksum, checksum(b"SELECT 1;"));
    }

    #[test]
    fn test_discover_skips_dotfiles_and_directories() {
        let root = tree(&[("V001__first.sql", "SELECT 1;"), (".DS_Store", "junk")]);
        fs::create_dir_all(root.path().join("sqlite").join("archive")).unwrap();

        let found = discover(root.path(), BackendKind::Sqlite).unwrap();
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn test_discover_missing_tree_is_empty() {
        let root = tree(&[("V001__first.sql", "SELECT 1;")]);
        assert!(discover(root.path(), BackendKind::Postgres).unwrap().is_empty());
    }

    #[test]
    fn test_discover_rejects_bad_names() {
        let root = tree(&[("V001__first.sql", "SELECT 1;"), ("notes.txt", "todo")]);
        let err = discover(root.path(), BackendKind::Sqlite).unwrap_err();
        assert!(matches!(err, StorageError::Configuration(_)));
        assert!(err.to_string().contains("notes.txt"));
    }

    #[test]
    fn test_discover_rejects_duplicates() {
        let root = tree(&[("V001__first.sql", "SELECT 1;"), ("V001__again.sql", "SELECT 1;")]);
        let err = discover(root.path(), BackendKind::Sqlite).unwrap_err();
        assert!(err.to_string().contains("duplicate migration version 001"));
    }

    #[test]
    fn test_discover_rejects_mixed_widths() {
        let root = tree(&[("V001__first.sql", "SELECT 1;"), ("V2__second.sql", "SELECT 2;")]);
        let err = discover(root.path(), BackendKind::Sqlite).unwrap_err();
        assert!(matches!(err, StorageError::Configuration(_)));
        assert!(err.to_string().contains("mix widths"));
    }
}
