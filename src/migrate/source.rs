// src/migrate/source.rs
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use sha2::{Digest, Sha256};
use std::path::Path;

use super::MigrateError;

/// One schema migration, loaded from a `<version>_<name>.sql` file. The
/// checksum pins the file contents so an edit after the fact is caught
/// instead of silently ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    pub version: i64,
    pub name: String,
    pub sql: String,
    pub checksum: String,
}

impl Migration {
    pub fn new(version: i64, name: impl Into<String>, sql: impl Into<String>) -> Self {
        let sql = sql.into();
        let checksum = checksum(&sql);
        Self {
            version,
            name: name.into(),
            sql,
            checksum,
        }
    }

    /// File-style label for logs: `0001_create_users`.
    pub fn label(&self) -> String {
        format!("{:04}_{}", self.version, self.name)
    }
}

pub(crate) fn checksum(sql: &str) -> String {
    BASE64.encode(Sha256::digest(sql.as_bytes()))
}

/// Read every `*.sql` file in `dir` and return the migrations sorted by
/// version. Non-SQL files are ignored; an SQL file that does not follow the
/// `<version>_<name>.sql` convention is an error, not a skip.
pub async fn load_dir(dir: &Path) -> Result<Vec<Migration>, MigrateError> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| MigrateError::ReadDir {
            dir: dir.display().to_string(),
            reason: e.to_string(),
        })?;

    let mut migrations = Vec::new();
    loop {
        let entry = entries
            .next_entry()
            .await
            .map_err(|e| MigrateError::ReadDir {
                dir: dir.display().to_string(),
                reason: e.to_string(),
            })?;
        let Some(entry) = entry else { break };

        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) != Some("sql") {
            continue;
        }
        let file = entry.file_name().to_string_lossy().into_owned();
        let (version, name) = parse_file_name(&file)?;

        let sql = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| MigrateError::ReadFile {
                file: file.clone(),
                reason: e.to_string(),
            })?;
        if sql.trim().is_empty() {
            return Err(MigrateError::EmptyFile { file });
        }

        migrations.push(Migration::new(version, name, sql));
    }

    migrations.sort_by_key(|m| m.version);
    for pair in migrations.windows(2) {
        if pair[0].version == pair[1].version {
            return Err(MigrateError::DuplicateVersion {
                version: pair[0].version,
            });
        }
    }
    Ok(migrations)
}

fn parse_file_name(file: &str) -> Result<(i64, String), MigrateError> {
    let bad = || MigrateError::BadFileName {
        file: file.to_string(),
    };
    let stem = file.strip_suffix(".sql").ok_or_else(bad)?;
    let (version, name) = stem.split_once('_').ok_or_else(bad)?;
    let version: i64 = version.parse().map_err(|_| bad())?;
    if version < 1 || name.is_empty() {
        return Err(bad());
    }
    Ok((version, name.to_string()))
}
