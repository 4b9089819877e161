// src/migrate/plan.rs
//! Pure planning step: given the migrations on disk and the journal rows in
//! the database, decide what still needs to run. Keeping this free of I/O is
//! what makes the runner's ordering behavior testable without a database.

use std::collections::HashMap;

use super::source::Migration;
use super::MigrateError;

/// A journal row: a migration the database has already seen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedMigration {
    pub version: i64,
    pub name: String,
    pub checksum: String,
}

/// Return the migrations to apply, in version order.
///
/// Fails when the history is inconsistent: an applied version with no file
/// backing it, a file that changed after being applied, or a new file that
/// sorts before something already applied.
pub fn plan<'a>(
    available: &'a [Migration],
    applied: &[AppliedMigration],
) -> Result<Vec<&'a Migration>, MigrateError> {
    let by_version: HashMap<i64, &Migration> =
        available.iter().map(|m| (m.version, m)).collect();

    for row in applied {
        match by_version.get(&row.version) {
            None => {
                return Err(MigrateError::UnknownApplied {
                    version: row.version,
                });
            }
            Some(migration) if migration.checksum != row.checksum => {
                return Err(MigrateError::ChecksumMismatch {
                    version: migration.version,
                    name: migration.name.clone(),
                });
            }
            Some(_) => {}
        }
    }

    let applied_max = applied.iter().map(|row| row.version).max();
    let applied_versions: Vec<i64> = applied.iter().map(|row| row.version).collect();

    let mut pending: Vec<&Migration> = available
        .iter()
        .filter(|m| !applied_versions.contains(&m.version))
        .collect();
    pending.sort_by_key(|m| m.version);

    if let Some(applied_max) = applied_max {
        if let Some(stale) = pending.iter().find(|m| m.version < applied_max) {
            return Err(MigrateError::OutOfOrder {
                version: stale.version,
                name: stale.name.clone(),
                applied: applied_max,
            });
        }
    }

    Ok(pending)
}
