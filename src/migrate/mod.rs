// src/migrate/mod.rs
mod plan;
mod postgres;
mod runner;
mod source;

pub use plan::{plan, AppliedMigration};
pub use postgres::PgStore;
pub use runner::{MigrationReport, MigrationRunner, MigrationStore};
pub use source::{load_dir, Migration};

use crate::config::DatabaseConfig;
use crate::metrics::MetricsCollector;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum MigrateError {
    #[error("cannot read migrations directory {dir}: {reason}")]
    ReadDir { dir: String, reason: String },

    #[error("cannot read migration file {file}: {reason}")]
    ReadFile { file: String, reason: String },

    #[error("migration file name '{file}' is not <version>_<name>.sql")]
    BadFileName { file: String },

    #[error("migration file {file} contains no statements")]
    EmptyFile { file: String },

    #[error("two migration files share version {version}")]
    DuplicateVersion { version: i64 },

    #[error("migration {version}_{name} changed after it was applied (checksum mismatch)")]
    ChecksumMismatch { version: i64, name: String },

    #[error("migration {version}_{name} sorts before already-applied version {applied}")]
    OutOfOrder {
        version: i64,
        name: String,
        applied: i64,
    },

    #[error("journal records version {version} but no migration file provides it")]
    UnknownApplied { version: i64 },

    #[error("cannot connect to {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },

    #[error("migration journal error: {reason}")]
    Journal { reason: String },

    #[error("migration {version}_{name} failed: {reason}")]
    Apply {
        version: i64,
        name: String,
        reason: String,
    },
}

/// Load migration files from `dir` and apply whatever the journal has not
/// seen yet, in version order, one transaction per migration. The first
/// failure aborts the whole run.
pub async fn apply_pending(
    database: &DatabaseConfig,
    dir: &Path,
    metrics: Option<Arc<MetricsCollector>>,
) -> Result<MigrationReport, MigrateError> {
    let migrations = load_dir(dir).await?;
    let mut store = PgStore::connect(database).await?;
    let runner = MigrationRunner::new(migrations, metrics);
    let report = runner.run(&mut store).await?;
    if let Err(e) = store.close().await {
        debug!("Error closing migration connection: {}", e);
    }
    Ok(report)
}
