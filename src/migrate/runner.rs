// src/migrate/runner.rs

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

use super::plan::{plan, AppliedMigration};
use super::source::Migration;
use super::MigrateError;
use crate::metrics::MetricsCollector;

/// Journal-backed storage for migrations. The Postgres implementation is the
/// real one; tests swap in an in-memory store.
#[async_trait]
pub trait MigrationStore: Send {
    /// Create the journal table if this is the first run against the database.
    async fn ensure_journal(&mut self) -> Result<(), MigrateError>;

    async fn list_applied(&mut self) -> Result<Vec<AppliedMigration>, MigrateError>;

    /// Run one migration and record it in the journal, atomically.
    async fn apply(&mut self, migration: &Migration) -> Result<(), MigrateError>;
}

#[derive(Debug, Clone)]
pub struct MigrationReport {
    /// Labels of migrations applied by this run, in order.
    pub applied: Vec<String>,
    pub previously_applied: usize,
    pub latest_version: Option<i64>,
    pub duration: Duration,
}

pub struct MigrationRunner {
    migrations: Vec<Migration>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl MigrationRunner {
    pub fn new(migrations: Vec<Migration>, metrics: Option<Arc<MetricsCollector>>) -> Self {
        Self { migrations, metrics }
    }

    /// Apply every pending migration in version order. Stops at the first
    /// failure, leaving the journal at the last migration that committed, so
    /// a rerun picks up exactly where this one stopped.
    pub async fn run(&self, store: &mut dyn MigrationStore) -> Result<MigrationReport, MigrateError> {
        let start = Instant::now();

        store.ensure_journal().await?;
        let applied = store.list_applied().await?;
        let pending = plan(&self.migrations, &applied)?;

        info!(
            "{} migration(s) already applied, {} pending",
            applied.len(),
            pending.len()
        );
        if let Some(metrics) = &self.metrics {
            metrics.set_migrations_pending(pending.len() as i64);
        }

        let mut labels = Vec::with_capacity(pending.len());
        for migration in pending {
            let began = Instant::now();
            store.apply(migration).await?;
            info!("Applied {} in {:?}", migration.label(), began.elapsed());
            labels.push(migration.label());
            if let Some(metrics) = &self.metrics {
                metrics.record_migration_applied();
            }
        }

        if let Some(metrics) = &self.metrics {
            metrics.set_migrations_pending(0);
        }

        Ok(MigrationReport {
            applied: labels,
            previously_applied: applied.len(),
            latest_version: self.migrations.iter().map(|m| m.version).max(),
            duration: start.elapsed(),
        })
    }
}
