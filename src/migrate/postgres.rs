// src/migrate/postgres.rs

use async_trait::async_trait;
use sqlx::postgres::PgConnection;
use sqlx::{ConnectOptions, Connection};

use super::plan::AppliedMigration;
use super::runner::MigrationStore;
use super::source::Migration;
use super::MigrateError;
use crate::config::DatabaseConfig;

/// Journal table. The underscore prefix keeps it clear of application tables
/// and sorts it to the top of `\dt`.
const ENSURE_JOURNAL_SQL: &str = "\
CREATE TABLE IF NOT EXISTS _bootgate_migrations (
    version    BIGINT PRIMARY KEY,
    name       TEXT NOT NULL,
    checksum   TEXT NOT NULL,
    applied_at TIMESTAMPTZ NOT NULL DEFAULT now()
)";

/// Migration journal in the target database itself, so the schema and the
/// record of how it got there can never drift apart.
pub struct PgStore {
    conn: PgConnection,
}

impl PgStore {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, MigrateError> {
        let conn = config
            .connect_options()
            .connect()
            .await
            .map_err(|e| MigrateError::Connect {
                endpoint: config.endpoint(),
                reason: e.to_string(),
            })?;
        Ok(Self { conn })
    }

    pub async fn close(self) -> Result<(), sqlx::Error> {
        self.conn.close().await
    }
}

#[async_trait]
impl MigrationStore for PgStore {
    async fn ensure_journal(&mut self) -> Result<(), MigrateError> {
        sqlx::query(ENSURE_JOURNAL_SQL)
            .execute(&mut self.conn)
            .await
            .map_err(|e| MigrateError::Journal {
                reason: e.to_string(),
            })?;
        Ok(())
    }

    async fn list_applied(&mut self) -> Result<Vec<AppliedMigration>, MigrateError> {
        let rows = sqlx::query_as::<_, (i64, String, String)>(
            "SELECT version, name, checksum FROM _bootgate_migrations ORDER BY version",
        )
        .fetch_all(&mut self.conn)
        .await
        .map_err(|e| MigrateError::Journal {
            reason: e.to_string(),
        })?;

        Ok(rows
            .into_iter()
            .map(|(version, name, checksum)| AppliedMigration {
                version,
                name,
                checksum,
            })
            .collect())
    }

    async fn apply(&mut self, migration: &Migration) -> Result<(), MigrateError> {
        let journal_err = |e: sqlx::Error| MigrateError::Journal {
            reason: e.to_string(),
        };

        // Migration SQL and its journal row commit together. If either side
        // fails the transaction rolls back and the journal still matches the
        // schema.
        let mut tx = self.conn.begin().await.map_err(journal_err)?;

        // UFCS form of `.execute(&mut *tx)`; the method-call form trips a
        // rustc "implementation of `Executor` is not general enough" error
        // inside this Send-boxed async-trait future.
        sqlx::Executor::execute(&mut *tx, sqlx::raw_sql(&migration.sql))
            .await
            .map_err(|e| MigrateError::Apply {
                version: migration.version,
                name: migration.name.clone(),
                reason: e.to_string(),
            })?;

        sqlx::query("INSERT INTO _bootgate_migrations (version, name, checksum) VALUES ($1, $2, $3)")
            .bind(migration.version)
            .bind(&migration.name)
            .bind(&migration.checksum)
            .execute(&mut *tx)
            .await
            .map_err(journal_err)?;

        tx.commit().await.map_err(journal_err)?;
        Ok(())
    }
}
