// src/startup/gate.rs

use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{error, info};
use uuid::Uuid;

use crate::metrics::MetricsCollector;
use crate::migrate::{MigrateError, MigrationReport};
use crate::probe::{ProbeError, ProbeReport};
use crate::server::ServerError;

#[derive(Debug, Error)]
pub enum GateError {
    #[error("database never became ready: {0}")]
    Probe(#[from] ProbeError),

    #[error("migration run aborted: {0}")]
    Migrate(#[from] MigrateError),

    #[error("server error: {0}")]
    Serve(#[from] ServerError),
}

/// What one pass through the gate did, stamped with a run id so the probe,
/// migration, and launch log lines of a single boot can be grepped together.
#[derive(Debug, Clone)]
pub struct GateReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub probe_attempts: u32,
    pub probe_elapsed: Duration,
    pub migrations_applied: usize,
    pub migrations_previously_applied: usize,
    pub migrate_elapsed: Duration,
}

/// Runs the three launch stages strictly in order: wait for the database,
/// apply migrations, then start serving. A failure in any stage stops the
/// gate; later stages are never reached.
pub struct StartupGate {
    metrics: Option<Arc<MetricsCollector>>,
}

impl StartupGate {
    pub fn new(metrics: Option<Arc<MetricsCollector>>) -> Self {
        Self { metrics }
    }

    pub async fn run<P, PFut, M, MFut, S, SFut>(
        &self,
        probe: P,
        migrate: M,
        serve: S,
    ) -> Result<GateReport, GateError>
    where
        P: FnOnce() -> PFut,
        PFut: Future<Output = Result<ProbeReport, ProbeError>>,
        M: FnOnce() -> MFut,
        MFut: Future<Output = Result<MigrationReport, MigrateError>>,
        S: FnOnce(GateReport) -> SFut,
        SFut: Future<Output = Result<(), ServerError>>,
    {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!("Startup gate {} beginning", run_id);

        // Nothing touches the database before it has answered a probe.
        let stage = Instant::now();
        let probe_report = match probe().await {
            Ok(report) => report,
            Err(e) => {
                error!("Startup gate {} failed while waiting for the database: {}", run_id, e);
                return Err(e.into());
            }
        };
        self.observe_stage("probe", stage.elapsed());

        // Schema before traffic. A failed migration is fatal, not a warning:
        // serving against a half-migrated schema corrupts data.
        let stage = Instant::now();
        let migration_report = match migrate().await {
            Ok(report) => report,
            Err(e) => {
                error!("Startup gate {} failed in migrations: {}", run_id, e);
                return Err(e.into());
            }
        };
        self.observe_stage("migrate", stage.elapsed());

        if let Some(metrics) = &self.metrics {
            metrics.set_startup_complete();
        }

        let report = GateReport {
            run_id,
            started_at,
            probe_attempts: probe_report.attempts,
            probe_elapsed: probe_report.elapsed,
            migrations_applied: migration_report.applied.len(),
            migrations_previously_applied: migration_report.previously_applied,
            migrate_elapsed: migration_report.duration,
        };
        info!(
            "Startup gate {} passed: database ready after {} attempt(s), {} migration(s) applied ({} already in place)",
            run_id, report.probe_attempts, report.migrations_applied, report.migrations_previously_applied
        );

        // Only now does the service become reachable from outside.
        serve(report.clone()).await?;
        Ok(report)
    }

    fn observe_stage(&self, stage: &str, elapsed: Duration) {
        if let Some(metrics) = &self.metrics {
            metrics.observe_stage(stage, elapsed);
        }
    }
}
