// src/metrics/collector.rs
use crate::health::ServiceHealth;
use anyhow::Result;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

pub struct MetricsRegistry {
    registry: Registry,
    collector: Arc<MetricsCollector>,
}

impl MetricsRegistry {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let collector = Arc::new(MetricsCollector::new(&registry)?);

        Ok(Self {
            registry,
            collector,
        })
    }

    pub fn collector(&self) -> Arc<MetricsCollector> {
        self.collector.clone()
    }

    pub fn gather(&self) -> Vec<u8> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).unwrap();
        buffer
    }
}

#[derive(Debug)]
pub struct MetricsCollector {
    // Startup gate metrics
    pub probe_attempts_total: IntCounter,
    pub probe_failures_total: IntCounter,
    pub stage_duration_seconds: HistogramVec,
    pub startup_complete: IntGauge,

    // Migration metrics
    pub migrations_applied_total: IntCounter,
    pub migrations_pending: IntGauge,

    // Health check metrics
    pub db_health_state: IntGauge,
    pub health_checks_total: IntCounterVec,

    // Server metrics
    pub http_requests_total: IntCounterVec,
}

impl MetricsCollector {
    pub fn new(registry: &Registry) -> Result<Self> {
        // Startup gate metrics
        let probe_attempts_total = IntCounter::new(
            "bootgate_probe_attempts_total",
            "Readiness probe attempts against the database",
        )?;
        registry.register(Box::new(probe_attempts_total.clone()))?;

        let probe_failures_total = IntCounter::new(
            "bootgate_probe_failures_total",
            "Readiness probe attempts that failed",
        )?;
        registry.register(Box::new(probe_failures_total.clone()))?;

        let stage_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "bootgate_stage_duration_seconds",
                "Wall-clock duration of each startup stage",
            ),
            &["stage"],
        )?;
        registry.register(Box::new(stage_duration_seconds.clone()))?;

        let startup_complete = IntGauge::new(
            "bootgate_startup_complete",
            "1 once probing and migrations have finished and the server may bind",
        )?;
        registry.register(Box::new(startup_complete.clone()))?;

        // Migration metrics
        let migrations_applied_total = IntCounter::new(
            "bootgate_migrations_applied_total",
            "Migrations applied by this process",
        )?;
        registry.register(Box::new(migrations_applied_total.clone()))?;

        let migrations_pending = IntGauge::new(
            "bootgate_migrations_pending",
            "Migrations on disk not yet recorded in the journal",
        )?;
        registry.register(Box::new(migrations_pending.clone()))?;

        // Health check metrics
        let db_health_state = IntGauge::new(
            "bootgate_db_health_state",
            "Database health (0=starting, 1=healthy, 2=unhealthy)",
        )?;
        registry.register(Box::new(db_health_state.clone()))?;

        let health_checks_total = IntCounterVec::new(
            Opts::new(
                "bootgate_health_checks_total",
                "Periodic health checks by outcome",
            ),
            &["result"],
        )?;
        registry.register(Box::new(health_checks_total.clone()))?;

        // Server metrics
        let http_requests_total = IntCounterVec::new(
            Opts::new("bootgate_http_requests_total", "HTTP requests served"),
            &["path", "status"],
        )?;
        registry.register(Box::new(http_requests_total.clone()))?;

        Ok(Self {
            probe_attempts_total,
            probe_failures_total,
            stage_duration_seconds,
            startup_complete,
            migrations_applied_total,
            migrations_pending,
            db_health_state,
            health_checks_total,
            http_requests_total,
        })
    }

    pub fn record_probe_attempt(&self) {
        self.probe_attempts_total.inc();
    }

    pub fn record_probe_failure(&self) {
        self.probe_failures_total.inc();
    }

    pub fn observe_stage(&self, stage: &str, duration: std::time::Duration) {
        self.stage_duration_seconds
            .with_label_values(&[stage])
            .observe(duration.as_secs_f64());
    }

    pub fn set_startup_complete(&self) {
        self.startup_complete.set(1);
    }

    pub fn record_migration_applied(&self) {
        self.migrations_applied_total.inc();
    }

    pub fn set_migrations_pending(&self, pending: i64) {
        self.migrations_pending.set(pending);
    }

    pub fn set_db_health_state(&self, state: ServiceHealth) {
        let value = match state {
            ServiceHealth::Starting => 0,
            ServiceHealth::Healthy => 1,
            ServiceHealth::Unhealthy => 2,
        };
        self.db_health_state.set(value);
    }

    pub fn record_health_check(&self, healthy: bool) {
        let result = if healthy { "success" } else { "failure" };
        self.health_checks_total.with_label_values(&[result]).inc();
    }

    pub fn record_http_request(&self, path: &str, status: u16) {
        self.http_requests_total
            .with_label_values(&[path, &status.to_string()])
            .inc();
    }
}
