// src/health/monitor.rs
use crate::config::HealthCheckConfig;
use crate::health::state::{HealthRecord, ServiceHealth};
use crate::metrics::MetricsCollector;
use crate::probe::Probe;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{interval, timeout};
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum HealthError {
    #[error("health monitor stopped before the target became healthy")]
    MonitorStopped,
}

/// Periodic health checker for one target. Runs a probe every interval,
/// folds the outcomes through a [`HealthRecord`], and publishes verdict
/// changes on a watch channel for dependents to gate on.
pub struct HealthMonitor {
    config: HealthCheckConfig,
    probe: Arc<dyn Probe>,
    metrics: Option<Arc<MetricsCollector>>,
    state_tx: watch::Sender<ServiceHealth>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl HealthMonitor {
    pub fn new(
        config: HealthCheckConfig,
        probe: Arc<dyn Probe>,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ServiceHealth::Starting);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self {
            config,
            probe,
            metrics,
            state_tx,
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Current-and-future verdicts for this target. The receiver starts at
    /// `Starting` even if the monitor has not been spawned yet.
    pub fn subscribe(&self) -> watch::Receiver<ServiceHealth> {
        self.state_tx.subscribe()
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Check loop. The first check fires immediately; after that one check
    /// per interval until shutdown.
    pub async fn run(self: Arc<Self>) {
        let mut interval = interval(self.config.interval());
        let mut shutdown_rx = self.shutdown_rx.clone();
        let mut record = HealthRecord::new();

        info!(
            "Monitoring {} every {:?} (timeout {:?}, unhealthy after {} failures)",
            self.probe.target(),
            self.config.interval(),
            self.config.timeout(),
            self.config.retries
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.observe_once(&mut record).await;
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Health monitor for {} shutting down", self.probe.target());
                        break;
                    }
                }
            }
        }
    }

    async fn observe_once(&self, record: &mut HealthRecord) {
        let result = timeout(self.config.timeout(), self.probe.check()).await;
        let error = match &result {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some("check timed out".to_string()),
        };
        let healthy = error.is_none();

        let before = record.state();
        let after = record.observe(healthy, self.config.retries);

        if let Some(metrics) = &self.metrics {
            metrics.record_health_check(healthy);
            metrics.set_db_health_state(after);
        }

        if healthy {
            if before != ServiceHealth::Healthy {
                info!("{} is healthy", self.probe.target());
            } else {
                debug!("{} still healthy", self.probe.target());
            }
        } else {
            let reason = error.as_deref().unwrap_or("unknown");
            if after == ServiceHealth::Unhealthy && before != ServiceHealth::Unhealthy {
                warn!(
                    "{} is unhealthy after {} consecutive failures: {}",
                    self.probe.target(),
                    record.consecutive_failures(),
                    reason
                );
            } else {
                debug!(
                    "Check against {} failed ({} of {}): {}",
                    self.probe.target(),
                    record.consecutive_failures(),
                    self.config.retries,
                    reason
                );
            }
        }

        if after != before {
            let _ = self.state_tx.send(after);
        }
    }
}

/// Block until the monitored target reports healthy. Used by anything that
/// must not start before its dependency is up.
pub async fn wait_healthy(
    mut state: watch::Receiver<ServiceHealth>,
) -> Result<(), HealthError> {
    state
        .wait_for(|s| s.is_healthy())
        .await
        .map(|_| ())
        .map_err(|_| HealthError::MonitorStopped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::ProbeError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct FlakyProbe {
        fail_times: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Probe for FlakyProbe {
        async fn check(&self) -> Result<(), ProbeError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_times {
                Err(ProbeError::Unreachable {
                    target: "db:5432".to_string(),
                    reason: "not yet".to_string(),
                })
            } else {
                Ok(())
            }
        }

        fn target(&self) -> String {
            "db:5432".to_string()
        }
    }

    fn fast_config(retries: u32) -> HealthCheckConfig {
        HealthCheckConfig {
            interval_ms: 20,
            timeout_ms: 500,
            retries,
        }
    }

    #[tokio::test]
    async fn dependent_waits_until_target_recovers() {
        // Four failed intervals, success on the fifth: the dependent must not
        // proceed before the fifth check.
        let probe = Arc::new(FlakyProbe {
            fail_times: 4,
            calls: AtomicU32::new(0),
        });
        let monitor = Arc::new(HealthMonitor::new(fast_config(5), probe.clone(), None));
        let state = monitor.subscribe();
        let started = std::time::Instant::now();

        let task = tokio::spawn(monitor.clone().run());

        timeout(Duration::from_secs(2), wait_healthy(state))
            .await
            .expect("monitor never became healthy")
            .unwrap();
        assert!(probe.calls.load(Ordering::SeqCst) >= 5);
        // Checks run at 0, 1, 2, 3 and 4 intervals in; the verdict cannot
        // arrive before four intervals have passed.
        assert!(started.elapsed() >= Duration::from_millis(4 * 20));

        monitor.shutdown();
        timeout(Duration::from_secs(1), task)
            .await
            .expect("monitor did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn verdict_turns_unhealthy_only_at_the_retry_threshold() {
        let probe = Arc::new(FlakyProbe {
            fail_times: u32::MAX,
            calls: AtomicU32::new(0),
        });
        let monitor = Arc::new(HealthMonitor::new(fast_config(5), probe.clone(), None));
        let mut state = monitor.subscribe();

        let task = tokio::spawn(monitor.clone().run());

        timeout(
            Duration::from_secs(2),
            state.wait_for(|s| *s == ServiceHealth::Unhealthy),
        )
        .await
        .expect("monitor never turned unhealthy")
        .unwrap();

        // The verdict must not flip before the fifth failed check.
        assert!(probe.calls.load(Ordering::SeqCst) >= 5);

        monitor.shutdown();
        timeout(Duration::from_secs(1), task)
            .await
            .expect("monitor did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn shutdown_stops_an_idle_monitor() {
        let probe = Arc::new(FlakyProbe {
            fail_times: 0,
            calls: AtomicU32::new(0),
        });
        let monitor = Arc::new(HealthMonitor::new(fast_config(3), probe, None));

        let task = tokio::spawn(monitor.clone().run());
        tokio::time::sleep(Duration::from_millis(50)).await;
        monitor.shutdown();

        timeout(Duration::from_secs(1), task)
            .await
            .expect("monitor did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn slow_probe_counts_as_a_failure() {
        struct StuckProbe;

        #[async_trait]
        impl Probe for StuckProbe {
            async fn check(&self) -> Result<(), ProbeError> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            }

            fn target(&self) -> String {
                "db:5432".to_string()
            }
        }

        let config = HealthCheckConfig {
            interval_ms: 10,
            timeout_ms: 20,
            retries: 1,
        };
        let monitor = Arc::new(HealthMonitor::new(config, Arc::new(StuckProbe), None));
        let mut state = monitor.subscribe();

        let task = tokio::spawn(monitor.clone().run());

        timeout(
            Duration::from_secs(2),
            state.wait_for(|s| *s == ServiceHealth::Unhealthy),
        )
        .await
        .expect("timed-out checks never marked the target unhealthy")
        .unwrap();

        monitor.shutdown();
        timeout(Duration::from_secs(1), task)
            .await
            .expect("monitor did not stop")
            .unwrap();
    }
}
