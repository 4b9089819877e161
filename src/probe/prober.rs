// src/probe/prober.rs

use crate::config::ProbeConfig;
use crate::metrics::MetricsCollector;
use crate::probe::target::{Probe, ProbeError};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{sleep, timeout};
use tracing::{info, warn};

/// Outcome of a successful wait: how long it took and what it took to get
/// there. The last error is kept so a slow-but-successful startup still shows
/// what the database was doing in the meantime.
#[derive(Debug, Clone)]
pub struct ProbeReport {
    pub target: String,
    pub attempts: u32,
    pub elapsed: Duration,
    pub last_error: Option<String>,
}

/// Repeatedly runs a probe until it succeeds, with exponential backoff
/// between attempts. The retry budget and deadline both default to unbounded:
/// in a fresh deployment the database *will* come up, and giving up early
/// just crashes the container into a restart loop.
#[derive(Debug, Clone)]
pub struct ReadinessProber {
    config: ProbeConfig,
    metrics: Option<Arc<MetricsCollector>>,
}

impl ReadinessProber {
    pub fn new(config: ProbeConfig, metrics: Option<Arc<MetricsCollector>>) -> Self {
        Self { config, metrics }
    }

    /// Block until the probe succeeds, the attempt budget runs out, or the
    /// deadline passes. The deadline bounds wall-clock time: an attempt is cut
    /// off at the remaining time, and backoff that would overshoot it is not
    /// slept through; the wait fails immediately instead.
    pub async fn wait_until_ready(&self, probe: &dyn Probe) -> Result<ProbeReport, ProbeError> {
        let target = probe.target();
        let deadline = self.config.deadline();
        let start = Instant::now();
        let mut attempts = 0u32;
        let mut last_error: Option<String> = None;

        info!("Waiting for {} to become ready", target);

        loop {
            attempts += 1;
            if let Some(metrics) = &self.metrics {
                metrics.record_probe_attempt();
            }

            let result = match deadline.map(|d| d.saturating_sub(start.elapsed())) {
                Some(remaining) => match timeout(remaining, probe.check()).await {
                    Ok(result) => result,
                    Err(_) => Err(ProbeError::Timeout {
                        target: target.clone(),
                        after: remaining,
                    }),
                },
                None => probe.check().await,
            };

            match result {
                Ok(()) => {
                    let elapsed = start.elapsed();
                    info!(
                        "{} ready after {} attempt(s) in {:?}",
                        target, attempts, elapsed
                    );
                    return Ok(ProbeReport {
                        target,
                        attempts,
                        elapsed,
                        last_error,
                    });
                }
                Err(error) => {
                    if let Some(metrics) = &self.metrics {
                        metrics.record_probe_failure();
                    }
                    let reason = error.to_string();

                    if let Some(max) = self.config.max_attempts {
                        if attempts >= max {
                            warn!("Giving up on {} after {} attempts: {}", target, attempts, reason);
                            return Err(ProbeError::BudgetExhausted {
                                attempts,
                                elapsed: start.elapsed(),
                                last_error: reason,
                            });
                        }
                    }

                    let backoff = self.calculate_backoff(attempts);

                    if let Some(deadline) = deadline {
                        if start.elapsed() + backoff >= deadline {
                            warn!(
                                "Deadline for {} passed after {} attempts: {}",
                                target, attempts, reason
                            );
                            return Err(ProbeError::DeadlineExceeded {
                                deadline,
                                attempts,
                                last_error: reason,
                            });
                        }
                    }

                    warn!(
                        "Attempt {} against {} failed: {}. Retrying in {:?}",
                        attempts, target, reason, backoff
                    );
                    last_error = Some(reason);
                    sleep(backoff).await;
                }
            }
        }
    }

    /// Exponential backoff with optional jitter
    fn calculate_backoff(&self, attempt: u32) -> Duration {
        let base = self.config.backoff.base().as_millis() as u64;
        let max = self.config.backoff.max().as_millis() as u64;

        // base * 2^(attempt - 1), capped
        let exponential = base.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
        let capped = exponential.min(max);

        if !self.config.backoff.jitter {
            return Duration::from_millis(capped);
        }

        // Jitter of 0-25% breaks up thundering herds when several replicas
        // wait on the same database.
        let jitter = (capped as f64 * rand::random::<f64>() * 0.25) as u64;
        Duration::from_millis(capped.saturating_add(jitter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackoffConfig;
    use async_trait::async_trait;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingProbe {
        fail_times: u32,
        calls: AtomicU32,
    }

    impl CountingProbe {
        fn new(fail_times: u32) -> Self {
            Self {
                fail_times,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl Probe for CountingProbe {
        async fn check(&self) -> Result<(), ProbeError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_times {
                Err(ProbeError::Unreachable {
                    target: "db:5432".to_string(),
                    reason: "connection refused".to_string(),
                })
            } else {
                Ok(())
            }
        }

        fn target(&self) -> String {
            "db:5432".to_string()
        }
    }

    fn fast_config(max_attempts: Option<u32>) -> ProbeConfig {
        ProbeConfig {
            max_attempts,
            deadline_secs: None,
            backoff: BackoffConfig {
                base_ms: 1,
                max_ms: 4,
                jitter: false,
            },
        }
    }

    #[tokio::test]
    async fn succeeds_after_n_failures_for_any_n() {
        for n in [0u32, 1, 2, 3, 5] {
            let prober = ReadinessProber::new(fast_config(None), None);
            let probe = CountingProbe::new(n);

            let report = prober.wait_until_ready(&probe).await.unwrap();
            assert_eq!(report.attempts, n + 1);
            assert_eq!(probe.calls.load(Ordering::SeqCst), n + 1);
            if n == 0 {
                assert!(report.last_error.is_none());
            } else {
                assert!(report.last_error.is_some());
            }
        }
    }

    #[tokio::test]
    async fn budget_exhaustion_reports_attempt_count() {
        let prober = ReadinessProber::new(fast_config(Some(3)), None);
        let probe = CountingProbe::new(u32::MAX);

        match prober.wait_until_ready(&probe).await {
            Err(ProbeError::BudgetExhausted {
                attempts,
                last_error,
                ..
            }) => {
                assert_eq!(attempts, 3);
                assert!(last_error.contains("connection refused"));
            }
            other => panic!("expected BudgetExhausted, got {other:?}"),
        }
        assert_eq!(probe.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn deadline_is_not_slept_past() {
        // Backoff far beyond the deadline: the prober must fail right away
        // rather than sleep first and notice afterwards.
        let config = ProbeConfig {
            max_attempts: None,
            deadline_secs: Some(1),
            backoff: BackoffConfig {
                base_ms: 10_000,
                max_ms: 10_000,
                jitter: false,
            },
        };
        let prober = ReadinessProber::new(config, None);
        let probe = CountingProbe::new(u32::MAX);

        let start = Instant::now();
        match prober.wait_until_ready(&probe).await {
            Err(ProbeError::DeadlineExceeded { attempts, .. }) => {
                assert_eq!(attempts, 1);
            }
            other => panic!("expected DeadlineExceeded, got {other:?}"),
        }
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn slow_attempts_are_cut_off_at_the_deadline() {
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

        let config = ProbeConfig {
            max_attempts: None,
            deadline_secs: Some(1),
            backoff: BackoffConfig {
                base_ms: 10,
                max_ms: 20,
                jitter: false,
            },
        };
        let prober = ReadinessProber::new(config, None);

        let start = Instant::now();
        match prober.wait_until_ready(&StuckProbe).await {
            Err(ProbeError::DeadlineExceeded {
                attempts,
                last_error,
                ..
            }) => {
                assert_eq!(attempts, 1);
                assert!(
                    last_error.contains("did not answer"),
                    "last_error: {last_error}"
                );
            }
            other => panic!("expected DeadlineExceeded, got {other:?}"),
        }
        // One stuck attempt must not hold the wait past the deadline.
        assert!(
            start.elapsed() < Duration::from_millis(1900),
            "took {:?}",
            start.elapsed()
        );
    }

    #[test]
    fn jitter_saturates_instead_of_wrapping() {
        let config = ProbeConfig {
            max_attempts: None,
            deadline_secs: None,
            backoff: BackoffConfig {
                base_ms: u64::MAX,
                max_ms: u64::MAX,
                jitter: true,
            },
        };
        let prober = ReadinessProber::new(config, None);

        assert_eq!(
            prober.calculate_backoff(5),
            Duration::from_millis(u64::MAX)
        );
    }

    proptest! {
        #[test]
        fn backoff_stays_within_bounds(
            attempt in 1u32..40,
            base_ms in 1u64..5_000,
            extra_ms in 0u64..60_000,
        ) {
            let max_ms = base_ms + extra_ms;
            let config = ProbeConfig {
                max_attempts: None,
                deadline_secs: None,
                backoff: BackoffConfig { base_ms, max_ms, jitter: true },
            };
            let prober = ReadinessProber::new(config, None);

            let backoff = prober.calculate_backoff(attempt).as_millis() as u64;
            let capped = base_ms
                .saturating_mul(2u64.saturating_pow(attempt - 1))
                .min(max_ms);
            prop_assert!(backoff >= capped);
            prop_assert!(backoff <= capped + capped / 4 + 1);
        }

        #[test]
        fn backoff_without_jitter_is_exact(attempt in 1u32..40, base_ms in 1u64..5_000) {
            let config = ProbeConfig {
                max_attempts: None,
                deadline_secs: None,
                backoff: BackoffConfig { base_ms, max_ms: 30_000, jitter: false },
            };
            let prober = ReadinessProber::new(config, None);

            let expected = base_ms
                .saturating_mul(2u64.saturating_pow(attempt - 1))
                .min(30_000);
            prop_assert_eq!(
                prober.calculate_backoff(attempt),
                Duration::from_millis(expected)
            );
        }
    }
}
