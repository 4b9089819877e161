// src/health/state.rs

/// Observed health of a monitored target.
///
/// `Starting` covers the window before the first verdict: the target has not
/// failed, it just has not proven itself yet. Dependents treat it as
/// not-yet-healthy, load sheds treat it as not-yet-broken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceHealth {
    Starting,
    Healthy,
    Unhealthy,
}

impl ServiceHealth {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceHealth::Starting => "starting",
            ServiceHealth::Healthy => "healthy",
            ServiceHealth::Unhealthy => "unhealthy",
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, ServiceHealth::Healthy)
    }
}

/// Consecutive-outcome counters behind a [`ServiceHealth`] verdict.
///
/// One success is enough to call the target healthy; it takes `retries`
/// failures in a row to call it unhealthy. A single dropped packet should not
/// take a service out of rotation, but one good round trip proves liveness.
#[derive(Debug, Clone)]
pub struct HealthRecord {
    state: ServiceHealth,
    consecutive_failures: u32,
    consecutive_successes: u32,
}

impl Default for HealthRecord {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthRecord {
    pub fn new() -> Self {
        Self {
            state: ServiceHealth::Starting,
            consecutive_failures: 0,
            consecutive_successes: 0,
        }
    }

    pub fn state(&self) -> ServiceHealth {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn consecutive_successes(&self) -> u32 {
        self.consecutive_successes
    }

    /// Fold one check outcome into the record and return the new verdict.
    pub fn observe(&mut self, healthy: bool, retries: u32) -> ServiceHealth {
        if healthy {
            self.consecutive_successes = self.consecutive_successes.saturating_add(1);
            self.consecutive_failures = 0;
            self.state = ServiceHealth::Healthy;
        } else {
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
            self.consecutive_successes = 0;
            if self.consecutive_failures >= retries {
                self.state = ServiceHealth::Unhealthy;
            }
        }
        self.state
    }
}
