// src/health/mod.rs
mod monitor;
mod state;

pub use monitor::{wait_healthy, HealthError, HealthMonitor};
pub use state::{HealthRecord, ServiceHealth};
