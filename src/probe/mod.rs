// src/probe/mod.rs
mod prober;
mod target;

pub use prober::{ProbeReport, ReadinessProber};
pub use target::{HttpProbe, PostgresProbe, Probe, ProbeError, TcpProbe};
