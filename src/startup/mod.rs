// src/startup/mod.rs
mod gate;

pub use gate::{GateError, GateReport, StartupGate};
