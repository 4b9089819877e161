// src/lib.rs
pub mod config;
pub mod coverage;
pub mod health;
pub mod metrics;
pub mod migrate;
pub mod probe;
pub mod server;
pub mod startup;
