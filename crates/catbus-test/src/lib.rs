//! Catbus Test Harness - Simulated clusters on a lossy network
//!
//! This crate provides:
//! - A seeded chaos network: latency, jitter, loss, duplication
//! - A cluster simulator driving real service and link managers
//! - A scenario builder for the integration tests

pub mod chaos;
pub mod simulator;

pub use chaos::*;
pub use simulator::*;
