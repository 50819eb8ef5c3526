//! Catbus Services - Peer discovery and leader election
//!
//! Nodes that register the same `ServiceKey` converge, without a
//! coordinator, on a single SERVER:
//! - `Offer`: one node's candidacy, ordered by priority, then uptime
//!   (with a hysteresis band), then origin
//! - `Service`: the LISTEN / CONNECTED / SERVER state machine; a Team is
//!   a Service whose members all gossip and which can step down
//! - `ServiceManager`: owns every local Service, runs the ticks and
//!   routes offer and query packets

pub mod config;
pub mod manager;
pub mod offer;
pub mod service;

pub use config::*;
pub use manager::*;
pub use offer::*;
pub use service::*;
