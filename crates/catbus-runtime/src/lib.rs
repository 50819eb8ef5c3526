//! Catbus Runtime - Runs the service and link managers on real sockets
//!
//! One task set per manager:
//! 1. Receive datagrams and hand them to the manager
//! 2. Advance the manager on its base tick
//! 3. Broadcast offers (services only)
//! 4. Flush queued outbound packets
//!
//! Stopping a node announces every led service as shut down before exit.

pub mod config;
pub mod logging;
pub mod node;

pub use config::*;
pub use logging::*;
pub use node::*;
