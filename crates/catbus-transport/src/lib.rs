//! Catbus Transport - UDP sockets for the service and link channels
//!
//! This crate provides:
//! - UDP transport with broadcast and IPv4 multicast
//! - Mapping of `Destination` onto the channel's group address
//! - A background receive loop feeding an mpsc channel

pub mod udp;

pub use udp::*;
