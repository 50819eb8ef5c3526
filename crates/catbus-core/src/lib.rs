//! Catbus Core - Fundamental types and primitives
//!
//! This crate defines the core types shared by every Catbus layer:
//! - Identifiers (Origin, ServiceKey, KeyHash, LinkHash)
//! - Key and content hashing
//! - Error taxonomy
//! - Protocol constants
//! - Outbound message routing

pub mod consts;
pub mod error;
pub mod hash;
pub mod id;
pub mod route;

pub use consts::*;
pub use error::*;
pub use hash::*;
pub use id::*;
pub use route::*;
