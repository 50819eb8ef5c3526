//! Catbus Links - Keep a key synchronized across nodes through an elected leader
//!
//! A link copies a source key into a dest key on every node matching a tag
//! query, optionally combining several sources:
//! - `Database`: the local key-value store a link reads and writes
//! - `aggregate`: ANY / MIN / MAX / SUM / AVG over contributing values
//! - `Link`: one replication contract, backed by one Team membership
//! - `Producer` / `Consumer` / `Remote`: expiring per-peer bookkeeping
//! - `LinkManager`: discovery, aggregation and data routing for all links

pub mod aggregate;
pub mod config;
pub mod database;
pub mod link;
pub mod manager;
pub mod records;

pub use aggregate::*;
pub use config::*;
pub use database::*;
pub use link::*;
pub use manager::*;
pub use records::*;
