//! Catbus Wire Protocol - Binary packet formats
//!
//! Two independent UDP channels share this crate:
//! - Service channel: offer broadcasts and queries (leader election)
//! - Link channel: discovery, matching and data messages (replication)
//!
//! All integers are little-endian.

pub mod data;
pub mod flags;
pub mod header;
pub mod link;
pub mod service;

pub use data::*;
pub use flags::*;
pub use header::*;
pub use link::*;
pub use service::*;

use bytes::Buf;
use catbus_core::{CatbusError, CatbusResult};

/// Fail with `BufferTooShort` unless `buf` holds at least `needed` more bytes
#[inline]
pub(crate) fn ensure_remaining<B: Buf + ?Sized>(buf: &B, needed: usize) -> CatbusResult<()> {
    if buf.remaining() < needed {
        return Err(CatbusError::BufferTooShort {
            expected: needed,
            actual: buf.remaining(),
        });
    }
    Ok(())
}
