//! Identity types for the Catbus protocol
//!
//! Node origins and link hashes are 64-bit, key and service hashes are
//! 32-bit to match the wire format.

use std::fmt;

use crate::catbus_hash;

/// Node identity - stable for the lifetime of a process
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Origin(pub u64);

impl Origin {
    pub const ZERO: Origin = Origin(0);

    #[inline]
    pub fn new(id: u64) -> Self {
        Origin(id)
    }

    #[inline]
    pub fn to_bytes(self) -> [u8; 8] {
        self.0.to_le_bytes()
    }

    #[inline]
    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        Origin(u64::from_le_bytes(bytes))
    }
}

impl fmt::Debug for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Origin({:016x})", self.0)
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Hash of a key name in the key-value database
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct KeyHash(pub u32);

impl KeyHash {
    /// The "no key" sentinel, also used for unused tag slots
    pub const NONE: KeyHash = KeyHash(0);

    #[inline]
    pub fn new(hash: u32) -> Self {
        KeyHash(hash)
    }

    /// Hash a key name
    pub fn from_name(name: &str) -> Self {
        KeyHash(catbus_hash(name))
    }

    #[inline]
    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for KeyHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({:08x})", self.0)
    }
}

impl fmt::Display for KeyHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

/// Content hash of a link definition, doubles as the Team group
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct LinkHash(pub u64);

impl LinkHash {
    #[inline]
    pub fn new(hash: u64) -> Self {
        LinkHash(hash)
    }
}

impl fmt::Debug for LinkHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Link({:016x})", self.0)
    }
}

impl fmt::Display for LinkHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Identifies one replicated role: at most one Service per key per process
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ServiceKey {
    pub service_id: u32,
    pub group: u64,
}

impl ServiceKey {
    #[inline]
    pub fn new(service_id: u32, group: u64) -> Self {
        ServiceKey { service_id, group }
    }
}

impl fmt::Debug for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Service({:08x}:{:016x})", self.service_id, self.group)
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}:{:016x}", self.service_id, self.group)
    }
}
