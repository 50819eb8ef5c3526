//! Key and content hashing
//!
//! Key names hash with 32-bit FNV-1a so every node derives the same
//! `KeyHash` from the same name. Content hashes (link definitions, data
//! values) are truncated SHA-256.

use sha2::{Digest, Sha256};

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// 32-bit FNV-1a hash of a key name. An empty name hashes to 0.
pub fn catbus_hash(name: &str) -> u32 {
    if name.is_empty() {
        return 0;
    }

    name.bytes().fold(FNV_OFFSET_BASIS, |hash, b| {
        (hash ^ b as u32).wrapping_mul(FNV_PRIME)
    })
}

/// 64-bit content hash: the first 8 bytes (LE) of the SHA-256 digest
pub fn content_hash(data: &[u8]) -> u64 {
    let digest = Sha256::digest(data);
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}
