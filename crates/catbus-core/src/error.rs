//! Error types for the Catbus protocol layers

use thiserror::Error;

use crate::{KeyHash, LinkHash, ServiceKey};

/// Core Catbus errors
#[derive(Error, Debug)]
pub enum CatbusError {
    // Wire errors
    #[error("Invalid wire format: {0}")]
    InvalidWireFormat(String),

    #[error("Buffer too short: expected {expected}, got {actual}")]
    BufferTooShort { expected: usize, actual: usize },

    #[error("Bad magic: {0:#010x}")]
    BadMagic(u32),

    #[error("Unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    #[error("Unknown message type: {0}")]
    UnknownMessageType(u8),

    #[error("Unknown data type: {0}")]
    UnknownDataType(u8),

    // Service errors
    #[error("Service already registered: {0}")]
    DuplicateService(ServiceKey),

    #[error("Service not found: {0}")]
    ServiceNotFound(ServiceKey),

    // Link errors
    #[error("Link already registered: {0}")]
    DuplicateLink(LinkHash),

    #[error("Link not found: {0}")]
    LinkNotFound(LinkHash),

    #[error("Key not found: {0}")]
    KeyNotFound(KeyHash),

    #[error("Type mismatch for key {key}: expected {expected}, got {actual}")]
    TypeMismatch {
        key: KeyHash,
        expected: u8,
        actual: u8,
    },

    #[error("Invalid link: {0}")]
    InvalidLink(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // Transport errors
    #[error("Transport error: {0}")]
    TransportError(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for Catbus operations
pub type CatbusResult<T> = Result<T, CatbusError>;
