//! Central error types for the transfer engine (thiserror-based).

use thiserror::Error;

use crate::domain::MemoryDomain;

/// Negotiation errors. Surfaced before any transfer runs; the pipeline
/// must not proceed on these.
#[derive(Error, Debug)]
pub enum NegotiationError {
    #[error("No common memory domain for the {side} side")]
    NoCommonDomain { side: &'static str },

    #[error("Pool configuration rejected: {0}")]
    PoolRejected(String),

    #[error("No domain contract negotiated; call set_format first")]
    NotNegotiated,
}

/// A buffer could not be mapped for the required access in its domain.
/// Local to a single transfer attempt.
#[derive(Error, Debug)]
pub enum MappingError {
    #[error("Failed to map {domain} buffer for {access}: {reason}")]
    MapFailed {
        domain: MemoryDomain,
        access: &'static str,
        reason: String,
    },

    #[error("Unsupported surface placement kind {kind}")]
    UnsupportedPlacement { kind: u32 },
}

/// Top-level transfer engine error.
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Negotiation error: {0}")]
    Negotiation(#[from] NegotiationError),

    #[error("Mapping error: {0}")]
    Mapping(#[from] MappingError),

    #[error("Geometry mismatch on {what}: source {src} vs destination {dst}")]
    GeometryMismatch {
        what: &'static str,
        src: usize,
        dst: usize,
    },

    #[error("Device copy failed on plane {plane}: {reason}")]
    DeviceCopy { plane: usize, reason: String },

    #[error("Execution context is not interop-capable: {reason}")]
    InteropCapability { reason: String },

    #[error("CUDA driver error: {0}")]
    Driver(String),
}

/// Convenience Result type for transfer operations.
pub type TransferResult<T> = Result<T, TransferError>;
