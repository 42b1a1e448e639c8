// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2026 quay developers

//! Error taxonomy for the message runtime.
//!
//! Decode-time structural errors are fatal to the single message that
//! carried them, never to the connection. Correlation errors
//! ([`Error::DuplicateResponse`], [`Error::OrphanedResponse`]) are logged
//! and dropped by the receive path and never delivered to application code.

use std::fmt;

/// Result type for runtime operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the message runtime
#[derive(Debug)]
pub enum Error {
    /// Frame failed structural validation on decode (truncation, length
    /// mismatch, unknown descriptor kind, oversize)
    MalformedMessage { reason: String },

    /// No protocol registered under the given id
    ProtocolNotFound(u8),

    /// Protocol exists but has no action under the given id
    ActionNotFound { protocol: u8, action: u8 },

    /// A response arrived for a call that already completed
    DuplicateResponse(u32),

    /// A response arrived for an unknown or expired call
    OrphanedResponse(u32),

    /// Synchronous call timed out waiting for its response
    Timeout,

    /// The connection dropped while calls were outstanding
    ConnectionLost,

    /// Transport refused or failed the send
    SendFailed(String),

    /// Handler produced more bytes than the declared output capacity
    BufferOverrun { declared: u32, actual: usize },

    /// Remote or local handler violated its contract
    HandlerFault(String),

    /// Protocol definition rejected by the schema loader
    InvalidSchema(String),

    /// No shared-memory region registered under the handle
    ShmRegionUnknown(u64),

    /// Shared-memory region still referenced by an in-flight message
    ShmRegionBusy(u64),

    /// No peer registered under the given id
    PeerNotFound(u64),

    /// Client was shut down
    Shutdown,

    /// Internal runtime error
    Internal(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedMessage { reason } => write!(f, "malformed message: {}", reason),
            Self::ProtocolNotFound(id) => write!(f, "protocol {} not found", id),
            Self::ActionNotFound { protocol, action } => {
                write!(f, "action {} not found in protocol {}", action, protocol)
            }
            Self::DuplicateResponse(id) => {
                write!(f, "duplicate response for completed call {}", id)
            }
            Self::OrphanedResponse(id) => write!(f, "orphaned response for call {}", id),
            Self::Timeout => write!(f, "call timed out"),
            Self::ConnectionLost => write!(f, "connection lost"),
            Self::SendFailed(msg) => write!(f, "send failed: {}", msg),
            Self::BufferOverrun { declared, actual } => write!(
                f,
                "output of {} bytes exceeds declared capacity {}",
                actual, declared
            ),
            Self::HandlerFault(msg) => write!(f, "handler fault: {}", msg),
            Self::InvalidSchema(msg) => write!(f, "invalid schema: {}", msg),
            Self::ShmRegionUnknown(handle) => write!(f, "unknown shm region {:#x}", handle),
            Self::ShmRegionBusy(handle) => {
                write!(f, "shm region {:#x} still referenced in flight", handle)
            }
            Self::PeerNotFound(id) => write!(f, "peer {} not found", id),
            Self::Shutdown => write!(f, "client shut down"),
            Self::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

/// Dispatch status carried in the `status` byte of RESPONSE frames.
///
/// `Ok` is the only value application code ever observes; the error
/// statuses surface on the calling side as the matching [`Error`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    Ok = 0,
    ProtocolNotFound = 1,
    ActionNotFound = 2,
    HandlerFault = 3,
}

impl Status {
    /// Decode a wire status byte
    pub fn from_wire(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Ok),
            1 => Some(Self::ProtocolNotFound),
            2 => Some(Self::ActionNotFound),
            3 => Some(Self::HandlerFault),
            _ => None,
        }
    }

    /// Status answered to a synchronous caller when dispatch fails
    pub fn for_dispatch_error(error: &Error) -> Self {
        match error {
            Error::ProtocolNotFound(_) => Self::ProtocolNotFound,
            Error::ActionNotFound { .. } => Self::ActionNotFound,
            _ => Self::HandlerFault,
        }
    }
}
