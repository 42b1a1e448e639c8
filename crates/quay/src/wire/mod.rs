// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2026 quay developers

//! Wire format: length-prefixed message envelope with a parameter
//! descriptor array and inline payloads.
//!
//! Layout (all multi-byte fields little-endian):
//!
//! ```text
//! Header (16 bytes):
//!   length: u32 | message_id: u32 | protocol_id: u8 | action_id: u8
//!   | flags: u8 | status: u8 | param_in: u8 | param_out: u8 | reserved: u16
//!
//! Descriptor[param_in + param_out] (16 bytes each):
//!   kind: u8 | reserved: [u8; 3] | length: u32 | value_or_handle: u64
//!
//! Payload: inline bytes of each BUFFER-kind input parameter, in
//! descriptor order. VALUE parameters live inside their descriptor; SHM
//! parameters carry a region handle and are never copied inline.
//! ```
//!
//! `message_id` is the correlation token matching a response frame to its
//! outstanding call; it travels in the envelope rather than relying on
//! per-connection request/response ordering.
//!
//! Invariant: `length == 16 + (param_in + param_out) * 16 + sum(inline
//! payload sizes)`. Decoding rejects any frame that breaks it and never
//! reads past `length`.

mod cursor;
mod message;
mod param;

pub use cursor::{Cursor, CursorMut};
pub use message::{Message, MessageHeader};
pub use param::{OutParam, Param, ParamKind};

/// Fixed header size in bytes
pub const HEADER_SIZE: usize = 16;

/// Fixed parameter descriptor size in bytes
pub const DESCRIPTOR_SIZE: usize = 16;

/// Default cap on a single frame; oversize frames are rejected on decode
pub const DEFAULT_MAX_MESSAGE_SIZE: u32 = 64 * 1024;

/// Message type and direction flags
pub mod flags {
    /// Caller blocks for a correlated response
    pub const SYNC: u8 = 0b0001;
    /// Fire-and-forget call, no response path
    pub const ASYNC: u8 = 0b0010;
    /// Server-pushed event (unicast or broadcast)
    pub const EVENT: u8 = 0b0100;
    /// Response to an outstanding synchronous call
    pub const RESPONSE: u8 = 0b1000;
}
