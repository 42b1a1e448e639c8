// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2026 quay developers

//! Parameter entries: the typed union carried by message descriptors.
//!
//! A parameter has three representations. The call-site representation is
//! [`Param`] (what generated stubs build from typed arguments). The wire
//! representation is a 16-byte descriptor plus, for BUFFER kinds, inline
//! payload bytes. The reply-placeholder representation is [`OutParam`],
//! a descriptor that reserves response capacity without carrying payload.

use crate::error::{Error, Result};
use crate::wire::cursor::{Cursor, CursorMut};
use crate::wire::DESCRIPTOR_SIZE;

/// Wire kind tag of a parameter descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ParamKind {
    /// Scalar carried by value inside the descriptor, width 1/2/4/8
    Value = 0,
    /// Arbitrary bytes, length-prefixed, inline after the descriptor array
    Buffer = 1,
    /// Reference to a shared-memory region, never copied inline
    Shm = 2,
}

impl ParamKind {
    fn from_wire(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(Self::Value),
            1 => Ok(Self::Buffer),
            2 => Ok(Self::Shm),
            other => Err(Error::MalformedMessage {
                reason: format!("unknown parameter kind {}", other),
            }),
        }
    }
}

fn check_value_width(width: u32) -> Result<u8> {
    match width {
        1 | 2 | 4 | 8 => Ok(width as u8),
        other => Err(Error::MalformedMessage {
            reason: format!("invalid value width {}", other),
        }),
    }
}

/// An input parameter as built by the sending stub or decoded on the
/// receiving side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Param {
    /// Scalar, stored inside the descriptor
    Value { width: u8, value: u64 },
    /// Inline byte payload; an empty vector encodes an absent optional
    /// buffer (descriptor length 0, no payload bytes)
    Buffer(Vec<u8>),
    /// Shared-memory region reference: handle + region byte size
    Shm { handle: u64, len: u32 },
}

impl Param {
    pub fn u8(value: u8) -> Self {
        Self::Value {
            width: 1,
            value: u64::from(value),
        }
    }

    pub fn u16(value: u16) -> Self {
        Self::Value {
            width: 2,
            value: u64::from(value),
        }
    }

    pub fn u32(value: u32) -> Self {
        Self::Value {
            width: 4,
            value: u64::from(value),
        }
    }

    pub fn u64(value: u64) -> Self {
        Self::Value { width: 8, value }
    }

    pub fn bytes(data: &[u8]) -> Self {
        Self::Buffer(data.to_vec())
    }

    /// Encode an optional string: NUL-terminated, length `len + 1`, or a
    /// zero-length buffer when absent.
    pub fn string(value: Option<&str>) -> Self {
        match value {
            Some(s) => {
                let mut data = Vec::with_capacity(s.len() + 1);
                data.extend_from_slice(s.as_bytes());
                data.push(0);
                Self::Buffer(data)
            }
            None => Self::Buffer(Vec::new()),
        }
    }

    pub fn shm(handle: u64, len: u32) -> Self {
        Self::Shm { handle, len }
    }

    /// Wire kind of this parameter
    pub fn kind(&self) -> ParamKind {
        match self {
            Self::Value { .. } => ParamKind::Value,
            Self::Buffer(_) => ParamKind::Buffer,
            Self::Shm { .. } => ParamKind::Shm,
        }
    }

    /// Inline payload bytes this parameter contributes after the
    /// descriptor array
    pub fn inline_len(&self) -> usize {
        match self {
            Self::Buffer(data) => data.len(),
            Self::Value { .. } | Self::Shm { .. } => 0,
        }
    }

    pub fn as_u64(&self) -> Result<u64> {
        match self {
            Self::Value { value, .. } => Ok(*value),
            other => Err(Error::MalformedMessage {
                reason: format!("expected value parameter, found {:?}", other.kind()),
            }),
        }
    }

    pub fn as_u32(&self) -> Result<u32> {
        Ok(self.as_u64()? as u32)
    }

    pub fn as_u8(&self) -> Result<u8> {
        Ok(self.as_u64()? as u8)
    }

    pub fn as_bytes(&self) -> Result<&[u8]> {
        match self {
            Self::Buffer(data) => Ok(data),
            other => Err(Error::MalformedMessage {
                reason: format!("expected buffer parameter, found {:?}", other.kind()),
            }),
        }
    }

    /// Decode an optional NUL-terminated string parameter
    pub fn as_string(&self) -> Result<Option<&str>> {
        let data = self.as_bytes()?;
        if data.is_empty() {
            return Ok(None);
        }
        let Some((&0, text)) = data.split_last() else {
            return Err(Error::MalformedMessage {
                reason: "string parameter missing NUL terminator".into(),
            });
        };
        std::str::from_utf8(text)
            .map(Some)
            .map_err(|_| Error::MalformedMessage {
                reason: "string parameter is not valid UTF-8".into(),
            })
    }

    /// Write this parameter's 16-byte descriptor
    pub(crate) fn encode_descriptor(&self, cursor: &mut CursorMut<'_>) -> Result<()> {
        let (kind, length, value) = match self {
            Self::Value { width, value } => (ParamKind::Value, u32::from(*width), *value),
            Self::Buffer(data) => (ParamKind::Buffer, data.len() as u32, 0),
            Self::Shm { handle, len } => (ParamKind::Shm, *len, *handle),
        };
        encode_raw_descriptor(cursor, kind, length, value)
    }
}

/// A response placeholder on the request side: reserves reply space by
/// declaring a capacity, carries no payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutParam {
    /// Scalar reply slot, width 1/2/4/8
    Value { width: u8 },
    /// Buffer reply slot with a declared byte capacity
    Buffer { capacity: u32 },
}

impl OutParam {
    pub fn value(width: u8) -> Self {
        Self::Value { width }
    }

    pub fn buffer(capacity: u32) -> Self {
        Self::Buffer { capacity }
    }

    pub(crate) fn encode_descriptor(&self, cursor: &mut CursorMut<'_>) -> Result<()> {
        match self {
            Self::Value { width } => {
                encode_raw_descriptor(cursor, ParamKind::Value, u32::from(*width), 0)
            }
            Self::Buffer { capacity } => {
                encode_raw_descriptor(cursor, ParamKind::Buffer, *capacity, 0)
            }
        }
    }

    pub(crate) fn decode_descriptor(cursor: &mut Cursor<'_>) -> Result<Self> {
        let raw = RawDescriptor::decode(cursor)?;
        match raw.kind {
            ParamKind::Value => Ok(Self::Value {
                width: check_value_width(raw.length)?,
            }),
            ParamKind::Buffer => Ok(Self::Buffer {
                capacity: raw.length,
            }),
            ParamKind::Shm => Err(Error::MalformedMessage {
                reason: "shm descriptor in output placeholder position".into(),
            }),
        }
    }
}

fn encode_raw_descriptor(
    cursor: &mut CursorMut<'_>,
    kind: ParamKind,
    length: u32,
    value: u64,
) -> Result<()> {
    let start = cursor.offset();
    cursor.write_u8(kind as u8)?;
    cursor.write_u8(0)?;
    cursor.write_u16_le(0)?;
    cursor.write_u32_le(length)?;
    cursor.write_u64_le(value)?;
    debug_assert_eq!(cursor.offset() - start, DESCRIPTOR_SIZE);
    Ok(())
}

/// Decoded descriptor before payload resolution
#[derive(Debug)]
pub(crate) struct RawDescriptor {
    pub kind: ParamKind,
    pub length: u32,
    pub value: u64,
}

impl RawDescriptor {
    pub(crate) fn decode(cursor: &mut Cursor<'_>) -> Result<Self> {
        let kind = ParamKind::from_wire(cursor.read_u8()?)?;
        cursor.read_u8()?;
        cursor.read_u16_le()?;
        let length = cursor.read_u32_le()?;
        let value = cursor.read_u64_le()?;
        Ok(Self {
            kind,
            length,
            value,
        })
    }

    /// Resolve this descriptor into an input parameter, consuming inline
    /// payload bytes for BUFFER kinds.
    pub(crate) fn into_param(self, payload: &mut Cursor<'_>) -> Result<Param> {
        match self.kind {
            ParamKind::Value => Ok(Param::Value {
                width: check_value_width(self.length)?,
                value: self.value,
            }),
            ParamKind::Buffer => {
                let data = payload.read_bytes(self.length as usize)?;
                Ok(Param::Buffer(data.to_vec()))
            }
            ParamKind::Shm => Ok(Param::Shm {
                handle: self.value,
                len: self.length,
            }),
        }
    }
}
