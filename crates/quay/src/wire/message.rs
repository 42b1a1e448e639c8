// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2026 quay developers

//! Message envelope: header encode/decode and the frame length invariant.

use crate::error::{Error, Result, Status};
use crate::wire::cursor::{Cursor, CursorMut};
use crate::wire::param::{OutParam, Param, RawDescriptor};
use crate::wire::{flags, DESCRIPTOR_SIZE, HEADER_SIZE};

/// Fixed-size message header, first 16 bytes of every frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    /// Total frame size: header + descriptors + inline payloads
    pub length: u32,
    /// Correlation token matching a response to its outstanding call
    pub message_id: u32,
    /// Protocol id; 0 is reserved for the control protocol
    pub protocol_id: u8,
    /// Sequential action id within the protocol
    pub action_id: u8,
    /// SYNC | ASYNC | EVENT | RESPONSE
    pub flags: u8,
    /// Dispatch status on RESPONSE frames, 0 otherwise
    pub status: u8,
    /// Number of input parameters
    pub param_in: u8,
    /// Number of output placeholder parameters
    pub param_out: u8,
}

impl MessageHeader {
    pub fn is_sync(&self) -> bool {
        self.flags & flags::SYNC != 0
    }

    pub fn is_async(&self) -> bool {
        self.flags & flags::ASYNC != 0
    }

    pub fn is_event(&self) -> bool {
        self.flags & flags::EVENT != 0
    }

    pub fn is_response(&self) -> bool {
        self.flags & flags::RESPONSE != 0
    }

    fn encode(&self, cursor: &mut CursorMut<'_>) -> Result<()> {
        cursor.write_u32_le(self.length)?;
        cursor.write_u32_le(self.message_id)?;
        cursor.write_u8(self.protocol_id)?;
        cursor.write_u8(self.action_id)?;
        cursor.write_u8(self.flags)?;
        cursor.write_u8(self.status)?;
        cursor.write_u8(self.param_in)?;
        cursor.write_u8(self.param_out)?;
        cursor.write_u16_le(0)?;
        Ok(())
    }

    fn decode(cursor: &mut Cursor<'_>) -> Result<Self> {
        let length = cursor.read_u32_le()?;
        let message_id = cursor.read_u32_le()?;
        let protocol_id = cursor.read_u8()?;
        let action_id = cursor.read_u8()?;
        let flags = cursor.read_u8()?;
        let status = cursor.read_u8()?;
        let param_in = cursor.read_u8()?;
        let param_out = cursor.read_u8()?;
        cursor.read_u16_le()?;
        Ok(Self {
            length,
            message_id,
            protocol_id,
            action_id,
            flags,
            status,
            param_in,
            param_out,
        })
    }
}

/// A single wire unit: header, input parameters, output placeholders
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub header: MessageHeader,
    /// Input parameters, `header.param_in` entries
    pub params: Vec<Param>,
    /// Response placeholders, `header.param_out` entries
    pub outs: Vec<OutParam>,
}

impl Message {
    fn build(
        protocol_id: u8,
        action_id: u8,
        message_flags: u8,
        status: Status,
        params: Vec<Param>,
        outs: Vec<OutParam>,
    ) -> Self {
        let mut message = Self {
            header: MessageHeader {
                length: 0,
                message_id: 0,
                protocol_id,
                action_id,
                flags: message_flags,
                status: status as u8,
                param_in: params.len() as u8,
                param_out: outs.len() as u8,
            },
            params,
            outs,
        };
        message.header.length = message.wire_size() as u32;
        message
    }

    /// Build a function call. `sync` callers receive output placeholders
    /// sized from the schema; fire-and-forget calls carry none.
    pub fn call(
        protocol_id: u8,
        action_id: u8,
        sync: bool,
        params: Vec<Param>,
        outs: Vec<OutParam>,
    ) -> Self {
        let flag = if sync { flags::SYNC } else { flags::ASYNC };
        Self::build(protocol_id, action_id, flag, Status::Ok, params, outs)
    }

    /// Build a server-pushed event
    pub fn event(protocol_id: u8, action_id: u8, params: Vec<Param>) -> Self {
        Self::build(
            protocol_id,
            action_id,
            flags::EVENT,
            Status::Ok,
            params,
            Vec::new(),
        )
    }

    /// Build the successful response to a synchronous request, carrying
    /// the request's correlation token.
    pub fn response_to(request: &MessageHeader, params: Vec<Param>) -> Self {
        let mut message = Self::build(
            request.protocol_id,
            request.action_id,
            flags::RESPONSE,
            Status::Ok,
            params,
            Vec::new(),
        );
        message.header.message_id = request.message_id;
        message
    }

    /// Build a status-only response reporting a dispatch failure
    pub fn status_response(request: &MessageHeader, status: Status) -> Self {
        let mut message = Self::build(
            request.protocol_id,
            request.action_id,
            flags::RESPONSE,
            status,
            Vec::new(),
            Vec::new(),
        );
        message.header.message_id = request.message_id;
        message
    }

    /// Total encoded size: header + descriptor array + inline payloads
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE
            + (self.params.len() + self.outs.len()) * DESCRIPTOR_SIZE
            + self.params.iter().map(Param::inline_len).sum::<usize>()
    }

    /// Serialize into a frame. Fails if the parameter counts no longer
    /// match the header or overflow the u8 count fields.
    pub fn encode(&self) -> Result<Vec<u8>> {
        if self.params.len() > u8::MAX as usize || self.outs.len() > u8::MAX as usize {
            return Err(Error::MalformedMessage {
                reason: "more than 255 parameters".into(),
            });
        }
        if self.params.len() != self.header.param_in as usize
            || self.outs.len() != self.header.param_out as usize
        {
            return Err(Error::Internal(
                "header parameter counts out of sync with parameter store".into(),
            ));
        }
        let size = self.wire_size();
        if size != self.header.length as usize {
            return Err(Error::Internal(
                "header length out of sync with parameter store".into(),
            ));
        }

        let mut frame = vec![0u8; size];
        let mut cursor = CursorMut::new(&mut frame);
        self.header.encode(&mut cursor)?;
        for param in &self.params {
            param.encode_descriptor(&mut cursor)?;
        }
        for out in &self.outs {
            out.encode_descriptor(&mut cursor)?;
        }
        for param in &self.params {
            if let Param::Buffer(data) = param {
                cursor.write_bytes(data)?;
            }
        }
        debug_assert_eq!(cursor.offset(), size);
        Ok(frame)
    }

    /// Deserialize a frame, enforcing the length invariant. Never reads
    /// past the declared `length`; trailing bytes beyond it are ignored.
    pub fn decode(bytes: &[u8], max_message_size: u32) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(Error::MalformedMessage {
                reason: "frame shorter than header".into(),
            });
        }
        let mut cursor = Cursor::new(bytes);
        let header = MessageHeader::decode(&mut cursor)?;

        let declared = header.length as usize;
        if declared > max_message_size as usize {
            return Err(Error::MalformedMessage {
                reason: format!(
                    "declared length {} exceeds maximum {}",
                    declared, max_message_size
                ),
            });
        }
        if declared < HEADER_SIZE || declared > bytes.len() {
            return Err(Error::MalformedMessage {
                reason: format!(
                    "declared length {} does not fit received frame of {} bytes",
                    declared,
                    bytes.len()
                ),
            });
        }

        // Constrain all further reads to the declared frame.
        let mut cursor = Cursor::new(&bytes[..declared]);
        let _ = MessageHeader::decode(&mut cursor)?;

        let descriptor_count = header.param_in as usize + header.param_out as usize;
        if HEADER_SIZE + descriptor_count * DESCRIPTOR_SIZE > declared {
            return Err(Error::MalformedMessage {
                reason: "descriptor array exceeds declared length".into(),
            });
        }

        let mut raw_params = Vec::with_capacity(header.param_in as usize);
        for _ in 0..header.param_in {
            raw_params.push(RawDescriptor::decode(&mut cursor)?);
        }
        let mut outs = Vec::with_capacity(header.param_out as usize);
        for _ in 0..header.param_out {
            outs.push(OutParam::decode_descriptor(&mut cursor)?);
        }

        let mut params = Vec::with_capacity(header.param_in as usize);
        for raw in raw_params {
            params.push(raw.into_param(&mut cursor)?);
        }

        if cursor.remaining() != 0 {
            return Err(Error::MalformedMessage {
                reason: format!(
                    "declared length {} leaves {} undeclared payload bytes",
                    declared,
                    cursor.remaining()
                ),
            });
        }

        Ok(Self {
            header,
            params,
            outs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::DEFAULT_MAX_MESSAGE_SIZE;

    fn roundtrip(message: &Message) -> Message {
        let frame = message.encode().expect("encode");
        assert_eq!(frame.len(), message.header.length as usize);
        Message::decode(&frame, DEFAULT_MAX_MESSAGE_SIZE).expect("decode")
    }

    #[test]
    fn header_only_roundtrip() {
        let message = Message::call(3, 1, false, Vec::new(), Vec::new());
        assert_eq!(message.header.length as usize, HEADER_SIZE);
        assert_eq!(roundtrip(&message), message);
    }

    #[test]
    fn mixed_params_roundtrip() {
        let message = Message::call(
            7,
            2,
            true,
            vec![
                Param::u32(0xAABB_CCDD),
                Param::bytes(&[9, 8, 7]),
                Param::shm(0x1000, 4096),
                Param::string(None),
            ],
            vec![OutParam::value(4), OutParam::buffer(64)],
        );
        assert_eq!(roundtrip(&message), message);
    }

    #[test]
    fn length_invariant_holds() {
        let message = Message::call(
            1,
            0,
            true,
            vec![Param::bytes(&[1, 2, 3, 4, 5])],
            vec![OutParam::buffer(16)],
        );
        assert_eq!(
            message.header.length as usize,
            HEADER_SIZE + 2 * DESCRIPTOR_SIZE + 5
        );
    }

    #[test]
    fn truncated_frame_rejected() {
        let message = Message::call(1, 0, false, vec![Param::bytes(&[1, 2, 3])], Vec::new());
        let frame = message.encode().expect("encode");
        let err = Message::decode(&frame[..frame.len() - 1], DEFAULT_MAX_MESSAGE_SIZE).unwrap_err();
        assert!(matches!(err, Error::MalformedMessage { .. }));
    }

    #[test]
    fn trailing_bytes_beyond_length_ignored() {
        let message = Message::event(4, 1, vec![Param::u8(0xEE)]);
        let mut frame = message.encode().expect("encode");
        frame.extend_from_slice(&[0xFF; 8]);
        assert_eq!(
            Message::decode(&frame, DEFAULT_MAX_MESSAGE_SIZE).expect("decode"),
            message
        );
    }

    #[test]
    fn oversize_frame_rejected() {
        let message = Message::call(1, 0, false, vec![Param::bytes(&[0u8; 128])], Vec::new());
        let frame = message.encode().expect("encode");
        let err = Message::decode(&frame, 64).unwrap_err();
        assert!(matches!(err, Error::MalformedMessage { .. }));
    }

    #[test]
    fn undeclared_payload_rejected() {
        // Frame claims a longer length than its parameters account for.
        let message = Message::call(1, 0, false, vec![Param::u8(1)], Vec::new());
        let mut frame = message.encode().expect("encode");
        frame.extend_from_slice(&[0u8; 4]);
        let padded = (frame.len()) as u32;
        frame[0..4].copy_from_slice(&padded.to_le_bytes());
        let err = Message::decode(&frame, DEFAULT_MAX_MESSAGE_SIZE).unwrap_err();
        assert!(matches!(err, Error::MalformedMessage { .. }));
    }

    #[test]
    fn descriptor_overrun_rejected() {
        let message = Message::call(1, 0, false, Vec::new(), Vec::new());
        let mut frame = message.encode().expect("encode");
        // Claim eight input parameters with no room for their descriptors.
        frame[12] = 8;
        let err = Message::decode(&frame, DEFAULT_MAX_MESSAGE_SIZE).unwrap_err();
        assert!(matches!(err, Error::MalformedMessage { .. }));
    }

    #[test]
    fn shm_out_placeholder_rejected() {
        let message = Message::call(
            1,
            0,
            true,
            vec![Param::shm(0x2000, 64)],
            vec![OutParam::value(4)],
        );
        let mut frame = message.encode().expect("encode");
        // Rewrite the placeholder descriptor kind to SHM.
        frame[HEADER_SIZE + DESCRIPTOR_SIZE] = 2;
        let err = Message::decode(&frame, DEFAULT_MAX_MESSAGE_SIZE).unwrap_err();
        assert!(matches!(err, Error::MalformedMessage { .. }));
    }

    #[test]
    fn response_carries_request_token() {
        let mut request = Message::call(5, 3, true, vec![Param::u32(1)], vec![OutParam::value(4)]);
        request.header.message_id = 77;
        let response = Message::response_to(&request.header, vec![Param::u32(1)]);
        assert_eq!(response.header.message_id, 77);
        assert!(response.header.is_response());
        assert_eq!(response.header.protocol_id, 5);
        assert_eq!(response.header.action_id, 3);
    }

    #[test]
    fn status_response_is_header_only() {
        let request = Message::call(5, 9, true, Vec::new(), Vec::new());
        let response = Message::status_response(&request.header, Status::ActionNotFound);
        assert_eq!(response.header.status, Status::ActionNotFound as u8);
        assert_eq!(response.wire_size(), HEADER_SIZE);
    }
}
