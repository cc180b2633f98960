//! Codec for encoding and decoding protocol messages.
//!
//! Frame format:
//! ```text
//! +--------+--------+--------+---------+------------------+
//! | Magic  | Length | Type   | Call id |       Body       |
//! | "FMRP" | u32 LE | u16 LE | u32 LE  |    (variable)    |
//! +--------+--------+--------+---------+------------------+
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;
use crate::types::*;

/// Frame header size: 4 (magic) + 4 (length) + 2 (type) = 10 bytes.
pub const HEADER_SIZE: usize = 10;

/// Size of the call id that starts every payload.
const CALL_ID_SIZE: usize = 4;

/// Encode a client request into bytes.
pub fn encode_client_message(request: &Request) -> Result<Bytes, ProtocolError> {
    let mut payload = BytesMut::new();
    payload.put_u32_le(request.call_id);

    match &request.message {
        ClientMessage::Hello { version } => {
            payload.put_u16_le(*version);
        }
        ClientMessage::SetAudioEndpoint { endpoint } => {
            payload.put_u32_le(*endpoint);
        }
        ClientMessage::SetFrequency { frequency } => {
            payload.put_u32_le(*frequency);
        }
        ClientMessage::AcquireEvent { client_id, category } => {
            payload.put_u32_le(client_id.0);
            payload.put_u16_le(*category);
        }
        ClientMessage::Ping
        | ClientMessage::AcquireClientId
        | ClientMessage::AcquireInitialState
        | ClientMessage::EnableRadio
        | ClientMessage::DisableRadio
        | ClientMessage::SeekForwards
        | ClientMessage::SeekBackwards
        | ClientMessage::GetSignalQuality => {
            // Empty body
        }
    }

    encode_frame(request.message.message_type(), payload.freeze())
}

/// Encode a server response into bytes.
pub fn encode_server_message(response: &Response) -> Result<Bytes, ProtocolError> {
    let mut payload = BytesMut::new();
    payload.put_u32_le(response.call_id);

    match &response.message {
        ServerMessage::HelloAck { version, success } => {
            payload.put_u16_le(*version);
            payload.put_u8(u8::from(*success));
        }
        ServerMessage::AcquireClientIdAck { client_id } => {
            payload.put_u32_le(client_id.0);
        }
        ServerMessage::GetSignalQualityAck { quality } => {
            payload.put_u32_le(*quality);
        }
        ServerMessage::EventNotification { category } => {
            payload.put_u16_le((*category).into());
        }
        ServerMessage::Error { error_code, message } => {
            payload.put_u16_le(*error_code);
            encode_string(&mut payload, message)?;
        }
        ServerMessage::Pong
        | ServerMessage::AcquireInitialStateAck
        | ServerMessage::EnableRadioAck
        | ServerMessage::DisableRadioAck
        | ServerMessage::SeekForwardsAck
        | ServerMessage::SeekBackwardsAck
        | ServerMessage::SetAudioEndpointAck
        | ServerMessage::SetFrequencyAck => {
            // Empty body
        }
    }

    encode_frame(response.message.message_type(), payload.freeze())
}

/// Encode a frame with magic, length, type, and payload.
fn encode_frame(msg_type: MessageType, payload: Bytes) -> Result<Bytes, ProtocolError> {
    let payload_len = u32::try_from(payload.len())
        .map_err(|_| ProtocolError::EncodeError("payload length overflows u32".to_string()))?;
    if payload_len > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(payload_len, MAX_FRAME_SIZE));
    }

    let mut frame = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    frame.put_slice(&MAGIC);
    frame.put_u32_le(payload_len);
    frame.put_u16_le(msg_type.into());
    frame.put_slice(&payload);

    Ok(frame.freeze())
}

fn encode_string(buf: &mut BytesMut, s: &str) -> Result<(), ProtocolError> {
    let bytes = s.as_bytes();
    let len = u16::try_from(bytes.len())
        .map_err(|_| ProtocolError::EncodeError(format!("string too long: {} bytes", bytes.len())))?;
    buf.put_u16_le(len);
    buf.put_slice(bytes);
    Ok(())
}

fn decode_string(buf: &mut Bytes) -> Result<String, ProtocolError> {
    ensure_remaining(buf, 2)?;
    let len = buf.get_u16_le() as usize;
    ensure_remaining(buf, len)?;
    let bytes = buf.copy_to_bytes(len);
    String::from_utf8(bytes.to_vec()).map_err(|e| ProtocolError::DecodeError(e.to_string()))
}

fn ensure_remaining(buf: &Bytes, expected: usize) -> Result<(), ProtocolError> {
    if buf.remaining() < expected {
        return Err(ProtocolError::IncompleteFrame {
            expected,
            actual: buf.remaining(),
        });
    }
    Ok(())
}

fn decode_call_id(buf: &mut Bytes) -> Result<u32, ProtocolError> {
    ensure_remaining(buf, CALL_ID_SIZE)?;
    Ok(buf.get_u32_le())
}

/// Frame header information.
#[derive(Debug, Clone, Copy)]
pub struct FrameHeader {
    pub payload_len: u32,
    pub message_type: MessageType,
}

impl FrameHeader {
    /// Total frame length including the header.
    pub fn frame_len(&self) -> usize {
        HEADER_SIZE + self.payload_len as usize
    }
}

/// Decode a frame header from bytes.
///
/// Returns `Ok(None)` if there aren't enough bytes for a complete header.
pub fn decode_header(buf: &[u8]) -> Result<Option<FrameHeader>, ProtocolError> {
    if buf.len() < HEADER_SIZE {
        return Ok(None);
    }

    let magic = [buf[0], buf[1], buf[2], buf[3]];
    if magic != MAGIC {
        return Err(ProtocolError::InvalidMagic(magic));
    }

    let payload_len = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
    if payload_len > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(payload_len, MAX_FRAME_SIZE));
    }

    let type_val = u16::from_le_bytes([buf[8], buf[9]]);
    let message_type =
        MessageType::try_from(type_val).map_err(ProtocolError::UnknownMessageType)?;

    Ok(Some(FrameHeader {
        payload_len,
        message_type,
    }))
}

/// Decode a client request from its message type and payload.
pub fn decode_client_message(
    msg_type: MessageType,
    mut payload: Bytes,
) -> Result<Request, ProtocolError> {
    let call_id = decode_call_id(&mut payload)?;

    let message = match msg_type {
        MessageType::Hello => {
            ensure_remaining(&payload, 2)?;
            ClientMessage::Hello {
                version: payload.get_u16_le(),
            }
        }
        MessageType::Ping => ClientMessage::Ping,
        MessageType::AcquireClientId => ClientMessage::AcquireClientId,
        MessageType::AcquireInitialState => ClientMessage::AcquireInitialState,
        MessageType::EnableRadio => ClientMessage::EnableRadio,
        MessageType::DisableRadio => ClientMessage::DisableRadio,
        MessageType::SeekForwards => ClientMessage::SeekForwards,
        MessageType::SeekBackwards => ClientMessage::SeekBackwards,
        MessageType::SetAudioEndpoint => {
            ensure_remaining(&payload, 4)?;
            ClientMessage::SetAudioEndpoint {
                endpoint: payload.get_u32_le(),
            }
        }
        MessageType::SetFrequency => {
            ensure_remaining(&payload, 4)?;
            ClientMessage::SetFrequency {
                frequency: payload.get_u32_le(),
            }
        }
        MessageType::GetSignalQuality => ClientMessage::GetSignalQuality,
        MessageType::AcquireEvent => {
            ensure_remaining(&payload, 6)?;
            let client_id = ClientId(payload.get_u32_le());
            let category = payload.get_u16_le();
            ClientMessage::AcquireEvent { client_id, category }
        }
        other => return Err(ProtocolError::UnexpectedMessageType(other.into())),
    };

    Ok(Request { call_id, message })
}

/// Decode a server response from its message type and payload.
pub fn decode_server_message(
    msg_type: MessageType,
    mut payload: Bytes,
) -> Result<Response, ProtocolError> {
    let call_id = decode_call_id(&mut payload)?;

    let message = match msg_type {
        MessageType::HelloAck => {
            ensure_remaining(&payload, 3)?;
            let version = payload.get_u16_le();
            let success = payload.get_u8() != 0;
            ServerMessage::HelloAck { version, success }
        }
        MessageType::Pong => ServerMessage::Pong,
        MessageType::AcquireClientIdAck => {
            ensure_remaining(&payload, 4)?;
            ServerMessage::AcquireClientIdAck {
                client_id: ClientId(payload.get_u32_le()),
            }
        }
        MessageType::AcquireInitialStateAck => ServerMessage::AcquireInitialStateAck,
        MessageType::EnableRadioAck => ServerMessage::EnableRadioAck,
        MessageType::DisableRadioAck => ServerMessage::DisableRadioAck,
        MessageType::SeekForwardsAck => ServerMessage::SeekForwardsAck,
        MessageType::SeekBackwardsAck => ServerMessage::SeekBackwardsAck,
        MessageType::SetAudioEndpointAck => ServerMessage::SetAudioEndpointAck,
        MessageType::SetFrequencyAck => ServerMessage::SetFrequencyAck,
        MessageType::GetSignalQualityAck => {
            ensure_remaining(&payload, 4)?;
            ServerMessage::GetSignalQualityAck {
                quality: payload.get_u32_le(),
            }
        }
        MessageType::EventNotification => {
            ensure_remaining(&payload, 2)?;
            let raw = payload.get_u16_le();
            let category = EventCategory::try_from(raw)
                .map_err(|v| ProtocolError::DecodeError(format!("unknown event category {}", v)))?;
            ServerMessage::EventNotification { category }
        }
        MessageType::Error => {
            ensure_remaining(&payload, 2)?;
            let error_code = payload.get_u16_le();
            let message = decode_string(&mut payload)?;
            ServerMessage::Error { error_code, message }
        }
        other => return Err(ProtocolError::UnexpectedMessageType(other.into())),
    };

    Ok(Response { call_id, message })
}
