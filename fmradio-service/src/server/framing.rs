//! Stream framing for the command protocol.

use bytes::{Buf, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

use fmradio_protocol::{
    decode_client_message, decode_header, encode_server_message, ProtocolError, Request,
    Response, HEADER_SIZE,
};

/// Framing errors.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl From<FrameError> for std::io::Error {
    fn from(e: FrameError) -> Self {
        match e {
            FrameError::Io(e) => e,
            FrameError::Protocol(e) => std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        }
    }
}

/// Decodes client requests and encodes server responses.
#[derive(Debug, Default, Clone, Copy)]
pub struct ServerCodec;

impl Decoder for ServerCodec {
    type Item = Request;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Request>, FrameError> {
        let Some(header) = decode_header(&src[..])? else {
            return Ok(None);
        };

        let frame_len = header.frame_len();
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_SIZE);
        let payload = src.split_to(header.payload_len as usize).freeze();
        Ok(Some(decode_client_message(header.message_type, payload)?))
    }
}

impl Encoder<Response> for ServerCodec {
    type Error = FrameError;

    fn encode(&mut self, response: Response, dst: &mut BytesMut) -> Result<(), FrameError> {
        let encoded = encode_server_message(&response)?;
        dst.extend_from_slice(&encoded);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fmradio_protocol::{
        decode_server_message, encode_client_message, ClientMessage, ServerMessage,
    };

    #[test]
    fn test_decode_waits_for_whole_frame() {
        let frame = encode_client_message(&Request::new(7, ClientMessage::SetFrequency {
            frequency: 89_100,
        }))
        .unwrap();

        let mut codec = ServerCodec;
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&frame[..HEADER_SIZE + 2]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&frame[HEADER_SIZE + 2..]);
        let request = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(request.call_id, 7);
        assert_eq!(request.message, ClientMessage::SetFrequency { frequency: 89_100 });
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_back_to_back_frames() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&encode_client_message(&Request::new(1, ClientMessage::Ping)).unwrap());
        buf.extend_from_slice(
            &encode_client_message(&Request::new(2, ClientMessage::EnableRadio)).unwrap(),
        );

        let mut codec = ServerCodec;
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().call_id, 1);
        assert_eq!(
            codec.decode(&mut buf).unwrap().unwrap().message,
            ClientMessage::EnableRadio
        );
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let mut buf = BytesMut::from(&b"GARBAGE!!!!!"[..]);
        let err = ServerCodec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, FrameError::Protocol(ProtocolError::InvalidMagic(_))));
    }

    #[test]
    fn test_encode_response() {
        let mut buf = BytesMut::new();
        ServerCodec
            .encode(
                Response::new(3, ServerMessage::GetSignalQualityAck { quality: 80 }),
                &mut buf,
            )
            .unwrap();

        let header = decode_header(&buf).unwrap().unwrap();
        assert_eq!(header.frame_len(), buf.len());
        let response =
            decode_server_message(header.message_type, buf.split_off(HEADER_SIZE).freeze())
                .unwrap();
        assert_eq!(response.call_id, 3);
        assert_eq!(response.message, ServerMessage::GetSignalQualityAck { quality: 80 });
    }
}
