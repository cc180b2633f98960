//! Network protocol definitions for the FM radio tuner service.
//!
//! This crate defines the binary protocol spoken between the tuner service
//! and its remote clients: control verbs (power, seek, tune, audio endpoint,
//! signal quality) and the long-poll event wait.
//!
//! # Frame Format
//!
//! ```text
//! +--------+--------+--------+---------+------------------+
//! | Magic  | Length | Type   | Call id |       Body       |
//! | "FMRP" | u32 LE | u16 LE | u32 LE  |    (variable)    |
//! +--------+--------+--------+---------+------------------+
//! | 4 bytes| 4 bytes| 2 bytes| 4 bytes |                  |
//! ```
//!
//! `Length` covers the call id and the body. A response carries the call id
//! of the request it answers, so any number of calls may be in flight on one
//! connection.
//!
//! # Example
//!
//! ```rust
//! use fmradio_protocol::{ClientMessage, Request, encode_client_message, decode_header, decode_client_message, HEADER_SIZE};
//! use bytes::Bytes;
//!
//! let request = Request::new(7, ClientMessage::Hello { version: 1 });
//! let encoded = encode_client_message(&request).unwrap();
//!
//! let header = decode_header(&encoded).unwrap().unwrap();
//! let payload = Bytes::copy_from_slice(&encoded[HEADER_SIZE..]);
//! let decoded = decode_client_message(header.message_type, payload).unwrap();
//! assert_eq!(decoded, request);
//! ```

pub mod codec;
pub mod error;
pub mod types;

pub use codec::{
    decode_client_message, decode_header, decode_server_message, encode_client_message,
    encode_server_message, FrameHeader, HEADER_SIZE,
};
pub use error::{ErrorCode, ProtocolError};
pub use types::{
    AudioEndpoint, ClientId, ClientMessage, EventCategory, MessageType, Request, Response,
    ServerMessage, MAGIC, MAX_FRAME_SIZE, PROTOCOL_VERSION,
};
