//! Message type definitions for the FM radio network protocol.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Protocol version.
pub const PROTOCOL_VERSION: u16 = 1;

/// Magic bytes for frame header: "FMRP" (FM Radio Protocol).
pub const MAGIC: [u8; 4] = *b"FMRP";

/// Maximum frame payload size (64 KB). Every message is small.
pub const MAX_FRAME_SIZE: u32 = 64 * 1024;

/// Identifier handed out by `AcquireClientId`.
///
/// Assigned from 0 upwards and never reused while the service runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClientId(pub u32);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for ClientId {
    fn from(value: u32) -> Self {
        ClientId(value)
    }
}

/// Hardware state-change kinds a client can wait on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum EventCategory {
    /// Antenna (headset cable) plugged or unplugged.
    AntennaStatusChange = 0,
    /// Tuned frequency changed (seek completed, frequency set).
    FrequencyChange = 1,
    /// Radio switched on or off.
    PlayStateChange = 2,
}

impl EventCategory {
    /// Number of categories.
    pub const COUNT: usize = 3;

    /// All categories in wire order.
    pub const ALL: [EventCategory; Self::COUNT] = [
        EventCategory::AntennaStatusChange,
        EventCategory::FrequencyChange,
        EventCategory::PlayStateChange,
    ];

    /// Dense slot index, suitable for fixed-size per-category arrays.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Stable name used in logs.
    pub fn name(self) -> &'static str {
        match self {
            EventCategory::AntennaStatusChange => "AntennaStatusChange",
            EventCategory::FrequencyChange => "FrequencyChange",
            EventCategory::PlayStateChange => "PlayStateChange",
        }
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<u16> for EventCategory {
    type Error = u16;

    fn try_from(value: u16) -> Result<Self, u16> {
        match value {
            0 => Ok(EventCategory::AntennaStatusChange),
            1 => Ok(EventCategory::FrequencyChange),
            2 => Ok(EventCategory::PlayStateChange),
            _ => Err(value),
        }
    }
}

impl From<EventCategory> for u16 {
    fn from(value: EventCategory) -> Self {
        value as u16
    }
}

/// Audio output the FM stream is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum AudioEndpoint {
    Speakers = 0,
    Headset = 1,
}

impl AudioEndpoint {
    /// Backend endpoint id the audio topology expects.
    pub fn endpoint_id(self) -> u32 {
        match self {
            AudioEndpoint::Speakers => 0,
            AudioEndpoint::Headset => 1,
        }
    }
}

impl TryFrom<u32> for AudioEndpoint {
    type Error = u32;

    fn try_from(value: u32) -> Result<Self, u32> {
        match value {
            0 => Ok(AudioEndpoint::Speakers),
            1 => Ok(AudioEndpoint::Headset),
            _ => Err(value),
        }
    }
}

impl From<AudioEndpoint> for u32 {
    fn from(value: AudioEndpoint) -> Self {
        value as u32
    }
}

/// Message type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum MessageType {
    // Handshake (0x00xx)
    /// Client hello with protocol version.
    Hello = 0x0001,
    /// Server hello response.
    HelloAck = 0x0002,

    // Session (0x01xx)
    /// Acquire a new client id.
    AcquireClientId = 0x0100,
    /// Acquire client id response.
    AcquireClientIdAck = 0x0101,
    /// Request synthetic events carrying current state.
    AcquireInitialState = 0x0102,
    /// Acquire initial state response.
    AcquireInitialStateAck = 0x0103,

    // Tuner control (0x02xx)
    /// Power the radio on.
    EnableRadio = 0x0200,
    /// Enable radio response.
    EnableRadioAck = 0x0201,
    /// Power the radio off.
    DisableRadio = 0x0202,
    /// Disable radio response.
    DisableRadioAck = 0x0203,
    /// Seek to the next station upwards.
    SeekForwards = 0x0204,
    /// Seek forwards response.
    SeekForwardsAck = 0x0205,
    /// Seek to the next station downwards.
    SeekBackwards = 0x0206,
    /// Seek backwards response.
    SeekBackwardsAck = 0x0207,
    /// Route audio to an endpoint.
    SetAudioEndpoint = 0x0208,
    /// Set audio endpoint response.
    SetAudioEndpointAck = 0x0209,
    /// Tune to a frequency.
    SetFrequency = 0x020A,
    /// Set frequency response.
    SetFrequencyAck = 0x020B,
    /// Query signal quality.
    GetSignalQuality = 0x020C,
    /// Signal quality response.
    GetSignalQualityAck = 0x020D,

    // Notifications (0x03xx)
    /// Wait for the next event of a category.
    AcquireEvent = 0x0300,
    /// Event delivered for an outstanding wait.
    EventNotification = 0x0301,

    // Misc (0xFFxx)
    /// Error response.
    Error = 0xFF00,
    /// Keep-alive ping.
    Ping = 0xFF01,
    /// Keep-alive pong.
    Pong = 0xFF02,
}

impl TryFrom<u16> for MessageType {
    type Error = u16;

    fn try_from(value: u16) -> Result<Self, u16> {
        match value {
            0x0001 => Ok(MessageType::Hello),
            0x0002 => Ok(MessageType::HelloAck),
            0x0100 => Ok(MessageType::AcquireClientId),
            0x0101 => Ok(MessageType::AcquireClientIdAck),
            0x0102 => Ok(MessageType::AcquireInitialState),
            0x0103 => Ok(MessageType::AcquireInitialStateAck),
            0x0200 => Ok(MessageType::EnableRadio),
            0x0201 => Ok(MessageType::EnableRadioAck),
            0x0202 => Ok(MessageType::DisableRadio),
            0x0203 => Ok(MessageType::DisableRadioAck),
            0x0204 => Ok(MessageType::SeekForwards),
            0x0205 => Ok(MessageType::SeekForwardsAck),
            0x0206 => Ok(MessageType::SeekBackwards),
            0x0207 => Ok(MessageType::SeekBackwardsAck),
            0x0208 => Ok(MessageType::SetAudioEndpoint),
            0x0209 => Ok(MessageType::SetAudioEndpointAck),
            0x020A => Ok(MessageType::SetFrequency),
            0x020B => Ok(MessageType::SetFrequencyAck),
            0x020C => Ok(MessageType::GetSignalQuality),
            0x020D => Ok(MessageType::GetSignalQualityAck),
            0x0300 => Ok(MessageType::AcquireEvent),
            0x0301 => Ok(MessageType::EventNotification),
            0xFF00 => Ok(MessageType::Error),
            0xFF01 => Ok(MessageType::Ping),
            0xFF02 => Ok(MessageType::Pong),
            _ => Err(value),
        }
    }
}

impl From<MessageType> for u16 {
    fn from(value: MessageType) -> Self {
        value as u16
    }
}

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// Client hello with protocol version.
    Hello { version: u16 },
    /// Ping for keep-alive.
    Ping,
    /// Acquire a new client id for event waits.
    AcquireClientId,
    /// Raise synthetic frequency/play-state events for every client.
    AcquireInitialState,
    /// Power the radio on.
    EnableRadio,
    /// Power the radio off.
    DisableRadio,
    /// Seek upwards.
    SeekForwards,
    /// Seek downwards.
    SeekBackwards,
    /// Route audio. Raw wire value; validated by the service.
    SetAudioEndpoint { endpoint: u32 },
    /// Tune to a frequency in kHz.
    SetFrequency { frequency: u32 },
    /// Query signal quality.
    GetSignalQuality,
    /// Wait for the next event of `category` (raw wire value).
    AcquireEvent { client_id: ClientId, category: u16 },
}

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// Server hello response.
    HelloAck { version: u16, success: bool },
    /// Pong response to ping.
    Pong,
    /// Newly assigned client id.
    AcquireClientIdAck { client_id: ClientId },
    /// Initial state events raised.
    AcquireInitialStateAck,
    /// Radio powered on.
    EnableRadioAck,
    /// Radio powered off.
    DisableRadioAck,
    /// Seek forwards completed.
    SeekForwardsAck,
    /// Seek backwards completed.
    SeekBackwardsAck,
    /// Audio endpoint set.
    SetAudioEndpointAck,
    /// Frequency set.
    SetFrequencyAck,
    /// Signal quality response.
    GetSignalQualityAck { quality: u32 },
    /// An awaited event fired.
    EventNotification { category: EventCategory },
    /// Error response.
    Error { error_code: u16, message: String },
}

impl ClientMessage {
    /// Returns the message type for this message.
    pub fn message_type(&self) -> MessageType {
        match self {
            ClientMessage::Hello { .. } => MessageType::Hello,
            ClientMessage::Ping => MessageType::Ping,
            ClientMessage::AcquireClientId => MessageType::AcquireClientId,
            ClientMessage::AcquireInitialState => MessageType::AcquireInitialState,
            ClientMessage::EnableRadio => MessageType::EnableRadio,
            ClientMessage::DisableRadio => MessageType::DisableRadio,
            ClientMessage::SeekForwards => MessageType::SeekForwards,
            ClientMessage::SeekBackwards => MessageType::SeekBackwards,
            ClientMessage::SetAudioEndpoint { .. } => MessageType::SetAudioEndpoint,
            ClientMessage::SetFrequency { .. } => MessageType::SetFrequency,
            ClientMessage::GetSignalQuality => MessageType::GetSignalQuality,
            ClientMessage::AcquireEvent { .. } => MessageType::AcquireEvent,
        }
    }
}

impl ServerMessage {
    /// Returns the message type for this message.
    pub fn message_type(&self) -> MessageType {
        match self {
            ServerMessage::HelloAck { .. } => MessageType::HelloAck,
            ServerMessage::Pong => MessageType::Pong,
            ServerMessage::AcquireClientIdAck { .. } => MessageType::AcquireClientIdAck,
            ServerMessage::AcquireInitialStateAck => MessageType::AcquireInitialStateAck,
            ServerMessage::EnableRadioAck => MessageType::EnableRadioAck,
            ServerMessage::DisableRadioAck => MessageType::DisableRadioAck,
            ServerMessage::SeekForwardsAck => MessageType::SeekForwardsAck,
            ServerMessage::SeekBackwardsAck => MessageType::SeekBackwardsAck,
            ServerMessage::SetAudioEndpointAck => MessageType::SetAudioEndpointAck,
            ServerMessage::SetFrequencyAck => MessageType::SetFrequencyAck,
            ServerMessage::GetSignalQualityAck { .. } => MessageType::GetSignalQualityAck,
            ServerMessage::EventNotification { .. } => MessageType::EventNotification,
            ServerMessage::Error { .. } => MessageType::Error,
        }
    }
}

/// A client message tagged with its call id.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub call_id: u32,
    pub message: ClientMessage,
}

impl Request {
    pub fn new(call_id: u32, message: ClientMessage) -> Self {
        Self { call_id, message }
    }
}

/// A server message answering the request with the same call id.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub call_id: u32,
    pub message: ServerMessage,
}

impl Response {
    pub fn new(call_id: u32, message: ServerMessage) -> Self {
        Self { call_id, message }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_roundtrip() {
        let types = [
            MessageType::Hello,
            MessageType::AcquireClientId,
            MessageType::SetAudioEndpoint,
            MessageType::AcquireEvent,
            MessageType::EventNotification,
            MessageType::Error,
        ];

        for msg_type in types {
            let value: u16 = msg_type.into();
            let recovered = MessageType::try_from(value).unwrap();
            assert_eq!(msg_type, recovered);
        }
    }

    #[test]
    fn test_event_category_slots() {
        for (i, category) in EventCategory::ALL.iter().enumerate() {
            assert_eq!(category.index(), i);
            assert_eq!(EventCategory::try_from(u16::from(*category)), Ok(*category));
        }
        assert_eq!(EventCategory::try_from(3), Err(3));
    }

    #[test]
    fn test_audio_endpoint_is_closed() {
        assert_eq!(AudioEndpoint::try_from(0), Ok(AudioEndpoint::Speakers));
        assert_eq!(AudioEndpoint::try_from(1), Ok(AudioEndpoint::Headset));
        assert_eq!(AudioEndpoint::try_from(2), Err(2));
        assert_eq!(AudioEndpoint::Headset.endpoint_id(), 1);
    }
}
