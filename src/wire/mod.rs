//! BGP-4 message codec (RFC 4271, RFC 4760, RFC 6793)
//!
//! Everything in here operates on bytes received from an untrusted peer, so every
//! read is bounds-checked through [`ReadUtils`] and every failure is a [`WireError`].

mod notification;
mod open;
mod reader;
mod update;

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use thiserror::Error;

pub use notification::Notification;
pub use open::{Capability, Negotiated, Open, OptionalParameter};
pub use reader::{decode_prefixes, ReadUtils};
pub use update::{ExportFlags, MpReach, RouteAttributes, Update, UpdateContext};

pub const MARKER: [u8; 16] = [0xff; 16];
pub const HEADER_LEN: usize = 19;
pub const OPEN_FIXED_LEN: usize = 10;
pub const BGP_VERSION: u8 = 4;
/// Hold time applied until the peer's OPEN has been negotiated
pub const BGP_DEFAULT_HOLD: u16 = 180;
/// Largest message RFC 4271 allows, header included
pub const MAX_MESSAGE_LEN: usize = 4096;
/// Placeholder 2-byte AS for speakers with a 4-byte AS (RFC 6793)
pub const AS_TRANS: u16 = 23456;
pub const SAFI_UNICAST: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u16)]
pub enum Afi {
    Ipv4 = 1,
    Ipv6 = 2,
}

impl Afi {
    pub fn max_prefix_len(&self) -> u8 {
        match self {
            Afi::Ipv4 => 32,
            Afi::Ipv6 => 128,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum MessageType {
    Open = 1,
    Update = 2,
    Notification = 3,
    KeepAlive = 4,
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let word = match self {
            MessageType::Open => "OPEN",
            MessageType::Update => "UPDATE",
            MessageType::Notification => "NOTIFICATION",
            MessageType::KeepAlive => "KEEPALIVE",
        };
        write!(f, "{}", word)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("truncated message (needed {needed} bytes, {remaining} remaining)")]
    Truncated { needed: usize, remaining: usize },
    #[error("invalid marker in message header")]
    BadMarker,
    #[error("error in packet size ({0})")]
    BadLength(u16),
    #[error("invalid message type {0}")]
    UnknownMessageType(u8),
    #[error("error in packet size (declared {declared}, decoded {consumed})")]
    FramingMismatch { declared: usize, consumed: usize },
    #[error("wrong bgp version ({0})")]
    UnsupportedVersion(u8),
    #[error("wrong neighbor as ({received} != {expected})")]
    AsMismatch { received: u32, expected: u32 },
    #[error("AS_TRANS in header but no capa 65 found")]
    AsTransWithoutCapability,
    #[error("ASN mismatch in 4-octet capability ({received} != {expected})")]
    FourOctetAsMismatch { received: u32, expected: u32 },
    #[error("parameter parsing error (message length {declared} != {expected})")]
    OpenLengthMismatch { declared: usize, expected: usize },
    #[error("unsupported optional parameter {0}")]
    UnsupportedParameter(u8),
    #[error("unacceptable hold time ({0})")]
    UnacceptableHoldTime(u16),
    #[error("malformed capability {0}")]
    MalformedCapability(u8),
    #[error("error in aspath code ({0})")]
    UnsupportedSegmentType(u8),
    #[error("error in {attribute} length ({length} is not a multiple of {entry})")]
    MalformedCommunityLength {
        attribute: &'static str,
        length: usize,
        entry: usize,
    },
    #[error("invalid prefix length {0}")]
    InvalidPrefixLength(u8),
}

impl WireError {
    /// NOTIFICATION (code, subcode) sent to the peer before closing on this error
    pub fn notification_code(&self) -> (u8, u8) {
        use WireError::*;
        match self {
            BadMarker => (1, 1),
            BadLength(_) | Truncated { .. } | FramingMismatch { .. } => (1, 2),
            UnknownMessageType(_) => (1, 3),
            UnsupportedVersion(_) => (2, 1),
            AsMismatch { .. } | AsTransWithoutCapability | FourOctetAsMismatch { .. } => (2, 2),
            UnsupportedParameter(_) => (2, 4),
            UnacceptableHoldTime(_) => (2, 6),
            OpenLengthMismatch { .. } | MalformedCapability(_) => (2, 0),
            UnsupportedSegmentType(_) => (3, 11),
            MalformedCommunityLength { .. } => (3, 1),
            InvalidPrefixLength(_) => (3, 10),
        }
    }
}

/// Fixed 19 byte message header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub length: u16,
    pub kind: MessageType,
}

impl Header {
    /// Inspect the start of a receive buffer.
    /// Returns `Ok(None)` until a full header is available.
    pub fn peek(buf: &[u8]) -> Result<Option<Header>, WireError> {
        if buf.len() < HEADER_LEN {
            return Ok(None);
        }
        if buf[..16] != MARKER {
            return Err(WireError::BadMarker);
        }
        let length = u16::from_be_bytes([buf[16], buf[17]]);
        if usize::from(length) < HEADER_LEN || usize::from(length) > MAX_MESSAGE_LEN {
            return Err(WireError::BadLength(length));
        }
        let kind =
            MessageType::try_from(buf[18]).map_err(|_| WireError::UnknownMessageType(buf[18]))?;
        Ok(Some(Header { length, kind }))
    }
}

/// A fully decoded inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Open(Open),
    Update(Update),
    Notification(Notification),
    KeepAlive,
}

impl Message {
    /// Decode the body of a message whose header has already been validated.
    /// `body` excludes the 19 header bytes.
    pub fn decode(header: Header, body: Bytes, context: &UpdateContext) -> Result<Self, WireError> {
        let declared = usize::from(header.length);
        if body.len() + HEADER_LEN != declared {
            return Err(WireError::FramingMismatch {
                declared,
                consumed: body.len() + HEADER_LEN,
            });
        }
        match header.kind {
            MessageType::Open => Open::decode(body).map(Message::Open),
            MessageType::Update => Update::decode(body, context).map(Message::Update),
            MessageType::Notification => Notification::decode(body).map(Message::Notification),
            MessageType::KeepAlive => {
                if body.is_empty() {
                    Ok(Message::KeepAlive)
                } else {
                    Err(WireError::FramingMismatch {
                        declared,
                        consumed: HEADER_LEN,
                    })
                }
            }
        }
    }

    pub fn kind(&self) -> MessageType {
        match self {
            Message::Open(_) => MessageType::Open,
            Message::Update(_) => MessageType::Update,
            Message::Notification(_) => MessageType::Notification,
            Message::KeepAlive => MessageType::KeepAlive,
        }
    }
}

/// Messages this speaker ever sends. UPDATEs are never originated.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    Open(Open),
    Notification(Notification),
    KeepAlive,
}

impl OutboundMessage {
    pub fn kind(&self) -> MessageType {
        match self {
            OutboundMessage::Open(_) => MessageType::Open,
            OutboundMessage::Notification(_) => MessageType::Notification,
            OutboundMessage::KeepAlive => MessageType::KeepAlive,
        }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        let mut body = BytesMut::new();
        match self {
            OutboundMessage::Open(open) => open.encode(&mut body),
            OutboundMessage::Notification(notification) => notification.encode(&mut body),
            OutboundMessage::KeepAlive => (),
        }
        put_message(buf, self.kind(), &body);
    }
}

fn put_message(buf: &mut BytesMut, kind: MessageType, body: &[u8]) {
    buf.reserve(HEADER_LEN + body.len());
    buf.put_slice(&MARKER);
    buf.put_u16((HEADER_LEN + body.len()) as u16);
    buf.put_u8(kind.into());
    buf.put_slice(body);
}
