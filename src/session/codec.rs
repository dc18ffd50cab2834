use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder, Framed};

use super::SessionError;
use crate::wire::{Header, Message, OutboundMessage, UpdateContext, HEADER_LEN};

pub type MessageProtocol<T> = Framed<T, MessageCodec>;

/// Frames BGP messages out of a TCP byte stream.
/// Holds the per-session state UPDATE decoding depends on, set once OPEN is negotiated.
#[derive(Debug, Default)]
pub struct MessageCodec {
    context: UpdateContext,
}

impl MessageCodec {
    pub fn new(context: UpdateContext) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &UpdateContext {
        &self.context
    }

    pub fn set_context(&mut self, context: UpdateContext) {
        self.context = context;
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = SessionError;

    // Wait for a full header and the full declared length before decoding anything.
    // Bytes past the message stay in the buffer for the next call.
    // Header::peek caps the length at MAX_MESSAGE_LEN, which bounds the buffer.
    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, SessionError> {
        let header = match Header::peek(buf)? {
            Some(header) => header,
            None => return Ok(None),
        };
        let length = usize::from(header.length);
        if buf.len() < length {
            buf.reserve(length - buf.len());
            return Ok(None);
        }
        let mut frame = buf.split_to(length);
        frame.advance(HEADER_LEN);
        let message = Message::decode(header, frame.freeze(), &self.context)?;
        Ok(Some(message))
    }
}

impl Encoder<OutboundMessage> for MessageCodec {
    type Error = SessionError;

    fn encode(&mut self, message: OutboundMessage, buf: &mut BytesMut) -> Result<(), SessionError> {
        message.encode(buf);
        Ok(())
    }
}
