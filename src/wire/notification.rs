use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use super::{ReadUtils, WireError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub code: u8,
    pub subcode: u8,
    pub data: Bytes,
}

impl Notification {
    pub fn new(code: u8, subcode: u8) -> Self {
        Self {
            code,
            subcode,
            data: Bytes::new(),
        }
    }

    pub fn decode(mut body: Bytes) -> Result<Self, WireError> {
        let code = body.read_u8()?;
        let subcode = body.read_u8()?;
        Ok(Self {
            code,
            subcode,
            data: body,
        })
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.code);
        buf.put_u8(self.subcode);
        buf.put_slice(&self.data);
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "code {}/{}", self.code, self.subcode)
    }
}
