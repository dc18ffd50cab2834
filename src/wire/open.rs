use std::cmp;
use std::net::Ipv4Addr;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::{Afi, ReadUtils, WireError, AS_TRANS, BGP_VERSION, HEADER_LEN, OPEN_FIXED_LEN, SAFI_UNICAST};

const PARAM_CAPABILITIES: u8 = 2;
/// Optional parameter types above this are rejected
const PARAM_MAX_KNOWN: u8 = 4;
const CAPABILITY_MULTIPROTOCOL: u8 = 1;
const CAPABILITY_FOUR_OCTET_AS: u8 = 65;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capability {
    MultiProtocol { afi: u16, safi: u8 },
    FourOctetAs(u32),
    Unknown { code: u8, value: Bytes },
}

impl Capability {
    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        let code = buf.read_u8()?;
        let length = buf.read_u8()?;
        let mut value = buf
            .read_n_bytes(length.into())
            .map_err(|_| WireError::MalformedCapability(code))?;
        let capability = match code {
            CAPABILITY_FOUR_OCTET_AS if length == 4 => Capability::FourOctetAs(value.get_u32()),
            CAPABILITY_MULTIPROTOCOL if length == 4 => {
                let afi = value.get_u16();
                let _reserved = value.get_u8();
                Capability::MultiProtocol {
                    afi,
                    safi: value.get_u8(),
                }
            }
            CAPABILITY_FOUR_OCTET_AS | CAPABILITY_MULTIPROTOCOL => {
                return Err(WireError::MalformedCapability(code))
            }
            _ => Capability::Unknown { code, value },
        };
        Ok(capability)
    }

    fn encode(&self, buf: &mut BytesMut) {
        match self {
            Capability::MultiProtocol { afi, safi } => {
                buf.put_u8(CAPABILITY_MULTIPROTOCOL);
                buf.put_u8(4);
                buf.put_u16(*afi);
                buf.put_u8(0);
                buf.put_u8(*safi);
            }
            Capability::FourOctetAs(asn) => {
                buf.put_u8(CAPABILITY_FOUR_OCTET_AS);
                buf.put_u8(4);
                buf.put_u32(*asn);
            }
            Capability::Unknown { code, value } => {
                buf.put_u8(*code);
                buf.put_u8(value.len() as u8);
                buf.put_slice(value);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionalParameter {
    Capabilities(Vec<Capability>),
    Other { kind: u8, value: Bytes },
}

impl OptionalParameter {
    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        let kind = buf.read_u8()?;
        let length = buf.read_u8()?;
        if kind > PARAM_MAX_KNOWN {
            return Err(WireError::UnsupportedParameter(kind));
        }
        let mut value = buf.read_n_bytes(length.into())?;
        if kind != PARAM_CAPABILITIES {
            return Ok(OptionalParameter::Other { kind, value });
        }
        let mut capabilities = Vec::new();
        while value.has_remaining() {
            capabilities.push(Capability::decode(&mut value)?);
        }
        Ok(OptionalParameter::Capabilities(capabilities))
    }

    fn encode(&self, buf: &mut BytesMut) {
        match self {
            OptionalParameter::Capabilities(capabilities) => {
                let mut value = BytesMut::new();
                for capability in capabilities {
                    capability.encode(&mut value);
                }
                buf.put_u8(PARAM_CAPABILITIES);
                buf.put_u8(value.len() as u8);
                buf.put_slice(&value);
            }
            OptionalParameter::Other { kind, value } => {
                buf.put_u8(*kind);
                buf.put_u8(value.len() as u8);
                buf.put_slice(value);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Open {
    pub version: u8,
    pub asn: u16,
    pub hold_time: u16,
    pub router_id: Ipv4Addr,
    pub parameters: Vec<OptionalParameter>,
}

/// Session parameters agreed from a peer's OPEN
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Negotiated {
    /// Used for both receive and send hold times, 0 disables both
    pub hold_time: u16,
    pub four_octet_as: bool,
    pub router_id: Ipv4Addr,
}

impl Open {
    /// Structural decode of an OPEN body (without the 19 byte header)
    pub fn decode(mut body: Bytes) -> Result<Self, WireError> {
        body.has_n_remaining(OPEN_FIXED_LEN)?;
        let declared = HEADER_LEN + body.len();
        let version = body.read_u8()?;
        let asn = body.read_u16()?;
        let hold_time = body.read_u16()?;
        let router_id = body.read_ipv4_address()?;
        let params_len = usize::from(body.read_u8()?);
        if body.remaining() != params_len {
            return Err(WireError::OpenLengthMismatch {
                declared,
                expected: HEADER_LEN + OPEN_FIXED_LEN + params_len,
            });
        }
        let mut parameters = Vec::new();
        while body.has_remaining() {
            parameters.push(OptionalParameter::decode(&mut body)?);
        }
        Ok(Open {
            version,
            asn,
            hold_time,
            router_id,
            parameters,
        })
    }

    /// The OPEN this speaker replies with: 4-byte AS and single family capabilities
    pub fn local(local_as: u32, hold_time: u16, router_id: Ipv4Addr, family: Afi) -> Self {
        let asn = u16::try_from(local_as).unwrap_or(AS_TRANS);
        Open {
            version: BGP_VERSION,
            asn,
            hold_time,
            router_id,
            parameters: vec![OptionalParameter::Capabilities(vec![
                Capability::FourOctetAs(local_as),
                Capability::MultiProtocol {
                    afi: family.into(),
                    safi: SAFI_UNICAST,
                },
            ])],
        }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        let mut params = BytesMut::new();
        for parameter in &self.parameters {
            parameter.encode(&mut params);
        }
        buf.put_u8(self.version);
        buf.put_u16(self.asn);
        buf.put_u16(self.hold_time);
        buf.put_slice(&self.router_id.octets());
        buf.put_u8(params.len() as u8);
        buf.put_slice(&params);
    }

    pub fn capabilities(&self) -> impl Iterator<Item = &Capability> {
        self.parameters
            .iter()
            .filter_map(|p| match p {
                OptionalParameter::Capabilities(caps) => Some(caps),
                _ => None,
            })
            .flatten()
    }

    /// 4-byte AS from capability 65, if present
    pub fn four_octet_as(&self) -> Option<u32> {
        self.capabilities().find_map(|c| match c {
            Capability::FourOctetAs(asn) => Some(*asn),
            _ => None,
        })
    }

    /// Validate this OPEN against the configured peer and agree on session parameters
    pub fn negotiate(&self, remote_as: u32, local_hold_time: u16) -> Result<Negotiated, WireError> {
        if self.version != BGP_VERSION {
            return Err(WireError::UnsupportedVersion(self.version));
        }
        // RFC 4271 6.2: hold time must be 0 or at least 3 seconds
        if self.hold_time == 1 || self.hold_time == 2 {
            return Err(WireError::UnacceptableHoldTime(self.hold_time));
        }
        let as_trans = self.asn == AS_TRANS;
        if !as_trans && u32::from(self.asn) != remote_as {
            return Err(WireError::AsMismatch {
                received: u32::from(self.asn),
                expected: remote_as,
            });
        }
        let four_octet_as = match self.four_octet_as() {
            Some(asn) if asn == remote_as => true,
            Some(asn) => {
                return Err(WireError::FourOctetAsMismatch {
                    received: asn,
                    expected: remote_as,
                })
            }
            None if as_trans => return Err(WireError::AsTransWithoutCapability),
            None => false,
        };
        Ok(Negotiated {
            hold_time: cmp::min(self.hold_time, local_hold_time),
            four_octet_as,
            router_id: self.router_id,
        })
    }
}
