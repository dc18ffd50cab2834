use std::collections::HashMap;
use std::net::{Ipv4Addr, Ipv6Addr};

use bitflags::bitflags;
use bytes::{Buf, Bytes};
use ipnetwork::IpNetwork;
use log::warn;

use super::{decode_prefixes, Afi, ReadUtils, WireError, HEADER_LEN, SAFI_UNICAST};
use crate::models::{Community, ExtCommunity, LargeCommunity, Origin};

const ATTR_ORIGIN: u8 = 1;
const ATTR_AS_PATH: u8 = 2;
const ATTR_NEXT_HOP: u8 = 3;
const ATTR_COMMUNITY: u8 = 8;
const ATTR_MP_REACH_NLRI: u8 = 14;
const ATTR_MP_UNREACH_NLRI: u8 = 15;
const ATTR_EXT_COMMUNITY: u8 = 16;
const ATTR_IPV6_EXT_COMMUNITY: u8 = 25;
const ATTR_LARGE_COMMUNITY: u8 = 32;

const FLAG_EXTENDED_LENGTH: u8 = 0x10;

const AS_SET: u8 = 1;
const AS_SEQUENCE: u8 = 2;

/// Longest AS path kept per route, dump records store the count in one byte
pub const MAX_AS_PATH_LEN: usize = 255;

bitflags! {
    /// Which path attributes are extracted from UPDATEs and written to recordings
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ExportFlags: u8 {
        const ORIGIN = 0x01;
        const ASPATH = 0x02;
        const COMMUNITY = 0x04;
        const EXTCOMMUNITY = 0x08;
        const LARGECOMMUNITY = 0x10;
        const NEXTHOP = 0x20;
    }
}

impl Default for ExportFlags {
    fn default() -> Self {
        ExportFlags::empty()
    }
}

impl ExportFlags {
    /// Flag for a configuration keyword such as "aspath"
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        let flag = match keyword.to_lowercase().as_str() {
            "origin" => ExportFlags::ORIGIN,
            "aspath" => ExportFlags::ASPATH,
            "community" => ExportFlags::COMMUNITY,
            "extcommunity" => ExportFlags::EXTCOMMUNITY,
            "largecommunity" => ExportFlags::LARGECOMMUNITY,
            "nexthop" => ExportFlags::NEXTHOP,
            _ => return None,
        };
        Some(flag)
    }
}

/// Per-session state needed to decode UPDATEs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateContext {
    pub four_octet_as: bool,
    pub export: ExportFlags,
}

/// Raw attribute values keyed by type code, the last occurrence of a code wins
struct PathAttributeSet(HashMap<u8, Bytes>);

impl PathAttributeSet {
    fn decode(mut buf: Bytes) -> Result<Self, WireError> {
        let mut attributes = HashMap::new();
        while buf.has_remaining() {
            let flags = buf.read_u8()?;
            let code = buf.read_u8()?;
            let length = if flags & FLAG_EXTENDED_LENGTH != 0 {
                usize::from(buf.read_u16()?)
            } else {
                usize::from(buf.read_u8()?)
            };
            attributes.insert(code, buf.read_n_bytes(length)?);
        }
        Ok(Self(attributes))
    }

    fn get(&self, code: u8) -> Option<Bytes> {
        self.0.get(&code).cloned()
    }
}

/// Path attributes shared by every prefix announced in one UPDATE
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteAttributes {
    pub origin: Origin,
    pub as_path: Vec<u32>,
    pub next_hop: Option<Ipv4Addr>,
    pub communities: Vec<Community>,
    /// 8 byte form, recorded with IPv4 announcements
    pub ext_communities: Vec<ExtCommunity>,
    /// 20 byte form, recorded with IPv6 announcements
    pub ipv6_ext_communities: Vec<ExtCommunity>,
    pub large_communities: Vec<LargeCommunity>,
}

impl RouteAttributes {
    fn extract(set: &PathAttributeSet, context: &UpdateContext) -> Result<Self, WireError> {
        let export = context.export;
        let mut attributes = RouteAttributes::default();

        if export.contains(ExportFlags::ORIGIN) {
            if let Some(value) = set.get(ATTR_ORIGIN) {
                if value.len() == 1 {
                    attributes.origin = Origin(value[0]);
                }
            }
        }
        if export.contains(ExportFlags::ASPATH) {
            if let Some(value) = set.get(ATTR_AS_PATH) {
                attributes.as_path = decode_as_path(value, context.four_octet_as)?;
            }
        }
        if export.contains(ExportFlags::NEXTHOP) {
            if let Some(mut value) = set.get(ATTR_NEXT_HOP) {
                if value.len() == 4 {
                    attributes.next_hop = Some(value.read_ipv4_address()?);
                }
            }
        }
        if export.contains(ExportFlags::COMMUNITY) {
            if let Some(value) = set.get(ATTR_COMMUNITY) {
                check_entries(&value, 4, "community")?;
                attributes.communities = value
                    .chunks_exact(4)
                    .map(|c| {
                        Community::new(u16::from_be_bytes([c[0], c[1]]), u16::from_be_bytes([c[2], c[3]]))
                    })
                    .collect();
            }
        }
        if export.contains(ExportFlags::EXTCOMMUNITY) {
            if let Some(value) = set.get(ATTR_EXT_COMMUNITY) {
                check_entries(&value, 8, "extcommunity")?;
                attributes.ext_communities = value
                    .chunks_exact(8)
                    .map(|c| {
                        let mut bytes = [0u8; 6];
                        bytes.copy_from_slice(&c[2..8]);
                        ExtCommunity::Regular {
                            kind: c[0],
                            subtype: c[1],
                            value: bytes,
                        }
                    })
                    .collect();
            }
            if let Some(value) = set.get(ATTR_IPV6_EXT_COMMUNITY) {
                check_entries(&value, 20, "ipv6 extcommunity")?;
                attributes.ipv6_ext_communities = value
                    .chunks_exact(20)
                    .map(|c| {
                        let mut global = [0u8; 16];
                        global.copy_from_slice(&c[2..18]);
                        ExtCommunity::Ipv6 {
                            kind: c[0],
                            subtype: c[1],
                            global: Ipv6Addr::from(global),
                            local: u16::from_be_bytes([c[18], c[19]]),
                        }
                    })
                    .collect();
            }
        }
        if export.contains(ExportFlags::LARGECOMMUNITY) {
            if let Some(mut value) = set.get(ATTR_LARGE_COMMUNITY) {
                check_entries(&value, 12, "largecommunity")?;
                while value.has_remaining() {
                    attributes.large_communities.push(LargeCommunity::new(
                        value.read_u32()?,
                        value.read_u32()?,
                        value.read_u32()?,
                    ));
                }
            }
        }
        Ok(attributes)
    }
}

fn check_entries(value: &Bytes, entry: usize, attribute: &'static str) -> Result<(), WireError> {
    if value.len() % entry != 0 {
        return Err(WireError::MalformedCommunityLength {
            attribute,
            length: value.len(),
            entry,
        });
    }
    Ok(())
}

/// Concatenate every AS_SEQUENCE segment, AS_SET segments are skipped
fn decode_as_path(mut value: Bytes, four_octet_as: bool) -> Result<Vec<u32>, WireError> {
    let width = if four_octet_as { 4 } else { 2 };
    let mut path = Vec::new();
    while value.has_remaining() {
        let segment_type = value.read_u8()?;
        let count = usize::from(value.read_u8()?);
        if segment_type != AS_SEQUENCE && segment_type != AS_SET {
            return Err(WireError::UnsupportedSegmentType(segment_type));
        }
        let mut segment = value.read_n_bytes(count * width)?;
        if segment_type == AS_SET {
            continue;
        }
        while segment.has_remaining() {
            let asn = if four_octet_as {
                segment.get_u32()
            } else {
                u32::from(segment.get_u16())
            };
            path.push(asn);
        }
    }
    if path.len() > MAX_AS_PATH_LEN {
        warn!(
            "AS path of {} hops truncated to {}",
            path.len(),
            MAX_AS_PATH_LEN
        );
        path.truncate(MAX_AS_PATH_LEN);
    }
    Ok(path)
}

/// IPv6 unicast reachability carried in MP_REACH_NLRI
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MpReach {
    pub next_hop: Option<Ipv6Addr>,
    pub announced: Vec<IpNetwork>,
}

fn is_ipv6_unicast(afi: u16, safi: u8) -> bool {
    afi == u16::from(Afi::Ipv6) && safi == SAFI_UNICAST
}

fn decode_mp_reach(mut value: Bytes, export: ExportFlags) -> Result<Option<MpReach>, WireError> {
    let afi = value.read_u16()?;
    let safi = value.read_u8()?;
    if !is_ipv6_unicast(afi, safi) {
        return Ok(None);
    }
    let next_hop_len = usize::from(value.read_u8()?);
    let mut next_hop = value.read_n_bytes(next_hop_len)?;
    let _reserved = value.read_u8()?;
    let next_hop = if export.contains(ExportFlags::NEXTHOP) && next_hop_len >= 16 {
        Some(next_hop.read_ipv6_address()?)
    } else {
        None
    };
    Ok(Some(MpReach {
        next_hop,
        announced: decode_prefixes(value, Afi::Ipv6)?,
    }))
}

fn decode_mp_unreach(mut value: Bytes) -> Result<Vec<IpNetwork>, WireError> {
    let afi = value.read_u16()?;
    let safi = value.read_u8()?;
    if !is_ipv6_unicast(afi, safi) {
        return Ok(vec![]);
    }
    decode_prefixes(value, Afi::Ipv6)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Update {
    /// IPv4 withdrawals from the legacy withdrawn routes section
    pub withdrawn: Vec<IpNetwork>,
    pub attributes: RouteAttributes,
    pub mp_reach: Option<MpReach>,
    pub mp_unreach: Vec<IpNetwork>,
    /// IPv4 announcements from the trailing NLRI section
    pub announced: Vec<IpNetwork>,
}

impl Update {
    /// Decode an UPDATE body (without the 19 byte header)
    pub fn decode(mut body: Bytes, context: &UpdateContext) -> Result<Self, WireError> {
        let declared = HEADER_LEN + body.len();
        let overrun = |implied: usize| WireError::FramingMismatch {
            declared,
            consumed: implied,
        };

        let withdrawn_len = usize::from(body.read_u16()?);
        let mut implied = HEADER_LEN + 2 + withdrawn_len;
        let withdrawn = body
            .read_n_bytes(withdrawn_len)
            .map_err(|_| overrun(implied))?;
        implied += 2;
        let attributes_len = usize::from(body.read_u16().map_err(|_| overrun(implied))?);
        implied += attributes_len;
        let attributes = body
            .read_n_bytes(attributes_len)
            .map_err(|_| overrun(implied))?;

        let set = PathAttributeSet::decode(attributes)?;
        let mp_reach = match set.get(ATTR_MP_REACH_NLRI) {
            Some(value) => decode_mp_reach(value, context.export)?,
            None => None,
        };
        let mp_unreach = match set.get(ATTR_MP_UNREACH_NLRI) {
            Some(value) => decode_mp_unreach(value)?,
            None => vec![],
        };

        Ok(Update {
            withdrawn: decode_prefixes(withdrawn, Afi::Ipv4)?,
            attributes: RouteAttributes::extract(&set, context)?,
            mp_reach,
            mp_unreach,
            announced: decode_prefixes(body, Afi::Ipv4)?,
        })
    }

    /// Number of prefixes announced or withdrawn by this UPDATE
    pub fn prefix_count(&self) -> usize {
        self.withdrawn.len()
            + self.announced.len()
            + self.mp_unreach.len()
            + self.mp_reach.as_ref().map_or(0, |r| r.announced.len())
    }
}
