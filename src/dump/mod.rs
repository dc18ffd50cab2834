//! Binary session recordings
//!
//! A recording is a sequence of records, each a 19 byte big-endian header
//! (`type:u8, length:u16, seconds:u64, microseconds:u64`) followed by `length`
//! payload bytes. Every file starts with one Header record and ends with one Footer.

mod codec;
mod reader;
mod recorder;
mod writer;

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnetwork::IpNetwork;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use thiserror::Error;

use crate::models::{Community, ExtCommunity, LargeCommunity, Origin, Relationship};
use crate::utils::Timestamp;
use crate::wire::Update;

pub use codec::{read_record, write_record, RECORD_HEADER_LEN};
pub use reader::DumpReader;
pub use recorder::Recorder;
pub use writer::{DumpWriter, TEMP_FILE_NAME};

#[derive(Debug, Error)]
pub enum DumpError {
    #[error("short record")]
    ShortRecord,
    #[error("recording does not start with a peer header")]
    MissingHeader,
    #[error("recording ends without a footer")]
    MissingFooter,
    #[error("unknown record type {0}")]
    UnknownRecordType(u8),
    #[error("record payload of {0} bytes exceeds the maximum")]
    RecordTooLarge(usize),
    #[error("malformed record: {0}")]
    Malformed(&'static str),
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum DumpType {
    Open = 10,
    Close = 11,
    Keepalive = 12,
    Header4 = 40,
    Announce4 = 41,
    Withdrawn4 = 42,
    Header6 = 60,
    Announce6 = 61,
    Withdrawn6 = 62,
    Footer = 255,
}

/// Identity of the recorded peer, first record of every file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerHeader {
    pub address: IpAddr,
    pub asn: u32,
    pub relationship: Relationship,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announce {
    pub prefix: IpNetwork,
    pub origin: Origin,
    /// Unspecified address when the next hop was not exported
    pub next_hop: IpAddr,
    pub as_path: Vec<u32>,
    pub communities: Vec<Community>,
    pub ext_communities: Vec<ExtCommunity>,
    pub large_communities: Vec<LargeCommunity>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DumpEvent {
    Open,
    Close,
    Keepalive,
    Header(PeerHeader),
    Announce(Announce),
    Withdrawn(IpNetwork),
    Footer,
}

impl DumpEvent {
    pub fn kind(&self) -> DumpType {
        match self {
            DumpEvent::Open => DumpType::Open,
            DumpEvent::Close => DumpType::Close,
            DumpEvent::Keepalive => DumpType::Keepalive,
            DumpEvent::Header(header) if header.address.is_ipv4() => DumpType::Header4,
            DumpEvent::Header(_) => DumpType::Header6,
            DumpEvent::Announce(announce) if announce.prefix.is_ipv4() => DumpType::Announce4,
            DumpEvent::Announce(_) => DumpType::Announce6,
            DumpEvent::Withdrawn(prefix) if prefix.is_ipv4() => DumpType::Withdrawn4,
            DumpEvent::Withdrawn(_) => DumpType::Withdrawn6,
            DumpEvent::Footer => DumpType::Footer,
        }
    }

    /// Events recorded for one UPDATE, in order: IPv4 withdrawals, MP_REACH
    /// announcements, MP_UNREACH withdrawals, IPv4 announcements
    pub fn from_update(update: Update) -> Vec<DumpEvent> {
        let Update {
            withdrawn,
            attributes,
            mp_reach,
            mp_unreach,
            announced,
        } = update;
        let mut events = Vec::with_capacity(
            withdrawn.len()
                + announced.len()
                + mp_unreach.len()
                + mp_reach.as_ref().map_or(0, |r| r.announced.len()),
        );
        events.extend(withdrawn.into_iter().map(DumpEvent::Withdrawn));
        if let Some(mp_reach) = mp_reach {
            let next_hop = IpAddr::V6(mp_reach.next_hop.unwrap_or(Ipv6Addr::UNSPECIFIED));
            events.extend(mp_reach.announced.into_iter().map(|prefix| {
                DumpEvent::Announce(Announce {
                    prefix,
                    origin: attributes.origin,
                    next_hop,
                    as_path: attributes.as_path.clone(),
                    communities: attributes.communities.clone(),
                    ext_communities: attributes.ipv6_ext_communities.clone(),
                    large_communities: attributes.large_communities.clone(),
                })
            }));
        }
        events.extend(mp_unreach.into_iter().map(DumpEvent::Withdrawn));
        let next_hop = IpAddr::V4(attributes.next_hop.unwrap_or(Ipv4Addr::UNSPECIFIED));
        events.extend(announced.into_iter().map(|prefix| {
            DumpEvent::Announce(Announce {
                prefix,
                origin: attributes.origin,
                next_hop,
                as_path: attributes.as_path.clone(),
                communities: attributes.communities.clone(),
                ext_communities: attributes.ext_communities.clone(),
                large_communities: attributes.large_communities.clone(),
            })
        }));
        events
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpRecord {
    pub timestamp: Timestamp,
    pub event: DumpEvent,
}

impl DumpRecord {
    pub fn new(timestamp: Timestamp, event: DumpEvent) -> Self {
        Self { timestamp, event }
    }
}
