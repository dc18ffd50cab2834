use std::io::{self, Cursor, ErrorKind, Read, Write};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use ipnetwork::IpNetwork;

use super::{Announce, DumpError, DumpEvent, DumpRecord, DumpType, PeerHeader};
use crate::models::{Community, ExtCommunity, LargeCommunity, Origin, Relationship};
use crate::utils::Timestamp;

pub const RECORD_HEADER_LEN: usize = 19;

/// Append one record to `writer`
pub fn write_record<W: Write>(writer: &mut W, record: &DumpRecord) -> Result<(), DumpError> {
    let payload = encode_payload(&record.event)?;
    let length =
        u16::try_from(payload.len()).map_err(|_| DumpError::RecordTooLarge(payload.len()))?;
    let mut header = Vec::with_capacity(RECORD_HEADER_LEN);
    header.write_u8(record.event.kind().into())?;
    header.write_u16::<BigEndian>(length)?;
    header.write_u64::<BigEndian>(record.timestamp.seconds)?;
    header.write_u64::<BigEndian>(record.timestamp.microseconds)?;
    writer.write_all(&header)?;
    writer.write_all(&payload)?;
    Ok(())
}

/// Read the next record. `Ok(None)` only on a clean end of input at a record boundary.
pub fn read_record<R: Read>(reader: &mut R) -> Result<Option<DumpRecord>, DumpError> {
    let mut header = [0u8; RECORD_HEADER_LEN];
    let mut filled = 0;
    while filled < RECORD_HEADER_LEN {
        match reader.read(&mut header[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => return Err(DumpError::ShortRecord),
            Ok(n) => filled += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        }
    }

    let mut fields = &header[..];
    let code = fields.read_u8()?;
    let length = fields.read_u16::<BigEndian>()?;
    let seconds = fields.read_u64::<BigEndian>()?;
    let microseconds = fields.read_u64::<BigEndian>()?;
    let kind = DumpType::try_from(code).map_err(|_| DumpError::UnknownRecordType(code))?;

    let mut payload = vec![0u8; usize::from(length)];
    reader.read_exact(&mut payload).map_err(|err| match err.kind() {
        ErrorKind::UnexpectedEof => DumpError::ShortRecord,
        _ => DumpError::Io(err),
    })?;

    let event = decode_payload(kind, &payload).map_err(|err| match err {
        DumpError::Io(err) if err.kind() == ErrorKind::UnexpectedEof => {
            DumpError::Malformed("payload shorter than its contents")
        }
        other => other,
    })?;
    Ok(Some(DumpRecord::new(
        Timestamp::new(seconds, microseconds),
        event,
    )))
}

fn encode_payload(event: &DumpEvent) -> Result<Vec<u8>, DumpError> {
    let mut buf = Vec::new();
    match event {
        DumpEvent::Open | DumpEvent::Close | DumpEvent::Keepalive | DumpEvent::Footer => (),
        DumpEvent::Header(header) => {
            write_address(&mut buf, header.address)?;
            buf.write_u32::<BigEndian>(header.asn)?;
            buf.write_u8(header.relationship.into())?;
        }
        DumpEvent::Withdrawn(prefix) => write_prefix(&mut buf, prefix)?,
        DumpEvent::Announce(announce) => encode_announce(&mut buf, announce)?,
    }
    Ok(buf)
}

fn count_u16(len: usize) -> Result<u16, DumpError> {
    u16::try_from(len).map_err(|_| DumpError::RecordTooLarge(len))
}

fn encode_announce(buf: &mut Vec<u8>, announce: &Announce) -> Result<(), DumpError> {
    let ipv6 = announce.prefix.is_ipv6();
    if announce.next_hop.is_ipv6() != ipv6 {
        return Err(DumpError::Malformed("next hop family differs from prefix"));
    }
    if announce.ext_communities.iter().any(|c| c.is_ipv6() != ipv6) {
        return Err(DumpError::Malformed(
            "extended community form differs from prefix family",
        ));
    }
    let path_len = u8::try_from(announce.as_path.len())
        .map_err(|_| DumpError::Malformed("AS path longer than 255 hops"))?;

    write_prefix(buf, &announce.prefix)?;
    buf.write_u8(announce.origin.0)?;
    write_address(buf, announce.next_hop)?;
    buf.write_u8(path_len)?;
    buf.write_u16::<BigEndian>(count_u16(announce.communities.len())?)?;
    buf.write_u16::<BigEndian>(count_u16(announce.ext_communities.len())?)?;
    buf.write_u16::<BigEndian>(count_u16(announce.large_communities.len())?)?;

    for asn in &announce.as_path {
        buf.write_u32::<BigEndian>(*asn)?;
    }
    for community in &announce.communities {
        buf.write_u16::<BigEndian>(community.asn)?;
        buf.write_u16::<BigEndian>(community.value)?;
    }
    for community in &announce.ext_communities {
        match community {
            ExtCommunity::Regular {
                kind,
                subtype,
                value,
            } => {
                buf.write_u8(*kind)?;
                buf.write_u8(*subtype)?;
                buf.write_all(value)?;
            }
            ExtCommunity::Ipv6 {
                kind,
                subtype,
                global,
                local,
            } => {
                buf.write_u8(*kind)?;
                buf.write_u8(*subtype)?;
                buf.write_all(&global.octets())?;
                buf.write_u16::<BigEndian>(*local)?;
            }
        }
    }
    for community in &announce.large_communities {
        buf.write_u32::<BigEndian>(community.global)?;
        buf.write_u32::<BigEndian>(community.local1)?;
        buf.write_u32::<BigEndian>(community.local2)?;
    }
    Ok(())
}

fn write_address(buf: &mut Vec<u8>, address: IpAddr) -> io::Result<()> {
    match address {
        IpAddr::V4(addr) => buf.write_all(&addr.octets()),
        IpAddr::V6(addr) => buf.write_all(&addr.octets()),
    }
}

fn write_prefix(buf: &mut Vec<u8>, prefix: &IpNetwork) -> io::Result<()> {
    buf.write_u8(prefix.prefix())?;
    write_address(buf, prefix.network())
}

fn read_address(cursor: &mut Cursor<&[u8]>, ipv6: bool) -> io::Result<IpAddr> {
    if ipv6 {
        let mut octets = [0u8; 16];
        cursor.read_exact(&mut octets)?;
        Ok(IpAddr::V6(Ipv6Addr::from(octets)))
    } else {
        Ok(IpAddr::V4(Ipv4Addr::from(cursor.read_u32::<BigEndian>()?)))
    }
}

fn read_prefix(cursor: &mut Cursor<&[u8]>, ipv6: bool) -> Result<IpNetwork, DumpError> {
    let mask = cursor.read_u8()?;
    let address = read_address(cursor, ipv6)?;
    IpNetwork::new(address, mask).map_err(|_| DumpError::Malformed("prefix mask exceeds address width"))
}

fn decode_payload(kind: DumpType, payload: &[u8]) -> Result<DumpEvent, DumpError> {
    let mut cursor = Cursor::new(payload);
    let event = match kind {
        DumpType::Open => DumpEvent::Open,
        DumpType::Close => DumpEvent::Close,
        DumpType::Keepalive => DumpEvent::Keepalive,
        DumpType::Footer => DumpEvent::Footer,
        DumpType::Header4 | DumpType::Header6 => {
            let address = read_address(&mut cursor, kind == DumpType::Header6)?;
            let asn = cursor.read_u32::<BigEndian>()?;
            let relationship = Relationship::try_from(cursor.read_u8()?)
                .map_err(|_| DumpError::Malformed("unknown peer relationship"))?;
            DumpEvent::Header(PeerHeader {
                address,
                asn,
                relationship,
            })
        }
        DumpType::Withdrawn4 | DumpType::Withdrawn6 => {
            DumpEvent::Withdrawn(read_prefix(&mut cursor, kind == DumpType::Withdrawn6)?)
        }
        DumpType::Announce4 | DumpType::Announce6 => {
            DumpEvent::Announce(decode_announce(&mut cursor, kind == DumpType::Announce6)?)
        }
    };
    if cursor.position() != payload.len() as u64 {
        return Err(DumpError::Malformed("payload longer than its contents"));
    }
    Ok(event)
}

fn decode_announce(cursor: &mut Cursor<&[u8]>, ipv6: bool) -> Result<Announce, DumpError> {
    let prefix = read_prefix(cursor, ipv6)?;
    let origin = Origin(cursor.read_u8()?);
    let next_hop = read_address(cursor, ipv6)?;
    let path_len = cursor.read_u8()?;
    let community_len = cursor.read_u16::<BigEndian>()?;
    let ext_community_len = cursor.read_u16::<BigEndian>()?;
    let large_community_len = cursor.read_u16::<BigEndian>()?;

    let mut as_path = Vec::with_capacity(usize::from(path_len));
    for _ in 0..path_len {
        as_path.push(cursor.read_u32::<BigEndian>()?);
    }
    let mut communities = Vec::new();
    for _ in 0..community_len {
        let asn = cursor.read_u16::<BigEndian>()?;
        communities.push(Community::new(asn, cursor.read_u16::<BigEndian>()?));
    }
    let mut ext_communities = Vec::new();
    for _ in 0..ext_community_len {
        let kind = cursor.read_u8()?;
        let subtype = cursor.read_u8()?;
        let community = if ipv6 {
            let mut global = [0u8; 16];
            cursor.read_exact(&mut global)?;
            ExtCommunity::Ipv6 {
                kind,
                subtype,
                global: Ipv6Addr::from(global),
                local: cursor.read_u16::<BigEndian>()?,
            }
        } else {
            let mut value = [0u8; 6];
            cursor.read_exact(&mut value)?;
            ExtCommunity::Regular {
                kind,
                subtype,
                value,
            }
        };
        ext_communities.push(community);
    }
    let mut large_communities = Vec::new();
    for _ in 0..large_community_len {
        let global = cursor.read_u32::<BigEndian>()?;
        let local1 = cursor.read_u32::<BigEndian>()?;
        let local2 = cursor.read_u32::<BigEndian>()?;
        large_communities.push(LargeCommunity::new(global, local1, local2));
    }

    Ok(Announce {
        prefix,
        origin,
        next_hop,
        as_path,
        communities,
        ext_communities,
        large_communities,
    })
}
