use std::net::IpAddr;

use itertools::Itertools;
use serde_json::{json, Map, Value};

use crate::dump::{Announce, DumpEvent, DumpRecord, PeerHeader};
use crate::models::CommunityList;
use crate::utils::format_human_time;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// `timestamp|X|...` lines
    Machine,
    Human,
    /// One JSON object per line
    Json,
}

impl OutputFormat {
    pub fn render(&self, record: &DumpRecord) -> String {
        match self {
            OutputFormat::Machine => machine_line(record),
            OutputFormat::Human => human_line(record),
            OutputFormat::Json => json_line(record).to_string(),
        }
    }
}

fn machine_line(record: &DumpRecord) -> String {
    let body = match &record.event {
        DumpEvent::Header(header) => format!("P|{}|{}", header.address, header.asn),
        DumpEvent::Open => "C".to_string(),
        DumpEvent::Close => "D".to_string(),
        DumpEvent::Keepalive => "K".to_string(),
        DumpEvent::Announce(announce) => machine_announce(announce),
        DumpEvent::Withdrawn(prefix) => format!("W|{}|{}", prefix.network(), prefix.prefix()),
        DumpEvent::Footer => "E".to_string(),
    };
    format!("{}|{}", record.timestamp.seconds, body)
}

fn machine_announce(announce: &Announce) -> String {
    let mut line = format!(
        "A|{}|{}",
        announce.prefix.network(),
        announce.prefix.prefix()
    );
    if !announce.origin.is_absent() {
        line.push_str(&format!("|O|{}", announce.origin.code()));
    }
    if let Some(next_hop) = next_hop(announce) {
        line.push_str(&format!("|N|{}", next_hop));
    }
    if !announce.as_path.is_empty() {
        line.push_str(&format!("|AP|{}", announce.as_path.iter().join(" ")));
    }
    if !announce.communities.is_empty() {
        line.push_str(&format!("|C|{}", CommunityList(&announce.communities)));
    }
    if !announce.ext_communities.is_empty() {
        line.push_str(&format!("|EC|{}", CommunityList(&announce.ext_communities)));
    }
    if !announce.large_communities.is_empty() {
        line.push_str(&format!("|LC|{}", CommunityList(&announce.large_communities)));
    }
    line
}

fn human_line(record: &DumpRecord) -> String {
    let body = match &record.event {
        DumpEvent::Header(header) => format!("peer ip {} AS {}", header.address, header.asn),
        DumpEvent::Open => "connected".to_string(),
        DumpEvent::Close => "disconnected".to_string(),
        DumpEvent::Keepalive => "keepalive".to_string(),
        DumpEvent::Announce(announce) => human_announce(announce),
        DumpEvent::Withdrawn(prefix) => format!("prefix withdrawn {}", prefix),
        DumpEvent::Footer => "eof".to_string(),
    };
    format!("{} {}", format_human_time(record.timestamp.seconds), body)
}

fn human_announce(announce: &Announce) -> String {
    let mut line = format!("prefix announce {}", announce.prefix);
    if !announce.origin.is_absent() {
        line.push_str(&format!(" origin {}", announce.origin));
    }
    if let Some(next_hop) = next_hop(announce) {
        line.push_str(&format!(" nexthop {}", next_hop));
    }
    if !announce.as_path.is_empty() {
        line.push_str(&format!(" aspath {}", announce.as_path.iter().join(" ")));
    }
    if !announce.communities.is_empty() {
        line.push_str(&format!(" community {}", CommunityList(&announce.communities)));
    }
    if !announce.ext_communities.is_empty() {
        line.push_str(&format!(
            " extcommunity {}",
            CommunityList(&announce.ext_communities)
        ));
    }
    if !announce.large_communities.is_empty() {
        line.push_str(&format!(
            " largecommunity {}",
            CommunityList(&announce.large_communities)
        ));
    }
    line
}

fn json_line(record: &DumpRecord) -> Value {
    let timestamp = record.timestamp.seconds;
    match &record.event {
        DumpEvent::Header(header) => json!({
            "timestamp": timestamp,
            "type": "peer",
            "msg": { "peer": json_peer(header) },
        }),
        DumpEvent::Open => json!({ "timestamp": timestamp, "type": "connect" }),
        DumpEvent::Close => json!({ "timestamp": timestamp, "type": "disconnect" }),
        DumpEvent::Keepalive => json!({ "timestamp": timestamp, "type": "keepalive" }),
        DumpEvent::Announce(announce) => json!({
            "timestamp": timestamp,
            "type": "announce",
            "msg": json_announce(announce),
        }),
        DumpEvent::Withdrawn(prefix) => json!({
            "timestamp": timestamp,
            "type": "withdrawn",
            "msg": { "prefix": prefix.to_string() },
        }),
        DumpEvent::Footer => json!({ "timestamp": timestamp, "type": "footer" }),
    }
}

fn json_peer(header: &PeerHeader) -> Value {
    let proto = match header.address {
        IpAddr::V4(_) => "ipv4",
        IpAddr::V6(_) => "ipv6",
    };
    json!({
        "proto": proto,
        "ip": header.address.to_string(),
        "asn": header.asn,
    })
}

fn json_announce(announce: &Announce) -> Value {
    let mut msg = Map::new();
    msg.insert("prefix".into(), json!(announce.prefix.to_string()));
    if !announce.origin.is_absent() {
        msg.insert("origin".into(), json!(announce.origin.to_string()));
    }
    if let Some(next_hop) = next_hop(announce) {
        msg.insert("nexthop".into(), json!(next_hop.to_string()));
    }
    if !announce.as_path.is_empty() {
        msg.insert("aspath".into(), json!(announce.as_path));
    }
    if !announce.communities.is_empty() {
        msg.insert("community".into(), strings(&announce.communities));
    }
    if !announce.ext_communities.is_empty() {
        msg.insert("extcommunity".into(), strings(&announce.ext_communities));
    }
    if !announce.large_communities.is_empty() {
        msg.insert("largecommunity".into(), strings(&announce.large_communities));
    }
    Value::Object(msg)
}

fn strings<T: ToString>(items: &[T]) -> Value {
    Value::Array(items.iter().map(|item| json!(item.to_string())).collect())
}

/// Unspecified next hop means the attribute was not exported
fn next_hop(announce: &Announce) -> Option<IpAddr> {
    Some(announce.next_hop).filter(|hop| !hop.is_unspecified())
}
