use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use log::debug;

use crate::config::{PeerConfig, ServerConfig};
use crate::session::{MessageCounts, SessionState};
use crate::utils::{format_elapsed_time, format_time_as_elapsed};

/// Why an inbound connection was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimError {
    Unknown,
    AlreadyConnected,
    HeldDown(DateTime<Utc>),
}

impl fmt::Display for ClaimError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ClaimError::Unknown => write!(f, "unknown"),
            ClaimError::AlreadyConnected => write!(f, "already connected"),
            ClaimError::HeldDown(until) => write!(
                f,
                "held down for {}",
                format_elapsed_time(until.signed_duration_since(Utc::now()))
            ),
        }
    }
}

#[derive(Debug)]
struct PeerEntry {
    config: Arc<PeerConfig>,
    allowed: bool,
    status: SessionState,
    /// Last status change
    since: DateTime<Utc>,
    held_down_until: Option<DateTime<Utc>>,
    router_id: Option<Ipv4Addr>,
    counts: MessageCounts,
}

impl PeerEntry {
    fn new(config: Arc<PeerConfig>) -> Self {
        Self {
            config,
            allowed: true,
            status: SessionState::Down,
            since: Utc::now(),
            held_down_until: None,
            router_id: None,
            counts: MessageCounts::default(),
        }
    }
}

/// Point-in-time view of one peer, for status reporting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSummary {
    pub address: IpAddr,
    pub remote_as: u32,
    pub router_id: Option<Ipv4Addr>,
    pub allowed: bool,
    pub status: SessionState,
    pub since: DateTime<Utc>,
    pub counts: MessageCounts,
}

impl fmt::Display for PeerSummary {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}{} AS{} {} for {}",
            if self.allowed { "" } else { "*" },
            self.address,
            self.remote_as,
            self.status,
            format_time_as_elapsed(self.since),
        )?;
        if let Some(router_id) = self.router_id {
            write!(f, " router-id {}", router_id)?;
        }
        write!(
            f,
            " rcvd {} sent {} updates {}",
            self.counts.received(),
            self.counts.sent(),
            self.counts.updates()
        )
    }
}

/// Peers known from configuration and the state of their sessions.
/// A peer slot is owned by at most one session, from `claim` until `release`.
#[derive(Debug, Clone, Default)]
pub struct PeerTable {
    peers: Arc<Mutex<HashMap<IpAddr, PeerEntry>>>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        let table = Self::new();
        table.apply_config(config);
        table
    }

    fn peers(&self) -> MutexGuard<HashMap<IpAddr, PeerEntry>> {
        // Entries stay consistent even if a holder panicked
        self.peers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allow configured peers, disallow the rest.
    /// Returns the number of (added, removed) peers.
    pub fn apply_config(&self, config: &ServerConfig) -> (usize, usize) {
        let mut peers = self.peers();
        let mut added = 0;
        for peer_config in &config.peers {
            match peers.get_mut(&peer_config.address) {
                Some(entry) => {
                    if entry.config != *peer_config {
                        debug!("Peer config for {} updated", peer_config.address);
                    }
                    if !entry.allowed {
                        added += 1;
                    }
                    entry.config = Arc::clone(peer_config);
                    entry.allowed = true;
                }
                None => {
                    peers.insert(peer_config.address, PeerEntry::new(Arc::clone(peer_config)));
                    added += 1;
                }
            }
        }
        let mut removed = 0;
        for (address, entry) in peers.iter_mut() {
            if entry.allowed && config.peer(address).is_none() {
                entry.allowed = false;
                removed += 1;
            }
        }
        // Running sessions keep their slot until they release it
        peers.retain(|_, entry| entry.allowed || entry.status.is_active());
        (added, removed)
    }

    /// Take ownership of the peer slot for a new inbound connection
    pub fn claim(&self, address: &IpAddr, now: DateTime<Utc>) -> Result<Arc<PeerConfig>, ClaimError> {
        let mut peers = self.peers();
        let entry = peers
            .get_mut(address)
            .filter(|entry| entry.allowed)
            .ok_or(ClaimError::Unknown)?;
        if entry.status.is_active() {
            return Err(ClaimError::AlreadyConnected);
        }
        if let Some(until) = entry.held_down_until {
            if now < until {
                return Err(ClaimError::HeldDown(until));
            }
        }
        entry.status = SessionState::Connecting;
        entry.since = now;
        entry.held_down_until = None;
        entry.router_id = None;
        entry.counts = MessageCounts::default();
        Ok(Arc::clone(&entry.config))
    }

    pub fn set_status(&self, address: &IpAddr, status: SessionState) {
        if let Some(entry) = self.peers().get_mut(address) {
            entry.status = status;
            entry.since = Utc::now();
        }
    }

    pub fn set_router_id(&self, address: &IpAddr, router_id: Ipv4Addr) {
        if let Some(entry) = self.peers().get_mut(address) {
            entry.router_id = Some(router_id);
        }
    }

    pub fn update_counts(&self, address: &IpAddr, counts: MessageCounts) {
        if let Some(entry) = self.peers().get_mut(address) {
            entry.counts = counts;
        }
    }

    /// Give up the slot after a session ended; the peer may reconnect after `hold_down`
    pub fn release(&self, address: &IpAddr, now: DateTime<Utc>, hold_down: Duration) {
        let mut peers = self.peers();
        let allowed = match peers.get_mut(address) {
            Some(entry) => {
                entry.status = SessionState::Down;
                entry.since = now;
                entry.held_down_until = Some(now + hold_down);
                entry.allowed
            }
            None => return,
        };
        if !allowed {
            peers.remove(address);
        }
    }

    pub fn is_allowed(&self, address: &IpAddr) -> bool {
        self.peers()
            .get(address)
            .map(|entry| entry.allowed)
            .unwrap_or(false)
    }

    pub fn status(&self, address: &IpAddr) -> Option<SessionState> {
        self.peers().get(address).map(|entry| entry.status)
    }

    pub fn summaries(&self) -> Vec<PeerSummary> {
        let mut summaries: Vec<_> = self
            .peers()
            .values()
            .map(|entry| PeerSummary {
                address: entry.config.address,
                remote_as: entry.config.remote_as,
                router_id: entry.router_id,
                allowed: entry.allowed,
                status: entry.status,
                since: entry.since,
                counts: entry.counts,
            })
            .collect();
        summaries.sort_by_key(|summary| summary.address);
        summaries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(neighbors: &[(&str, u32)]) -> ServerConfig {
        let mut toml = String::from("router_id = \"192.0.2.1\"\nlocal_as = 65000\n");
        for (address, remote_as) in neighbors {
            toml.push_str(&format!(
                "[[neighbors]]\naddress = \"{}\"\nremote_as = {}\n",
                address, remote_as
            ));
        }
        ServerConfig::from_toml(&toml).unwrap()
    }

    fn addr(address: &str) -> IpAddr {
        address.parse().unwrap()
    }

    #[test]
    fn test_claim() {
        let table = PeerTable::from_config(&config(&[("192.0.2.2", 65001)]));
        let now = Utc::now();
        assert_eq!(
            table.claim(&addr("192.0.2.9"), now).unwrap_err(),
            ClaimError::Unknown
        );
        let peer = table.claim(&addr("192.0.2.2"), now).unwrap();
        assert_eq!(peer.remote_as, 65001);
        assert_eq!(table.status(&addr("192.0.2.2")), Some(SessionState::Connecting));
        assert_eq!(
            table.claim(&addr("192.0.2.2"), now).unwrap_err(),
            ClaimError::AlreadyConnected
        );
    }

    #[test]
    fn test_release_holds_down() {
        let table = PeerTable::from_config(&config(&[("192.0.2.2", 65001)]));
        let peer = addr("192.0.2.2");
        let now = Utc::now();
        table.claim(&peer, now).unwrap();
        table.release(&peer, now, Duration::seconds(60));
        assert_eq!(table.status(&peer), Some(SessionState::Down));
        assert!(matches!(
            table.claim(&peer, now + Duration::seconds(59)),
            Err(ClaimError::HeldDown(_))
        ));
        assert!(table.claim(&peer, now + Duration::seconds(60)).is_ok());
    }

    #[test]
    fn test_apply_config() {
        let table = PeerTable::from_config(&config(&[("192.0.2.2", 65001), ("192.0.2.3", 65002)]));
        let running = addr("192.0.2.2");
        let idle = addr("192.0.2.3");
        table.claim(&running, Utc::now()).unwrap();

        let (added, removed) = table.apply_config(&config(&[("2001:db8::2", 65003)]));
        assert_eq!((added, removed), (1, 2));
        // Idle peer is gone, running one stays until released
        assert_eq!(table.status(&idle), None);
        assert!(!table.is_allowed(&running));
        assert_eq!(table.status(&running), Some(SessionState::Connecting));
        assert!(table.is_allowed(&addr("2001:db8::2")));

        table.release(&running, Utc::now(), Duration::seconds(60));
        assert_eq!(table.status(&running), None);
        assert_eq!(table.summaries().len(), 1);
    }

    #[test]
    fn test_apply_config_rekeys() {
        let table = PeerTable::from_config(&config(&[("192.0.2.2", 65001)]));
        table.apply_config(&config(&[("192.0.2.2", 65009)]));
        let peer = table.claim(&addr("192.0.2.2"), Utc::now()).unwrap();
        assert_eq!(peer.remote_as, 65009);
    }

    #[test]
    fn test_summaries() {
        let table = PeerTable::from_config(&config(&[("192.0.2.3", 65002), ("192.0.2.2", 65001)]));
        let peer = addr("192.0.2.2");
        table.claim(&peer, Utc::now()).unwrap();
        table.set_status(&peer, SessionState::Established);
        table.set_router_id(&peer, Ipv4Addr::new(10, 0, 0, 2));
        let mut counts = MessageCounts::new();
        counts.increment_received();
        counts.increment_updates();
        table.update_counts(&peer, counts);

        let summaries = table.summaries();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].address, peer);
        assert_eq!(summaries[0].status, SessionState::Established);
        assert_eq!(summaries[0].counts.updates(), 1);
        let line = summaries[0].to_string();
        assert!(line.starts_with("192.0.2.2 AS65001 Established for 00:00:0"));
        assert!(line.ends_with("router-id 10.0.0.2 rcvd 1 sent 0 updates 1"));
        assert_eq!(summaries[1].status, SessionState::Down);
    }
}
