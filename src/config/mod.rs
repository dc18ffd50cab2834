mod file;

use std::collections::HashSet;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use crate::models::Relationship;
use crate::wire::{Afi, ExportFlags};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read config: {0}")]
    Io(#[from] io::Error),
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("router_id is required")]
    MissingRouterId,
    #[error("local_as is required")]
    MissingLocalAs,
    #[error("hold_time must be 0 or at least 3 seconds (got {0})")]
    InvalidHoldTime(u16),
    #[error("dump_interval must be greater than 0")]
    InvalidDumpInterval,
    #[error("unknown export attribute '{0}'")]
    UnknownExport(String),
    #[error("invalid neighbor {address}: {reason}")]
    InvalidNeighbor {
        address: IpAddr,
        reason: &'static str,
    },
}

/// Parse a TOML config file and return a ServerConfig
pub fn from_file<P: AsRef<Path>>(path: P) -> Result<ServerConfig, ConfigError> {
    let spec = file::ServerConfigSpec::from_file(path)?;
    ServerConfig::from_spec(spec)
}

/// Immutable configuration snapshot, replaced as a whole on reload
#[derive(Debug)]
pub struct ServerConfig {
    pub router_id: Ipv4Addr,
    pub local_as: u32,
    pub hold_time: u16,
    pub dump_dir: PathBuf,
    pub dump_interval: u64,
    pub export: ExportFlags,
    pub listen: Vec<SocketAddr>,
    pub peers: Vec<Arc<PeerConfig>>,
}

/// In-Memory Server representation of a Peer config
///   Has server-wide values (local AS, router id, hold time, exports) filled in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerConfig {
    pub address: IpAddr,
    pub remote_as: u32,
    pub local_as: u32,
    pub router_id: Ipv4Addr,
    pub hold_time: u16,
    pub export: ExportFlags,
    pub key: Option<String>,
}

impl PeerConfig {
    pub fn relationship(&self) -> Relationship {
        Relationship::between(self.local_as, self.remote_as)
    }

    /// Address family of the transport, advertised in our OPEN
    pub fn family(&self) -> Afi {
        match self.address {
            IpAddr::V4(_) => Afi::Ipv4,
            IpAddr::V6(_) => Afi::Ipv6,
        }
    }
}

impl ServerConfig {
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Self::from_spec(file::ServerConfigSpec::from_toml(contents)?)
    }

    fn from_spec(spec: file::ServerConfigSpec) -> Result<Self, ConfigError> {
        let router_id = spec
            .router_id
            .filter(|id| !id.is_unspecified())
            .ok_or(ConfigError::MissingRouterId)?;
        let local_as = spec
            .local_as
            .filter(|asn| *asn != 0)
            .ok_or(ConfigError::MissingLocalAs)?;
        if spec.hold_time == 1 || spec.hold_time == 2 {
            return Err(ConfigError::InvalidHoldTime(spec.hold_time));
        }
        if spec.dump_interval == 0 {
            return Err(ConfigError::InvalidDumpInterval);
        }
        let export = spec
            .export
            .iter()
            .try_fold(ExportFlags::empty(), |flags, keyword| {
                ExportFlags::from_keyword(keyword)
                    .map(|flag| flags | flag)
                    .ok_or_else(|| ConfigError::UnknownExport(keyword.clone()))
            })?;

        let mut seen = HashSet::new();
        let mut peers = Vec::with_capacity(spec.neighbors.len());
        for neighbor in spec.neighbors {
            let invalid = |reason| ConfigError::InvalidNeighbor {
                address: neighbor.address,
                reason,
            };
            if neighbor.address.is_unspecified() {
                return Err(invalid("unspecified address"));
            }
            if neighbor.remote_as == 0 {
                return Err(invalid("remote_as is required"));
            }
            if !seen.insert(neighbor.address) {
                return Err(invalid("configured more than once"));
            }
            peers.push(Arc::new(PeerConfig {
                address: neighbor.address,
                remote_as: neighbor.remote_as,
                local_as,
                router_id,
                hold_time: spec.hold_time,
                export,
                key: neighbor.key,
            }));
        }

        Ok(Self {
            router_id,
            local_as,
            hold_time: spec.hold_time,
            dump_dir: spec.dump_dir,
            dump_interval: spec.dump_interval,
            export,
            listen: spec.listen,
            peers,
        })
    }

    pub fn peer(&self, address: &IpAddr) -> Option<&Arc<PeerConfig>> {
        self.peers.iter().find(|p| &p.address == address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_file() {
        let config = from_file("./conf/bgpd.toml").unwrap();
        assert_eq!(config.router_id, Ipv4Addr::new(192, 0, 2, 1));
        assert_eq!(config.local_as, 65000);
        assert_eq!(config.dump_interval, 300);
        assert_eq!(
            config.export,
            ExportFlags::ORIGIN
                | ExportFlags::ASPATH
                | ExportFlags::COMMUNITY
                | ExportFlags::LARGECOMMUNITY
                | ExportFlags::NEXTHOP
        );
        assert_eq!(config.peers.len(), 3);

        let ebgp = config.peer(&"192.0.2.2".parse().unwrap()).unwrap();
        assert_eq!(ebgp.relationship(), Relationship::External);
        assert_eq!(ebgp.hold_time, 90);
        assert_eq!(ebgp.family(), Afi::Ipv4);
        let ibgp = config.peer(&"192.0.2.3".parse().unwrap()).unwrap();
        assert_eq!(ibgp.relationship(), Relationship::Internal);
        let v6 = config.peer(&"2001:db8::2".parse().unwrap()).unwrap();
        assert_eq!(v6.family(), Afi::Ipv6);
        assert_eq!(v6.local_as, 65000);
    }

    #[test]
    fn test_missing_required() {
        assert!(matches!(
            ServerConfig::from_toml("local_as = 65000"),
            Err(ConfigError::MissingRouterId)
        ));
        assert!(matches!(
            ServerConfig::from_toml("router_id = \"0.0.0.0\"\nlocal_as = 65000"),
            Err(ConfigError::MissingRouterId)
        ));
        assert!(matches!(
            ServerConfig::from_toml("router_id = \"10.0.0.1\""),
            Err(ConfigError::MissingLocalAs)
        ));
    }

    #[test]
    fn test_invalid_values() {
        let base = "router_id = \"10.0.0.1\"\nlocal_as = 65000\n";
        assert!(matches!(
            ServerConfig::from_toml(&format!("{}hold_time = 2", base)),
            Err(ConfigError::InvalidHoldTime(2))
        ));
        assert!(matches!(
            ServerConfig::from_toml(&format!("{}dump_interval = 0", base)),
            Err(ConfigError::InvalidDumpInterval)
        ));
        assert!(matches!(
            ServerConfig::from_toml(&format!("{}export = [\"aspath\", \"med\"]", base)),
            Err(ConfigError::UnknownExport(name)) if name == "med"
        ));
        let duplicate = format!(
            "{}[[neighbors]]\naddress = \"10.0.0.2\"\nremote_as = 1\n\
             [[neighbors]]\naddress = \"10.0.0.2\"\nremote_as = 2\n",
            base
        );
        assert!(matches!(
            ServerConfig::from_toml(&duplicate),
            Err(ConfigError::InvalidNeighbor { reason: "configured more than once", .. })
        ));
        let no_as = format!("{}[[neighbors]]\naddress = \"10.0.0.2\"\nremote_as = 0\n", base);
        assert!(matches!(
            ServerConfig::from_toml(&no_as),
            Err(ConfigError::InvalidNeighbor { .. })
        ));
    }

    #[test]
    fn test_hold_time_zero_allowed() {
        let config =
            ServerConfig::from_toml("router_id = \"10.0.0.1\"\nlocal_as = 65000\nhold_time = 0")
                .unwrap();
        assert_eq!(config.hold_time, 0);
    }
}
