use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::ConfigError;

struct Defaults {}

impl Defaults {
    fn hold_time() -> u16 {
        180
    }

    fn dump_dir() -> PathBuf {
        PathBuf::from("./var/dump")
    }

    fn dump_interval() -> u64 {
        60
    }

    fn listen() -> Vec<SocketAddr> {
        vec![SocketAddr::from(([0, 0, 0, 0], 179))]
    }
}

/// Config (toml) representation of a neighbor
#[derive(Clone, Debug, Deserialize)]
pub(super) struct NeighborSpec {
    pub(super) address: IpAddr,
    pub(super) remote_as: u32,
    // Opaque, TCP MD5 signatures are set up outside this daemon
    pub(super) key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct ServerConfigSpec {
    // Required, validated after parsing so the error can say which one is missing
    pub(super) router_id: Option<Ipv4Addr>,
    pub(super) local_as: Option<u32>,
    // Offered in our OPEN, the session uses the lower of ours and the peer's
    #[serde(default = "Defaults::hold_time")]
    pub(super) hold_time: u16,
    // Recordings go to <dump_dir>/<neighbor address>/
    #[serde(default = "Defaults::dump_dir")]
    pub(super) dump_dir: PathBuf,
    // Seconds covered by each recording file
    #[serde(default = "Defaults::dump_interval")]
    pub(super) dump_interval: u64,
    // Path attributes written to recordings
    #[serde(default = "Vec::new")]
    pub(super) export: Vec<String>,
    #[serde(default = "Defaults::listen")]
    pub(super) listen: Vec<SocketAddr>,
    #[serde(default = "Vec::new")]
    pub(super) neighbors: Vec<NeighborSpec>,
}

impl ServerConfigSpec {
    pub(super) fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub(super) fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }
}
