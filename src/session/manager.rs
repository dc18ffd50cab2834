use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, info, warn};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::{interval, Interval};

use super::{Poller, Session};
use crate::config::ServerConfig;
use crate::peer::PeerTable;

const STATUS_INTERVAL_SECS: u64 = 60;

/// Accepts connections for configured peers, spawns a task per session and
/// applies configuration reloads to the peer table.
pub struct SessionManager {
    poller: Poller,
    peers: PeerTable,
    config: Arc<ServerConfig>,
    config_watch: watch::Receiver<Arc<ServerConfig>>,
    // Reload sender is gone, nothing more to watch
    watch_closed: bool,
    status: Interval,
}

impl SessionManager {
    pub fn new(
        config: Arc<ServerConfig>,
        poller: Poller,
        config_watch: watch::Receiver<Arc<ServerConfig>>,
    ) -> Self {
        Self {
            poller,
            peers: PeerTable::from_config(&config),
            config,
            config_watch,
            watch_closed: false,
            status: interval(Duration::from_secs(STATUS_INTERVAL_SECS)),
        }
    }

    pub fn peers(&self) -> PeerTable {
        self.peers.clone()
    }

    /// Serve connections until the process exits
    pub async fn run(&mut self) {
        info!("Accepting sessions from {} peers", self.config.peers.len());
        loop {
            self.step().await;
        }
    }

    async fn step(&mut self) {
        tokio::select! {
            connection = self.poller.get_connection() => {
                if let Some((stream, addr)) = connection {
                    self.handle_connection(stream, addr);
                }
            },
            changed = self.config_watch.changed(), if !self.watch_closed => {
                match changed {
                    Ok(()) => {
                        let config = Arc::clone(&*self.config_watch.borrow());
                        self.apply_config(config);
                    }
                    Err(_) => self.watch_closed = true,
                }
            },
            _ = self.status.tick() => {
                for summary in self.peers.summaries() {
                    debug!("{}", summary);
                }
            },
        }
    }

    fn handle_connection(&self, stream: TcpStream, addr: IpAddr) {
        match self.peers.claim(&addr, Utc::now()) {
            Ok(peer) => {
                info!("{} connection (known)", addr);
                let session = Session::new(
                    peer,
                    stream,
                    self.peers.clone(),
                    &self.config.dump_dir,
                    self.config.dump_interval,
                );
                tokio::spawn(async move {
                    session.run().await;
                });
            }
            // Dropping the stream closes the connection
            Err(reason) => info!("{} connection ({})", addr, reason),
        }
    }

    fn apply_config(&mut self, config: Arc<ServerConfig>) {
        let (added, removed) = self.peers.apply_config(&config);
        debug!(
            "Received config [{} added peers, {} removed peers]",
            added, removed
        );
        if config.listen != self.config.listen {
            warn!("Listen addresses changed, restart to apply");
        }
        self.config = config;
    }
}
