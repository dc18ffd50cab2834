use std::fmt;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use futures::future::select_all;
use log::{debug, warn};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout};

const TCP_ACCEPT_TIMEOUT_MS: u64 = 1000;
const ACCEPT_ERROR_BACKOFF_MS: u64 = 100;

/// Accepts inbound connections on every listening address.
/// Waiting is bounded so the caller gets back control at least once per timeout.
pub struct Poller {
    listeners: Vec<TcpListener>,
    interval: Duration,
}

impl Poller {
    pub async fn bind(addrs: &[SocketAddr]) -> io::Result<Self> {
        if addrs.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "no listen addresses configured",
            ));
        }
        let mut listeners = Vec::with_capacity(addrs.len());
        for addr in addrs {
            let listener = TcpListener::bind(addr).await?;
            debug!("Listening on {}", listener.local_addr()?);
            listeners.push(listener);
        }
        Ok(Self::new(listeners))
    }

    pub fn new(listeners: Vec<TcpListener>) -> Self {
        Self {
            listeners,
            interval: Duration::from_millis(TCP_ACCEPT_TIMEOUT_MS),
        }
    }

    pub fn local_addrs(&self) -> io::Result<Vec<SocketAddr>> {
        self.listeners.iter().map(|l| l.local_addr()).collect()
    }

    /// Next inbound connection, or `None` when none arrived within the poll interval.
    /// Failed accepts only concern the connection being accepted, they are logged and skipped.
    pub async fn get_connection(&mut self) -> Option<(TcpStream, IpAddr)> {
        if self.listeners.is_empty() {
            sleep(self.interval).await;
            return None;
        }
        let accepts = self.listeners.iter().map(|l| Box::pin(l.accept()));
        let accepted = match timeout(self.interval, select_all(accepts)).await {
            Err(_) => return None,
            Ok((accepted, _, _)) => accepted,
        };
        let connection = accepted_connection(accepted);
        if connection.is_none() {
            // Errors such as EMFILE repeat immediately, don't spin on them
            sleep(Duration::from_millis(ACCEPT_ERROR_BACKOFF_MS)).await;
        }
        connection
    }
}

fn accepted_connection(
    accepted: io::Result<(TcpStream, SocketAddr)>,
) -> Option<(TcpStream, IpAddr)> {
    match accepted {
        Ok((stream, remote)) => Some((stream, canonical_ip(remote.ip()))),
        Err(err) => {
            warn!("Error accepting connection: {}", err);
            None
        }
    }
}

/// IPv4 peers reaching a dual-stack listener show up as `::ffff:a.b.c.d`
fn canonical_ip(addr: IpAddr) -> IpAddr {
    match addr {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => addr,
        },
        v4 => v4,
    }
}

impl fmt::Display for Poller {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "<Poller listeners={}>", self.listeners.len())
    }
}
