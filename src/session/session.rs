use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use futures::{SinkExt, StreamExt};
use log::{debug, info, trace, warn};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::timeout;

use super::codec::{MessageCodec, MessageProtocol};
use super::{HoldTimer, MessageCounts};
use super::{SessionError, SessionState};
use crate::config::PeerConfig;
use crate::dump::{DumpEvent, PeerHeader, Recorder};
use crate::peer::PeerTable;
use crate::utils::{format_time_as_elapsed, Timestamp};
use crate::wire::{Message, Open, OutboundMessage, UpdateContext, BGP_DEFAULT_HOLD};

/// Bound on the best-effort NOTIFICATION sent while closing
const NOTIFY_TIMEOUT_MS: u64 = 1000;

/// A `Session` is a stream for processing BGP messages and
/// handling peer timeouts. It owns its peer's slot in the peer table until it ends.
pub struct Session<T> {
    pub(crate) addr: IpAddr,
    pub(crate) state: SessionState,
    pub(crate) router_id: Option<Ipv4Addr>,
    pub(crate) config: Arc<PeerConfig>,
    pub(crate) protocol: MessageProtocol<T>,
    pub(crate) connect_time: DateTime<Utc>,
    pub(crate) hold_timer: HoldTimer,
    pub(crate) counts: MessageCounts,
    recorder: Recorder,
    peers: PeerTable,
    dump_interval: u64,
}

impl<T> Session<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    /// Build a session for a connection from an already claimed peer
    pub fn new(
        config: Arc<PeerConfig>,
        stream: T,
        peers: PeerTable,
        dump_dir: &Path,
        dump_interval: u64,
    ) -> Session<T> {
        let identity = PeerHeader {
            address: config.address,
            asn: config.remote_as,
            relationship: config.relationship(),
        };
        let codec = MessageCodec::new(UpdateContext {
            four_octet_as: false,
            export: config.export,
        });
        Session {
            addr: config.address,
            state: SessionState::Connecting,
            router_id: None,
            protocol: MessageProtocol::new(stream, codec),
            connect_time: Utc::now(),
            hold_timer: HoldTimer::handshake(BGP_DEFAULT_HOLD),
            counts: MessageCounts::new(),
            recorder: Recorder::new(dump_dir, dump_interval, identity),
            config,
            peers,
            dump_interval,
        }
    }

    pub fn update_state(&mut self, new_state: SessionState) {
        debug!("{} went from {} to {}", self.addr, self.state, new_state);
        self.state = new_state;
        self.peers.set_status(&self.addr, new_state);
    }

    /// Process messages until the session fails, then tear it down.
    /// Returns the reason the session ended.
    pub async fn run(mut self) -> SessionError {
        let err = loop {
            if let Err(err) = self.step().await {
                break err;
            }
        };
        self.shutdown(&err).await;
        err
    }

    /// Main function for making progress with the session
    /// Waits for either a new incoming message or a HoldTimer event
    pub async fn step(&mut self) -> Result<(), SessionError> {
        tokio::select! {
            message = self.protocol.next() => {
                match message {
                    // Framed stream is exhausted, remote side closed connection
                    None => Err(SessionError::PeerClosed),
                    Some(Ok(message)) => {
                        trace!("[{}] Incoming: {}", self.addr, message.kind());
                        self.counts.increment_received();
                        self.hold_timer.received();
                        self.process_message(message).await?;
                        self.peers.update_counts(&self.addr, self.counts);
                        Ok(())
                    }
                    // Error decoding message
                    Some(Err(err)) => Err(err),
                }
            },
            // Hold Timer
            keepalive = self.hold_timer.should_send_keepalive() => {
                if keepalive? {
                    self.send_message(OutboundMessage::KeepAlive).await?;
                    self.peers.update_counts(&self.addr, self.counts);
                }
                if !self.peers.is_allowed(&self.addr) {
                    return Err(SessionError::Deconfigured);
                }
                self.recorder.check(Timestamp::now(), self.state.is_active());
                Ok(())
            },
        }
    }

    async fn process_message(&mut self, message: Message) -> Result<(), SessionError> {
        // Every event decoded from one message shares its timestamp
        let now = Timestamp::now();
        match (self.state, message) {
            (SessionState::Connecting, Message::Open(open)) => {
                let negotiated = open.negotiate(self.config.remote_as, self.config.hold_time)?;
                debug!(
                    "[{}] Received OPEN [w/ {} params]",
                    self.addr,
                    open.parameters.len()
                );
                self.protocol.codec_mut().set_context(UpdateContext {
                    four_octet_as: negotiated.four_octet_as,
                    export: self.config.export,
                });
                self.hold_timer = HoldTimer::new(negotiated.hold_time);
                self.router_id = Some(negotiated.router_id);
                self.peers.set_router_id(&self.addr, negotiated.router_id);
                self.update_state(SessionState::Established);
                self.record(DumpEvent::Open, now);

                let reply = Open::local(
                    self.config.local_as,
                    negotiated.hold_time,
                    self.config.router_id,
                    self.config.family(),
                );
                self.send_message(OutboundMessage::Open(reply)).await?;
                self.send_message(OutboundMessage::KeepAlive).await?;
                info!(
                    "{} established (router-id {}, hold time {})",
                    self.addr, negotiated.router_id, negotiated.hold_time
                );
            }
            (SessionState::Established, Message::Update(update)) => {
                self.counts.increment_updates();
                trace!(
                    "[{}] UPDATE with {} prefixes",
                    self.addr,
                    update.prefix_count()
                );
                for event in DumpEvent::from_update(update) {
                    self.record(event, now);
                }
            }
            (SessionState::Established, Message::KeepAlive) => {
                self.record(DumpEvent::Keepalive, now);
            }
            (_, Message::Notification(notification)) => {
                return Err(SessionError::Notification(notification));
            }
            (state, message) => {
                return Err(SessionError::FiniteStateMachine(state, message.kind()));
            }
        }
        Ok(())
    }

    fn record(&mut self, event: DumpEvent, now: Timestamp) {
        self.recorder.record(event, now, self.state.is_active());
    }

    // Send a message, and flush the send buffer afterwards.
    // A peer that stops reading fails the send once the hold time runs out.
    pub async fn send_message(&mut self, message: OutboundMessage) -> Result<(), SessionError> {
        trace!("[{}] Outgoing: {}", self.addr, message.kind());
        let limit = self.hold_timer.send_limit();
        match timeout(limit, self.protocol.send(message)).await {
            Ok(sent) => sent?,
            Err(_) => {
                return Err(SessionError::TransportError(format!(
                    "send blocked for {} seconds",
                    limit.as_secs()
                )))
            }
        }
        self.counts.increment_sent();
        self.hold_timer.sent();
        Ok(())
    }

    /// Notify the peer if the error calls for it, record the close and give up the peer slot
    async fn shutdown(&mut self, err: &SessionError) {
        if let Some(notification) = err.notification() {
            let send = self.send_message(OutboundMessage::Notification(notification));
            match timeout(std::time::Duration::from_millis(NOTIFY_TIMEOUT_MS), send).await {
                Ok(Ok(())) => (),
                Ok(Err(e)) => debug!("{} unable to send NOTIFICATION: {}", self.addr, e),
                Err(_) => debug!("{} timed out sending NOTIFICATION", self.addr),
            }
        }
        warn!("{} {}", self.addr, err);
        let was_established = self.state == SessionState::Established;
        self.update_state(SessionState::Down);

        let now = Utc::now();
        let timestamp = Timestamp::from(now);
        self.record(DumpEvent::Close, timestamp);
        self.recorder.close(timestamp);
        self.peers.update_counts(&self.addr, self.counts);
        self.peers
            .release(&self.addr, now, Duration::seconds(self.dump_interval as i64));
        if was_established {
            info!(
                "{} closed after {}",
                self.addr,
                format_time_as_elapsed(self.connect_time)
            );
        }
    }
}

impl<T> fmt::Display for Session<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "<Session {} state={} uptime={} hold_time={}>",
            self.addr,
            self.state,
            format_time_as_elapsed(self.connect_time),
            self.hold_timer,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::dump::{Announce, DumpReader, DumpType, TEMP_FILE_NAME};
    use crate::wire::tests::{attribute, frame, update_body};
    use crate::wire::{MessageType, Notification, WireError};
    use bytes::BytesMut;
    use std::fs;
    use std::path::PathBuf;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};
    use tokio_util::codec::Decoder;

    const CONFIG: &str = r#"
        router_id = "192.0.2.1"
        local_as = 65000
        hold_time = 180
        dump_interval = 60
        export = ["origin", "aspath", "community", "nexthop"]

        [[neighbors]]
        address = "192.0.2.2"
        remote_as = 65001

        [[neighbors]]
        address = "2001:db8::2"
        remote_as = 4200000001
    "#;

    struct Harness {
        session: Session<DuplexStream>,
        remote: DuplexStream,
        peers: PeerTable,
        dump_dir: PathBuf,
        _root: tempfile::TempDir,
    }

    fn harness(address: &str) -> Harness {
        harness_with_pipe(address, 64 * 1024)
    }

    fn harness_with_pipe(address: &str, pipe_size: usize) -> Harness {
        let root = tempfile::tempdir().unwrap();
        let config = ServerConfig::from_toml(CONFIG).unwrap();
        let peers = PeerTable::from_config(&config);
        let address: IpAddr = address.parse().unwrap();
        let peer = peers.claim(&address, Utc::now()).unwrap();
        let (local, remote) = duplex(pipe_size);
        let session = Session::new(peer, local, peers.clone(), root.path(), 60);
        Harness {
            session,
            remote,
            peers,
            dump_dir: root.path().join(address.to_string()),
            _root: root,
        }
    }

    fn open(asn: u16, hold_time: u16, params: &[u8]) -> Vec<u8> {
        let mut body = vec![4];
        body.extend_from_slice(&asn.to_be_bytes());
        body.extend_from_slice(&hold_time.to_be_bytes());
        body.extend_from_slice(&[10, 0, 0, 2]);
        body.push(params.len() as u8);
        body.extend_from_slice(params);
        frame(1, &body)
    }

    /// Read everything the session has written so far and decode it
    async fn sent_messages(remote: &mut DuplexStream) -> Vec<MessageType> {
        let mut buf = vec![0u8; 4096];
        let n = remote.read(&mut buf).await.unwrap();
        let mut bytes = BytesMut::from(&buf[..n]);
        let mut codec = MessageCodec::default();
        let mut kinds = vec![];
        while let Some(message) = codec.decode(&mut bytes).unwrap() {
            kinds.push(message.kind());
        }
        kinds
    }

    /// Step until the session received `count` messages; timer ticks may come first
    async fn step_until_received(session: &mut Session<DuplexStream>, count: u64) {
        while session.counts.received() < count {
            session.step().await.unwrap();
        }
    }

    async fn establish(h: &mut Harness, message: Vec<u8>) {
        h.remote.write_all(&message).await.unwrap();
        step_until_received(&mut h.session, 1).await;
        assert_eq!(h.session.state, SessionState::Established);
    }

    fn recorded(dump_dir: &Path) -> Vec<DumpEvent> {
        let mut files: Vec<_> = fs::read_dir(dump_dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| !p.ends_with(TEMP_FILE_NAME))
            .collect();
        files.sort();
        files
            .iter()
            .flat_map(|path| DumpReader::open(path).unwrap().map(|r| r.unwrap().event))
            .collect()
    }

    #[tokio::test]
    async fn test_open_establishes_session() {
        let mut h = harness("192.0.2.2");
        establish(&mut h, open(65001, 90, &[])).await;
        assert_eq!(h.session.hold_timer.hold_timer, 90);
        assert_eq!(h.session.router_id, Some(Ipv4Addr::new(10, 0, 0, 2)));
        assert!(!h.session.protocol.codec().context().four_octet_as);
        assert_eq!(
            h.peers.status(&h.session.addr),
            Some(SessionState::Established)
        );
        assert_eq!(
            sent_messages(&mut h.remote).await,
            vec![MessageType::Open, MessageType::KeepAlive]
        );
        assert!(h.dump_dir.join(TEMP_FILE_NAME).exists());

        drop(h.remote);
        assert!(matches!(h.session.run().await, SessionError::PeerClosed));
        assert!(!h.dump_dir.join(TEMP_FILE_NAME).exists());
    }

    #[tokio::test]
    async fn test_withdrawn_is_recorded() {
        let mut h = harness("192.0.2.2");
        establish(&mut h, open(65001, 90, &[])).await;
        let update = frame(2, &update_body(&[24, 10, 0, 0], &[], &[]));
        h.remote.write_all(&update).await.unwrap();
        step_until_received(&mut h.session, 2).await;
        assert_eq!(h.session.counts.updates(), 1);

        drop(h.remote);
        let err = h.session.run().await;
        assert!(matches!(err, SessionError::PeerClosed));

        let events = recorded(&h.dump_dir);
        let kinds: Vec<_> = events.iter().map(|e| e.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                DumpType::Header4,
                DumpType::Open,
                DumpType::Withdrawn4,
                DumpType::Close,
                DumpType::Footer
            ]
        );
        assert_eq!(events[2], DumpEvent::Withdrawn("10.0.0.0/24".parse().unwrap()));
    }

    #[tokio::test]
    async fn test_mp_reach_is_recorded() {
        let mut h = harness("2001:db8::2");
        // AS_TRANS with capability 65 carrying 4200000001
        let asn = 4_200_000_001u32.to_be_bytes();
        let params = [2, 6, 65, 4, asn[0], asn[1], asn[2], asn[3]];
        establish(&mut h, open(23456, 90, &params)).await;
        assert!(h.session.protocol.codec().context().four_octet_as);

        let mut attributes = attribute(0x40, 1, &[0]);
        attributes.extend(attribute(0x40, 2, &[2, 2, 0, 0, 0xfd, 0xe9, 0, 0, 0xfd, 0xea]));
        let mut mp_reach = vec![0, 2, 1, 16];
        mp_reach.extend_from_slice(&"2001:db8::1".parse::<std::net::Ipv6Addr>().unwrap().octets());
        mp_reach.extend_from_slice(&[0, 32, 0x20, 0x01, 0x0d, 0xb8]);
        attributes.extend(attribute(0x80, 14, &mp_reach));
        let update = frame(2, &update_body(&[], &attributes, &[]));
        h.remote.write_all(&update).await.unwrap();
        step_until_received(&mut h.session, 2).await;

        drop(h.remote);
        h.session.run().await;

        let events = recorded(&h.dump_dir);
        let announce = events
            .iter()
            .find_map(|e| match e {
                DumpEvent::Announce(announce) => Some(announce.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(
            announce,
            Announce {
                prefix: "2001:db8::/32".parse().unwrap(),
                origin: crate::models::Origin::IGP,
                next_hop: "2001:db8::1".parse().unwrap(),
                as_path: vec![65001, 65002],
                communities: vec![],
                ext_communities: vec![],
                large_communities: vec![],
            }
        );
        assert_eq!(events[0].kind(), DumpType::Header6);
    }

    #[tokio::test]
    async fn test_hold_time_expiry() {
        let mut h = harness("192.0.2.2");
        establish(&mut h, open(65001, 3, &[])).await;
        h.session.hold_timer.last_received =
            h.session.hold_timer.last_received - Duration::seconds(3);
        let addr = h.session.addr;
        let err = h.session.run().await;
        assert!(matches!(err, SessionError::HoldTimeExpired(3)));

        let kinds: Vec<_> = recorded(&h.dump_dir).iter().map(|e| e.kind()).collect();
        assert_eq!(kinds.last(), Some(&DumpType::Footer));
        assert!(kinds.contains(&DumpType::Close));
        // Held down for one dump interval
        assert_eq!(h.peers.status(&addr), Some(SessionState::Down));
        assert!(h.peers.claim(&addr, Utc::now()).is_err());
        assert!(h
            .peers
            .claim(&addr, Utc::now() + Duration::seconds(61))
            .is_ok());

        // Reply OPEN + KEEPALIVE, then the hold timer NOTIFICATION
        let mut buf = vec![0u8; 4096];
        let n = h.remote.read(&mut buf).await.unwrap();
        let mut bytes = BytesMut::from(&buf[..n]);
        let mut codec = MessageCodec::default();
        let mut last = None;
        while let Some(message) = codec.decode(&mut bytes).unwrap() {
            last = Some(message);
        }
        assert_eq!(last, Some(Message::Notification(Notification::new(4, 0))));
    }

    #[tokio::test]
    async fn test_peer_not_reading_times_out() {
        // Our OPEN reply does not fit the pipe and the peer never drains it
        let mut h = harness_with_pipe("192.0.2.2", 32);
        h.remote.write_all(&open(65001, 3, &[])).await.unwrap();
        let addr = h.session.addr;
        let err = tokio::time::timeout(std::time::Duration::from_secs(8), h.session.run())
            .await
            .expect("session stuck on a blocked send");
        assert!(matches!(err, SessionError::TransportError(_)));
        assert_eq!(h.peers.status(&addr), Some(SessionState::Down));
    }

    #[tokio::test]
    async fn test_open_short_hold_time() {
        let mut h = harness("192.0.2.2");
        h.remote.write_all(&open(65001, 2, &[])).await.unwrap();
        let err = h.session.run().await;
        assert!(matches!(
            err,
            SessionError::Protocol(WireError::UnacceptableHoldTime(2))
        ));
        let mut buf = vec![0u8; 64];
        let n = h.remote.read(&mut buf).await.unwrap();
        let mut bytes = BytesMut::from(&buf[..n]);
        assert_eq!(
            MessageCodec::default().decode(&mut bytes).unwrap(),
            Some(Message::Notification(Notification::new(2, 6)))
        );
    }

    #[tokio::test]
    async fn test_open_as_mismatch() {
        let mut h = harness("192.0.2.2");
        h.remote.write_all(&open(65009, 90, &[])).await.unwrap();
        let err = h.session.run().await;
        assert!(matches!(
            err,
            SessionError::Protocol(WireError::AsMismatch {
                received: 65009,
                expected: 65001
            })
        ));
    }

    #[tokio::test]
    async fn test_update_before_open() {
        let mut h = harness("192.0.2.2");
        let update = frame(2, &update_body(&[], &[], &[]));
        h.remote.write_all(&update).await.unwrap();
        let err = h.session.run().await;
        assert!(matches!(
            err,
            SessionError::FiniteStateMachine(SessionState::Connecting, MessageType::Update)
        ));
    }

    #[tokio::test]
    async fn test_notification_ends_session() {
        let mut h = harness("192.0.2.2");
        establish(&mut h, open(65001, 90, &[])).await;
        h.remote.write_all(&frame(3, &[6, 2])).await.unwrap();
        let err = h.session.run().await;
        assert!(matches!(err, SessionError::Notification(n) if n.code == 6 && n.subcode == 2));
    }

    #[tokio::test]
    async fn test_deconfigured_peer() {
        let mut h = harness("192.0.2.2");
        establish(&mut h, open(65001, 90, &[])).await;
        let config = ServerConfig::from_toml(
            "router_id = \"192.0.2.1\"\nlocal_as = 65000\nexport = []",
        )
        .unwrap();
        h.peers.apply_config(&config);
        let addr = h.session.addr;
        let err = h.session.run().await;
        assert!(matches!(err, SessionError::Deconfigured));
        assert_eq!(h.peers.status(&addr), None);
    }
}
