mod codec;
mod hold_timer;
mod manager;
mod message_counts;
mod poller;
mod session;

use std::convert::From;
use std::error;
use std::fmt;
use std::io;

pub use codec::{MessageCodec, MessageProtocol};
use hold_timer::HoldTimer;
pub use manager::SessionManager;
pub use message_counts::MessageCounts;
pub use poller::Poller;
pub use session::Session;

use crate::wire::{MessageType, Notification, WireError};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SessionState {
    Down,
    Connecting,
    Established,
}

impl SessionState {
    /// A session owns the peer slot in any state but Down
    pub fn is_active(&self) -> bool {
        !matches!(self, SessionState::Down)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let word = match self {
            SessionState::Down => "Down",
            SessionState::Connecting => "Connecting",
            SessionState::Established => "Established",
        };
        write!(f, "{}", word)
    }
}

#[derive(Debug)]
pub enum SessionError {
    /// Peer De-configured
    Deconfigured,
    /// Finite State Machine error, unexpected message for the state
    FiniteStateMachine(SessionState, MessageType),
    /// Hold time expired. [hold time]
    HoldTimeExpired(u16),
    /// NOTIFICATION received from the peer
    Notification(Notification),
    /// Remote side closed the connection
    PeerClosed,
    /// Malformed or rejected message
    Protocol(WireError),
    /// Something happened in transport. [reason]
    TransportError(String),
}

impl SessionError {
    /// NOTIFICATION to send to the peer before closing, if any
    pub fn notification(&self) -> Option<Notification> {
        use SessionError::*;
        let (code, subcode) = match self {
            Deconfigured => (6, 3),
            FiniteStateMachine(state, _) => (5, fsm_err_for_state(*state)),
            HoldTimeExpired(_) => (4, 0),
            Protocol(err) => err.notification_code(),
            Notification(_) | PeerClosed | TransportError(_) => return None,
        };
        Some(crate::wire::Notification::new(code, subcode))
    }
}

// RFC 6608 subcodes, nothing has been sent to the peer before Established
fn fsm_err_for_state(state: SessionState) -> u8 {
    match state {
        SessionState::Established => 3,
        _ => 0,
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use SessionError::*;
        match self {
            Deconfigured => write!(f, "peer de-configured"),
            FiniteStateMachine(state, kind) => write!(f, "unexpected {} in state {}", kind, state),
            HoldTimeExpired(h) => write!(f, "hold time expired after {} seconds", h),
            Notification(n) => write!(f, "notification received {}", n),
            PeerClosed => write!(f, "connection closed by peer"),
            Protocol(err) => write!(f, "{}", err),
            TransportError(r) => write!(f, "transport error [{}]", r),
        }
    }
}

impl From<io::Error> for SessionError {
    fn from(error: io::Error) -> Self {
        SessionError::TransportError(error.to_string())
    }
}

impl From<WireError> for SessionError {
    fn from(error: WireError) -> Self {
        SessionError::Protocol(error)
    }
}

impl error::Error for SessionError {}
