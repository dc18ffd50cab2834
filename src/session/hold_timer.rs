use std::cmp;
use std::fmt;
use std::time;

use chrono::{DateTime, Duration, Utc};
use tokio::time::{interval, Interval};

use super::SessionError;
use crate::utils::{format_elapsed_time, get_elapsed_time};
use crate::wire::BGP_DEFAULT_HOLD;

/// Receive hold time and keepalive interval bookkeeping for one session.
/// A hold time of 0 disables both expiry and keepalives.
#[derive(Debug)]
pub struct HoldTimer {
    pub(crate) hold_timer: u16,
    /// Keepalive send interval, 0 means never send
    pub(crate) interval: u16,
    timer: Interval,
    pub(crate) last_sent: DateTime<Utc>,
    pub(crate) last_received: DateTime<Utc>,
}

impl HoldTimer {
    /// Negotiated timer: keepalives every third of the hold time, at least every second
    pub fn new(hold_timer: u16) -> HoldTimer {
        let keepalive_interval = match hold_timer {
            0 => 0,
            _ => cmp::max(hold_timer / 3, 1),
        };
        Self::with_interval(hold_timer, keepalive_interval)
    }

    /// Timer used while waiting for the peer's OPEN, nothing is sent yet
    pub fn handshake(hold_timer: u16) -> HoldTimer {
        Self::with_interval(hold_timer, 0)
    }

    fn with_interval(hold_timer: u16, keepalive_interval: u16) -> HoldTimer {
        HoldTimer {
            hold_timer,
            interval: keepalive_interval,
            timer: interval(time::Duration::from_millis(100)),
            last_received: Utc::now(),
            last_sent: Utc::now(),
        }
    }

    // Wait for the next tick, then check both timers
    // Returns true when more than one keepalive interval passed since the last send
    pub async fn should_send_keepalive(&mut self) -> Result<bool, SessionError> {
        self.timer.tick().await;
        if self.is_expired() {
            return Err(SessionError::HoldTimeExpired(self.hold_timer));
        }
        if self.interval == 0 {
            return Ok(false);
        }
        Ok(get_elapsed_time(self.last_sent) >= Duration::seconds(self.interval.into()))
    }

    /// Bump the last received to now
    pub fn received(&mut self) {
        self.last_received = Utc::now();
    }
    /// Bump the last sent to now
    pub fn sent(&mut self) {
        self.last_sent = Utc::now();
    }

    /// Longest an outbound send may block: what is left of the hold time,
    /// or the default hold time when the timer is disabled
    pub fn send_limit(&self) -> time::Duration {
        if self.hold_timer == 0 {
            return time::Duration::from_secs(BGP_DEFAULT_HOLD.into());
        }
        self.get_hold_time().to_std().unwrap_or(time::Duration::ZERO)
    }

    // Hold time left before the session expires, never below 0
    fn get_hold_time(&self) -> Duration {
        let hold_time = Duration::seconds(self.hold_timer.into());
        let elapsed = get_elapsed_time(self.last_received);
        if elapsed > hold_time {
            Duration::seconds(0)
        } else {
            hold_time - elapsed
        }
    }

    fn is_expired(&self) -> bool {
        if self.hold_timer == 0 {
            return false;
        }
        let hold_time = Duration::seconds(self.hold_timer.into());
        get_elapsed_time(self.last_received) >= hold_time
    }
}

impl fmt::Display for HoldTimer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.hold_timer == 0 {
            return write!(f, "disabled");
        }
        write!(f, "{}", format_elapsed_time(self.get_hold_time()))
    }
}
