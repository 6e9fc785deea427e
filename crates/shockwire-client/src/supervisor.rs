//! Session supervisor -- connect/retry/watchdog state machine.
//!
//! Pure: no IO, no clocks of its own. The channel task feeds it events and
//! the current time, calls `tick()` at `next_deadline()`, and executes the
//! returned actions.
//!
//!   Disconnected --connect--> Connecting --(debounce, dial) ack--> Connected
//!   Connected --stale | link lost | disconnect--> Disconnected
//!
//! Connect requests closer together than the debounce window collapse into
//! the trailing one. A connect that fires while a session exists tears the
//! session down first.

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

use crate::watchdog::Watchdog;

/// Externally visible channel state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    Disconnected,
    Connecting,
    Connected,
}

impl ChannelStatus {
    pub fn name(&self) -> &'static str {
        match self {
            ChannelStatus::Disconnected => "disconnected",
            ChannelStatus::Connecting => "connecting",
            ChannelStatus::Connected => "connected",
        }
    }
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Delay before re-dialling after a failed attempt or a lost link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectPolicy {
    /// Same delay every time.
    Fixed(Duration),
    /// min(base * 2^min(failures - 1, saturation), max).
    Exponential {
        base: Duration,
        max: Duration,
        saturation: u32,
    },
}

impl ReconnectPolicy {
    /// Delay after `failures` consecutive failures. Zero if none.
    pub fn delay(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        match *self {
            ReconnectPolicy::Fixed(delay) => delay,
            ReconnectPolicy::Exponential {
                base,
                max,
                saturation,
            } => {
                let shift = (failures - 1).min(saturation).min(31);
                base.saturating_mul(1u32 << shift).min(max)
            }
        }
    }
}

/// Why a live (or dialling) session is being dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TeardownReason {
    /// A newer connect request replaces the session.
    Replaced,
    /// Watchdog saw no traffic for longer than one interval.
    Stale,
    /// Explicit disconnect.
    Requested,
    /// The link reported itself closed.
    Remote(String),
}

impl fmt::Display for TeardownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TeardownReason::Replaced => f.write_str("replaced"),
            TeardownReason::Stale => f.write_str("stale connection"),
            TeardownReason::Requested => f.write_str("client disconnect"),
            TeardownReason::Remote(reason) => write!(f, "remote: {reason}"),
        }
    }
}

/// What the channel task must do after a tick. Teardown runs before dial.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SupervisorActions {
    pub teardown: Option<TeardownReason>,
    pub dial: bool,
    /// Set when the dial is a retry: consecutive failures so far.
    pub reconnect_attempt: Option<u32>,
}

#[derive(Debug)]
pub struct Supervisor {
    status: ChannelStatus,
    debounce: Duration,
    watchdog_interval: Duration,
    policy: ReconnectPolicy,
    /// A caller asked for a connection and has not asked to disconnect.
    wanted: bool,
    /// A dial is in flight.
    dialing: bool,
    connect_at: Option<Instant>,
    retry_at: Option<Instant>,
    failures: u32,
    watchdog: Option<Watchdog>,
    check_at: Option<Instant>,
}

impl Supervisor {
    pub fn new(debounce: Duration, watchdog_interval: Duration, policy: ReconnectPolicy) -> Self {
        Self {
            status: ChannelStatus::Disconnected,
            debounce,
            watchdog_interval,
            policy,
            wanted: false,
            dialing: false,
            connect_at: None,
            retry_at: None,
            failures: 0,
            watchdog: None,
            check_at: None,
        }
    }

    pub fn status(&self) -> ChannelStatus {
        self.status
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Whether a debounced connect is waiting to fire.
    pub fn connect_pending(&self) -> bool {
        self.connect_at.is_some()
    }

    // ===== Inputs =====

    /// Schedule a connect at the end of the debounce window, pushing back any
    /// connect already scheduled. With nothing live the status moves to
    /// Connecting at once.
    pub fn request_connect(&mut self, now: Instant) {
        self.wanted = true;
        self.retry_at = None;
        self.connect_at = Some(now + self.debounce);
        if self.status == ChannelStatus::Disconnected {
            self.status = ChannelStatus::Connecting;
        }
    }

    /// Cancel everything. Returns true if a session (or dial) existed.
    pub fn request_disconnect(&mut self) -> bool {
        let had_session = self.status != ChannelStatus::Disconnected;
        self.wanted = false;
        self.dialing = false;
        self.connect_at = None;
        self.retry_at = None;
        self.disarm();
        self.status = ChannelStatus::Disconnected;
        had_session
    }

    pub fn on_connected(&mut self, now: Instant) {
        self.dialing = false;
        self.status = ChannelStatus::Connected;
        self.failures = 0;
        self.watchdog = Some(Watchdog::new(self.watchdog_interval, now));
        self.check_at = Some(now + self.watchdog_interval);
    }

    pub fn on_connect_failed(&mut self, now: Instant) {
        self.dialing = false;
        self.settle_idle();
        self.schedule_retry(now);
    }

    pub fn on_link_lost(&mut self, now: Instant) {
        self.disarm();
        self.settle_idle();
        self.schedule_retry(now);
    }

    /// Any inbound frame.
    pub fn on_activity(&mut self, now: Instant) {
        if let Some(dog) = self.watchdog.as_mut() {
            dog.touch(now);
        }
    }

    // ===== Tick =====

    pub fn tick(&mut self, now: Instant) -> SupervisorActions {
        let mut actions = SupervisorActions::default();

        // Watchdog check
        if self.status == ChannelStatus::Connected && self.check_at.is_some_and(|at| at <= now) {
            self.check_at = Some(now + self.watchdog_interval);
            if self.watchdog.as_ref().is_some_and(|dog| dog.is_stale(now)) {
                actions.teardown = Some(TeardownReason::Stale);
                self.dialing = false;
                self.disarm();
                self.status = ChannelStatus::Disconnected;
                if self.wanted && self.connect_at.is_none() {
                    self.connect_at = Some(now + self.debounce);
                }
            }
        }

        // Debounced connect
        if self.connect_at.is_some_and(|at| at <= now) {
            self.connect_at = None;
            let live = self.status == ChannelStatus::Connected || self.dialing;
            if live && actions.teardown.is_none() {
                actions.teardown = Some(TeardownReason::Replaced);
            }
            self.disarm();
            self.status = ChannelStatus::Connecting;
            self.dialing = true;
            actions.dial = true;
        } else if self.retry_at.is_some_and(|at| at <= now) {
            self.retry_at = None;
            self.status = ChannelStatus::Connecting;
            self.dialing = true;
            actions.dial = true;
            actions.reconnect_attempt = Some(self.failures);
        }

        actions
    }

    /// Earliest instant at which `tick` has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        let check = if self.status == ChannelStatus::Connected {
            self.check_at
        } else {
            None
        };
        [self.connect_at, self.retry_at, check]
            .into_iter()
            .flatten()
            .min()
    }

    fn schedule_retry(&mut self, now: Instant) {
        self.failures = self.failures.saturating_add(1);
        if self.wanted && self.connect_at.is_none() {
            self.retry_at = Some(now + self.policy.delay(self.failures));
        }
    }

    /// No session: Connecting if a connect is still scheduled.
    fn settle_idle(&mut self) {
        self.status = if self.connect_at.is_some() {
            ChannelStatus::Connecting
        } else {
            ChannelStatus::Disconnected
        };
    }

    fn disarm(&mut self) {
        self.watchdog = None;
        self.check_at = None;
    }
}
