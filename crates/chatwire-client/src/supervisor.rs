//! Connection lifecycle supervisor.
//!
//! Pure state machine owning the [`ConnectionState`]; the session driver
//! executes its actions (probe, dial, close) and feeds results back. Time is
//! passed as parameters so the machine tests deterministically without a
//! runtime.
//!
//! # State Machine
//!
//! ```text
//! ┌────────┐ probe ok   ┌──────┐  shutdown  ┌─────────┐      ┌────────┐
//! │Connecting─────dial──>│ Open │───────────>│ Closing │─────>│ Closed │
//! └────────┘            └──────┘            └─────────┘      └────────┘
//!     ▲  │ probe fail: re-probe  │ drop/idle
//!     │  │ dial fail: retry      ▼
//!     │  └──────────────── attempts < limit
//!     │                          │ attempts = limit
//!     │ network restored    ┌────────┐
//!     └─────────────────────│ Error  │   (terminal, fail-stop)
//!                           └────────┘
//! ```
//!
//! Exhausting the retry budget is deliberate fail-stop: no background
//! reconnection storm. Only an external trigger (detected network
//! restoration) resets the attempt counter.

use std::time::{Duration, Instant};

use tracing::{debug, warn};

/// Reconnect attempts before giving up.
pub const DEFAULT_RETRY_LIMIT: u32 = 4;

/// Fixed delay between reconnect attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(3);

/// Fixed interval between health-probe retries while the backend is down.
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_millis(2_500);

/// Maximum silence on an open connection before it is recycled.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Connection state, owned exclusively by the supervisor. Everything else
/// observes it, nothing else mutates it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Probing and dialing.
    Connecting,
    /// Transport established.
    Open,
    /// Graceful shutdown in progress.
    Closing,
    /// Shut down.
    Closed,
    /// Retry budget exhausted; waiting for an external trigger.
    Error,
}

/// Supervisor configuration.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Reconnect attempts before fail-stop.
    pub retry_limit: u32,
    /// Delay between reconnect attempts.
    pub retry_delay: Duration,
    /// Delay between health-probe retries.
    pub probe_interval: Duration,
    /// Idle cutoff for an open connection.
    pub idle_timeout: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            retry_limit: DEFAULT_RETRY_LIMIT,
            retry_delay: DEFAULT_RETRY_DELAY,
            probe_interval: DEFAULT_PROBE_INTERVAL,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

/// Actions for the driver to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorAction {
    /// Run the health probe.
    Probe,
    /// Health confirmed; establish the transport.
    Dial,
    /// Tear the transport down.
    CloseTransport,
    /// The connection state changed; observers may react.
    StateChanged(ConnectionState),
    /// Retry budget exhausted. User-visible terminal failure.
    Terminal {
        /// Why the supervisor gave up.
        reason: String,
    },
}

/// The connection supervisor.
pub struct Supervisor {
    state: ConnectionState,
    config: SupervisorConfig,
    attempts: u32,
    /// Set after a failed probe; the next probe fires one interval later.
    probe_wait_since: Option<Instant>,
    /// Set after a failed dial or a dropped transport; the next probe fires
    /// one retry delay later.
    retry_since: Option<Instant>,
    last_activity: Option<Instant>,
}

impl Supervisor {
    /// Create a supervisor in [`ConnectionState::Closed`].
    pub fn new(config: SupervisorConfig) -> Self {
        Self {
            state: ConnectionState::Closed,
            config,
            attempts: 0,
            probe_wait_since: None,
            retry_since: None,
            last_activity: None,
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Failed attempts since the last successful connection.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Begin connecting: health probe first, dial only if healthy.
    pub fn start(&mut self) -> Vec<SupervisorAction> {
        if self.state == ConnectionState::Open || self.state == ConnectionState::Connecting {
            return Vec::new();
        }

        self.state = ConnectionState::Connecting;
        self.attempts = 0;
        self.probe_wait_since = None;
        self.retry_since = None;

        vec![SupervisorAction::StateChanged(ConnectionState::Connecting), SupervisorAction::Probe]
    }

    /// Feed a health-probe result back.
    ///
    /// Unhealthy backends are re-probed on a fixed interval instead of
    /// hammering the transport endpoint with dials.
    pub fn on_probe_result(&mut self, healthy: bool, now: Instant) -> Vec<SupervisorAction> {
        if self.state != ConnectionState::Connecting {
            return Vec::new();
        }

        if healthy {
            self.probe_wait_since = None;
            vec![SupervisorAction::Dial]
        } else {
            debug!("health probe failed, re-probing after {:?}", self.config.probe_interval);
            self.probe_wait_since = Some(now);
            Vec::new()
        }
    }

    /// Feed a dial result back.
    pub fn on_dial_result(&mut self, connected: bool, now: Instant) -> Vec<SupervisorAction> {
        if self.state != ConnectionState::Connecting {
            return Vec::new();
        }

        if connected {
            self.state = ConnectionState::Open;
            self.attempts = 0;
            self.retry_since = None;
            self.last_activity = Some(now);
            vec![SupervisorAction::StateChanged(ConnectionState::Open)]
        } else {
            self.register_failure(now, "dial failed")
        }
    }

    /// The transport dropped (peer close, stream error).
    pub fn on_transport_closed(&mut self, now: Instant, reason: &str) -> Vec<SupervisorAction> {
        match self.state {
            ConnectionState::Closing => {
                self.state = ConnectionState::Closed;
                vec![SupervisorAction::StateChanged(ConnectionState::Closed)]
            },
            ConnectionState::Open | ConnectionState::Connecting => {
                self.register_failure(now, reason)
            },
            _ => Vec::new(),
        }
    }

    /// Inbound traffic observed; resets the idle clock.
    pub fn on_activity(&mut self, now: Instant) {
        self.last_activity = Some(now);
    }

    /// Network reachability restored - the one external trigger that resets
    /// an exhausted retry budget.
    pub fn on_network_restored(&mut self) -> Vec<SupervisorAction> {
        if self.state != ConnectionState::Error {
            return Vec::new();
        }

        debug!("network restored, resetting reconnect budget");
        self.state = ConnectionState::Connecting;
        self.attempts = 0;
        self.retry_since = None;
        self.probe_wait_since = None;

        vec![SupervisorAction::StateChanged(ConnectionState::Connecting), SupervisorAction::Probe]
    }

    /// Graceful teardown.
    pub fn shutdown(&mut self) -> Vec<SupervisorAction> {
        match self.state {
            ConnectionState::Open | ConnectionState::Connecting => {
                self.state = ConnectionState::Closing;
                vec![
                    SupervisorAction::StateChanged(ConnectionState::Closing),
                    SupervisorAction::CloseTransport,
                ]
            },
            _ => {
                self.state = ConnectionState::Closed;
                vec![SupervisorAction::StateChanged(ConnectionState::Closed)]
            },
        }
    }

    /// Periodic maintenance: scheduled re-probes, retry delays, idle cutoff.
    pub fn tick(&mut self, now: Instant) -> Vec<SupervisorAction> {
        match self.state {
            ConnectionState::Connecting => {
                let probe_due = self
                    .probe_wait_since
                    .is_some_and(|since| now - since >= self.config.probe_interval);
                let retry_due =
                    self.retry_since.is_some_and(|since| now - since >= self.config.retry_delay);

                if probe_due || retry_due {
                    self.probe_wait_since = None;
                    self.retry_since = None;
                    vec![SupervisorAction::Probe]
                } else {
                    Vec::new()
                }
            },
            ConnectionState::Open => {
                let idle = self
                    .last_activity
                    .is_some_and(|last| now - last > self.config.idle_timeout);

                if idle {
                    warn!("connection idle past {:?}, recycling", self.config.idle_timeout);
                    vec![SupervisorAction::CloseTransport]
                } else {
                    Vec::new()
                }
            },
            _ => Vec::new(),
        }
    }

    fn register_failure(&mut self, now: Instant, reason: &str) -> Vec<SupervisorAction> {
        self.attempts += 1;

        if self.attempts >= self.config.retry_limit {
            warn!(attempts = self.attempts, "reconnect budget exhausted: {reason}");
            self.state = ConnectionState::Error;
            self.retry_since = None;
            self.probe_wait_since = None;

            return vec![
                SupervisorAction::StateChanged(ConnectionState::Error),
                SupervisorAction::Terminal {
                    reason: format!(
                        "giving up after {} failed attempts: {reason}",
                        self.attempts
                    ),
                },
            ];
        }

        debug!(attempts = self.attempts, "connection attempt failed: {reason}");
        self.state = ConnectionState::Connecting;
        self.retry_since = Some(now);

        vec![SupervisorAction::StateChanged(ConnectionState::Connecting)]
    }
}
