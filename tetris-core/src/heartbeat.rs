//! Liveness monitoring.
//!
//! A [`Heartbeat`] keeps two deadlines relative to the last inbound
//! traffic: after `interval` one liveness probe goes out, and after
//! `interval + timeout` the connection is declared dead. Any inbound
//! traffic re-arms both deadlines from scratch.
//!
//! ```text
//!   touch ──────────── +interval ─────────── +timeout
//!     │                   │                     │
//!   Armed ───────────▶ Probing ─────────────▶ Dead
//!     ▲                   │
//!     └────── touch ──────┘          close() ─▶ Closed (from anywhere)
//! ```
//!
//! The monitor is a plain state machine over [`Instant`]s so it can be
//! driven by hand in tests; [`Heartbeat::expired`] adapts it to the tokio
//! timer for use inside a `select!` loop.

use std::future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Probe timing, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Silence before a probe is sent.
    pub interval_ms: u64,
    /// Grace period after the probe before the connection is dead.
    pub timeout_ms: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: 3000,
            timeout_ms: 1000,
        }
    }
}

impl HeartbeatConfig {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval_ms: saturating_millis(interval),
            timeout_ms: saturating_millis(timeout),
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn saturating_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// How a liveness probe is sent.
#[derive(Debug, Clone, PartialEq)]
pub enum Probe<P> {
    /// A transport-native ping; its pong counts as traffic.
    Native,
    /// A protocol packet sent over the shared channel.
    Packet(P),
    /// Nothing is sent; the server is expected to speak on its own.
    Passive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatState {
    /// Not started.
    Idle,
    /// Waiting for the probe deadline.
    Armed,
    /// Probe sent, waiting for any traffic.
    Probing,
    /// The timeout elapsed.
    Dead,
    /// Stopped; nothing fires any more.
    Closed,
}

/// What the owner has to do when a deadline passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    Probe,
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct Heartbeat {
    config: HeartbeatConfig,
    state: HeartbeatState,
    probe_at: Option<Instant>,
    dead_at: Option<Instant>,
}

impl Heartbeat {
    pub fn new(config: HeartbeatConfig) -> Self {
        Self {
            config,
            state: HeartbeatState::Idle,
            probe_at: None,
            dead_at: None,
        }
    }

    pub fn config(&self) -> &HeartbeatConfig {
        &self.config
    }

    pub fn state(&self) -> HeartbeatState {
        self.state
    }

    /// Arms both deadlines relative to `now`. Restarts a closed or dead
    /// monitor.
    pub fn start(&mut self, now: Instant) {
        self.arm(now);
    }

    /// Records inbound traffic. Ignored unless the monitor is running.
    pub fn touch(&mut self, now: Instant) {
        if matches!(self.state, HeartbeatState::Armed | HeartbeatState::Probing) {
            self.arm(now);
        }
    }

    pub fn close(&mut self) {
        self.state = HeartbeatState::Closed;
        self.probe_at = None;
        self.dead_at = None;
    }

    fn arm(&mut self, now: Instant) {
        self.state = HeartbeatState::Armed;
        self.probe_at = Some(now + self.config.interval());
        self.dead_at = Some(now + self.config.interval() + self.config.timeout());
    }

    /// Returns the action due at `now`, if any. The probe is reported
    /// before the timeout when both are due.
    pub fn poll(&mut self, now: Instant) -> Option<HeartbeatAction> {
        if self.state == HeartbeatState::Armed && self.probe_at.is_some_and(|at| at <= now) {
            self.state = HeartbeatState::Probing;
            self.probe_at = None;
            return Some(HeartbeatAction::Probe);
        }

        if matches!(self.state, HeartbeatState::Armed | HeartbeatState::Probing)
            && self.dead_at.is_some_and(|at| at <= now)
        {
            self.state = HeartbeatState::Dead;
            self.probe_at = None;
            self.dead_at = None;
            return Some(HeartbeatAction::TimedOut);
        }

        None
    }

    /// The earliest pending deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.probe_at, self.dead_at) {
            (Some(probe), Some(dead)) => Some(probe.min(dead)),
            (probe, dead) => probe.or(dead),
        }
    }

    pub fn is_armed(&self) -> bool {
        self.next_deadline().is_some()
    }

    /// Sleeps until the next action is due. Never completes while the
    /// monitor is not armed.
    pub async fn expired(&mut self) -> HeartbeatAction {
        loop {
            let Some(at) = self.next_deadline() else {
                return future::pending().await;
            };
            tokio::time::sleep_until(at).await;
            if let Some(action) = self.poll(Instant::now()) {
                return action;
            }
        }
    }
}
