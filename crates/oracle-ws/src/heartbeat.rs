//! Heartbeat bookkeeping for a query handler session.
//!
//! Tracks inbound frame activity and the reply/heartbeat frames written on
//! behalf of the protocol, and drives the optional periodic heartbeat tick.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::debug;

/// Per-session heartbeat state.
pub struct Heartbeat {
    /// Periodic heartbeat interval (None = disabled).
    period: Option<Duration>,
    /// Created on first tick so construction does not need a runtime.
    interval: Option<Interval>,
    started_at: DateTime<Utc>,
    last_frame: Option<DateTime<Utc>>,
    frames: u64,
    replies: u64,
    heartbeats: u64,
}

impl Heartbeat {
    /// Create a tracker. An interval of 0 disables periodic heartbeats.
    pub fn new(interval_ms: u64) -> Self {
        Self {
            period: (interval_ms > 0).then(|| Duration::from_millis(interval_ms)),
            interval: None,
            started_at: Utc::now(),
            last_frame: None,
            frames: 0,
            replies: 0,
            heartbeats: 0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.period.is_some()
    }

    /// Wait for the next periodic heartbeat. Never completes when disabled.
    ///
    /// The first tick fires one full period after the first call.
    pub async fn tick(&mut self) {
        let Some(period) = self.period else {
            return std::future::pending().await;
        };

        let interval = self.interval.get_or_insert_with(|| {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
        interval.tick().await;
    }

    /// Record that an inbound frame was received.
    pub fn record_frame(&mut self) {
        self.last_frame = Some(Utc::now());
        self.frames += 1;
    }

    /// Record that a protocol-requested reply was written.
    pub fn record_reply(&mut self) {
        self.replies += 1;
        debug!(replies = self.replies, "Wrote reply frame");
    }

    /// Record that a periodic heartbeat was written.
    pub fn record_heartbeat(&mut self) {
        self.heartbeats += 1;
        debug!(heartbeats = self.heartbeats, "Wrote heartbeat frame");
    }

    /// Time since the last inbound frame, if any frame was received.
    pub fn time_since_last_frame_ms(&self) -> Option<i64> {
        self.last_frame
            .map(|last| (Utc::now() - last).num_milliseconds())
    }

    pub fn stats(&self) -> HeartbeatStats {
        HeartbeatStats {
            started_at: self.started_at,
            last_frame: self.last_frame,
            frames: self.frames,
            replies: self.replies,
            heartbeats: self.heartbeats,
        }
    }
}

/// Heartbeat statistics, logged at session teardown.
#[derive(Debug, Clone)]
pub struct HeartbeatStats {
    pub started_at: DateTime<Utc>,
    pub last_frame: Option<DateTime<Utc>>,
    pub frames: u64,
    pub replies: u64,
    pub heartbeats: u64,
}
