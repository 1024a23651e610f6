//! Snapshot rate limiting
//!
//! Publishing the whole card list on every operation is too expensive while
//! the server replays a period. Two triggers decide when a snapshot goes out:
//!
//! - **debounce**: the stream has been quiet for `debounce` since the last
//!   mutation;
//! - **sample tick**: every `sample_interval`, if mutations arrived since the
//!   previous tick, no debounce fired within the last interval, and at least
//!   `burst_threshold` mutations accumulated since the previous sample flush.
//!
//! Under a long flow of cards the tick keeps the list moving; when the flow
//! is too slow to reach the threshold the tick stays silent and the debounce
//! takes over.
//!
//! All methods take the current instant so the logic stays clock-free.

use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::config::FeedConfig;

#[derive(Debug, Clone)]
pub struct SnapshotThrottle {
    debounce: Duration,
    sample_interval: Duration,
    burst_threshold: usize,
    /// Time of the last mutation not yet covered by a debounce flush
    pending_since: Option<Instant>,
    last_debounce: Option<Instant>,
    mutations_since_sample: usize,
    dirty_since_tick: bool,
}

impl SnapshotThrottle {
    pub fn new(debounce: Duration, sample_interval: Duration, burst_threshold: usize) -> Self {
        Self {
            debounce,
            sample_interval,
            burst_threshold,
            pending_since: None,
            last_debounce: None,
            mutations_since_sample: 0,
            dirty_since_tick: false,
        }
    }

    pub fn from_config(config: &FeedConfig) -> Self {
        Self::new(
            config.snapshot_debounce,
            config.sample_interval,
            config.burst_threshold,
        )
    }

    pub fn record_mutation(&mut self, now: Instant) {
        self.pending_since = Some(now);
        self.mutations_since_sample += 1;
        self.dirty_since_tick = true;
    }

    /// When the debounce flush is due, if a mutation is pending
    pub fn debounce_deadline(&self) -> Option<Instant> {
        self.pending_since.map(|at| at + self.debounce)
    }

    /// Fire the debounce trigger if its deadline has passed
    pub fn poll_debounce(&mut self, now: Instant) -> bool {
        match self.debounce_deadline() {
            Some(deadline) if deadline <= now => {
                self.pending_since = None;
                self.last_debounce = Some(now);
                true
            }
            _ => false,
        }
    }

    /// Evaluate the sampling trigger at a tick
    pub fn on_tick(&mut self, now: Instant) -> bool {
        if !std::mem::take(&mut self.dirty_since_tick) {
            return false;
        }

        let quiet_debounce = self
            .last_debounce
            .map_or(true, |at| now.duration_since(at) > self.sample_interval);
        if !quiet_debounce || self.mutations_since_sample < self.burst_threshold {
            return false;
        }

        debug!(
            mutations = self.mutations_since_sample,
            "Cards flow in progress"
        );
        self.mutations_since_sample = 0;
        true
    }

    pub fn sample_interval(&self) -> Duration {
        self.sample_interval
    }

    /// Drop pending state, e.g. after a reset published its own snapshot
    pub fn clear(&mut self) {
        self.pending_since = None;
        self.mutations_since_sample = 0;
        self.dirty_since_tick = false;
    }
}
