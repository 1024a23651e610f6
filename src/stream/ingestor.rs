//! Frame classification and period loading state
//!
//! ```text
//! transport frame
//!     │
//!     ├─► control keyword ─► control broadcast (RELOAD, ... , DISCONNECT)
//!     │
//!     └─► JSON operation ──► CardOperation for the store
//!                            (decode failure: logged, frame dropped)
//! ```
//!
//! The ingestor also owns the subscription period and the loading counter.
//! It never performs I/O itself: `set_subscription_dates` returns the fetch
//! to issue and the caller reports the outcome through `complete_fetch`.

use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

use super::period::{PeriodRequest, SubscriptionPeriod};
use crate::error::{FeedError, Result};
use crate::model::{CardOperation, ControlSignal, Frame};

pub struct CardEventIngestor {
    period: SubscriptionPeriod,
    loading_count: usize,
    loading_tx: watch::Sender<bool>,
    control_tx: broadcast::Sender<ControlSignal>,
    closed: bool,
}

impl CardEventIngestor {
    pub fn new(channel_capacity: usize) -> Self {
        let (loading_tx, _) = watch::channel(false);
        let (control_tx, _) = broadcast::channel(channel_capacity);
        Self {
            period: SubscriptionPeriod::new(),
            loading_count: 0,
            loading_tx,
            control_tx,
            closed: false,
        }
    }

    /// Classify one frame.
    ///
    /// Control keywords are handled and broadcast, card operations are
    /// returned to the caller, and anything undecodable is dropped.
    pub fn ingest(&mut self, data: &str) -> Option<CardOperation> {
        if self.closed {
            debug!("Frame received after stream close, ignoring");
            return None;
        }

        match Frame::decode(data) {
            Ok(Frame::Control(signal)) => {
                self.handle_control(signal);
                None
            }
            Ok(Frame::Operation(operation)) => Some(operation),
            Err(e @ FeedError::MalformedOperation { .. }) => {
                debug!(error = %e, "Ignoring malformed card operation");
                None
            }
            Err(e) => {
                warn!(error = %e, "Impossible to parse server message");
                None
            }
        }
    }

    fn handle_control(&mut self, signal: ControlSignal) {
        match signal {
            ControlSignal::OldCardsLoadingEnd => {
                info!("OLD_CARDS_LOADING_END received");
                self.remove_loading();
            }
            ControlSignal::DisconnectUserDueToNewConnection => {
                info!("Disconnecting user because a new connection is being opened for this account");
                self.close();
            }
            other => info!(signal = other.keyword(), "Control signal received"),
        }
        // No subscriber is not an error
        let _ = self.control_tx.send(signal);
    }

    /// Request cards for a business period.
    ///
    /// Returns the fetch to issue, if any; the loading counter is already
    /// incremented for it.
    pub fn set_subscription_dates(&mut self, start: i64, end: i64) -> Option<PeriodRequest> {
        match self.period.request(start, end) {
            Some(request) => {
                info!(
                    start = %format_epoch_ms(request.start),
                    end = %format_epoch_ms(request.end),
                    "Need to load cards for period"
                );
                self.add_loading();
                Some(request)
            }
            None => {
                info!(start, end, "Cards already loaded for the chosen period");
                None
            }
        }
    }

    /// Report the outcome of a fetch returned by `set_subscription_dates`.
    ///
    /// A successful fetch keeps its loading slot until the server sends
    /// `OLD_CARDS_LOADING_END`. A failed one releases it immediately and
    /// leaves the window unloaded, so the same request can be retried.
    pub fn complete_fetch(&mut self, request: PeriodRequest, result: Result<()>) {
        match result {
            Ok(()) => {
                if !self.period.mark_loaded(&request) {
                    debug!(
                        generation = request.generation,
                        current = self.period.generation(),
                        "Discarding fetch completion from before reset"
                    );
                }
            }
            Err(e) => {
                error!(
                    start = request.start,
                    end = request.end,
                    error = %e,
                    "Error while asking cards for period"
                );
                self.period.clear_requested(&request);
                self.remove_loading();
            }
        }
    }

    pub fn reset_period(&mut self) {
        self.period.reset();
    }

    pub fn period(&self) -> &SubscriptionPeriod {
        &self.period
    }

    fn add_loading(&mut self) {
        self.loading_count += 1;
        if self.loading_count == 1 {
            self.loading_tx.send_replace(true);
        }
    }

    fn remove_loading(&mut self) {
        // Already at zero after a reconnection replayed cards on its own
        if self.loading_count == 0 {
            return;
        }
        self.loading_count -= 1;
        if self.loading_count == 0 {
            self.loading_tx.send_replace(false);
        }
    }

    pub fn is_loading(&self) -> bool {
        self.loading_count > 0
    }

    pub fn subscribe_loading(&self) -> watch::Receiver<bool> {
        self.loading_tx.subscribe()
    }

    pub fn subscribe_control(&self) -> broadcast::Receiver<ControlSignal> {
        self.control_tx.subscribe()
    }

    /// Stop accepting frames
    pub fn close(&mut self) {
        if !self.closed {
            info!("Closing event stream");
            self.closed = true;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

/// ISO-8601 rendering of an epoch-millisecond timestamp for logs
pub(crate) fn format_epoch_ms(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| ms.to_string())
}
