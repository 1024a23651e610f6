//! Push stream ingestion
//!
//! Turns raw frames into card operations and control signals, and keeps
//! track of which business period has already been replayed by the server.

mod http;
mod ingestor;
mod period;

pub use http::{HttpFetcherConfig, HttpPeriodFetcher};
pub use ingestor::CardEventIngestor;
pub(crate) use ingestor::format_epoch_ms;
pub use period::{PeriodRequest, SubscriptionPeriod};
