//! Cardfeed - real-time card feed for operator alerting
//!
//! Keeps the client-side picture of a card subscription: ingests the server
//! push stream, maintains the set of live cards with their child cards and
//! acknowledgments, and derives the filtered, searched and sorted feed shown
//! to an operator.
//!
//! # Architecture
//!
//! ```text
//! push frames ─► stream (ingestor) ─► store (light cards) ─► filter pipeline ─► sorted feed
//!                     │                     │
//!                     │                     └─► ack rules (per user / per entity)
//!                     └─► period fetches (PeriodFetcher)
//! ```
//!
//! Everything is driven by a single [`FeedEngine`] task; callers hold a
//! [`FeedHandle`].
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use cardfeed::{AcknowledgmentEngine, CurrentUser, FeedConfig, FeedEngine, NoopFetcher};
//! use cardfeed::{StaticEntities, StaticProcesses};
//!
//! let ack = AcknowledgmentEngine::new(
//!     CurrentUser::new("operator", &["ENTITY1"]),
//!     Arc::new(StaticProcesses::default()),
//!     Arc::new(StaticEntities::default()),
//! );
//! let (engine, handle) = FeedEngine::new(&FeedConfig::default(), ack, Arc::new(NoopFetcher));
//! engine.spawn();
//!
//! handle.push_frame(r#"{"type":"ADD","card":{"id":"c1"}}"#).await?;
//! let feed = handle.filtered_and_sorted_light_cards();
//! ```

// Acknowledgment rules
pub mod ack;

// Engine tuning and command line
pub mod config;

// Engine task and handle
pub mod engine;

// Error types
pub mod error;

// Filters, text search and grouping
pub mod filter;

// Cards, operations, processes and users
pub mod model;

// Sort strategies
pub mod sort;

// Card store and snapshot throttling
pub mod store;

// Push stream ingestion and period fetches
pub mod stream;

// Seams to external collaborators
pub mod traits;

pub use ack::AcknowledgmentEngine;
pub use config::FeedConfig;
pub use engine::{FeedCommand, FeedEngine, FeedHandle};
pub use error::{FeedError, Result};
pub use filter::{AckFilter, DateRange, FilterStatus, FilterType, GroupedCards};
pub use model::{
    CardOperation, ControlSignal, CurrentUser, Entity, LightCard, Process, ProcessState, Severity,
};
pub use sort::SortStrategy;
pub use store::{AckEvent, AckOperation, CardSnapshot, DeletedChildCard, SelectedCardEvent};
pub use stream::{HttpFetcherConfig, HttpPeriodFetcher};
pub use traits::{
    EntityDirectory, NoopFetcher, PeriodFetcher, ProcessDirectory, StaticEntities, StaticProcesses,
};
