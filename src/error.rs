//! Error types for the card feed engine
//!
//! Nothing in here is fatal to the feed: the engine logs these and keeps
//! consuming the stream. They surface as `Result`s at the crate boundary
//! (fetchers, decoding, configuration) so callers can decide.

use thiserror::Error;

/// Result type for feed operations
pub type Result<T> = std::result::Result<T, FeedError>;

/// Feed error types
#[derive(Error, Debug)]
pub enum FeedError {
    /// A push frame could not be parsed as a card operation
    #[error("Cannot decode frame: {0}")]
    Decode(String),

    /// A card operation parsed but is missing a required identifier
    #[error("Malformed {operation} operation: missing {field}")]
    MalformedOperation {
        operation: &'static str,
        field: &'static str,
    },

    /// Period fetch rejected by the server
    #[error("Period fetch [{start}, {end}] failed: {reason}")]
    Fetch { start: i64, end: i64, reason: String },

    /// Network error
    #[error("Network error: {0}")]
    Network(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The engine task is gone
    #[error("Feed engine channel closed")]
    ChannelClosed,
}

impl From<serde_json::Error> for FeedError {
    fn from(err: serde_json::Error) -> Self {
        FeedError::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for FeedError {
    fn from(err: reqwest::Error) -> Self {
        FeedError::Network(err.to_string())
    }
}
