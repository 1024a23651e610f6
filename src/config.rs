//! Configuration for the card feed
//!
//! `FeedConfig` holds the tuning constants of the engine. `Args` is the
//! command line of the replay binary, with environment fallbacks.

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{FeedError, Result};

const TWO_HOURS_MS: i64 = 2 * 60 * 60 * 1000;
const FORTY_EIGHT_HOURS_MS: i64 = 48 * 60 * 60 * 1000;

/// Tuning constants of the feed engine
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Quiet time after the last mutation before a snapshot is published (default: 200ms)
    pub snapshot_debounce: Duration,
    /// Period of the burst sampling tick (default: 1s)
    pub sample_interval: Duration,
    /// Mutations needed since the previous sample for a tick to publish (default: 20)
    pub burst_threshold: usize,
    /// Coalescing delay for filter/sort recomputation (default: 50ms)
    pub filter_debounce: Duration,
    /// Collapse cards sharing the same tags behind a group head
    pub grouped_cards: bool,
    /// Business window start, relative to now (default: -2h)
    pub business_window_before: Duration,
    /// Business window end, relative to now (default: +48h)
    pub business_window_after: Duration,
    /// Capacity of broadcast and command channels (default: 1024)
    pub channel_capacity: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            snapshot_debounce: Duration::from_millis(200),
            sample_interval: Duration::from_secs(1),
            burst_threshold: 20,
            filter_debounce: Duration::from_millis(50),
            grouped_cards: false,
            business_window_before: Duration::from_millis(TWO_HOURS_MS as u64),
            business_window_after: Duration::from_millis(FORTY_EIGHT_HOURS_MS as u64),
            channel_capacity: 1024,
        }
    }
}

impl FeedConfig {
    /// Config with grouped-card collapsing enabled
    pub fn with_grouped_cards(mut self) -> Self {
        self.grouped_cards = true;
        self
    }

    /// Default business window around `now_ms`
    pub fn business_window(&self, now_ms: i64) -> (i64, i64) {
        (
            now_ms - self.business_window_before.as_millis() as i64,
            now_ms + self.business_window_after.as_millis() as i64,
        )
    }

    pub fn validate(&self) -> Result<()> {
        if self.snapshot_debounce.is_zero() {
            return Err(FeedError::Config("snapshot debounce must be positive".into()));
        }
        if self.sample_interval.is_zero() {
            return Err(FeedError::Config("sample interval must be positive".into()));
        }
        if self.burst_threshold == 0 {
            return Err(FeedError::Config("burst threshold must be positive".into()));
        }
        if self.channel_capacity == 0 {
            return Err(FeedError::Config("channel capacity must be positive".into()));
        }
        Ok(())
    }
}

/// Cardfeed - offline replay of a captured card stream
#[derive(Parser, Debug, Clone)]
#[command(name = "cardfeed")]
#[command(about = "Replay a card subscription stream through the feed engine")]
pub struct Args {
    /// Newline-delimited frames to replay (stdin when absent)
    #[arg(long, env = "FRAMES_FILE")]
    pub frames: Option<PathBuf>,

    /// Log level for the cardfeed target
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Cards consultation base URL; period fetches are skipped when absent
    #[arg(long, env = "CARDS_CONSULTATION_URL")]
    pub subscription_url: Option<String>,

    /// Bearer token for the cards consultation service
    #[arg(long, env = "AUTH_TOKEN")]
    pub token: Option<String>,

    /// Subscription client id
    #[arg(long, env = "SUBSCRIPTION_CLIENT_ID", default_value_t = Uuid::new_v4())]
    pub client_id: Uuid,

    /// Login of the replaying user
    #[arg(long, env = "USER_LOGIN", default_value = "operator")]
    pub user_login: String,

    /// Entities of the replaying user (comma separated)
    #[arg(long, env = "USER_ENTITIES", value_delimiter = ',')]
    pub user_entities: Vec<String>,

    /// JSON array of process definitions
    #[arg(long, env = "PROCESSES_FILE")]
    pub processes_file: Option<PathBuf>,

    /// JSON array of entities
    #[arg(long, env = "ENTITIES_FILE")]
    pub entities_file: Option<PathBuf>,

    /// Sort strategy: unread, severity, startDate, endDate, publishDate
    #[arg(long, env = "FEED_SORT", default_value = "unread")]
    pub sort: String,

    /// Business period start (epoch ms); defaults to now - 2h
    #[arg(long, env = "BUSINESS_START_MS")]
    pub business_start_ms: Option<i64>,

    /// Business period end (epoch ms); defaults to now + 48h
    #[arg(long, env = "BUSINESS_END_MS")]
    pub business_end_ms: Option<i64>,

    /// Snapshot debounce in milliseconds
    #[arg(long, env = "SNAPSHOT_DEBOUNCE_MS", default_value = "200")]
    pub snapshot_debounce_ms: u64,

    /// Burst sampling period in milliseconds
    #[arg(long, env = "SAMPLE_INTERVAL_MS", default_value = "1000")]
    pub sample_interval_ms: u64,

    /// Mutations needed for a sampling tick to publish
    #[arg(long, env = "BURST_THRESHOLD", default_value = "20")]
    pub burst_threshold: usize,

    /// Filter recompute debounce in milliseconds
    #[arg(long, env = "FILTER_DEBOUNCE_MS", default_value = "50")]
    pub filter_debounce_ms: u64,

    /// Collapse cards sharing the same tags
    #[arg(long, env = "GROUPED_CARDS", default_value = "false")]
    pub grouped_cards: bool,

    /// Capacity of engine channels
    #[arg(long, env = "CHANNEL_CAPACITY", default_value = "1024")]
    pub channel_capacity: usize,
}

impl Args {
    /// Engine configuration from the command line
    pub fn feed_config(&self) -> FeedConfig {
        FeedConfig {
            snapshot_debounce: Duration::from_millis(self.snapshot_debounce_ms),
            sample_interval: Duration::from_millis(self.sample_interval_ms),
            burst_threshold: self.burst_threshold,
            filter_debounce: Duration::from_millis(self.filter_debounce_ms),
            grouped_cards: self.grouped_cards,
            channel_capacity: self.channel_capacity,
            ..FeedConfig::default()
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        self.feed_config().validate().map_err(|e| e.to_string())?;

        if let (Some(start), Some(end)) = (self.business_start_ms, self.business_end_ms) {
            if start > end {
                return Err("BUSINESS_START_MS must be less than or equal to BUSINESS_END_MS".into());
            }
        }

        if let Some(ref url) = self.subscription_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err("CARDS_CONSULTATION_URL must be an http(s) URL".into());
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = FeedConfig::default();
        assert_eq!(config.snapshot_debounce, Duration::from_millis(200));
        assert_eq!(config.burst_threshold, 20);
        assert!(!config.grouped_cards);
        assert!(config.validate().is_ok());
        assert!(config.with_grouped_cards().grouped_cards);
    }

    #[test]
    fn test_business_window() {
        let (start, end) = FeedConfig::default().business_window(10 * TWO_HOURS_MS);
        assert_eq!(start, 9 * TWO_HOURS_MS);
        assert_eq!(end, 10 * TWO_HOURS_MS + FORTY_EIGHT_HOURS_MS);
    }

    #[test]
    fn test_args_parse_and_validate() {
        let args = Args::parse_from([
            "cardfeed",
            "--user-entities",
            "ENTITY1,ENTITY2",
            "--snapshot-debounce-ms",
            "100",
            "--grouped-cards",
        ]);
        assert_eq!(args.user_entities, vec!["ENTITY1", "ENTITY2"]);
        assert!(args.feed_config().grouped_cards);
        assert_eq!(args.feed_config().snapshot_debounce, Duration::from_millis(100));
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_args_reject_bad_values() {
        let args = Args::parse_from(["cardfeed", "--burst-threshold", "0"]);
        assert!(args.validate().is_err());

        let args = Args::parse_from([
            "cardfeed",
            "--business-start-ms",
            "10",
            "--business-end-ms",
            "5",
        ]);
        assert!(args.validate().is_err());

        let args = Args::parse_from(["cardfeed", "--subscription-url", "ftp://x"]);
        assert!(args.validate().is_err());
    }
}
