//! Period fetch trait

use crate::error::Result;
use async_trait::async_trait;

/// Asks the server to replay every card in `[start, end]` on the stream.
///
/// The call only acknowledges the request: the cards themselves arrive as
/// ordinary ADD frames, followed by `OLD_CARDS_LOADING_END`.
///
/// # Example
///
/// ```rust,ignore
/// use cardfeed::{PeriodFetcher, Result};
///
/// struct Recorder;
///
/// #[async_trait]
/// impl PeriodFetcher for Recorder {
///     async fn fetch_period(&self, start: i64, end: i64) -> Result<()> {
///         println!("fetch [{start}, {end}]");
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait PeriodFetcher: Send + Sync {
    async fn fetch_period(&self, start: i64, end: i64) -> Result<()>;
}

/// Fetcher for offline replays: every request succeeds immediately
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopFetcher;

#[async_trait]
impl PeriodFetcher for NoopFetcher {
    async fn fetch_period(&self, _start: i64, _end: i64) -> Result<()> {
        Ok(())
    }
}
