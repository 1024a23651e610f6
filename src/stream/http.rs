//! HTTP period fetcher
//!
//! Asks the card subscription endpoint to replay a business period on the
//! already-open stream identified by the client id.

use async_trait::async_trait;
use reqwest::{header, Client};
use serde::Serialize;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::error::{FeedError, Result};
use crate::traits::PeriodFetcher;

/// Connection settings for [`HttpPeriodFetcher`]
#[derive(Debug, Clone)]
pub struct HttpFetcherConfig {
    /// Base URL of the cards consultation service
    pub base_url: String,
    /// Identifier of the stream subscription; generated when not given
    pub client_id: String,
    /// Bearer token, if the service requires one
    pub token: Option<String>,
    pub timeout_secs: u64,
}

impl Default for HttpFetcherConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:2104".to_string(),
            client_id: Uuid::new_v4().to_string(),
            token: None,
            timeout_secs: 30,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PeriodBody {
    range_start: i64,
    range_end: i64,
}

/// [`PeriodFetcher`] backed by the card subscription REST endpoint
pub struct HttpPeriodFetcher {
    config: HttpFetcherConfig,
    client: Client,
}

impl HttpPeriodFetcher {
    pub fn new(config: HttpFetcherConfig) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        if let Some(ref token) = config.token {
            let value = header::HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| FeedError::Config(format!("Invalid token: {}", e)))?;
            headers.insert(header::AUTHORIZATION, value);
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { config, client })
    }

    pub fn client_id(&self) -> &str {
        &self.config.client_id
    }

    fn subscription_url(&self) -> String {
        format!(
            "{}/cards-consultation/cardSubscription?clientId={}",
            self.config.base_url.trim_end_matches('/'),
            self.config.client_id
        )
    }
}

#[async_trait]
impl PeriodFetcher for HttpPeriodFetcher {
    async fn fetch_period(&self, start: i64, end: i64) -> Result<()> {
        let url = self.subscription_url();
        debug!(url = %url, start, end, "Requesting card period");

        let response = self
            .client
            .post(&url)
            .json(&PeriodBody {
                range_start: start,
                range_end: end,
            })
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(FeedError::Fetch {
            start,
            end,
            reason: format!("HTTP {}: {}", status, body),
        })
    }
}
