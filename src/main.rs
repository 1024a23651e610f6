//! Cardfeed - replay a captured card stream through the feed engine
//!
//! ## Usage
//!
//! ```bash
//! # Replay a capture, one frame per line
//! cardfeed --frames capture.ndjson --user-entities ENTITY1,ENTITY2
//!
//! # With process and entity definitions, sorted by severity
//! cardfeed --frames capture.ndjson --processes-file processes.json \
//!     --entities-file entities.json --sort severity
//!
//! # Read frames from stdin and ask a live server to replay the period
//! tail -f stream.log | cardfeed --subscription-url http://localhost:2104 --token $TOKEN
//! ```
//!
//! The final feed is written to stdout as one JSON card per line.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cardfeed::config::Args;
use cardfeed::{
    AcknowledgmentEngine, CurrentUser, Entity, FeedEngine, HttpFetcherConfig, HttpPeriodFetcher,
    NoopFetcher, PeriodFetcher, Process, SortStrategy, StaticEntities, StaticProcesses,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    let log_level = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("cardfeed={},info", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    let config = args.feed_config();
    let sort: SortStrategy = args.sort.parse().unwrap_or_default();
    let (default_start, default_end) =
        config.business_window(chrono::Utc::now().timestamp_millis());
    let business_start = args.business_start_ms.unwrap_or(default_start);
    let business_end = args.business_end_ms.unwrap_or(default_end);

    info!("======================================");
    info!("  Cardfeed - card stream replay");
    info!("======================================");
    info!("User: {} ({})", args.user_login, args.user_entities.join(","));
    info!(
        "Frames: {}",
        args.frames
            .as_deref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "stdin".to_string())
    );
    info!(
        "Period fetches: {}",
        args.subscription_url.as_deref().unwrap_or("disabled")
    );
    info!("Sort: {}", sort);
    info!("Grouped cards: {}", config.grouped_cards);
    info!("======================================");

    let processes: Vec<Process> = match &args.processes_file {
        Some(path) => load_json(path).await?,
        None => Vec::new(),
    };
    let entities: Vec<Entity> = match &args.entities_file {
        Some(path) => load_json(path).await?,
        None => Vec::new(),
    };
    info!(
        processes = processes.len(),
        entities = entities.len(),
        "Definitions loaded"
    );

    let user_entities: Vec<&str> = args.user_entities.iter().map(String::as_str).collect();
    let ack = AcknowledgmentEngine::new(
        CurrentUser::new(args.user_login.clone(), &user_entities),
        Arc::new(StaticProcesses::new(processes)),
        Arc::new(StaticEntities::new(entities)),
    );

    let fetcher: Arc<dyn PeriodFetcher> = match &args.subscription_url {
        Some(url) => Arc::new(HttpPeriodFetcher::new(HttpFetcherConfig {
            base_url: url.clone(),
            client_id: args.client_id.to_string(),
            token: args.token.clone(),
            ..HttpFetcherConfig::default()
        })?),
        None => Arc::new(NoopFetcher),
    };

    let (engine, handle) =
        FeedEngine::with_business_window(&config, ack, fetcher, (business_start, business_end));
    let engine_task = engine.spawn();

    handle.set_sort_by(sort).await?;
    handle
        .set_subscription_dates(business_start, business_end)
        .await?;

    let mut sorted = handle.filtered_and_sorted_light_cards();
    let feed_logger = tokio::spawn(async move {
        while sorted.changed().await.is_ok() {
            let ids: Vec<String> = sorted
                .borrow_and_update()
                .iter()
                .map(|card| card.id.clone())
                .collect();
            info!(visible = ids.len(), ids = ?ids, "Feed updated");
        }
    });

    let reader: Box<dyn tokio::io::AsyncRead + Unpin + Send> = match &args.frames {
        Some(path) => Box::new(
            tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Failed to open {}", path.display()))?,
        ),
        None => Box::new(tokio::io::stdin()),
    };

    let mut lines = BufReader::new(reader).lines();
    let mut replayed = 0usize;
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        if handle.push_frame(line).await.is_err() {
            info!("Feed engine closed the stream");
            break;
        }
        replayed += 1;
    }
    info!(frames = replayed, "Replay finished");

    // The engine may already be gone after a disconnect frame
    let _ = handle.shutdown().await;
    engine_task.await?;

    let feed = handle.filtered_and_sorted_light_cards().borrow().clone();
    drop(handle);
    let _ = feed_logger.await;

    let mut stdout = tokio::io::stdout();
    for card in feed.iter() {
        let mut line = serde_json::to_vec(card)?;
        line.push(b'\n');
        stdout.write_all(&line).await?;
    }
    stdout.flush().await?;

    info!(cards = feed.len(), "Feed written");
    Ok(())
}

async fn load_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Invalid JSON in {}", path.display()))
}
