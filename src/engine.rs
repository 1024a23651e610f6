//! Feed engine - single task owning the store, the ingestor and the pipeline
//!
//! ```text
//!  frames + commands ──► ordered channel ──► CardEventIngestor ──► LightCardStore ──(throttled)──► FilterPipeline
//!                                                 │   ▲
//!                                                 ▼   │
//!                                          PeriodFetcher (in-flight fetches)
//! ```
//!
//! Frames and commands share one channel, so a command sent after a frame
//! always observes that frame.
//!
//! All mutations happen inside [`FeedEngine::run`]; consumers interact through
//! the cloneable [`FeedHandle`], which sends commands and hands out
//! subscriptions. The loop stops on `Shutdown`, when every handle is
//! dropped, or after a `DISCONNECT_USER_DUE_TO_NEW_CONNECTION` frame.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::ack::{now_ms, AcknowledgmentEngine};
use crate::config::FeedConfig;
use crate::error::{FeedError, Result};
use crate::filter::{FilterPipeline, FilterStatus, FilterType, GroupedCards, PipelineOutputs};
use crate::model::{ControlSignal, LightCard};
use crate::sort::SortStrategy;
use crate::store::{AckEvent, CardSnapshot, DeletedChildCard, LightCardStore, SelectedCardEvent};
use crate::stream::{CardEventIngestor, PeriodRequest};
use crate::traits::PeriodFetcher;

type FetchFuture = BoxFuture<'static, (PeriodRequest, Result<()>)>;

/// Requests accepted by the engine task
#[derive(Debug)]
pub enum FeedCommand {
    /// One raw frame from the transport
    Frame(String),
    UpdateFilter {
        filter_type: FilterType,
        active: bool,
        status: FilterStatus,
        reply: oneshot::Sender<Result<()>>,
    },
    SetSortBy(SortStrategy),
    SetSearchTerm(String),
    SetOnlyBusinessFilterForTimeline(bool),
    SetSubscriptionDates {
        start: i64,
        end: i64,
    },
    SelectCard(Option<String>),
    SetRead {
        card_id: String,
        read: bool,
    },
    SetAcknowledgment {
        card_id: String,
        acknowledged: bool,
    },
    /// Forget every card and the loaded period (reconnection)
    ResetCards,
    GetLightCard {
        card_id: String,
        reply: oneshot::Sender<Option<LightCard>>,
    },
    GetChildCards {
        parent_card_id: String,
        reply: oneshot::Sender<Vec<LightCard>>,
    },
    GetAllChildCards {
        reply: oneshot::Sender<HashMap<String, Vec<LightCard>>>,
    },
    IsCardVisibleInFeed {
        card: Box<LightCard>,
        reply: oneshot::Sender<bool>,
    },
    GetLoadedPeriod {
        reply: oneshot::Sender<Option<(i64, i64)>>,
    },
    /// Flush pending outputs, then stop
    Shutdown,
}

/// Whether the loop keeps running after an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// Receivers kept to hand out fresh subscriptions
struct Subscriptions {
    snapshots: watch::Receiver<CardSnapshot>,
    new_cards: broadcast::Receiver<LightCard>,
    new_child_cards: broadcast::Receiver<LightCard>,
    deleted_child_cards: broadcast::Receiver<DeletedChildCard>,
    acks: broadcast::Receiver<AckEvent>,
    selected_card: broadcast::Receiver<SelectedCardEvent>,
    control: broadcast::Receiver<ControlSignal>,
    loading: watch::Receiver<bool>,
    pipeline: PipelineOutputs,
}

/// Cloneable access to a running [`FeedEngine`]
#[derive(Clone)]
pub struct FeedHandle {
    commands_tx: mpsc::Sender<FeedCommand>,
    subscriptions: Arc<Subscriptions>,
    ack: AcknowledgmentEngine,
}

impl FeedHandle {
    /// Push one raw frame from the transport
    pub async fn push_frame(&self, frame: impl Into<String>) -> Result<()> {
        self.send(FeedCommand::Frame(frame.into())).await
    }

    async fn send(&self, command: FeedCommand) -> Result<()> {
        self.commands_tx
            .send(command)
            .await
            .map_err(|_| FeedError::ChannelClosed)
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> FeedCommand) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.send(build(reply)).await?;
        rx.await.map_err(|_| FeedError::ChannelClosed)
    }

    /// Change one filter; a business date change also requests the period
    pub async fn update_filter(
        &self,
        filter_type: FilterType,
        active: bool,
        status: FilterStatus,
    ) -> Result<()> {
        self.request(|reply| FeedCommand::UpdateFilter {
            filter_type,
            active,
            status,
            reply,
        })
        .await?
    }

    pub async fn set_sort_by(&self, sort: SortStrategy) -> Result<()> {
        self.send(FeedCommand::SetSortBy(sort)).await
    }

    pub async fn set_search_term(&self, term: impl Into<String>) -> Result<()> {
        self.send(FeedCommand::SetSearchTerm(term.into())).await
    }

    pub async fn set_only_business_filter_for_timeline(&self, only_business: bool) -> Result<()> {
        self.send(FeedCommand::SetOnlyBusinessFilterForTimeline(only_business))
            .await
    }

    pub async fn set_subscription_dates(&self, start: i64, end: i64) -> Result<()> {
        self.send(FeedCommand::SetSubscriptionDates { start, end }).await
    }

    pub async fn select_card(&self, card_id: Option<String>) -> Result<()> {
        self.send(FeedCommand::SelectCard(card_id)).await
    }

    pub async fn set_light_card_read(&self, card_id: impl Into<String>, read: bool) -> Result<()> {
        self.send(FeedCommand::SetRead {
            card_id: card_id.into(),
            read,
        })
        .await
    }

    pub async fn set_light_card_acknowledgment(
        &self,
        card_id: impl Into<String>,
        acknowledged: bool,
    ) -> Result<()> {
        self.send(FeedCommand::SetAcknowledgment {
            card_id: card_id.into(),
            acknowledged,
        })
        .await
    }

    pub async fn reset_cards(&self) -> Result<()> {
        self.send(FeedCommand::ResetCards).await
    }

    pub async fn get_light_card(&self, card_id: impl Into<String>) -> Result<Option<LightCard>> {
        let card_id = card_id.into();
        self.request(|reply| FeedCommand::GetLightCard { card_id, reply })
            .await
    }

    pub async fn get_child_cards(&self, parent_card_id: impl Into<String>) -> Result<Vec<LightCard>> {
        let parent_card_id = parent_card_id.into();
        self.request(|reply| FeedCommand::GetChildCards {
            parent_card_id,
            reply,
        })
        .await
    }

    pub async fn get_all_child_cards(&self) -> Result<HashMap<String, Vec<LightCard>>> {
        self.request(|reply| FeedCommand::GetAllChildCards { reply })
            .await
    }

    /// Window covered by successful fetches since the last reset
    pub async fn loaded_period(&self) -> Result<Option<(i64, i64)>> {
        self.request(|reply| FeedCommand::GetLoadedPeriod { reply })
            .await
    }

    pub async fn is_card_visible_in_feed(&self, card: LightCard) -> Result<bool> {
        self.request(|reply| FeedCommand::IsCardVisibleInFeed {
            card: Box::new(card),
            reply,
        })
        .await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.send(FeedCommand::Shutdown).await
    }

    /// Acknowledgment rules for the current user
    pub fn acknowledgment(&self) -> &AcknowledgmentEngine {
        &self.ack
    }

    /// Full card list, throttled
    pub fn light_cards(&self) -> watch::Receiver<CardSnapshot> {
        self.subscriptions.snapshots.clone()
    }

    pub fn new_light_cards(&self) -> broadcast::Receiver<LightCard> {
        self.subscriptions.new_cards.resubscribe()
    }

    pub fn new_child_cards(&self) -> broadcast::Receiver<LightCard> {
        self.subscriptions.new_child_cards.resubscribe()
    }

    pub fn deleted_child_cards(&self) -> broadcast::Receiver<DeletedChildCard> {
        self.subscriptions.deleted_child_cards.resubscribe()
    }

    pub fn received_acks(&self) -> broadcast::Receiver<AckEvent> {
        self.subscriptions.acks.resubscribe()
    }

    pub fn selected_card(&self) -> broadcast::Receiver<SelectedCardEvent> {
        self.subscriptions.selected_card.resubscribe()
    }

    pub fn control_signals(&self) -> broadcast::Receiver<ControlSignal> {
        self.subscriptions.control.resubscribe()
    }

    pub fn loading_in_progress(&self) -> watch::Receiver<bool> {
        self.subscriptions.loading.clone()
    }

    /// Cards passing every active filter
    pub fn filtered_light_cards(&self) -> watch::Receiver<CardSnapshot> {
        self.subscriptions.pipeline.filtered.clone()
    }

    pub fn filtered_light_cards_for_timeline(&self) -> watch::Receiver<CardSnapshot> {
        self.subscriptions.pipeline.timeline.clone()
    }

    pub fn filtered_and_searched_light_cards(&self) -> watch::Receiver<CardSnapshot> {
        self.subscriptions.pipeline.searched.clone()
    }

    /// The feed as displayed: filtered, searched, sorted and grouped
    pub fn filtered_and_sorted_light_cards(&self) -> watch::Receiver<CardSnapshot> {
        self.subscriptions.pipeline.sorted.clone()
    }

    pub fn grouped_cards(&self) -> watch::Receiver<Arc<GroupedCards>> {
        self.subscriptions.pipeline.grouped.clone()
    }
}

pub struct FeedEngine {
    ingestor: CardEventIngestor,
    store: LightCardStore,
    pipeline: FilterPipeline,
    fetcher: Arc<dyn PeriodFetcher>,
    commands_rx: mpsc::Receiver<FeedCommand>,
    fetches: FuturesUnordered<FetchFuture>,
}

impl FeedEngine {
    /// Build an engine with the business window centered on the current time
    pub fn new(
        config: &FeedConfig,
        ack: AcknowledgmentEngine,
        fetcher: Arc<dyn PeriodFetcher>,
    ) -> (Self, FeedHandle) {
        Self::with_business_window(config, ack, fetcher, config.business_window(now_ms()))
    }

    pub fn with_business_window(
        config: &FeedConfig,
        ack: AcknowledgmentEngine,
        fetcher: Arc<dyn PeriodFetcher>,
        business_window: (i64, i64),
    ) -> (Self, FeedHandle) {
        let (commands_tx, commands_rx) = mpsc::channel(config.channel_capacity);

        let ingestor = CardEventIngestor::new(config.channel_capacity);
        let store = LightCardStore::new(ack.clone(), config);
        let pipeline = FilterPipeline::new(config, business_window);

        let subscriptions = Subscriptions {
            snapshots: store.subscribe_snapshots(),
            new_cards: store.subscribe_new_cards(),
            new_child_cards: store.subscribe_new_child_cards(),
            deleted_child_cards: store.subscribe_deleted_child_cards(),
            acks: store.subscribe_acks(),
            selected_card: store.subscribe_selected_card(),
            control: ingestor.subscribe_control(),
            loading: ingestor.subscribe_loading(),
            pipeline: pipeline.outputs(),
        };

        let handle = FeedHandle {
            commands_tx,
            subscriptions: Arc::new(subscriptions),
            ack,
        };

        let engine = Self {
            ingestor,
            store,
            pipeline,
            fetcher,
            commands_rx,
            fetches: FuturesUnordered::new(),
        };

        (engine, handle)
    }

    /// Spawn the engine on the current runtime
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        info!("Feed engine started");

        let period = self.store.sample_interval();
        let mut sample_tick = time::interval_at(Instant::now() + period, period);
        sample_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let snapshot_deadline = self.store.next_snapshot_deadline();
            let filter_deadline = self.pipeline.deadline();

            let flow = tokio::select! {
                command = self.commands_rx.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => {
                        info!("All feed handles dropped");
                        Flow::Stop
                    }
                },
                Some((request, result)) = self.fetches.next(), if !self.fetches.is_empty() => {
                    self.ingestor.complete_fetch(request, result);
                    Flow::Continue
                },
                _ = time::sleep_until(snapshot_deadline.unwrap_or_else(Instant::now)),
                    if snapshot_deadline.is_some() =>
                {
                    if let Some(snapshot) = self.store.flush_due_snapshot(Instant::now()) {
                        self.pipeline.set_cards(snapshot);
                    }
                    Flow::Continue
                },
                _ = sample_tick.tick() => {
                    if let Some(snapshot) = self.store.on_sample_tick(Instant::now()) {
                        debug!("Burst sample published");
                        self.pipeline.set_cards(snapshot);
                    }
                    Flow::Continue
                },
                _ = time::sleep_until(filter_deadline.unwrap_or_else(Instant::now)),
                    if filter_deadline.is_some() =>
                {
                    self.pipeline.poll(Instant::now());
                    Flow::Continue
                },
            };

            if flow == Flow::Stop {
                break;
            }
        }

        self.flush_outputs();
        info!("Feed engine stopped");
    }

    fn handle_frame(&mut self, data: &str) -> Flow {
        if let Some(operation) = self.ingestor.ingest(data) {
            self.store.apply(operation);
        }
        if self.ingestor.is_closed() {
            Flow::Stop
        } else {
            Flow::Continue
        }
    }

    fn handle_command(&mut self, command: FeedCommand) -> Flow {
        match command {
            FeedCommand::Frame(data) => return self.handle_frame(&data),
            FeedCommand::UpdateFilter {
                filter_type,
                active,
                status,
                reply,
            } => {
                if let FilterStatus::BusinessDate(range) = &status {
                    if let (Some(start), Some(end)) = (range.start, range.end) {
                        self.request_period(start, end);
                    }
                }
                let _ = reply.send(self.pipeline.update_filter(filter_type, active, status));
            }
            FeedCommand::SetSortBy(sort) => self.pipeline.set_sort_by(sort),
            FeedCommand::SetSearchTerm(term) => self.pipeline.set_search_term(&term),
            FeedCommand::SetOnlyBusinessFilterForTimeline(only_business) => {
                self.pipeline.set_only_business_filter_for_timeline(only_business)
            }
            FeedCommand::SetSubscriptionDates { start, end } => self.request_period(start, end),
            FeedCommand::SelectCard(card_id) => self.store.select_card(card_id),
            FeedCommand::SetRead { card_id, read } => self.store.set_light_card_read(&card_id, read),
            FeedCommand::SetAcknowledgment {
                card_id,
                acknowledged,
            } => self.store.set_light_card_acknowledgment(&card_id, acknowledged),
            FeedCommand::ResetCards => self.store.reset(&mut self.ingestor),
            FeedCommand::GetLightCard { card_id, reply } => {
                let _ = reply.send(self.store.get_light_card(&card_id));
            }
            FeedCommand::GetChildCards {
                parent_card_id,
                reply,
            } => {
                let _ = reply.send(self.store.get_child_cards(&parent_card_id));
            }
            FeedCommand::GetAllChildCards { reply } => {
                let _ = reply.send(self.store.get_all_child_cards());
            }
            FeedCommand::IsCardVisibleInFeed { card, reply } => {
                let _ = reply.send(self.pipeline.is_card_visible_in_feed(&card));
            }
            FeedCommand::GetLoadedPeriod { reply } => {
                let _ = reply.send(self.ingestor.period().loaded());
            }
            FeedCommand::Shutdown => {
                info!("Shutdown requested");
                return Flow::Stop;
            }
        }
        Flow::Continue
    }

    fn request_period(&mut self, start: i64, end: i64) {
        let Some(request) = self.ingestor.set_subscription_dates(start, end) else {
            return;
        };
        let fetcher = self.fetcher.clone();
        self.fetches.push(Box::pin(async move {
            let result = fetcher.fetch_period(request.start, request.end).await;
            (request, result)
        }));
    }

    /// Publish pending snapshot and pipeline outputs before stopping
    fn flush_outputs(&mut self) {
        if self.store.next_snapshot_deadline().is_some() {
            let snapshot = self.store.force_snapshot();
            self.pipeline.set_cards(snapshot);
        }
        self.pipeline.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CurrentUser, Entity, Process};
    use crate::traits::{NoopFetcher, StaticEntities, StaticProcesses};

    fn engine() -> (FeedEngine, FeedHandle) {
        let ack = AcknowledgmentEngine::new(
            CurrentUser::new("operator", &["ENTITY1"]),
            Arc::new(StaticProcesses::new(Vec::<Process>::new())),
            Arc::new(StaticEntities::new(Vec::<Entity>::new())),
        );
        FeedEngine::with_business_window(
            &FeedConfig::default(),
            ack,
            Arc::new(NoopFetcher),
            (0, i64::MAX),
        )
    }

    fn add_frame(id: &str, publish: i64) -> String {
        format!(
            r#"{{"type":"ADD","card":{{"id":"{id}","uid":"u-{id}","process":"p","state":"s","publishDate":{publish},"startDate":{publish}}}}}"#
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_flushes_queued_frames() {
        let (engine, handle) = engine();
        let task = engine.spawn();

        handle.push_frame(add_frame("c1", 100)).await.unwrap();
        handle.push_frame(add_frame("c2", 200)).await.unwrap();
        handle.shutdown().await.unwrap();
        task.await.unwrap();

        assert_eq!(handle.light_cards().borrow().len(), 2);
        let sorted: Vec<String> = handle
            .filtered_and_sorted_light_cards()
            .borrow()
            .iter()
            .map(|c| c.id.clone())
            .collect();
        assert_eq!(sorted, ["c2", "c1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_observes_preceding_frame() {
        let (engine, handle) = engine();
        let _task = engine.spawn();

        handle.push_frame(add_frame("c1", 100)).await.unwrap();
        let card = handle.get_light_card("c1").await.unwrap();
        assert_eq!(card.map(|c| c.id), Some("c1".to_string()));

        handle
            .push_frame(r#"{"type":"DELETE","cardId":"c1"}"#)
            .await
            .unwrap();
        assert!(handle.get_light_card("c1").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_queries_after_stop_fail() {
        let (engine, handle) = engine();
        let task = engine.spawn();
        handle.shutdown().await.unwrap();
        task.await.unwrap();

        assert!(matches!(
            handle.get_light_card("c1").await,
            Err(FeedError::ChannelClosed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_stops_engine() {
        let (engine, handle) = engine();
        let mut control = handle.control_signals();
        let task = engine.spawn();

        handle
            .push_frame("DISCONNECT_USER_DUE_TO_NEW_CONNECTION")
            .await
            .unwrap();
        task.await.unwrap();

        assert_eq!(
            control.recv().await.unwrap(),
            ControlSignal::DisconnectUserDueToNewConnection
        );
        assert!(handle.push_frame(add_frame("late", 1)).await.is_err());
    }
}
