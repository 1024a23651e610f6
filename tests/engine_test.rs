//! Feed engine integration tests
//!
//! Drives a spawned engine through its handle only:
//! - Period fetch widening, retries and loading state
//! - Snapshot debounce and burst sampling
//! - Quorum acknowledgment through the stream
//! - Child cards arriving before their parent
//! - Deletion of root cards with children
//! - Filtered, searched and sorted feed output

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use cardfeed::model::{AcknowledgmentAllowed, ConsideredAcknowledgedForUserWhen};
use cardfeed::{
    AcknowledgmentEngine, CurrentUser, Entity, FeedConfig, FeedEngine, FeedError, FeedHandle,
    FilterStatus, FilterType, PeriodFetcher, Process, ProcessState, Result, SortStrategy,
    StaticEntities, StaticProcesses, DateRange,
};

/// Records every fetched period; fails periods starting at `fail_from`
#[derive(Default)]
struct RecordingFetcher {
    calls: Mutex<Vec<(i64, i64)>>,
    fail_from: Option<i64>,
}

impl RecordingFetcher {
    fn calls(&self) -> Vec<(i64, i64)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PeriodFetcher for RecordingFetcher {
    async fn fetch_period(&self, start: i64, end: i64) -> Result<()> {
        self.calls.lock().unwrap().push((start, end));
        if self.fail_from == Some(start) {
            return Err(FeedError::Fetch {
                start,
                end,
                reason: "503 Service Unavailable".into(),
            });
        }
        Ok(())
    }
}

/// Records every fetched period, then blocks until the test opens the gate
struct GatedFetcher {
    calls: Mutex<Vec<(i64, i64)>>,
    gate: Semaphore,
}

impl Default for GatedFetcher {
    fn default() -> Self {
        Self {
            calls: Mutex::default(),
            gate: Semaphore::new(0),
        }
    }
}

impl GatedFetcher {
    fn calls(&self) -> Vec<(i64, i64)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PeriodFetcher for GatedFetcher {
    async fn fetch_period(&self, start: i64, end: i64) -> Result<()> {
        self.calls.lock().unwrap().push((start, end));
        self.gate.acquire().await.unwrap().forget();
        Ok(())
    }
}

fn quorum_process() -> Process {
    Process::new("grid", "1").with_state(
        "alert",
        ProcessState {
            acknowledgment_allowed: Some(AcknowledgmentAllowed::Always),
            considered_acknowledged_for_user_when: Some(
                ConsideredAcknowledgedForUserWhen::AllEntitiesOfUserHaveAcknowledged,
            ),
            response: None,
        },
    )
}

fn start_engine(fetcher: Arc<dyn PeriodFetcher>) -> (FeedHandle, tokio::task::JoinHandle<()>) {
    let ack = AcknowledgmentEngine::new(
        CurrentUser::new("operator", &["A", "B"]),
        Arc::new(StaticProcesses::new([quorum_process()])),
        Arc::new(StaticEntities::new([
            Entity::card_sender("A"),
            Entity::card_sender("B"),
            Entity::card_sender("OTHER"),
        ])),
    );
    let (engine, handle) =
        FeedEngine::with_business_window(&FeedConfig::default(), ack, fetcher, (0, i64::MAX));
    (handle, engine.spawn())
}

fn engine() -> (FeedHandle, tokio::task::JoinHandle<()>) {
    start_engine(Arc::new(RecordingFetcher::default()))
}

fn add(id: &str, publish: i64) -> String {
    format!(
        r#"{{"type":"ADD","card":{{"id":"{id}","uid":"u-{id}","process":"grid","processVersion":"1","state":"alert","publisher":"OTHER","publishDate":{publish},"startDate":{publish},"titleTranslated":"Alert {id}"}}}}"#
    )
}

fn add_child(id: &str, parent: &str, publisher: &str) -> String {
    format!(
        r#"{{"type":"ADD","card":{{"id":"{id}","uid":"u-{id}","parentCardId":"{parent}","process":"grid","processVersion":"1","state":"response","publisher":"{publisher}","publishDate":1,"startDate":1}}}}"#
    )
}

/// Let the engine process everything queued, then run past every debounce
async fn settle() {
    tokio::time::sleep(Duration::from_millis(500)).await;
}

fn ids(snapshot: &cardfeed::CardSnapshot) -> Vec<String> {
    snapshot.iter().map(|c| c.id.clone()).collect()
}

// =============================================================================
// Period Fetches
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_period_widening_fetches_minimal_delta() {
    let fetcher = Arc::new(RecordingFetcher::default());
    let (handle, _task) = start_engine(fetcher.clone());

    handle.set_subscription_dates(100, 200).await.unwrap();
    settle().await;
    assert_eq!(fetcher.calls(), [(100, 200)]);

    handle.set_subscription_dates(50, 200).await.unwrap();
    settle().await;
    assert_eq!(fetcher.calls(), [(100, 200), (50, 100)]);

    handle.set_subscription_dates(50, 200).await.unwrap();
    settle().await;
    assert_eq!(fetcher.calls().len(), 2, "identical request issues no fetch");
    assert_eq!(handle.loaded_period().await.unwrap(), Some((50, 200)));
}

#[tokio::test(start_paused = true)]
async fn test_loading_lasts_until_old_cards_end() {
    let (handle, _task) = engine();
    let loading = handle.loading_in_progress();

    handle.set_subscription_dates(100, 200).await.unwrap();
    settle().await;
    assert!(*loading.borrow());

    handle.push_frame(add("c1", 150)).await.unwrap();
    handle.push_frame("OLD_CARDS_LOADING_END").await.unwrap();
    settle().await;
    assert!(!*loading.borrow());
}

#[tokio::test(start_paused = true)]
async fn test_failed_fetch_releases_loading() {
    let fetcher = Arc::new(RecordingFetcher {
        fail_from: Some(100),
        ..Default::default()
    });
    let (handle, _task) = start_engine(fetcher.clone());
    let loading = handle.loading_in_progress();

    handle.set_subscription_dates(100, 200).await.unwrap();
    settle().await;
    assert!(!*loading.borrow());
    assert_eq!(handle.loaded_period().await.unwrap(), None);

    // The same window is asked for again
    handle.set_subscription_dates(100, 200).await.unwrap();
    settle().await;
    assert_eq!(fetcher.calls(), [(100, 200), (100, 200)]);
}

#[tokio::test(start_paused = true)]
async fn test_reset_discards_in_flight_fetch() {
    let fetcher = Arc::new(GatedFetcher::default());
    let (handle, _task) = start_engine(fetcher.clone());

    handle.set_subscription_dates(100, 200).await.unwrap();
    settle().await;
    assert_eq!(fetcher.calls(), [(100, 200)]);

    handle.reset_cards().await.unwrap();
    fetcher.gate.add_permits(1);
    settle().await;
    assert_eq!(handle.loaded_period().await.unwrap(), None);

    fetcher.gate.add_permits(1);
    handle.set_subscription_dates(100, 200).await.unwrap();
    settle().await;
    assert_eq!(fetcher.calls(), [(100, 200), (100, 200)]);
    assert_eq!(handle.loaded_period().await.unwrap(), Some((100, 200)));
}

#[tokio::test(start_paused = true)]
async fn test_business_date_filter_requests_period() {
    let fetcher = Arc::new(RecordingFetcher::default());
    let (handle, _task) = start_engine(fetcher.clone());

    handle
        .update_filter(
            FilterType::BusinessDate,
            true,
            FilterStatus::BusinessDate(DateRange::new(1_000, 2_000)),
        )
        .await
        .unwrap();
    settle().await;
    assert_eq!(fetcher.calls(), [(1_000, 2_000)]);
}

#[tokio::test(start_paused = true)]
async fn test_mismatched_filter_status_is_rejected() {
    let (handle, _task) = engine();
    let err = handle
        .update_filter(FilterType::Type, true, FilterStatus::Response(true))
        .await
        .unwrap_err();
    assert!(matches!(err, FeedError::Config(_)));
}

// =============================================================================
// Snapshot Rate Limiting
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_burst_yields_at_most_one_snapshot_in_first_window() {
    let (handle, _task) = engine();
    let mut snapshots = handle.light_cards();
    snapshots.mark_unchanged();

    let started = tokio::time::Instant::now();
    for i in 0..25 {
        handle.push_frame(add(&format!("c{i}"), i)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(4)).await;
    }

    let mut emitted = 0;
    while tokio::time::timeout_at(started + Duration::from_millis(200), snapshots.changed())
        .await
        .is_ok()
    {
        snapshots.borrow_and_update();
        emitted += 1;
    }
    assert!(emitted <= 1, "{emitted} snapshots in the first 200ms");

    settle().await;
    assert_eq!(snapshots.borrow().len(), 25);
}

#[tokio::test(start_paused = true)]
async fn test_isolated_mutation_published_after_debounce() {
    let (handle, _task) = engine();
    let mut snapshots = handle.light_cards();
    snapshots.mark_unchanged();

    let started = tokio::time::Instant::now();
    handle.push_frame(add("c1", 1)).await.unwrap();

    tokio::time::timeout(Duration::from_millis(250), snapshots.changed())
        .await
        .expect("snapshot within the debounce window")
        .unwrap();
    assert!(started.elapsed() >= Duration::from_millis(200));
    assert_eq!(ids(&snapshots.borrow()), ["c1"]);
}

// =============================================================================
// Acknowledgment and Child Cards
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_quorum_acknowledgment_from_stream() {
    let (handle, _task) = engine();
    let card = add("c1", 10).replace(
        r#""publisher":"OTHER""#,
        r#""publisher":"OTHER","entityRecipients":["A","B"]"#,
    );
    handle.push_frame(card).await.unwrap();
    handle
        .push_frame(r#"{"type":"ACK","cardId":"c1","cardUid":"u-c1","entitiesAcks":["A"]}"#)
        .await
        .unwrap();
    settle().await;

    let card = handle.get_light_card("c1").await.unwrap().unwrap();
    assert!(!card.has_been_acknowledged);
    assert_eq!(ids(&handle.filtered_and_sorted_light_cards().borrow()), ["c1"]);

    handle
        .push_frame(r#"{"type":"ACK","cardId":"c1","cardUid":"u-c1","entitiesAcks":["B"]}"#)
        .await
        .unwrap();
    settle().await;

    let card = handle.get_light_card("c1").await.unwrap().unwrap();
    assert!(card.has_been_acknowledged);
    assert!(handle.filtered_and_sorted_light_cards().borrow().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_child_before_parent_marks_parent() {
    let (handle, _task) = engine();
    handle.push_frame(add_child("r1", "P1", "A")).await.unwrap();
    handle.push_frame(add("P1", 10)).await.unwrap();
    settle().await;

    let parent = handle.get_light_card("P1").await.unwrap().unwrap();
    assert!(parent.has_child_card_from_current_user_entity);
}

#[tokio::test(start_paused = true)]
async fn test_parent_before_child_marks_parent() {
    let (handle, _task) = engine();
    handle.push_frame(add("P1", 10)).await.unwrap();
    handle.push_frame(add_child("r1", "P1", "A")).await.unwrap();
    settle().await;

    let parent = handle.get_light_card("P1").await.unwrap().unwrap();
    assert!(parent.has_child_card_from_current_user_entity);
}

#[tokio::test(start_paused = true)]
async fn test_delete_root_drops_children() {
    let (handle, _task) = engine();
    handle.push_frame(add("P1", 10)).await.unwrap();
    handle.push_frame(add_child("r1", "P1", "OTHER")).await.unwrap();
    handle.push_frame(add_child("r2", "P1", "A")).await.unwrap();
    settle().await;
    assert_eq!(handle.get_child_cards("P1").await.unwrap().len(), 2);

    handle
        .push_frame(r#"{"type":"DELETE","cardId":"P1"}"#)
        .await
        .unwrap();
    settle().await;

    assert!(handle.get_light_card("P1").await.unwrap().is_none());
    assert!(handle.get_child_cards("P1").await.unwrap().is_empty());
    assert!(!handle
        .get_all_child_cards()
        .await
        .unwrap()
        .contains_key("P1"));
}

#[tokio::test(start_paused = true)]
async fn test_reset_forgets_cards_and_period() {
    let fetcher = Arc::new(RecordingFetcher::default());
    let (handle, _task) = start_engine(fetcher.clone());
    handle.set_subscription_dates(100, 200).await.unwrap();
    handle.push_frame(add("c1", 150)).await.unwrap();
    settle().await;

    handle.reset_cards().await.unwrap();
    handle.set_subscription_dates(100, 200).await.unwrap();
    settle().await;

    assert!(handle.get_light_card("c1").await.unwrap().is_none());
    assert_eq!(fetcher.calls(), [(100, 200), (100, 200)]);
    assert!(handle.light_cards().borrow().is_empty());
}

// =============================================================================
// Feed Output
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_sorted_and_searched_feed() {
    let (handle, _task) = engine();
    for (id, publish) in [("old", 100), ("new", 300), ("mid", 200)] {
        handle.push_frame(add(id, publish)).await.unwrap();
    }
    settle().await;
    assert_eq!(
        ids(&handle.filtered_and_sorted_light_cards().borrow()),
        ["new", "mid", "old"]
    );

    handle.set_light_card_read("new", true).await.unwrap();
    handle.set_sort_by(SortStrategy::Unread).await.unwrap();
    settle().await;
    assert_eq!(
        ids(&handle.filtered_and_sorted_light_cards().borrow()),
        ["mid", "old", "new"]
    );

    handle.set_search_term("ALERT MID").await.unwrap();
    settle().await;
    assert_eq!(
        ids(&handle.filtered_and_searched_light_cards().borrow()),
        ["mid"]
    );
    assert_eq!(handle.filtered_light_cards().borrow().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_malformed_frames_are_dropped() {
    let (handle, _task) = engine();
    handle.push_frame("{not json").await.unwrap();
    handle.push_frame(r#"{"type":"ACK"}"#).await.unwrap();
    handle.push_frame(add("c1", 1)).await.unwrap();
    settle().await;

    assert_eq!(ids(&handle.light_cards().borrow()), ["c1"]);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_stops_engine() {
    let (handle, task) = engine();
    handle.push_frame(add("c1", 1)).await.unwrap();
    handle
        .push_frame("DISCONNECT_USER_DUE_TO_NEW_CONNECTION")
        .await
        .unwrap();
    task.await.unwrap();

    assert_eq!(ids(&handle.light_cards().borrow()), ["c1"]);
    assert!(matches!(
        handle.set_sort_by(SortStrategy::Severity).await,
        Err(FeedError::ChannelClosed)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_selected_card_events() {
    let (handle, _task) = engine();
    let mut selected = handle.selected_card();
    handle.select_card(Some("c1".into())).await.unwrap();
    handle.push_frame(add("c1", 1)).await.unwrap();
    assert!(handle.get_light_card("c1").await.unwrap().is_some());
    assert_eq!(
        selected.try_recv().unwrap(),
        cardfeed::SelectedCardEvent::Updated("c1".into())
    );

    handle
        .push_frame(r#"{"type":"DELETE","cardId":"c1"}"#)
        .await
        .unwrap();
    assert!(handle.get_light_card("c1").await.unwrap().is_none());
    assert_eq!(
        selected.try_recv().unwrap(),
        cardfeed::SelectedCardEvent::Deleted("c1".into())
    );
}

#[tokio::test(start_paused = true)]
async fn test_acknowledgment_rules_through_handle() {
    let (handle, _task) = engine();
    handle.push_frame(add("c1", 1)).await.unwrap();
    settle().await;

    let card = handle.get_light_card("c1").await.unwrap().unwrap();
    let ack = handle.acknowledgment();
    let process = ack.process_of(&card);
    assert!(process.is_some());
    assert!(ack.is_acknowledgment_allowed(ack.user(), &card, process));
}
