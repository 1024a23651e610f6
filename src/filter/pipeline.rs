//! Filter, search and sort pipeline
//!
//! ```text
//! card snapshot ─► filters ─► filtered ─► text search ─► searched ─► sort (+ grouping) ─► sorted
//!                     │
//!                     └─► timeline (business date filter only, or fully filtered)
//! ```
//!
//! Every input change marks the stage it invalidates; the pipeline then
//! waits `debounce` before recomputing from the earliest dirty stage, so a
//! burst of filter changes produces a single emission.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;

use super::filters::{Filter, FilterStatus, FilterType, LightCardsFilter};
use super::grouping::GroupedCards;
use super::text::TextFilter;
use crate::config::FeedConfig;
use crate::error::Result;
use crate::model::LightCard;
use crate::sort::SortStrategy;
use crate::store::CardSnapshot;

/// Pipeline stage to recompute from, latest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Stage {
    Sort,
    Search,
    Filter,
}

/// Receivers for every pipeline output
#[derive(Clone)]
pub struct PipelineOutputs {
    pub filtered: watch::Receiver<CardSnapshot>,
    pub timeline: watch::Receiver<CardSnapshot>,
    pub searched: watch::Receiver<CardSnapshot>,
    pub sorted: watch::Receiver<CardSnapshot>,
    pub grouped: watch::Receiver<Arc<GroupedCards>>,
}

pub struct FilterPipeline {
    filter: LightCardsFilter,
    text: TextFilter,
    sort: SortStrategy,
    grouped_cards: bool,
    only_business_filter_for_timeline: bool,
    cards: CardSnapshot,
    filtered: CardSnapshot,
    searched: CardSnapshot,
    debounce: Duration,
    dirty: Option<(Stage, Instant)>,
    filtered_tx: watch::Sender<CardSnapshot>,
    timeline_tx: watch::Sender<CardSnapshot>,
    searched_tx: watch::Sender<CardSnapshot>,
    sorted_tx: watch::Sender<CardSnapshot>,
    grouped_tx: watch::Sender<Arc<GroupedCards>>,
}

impl FilterPipeline {
    pub fn new(config: &FeedConfig, business_window: (i64, i64)) -> Self {
        let empty: CardSnapshot = Arc::new(Vec::new());
        let (filtered_tx, _) = watch::channel(empty.clone());
        let (timeline_tx, _) = watch::channel(empty.clone());
        let (searched_tx, _) = watch::channel(empty.clone());
        let (sorted_tx, _) = watch::channel(empty.clone());
        let (grouped_tx, _) = watch::channel(Arc::new(GroupedCards::default()));

        Self {
            filter: LightCardsFilter::new(business_window),
            text: TextFilter::new(),
            sort: SortStrategy::default(),
            grouped_cards: config.grouped_cards,
            only_business_filter_for_timeline: false,
            cards: empty.clone(),
            filtered: empty.clone(),
            searched: empty,
            debounce: config.filter_debounce,
            dirty: None,
            filtered_tx,
            timeline_tx,
            searched_tx,
            sorted_tx,
            grouped_tx,
        }
    }

    pub fn outputs(&self) -> PipelineOutputs {
        PipelineOutputs {
            filtered: self.filtered_tx.subscribe(),
            timeline: self.timeline_tx.subscribe(),
            searched: self.searched_tx.subscribe(),
            sorted: self.sorted_tx.subscribe(),
            grouped: self.grouped_tx.subscribe(),
        }
    }

    fn mark(&mut self, stage: Stage) {
        let now = Instant::now();
        self.dirty = Some(match self.dirty {
            Some((pending, _)) => (pending.max(stage), now),
            None => (stage, now),
        });
    }

    pub fn set_cards(&mut self, cards: CardSnapshot) {
        self.cards = cards;
        self.mark(Stage::Filter);
    }

    pub fn update_filter(
        &mut self,
        filter_type: FilterType,
        active: bool,
        status: FilterStatus,
    ) -> Result<()> {
        self.filter.update_filter(filter_type, active, status)?;
        self.mark(Stage::Filter);
        Ok(())
    }

    pub fn set_only_business_filter_for_timeline(&mut self, only_business: bool) {
        self.only_business_filter_for_timeline = only_business;
        self.mark(Stage::Filter);
    }

    pub fn set_search_term(&mut self, term: &str) {
        self.text.set_search_term(term);
        self.mark(Stage::Search);
    }

    pub fn set_sort_by(&mut self, sort: SortStrategy) {
        self.sort = sort;
        self.mark(Stage::Sort);
    }

    pub fn sort_by(&self) -> SortStrategy {
        self.sort
    }

    pub fn business_date_filter(&self) -> &Filter {
        self.filter.business_date_filter()
    }

    pub fn filters(&self) -> &LightCardsFilter {
        &self.filter
    }

    /// Whether the card passes every active filter and the search
    pub fn is_card_visible_in_feed(&self, card: &LightCard) -> bool {
        self.filter.accepts(card) && self.text.matches(card)
    }

    /// When the pending recomputation is due
    pub fn deadline(&self) -> Option<Instant> {
        self.dirty.map(|(_, at)| at + self.debounce)
    }

    /// Recompute if the debounce deadline has passed
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.deadline() {
            Some(deadline) if deadline <= now => {
                self.flush();
                true
            }
            _ => false,
        }
    }

    /// Recompute the dirty stages immediately
    pub fn flush(&mut self) {
        let Some((stage, _)) = self.dirty.take() else {
            return;
        };
        if stage >= Stage::Filter {
            self.compute_filtered();
        }
        if stage >= Stage::Search {
            self.compute_searched();
        }
        self.compute_sorted();
    }

    fn compute_filtered(&mut self) {
        debug!(cards = self.cards.len(), "Number of cards in memory");

        let (timeline, filtered) = if self.only_business_filter_for_timeline {
            let by_business_date = self.filter.filter_light_cards_only_by_business_date(&self.cards);
            let filtered = self
                .filter
                .filter_light_cards_without_business_date(&by_business_date);
            (Arc::new(by_business_date), Arc::new(filtered))
        } else {
            let filtered = Arc::new(self.filter.filter_light_cards(&self.cards));
            (filtered.clone(), filtered)
        };

        self.timeline_tx.send_replace(timeline);
        self.filtered = filtered.clone();
        self.filtered_tx.send_replace(filtered);
    }

    fn compute_searched(&mut self) {
        let searched = Arc::new(self.text.search_light_cards(&self.filtered));
        debug!(
            cards = searched.len(),
            "Number of cards visible after filtering and searching"
        );
        self.searched = searched.clone();
        self.searched_tx.send_replace(searched);
    }

    fn compute_sorted(&mut self) {
        let mut sorted = self.searched.as_ref().clone();
        self.sort.sort(&mut sorted);

        if self.grouped_cards {
            let grouped = GroupedCards::compute(&sorted);
            sorted = grouped.filter_grouped_children(sorted);
            self.grouped_tx.send_replace(Arc::new(grouped));
        }
        self.sorted_tx.send_replace(Arc::new(sorted));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{AckFilter, DateRange};

    fn card(id: &str, publish: i64) -> LightCard {
        LightCard {
            id: id.into(),
            publish_date: publish,
            start_date: publish,
            title_translated: Some(format!("Card {id}")),
            ..Default::default()
        }
    }

    fn cards() -> CardSnapshot {
        let mut acked = card("acked", 400);
        acked.has_been_acknowledged = true;
        Arc::new(vec![card("a", 100), card("b", 300), card("c", 200), acked])
    }

    fn ids(snapshot: &CardSnapshot) -> Vec<String> {
        snapshot.iter().map(|c| c.id.clone()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_recompute_is_debounced() {
        let mut pipeline = FilterPipeline::new(&FeedConfig::default(), (0, 1_000));
        let outputs = pipeline.outputs();

        pipeline.set_cards(cards());
        pipeline.set_search_term("card");
        let deadline = pipeline.deadline().unwrap();
        assert!(!pipeline.poll(Instant::now()));

        tokio::time::sleep_until(deadline).await;
        assert!(pipeline.poll(Instant::now()));
        assert_eq!(ids(&outputs.sorted.borrow()), ["b", "c", "a"]);
        assert_eq!(pipeline.deadline(), None);
    }

    #[test]
    fn test_sort_change_reemits() {
        let mut pipeline = FilterPipeline::new(&FeedConfig::default(), (0, 1_000));
        let outputs = pipeline.outputs();
        pipeline.set_cards(cards());
        pipeline.flush();

        pipeline.set_sort_by(SortStrategy::StartDate);
        pipeline.flush();
        assert_eq!(ids(&outputs.sorted.borrow()), ["a", "c", "b"]);
        assert_eq!(ids(&outputs.filtered.borrow()), ["a", "b", "c"]);
    }

    #[test]
    fn test_search_applies_after_filters() {
        let mut pipeline = FilterPipeline::new(&FeedConfig::default(), (0, 1_000));
        let outputs = pipeline.outputs();
        pipeline.set_cards(cards());
        pipeline.set_search_term("card b");
        pipeline.flush();

        assert_eq!(ids(&outputs.searched.borrow()), ["b"]);
        assert_eq!(outputs.filtered.borrow().len(), 3);

        pipeline
            .update_filter(
                FilterType::Acknowledgement,
                true,
                FilterStatus::Acknowledgement(AckFilter::All),
            )
            .unwrap();
        pipeline.set_search_term("");
        pipeline.flush();
        assert_eq!(outputs.sorted.borrow().len(), 4);
    }

    #[test]
    fn test_timeline_only_business_mode() {
        let mut pipeline = FilterPipeline::new(&FeedConfig::default(), (0, 1_000));
        let outputs = pipeline.outputs();
        pipeline
            .update_filter(
                FilterType::BusinessDate,
                true,
                FilterStatus::BusinessDate(DateRange::new(150, 1_000)),
            )
            .unwrap();
        pipeline.set_cards(cards());
        pipeline.flush();
        // Both outputs fully filtered
        assert_eq!(ids(&outputs.timeline.borrow()), ["b", "c"]);

        pipeline.set_only_business_filter_for_timeline(true);
        pipeline.flush();
        assert_eq!(ids(&outputs.timeline.borrow()), ["b", "c", "acked"]);
        assert_eq!(ids(&outputs.filtered.borrow()), ["b", "c"]);
    }

    #[test]
    fn test_grouped_cards() {
        let config = FeedConfig::default().with_grouped_cards();
        let mut pipeline = FilterPipeline::new(&config, (0, 1_000));
        let outputs = pipeline.outputs();

        let mut a = card("a", 100);
        a.tags = vec!["line-1".into()];
        let mut b = card("b", 300);
        b.tags = vec!["line-1".into()];
        pipeline.set_cards(Arc::new(vec![a.clone(), b.clone(), card("c", 200)]));
        pipeline.flush();

        assert_eq!(ids(&outputs.sorted.borrow()), ["b", "c"]);
        let grouped = outputs.grouped.borrow().clone();
        assert!(grouped.is_parent_group_card(&b));
        assert!(grouped.is_card_in_group("a", "b"));
    }

    #[test]
    fn test_card_visibility() {
        let mut pipeline = FilterPipeline::new(&FeedConfig::default(), (0, 1_000));
        pipeline.set_search_term("card a");
        assert!(pipeline.is_card_visible_in_feed(&card("a", 100)));
        assert!(!pipeline.is_card_visible_in_feed(&card("b", 100)));

        let mut acked = card("a", 100);
        acked.has_been_acknowledged = true;
        assert!(!pipeline.is_card_visible_in_feed(&acked));
    }
}
