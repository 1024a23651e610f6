//! Feed filters
//!
//! Five regular filters plus the business date filter, which is kept apart
//! because the timeline can be fed by it alone. A card is kept when it
//! passes every active filter; an inactive filter lets everything through.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{FeedError, Result};
use crate::model::{LightCard, Severity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FilterType {
    Type,
    PublishDate,
    Acknowledgement,
    Response,
    Process,
    BusinessDate,
}

/// Severities shown by the type filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityStatus {
    pub alarm: bool,
    pub action: bool,
    pub compliant: bool,
    pub information: bool,
}

impl Default for SeverityStatus {
    fn default() -> Self {
        Self {
            alarm: true,
            action: true,
            compliant: true,
            information: true,
        }
    }
}

impl SeverityStatus {
    pub fn shows(&self, severity: Severity) -> bool {
        match severity {
            Severity::Alarm => self.alarm,
            Severity::Action => self.action,
            Severity::Compliant => self.compliant,
            Severity::Information => self.information,
        }
    }
}

/// Optional bounds in epoch milliseconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Option<i64>,
    pub end: Option<i64>,
}

impl DateRange {
    pub fn new(start: i64, end: i64) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }
}

/// Which acknowledgment state the acknowledgement filter keeps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckFilter {
    Acknowledged,
    NotAcknowledged,
    All,
}

/// Process, optionally narrowed to one state written as `process.state`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessStatus {
    pub process: Option<String>,
    pub state: Option<String>,
}

/// Filter parameters; the variant names the filter it applies to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "filter", content = "status", rename_all = "snake_case")]
pub enum FilterStatus {
    Type(SeverityStatus),
    PublishDate(DateRange),
    Acknowledgement(AckFilter),
    /// Whether cards already answered by one of the user's entities are shown
    Response(bool),
    Process(ProcessStatus),
    BusinessDate(DateRange),
}

impl FilterStatus {
    pub fn filter_type(&self) -> FilterType {
        match self {
            FilterStatus::Type(_) => FilterType::Type,
            FilterStatus::PublishDate(_) => FilterType::PublishDate,
            FilterStatus::Acknowledgement(_) => FilterType::Acknowledgement,
            FilterStatus::Response(_) => FilterType::Response,
            FilterStatus::Process(_) => FilterType::Process,
            FilterStatus::BusinessDate(_) => FilterType::BusinessDate,
        }
    }

    fn accepts(&self, card: &LightCard) -> bool {
        match self {
            FilterStatus::Type(status) => status.shows(card.severity),
            FilterStatus::PublishDate(range) => in_publish_range(card, range),
            FilterStatus::Acknowledgement(ack) => match ack {
                AckFilter::Acknowledged => card.has_been_acknowledged,
                AckFilter::NotAcknowledged => !card.has_been_acknowledged,
                AckFilter::All => true,
            },
            FilterStatus::Response(show_answered) => {
                *show_answered || !card.has_child_card_from_current_user_entity
            }
            FilterStatus::Process(status) => matches_process(card, status),
            FilterStatus::BusinessDate(range) => in_business_range(card, range),
        }
    }
}

fn in_publish_range(card: &LightCard, range: &DateRange) -> bool {
    match (range.start, range.end) {
        (Some(start), Some(end)) => start <= card.publish_date && card.publish_date <= end,
        (Some(start), None) => start <= card.publish_date,
        (None, Some(end)) => card.publish_date <= end,
        (None, None) => true,
    }
}

fn matches_process(card: &LightCard, status: &ProcessStatus) -> bool {
    match (&status.process, &status.state) {
        (Some(process), Some(state)) => {
            *process == card.process && *state == format!("{}.{}", card.process, card.state)
        }
        (Some(process), None) => *process == card.process,
        _ => true,
    }
}

/// A card is in the business period when it was published in it or its
/// validity window `[startDate, endDate]` touches it.
fn in_business_range(card: &LightCard, range: &DateRange) -> bool {
    match (range.start, range.end) {
        (Some(start), Some(end)) => visible_in_range(card, start, end),
        (Some(start), None) => {
            card.publish_date >= start
                || match card.end_date {
                    None => card.start_date >= start,
                    Some(end_date) => start <= end_date,
                }
        }
        (None, Some(end)) => card.publish_date <= end || card.start_date <= end,
        (None, None) => {
            warn!("Unexpected business date filter situation");
            false
        }
    }
}

fn visible_in_range(card: &LightCard, start: i64, end: i64) -> bool {
    let within = |date: i64| start <= date && date <= end;

    if within(card.publish_date) {
        return true;
    }
    match card.end_date {
        None => within(card.start_date),
        Some(end_date) => {
            within(card.start_date)
                || within(end_date)
                || (card.start_date <= start && end <= end_date)
        }
    }
}

/// One filter with its activation flag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub active: bool,
    pub status: FilterStatus,
}

impl Filter {
    pub fn new(active: bool, status: FilterStatus) -> Self {
        Self { active, status }
    }

    pub fn filter_type(&self) -> FilterType {
        self.status.filter_type()
    }

    /// True when the card passes, always true when inactive
    pub fn apply(&self, card: &LightCard) -> bool {
        !self.active || self.status.accepts(card)
    }
}

/// The set of feed filters
#[derive(Debug, Clone)]
pub struct LightCardsFilter {
    filters: Vec<Filter>,
    business_date: Filter,
}

impl LightCardsFilter {
    /// Default filters, with the business window computed around `now_ms`
    pub fn new(business_window: (i64, i64)) -> Self {
        let (start, end) = business_window;
        Self {
            filters: vec![
                Filter::new(true, FilterStatus::Type(SeverityStatus::default())),
                Filter::new(false, FilterStatus::PublishDate(DateRange::default())),
                Filter::new(true, FilterStatus::Acknowledgement(AckFilter::NotAcknowledged)),
                Filter::new(false, FilterStatus::Response(true)),
                Filter::new(false, FilterStatus::Process(ProcessStatus::default())),
            ],
            business_date: Filter::new(false, FilterStatus::BusinessDate(DateRange::new(start, end))),
        }
    }

    /// Replace the activation and parameters of one filter
    pub fn update_filter(
        &mut self,
        filter_type: FilterType,
        active: bool,
        status: FilterStatus,
    ) -> Result<()> {
        if status.filter_type() != filter_type {
            return Err(FeedError::Config(format!(
                "status {:?} does not apply to filter {:?}",
                status.filter_type(),
                filter_type
            )));
        }
        debug!(filter = ?filter_type, active, status = ?status, "Filter change");

        let filter = if filter_type == FilterType::BusinessDate {
            &mut self.business_date
        } else {
            match self.filters.iter_mut().find(|f| f.filter_type() == filter_type) {
                Some(filter) => filter,
                None => return Ok(()),
            }
        };
        filter.active = active;
        filter.status = status;
        Ok(())
    }

    /// Whether the card passes the business date filter and every other one
    pub fn accepts(&self, card: &LightCard) -> bool {
        self.business_date.apply(card) && self.accepts_without_business_date(card)
    }

    pub fn accepts_without_business_date(&self, card: &LightCard) -> bool {
        self.filters.iter().all(|f| f.apply(card))
    }

    pub fn filter_light_cards(&self, cards: &[LightCard]) -> Vec<LightCard> {
        cards.iter().filter(|c| self.accepts(c)).cloned().collect()
    }

    pub fn filter_light_cards_only_by_business_date(&self, cards: &[LightCard]) -> Vec<LightCard> {
        cards
            .iter()
            .filter(|c| self.business_date.apply(c))
            .cloned()
            .collect()
    }

    pub fn filter_light_cards_without_business_date(&self, cards: &[LightCard]) -> Vec<LightCard> {
        cards
            .iter()
            .filter(|c| self.accepts_without_business_date(c))
            .cloned()
            .collect()
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    pub fn business_date_filter(&self) -> &Filter {
        &self.business_date
    }
}
