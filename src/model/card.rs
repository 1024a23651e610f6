//! Light card model
//!
//! A light card is the summarized record shown in the feed. Child (response)
//! cards share the same shape and point at their parent via `parent_card_id`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Card severity, ordered from most to least urgent
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Alarm,
    Action,
    Compliant,
    #[default]
    Information,
}

impl Severity {
    /// Rank used by the severity sort: ALARM first, INFORMATION last
    pub fn ordinal(self) -> u8 {
        match self {
            Severity::Alarm => 0,
            Severity::Action => 1,
            Severity::Compliant => 2,
            Severity::Information => 3,
        }
    }
}

/// Kind of publisher that emitted a card
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PublisherType {
    Entity,
    User,
    External,
}

/// Behavior flags a publisher can attach to a card
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CardAction {
    PropagateReadAckToParentCard,
    KeepChildCards,
    KeepExistingAcksAndReads,
    KeepExistingPublishDate,
    StoreOnlyInArchives,
    NotNotified,
    #[serde(other)]
    Unknown,
}

/// Summarized card as delivered by the subscription stream
///
/// Dates are epoch milliseconds. The three trailing flags are derived by the
/// store on every upsert; whatever the server sent for them is only an input.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LightCard {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub uid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_card_id: Option<String>,
    #[serde(default)]
    pub process: String,
    #[serde(default)]
    pub process_version: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub publish_date: i64,
    #[serde(default)]
    pub start_date: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lttd: Option<i64>,
    #[serde(default)]
    pub publisher: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher_type: Option<PublisherType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title_translated: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary_translated: Option<String>,
    #[serde(default)]
    pub entity_recipients: Vec<String>,
    #[serde(default)]
    pub entities_allowed_to_respond: Vec<String>,
    #[serde(default)]
    pub entities_required_to_respond: Vec<String>,
    #[serde(default)]
    pub entities_acks: BTreeSet<String>,
    #[serde(default)]
    pub actions: Vec<CardAction>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub has_been_acknowledged: bool,
    #[serde(default)]
    pub has_been_read: bool,
    #[serde(default)]
    pub has_child_card_from_current_user_entity: bool,
}

impl LightCard {
    /// Whether the card declares the given behavior flag
    pub fn has_action(&self, action: CardAction) -> bool {
        self.actions.contains(&action)
    }

    /// Child cards carry the id of the card they respond to; an empty id
    /// means a root card
    pub fn is_child(&self) -> bool {
        self.parent_card_id
            .as_deref()
            .is_some_and(|parent| !parent.is_empty())
    }

    /// End of the business window, falling back to the start date
    pub fn end_or_start_date(&self) -> i64 {
        self.end_date.unwrap_or(self.start_date)
    }

    /// Whether the response deadline has passed at `now_ms`
    pub fn is_lttd_expired(&self, now_ms: i64) -> bool {
        self.lttd.is_some_and(|lttd| lttd <= now_ms)
    }
}
