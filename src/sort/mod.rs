//! Feed sort strategies

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::model::LightCard;

/// Comparator applied to the filtered feed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortStrategy {
    /// Unread first, then most recently published
    #[default]
    Unread,
    /// Most severe first, then most recently published
    Severity,
    StartDate,
    /// End date, or start date for cards without one
    EndDate,
    /// Most recently published first
    PublishDate,
}

impl SortStrategy {
    pub fn compare(self, a: &LightCard, b: &LightCard) -> Ordering {
        match self {
            SortStrategy::Unread => by_read(a, b).then_with(|| by_publish_date(a, b)),
            SortStrategy::Severity => a
                .severity
                .ordinal()
                .cmp(&b.severity.ordinal())
                .then_with(|| by_publish_date(a, b)),
            SortStrategy::StartDate => a.start_date.cmp(&b.start_date),
            SortStrategy::EndDate => a.end_or_start_date().cmp(&b.end_or_start_date()),
            SortStrategy::PublishDate => by_publish_date(a, b),
        }
    }

    /// Stable sort: ties keep their input order
    pub fn sort(self, cards: &mut [LightCard]) {
        cards.sort_by(|a, b| self.compare(a, b));
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SortStrategy::Unread => "unread",
            SortStrategy::Severity => "severity",
            SortStrategy::StartDate => "startDate",
            SortStrategy::EndDate => "endDate",
            SortStrategy::PublishDate => "publishDate",
        }
    }
}

fn by_read(a: &LightCard, b: &LightCard) -> Ordering {
    a.has_been_read.cmp(&b.has_been_read)
}

fn by_publish_date(a: &LightCard, b: &LightCard) -> Ordering {
    b.publish_date.cmp(&a.publish_date)
}

/// Unknown names fall back to publish date
impl FromStr for SortStrategy {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "unread" => SortStrategy::Unread,
            "severity" => SortStrategy::Severity,
            "startDate" => SortStrategy::StartDate,
            "endDate" => SortStrategy::EndDate,
            _ => SortStrategy::PublishDate,
        })
    }
}

impl fmt::Display for SortStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
