//! Grouped cards
//!
//! After sorting, cards carrying exactly the same set of tags are collapsed:
//! the first card of each tag set stays in the feed as group head, the
//! following ones are removed from the list but remain queryable through the
//! head's tags.

use std::collections::{HashMap, HashSet};

use crate::model::LightCard;

/// Grouping computed over one sorted card list
#[derive(Debug, Clone, Default)]
pub struct GroupedCards {
    /// Grouped (non-head) cards per tag key
    by_tags: HashMap<String, Vec<LightCard>>,
    heads: Vec<LightCard>,
    grouped_ids: HashSet<String>,
}

/// Order-insensitive key of a tag list; `None` for untagged cards
pub fn tags_key(tags: &[String]) -> Option<String> {
    if tags.is_empty() {
        return None;
    }
    let mut sorted: Vec<&str> = tags.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    serde_json::to_string(&sorted).ok()
}

impl GroupedCards {
    pub fn compute(cards: &[LightCard]) -> Self {
        let mut grouped = Self::default();
        for card in cards {
            let Some(key) = tags_key(&card.tags) else {
                continue;
            };
            match grouped.by_tags.get_mut(&key) {
                Some(members) => {
                    grouped.grouped_ids.insert(card.id.clone());
                    members.push(card.clone());
                }
                None => {
                    grouped.heads.push(card.clone());
                    grouped.by_tags.insert(key, Vec::new());
                }
            }
        }
        grouped
    }

    /// Drop the grouped cards, keeping heads and ungrouped cards
    pub fn filter_grouped_children(&self, cards: Vec<LightCard>) -> Vec<LightCard> {
        cards
            .into_iter()
            .filter(|c| !self.grouped_ids.contains(&c.id))
            .collect()
    }

    pub fn is_parent_group_card(&self, card: &LightCard) -> bool {
        self.heads.iter().any(|head| head.id == card.id)
    }

    /// Cards grouped behind the head carrying `tags`
    pub fn get_child_cards_by_tags(&self, tags: &[String]) -> Vec<LightCard> {
        tags_key(tags)
            .and_then(|key| self.by_tags.get(&key))
            .cloned()
            .unwrap_or_default()
    }

    pub fn is_card_in_group(&self, child_id: &str, parent_id: &str) -> bool {
        self.heads
            .iter()
            .find(|head| head.id == parent_id)
            .is_some_and(|head| {
                self.get_child_cards_by_tags(&head.tags)
                    .iter()
                    .any(|c| c.id == child_id)
            })
    }
}
