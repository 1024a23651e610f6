//! In-memory light card store
//!
//! Applies card operations to the root card map and the child card lists,
//! derives the per-user flags, and publishes two kinds of output:
//!
//! - per-event broadcasts (new card, new child card, deleted child, ack
//!   transition, selected card), sent as each operation is applied;
//! - the card list snapshot, published through [`SnapshotThrottle`].
//!
//! The store is owned by a single task; readers only see clones.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tracing::{debug, info};

use super::throttle::SnapshotThrottle;
use crate::ack::AcknowledgmentEngine;
use crate::config::FeedConfig;
use crate::model::{CardAction, CardOperation, LightCard};
use crate::stream::CardEventIngestor;

/// Shared, immutable card list as published to consumers
pub type CardSnapshot = Arc<Vec<LightCard>>;

/// A child card removed from its parent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedChildCard {
    pub card_id: String,
    pub parent_card_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AckOperation {
    Ack,
    Unack,
}

/// Acknowledgment change received from the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckEvent {
    pub card_uid: Option<String>,
    pub entities_acks: Vec<String>,
    pub operation: AckOperation,
}

/// Change affecting the card currently displayed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "cardId", rename_all = "snake_case")]
pub enum SelectedCardEvent {
    /// A new version of the card arrived
    Updated(String),
    /// The card was deleted while displayed
    Deleted(String),
}

pub struct LightCardStore {
    cards: BTreeMap<String, LightCard>,
    children: HashMap<String, Vec<LightCard>>,
    /// Parents that got an own-entity child before they arrived themselves
    orphan_parents: HashSet<String>,
    selected_card_id: Option<String>,
    ack: AcknowledgmentEngine,
    throttle: SnapshotThrottle,
    snapshot_tx: watch::Sender<CardSnapshot>,
    new_card_tx: broadcast::Sender<LightCard>,
    new_child_tx: broadcast::Sender<LightCard>,
    deleted_child_tx: broadcast::Sender<DeletedChildCard>,
    ack_tx: broadcast::Sender<AckEvent>,
    selected_tx: broadcast::Sender<SelectedCardEvent>,
}

impl LightCardStore {
    pub fn new(ack: AcknowledgmentEngine, config: &FeedConfig) -> Self {
        let capacity = config.channel_capacity;
        let (snapshot_tx, _) = watch::channel(Arc::new(Vec::new()));
        let (new_card_tx, _) = broadcast::channel(capacity);
        let (new_child_tx, _) = broadcast::channel(capacity);
        let (deleted_child_tx, _) = broadcast::channel(capacity);
        let (ack_tx, _) = broadcast::channel(capacity);
        let (selected_tx, _) = broadcast::channel(capacity);

        Self {
            cards: BTreeMap::new(),
            children: HashMap::new(),
            orphan_parents: HashSet::new(),
            selected_card_id: None,
            ack,
            throttle: SnapshotThrottle::from_config(config),
            snapshot_tx,
            new_card_tx,
            new_child_tx,
            deleted_child_tx,
            ack_tx,
            selected_tx,
        }
    }

    /// Apply one operation from the stream
    pub fn apply(&mut self, operation: CardOperation) {
        match operation {
            CardOperation::Add(card) => {
                info!(
                    card_id = %card.id,
                    publish_date = %crate::stream::format_epoch_ms(card.publish_date),
                    "Receive card to add"
                );
                self.apply_add(card);
            }
            CardOperation::Delete { card_id } => {
                info!(card_id = %card_id, "Receive card to delete");
                self.apply_delete(&card_id);
            }
            CardOperation::Ack {
                card_id,
                card_uid,
                entities_acks,
            } => {
                info!(card_id = %card_id, card_uid = ?card_uid, "Receive ack on card");
                self.apply_ack(&card_id, card_uid, entities_acks);
            }
            CardOperation::Unack {
                card_id,
                card_uid,
                entities_acks,
            } => {
                info!(card_id = %card_id, card_uid = ?card_uid, "Receive unack on card");
                self.apply_unack(&card_id, card_uid, entities_acks);
            }
        }
    }

    /// Insert or replace a card, root or child
    pub fn apply_add(&mut self, card: LightCard) {
        if card.id.is_empty() {
            debug!("Ignoring card without id");
            return;
        }
        let selected = self.selected_card_id.as_deref() == Some(card.id.as_str());
        let id = card.id.clone();

        if card.is_child() {
            self.add_child_card(card);
        } else {
            self.add_root_card(card);
        }

        if selected {
            let _ = self.selected_tx.send(SelectedCardEvent::Updated(id));
        }
    }

    fn add_child_card(&mut self, card: LightCard) {
        let Some(parent_id) = card.parent_card_id.clone() else {
            return;
        };

        let siblings = self.children.entry(parent_id.clone()).or_default();
        siblings.retain(|child| child.id != card.id);
        siblings.push(card.clone());

        self.unread_and_unack_parent_if_needed(&parent_id, &card);

        if self.is_from_current_user_entity(&card) {
            let parent = self.cards.get_mut(&parent_id).map(|parent| {
                parent.has_child_card_from_current_user_entity = true;
                parent.clone()
            });
            match parent {
                Some(parent) => self.publish_root(parent),
                None => {
                    debug!(parent_id = %parent_id, "Own-entity child received before its parent");
                    self.orphan_parents.insert(parent_id);
                }
            }
        }

        let _ = self.new_child_tx.send(card);
    }

    fn unread_and_unack_parent_if_needed(&mut self, parent_id: &str, child: &LightCard) {
        if !child.has_action(CardAction::PropagateReadAckToParentCard) {
            return;
        }
        let Some(parent) = self.cards.get(parent_id) else {
            return;
        };
        let (parent_read, parent_acked) = (parent.has_been_read, parent.has_been_acknowledged);

        if parent_read && !child.has_been_read {
            self.set_light_card_read(parent_id, false);
        }
        if parent_acked && !self.ack.has_been_acknowledged_by_user_or_entity(child) {
            self.set_light_card_acknowledgment(parent_id, false);
        }
    }

    fn add_root_card(&mut self, mut card: LightCard) {
        card.has_child_card_from_current_user_entity = match self.cards.get(&card.id) {
            Some(previous) => {
                card.has_action(CardAction::KeepChildCards)
                    && previous.has_child_card_from_current_user_entity
            }
            None => self.orphan_parents.remove(&card.id),
        };
        card.has_been_acknowledged = self.compute_acknowledged(&card);
        card.has_been_read = self.compute_read(&card);
        self.publish_root(card);
    }

    fn publish_root(&mut self, card: LightCard) {
        self.cards.insert(card.id.clone(), card.clone());
        let _ = self.new_card_tx.send(card);
        self.record_mutation();
    }

    /// Acknowledged per the engine, unless a propagating child is not
    fn compute_acknowledged(&self, card: &LightCard) -> bool {
        self.ack.has_been_acknowledged_by_user_or_entity(card)
            && !self.propagating_children(&card.id).any(|child| {
                !self.ack.has_been_acknowledged_by_user_or_entity(child)
            })
    }

    fn compute_read(&self, card: &LightCard) -> bool {
        card.has_been_read
            && !self
                .propagating_children(&card.id)
                .any(|child| !child.has_been_read)
    }

    fn propagating_children<'a>(&'a self, parent_id: &str) -> impl Iterator<Item = &'a LightCard> {
        self.children
            .get(parent_id)
            .into_iter()
            .flatten()
            .filter(|child| child.has_action(CardAction::PropagateReadAckToParentCard))
    }

    fn is_from_current_user_entity(&self, card: &LightCard) -> bool {
        self.ack.user().is_member_of(&card.publisher)
    }

    /// Remove a root card with its children, or a single child card
    pub fn apply_delete(&mut self, card_id: &str) {
        if self.selected_card_id.as_deref() == Some(card_id) {
            let _ = self
                .selected_tx
                .send(SelectedCardEvent::Deleted(card_id.to_string()));
        }

        if self.cards.remove(card_id).is_some() {
            self.children.remove(card_id);
        } else {
            self.remove_child_card(card_id);
        }
        self.record_mutation();
    }

    fn remove_child_card(&mut self, card_id: &str) {
        let mut removed = Vec::new();
        for (parent_id, siblings) in self.children.iter_mut() {
            if let Some(index) = siblings.iter().position(|child| child.id == card_id) {
                removed.push((parent_id.clone(), siblings.remove(index)));
            }
        }

        if removed.is_empty() {
            debug!(card_id = %card_id, "Delete for unknown card");
        }

        for (parent_id, child) in removed {
            let _ = self.deleted_child_tx.send(DeletedChildCard {
                card_id: card_id.to_string(),
                parent_card_id: parent_id.clone(),
            });

            if !self.is_from_current_user_entity(&child) || self.has_own_entity_child(&parent_id) {
                continue;
            }
            match self.cards.get_mut(&parent_id) {
                Some(parent) => parent.has_child_card_from_current_user_entity = false,
                None => {
                    self.orphan_parents.remove(&parent_id);
                }
            }
        }
    }

    fn has_own_entity_child(&self, parent_id: &str) -> bool {
        self.children
            .get(parent_id)
            .is_some_and(|siblings| siblings.iter().any(|c| self.is_from_current_user_entity(c)))
    }

    pub fn apply_ack(&mut self, card_id: &str, card_uid: Option<String>, entities_acks: Vec<String>) {
        if let Some(mut card) = self.cards.remove(card_id) {
            card.entities_acks.extend(entities_acks.iter().cloned());
            card.has_been_acknowledged = self.compute_acknowledged(&card);
            self.cards.insert(card.id.clone(), card);
            self.record_mutation();
        }
        let _ = self.ack_tx.send(AckEvent {
            card_uid,
            entities_acks,
            operation: AckOperation::Ack,
        });
    }

    pub fn apply_unack(&mut self, card_id: &str, card_uid: Option<String>, entities_acks: Vec<String>) {
        if let Some(mut card) = self.cards.remove(card_id) {
            for entity in &entities_acks {
                card.entities_acks.remove(entity);
            }
            card.has_been_acknowledged = self.compute_acknowledged(&card);
            self.cards.insert(card.id.clone(), card);
            self.record_mutation();
        }
        let _ = self.ack_tx.send(AckEvent {
            card_uid,
            entities_acks,
            operation: AckOperation::Unack,
        });
    }

    pub fn set_light_card_read(&mut self, card_id: &str, read: bool) {
        if let Some(card) = self.cards.get_mut(card_id) {
            card.has_been_read = read;
            self.record_mutation();
        }
    }

    /// Set the flag, then recompute it so quorum mode cannot drift
    pub fn set_light_card_acknowledgment(&mut self, card_id: &str, acknowledged: bool) {
        if let Some(mut card) = self.cards.remove(card_id) {
            card.has_been_acknowledged = acknowledged;
            card.has_been_acknowledged = self.compute_acknowledged(&card);
            self.cards.insert(card.id.clone(), card);
            self.record_mutation();
        }
    }

    pub fn get_light_card(&self, card_id: &str) -> Option<LightCard> {
        self.cards.get(card_id).cloned()
    }

    /// Children of a card, in arrival order
    pub fn get_child_cards(&self, parent_card_id: &str) -> Vec<LightCard> {
        self.children.get(parent_card_id).cloned().unwrap_or_default()
    }

    pub fn get_all_child_cards(&self) -> HashMap<String, Vec<LightCard>> {
        self.children.clone()
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    /// Track the card shown in the detail view
    pub fn select_card(&mut self, card_id: Option<String>) {
        self.selected_card_id = card_id;
    }

    pub fn selected_card_id(&self) -> Option<&str> {
        self.selected_card_id.as_deref()
    }

    /// Clear every card and let the ingestor reload the period from scratch
    pub fn reset(&mut self, ingestor: &mut CardEventIngestor) {
        info!(cards = self.cards.len(), "Removing all light cards");
        ingestor.reset_period();
        self.cards.clear();
        self.children.clear();
        self.orphan_parents.clear();
        self.record_mutation();
    }

    /// Current card list, materialized on demand
    pub fn snapshot(&self) -> CardSnapshot {
        Arc::new(self.cards.values().cloned().collect())
    }

    fn record_mutation(&mut self) {
        self.throttle.record_mutation(Instant::now());
    }

    pub fn next_snapshot_deadline(&self) -> Option<Instant> {
        self.throttle.debounce_deadline()
    }

    /// Publish a snapshot if the debounce deadline passed
    pub fn flush_due_snapshot(&mut self, now: Instant) -> Option<CardSnapshot> {
        self.throttle
            .poll_debounce(now)
            .then(|| self.publish_snapshot())
    }

    /// Publish a snapshot if the sampling tick decides so
    pub fn on_sample_tick(&mut self, now: Instant) -> Option<CardSnapshot> {
        self.throttle.on_tick(now).then(|| self.publish_snapshot())
    }

    /// Publish the current list regardless of the throttle
    pub fn force_snapshot(&mut self) -> CardSnapshot {
        self.throttle.clear();
        self.publish_snapshot()
    }

    pub fn sample_interval(&self) -> std::time::Duration {
        self.throttle.sample_interval()
    }

    fn publish_snapshot(&mut self) -> CardSnapshot {
        let snapshot = self.snapshot();
        debug!(cards = snapshot.len(), "Publishing light cards snapshot");
        self.snapshot_tx.send_replace(snapshot.clone());
        snapshot
    }

    pub fn subscribe_snapshots(&self) -> watch::Receiver<CardSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn subscribe_new_cards(&self) -> broadcast::Receiver<LightCard> {
        self.new_card_tx.subscribe()
    }

    pub fn subscribe_new_child_cards(&self) -> broadcast::Receiver<LightCard> {
        self.new_child_tx.subscribe()
    }

    pub fn subscribe_deleted_child_cards(&self) -> broadcast::Receiver<DeletedChildCard> {
        self.deleted_child_tx.subscribe()
    }

    pub fn subscribe_acks(&self) -> broadcast::Receiver<AckEvent> {
        self.ack_tx.subscribe()
    }

    pub fn subscribe_selected_card(&self) -> broadcast::Receiver<SelectedCardEvent> {
        self.selected_tx.subscribe()
    }
}
