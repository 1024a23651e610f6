//! Acknowledgment rules
//!
//! Decides whether a user may acknowledge a card and whether a card counts as
//! acknowledged for the current user. Two policies exist per process state:
//!
//! - `USER_HAS_ACKNOWLEDGED`: the per-user flag stored on the card is final.
//! - `ALL_ENTITIES_OF_USER_HAVE_ACKNOWLEDGED` (quorum): the card is
//!   acknowledged only once every card-sending entity of the user that is a
//!   recipient of the card appears in `entities_acks`.
//!
//! Everything here is a pure function of the card, the user and the two
//! directories; nothing is cached.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use crate::model::{
    AcknowledgmentAllowed, ConsideredAcknowledgedForUserWhen, CurrentUser, Entity, LightCard,
    Process, PublisherType,
};
use crate::traits::{EntityDirectory, ProcessDirectory};

/// Acknowledgment decisions for one logged-in user
#[derive(Clone)]
pub struct AcknowledgmentEngine {
    user: Arc<CurrentUser>,
    processes: Arc<dyn ProcessDirectory>,
    entities: Arc<dyn EntityDirectory>,
}

impl AcknowledgmentEngine {
    pub fn new(
        user: CurrentUser,
        processes: Arc<dyn ProcessDirectory>,
        entities: Arc<dyn EntityDirectory>,
    ) -> Self {
        Self {
            user: Arc::new(user),
            processes,
            entities,
        }
    }

    pub fn user(&self) -> &CurrentUser {
        &self.user
    }

    /// Process definition the card was published under
    pub fn process_of(&self, card: &LightCard) -> Option<&Process> {
        self.processes.process(&card.process, &card.process_version)
    }

    /// Whether `user` may acknowledge `card`
    pub fn is_acknowledgment_allowed(
        &self,
        user: &CurrentUser,
        card: &LightCard,
        process: Option<&Process>,
    ) -> bool {
        self.is_acknowledgment_allowed_at(user, card, process, now_ms())
    }

    /// Same as [`is_acknowledgment_allowed`](Self::is_acknowledgment_allowed) at a fixed clock
    pub fn is_acknowledgment_allowed_at(
        &self,
        user: &CurrentUser,
        card: &LightCard,
        process: Option<&Process>,
        now_ms: i64,
    ) -> bool {
        let Some(process) = process else {
            return true;
        };
        let Some(policy) = process
            .state(&card.state)
            .and_then(|state| state.acknowledgment_allowed)
        else {
            return true;
        };

        match policy {
            AcknowledgmentAllowed::Never => false,
            AcknowledgmentAllowed::Always => true,
            AcknowledgmentAllowed::OnlyWhenResponseDisabledForUser => {
                user.is_read_only()
                    || !self.is_user_enabled_to_respond_at(user, card, process, now_ms)
                    || card.is_lttd_expired(now_ms)
            }
        }
    }

    /// Whether `user` can answer `card` with a response card
    pub fn is_user_enabled_to_respond(
        &self,
        user: &CurrentUser,
        card: &LightCard,
        process: &Process,
    ) -> bool {
        self.is_user_enabled_to_respond_at(user, card, process, now_ms())
    }

    pub fn is_user_enabled_to_respond_at(
        &self,
        user: &CurrentUser,
        card: &LightCard,
        process: &Process,
        now_ms: i64,
    ) -> bool {
        if card.is_lttd_expired(now_ms) {
            return false;
        }
        !self
            .user_entities_allowed_to_respond(user, card, process)
            .is_empty()
            && has_perimeter_to_respond(user, card, process)
    }

    /// The user's entities that are entitled to respond to `card`
    pub fn user_entities_allowed_to_respond(
        &self,
        user: &CurrentUser,
        card: &LightCard,
        process: &Process,
    ) -> Vec<String> {
        let candidates: Vec<&Entity> = card
            .entities_allowed_to_respond
            .iter()
            .chain(&card.entities_required_to_respond)
            .filter_map(|id| self.entities.entity(id))
            .collect();

        let emitting_entity_allowed = process
            .state(&card.state)
            .and_then(|state| state.response.as_ref())
            .is_some_and(|response| response.emitting_entity_allowed_to_respond);

        let allowed: Vec<String> = self
            .resolve_entities_allowed_to_send_cards(&candidates)
            .into_iter()
            .filter(|id| *id != card.publisher || emitting_entity_allowed)
            .collect();
        debug!(card_id = %card.id, allowed = ?allowed, "Entities allowed to respond");

        allowed
            .into_iter()
            .filter(|id| user.is_member_of(id))
            .collect()
    }

    /// Whether the entity holds the card sender role
    pub fn is_entity_allowed_to_send_card(&self, entity_id: &str) -> bool {
        self.entities
            .entity(entity_id)
            .is_some_and(Entity::is_card_sender)
    }

    /// Resolve a selection of entities to the ones that can act on cards.
    ///
    /// Card senders are kept as is; any other entity is replaced by its
    /// descendants that are card senders. Result ids are unique, in
    /// first-seen order.
    pub fn resolve_entities_allowed_to_send_cards(&self, selected: &[&Entity]) -> Vec<String> {
        let mut allowed = Vec::new();
        let mut seen = HashSet::new();
        let mut visited = HashSet::new();
        self.collect_card_senders(selected, &mut allowed, &mut seen, &mut visited);
        allowed
    }

    fn collect_card_senders(
        &self,
        selected: &[&Entity],
        allowed: &mut Vec<String>,
        seen: &mut HashSet<String>,
        visited: &mut HashSet<String>,
    ) {
        for entity in selected {
            if entity.is_card_sender() {
                if seen.insert(entity.id.clone()) {
                    allowed.push(entity.id.clone());
                }
            } else if visited.insert(entity.id.clone()) {
                let children = self.entities.children_of(&entity.id);
                self.collect_card_senders(&children, allowed, seen, visited);
            }
        }
    }

    /// Acknowledgment policy of the card's process state
    pub fn considered_acknowledged_for_user_when(
        &self,
        card: &LightCard,
    ) -> ConsideredAcknowledgedForUserWhen {
        self.process_of(card)
            .and_then(|process| process.state(&card.state))
            .and_then(|state| state.considered_acknowledged_for_user_when)
            .unwrap_or_default()
    }

    /// Whether `card` counts as acknowledged for the current user
    pub fn has_been_acknowledged_by_user_or_entity(&self, card: &LightCard) -> bool {
        let policy = self.considered_acknowledged_for_user_when(card);

        if self.is_user_mode(card, policy) {
            return card.has_been_acknowledged;
        }
        self.has_been_acknowledged_by_user_entity(card, policy)
    }

    fn is_user_mode(&self, card: &LightCard, policy: ConsideredAcknowledgedForUserWhen) -> bool {
        policy == ConsideredAcknowledgedForUserWhen::UserHasAcknowledged
            || self.user.is_read_only()
            || card.entity_recipients.is_empty()
            || !card
                .entity_recipients
                .iter()
                .any(|id| self.is_own_card_sender(id))
    }

    fn has_been_acknowledged_by_user_entity(
        &self,
        card: &LightCard,
        policy: ConsideredAcknowledgedForUserWhen,
    ) -> bool {
        if self.is_member_of_publishing_entity(card) && !card.entities_acks.contains(&card.publisher)
        {
            return false;
        }

        let entities_to_ack = self.entities_to_ack(card);
        if entities_to_ack.is_empty()
            || policy != ConsideredAcknowledgedForUserWhen::AllEntitiesOfUserHaveAcknowledged
        {
            return false;
        }

        !entities_to_ack
            .iter()
            .filter(|id| !card.entities_acks.contains(*id))
            .any(|id| self.is_own_card_sender(id))
    }

    fn entities_to_ack(&self, card: &LightCard) -> Vec<String> {
        let recipients: Vec<&Entity> = card
            .entity_recipients
            .iter()
            .filter_map(|id| self.entities.entity(id))
            .collect();
        self.resolve_entities_allowed_to_send_cards(&recipients)
    }

    fn is_member_of_publishing_entity(&self, card: &LightCard) -> bool {
        card.publisher_type == Some(PublisherType::Entity) && self.user.is_member_of(&card.publisher)
    }

    fn is_own_card_sender(&self, entity_id: &str) -> bool {
        self.is_entity_allowed_to_send_card(entity_id) && self.user.is_member_of(entity_id)
    }
}

fn has_perimeter_to_respond(user: &CurrentUser, card: &LightCard, process: &Process) -> bool {
    process
        .state(&card.state)
        .and_then(|state| state.response.as_ref())
        .is_some_and(|response| user.can_write(&card.process, &response.state))
}

pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
