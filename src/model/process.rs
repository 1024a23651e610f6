//! Process definitions, as far as acknowledgment rules need them

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Whether a state lets users acknowledge its cards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AcknowledgmentAllowed {
    Never,
    Always,
    OnlyWhenResponseDisabledForUser,
}

/// When a card counts as acknowledged for the current user
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConsideredAcknowledgedForUserWhen {
    #[default]
    UserHasAcknowledged,
    AllEntitiesOfUserHaveAcknowledged,
}

/// Response configured on a state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseDefinition {
    /// State of the child card produced by a response
    pub state: String,
    #[serde(default)]
    pub emitting_entity_allowed_to_respond: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessState {
    #[serde(default)]
    pub acknowledgment_allowed: Option<AcknowledgmentAllowed>,
    #[serde(default)]
    pub considered_acknowledged_for_user_when: Option<ConsideredAcknowledgedForUserWhen>,
    #[serde(default)]
    pub response: Option<ResponseDefinition>,
}

/// A versioned process definition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Process {
    pub id: String,
    pub version: String,
    #[serde(default)]
    pub states: HashMap<String, ProcessState>,
}

impl Process {
    pub fn new(id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: version.into(),
            states: HashMap::new(),
        }
    }

    pub fn with_state(mut self, name: impl Into<String>, state: ProcessState) -> Self {
        self.states.insert(name.into(), state);
        self
    }

    pub fn state(&self, name: &str) -> Option<&ProcessState> {
        self.states.get(name)
    }
}
