//! Current user and entity perimeter

use serde::{Deserialize, Serialize};

/// Rights a perimeter grants on a process state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rights {
    Receive,
    Write,
    ReceiveAndWrite,
}

/// Effective right of the user on one process/state pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputedPerimeter {
    pub process: String,
    pub state: String,
    pub rights: Rights,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Permission {
    Admin,
    Readonly,
    ViewAllCards,
    ViewAllCardsForUserPerimeters,
    #[serde(other)]
    Other,
}

/// The logged-in user as seen by the acknowledgment rules
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentUser {
    pub login: String,
    #[serde(default)]
    pub entities: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<Permission>,
    #[serde(default)]
    pub computed_perimeters: Vec<ComputedPerimeter>,
}

impl CurrentUser {
    pub fn new(login: impl Into<String>, entities: &[&str]) -> Self {
        Self {
            login: login.into(),
            entities: entities.iter().map(|e| e.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn is_member_of(&self, entity_id: &str) -> bool {
        self.entities.iter().any(|e| e == entity_id)
    }

    pub fn is_read_only(&self) -> bool {
        self.permissions.contains(&Permission::Readonly)
    }

    /// Whether the user holds ReceiveAndWrite on `process`/`state`
    pub fn can_write(&self, process: &str, state: &str) -> bool {
        self.computed_perimeters.iter().any(|perimeter| {
            perimeter.process == process
                && perimeter.state == state
                && perimeter.rights == Rights::ReceiveAndWrite
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityRole {
    CardSender,
    ActivityArea,
    ActivityAreaGroup,
    #[serde(other)]
    Other,
}

/// Organizational entity; may delegate card sending to its children
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub roles: Vec<EntityRole>,
    #[serde(default)]
    pub parents: Vec<String>,
}

impl Entity {
    pub fn card_sender(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            roles: vec![EntityRole::CardSender],
            parents: Vec::new(),
        }
    }

    pub fn with_parents(mut self, parents: &[&str]) -> Self {
        self.parents = parents.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn is_card_sender(&self) -> bool {
        self.roles.contains(&EntityRole::CardSender)
    }
}
