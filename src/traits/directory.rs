//! Process and entity lookups

use std::collections::HashMap;

use crate::model::{Entity, Process};

/// Read access to process definitions
pub trait ProcessDirectory: Send + Sync {
    /// Definition for an exact process id and version
    fn process(&self, id: &str, version: &str) -> Option<&Process>;
}

/// Read access to the entity tree
pub trait EntityDirectory: Send + Sync {
    fn entity(&self, id: &str) -> Option<&Entity>;

    /// Entities that list `parent_id` among their parents
    fn children_of(&self, parent_id: &str) -> Vec<&Entity>;
}

/// Process definitions held in memory
#[derive(Debug, Default, Clone)]
pub struct StaticProcesses {
    processes: HashMap<(String, String), Process>,
}

impl StaticProcesses {
    pub fn new(processes: impl IntoIterator<Item = Process>) -> Self {
        Self {
            processes: processes
                .into_iter()
                .map(|p| ((p.id.clone(), p.version.clone()), p))
                .collect(),
        }
    }
}

impl ProcessDirectory for StaticProcesses {
    fn process(&self, id: &str, version: &str) -> Option<&Process> {
        self.processes.get(&(id.to_string(), version.to_string()))
    }
}

/// Entity tree held in memory
#[derive(Debug, Default, Clone)]
pub struct StaticEntities {
    entities: HashMap<String, Entity>,
}

impl StaticEntities {
    pub fn new(entities: impl IntoIterator<Item = Entity>) -> Self {
        Self {
            entities: entities.into_iter().map(|e| (e.id.clone(), e)).collect(),
        }
    }
}

impl EntityDirectory for StaticEntities {
    fn entity(&self, id: &str) -> Option<&Entity> {
        self.entities.get(id)
    }

    fn children_of(&self, parent_id: &str) -> Vec<&Entity> {
        let mut children: Vec<&Entity> = self
            .entities
            .values()
            .filter(|e| e.parents.iter().any(|p| p == parent_id))
            .collect();
        children.sort_by(|a, b| a.id.cmp(&b.id));
        children
    }
}
