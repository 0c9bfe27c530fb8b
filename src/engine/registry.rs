// ABOUTME: Owned registry of task records for one engine instance
// ABOUTME: Explicit lifecycle - created with the engine, cleared at shutdown, no singletons

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::record::{TaskId, TaskRecord, TaskStatus};

/// All task records belonging to one engine instance, keyed by id.
///
/// Independent tasks never contend on each other's state here: the registry
/// lock only covers map structure, and each record carries its own guards.
pub struct TaskRegistry {
    tasks: RwLock<HashMap<TaskId, Arc<TaskRecord>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
        }
    }

    pub fn insert(&self, record: Arc<TaskRecord>) {
        let mut tasks = self.tasks.write().expect("registry poisoned");
        tasks.insert(record.id, record);
    }

    pub fn get(&self, id: TaskId) -> Option<Arc<TaskRecord>> {
        let tasks = self.tasks.read().expect("registry poisoned");
        tasks.get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.tasks.read().expect("registry poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every record, for introspection and draining.
    pub fn snapshot(&self) -> Vec<Arc<TaskRecord>> {
        let tasks = self.tasks.read().expect("registry poisoned");
        tasks.values().cloned().collect()
    }

    /// Count of records per status at this instant.
    pub fn status_counts(&self) -> HashMap<TaskStatus, usize> {
        let tasks = self.tasks.read().expect("registry poisoned");
        let mut counts = HashMap::new();
        for record in tasks.values() {
            *counts.entry(record.status()).or_insert(0) += 1;
        }
        counts
    }

    /// Drop every record. Called at engine shutdown after draining.
    pub fn clear(&self) {
        let mut tasks = self.tasks.write().expect("registry poisoned");
        tasks.clear();
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}
