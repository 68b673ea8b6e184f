//! Task and node execution records.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;
use parking_lot::RwLock;

use tapflow_protocols::{NodeId, NodeRunRecord, RecoId, RunStatus, TaskId, TaskRunRecord};

/// Append-only store of run history.
///
/// Records are created when a run starts, appended to while it walks, and
/// frozen once it reaches a terminal state. Queries stay answerable after the
/// run ends until `clear` is called.
pub struct ResultBank {
    next_node_id: AtomicI64,
    tasks: RwLock<HashMap<TaskId, TaskRunRecord>>,
    nodes: RwLock<HashMap<NodeId, NodeRunRecord>>,
    /// node name -> most recent node run id, for Target::Node resolution.
    latest: RwLock<HashMap<String, NodeId>>,
}

impl Default for ResultBank {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultBank {
    pub fn new() -> Self {
        Self {
            next_node_id: AtomicI64::new(1),
            tasks: RwLock::new(HashMap::new()),
            nodes: RwLock::new(HashMap::new()),
            latest: RwLock::new(HashMap::new()),
        }
    }

    pub fn open_task(&self, task_id: TaskId, entry: &str) {
        self.tasks.write().insert(
            task_id,
            TaskRunRecord {
                task_id,
                entry: entry.to_string(),
                node_ids: Vec::new(),
                status: RunStatus::Pending,
                started_at: Utc::now(),
                finished_at: None,
            },
        );
    }

    pub fn set_task_status(&self, task_id: TaskId, status: RunStatus) {
        if let Some(record) = self.tasks.write().get_mut(&task_id) {
            record.status = status;
            if status.is_terminal() {
                record.finished_at = Some(Utc::now());
            }
        }
    }

    /// Record one executed node and attach it to its run. Returns the node
    /// run id.
    pub fn append_node(
        &self,
        task_id: TaskId,
        name: &str,
        reco_id: RecoId,
        completed: bool,
    ) -> NodeId {
        let node_id = self.next_node_id.fetch_add(1, Ordering::Relaxed);
        self.nodes.write().insert(
            node_id,
            NodeRunRecord {
                node_id,
                name: name.to_string(),
                reco_id,
                completed,
            },
        );
        self.latest.write().insert(name.to_string(), node_id);
        if let Some(record) = self.tasks.write().get_mut(&task_id) {
            record.node_ids.push(node_id);
        }
        node_id
    }

    pub fn task(&self, task_id: TaskId) -> Option<TaskRunRecord> {
        self.tasks.read().get(&task_id).cloned()
    }

    pub fn node(&self, node_id: NodeId) -> Option<NodeRunRecord> {
        self.nodes.read().get(&node_id).cloned()
    }

    /// Most recent node run recorded under `name`.
    pub fn latest_node(&self, name: &str) -> Option<NodeId> {
        self.latest.read().get(name).copied()
    }

    pub fn clear(&self) {
        self.tasks.write().clear();
        self.nodes.write().clear();
        self.latest.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_lifecycle_is_recorded() {
        let bank = ResultBank::new();
        bank.open_task(7, "Entry");
        bank.set_task_status(7, RunStatus::Running);
        let n1 = bank.append_node(7, "Entry", 3, true);
        let n2 = bank.append_node(7, "Exit", 0, true);
        bank.set_task_status(7, RunStatus::Succeeded);

        let task = bank.task(7).unwrap();
        assert_eq!(task.entry, "Entry");
        assert_eq!(task.node_ids, vec![n1, n2]);
        assert_eq!(task.status, RunStatus::Succeeded);
        assert!(task.finished_at.is_some());

        let node = bank.node(n2).unwrap();
        assert_eq!(node.name, "Exit");
        assert_eq!(node.reco_id, 0);
    }

    #[test]
    fn latest_node_tracks_most_recent_run() {
        let bank = ResultBank::new();
        bank.open_task(1, "A");
        let first = bank.append_node(1, "A", 0, true);
        let second = bank.append_node(1, "A", 0, true);
        assert!(second > first);
        assert_eq!(bank.latest_node("A"), Some(second));
        assert_eq!(bank.latest_node("missing"), None);
    }
}
