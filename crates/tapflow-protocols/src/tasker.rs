//! Tasker capability: posting runs and querying their outcome.

use async_trait::async_trait;
use serde_json::Value;

use crate::result::{NodeRunRecord, RecoResult, RunStatus, TaskRunRecord};

/// Handle for a posted task run.
pub type TaskId = i64;
/// Handle for one executed node within a run.
pub type NodeId = i64;
/// Handle for one cached recognition result.
pub type RecoId = i64;

/// The run queue and its query surface.
///
/// Post/wait/stop mirror the lifecycle in [`RunStatus`]: a post enqueues a
/// Pending run, the worker moves it through Running into one of the terminal
/// states, and queries stay answerable after the run ends until the cache is
/// cleared.
#[async_trait]
pub trait TaskerApi: Send + Sync {
    /// Enqueue a run starting at `entry` with a run-local override document.
    /// Returns `None` when the entry is unknown or the override is invalid.
    async fn post_task(&self, entry: &str, pipeline_override: Value) -> Option<TaskId>;

    async fn status(&self, task_id: TaskId) -> Option<RunStatus>;

    /// Block until `task_id` reaches a terminal state.
    async fn wait(&self, task_id: TaskId) -> Option<RunStatus>;

    /// Request a stop of everything queued and running. Returns immediately;
    /// the running walk observes the request at its next suspension point.
    async fn post_stop(&self) -> bool;

    async fn running(&self) -> bool;

    /// True between a stop request and the queue going idle.
    async fn stopping(&self) -> bool;

    async fn task_detail(&self, task_id: TaskId) -> Option<TaskRunRecord>;

    async fn node_detail(&self, node_id: NodeId) -> Option<NodeRunRecord>;

    async fn reco_result(&self, reco_id: RecoId) -> Option<RecoResult>;

    /// Latest node run id recorded under `node_name`, if any.
    async fn latest_node(&self, node_name: &str) -> Option<NodeId>;

    /// Drop all cached run, node and recognition records.
    async fn clear_cache(&self) -> bool;
}
