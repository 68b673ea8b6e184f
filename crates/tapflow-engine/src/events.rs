//! Execution event notifications.

use async_trait::async_trait;
use serde_json::Value;

use tapflow_protocols::{NodeRunRecord, RunStatus, TaskId};

/// Observer of run progress.
///
/// Sinks are notified inline from the worker; implementations should return
/// quickly. The `focus` value is the node's opaque passthrough payload,
/// `Value::Null` when the node declares none.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn on_node_started(&self, _task_id: TaskId, _node: &str, _focus: &Value) {}

    async fn on_node_completed(&self, _task_id: TaskId, _record: &NodeRunRecord, _focus: &Value) {}

    async fn on_task_status(&self, _task_id: TaskId, _status: RunStatus) {}
}
