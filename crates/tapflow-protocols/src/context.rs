//! Execution context handed to custom callbacks.

use async_trait::async_trait;
use serde_json::Value;

use crate::result::{RecoResult, RunStatus};
use crate::tasker::{TaskId, TaskerApi};
use crate::types::Image;

/// Window into the run that invoked a custom callback.
///
/// A context is scoped to one task run. Overrides applied through it are
/// local to that run and die with it; they never touch the shared graph.
/// JSON-valued parameters keep this trait object-safe and transportable over
/// the agent channel unchanged.
#[async_trait]
pub trait ContextApi: Send + Sync {
    /// Run a sub-pipeline from `entry` to completion, inside the current run.
    async fn run_task(&self, entry: &str, pipeline_override: Value) -> Option<RunStatus>;

    /// Run only the recognition step of `node` against `image`.
    async fn run_recognition(&self, node: &str, image: Image) -> Option<RecoResult>;

    /// Run only the action step of `node`, as if recognition had produced
    /// `hit_box`/`reco_detail`.
    async fn run_action(
        &self,
        node: &str,
        hit_box: crate::types::Rect,
        reco_detail: Value,
    ) -> Option<bool>;

    /// Merge a pipeline override into this run's private graph copy.
    async fn override_pipeline(&self, pipeline_override: Value) -> bool;

    /// Replace the `next` list of `node` in this run's private graph copy.
    async fn override_next(&self, node: &str, next: Vec<String>) -> bool;

    /// Effective definition of `node` in this run (overrides applied).
    async fn node_data(&self, node: &str) -> Option<Value>;

    /// The run this context belongs to.
    fn task_id(&self) -> TaskId;

    /// The tasker driving this run.
    fn tasker(&self) -> &dyn TaskerApi;

    /// Detached copy of this context: same run, independent override set.
    async fn clone_context(&self) -> Box<dyn ContextApi>;
}
