//! Run-scoped context handed to custom callbacks.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use tapflow_pipeline::{DefaultNodeMgr, PipelineChecker, PipelineGraph, PipelineParser};
use tapflow_protocols::{ContextApi, Image, RecoResult, Rect, RunStatus, TaskId, TaskerApi};

use crate::tasker::Tasker;

/// The view a custom callback gets of the run that invoked it.
///
/// Shares the run's private graph with its runner, so overrides applied here
/// are visible to the rest of the walk but die with the run.
pub struct Context {
    task_id: TaskId,
    tasker: Arc<Tasker>,
    graph: Arc<RwLock<PipelineGraph>>,
    defaults: DefaultNodeMgr,
    cancel: CancellationToken,
}

impl Context {
    pub(crate) fn new(
        task_id: TaskId,
        tasker: Arc<Tasker>,
        graph: Arc<RwLock<PipelineGraph>>,
        defaults: DefaultNodeMgr,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            task_id,
            tasker,
            graph,
            defaults,
            cancel,
        }
    }

    fn merged(&self, pipeline_override: &Value) -> Option<PipelineGraph> {
        let mut staged = self.graph.read().clone();
        if !pipeline_override.is_null() {
            if let Err(e) = PipelineParser::parse_bundle(pipeline_override, &mut staged, &self.defaults)
            {
                warn!(task_id = self.task_id, error = %e, "pipeline override rejected");
                return None;
            }
            if let Err(e) = PipelineChecker::check(&staged) {
                warn!(task_id = self.task_id, error = %e, "pipeline override rejected");
                return None;
            }
        }
        Some(staged)
    }
}

#[async_trait]
impl ContextApi for Context {
    async fn run_task(&self, entry: &str, pipeline_override: Value) -> Option<RunStatus> {
        let graph = self.merged(&pipeline_override)?;
        self.tasker
            .run_nested(entry, graph, self.cancel.child_token())
            .await
    }

    async fn run_recognition(&self, node: &str, image: Image) -> Option<RecoResult> {
        self.tasker
            .run_recognition_inline(self.task_id, &self.graph, node, image, self)
            .await
    }

    async fn run_action(
        &self,
        node: &str,
        hit_box: Rect,
        reco_detail: Value,
    ) -> Option<bool> {
        self.tasker
            .run_action_inline(self.task_id, &self.graph, node, hit_box, reco_detail, self)
            .await
    }

    async fn override_pipeline(&self, pipeline_override: Value) -> bool {
        match self.merged(&pipeline_override) {
            Some(staged) => {
                *self.graph.write() = staged;
                true
            }
            None => false,
        }
    }

    async fn override_next(&self, node: &str, next: Vec<String>) -> bool {
        let mut graph = self.graph.write();
        if !graph.contains(node) || next.iter().any(|n| !graph.contains(n)) {
            warn!(task_id = self.task_id, node, "override_next rejected");
            return false;
        }
        let Some(mut updated) = graph.get(node).cloned() else {
            return false;
        };
        updated.next = next;
        graph.insert(updated);
        true
    }

    async fn node_data(&self, node: &str) -> Option<Value> {
        self.graph.read().get(node).map(|n| n.to_json())
    }

    fn task_id(&self) -> TaskId {
        self.task_id
    }

    fn tasker(&self) -> &dyn TaskerApi {
        self.tasker.as_ref()
    }

    async fn clone_context(&self) -> Box<dyn ContextApi> {
        Box::new(Context {
            task_id: self.task_id,
            tasker: self.tasker.clone(),
            graph: Arc::new(RwLock::new(self.graph.read().clone())),
            defaults: self.defaults.clone(),
            cancel: self.cancel.clone(),
        })
    }
}
