//! The run queue: posting, stopping, and querying task runs.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock as SyncRwLock;
use serde_json::Value;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use tapflow_pipeline::{
    ActionKind, PipelineChecker, PipelineGraph, PipelineParser, RecognitionKind,
};
use tapflow_protocols::{
    Controller, DiffComparator, FrameComparator, Image, NodeId, NodeRunRecord, RecoId, RecoResult,
    Rect, RunStatus, TaskId, TaskRunRecord, TaskerApi,
};

use crate::action::{ActionStage, Actuator, ActuatorRegistry, TargetResolver};
use crate::bank::ResultBank;
use crate::cache::RecoCache;
use crate::context::Context;
use crate::error::EngineError;
use crate::events::EventSink;
use crate::freeze::FreezeGate;
use crate::recognition::{RecognitionStage, Recognizer, RecognizerRegistry};
use crate::resource::Resource;
use crate::runner::PipelineRunner;

#[cfg(test)]
#[path = "tasker_tests.rs"]
mod tests;

struct RunHandle {
    status: watch::Receiver<RunStatus>,
    cancel: CancellationToken,
}

/// Owns the Controller/Resource bindings and drives posted runs.
///
/// Each posted run gets its own worker task, its own cancellation token and
/// a private graph snapshot; post-time overrides merge into that snapshot and
/// are revalidated before anything executes. Create through [`Tasker::new`],
/// which returns an `Arc` because per-run contexts keep a handle back to the
/// tasker.
pub struct Tasker {
    me: Weak<Tasker>,
    controller: Arc<dyn Controller>,
    resource: Arc<Resource>,
    cache: Arc<RecoCache>,
    bank: Arc<ResultBank>,
    recognizers: Arc<RecognizerRegistry>,
    actuators: Arc<ActuatorRegistry>,
    comparator: SyncRwLock<Arc<dyn FrameComparator>>,
    sinks: SyncRwLock<Vec<Arc<dyn EventSink>>>,
    next_task_id: AtomicI64,
    runs: DashMap<TaskId, RunHandle>,
    stop_requested: AtomicBool,
}

impl Tasker {
    pub fn new(controller: Arc<dyn Controller>, resource: Arc<Resource>) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            controller,
            resource,
            cache: Arc::new(RecoCache::new()),
            bank: Arc::new(ResultBank::new()),
            recognizers: Arc::new(RecognizerRegistry::new()),
            actuators: Arc::new(ActuatorRegistry::new()),
            comparator: SyncRwLock::new(Arc::new(DiffComparator)),
            sinks: SyncRwLock::new(Vec::new()),
            next_task_id: AtomicI64::new(1),
            runs: DashMap::new(),
            stop_requested: AtomicBool::new(false),
        })
    }

    pub fn resource(&self) -> &Arc<Resource> {
        &self.resource
    }

    pub fn controller(&self) -> &Arc<dyn Controller> {
        &self.controller
    }

    pub fn cache(&self) -> &Arc<RecoCache> {
        &self.cache
    }

    pub fn bank(&self) -> &Arc<ResultBank> {
        &self.bank
    }

    pub fn register_recognizer(&self, kind: RecognitionKind, recognizer: Arc<dyn Recognizer>) {
        self.recognizers.register(kind, recognizer);
    }

    pub fn register_actuator(&self, kind: ActionKind, actuator: Arc<dyn Actuator>) {
        self.actuators.register(kind, actuator);
    }

    pub fn set_comparator(&self, comparator: Arc<dyn FrameComparator>) {
        *self.comparator.write() = comparator;
    }

    pub fn add_event_sink(&self, sink: Arc<dyn EventSink>) {
        self.sinks.write().push(sink);
    }

    /// Post a run. Checks happen here, not during the walk: the resource must
    /// be valid, the override must merge and revalidate, and the entry must
    /// exist and not be a sub node.
    pub fn post(&self, entry: &str, pipeline_override: Value) -> Result<TaskId, EngineError> {
        if !self.resource.is_valid() {
            return Err(EngineError::InvalidResource);
        }

        let mut graph = self.resource.graph_snapshot();
        let defaults = self.resource.defaults_snapshot();
        if !pipeline_override.is_null() {
            PipelineParser::parse_bundle(&pipeline_override, &mut graph, &defaults)?;
            PipelineChecker::check(&graph)?;
        }

        let entry_node = graph
            .get(entry)
            .ok_or_else(|| EngineError::EntryNotFound(entry.to_string()))?;
        if entry_node.is_sub {
            return Err(EngineError::EntryIsSub(entry.to_string()));
        }

        let me = self.me.upgrade().ok_or(EngineError::ShuttingDown)?;
        let task_id = self.next_task_id.fetch_add(1, Ordering::Relaxed);
        self.bank.open_task(task_id, entry);

        let (tx, rx) = watch::channel(RunStatus::Pending);
        let cancel = CancellationToken::new();
        self.runs.insert(
            task_id,
            RunHandle {
                status: rx,
                cancel: cancel.clone(),
            },
        );

        let graph = Arc::new(SyncRwLock::new(graph));
        let ctx = Context::new(task_id, me, graph.clone(), defaults, cancel.clone());
        let runner = self.build_runner(task_id, graph, cancel);
        let bank = self.bank.clone();
        let sinks = self.sinks.read().clone();
        let entry = entry.to_string();

        tokio::spawn(async move {
            let _ = tx.send(RunStatus::Running);
            bank.set_task_status(task_id, RunStatus::Running);
            for sink in &sinks {
                sink.on_task_status(task_id, RunStatus::Running).await;
            }

            let status = runner.run(&entry, &ctx).await;
            info!(task_id, entry = %entry, ?status, "run finished");

            bank.set_task_status(task_id, status);
            for sink in &sinks {
                sink.on_task_status(task_id, status).await;
            }
            let _ = tx.send(status);
        });

        Ok(task_id)
    }

    /// Cancel everything queued and running. Returns immediately; the walks
    /// observe the request at their next suspension point.
    pub fn stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
        for handle in self.runs.iter() {
            handle.cancel.cancel();
        }
        info!("stop requested for all runs");
    }

    pub fn any_running(&self) -> bool {
        self.runs
            .iter()
            .any(|h| !h.status.borrow().is_terminal())
    }

    fn build_runner(
        &self,
        task_id: TaskId,
        graph: Arc<SyncRwLock<PipelineGraph>>,
        cancel: CancellationToken,
    ) -> PipelineRunner {
        PipelineRunner::new(
            task_id,
            graph,
            self.controller.clone(),
            RecognitionStage::new(self.recognizers.clone(), self.resource.clone()),
            ActionStage::new(
                self.actuators.clone(),
                self.bank.clone(),
                self.cache.clone(),
                self.resource.clone(),
            ),
            FreezeGate::new(self.controller.clone(), self.comparator.read().clone()),
            self.cache.clone(),
            self.bank.clone(),
            self.sinks.read().clone(),
            cancel,
        )
    }

    /// Inline sub-run on the caller's worker, used by contexts.
    pub(crate) async fn run_nested(
        &self,
        entry: &str,
        graph: PipelineGraph,
        cancel: CancellationToken,
    ) -> Option<RunStatus> {
        let entry_node = graph.get(entry)?;
        if entry_node.is_sub {
            warn!(entry, "sub node cannot start a nested run");
            return None;
        }
        let me = self.me.upgrade()?;

        let task_id = self.next_task_id.fetch_add(1, Ordering::Relaxed);
        self.bank.open_task(task_id, entry);
        self.bank.set_task_status(task_id, RunStatus::Running);

        let graph = Arc::new(SyncRwLock::new(graph));
        let ctx = Context::new(
            task_id,
            me,
            graph.clone(),
            self.resource.defaults_snapshot(),
            cancel.clone(),
        );
        let runner = self.build_runner(task_id, graph, cancel);

        let status = runner.run(entry, &ctx).await;
        self.bank.set_task_status(task_id, status);
        let sinks = self.sinks.read().clone();
        for sink in sinks {
            sink.on_task_status(task_id, status).await;
        }
        Some(status)
    }

    /// Recognition step only, against a caller-supplied frame.
    pub(crate) async fn run_recognition_inline(
        &self,
        task_id: TaskId,
        graph: &SyncRwLock<PipelineGraph>,
        node: &str,
        image: Image,
        ctx: &Context,
    ) -> Option<RecoResult> {
        let node = graph.read().get(node).cloned()?;
        let stage = RecognitionStage::new(self.recognizers.clone(), self.resource.clone());
        let resolver = TargetResolver::new(self.bank.clone(), self.cache.clone());
        let (roi_target, roi_offset) = node.recognition.roi();
        let roi = resolver.resolve(&roi_target, roi_offset, Rect::default());

        let result = stage.recognize(task_id, &node, &image, roi, ctx).await;
        if result.hit {
            self.cache.put(result.clone());
        }
        Some(result)
    }

    /// Action step only, as if recognition had produced `hit_box`/`detail`.
    pub(crate) async fn run_action_inline(
        &self,
        task_id: TaskId,
        graph: &SyncRwLock<PipelineGraph>,
        node: &str,
        hit_box: Rect,
        reco_detail: Value,
        ctx: &Context,
    ) -> Option<bool> {
        let node = graph.read().get(node).cloned()?;
        let stage = ActionStage::new(
            self.actuators.clone(),
            self.bank.clone(),
            self.cache.clone(),
            self.resource.clone(),
        );
        let reco = RecoResult::hit(hit_box, 0.0).with_detail(reco_detail);
        let success = stage
            .execute(task_id, &node, self.controller.as_ref(), 0, &reco, ctx)
            .await;
        self.bank.append_node(task_id, &node.name, 0, success);
        Some(success)
    }
}

#[async_trait]
impl TaskerApi for Tasker {
    async fn post_task(&self, entry: &str, pipeline_override: Value) -> Option<TaskId> {
        match self.post(entry, pipeline_override) {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(entry, error = %e, "post rejected");
                None
            }
        }
    }

    async fn status(&self, task_id: TaskId) -> Option<RunStatus> {
        self.bank.task(task_id).map(|t| t.status)
    }

    async fn wait(&self, task_id: TaskId) -> Option<RunStatus> {
        let rx = self.runs.get(&task_id).map(|h| h.status.clone());
        match rx {
            Some(mut rx) => loop {
                let status = *rx.borrow();
                if status.is_terminal() {
                    return Some(status);
                }
                if rx.changed().await.is_err() {
                    let status = *rx.borrow();
                    return status.is_terminal().then_some(status);
                }
            },
            // Nested runs are awaited inline; only terminal states remain.
            None => self
                .bank
                .task(task_id)
                .map(|t| t.status)
                .filter(|s| s.is_terminal()),
        }
    }

    async fn post_stop(&self) -> bool {
        self.stop();
        true
    }

    async fn running(&self) -> bool {
        self.any_running()
    }

    async fn stopping(&self) -> bool {
        if !self.stop_requested.load(Ordering::Acquire) {
            return false;
        }
        if self.any_running() {
            true
        } else {
            self.stop_requested.store(false, Ordering::Release);
            false
        }
    }

    async fn task_detail(&self, task_id: TaskId) -> Option<TaskRunRecord> {
        self.bank.task(task_id)
    }

    async fn node_detail(&self, node_id: NodeId) -> Option<NodeRunRecord> {
        self.bank.node(node_id)
    }

    async fn reco_result(&self, reco_id: RecoId) -> Option<RecoResult> {
        self.cache.get(reco_id)
    }

    async fn latest_node(&self, node_name: &str) -> Option<NodeId> {
        self.bank.latest_node(node_name)
    }

    async fn clear_cache(&self) -> bool {
        self.cache.clear();
        self.bank.clear();
        self.runs.retain(|_, h| !h.status.borrow().is_terminal());
        true
    }
}
