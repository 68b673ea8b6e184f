//! The graph walk: node-by-node interpretation of a pipeline run.
//!
//! Advancement works on candidate lists. After a node completes, its `next`
//! list and then its `interrupt` list are swept in order, recognizing each
//! candidate against a fresh capture; the first hit is executed. An interrupt
//! hit pushes the current lists onto a return stack and the walk resumes them
//! once the interrupt branch reaches a dead end. Sweeps repeat until the
//! source node's timeout; a sweep that times out fails the run.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tapflow_pipeline::{Action, PipelineGraph, PipelineNode};
use tapflow_protocols::{ContextApi, Controller, RecoId, RecoResult, Rect, RunStatus, TaskId};

use crate::action::ActionStage;
use crate::cache::RecoCache;
use crate::events::EventSink;
use crate::freeze::FreezeGate;
use crate::recognition::RecognitionStage;
use crate::bank::ResultBank;

/// A recognized candidate, ready to execute.
struct Hit {
    name: String,
    from_interrupt: bool,
    reco_id: RecoId,
    reco: RecoResult,
}

enum Sweep {
    Hit(Hit),
    Timeout,
    Canceled,
}

enum Eval {
    Hit(RecoId, RecoResult),
    Miss,
    Canceled,
}

enum Outcome {
    /// Action succeeded; advance along the node's edges.
    Completed,
    /// StopTask; the run ends successfully.
    Terminated,
    ActionFailed,
    Canceled,
}

/// Executes one task run over a private graph copy.
///
/// The runner never touches shared state beyond the result stores; the graph
/// behind `graph` belongs to this run (and its context) alone.
pub struct PipelineRunner {
    task_id: TaskId,
    graph: Arc<RwLock<PipelineGraph>>,
    controller: Arc<dyn Controller>,
    reco_stage: RecognitionStage,
    action_stage: ActionStage,
    freeze: FreezeGate,
    cache: Arc<RecoCache>,
    bank: Arc<ResultBank>,
    sinks: Vec<Arc<dyn EventSink>>,
    cancel: CancellationToken,
    last_eval: Mutex<HashMap<String, Instant>>,
    hit_counts: Mutex<HashMap<String, u64>>,
}

impl PipelineRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        task_id: TaskId,
        graph: Arc<RwLock<PipelineGraph>>,
        controller: Arc<dyn Controller>,
        reco_stage: RecognitionStage,
        action_stage: ActionStage,
        freeze: FreezeGate,
        cache: Arc<RecoCache>,
        bank: Arc<ResultBank>,
        sinks: Vec<Arc<dyn EventSink>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            task_id,
            graph,
            controller,
            reco_stage,
            action_stage,
            freeze,
            cache,
            bank,
            sinks,
            cancel,
            last_eval: Mutex::new(HashMap::new()),
            hit_counts: Mutex::new(HashMap::new()),
        }
    }

    /// Walk the graph from `entry` to a terminal status.
    pub async fn run(&self, entry: &str, ctx: &dyn ContextApi) -> RunStatus {
        let Some(entry_node) = self.node(entry) else {
            warn!(task_id = self.task_id, entry, "entry node disappeared");
            return RunStatus::Failed;
        };

        let mut next = vec![entry.to_string()];
        let mut interrupt: Vec<String> = Vec::new();
        let mut budget = entry_node.reco_timeout;
        let mut stack: Vec<(Vec<String>, Vec<String>, u64)> = Vec::new();

        'walk: loop {
            if next.is_empty() && interrupt.is_empty() {
                match stack.pop() {
                    Some((n, i, b)) => {
                        debug!(task_id = self.task_id, "interrupt branch done, resuming");
                        next = n;
                        interrupt = i;
                        budget = b;
                        continue;
                    }
                    None => return RunStatus::Succeeded,
                }
            }

            let mut hit = match self.sweep(&next, &interrupt, budget, ctx).await {
                Sweep::Hit(h) => h,
                Sweep::Timeout => {
                    info!(task_id = self.task_id, timeout_ms = budget, "no candidate hit within timeout");
                    return RunStatus::Failed;
                }
                Sweep::Canceled => return RunStatus::Stopped,
            };

            loop {
                let Some(node) = self.node(&hit.name) else {
                    return RunStatus::Failed;
                };
                match self.execute(&node, &hit, ctx).await {
                    Outcome::Canceled => return RunStatus::Stopped,
                    Outcome::Terminated => return RunStatus::Succeeded,
                    Outcome::Completed => {
                        if hit.from_interrupt {
                            stack.push((
                                std::mem::take(&mut next),
                                std::mem::take(&mut interrupt),
                                budget,
                            ));
                        }
                        next = node.next.clone();
                        interrupt = node.interrupt.clone();
                        budget = node.reco_timeout;
                        continue 'walk;
                    }
                    Outcome::ActionFailed => {
                        // Prioritized fallback: one pass over on_error, first
                        // hit continues the walk, exhaustion fails the run.
                        match self.sweep_once(&node.on_error, ctx).await {
                            Some(Ok(fallback)) => hit = fallback,
                            Some(Err(())) => return RunStatus::Stopped,
                            None => {
                                info!(task_id = self.task_id, node = %node.name, "on_error exhausted");
                                return RunStatus::Failed;
                            }
                        }
                    }
                }
            }
        }
    }

    fn node(&self, name: &str) -> Option<PipelineNode> {
        self.graph.read().get(name).cloned()
    }

    /// Repeatedly sweep the candidate lists until a hit or the deadline.
    async fn sweep(
        &self,
        next: &[String],
        interrupt: &[String],
        budget_ms: u64,
        ctx: &dyn ContextApi,
    ) -> Sweep {
        let deadline = Instant::now() + Duration::from_millis(budget_ms);
        loop {
            if self.cancel.is_cancelled() {
                return Sweep::Canceled;
            }

            let mut attempted = false;
            let candidates = next
                .iter()
                .map(|n| (n, false))
                .chain(interrupt.iter().map(|n| (n, true)));
            for (name, from_interrupt) in candidates {
                let Some(node) = self.node(name) else { continue };
                if !node.enabled {
                    continue;
                }
                attempted = true;
                match self.evaluate(&node, ctx).await {
                    Eval::Hit(reco_id, reco) => {
                        return Sweep::Hit(Hit {
                            name: name.clone(),
                            from_interrupt,
                            reco_id,
                            reco,
                        });
                    }
                    Eval::Miss => {}
                    Eval::Canceled => return Sweep::Canceled,
                }
                if Instant::now() >= deadline {
                    return Sweep::Timeout;
                }
            }

            if Instant::now() >= deadline {
                return Sweep::Timeout;
            }
            if !attempted {
                // All candidates disabled; idle instead of spinning.
                if !self.sleep(Duration::from_millis(100)).await {
                    return Sweep::Canceled;
                }
            }
        }
    }

    /// One pass over a fallback list. `Some(Ok)` on the first hit, `None`
    /// when every candidate missed, `Some(Err(()))` on cancellation.
    async fn sweep_once(&self, list: &[String], ctx: &dyn ContextApi) -> Option<Result<Hit, ()>> {
        for name in list {
            if self.cancel.is_cancelled() {
                return Some(Err(()));
            }
            let Some(node) = self.node(name) else { continue };
            if !node.enabled {
                continue;
            }
            match self.evaluate(&node, ctx).await {
                Eval::Hit(reco_id, reco) => {
                    return Some(Ok(Hit {
                        name: name.clone(),
                        from_interrupt: false,
                        reco_id,
                        reco,
                    }));
                }
                Eval::Miss => {}
                Eval::Canceled => return Some(Err(())),
            }
        }
        None
    }

    /// One candidate evaluation: rate-limit gate, pre-delay, pre-freeze,
    /// capture, recognize.
    async fn evaluate(&self, node: &PipelineNode, ctx: &dyn ContextApi) -> Eval {
        if !self.rate_gate(node).await {
            return Eval::Canceled;
        }
        if !self.sleep(Duration::from_millis(node.pre_delay)).await {
            return Eval::Canceled;
        }

        let freeze_roi = self.action_stage.resolver().resolve(
            &node.pre_wait_freezes.target,
            node.pre_wait_freezes.target_offset,
            Rect::default(),
        );
        if !self
            .freeze
            .wait(&node.pre_wait_freezes, freeze_roi, &self.cancel)
            .await
        {
            return Eval::Canceled;
        }

        let Some(image) = self.controller.screencap().await else {
            warn!(node = %node.name, "screencap failed, treating as miss");
            return Eval::Miss;
        };

        let (roi_target, roi_offset) = node.recognition.roi();
        let roi = self
            .action_stage
            .resolver()
            .resolve(&roi_target, roi_offset, Rect::default());

        let reco = self
            .reco_stage
            .recognize(self.task_id, node, &image, roi, ctx)
            .await;
        if self.cancel.is_cancelled() {
            return Eval::Canceled;
        }

        if reco.hit {
            let reco_id = self.cache.put(reco.clone());
            let hits = {
                let mut counts = self.hit_counts.lock();
                let entry = counts.entry(node.name.clone()).or_default();
                *entry += 1;
                *entry
            };
            debug!(node = %node.name, reco_id, hits, score = reco.score, "hit");
            Eval::Hit(reco_id, reco)
        } else {
            Eval::Miss
        }
    }

    /// Action phase of an already-recognized node.
    async fn execute(&self, node: &PipelineNode, hit: &Hit, ctx: &dyn ContextApi) -> Outcome {
        for sink in &self.sinks {
            sink.on_node_started(self.task_id, &node.name, &node.focus).await;
        }
        if self.cancel.is_cancelled() {
            return Outcome::Canceled;
        }

        let stop_task = matches!(node.action, Action::StopTask);
        let success = self
            .action_stage
            .execute(
                self.task_id,
                node,
                self.controller.as_ref(),
                hit.reco_id,
                &hit.reco,
                ctx,
            )
            .await;

        let record_id = self
            .bank
            .append_node(self.task_id, &node.name, hit.reco_id, success);
        if let Some(record) = self.bank.node(record_id) {
            for sink in &self.sinks {
                sink.on_node_completed(self.task_id, &record, &node.focus).await;
            }
        }

        if stop_task {
            info!(task_id = self.task_id, node = %node.name, "stop-task node reached");
            return Outcome::Terminated;
        }
        if !success {
            return Outcome::ActionFailed;
        }

        if !self.sleep(Duration::from_millis(node.post_delay)).await {
            return Outcome::Canceled;
        }
        let freeze_roi = self.action_stage.resolver().resolve(
            &node.post_wait_freezes.target,
            node.post_wait_freezes.target_offset,
            hit.reco.hit_box,
        );
        if !self
            .freeze
            .wait(&node.post_wait_freezes, freeze_roi, &self.cancel)
            .await
        {
            return Outcome::Canceled;
        }

        Outcome::Completed
    }

    /// Throttle: block until `rate_limit` has elapsed since this node's
    /// previous evaluation began. Returns `false` on cancellation.
    async fn rate_gate(&self, node: &PipelineNode) -> bool {
        let wait = {
            let last = self.last_eval.lock();
            last.get(&node.name)
                .map(|prev| Duration::from_millis(node.rate_limit).saturating_sub(prev.elapsed()))
                .unwrap_or(Duration::ZERO)
        };
        if !wait.is_zero() && !self.sleep(wait).await {
            return false;
        }
        self.last_eval
            .lock()
            .insert(node.name.clone(), Instant::now());
        true
    }

    /// Cancellation-aware sleep; `false` means the run was canceled.
    async fn sleep(&self, duration: Duration) -> bool {
        if duration.is_zero() {
            return !self.cancel.is_cancelled();
        }
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}
