use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use tapflow_protocols::{
    CapabilityError, ContextApi, Controller, CustomAction, CustomActionArg, CustomRecognition,
    CustomRecognitionArg, Image, NodeRunRecord, RecoResult, Rect, ResourceApi, RunStatus, TaskId,
    TaskerApi,
};

use super::Tasker;
use crate::events::EventSink;
use crate::resource::Resource;

#[derive(Default)]
struct FakeDevice {
    clicks: AtomicUsize,
}

#[async_trait]
impl Controller for FakeDevice {
    async fn screencap(&self) -> Option<Image> {
        Some(Image::new(2, 2, 0, vec![0; 4]))
    }
    async fn click(&self, _x: i32, _y: i32) -> bool {
        self.clicks.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        true
    }
    async fn swipe(&self, _x1: i32, _y1: i32, _x2: i32, _y2: i32, _d: u32) -> bool {
        true
    }
    async fn press_key(&self, _k: i32) -> bool {
        true
    }
    async fn input_text(&self, _t: &str) -> bool {
        true
    }
    async fn start_app(&self, _i: &str) -> bool {
        true
    }
    async fn stop_app(&self, _i: &str) -> bool {
        true
    }
    async fn shell(&self, _c: &str, _t: u64) -> Option<String> {
        None
    }
    async fn connected(&self) -> bool {
        true
    }
    async fn cached_image(&self) -> Option<Image> {
        None
    }
}

/// Recognition callback that misses a fixed number of times, then hits.
struct ScriptedReco {
    calls: Mutex<Vec<Instant>>,
    misses_before_hit: usize,
}

impl ScriptedReco {
    fn new(misses_before_hit: usize) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            misses_before_hit,
        })
    }

    fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl CustomRecognition for ScriptedReco {
    async fn analyze(
        &self,
        _ctx: &dyn ContextApi,
        _arg: CustomRecognitionArg,
    ) -> Result<RecoResult, CapabilityError> {
        let count = {
            let mut calls = self.calls.lock();
            calls.push(Instant::now());
            calls.len()
        };
        if count <= self.misses_before_hit {
            Ok(RecoResult::miss())
        } else {
            Ok(RecoResult::hit(Rect { x: 0, y: 0, w: 1, h: 1 }, 1.0))
        }
    }
}

/// Action callback returning a scripted success flag.
struct FlagAction {
    calls: AtomicUsize,
    succeed: bool,
}

impl FlagAction {
    fn new(succeed: bool) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            succeed,
        })
    }
}

#[async_trait]
impl CustomAction for FlagAction {
    async fn run(
        &self,
        _ctx: &dyn ContextApi,
        _arg: CustomActionArg,
    ) -> Result<bool, CapabilityError> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(self.succeed)
    }
}

fn infra(bundle: Value) -> (Arc<Tasker>, Arc<FakeDevice>, Arc<Resource>) {
    let resource = Arc::new(Resource::new());
    resource.load_document(&bundle).unwrap();
    let device = Arc::new(FakeDevice::default());
    let tasker = Tasker::new(device.clone(), resource.clone());
    (tasker, device, resource)
}

fn quick(mut node: Value) -> Value {
    let obj = node.as_object_mut().unwrap();
    obj.insert("rate_limit".into(), json!(0));
    obj.insert("pre_delay".into(), json!(0));
    obj.insert("post_delay".into(), json!(0));
    node
}

#[tokio::test]
async fn two_node_walk_records_both_and_succeeds() {
    let (tasker, device, _) = infra(json!({
        "A": quick(json!({
            "next": "B",
            "action": { "type": "Click", "param": { "target": [10, 10, 4, 4] } },
        })),
        "B": quick(json!({ "action": "StopTask" })),
    }));

    let id = tasker.post("A", Value::Null).unwrap();
    assert_eq!(tasker.wait(id).await, Some(RunStatus::Succeeded));

    let task = tasker.bank().task(id).unwrap();
    assert_eq!(task.status, RunStatus::Succeeded);
    assert_eq!(task.node_ids.len(), 2);
    let names: Vec<_> = task
        .node_ids
        .iter()
        .map(|&n| tasker.bank().node(n).unwrap().name)
        .collect();
    assert_eq!(names, vec!["A", "B"]);
    assert_eq!(device.clicks.load(std::sync::atomic::Ordering::SeqCst), 1);

    // The recognition that triggered A is queryable afterwards.
    let a = tasker.bank().node(task.node_ids[0]).unwrap();
    assert!(tasker.cache().get(a.reco_id).unwrap().hit);
}

#[tokio::test]
async fn post_rejects_bad_entries() {
    let (tasker, _, resource) = infra(json!({
        "A": { "next": "Sub" },
        "Sub": { "is_sub": true, "action": "StopTask" },
    }));

    assert!(tasker.post("Missing", Value::Null).is_err());
    assert!(tasker.post("Sub", Value::Null).is_err());

    resource.clear().await;
    assert!(tasker.post("A", Value::Null).is_err());
}

#[tokio::test]
async fn post_time_override_shapes_the_run() {
    let (tasker, device, _) = infra(json!({
        "A": quick(json!({
            "action": { "type": "Click", "param": { "target": [0, 0, 2, 2] } },
        })),
        "End": quick(json!({ "action": "StopTask" })),
    }));

    // Without the override A has no edges; with it the walk reaches End.
    let id = tasker
        .post("A", json!({ "A": { "next": "End" } }))
        .unwrap();
    assert_eq!(tasker.wait(id).await, Some(RunStatus::Succeeded));
    assert_eq!(device.clicks.load(std::sync::atomic::Ordering::SeqCst), 1);

    // A bad override never starts a run.
    assert!(tasker.post("A", json!({ "A": { "next": "Ghost" } })).is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_terminates_a_waiting_run() {
    let reco = ScriptedReco::new(usize::MAX);
    let (tasker, device, resource) = infra(json!({
        "A": quick(json!({
            "recognition": { "type": "Custom", "param": { "custom_recognition": "never" } },
            "action": { "type": "Click", "param": { "target": [0, 0, 2, 2] } },
            "timeout": 60000,
        })),
    }));
    resource.register_custom_recognition("never", reco.clone());

    let id = tasker.post("A", Value::Null).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(tasker.any_running());

    tasker.stop();
    assert_eq!(tasker.wait(id).await, Some(RunStatus::Stopped));

    // Nothing executes after the terminal state.
    let calls_at_stop = reco.call_times().len();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(reco.call_times().len(), calls_at_stop);
    assert_eq!(device.clicks.load(std::sync::atomic::Ordering::SeqCst), 0);
    assert!(!tasker.any_running());
}

#[tokio::test]
async fn sweep_timeout_fails_the_run() {
    let reco = ScriptedReco::new(usize::MAX);
    let (tasker, _, resource) = infra(json!({
        "A": quick(json!({
            "recognition": { "type": "Custom", "param": { "custom_recognition": "never" } },
            "timeout": 100,
        })),
    }));
    resource.register_custom_recognition("never", reco);

    let id = tasker.post("A", Value::Null).unwrap();
    assert_eq!(tasker.wait(id).await, Some(RunStatus::Failed));
}

#[tokio::test]
async fn on_error_fallback_is_tried_exactly_once() {
    let flop = FlagAction::new(false);
    let fallback = ScriptedReco::new(usize::MAX);
    let (tasker, _, resource) = infra(json!({
        "A": quick(json!({
            "action": { "type": "Custom", "param": { "custom_action": "flop" } },
            "on_error": "Rescue",
        })),
        "Rescue": quick(json!({
            "recognition": { "type": "Custom", "param": { "custom_recognition": "rescue" } },
            "action": "StopTask",
        })),
    }));
    resource.register_custom_action("flop", flop.clone());
    resource.register_custom_recognition("rescue", fallback.clone());

    let id = tasker.post("A", Value::Null).unwrap();
    assert_eq!(tasker.wait(id).await, Some(RunStatus::Failed));

    // One action attempt, one fallback recognition, no retries of either.
    assert_eq!(flop.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(fallback.call_times().len(), 1);
}

#[tokio::test]
async fn on_error_hit_continues_the_walk() {
    let flop = FlagAction::new(false);
    let (tasker, _, resource) = infra(json!({
        "A": quick(json!({
            "action": { "type": "Custom", "param": { "custom_action": "flop" } },
            "on_error": "Rescue",
        })),
        "Rescue": quick(json!({ "action": "StopTask" })),
    }));
    resource.register_custom_action("flop", flop);

    let id = tasker.post("A", Value::Null).unwrap();
    assert_eq!(tasker.wait(id).await, Some(RunStatus::Succeeded));

    let task = tasker.bank().task(id).unwrap();
    let names: Vec<_> = task
        .node_ids
        .iter()
        .map(|&n| tasker.bank().node(n).unwrap().name)
        .collect();
    assert_eq!(names, vec!["A", "Rescue"]);
    // The failed attempt is recorded as incomplete.
    assert!(!tasker.bank().node(task.node_ids[0]).unwrap().completed);
}

#[tokio::test]
async fn rate_limit_spaces_repeated_evaluations() {
    let reco = ScriptedReco::new(1);
    let (tasker, _, resource) = infra(json!({
        "A": {
            "recognition": { "type": "Custom", "param": { "custom_recognition": "slow" } },
            "action": "StopTask",
            "rate_limit": 300,
            "pre_delay": 0,
            "post_delay": 0,
            "timeout": 10000,
        },
    }));
    resource.register_custom_recognition("slow", reco.clone());

    let id = tasker.post("A", Value::Null).unwrap();
    assert_eq!(tasker.wait(id).await, Some(RunStatus::Succeeded));

    let calls = reco.call_times();
    assert_eq!(calls.len(), 2);
    // Second evaluation waits out the window from the first one's start.
    assert!(calls[1] - calls[0] >= Duration::from_millis(250));
}

#[tokio::test]
async fn interrupt_branch_returns_to_pending_lists() {
    // A's next (Goal) misses until the interrupt (Fix) has run once.
    struct GatedReco {
        gate: Arc<std::sync::atomic::AtomicBool>,
    }
    #[async_trait]
    impl CustomRecognition for GatedReco {
        async fn analyze(
            &self,
            _ctx: &dyn ContextApi,
            _arg: CustomRecognitionArg,
        ) -> Result<RecoResult, CapabilityError> {
            if self.gate.load(std::sync::atomic::Ordering::SeqCst) {
                Ok(RecoResult::hit(Rect { x: 0, y: 0, w: 1, h: 1 }, 1.0))
            } else {
                Ok(RecoResult::miss())
            }
        }
    }
    struct OpenGate {
        gate: Arc<std::sync::atomic::AtomicBool>,
    }
    #[async_trait]
    impl CustomAction for OpenGate {
        async fn run(
            &self,
            _ctx: &dyn ContextApi,
            _arg: CustomActionArg,
        ) -> Result<bool, CapabilityError> {
            self.gate.store(true, std::sync::atomic::Ordering::SeqCst);
            Ok(true)
        }
    }

    let gate = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let (tasker, _, resource) = infra(json!({
        "A": quick(json!({ "next": "Goal", "interrupt": "Fix", "timeout": 10000 })),
        "Goal": quick(json!({
            "recognition": { "type": "Custom", "param": { "custom_recognition": "gated" } },
            "action": "StopTask",
            "timeout": 10000,
        })),
        "Fix": quick(json!({
            "is_sub": true,
            "action": { "type": "Custom", "param": { "custom_action": "open" } },
        })),
    }));
    resource.register_custom_recognition("gated", Arc::new(GatedReco { gate: gate.clone() }));
    resource.register_custom_action("open", Arc::new(OpenGate { gate }));

    let id = tasker.post("A", Value::Null).unwrap();
    assert_eq!(tasker.wait(id).await, Some(RunStatus::Succeeded));

    let task = tasker.bank().task(id).unwrap();
    let names: Vec<_> = task
        .node_ids
        .iter()
        .map(|&n| tasker.bank().node(n).unwrap().name)
        .collect();
    assert_eq!(names, vec!["A", "Fix", "Goal"]);
}

#[tokio::test]
async fn event_sink_receives_focus_and_lifecycle() {
    /// Sink recording every notification it is handed.
    #[derive(Default)]
    struct RecordingSink {
        started: Mutex<Vec<(String, Value)>>,
        completed: Mutex<Vec<(String, bool, Value)>>,
        statuses: Mutex<Vec<RunStatus>>,
    }

    #[async_trait]
    impl EventSink for RecordingSink {
        async fn on_node_started(&self, _task_id: TaskId, node: &str, focus: &Value) {
            self.started.lock().push((node.to_string(), focus.clone()));
        }
        async fn on_node_completed(&self, _task_id: TaskId, record: &NodeRunRecord, focus: &Value) {
            self.completed
                .lock()
                .push((record.name.clone(), record.completed, focus.clone()));
        }
        async fn on_task_status(&self, _task_id: TaskId, status: RunStatus) {
            self.statuses.lock().push(status);
        }
    }

    let (tasker, _, _) = infra(json!({
        "A": quick(json!({
            "next": "B",
            "focus": { "toast": "starting" },
        })),
        "B": quick(json!({ "action": "StopTask" })),
    }));
    let sink = Arc::new(RecordingSink::default());
    tasker.add_event_sink(sink.clone());

    let id = tasker.post("A", Value::Null).unwrap();
    assert_eq!(tasker.wait(id).await, Some(RunStatus::Succeeded));

    // Focus rides along untouched; nodes without one report null.
    let started = sink.started.lock().clone();
    assert_eq!(
        started,
        vec![
            ("A".to_string(), json!({ "toast": "starting" })),
            ("B".to_string(), Value::Null),
        ]
    );

    let completed = sink.completed.lock().clone();
    assert_eq!(completed.len(), 2);
    assert!(completed.iter().all(|(_, done, _)| *done));
    assert_eq!(completed[0].2, json!({ "toast": "starting" }));

    assert_eq!(
        sink.statuses.lock().clone(),
        vec![RunStatus::Running, RunStatus::Succeeded]
    );
}

#[tokio::test]
async fn context_override_next_reroutes_the_walk() {
    struct Reroute;
    #[async_trait]
    impl CustomAction for Reroute {
        async fn run(
            &self,
            ctx: &dyn ContextApi,
            arg: CustomActionArg,
        ) -> Result<bool, CapabilityError> {
            Ok(ctx.override_next(&arg.node_name, vec!["End".to_string()]).await)
        }
    }

    let (tasker, _, resource) = infra(json!({
        "A": quick(json!({
            "action": { "type": "Custom", "param": { "custom_action": "reroute" } },
        })),
        "End": quick(json!({ "action": "StopTask" })),
    }));
    resource.register_custom_action("reroute", Arc::new(Reroute));

    let id = tasker.post("A", Value::Null).unwrap();
    assert_eq!(tasker.wait(id).await, Some(RunStatus::Succeeded));

    // The override lived in the run's private graph, not the resource.
    assert!(resource.node("A").unwrap().next.is_empty());
}
