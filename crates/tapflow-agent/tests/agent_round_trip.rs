//! End-to-end: an engine-side client forwarding custom callbacks to a
//! server-side host, with reverse calls flowing back over the same channel.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use tapflow_agent::{AgentClient, AgentServer, InProcDuplex, RemoteResource, Transceiver};
use tapflow_engine::{Resource, Tasker};
use tapflow_protocols::{
    CapabilityError, ContextApi, Controller, CustomAction, CustomActionArg, CustomRecognition,
    CustomRecognitionArg, Image, RecoResult, Rect, ResourceApi, RunStatus, TaskerApi,
};

struct FakeDevice;

#[async_trait]
impl Controller for FakeDevice {
    async fn screencap(&self) -> Option<Image> {
        Some(Image::new(2, 2, 16, vec![7u8; 16]))
    }
    async fn click(&self, _x: i32, _y: i32) -> bool {
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

/// Hosted on the server: checks the transferred frame, reroutes the walk
/// through a reverse call, reports a hit.
struct RerouteReco {
    image_intact: Arc<AtomicBool>,
    reroute_accepted: Arc<AtomicBool>,
}

#[async_trait]
impl CustomRecognition for RerouteReco {
    async fn analyze(
        &self,
        ctx: &dyn ContextApi,
        arg: CustomRecognitionArg,
    ) -> Result<RecoResult, CapabilityError> {
        self.image_intact.store(
            arg.image == Image::new(2, 2, 16, vec![7u8; 16]),
            Ordering::SeqCst,
        );
        let accepted = ctx
            .override_next(&arg.node_name, vec!["Exit".to_string()])
            .await;
        self.reroute_accepted.store(accepted, Ordering::SeqCst);
        Ok(RecoResult::hit(Rect::new(1, 1, 2, 2), 0.9).with_detail(json!({ "from": "server" })))
    }
}

/// Hosted on the server: inspects the run through reverse queries before
/// reporting success.
struct InspectAction {
    saw_node_data: Arc<AtomicBool>,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl CustomAction for InspectAction {
    async fn run(
        &self,
        ctx: &dyn ContextApi,
        arg: CustomActionArg,
    ) -> Result<bool, CapabilityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert_eq!(arg.reco_detail, json!({ "from": "server" }));
        let data = ctx.node_data(&arg.node_name).await;
        self.saw_node_data.store(data.is_some(), Ordering::SeqCst);
        Ok(true)
    }
}

fn quick(mut node: Value) -> Value {
    let obj = node.as_object_mut().unwrap();
    obj.insert("rate_limit".into(), json!(0));
    obj.insert("pre_delay".into(), json!(0));
    obj.insert("post_delay".into(), json!(0));
    node
}

#[tokio::test]
async fn remote_callbacks_drive_a_local_run() {
    let resource = Arc::new(Resource::new());
    resource
        .load_document(&json!({
            "Entry": quick(json!({
                "recognition": { "type": "Custom", "param": { "custom_recognition": "reroute" } },
                "action": { "type": "Custom", "param": { "custom_action": "inspect" } },
            })),
            "Exit": quick(json!({ "action": "StopTask" })),
        }))
        .unwrap();
    let tasker = Tasker::new(Arc::new(FakeDevice), resource.clone());

    let image_intact = Arc::new(AtomicBool::new(false));
    let reroute_accepted = Arc::new(AtomicBool::new(false));
    let saw_node_data = Arc::new(AtomicBool::new(false));
    let action_calls = Arc::new(AtomicUsize::new(0));

    let (client_end, server_end) = InProcDuplex::pair();
    let server = Arc::new(AgentServer::new(Arc::new(server_end)));
    server.register_custom_recognition(
        "reroute",
        Arc::new(RerouteReco {
            image_intact: image_intact.clone(),
            reroute_accepted: reroute_accepted.clone(),
        }),
    );
    server.register_custom_action(
        "inspect",
        Arc::new(InspectAction {
            saw_node_data: saw_node_data.clone(),
            calls: action_calls.clone(),
        }),
    );
    let serving = {
        let server = server.clone();
        tokio::spawn(async move { server.serve().await })
    };

    let client = AgentClient::new(Arc::new(client_end), tasker.clone());
    let advertised = client.connect().await.unwrap();
    assert_eq!(advertised.recognitions, vec!["reroute"]);
    assert_eq!(advertised.actions, vec!["inspect"]);
    // The stubs are installed under the advertised names.
    assert!(resource
        .custom_recognition_names()
        .await
        .contains(&"reroute".to_string()));

    let task_id = tasker.post("Entry", Value::Null).unwrap();
    assert_eq!(tasker.wait(task_id).await, Some(RunStatus::Succeeded));

    assert!(image_intact.load(Ordering::SeqCst));
    assert!(reroute_accepted.load(Ordering::SeqCst));
    assert!(saw_node_data.load(Ordering::SeqCst));
    assert_eq!(action_calls.load(Ordering::SeqCst), 1);

    // The reroute lived in the run's private graph only.
    assert!(resource.node("Entry").unwrap().next.is_empty());

    assert!(client.shut_down().await);
    serving.await.unwrap().unwrap();
}

#[tokio::test]
async fn proxy_failures_are_in_band() {
    // Peer never answers; every proxied operation degrades to its failure
    // value instead of erroring out.
    let (ours, _silent_peer) = InProcDuplex::pair();
    let transceiver =
        Arc::new(Transceiver::new(Arc::new(ours)).with_timeout(Duration::from_millis(100)));
    let resource = RemoteResource::new(transceiver, "res-1");

    assert!(!resource.valid().await);
    assert!(resource.node_data("Entry").await.is_none());
    assert!(resource.node_names().await.is_empty());
    assert!(matches!(
        resource.register_custom_recognition("local_only"),
        Err(CapabilityError::RemoteUnsupported(_))
    ));
}
