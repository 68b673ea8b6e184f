//! Agent client: the side that owns the engine.
//!
//! Connects to an agent server, registers forwarding stubs for every custom
//! callback name the server advertises, and serves reverse requests against
//! its local Controller/Resource/Tasker/Context objects while a forwarded
//! call is outstanding.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use tapflow_engine::Tasker;
use tapflow_protocols::{
    CapabilityError, ContextApi, Controller, CustomAction, CustomActionArg, CustomRecognition,
    CustomRecognitionArg, RecoResult, Rect, ResourceApi, TaskerApi,
};

use crate::channel::Duplex;
use crate::error::AgentError;
use crate::message::{self, *};
use crate::transceiver::{ReverseDispatch, Transceiver};

/// Engine-side endpoint of the agent channel.
///
/// The opaque ids minted here scope every reverse request to this client's
/// objects; the server's proxies carry them back verbatim.
pub struct AgentClient {
    transceiver: Arc<Transceiver>,
    tasker: Arc<Tasker>,
    controller_id: String,
    resource_id: String,
    tasker_id: String,
    /// Contexts detached via ContextClone, alive until the client drops.
    cloned_contexts: DashMap<String, Arc<dyn ContextApi>>,
    peer: Mutex<Option<StartUpResponse>>,
}

impl AgentClient {
    pub fn new(channel: Arc<dyn Duplex>, tasker: Arc<Tasker>) -> Arc<Self> {
        Arc::new(Self {
            transceiver: Arc::new(Transceiver::new(channel)),
            tasker,
            controller_id: Uuid::new_v4().to_string(),
            resource_id: Uuid::new_v4().to_string(),
            tasker_id: Uuid::new_v4().to_string(),
            cloned_contexts: DashMap::new(),
            peer: Mutex::new(None),
        })
    }

    pub fn transceiver(&self) -> &Arc<Transceiver> {
        &self.transceiver
    }

    /// Advertisement received during `connect`, if any.
    pub fn peer_info(&self) -> Option<StartUpResponse> {
        self.peer.lock().clone()
    }

    /// Handshake with the server and install forwarding stubs for every
    /// custom callback name it advertises.
    pub async fn connect(self: &Arc<Self>) -> Result<StartUpResponse, AgentError> {
        let version = env!("CARGO_PKG_VERSION").to_string();
        let resp: StartUpResponse = self
            .transceiver
            .send_and_recv(&StartUpRequest {
                version: version.clone(),
                protocol: PROTOCOL_VERSION,
            })
            .await
            .ok_or(AgentError::Handshake)?;

        if resp.version != version {
            warn!(ours = %version, theirs = %resp.version, "agent version mismatch");
        }
        if resp.protocol != PROTOCOL_VERSION {
            warn!(
                ours = PROTOCOL_VERSION,
                theirs = resp.protocol,
                "agent protocol revision mismatch"
            );
        }

        let resource = self.tasker.resource();
        for name in &resp.recognitions {
            resource.register_custom_recognition(
                name.clone(),
                Arc::new(ForwardRecognition {
                    client: Arc::downgrade(self),
                }),
            );
        }
        for name in &resp.actions {
            resource.register_custom_action(
                name.clone(),
                Arc::new(ForwardAction {
                    client: Arc::downgrade(self),
                }),
            );
        }
        info!(
            recognitions = resp.recognitions.len(),
            actions = resp.actions.len(),
            server_version = %resp.version,
            "agent connected"
        );

        *self.peer.lock() = Some(resp.clone());
        Ok(resp)
    }

    /// Ask the server to shut down. True when it acknowledged.
    pub async fn shut_down(&self) -> bool {
        self.transceiver
            .send_and_recv::<_, ShutDownResponse>(&ShutDownRequest {})
            .await
            .is_some()
    }

    async fn forward_recognition(
        &self,
        ctx: &dyn ContextApi,
        arg: CustomRecognitionArg,
    ) -> Result<RecoResult, CapabilityError> {
        let image_id = self
            .transceiver
            .send_image(&arg.image)
            .await
            .ok_or(CapabilityError::NoResult("image transfer"))?;
        let context_id = Uuid::new_v4().to_string();
        let req = CustomRecognitionRequest {
            task_id: arg.task_id,
            node_name: arg.node_name,
            custom_name: arg.custom_name,
            custom_param: arg.custom_param,
            roi: arg.roi.to_array(),
            image: image_id,
            context_id: context_id.clone(),
            tasker_id: self.tasker_id.clone(),
            controller_id: self.controller_id.clone(),
            resource_id: self.resource_id.clone(),
        };
        let dispatch = ClientReverse {
            client: self,
            ctx,
            context_id: &context_id,
        };
        let resp: CustomRecognitionResponse = self
            .transceiver
            .send_and_recv_with(&req, Some(&dispatch))
            .await
            .ok_or(CapabilityError::NoResult("remote custom recognition"))?;
        Ok(if resp.hit {
            RecoResult::hit(Rect::from_array(resp.hit_box), resp.score).with_detail(resp.detail)
        } else {
            RecoResult::miss()
        })
    }

    async fn forward_action(
        &self,
        ctx: &dyn ContextApi,
        arg: CustomActionArg,
    ) -> Result<bool, CapabilityError> {
        let context_id = Uuid::new_v4().to_string();
        let req = CustomActionRequest {
            task_id: arg.task_id,
            node_name: arg.node_name,
            custom_name: arg.custom_name,
            custom_param: arg.custom_param,
            reco_id: arg.reco_id,
            hit_box: arg.hit_box.to_array(),
            reco_detail: arg.reco_detail,
            context_id: context_id.clone(),
            tasker_id: self.tasker_id.clone(),
            controller_id: self.controller_id.clone(),
            resource_id: self.resource_id.clone(),
        };
        let dispatch = ClientReverse {
            client: self,
            ctx,
            context_id: &context_id,
        };
        let resp: CustomActionResponse = self
            .transceiver
            .send_and_recv_with(&req, Some(&dispatch))
            .await
            .ok_or(CapabilityError::NoResult("remote custom action"))?;
        Ok(resp.success)
    }
}

/// Stub registered in the local resource for a server-advertised recognition.
struct ForwardRecognition {
    client: Weak<AgentClient>,
}

#[async_trait]
impl CustomRecognition for ForwardRecognition {
    async fn analyze(
        &self,
        ctx: &dyn ContextApi,
        arg: CustomRecognitionArg,
    ) -> Result<RecoResult, CapabilityError> {
        let client = self
            .client
            .upgrade()
            .ok_or(CapabilityError::NoResult("agent client dropped"))?;
        client.forward_recognition(ctx, arg).await
    }
}

/// Stub registered in the local resource for a server-advertised action.
struct ForwardAction {
    client: Weak<AgentClient>,
}

#[async_trait]
impl CustomAction for ForwardAction {
    async fn run(
        &self,
        ctx: &dyn ContextApi,
        arg: CustomActionArg,
    ) -> Result<bool, CapabilityError> {
        let client = self
            .client
            .upgrade()
            .ok_or(CapabilityError::NoResult("agent client dropped"))?;
        client.forward_action(ctx, arg).await
    }
}

/// Either the live borrowed context of the outstanding call or a detached
/// clone held by the registry.
enum CtxHandle<'a> {
    Borrowed(&'a dyn ContextApi),
    Shared(Arc<dyn ContextApi>),
}

impl CtxHandle<'_> {
    fn get(&self) -> &dyn ContextApi {
        match self {
            CtxHandle::Borrowed(c) => *c,
            CtxHandle::Shared(c) => c.as_ref(),
        }
    }
}

/// Per-call reverse dispatcher: serves the server's requests against the
/// client's objects while the forwarded call is outstanding.
struct ClientReverse<'a> {
    client: &'a AgentClient,
    ctx: &'a dyn ContextApi,
    context_id: &'a str,
}

impl ClientReverse<'_> {
    fn resolve_context(&self, id: &str) -> Option<CtxHandle<'_>> {
        if id == self.context_id {
            return Some(CtxHandle::Borrowed(self.ctx));
        }
        self.client
            .cloned_contexts
            .get(id)
            .map(|entry| CtxHandle::Shared(entry.value().clone()))
    }

    fn controller_known(&self, id: &str) -> bool {
        if id == self.client.controller_id {
            true
        } else {
            warn!(controller_id = %id, "reverse request names an unknown controller");
            false
        }
    }

    fn resource_known(&self, id: &str) -> bool {
        if id == self.client.resource_id {
            true
        } else {
            warn!(resource_id = %id, "reverse request names an unknown resource");
            false
        }
    }

    fn tasker_known(&self, id: &str) -> bool {
        if id == self.client.tasker_id {
            true
        } else {
            warn!(tasker_id = %id, "reverse request names an unknown tasker");
            false
        }
    }

    async fn handle_controller(&self, tx: &Transceiver, frame: &Value) -> Option<Value> {
        let controller = self.client.tasker.controller();

        if let Some(req) = message::decode::<ControllerPostClickReverseRequest>(frame) {
            let success =
                self.controller_known(&req.controller_id) && controller.click(req.x, req.y).await;
            return message::encode(&ControllerPostClickReverseResponse { success }).ok();
        }
        if let Some(req) = message::decode::<ControllerPostSwipeReverseRequest>(frame) {
            let success = self.controller_known(&req.controller_id)
                && controller
                    .swipe(req.x1, req.y1, req.x2, req.y2, req.duration)
                    .await;
            return message::encode(&ControllerPostSwipeReverseResponse { success }).ok();
        }
        if let Some(req) = message::decode::<ControllerPressKeyReverseRequest>(frame) {
            let success =
                self.controller_known(&req.controller_id) && controller.press_key(req.keycode).await;
            return message::encode(&ControllerPressKeyReverseResponse { success }).ok();
        }
        if let Some(req) = message::decode::<ControllerInputTextReverseRequest>(frame) {
            let success =
                self.controller_known(&req.controller_id) && controller.input_text(&req.text).await;
            return message::encode(&ControllerInputTextReverseResponse { success }).ok();
        }
        if let Some(req) = message::decode::<ControllerStartAppReverseRequest>(frame) {
            let success =
                self.controller_known(&req.controller_id) && controller.start_app(&req.intent).await;
            return message::encode(&ControllerStartAppReverseResponse { success }).ok();
        }
        if let Some(req) = message::decode::<ControllerStopAppReverseRequest>(frame) {
            let success =
                self.controller_known(&req.controller_id) && controller.stop_app(&req.intent).await;
            return message::encode(&ControllerStopAppReverseResponse { success }).ok();
        }
        if let Some(req) = message::decode::<ControllerShellReverseRequest>(frame) {
            let output = if self.controller_known(&req.controller_id) {
                controller.shell(&req.cmd, req.timeout_ms).await
            } else {
                None
            };
            return message::encode(&ControllerShellReverseResponse { output }).ok();
        }
        if let Some(req) = message::decode::<ControllerConnectedReverseRequest>(frame) {
            let connected =
                self.controller_known(&req.controller_id) && controller.connected().await;
            return message::encode(&ControllerConnectedReverseResponse { connected }).ok();
        }
        if let Some(req) = message::decode::<ControllerScreencapReverseRequest>(frame) {
            let image = if self.controller_known(&req.controller_id) {
                match controller.screencap().await {
                    Some(img) => tx.send_image(&img).await.unwrap_or_default(),
                    None => String::new(),
                }
            } else {
                String::new()
            };
            return message::encode(&ControllerScreencapReverseResponse { image }).ok();
        }
        if let Some(req) = message::decode::<ControllerCachedImageReverseRequest>(frame) {
            let image = if self.controller_known(&req.controller_id) {
                match controller.cached_image().await {
                    Some(img) => tx.send_image(&img).await.unwrap_or_default(),
                    None => String::new(),
                }
            } else {
                String::new()
            };
            return message::encode(&ControllerCachedImageReverseResponse { image }).ok();
        }
        None
    }

    async fn handle_resource(&self, frame: &Value) -> Option<Value> {
        let resource = self.client.tasker.resource();

        if let Some(req) = message::decode::<ResourceNodeDataReverseRequest>(frame) {
            let data = if self.resource_known(&req.resource_id) {
                resource.node_data(&req.node_name).await.unwrap_or(Value::Null)
            } else {
                Value::Null
            };
            return message::encode(&ResourceNodeDataReverseResponse { data }).ok();
        }
        if let Some(req) = message::decode::<ResourceNodeNamesReverseRequest>(frame) {
            let names = if self.resource_known(&req.resource_id) {
                resource.node_names().await
            } else {
                Vec::new()
            };
            return message::encode(&ResourceNodeNamesReverseResponse { names }).ok();
        }
        if let Some(req) = message::decode::<ResourceRecognitionNamesReverseRequest>(frame) {
            let names = if self.resource_known(&req.resource_id) {
                resource.custom_recognition_names().await
            } else {
                Vec::new()
            };
            return message::encode(&ResourceRecognitionNamesReverseResponse { names }).ok();
        }
        if let Some(req) = message::decode::<ResourceActionNamesReverseRequest>(frame) {
            let names = if self.resource_known(&req.resource_id) {
                resource.custom_action_names().await
            } else {
                Vec::new()
            };
            return message::encode(&ResourceActionNamesReverseResponse { names }).ok();
        }
        if let Some(req) = message::decode::<ResourceOverridePipelineReverseRequest>(frame) {
            let success = self.resource_known(&req.resource_id)
                && ResourceApi::override_pipeline(resource.as_ref(), req.pipeline_override).await;
            return message::encode(&ResourceOverridePipelineReverseResponse { success }).ok();
        }
        if let Some(req) = message::decode::<ResourceValidReverseRequest>(frame) {
            let valid = self.resource_known(&req.resource_id) && resource.valid().await;
            return message::encode(&ResourceValidReverseResponse { valid }).ok();
        }
        if let Some(req) = message::decode::<ResourceClearReverseRequest>(frame) {
            let success = self.resource_known(&req.resource_id) && resource.clear().await;
            return message::encode(&ResourceClearReverseResponse { success }).ok();
        }
        None
    }

    async fn handle_tasker(&self, frame: &Value) -> Option<Value> {
        let tasker = &self.client.tasker;

        if let Some(req) = message::decode::<TaskerPostTaskReverseRequest>(frame) {
            let task_id = if self.tasker_known(&req.tasker_id) {
                tasker
                    .post_task(&req.entry, req.pipeline_override)
                    .await
                    .unwrap_or(0)
            } else {
                0
            };
            return message::encode(&TaskerPostTaskReverseResponse { task_id }).ok();
        }
        if let Some(req) = message::decode::<TaskerStatusReverseRequest>(frame) {
            let status = if self.tasker_known(&req.tasker_id) {
                tasker
                    .status(req.task_id)
                    .await
                    .map(|s| s.to_wire())
                    .unwrap_or(0)
            } else {
                0
            };
            return message::encode(&TaskerStatusReverseResponse { status }).ok();
        }
        if let Some(req) = message::decode::<TaskerWaitReverseRequest>(frame) {
            let status = if self.tasker_known(&req.tasker_id) {
                tasker
                    .wait(req.task_id)
                    .await
                    .map(|s| s.to_wire())
                    .unwrap_or(0)
            } else {
                0
            };
            return message::encode(&TaskerWaitReverseResponse { status }).ok();
        }
        if let Some(req) = message::decode::<TaskerPostStopReverseRequest>(frame) {
            let success = self.tasker_known(&req.tasker_id) && tasker.post_stop().await;
            return message::encode(&TaskerPostStopReverseResponse { success }).ok();
        }
        if let Some(req) = message::decode::<TaskerRunningReverseRequest>(frame) {
            let running = self.tasker_known(&req.tasker_id) && tasker.running().await;
            return message::encode(&TaskerRunningReverseResponse { running }).ok();
        }
        if let Some(req) = message::decode::<TaskerStoppingReverseRequest>(frame) {
            let stopping = self.tasker_known(&req.tasker_id) && tasker.stopping().await;
            return message::encode(&TaskerStoppingReverseResponse { stopping }).ok();
        }
        if let Some(req) = message::decode::<TaskerTaskDetailReverseRequest>(frame) {
            let detail = if self.tasker_known(&req.tasker_id) {
                tasker
                    .task_detail(req.task_id)
                    .await
                    .and_then(|d| serde_json::to_value(d).ok())
                    .unwrap_or(Value::Null)
            } else {
                Value::Null
            };
            return message::encode(&TaskerTaskDetailReverseResponse { detail }).ok();
        }
        if let Some(req) = message::decode::<TaskerNodeDetailReverseRequest>(frame) {
            let detail = if self.tasker_known(&req.tasker_id) {
                tasker
                    .node_detail(req.node_id)
                    .await
                    .and_then(|d| serde_json::to_value(d).ok())
                    .unwrap_or(Value::Null)
            } else {
                Value::Null
            };
            return message::encode(&TaskerNodeDetailReverseResponse { detail }).ok();
        }
        if let Some(req) = message::decode::<TaskerRecoResultReverseRequest>(frame) {
            let result = if self.tasker_known(&req.tasker_id) {
                tasker.reco_result(req.reco_id).await
            } else {
                None
            };
            let resp = match result {
                Some(r) => TaskerRecoResultReverseResponse {
                    found: true,
                    hit: r.hit,
                    hit_box: r.hit_box.to_array(),
                    score: r.score,
                    detail: r.detail,
                },
                None => TaskerRecoResultReverseResponse {
                    found: false,
                    hit: false,
                    hit_box: [0; 4],
                    score: 0.0,
                    detail: Value::Null,
                },
            };
            return message::encode(&resp).ok();
        }
        if let Some(req) = message::decode::<TaskerLatestNodeReverseRequest>(frame) {
            let node_id = if self.tasker_known(&req.tasker_id) {
                tasker.latest_node(&req.node_name).await.unwrap_or(0)
            } else {
                0
            };
            return message::encode(&TaskerLatestNodeReverseResponse { node_id }).ok();
        }
        if let Some(req) = message::decode::<TaskerClearCacheReverseRequest>(frame) {
            let success = self.tasker_known(&req.tasker_id) && tasker.clear_cache().await;
            return message::encode(&TaskerClearCacheReverseResponse { success }).ok();
        }
        None
    }

    async fn handle_context(&self, tx: &Transceiver, frame: &Value) -> Option<Value> {
        if let Some(req) = message::decode::<ContextRunTaskReverseRequest>(frame) {
            let status = match self.resolve_context(&req.context_id) {
                Some(ctx) => ctx
                    .get()
                    .run_task(&req.entry, req.pipeline_override)
                    .await
                    .map(|s| s.to_wire())
                    .unwrap_or(0),
                None => 0,
            };
            return message::encode(&ContextRunTaskReverseResponse { status }).ok();
        }
        if let Some(req) = message::decode::<ContextRunRecognitionReverseRequest>(frame) {
            let result = match self.resolve_context(&req.context_id) {
                Some(ctx) => {
                    let image = tx.get_image(&req.image).unwrap_or_default();
                    ctx.get().run_recognition(&req.node_name, image).await
                }
                None => None,
            };
            let resp = match result {
                Some(r) => ContextRunRecognitionReverseResponse {
                    found: true,
                    hit: r.hit,
                    hit_box: r.hit_box.to_array(),
                    score: r.score,
                    detail: r.detail,
                },
                None => ContextRunRecognitionReverseResponse {
                    found: false,
                    hit: false,
                    hit_box: [0; 4],
                    score: 0.0,
                    detail: Value::Null,
                },
            };
            return message::encode(&resp).ok();
        }
        if let Some(req) = message::decode::<ContextRunActionReverseRequest>(frame) {
            let success = match self.resolve_context(&req.context_id) {
                Some(ctx) => {
                    ctx.get()
                        .run_action(&req.node_name, Rect::from_array(req.hit_box), req.reco_detail)
                        .await
                }
                None => None,
            };
            return message::encode(&ContextRunActionReverseResponse { success }).ok();
        }
        if let Some(req) = message::decode::<ContextOverridePipelineReverseRequest>(frame) {
            let success = match self.resolve_context(&req.context_id) {
                Some(ctx) => ctx.get().override_pipeline(req.pipeline_override).await,
                None => false,
            };
            return message::encode(&ContextOverridePipelineReverseResponse { success }).ok();
        }
        if let Some(req) = message::decode::<ContextOverrideNextReverseRequest>(frame) {
            let success = match self.resolve_context(&req.context_id) {
                Some(ctx) => ctx.get().override_next(&req.node_name, req.next).await,
                None => false,
            };
            return message::encode(&ContextOverrideNextReverseResponse { success }).ok();
        }
        if let Some(req) = message::decode::<ContextNodeDataReverseRequest>(frame) {
            let data = match self.resolve_context(&req.context_id) {
                Some(ctx) => ctx
                    .get()
                    .node_data(&req.node_name)
                    .await
                    .unwrap_or(Value::Null),
                None => Value::Null,
            };
            return message::encode(&ContextNodeDataReverseResponse { data }).ok();
        }
        if let Some(req) = message::decode::<ContextCloneReverseRequest>(frame) {
            let context_id = match self.resolve_context(&req.context_id) {
                Some(ctx) => {
                    let cloned: Arc<dyn ContextApi> = Arc::from(ctx.get().clone_context().await);
                    let id = Uuid::new_v4().to_string();
                    self.client.cloned_contexts.insert(id.clone(), cloned);
                    debug!(from = %req.context_id, to = %id, "context cloned for remote caller");
                    id
                }
                None => String::new(),
            };
            return message::encode(&ContextCloneReverseResponse { context_id }).ok();
        }
        None
    }
}

#[async_trait]
impl ReverseDispatch for ClientReverse<'_> {
    async fn handle(&self, tx: &Transceiver, frame: Value) -> Option<Value> {
        let name = message::type_name(&frame)?;
        let response = if name.starts_with("Controller") {
            self.handle_controller(tx, &frame).await
        } else if name.starts_with("Resource") {
            self.handle_resource(&frame).await
        } else if name.starts_with("Tasker") {
            self.handle_tasker(&frame).await
        } else if name.starts_with("Context") {
            self.handle_context(tx, &frame).await
        } else {
            None
        };
        if response.is_none() {
            warn!(frame = %name, "reverse request not recognized");
        }
        response
    }
}
