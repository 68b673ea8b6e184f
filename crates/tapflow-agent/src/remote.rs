//! Proxy objects for the peer's Controller/Resource/Tasker/Context.
//!
//! Every operation is exactly one reverse round-trip carrying the object's
//! opaque id; a failed round-trip surfaces as the operation's ordinary
//! failure value and is never retried here. Operations whose registration
//! tables live on the owning side are rejected outright.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use tapflow_protocols::{
    CapabilityError, ContextApi, Controller, Image, NodeId, NodeRunRecord, RecoId, RecoResult,
    Rect, ResourceApi, RunStatus, TaskId, TaskRunRecord, TaskerApi,
};

use crate::message::*;
use crate::transceiver::Transceiver;

/// Controller living in the peer process.
pub struct RemoteController {
    transceiver: Arc<Transceiver>,
    controller_id: String,
}

impl RemoteController {
    pub fn new(transceiver: Arc<Transceiver>, controller_id: impl Into<String>) -> Self {
        Self {
            transceiver,
            controller_id: controller_id.into(),
        }
    }

    fn id(&self) -> String {
        self.controller_id.clone()
    }
}

#[async_trait]
impl Controller for RemoteController {
    async fn screencap(&self) -> Option<Image> {
        let resp: ControllerScreencapReverseResponse = self
            .transceiver
            .send_and_recv(&ControllerScreencapReverseRequest { controller_id: self.id() })
            .await?;
        if resp.image.is_empty() {
            return None;
        }
        self.transceiver.get_image(&resp.image)
    }

    async fn click(&self, x: i32, y: i32) -> bool {
        self.transceiver
            .send_and_recv::<_, ControllerPostClickReverseResponse>(
                &ControllerPostClickReverseRequest {
                    controller_id: self.id(),
                    x,
                    y,
                },
            )
            .await
            .is_some_and(|r| r.success)
    }

    async fn swipe(&self, x1: i32, y1: i32, x2: i32, y2: i32, duration_ms: u32) -> bool {
        self.transceiver
            .send_and_recv::<_, ControllerPostSwipeReverseResponse>(
                &ControllerPostSwipeReverseRequest {
                    controller_id: self.id(),
                    x1,
                    y1,
                    x2,
                    y2,
                    duration: duration_ms,
                },
            )
            .await
            .is_some_and(|r| r.success)
    }

    async fn press_key(&self, keycode: i32) -> bool {
        self.transceiver
            .send_and_recv::<_, ControllerPressKeyReverseResponse>(
                &ControllerPressKeyReverseRequest {
                    controller_id: self.id(),
                    keycode,
                },
            )
            .await
            .is_some_and(|r| r.success)
    }

    async fn input_text(&self, text: &str) -> bool {
        self.transceiver
            .send_and_recv::<_, ControllerInputTextReverseResponse>(
                &ControllerInputTextReverseRequest {
                    controller_id: self.id(),
                    text: text.to_string(),
                },
            )
            .await
            .is_some_and(|r| r.success)
    }

    async fn start_app(&self, intent: &str) -> bool {
        self.transceiver
            .send_and_recv::<_, ControllerStartAppReverseResponse>(
                &ControllerStartAppReverseRequest {
                    controller_id: self.id(),
                    intent: intent.to_string(),
                },
            )
            .await
            .is_some_and(|r| r.success)
    }

    async fn stop_app(&self, intent: &str) -> bool {
        self.transceiver
            .send_and_recv::<_, ControllerStopAppReverseResponse>(
                &ControllerStopAppReverseRequest {
                    controller_id: self.id(),
                    intent: intent.to_string(),
                },
            )
            .await
            .is_some_and(|r| r.success)
    }

    async fn shell(&self, cmd: &str, timeout_ms: u64) -> Option<String> {
        let resp: ControllerShellReverseResponse = self
            .transceiver
            .send_and_recv(&ControllerShellReverseRequest {
                controller_id: self.id(),
                cmd: cmd.to_string(),
                timeout_ms,
            })
            .await?;
        resp.output
    }

    async fn connected(&self) -> bool {
        self.transceiver
            .send_and_recv::<_, ControllerConnectedReverseResponse>(
                &ControllerConnectedReverseRequest { controller_id: self.id() },
            )
            .await
            .is_some_and(|r| r.connected)
    }

    async fn cached_image(&self) -> Option<Image> {
        let resp: ControllerCachedImageReverseResponse = self
            .transceiver
            .send_and_recv(&ControllerCachedImageReverseRequest { controller_id: self.id() })
            .await?;
        if resp.image.is_empty() {
            return None;
        }
        self.transceiver.get_image(&resp.image)
    }
}

/// Resource living in the peer process.
pub struct RemoteResource {
    transceiver: Arc<Transceiver>,
    resource_id: String,
}

impl RemoteResource {
    pub fn new(transceiver: Arc<Transceiver>, resource_id: impl Into<String>) -> Self {
        Self {
            transceiver,
            resource_id: resource_id.into(),
        }
    }

    fn id(&self) -> String {
        self.resource_id.clone()
    }

    /// Registration tables live with the real resource; a proxy cannot host
    /// callbacks.
    pub fn register_custom_recognition(&self, _name: &str) -> Result<(), CapabilityError> {
        Err(CapabilityError::RemoteUnsupported(
            "custom recognition registration",
        ))
    }

    pub fn register_custom_action(&self, _name: &str) -> Result<(), CapabilityError> {
        Err(CapabilityError::RemoteUnsupported("custom action registration"))
    }
}

#[async_trait]
impl ResourceApi for RemoteResource {
    async fn node_data(&self, node: &str) -> Option<Value> {
        let resp: ResourceNodeDataReverseResponse = self
            .transceiver
            .send_and_recv(&ResourceNodeDataReverseRequest {
                resource_id: self.id(),
                node_name: node.to_string(),
            })
            .await?;
        (!resp.data.is_null()).then_some(resp.data)
    }

    async fn node_names(&self) -> Vec<String> {
        self.transceiver
            .send_and_recv::<_, ResourceNodeNamesReverseResponse>(
                &ResourceNodeNamesReverseRequest { resource_id: self.id() },
            )
            .await
            .map(|r| r.names)
            .unwrap_or_default()
    }

    async fn custom_recognition_names(&self) -> Vec<String> {
        self.transceiver
            .send_and_recv::<_, ResourceRecognitionNamesReverseResponse>(
                &ResourceRecognitionNamesReverseRequest { resource_id: self.id() },
            )
            .await
            .map(|r| r.names)
            .unwrap_or_default()
    }

    async fn custom_action_names(&self) -> Vec<String> {
        self.transceiver
            .send_and_recv::<_, ResourceActionNamesReverseResponse>(
                &ResourceActionNamesReverseRequest { resource_id: self.id() },
            )
            .await
            .map(|r| r.names)
            .unwrap_or_default()
    }

    async fn override_pipeline(&self, pipeline_override: Value) -> bool {
        self.transceiver
            .send_and_recv::<_, ResourceOverridePipelineReverseResponse>(
                &ResourceOverridePipelineReverseRequest {
                    resource_id: self.id(),
                    pipeline_override,
                },
            )
            .await
            .is_some_and(|r| r.success)
    }

    async fn valid(&self) -> bool {
        self.transceiver
            .send_and_recv::<_, ResourceValidReverseResponse>(&ResourceValidReverseRequest {
                resource_id: self.id(),
            })
            .await
            .is_some_and(|r| r.valid)
    }

    async fn clear(&self) -> bool {
        self.transceiver
            .send_and_recv::<_, ResourceClearReverseResponse>(&ResourceClearReverseRequest {
                resource_id: self.id(),
            })
            .await
            .is_some_and(|r| r.success)
    }
}

/// Tasker living in the peer process.
pub struct RemoteTasker {
    transceiver: Arc<Transceiver>,
    tasker_id: String,
}

impl RemoteTasker {
    pub fn new(transceiver: Arc<Transceiver>, tasker_id: impl Into<String>) -> Self {
        Self {
            transceiver,
            tasker_id: tasker_id.into(),
        }
    }

    fn id(&self) -> String {
        self.tasker_id.clone()
    }

    /// Event sinks attach to the real tasker only.
    pub fn add_event_sink(&self) -> Result<(), CapabilityError> {
        Err(CapabilityError::RemoteUnsupported("event sink registration"))
    }
}

#[async_trait]
impl TaskerApi for RemoteTasker {
    async fn post_task(&self, entry: &str, pipeline_override: Value) -> Option<TaskId> {
        let resp: TaskerPostTaskReverseResponse = self
            .transceiver
            .send_and_recv(&TaskerPostTaskReverseRequest {
                tasker_id: self.id(),
                entry: entry.to_string(),
                pipeline_override,
            })
            .await?;
        (resp.task_id != 0).then_some(resp.task_id)
    }

    async fn status(&self, task_id: TaskId) -> Option<RunStatus> {
        let resp: TaskerStatusReverseResponse = self
            .transceiver
            .send_and_recv(&TaskerStatusReverseRequest {
                tasker_id: self.id(),
                task_id,
            })
            .await?;
        RunStatus::from_wire(resp.status)
    }

    async fn wait(&self, task_id: TaskId) -> Option<RunStatus> {
        let resp: TaskerWaitReverseResponse = self
            .transceiver
            .send_and_recv(&TaskerWaitReverseRequest {
                tasker_id: self.id(),
                task_id,
            })
            .await?;
        RunStatus::from_wire(resp.status)
    }

    async fn post_stop(&self) -> bool {
        self.transceiver
            .send_and_recv::<_, TaskerPostStopReverseResponse>(&TaskerPostStopReverseRequest {
                tasker_id: self.id(),
            })
            .await
            .is_some_and(|r| r.success)
    }

    async fn running(&self) -> bool {
        self.transceiver
            .send_and_recv::<_, TaskerRunningReverseResponse>(&TaskerRunningReverseRequest {
                tasker_id: self.id(),
            })
            .await
            .is_some_and(|r| r.running)
    }

    async fn stopping(&self) -> bool {
        self.transceiver
            .send_and_recv::<_, TaskerStoppingReverseResponse>(&TaskerStoppingReverseRequest {
                tasker_id: self.id(),
            })
            .await
            .is_some_and(|r| r.stopping)
    }

    async fn task_detail(&self, task_id: TaskId) -> Option<TaskRunRecord> {
        let resp: TaskerTaskDetailReverseResponse = self
            .transceiver
            .send_and_recv(&TaskerTaskDetailReverseRequest {
                tasker_id: self.id(),
                task_id,
            })
            .await?;
        serde_json::from_value(resp.detail).ok()
    }

    async fn node_detail(&self, node_id: NodeId) -> Option<NodeRunRecord> {
        let resp: TaskerNodeDetailReverseResponse = self
            .transceiver
            .send_and_recv(&TaskerNodeDetailReverseRequest {
                tasker_id: self.id(),
                node_id,
            })
            .await?;
        serde_json::from_value(resp.detail).ok()
    }

    async fn reco_result(&self, reco_id: RecoId) -> Option<RecoResult> {
        let resp: TaskerRecoResultReverseResponse = self
            .transceiver
            .send_and_recv(&TaskerRecoResultReverseRequest {
                tasker_id: self.id(),
                reco_id,
            })
            .await?;
        if !resp.found {
            return None;
        }
        let mut result = if resp.hit {
            RecoResult::hit(Rect::from_array(resp.hit_box), resp.score)
        } else {
            RecoResult::miss()
        };
        result.detail = resp.detail;
        Some(result)
    }

    async fn latest_node(&self, node_name: &str) -> Option<NodeId> {
        let resp: TaskerLatestNodeReverseResponse = self
            .transceiver
            .send_and_recv(&TaskerLatestNodeReverseRequest {
                tasker_id: self.id(),
                node_name: node_name.to_string(),
            })
            .await?;
        (resp.node_id != 0).then_some(resp.node_id)
    }

    async fn clear_cache(&self) -> bool {
        self.transceiver
            .send_and_recv::<_, TaskerClearCacheReverseResponse>(&TaskerClearCacheReverseRequest {
                tasker_id: self.id(),
            })
            .await
            .is_some_and(|r| r.success)
    }
}

/// Context of the run that invoked a remoted custom callback.
pub struct RemoteContext {
    transceiver: Arc<Transceiver>,
    context_id: String,
    task_id: TaskId,
    controller_id: String,
    tasker: RemoteTasker,
}

impl RemoteContext {
    pub fn new(
        transceiver: Arc<Transceiver>,
        context_id: impl Into<String>,
        task_id: TaskId,
        tasker_id: impl Into<String>,
        controller_id: impl Into<String>,
    ) -> Self {
        let tasker_id = tasker_id.into();
        Self {
            tasker: RemoteTasker::new(transceiver.clone(), tasker_id),
            transceiver,
            context_id: context_id.into(),
            task_id,
            controller_id: controller_id.into(),
        }
    }

    fn id(&self) -> String {
        self.context_id.clone()
    }

    /// The controller bound to the run, proxied.
    pub fn controller(&self) -> RemoteController {
        RemoteController::new(self.transceiver.clone(), self.controller_id.clone())
    }
}

#[async_trait]
impl ContextApi for RemoteContext {
    async fn run_task(&self, entry: &str, pipeline_override: Value) -> Option<RunStatus> {
        let resp: ContextRunTaskReverseResponse = self
            .transceiver
            .send_and_recv(&ContextRunTaskReverseRequest {
                context_id: self.id(),
                entry: entry.to_string(),
                pipeline_override,
            })
            .await?;
        RunStatus::from_wire(resp.status)
    }

    async fn run_recognition(&self, node: &str, image: Image) -> Option<RecoResult> {
        let image_id = self.transceiver.send_image(&image).await?;
        let resp: ContextRunRecognitionReverseResponse = self
            .transceiver
            .send_and_recv(&ContextRunRecognitionReverseRequest {
                context_id: self.id(),
                node_name: node.to_string(),
                image: image_id,
            })
            .await?;
        if !resp.found {
            return None;
        }
        let mut result = if resp.hit {
            RecoResult::hit(Rect::from_array(resp.hit_box), resp.score)
        } else {
            RecoResult::miss()
        };
        result.detail = resp.detail;
        Some(result)
    }

    async fn run_action(&self, node: &str, hit_box: Rect, reco_detail: Value) -> Option<bool> {
        let resp: ContextRunActionReverseResponse = self
            .transceiver
            .send_and_recv(&ContextRunActionReverseRequest {
                context_id: self.id(),
                node_name: node.to_string(),
                hit_box: hit_box.to_array(),
                reco_detail,
            })
            .await?;
        resp.success
    }

    async fn override_pipeline(&self, pipeline_override: Value) -> bool {
        self.transceiver
            .send_and_recv::<_, ContextOverridePipelineReverseResponse>(
                &ContextOverridePipelineReverseRequest {
                    context_id: self.id(),
                    pipeline_override,
                },
            )
            .await
            .is_some_and(|r| r.success)
    }

    async fn override_next(&self, node: &str, next: Vec<String>) -> bool {
        self.transceiver
            .send_and_recv::<_, ContextOverrideNextReverseResponse>(
                &ContextOverrideNextReverseRequest {
                    context_id: self.id(),
                    node_name: node.to_string(),
                    next,
                },
            )
            .await
            .is_some_and(|r| r.success)
    }

    async fn node_data(&self, node: &str) -> Option<Value> {
        let resp: ContextNodeDataReverseResponse = self
            .transceiver
            .send_and_recv(&ContextNodeDataReverseRequest {
                context_id: self.id(),
                node_name: node.to_string(),
            })
            .await?;
        (!resp.data.is_null()).then_some(resp.data)
    }

    fn task_id(&self) -> TaskId {
        self.task_id
    }

    fn tasker(&self) -> &dyn TaskerApi {
        &self.tasker
    }

    async fn clone_context(&self) -> Box<dyn ContextApi> {
        let cloned = self
            .transceiver
            .send_and_recv::<_, ContextCloneReverseResponse>(&ContextCloneReverseRequest {
                context_id: self.id(),
            })
            .await;
        let context_id = match cloned {
            Some(resp) => resp.context_id,
            None => {
                warn!(context_id = %self.context_id, "clone round-trip failed, reusing the same remote context");
                self.context_id.clone()
            }
        };
        Box::new(RemoteContext::new(
            self.transceiver.clone(),
            context_id,
            self.task_id,
            self.tasker.tasker_id.clone(),
            self.controller_id.clone(),
        ))
    }
}
