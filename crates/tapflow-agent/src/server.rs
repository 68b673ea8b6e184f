//! Agent server: the side that hosts custom callbacks.
//!
//! Serves one client over one channel. Registered callbacks run inside the
//! serve loop; the Remote* proxies they receive reach back to the client over
//! the same channel through reverse requests, which works because the client
//! pumps the channel for the whole duration of its forwarded call.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use tracing::{debug, info, warn};

use tapflow_protocols::{
    CustomAction, CustomActionArg, CustomRecognition, CustomRecognitionArg, RecoResult, Rect,
};

use crate::channel::Duplex;
use crate::error::AgentError;
use crate::message::{self, *};
use crate::remote::RemoteContext;
use crate::transceiver::Transceiver;

/// How long one serve-loop poll blocks before re-checking for shutdown.
const SERVE_POLL: Duration = Duration::from_millis(500);

/// Callback host endpoint of the agent channel.
pub struct AgentServer {
    transceiver: Arc<Transceiver>,
    recognitions: DashMap<String, Arc<dyn CustomRecognition>>,
    actions: DashMap<String, Arc<dyn CustomAction>>,
    version: String,
}

impl AgentServer {
    pub fn new(channel: Arc<dyn Duplex>) -> Self {
        Self {
            transceiver: Arc::new(Transceiver::new(channel)),
            recognitions: DashMap::new(),
            actions: DashMap::new(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn transceiver(&self) -> &Arc<Transceiver> {
        &self.transceiver
    }

    /// Register before `serve`; names registered later are not advertised.
    pub fn register_custom_recognition(
        &self,
        name: impl Into<String>,
        callback: Arc<dyn CustomRecognition>,
    ) {
        self.recognitions.insert(name.into(), callback);
    }

    pub fn register_custom_action(&self, name: impl Into<String>, callback: Arc<dyn CustomAction>) {
        self.actions.insert(name.into(), callback);
    }

    /// Stop serving; the loop exits at its next poll.
    pub fn shut_down(&self) {
        self.transceiver.cancel();
    }

    /// Serve the peer until it sends ShutDown or the channel is torn down.
    pub async fn serve(&self) -> Result<(), AgentError> {
        info!(version = %self.version, "agent server ready");
        loop {
            if self.transceiver.cancel_token().is_cancelled() {
                return Ok(());
            }
            let frame = match self.transceiver.recv_dispatched(SERVE_POLL).await {
                Ok(Some(frame)) => frame,
                Ok(None) => continue,
                Err(AgentError::ChannelClosed) => {
                    info!("client went away");
                    return Ok(());
                }
                Err(e) => return Err(e),
            };

            let name = message::type_name(&frame).unwrap_or_default().to_string();
            if name == StartUpRequest::TYPE_NAME {
                self.handle_start_up(&frame).await;
            } else if name == ShutDownRequest::TYPE_NAME {
                if let Err(e) = self.transceiver.send(&ShutDownResponse {}).await {
                    warn!(error = %e, "shutdown ack failed");
                }
                info!("shutdown requested by client");
                return Ok(());
            } else if name == CustomRecognitionRequest::TYPE_NAME {
                self.handle_recognition(&frame).await;
            } else if name == CustomActionRequest::TYPE_NAME {
                self.handle_action(&frame).await;
            } else {
                warn!(frame = %name, "unexpected frame dropped");
            }
        }
    }

    async fn handle_start_up(&self, frame: &Value) {
        let Some(req) = message::decode::<StartUpRequest>(frame) else {
            warn!("malformed startup request");
            return;
        };
        if req.version != self.version {
            warn!(ours = %self.version, theirs = %req.version, "agent version mismatch");
        }
        if req.protocol != PROTOCOL_VERSION {
            warn!(
                ours = PROTOCOL_VERSION,
                theirs = req.protocol,
                "agent protocol revision mismatch"
            );
        }
        let resp = StartUpResponse {
            version: self.version.clone(),
            protocol: PROTOCOL_VERSION,
            actions: self.actions.iter().map(|e| e.key().clone()).collect(),
            recognitions: self.recognitions.iter().map(|e| e.key().clone()).collect(),
        };
        if let Err(e) = self.transceiver.send(&resp).await {
            warn!(error = %e, "startup advertisement failed");
        }
    }

    fn context_for(&self, context_id: &str, task_id: i64, tasker_id: &str, controller_id: &str) -> RemoteContext {
        RemoteContext::new(
            self.transceiver.clone(),
            context_id,
            task_id,
            tasker_id,
            controller_id,
        )
    }

    async fn handle_recognition(&self, frame: &Value) {
        let Some(req) = message::decode::<CustomRecognitionRequest>(frame) else {
            warn!("malformed custom recognition request");
            return;
        };
        let miss = CustomRecognitionResponse {
            hit: false,
            hit_box: [0; 4],
            score: 0.0,
            detail: Value::Null,
        };

        let Some(callback) = self.recognitions.get(&req.custom_name).map(|c| c.clone()) else {
            warn!(name = %req.custom_name, "recognition not registered here");
            let _ = self.transceiver.send(&miss).await;
            return;
        };

        let image = self.transceiver.get_image(&req.image).unwrap_or_default();
        let ctx = self.context_for(&req.context_id, req.task_id, &req.tasker_id, &req.controller_id);
        let arg = CustomRecognitionArg {
            task_id: req.task_id,
            node_name: req.node_name.clone(),
            custom_name: req.custom_name.clone(),
            custom_param: req.custom_param,
            roi: Rect::from_array(req.roi),
            image,
        };

        debug!(name = %req.custom_name, node = %req.node_name, "running custom recognition");
        let resp = match callback.analyze(&ctx, arg).await {
            Ok(RecoResult {
                hit,
                hit_box,
                score,
                detail,
                ..
            }) => CustomRecognitionResponse {
                hit,
                hit_box: hit_box.to_array(),
                score,
                detail,
            },
            Err(e) => {
                warn!(name = %req.custom_name, error = %e, "custom recognition failed");
                miss
            }
        };
        if let Err(e) = self.transceiver.send(&resp).await {
            warn!(error = %e, "recognition response send failed");
        }
    }

    async fn handle_action(&self, frame: &Value) {
        let Some(req) = message::decode::<CustomActionRequest>(frame) else {
            warn!("malformed custom action request");
            return;
        };

        let Some(callback) = self.actions.get(&req.custom_name).map(|c| c.clone()) else {
            warn!(name = %req.custom_name, "action not registered here");
            let _ = self
                .transceiver
                .send(&CustomActionResponse { success: false })
                .await;
            return;
        };

        let ctx = self.context_for(&req.context_id, req.task_id, &req.tasker_id, &req.controller_id);
        let arg = CustomActionArg {
            task_id: req.task_id,
            node_name: req.node_name.clone(),
            custom_name: req.custom_name.clone(),
            custom_param: req.custom_param,
            reco_id: req.reco_id,
            hit_box: Rect::from_array(req.hit_box),
            reco_detail: req.reco_detail,
        };

        debug!(name = %req.custom_name, node = %req.node_name, "running custom action");
        let success = match callback.run(&ctx, arg).await {
            Ok(ok) => ok,
            Err(e) => {
                warn!(name = %req.custom_name, error = %e, "custom action failed");
                false
            }
        };
        if let Err(e) = self.transceiver.send(&CustomActionResponse { success }).await {
            warn!(error = %e, "action response send failed");
        }
    }
}
