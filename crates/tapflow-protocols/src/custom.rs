//! User-supplied recognition and action callbacks.
//!
//! These are the extension seams of the node graph: a node whose recognition
//! or action type is `Custom` is dispatched to a registered implementation of
//! one of these traits, locally or over the agent channel.

use async_trait::async_trait;
use serde_json::Value;

use crate::context::ContextApi;
use crate::error::CapabilityError;
use crate::result::RecoResult;
use crate::types::{Image, Rect};

/// Everything a custom recognition sees about its invocation.
#[derive(Debug, Clone)]
pub struct CustomRecognitionArg {
    pub task_id: i64,
    /// Name of the node being recognized.
    pub node_name: String,
    /// Registered name the node asked for.
    pub custom_name: String,
    /// Free-form parameter block from the node definition.
    pub custom_param: Value,
    /// Region of interest already resolved against the current frame.
    pub roi: Rect,
    /// The frame the recognition should run against.
    pub image: Image,
}

/// Everything a custom action sees about its invocation.
#[derive(Debug, Clone)]
pub struct CustomActionArg {
    pub task_id: i64,
    pub node_name: String,
    pub custom_name: String,
    pub custom_param: Value,
    /// Id of the recognition result that triggered this action.
    pub reco_id: i64,
    /// Bounding box of that recognition result.
    pub hit_box: Rect,
    pub reco_detail: Value,
}

/// A pluggable detector.
///
/// Returning `Ok` with `hit == false` is a normal miss; returning `Err` is
/// treated as a miss too, with the error logged. Implementations may call
/// back into the engine through `ctx` (nested runs, pipeline overrides).
#[async_trait]
pub trait CustomRecognition: Send + Sync {
    async fn analyze(
        &self,
        ctx: &dyn ContextApi,
        arg: CustomRecognitionArg,
    ) -> Result<RecoResult, CapabilityError>;
}

/// A pluggable action.
///
/// `Ok(false)` and `Err` both fail the node's action step.
#[async_trait]
pub trait CustomAction: Send + Sync {
    async fn run(
        &self,
        ctx: &dyn ContextApi,
        arg: CustomActionArg,
    ) -> Result<bool, CapabilityError>;
}
