//! Wire message catalogue.
//!
//! Every frame on the agent channel is a JSON object carrying a `_TypeName`
//! marker naming its own shape; matching a received frame against an expected
//! message type is a marker comparison followed by ordinary deserialization.
//! The catalogue is table-driven: one `wire_messages!` entry per shape, with
//! the struct name doubling as the on-wire marker. Field names are the wire
//! contract and must not be renamed.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::AgentError;

/// Marker key present in every frame.
pub const TYPE_KEY: &str = "_TypeName";

/// Protocol revision spoken by this build.
pub const PROTOCOL_VERSION: u32 = 1;

pub trait WireMessage: Serialize + DeserializeOwned {
    const TYPE_NAME: &'static str;
}

/// Serialize a message with its `_TypeName` marker attached.
pub fn encode<M: WireMessage>(msg: &M) -> Result<Value, AgentError> {
    match serde_json::to_value(msg)? {
        Value::Object(mut map) => {
            map.insert(TYPE_KEY.to_string(), Value::String(M::TYPE_NAME.to_string()));
            Ok(Value::Object(map))
        }
        _ => Err(AgentError::NotAnObject),
    }
}

/// The marker of a received frame, if it has one.
pub fn type_name(frame: &Value) -> Option<&str> {
    frame.get(TYPE_KEY)?.as_str()
}

/// Decode `frame` as `M`. `None` when the marker does not match or the body
/// fails to parse.
pub fn decode<M: WireMessage>(frame: &Value) -> Option<M> {
    if type_name(frame) != Some(M::TYPE_NAME) {
        return None;
    }
    serde_json::from_value(frame.clone()).ok()
}

macro_rules! wire_messages {
    ($($(#[$meta:meta])* $name:ident { $($field:ident: $ty:ty),* $(,)? })*) => {$(
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
        pub struct $name {
            $(pub $field: $ty,)*
        }

        impl WireMessage for $name {
            const TYPE_NAME: &'static str = stringify!($name);
        }
    )*};
}

wire_messages! {
    /// Announces a raw image; the next frame is `size` bytes of pixel data.
    ImageHeader {
        uuid: String,
        rows: i32,
        cols: i32,
        r#type: i32,
        size: u64,
    }

    /// Announces an encoded image (PNG etc.); the next frame is the blob.
    ImageEncodedHeader {
        uuid: String,
        size: u64,
    }

    StartUpRequest {
        version: String,
        protocol: u32,
    }

    /// Server advertisement: build version plus the custom callback names it
    /// can serve.
    StartUpResponse {
        version: String,
        protocol: u32,
        actions: Vec<String>,
        recognitions: Vec<String>,
    }

    ShutDownRequest {}
    ShutDownResponse {}

    /// Client asks the server to run a registered custom recognition.
    /// `image` names a transfer sent over the image channel beforehand; the
    /// opaque ids let the callback reach back into the client's objects.
    CustomRecognitionRequest {
        task_id: i64,
        node_name: String,
        custom_name: String,
        custom_param: Value,
        roi: [i32; 4],
        image: String,
        context_id: String,
        tasker_id: String,
        controller_id: String,
        resource_id: String,
    }

    CustomRecognitionResponse {
        hit: bool,
        hit_box: [i32; 4],
        score: f64,
        detail: Value,
    }

    CustomActionRequest {
        task_id: i64,
        node_name: String,
        custom_name: String,
        custom_param: Value,
        reco_id: i64,
        hit_box: [i32; 4],
        reco_detail: Value,
        context_id: String,
        tasker_id: String,
        controller_id: String,
        resource_id: String,
    }

    CustomActionResponse {
        success: bool,
    }

    // Controller surface, server -> client.

    ControllerPostClickReverseRequest { controller_id: String, x: i32, y: i32 }
    ControllerPostClickReverseResponse { success: bool }

    ControllerPostSwipeReverseRequest {
        controller_id: String,
        x1: i32,
        y1: i32,
        x2: i32,
        y2: i32,
        duration: u32,
    }
    ControllerPostSwipeReverseResponse { success: bool }

    ControllerPressKeyReverseRequest { controller_id: String, keycode: i32 }
    ControllerPressKeyReverseResponse { success: bool }

    ControllerInputTextReverseRequest { controller_id: String, text: String }
    ControllerInputTextReverseResponse { success: bool }

    ControllerStartAppReverseRequest { controller_id: String, intent: String }
    ControllerStartAppReverseResponse { success: bool }

    ControllerStopAppReverseRequest { controller_id: String, intent: String }
    ControllerStopAppReverseResponse { success: bool }

    ControllerShellReverseRequest { controller_id: String, cmd: String, timeout_ms: u64 }
    ControllerShellReverseResponse { output: Option<String> }

    /// Response `image` is a transfer id, empty when the capture failed.
    ControllerScreencapReverseRequest { controller_id: String }
    ControllerScreencapReverseResponse { image: String }

    ControllerCachedImageReverseRequest { controller_id: String }
    ControllerCachedImageReverseResponse { image: String }

    ControllerConnectedReverseRequest { controller_id: String }
    ControllerConnectedReverseResponse { connected: bool }

    // Resource surface, server -> client.

    ResourceNodeDataReverseRequest { resource_id: String, node_name: String }
    ResourceNodeDataReverseResponse { data: Value }

    ResourceNodeNamesReverseRequest { resource_id: String }
    ResourceNodeNamesReverseResponse { names: Vec<String> }

    ResourceRecognitionNamesReverseRequest { resource_id: String }
    ResourceRecognitionNamesReverseResponse { names: Vec<String> }

    ResourceActionNamesReverseRequest { resource_id: String }
    ResourceActionNamesReverseResponse { names: Vec<String> }

    ResourceOverridePipelineReverseRequest { resource_id: String, pipeline_override: Value }
    ResourceOverridePipelineReverseResponse { success: bool }

    ResourceValidReverseRequest { resource_id: String }
    ResourceValidReverseResponse { valid: bool }

    ResourceClearReverseRequest { resource_id: String }
    ResourceClearReverseResponse { success: bool }

    // Tasker surface, server -> client. Status fields use the RunStatus wire
    // codes, 0 meaning unknown; id 0 means no result.

    TaskerPostTaskReverseRequest { tasker_id: String, entry: String, pipeline_override: Value }
    TaskerPostTaskReverseResponse { task_id: i64 }

    TaskerStatusReverseRequest { tasker_id: String, task_id: i64 }
    TaskerStatusReverseResponse { status: i32 }

    TaskerWaitReverseRequest { tasker_id: String, task_id: i64 }
    TaskerWaitReverseResponse { status: i32 }

    TaskerPostStopReverseRequest { tasker_id: String }
    TaskerPostStopReverseResponse { success: bool }

    TaskerRunningReverseRequest { tasker_id: String }
    TaskerRunningReverseResponse { running: bool }

    TaskerStoppingReverseRequest { tasker_id: String }
    TaskerStoppingReverseResponse { stopping: bool }

    TaskerTaskDetailReverseRequest { tasker_id: String, task_id: i64 }
    TaskerTaskDetailReverseResponse { detail: Value }

    TaskerNodeDetailReverseRequest { tasker_id: String, node_id: i64 }
    TaskerNodeDetailReverseResponse { detail: Value }

    TaskerRecoResultReverseRequest { tasker_id: String, reco_id: i64 }
    TaskerRecoResultReverseResponse {
        found: bool,
        hit: bool,
        hit_box: [i32; 4],
        score: f64,
        detail: Value,
    }

    TaskerLatestNodeReverseRequest { tasker_id: String, node_name: String }
    TaskerLatestNodeReverseResponse { node_id: i64 }

    TaskerClearCacheReverseRequest { tasker_id: String }
    TaskerClearCacheReverseResponse { success: bool }

    // Context surface, server -> client.

    ContextRunTaskReverseRequest { context_id: String, entry: String, pipeline_override: Value }
    ContextRunTaskReverseResponse { status: i32 }

    ContextRunRecognitionReverseRequest { context_id: String, node_name: String, image: String }
    ContextRunRecognitionReverseResponse {
        found: bool,
        hit: bool,
        hit_box: [i32; 4],
        score: f64,
        detail: Value,
    }

    ContextRunActionReverseRequest {
        context_id: String,
        node_name: String,
        hit_box: [i32; 4],
        reco_detail: Value,
    }
    ContextRunActionReverseResponse { success: Option<bool> }

    ContextOverridePipelineReverseRequest { context_id: String, pipeline_override: Value }
    ContextOverridePipelineReverseResponse { success: bool }

    ContextOverrideNextReverseRequest { context_id: String, node_name: String, next: Vec<String> }
    ContextOverrideNextReverseResponse { success: bool }

    ContextNodeDataReverseRequest { context_id: String, node_name: String }
    ContextNodeDataReverseResponse { data: Value }

    /// Clone produces a fresh context registered on the client under a new id.
    ContextCloneReverseRequest { context_id: String }
    ContextCloneReverseResponse { context_id: String }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn marker_is_attached_on_encode() {
        let frame = encode(&ControllerPostClickReverseRequest {
            controller_id: "c-1".into(),
            x: 10,
            y: 20,
        })
        .unwrap();
        assert_eq!(
            frame,
            json!({
                "_TypeName": "ControllerPostClickReverseRequest",
                "controller_id": "c-1",
                "x": 10,
                "y": 20,
            })
        );
    }

    #[test]
    fn decode_requires_matching_marker() {
        let frame = encode(&ShutDownRequest {}).unwrap();
        assert!(decode::<ShutDownRequest>(&frame).is_some());
        assert!(decode::<ShutDownResponse>(&frame).is_none());
        assert!(decode::<ShutDownRequest>(&json!({"no": "marker"})).is_none());
    }

    #[test]
    fn non_object_payload_is_rejected_in_band() {
        #[derive(serde::Serialize, serde::Deserialize)]
        struct Bare(String);
        impl WireMessage for Bare {
            const TYPE_NAME: &'static str = "Bare";
        }
        assert!(matches!(
            encode(&Bare("x".into())),
            Err(AgentError::NotAnObject)
        ));
    }

    #[test]
    fn image_header_uses_the_reserved_field_name() {
        let frame = encode(&ImageHeader {
            uuid: "u".into(),
            rows: 2,
            cols: 3,
            r#type: 16,
            size: 24,
        })
        .unwrap();
        assert_eq!(frame["type"], 16);
        assert_eq!(frame["_TypeName"], "ImageHeader");
    }
}
