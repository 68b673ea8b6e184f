//! Resource capability: the loaded node graph and its registries.

use async_trait::async_trait;
use serde_json::Value;

/// A loaded pipeline bundle as seen from outside the engine.
///
/// The concrete implementation lives in the engine crate; the agent crate
/// proxies this surface across the channel for remote callers.
#[async_trait]
pub trait ResourceApi: Send + Sync {
    /// Raw definition of `node`, post defaults and post any bundle-level
    /// overrides. `None` when the node does not exist.
    async fn node_data(&self, node: &str) -> Option<Value>;

    /// Names of every node in load order.
    async fn node_names(&self) -> Vec<String>;

    /// Registered custom recognition names.
    async fn custom_recognition_names(&self) -> Vec<String>;

    /// Registered custom action names.
    async fn custom_action_names(&self) -> Vec<String>;

    /// Merge an override document into the shared graph. Affects runs posted
    /// after the merge, not runs already walking.
    async fn override_pipeline(&self, pipeline_override: Value) -> bool;

    /// True when at least one bundle loaded successfully and validation holds.
    async fn valid(&self) -> bool;

    /// Drop all loaded bundles and registrations.
    async fn clear(&self) -> bool;
}
