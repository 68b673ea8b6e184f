//! Recognition stage: dispatches a node's recognition step to the bound
//! detector and interprets the result under the node's modifiers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, warn};

use tapflow_pipeline::{PipelineNode, Recognition, RecognitionKind};
use tapflow_protocols::{
    ContextApi, CustomRecognitionArg, Image, RecoResult, Rect, TaskId,
};

use crate::resource::Resource;

/// A vision algorithm behind the recognition stage.
///
/// Implementations receive the full parameter variant so algorithm-specific
/// knobs travel untouched. The engine ships [`DirectHitRecognizer`] only;
/// real CV backends register at startup.
#[async_trait]
pub trait Recognizer: Send + Sync {
    async fn analyze(&self, image: &Image, roi: Rect, recognition: &Recognition) -> RecoResult;
}

/// Unconditional hit at the region of interest.
pub struct DirectHitRecognizer;

#[async_trait]
impl Recognizer for DirectHitRecognizer {
    async fn analyze(&self, _image: &Image, roi: Rect, _recognition: &Recognition) -> RecoResult {
        RecoResult::hit(roi, 1.0)
    }
}

/// Registry of detectors keyed on the recognition type tag.
pub struct RecognizerRegistry {
    map: DashMap<RecognitionKind, Arc<dyn Recognizer>>,
}

impl Default for RecognizerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RecognizerRegistry {
    pub fn new() -> Self {
        let map: DashMap<RecognitionKind, Arc<dyn Recognizer>> = DashMap::new();
        map.insert(RecognitionKind::DirectHit, Arc::new(DirectHitRecognizer));
        Self { map }
    }

    pub fn register(&self, kind: RecognitionKind, recognizer: Arc<dyn Recognizer>) {
        self.map.insert(kind, recognizer);
    }

    pub fn get(&self, kind: RecognitionKind) -> Option<Arc<dyn Recognizer>> {
        self.map.get(&kind).map(|r| r.clone())
    }
}

/// Runs one node's recognition step.
pub struct RecognitionStage {
    registry: Arc<RecognizerRegistry>,
    resource: Arc<Resource>,
}

impl RecognitionStage {
    pub fn new(registry: Arc<RecognizerRegistry>, resource: Arc<Resource>) -> Self {
        Self { registry, resource }
    }

    /// Recognize `node` against `image` with `roi` already resolved.
    ///
    /// Applies the node's modifiers: a disabled node is an automatic miss
    /// without invoking any detector, `inverse` flips the outcome, and
    /// `reco_timeout` caps one invocation's wall clock (overrun is a miss).
    pub async fn recognize(
        &self,
        task_id: TaskId,
        node: &PipelineNode,
        image: &Image,
        roi: Rect,
        ctx: &dyn ContextApi,
    ) -> RecoResult {
        if !node.enabled {
            debug!(node = %node.name, "disabled, automatic miss");
            return RecoResult::miss();
        }

        let ceiling = Duration::from_millis(node.reco_timeout);
        let invoked = tokio::time::timeout(
            ceiling,
            self.invoke(task_id, node, image, roi, ctx),
        )
        .await;
        let mut result = match invoked {
            Ok(r) => r,
            Err(_) => {
                warn!(node = %node.name, timeout_ms = node.reco_timeout, "recognizer overran, treating as miss");
                RecoResult::miss()
            }
        };

        if node.inverse {
            result = if result.hit {
                RecoResult::miss()
            } else {
                RecoResult::hit(Rect::default(), 0.0)
            };
        }
        result
    }

    async fn invoke(
        &self,
        task_id: TaskId,
        node: &PipelineNode,
        image: &Image,
        roi: Rect,
        ctx: &dyn ContextApi,
    ) -> RecoResult {
        match &node.recognition {
            Recognition::Custom(param) => {
                let Some(callback) = self.resource.custom_recognition(&param.name) else {
                    warn!(node = %node.name, callback = %param.name, "custom recognition not registered");
                    return RecoResult::miss();
                };
                let arg = CustomRecognitionArg {
                    task_id,
                    node_name: node.name.clone(),
                    custom_name: param.name.clone(),
                    custom_param: param.param.clone(),
                    roi,
                    image: image.clone(),
                };
                match callback.analyze(ctx, arg).await {
                    Ok(result) => result,
                    Err(e) => {
                        warn!(node = %node.name, callback = %param.name, error = %e, "custom recognition failed, treating as miss");
                        RecoResult::miss()
                    }
                }
            }
            other => {
                let kind = other.kind();
                let Some(recognizer) = self.registry.get(kind) else {
                    warn!(node = %node.name, kind = kind.name(), "no recognizer registered, treating as miss");
                    return RecoResult::miss();
                };
                recognizer.analyze(image, roi, other).await
            }
        }
    }
}
