//! Loaded pipeline bundles plus the custom callback registries.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{info, warn};

use tapflow_pipeline::{DefaultNodeMgr, PipelineChecker, PipelineGraph, PipelineNode, PipelineParser};
use tapflow_protocols::{CustomAction, CustomRecognition, ResourceApi};

use crate::error::EngineError;

/// The shared node graph and everything registered against it.
///
/// Loads are all-or-nothing: bundles parse and validate into a staging copy
/// and only replace the installed graph on success. The installed graph is
/// effectively immutable between loads; runs take their own snapshot at post
/// time.
pub struct Resource {
    graph: RwLock<PipelineGraph>,
    defaults: RwLock<DefaultNodeMgr>,
    custom_recognitions: DashMap<String, Arc<dyn CustomRecognition>>,
    custom_actions: DashMap<String, Arc<dyn CustomAction>>,
    valid: AtomicBool,
}

impl Default for Resource {
    fn default() -> Self {
        Self::new()
    }
}

impl Resource {
    pub fn new() -> Self {
        Self {
            graph: RwLock::new(PipelineGraph::new()),
            defaults: RwLock::new(DefaultNodeMgr::new()),
            custom_recognitions: DashMap::new(),
            custom_actions: DashMap::new(),
            valid: AtomicBool::new(false),
        }
    }

    /// Load a bundle directory: an optional `default_pipeline.json` plus
    /// every `*.json` under `pipeline/`, in name order.
    pub fn load_dir(&self, dir: &Path) -> Result<(), EngineError> {
        let defaults_path = dir.join("default_pipeline.json");
        let mut defaults = self.defaults.read().clone();
        if defaults_path.is_file() {
            let doc = read_json(&defaults_path)?;
            defaults.load(&doc)?;
        }

        let mut staged = self.graph.read().clone();
        let pipeline_dir = dir.join("pipeline");
        let mut files: Vec<_> = std::fs::read_dir(&pipeline_dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        files.sort();

        for path in &files {
            let doc = read_json(path)?;
            PipelineParser::parse_bundle(&doc, &mut staged, &defaults)?;
        }
        PipelineChecker::check(&staged)?;

        info!(dir = %dir.display(), files = files.len(), nodes = staged.len(), "bundle loaded");
        *self.defaults.write() = defaults;
        *self.graph.write() = staged;
        self.valid.store(true, Ordering::Release);
        Ok(())
    }

    /// Merge one in-memory bundle document over the installed graph.
    pub fn load_document(&self, doc: &Value) -> Result<(), EngineError> {
        let mut staged = self.graph.read().clone();
        PipelineParser::parse_bundle(doc, &mut staged, &self.defaults.read())?;
        PipelineChecker::check(&staged)?;
        *self.graph.write() = staged;
        self.valid.store(true, Ordering::Release);
        Ok(())
    }

    pub fn register_custom_recognition(
        &self,
        name: impl Into<String>,
        callback: Arc<dyn CustomRecognition>,
    ) {
        self.custom_recognitions.insert(name.into(), callback);
    }

    pub fn register_custom_action(&self, name: impl Into<String>, callback: Arc<dyn CustomAction>) {
        self.custom_actions.insert(name.into(), callback);
    }

    pub fn custom_recognition(&self, name: &str) -> Option<Arc<dyn CustomRecognition>> {
        self.custom_recognitions.get(name).map(|c| c.clone())
    }

    pub fn custom_action(&self, name: &str) -> Option<Arc<dyn CustomAction>> {
        self.custom_actions.get(name).map(|c| c.clone())
    }

    pub fn node(&self, name: &str) -> Option<PipelineNode> {
        self.graph.read().get(name).cloned()
    }

    /// Run-private copy of the installed graph.
    pub fn graph_snapshot(&self) -> PipelineGraph {
        self.graph.read().clone()
    }

    pub fn defaults_snapshot(&self) -> DefaultNodeMgr {
        self.defaults.read().clone()
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }
}

fn read_json(path: &Path) -> Result<Value, EngineError> {
    let text = std::fs::read_to_string(path)?;
    serde_json::from_str(&text).map_err(|source| EngineError::BundleJson {
        path: path.display().to_string(),
        source,
    })
}

#[async_trait]
impl ResourceApi for Resource {
    async fn node_data(&self, node: &str) -> Option<Value> {
        self.node(node).map(|n| n.to_json())
    }

    async fn node_names(&self) -> Vec<String> {
        self.graph.read().names().to_vec()
    }

    async fn custom_recognition_names(&self) -> Vec<String> {
        self.custom_recognitions
            .iter()
            .map(|e| e.key().clone())
            .collect()
    }

    async fn custom_action_names(&self) -> Vec<String> {
        self.custom_actions.iter().map(|e| e.key().clone()).collect()
    }

    async fn override_pipeline(&self, pipeline_override: Value) -> bool {
        match self.load_document(&pipeline_override) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "pipeline override rejected");
                false
            }
        }
    }

    async fn valid(&self) -> bool {
        self.is_valid()
    }

    async fn clear(&self) -> bool {
        *self.graph.write() = PipelineGraph::new();
        *self.defaults.write() = DefaultNodeMgr::new();
        self.custom_recognitions.clear();
        self.custom_actions.clear();
        self.valid.store(false, Ordering::Release);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn write(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn loads_a_bundle_directory() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "default_pipeline.json",
            r#"{ "PipelineDefault": { "pre_delay": 0, "post_delay": 0 } }"#,
        );
        write(
            dir.path(),
            "pipeline/a.json",
            r#"{ "Entry": { "next": "Exit" } }"#,
        );
        write(
            dir.path(),
            "pipeline/b.json",
            r#"{ "Exit": { "action": "StopTask" }, "Entry": { "rate_limit": 100 } }"#,
        );

        let resource = Resource::new();
        resource.load_dir(dir.path()).unwrap();
        assert!(resource.is_valid());

        let entry = resource.node("Entry").unwrap();
        // b.json overrides a.json field-by-field, defaults fill the rest.
        assert_eq!(entry.rate_limit, 100);
        assert_eq!(entry.next, vec!["Exit"]);
        assert_eq!(entry.pre_delay, 0);
    }

    #[test]
    fn failed_load_installs_nothing() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "pipeline/a.json",
            r#"{ "Entry": { "next": "Missing" } }"#,
        );

        let resource = Resource::new();
        assert!(resource.load_dir(dir.path()).is_err());
        assert!(!resource.is_valid());
        assert!(resource.node("Entry").is_none());
    }

    #[tokio::test]
    async fn override_pipeline_revalidates() {
        let resource = Resource::new();
        resource
            .load_document(&json!({ "A": { "action": "StopTask" } }))
            .unwrap();

        assert!(!ResourceApi::override_pipeline(&resource, json!({ "A": { "next": "Ghost" } })).await);
        // Rejected override left the graph untouched.
        assert!(resource.node("A").unwrap().next.is_empty());

        assert!(ResourceApi::override_pipeline(&resource, json!({ "B": {}, "A": { "next": "B" } })).await);
        assert_eq!(resource.node("A").unwrap().next, vec!["B"]);
    }
}
