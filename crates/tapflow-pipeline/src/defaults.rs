//! Type-level default parameter values.
//!
//! Every recognition and action type has a built-in default parameter block;
//! a bundle may ship a defaults document overriding them, plus node-level
//! timing/flag defaults applied to every node that does not set its own.

use std::collections::HashMap;

use serde_json::Value;

use crate::error::PipelineError;
use crate::model::{
    Action, ActionKind, ClickParam, ColorMatchParam, CommandParam, CustomActionParam,
    CustomRecognitionParam, FeatureMatchParam, InputTextParam, KeyParam, LongPressParam,
    MultiSwipeParam, NeuralNetworkClassifyParam, NeuralNetworkDetectParam, OcrParam, PipelineNode,
    Recognition, RecognitionKind, SwipeParam, TemplateMatchParam,
};
use crate::parser;

/// Placeholder node name used in errors from the defaults document.
const DEFAULTS_NODE: &str = "<default>";

#[derive(Clone)]
pub struct DefaultNodeMgr {
    node: PipelineNode,
    recognition: HashMap<RecognitionKind, Recognition>,
    action: HashMap<ActionKind, Action>,
}

impl Default for DefaultNodeMgr {
    fn default() -> Self {
        Self::new()
    }
}

impl DefaultNodeMgr {
    pub fn new() -> Self {
        let recognition = [
            Recognition::DirectHit,
            Recognition::TemplateMatch(TemplateMatchParam::default()),
            Recognition::FeatureMatch(FeatureMatchParam::default()),
            Recognition::ColorMatch(ColorMatchParam::default()),
            Recognition::Ocr(OcrParam::default()),
            Recognition::NeuralNetworkClassify(NeuralNetworkClassifyParam::default()),
            Recognition::NeuralNetworkDetect(NeuralNetworkDetectParam::default()),
            Recognition::Custom(CustomRecognitionParam::default()),
        ]
        .into_iter()
        .map(|r| (r.kind(), r))
        .collect();

        let action = [
            Action::DoNothing,
            Action::Click(ClickParam::default()),
            Action::LongPress(LongPressParam::default()),
            Action::Swipe(SwipeParam::default()),
            Action::MultiSwipe(MultiSwipeParam::default()),
            Action::Key(KeyParam::default()),
            Action::InputText(InputTextParam::default()),
            Action::StartApp(Default::default()),
            Action::StopApp(Default::default()),
            Action::Command(CommandParam::default()),
            Action::Custom(CustomActionParam::default()),
            Action::StopTask,
        ]
        .into_iter()
        .map(|a| (a.kind(), a))
        .collect();

        Self {
            node: PipelineNode::default(),
            recognition,
            action,
        }
    }

    /// Merge a defaults document over the built-ins. Sections: "PipelineDefault"
    /// (node-level timings/flags), "RecognitionDefault" and "ActionDefault"
    /// (type name to param object).
    pub fn load(&mut self, doc: &Value) -> Result<(), PipelineError> {
        let obj = doc.as_object().ok_or(PipelineError::NotAnObject)?;

        if let Some(v) = obj.get("PipelineDefault") {
            let section = v
                .as_object()
                .ok_or_else(|| PipelineError::Defaults("PipelineDefault must be an object".into()))?;
            let base = self.node.clone();
            self.node.is_sub = parser::get_bool(section, DEFAULTS_NODE, "is_sub", base.is_sub)?;
            self.node.inverse = parser::get_bool(section, DEFAULTS_NODE, "inverse", base.inverse)?;
            self.node.enabled = parser::get_bool(section, DEFAULTS_NODE, "enabled", base.enabled)?;
            self.node.rate_limit =
                parser::get_u64(section, DEFAULTS_NODE, "rate_limit", base.rate_limit)?;
            self.node.reco_timeout =
                parser::get_u64(section, DEFAULTS_NODE, "timeout", base.reco_timeout)?;
            self.node.pre_delay =
                parser::get_u64(section, DEFAULTS_NODE, "pre_delay", base.pre_delay)?;
            self.node.post_delay =
                parser::get_u64(section, DEFAULTS_NODE, "post_delay", base.post_delay)?;
            self.node.pre_wait_freezes = parser::parse_wait_freezes(
                section,
                DEFAULTS_NODE,
                "pre_wait_freezes",
                &base.pre_wait_freezes,
            )?;
            self.node.post_wait_freezes = parser::parse_wait_freezes(
                section,
                DEFAULTS_NODE,
                "post_wait_freezes",
                &base.post_wait_freezes,
            )?;
        }

        if let Some(v) = obj.get("RecognitionDefault") {
            let section = v.as_object().ok_or_else(|| {
                PipelineError::Defaults("RecognitionDefault must be an object".into())
            })?;
            for (type_name, param) in section {
                let kind = RecognitionKind::from_name(type_name).ok_or_else(|| {
                    PipelineError::Defaults(format!("unknown recognition type '{type_name}'"))
                })?;
                let param = param.as_object().ok_or_else(|| {
                    PipelineError::Defaults(format!("params for '{type_name}' must be an object"))
                })?;
                let base = self.recognition_param(kind);
                let merged = parser::parse_recognition_param(kind, param, base, DEFAULTS_NODE)?;
                self.recognition.insert(kind, merged);
            }
        }

        if let Some(v) = obj.get("ActionDefault") {
            let section = v
                .as_object()
                .ok_or_else(|| PipelineError::Defaults("ActionDefault must be an object".into()))?;
            for (type_name, param) in section {
                let kind = ActionKind::from_name(type_name).ok_or_else(|| {
                    PipelineError::Defaults(format!("unknown action type '{type_name}'"))
                })?;
                let param = param.as_object().ok_or_else(|| {
                    PipelineError::Defaults(format!("params for '{type_name}' must be an object"))
                })?;
                let base = self.action_param(kind);
                let merged = parser::parse_action_param(kind, param, base, DEFAULTS_NODE)?;
                self.action.insert(kind, merged);
            }
        }

        Ok(())
    }

    /// Template for new nodes: defaults for every field a bundle omits.
    pub fn node_base(&self) -> PipelineNode {
        self.node.clone()
    }

    pub fn recognition_param(&self, kind: RecognitionKind) -> Recognition {
        self.recognition
            .get(&kind)
            .cloned()
            .unwrap_or(Recognition::DirectHit)
    }

    pub fn action_param(&self, kind: ActionKind) -> Action {
        self.action.get(&kind).cloned().unwrap_or(Action::DoNothing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builtin_defaults_cover_every_type() {
        let mgr = DefaultNodeMgr::new();
        assert_eq!(
            mgr.recognition_param(RecognitionKind::DirectHit).kind(),
            RecognitionKind::DirectHit
        );
        assert_eq!(
            mgr.action_param(ActionKind::StopTask).kind(),
            ActionKind::StopTask
        );
        let node = mgr.node_base();
        assert!(node.enabled);
        assert_eq!(node.rate_limit, 1000);
        assert_eq!(node.reco_timeout, 20_000);
    }

    #[test]
    fn loaded_defaults_override_builtins() {
        let mut mgr = DefaultNodeMgr::new();
        mgr.load(&json!({
            "PipelineDefault": { "pre_delay": 0, "post_delay": 50 },
            "ActionDefault": {
                "LongPress": { "duration": 2500 }
            }
        }))
        .unwrap();

        let node = mgr.node_base();
        assert_eq!(node.pre_delay, 0);
        assert_eq!(node.post_delay, 50);

        match mgr.action_param(ActionKind::LongPress) {
            Action::LongPress(p) => assert_eq!(p.duration, 2500),
            other => panic!("unexpected default: {other:?}"),
        }
    }

    #[test]
    fn unknown_type_in_defaults_is_rejected() {
        let mut mgr = DefaultNodeMgr::new();
        let err = mgr
            .load(&json!({ "RecognitionDefault": { "Telepathy": {} } }))
            .unwrap_err();
        assert!(matches!(err, PipelineError::Defaults(_)));
    }
}
