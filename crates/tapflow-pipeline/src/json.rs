//! JSON views of parsed nodes.
//!
//! The reverse of parsing: renders a node's effective configuration (all
//! defaults and overrides applied) back into the bundle schema. Used by the
//! node-data query surfaces and the dump tooling.

use serde_json::{json, Map, Value};
use tapflow_protocols::{Rect, Target};

use crate::model::{Action, PipelineNode, Recognition, WaitFreezes};

fn rect_json(r: Rect) -> Value {
    json!(r.to_array())
}

fn target_json(t: &Target) -> Value {
    match t {
        Target::Anywhere => Value::Bool(true),
        Target::Region(r) => rect_json(*r),
        Target::Node(name) => Value::String(name.clone()),
    }
}

fn wait_freezes_json(wf: &WaitFreezes) -> Value {
    json!({
        "time": wf.time,
        "target": target_json(&wf.target),
        "target_offset": rect_json(wf.target_offset),
        "threshold": wf.threshold,
        "method": wf.method,
        "rate_limit": wf.rate_limit,
        "timeout": wf.timeout,
    })
}

fn recognition_json(reco: &Recognition) -> Value {
    let param = match reco {
        Recognition::DirectHit => Map::new(),
        Recognition::TemplateMatch(p) => {
            let mut m = Map::new();
            m.insert("roi".into(), target_json(&p.roi));
            m.insert("roi_offset".into(), rect_json(p.roi_offset));
            m.insert("template".into(), json!(p.templates));
            m.insert("threshold".into(), json!(p.thresholds));
            m.insert("method".into(), json!(p.method));
            m.insert("green_mask".into(), json!(p.green_mask));
            m.insert("order_by".into(), json!(p.order_by.name()));
            m.insert("index".into(), json!(p.index));
            m
        }
        Recognition::FeatureMatch(p) => {
            let mut m = Map::new();
            m.insert("roi".into(), target_json(&p.roi));
            m.insert("roi_offset".into(), rect_json(p.roi_offset));
            m.insert("template".into(), json!(p.templates));
            m.insert("count".into(), json!(p.count));
            m.insert("detector".into(), json!(p.detector));
            m.insert("ratio".into(), json!(p.ratio));
            m.insert("green_mask".into(), json!(p.green_mask));
            m.insert("order_by".into(), json!(p.order_by.name()));
            m.insert("index".into(), json!(p.index));
            m
        }
        Recognition::ColorMatch(p) => {
            let mut m = Map::new();
            m.insert("roi".into(), target_json(&p.roi));
            m.insert("roi_offset".into(), rect_json(p.roi_offset));
            m.insert("lower".into(), json!(p.lower));
            m.insert("upper".into(), json!(p.upper));
            m.insert("method".into(), json!(p.method));
            m.insert("count".into(), json!(p.count));
            m.insert("connected".into(), json!(p.connected));
            m.insert("order_by".into(), json!(p.order_by.name()));
            m.insert("index".into(), json!(p.index));
            m
        }
        Recognition::Ocr(p) => {
            let mut m = Map::new();
            m.insert("roi".into(), target_json(&p.roi));
            m.insert("roi_offset".into(), rect_json(p.roi_offset));
            m.insert("expected".into(), json!(p.expected));
            m.insert("threshold".into(), json!(p.threshold));
            m.insert(
                "replace".into(),
                json!(p.replace.iter().map(|(a, b)| json!([a, b])).collect::<Vec<_>>()),
            );
            m.insert("only_rec".into(), json!(p.only_rec));
            m.insert("model".into(), json!(p.model));
            m.insert("order_by".into(), json!(p.order_by.name()));
            m.insert("index".into(), json!(p.index));
            m
        }
        Recognition::NeuralNetworkClassify(p) => {
            let mut m = Map::new();
            m.insert("roi".into(), target_json(&p.roi));
            m.insert("roi_offset".into(), rect_json(p.roi_offset));
            m.insert("model".into(), json!(p.model));
            m.insert("labels".into(), json!(p.labels));
            m.insert("expected".into(), json!(p.expected));
            m.insert("order_by".into(), json!(p.order_by.name()));
            m.insert("index".into(), json!(p.index));
            m
        }
        Recognition::NeuralNetworkDetect(p) => {
            let mut m = Map::new();
            m.insert("roi".into(), target_json(&p.roi));
            m.insert("roi_offset".into(), rect_json(p.roi_offset));
            m.insert("model".into(), json!(p.model));
            m.insert("labels".into(), json!(p.labels));
            m.insert("expected".into(), json!(p.expected));
            m.insert("threshold".into(), json!(p.thresholds));
            m.insert("order_by".into(), json!(p.order_by.name()));
            m.insert("index".into(), json!(p.index));
            m
        }
        Recognition::Custom(p) => {
            let mut m = Map::new();
            m.insert("custom_recognition".into(), json!(p.name));
            m.insert("custom_recognition_param".into(), p.param.clone());
            m.insert("roi".into(), target_json(&p.roi));
            m.insert("roi_offset".into(), rect_json(p.roi_offset));
            m
        }
    };
    json!({ "type": reco.kind().name(), "param": Value::Object(param) })
}

fn action_json(action: &Action) -> Value {
    let param = match action {
        Action::DoNothing | Action::StopTask => Map::new(),
        Action::Click(p) => {
            let mut m = Map::new();
            m.insert("target".into(), target_json(&p.target));
            m.insert("target_offset".into(), rect_json(p.target_offset));
            m
        }
        Action::LongPress(p) => {
            let mut m = Map::new();
            m.insert("target".into(), target_json(&p.target));
            m.insert("target_offset".into(), rect_json(p.target_offset));
            m.insert("duration".into(), json!(p.duration));
            m
        }
        Action::Swipe(p) => swipe_map(p),
        Action::MultiSwipe(p) => {
            let mut m = Map::new();
            m.insert(
                "swipes".into(),
                json!(p
                    .swipes
                    .iter()
                    .map(|s| Value::Object(swipe_map(s)))
                    .collect::<Vec<_>>()),
            );
            m
        }
        Action::Key(p) => {
            let mut m = Map::new();
            m.insert("key".into(), json!(p.keys));
            m
        }
        Action::InputText(p) => {
            let mut m = Map::new();
            m.insert("input_text".into(), json!(p.text));
            m
        }
        Action::StartApp(p) | Action::StopApp(p) => {
            let mut m = Map::new();
            m.insert("package".into(), json!(p.package));
            m
        }
        Action::Command(p) => {
            let mut m = Map::new();
            m.insert("exec".into(), json!(p.exec));
            m.insert("args".into(), json!(p.args));
            m.insert("detach".into(), json!(p.detach));
            m
        }
        Action::Custom(p) => {
            let mut m = Map::new();
            m.insert("custom_action".into(), json!(p.name));
            m.insert("custom_action_param".into(), p.param.clone());
            m.insert("target".into(), target_json(&p.target));
            m.insert("target_offset".into(), rect_json(p.target_offset));
            m
        }
    };
    json!({ "type": action.kind().name(), "param": Value::Object(param) })
}

fn swipe_map(p: &crate::model::SwipeParam) -> Map<String, Value> {
    let mut m = Map::new();
    m.insert("begin".into(), target_json(&p.begin));
    m.insert("begin_offset".into(), rect_json(p.begin_offset));
    m.insert("end".into(), target_json(&p.end));
    m.insert("end_offset".into(), rect_json(p.end_offset));
    m.insert("duration".into(), json!(p.duration));
    m.insert("starting".into(), json!(p.starting));
    m
}

impl PipelineNode {
    /// The node's effective configuration in bundle-schema form.
    pub fn to_json(&self) -> Value {
        json!({
            "recognition": recognition_json(&self.recognition),
            "action": action_json(&self.action),
            "next": self.next,
            "interrupt": self.interrupt,
            "on_error": self.on_error,
            "is_sub": self.is_sub,
            "inverse": self.inverse,
            "enabled": self.enabled,
            "rate_limit": self.rate_limit,
            "timeout": self.reco_timeout,
            "pre_delay": self.pre_delay,
            "post_delay": self.post_delay,
            "pre_wait_freezes": wait_freezes_json(&self.pre_wait_freezes),
            "post_wait_freezes": wait_freezes_json(&self.post_wait_freezes),
            "focus": self.focus,
        })
    }
}
