//! JSON bundle parsing.
//!
//! A bundle is one JSON object mapping node names to node definitions. Each
//! node is parsed in fixed field order against a base: the previously loaded
//! definition of the same name when one exists (incremental override), or the
//! type-level defaults for a new node. Any mistyped field fails the whole
//! bundle; nothing is installed on error.

use serde_json::{Map, Value};
use tapflow_protocols::{Rect, Target};
use tracing::debug;

use crate::defaults::DefaultNodeMgr;
use crate::error::PipelineError;
use crate::model::*;

#[cfg(test)]
#[path = "parser_tests.rs"]
mod tests;

type Obj = Map<String, Value>;

pub struct PipelineParser;

impl PipelineParser {
    /// Parse one bundle into `graph`. Nodes are staged and only inserted
    /// after the whole document parses, so a failed load leaves `graph`
    /// untouched.
    pub fn parse_bundle(
        doc: &Value,
        graph: &mut PipelineGraph,
        defaults: &DefaultNodeMgr,
    ) -> Result<(), PipelineError> {
        let obj = doc.as_object().ok_or(PipelineError::NotAnObject)?;

        let mut staged = Vec::with_capacity(obj.len());
        for (name, decl) in obj {
            // "$schema" and friends are editor metadata, not nodes.
            if name.starts_with('$') {
                continue;
            }
            let node = Self::parse_node(name, decl, graph.get(name), defaults)?;
            staged.push(node);
        }

        debug!(nodes = staged.len(), "bundle parsed");
        for node in staged {
            graph.insert(node);
        }
        Ok(())
    }

    fn parse_node(
        name: &str,
        decl: &Value,
        existing: Option<&PipelineNode>,
        defaults: &DefaultNodeMgr,
    ) -> Result<PipelineNode, PipelineError> {
        let obj = decl.as_object().ok_or_else(|| PipelineError::FieldType {
            node: name.to_string(),
            field: "<node>".to_string(),
            expected: "object",
        })?;

        let base = match existing {
            Some(prev) => prev.clone(),
            None => {
                let mut n = defaults.node_base();
                n.name = name.to_string();
                n
            }
        };
        let mut node = base.clone();

        node.is_sub = get_bool(obj, name, "is_sub", base.is_sub)?;
        node.inverse = get_bool(obj, name, "inverse", base.inverse)?;
        node.enabled = get_bool(obj, name, "enabled", base.enabled)?;
        node.recognition = parse_recognition(obj, name, &base.recognition, defaults)?;
        node.action = parse_action(obj, name, &base.action, defaults)?;
        node.next = get_string_list(obj, name, "next", &base.next)?;
        node.interrupt = get_string_list(obj, name, "interrupt", &base.interrupt)?;
        node.on_error = get_string_list(obj, name, "on_error", &base.on_error)?;
        node.rate_limit = get_u64(obj, name, "rate_limit", base.rate_limit)?;
        node.reco_timeout = get_u64(obj, name, "timeout", base.reco_timeout)?;
        node.pre_delay = get_u64(obj, name, "pre_delay", base.pre_delay)?;
        node.post_delay = get_u64(obj, name, "post_delay", base.post_delay)?;
        node.pre_wait_freezes =
            parse_wait_freezes(obj, name, "pre_wait_freezes", &base.pre_wait_freezes)?;
        node.post_wait_freezes =
            parse_wait_freezes(obj, name, "post_wait_freezes", &base.post_wait_freezes)?;
        if let Some(v) = obj.get("focus") {
            node.focus = v.clone();
        }

        Ok(node)
    }
}

// --- recognition ---------------------------------------------------------

fn parse_recognition(
    obj: &Obj,
    node: &str,
    parent: &Recognition,
    defaults: &DefaultNodeMgr,
) -> Result<Recognition, PipelineError> {
    let Some(decl) = obj.get("recognition") else {
        return Ok(parent.clone());
    };

    let empty = Obj::new();
    let (type_name, param) = match decl {
        Value::String(s) => (s.as_str(), &empty),
        Value::Object(o) => {
            let type_name = match o.get("type") {
                None => "Default",
                Some(Value::String(s)) => s.as_str(),
                Some(_) => {
                    return Err(PipelineError::FieldType {
                        node: node.to_string(),
                        field: "recognition.type".to_string(),
                        expected: "string",
                    })
                }
            };
            let param = match o.get("param") {
                None => &empty,
                Some(Value::Object(p)) => p,
                Some(_) => {
                    return Err(PipelineError::FieldType {
                        node: node.to_string(),
                        field: "recognition.param".to_string(),
                        expected: "object",
                    })
                }
            };
            (type_name, param)
        }
        _ => {
            return Err(PipelineError::FieldType {
                node: node.to_string(),
                field: "recognition".to_string(),
                expected: "string or object",
            })
        }
    };

    // "Default" inherits the base's type. Same-type bases carry their
    // parameter values forward; a cross-type declaration starts from the
    // type's global defaults instead.
    let kind = if type_name == "Default" {
        parent.kind()
    } else {
        RecognitionKind::from_name(type_name).ok_or_else(|| PipelineError::UnknownRecognition {
            node: node.to_string(),
            value: type_name.to_string(),
        })?
    };
    let base = if kind == parent.kind() {
        parent.clone()
    } else {
        defaults.recognition_param(kind)
    };

    parse_recognition_param(kind, param, base, node)
}

pub(crate) fn parse_recognition_param(
    kind: RecognitionKind,
    param: &Obj,
    base: Recognition,
    node: &str,
) -> Result<Recognition, PipelineError> {
    Ok(match kind {
        RecognitionKind::DirectHit => Recognition::DirectHit,
        RecognitionKind::TemplateMatch => {
            let mut p = match base {
                Recognition::TemplateMatch(p) => p,
                _ => TemplateMatchParam::default(),
            };
            p.roi = parse_target(param, node, "roi", &p.roi)?;
            p.roi_offset = parse_rect(param, node, "roi_offset", p.roi_offset)?;
            p.templates = get_string_list(param, node, "template", &p.templates)?;
            if p.templates.is_empty() {
                return Err(PipelineError::EmptyField {
                    node: node.to_string(),
                    field: "template".to_string(),
                });
            }
            p.thresholds = get_f64_list(param, node, "threshold", &p.thresholds)?;
            p.thresholds =
                broadcast_f64(p.thresholds, p.templates.len(), 0.7, node, "threshold")?;
            p.method = get_i32(param, node, "method", p.method)?;
            p.green_mask = get_bool(param, node, "green_mask", p.green_mask)?;
            p.order_by = parse_order_by(param, node, p.order_by)?;
            p.index = get_i32(param, node, "index", p.index)?;
            Recognition::TemplateMatch(p)
        }
        RecognitionKind::FeatureMatch => {
            let mut p = match base {
                Recognition::FeatureMatch(p) => p,
                _ => FeatureMatchParam::default(),
            };
            p.roi = parse_target(param, node, "roi", &p.roi)?;
            p.roi_offset = parse_rect(param, node, "roi_offset", p.roi_offset)?;
            p.templates = get_string_list(param, node, "template", &p.templates)?;
            if p.templates.is_empty() {
                return Err(PipelineError::EmptyField {
                    node: node.to_string(),
                    field: "template".to_string(),
                });
            }
            p.count = get_i32(param, node, "count", p.count)?;
            p.detector = get_string(param, node, "detector", &p.detector)?;
            p.ratio = get_f64(param, node, "ratio", p.ratio)?;
            p.green_mask = get_bool(param, node, "green_mask", p.green_mask)?;
            p.order_by = parse_order_by(param, node, p.order_by)?;
            p.index = get_i32(param, node, "index", p.index)?;
            Recognition::FeatureMatch(p)
        }
        RecognitionKind::ColorMatch => {
            let mut p = match base {
                Recognition::ColorMatch(p) => p,
                _ => ColorMatchParam::default(),
            };
            p.roi = parse_target(param, node, "roi", &p.roi)?;
            p.roi_offset = parse_rect(param, node, "roi_offset", p.roi_offset)?;
            p.lower = get_i32_matrix(param, node, "lower", &p.lower)?;
            p.upper = get_i32_matrix(param, node, "upper", &p.upper)?;
            if p.lower.is_empty() {
                return Err(PipelineError::EmptyField {
                    node: node.to_string(),
                    field: "lower".to_string(),
                });
            }
            if p.lower.len() != p.upper.len() {
                return Err(PipelineError::LengthMismatch {
                    node: node.to_string(),
                    field: "upper".to_string(),
                    got: p.upper.len(),
                    want: p.lower.len(),
                });
            }
            p.method = get_i32(param, node, "method", p.method)?;
            p.count = get_i32(param, node, "count", p.count)?;
            p.connected = get_bool(param, node, "connected", p.connected)?;
            p.order_by = parse_order_by(param, node, p.order_by)?;
            p.index = get_i32(param, node, "index", p.index)?;
            Recognition::ColorMatch(p)
        }
        RecognitionKind::Ocr => {
            let mut p = match base {
                Recognition::Ocr(p) => p,
                _ => OcrParam::default(),
            };
            p.roi = parse_target(param, node, "roi", &p.roi)?;
            p.roi_offset = parse_rect(param, node, "roi_offset", p.roi_offset)?;
            p.expected = get_string_list(param, node, "expected", &p.expected)?;
            p.threshold = get_f64(param, node, "threshold", p.threshold)?;
            p.replace = parse_replace(param, node, &p.replace)?;
            p.only_rec = get_bool(param, node, "only_rec", p.only_rec)?;
            p.model = get_string(param, node, "model", &p.model)?;
            p.order_by = parse_order_by(param, node, p.order_by)?;
            p.index = get_i32(param, node, "index", p.index)?;
            Recognition::Ocr(p)
        }
        RecognitionKind::NeuralNetworkClassify => {
            let mut p = match base {
                Recognition::NeuralNetworkClassify(p) => p,
                _ => NeuralNetworkClassifyParam::default(),
            };
            p.roi = parse_target(param, node, "roi", &p.roi)?;
            p.roi_offset = parse_rect(param, node, "roi_offset", p.roi_offset)?;
            p.model = get_string(param, node, "model", &p.model)?;
            p.labels = get_string_list(param, node, "labels", &p.labels)?;
            p.expected = get_i32_list(param, node, "expected", &p.expected)?;
            p.order_by = parse_order_by(param, node, p.order_by)?;
            p.index = get_i32(param, node, "index", p.index)?;
            Recognition::NeuralNetworkClassify(p)
        }
        RecognitionKind::NeuralNetworkDetect => {
            let mut p = match base {
                Recognition::NeuralNetworkDetect(p) => p,
                _ => NeuralNetworkDetectParam::default(),
            };
            p.roi = parse_target(param, node, "roi", &p.roi)?;
            p.roi_offset = parse_rect(param, node, "roi_offset", p.roi_offset)?;
            p.model = get_string(param, node, "model", &p.model)?;
            p.labels = get_string_list(param, node, "labels", &p.labels)?;
            p.expected = get_i32_list(param, node, "expected", &p.expected)?;
            p.thresholds = get_f64_list(param, node, "threshold", &p.thresholds)?;
            p.thresholds =
                broadcast_f64(p.thresholds, p.expected.len(), 0.3, node, "threshold")?;
            p.order_by = parse_order_by(param, node, p.order_by)?;
            p.index = get_i32(param, node, "index", p.index)?;
            Recognition::NeuralNetworkDetect(p)
        }
        RecognitionKind::Custom => {
            let mut p = match base {
                Recognition::Custom(p) => p,
                _ => CustomRecognitionParam::default(),
            };
            p.name = get_string(param, node, "custom_recognition", &p.name)?;
            if p.name.is_empty() {
                return Err(PipelineError::EmptyField {
                    node: node.to_string(),
                    field: "custom_recognition".to_string(),
                });
            }
            if let Some(v) = param.get("custom_recognition_param") {
                p.param = v.clone();
            }
            p.roi = parse_target(param, node, "roi", &p.roi)?;
            p.roi_offset = parse_rect(param, node, "roi_offset", p.roi_offset)?;
            Recognition::Custom(p)
        }
    })
}

// --- action --------------------------------------------------------------

fn parse_action(
    obj: &Obj,
    node: &str,
    parent: &Action,
    defaults: &DefaultNodeMgr,
) -> Result<Action, PipelineError> {
    let Some(decl) = obj.get("action") else {
        return Ok(parent.clone());
    };

    let empty = Obj::new();
    let (type_name, param) = match decl {
        Value::String(s) => (s.as_str(), &empty),
        Value::Object(o) => {
            let type_name = match o.get("type") {
                None => "Default",
                Some(Value::String(s)) => s.as_str(),
                Some(_) => {
                    return Err(PipelineError::FieldType {
                        node: node.to_string(),
                        field: "action.type".to_string(),
                        expected: "string",
                    })
                }
            };
            let param = match o.get("param") {
                None => &empty,
                Some(Value::Object(p)) => p,
                Some(_) => {
                    return Err(PipelineError::FieldType {
                        node: node.to_string(),
                        field: "action.param".to_string(),
                        expected: "object",
                    })
                }
            };
            (type_name, param)
        }
        _ => {
            return Err(PipelineError::FieldType {
                node: node.to_string(),
                field: "action".to_string(),
                expected: "string or object",
            })
        }
    };

    let kind = if type_name == "Default" {
        parent.kind()
    } else {
        ActionKind::from_name(type_name).ok_or_else(|| PipelineError::UnknownAction {
            node: node.to_string(),
            value: type_name.to_string(),
        })?
    };
    let base = if kind == parent.kind() {
        parent.clone()
    } else {
        defaults.action_param(kind)
    };

    parse_action_param(kind, param, base, node)
}

pub(crate) fn parse_action_param(
    kind: ActionKind,
    param: &Obj,
    base: Action,
    node: &str,
) -> Result<Action, PipelineError> {
    Ok(match kind {
        ActionKind::DoNothing => Action::DoNothing,
        ActionKind::StopTask => Action::StopTask,
        ActionKind::Click => {
            let mut p = match base {
                Action::Click(p) => p,
                _ => ClickParam::default(),
            };
            p.target = parse_target(param, node, "target", &p.target)?;
            p.target_offset = parse_rect(param, node, "target_offset", p.target_offset)?;
            Action::Click(p)
        }
        ActionKind::LongPress => {
            let mut p = match base {
                Action::LongPress(p) => p,
                _ => LongPressParam::default(),
            };
            p.target = parse_target(param, node, "target", &p.target)?;
            p.target_offset = parse_rect(param, node, "target_offset", p.target_offset)?;
            p.duration = get_u32(param, node, "duration", p.duration)?;
            Action::LongPress(p)
        }
        ActionKind::Swipe => {
            let mut p = match base {
                Action::Swipe(p) => p,
                _ => SwipeParam::default(),
            };
            fill_swipe(&mut p, param, node)?;
            Action::Swipe(p)
        }
        ActionKind::MultiSwipe => {
            let mut p = match base {
                Action::MultiSwipe(p) => p,
                _ => MultiSwipeParam::default(),
            };
            if let Some(v) = param.get("swipes") {
                let arr = v.as_array().ok_or_else(|| PipelineError::FieldType {
                    node: node.to_string(),
                    field: "swipes".to_string(),
                    expected: "array",
                })?;
                let mut swipes = Vec::with_capacity(arr.len());
                for item in arr {
                    let obj = item.as_object().ok_or_else(|| PipelineError::FieldType {
                        node: node.to_string(),
                        field: "swipes".to_string(),
                        expected: "array of objects",
                    })?;
                    let mut s = SwipeParam::default();
                    fill_swipe(&mut s, obj, node)?;
                    s.starting = get_u32(obj, node, "starting", s.starting)?;
                    swipes.push(s);
                }
                p.swipes = swipes;
            }
            if p.swipes.is_empty() {
                return Err(PipelineError::EmptyField {
                    node: node.to_string(),
                    field: "swipes".to_string(),
                });
            }
            Action::MultiSwipe(p)
        }
        ActionKind::Key => {
            let mut p = match base {
                Action::Key(p) => p,
                _ => KeyParam::default(),
            };
            p.keys = get_i32_list(param, node, "key", &p.keys)?;
            if p.keys.is_empty() {
                return Err(PipelineError::EmptyField {
                    node: node.to_string(),
                    field: "key".to_string(),
                });
            }
            Action::Key(p)
        }
        ActionKind::InputText => {
            let mut p = match base {
                Action::InputText(p) => p,
                _ => InputTextParam::default(),
            };
            p.text = get_string(param, node, "input_text", &p.text)?;
            Action::InputText(p)
        }
        ActionKind::StartApp => {
            let mut p = match base {
                Action::StartApp(p) => p,
                _ => AppParam::default(),
            };
            p.package = get_string(param, node, "package", &p.package)?;
            Action::StartApp(p)
        }
        ActionKind::StopApp => {
            let mut p = match base {
                Action::StopApp(p) => p,
                _ => AppParam::default(),
            };
            p.package = get_string(param, node, "package", &p.package)?;
            Action::StopApp(p)
        }
        ActionKind::Command => {
            let mut p = match base {
                Action::Command(p) => p,
                _ => CommandParam::default(),
            };
            p.exec = get_string(param, node, "exec", &p.exec)?;
            if p.exec.is_empty() {
                return Err(PipelineError::EmptyField {
                    node: node.to_string(),
                    field: "exec".to_string(),
                });
            }
            p.args = get_string_list(param, node, "args", &p.args)?;
            p.detach = get_bool(param, node, "detach", p.detach)?;
            Action::Command(p)
        }
        ActionKind::Custom => {
            let mut p = match base {
                Action::Custom(p) => p,
                _ => CustomActionParam::default(),
            };
            p.name = get_string(param, node, "custom_action", &p.name)?;
            if p.name.is_empty() {
                return Err(PipelineError::EmptyField {
                    node: node.to_string(),
                    field: "custom_action".to_string(),
                });
            }
            if let Some(v) = param.get("custom_action_param") {
                p.param = v.clone();
            }
            p.target = parse_target(param, node, "target", &p.target)?;
            p.target_offset = parse_rect(param, node, "target_offset", p.target_offset)?;
            Action::Custom(p)
        }
    })
}

fn fill_swipe(p: &mut SwipeParam, param: &Obj, node: &str) -> Result<(), PipelineError> {
    p.begin = parse_target(param, node, "begin", &p.begin)?;
    p.begin_offset = parse_rect(param, node, "begin_offset", p.begin_offset)?;
    p.end = parse_target(param, node, "end", &p.end)?;
    p.end_offset = parse_rect(param, node, "end_offset", p.end_offset)?;
    p.duration = get_u32(param, node, "duration", p.duration)?;
    Ok(())
}

// --- wait_freezes --------------------------------------------------------

pub(crate) fn parse_wait_freezes(
    obj: &Obj,
    node: &str,
    field: &str,
    base: &WaitFreezes,
) -> Result<WaitFreezes, PipelineError> {
    let Some(decl) = obj.get(field) else {
        return Ok(base.clone());
    };
    let mut wf = base.clone();
    match decl {
        // Integer shorthand: just the stability duration.
        Value::Number(_) => {
            wf.time = get_u64(obj, node, field, wf.time)?;
        }
        Value::Object(o) => {
            wf.time = get_u64(o, node, "time", wf.time)?;
            wf.target = parse_target(o, node, "target", &wf.target)?;
            wf.target_offset = parse_rect(o, node, "target_offset", wf.target_offset)?;
            wf.threshold = get_f64(o, node, "threshold", wf.threshold)?;
            wf.method = get_i32(o, node, "method", wf.method)?;
            wf.rate_limit = get_u64(o, node, "rate_limit", wf.rate_limit)?;
            wf.timeout = get_u64(o, node, "timeout", wf.timeout)?;
        }
        _ => {
            return Err(PipelineError::FieldType {
                node: node.to_string(),
                field: field.to_string(),
                expected: "integer or object",
            })
        }
    }
    Ok(wf)
}

// --- typed getters -------------------------------------------------------
//
// All fail closed: a present field with the wrong JSON type is an error for
// the whole node, never silently ignored.

fn err(node: &str, field: &str, expected: &'static str) -> PipelineError {
    PipelineError::FieldType {
        node: node.to_string(),
        field: field.to_string(),
        expected,
    }
}

pub(crate) fn get_bool(obj: &Obj, node: &str, field: &str, base: bool) -> Result<bool, PipelineError> {
    match obj.get(field) {
        None => Ok(base),
        Some(Value::Bool(b)) => Ok(*b),
        Some(_) => Err(err(node, field, "bool")),
    }
}

pub(crate) fn get_u64(obj: &Obj, node: &str, field: &str, base: u64) -> Result<u64, PipelineError> {
    match obj.get(field) {
        None => Ok(base),
        Some(v) => v
            .as_u64()
            .ok_or_else(|| err(node, field, "non-negative integer")),
    }
}

fn get_u32(obj: &Obj, node: &str, field: &str, base: u32) -> Result<u32, PipelineError> {
    match obj.get(field) {
        None => Ok(base),
        Some(v) => v
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| err(node, field, "non-negative integer")),
    }
}

fn get_i32(obj: &Obj, node: &str, field: &str, base: i32) -> Result<i32, PipelineError> {
    match obj.get(field) {
        None => Ok(base),
        Some(v) => v
            .as_i64()
            .and_then(|n| i32::try_from(n).ok())
            .ok_or_else(|| err(node, field, "integer")),
    }
}

pub(crate) fn get_f64(obj: &Obj, node: &str, field: &str, base: f64) -> Result<f64, PipelineError> {
    match obj.get(field) {
        None => Ok(base),
        Some(v) => v.as_f64().ok_or_else(|| err(node, field, "number")),
    }
}

fn get_string(obj: &Obj, node: &str, field: &str, base: &str) -> Result<String, PipelineError> {
    match obj.get(field) {
        None => Ok(base.to_string()),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(err(node, field, "string")),
    }
}

/// Value-or-array: a lone string becomes a one-element list.
pub(crate) fn get_string_list(
    obj: &Obj,
    node: &str,
    field: &str,
    base: &[String],
) -> Result<Vec<String>, PipelineError> {
    match obj.get(field) {
        None => Ok(base.to_vec()),
        Some(Value::String(s)) => Ok(vec![s.clone()]),
        Some(Value::Array(arr)) => arr
            .iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| err(node, field, "string or array of strings"))
            })
            .collect(),
        Some(_) => Err(err(node, field, "string or array of strings")),
    }
}

fn get_f64_list(
    obj: &Obj,
    node: &str,
    field: &str,
    base: &[f64],
) -> Result<Vec<f64>, PipelineError> {
    match obj.get(field) {
        None => Ok(base.to_vec()),
        Some(Value::Array(arr)) => arr
            .iter()
            .map(|v| {
                v.as_f64()
                    .ok_or_else(|| err(node, field, "number or array of numbers"))
            })
            .collect(),
        Some(v) => v
            .as_f64()
            .map(|n| vec![n])
            .ok_or_else(|| err(node, field, "number or array of numbers")),
    }
}

fn get_i32_list(
    obj: &Obj,
    node: &str,
    field: &str,
    base: &[i32],
) -> Result<Vec<i32>, PipelineError> {
    match obj.get(field) {
        None => Ok(base.to_vec()),
        Some(Value::Array(arr)) => arr
            .iter()
            .map(|v| {
                v.as_i64()
                    .and_then(|n| i32::try_from(n).ok())
                    .ok_or_else(|| err(node, field, "integer or array of integers"))
            })
            .collect(),
        Some(v) => v
            .as_i64()
            .and_then(|n| i32::try_from(n).ok())
            .map(|n| vec![n])
            .ok_or_else(|| err(node, field, "integer or array of integers")),
    }
}

/// Array of integer arrays; a single flat array becomes one row.
fn get_i32_matrix(
    obj: &Obj,
    node: &str,
    field: &str,
    base: &[Vec<i32>],
) -> Result<Vec<Vec<i32>>, PipelineError> {
    let Some(v) = obj.get(field) else {
        return Ok(base.to_vec());
    };
    let arr = v
        .as_array()
        .ok_or_else(|| err(node, field, "array of integers or array of arrays"))?;
    if arr.iter().all(Value::is_number) {
        let row: Result<Vec<i32>, _> = arr
            .iter()
            .map(|v| {
                v.as_i64()
                    .and_then(|n| i32::try_from(n).ok())
                    .ok_or_else(|| err(node, field, "integer"))
            })
            .collect();
        return Ok(vec![row?]);
    }
    arr.iter()
        .map(|row| {
            row.as_array()
                .ok_or_else(|| err(node, field, "array of arrays"))?
                .iter()
                .map(|v| {
                    v.as_i64()
                        .and_then(|n| i32::try_from(n).ok())
                        .ok_or_else(|| err(node, field, "integer"))
                })
                .collect()
        })
        .collect()
}

/// Broadcast a count/threshold list to a paired list's length.
///
/// Empty fills with `fill`; a single element repeats; any other length must
/// match exactly.
fn broadcast_f64(
    values: Vec<f64>,
    want: usize,
    fill: f64,
    node: &str,
    field: &str,
) -> Result<Vec<f64>, PipelineError> {
    if values.is_empty() {
        return Ok(vec![fill; want]);
    }
    if values.len() == want {
        return Ok(values);
    }
    if values.len() == 1 {
        return Ok(vec![values[0]; want]);
    }
    Err(PipelineError::LengthMismatch {
        node: node.to_string(),
        field: field.to_string(),
        got: values.len(),
        want,
    })
}

/// `true` means "anywhere"/self, a 4-int array a fixed region, a string
/// another node's last hit box.
pub(crate) fn parse_target(
    obj: &Obj,
    node: &str,
    field: &str,
    base: &Target,
) -> Result<Target, PipelineError> {
    match obj.get(field) {
        None => Ok(base.clone()),
        Some(Value::Bool(true)) => Ok(Target::Anywhere),
        Some(Value::String(s)) => Ok(Target::Node(s.clone())),
        Some(Value::Array(_)) => Ok(Target::Region(parse_rect(obj, node, field, Rect::default())?)),
        Some(_) => Err(err(node, field, "true, [x,y,w,h] or node name")),
    }
}

pub(crate) fn parse_rect(
    obj: &Obj,
    node: &str,
    field: &str,
    base: Rect,
) -> Result<Rect, PipelineError> {
    let Some(v) = obj.get(field) else {
        return Ok(base);
    };
    let arr = v
        .as_array()
        .ok_or_else(|| err(node, field, "[x, y, w, h]"))?;
    if arr.len() != 4 {
        return Err(PipelineError::LengthMismatch {
            node: node.to_string(),
            field: field.to_string(),
            got: arr.len(),
            want: 4,
        });
    }
    let mut out = [0i32; 4];
    for (i, v) in arr.iter().enumerate() {
        out[i] = v
            .as_i64()
            .and_then(|n| i32::try_from(n).ok())
            .ok_or_else(|| err(node, field, "[x, y, w, h]"))?;
    }
    Ok(Rect::from_array(out))
}

fn parse_order_by(obj: &Obj, node: &str, base: OrderBy) -> Result<OrderBy, PipelineError> {
    match obj.get("order_by") {
        None => Ok(base),
        Some(Value::String(s)) => {
            OrderBy::from_name(s).ok_or_else(|| err(node, "order_by", "ordering rule name"))
        }
        Some(_) => Err(err(node, "order_by", "ordering rule name")),
    }
}

/// OCR replace rules: one `[pattern, replacement]` pair or an array of them.
fn parse_replace(
    obj: &Obj,
    node: &str,
    base: &[(String, String)],
) -> Result<Vec<(String, String)>, PipelineError> {
    let Some(v) = obj.get("replace") else {
        return Ok(base.to_vec());
    };
    let arr = v
        .as_array()
        .ok_or_else(|| err(node, "replace", "pair or array of pairs"))?;

    let as_pair = |item: &Value| -> Option<(String, String)> {
        let pair = item.as_array()?;
        if pair.len() != 2 {
            return None;
        }
        Some((pair[0].as_str()?.to_string(), pair[1].as_str()?.to_string()))
    };

    if arr.len() == 2 && arr.iter().all(Value::is_string) {
        // A single flat pair.
        return Ok(vec![(
            arr[0].as_str().unwrap_or_default().to_string(),
            arr[1].as_str().unwrap_or_default().to_string(),
        )]);
    }
    arr.iter()
        .map(|item| as_pair(item).ok_or_else(|| err(node, "replace", "pair or array of pairs")))
        .collect()
}
