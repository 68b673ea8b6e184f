use serde_json::json;

use super::*;
use crate::checker::PipelineChecker;

fn parse(doc: serde_json::Value) -> Result<PipelineGraph, PipelineError> {
    let mut graph = PipelineGraph::new();
    PipelineParser::parse_bundle(&doc, &mut graph, &DefaultNodeMgr::new())?;
    Ok(graph)
}

fn parse_into(
    graph: &mut PipelineGraph,
    doc: serde_json::Value,
) -> Result<(), PipelineError> {
    PipelineParser::parse_bundle(&doc, graph, &DefaultNodeMgr::new())
}

#[test]
fn minimal_node_gets_defaults() {
    let graph = parse(json!({ "A": {} })).unwrap();
    let node = graph.get("A").unwrap();
    assert_eq!(node.name, "A");
    assert_eq!(node.recognition, Recognition::DirectHit);
    assert_eq!(node.action, Action::DoNothing);
    assert!(node.enabled);
    assert!(!node.is_sub);
    assert_eq!(node.rate_limit, 1000);
    assert_eq!(node.reco_timeout, 20_000);
    assert_eq!(node.pre_delay, 200);
    assert_eq!(node.post_delay, 200);
    assert!(!node.pre_wait_freezes.enabled());
}

#[test]
fn scalar_and_array_edges_normalize_identically() {
    let a = parse(json!({ "A": { "next": "B" }, "B": {} })).unwrap();
    let b = parse(json!({ "A": { "next": ["B"] }, "B": {} })).unwrap();
    assert_eq!(a.get("A").unwrap().next, vec!["B"]);
    assert_eq!(a.get("A").unwrap().next, b.get("A").unwrap().next);
}

#[test]
fn mistyped_field_fails_the_whole_bundle() {
    let mut graph = PipelineGraph::new();
    let err = parse_into(&mut graph, json!({ "A": { "next": 5 } })).unwrap_err();
    assert!(matches!(
        err,
        PipelineError::FieldType { node, field, .. } if node == "A" && field == "next"
    ));
    // Nothing staged.
    assert!(graph.is_empty());
}

#[test]
fn failed_bundle_leaves_prior_graph_untouched() {
    let mut graph = PipelineGraph::new();
    parse_into(&mut graph, json!({ "A": {} })).unwrap();
    parse_into(&mut graph, json!({ "B": {}, "C": { "enabled": "yes" } })).unwrap_err();
    assert!(graph.contains("A"));
    assert!(!graph.contains("B"));
}

#[test]
fn unknown_recognition_type_is_rejected() {
    let err = parse(json!({ "A": { "recognition": "Telepathy" } })).unwrap_err();
    assert!(matches!(
        err,
        PipelineError::UnknownRecognition { value, .. } if value == "Telepathy"
    ));
}

#[test]
fn unknown_action_type_is_rejected() {
    let err = parse(json!({ "A": { "action": "Teleport" } })).unwrap_err();
    assert!(matches!(err, PipelineError::UnknownAction { .. }));
}

#[test]
fn custom_recognition_requires_a_name() {
    let err = parse(json!({
        "A": { "recognition": { "type": "Custom", "param": {} } }
    }))
    .unwrap_err();
    assert!(matches!(
        err,
        PipelineError::EmptyField { field, .. } if field == "custom_recognition"
    ));
}

#[test]
fn template_match_requires_templates() {
    let err = parse(json!({
        "A": { "recognition": { "type": "TemplateMatch", "param": {} } }
    }))
    .unwrap_err();
    assert!(matches!(err, PipelineError::EmptyField { field, .. } if field == "template"));
}

#[test]
fn single_threshold_broadcasts_over_templates() {
    let graph = parse(json!({
        "A": {
            "recognition": {
                "type": "TemplateMatch",
                "param": { "template": ["a.png", "b.png", "c.png"], "threshold": 0.9 }
            }
        }
    }))
    .unwrap();
    match &graph.get("A").unwrap().recognition {
        Recognition::TemplateMatch(p) => assert_eq!(p.thresholds, vec![0.9, 0.9, 0.9]),
        other => panic!("unexpected recognition: {other:?}"),
    }
}

#[test]
fn mismatched_threshold_count_is_rejected() {
    let err = parse(json!({
        "A": {
            "recognition": {
                "type": "NeuralNetworkDetect",
                "param": { "expected": [0, 1, 2], "threshold": [0.5, 0.6] }
            }
        }
    }))
    .unwrap_err();
    assert!(matches!(
        err,
        PipelineError::LengthMismatch { got: 2, want: 3, .. }
    ));
}

#[test]
fn wait_freezes_integer_shorthand() {
    let graph = parse(json!({ "A": { "post_wait_freezes": 500 } })).unwrap();
    let wf = &graph.get("A").unwrap().post_wait_freezes;
    assert_eq!(wf.time, 500);
    assert!(wf.enabled());
    // Untouched knobs keep their defaults.
    assert_eq!(wf.threshold, 0.95);
    assert_eq!(wf.timeout, 20_000);
}

#[test]
fn wait_freezes_object_form() {
    let graph = parse(json!({
        "A": {
            "pre_wait_freezes": {
                "time": 300,
                "target": [0, 0, 100, 100],
                "threshold": 0.8,
                "rate_limit": 100,
                "timeout": 2000
            }
        }
    }))
    .unwrap();
    let wf = &graph.get("A").unwrap().pre_wait_freezes;
    assert_eq!(wf.time, 300);
    assert_eq!(wf.target, Target::Region(Rect::new(0, 0, 100, 100)));
    assert_eq!(wf.threshold, 0.8);
    assert_eq!(wf.rate_limit, 100);
    assert_eq!(wf.timeout, 2000);
}

#[test]
fn target_forms() {
    let graph = parse(json!({
        "A": { "action": { "type": "Click", "param": { "target": true } } },
        "B": { "action": { "type": "Click", "param": { "target": [1, 2, 3, 4] } } },
        "C": { "action": { "type": "Click", "param": { "target": "A" } } }
    }))
    .unwrap();
    let target = |n: &str| match &graph.get(n).unwrap().action {
        Action::Click(p) => p.target.clone(),
        other => panic!("unexpected action: {other:?}"),
    };
    assert_eq!(target("A"), Target::Anywhere);
    assert_eq!(target("B"), Target::Region(Rect::new(1, 2, 3, 4)));
    assert_eq!(target("C"), Target::Node("A".to_string()));
}

#[test]
fn load_is_idempotent() {
    let doc = json!({
        "A": {
            "recognition": {
                "type": "TemplateMatch",
                "param": { "template": "a.png", "threshold": 0.85 }
            },
            "action": { "type": "Click", "param": { "target": [0, 0, 10, 10] } },
            "next": "B",
            "rate_limit": 500
        },
        "B": { "action": "StopTask" }
    });

    let mut once = PipelineGraph::new();
    parse_into(&mut once, doc.clone()).unwrap();

    let mut twice = PipelineGraph::new();
    parse_into(&mut twice, doc.clone()).unwrap();
    parse_into(&mut twice, doc).unwrap();

    for name in once.names() {
        assert_eq!(once.get(name), twice.get(name), "node {name} diverged");
    }
    assert_eq!(once.len(), twice.len());
}

#[test]
fn later_bundle_overrides_field_by_field() {
    let mut graph = PipelineGraph::new();
    parse_into(
        &mut graph,
        json!({ "A": { "next": "B", "rate_limit": 500 }, "B": {} }),
    )
    .unwrap();
    parse_into(&mut graph, json!({ "A": { "rate_limit": 50 } })).unwrap();

    let node = graph.get("A").unwrap();
    assert_eq!(node.rate_limit, 50);
    // Fields absent in the override inherit the prior value.
    assert_eq!(node.next, vec!["B"]);
}

#[test]
fn same_type_override_inherits_parameter_values() {
    let mut graph = PipelineGraph::new();
    parse_into(
        &mut graph,
        json!({
            "A": {
                "recognition": {
                    "type": "TemplateMatch",
                    "param": { "template": ["x.png"], "threshold": 0.99, "method": 3 }
                }
            }
        }),
    )
    .unwrap();
    parse_into(
        &mut graph,
        json!({
            "A": { "recognition": { "type": "TemplateMatch", "param": { "index": 1 } } }
        }),
    )
    .unwrap();

    match &graph.get("A").unwrap().recognition {
        Recognition::TemplateMatch(p) => {
            assert_eq!(p.templates, vec!["x.png"]);
            assert_eq!(p.thresholds, vec![0.99]);
            assert_eq!(p.method, 3);
            assert_eq!(p.index, 1);
        }
        other => panic!("unexpected recognition: {other:?}"),
    }
}

#[test]
fn cross_type_override_resets_to_type_defaults() {
    let mut graph = PipelineGraph::new();
    parse_into(
        &mut graph,
        json!({
            "A": {
                "recognition": {
                    "type": "TemplateMatch",
                    "param": { "template": ["x.png"], "method": 3 }
                }
            }
        }),
    )
    .unwrap();
    parse_into(
        &mut graph,
        json!({ "A": { "recognition": { "type": "OCR", "param": { "expected": "ok" } } } }),
    )
    .unwrap();

    match &graph.get("A").unwrap().recognition {
        Recognition::Ocr(p) => {
            assert_eq!(p.expected, vec!["ok"]);
            // Global OCR defaults, nothing carried over from TemplateMatch.
            assert_eq!(p.threshold, 0.3);
            assert!(p.model.is_empty());
        }
        other => panic!("unexpected recognition: {other:?}"),
    }
}

#[test]
fn default_sentinel_inherits_parent_type() {
    let mut graph = PipelineGraph::new();
    parse_into(
        &mut graph,
        json!({
            "A": {
                "recognition": {
                    "type": "TemplateMatch",
                    "param": { "template": ["x.png"], "method": 3 }
                }
            }
        }),
    )
    .unwrap();
    parse_into(
        &mut graph,
        json!({ "A": { "recognition": { "type": "Default", "param": { "index": 2 } } } }),
    )
    .unwrap();

    match &graph.get("A").unwrap().recognition {
        Recognition::TemplateMatch(p) => {
            assert_eq!(p.templates, vec!["x.png"]);
            assert_eq!(p.method, 3);
            assert_eq!(p.index, 2);
        }
        other => panic!("unexpected recognition: {other:?}"),
    }
}

#[test]
fn dollar_keys_are_skipped() {
    let graph = parse(json!({ "$schema": "whatever", "A": {} })).unwrap();
    assert_eq!(graph.len(), 1);
    assert!(graph.contains("A"));
}

#[test]
fn parsed_graph_passes_validation() {
    let graph = parse(json!({
        "Entry": { "next": ["Mid"], "interrupt": "Rescue", "on_error": "Bail" },
        "Mid": { "action": "StopTask" },
        "Rescue": { "is_sub": true },
        "Bail": {}
    }))
    .unwrap();
    PipelineChecker::check(&graph).unwrap();
}
