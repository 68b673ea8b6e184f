//! Whole-graph validation, run once after every bundle of a load is parsed.

use std::collections::HashSet;

use regex::Regex;
use tracing::debug;

use crate::error::PipelineError;
use crate::model::{PipelineGraph, Recognition};

pub struct PipelineChecker;

impl PipelineChecker {
    /// Checks, in order: every edge target exists, no target appears in more
    /// than one of a node's next/interrupt/on_error lists, every OCR
    /// expected/replace pattern compiles. Any failure rejects the load.
    pub fn check(graph: &PipelineGraph) -> Result<(), PipelineError> {
        for (name, node) in graph.iter() {
            let mut seen = HashSet::new();
            for list in [&node.next, &node.interrupt, &node.on_error] {
                for target in list {
                    if !graph.contains(target) {
                        return Err(PipelineError::DanglingEdge {
                            node: name.clone(),
                            target: target.clone(),
                        });
                    }
                    if !seen.insert(target.as_str()) {
                        return Err(PipelineError::DuplicateEdge {
                            node: name.clone(),
                            target: target.clone(),
                        });
                    }
                }
            }

            if let Recognition::Ocr(p) = &node.recognition {
                for pattern in &p.expected {
                    compile(name, "expected", pattern)?;
                }
                for (pattern, _) in &p.replace {
                    compile(name, "replace", pattern)?;
                }
            }
        }
        debug!(nodes = graph.len(), "graph validated");
        Ok(())
    }
}

fn compile(node: &str, field: &str, pattern: &str) -> Result<(), PipelineError> {
    Regex::new(pattern).map_err(|e| PipelineError::InvalidRegex {
        node: node.to_string(),
        field: field.to_string(),
        pattern: pattern.to_string(),
        source: Box::new(e),
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defaults::DefaultNodeMgr;
    use crate::parser::PipelineParser;
    use serde_json::json;

    fn load(doc: serde_json::Value) -> Result<PipelineGraph, PipelineError> {
        let mut graph = PipelineGraph::new();
        PipelineParser::parse_bundle(&doc, &mut graph, &DefaultNodeMgr::new())?;
        PipelineChecker::check(&graph)?;
        Ok(graph)
    }

    #[test]
    fn accepts_well_formed_graph() {
        let graph = load(json!({
            "A": { "next": "B", "interrupt": "C" },
            "B": { "action": "StopTask" },
            "C": { "is_sub": true }
        }))
        .unwrap();
        assert_eq!(graph.len(), 3);
    }

    #[test]
    fn rejects_dangling_edge() {
        let err = load(json!({
            "A": { "next": "Ghost" }
        }))
        .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::DanglingEdge { node, target } if node == "A" && target == "Ghost"
        ));
    }

    #[test]
    fn rejects_target_shared_across_edge_lists() {
        let err = load(json!({
            "A": { "next": "B", "on_error": "B" },
            "B": {}
        }))
        .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::DuplicateEdge { node, target } if node == "A" && target == "B"
        ));
    }

    #[test]
    fn rejects_duplicate_within_one_list() {
        let err = load(json!({
            "A": { "next": ["B", "B"] },
            "B": {}
        }))
        .unwrap_err();
        assert!(matches!(err, PipelineError::DuplicateEdge { .. }));
    }

    #[test]
    fn rejects_invalid_ocr_regex() {
        let err = load(json!({
            "A": {
                "recognition": { "type": "OCR", "param": { "expected": "[unclosed" } }
            }
        }))
        .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::InvalidRegex { node, field, .. } if node == "A" && field == "expected"
        ));
    }

    #[test]
    fn rejects_invalid_replace_pattern() {
        let err = load(json!({
            "A": {
                "recognition": {
                    "type": "OCR",
                    "param": { "replace": ["(bad", "good"] }
                }
            }
        }))
        .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidRegex { field, .. } if field == "replace"));
    }
}
