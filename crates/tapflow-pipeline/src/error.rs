//! Load-time pipeline errors.
//!
//! Every variant names the offending node (and field where one exists) so a
//! bundle author can find the problem without a debugger. Any of these aborts
//! the whole load.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("pipeline document is not a JSON object")]
    NotAnObject,

    #[error("node '{node}': field '{field}' expected {expected}")]
    FieldType {
        node: String,
        field: String,
        expected: &'static str,
    },

    #[error("node '{node}': field '{field}' must not be empty")]
    EmptyField { node: String, field: String },

    #[error("node '{node}': unknown recognition type '{value}'")]
    UnknownRecognition { node: String, value: String },

    #[error("node '{node}': unknown action type '{value}'")]
    UnknownAction { node: String, value: String },

    #[error("node '{node}': field '{field}' has {got} entries, expected {want}")]
    LengthMismatch {
        node: String,
        field: String,
        got: usize,
        want: usize,
    },

    #[error("node '{node}': edge target '{target}' does not exist")]
    DanglingEdge { node: String, target: String },

    #[error("node '{node}': target '{target}' appears in more than one of next/interrupt/on_error")]
    DuplicateEdge { node: String, target: String },

    #[error("node '{node}': field '{field}': invalid regex '{pattern}'")]
    InvalidRegex {
        node: String,
        field: String,
        pattern: String,
        #[source]
        source: Box<regex::Error>,
    },

    #[error("defaults section: {0}")]
    Defaults(String),
}
