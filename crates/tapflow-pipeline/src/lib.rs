//! # tapflow Pipeline
//!
//! The declarative node graph: data model, JSON parsing with default-value
//! inheritance and incremental overrides, and whole-graph validation.
//!
//! A pipeline bundle is a JSON object mapping node names to node definitions.
//! [`PipelineParser`] turns bundles into a [`PipelineGraph`], merging each
//! node against type-level defaults from [`DefaultNodeMgr`] and against any
//! previously loaded definition of the same name (later bundles specialize
//! earlier ones field by field). [`PipelineChecker`] then validates the merged
//! graph as a whole. Any failure rejects the entire load; no partial graph is
//! ever installed.

pub mod checker;
pub mod defaults;
pub mod error;
pub mod json;
pub mod model;
pub mod parser;

pub use checker::PipelineChecker;
pub use defaults::DefaultNodeMgr;
pub use error::PipelineError;
pub use model::{
    Action, ActionKind, OrderBy, PipelineGraph, PipelineNode, Recognition, RecognitionKind,
    WaitFreezes,
};
pub use parser::PipelineParser;
