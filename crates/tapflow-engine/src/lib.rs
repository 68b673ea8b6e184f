//! # tapflow Engine
//!
//! The pipeline interpreter: walks a loaded node graph against live
//! screenshots, pairing each node's recognition step with its action step
//! under the declared pacing, timeout and fallback rules.
//!
//! Entry point is [`Tasker`]: bind a [`Controller`](tapflow_protocols::Controller)
//! and a [`Resource`], post an entry node, then poll or await the run's
//! terminal status. Each posted run executes on its own worker task with a
//! private copy of the graph, so runtime overrides never leak across runs.

pub mod action;
pub mod bank;
pub mod cache;
pub mod context;
pub mod error;
pub mod events;
pub mod freeze;
pub mod recognition;
pub mod resource;
pub mod runner;
pub mod tasker;

pub use action::{Actuator, ControllerActuator};
pub use bank::ResultBank;
pub use cache::RecoCache;
pub use context::Context;
pub use error::EngineError;
pub use events::EventSink;
pub use freeze::FreezeGate;
pub use recognition::{DirectHitRecognizer, Recognizer, RecognizerRegistry};
pub use resource::Resource;
pub use runner::PipelineRunner;
pub use tasker::Tasker;
