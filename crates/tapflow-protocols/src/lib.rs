//! # tapflow Protocols
//!
//! Capability traits and shared value types for the tapflow screen-automation
//! framework.
//!
//! The execution engine consumes devices, vision algorithms and custom user
//! code exclusively through the traits defined here:
//!
//! - [`Controller`]: produces screenshots and accepts input events
//! - [`CustomRecognition`] / [`CustomAction`]: user callbacks, in-process or
//!   behind the agent channel
//! - [`ContextApi`] / [`TaskerApi`] / [`ResourceApi`]: the surfaces a callback
//!   may reach back into, local or proxied across a process boundary
//! - [`FrameComparator`]: frame-similarity check used by the wait-for-freeze
//!   gate
//!
//! Value types ([`Rect`], [`Target`], [`Image`], [`RecoResult`], run records)
//! are shared vocabulary between the engine and the agent protocol.

pub mod compare;
pub mod context;
pub mod controller;
pub mod custom;
pub mod error;
pub mod resource;
pub mod result;
pub mod tasker;
pub mod types;

pub use compare::{DiffComparator, FrameComparator};
pub use context::ContextApi;
pub use controller::Controller;
pub use custom::{CustomAction, CustomActionArg, CustomRecognition, CustomRecognitionArg};
pub use error::CapabilityError;
pub use resource::ResourceApi;
pub use result::{NodeRunRecord, RecoResult, RunStatus, TaskRunRecord};
pub use tasker::{NodeId, RecoId, TaskId, TaskerApi};
pub use types::{Image, Rect, Target};
