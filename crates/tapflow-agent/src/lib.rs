//! # tapflow Agent
//!
//! Cross-process custom callbacks over a single duplex channel.
//!
//! The [`AgentClient`] side owns the engine (Tasker, Resource, Controller);
//! the [`AgentServer`] side hosts custom recognition/action callbacks. The
//! server advertises its callback names at startup, the client installs
//! forwarding stubs for them, and a callback invoked through a stub receives
//! Remote* proxies that reach back into the client's objects via reverse
//! requests on the same channel. Inline image transfer shares the channel
//! with request/response traffic.

pub mod channel;
pub mod client;
pub mod error;
pub mod message;
pub mod remote;
pub mod server;
pub mod transceiver;

pub use channel::{Duplex, InProcDuplex, SocketDuplex};
pub use client::AgentClient;
pub use error::AgentError;
pub use message::{StartUpResponse, PROTOCOL_VERSION};
pub use remote::{RemoteContext, RemoteController, RemoteResource, RemoteTasker};
pub use server::AgentServer;
pub use transceiver::{ReverseDispatch, Transceiver};
