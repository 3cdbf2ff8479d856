//! # postmsg-rpc
//!
//! RPC over a cross-document messaging channel between a host page and an
//! embedded guest frame.
//!
//! - [`handler::RequestHandler`]: method registry, origin validation, dispatch,
//!   exactly one reply per accepted request
//! - [`server::PostMessageApiServer`]: request handler plus the `"init"`
//!   handshake with exponential backoff and guest-reload detection
//! - [`client::PostMessageApiClient`]: caller side, correlates replies to calls
//!   by monotonic method ID
//! - [`transport`]: in-process model of windows, frames, and the message
//!   event stream the components listen on
//!
//! All components spawn tokio tasks and must be created inside a runtime.

#![deny(unsafe_code)]

pub mod client;
pub mod handler;
pub mod hooks;
pub mod server;
pub mod transport;

pub use client::{ClientConfig, PostMessageApiClient};
pub use handler::{FnHandler, MethodHandler, MethodRegistry, RequestHandler};
pub use hooks::{ClientHooks, NoopHooks, ServerHooks};
pub use server::{HandshakeState, PostMessageApiServer};
pub use transport::{ContentSurface, Frame, Listener, LoadEvent, MessageEvent, Window, WindowSurface};
