//! # postmsg-core
//!
//! Foundation types for the postmsg cross-document RPC protocol.
//!
//! This crate provides the shared vocabulary that the other postmsg crates depend on:
//!
//! - **Envelopes**: `RequestEnvelope`, `ReplyEnvelope` and the bare `"init"` handshake,
//!   unified under the internal `Envelope` variant
//! - **Origin filters**: exact (client side) and protocol/host/path-prefix (handler side)
//! - **Backoff**: handshake retry delays, `base * 2^attempt`
//! - **Errors**: `OriginError`, `EnvelopeError`, `RpcError`, `CallError` via `thiserror`
//! - **Logging**: `tracing-subscriber` initialization

#![deny(unsafe_code)]

pub mod backoff;
pub mod envelope;
pub mod errors;
pub mod logging;
pub mod origin;

pub use backoff::{BackoffConfig, calculate_backoff_delay};
pub use envelope::{Envelope, INIT_MESSAGE, ReplyEnvelope, RequestEnvelope};
pub use errors::{CallError, EnvelopeError, OriginError, RpcError};
pub use logging::{LogFormat, init_subscriber};
pub use origin::{OriginFilter, origin_of};
