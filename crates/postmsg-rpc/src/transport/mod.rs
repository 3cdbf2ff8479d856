//! In-process model of the cross-document messaging platform.
//!
//! - [`Window`]: a browsing context with a URL and a message event stream
//! - [`ContentSurface`]: an embedding element (`<iframe>`, `<webview>`) that
//!   exposes its content window, current source URL, and load events
//! - [`Listener`]: an owned subscription to a window's message stream

mod frame;
mod listener;
mod window;

pub use frame::{ContentSurface, Frame, LoadEvent, WindowSurface};
pub use listener::Listener;
pub use window::{DEFAULT_CHANNEL_CAPACITY, MessageEvent, WILDCARD_ORIGIN, Window};
