//! Lifecycle hooks implemented by the embedding code.
//!
//! Every method has a no-op default, so implementors override only what they
//! observe. Hooks run on the component's listener task and must not block.

/// Server-side handshake notifications.
pub trait ServerHooks: Send + Sync {
    /// The guest acknowledged the handshake.
    fn on_initialization_complete(&self) {}

    /// The handshake gave up after the maximum number of attempts.
    ///
    /// `origin` is the guest URL that never answered.
    fn on_initialization_error(&self, origin: &str) {
        let _ = origin;
    }
}

/// Client-side handshake notification.
pub trait ClientHooks: Send + Sync {
    /// A wait-for-init client bound its target window.
    fn on_initialized(&self) {}
}

/// Hooks that ignore every notification.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopHooks;

impl ServerHooks for NoopHooks {}
impl ClientHooks for NoopHooks {}
