//! Embedding surfaces: the element that hosts a guest document.

use tokio::sync::broadcast;

use super::window::Window;

/// A guest document finished loading in a surface.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoadEvent {
    /// URL that was loaded.
    pub url: String,
}

/// The embedding element seen by a request handler or server.
pub trait ContentSurface: Send + Sync {
    /// The window replies and handshake messages are posted to.
    fn content_window(&self) -> Window;

    /// URL of the currently loaded guest document.
    fn src(&self) -> String;

    /// Load notifications, one per completed navigation or reload.
    fn subscribe_loads(&self) -> broadcast::Receiver<LoadEvent>;
}

/// An in-process `<iframe>`.
pub struct Frame {
    window: Window,
    loads: broadcast::Sender<LoadEvent>,
}

impl Frame {
    /// Create a frame whose content window shows `src`.
    pub fn new(src: impl Into<String>) -> Self {
        Self::with_window(Window::new(src))
    }

    /// Create a frame around an existing content window.
    pub fn with_window(window: Window) -> Self {
        let (loads, _) = broadcast::channel(16);
        Self { window, loads }
    }

    /// Navigate the content window and fire a load event.
    pub fn navigate(&self, url: impl Into<String>) {
        let url = url.into();
        self.window.navigate(url.clone());
        self.fire_load(url);
    }

    /// Reload the current document and fire a load event.
    pub fn reload(&self) {
        self.fire_load(self.window.url());
    }

    fn fire_load(&self, url: String) {
        // No subscribers is fine: nobody is supervising this frame yet.
        let _ = self.loads.send(LoadEvent { url });
    }
}

impl ContentSurface for Frame {
    fn content_window(&self) -> Window {
        self.window.clone()
    }

    fn src(&self) -> String {
        self.window.url()
    }

    fn subscribe_loads(&self) -> broadcast::Receiver<LoadEvent> {
        self.loads.subscribe()
    }
}

/// A fixed peer window exposed as a surface, e.g. a guest's parent.
///
/// Never fires load events.
pub struct WindowSurface {
    window: Window,
    loads: broadcast::Sender<LoadEvent>,
}

impl WindowSurface {
    /// Wrap `window`.
    pub fn new(window: Window) -> Self {
        let (loads, _) = broadcast::channel(1);
        Self { window, loads }
    }
}

impl ContentSurface for WindowSurface {
    fn content_window(&self) -> Window {
        self.window.clone()
    }

    fn src(&self) -> String {
        self.window.url()
    }

    fn subscribe_loads(&self) -> broadcast::Receiver<LoadEvent> {
        self.loads.subscribe()
    }
}
