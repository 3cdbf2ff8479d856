//! Windows and their message event streams.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use postmsg_core::origin_of;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// Default number of buffered message events per window.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Target origin that skips the platform's origin check.
pub const WILDCARD_ORIGIN: &str = "*";

static NEXT_WINDOW_ID: AtomicU64 = AtomicU64::new(1);

/// A message delivered to a window.
#[derive(Clone, Debug)]
pub struct MessageEvent {
    /// Structured payload.
    pub data: Value,
    /// Serialized origin of the sender at send time.
    pub origin: String,
    /// The sending window.
    pub source: Window,
}

/// A browsing context that can receive messages.
///
/// Cloning yields another handle to the same window; equality is identity.
#[derive(Clone)]
pub struct Window {
    inner: Arc<WindowInner>,
}

struct WindowInner {
    id: u64,
    url: RwLock<String>,
    events: broadcast::Sender<MessageEvent>,
}

impl Window {
    /// Create a window showing `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_capacity(url, DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a window whose message stream buffers `capacity` events.
    pub fn with_capacity(url: impl Into<String>, capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(WindowInner {
                id: NEXT_WINDOW_ID.fetch_add(1, Ordering::Relaxed),
                url: RwLock::new(url.into()),
                events,
            }),
        }
    }

    /// Process-unique identifier.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Current document URL.
    pub fn url(&self) -> String {
        self.inner.url.read().clone()
    }

    /// Serialized origin of the current document, `"null"` when opaque.
    pub fn origin(&self) -> String {
        origin_of(&self.inner.url.read()).unwrap_or_else(|| "null".to_owned())
    }

    /// Point the window at a new document.
    pub fn navigate(&self, url: impl Into<String>) {
        *self.inner.url.write() = url.into();
    }

    /// Subscribe to every message posted to this window from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<MessageEvent> {
        self.inner.events.subscribe()
    }

    /// Number of live subscriptions.
    pub fn listener_count(&self) -> usize {
        self.inner.events.receiver_count()
    }

    /// Whether both handles refer to the same window.
    pub fn is_same(&self, other: &Window) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Post `data` to this window on behalf of `source`.
    ///
    /// Unless `target_origin` is `"*"`, the message is dropped when its
    /// origin differs from this window's current origin. Returns whether the
    /// message reached at least one listener.
    pub fn post_message(&self, data: Value, target_origin: &str, source: &Window) -> bool {
        if target_origin != WILDCARD_ORIGIN {
            let own = self.origin();
            if origin_of(target_origin).as_deref() != Some(own.as_str()) {
                debug!(
                    window = self.id(),
                    target_origin,
                    origin = %own,
                    "target origin does not match recipient, dropping message"
                );
                return false;
            }
        }

        let event = MessageEvent {
            data,
            origin: source.origin(),
            source: source.clone(),
        };
        match self.inner.events.send(event) {
            Ok(receivers) => {
                trace!(window = self.id(), receivers, "message delivered");
                true
            }
            Err(_) => {
                trace!(window = self.id(), "no listeners, message discarded");
                false
            }
        }
    }
}

impl PartialEq for Window {
    fn eq(&self, other: &Self) -> bool {
        self.is_same(other)
    }
}

impl Eq for Window {}

impl fmt::Debug for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Window")
            .field("id", &self.inner.id)
            .field("url", &*self.inner.url.read())
            .finish()
    }
}
