//! Calling side of the channel.
//!
//! Every call gets a method ID from a per-client counter and parks a oneshot
//! sender in the pending map. The reply listener settles the entry whose ID
//! the reply echoes; anything else is dropped.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use postmsg_core::{CallError, Envelope, OriginError, OriginFilter, RequestEnvelope};
use postmsg_settings::ClientSettings;
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, trace, warn};

use crate::hooks::{ClientHooks, NoopHooks};
use crate::transport::{Listener, MessageEvent, Window};

/// Per-client call options.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClientConfig {
    /// Applied to every [`PostMessageApiClient::call_api_fn`]. `None` waits
    /// for the reply indefinitely.
    pub call_timeout: Option<Duration>,
}

impl From<&ClientSettings> for ClientConfig {
    fn from(settings: &ClientSettings) -> Self {
        Self {
            call_timeout: settings.call_timeout(),
        }
    }
}

struct PendingCall {
    method: String,
    reply_tx: oneshot::Sender<Result<Value, Value>>,
}

/// Issues calls to a peer's request handler and awaits their replies.
///
/// Dropping the client detaches its listener and fails every pending call
/// with [`CallError::Closed`].
pub struct PostMessageApiClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    own_window: Window,
    filter: OriginFilter,
    target: RwLock<Option<Window>>,
    next_method_id: AtomicU64,
    pending: Mutex<HashMap<u64, PendingCall>>,
    hooks: Arc<dyn ClientHooks>,
    initialized: watch::Sender<bool>,
    listener: Mutex<Listener>,
    closed: AtomicBool,
    config: ClientConfig,
}

impl PostMessageApiClient {
    /// Create a client that binds to whichever window first messages
    /// `own_window` from `target_origin`, and acknowledges it with `"init"`.
    pub fn wait_for_init(
        own_window: Window,
        target_origin: &str,
        hooks: Arc<dyn ClientHooks>,
        config: ClientConfig,
    ) -> Result<Self, OriginError> {
        let inner = Arc::new(ClientInner::new(
            own_window,
            OriginFilter::exact(target_origin)?,
            None,
            hooks,
            config,
        ));
        {
            // Binding swaps the listener under this lock.
            let mut slot = inner.listener.lock();
            *slot = ClientInner::attach_init_listener(&inner);
        }
        Ok(Self { inner })
    }

    /// Create a client already bound to `target_window`.
    pub fn connected(
        own_window: Window,
        target_window: Window,
        target_origin: &str,
        config: ClientConfig,
    ) -> Result<Self, OriginError> {
        let inner = Arc::new(ClientInner::new(
            own_window,
            OriginFilter::exact(target_origin)?,
            Some(target_window),
            Arc::new(NoopHooks),
            config,
        ));
        *inner.listener.lock() = ClientInner::attach_reply_listener(&inner);
        Ok(Self { inner })
    }

    /// Whether a target window is bound.
    pub fn is_initialized(&self) -> bool {
        self.inner.target.read().is_some()
    }

    /// The bound target window.
    pub fn target_window(&self) -> Option<Window> {
        self.inner.target.read().clone()
    }

    /// Wait until a target window is bound.
    pub async fn wait_until_initialized(&self) {
        let mut initialized = self.inner.initialized.subscribe();
        let _ = initialized.wait_for(|bound| *bound).await;
    }

    /// Calls awaiting a reply.
    pub fn pending_calls(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// Call `name` on the peer and wait for its reply.
    ///
    /// Fails with [`CallError::NotInitialized`] without sending anything when
    /// no target is bound. The client's configured timeout applies.
    pub async fn call_api_fn(&self, name: &str, args: Vec<Value>) -> Result<Value, CallError> {
        self.call(name, args, self.inner.config.call_timeout).await
    }

    /// Like [`Self::call_api_fn`], giving up after `timeout`.
    pub async fn call_api_fn_with_timeout(
        &self,
        name: &str,
        args: Vec<Value>,
        timeout: Duration,
    ) -> Result<Value, CallError> {
        self.call(name, args, Some(timeout)).await
    }

    async fn call(
        &self,
        name: &str,
        args: Vec<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value, CallError> {
        let method = name.to_owned();
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(CallError::Closed { method });
        }
        let Some(target) = self.target_window() else {
            debug!(method = name, "call before target window is bound");
            return Err(CallError::NotInitialized { method });
        };

        let method_id = self.inner.next_method_id.fetch_add(1, Ordering::Relaxed);
        let (reply_tx, reply_rx) = oneshot::channel();
        let _ = self.inner.pending.lock().insert(
            method_id,
            PendingCall {
                method: method.clone(),
                reply_tx,
            },
        );
        let _slot = PendingSlot {
            pending: &self.inner.pending,
            method_id,
        };

        let request = RequestEnvelope::new(method_id, name, args);
        let delivered = target.post_message(
            Envelope::Request(request).to_value(),
            self.inner.filter.origin(),
            &self.inner.own_window,
        );
        trace!(method = name, method_id, delivered, "request sent");

        let outcome = match timeout {
            None => reply_rx.await,
            Some(limit) => match tokio::time::timeout(limit, reply_rx).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    debug!(method = name, method_id, "call timed out");
                    return Err(CallError::TimedOut {
                        method,
                        timeout_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                    });
                }
            },
        };

        match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(error)) => Err(CallError::Rejected { method, error }),
            Err(_) => Err(CallError::Closed { method }),
        }
    }

    /// Detach the listener and fail every pending call with
    /// [`CallError::Closed`]. Later calls fail the same way.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.inner.listener.lock().detach();
        let released: Vec<PendingCall> = self.inner.pending.lock().drain().map(|(_, call)| call).collect();
        if !released.is_empty() {
            debug!(count = released.len(), "released pending calls on close");
        }
    }
}

impl Drop for PostMessageApiClient {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for PostMessageApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostMessageApiClient")
            .field("filter", &self.inner.filter)
            .field("initialized", &self.is_initialized())
            .field("pending", &self.pending_calls())
            .finish()
    }
}

/// Removes a call's pending entry when the awaiting future ends, however it
/// ends.
struct PendingSlot<'a> {
    pending: &'a Mutex<HashMap<u64, PendingCall>>,
    method_id: u64,
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        let _ = self.pending.lock().remove(&self.method_id);
    }
}

impl ClientInner {
    fn new(
        own_window: Window,
        filter: OriginFilter,
        target: Option<Window>,
        hooks: Arc<dyn ClientHooks>,
        config: ClientConfig,
    ) -> Self {
        let (initialized, _) = watch::channel(target.is_some());
        Self {
            own_window,
            filter,
            target: RwLock::new(target),
            next_method_id: AtomicU64::new(0),
            pending: Mutex::new(HashMap::new()),
            hooks,
            initialized,
            listener: Mutex::new(Listener::detached("client")),
            closed: AtomicBool::new(false),
            config,
        }
    }

    fn attach_init_listener(this: &Arc<Self>) -> Listener {
        let mut events = this.own_window.subscribe();
        let inner = Arc::clone(this);
        Listener::attach("client-init", move |cancel| async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    received = events.recv() => match received {
                        Ok(event) if inner.filter.matches(&event.origin) => {
                            ClientInner::bind(&inner, event.source);
                            break;
                        }
                        Ok(event) => {
                            info!(origin = %event.origin, "ignoring message from unexpected origin while waiting for init");
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "init listener lagged, messages lost");
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
        })
    }

    fn attach_reply_listener(this: &Arc<Self>) -> Listener {
        let mut events = this.own_window.subscribe();
        let inner = Arc::clone(this);
        Listener::attach("client-reply", move |cancel| async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    received = events.recv() => match received {
                        Ok(event) => inner.on_reply(event),
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "reply listener lagged, replies lost");
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
        })
    }

    fn bind(this: &Arc<Self>, target: Window) {
        let mut slot = this.listener.lock();
        if this.closed.load(Ordering::Acquire) || this.target.read().is_some() {
            return;
        }
        *this.target.write() = Some(target.clone());
        let mut init_listener = std::mem::replace(&mut *slot, Self::attach_reply_listener(this));
        drop(slot);
        let _ = init_listener.detach();

        let acknowledged =
            target.post_message(Envelope::Init.to_value(), this.filter.origin(), &this.own_window);
        let _ = this.initialized.send_replace(true);
        info!(origin = this.filter.origin(), acknowledged, "bound target window");
        this.hooks.on_initialized();
    }

    fn on_reply(&self, event: MessageEvent) {
        if !self.filter.matches(&event.origin) {
            info!(origin = %event.origin, "ignoring message from unexpected origin");
            return;
        }
        let from_target = self
            .target
            .read()
            .as_ref()
            .is_some_and(|target| target.is_same(&event.source));
        if !from_target {
            warn!(origin = %event.origin, "message from a window other than the bound target, dropping");
            return;
        }

        let reply = match Envelope::from_value(&event.data) {
            Ok(Envelope::Reply(reply)) => reply,
            Ok(_) => {
                trace!("not a reply, ignoring");
                return;
            }
            Err(err) => {
                debug!(error = %err, "ignoring malformed message");
                return;
            }
        };

        let Some(call) = self.pending.lock().remove(&reply.method_id) else {
            info!(method_id = reply.method_id, "no pending call for reply, dropping");
            return;
        };
        trace!(method = %call.method, method_id = reply.method_id, rejected = reply.rejected, "settling call");
        // The caller may have stopped waiting.
        let _ = call.reply_tx.send(reply.into_result());
    }
}
