//! Method registry, dispatch, and the request listener.
//!
//! A [`RequestHandler`] terminates inbound calls on its own window's message
//! stream. Accepted requests are dispatched on a spawned task and answered
//! with exactly one reply envelope posted to the surface's content window.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics::{counter, histogram};
use parking_lot::RwLock;
use postmsg_core::{Envelope, OriginError, OriginFilter, ReplyEnvelope, RequestEnvelope, RpcError};
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, trace, warn};

use crate::transport::{ContentSurface, Listener, MessageEvent, Window};

/// Handlers running longer than this are logged.
const SLOW_HANDLER: Duration = Duration::from_secs(5);

/// Trait implemented by every registered method.
#[async_trait]
pub trait MethodHandler: Send + Sync {
    /// Run the method with the caller's positional arguments.
    async fn handle(&self, args: Vec<Value>) -> Result<Value, RpcError>;
}

/// Adapter turning an async closure into a [`MethodHandler`].
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F, Fut> MethodHandler for FnHandler<F>
where
    F: Fn(Vec<Value>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, RpcError>> + Send,
{
    async fn handle(&self, args: Vec<Value>) -> Result<Value, RpcError> {
        (self.0)(args).await
    }
}

/// Registry mapping method names to handlers.
pub struct MethodRegistry {
    handlers: HashMap<String, Arc<dyn MethodHandler>>,
}

impl MethodRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler; an existing entry with the same name is replaced.
    pub fn register(&mut self, method: &str, handler: impl MethodHandler + 'static) {
        let _ = self.handlers.insert(method.to_owned(), Arc::new(handler));
    }

    /// Look up a handler.
    pub fn get(&self, method: &str) -> Option<Arc<dyn MethodHandler>> {
        self.handlers.get(method).cloned()
    }

    /// Check whether a method is registered.
    pub fn has_method(&self, method: &str) -> bool {
        self.handlers.contains_key(method)
    }

    /// List all registered method names (sorted).
    pub fn methods(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for MethodRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Terminates RPC calls arriving on a window.
///
/// Clones share the registry and configuration.
#[derive(Clone)]
pub struct RequestHandler {
    inner: Arc<HandlerInner>,
}

struct HandlerInner {
    registry: RwLock<MethodRegistry>,
    own_window: Window,
    surface: Arc<dyn ContentSurface>,
    target_url: String,
    origin_filter: OriginFilter,
}

impl std::fmt::Debug for RequestHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestHandler")
            .field("target_url", &self.inner.target_url)
            .field("origin_filter", &self.inner.origin_filter)
            .field("methods", &self.methods())
            .finish_non_exhaustive()
    }
}

impl RequestHandler {
    /// Create a handler listening on `own_window` and replying to
    /// `surface`'s content window.
    ///
    /// `origin_filter_url` is matched by protocol, host and path prefix;
    /// `target_url` scopes every posted reply.
    pub fn new(
        own_window: Window,
        surface: Arc<dyn ContentSurface>,
        origin_filter_url: &str,
        target_url: impl Into<String>,
    ) -> Result<Self, OriginError> {
        Ok(Self {
            inner: Arc::new(HandlerInner {
                registry: RwLock::new(MethodRegistry::new()),
                own_window,
                surface,
                target_url: target_url.into(),
                origin_filter: OriginFilter::prefix(origin_filter_url)?,
            }),
        })
    }

    /// Register a method; last registration wins.
    pub fn register_method(&self, name: &str, handler: impl MethodHandler + 'static) {
        self.inner.registry.write().register(name, handler);
    }

    /// Register an async closure as a method.
    pub fn register_fn<F, Fut>(&self, name: &str, f: F)
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, RpcError>> + Send + 'static,
    {
        self.register_method(name, FnHandler(f));
    }

    /// Whether `name` is registered.
    pub fn can_handle(&self, name: &str) -> bool {
        self.inner.registry.read().has_method(name)
    }

    /// Registered method names (sorted).
    pub fn methods(&self) -> Vec<String> {
        self.inner.registry.read().methods()
    }

    /// Run `name` with `args`.
    ///
    /// Unknown names resolve to [`RpcError::MethodNotFound`].
    pub async fn handle(&self, name: &str, args: Vec<Value>) -> Result<Value, RpcError> {
        let handler = self.inner.registry.read().get(name);
        let Some(handler) = handler else {
            counter!("postmsg_request_errors_total", "method" => name.to_owned(), "error_type" => "method_not_found").increment(1);
            return Err(RpcError::MethodNotFound {
                method: name.to_owned(),
            });
        };

        counter!("postmsg_requests_total", "method" => name.to_owned()).increment(1);
        let start = Instant::now();
        let result = handler.handle(args).await;
        let duration = start.elapsed();
        histogram!("postmsg_request_duration_seconds", "method" => name.to_owned())
            .record(duration.as_secs_f64());

        if let Err(ref err) = result {
            counter!("postmsg_request_errors_total", "method" => name.to_owned(), "error_type" => err.code()).increment(1);
        }
        if duration >= SLOW_HANDLER {
            warn!(
                method = name,
                duration_secs = duration.as_secs_f64(),
                "slow RPC handler"
            );
        }
        result
    }

    /// Whether `origin` satisfies the handler's prefix filter.
    pub fn origin_matches_filter(&self, origin: &str) -> bool {
        self.inner.origin_filter.matches(origin)
    }

    /// URL every reply is scoped to.
    pub fn target_url(&self) -> &str {
        &self.inner.target_url
    }

    /// Window whose message stream is listened to.
    pub fn own_window(&self) -> &Window {
        &self.inner.own_window
    }

    /// Surface replies are delivered through.
    pub fn surface(&self) -> &Arc<dyn ContentSurface> {
        &self.inner.surface
    }

    /// Post `data` to the surface's content window, scoped to the target URL.
    pub(crate) fn post_to_target(&self, data: Value) -> bool {
        self.inner.surface.content_window().post_message(
            data,
            &self.inner.target_url,
            &self.inner.own_window,
        )
    }

    /// Attach the request listener to the own window's message stream.
    pub fn listen(&self) -> Listener {
        let mut events = self.inner.own_window.subscribe();
        let handler = self.clone();
        Listener::attach("request-handler", move |cancel| async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    received = events.recv() => match received {
                        Ok(event) => handler.on_message(event),
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "request listener lagged, messages lost");
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
        })
    }

    /// Process one inbound event: validate, and dispatch if it is a request
    /// for a registered method.
    pub(crate) fn on_message(&self, event: MessageEvent) {
        if !self.origin_matches_filter(&event.origin) {
            info!(origin = %event.origin, "ignoring message from unexpected origin");
            return;
        }

        let request = match Envelope::from_value(&event.data) {
            Ok(Envelope::Request(request)) => request,
            Ok(_) => {
                trace!("not a request, ignoring");
                return;
            }
            Err(err) => {
                debug!(error = %err, "ignoring malformed message");
                return;
            }
        };

        if !self.can_handle(&request.function) {
            info!(method = %request.function, method_id = request.method_id, "no handler registered, dropping request");
            return;
        }

        let handler = self.clone();
        drop(tokio::spawn(async move { handler.respond(request).await }));
    }

    async fn respond(&self, request: RequestEnvelope) {
        let RequestEnvelope {
            method_id,
            function,
            args,
        } = request;
        let reply = match self.handle(&function, args).await {
            Ok(result) => ReplyEnvelope::resolved(method_id, result),
            Err(err) => {
                debug!(method = %function, method_id, error = %err, "request rejected");
                ReplyEnvelope::rejected(method_id, err.to_wire_error())
            }
        };
        if !self.post_to_target(Envelope::Reply(reply).to_value()) {
            debug!(method = %function, method_id, "reply was not delivered");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{Frame, WILDCARD_ORIGIN};
    use assert_matches::assert_matches;
    use serde_json::json;
    use tokio::sync::broadcast;
    use tokio::time::timeout;

    const HOST_URL: &str = "https://host.example/index.html";
    const GUEST_URL: &str = "https://guest.example/app/index.html";
    const GUEST_FILTER: &str = "https://guest.example/";

    // ── Test handler implementations ────────────────────────────────

    struct EchoHandler;

    #[async_trait]
    impl MethodHandler for EchoHandler {
        async fn handle(&self, args: Vec<Value>) -> Result<Value, RpcError> {
            Ok(Value::Array(args))
        }
    }

    struct FailHandler;

    #[async_trait]
    impl MethodHandler for FailHandler {
        async fn handle(&self, _args: Vec<Value>) -> Result<Value, RpcError> {
            Err(RpcError::Failed {
                message: "boom".into(),
            })
        }
    }

    fn add_numbers(args: &[Value]) -> Result<Value, RpcError> {
        match args {
            [a, b] => match (a.as_f64(), b.as_f64()) {
                (Some(a), Some(b)) if a.fract() == 0.0 && b.fract() == 0.0 => {
                    Ok(json!(a as i64 + b as i64))
                }
                (Some(a), Some(b)) => Ok(json!(a + b)),
                _ => Err(RpcError::InvalidArgs {
                    message: "add expects two numbers".into(),
                }),
            },
            _ => Err(RpcError::InvalidArgs {
                message: "add expects two numbers".into(),
            }),
        }
    }

    fn make_handler() -> (RequestHandler, Window, Arc<Frame>) {
        let host = Window::new(HOST_URL);
        let frame = Arc::new(Frame::new(GUEST_URL));
        let handler =
            RequestHandler::new(host.clone(), frame.clone(), GUEST_FILTER, GUEST_URL).unwrap();
        (handler, host, frame)
    }

    async fn next_data(rx: &mut broadcast::Receiver<MessageEvent>) -> Value {
        timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for message")
            .unwrap()
            .data
    }

    // ── Registry ────────────────────────────────────────────────────

    #[test]
    fn list_methods() {
        let mut reg = MethodRegistry::new();
        reg.register("b.method", EchoHandler);
        reg.register("a.method", EchoHandler);
        assert_eq!(reg.methods(), vec!["a.method", "b.method"]);
    }

    #[test]
    fn default_registry_is_empty() {
        let reg = MethodRegistry::default();
        assert!(reg.methods().is_empty());
        assert!(reg.get("x").is_none());
    }

    // ── handle ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn can_handle_reflects_registration() {
        let (handler, _, _) = make_handler();
        assert!(!handler.can_handle("echo"));
        handler.register_method("echo", EchoHandler);
        assert!(handler.can_handle("echo"));
        assert!(!handler.can_handle("other"));
    }

    #[tokio::test]
    async fn handle_runs_registered_method() {
        let (handler, _, _) = make_handler();
        handler.register_fn("add", |args| async move { add_numbers(&args) });

        let result = handler.handle("add", vec![json!(2), json!(3)]).await.unwrap();
        assert_eq!(result, json!(5));
    }

    #[tokio::test]
    async fn handle_missing_rejects_with_name() {
        let (handler, _, _) = make_handler();
        let err = handler.handle("missing", vec![]).await.unwrap_err();
        assert_matches!(err, RpcError::MethodNotFound { ref method } if method == "missing");
        assert!(err.to_wire_error().as_str().unwrap().contains("missing"));
    }

    #[tokio::test]
    async fn register_overwrites_previous() {
        let (handler, _, _) = make_handler();
        handler.register_method("test", EchoHandler);
        handler.register_method("test", FailHandler);

        let result = handler.handle("test", vec![]).await;
        assert_matches!(result, Err(RpcError::Failed { .. }));
        assert_eq!(handler.methods(), vec!["test"]);
    }

    #[tokio::test]
    async fn origin_filter_is_prefix_based() {
        let (handler, _, _) = make_handler();
        assert!(handler.origin_matches_filter("https://guest.example"));
        assert!(handler.origin_matches_filter(GUEST_URL));
        assert!(!handler.origin_matches_filter("https://evil.example"));
        assert!(!handler.origin_matches_filter("http://guest.example"));
    }

    #[test]
    fn debug_lists_target_and_methods() {
        let host = Window::new(HOST_URL);
        let frame = Arc::new(Frame::new(GUEST_URL));
        let handler = RequestHandler::new(host, frame, GUEST_FILTER, GUEST_URL).unwrap();
        handler.register_fn("ping", |_| async { Ok(json!("pong")) });
        let debug = format!("{handler:?}");
        assert!(debug.contains(GUEST_URL));
        assert!(debug.contains("ping"));
    }

    #[test]
    fn invalid_filter_url_fails_construction() {
        let host = Window::new(HOST_URL);
        let frame = Arc::new(Frame::new(GUEST_URL));
        let result = RequestHandler::new(host, frame, "not a url", GUEST_URL);
        assert_matches!(result, Err(OriginError::InvalidUrl { .. }));
    }

    // ── Listener ────────────────────────────────────────────────────

    #[tokio::test]
    async fn request_produces_exactly_one_reply() {
        let (handler, host, frame) = make_handler();
        handler.register_fn("add", |args| async move { add_numbers(&args) });
        let _listener = handler.listen();
        let guest = frame.content_window();
        let mut guest_rx = guest.subscribe();

        assert!(host.post_message(
            json!({"methodId": 7, "fn": "add", "args": [2, 3]}),
            HOST_URL,
            &guest,
        ));

        let reply = next_data(&mut guest_rx).await;
        assert_eq!(
            reply,
            json!({"methodId": 7, "result": 5, "rejected": false, "error": null})
        );
        let extra = timeout(Duration::from_millis(50), guest_rx.recv()).await;
        assert!(extra.is_err(), "expected a single reply");
    }

    #[tokio::test]
    async fn handler_failure_is_a_rejected_reply() {
        let (handler, host, frame) = make_handler();
        handler.register_method("fail", FailHandler);
        let _listener = handler.listen();
        let guest = frame.content_window();
        let mut guest_rx = guest.subscribe();

        let _ = host.post_message(json!({"methodId": 1, "fn": "fail", "args": []}), HOST_URL, &guest);

        let reply = next_data(&mut guest_rx).await;
        assert_eq!(reply["methodId"], 1);
        assert_eq!(reply["rejected"], true);
        assert_eq!(reply["error"], "boom");
        assert_eq!(reply["result"], Value::Null);
    }

    #[tokio::test]
    async fn foreign_origin_is_ignored() {
        let (handler, host, frame) = make_handler();
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = calls.clone();
        handler.register_fn("count", move |_| {
            let counter = counter.clone();
            async move {
                let _ = counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok(Value::Null)
            }
        });
        let _listener = handler.listen();
        let mut guest_rx = frame.content_window().subscribe();

        let evil = Window::new("https://evil.example/");
        let _ = host.post_message(json!({"methodId": 1, "fn": "count", "args": []}), WILDCARD_ORIGIN, &evil);

        let outcome = timeout(Duration::from_millis(50), guest_rx.recv()).await;
        assert!(outcome.is_err());
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unknown_method_is_dropped_without_reply() {
        let (handler, host, frame) = make_handler();
        let _listener = handler.listen();
        let guest = frame.content_window();
        let mut guest_rx = guest.subscribe();

        let _ = host.post_message(json!({"methodId": 2, "fn": "nope", "args": []}), HOST_URL, &guest);

        let outcome = timeout(Duration::from_millis(50), guest_rx.recv()).await;
        assert!(outcome.is_err());
    }

    #[tokio::test]
    async fn replies_and_init_are_not_requests() {
        let (handler, host, frame) = make_handler();
        handler.register_method("echo", EchoHandler);
        let _listener = handler.listen();
        let guest = frame.content_window();
        let mut guest_rx = guest.subscribe();

        let _ = host.post_message(json!("init"), HOST_URL, &guest);
        let _ = host.post_message(
            json!({"methodId": 3, "result": 1, "rejected": false, "error": null}),
            HOST_URL,
            &guest,
        );

        let outcome = timeout(Duration::from_millis(50), guest_rx.recv()).await;
        assert!(outcome.is_err());
    }

    #[tokio::test]
    async fn detached_listener_stops_answering() {
        let (handler, host, frame) = make_handler();
        handler.register_method("echo", EchoHandler);
        let mut listener = handler.listen();
        assert!(listener.detach());
        tokio::task::yield_now().await;

        let guest = frame.content_window();
        let mut guest_rx = guest.subscribe();
        let _ = host.post_message(json!({"methodId": 4, "fn": "echo", "args": []}), HOST_URL, &guest);

        let outcome = timeout(Duration::from_millis(50), guest_rx.recv()).await;
        assert!(outcome.is_err());
    }
}
