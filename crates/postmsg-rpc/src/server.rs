//! Request handler plus the `"init"` handshake with a guest document.
//!
//! A single supervisor task owns the handshake state. It listens on the
//! host window's message stream and the surface's load events, and keeps
//! the retry timer as a deadline in its own `select!` loop, so a retry can
//! never fire after success or reload.

use std::sync::Arc;

use parking_lot::Mutex;
use postmsg_core::{BackoffConfig, Envelope, OriginError};
use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::client::{ClientConfig, PostMessageApiClient};
use crate::handler::RequestHandler;
use crate::hooks::ServerHooks;
use crate::transport::{Listener, LoadEvent, MessageEvent};

/// Handshake progress for the current guest document.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum HandshakeState {
    /// No handshake running.
    Idle,
    /// `"init"` was sent `attempt + 1` times and is awaiting an answer.
    Handshaking {
        /// Zero-based attempt of the latest send.
        attempt: u32,
    },
    /// The guest acknowledged.
    Initialized,
    /// Every attempt went unanswered. Terminal until the next reload.
    Failed,
}

enum Command {
    Initialize,
}

/// Host side of a guest channel.
pub struct PostMessageApiServer {
    handler: RequestHandler,
    state: watch::Receiver<HandshakeState>,
    commands: mpsc::UnboundedSender<Command>,
    supervisor: Mutex<Listener>,
}

impl PostMessageApiServer {
    /// Start supervising `handler`'s surface and send the first `"init"`.
    pub fn start(
        handler: RequestHandler,
        backoff: BackoffConfig,
        hooks: Arc<dyn ServerHooks>,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(HandshakeState::Idle);
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let events = handler.own_window().subscribe();
        let loads = handler.surface().subscribe_loads();

        let mut supervisor = Supervisor {
            handler: handler.clone(),
            backoff,
            hooks,
            state: state_tx,
            attempts: 0,
            initialized: false,
            retry_at: None,
        };
        supervisor.initialize();

        let listener = Listener::attach("handshake-supervisor", move |cancel| {
            supervisor.run(cancel, events, loads, commands_rx)
        });

        Self {
            handler,
            state: state_rx,
            commands: commands_tx,
            supervisor: Mutex::new(listener),
        }
    }

    /// Current handshake state.
    pub fn state(&self) -> HandshakeState {
        *self.state.borrow()
    }

    /// Watch handshake transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<HandshakeState> {
        self.state.clone()
    }

    /// Whether the current guest document acknowledged the handshake.
    pub fn is_initialized(&self) -> bool {
        self.state() == HandshakeState::Initialized
    }

    /// The request handler answering the guest's calls.
    pub fn handler(&self) -> &RequestHandler {
        &self.handler
    }

    /// Wait until the handshake completes. Returns `false` if the server
    /// shut down first.
    pub async fn wait_until_initialized(&self) -> bool {
        let mut state = self.state.clone();
        state
            .wait_for(|s| *s == HandshakeState::Initialized)
            .await
            .is_ok()
    }

    /// Wait until the handshake either completes or fails.
    pub async fn wait_for_handshake(&self) -> HandshakeState {
        let mut state = self.state.clone();
        let settled = state
            .wait_for(|s| matches!(s, HandshakeState::Initialized | HandshakeState::Failed))
            .await
            .map(|settled| *settled);
        settled.unwrap_or_else(|_| *state.borrow())
    }

    /// Run the handshake step again.
    ///
    /// Without a reload in between, a failed handshake fails again
    /// immediately.
    pub fn initialize(&self) {
        if self.commands.send(Command::Initialize).is_err() {
            debug!("supervisor stopped, initialize ignored");
        }
    }

    /// Build a client bound to the guest window for calls in the other
    /// direction.
    pub fn connect_client(&self, config: ClientConfig) -> Result<PostMessageApiClient, OriginError> {
        PostMessageApiClient::connected(
            self.handler.own_window().clone(),
            self.handler.surface().content_window(),
            self.handler.target_url(),
            config,
        )
    }

    /// Stop supervising. Pending retries are dropped and requests are no
    /// longer answered.
    pub fn shutdown(&self) {
        if self.supervisor.lock().detach() {
            debug!("handshake supervisor stopped");
        }
    }
}

impl std::fmt::Debug for PostMessageApiServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostMessageApiServer")
            .field("target_url", &self.handler.target_url())
            .field("state", &self.state())
            .finish()
    }
}

struct Supervisor {
    handler: RequestHandler,
    backoff: BackoffConfig,
    hooks: Arc<dyn ServerHooks>,
    state: watch::Sender<HandshakeState>,
    attempts: u32,
    initialized: bool,
    retry_at: Option<Instant>,
}

impl Supervisor {
    async fn run(
        mut self,
        cancel: CancellationToken,
        mut events: broadcast::Receiver<MessageEvent>,
        mut loads: broadcast::Receiver<LoadEvent>,
        mut commands: mpsc::UnboundedReceiver<Command>,
    ) {
        let mut loads_open = true;
        loop {
            // Messages already queued were sent before any later load, so they
            // are handled first.
            tokio::select! {
                biased;

                () = cancel.cancelled() => break,
                received = events.recv() => match received {
                    Ok(event) => self.on_message(event),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "host message stream lagged, messages lost");
                    }
                    Err(RecvError::Closed) => break,
                },
                load = loads.recv(), if loads_open => match load {
                    Ok(load) => self.on_load(&load.url),
                    Err(RecvError::Lagged(skipped)) => {
                        // At least one reload happened.
                        warn!(skipped, "load events lagged");
                        let src = self.handler.surface().src();
                        self.on_load(&src);
                    }
                    Err(RecvError::Closed) => loads_open = false,
                },
                () = retry_elapsed(self.retry_at) => {
                    self.retry_at = None;
                    self.initialize();
                }
                Some(Command::Initialize) = commands.recv() => self.initialize(),
            }
        }
        trace!("handshake supervisor exited");
    }

    fn publish(&self, state: HandshakeState) {
        let _ = self.state.send_replace(state);
    }

    fn initialize(&mut self) {
        if self.initialized {
            trace!("already initialized");
            return;
        }
        let src = self.handler.surface().src();
        if !self.handler.origin_matches_filter(&src) {
            debug!(src = %src, "guest URL outside origin filter, not initializing");
            return;
        }

        if self.attempts >= self.backoff.max_attempts {
            self.retry_at = None;
            self.publish(HandshakeState::Failed);
            warn!(origin = %src, attempts = self.attempts, "guest never acknowledged the handshake");
            self.hooks.on_initialization_error(&src);
            return;
        }

        let attempt = self.attempts;
        let delivered = self.handler.post_to_target(Envelope::Init.to_value());
        let delay = self.backoff.delay_for(attempt);
        debug!(
            attempt,
            delivered,
            retry_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "sent init"
        );
        self.publish(HandshakeState::Handshaking { attempt });
        // An unrepresentable deadline leaves the handshake waiting for an answer.
        self.retry_at = Instant::now().checked_add(delay);
        self.attempts += 1;
    }

    fn on_message(&mut self, event: MessageEvent) {
        let is_init = matches!(Envelope::from_value(&event.data), Ok(Envelope::Init));
        if is_init && self.handler.origin_matches_filter(&event.origin) {
            self.complete(&event.origin);
            return;
        }
        self.handler.on_message(event);
    }

    fn complete(&mut self, origin: &str) {
        if self.initialized {
            trace!(origin, "duplicate init ignored");
            return;
        }
        self.retry_at = None;
        self.initialized = true;
        self.publish(HandshakeState::Initialized);
        info!(origin, attempts = self.attempts, "handshake complete");
        self.hooks.on_initialization_complete();
    }

    fn on_load(&mut self, url: &str) {
        debug!(url, "guest loaded, restarting handshake");
        self.attempts = 0;
        self.initialized = false;
        self.retry_at = None;
        self.publish(HandshakeState::Idle);
        self.initialize();
    }
}

async fn retry_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
