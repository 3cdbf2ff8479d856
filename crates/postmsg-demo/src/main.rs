//! # postmsg-demo
//!
//! Runs a host page and an embedded guest frame in one process, performs the
//! handshake, and makes calls in both directions. Each outcome is printed to
//! stdout as one JSON line.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use postmsg_core::{CallError, RpcError, init_subscriber, origin_of};
use postmsg_rpc::{
    ClientConfig, ClientHooks, ContentSurface, Frame, HandshakeState, Listener, PostMessageApiClient,
    PostMessageApiServer, RequestHandler, ServerHooks, Window, WindowSurface,
};
use postmsg_settings::PostMsgSettings;
use serde_json::{Value, json};

/// Host and guest talking over the postmsg protocol.
#[derive(Parser, Debug)]
#[command(name = "postmsg-demo", about = "Host page and guest frame talking over postmsg")]
struct Cli {
    /// URL of the host page.
    #[arg(long, default_value = "https://host.example/index.html")]
    host_url: String,

    /// URL loaded in the guest frame.
    #[arg(long, default_value = "https://guest.example/app/index.html")]
    guest_url: String,

    /// Settings file (defaults to `~/.postmsg/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log level or filter directive (overrides settings).
    #[arg(long)]
    log_level: Option<String>,

    /// Guest never acknowledges the handshake.
    #[arg(long)]
    silent_guest: bool,
}

/// Logs lifecycle notifications.
struct LogHooks;

impl ServerHooks for LogHooks {
    fn on_initialization_complete(&self) {
        tracing::info!("host: guest acknowledged handshake");
    }

    fn on_initialization_error(&self, origin: &str) {
        tracing::warn!(origin, "host: guest never acknowledged handshake");
    }
}

impl ClientHooks for LogHooks {
    fn on_initialized(&self) {
        tracing::info!("guest: bound to host window");
    }
}

/// Filter URL accepting every path under `url`'s origin.
fn origin_root(url: &str) -> Result<String> {
    let origin = origin_of(url).with_context(|| format!("URL has no tuple origin: {url}"))?;
    Ok(format!("{origin}/"))
}

/// Guest document: a wait-for-init client and a handler for host calls.
struct Guest {
    client: PostMessageApiClient,
    _listener: Listener,
}

fn boot_guest(cli: &Cli, guest: &Window, host: &Window, config: ClientConfig) -> Result<Guest> {
    let client =
        PostMessageApiClient::wait_for_init(guest.clone(), &cli.host_url, Arc::new(LogHooks), config)
            .context("failed to create guest client")?;

    let handler = RequestHandler::new(
        guest.clone(),
        Arc::new(WindowSurface::new(host.clone())),
        &origin_root(&cli.host_url)?,
        cli.host_url.clone(),
    )
    .context("failed to create guest handler")?;
    handler.register_fn("greet", |args| async move {
        match args.first().and_then(Value::as_str) {
            Some(name) => Ok(json!(format!("hello {name}"))),
            None => Err(RpcError::InvalidArgs {
                message: "greet expects a name".into(),
            }),
        }
    });

    Ok(Guest {
        client,
        _listener: handler.listen(),
    })
}

fn boot_host(
    cli: &Cli,
    host: &Window,
    frame: &Arc<Frame>,
    settings: &PostMsgSettings,
) -> Result<PostMessageApiServer> {
    let handler = RequestHandler::new(
        host.clone(),
        frame.clone(),
        &origin_root(&cli.guest_url)?,
        cli.guest_url.clone(),
    )
    .context("failed to create host handler")?;
    handler.register_fn("add", |args| async move {
        add(&args)
    });
    Ok(PostMessageApiServer::start(
        handler,
        settings.handshake.clone(),
        Arc::new(LogHooks),
    ))
}

/// Sum of `args`, kept integral when every argument is an integer.
fn add(args: &[Value]) -> Result<Value, RpcError> {
    let invalid = || RpcError::InvalidArgs {
        message: "add expects numbers".into(),
    };
    if let Some(integers) = args.iter().map(Value::as_i64).collect::<Option<Vec<_>>>() {
        return integers
            .iter()
            .try_fold(0_i64, |sum, n| sum.checked_add(*n))
            .map(|sum| json!(sum))
            .ok_or_else(|| RpcError::InvalidArgs {
                message: "add overflowed".into(),
            });
    }
    let floats: Option<Vec<f64>> = args.iter().map(Value::as_f64).collect();
    floats
        .map(|floats| json!(floats.iter().sum::<f64>()))
        .ok_or_else(invalid)
}

fn report(direction: &str, method: &str, outcome: Result<Value, CallError>) -> Value {
    match outcome {
        Ok(result) => json!({"direction": direction, "method": method, "result": result}),
        Err(err) => json!({
            "direction": direction,
            "method": method,
            "error": err.to_string(),
            "rejection": err.rejection(),
        }),
    }
}

/// Run one session and collect the report lines.
async fn run(cli: &Cli, settings: &PostMsgSettings) -> Result<Vec<Value>> {
    let capacity = settings.transport.channel_capacity;
    let config = ClientConfig::from(&settings.client);
    let host = Window::with_capacity(cli.host_url.clone(), capacity);
    let frame = Arc::new(Frame::with_window(Window::with_capacity(
        cli.guest_url.clone(),
        capacity,
    )));

    let guest = if cli.silent_guest {
        None
    } else {
        Some(boot_guest(cli, &frame.content_window(), &host, config)?)
    };
    let server = boot_host(cli, &host, &frame, settings)?;

    let state = server.wait_for_handshake().await;
    let mut lines = vec![json!({"handshake": state})];

    if let (HandshakeState::Initialized, Some(guest)) = (state, &guest) {
        guest.client.wait_until_initialized().await;
        let host_client = server
            .connect_client(config)
            .context("failed to create host client")?;

        let (sum, greeting, bad) = tokio::join!(
            guest.client.call_api_fn("add", vec![json!(2), json!(3)]),
            host_client.call_api_fn("greet", vec![json!("host")]),
            host_client.call_api_fn("greet", vec![]),
        );
        lines.push(report("guest->host", "add", sum));
        lines.push(report("host->guest", "greet", greeting));
        lines.push(report("host->guest", "greet", bad));
    }

    server.shutdown();
    Ok(lines)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings_path = cli
        .settings
        .clone()
        .unwrap_or_else(postmsg_settings::settings_path);
    let settings = postmsg_settings::load_settings_from_path(&settings_path)
        .with_context(|| format!("failed to load settings from {}", settings_path.display()))?;

    let level = cli.log_level.as_deref().unwrap_or(&settings.logging.level);
    init_subscriber(level, settings.logging.format());
    tracing::debug!(path = %settings_path.display(), "settings loaded");

    if postmsg_settings::init_settings(settings).is_err() {
        tracing::warn!("global settings were already initialized");
    }
    let settings = postmsg_settings::get_settings();

    for line in run(&cli, settings).await? {
        println!("{line}");
    }
    Ok(())
}
