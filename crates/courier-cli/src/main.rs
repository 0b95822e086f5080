//! Courier terminal client.
//!
//! Opens one conversation, prints messages as they are displayed and sends
//! every line read from stdin.
//!
//! # Usage
//!
//! ```bash
//! courier --conversation 42 --user 1 --peer 2 \
//!     --api-url https://chat.example.com --hub-url ws://chat.example.com/hubs/chat \
//!     --auth "$INIT_DATA"
//! ```

mod render;

use std::sync::Arc;

use clap::{Parser, ValueEnum};
use courier_client::{
    ChatView, ConnectionService, DEFAULT_AUTH_HEADER, HostSignals, HttpMessageApi, SystemEnv,
    WsTransport,
};
use courier_core::{ChatConfig, ConversationHandle, Platform, PlatformCapabilities};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::render::Transcript;

/// Courier chat client
#[derive(Parser, Debug)]
#[command(name = "courier")]
#[command(about = "Terminal client for one courier conversation")]
#[command(version)]
struct Args {
    /// REST backend base URL
    #[arg(long, default_value = "http://localhost:5000")]
    api_url: String,

    /// Push hub WebSocket URL
    #[arg(long, default_value = "ws://localhost:5000/hubs/chat")]
    hub_url: String,

    /// Opaque host credential sent with every request
    #[arg(long)]
    auth: Option<String>,

    /// Header carrying the credential
    #[arg(long, default_value = DEFAULT_AUTH_HEADER)]
    auth_header: String,

    /// Conversation to open
    #[arg(short, long)]
    conversation: i64,

    /// Local user id
    #[arg(short, long)]
    user: i64,

    /// Remote participant id
    #[arg(short, long)]
    peer: i64,

    /// Platform to emulate (selects heartbeat and transport mode)
    #[arg(long, value_enum, default_value_t = PlatformArg::Desktop)]
    platform: PlatformArg,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PlatformArg {
    Ios,
    Android,
    Desktop,
    Embedded,
}

impl From<PlatformArg> for Platform {
    fn from(arg: PlatformArg) -> Self {
        match arg {
            PlatformArg::Ios => Self::Ios,
            PlatformArg::Android => Self::Android,
            PlatformArg::Desktop => Self::Desktop,
            PlatformArg::Embedded => Self::EmbeddedWebView,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    // stdout carries the transcript
    tracing_subscriber::registry().with(fmt::layer().with_writer(std::io::stderr)).with(filter).init();

    let mut api = HttpMessageApi::new(&args.api_url)?;
    let mut transport = WsTransport::new(&args.hub_url);
    if let Some(auth) = &args.auth {
        api = api.with_auth(&args.auth_header, auth);
        transport = transport.with_auth(&args.auth_header, auth);
    }

    let host = HostSignals::new();
    let capabilities = PlatformCapabilities::resolve(args.platform.into());
    let service = ConnectionService::init(
        SystemEnv::new(),
        Arc::new(transport),
        ChatConfig::default(),
        capabilities,
        host.subscribe(),
    );
    tracing::info!(api = %args.api_url, hub = %args.hub_url, "courier starting");

    let handle = ConversationHandle::new(args.conversation, args.user, args.peer);
    let view = ChatView::open(&service, Arc::new(api), host.subscribe(), handle);

    let mut snapshots = view.watch();
    let mut transcript = Transcript::new(args.user);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                transcript.render(&snapshot, &mut std::io::stdout().lock())?;
            },
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                view.input(line);
                if let Err(error) = view.send().await {
                    tracing::warn!(%error, "message not sent");
                }
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    view.close().await;
    service.dispose().await;
    Ok(())
}
