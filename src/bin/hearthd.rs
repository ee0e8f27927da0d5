//! hearth worker daemon.
//!
//! The hearthd binary is spawned by a host build tool and:
//! - Claims the project's singleton worker role via the on-disk record
//!   (or defers to a live worker and exits with code 0)
//! - Serves IPC over stdio frames, optional loopback HTTP, and an optional
//!   real-time channel to the application server
//! - Watches the host process tree and exits when the session dies
//! - Exits when every transport stays inactive past the grace period
//!
//! ## Files
//!
//! - `<root>/.hearth/local/worker-state.json` - worker record
//! - `<root>/.hearth/local/logs/worker.log` - worker log file
//!
//! stdout belongs to the stdio transport, so all diagnostics go to the log
//! file.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::select;
#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};
use tracing_appender::non_blocking::WorkerGuard;

use hearth::config;
use hearth::error::{exit_codes, ShutdownReason};
use hearth::ipc::dispatch::{Dispatcher, ReplySender, ShutdownSignal};
use hearth::ipc::transport::http::HttpTransport;
use hearth::ipc::transport::realtime::RealtimeTransport;
use hearth::ipc::transport::stdio::StdioTransport;
use hearth::ipc::IpcAdapter;
use hearth::realtime::ChannelLogger;
use hearth::registry::probe::OsProcessProbe;
use hearth::registry::WorkerRegistry;
use hearth::server::{CommandDevServer, DevServer};

#[derive(Parser, Debug)]
#[command(name = "hearthd", version, about = "Background dev-server worker")]
struct Args {
    /// Project root the worker serves
    #[arg(long, env = "HEARTH_PROJECT_ROOT", default_value = ".")]
    project_root: PathBuf,

    /// Loopback address for the HTTP transport
    #[arg(long, env = "HEARTH_HTTP_ADDR")]
    http_addr: Option<SocketAddr>,

    /// Host callback URL for HTTP replies (required with --http-addr)
    #[arg(long, env = "HEARTH_REPLY_URL")]
    reply_url: Option<String>,

    /// Dev server command to run
    #[arg(long, env = "HEARTH_SERVER_COMMAND", default_value = "vite")]
    server_command: String,

    /// Extra arguments for the dev server command
    #[arg(long = "server-arg", env = "HEARTH_SERVER_ARGS", value_delimiter = ' ')]
    server_args: Vec<String>,

    /// Host the dev server binds
    #[arg(long, env = "HEARTH_SERVER_HOST", default_value = "127.0.0.1")]
    server_host: String,

    /// Port the dev server binds
    #[arg(long, env = "HEARTH_SERVER_PORT", default_value_t = 5173)]
    server_port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let logs_dir = config::logs_dir(&args.project_root);
    std::fs::create_dir_all(&logs_dir)?;
    let _guard = init_logging(&logs_dir)?;

    tracing::info!(
        debug = config::debug_enabled(),
        ci_summary = config::ci_summary_enabled(),
        "hearthd starting, version {}",
        env!("CARGO_PKG_VERSION")
    );

    let probe = Arc::new(OsProcessProbe);
    let state_path = config::worker_state_path(&args.project_root);
    let registry = Arc::new(WorkerRegistry::new(state_path, probe));

    let (replies, reply_rx) = ReplySender::channel();
    let (shutdown, mut shutdown_rx) = ShutdownSignal::channel();

    let server: Arc<dyn DevServer> = Arc::new(CommandDevServer::new(
        args.server_command,
        args.server_args,
        args.server_host,
        args.server_port,
    ));

    let logger = Arc::new(ChannelLogger::new());
    let mut adapter = IpcAdapter::new();

    // The stdio pipes to the spawning host are always present.
    adapter.add_transport(Arc::new(StdioTransport::new()));

    match (args.http_addr, args.reply_url) {
        (Some(addr), Some(reply_url)) => {
            adapter.add_transport(Arc::new(HttpTransport::new(addr, reply_url)));
        }
        (Some(_), None) => {
            anyhow::bail!("--http-addr requires --reply-url for reply delivery");
        }
        _ => {}
    }

    // Channel endpoint from the environment wires both a transport and the
    // remote log sink. Without it the logger stays on the local fallback
    // until start params carry an endpoint.
    if let Some(endpoint) = config::channel_endpoint_from_env()? {
        let (transport, client) = RealtimeTransport::connect(endpoint.url());
        logger.attach(client);
        adapter.add_transport(Arc::new(transport));
    }

    tracing::info!(transports = adapter.transport_count(), "transports ready");

    let dispatcher = Arc::new(Dispatcher::new(
        registry.clone(),
        server.clone(),
        logger,
        replies,
        shutdown.clone(),
    ));

    let adapter = Arc::new(adapter);
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match adapter.listen(dispatcher, reply_rx).await {
                Ok(reason) => shutdown.send(reason),
                Err(e) => {
                    tracing::error!("ipc adapter failed: {}", e);
                    shutdown.send(ShutdownReason::StartupFailure);
                }
            }
        });
    }

    #[cfg(unix)]
    let mut sigterm = signal(SignalKind::terminate())?;
    #[cfg(unix)]
    let mut sigint = signal(SignalKind::interrupt())?;

    #[cfg(unix)]
    let reason = select! {
        reason = shutdown_rx.recv() => reason,
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM, shutting down...");
            None
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT, shutting down...");
            None
        }
    };

    #[cfg(windows)]
    let reason = select! {
        reason = shutdown_rx.recv() => reason,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl+C, shutting down...");
            None
        }
    };

    if let Err(e) = server.stop().await {
        tracing::warn!("dev server stop failed: {}", e);
    }

    // A deferred worker never touches the live primary's record; everyone
    // else releases it on the way out.
    let keep_record = matches!(reason, Some(ShutdownReason::Handoff));
    if registry.is_primary() && !keep_record {
        if let Err(e) = registry.zero() {
            tracing::warn!("failed to release worker record: {}", e);
        }
    }

    // `None` means the operator stopped the worker with SIGTERM/SIGINT.
    // That is a clean exit and shares the success code with a handoff.
    let code = match reason {
        Some(reason) => reason.exit_code(),
        None => exit_codes::HANDOFF,
    };
    tracing::info!(code, "hearthd shutdown complete");
    std::process::exit(code);
}

/// Initialize file-based logging with daily rotation.
///
/// The returned `WorkerGuard` must be kept alive for the duration of the
/// program to ensure all logs are flushed.
///
/// Verbosity comes from `HEARTH_LOG` (env-filter syntax); `HEARTH_DEBUG`
/// bumps the default to debug.
fn init_logging(logs_dir: &std::path::Path) -> anyhow::Result<WorkerGuard> {
    use tracing_subscriber::EnvFilter;

    let file_appender = tracing_appender::rolling::daily(logs_dir, "worker.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let default_level = if config::debug_enabled() { "debug" } else { "info" };
    let filter = EnvFilter::try_from_env("HEARTH_LOG")
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_level(true)
        .init();

    Ok(guard)
}
