//! Method dispatch: typed calls in, replies and shutdown decisions out.
//!
//! One [`Dispatcher`] handles every decoded [`MethodCall`], regardless of
//! which transport carried it. Replies go onto a channel the adapter drains;
//! shutdown decisions go onto a channel the binary maps to an exit code.

use crate::error::{Result, ShutdownReason};
use crate::ipc::envelope::{MethodCall, Reply, StartOptions, WorkerState};
use crate::realtime::{ChannelLogger, RealtimeClient};
use crate::registry::{WorkerHandle, WorkerRegistry};
use crate::server::{DevServer, ServerNotice};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Interval at which the watchdog probes the host process tree.
pub const WATCHDOG_INTERVAL: Duration = Duration::from_secs(1);

/// Clonable handle for emitting replies. A handler may emit zero or many.
#[derive(Clone)]
pub struct ReplySender(mpsc::UnboundedSender<Reply>);

impl ReplySender {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Reply>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self(tx), rx)
    }

    pub fn send(&self, reply: Reply) {
        if self.0.send(reply).is_err() {
            tracing::warn!("reply dropped; adapter is gone");
        }
    }
}

/// Clonable handle for requesting process shutdown.
#[derive(Clone)]
pub struct ShutdownSignal(mpsc::UnboundedSender<ShutdownReason>);

impl ShutdownSignal {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ShutdownReason>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self(tx), rx)
    }

    pub fn send(&self, reason: ShutdownReason) {
        // A closed receiver means shutdown is already underway.
        let _ = self.0.send(reason);
    }
}

pub struct Dispatcher {
    registry: Arc<WorkerRegistry>,
    server: Arc<dyn DevServer>,
    logger: Arc<ChannelLogger>,
    replies: ReplySender,
    shutdown: ShutdownSignal,
    watchdog_interval: Duration,
    started: AtomicBool,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<WorkerRegistry>,
        server: Arc<dyn DevServer>,
        logger: Arc<ChannelLogger>,
        replies: ReplySender,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            registry,
            server,
            logger,
            replies,
            shutdown,
            watchdog_interval: WATCHDOG_INTERVAL,
            started: AtomicBool::new(false),
        }
    }

    /// Override the watchdog probe interval. Intended for tests.
    pub fn with_watchdog_interval(mut self, interval: Duration) -> Self {
        self.watchdog_interval = interval;
        self
    }

    /// Handle one decoded call.
    pub async fn dispatch(self: &Arc<Self>, call: MethodCall) -> Result<()> {
        tracing::debug!(method = call.method_name(), "dispatching");
        match call {
            MethodCall::StartServer(options) => self.start_server(options).await,
            MethodCall::GetServerConfig => {
                self.replies.send(Reply::ServerConfig(self.current_config()));
                Ok(())
            }
            MethodCall::StopServer => {
                self.server.stop().await?;
                self.replies.send(Reply::WorkerState(self.worker_state()));
                Ok(())
            }
            MethodCall::HostEvent(event) => self.server.ingest_host_event(event).await,
        }
    }

    async fn start_server(self: &Arc<Self>, options: StartOptions) -> Result<()> {
        if let Err(e) = options.descriptor.validate() {
            // No sensible default exists for a broken descriptor.
            self.logger.error(format!("cannot start dev server: {}", e));
            self.shutdown.send(ShutdownReason::StartupFailure);
            return Err(e);
        }

        if self.started.swap(true, Ordering::SeqCst) {
            // A second start from a reconnecting host; the server is already
            // up, so just re-announce.
            self.replies.send(Reply::ServerConfig(self.current_config()));
            self.replies.send(Reply::WorkerState(self.worker_state()));
            return Ok(());
        }

        match self.registry.acquire_from_parent(options.host_parent_pid)? {
            WorkerHandle::Deferred(record) => {
                // Hand the live worker's published config back before
                // stepping aside.
                self.replies
                    .send(Reply::ServerConfig(record.server_config.unwrap_or_default()));
                self.logger.info("existing dev server found; handing off");
                self.shutdown.send(ShutdownReason::Handoff);
                return Ok(());
            }
            WorkerHandle::Primary => {}
        }

        self.attach_channel(&options);
        self.spawn_watchdog();

        let (notice_tx, notice_rx) = mpsc::unbounded_channel();
        self.clone().spawn_notice_pump(notice_rx);

        match self.server.start(&options.descriptor, notice_tx).await {
            Ok(config) => {
                self.registry.update_server_config(config.clone())?;
                self.logger.success(format!(
                    "dev server ready for {}",
                    options.descriptor.package_name
                ));
                self.replies.send(Reply::ServerConfig(config));
                self.replies.send(Reply::WorkerState(self.worker_state()));
                Ok(())
            }
            Err(e) => {
                self.logger.error(format!("dev server failed to start: {}", e));
                self.shutdown.send(ShutdownReason::StartupFailure);
                Err(e)
            }
        }
    }

    /// Wire the channel logger when start params carry an endpoint and no
    /// client was attached at boot.
    fn attach_channel(&self, options: &StartOptions) {
        let Some(endpoint) = &options.channel else { return };
        if self.logger.is_attached() {
            return;
        }
        // Logging-only client: its feed output is discarded since the
        // transport set was fixed before listen.
        let (tx, _rx) = mpsc::unbounded_channel();
        let client: Arc<RealtimeClient> = RealtimeClient::connect(endpoint.url(), tx);
        self.logger.attach(client);
    }

    fn spawn_watchdog(self: &Arc<Self>) {
        let registry = self.registry.clone();
        let shutdown = self.shutdown.clone();
        let interval = self.watchdog_interval;
        tokio::spawn(async move {
            let reason = registry.watchdog(interval).await;
            shutdown.send(reason);
        });
    }

    fn spawn_notice_pump(self: Arc<Self>, mut notices: mpsc::UnboundedReceiver<ServerNotice>) {
        tokio::spawn(async move {
            while let Some(notice) = notices.recv().await {
                match notice {
                    ServerNotice::BuildStarted => {
                        // Rebuilds can move the server; re-announce whatever
                        // it currently publishes.
                        self.replies.send(Reply::ServerConfig(self.current_config()));
                        let state = self.worker_state();
                        self.logger.publish_status(&state);
                        self.replies.send(Reply::WorkerState(state));
                    }
                    ServerNotice::RefreshNeeded => {
                        self.replies.send(Reply::RefreshNeeded);
                    }
                }
            }
        });
    }

    fn current_config(&self) -> crate::server::ServerConfig {
        self.server
            .config()
            .or_else(|| self.registry.record().server_config)
            .unwrap_or_default()
    }

    fn worker_state(&self) -> WorkerState {
        WorkerState {
            record: self.registry.record(),
            listening: self.server.is_listening(),
        }
    }
}
