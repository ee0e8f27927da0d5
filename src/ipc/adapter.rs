//! Transport multiplexer.
//!
//! Fans envelopes in from every registered transport, deduplicates them by
//! id (hosts deliberately send over all transports at once), hands decoded
//! calls to the dispatcher, and routes each reply out through the first
//! transport that is currently active, in registration order.
//!
//! The adapter also owns the abandonment policy: a periodic tick checks
//! transport liveness, and once every transport has been inactive for the
//! whole grace period the worker is considered orphaned.

use crate::error::{HearthError, Result, ShutdownReason};
use crate::ipc::dispatch::Dispatcher;
use crate::ipc::envelope::Reply;
use crate::ipc::transport::Transport;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const STATUS_TICK: Duration = Duration::from_secs(1);
const IDLE_TIMEOUT: Duration = Duration::from_secs(5);
/// Status is logged every this many ticks to keep the log readable.
const STATUS_LOG_EVERY: u64 = 10;

pub struct IpcAdapter {
    transports: Vec<Arc<dyn Transport>>,
    tick: Duration,
    idle_timeout: Duration,
}

impl IpcAdapter {
    pub fn new() -> Self {
        Self {
            transports: Vec::new(),
            tick: STATUS_TICK,
            idle_timeout: IDLE_TIMEOUT,
        }
    }

    /// Override tick and idle timeout. Intended for tests.
    pub fn with_timing(mut self, tick: Duration, idle_timeout: Duration) -> Self {
        self.tick = tick;
        self.idle_timeout = idle_timeout;
        self
    }

    /// Register a transport. Registration order is reply preference order.
    pub fn add_transport(&mut self, transport: Arc<dyn Transport>) {
        self.transports.push(transport);
    }

    pub fn transport_count(&self) -> usize {
        self.transports.len()
    }

    /// Run the adapter until the idle timeout trips.
    ///
    /// Fails immediately when no transport is registered: a worker nobody
    /// can address must not claim the singleton role.
    pub async fn listen(
        self: Arc<Self>,
        dispatcher: Arc<Dispatcher>,
        mut replies: mpsc::UnboundedReceiver<Reply>,
    ) -> Result<ShutdownReason> {
        if self.transports.is_empty() {
            return Err(HearthError::NoTransports);
        }

        let (incoming_tx, mut incoming) = mpsc::unbounded_channel();
        for transport in &self.transports {
            let transport = transport.clone();
            let tx = incoming_tx.clone();
            tokio::spawn(async move {
                let name = transport.name();
                if let Err(e) = transport.listen(tx).await {
                    tracing::warn!(transport = name, "transport listener failed: {}", e);
                }
            });
        }

        let mut seen: HashSet<String> = HashSet::new();
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;
        let mut idle = Duration::ZERO;
        let mut ticks: u64 = 0;
        let mut replies_open = true;

        loop {
            tokio::select! {
                envelope = incoming.recv() => {
                    // At least one sender (incoming_tx) lives on this stack
                    // frame, so recv never yields None here.
                    let Some(envelope) = envelope else { continue };
                    if !seen.insert(envelope.id.clone()) {
                        tracing::debug!(id = %envelope.id, "duplicate envelope dropped");
                        continue;
                    }
                    match envelope.decode() {
                        Ok(call) => {
                            let dispatcher = dispatcher.clone();
                            tokio::spawn(async move {
                                if let Err(e) = dispatcher.dispatch(call).await {
                                    tracing::error!(id = %envelope.id, "dispatch failed: {}", e);
                                }
                            });
                        }
                        // Version skew between host and worker; keep serving.
                        Err(e) => tracing::warn!(id = %envelope.id, "{}", e),
                    }
                }
                reply = replies.recv(), if replies_open => {
                    match reply {
                        Some(reply) => self.route_reply(&reply).await,
                        None => replies_open = false,
                    }
                }
                _ = ticker.tick() => {
                    ticks += 1;
                    if self.transports.iter().any(|t| t.is_active()) {
                        idle = Duration::ZERO;
                    } else {
                        idle += self.tick;
                        if idle >= self.idle_timeout {
                            tracing::warn!(
                                "all transports inactive for {:?}; shutting down",
                                idle
                            );
                            return Ok(ShutdownReason::IdleTimeout);
                        }
                    }
                    if ticks % STATUS_LOG_EVERY == 0 {
                        tracing::debug!(status = %self.status_line(), "transport status");
                    }
                }
            }
        }
    }

    /// Deliver a reply through the first active transport.
    ///
    /// No broadcast: the host listens on all its transports, so one delivery
    /// is enough. Falls through to the next active transport when a send
    /// fails.
    async fn route_reply(&self, reply: &Reply) {
        for transport in &self.transports {
            if !transport.is_active() {
                continue;
            }
            match transport.reply(reply).await {
                Ok(()) => return,
                Err(e) => {
                    tracing::warn!(
                        transport = transport.name(),
                        "reply delivery failed, trying next: {}",
                        e
                    );
                }
            }
        }
        tracing::warn!("reply dropped; no active transport");
    }

    fn status_line(&self) -> String {
        self.transports
            .iter()
            .map(|t| {
                format!(
                    "{}:{}",
                    t.name(),
                    if t.is_active() { "active" } else { "idle" }
                )
            })
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl Default for IpcAdapter {
    fn default() -> Self {
        Self::new()
    }
}
