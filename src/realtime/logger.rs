//! Log sink that mirrors worker output to the application server console.
//!
//! The worker runs headless behind the host's pipes, so developer-facing
//! messages go to the application server over the channel, where they show
//! up alongside the app's own console. When the channel is down the same
//! lines land in the local tracing output instead, nothing is queued.

use crate::config;
use crate::ipc::envelope::WorkerState;
use crate::realtime::client::RealtimeClient;
use crate::realtime::wire::{METHOD_LOG, METHOD_STATUS_UPDATE};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// Identity attached to every forwarded line.
const SENDER: &str = "dev-server-worker";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    Success,
    Debug,
}

/// One console line as the application server expects it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    #[serde(rename = "type")]
    pub kind: String,
    pub level: LogLevel,
    pub message: String,
    pub sender: String,
}

impl LogRecord {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            kind: "log:server".to_string(),
            level,
            message: message.into(),
            sender: SENDER.to_string(),
        }
    }
}

/// Channel-backed logger with a local fallback.
///
/// Starts detached; [`attach`](Self::attach) wires in a client once the
/// channel endpoint is known (from the environment or from start params).
pub struct ChannelLogger {
    client: Mutex<Option<Arc<RealtimeClient>>>,
}

impl ChannelLogger {
    pub fn new() -> Self {
        Self {
            client: Mutex::new(None),
        }
    }

    pub fn with_client(client: Arc<RealtimeClient>) -> Self {
        Self {
            client: Mutex::new(Some(client)),
        }
    }

    /// Attach a channel client. A later attach replaces the earlier one.
    pub fn attach(&self, client: Arc<RealtimeClient>) {
        *self.client.lock().unwrap() = Some(client);
    }

    pub fn is_attached(&self) -> bool {
        self.client.lock().unwrap().is_some()
    }

    pub fn info(&self, message: impl Into<String>) {
        self.emit(LogLevel::Info, message.into());
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.emit(LogLevel::Warn, message.into());
    }

    pub fn error(&self, message: impl Into<String>) {
        self.emit(LogLevel::Error, message.into());
    }

    pub fn success(&self, message: impl Into<String>) {
        self.emit(LogLevel::Success, message.into());
    }

    /// Debug lines are dropped entirely unless diagnostics are enabled.
    pub fn debug(&self, message: impl Into<String>) {
        if !config::debug_enabled() {
            return;
        }
        self.emit(LogLevel::Debug, message.into());
    }

    /// Publish a worker state snapshot to the application server.
    pub fn publish_status(&self, state: &WorkerState) {
        let Some(client) = self.connected_client() else {
            return;
        };
        let Ok(payload) = serde_json::to_value(state) else {
            return;
        };
        tokio::spawn(async move {
            if let Err(e) = client.call(METHOD_STATUS_UPDATE, vec![payload]).await {
                tracing::debug!("status publish failed: {}", e);
            }
        });
    }

    fn emit(&self, level: LogLevel, message: String) {
        match self.connected_client() {
            Some(client) => {
                let record = LogRecord::new(level, message);
                tokio::spawn(async move {
                    let Ok(payload) = serde_json::to_value(&record) else {
                        return;
                    };
                    if client.call(METHOD_LOG, vec![payload]).await.is_err() {
                        // The channel dropped mid-call; fall back locally so
                        // the line is not lost.
                        log_local(record.level, &record.message);
                    }
                });
            }
            None => log_local(level, &message),
        }
    }

    fn connected_client(&self) -> Option<Arc<RealtimeClient>> {
        self.client
            .lock()
            .unwrap()
            .clone()
            .filter(|c| c.is_connected())
    }
}

impl Default for ChannelLogger {
    fn default() -> Self {
        Self::new()
    }
}

fn log_local(level: LogLevel, message: &str) {
    match level {
        LogLevel::Info | LogLevel::Success => tracing::info!("{}", message),
        LogLevel::Warn => tracing::warn!("{}", message),
        LogLevel::Error => tracing::error!("{}", message),
        LogLevel::Debug => tracing::debug!("{}", message),
    }
}
