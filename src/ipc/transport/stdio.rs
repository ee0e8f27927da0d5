//! Transport over the worker's own stdin/stdout.
//!
//! The host that spawned the worker owns the other end of these pipes, so
//! this transport needs no addressing or handshake. Frames follow the
//! length-delimited format in [`crate::ipc::frame`].

use crate::error::{HearthError, Result};
use crate::ipc::envelope::{Envelope, Reply};
use crate::ipc::frame;
use crate::ipc::transport::Transport;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{Stdout, BufReader};
use tokio::sync::{mpsc, Mutex};

pub struct StdioTransport {
    stdout: Mutex<Stdout>,
    active: AtomicBool,
}

impl StdioTransport {
    pub fn new() -> Self {
        Self {
            stdout: Mutex::new(tokio::io::stdout()),
            active: AtomicBool::new(true),
        }
    }
}

impl Default for StdioTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for StdioTransport {
    fn name(&self) -> &'static str {
        "stdio"
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    async fn listen(&self, incoming: mpsc::UnboundedSender<Envelope>) -> Result<()> {
        let mut reader = BufReader::new(tokio::io::stdin());
        loop {
            match frame::read_envelope(&mut reader).await {
                Ok(envelope) => {
                    if incoming.send(envelope).is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    tracing::info!("stdin closed; stdio transport going inactive");
                    break;
                }
                Err(e) => {
                    tracing::warn!("stdio frame error: {}", e);
                    break;
                }
            }
        }
        self.active.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn reply(&self, reply: &Reply) -> Result<()> {
        if !self.is_active() {
            return Err(HearthError::Transport("stdio pipe closed".into()));
        }
        let mut stdout = self.stdout.lock().await;
        frame::write_reply(&mut *stdout, reply).await.map_err(|e| {
            self.active.store(false, Ordering::SeqCst);
            HearthError::Transport(format!("stdio write failed: {}", e))
        })
    }
}
