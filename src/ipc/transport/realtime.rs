//! Transport over the real-time application channel.
//!
//! Wraps a [`RealtimeClient`]: envelopes arrive on the client's `ipc` feed
//! (already deduplicated and acknowledged at the channel level), and replies
//! go out as an `ipc.reply` method call. Liveness tracks the client's
//! connection state, so the transport flaps with the application server.

use crate::error::{HearthError, Result};
use crate::ipc::envelope::{Envelope, Reply};
use crate::ipc::transport::Transport;
use crate::realtime::RealtimeClient;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// Method delivering a worker reply to the application server.
const METHOD_IPC_REPLY: &str = "ipc.reply";

pub struct RealtimeTransport {
    client: Arc<RealtimeClient>,
    /// Feed output of the client, handed over to the adapter on listen.
    envelopes: Mutex<Option<mpsc::UnboundedReceiver<Envelope>>>,
}

impl RealtimeTransport {
    /// Connect a channel client at `url` and expose it as a transport.
    ///
    /// Returns the transport together with the client so the caller can
    /// share the client with the logger.
    pub fn connect(url: String) -> (Self, Arc<RealtimeClient>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = RealtimeClient::connect(url, tx);
        let transport = Self {
            client: client.clone(),
            envelopes: Mutex::new(Some(rx)),
        };
        (transport, client)
    }
}

#[async_trait]
impl Transport for RealtimeTransport {
    fn name(&self) -> &'static str {
        "realtime"
    }

    fn is_active(&self) -> bool {
        self.client.is_connected()
    }

    async fn listen(&self, incoming: mpsc::UnboundedSender<Envelope>) -> Result<()> {
        let mut envelopes = self
            .envelopes
            .lock()
            .await
            .take()
            .ok_or_else(|| HearthError::Transport("realtime transport already listening".into()))?;
        while let Some(envelope) = envelopes.recv().await {
            if incoming.send(envelope).is_err() {
                break;
            }
        }
        Ok(())
    }

    async fn reply(&self, reply: &Reply) -> Result<()> {
        let payload = serde_json::to_value(reply)?;
        self.client.call(METHOD_IPC_REPLY, vec![payload]).await?;
        Ok(())
    }
}
