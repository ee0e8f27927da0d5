//! Transport implementations for host-to-worker messaging.
//!
//! Each transport turns its own wire format into [`Envelope`]s pushed onto a
//! shared channel, and can deliver [`Reply`]s back to the host. The adapter
//! treats them uniformly through the [`Transport`] trait.

pub mod http;
pub mod realtime;
pub mod stdio;

use crate::error::Result;
use crate::ipc::envelope::{Envelope, Reply};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// A single host-to-worker message path.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Short name for logs and status lines.
    fn name(&self) -> &'static str;

    /// Whether the transport can currently deliver a reply.
    ///
    /// The adapter uses this both to pick a reply route and to decide when
    /// the worker has been abandoned.
    fn is_active(&self) -> bool;

    /// Run the receive side, pushing each inbound envelope onto `incoming`.
    ///
    /// Resolves when the transport's source closes. The adapter spawns one
    /// task per transport, so a long-running listen is expected.
    async fn listen(&self, incoming: mpsc::UnboundedSender<Envelope>) -> Result<()>;

    /// Deliver a reply to the host.
    async fn reply(&self, reply: &Reply) -> Result<()>;
}
