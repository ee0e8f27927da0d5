//! IPC between the host build tool and the worker.
//!
//! Envelopes come in over any number of transports, get deduplicated and
//! decoded by the adapter, and are handled by the dispatcher. Replies flow
//! back out through whichever transport is alive.

pub mod adapter;
pub mod dispatch;
pub mod envelope;
pub mod frame;
pub mod transport;

pub use adapter::IpcAdapter;
pub use dispatch::{Dispatcher, ReplySender, ShutdownSignal};
pub use envelope::{Envelope, MethodCall, Reply, StartOptions, WorkerState};
