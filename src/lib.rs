//! hearth - singleton dev-server worker coordination
//!
//! A host build tool spawns one `hearthd` per project. The worker elects
//! itself the singleton owner of the project's dev server through an
//! on-disk record (or defers to a live owner and exits), serves a small
//! typed method protocol over stdio frames, loopback HTTP, and a real-time
//! WebSocket channel, and tears itself down when its host session dies or
//! every transport goes quiet.

pub mod config;
pub mod error;
pub mod ipc;
pub mod realtime;
pub mod registry;
pub mod server;

pub use error::{HearthError, Result};
