use thiserror::Error;

/// Process exit codes for the worker binary.
///
/// `HANDOFF` is the success path: another live primary already owns the
/// worker role and this process deferred to it. Every fatal condition
/// (host death, idle transports, startup failure) maps to `FATAL`.
pub mod exit_codes {
    pub const HANDOFF: i32 = 0;
    pub const FATAL: i32 = 1;
}

#[derive(Error, Debug)]
pub enum HearthError {
    #[error("No IPC transport registered; refusing to start the worker")]
    NoTransports,

    #[error("Invalid project descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("Channel endpoint unavailable: {0}")]
    ChannelEndpoint(String),

    #[error("Channel call failed: {0}")]
    ChannelCall(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Unknown IPC method: {0}")]
    UnknownMethod(String),

    #[error("Invalid params for {method}: {detail}")]
    InvalidParams { method: String, detail: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, HearthError>;

/// Why the worker decided to stop.
///
/// Components report shutdown over a channel instead of exiting so the
/// decision stays testable; only the binary maps this to `process::exit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// A live primary worker already exists; this process deferred to it.
    Handoff,
    /// The host process tree died; the record was zeroed on the way out.
    HostLost,
    /// Every registered transport stayed inactive past the grace period.
    IdleTimeout,
    /// The dev server could not be brought up.
    StartupFailure,
}

impl ShutdownReason {
    pub fn exit_code(self) -> i32 {
        match self {
            ShutdownReason::Handoff => exit_codes::HANDOFF,
            ShutdownReason::HostLost
            | ShutdownReason::IdleTimeout
            | ShutdownReason::StartupFailure => exit_codes::FATAL,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handoff_is_the_only_clean_reason() {
        assert_eq!(ShutdownReason::Handoff.exit_code(), exit_codes::HANDOFF);
        for reason in [
            ShutdownReason::HostLost,
            ShutdownReason::IdleTimeout,
            ShutdownReason::StartupFailure,
        ] {
            assert_eq!(reason.exit_code(), exit_codes::FATAL);
        }
    }
}
