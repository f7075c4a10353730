//! Configuration and coordinator error types.

use thiserror::Error;

/// Errors surfaced while parsing CLI-derived configuration, before any
/// socket is touched.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// `-mode` named a kind other than `TCP`/`UNIX`.
    #[error("unknown listen mode: {0}")]
    UnknownListenKind(String),

    /// `-mode`'s `OPT` portion didn't parse for the given kind.
    #[error("invalid listen option: {0}")]
    InvalidListenOption(String),

    /// A `-resource` entry named a kind other than TCP/UDP/UNIX/FIFO.
    #[error("unknown resource type: {0}")]
    UnknownResourceType(String),

    /// A `-resource` entry was malformed (wrong field count, bad port, ...).
    #[error("invalid resource spec {spec:?}: {reason}")]
    InvalidResourceSpec { spec: String, reason: String },

    /// `run()` was called with zero upstream resources configured.
    #[error("no upstream resources configured")]
    NoUpstreams,

    #[error(transparent)]
    Endpoint(#[from] fanrelay_core::error::EndpointError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
