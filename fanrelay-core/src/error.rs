//! Error types for the fanrelay broadcast proxy.

use std::io;
use thiserror::Error;

/// Errors produced while configuring or opening an [`crate::endpoint::Endpoint`].
#[derive(Error, Debug)]
pub enum EndpointError {
    /// The resource kind in a spec string is not recognized.
    #[error("unknown resource type: {0}")]
    WrongResourceType(String),

    /// The address/path/port portion of a resource spec failed validation.
    #[error("invalid resource info: {0}")]
    WrongResourceInfo(String),

    /// The capability mode letter(s) are not one of R, W, RW, WR.
    #[error("invalid resource mode: {0}")]
    WrongResourceMode(String),

    /// `open()` called on an endpoint that is already open.
    #[error("endpoint already open")]
    AlreadyOpen,

    /// `close()` called on an endpoint that is already closed.
    #[error("endpoint already closed")]
    AlreadyClosed,

    /// `open()` called on a kind that does not support it (accepted connections).
    #[error("open() is not supported for this endpoint")]
    OpenNotSupported,

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl EndpointError {
    /// True for the two idempotency guards that a caller may often treat as non-fatal.
    #[must_use]
    pub const fn is_idempotency_guard(&self) -> bool {
        matches!(self, Self::AlreadyOpen | Self::AlreadyClosed)
    }
}

/// Errors produced by [`crate::handler::Handler`] operations.
#[derive(Error, Debug)]
pub enum HandlerError {
    /// `write()` targeted a handler whose reader/writer tasks are not running.
    #[error("handler is not running")]
    NotRunning,

    /// The endpoint returned an I/O error while servicing the write.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result alias used throughout `fanrelay-core`.
pub type Result<T, E = EndpointError> = std::result::Result<T, E>;
