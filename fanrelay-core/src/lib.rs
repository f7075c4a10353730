//! Fanrelay core
//!
//! Runtime-agnostic building blocks for the broadcast proxy:
//! - Uniform byte-stream abstraction over TCP/UDP/UNIX/FIFO/accepted
//!   connections (`endpoint`)
//! - Reader/writer thread pair fanning reads out to a peer set (`handler`)
//! - Error types (`error`)

#![deny(unsafe_code)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod endpoint;
pub mod error;
pub mod handler;

/// Convenience re-exports for downstream crates.
pub mod prelude {
    pub use crate::endpoint::{Capability, Endpoint, RemoteKind};
    pub use crate::error::{EndpointError, HandlerError};
    pub use crate::handler::{Handler, HandlerId};
}
