//! Error types for the switchyard broker.
//!
//! This module defines the central `Error` enum, which captures every
//! reportable failure of the transport, the broker loop and the worker pool.
//!
//! ## Error Cases
//! - `AddressError`: A bind address was malformed or already in use.
//! - `SendFailure`: A message could not be handed to its peer (peer destroyed,
//!   unroutable identity). The message is dropped.
//! - `SendTimeout`: Backpressure outlasted the configured send timeout.
//! - `InterruptedWait`: A blocking wait was interrupted by shutdown. Loops
//!   treat this as a request to exit, not as a crash.
//! - `EndpointClosed`: The endpoint was closed while the caller used it.
//! - `IdentityAfterAttach`: An identity was set after bind/connect.
//! - `EmptyMessage`: A message with zero frames was constructed.
//! - `Unsupported`: The socket type cannot perform the operation.
//! - `Protocol`: A peer or message violated the framing/routing rules.
//! - `ChannelError`: An internal channel between tasks was closed.

use crate::SocketType;
use core::time::Duration;

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the broker, its endpoints and its workers.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// The address is malformed or cannot be bound.
    #[error("Invalid address `{address}`: {reason}")]
    AddressError { address: String, reason: String },

    /// The transport could not enqueue or deliver the message.
    #[error("Send failed: {reason}")]
    SendFailure { reason: String },

    /// The peer queue stayed full for longer than the configured timeout.
    #[error("Send timed out after {timeout:?}")]
    SendTimeout { timeout: Duration },

    /// A blocking receive, poll, send or sleep was interrupted by shutdown.
    #[error("Wait interrupted by shutdown")]
    InterruptedWait,

    /// The endpoint has been closed.
    #[error("Endpoint is closed")]
    EndpointClosed,

    /// Identities only take effect before the first bind/connect.
    #[error("Identity must be set before bind or connect")]
    IdentityAfterAttach,

    /// Messages always carry at least one frame.
    #[error("Message must contain at least one frame")]
    EmptyMessage,

    /// The socket type does not support the requested operation.
    #[error("{socket_type} sockets do not support `{operation}`")]
    Unsupported {
        socket_type: SocketType,
        operation: &'static str,
    },

    /// Framing or routing rules were violated.
    #[error("Protocol error: {context}")]
    Protocol { context: String },

    /// Internal channel send/receive failure between tasks.
    #[error("Channel error: {context}")]
    ChannelError { context: String },
}

impl Error {
    /// Returns `true` for errors that mean "stop the current loop", as opposed
    /// to errors local to a single message.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::InterruptedWait | Self::EndpointClosed)
    }

    pub(crate) fn address(address: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::AddressError {
            address: address.into(),
            reason: reason.into(),
        }
    }
}
