//! # Transport
//!
//! Multipart-message endpoints over two transports: `inproc://` (peers share
//! one [`Context`]) and `tcp://` (length-delimited frames with a greeting
//! exchange).
//!
//! ## Responsibilities
//!
//! - Creating endpoints of every [`SocketType`] from a shared [`Context`]
//! - Attaching peers on bind/connect and detaching them on disconnect
//! - Routing outbound messages per socket type (round-robin, by identity,
//!   fan-out) with bounded queues and optional send timeouts
//! - Propagating shutdown: cancelling the context interrupts every blocked
//!   send, receive and poll with [`Error::InterruptedWait`]
//!
//! [`SocketType`]: switchyard_core::SocketType
//! [`Error::InterruptedWait`]: switchyard_core::Error::InterruptedWait

mod endpoint;
mod inproc;
mod mailbox;
mod peer;
mod tcp;
mod wire;

pub use endpoint::{Endpoint, EndpointOptions};
pub(crate) use mailbox::Inbox;

use crate::transport::inproc::InprocRegistry;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use switchyard_core::SocketType;
use tokio_util::sync::CancellationToken;

/// Owns the in-process address space and the shutdown signal shared by every
/// endpoint created from it. Cheap to clone.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    registry: Mutex<InprocRegistry>,
    shutdown: CancellationToken,
    inboxes: Mutex<Vec<Weak<Inbox>>>,
}

impl Context {
    pub fn new() -> Self {
        Self::from_token(CancellationToken::new())
    }

    /// A context that terminates when `shutdown` is cancelled.
    pub fn with_shutdown(shutdown: &CancellationToken) -> Self {
        Self::from_token(shutdown.child_token())
    }

    fn from_token(shutdown: CancellationToken) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                registry: Mutex::new(InprocRegistry::default()),
                shutdown,
                inboxes: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn socket(&self, kind: SocketType) -> Endpoint {
        self.socket_with(kind, EndpointOptions::default())
    }

    pub fn socket_with(&self, kind: SocketType, options: EndpointOptions) -> Endpoint {
        let endpoint = Endpoint::new(self.clone(), kind, options);
        let mut inboxes = self.inner.inboxes.lock();
        inboxes.retain(|inbox| inbox.strong_count() > 0);
        inboxes.push(Arc::downgrade(&endpoint.inbox()));
        endpoint
    }

    /// The token every blocking operation of this context's endpoints
    /// observes.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    /// Interrupts every blocked operation and closes every endpoint queue.
    pub fn terminate(&self) {
        self.inner.shutdown.cancel();
        let inboxes = std::mem::take(&mut *self.inner.inboxes.lock());
        for inbox in inboxes.iter().filter_map(Weak::upgrade) {
            inbox.close();
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    pub(crate) fn registry(&self) -> &Mutex<InprocRegistry> {
        &self.inner.registry
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("terminated", &self.is_terminated())
            .finish_non_exhaustive()
    }
}
