//! Readiness multiplexing over several endpoints.
//!
//! A [`Poller`] waits until at least one registered endpoint has an inbound
//! message (or has closed) and reports *every* endpoint that is ready at that
//! moment, in registration order. It never dequeues anything, so a reported
//! endpoint can always be received from without blocking.

use crate::transport::{Endpoint, Inbox};
use core::time::Duration;
use futures::future::select_all;
use std::sync::Arc;
use switchyard_core::{Error, Result};
use tokio_util::sync::CancellationToken;

/// Handle returned by [`Poller::register`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PollToken(usize);

/// What a registration waits for. Only inbound readiness is supported.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Interest {
    #[default]
    Readable,
}

/// The registrations found ready by one [`Poller::poll`] call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReadySet {
    ready: Vec<PollToken>,
}

impl ReadySet {
    pub fn is_readable(&self, token: PollToken) -> bool {
        self.ready.contains(&token)
    }

    pub fn is_empty(&self) -> bool {
        self.ready.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ready.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = PollToken> + '_ {
        self.ready.iter().copied()
    }
}

pub struct Poller {
    registrations: Vec<Arc<Inbox>>,
    shutdown: CancellationToken,
}

impl Poller {
    /// A poller whose waits end with [`Error::InterruptedWait`] once
    /// `shutdown` is cancelled.
    pub fn new(shutdown: CancellationToken) -> Self {
        Self {
            registrations: Vec::new(),
            shutdown,
        }
    }

    pub fn register(&mut self, endpoint: &Endpoint, _interest: Interest) -> PollToken {
        self.registrations.push(endpoint.inbox());
        PollToken(self.registrations.len() - 1)
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Waits up to `timeout` (forever for `None`) for any registration to
    /// become ready. An empty [`ReadySet`] means the timeout elapsed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InterruptedWait`] if shutdown is signalled before or
    /// during the wait.
    pub async fn poll(&self, timeout: Option<Duration>) -> Result<ReadySet> {
        if self.shutdown.is_cancelled() {
            return Err(Error::InterruptedWait);
        }
        let ready = self.scan();
        if !ready.is_empty() || timeout == Some(Duration::ZERO) {
            return Ok(ready);
        }

        let any_ready = async {
            if self.registrations.is_empty() {
                futures::future::pending::<()>().await;
            } else {
                select_all(self.registrations.iter().map(|inbox| Box::pin(inbox.readable()))).await;
            }
        };
        let wait = async {
            match timeout {
                Some(timeout) => {
                    let _ = tokio::time::timeout(timeout, any_ready).await;
                }
                None => any_ready.await,
            }
        };

        tokio::select! {
            biased;
            () = self.shutdown.cancelled() => Err(Error::InterruptedWait),
            () = wait => Ok(self.scan()),
        }
    }

    fn scan(&self) -> ReadySet {
        ReadySet {
            ready: self
                .registrations
                .iter()
                .enumerate()
                .filter(|(_, inbox)| inbox.is_ready())
                .map(|(i, _)| PollToken(i))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Context;
    use switchyard_core::{Message, SocketType};

    async fn pair(ctx: &Context, name: &str) -> (Endpoint, Endpoint) {
        let mut bound = ctx.socket(SocketType::Dealer);
        bound.bind(name).await.unwrap();
        let mut connected = ctx.socket(SocketType::Dealer);
        connected.connect(name).await.unwrap();
        (bound, connected)
    }

    #[tokio::test(start_paused = true)]
    async fn reports_every_ready_endpoint_in_registration_order() {
        let ctx = Context::new();
        let (mut a, mut a_peer) = pair(&ctx, "inproc://a").await;
        let (mut b, mut b_peer) = pair(&ctx, "inproc://b").await;

        let mut poller = Poller::new(ctx.shutdown_token());
        let ta = poller.register(&a, Interest::Readable);
        let tb = poller.register(&b, Interest::Readable);

        let ready = poller.poll(Some(Duration::from_millis(10))).await.unwrap();
        assert!(ready.is_empty());

        b_peer.send(Message::from("to b")).await.unwrap();
        a_peer.send(Message::from("to a")).await.unwrap();
        let ready = poller.poll(None).await.unwrap();
        assert_eq!(ready.iter().collect::<Vec<_>>(), vec![ta, tb]);

        // Polling does not consume.
        assert_eq!(poller.poll(None).await.unwrap().len(), 2);
        assert!(a.try_receive().unwrap().is_some());
        assert!(b.try_receive().unwrap().is_some());
        assert!(poller.poll(Some(Duration::ZERO)).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn wakes_when_a_message_arrives() {
        let ctx = Context::new();
        let (a, mut a_peer) = pair(&ctx, "inproc://wake").await;
        let mut poller = Poller::new(ctx.shutdown_token());
        let token = poller.register(&a, Interest::Readable);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            a_peer.send(Message::from("late")).await.unwrap();
            a_peer
        });
        let ready = poller.poll(Some(Duration::from_secs(1))).await.unwrap();
        assert!(ready.is_readable(token));
    }

    #[tokio::test]
    async fn shutdown_interrupts_the_wait() {
        let ctx = Context::new();
        let poller = Poller::new(ctx.shutdown_token());
        let waiting = tokio::spawn(async move { poller.poll(None).await });
        tokio::task::yield_now().await;
        ctx.terminate();
        assert_eq!(waiting.await.unwrap(), Err(Error::InterruptedWait));
    }
}
