//! # Broker
//!
//! Relays whole messages between a client-facing router (the *frontend*) and
//! a worker-facing dealer (the *backend*).
//!
//! ## Responsibilities
//!
//! - Polling both endpoints and forwarding at most one message per ready
//!   endpoint per tick, so neither direction can starve the other
//! - Preserving messages byte-for-byte: the router-added identity frame rides
//!   upstream to the worker and back downstream untouched
//! - Treating send failures as per-message: they are logged, counted and the
//!   loop moves on
//! - Exiting cleanly with its counters once shutdown interrupts a wait
//!
//! Both directions go through the same [`forward`] function; there is no
//! per-direction special casing.

use crate::poller::{Interest, PollToken, Poller};
use crate::telemetry::{increment_messages_dropped, increment_messages_routed};
use crate::transport::Endpoint;
use core::time::Duration;
use switchyard_core::{Error, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Client to worker: frontend to backend.
    Upstream,
    /// Worker to client: backend to frontend.
    Downstream,
}

impl Direction {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Upstream => "upstream",
            Self::Downstream => "downstream",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to the message [`forward`] picked up.
#[derive(Debug, PartialEq, Eq)]
pub enum Forwarded {
    /// Relayed whole; carries the frame count.
    Relayed { frames: usize },
    /// Received but not delivered. The message is gone.
    Dropped(Error),
    /// Nothing was queued after all.
    Idle,
}

/// Moves one message from `from` to `to`, frames untouched.
///
/// # Errors
///
/// Only errors that end the broker loop ([`Error::is_terminal`]) are
/// returned; per-message send failures are reported as
/// [`Forwarded::Dropped`].
pub async fn forward(from: &mut Endpoint, to: &mut Endpoint) -> Result<Forwarded> {
    let Some(message) = from.try_receive()? else {
        return Ok(Forwarded::Idle);
    };
    let frames = message.frame_count();
    match to.send(message).await {
        Ok(()) => Ok(Forwarded::Relayed { frames }),
        Err(e) if e.is_terminal() => Err(e),
        Err(e) => Ok(Forwarded::Dropped(e)),
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BrokerStats {
    pub ticks: u64,
    pub upstream: u64,
    pub downstream: u64,
    pub dropped: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    pub forwarded: usize,
    pub dropped: usize,
}

pub struct Broker {
    frontend: Endpoint,
    backend: Endpoint,
    poller: Poller,
    frontend_token: PollToken,
    backend_token: PollToken,
    shutdown: CancellationToken,
    stats: BrokerStats,
}

impl Broker {
    pub fn new(frontend: Endpoint, backend: Endpoint, shutdown: CancellationToken) -> Self {
        let mut poller = Poller::new(shutdown.clone());
        let frontend_token = poller.register(&frontend, Interest::Readable);
        let backend_token = poller.register(&backend, Interest::Readable);
        Self {
            frontend,
            backend,
            poller,
            frontend_token,
            backend_token,
            shutdown,
            stats: BrokerStats::default(),
        }
    }

    pub fn stats(&self) -> BrokerStats {
        self.stats
    }

    pub fn frontend(&self) -> &Endpoint {
        &self.frontend
    }

    pub fn backend(&self) -> &Endpoint {
        &self.backend
    }

    /// Waits for readiness, then forwards one message from each ready
    /// endpoint: frontend first, then backend.
    pub async fn tick(&mut self, timeout: Option<Duration>) -> Result<TickReport> {
        let ready = self.poller.poll(timeout).await?;
        self.stats.ticks += 1;

        let mut report = TickReport::default();
        for token in ready.iter() {
            let (from, to, direction) = if token == self.frontend_token {
                (&mut self.frontend, &mut self.backend, Direction::Upstream)
            } else if token == self.backend_token {
                (&mut self.backend, &mut self.frontend, Direction::Downstream)
            } else {
                continue;
            };

            match forward(from, to).await? {
                Forwarded::Relayed { frames } => {
                    report.forwarded += 1;
                    match direction {
                        Direction::Upstream => self.stats.upstream += 1,
                        Direction::Downstream => self.stats.downstream += 1,
                    }
                    increment_messages_routed(direction.as_str());
                    debug!(%direction, frames, "forwarded message");
                }
                Forwarded::Dropped(error) => {
                    report.dropped += 1;
                    self.stats.dropped += 1;
                    increment_messages_dropped(direction.as_str());
                    warn!(%direction, %error, "dropped message");
                }
                Forwarded::Idle => {}
            }
        }
        Ok(report)
    }

    /// Ticks until shutdown, then returns the final counters.
    ///
    /// # Errors
    ///
    /// Returns any non-terminal error a tick could not absorb.
    pub async fn run(mut self) -> Result<BrokerStats> {
        info!("broker running");
        let shutdown = self.shutdown.clone();
        loop {
            let tick = tokio::select! {
                biased;
                () = shutdown.cancelled() => Err(Error::InterruptedWait),
                tick = self.tick(None) => tick,
            };
            match tick {
                Ok(_) => {}
                Err(e) if e.is_terminal() => {
                    info!(reason = %e, stats = ?self.stats, "broker stopped");
                    return Ok(self.stats);
                }
                Err(e) => return Err(e),
            }
        }
    }
}
