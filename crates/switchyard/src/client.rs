//! Demo client: one dealer endpoint that issues numbered requests on a slow
//! cadence and drains replies on a fast one.
//!
//! Both duties share a single poll per iteration. The poll timeout is the
//! smaller of the drain tick and the time left until the next send is due,
//! so sends are never late by more than scheduling jitter and replies are
//! picked up as soon as they arrive.

use crate::poller::{Interest, PollToken, Poller};
use crate::telemetry::{increment_replies_received, increment_requests_sent};
use crate::transport::{Context, Endpoint, EndpointOptions};
use core::time::Duration;
use switchyard_core::{Error, Identity, Message, Result, SocketType};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientConfig {
    pub address: String,
    pub tick: Duration,
    pub send_period: Duration,
    /// Stop sending after this many requests; replies are still drained.
    pub max_requests: Option<u64>,
    pub endpoint: EndpointOptions,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: "tcp://localhost:5570".to_string(),
            tick: Duration::from_millis(10),
            send_period: Duration::from_secs(1),
            max_requests: None,
            endpoint: EndpointOptions::default(),
        }
    }
}

/// A reply as seen by the client that received it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientReply {
    pub identity: Identity,
    pub message: Message,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClientStats {
    pub requests_sent: u64,
    pub replies_received: u64,
    pub failed_sends: u64,
}

pub struct ClientDriver {
    identity: Identity,
    endpoint: Endpoint,
    poller: Poller,
    token: PollToken,
    config: ClientConfig,
    observer: Option<mpsc::UnboundedSender<ClientReply>>,
    shutdown: CancellationToken,
}

impl ClientDriver {
    /// Creates the endpoint, sets `identity` on it and connects.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AddressError`] for a malformed address.
    pub async fn connect(
        context: &Context,
        identity: Identity,
        config: ClientConfig,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        let mut endpoint = context.socket_with(SocketType::Dealer, config.endpoint.clone());
        endpoint.set_identity(identity.clone())?;
        endpoint.connect(&config.address).await?;

        let mut poller = Poller::new(shutdown.clone());
        let token = poller.register(&endpoint, Interest::Readable);
        Ok(Self {
            identity,
            endpoint,
            poller,
            token,
            config,
            observer: None,
            shutdown,
        })
    }

    /// Publishes every received reply to `observer` as well as the log.
    pub fn with_observer(mut self, observer: mpsc::UnboundedSender<ClientReply>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Runs until shutdown, returning the client's counters.
    ///
    /// # Errors
    ///
    /// Only errors other than shutdown or closure are returned.
    pub async fn run(mut self) -> Result<ClientStats> {
        let mut stats = ClientStats::default();
        let mut next_send = Instant::now() + self.config.send_period;
        info!(identity = %self.identity, address = %self.config.address, "client started");

        let outcome: Result<()> = loop {
            let now = Instant::now();
            if now >= next_send {
                if self
                    .config
                    .max_requests
                    .is_none_or(|max| stats.requests_sent < max)
                {
                    if let Err(e) = self.send_request(&mut stats).await {
                        break Err(e);
                    }
                }
                next_send += self.config.send_period;
                if next_send <= now {
                    next_send = now + self.config.send_period;
                }
            }

            let wait = next_send
                .saturating_duration_since(Instant::now())
                .min(self.config.tick);
            match self.poller.poll(Some(wait)).await {
                Ok(ready) if ready.is_readable(self.token) => {
                    if let Err(e) = self.drain(&mut stats) {
                        break Err(e);
                    }
                }
                Ok(_) => {}
                Err(e) => break Err(e),
            }
        };

        match outcome {
            Err(e) if !e.is_terminal() => Err(e),
            _ => {
                info!(identity = %self.identity, ?stats, "client stopped");
                Ok(stats)
            }
        }
    }

    async fn send_request(&mut self, stats: &mut ClientStats) -> Result<()> {
        let n = stats.requests_sent + 1;
        let request = Message::from(format!("request #{n}"));
        let sent = tokio::select! {
            biased;
            () = self.shutdown.cancelled() => Err(Error::InterruptedWait),
            sent = self.endpoint.send(request) => sent,
        };
        match sent {
            Ok(()) => {
                stats.requests_sent = n;
                increment_requests_sent();
                debug!(identity = %self.identity, n, "sent request");
                Ok(())
            }
            Err(e) if e.is_terminal() => Err(e),
            Err(e) => {
                stats.failed_sends += 1;
                warn!(identity = %self.identity, error = %e, "request not sent");
                Ok(())
            }
        }
    }

    fn drain(&mut self, stats: &mut ClientStats) -> Result<()> {
        while let Some(message) = self.endpoint.try_receive()? {
            stats.replies_received += 1;
            increment_replies_received();
            info!(identity = %self.identity, reply = %message.last(), "received reply");
            let reply = ClientReply {
                identity: self.identity.clone(),
                message,
            };
            if self
                .observer
                .as_ref()
                .is_some_and(|observer| observer.send(reply).is_err())
            {
                self.observer = None;
            }
        }
        Ok(())
    }
}
