//! # System
//!
//! Wires one server and its demo clients together.
//!
//! ## Responsibilities
//!
//! - Starting the server (broker + worker pool) before any client
//! - Drawing client identities from one seedable RNG
//! - Giving clients their own context for `tcp://` frontends, or the
//!   server's context for `inproc://` ones
//! - Shutting everything down within a grace period and reporting per-role
//!   statistics

use crate::client::{ClientDriver, ClientReply, ClientStats};
use crate::config::ServerConfig;
use crate::pool::{Echo, Responder};
use crate::server::{Server, ServerReport, deadline_after};
use crate::transport::Context;
use core::time::Duration;
use rand::SeedableRng;
use rand::rngs::StdRng;
use switchyard_core::{Identity, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span, warn};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SystemReport {
    pub server: ServerReport,
    /// Clients that stopped within the grace period.
    pub clients: Vec<(Identity, ClientStats)>,
    /// Clients that returned an error or panicked.
    pub failed_clients: Vec<Identity>,
    /// Clients aborted after the grace period.
    pub timed_out_clients: Vec<Identity>,
}

impl SystemReport {
    /// Whether every task stopped on its own, in time and without error.
    pub fn is_clean(&self) -> bool {
        self.failed_clients.is_empty()
            && self.timed_out_clients.is_empty()
            && self.server.broker.is_some()
            && self.server.workers.timed_out == 0
            && self.server.workers.panicked == 0
    }

    pub fn requests_sent(&self) -> u64 {
        self.clients.iter().map(|(_, s)| s.requests_sent).sum()
    }

    pub fn replies_received(&self) -> u64 {
        self.clients.iter().map(|(_, s)| s.replies_received).sum()
    }
}

pub struct System {
    server: Server,
    clients: Vec<(Identity, JoinHandle<Result<ClientStats>>)>,
    contexts: Vec<Context>,
    shutdown_token: CancellationToken,
}

impl System {
    pub async fn launch(config: &ServerConfig, shutdown: CancellationToken) -> Result<Self> {
        Self::launch_with(config, shutdown, |_| Echo, None).await
    }

    /// Like [`System::launch`], with custom responders and an optional
    /// channel receiving every reply any client gets.
    pub async fn launch_with<R, F>(
        config: &ServerConfig,
        shutdown: CancellationToken,
        make_responder: F,
        observer: Option<mpsc::UnboundedSender<ClientReply>>,
    ) -> Result<Self>
    where
        R: Responder,
        F: FnMut(usize) -> R,
    {
        let server_context = Context::with_shutdown(&shutdown);
        let server =
            Server::start_with(&server_context, config, shutdown.child_token(), make_responder)
                .await?;

        let mut system = Self {
            server,
            clients: Vec::with_capacity(config.num_clients),
            contexts: vec![server_context.clone()],
            shutdown_token: shutdown,
        };

        let mut rng = config
            .seed
            .map_or_else(StdRng::from_os_rng, StdRng::seed_from_u64);
        let client_config = config.client();
        let shared = client_config.address.starts_with("inproc://");

        for _ in 0..config.num_clients {
            let context = if shared {
                server_context.clone()
            } else {
                let context = Context::with_shutdown(&system.shutdown_token);
                system.contexts.push(context.clone());
                context
            };
            let identity = Identity::random(&mut rng);
            let connected = ClientDriver::connect(
                &context,
                identity.clone(),
                client_config.clone(),
                system.shutdown_token.child_token(),
            )
            .await;
            let mut driver = match connected {
                Ok(driver) => driver,
                Err(e) => {
                    error!(%identity, error = %e, "client failed to start");
                    system.shutdown(Duration::ZERO).await;
                    return Err(e);
                }
            };
            if let Some(observer) = &observer {
                driver = driver.with_observer(observer.clone());
            }
            let span = info_span!("client", %identity);
            system
                .clients
                .push((identity, tokio::spawn(driver.run().instrument(span))));
        }

        info!(
            clients = system.clients.len(),
            frontend = system.server.frontend_endpoint(),
            "system launched"
        );
        Ok(system)
    }

    pub fn frontend_endpoint(&self) -> &str {
        self.server.frontend_endpoint()
    }

    pub fn client_identities(&self) -> impl Iterator<Item = &Identity> {
        self.clients.iter().map(|(identity, _)| identity)
    }

    /// Cancels every task and waits for clients, then for the server. The
    /// whole shutdown finishes within `grace`; whatever is still running at
    /// the deadline is aborted and reported as timed out.
    pub async fn shutdown(self, grace: Duration) -> SystemReport {
        info!("shutting down");
        let deadline = deadline_after(grace);
        self.shutdown_token.cancel();

        let joins = self.clients.into_iter().map(|(identity, handle)| async move {
            let abort = handle.abort_handle();
            let outcome = match timeout_at(deadline, handle).await {
                Ok(Ok(Ok(stats))) => Ok(stats),
                Ok(Ok(Err(e))) => {
                    error!(%identity, error = %e, "client failed");
                    Err(false)
                }
                Ok(Err(e)) => {
                    error!(%identity, error = %e, "client task failed");
                    Err(false)
                }
                Err(_) => {
                    warn!(%identity, "client shutdown timed out, aborting");
                    abort.abort();
                    Err(true)
                }
            };
            (identity, outcome)
        });

        let mut report = SystemReport::default();
        for (identity, outcome) in futures::future::join_all(joins).await {
            match outcome {
                Ok(stats) => report.clients.push((identity, stats)),
                Err(true) => report.timed_out_clients.push(identity),
                Err(false) => report.failed_clients.push(identity),
            }
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        report.server = self.server.shutdown_within(remaining).await;
        for context in &self.contexts {
            context.terminate();
        }

        info!(
            clean = report.is_clean(),
            requests = report.requests_sent(),
            replies = report.replies_received(),
            "system stopped"
        );
        report
    }
}
