//! # Server
//!
//! Binds the broker's two endpoints, connects the worker pool to the backend
//! and runs the broker loop on its own task.

use crate::broker::{Broker, BrokerStats};
use crate::config::ServerConfig;
use crate::pool::{Echo, PoolReport, Responder, WorkerPool};
use crate::transport::Context;
use core::time::Duration;
use switchyard_core::{Result, SocketType};
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span, warn};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServerReport {
    /// `None` when the broker task did not stop in time or failed.
    pub broker: Option<BrokerStats>,
    pub workers: PoolReport,
}

pub struct Server {
    broker: JoinHandle<Result<BrokerStats>>,
    pool: WorkerPool,
    shutdown: CancellationToken,
    frontend_endpoint: String,
    config: ServerConfig,
}

impl Server {
    /// Starts a server whose workers echo every request.
    pub async fn start(
        context: &Context,
        config: &ServerConfig,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        Self::start_with(context, config, shutdown, |_| Echo).await
    }

    /// Starts a server with one responder per worker from `make_responder`.
    ///
    /// # Errors
    ///
    /// Returns [`switchyard_core::Error::AddressError`] if either endpoint
    /// cannot bind, or the first worker connect error.
    pub async fn start_with<R, F>(
        context: &Context,
        config: &ServerConfig,
        shutdown: CancellationToken,
        make_responder: F,
    ) -> Result<Self>
    where
        R: Responder,
        F: FnMut(usize) -> R,
    {
        let mut frontend = context.socket_with(SocketType::Router, config.endpoint.clone());
        frontend.bind(&config.frontend_addr).await?;
        let mut backend = context.socket_with(SocketType::Dealer, config.endpoint.clone());
        backend.bind(&config.backend_addr).await?;
        let frontend_endpoint = frontend
            .last_endpoint()
            .unwrap_or(&config.frontend_addr)
            .to_string();

        let pool = WorkerPool::spawn(
            context,
            &config.backend_addr,
            config.num_workers,
            &config.worker(),
            &config.endpoint,
            config.seed,
            shutdown.child_token(),
            config.shutdown_timeout,
            make_responder,
        )
        .await?;

        let broker = Broker::new(frontend, backend, shutdown.clone());
        let broker = tokio::spawn(broker.run().instrument(info_span!("broker")));

        info!(
            frontend = %frontend_endpoint,
            backend = %config.backend_addr,
            workers = config.num_workers,
            "server started"
        );
        Ok(Self {
            broker,
            pool,
            shutdown,
            frontend_endpoint,
            config: config.clone(),
        })
    }

    /// The bound frontend address, with the real port when bound to port 0.
    pub fn frontend_endpoint(&self) -> &str {
        &self.frontend_endpoint
    }

    pub fn worker_count(&self) -> usize {
        self.pool.len()
    }

    /// Stops the broker, then the workers, within the configured shutdown
    /// timeout.
    pub async fn shutdown(self) -> ServerReport {
        let budget = self.config.shutdown_timeout;
        self.shutdown_within(budget).await
    }

    /// Stops the broker, then the workers. The workers get whatever of
    /// `budget` the broker left over; stragglers are aborted.
    pub async fn shutdown_within(self, budget: Duration) -> ServerReport {
        let deadline = deadline_after(budget);
        self.shutdown.cancel();

        let abort = self.broker.abort_handle();
        let broker = match timeout_at(deadline, self.broker).await {
            Ok(Ok(Ok(stats))) => Some(stats),
            Ok(Ok(Err(e))) => {
                error!(error = %e, "broker failed");
                None
            }
            Ok(Err(e)) => {
                error!(error = %e, "broker task failed");
                None
            }
            Err(_) => {
                warn!("broker shutdown timed out, aborting");
                abort.abort();
                None
            }
        };

        let remaining = deadline.saturating_duration_since(Instant::now());
        let workers = self.pool.shutdown_within(remaining).await;
        ServerReport { broker, workers }
    }
}

/// `now + wait`, saturating at roughly thirty years out.
pub(crate) fn deadline_after(wait: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(wait)
        .unwrap_or_else(|| now + Duration::from_secs(86400 * 365 * 30))
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("frontend_endpoint", &self.frontend_endpoint)
            .field("workers", &self.pool.len())
            .finish_non_exhaustive()
    }
}
