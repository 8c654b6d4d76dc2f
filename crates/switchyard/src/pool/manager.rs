//! Fixed-size pool of worker tasks behind the broker backend.
//!
//! This module defines the [`WorkerPool`] struct, which connects one dealer
//! endpoint per worker to the backend address, spawns a [`worker_loop`] task
//! for each, and coordinates their shutdown via a shared
//! [`CancellationToken`].
//!
//! Work distribution is not the pool's job: the backend dealer round-robins
//! requests across the connected workers.

use crate::pool::responder::Responder;
use crate::pool::worker::{WorkerConfig, WorkerStats, worker_loop};
use crate::transport::{Context, EndpointOptions};
use core::time::Duration;
use rand::SeedableRng;
use rand::rngs::StdRng;
use switchyard_core::{Result, SocketType};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

/// Outcome of [`WorkerPool::shutdown`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PoolReport {
    /// Stats of every worker that stopped in time, in worker order.
    pub workers: Vec<WorkerStats>,
    /// Workers aborted after the shutdown timeout.
    pub timed_out: usize,
    /// Workers whose task panicked.
    pub panicked: usize,
}

impl PoolReport {
    pub fn requests(&self) -> u64 {
        self.workers.iter().map(|w| w.requests).sum()
    }

    pub fn replies(&self) -> u64 {
        self.workers.iter().map(|w| w.replies).sum()
    }
}

pub struct WorkerPool {
    workers: Vec<JoinHandle<WorkerStats>>,
    shutdown_token: CancellationToken,
    shutdown_timeout: Duration,
}

impl WorkerPool {
    /// Connects `size` workers to `backend_addr` and spawns their loops.
    ///
    /// `make_responder` is called once per worker with its index. When
    /// `seed` is set, worker `i` draws from `StdRng::seed_from_u64(seed + i)`.
    ///
    /// # Errors
    ///
    /// Returns the first connect error; workers already spawned are stopped.
    #[allow(clippy::too_many_arguments)]
    pub async fn spawn<R, F>(
        context: &Context,
        backend_addr: &str,
        size: usize,
        config: &WorkerConfig,
        options: &EndpointOptions,
        seed: Option<u64>,
        shutdown_token: CancellationToken,
        shutdown_timeout: Duration,
        mut make_responder: F,
    ) -> Result<Self>
    where
        R: Responder,
        F: FnMut(usize) -> R,
    {
        let mut pool = Self {
            workers: Vec::with_capacity(size),
            shutdown_token,
            shutdown_timeout,
        };

        for worker_id in 0..size {
            let mut endpoint = context.socket_with(SocketType::Dealer, options.clone());
            if let Err(e) = endpoint.connect(backend_addr).await {
                error!(worker_id, error = %e, "worker failed to connect");
                pool.shutdown().await;
                return Err(e);
            }
            let rng = seed.map_or_else(StdRng::from_os_rng, |seed| {
                StdRng::seed_from_u64(seed.wrapping_add(worker_id as u64))
            });
            let task = worker_loop(
                worker_id,
                endpoint,
                make_responder(worker_id),
                config.clone(),
                rng,
                pool.shutdown_token.clone(),
            );
            pool.workers
                .push(tokio::spawn(task.instrument(info_span!("worker", worker_id))));
        }

        debug!(size, backend_addr, "worker pool started");
        Ok(pool)
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Stops every worker.
    ///
    /// - Cancels the shared [`CancellationToken`]; workers exit at their next
    ///   wait, abandoning unsent replies.
    /// - Waits up to the shutdown timeout per worker, concurrently.
    /// - Aborts whatever is still running after that.
    pub async fn shutdown(self) -> PoolReport {
        let wait = self.shutdown_timeout;
        self.shutdown_within(wait).await
    }

    /// Like [`WorkerPool::shutdown`], waiting at most `wait` instead of the
    /// configured shutdown timeout.
    pub async fn shutdown_within(self, wait: Duration) -> PoolReport {
        // === Phase 1: Signal ===
        debug!("Cancelling workers via shutdown token");
        self.shutdown_token.cancel();

        // === Phase 2: Wait, bounded ===
        let joins = self.workers.into_iter().enumerate().map(|(i, handle)| async move {
            let abort = handle.abort_handle();
            match timeout(wait, handle).await {
                Ok(Ok(stats)) => {
                    debug!(worker_id = i, ?stats, "Worker stopped");
                    Ok(stats)
                }
                Ok(Err(e)) => {
                    error!(worker_id = i, error = %e, "Worker task failed");
                    Err(false)
                }
                Err(_) => {
                    // === Phase 3: Abort stragglers ===
                    warn!(worker_id = i, "Worker shutdown timed out, aborting");
                    abort.abort();
                    Err(true)
                }
            }
        });

        let mut report = PoolReport::default();
        for outcome in futures::future::join_all(joins).await {
            match outcome {
                Ok(stats) => report.workers.push(stats),
                Err(true) => report.timed_out += 1,
                Err(false) => report.panicked += 1,
            }
        }

        info!(
            stopped = report.workers.len(),
            timed_out = report.timed_out,
            "Worker pool shutdown complete"
        );
        report
    }
}
