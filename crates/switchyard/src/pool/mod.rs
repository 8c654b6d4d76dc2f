//! Worker side of the broker: reply policy, responders, the per-worker loop
//! and the pool that owns them.

mod manager;
mod policy;
mod responder;
mod worker;

pub use manager::{PoolReport, WorkerPool};
pub use policy::ReplyPolicy;
pub use responder::{Echo, Responder};
pub use worker::{WorkerConfig, WorkerStats, worker_loop};
