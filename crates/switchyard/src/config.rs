use crate::client::ClientConfig;
use crate::pool::{ReplyPolicy, WorkerConfig};
use crate::transport::EndpointOptions;
use anyhow::bail;
use clap::Parser;
use core::time::Duration;
use switchyard_core::{Address, EnvelopeShape};
use tokio::sync::Semaphore;

/// Runtime configuration for the `switchyard` binary.
///
/// These settings control where the broker listens, how many clients and
/// workers run in-process, how fast clients issue requests and how workers
/// answer them. All values are parsed from CLI arguments or environment
/// variables (a `.env` file is honoured).
#[derive(Parser, Debug, Clone)]
#[command(
    name = "switchyard",
    version,
    about = "A router/dealer broker with an in-process worker pool and demo clients"
)]
pub struct CliArgs {
    /// Number of client drivers to spawn.
    ///
    /// Environment variable: `NUM_CLIENTS`
    #[arg(long, env = "NUM_CLIENTS", default_value_t = 3)]
    pub num_clients: usize,

    /// Number of worker tasks connected to the backend.
    ///
    /// Environment variable: `NUM_WORKERS`
    #[arg(long, env = "NUM_WORKERS", default_value_t = 5)]
    pub num_workers: usize,

    /// Address the client-facing router binds.
    ///
    /// Environment variable: `FRONTEND_ADDR`
    #[arg(long, env = "FRONTEND_ADDR", default_value_t = String::from("tcp://*:5570"))]
    pub frontend_addr: String,

    /// Address clients connect to. Ignored when the frontend is `inproc://`.
    ///
    /// Environment variable: `CLIENT_ADDR`
    #[arg(long, env = "CLIENT_ADDR", default_value_t = String::from("tcp://localhost:5570"))]
    pub client_addr: String,

    /// Address the worker-facing dealer binds and workers connect to.
    ///
    /// Environment variable: `BACKEND_ADDR`
    #[arg(long, env = "BACKEND_ADDR", default_value_t = String::from("inproc://backend"))]
    pub backend_addr: String,

    /// Client reply-drain cadence, in milliseconds.
    ///
    /// Environment variable: `TICK_MS`
    #[arg(long, env = "TICK_MS", default_value_t = 10)]
    pub tick_ms: u64,

    /// Ticks between two requests of one client.
    ///
    /// Environment variable: `TICKS_PER_REQUEST`
    #[arg(long, env = "TICKS_PER_REQUEST", default_value_t = 100)]
    pub ticks_per_request: u32,

    /// Stop sending after this many requests per client.
    ///
    /// Environment variable: `MAX_REQUESTS`
    #[arg(long, env = "MAX_REQUESTS")]
    pub max_requests: Option<u64>,

    /// Fewest replies a worker sends per request.
    ///
    /// Environment variable: `MIN_REPLIES`
    #[arg(long, env = "MIN_REPLIES", default_value_t = 1)]
    pub min_replies: usize,

    /// Most replies a worker sends per request.
    ///
    /// Environment variable: `MAX_REPLIES`
    #[arg(long, env = "MAX_REPLIES", default_value_t = 1)]
    pub max_replies: usize,

    /// Shortest delay before each reply, in milliseconds.
    ///
    /// Environment variable: `MIN_REPLY_DELAY_MS`
    #[arg(long, env = "MIN_REPLY_DELAY_MS", default_value_t = 1)]
    pub min_reply_delay_ms: u64,

    /// Longest delay before each reply, in milliseconds.
    ///
    /// Environment variable: `MAX_REPLY_DELAY_MS`
    #[arg(long, env = "MAX_REPLY_DELAY_MS", default_value_t = 1000)]
    pub max_reply_delay_ms: u64,

    /// Queue capacity of every endpoint, in messages.
    ///
    /// Environment variable: `HIGH_WATER_MARK`
    #[arg(long, env = "HIGH_WATER_MARK", default_value_t = 1000)]
    pub high_water_mark: usize,

    /// Give up on a send blocked by a full queue after this many
    /// milliseconds. Unset waits indefinitely.
    ///
    /// Environment variable: `SEND_TIMEOUT_MS`
    #[arg(long, env = "SEND_TIMEOUT_MS")]
    pub send_timeout_ms: Option<u64>,

    /// How long to run before shutting down, in seconds. `0` runs until
    /// SIGINT/SIGTERM.
    ///
    /// Environment variable: `RUN_SECS`
    #[arg(long, env = "RUN_SECS", default_value_t = 5)]
    pub run_secs: u64,

    /// Seconds each task gets to stop once shutdown starts.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT`
    #[arg(long, env = "SHUTDOWN_TIMEOUT", default_value_t = 3)]
    pub shutdown_timeout: u64,

    /// Seed for client identities and worker reply sampling. Unset uses OS
    /// entropy.
    ///
    /// Environment variable: `SEED`
    #[arg(long, env = "SEED")]
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub num_clients: usize,
    pub num_workers: usize,
    pub frontend_addr: String,
    pub client_addr: String,
    pub backend_addr: String,
    pub tick: Duration,
    pub send_period: Duration,
    pub max_requests: Option<u64>,
    pub envelope: EnvelopeShape,
    pub reply_policy: ReplyPolicy,
    pub endpoint: EndpointOptions,
    /// `None` runs until a signal arrives.
    pub run_for: Option<Duration>,
    pub shutdown_timeout: Duration,
    pub seed: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            num_clients: 3,
            num_workers: 5,
            frontend_addr: "tcp://*:5570".to_string(),
            client_addr: "tcp://localhost:5570".to_string(),
            backend_addr: "inproc://backend".to_string(),
            tick: Duration::from_millis(10),
            send_period: Duration::from_secs(1),
            max_requests: None,
            envelope: EnvelopeShape::SINGLE_HOP,
            reply_policy: ReplyPolicy::default(),
            endpoint: EndpointOptions::default(),
            run_for: Some(Duration::from_secs(5)),
            shutdown_timeout: Duration::from_secs(3),
            seed: None,
        }
    }
}

impl ServerConfig {
    /// Clients connect straight to the frontend when it is in-process, since
    /// they then share the server's context.
    pub fn client_target(&self) -> &str {
        if self.frontend_addr.starts_with("inproc://") {
            &self.frontend_addr
        } else {
            &self.client_addr
        }
    }

    pub fn client(&self) -> ClientConfig {
        ClientConfig {
            address: self.client_target().to_string(),
            tick: self.tick,
            send_period: self.send_period,
            max_requests: self.max_requests,
            endpoint: self.endpoint.clone(),
        }
    }

    pub fn worker(&self) -> WorkerConfig {
        WorkerConfig {
            envelope: self.envelope,
            policy: self.reply_policy.clone(),
        }
    }
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.num_workers == 0 {
            bail!("NUM_WORKERS must be greater than 0");
        }
        if args.tick_ms == 0 {
            bail!("TICK_MS must be greater than 0");
        }
        if args.ticks_per_request == 0 {
            bail!("TICKS_PER_REQUEST must be greater than 0");
        }
        if args.high_water_mark == 0 {
            bail!("HIGH_WATER_MARK must be greater than 0");
        }
        if args.high_water_mark > Semaphore::MAX_PERMITS {
            bail!(
                "HIGH_WATER_MARK ({}) exceeds the maximum of {}",
                args.high_water_mark,
                Semaphore::MAX_PERMITS
            );
        }
        if args.min_replies > args.max_replies {
            bail!(
                "MIN_REPLIES ({}) exceeds MAX_REPLIES ({})",
                args.min_replies,
                args.max_replies
            );
        }
        if args.min_reply_delay_ms > args.max_reply_delay_ms {
            bail!(
                "MIN_REPLY_DELAY_MS ({}) exceeds MAX_REPLY_DELAY_MS ({})",
                args.min_reply_delay_ms,
                args.max_reply_delay_ms
            );
        }
        for (name, addr) in [
            ("FRONTEND_ADDR", &args.frontend_addr),
            ("CLIENT_ADDR", &args.client_addr),
            ("BACKEND_ADDR", &args.backend_addr),
        ] {
            if let Err(e) = Address::parse(addr) {
                bail!("{name}: {e}");
            }
        }

        let tick = Duration::from_millis(args.tick_ms);
        let send_period = tick
            .checked_mul(args.ticks_per_request)
            .ok_or_else(|| anyhow::anyhow!("Overflow in send period computation"))?;

        Ok(Self {
            num_clients: args.num_clients,
            num_workers: args.num_workers,
            frontend_addr: args.frontend_addr,
            client_addr: args.client_addr,
            backend_addr: args.backend_addr,
            tick,
            send_period,
            max_requests: args.max_requests,
            envelope: EnvelopeShape::SINGLE_HOP,
            reply_policy: ReplyPolicy {
                min_replies: args.min_replies,
                max_replies: args.max_replies,
                min_delay: Duration::from_millis(args.min_reply_delay_ms),
                max_delay: Duration::from_millis(args.max_reply_delay_ms),
            },
            endpoint: EndpointOptions {
                high_water_mark: args.high_water_mark,
                send_timeout: args.send_timeout_ms.map(Duration::from_millis),
                ..EndpointOptions::default()
            },
            run_for: (args.run_secs > 0).then(|| Duration::from_secs(args.run_secs)),
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout),
            seed: args.seed,
        })
    }
}
