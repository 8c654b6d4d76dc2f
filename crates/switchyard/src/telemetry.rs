//! # Telemetry
//!
//! Console logging is always on: a `tracing_subscriber` registry with an
//! [`EnvFilter`] (default `info`, override with `RUST_LOG`) and a pretty fmt
//! layer. Counters are exported through OpenTelemetry when the `metrics`
//! feature is enabled.
//!
//! ## Feature matrix
//!
//! - `metrics`: Enables OpenTelemetry counters for routed, dropped and
//!   handled messages.
//! - `stdout`: Exports those counters to stdout every 5 seconds.
//!
//! ## Metrics
//!
//! | name | attributes | meaning |
//! |------|------------|---------|
//! | `messages_routed` | `direction` | messages the broker relayed |
//! | `messages_dropped` | `direction` | messages the broker could not deliver |
//! | `requests_sent` | | requests issued by client drivers |
//! | `replies_received` | | replies consumed by client drivers |
//! | `requests_handled` | | requests dequeued by workers |
//!
//! Without `metrics`, every `increment_*` helper compiles to a no-op.
//!
//! ```bash
//! cargo run --features metrics,stdout
//! ```

#[cfg(all(feature = "stdout", not(feature = "metrics")))]
compile_error!("The 'stdout' feature requires 'metrics' to be enabled.");

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(feature = "metrics")]
use opentelemetry::metrics::{Counter, Meter};
#[cfg(feature = "metrics")]
use opentelemetry::{InstrumentationScope, KeyValue};
#[cfg(feature = "metrics")]
use opentelemetry_sdk::Resource;
#[cfg(feature = "metrics")]
use opentelemetry_sdk::metrics as sdkmetrics;
#[cfg(feature = "metrics")]
use opentelemetry_semantic_conventions as semvcns;
#[cfg(feature = "metrics")]
use std::sync::OnceLock;

pub struct TelemetryProviders {
    #[cfg(feature = "metrics")]
    pub meter_provider: sdkmetrics::SdkMeterProvider,
}

impl TelemetryProviders {
    /// Flushes and shuts down exporters. Errors are printed, not returned:
    /// by now the log subscriber may be the thing failing.
    pub fn shutdown(&self) {
        #[cfg(feature = "metrics")]
        {
            if let Err(err) = self.meter_provider.force_flush() {
                eprintln!("Error flushing metrics: {err:#?}");
            }
            if let Err(err) = self.meter_provider.shutdown() {
                eprintln!("Error shutting down meter: {err:#?}");
            }
        }
    }
}

pub fn init_telemetry() -> anyhow::Result<TelemetryProviders> {
    #[cfg(feature = "metrics")]
    let meter_provider = init_metrics()?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_thread_ids(true)
                .with_line_number(true)
                .with_target(false)
                .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
                .with_file(true)
                .pretty(),
        )
        .try_init()?;

    #[cfg(feature = "metrics")]
    {
        opentelemetry::global::set_meter_provider(meter_provider.clone());
        let scope = InstrumentationScope::builder("switchyard")
            .with_version(env!("CARGO_PKG_VERSION"))
            .with_schema_url(semvcns::SCHEMA_URL)
            .build();
        init_metric_handles(&opentelemetry::global::meter_with_scope(scope));
    }

    Ok(TelemetryProviders {
        #[cfg(feature = "metrics")]
        meter_provider,
    })
}

#[cfg(feature = "metrics")]
fn resource() -> Resource {
    Resource::builder()
        .with_service_name("switchyard")
        .with_schema_url(
            [KeyValue::new(
                semvcns::resource::SERVICE_VERSION,
                env!("CARGO_PKG_VERSION"),
            )],
            semvcns::SCHEMA_URL,
        )
        .build()
}

#[cfg(feature = "metrics")]
fn init_metrics() -> anyhow::Result<sdkmetrics::SdkMeterProvider> {
    let builder = sdkmetrics::SdkMeterProvider::builder().with_resource(resource());

    #[cfg(feature = "stdout")]
    let builder = {
        use opentelemetry_stdout::MetricExporter;
        let exporter = MetricExporter::default();
        let reader = sdkmetrics::PeriodicReader::builder(exporter)
            .with_interval(std::time::Duration::from_secs(5))
            .build();
        builder.with_reader(reader)
    };

    Ok(builder.build())
}

#[cfg(feature = "metrics")]
static MESSAGES_ROUTED: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static MESSAGES_DROPPED: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static REQUESTS_SENT: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static REPLIES_RECEIVED: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static REQUESTS_HANDLED: OnceLock<Counter<u64>> = OnceLock::new();

#[cfg(feature = "metrics")]
fn init_metric_handles(meter: &Meter) {
    let _ = MESSAGES_ROUTED.set(
        meter
            .u64_counter("messages_routed")
            .with_description("Messages relayed by the broker")
            .build(),
    );
    let _ = MESSAGES_DROPPED.set(
        meter
            .u64_counter("messages_dropped")
            .with_description("Messages the broker received but could not deliver")
            .build(),
    );
    let _ = REQUESTS_SENT.set(
        meter
            .u64_counter("requests_sent")
            .with_description("Requests issued by client drivers")
            .build(),
    );
    let _ = REPLIES_RECEIVED.set(
        meter
            .u64_counter("replies_received")
            .with_description("Replies consumed by client drivers")
            .build(),
    );
    let _ = REQUESTS_HANDLED.set(
        meter
            .u64_counter("requests_handled")
            .with_description("Requests dequeued by workers")
            .build(),
    );
}

#[cfg(feature = "metrics")]
pub fn increment_messages_routed(direction: &'static str) {
    if let Some(counter) = MESSAGES_ROUTED.get() {
        counter.add(1, &[KeyValue::new("direction", direction)]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_messages_routed(_direction: &'static str) {}

#[cfg(feature = "metrics")]
pub fn increment_messages_dropped(direction: &'static str) {
    if let Some(counter) = MESSAGES_DROPPED.get() {
        counter.add(1, &[KeyValue::new("direction", direction)]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_messages_dropped(_direction: &'static str) {}

#[cfg(feature = "metrics")]
pub fn increment_requests_sent() {
    if let Some(counter) = REQUESTS_SENT.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_requests_sent() {}

#[cfg(feature = "metrics")]
pub fn increment_replies_received() {
    if let Some(counter) = REPLIES_RECEIVED.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_replies_received() {}

#[cfg(feature = "metrics")]
pub fn increment_requests_handled() {
    if let Some(counter) = REQUESTS_HANDLED.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_requests_handled() {}
