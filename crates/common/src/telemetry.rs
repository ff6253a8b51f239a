//! Logging and tracing initialization.
//!
//! [`init_logging`] installs a `tracing-subscriber` registry with an `EnvFilter`-gated
//! fmt layer. When the `telemetry` feature is enabled and `telemetry.enabled` is set,
//! dispatch, stream and code table spans are additionally exported over OTLP/gRPC.

use anyhow::Result;

#[cfg(feature = "telemetry")]
use {
    opentelemetry::trace::TracerProvider, opentelemetry::KeyValue,
    opentelemetry_otlp::WithExportConfig,
    opentelemetry_sdk::trace::TracerProvider as SdkTracerProvider, opentelemetry_sdk::Resource,
    tracing_opentelemetry::OpenTelemetryLayer,
};

use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::TelemetryConfig;

type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync>;

/// Builds the OTLP export layer described by `config`.
///
/// Returns `None` when export is disabled. Enabling export without the `telemetry`
/// feature is a configuration error.
pub fn init_telemetry<S>(config: &TelemetryConfig) -> Result<Option<BoxedLayer<S>>>
where
    S: tracing::Subscriber + for<'span> LookupSpan<'span> + Send + Sync,
{
    if !config.enabled {
        return Ok(None);
    }

    #[cfg(feature = "telemetry")]
    {
        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_endpoint(config.endpoint.as_str())
            .build()?;

        let provider = SdkTracerProvider::builder()
            .with_batch_exporter(exporter, opentelemetry_sdk::runtime::Tokio)
            .with_resource(Resource::new(vec![KeyValue::new(
                "service.name",
                config.service_name.clone(),
            )]))
            .build();

        let tracer = provider.tracer(config.service_name.clone());
        opentelemetry::global::set_tracer_provider(provider);

        Ok(Some(Box::new(OpenTelemetryLayer::new(tracer))))
    }
    #[cfg(not(feature = "telemetry"))]
    {
        anyhow::bail!(
            "telemetry.enabled is set for {} but ferry was built without the `telemetry` feature",
            config.service_name
        )
    }
}

/// Installs the global subscriber. Calling it again after a subscriber is set is a no-op.
pub fn init_logging(config: &TelemetryConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_filter))?;

    let fmt_layer = if config.json_logs {
        tracing_subscriber::fmt::layer().json().with_filter(filter).boxed()
    } else {
        tracing_subscriber::fmt::layer().with_filter(filter).boxed()
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(init_telemetry(config)?)
        .try_init()
        .ok();

    Ok(())
}

/// Flushes pending spans. Call once before the process exits.
pub fn shutdown_telemetry() {
    #[cfg(feature = "telemetry")]
    opentelemetry::global::shutdown_tracer_provider();
}
