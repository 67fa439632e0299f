use std::env;

use anyhow::Result;
use opentelemetry::{global, KeyValue};
use opentelemetry_sdk::{
    propagation::TraceContextPropagator,
    resource::Resource,
    runtime::Tokio,
    trace::{self, Sampler},
};
use tracing::{info, warn};
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

type Registry = tracing_subscriber::registry::Registry;

const SAMPLING_RATE_ENV: &str = "KBC_OTEL_SAMPLING_RATE";
const LOG_LEVEL_ENV: &str = "KBC_LOG_LEVEL";

/// Exporting is opt-in: without a sampling rate no OTLP exporter is started.
const DEFAULT_SAMPLING_RATE: f64 = 0.0;

/// Flushes and shuts down the OTLP pipeline on drop, if one was started.
#[derive(Debug)]
pub struct TelemetryGuard {
    tracer_installed: bool,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if self.tracer_installed {
            global::shutdown_tracer_provider();
        }
    }
}

/// Installs the global subscriber: console output filtered by `RUST_LOG` (or
/// `KBC_LOG_LEVEL`), plus span export over OTLP when sampling is enabled. A
/// broken exporter setup degrades to console output only.
pub fn init(service_name: &str) -> Result<TelemetryGuard> {
    let (level, level_warning) = parse_log_level(env::var(LOG_LEVEL_ENV).ok().as_deref());
    let (sampling_rate, sampling_warning) =
        parse_sampling_rate(env::var(SAMPLING_RATE_ENV).ok().as_deref());

    let (otel_layer, otel_error) = match otel_layer(service_name, sampling_rate) {
        Ok(layer) => (layer, None),
        Err(error) => (None, Some(error)),
    };
    let guard = TelemetryGuard {
        tracer_installed: otel_layer.is_some(),
    };

    tracing_subscriber::registry()
        .with(otel_layer)
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    for message in [level_warning, sampling_warning].into_iter().flatten() {
        warn!("{message}");
    }
    if let Some(error) = otel_error {
        warn!(%error, "OTLP exporter unavailable; logging to the console only");
    }
    info!(service = service_name, sampling_rate, "telemetry initialized");

    Ok(guard)
}

/// `None` when sampling is off.
fn otel_layer(
    service_name: &str,
    sampling_rate: f64,
) -> Result<Option<OpenTelemetryLayer<Registry, trace::Tracer>>> {
    if sampling_rate <= 0.0 {
        return Ok(None);
    }
    global::set_text_map_propagator(TraceContextPropagator::new());

    let resource = Resource::new([KeyValue::new("service.name", service_name.to_string())]);
    let trace_config = trace::Config::default()
        .with_sampler(Sampler::TraceIdRatioBased(sampling_rate))
        .with_resource(resource);
    let tracer = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(opentelemetry_otlp::new_exporter().tonic())
        .with_trace_config(trace_config)
        .install_batch(Tokio)?;

    Ok(Some(tracing_opentelemetry::layer().with_tracer(tracer)))
}

/// Reads a ratio in `0.0..=1.0`. Out-of-range values are clamped and
/// unreadable ones fall back to the default; both come with a warning.
pub fn parse_sampling_rate(raw: Option<&str>) -> (f64, Option<String>) {
    let Some(value) = raw.map(str::trim) else {
        return (DEFAULT_SAMPLING_RATE, None);
    };
    if value.is_empty() {
        return (
            DEFAULT_SAMPLING_RATE,
            Some(format!(
                "{SAMPLING_RATE_ENV} is empty; defaulting to {DEFAULT_SAMPLING_RATE:.1}"
            )),
        );
    }
    match value.parse::<f64>() {
        Ok(rate) if (0.0..=1.0).contains(&rate) => (rate, None),
        Ok(rate) if !rate.is_nan() => {
            let clamped = rate.clamp(0.0, 1.0);
            (
                clamped,
                Some(format!(
                    "{SAMPLING_RATE_ENV}={value} outside 0.0..=1.0; clamped to {clamped}"
                )),
            )
        }
        _ => (
            DEFAULT_SAMPLING_RATE,
            Some(format!(
                "{SAMPLING_RATE_ENV}='{value}' is not a valid float; defaulting to {DEFAULT_SAMPLING_RATE:.1}"
            )),
        ),
    }
}

/// Maps the level names used by Keboola deployments (`WARNING`, `CRITICAL`) onto
/// tracing filter directives.
pub fn parse_log_level(raw: Option<&str>) -> (&'static str, Option<String>) {
    let Some(value) = raw.map(str::trim).filter(|value| !value.is_empty()) else {
        return ("info", None);
    };
    match value.to_ascii_uppercase().as_str() {
        "TRACE" => ("trace", None),
        "DEBUG" => ("debug", None),
        "INFO" => ("info", None),
        "WARNING" | "WARN" => ("warn", None),
        "ERROR" | "CRITICAL" => ("error", None),
        _ => (
            "info",
            Some(format!(
                "{LOG_LEVEL_ENV}='{value}' is not one of DEBUG, INFO, WARNING, ERROR, CRITICAL; using INFO"
            )),
        ),
    }
}
