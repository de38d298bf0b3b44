// Telemetry module for structured logging, metrics, and tracing

use anyhow::Result;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    trace::{RandomIdGenerator, Sampler, TracerProvider},
    Resource,
};
use std::net::SocketAddr;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::models::{FileKind, Stage};

const SERVICE_NAME: &str = "reconciliation-importer";

/// Initialize structured logging with JSON formatting and trace context
///
/// `RUST_LOG` takes precedence over the configured level. When a tracing
/// endpoint is given, spans are also exported over OTLP.
#[tracing::instrument(skip_all)]
pub fn init_logging(log_level: &str, tracing_endpoint: Option<&str>) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .map_err(|e| anyhow::anyhow!("Failed to create env filter: {}", e))?;

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_filter(env_filter);

    let registry = tracing_subscriber::registry().with(json_layer);

    if let Some(endpoint) = tracing_endpoint {
        let tracer = init_tracer(endpoint)?;
        let telemetry_layer = tracing_opentelemetry::layer().with_tracer(tracer);
        registry
            .with(telemetry_layer)
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {}", e))?;
    } else {
        registry
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {}", e))?;
    }

    tracing::info!(
        log_level = log_level,
        tracing_endpoint = tracing_endpoint,
        "Structured logging initialized with JSON formatting"
    );

    Ok(())
}

/// Initialize OpenTelemetry tracer with OTLP exporter
#[tracing::instrument(skip_all)]
fn init_tracer(endpoint: &str) -> Result<opentelemetry_sdk::trace::Tracer> {
    use opentelemetry_sdk::runtime::Tokio;

    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(endpoint)
        .build_span_exporter()
        .map_err(|e| anyhow::anyhow!("Failed to build span exporter: {}", e))?;

    let tracer_provider = TracerProvider::builder()
        .with_batch_exporter(exporter, Tokio)
        .with_config(
            opentelemetry_sdk::trace::Config::default()
                .with_sampler(Sampler::AlwaysOn)
                .with_id_generator(RandomIdGenerator::default())
                .with_resource(Resource::new(vec![
                    KeyValue::new("service.name", SERVICE_NAME),
                    KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
                ])),
        )
        .build();

    global::set_tracer_provider(tracer_provider.clone());
    let tracer = tracer_provider.tracer(SERVICE_NAME);

    tracing::info!(
        endpoint = endpoint,
        "OpenTelemetry tracer initialized with OTLP exporter"
    );

    Ok(tracer)
}

/// Flush remaining spans on shutdown
pub fn shutdown_tracer() {
    global::shutdown_tracer_provider();
}

/// Install the Prometheus exporter and describe the pipeline metrics
#[tracing::instrument(skip_all)]
pub fn init_metrics(metrics_port: u16) -> Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{}", metrics_port)
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid metrics port: {}", e))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    describe_counter!(
        "files_discovered_total",
        "Remote files discovered by the stage job"
    );
    describe_counter!("files_staged_total", "Files uploaded to object storage");
    describe_counter!(
        "files_stage_failed_total",
        "Files whose download or upload failed"
    );
    describe_counter!("files_imported_total", "Files imported into the database");
    describe_counter!("files_import_failed_total", "Files whose import failed");
    describe_counter!(
        "section_rows_inserted_total",
        "Section rows inserted, by section kind"
    );
    describe_counter!(
        "sections_skipped_total",
        "Sections excluded from loading, by kind and reason"
    );
    describe_histogram!(
        "pipeline_run_duration_seconds",
        "Duration of a stage or import run in seconds"
    );

    tracing::info!(
        metrics_port = metrics_port,
        metrics_endpoint = format!("http://0.0.0.0:{}/metrics", metrics_port),
        "Prometheus metrics exporter initialized"
    );

    Ok(())
}

#[inline]
pub fn record_files_discovered(count: usize) {
    counter!("files_discovered_total").increment(count as u64);
}

#[inline]
pub fn record_file_staged() {
    counter!("files_staged_total").increment(1);
}

#[inline]
pub fn record_stage_failure(stage: Stage) {
    counter!("files_stage_failed_total", "stage" => stage.to_string()).increment(1);
}

#[inline]
pub fn record_file_imported() {
    counter!("files_imported_total").increment(1);
}

#[inline]
pub fn record_import_failure() {
    counter!("files_import_failed_total").increment(1);
}

#[inline]
pub fn record_rows_inserted(kind: FileKind, rows: u64) {
    counter!("section_rows_inserted_total", "kind" => kind.to_string()).increment(rows);
}

#[inline]
pub fn record_section_skipped(kind: FileKind, reason: &'static str) {
    counter!("sections_skipped_total", "kind" => kind.to_string(), "reason" => reason)
        .increment(1);
}

#[inline]
pub fn record_run_duration(job: &'static str, duration_seconds: f64) {
    histogram!("pipeline_run_duration_seconds", "job" => job).record(duration_seconds);
}
