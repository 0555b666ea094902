//! Telemetry and structured logging for the render worker.

use crate::job::{JobStatus, RenderJob};
use opentelemetry::trace::{Span, Tracer};
use opentelemetry::{global, KeyValue};
use tracing::{info, warn};

const TRACER_NAME: &str = "render-worker";

/// Renders slower than this are logged as a warning.
const SLOW_RENDER_THRESHOLD_MS: i64 = 10 * 60 * 1000;

/// Records telemetry for a finished job.
///
/// Emits one `render_job` span carrying the job's kind, status, duration,
/// and error (if failed), plus a structured log line. Renders slower than
/// ten minutes are logged as a warning.
///
/// # Arguments
///
/// * `job` - The job, after its terminal transition
pub fn record_job_telemetry(job: &RenderJob) {
    let tracer = global::tracer(TRACER_NAME);
    let mut span = tracer.start("render_job");

    span.set_attribute(KeyValue::new("job_id", job.id.clone()));
    span.set_attribute(KeyValue::new("kind", job.kind.to_string()));
    span.set_attribute(KeyValue::new("status", job.status.to_string()));
    span.set_attribute(KeyValue::new("progress", job.progress));
    span.set_attribute(KeyValue::new("cancel_requested", job.cancel_requested));

    if let Some(duration_ms) = job.processing_duration_ms() {
        span.set_attribute(KeyValue::new("duration_ms", duration_ms));

        info!(
            job_id = %job.id,
            kind = %job.kind,
            duration_ms = duration_ms,
            status = %job.status,
            "Render job telemetry recorded"
        );

        if duration_ms > SLOW_RENDER_THRESHOLD_MS {
            warn!(
                job_id = %job.id,
                duration_ms = duration_ms,
                "Render exceeded performance threshold ({}ms)",
                SLOW_RENDER_THRESHOLD_MS
            );
        }
    }

    if job.status == JobStatus::Failed {
        if let Some(ref error) = job.error {
            span.set_attribute(KeyValue::new("error", error.clone()));
        }
    }

    if let Some(ref output_path) = job.output_path {
        span.set_attribute(KeyValue::new("output_path", output_path.clone()));
    }

    span.end();
}

/// Records a worker heartbeat for monitoring pool health.
///
/// # Arguments
///
/// * `queue_length` - Jobs waiting for a worker
/// * `in_progress` - Jobs currently rendering
pub fn record_worker_heartbeat(queue_length: usize, in_progress: usize) {
    let tracer = global::tracer(TRACER_NAME);
    let mut span = tracer.start("worker_heartbeat");

    span.set_attribute(KeyValue::new("queue_length", queue_length as i64));
    span.set_attribute(KeyValue::new("in_progress", in_progress as i64));
    span.end();

    info!(queue_length = queue_length, in_progress = in_progress, "Worker heartbeat");
}

/// Initializes OpenTelemetry with an OTLP exporter.
///
/// Call once at startup from inside the tokio runtime. Reads:
/// - `OTEL_EXPORTER_OTLP_ENDPOINT` - collector endpoint (default: http://localhost:4317)
/// - `OTEL_SERVICE_NAME` - service name (default: render-worker)
///
/// # Returns
///
/// Returns `Ok(())` once the batch exporter is installed as the global
/// tracer provider, or the pipeline error. Callers may keep running without
/// telemetry on error.
pub fn init_telemetry() -> Result<(), Box<dyn std::error::Error>> {
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::trace::Config;

    let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
        .unwrap_or_else(|_| "http://localhost:4317".to_string());

    let service_name =
        std::env::var("OTEL_SERVICE_NAME").unwrap_or_else(|_| TRACER_NAME.to_string());

    let tracer = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(&endpoint),
        )
        .with_trace_config(Config::default().with_resource(
            opentelemetry_sdk::Resource::new(vec![
                KeyValue::new("service.name", service_name),
                KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
            ]),
        ))
        .install_batch(opentelemetry_sdk::runtime::Tokio)?;

    if let Some(provider) = tracer.provider() {
        global::set_tracer_provider(provider);
    }

    info!("Telemetry initialized: endpoint={}", endpoint);
    Ok(())
}

/// Flushes pending spans. Call before exiting.
pub fn shutdown_telemetry() {
    global::shutdown_tracer_provider();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobKind, RenderOptions};

    // No exporter is installed here, so spans go to the global no-op tracer.

    #[test]
    fn test_record_completed_job() {
        let mut job = RenderJob::new(JobKind::Media, RenderOptions::new());
        job.start_processing();
        job.mark_complete("/tmp/out.mp4".to_string(), "http://x/outputs/out.mp4".to_string());

        record_job_telemetry(&job);
    }

    #[test]
    fn test_record_failed_job() {
        let mut job = RenderJob::new(JobKind::Still, RenderOptions::new());
        job.start_processing();
        job.mark_failed("Test error".to_string());

        record_job_telemetry(&job);
        record_worker_heartbeat(3, 1);
    }
}
