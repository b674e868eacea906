//! Metric catalog for the pipeline stages and the dashboard.
//!
//! All metric names live here so the stages and the /metrics route agree on
//! one catalog. The recorder is installed once per process.

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::{Once, OnceLock};
use tracing::{info, warn};

pub const INGEST_RUNS_TOTAL: &str = "ceap_ingest_runs_total";
pub const INGEST_RECORDS_TOTAL: &str = "ceap_ingest_records_total";
pub const INGEST_EMPTY_RESPONSES_TOTAL: &str = "ceap_ingest_empty_responses_total";
pub const INGEST_REQUEST_FAILURES_TOTAL: &str = "ceap_ingest_request_failures_total";
pub const INGEST_RUN_DURATION_SECONDS: &str = "ceap_ingest_run_duration_seconds";

pub const PROCESS_RUNS_TOTAL: &str = "ceap_process_runs_total";
pub const PROCESS_ROWS_READ_TOTAL: &str = "ceap_process_rows_read_total";
pub const PROCESS_ROWS_DROPPED_TOTAL: &str = "ceap_process_rows_dropped_total";
pub const PROCESS_DUPLICATES_REMOVED_TOTAL: &str = "ceap_process_duplicates_removed_total";
pub const PROCESS_ROWS_WRITTEN_TOTAL: &str = "ceap_process_rows_written_total";
pub const PROCESS_RUN_DURATION_SECONDS: &str = "ceap_process_run_duration_seconds";

pub const DASHBOARD_SUMMARY_REQUESTS_TOTAL: &str = "ceap_dashboard_summary_requests_total";
pub const DASHBOARD_SUMMARY_DURATION_SECONDS: &str = "ceap_dashboard_summary_duration_seconds";
pub const DASHBOARD_RELOADS_TOTAL: &str = "ceap_dashboard_reloads_total";

static INIT: Once = Once::new();
static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Installs the Prometheus recorder and registers the metric catalog.
/// Idempotent; the handle is kept for in-process rendering by the
/// dashboard's /metrics route.
pub fn init_metrics() {
    INIT.call_once(|| match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            if HANDLE.set(handle).is_err() {
                warn!("Prometheus handle was already set");
            }
            register_metrics();
            info!("Prometheus recorder installed");
        }
        Err(e) => {
            warn!("Failed to install Prometheus recorder: {}", e);
        }
    });
}

/// Current metrics in Prometheus exposition format, if a recorder is
/// installed.
pub fn render_metrics() -> Option<String> {
    HANDLE.get().map(|handle| handle.render())
}

fn register_metrics() {
    describe_counter!(INGEST_RUNS_TOTAL, "Ingest runs started");
    describe_counter!(INGEST_RECORDS_TOTAL, "Expense records fetched from the API");
    describe_counter!(
        INGEST_EMPTY_RESPONSES_TOTAL,
        "Deputy/months that returned no expense records"
    );
    describe_counter!(
        INGEST_REQUEST_FAILURES_TOTAL,
        "API requests that failed after retries"
    );
    describe_histogram!(INGEST_RUN_DURATION_SECONDS, "Wall time of ingest runs");

    describe_counter!(PROCESS_RUNS_TOTAL, "Normalization runs started");
    describe_counter!(PROCESS_ROWS_READ_TOTAL, "Raw rows read during normalization");
    describe_counter!(
        PROCESS_ROWS_DROPPED_TOTAL,
        "Rows dropped during normalization, by reason"
    );
    describe_counter!(
        PROCESS_DUPLICATES_REMOVED_TOTAL,
        "Exact duplicate rows removed during normalization"
    );
    describe_counter!(PROCESS_ROWS_WRITTEN_TOTAL, "Canonical rows written");
    describe_histogram!(PROCESS_RUN_DURATION_SECONDS, "Wall time of normalization runs");

    describe_counter!(
        DASHBOARD_SUMMARY_REQUESTS_TOTAL,
        "Summary requests served by the dashboard"
    );
    describe_histogram!(
        DASHBOARD_SUMMARY_DURATION_SECONDS,
        "Time spent computing dashboard summaries"
    );
    describe_counter!(DASHBOARD_RELOADS_TOTAL, "Reloads of the processed table");

    // Bind placeholders so the catalog is visible before first use
    let _ = counter!(INGEST_RUNS_TOTAL);
    let _ = counter!(INGEST_RECORDS_TOTAL);
    let _ = counter!(INGEST_EMPTY_RESPONSES_TOTAL);
    let _ = counter!(INGEST_REQUEST_FAILURES_TOTAL);
    let _ = histogram!(INGEST_RUN_DURATION_SECONDS);
    let _ = counter!(PROCESS_RUNS_TOTAL);
    let _ = counter!(PROCESS_ROWS_READ_TOTAL);
    let _ = counter!(PROCESS_DUPLICATES_REMOVED_TOTAL);
    let _ = counter!(PROCESS_ROWS_WRITTEN_TOTAL);
    let _ = histogram!(PROCESS_RUN_DURATION_SECONDS);
    let _ = counter!(DASHBOARD_SUMMARY_REQUESTS_TOTAL);
    let _ = histogram!(DASHBOARD_SUMMARY_DURATION_SECONDS);
    let _ = counter!(DASHBOARD_RELOADS_TOTAL);
}
