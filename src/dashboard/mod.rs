use crate::analysis::{self, DashboardSummary, ExpenseFilter};
use crate::error::Result;
use crate::observability;
use crate::schema::CATEGORY_ALL;
use crate::table::ExpenseTable;
use axum::{
    http::Method,
    response::{Html, IntoResponse, Json},
    routing::{get, post},
    Extension, Router,
};
use hyper::Server;
use metrics::{counter, histogram};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

/// Shared dashboard state: the current table snapshot plus the file it is
/// reloaded from. Handlers take one snapshot per request, so an in-flight
/// request keeps its table even while a reload swaps the state underneath.
#[derive(Clone)]
pub struct DashboardState {
    table: Arc<RwLock<Arc<ExpenseTable>>>,
    processed_file: Arc<PathBuf>,
}

impl DashboardState {
    /// Loads the processed table from disk. A missing file starts empty; an
    /// unreadable one refuses to start.
    pub fn load(processed_file: PathBuf) -> Result<Self> {
        let table = ExpenseTable::load(&processed_file)?;
        Ok(Self {
            table: Arc::new(RwLock::new(Arc::new(table))),
            processed_file: Arc::new(processed_file),
        })
    }

    pub fn snapshot(&self) -> Arc<ExpenseTable> {
        self.table.read().unwrap().clone()
    }

    /// Re-reads the processed file and swaps the table in one step. On error
    /// the previous table stays in place.
    pub fn reload(&self) -> Result<usize> {
        let fresh = ExpenseTable::load(&self.processed_file)?;
        let rows = fresh.len();
        *self.table.write().unwrap() = Arc::new(fresh);
        counter!(observability::DASHBOARD_RELOADS_TOTAL).increment(1);
        info!("Reloaded expense table, now {} rows", rows);
        Ok(rows)
    }
}

/// Dashboard page.
async fn index() -> impl IntoResponse {
    Html(include_str!("index.html"))
}

/// Health check endpoint.
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "ceap-pipeline",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Table metadata the dashboard needs to build its filter controls.
async fn meta(Extension(state): Extension<DashboardState>) -> impl IntoResponse {
    let table = state.snapshot();
    Json(serde_json::json!({
        "rows": table.len(),
        "date_min": table.date_min(),
        "date_max": table.date_max(),
        "categories": table.categories(),
        "category_all": CATEGORY_ALL,
        "schema_version": table.schema_version(),
    }))
}

/// All five aggregations for one filter state.
async fn summary(
    Extension(state): Extension<DashboardState>,
    Json(filter): Json<ExpenseFilter>,
) -> Json<DashboardSummary> {
    counter!(observability::DASHBOARD_SUMMARY_REQUESTS_TOTAL).increment(1);
    let t = std::time::Instant::now();
    let table = state.snapshot();
    let summary = analysis::summarize(&table, &filter);
    histogram!(observability::DASHBOARD_SUMMARY_DURATION_SECONDS)
        .record(t.elapsed().as_secs_f64());
    Json(summary)
}

/// Swaps in a freshly processed table without restarting the server.
async fn reload(Extension(state): Extension<DashboardState>) -> impl IntoResponse {
    match state.reload() {
        Ok(rows) => Json(serde_json::json!({ "rows": rows })).into_response(),
        Err(e) => {
            warn!("Reload failed: {}", e);
            (axum::http::StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// Prometheus exposition of the pipeline metrics.
async fn metrics_text() -> impl IntoResponse {
    observability::render_metrics().unwrap_or_default()
}

/// Create the HTTP server with all routes.
pub fn create_server(state: DashboardState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/api/meta", get(meta))
        .route("/api/summary", post(summary))
        .route("/api/reload", post(reload))
        .route("/metrics", get(metrics_text))
        .layer(Extension(state))
        .layer(ServiceBuilder::new().layer(cors))
}

/// Start the HTTP server on the specified port.
pub async fn start_server(
    state: DashboardState,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let app = create_server(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    println!("🚀 Dashboard running on http://localhost:{port}");
    println!("💚 Health check: http://localhost:{port}/health");
    println!("📊 Summary API:  http://localhost:{port}/api/summary");
    println!("📈 Metrics:      http://localhost:{port}/metrics");

    Server::bind(&addr).serve(app.into_make_service()).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ExpenseRecord;
    use chrono::NaiveDate;
    use std::path::Path;

    fn record(day: u32, valor: f64) -> ExpenseRecord {
        let date = NaiveDate::from_ymd_opt(2024, 1, day).unwrap();
        ExpenseRecord {
            ano: 2024,
            mes: 1,
            tipo_despesa: "Telefonia".to_string(),
            valor_documento: valor,
            data_documento: date.and_hms_opt(0, 0, 0).unwrap(),
            data: date,
            nome_deputado: "A".to_string(),
            partido: "P".to_string(),
            uf: "SP".to_string(),
            id_deputado: 1,
        }
    }

    fn write_processed(path: &Path, records: &[ExpenseRecord]) {
        let mut writer = csv::Writer::from_path(path).unwrap();
        for r in records {
            writer.serialize(r).unwrap();
        }
        writer.flush().unwrap();
    }

    #[test]
    fn missing_processed_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let state = DashboardState::load(dir.path().join("nothing.csv")).unwrap();
        assert!(state.snapshot().is_empty());
    }

    #[test]
    fn reload_swaps_the_table_and_keeps_old_snapshots_alive() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("processed_deputy_expenses.csv");
        write_processed(&file, &[record(5, 10.0)]);

        let state = DashboardState::load(file.clone()).unwrap();
        let before = state.snapshot();
        assert_eq!(before.len(), 1);

        write_processed(&file, &[record(5, 10.0), record(6, 20.0), record(7, 30.0)]);
        let rows = state.reload().unwrap();
        assert_eq!(rows, 3);

        // the old snapshot is untouched, new requests see the new table
        assert_eq!(before.len(), 1);
        assert_eq!(state.snapshot().len(), 3);
    }

    #[test]
    fn filter_json_shape_parses() {
        let filter: ExpenseFilter = serde_json::from_str(
            r#"{"start_date":"2024-01-01","end_date":"2024-03-31","categories":["Todos"]}"#,
        )
        .unwrap();
        assert_eq!(filter.start_date, NaiveDate::from_ymd_opt(2024, 1, 1));
        assert_eq!(filter.end_date, NaiveDate::from_ymd_opt(2024, 3, 31));
        assert_eq!(filter.categories, Some(vec!["Todos".to_string()]));

        let bare: ExpenseFilter = serde_json::from_str("{}").unwrap();
        assert!(bare.start_date.is_none());
        assert!(bare.categories.is_none());
    }
}
