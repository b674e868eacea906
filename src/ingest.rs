use crate::apis::{Deputy, LegislatureApi};
use crate::error::{PipelineError, Result};
use crate::observability;
use crate::schema::RawRow;
use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// A calendar month, written `YYYY-MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct YearMonth {
    pub year: i32,
    pub month: u32,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Result<Self> {
        if !(1..=12).contains(&month) {
            return Err(PipelineError::MonthRange(format!(
                "month {} out of range 1-12",
                month
            )));
        }
        Ok(Self { year, month })
    }

    /// Parses `YYYY-MM`.
    pub fn parse(s: &str) -> Result<Self> {
        let (year_str, month_str) = s.split_once('-').ok_or_else(|| {
            PipelineError::MonthRange(format!("expected YYYY-MM, got '{}'", s))
        })?;
        let year = year_str
            .parse()
            .map_err(|_| PipelineError::MonthRange(format!("invalid year in '{}'", s)))?;
        let month = month_str
            .parse()
            .map_err(|_| PipelineError::MonthRange(format!("invalid month in '{}'", s)))?;
        Self::new(year, month)
    }

    pub fn next(self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:02}", self.year, self.month)
    }
}

/// Every month between `start` and `end`, inclusive on both ends.
pub fn month_range(start: YearMonth, end: YearMonth) -> Result<Vec<YearMonth>> {
    if start > end {
        return Err(PipelineError::MonthRange(format!(
            "start {} is after end {}",
            start, end
        )));
    }
    let mut months = Vec::new();
    let mut current = start;
    while current <= end {
        months.push(current);
        current = current.next();
    }
    Ok(months)
}

/// File name of the raw CSV for one month.
pub fn month_file_name(month: YearMonth) -> String {
    format!("deputy_expenses_{}_{:02}.csv", month.year, month.month)
}

/// Result of a complete ingest run.
#[derive(Debug, Serialize)]
pub struct IngestReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub months: usize,
    pub deputies_listed: usize,
    pub records_fetched: usize,
    pub empty_deputy_months: usize,
    pub failed_requests: usize,
    pub files_written: Vec<String>,
}

impl IngestReport {
    fn new(months: usize) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            months,
            deputies_listed: 0,
            records_fetched: 0,
            empty_deputy_months: 0,
            failed_requests: 0,
            files_written: Vec::new(),
        }
    }

    fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }
}

/// Stage 1: collects expense records from the open-data API and lands them
/// as one CSV per month under the raw directory.
pub struct Ingester {
    api: Box<dyn LegislatureApi>,
    raw_dir: PathBuf,
}

impl Ingester {
    pub fn new(api: Box<dyn LegislatureApi>, raw_dir: impl Into<PathBuf>) -> Self {
        Self {
            api,
            raw_dir: raw_dir.into(),
        }
    }

    /// Runs ingestion for every month in the inclusive range. Months without
    /// any records produce no file.
    #[instrument(skip(self), fields(api_name = %self.api.api_name()))]
    pub async fn run(&self, start: YearMonth, end: YearMonth) -> Result<IngestReport> {
        let months = month_range(start, end)?;
        let mut report = IngestReport::new(months.len());
        info!(
            "🚀 Starting ingest run {} covering {} to {}",
            report.run_id, start, end
        );
        counter!(observability::INGEST_RUNS_TOTAL, "api" => self.api.api_name()).increment(1);
        let t_run = std::time::Instant::now();

        for month in months {
            let rows = self.collect_month(month, &mut report).await;
            if rows.is_empty() {
                info!("No expense records for {}", month);
                println!("   No expense records for {month}");
                continue;
            }
            let path = self.write_month_file(month, &rows)?;
            info!("💾 Saved {} rows to {}", rows.len(), path);
            println!("💾 Saved {} rows to {path}", rows.len());
            report.files_written.push(path);
        }

        histogram!(observability::INGEST_RUN_DURATION_SECONDS)
            .record(t_run.elapsed().as_secs_f64());
        report.finish();
        Ok(report)
    }

    /// Collects the augmented expense rows for one month. A failure for one
    /// deputy drops that deputy/month entirely without sinking the rest.
    async fn collect_month(&self, month: YearMonth, report: &mut IngestReport) -> Vec<RawRow> {
        info!("📡 Fetching expenses for {}", month);
        println!("📡 Fetching expenses for {month}...");

        let deputies = match self.api.list_deputies().await {
            Ok(deputies) => deputies,
            Err(e) => {
                warn!("Deputy listing failed for {}: {}", month, e);
                report.failed_requests += 1;
                counter!(observability::INGEST_REQUEST_FAILURES_TOTAL).increment(1);
                return Vec::new();
            }
        };
        report.deputies_listed += deputies.len();

        let mut rows = Vec::new();
        for deputy in &deputies {
            let state = self.resolve_state(deputy, &mut report.failed_requests).await;
            match self
                .api
                .monthly_expenses(deputy.id, month.year, month.month)
                .await
            {
                Ok(items) if items.is_empty() => {
                    debug!("No expenses for deputy {} in {}", deputy.id, month);
                    report.empty_deputy_months += 1;
                    counter!(observability::INGEST_EMPTY_RESPONSES_TOTAL).increment(1);
                }
                Ok(items) => {
                    report.records_fetched += items.len();
                    counter!(observability::INGEST_RECORDS_TOTAL, "month" => month.to_string())
                        .increment(items.len() as u64);
                    for item in &items {
                        rows.push(raw_row_from_expense(item, deputy, state.as_deref()));
                    }
                }
                Err(e) => {
                    // Partial pagination must not leak into the file.
                    warn!(
                        "Expense fetch failed for deputy {} in {}, dropping the deputy/month: {}",
                        deputy.id, month, e
                    );
                    report.failed_requests += 1;
                    counter!(observability::INGEST_REQUEST_FAILURES_TOTAL).increment(1);
                }
            }
        }
        rows
    }

    /// Home state for a deputy, preferring the detail endpoint and falling
    /// back to whatever the listing carried.
    async fn resolve_state(&self, deputy: &Deputy, failed_requests: &mut usize) -> Option<String> {
        match self.api.deputy_state(deputy.id).await {
            Ok(Some(state)) => Some(state),
            Ok(None) => deputy.sigla_uf.clone(),
            Err(e) => {
                warn!("State lookup failed for deputy {}: {}", deputy.id, e);
                *failed_requests += 1;
                counter!(observability::INGEST_REQUEST_FAILURES_TOTAL).increment(1);
                deputy.sigla_uf.clone()
            }
        }
    }

    /// Writes one month of raw rows as `deputy_expenses_YYYY_MM.csv`.
    fn write_month_file(&self, month: YearMonth, rows: &[RawRow]) -> Result<String> {
        fs::create_dir_all(&self.raw_dir)?;
        let filepath = self.raw_dir.join(month_file_name(month));
        let mut writer = csv::Writer::from_path(&filepath)?;
        for row in rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
        Ok(filepath.to_string_lossy().to_string())
    }
}

/// Builds a raw CSV row from one expense document plus the deputy context it
/// was fetched under. Expense fields are written exactly as the API sent
/// them; typing is the normalization stage's job.
fn raw_row_from_expense(item: &Value, deputy: &Deputy, state: Option<&str>) -> RawRow {
    RawRow {
        ano: field_as_text(item, "ano"),
        mes: field_as_text(item, "mes"),
        tipo_despesa: field_as_text(item, "tipoDespesa"),
        valor_documento: field_as_text(item, "valorDocumento"),
        data_documento: field_as_text(item, "dataDocumento"),
        nome_deputado: deputy.nome.clone(),
        sigla_partido: deputy.sigla_partido.clone().unwrap_or_default(),
        sigla_uf: state.map(|s| s.to_string()).unwrap_or_default(),
        id_deputado: deputy.id.to_string(),
    }
}

/// Text form of a JSON field: strings verbatim, numbers and booleans via
/// their JSON rendering, anything else empty.
fn field_as_text(item: &Value, key: &str) -> String {
    match item.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}
