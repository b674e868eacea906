use crate::error::Result;
use crate::observability;
use crate::schema::{self, ExpenseRecord, RawRow};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use metrics::{counter, histogram};
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Accepted layouts for `dataDocumento` values. Date-only values are given a
/// midnight time.
const DATE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Result of a complete normalization run.
#[derive(Debug, Serialize)]
pub struct ProcessReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub files_read: usize,
    pub rows_read: usize,
    pub rows_dropped_bad_date: usize,
    pub rows_dropped_malformed: usize,
    pub rows_dropped_bad_amount: usize,
    pub duplicates_removed: usize,
    pub rows_written: usize,
    pub output_file: Option<String>,
}

impl ProcessReport {
    fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            files_read: 0,
            rows_read: 0,
            rows_dropped_bad_date: 0,
            rows_dropped_malformed: 0,
            rows_dropped_bad_amount: 0,
            duplicates_removed: 0,
            rows_written: 0,
            output_file: None,
        }
    }

    fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }
}

/// Why a row was dropped during normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DropReason {
    /// The document date would not parse in any accepted layout.
    BadDate,
    /// The row was unreadable or an integer field would not parse.
    Malformed,
    /// The amount text was not a finite number.
    BadAmount,
}

impl DropReason {
    fn label(self) -> &'static str {
        match self {
            DropReason::BadDate => "bad_date",
            DropReason::Malformed => "malformed",
            DropReason::BadAmount => "bad_amount",
        }
    }
}

/// Row that survived the typed read and date parse. The amount is still the
/// source text so duplicate detection compares exactly what was ingested.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct WorkingRow {
    ano: i32,
    mes: u32,
    tipo_despesa: String,
    valor_documento: String,
    data_documento: NaiveDateTime,
    data: NaiveDate,
    nome_deputado: String,
    partido: String,
    uf: String,
    id_deputado: i64,
}

/// Stage 2: merges the raw monthly files into one deduplicated, fully typed
/// canonical table.
pub struct Processor {
    raw_dir: PathBuf,
    processed_dir: PathBuf,
}

impl Processor {
    pub fn new(raw_dir: impl Into<PathBuf>, processed_dir: impl Into<PathBuf>) -> Self {
        Self {
            raw_dir: raw_dir.into(),
            processed_dir: processed_dir.into(),
        }
    }

    /// Runs normalization over every raw file. Rerunning on unchanged input
    /// produces a byte-identical output file.
    #[instrument(skip(self))]
    pub fn run(&self) -> Result<ProcessReport> {
        let mut report = ProcessReport::new();
        info!("🔨 Starting normalization run {}", report.run_id);
        counter!(observability::PROCESS_RUNS_TOTAL).increment(1);
        let t_run = std::time::Instant::now();

        // Step 1: raw files in sorted order, so reruns see the same sequence.
        let files = self.raw_files()?;
        if files.is_empty() {
            warn!("No raw files found in {}", self.raw_dir.display());
            println!("   No raw files found in {}", self.raw_dir.display());
            report.finish();
            return Ok(report);
        }
        report.files_read = files.len();

        // Step 2: typed read, date parse and sentinel fill, file by file.
        let mut working = Vec::new();
        for file in &files {
            self.read_raw_file(file, &mut working, &mut report)?;
        }

        // Step 3: exact-duplicate removal, first occurrence wins.
        let deduped = dedup_rows(working, &mut report);

        // Step 4: amount coercion.
        let records = coerce_amounts(deduped, &mut report);

        // Step 5: persist the canonical table.
        let path = self.write_processed(&records)?;
        report.rows_written = records.len();
        counter!(observability::PROCESS_ROWS_WRITTEN_TOTAL).increment(records.len() as u64);
        info!("💾 Saved {} canonical rows to {}", records.len(), path);
        println!("💾 Saved {} canonical rows to {path}", records.len());
        report.output_file = Some(path);

        histogram!(observability::PROCESS_RUN_DURATION_SECONDS)
            .record(t_run.elapsed().as_secs_f64());
        report.finish();
        Ok(report)
    }

    /// CSV files under the raw directory, sorted by path. A missing
    /// directory is treated the same as an empty one.
    fn raw_files(&self) -> Result<Vec<PathBuf>> {
        if !self.raw_dir.exists() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.raw_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("csv") {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Reads one raw monthly file into working rows. A header that does not
    /// carry the full raw column set fails the whole run.
    fn read_raw_file(
        &self,
        path: &Path,
        working: &mut Vec<WorkingRow>,
        report: &mut ProcessReport,
    ) -> Result<()> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        debug!("Reading raw file {}", file_name);

        let mut reader = csv::Reader::from_path(path)?;
        let headers = reader.headers()?.clone();
        schema::validate_raw_header(&file_name, &headers)?;

        for result in reader.deserialize::<RawRow>() {
            report.rows_read += 1;
            counter!(observability::PROCESS_ROWS_READ_TOTAL).increment(1);
            let raw = match result {
                Ok(raw) => raw,
                Err(e) => {
                    debug!("Dropping unreadable row in {}: {}", file_name, e);
                    drop_row(DropReason::Malformed, report);
                    continue;
                }
            };
            match normalize_row(&raw) {
                Ok(row) => working.push(row),
                Err(reason) => drop_row(reason, report),
            }
        }
        Ok(())
    }

    /// Writes the canonical table. The header goes out even when no row
    /// survived, so downstream readers always find the contract columns.
    fn write_processed(&self, records: &[ExpenseRecord]) -> Result<String> {
        fs::create_dir_all(&self.processed_dir)?;
        let filepath = self.processed_dir.join(schema::PROCESSED_FILE_NAME);
        let mut writer = csv::Writer::from_path(&filepath)?;
        if records.is_empty() {
            writer.write_record(&schema::CANONICAL_COLUMNS)?;
        } else {
            for record in records {
                writer.serialize(record)?;
            }
        }
        writer.flush()?;
        Ok(filepath.to_string_lossy().to_string())
    }
}

fn drop_row(reason: DropReason, report: &mut ProcessReport) {
    match reason {
        DropReason::BadDate => report.rows_dropped_bad_date += 1,
        DropReason::Malformed => report.rows_dropped_malformed += 1,
        DropReason::BadAmount => report.rows_dropped_bad_amount += 1,
    }
    counter!(observability::PROCESS_ROWS_DROPPED_TOTAL, "reason" => reason.label()).increment(1);
}

/// Applies the per-row normalization steps: parse the document date, parse
/// the integer fields, fill missing categoricals with the unknown sentinel.
/// A row failing both checks counts against the date, which runs first.
fn normalize_row(raw: &RawRow) -> std::result::Result<WorkingRow, DropReason> {
    let data_documento = parse_document_date(&raw.data_documento).ok_or(DropReason::BadDate)?;
    let ano: i32 = raw.ano.trim().parse().map_err(|_| DropReason::Malformed)?;
    let mes: u32 = raw.mes.trim().parse().map_err(|_| DropReason::Malformed)?;
    let id_deputado: i64 = raw
        .id_deputado
        .trim()
        .parse()
        .map_err(|_| DropReason::Malformed)?;

    Ok(WorkingRow {
        ano,
        mes,
        tipo_despesa: fill_unknown(&raw.tipo_despesa),
        valor_documento: raw.valor_documento.clone(),
        data_documento,
        data: data_documento.date(),
        nome_deputado: fill_unknown(&raw.nome_deputado),
        partido: fill_unknown(&raw.sigla_partido),
        uf: fill_unknown(&raw.sigla_uf),
        id_deputado,
    })
}

/// Missing categorical values become the unknown sentinel.
fn fill_unknown(value: &str) -> String {
    if value.is_empty() {
        schema::SENTINEL_UNKNOWN.to_string()
    } else {
        value.to_string()
    }
}

/// Parses a document date in any accepted layout.
fn parse_document_date(raw: &str) -> Option<NaiveDateTime> {
    let value = raw.trim();
    if value.is_empty() {
        return None;
    }
    for format in &DATE_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, format) {
            return Some(parsed);
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .map(|date| date.and_time(NaiveTime::MIN))
}

/// Removes exact duplicates, keeping the first occurrence. The amount is
/// compared as source text, so differently written equal values stay apart.
fn dedup_rows(rows: Vec<WorkingRow>, report: &mut ProcessReport) -> Vec<WorkingRow> {
    let mut seen = HashSet::with_capacity(rows.len());
    let mut unique = Vec::with_capacity(rows.len());
    for row in rows {
        if seen.insert(row.clone()) {
            unique.push(row);
        } else {
            report.duplicates_removed += 1;
            counter!(observability::PROCESS_DUPLICATES_REMOVED_TOTAL).increment(1);
        }
    }
    unique
}

/// Coerces the amount text into a finite number, dropping rows that fail.
fn coerce_amounts(rows: Vec<WorkingRow>, report: &mut ProcessReport) -> Vec<ExpenseRecord> {
    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        match row.valor_documento.trim().parse::<f64>() {
            Ok(valor) if valor.is_finite() => records.push(ExpenseRecord {
                ano: row.ano,
                mes: row.mes,
                tipo_despesa: row.tipo_despesa,
                valor_documento: valor,
                data_documento: row.data_documento,
                data: row.data,
                nome_deputado: row.nome_deputado,
                partido: row.partido,
                uf: row.uf,
                id_deputado: row.id_deputado,
            }),
            _ => drop_row(DropReason::BadAmount, report),
        }
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_row() -> RawRow {
        RawRow {
            ano: "2024".to_string(),
            mes: "1".to_string(),
            tipo_despesa: "COMBUSTÍVEIS E LUBRIFICANTES.".to_string(),
            valor_documento: "150.75".to_string(),
            data_documento: "2024-01-15T00:00:00".to_string(),
            nome_deputado: "Fulano de Tal".to_string(),
            sigla_partido: "XX".to_string(),
            sigla_uf: "SP".to_string(),
            id_deputado: "204554".to_string(),
        }
    }

    #[test]
    fn document_dates_parse_in_all_accepted_layouts() {
        let expected = NaiveDate::from_ymd_opt(2024, 1, 15)
            .unwrap()
            .and_hms_opt(10, 30, 0)
            .unwrap();
        assert_eq!(parse_document_date("2024-01-15T10:30:00"), Some(expected));
        assert_eq!(
            parse_document_date("2024-01-15T10:30:00.000"),
            Some(expected)
        );
        assert_eq!(parse_document_date("2024-01-15 10:30:00"), Some(expected));
        assert_eq!(
            parse_document_date("2024-01-15"),
            Some(
                NaiveDate::from_ymd_opt(2024, 1, 15)
                    .unwrap()
                    .and_time(NaiveTime::MIN)
            )
        );
    }

    #[test]
    fn unparseable_dates_are_rejected() {
        assert_eq!(parse_document_date(""), None);
        assert_eq!(parse_document_date("  "), None);
        assert_eq!(parse_document_date("15/01/2024"), None);
        assert_eq!(parse_document_date("not-a-date"), None);
    }

    #[test]
    fn missing_categoricals_get_the_sentinel() {
        let mut raw = raw_row();
        raw.tipo_despesa = String::new();
        raw.sigla_partido = String::new();
        raw.sigla_uf = String::new();
        let row = normalize_row(&raw).unwrap();
        assert_eq!(row.tipo_despesa, schema::SENTINEL_UNKNOWN);
        assert_eq!(row.partido, schema::SENTINEL_UNKNOWN);
        assert_eq!(row.uf, schema::SENTINEL_UNKNOWN);
        assert_eq!(row.nome_deputado, "Fulano de Tal");
    }

    #[test]
    fn bad_date_wins_over_bad_integer() {
        let mut raw = raw_row();
        raw.data_documento = "junk".to_string();
        raw.ano = "also junk".to_string();
        assert_eq!(normalize_row(&raw), Err(DropReason::BadDate));

        let mut raw = raw_row();
        raw.ano = "two thousand".to_string();
        assert_eq!(normalize_row(&raw), Err(DropReason::Malformed));
    }

    #[test]
    fn amount_coercion_drops_non_finite_values() {
        let base = normalize_row(&raw_row()).unwrap();
        let mut report = ProcessReport::new();

        let mut bad_text = base.clone();
        bad_text.valor_documento = "abc".to_string();
        let mut not_finite = base.clone();
        not_finite.valor_documento = "NaN".to_string();
        let mut scientific = base.clone();
        scientific.valor_documento = "1e3".to_string();

        let records = coerce_amounts(vec![base, bad_text, not_finite, scientific], &mut report);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].valor_documento, 150.75);
        assert_eq!(records[1].valor_documento, 1000.0);
        assert_eq!(report.rows_dropped_bad_amount, 2);
    }

    #[test]
    fn dedup_keeps_first_occurrence_and_counts_removals() {
        let first = normalize_row(&raw_row()).unwrap();
        let mut different_text = first.clone();
        different_text.valor_documento = "150.750".to_string();

        let mut report = ProcessReport::new();
        let rows = vec![first.clone(), first.clone(), different_text.clone(), first.clone()];
        let unique = dedup_rows(rows, &mut report);

        assert_eq!(unique, vec![first, different_text]);
        assert_eq!(report.duplicates_removed, 2);
    }
}
