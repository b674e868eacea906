//! Column contract shared by ingestion, normalization and the dashboard.
//!
//! Raw monthly files carry the upstream API field names; the processed table
//! carries the canonical names. Both sides of the rename table live here so a
//! header drift in either direction fails loudly instead of producing columns
//! full of empty cells.

use crate::error::{PipelineError, Result};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Bumped whenever the canonical column set changes.
pub const SCHEMA_VERSION: u32 = 1;

/// Placeholder for missing categorical values.
pub const SENTINEL_UNKNOWN: &str = "Desconhecido";

/// Dashboard category value that selects every expense type.
pub const CATEGORY_ALL: &str = "Todos";

/// File name for the canonical table inside the processed directory.
pub const PROCESSED_FILE_NAME: &str = "processed_deputy_expenses.csv";

/// Header of the raw monthly files, in write order.
pub const RAW_COLUMNS: [&str; 9] = [
    "ano",
    "mes",
    "tipoDespesa",
    "valorDocumento",
    "dataDocumento",
    "nomeDeputado",
    "siglaPartido",
    "siglaUf",
    "idDeputado",
];

/// Header of the processed table, in write order. `Data` is derived from
/// `DataDocumento` during normalization and has no raw counterpart.
pub const CANONICAL_COLUMNS: [&str; 10] = [
    "Ano",
    "Mes",
    "TipoDespesa",
    "ValorDocumento",
    "DataDocumento",
    "Data",
    "NomeDeputado",
    "Partido",
    "UF",
    "IDDeputado",
];

/// Raw column to canonical column mapping applied during normalization.
pub const RENAME_TABLE: [(&str, &str); 9] = [
    ("ano", "Ano"),
    ("mes", "Mes"),
    ("tipoDespesa", "TipoDespesa"),
    ("valorDocumento", "ValorDocumento"),
    ("dataDocumento", "DataDocumento"),
    ("nomeDeputado", "NomeDeputado"),
    ("siglaPartido", "Partido"),
    ("siglaUf", "UF"),
    ("idDeputado", "IDDeputado"),
];

/// One row of a raw monthly file, exactly as ingested. Everything is kept as
/// text; typing happens in the normalization stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRow {
    pub ano: String,
    pub mes: String,
    #[serde(rename = "tipoDespesa")]
    pub tipo_despesa: String,
    #[serde(rename = "valorDocumento")]
    pub valor_documento: String,
    #[serde(rename = "dataDocumento")]
    pub data_documento: String,
    #[serde(rename = "nomeDeputado")]
    pub nome_deputado: String,
    #[serde(rename = "siglaPartido")]
    pub sigla_partido: String,
    #[serde(rename = "siglaUf")]
    pub sigla_uf: String,
    #[serde(rename = "idDeputado")]
    pub id_deputado: String,
}

/// One row of the canonical table. Field order matches [`CANONICAL_COLUMNS`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpenseRecord {
    #[serde(rename = "Ano")]
    pub ano: i32,
    #[serde(rename = "Mes")]
    pub mes: u32,
    #[serde(rename = "TipoDespesa")]
    pub tipo_despesa: String,
    #[serde(rename = "ValorDocumento")]
    pub valor_documento: f64,
    #[serde(rename = "DataDocumento")]
    pub data_documento: NaiveDateTime,
    #[serde(rename = "Data")]
    pub data: NaiveDate,
    #[serde(rename = "NomeDeputado")]
    pub nome_deputado: String,
    #[serde(rename = "Partido")]
    pub partido: String,
    #[serde(rename = "UF")]
    pub uf: String,
    #[serde(rename = "IDDeputado")]
    pub id_deputado: i64,
}

/// Checks that a raw file header carries every expected raw column. Extra
/// columns are tolerated; missing ones are reported by name.
pub fn validate_raw_header(file: &str, header: &csv::StringRecord) -> Result<()> {
    let missing: Vec<String> = RAW_COLUMNS
        .iter()
        .filter(|col| !header.iter().any(|h| h == **col))
        .map(|col| col.to_string())
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(PipelineError::Schema {
            file: file.to_string(),
            missing,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rename_table_covers_every_raw_column() {
        for col in RAW_COLUMNS {
            assert!(
                RENAME_TABLE.iter().any(|(raw, _)| *raw == col),
                "raw column {} has no rename entry",
                col
            );
        }
        for (_, canonical) in RENAME_TABLE {
            assert!(CANONICAL_COLUMNS.contains(&canonical));
        }
    }

    #[test]
    fn header_validation_reports_missing_columns() {
        let header = csv::StringRecord::from(vec![
            "ano",
            "mes",
            "tipoDespesa",
            "valorDocumento",
            "dataDocumento",
            "nomeDeputado",
            "siglaPartido",
        ]);
        let err = validate_raw_header("deputy_expenses_2024_01.csv", &header).unwrap_err();
        match err {
            PipelineError::Schema { file, missing } => {
                assert_eq!(file, "deputy_expenses_2024_01.csv");
                assert_eq!(missing, vec!["siglaUf", "idDeputado"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn header_validation_tolerates_extra_columns() {
        let mut cols: Vec<&str> = RAW_COLUMNS.to_vec();
        cols.push("urlDocumento");
        let header = csv::StringRecord::from(cols);
        assert!(validate_raw_header("any.csv", &header).is_ok());
    }
}
