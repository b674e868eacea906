use crate::error::Result;
use crate::schema::{self, ExpenseRecord};
use chrono::NaiveDate;
use std::path::Path;
use tracing::{info, warn};

/// The canonical expense table held in memory for the dashboard. Built once
/// from the processed file and replaced wholesale on reload.
#[derive(Debug, Default)]
pub struct ExpenseTable {
    records: Vec<ExpenseRecord>,
    date_min: Option<NaiveDate>,
    date_max: Option<NaiveDate>,
    categories: Vec<String>,
}

impl ExpenseTable {
    pub fn from_records(records: Vec<ExpenseRecord>) -> Self {
        let date_min = records.iter().map(|r| r.data).min();
        let date_max = records.iter().map(|r| r.data).max();
        let mut categories: Vec<String> =
            records.iter().map(|r| r.tipo_despesa.clone()).collect();
        categories.sort();
        categories.dedup();
        Self {
            records,
            date_min,
            date_max,
            categories,
        }
    }

    /// Loads the processed file. A missing file yields an empty table so the
    /// dashboard can come up before the pipeline has run; a present but
    /// unreadable file is an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!(
                "Processed file {} not found, starting with an empty table",
                path.display()
            );
            return Ok(Self::default());
        }
        let mut reader = csv::Reader::from_path(path)?;
        let mut records = Vec::new();
        for result in reader.deserialize::<ExpenseRecord>() {
            records.push(result?);
        }
        info!("Loaded {} expense records from {}", records.len(), path.display());
        Ok(Self::from_records(records))
    }

    pub fn records(&self) -> &[ExpenseRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn date_min(&self) -> Option<NaiveDate> {
        self.date_min
    }

    pub fn date_max(&self) -> Option<NaiveDate> {
        self.date_max
    }

    /// Distinct expense categories, sorted. The all-categories sentinel is
    /// not included; the dashboard adds it to its selector itself.
    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    pub fn schema_version(&self) -> u32 {
        schema::SCHEMA_VERSION
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn record(data: &str, tipo: &str) -> ExpenseRecord {
        let date = NaiveDate::parse_from_str(data, "%Y-%m-%d").unwrap();
        ExpenseRecord {
            ano: 2024,
            mes: 1,
            tipo_despesa: tipo.to_string(),
            valor_documento: 10.0,
            data_documento: date.and_hms_opt(0, 0, 0).unwrap(),
            data: date,
            nome_deputado: "A".to_string(),
            partido: "P".to_string(),
            uf: "SP".to_string(),
            id_deputado: 1,
        }
    }

    #[test]
    fn bounds_and_categories_follow_the_records() {
        let table = ExpenseTable::from_records(vec![
            record("2024-02-10", "Telefonia"),
            record("2024-01-05", "Combustíveis"),
            record("2024-03-01", "Telefonia"),
        ]);
        assert_eq!(table.len(), 3);
        assert_eq!(table.date_min(), NaiveDate::from_ymd_opt(2024, 1, 5));
        assert_eq!(table.date_max(), NaiveDate::from_ymd_opt(2024, 3, 1));
        assert_eq!(table.categories(), ["Combustíveis", "Telefonia"]);
    }

    #[test]
    fn empty_table_has_no_bounds() {
        let table = ExpenseTable::from_records(Vec::new());
        assert!(table.is_empty());
        assert_eq!(table.date_min(), None);
        assert_eq!(table.date_max(), None);
        assert!(table.categories().is_empty());
    }

    #[test]
    fn missing_file_loads_as_empty() {
        let table = ExpenseTable::load(Path::new("no/such/file.csv")).unwrap();
        assert!(table.is_empty());
    }
}
