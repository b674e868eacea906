use crate::schema::{ExpenseRecord, CATEGORY_ALL};
use crate::table::ExpenseTable;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Fixed bin count for the amount distribution chart.
pub const HISTOGRAM_BINS: usize = 50;

/// How many deputies the ranking keeps.
pub const TOP_DEPUTIES: usize = 10;

/// Filter state sent by the dashboard. Date bounds are inclusive on both
/// ends and compare the calendar date of each record.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExpenseFilter {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    /// Selected categories. Absent means no category filtering; a selection
    /// carrying the all-categories sentinel behaves the same; an empty
    /// selection keeps nothing.
    #[serde(default)]
    pub categories: Option<Vec<String>>,
}

impl ExpenseFilter {
    pub fn matches(&self, record: &ExpenseRecord) -> bool {
        if let Some(start) = self.start_date {
            if record.data < start {
                return false;
            }
        }
        if let Some(end) = self.end_date {
            if record.data > end {
                return false;
            }
        }
        self.category_allows(&record.tipo_despesa)
    }

    fn category_allows(&self, category: &str) -> bool {
        match &self.categories {
            None => true,
            Some(selected) => {
                selected.iter().any(|c| c == CATEGORY_ALL)
                    || selected.iter().any(|c| c == category)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupTotal {
    pub key: String,
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistogramBin {
    pub start: f64,
    pub end: f64,
    pub count: u64,
}

/// The five aggregations the dashboard charts, all computed from the same
/// filtered subset.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardSummary {
    pub filtered_rows: usize,
    pub total_amount: f64,
    pub by_category: Vec<GroupTotal>,
    pub top_deputies: Vec<GroupTotal>,
    pub by_month: Vec<GroupTotal>,
    pub by_state: Vec<GroupTotal>,
    pub amount_histogram: Vec<HistogramBin>,
}

pub fn summarize(table: &ExpenseTable, filter: &ExpenseFilter) -> DashboardSummary {
    let subset: Vec<&ExpenseRecord> = table
        .records()
        .iter()
        .filter(|r| filter.matches(r))
        .collect();

    let mut by_category = group_totals(&subset, |r| r.tipo_despesa.clone());
    by_category.sort_by(|a, b| a.key.cmp(&b.key));

    let mut by_state = group_totals(&subset, |r| r.uf.clone());
    by_state.sort_by(|a, b| a.key.cmp(&b.key));

    // Month keys are zero padded, so lexicographic order is chronological.
    let mut by_month = group_totals(&subset, |r| r.data.format("%Y-%m").to_string());
    by_month.sort_by(|a, b| a.key.cmp(&b.key));

    // Stable sort keeps first-seen order between deputies with equal totals.
    let mut top_deputies = group_totals(&subset, |r| r.nome_deputado.clone());
    top_deputies.sort_by(|a, b| {
        b.total
            .partial_cmp(&a.total)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    top_deputies.truncate(TOP_DEPUTIES);

    DashboardSummary {
        filtered_rows: subset.len(),
        total_amount: subset.iter().map(|r| r.valor_documento).sum(),
        by_category,
        top_deputies,
        by_month,
        by_state,
        amount_histogram: amount_histogram(&subset),
    }
}

/// Sums amounts per key, keeping first-seen key order so callers choose
/// their own final ordering.
fn group_totals(
    records: &[&ExpenseRecord],
    key_fn: impl Fn(&ExpenseRecord) -> String,
) -> Vec<GroupTotal> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut totals: Vec<GroupTotal> = Vec::new();
    for record in records {
        let key = key_fn(record);
        match index.get(&key) {
            Some(&i) => totals[i].total += record.valor_documento,
            None => {
                index.insert(key.clone(), totals.len());
                totals.push(GroupTotal {
                    key,
                    total: record.valor_documento,
                });
            }
        }
    }
    totals
}

/// Frequency distribution of the amounts over equal-width bins. When every
/// amount is the same the range collapses to a single bin.
fn amount_histogram(records: &[&ExpenseRecord]) -> Vec<HistogramBin> {
    if records.is_empty() {
        return Vec::new();
    }
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for record in records {
        min = min.min(record.valor_documento);
        max = max.max(record.valor_documento);
    }
    if max <= min {
        return vec![HistogramBin {
            start: min,
            end: max,
            count: records.len() as u64,
        }];
    }

    let width = (max - min) / HISTOGRAM_BINS as f64;
    let mut counts = vec![0u64; HISTOGRAM_BINS];
    for record in records {
        let mut bin = ((record.valor_documento - min) / width) as usize;
        if bin >= HISTOGRAM_BINS {
            // the maximum lands in the last bin
            bin = HISTOGRAM_BINS - 1;
        }
        counts[bin] += 1;
    }

    counts
        .into_iter()
        .enumerate()
        .map(|(i, count)| {
            let start = min + width * i as f64;
            let end = if i + 1 == HISTOGRAM_BINS {
                max
            } else {
                min + width * (i + 1) as f64
            };
            HistogramBin { start, end, count }
        })
        .collect()
}
