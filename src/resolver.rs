// 🏷️ Metric Resolver - first-match label resolution
// Candidates are tried in configured order; the first label with at least one
// current-period row wins the whole table. No fuzzy matching, no tie-break.

use crate::config::MetricDefinition;
use crate::statement::{FilingRow, StatementTable, StatementType};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ============================================================================
// EXTRACTED METRIC ROW
// ============================================================================

/// One resolved value: (company, reference date, metric, value, label used)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedMetric {
    pub company: String,
    pub year: i32,
    pub reference_date: NaiveDate,
    pub metric: String,
    pub value: f64,
    pub label_used: String,
    pub code: String,
}

// ============================================================================
// RESOLUTION
// ============================================================================

#[derive(Debug, Clone)]
pub struct Resolution<'a> {
    pub metric: String,
    pub statement: StatementType,
    pub year: i32,

    /// Winning candidate; None means no candidate matched (not a zero value)
    pub label_used: Option<String>,

    /// Rows of the winning candidate
    pub rows: Vec<&'a FilingRow>,

    /// Every candidate that was tried, in order, with its row count
    pub attempts: Vec<(String, usize)>,
}

impl Resolution<'_> {
    pub fn is_matched(&self) -> bool {
        self.label_used.is_some()
    }

    pub fn to_extracted(&self) -> Vec<ExtractedMetric> {
        let Some(label) = &self.label_used else {
            return Vec::new();
        };

        self.rows
            .iter()
            .map(|row| ExtractedMetric {
                company: row.company.clone(),
                year: self.year,
                reference_date: row.reference_date,
                metric: self.metric.clone(),
                value: row.value,
                label_used: label.clone(),
                code: row.code.clone(),
            })
            .collect()
    }
}

// ============================================================================
// RESOLVER
// ============================================================================

pub struct MetricResolver;

impl MetricResolver {
    /// Resolve one metric against one statement table
    ///
    /// Stops at the first candidate with a non-empty match. Later candidates
    /// are never consulted once an earlier one matched.
    pub fn resolve<'a>(
        table: &'a StatementTable,
        metric: &str,
        candidates: &[String],
    ) -> Resolution<'a> {
        let mut attempts = Vec::with_capacity(candidates.len());

        for candidate in candidates {
            let rows: Vec<&'a FilingRow> = table
                .rows
                .iter()
                .filter(|row| row.label == *candidate && row.is_current())
                .collect();

            attempts.push((candidate.clone(), rows.len()));

            if !rows.is_empty() {
                return Resolution {
                    metric: metric.to_string(),
                    statement: table.statement,
                    year: table.year,
                    label_used: Some(candidate.clone()),
                    rows,
                    attempts,
                };
            }
        }

        Resolution {
            metric: metric.to_string(),
            statement: table.statement,
            year: table.year,
            label_used: None,
            rows: Vec::new(),
            attempts,
        }
    }

    pub fn resolve_definition<'a>(
        table: &'a StatementTable,
        definition: &MetricDefinition,
    ) -> Resolution<'a> {
        Self::resolve(table, &definition.metric, &definition.labels)
    }
}

// ============================================================================
// TESTS
// ============================================================================
