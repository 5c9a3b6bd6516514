// 🔍 Unmapped Line Collector
// Every roster/current-period row whose label no metric definition registered
// for that statement. This is the residue reviewed to discover new mappings.
// Rows carrying a registered label that lost to an earlier candidate are kept
// apart as shadowed lines, so no filtered row leaves the run without a trace.

use crate::resolver::Resolution;
use crate::statement::{FilingRow, StatementTable, StatementType};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// A filing row no metric definition claimed, tagged for audit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnmappedLine {
    pub year: i32,
    pub statement: StatementType,
    pub company: String,
    pub reference_date: NaiveDate,
    pub label: String,
    pub code: String,
    pub value: f64,
    pub group: String,
    pub currency_scale: String,
    pub currency: String,
}

impl UnmappedLine {
    fn from_row(table: &StatementTable, row: &FilingRow) -> Self {
        UnmappedLine {
            year: table.year,
            statement: table.statement,
            company: row.company.clone(),
            reference_date: row.reference_date,
            label: row.label.clone(),
            code: row.code.clone(),
            value: row.value,
            group: row.group.clone(),
            currency_scale: row.currency_scale.clone(),
            currency: row.currency.clone(),
        }
    }
}

/// Rows of an already-filtered table whose label is outside `consumed`
///
/// `consumed` must be the union of ALL candidate labels registered for the
/// statement, tried or matched, so that an alternate label of an already
/// resolved metric is not reported. Unregistered labels always appear.
pub fn collect_unmapped(table: &StatementTable, consumed: &HashSet<&str>) -> Vec<UnmappedLine> {
    table
        .rows
        .iter()
        .filter(|row| !consumed.contains(row.label.as_str()))
        .map(|row| UnmappedLine::from_row(table, row))
        .collect()
}

/// Complement of `collect_unmapped`: rows claimed by some registered label
pub fn claimed_rows<'a>(table: &'a StatementTable, consumed: &HashSet<&str>) -> Vec<&'a FilingRow> {
    table
        .rows
        .iter()
        .filter(|row| consumed.contains(row.label.as_str()))
        .collect()
}

// ============================================================================
// SHADOWED LINES
// ============================================================================

/// A row whose label is a registered candidate of `metric`, not selected
/// because an earlier candidate matched the table first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShadowedLine {
    pub year: i32,
    pub statement: StatementType,
    pub metric: String,
    pub company: String,
    pub reference_date: NaiveDate,
    pub label: String,
    pub code: String,
    pub value: f64,
    /// Candidate that won the table
    pub label_used: String,
}

/// Rows of `table` carrying a later candidate of a resolved metric
///
/// Empty when the metric matched nothing: then no candidate label has a row.
pub fn collect_shadowed(
    table: &StatementTable,
    resolution: &Resolution<'_>,
    candidates: &[String],
) -> Vec<ShadowedLine> {
    let Some(label_used) = &resolution.label_used else {
        return Vec::new();
    };

    table
        .rows
        .iter()
        .filter(|row| row.is_current() && row.label != *label_used)
        .filter(|row| candidates.iter().any(|c| *c == row.label))
        .map(|row| ShadowedLine {
            year: table.year,
            statement: table.statement,
            metric: resolution.metric.clone(),
            company: row.company.clone(),
            reference_date: row.reference_date,
            label: row.label.clone(),
            code: row.code.clone(),
            value: row.value,
            label_used: label_used.clone(),
        })
        .collect()
}

/// Unmapped line counts per (year, statement)
pub fn summarize(lines: &[UnmappedLine]) -> BTreeMap<(i32, StatementType), usize> {
    let mut counts = BTreeMap::new();
    for line in lines {
        *counts.entry((line.year, line.statement)).or_insert(0) += 1;
    }
    counts
}

// ============================================================================
// TESTS
// ============================================================================
