// 🔎 Candidate label discovery
// Offline helper: scan the unmapped residue of one statement for labels that
// look like the concept being hunted, ranked by how often they occur.

use crate::error::Result;
use crate::export::{csv_writer, write_atomically, write_unmapped};
use crate::statement::StatementType;
use crate::unmapped::UnmappedLine;
use serde::Serialize;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

pub const CANDIDATES_TOP: &str = "dre_operating_candidates_top.csv";
pub const CANDIDATES_LINES: &str = "dre_operating_candidates_lines.csv";

pub const DEFAULT_PATTERNS: [&str; 8] = [
    "resultado operacional",
    "resultado antes",
    "resultado bruto",
    "intermedia",
    "margem",
    "lucro operacional",
    "receita",
    "despesa",
];

pub const DEFAULT_TOP_N: usize = 40;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LabelFrequency {
    pub label: String,
    pub freq: usize,
}

#[derive(Debug, Clone)]
pub struct DiscoveryReport {
    pub statement: StatementType,
    /// Unmapped lines of the statement, before pattern matching
    pub scanned: usize,
    pub hits: Vec<UnmappedLine>,
    pub top: Vec<LabelFrequency>,
}

/// Lines of `statement` whose label contains any pattern (case-insensitive),
/// plus the `top_n` most frequent hit labels (ties by label)
pub fn discover_candidates(
    unmapped: &[UnmappedLine],
    statement: StatementType,
    patterns: &[&str],
    top_n: usize,
) -> DiscoveryReport {
    let patterns: Vec<String> = patterns.iter().map(|p| p.to_lowercase()).collect();

    let of_statement: Vec<&UnmappedLine> = unmapped.iter().filter(|l| l.statement == statement).collect();

    let hits: Vec<UnmappedLine> = of_statement
        .iter()
        .filter(|line| {
            let lower = line.label.to_lowercase();
            patterns.iter().any(|p| lower.contains(p.as_str()))
        })
        .map(|line| (*line).clone())
        .collect();

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for hit in &hits {
        *counts.entry(hit.label.as_str()).or_insert(0) += 1;
    }

    let mut top: Vec<LabelFrequency> = counts
        .into_iter()
        .map(|(label, freq)| LabelFrequency {
            label: label.to_string(),
            freq,
        })
        .collect();
    top.sort_by(|a, b| b.freq.cmp(&a.freq).then_with(|| a.label.cmp(&b.label)));
    top.truncate(top_n);

    DiscoveryReport {
        statement,
        scanned: of_statement.len(),
        hits,
        top,
    }
}

pub fn write_top<W: Write>(writer: W, top: &[LabelFrequency]) -> Result<()> {
    let mut wtr = csv_writer(writer);
    wtr.write_record(["label", "freq"])?;
    for entry in top {
        wtr.write_record([entry.label.clone(), entry.freq.to_string()])?;
    }
    wtr.flush()?;
    Ok(())
}

/// Write both candidate files into `output_dir`
pub fn write_report(output_dir: &Path, report: &DiscoveryReport) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(output_dir)?;

    let top_path = output_dir.join(CANDIDATES_TOP);
    write_atomically(&top_path, |f| write_top(f, &report.top))?;

    let lines_path = output_dir.join(CANDIDATES_LINES);
    write_atomically(&lines_path, |f| write_unmapped(f, &report.hits))?;

    info!(
        statement = report.statement.code(),
        hits = report.hits.len(),
        top = report.top.len(),
        "candidate report written"
    );
    Ok(vec![top_path, lines_path])
}

// ============================================================================
// TESTS
// ============================================================================
