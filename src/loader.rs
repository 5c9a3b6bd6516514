// 🏗️ Source Table Loader
// Reads one DFP table (statement type, year) from `;`-delimited text and keeps
// only roster companies on the current fiscal period.

use crate::config::BenchmarkConfig;
use crate::error::{PipelineError, Result};
use crate::statement::{FilingRow, Period, StatementTable, StatementType};
use chrono::NaiveDate;
use csv::{ByteRecord, ReaderBuilder};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

// ============================================================================
// SOURCE ACCESS
// ============================================================================

/// Where statement tables come from
///
/// The pipeline only needs raw bytes per (statement, year); retrieval and
/// unpacking of the archives happen elsewhere.
pub trait StatementSource {
    /// Return the origin path (for provenance) and the raw bytes of a table
    fn open(&self, statement: StatementType, year: i32) -> Result<(PathBuf, Vec<u8>)>;
}

/// Unpacked CVM archives on disk
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        DirectorySource {
            root: root.as_ref().to_path_buf(),
        }
    }
}

impl StatementSource for DirectorySource {
    fn open(&self, statement: StatementType, year: i32) -> Result<(PathBuf, Vec<u8>)> {
        let path = statement.source_path(&self.root, year);
        match fs::read(&path) {
            Ok(bytes) => Ok((path, bytes)),
            Err(e) => Err(PipelineError::SourceUnavailable {
                year,
                statement: statement.code().to_string(),
                path,
                reason: e.to_string(),
            }),
        }
    }
}

// ============================================================================
// LOADED TABLE
// ============================================================================

/// Provenance of one loaded table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceFingerprint {
    pub statement: StatementType,
    pub year: i32,
    pub path: PathBuf,
    pub sha256: String,
    pub rows_read: usize,
    pub rows_kept: usize,
}

#[derive(Debug, Clone)]
pub struct LoadedStatement {
    pub table: StatementTable,
    pub fingerprint: SourceFingerprint,
}

const REQUIRED_COLUMNS: [&str; 9] = [
    "DENOM_CIA",
    "DT_REFER",
    "ORDEM_EXERC",
    "DS_CONTA",
    "CD_CONTA",
    "VL_CONTA",
    "GRUPO_DFP",
    "MOEDA",
    "ESCALA_MOEDA",
];

/// Column positions resolved from the header row
struct Columns {
    company: usize,
    reference_date: usize,
    period: usize,
    label: usize,
    code: usize,
    value: usize,
    group: usize,
    currency: usize,
    currency_scale: usize,
}

impl Columns {
    fn from_header(header: &[String], path: &Path) -> Result<Self> {
        let find = |name: &str| -> Result<usize> {
            header
                .iter()
                .position(|h| h.trim().trim_start_matches('\u{feff}') == name)
                .ok_or_else(|| PipelineError::MalformedSource {
                    path: path.to_path_buf(),
                    line: 1,
                    reason: format!("missing column {} (found: {})", name, header.join(";")),
                })
        };

        Ok(Columns {
            company: find(REQUIRED_COLUMNS[0])?,
            reference_date: find(REQUIRED_COLUMNS[1])?,
            period: find(REQUIRED_COLUMNS[2])?,
            label: find(REQUIRED_COLUMNS[3])?,
            code: find(REQUIRED_COLUMNS[4])?,
            value: find(REQUIRED_COLUMNS[5])?,
            group: find(REQUIRED_COLUMNS[6])?,
            currency: find(REQUIRED_COLUMNS[7])?,
            currency_scale: find(REQUIRED_COLUMNS[8])?,
        })
    }
}

// ============================================================================
// LOADING
// ============================================================================

/// Load a table filtered to the roster and the current fiscal period
pub fn load_statement(
    source: &dyn StatementSource,
    config: &BenchmarkConfig,
    statement: StatementType,
    year: i32,
) -> Result<LoadedStatement> {
    let (path, bytes) = source.open(statement, year)?;

    // Other issuers' rows are skipped before their values are parsed
    let (kept, rows_read) = parse_filtered(&bytes, &path, config, |company, marker| {
        config.is_in_roster(company) && config.is_current_marker(marker)
    })?;

    debug!(
        statement = statement.code(),
        year,
        rows_read,
        rows_kept = kept.len(),
        "loaded statement table"
    );

    let fingerprint = SourceFingerprint {
        statement,
        year,
        path,
        sha256: sha256_hex(&bytes),
        rows_read,
        rows_kept: kept.len(),
    };

    Ok(LoadedStatement {
        table: StatementTable::new(statement, year, kept),
        fingerprint,
    })
}

/// Every row of a table, roster and period filters not applied
pub fn read_source(
    source: &dyn StatementSource,
    config: &BenchmarkConfig,
    statement: StatementType,
    year: i32,
) -> Result<StatementTable> {
    let (path, bytes) = source.open(statement, year)?;
    let rows = parse_rows(&bytes, &path, config)?;
    Ok(StatementTable::new(statement, year, rows))
}

/// Parse every row of a table, unfiltered
pub fn parse_rows(bytes: &[u8], path: &Path, config: &BenchmarkConfig) -> Result<Vec<FilingRow>> {
    parse_filtered(bytes, path, config, |_, _| true).map(|(rows, _)| rows)
}

/// Parse the rows `keep(company, period marker)` accepts; returns them with
/// the number of data records read
///
/// Only kept rows have DT_REFER and VL_CONTA validated.
fn parse_filtered<F>(bytes: &[u8], path: &Path, config: &BenchmarkConfig, keep: F) -> Result<(Vec<FilingRow>, usize)>
where
    F: Fn(&str, &str) -> bool,
{
    let mut reader = ReaderBuilder::new()
        .delimiter(b';')
        .has_headers(true)
        .from_reader(bytes);

    let header: Vec<String> = reader
        .byte_headers()
        .map_err(|e| malformed(path, 1, e.to_string()))?
        .iter()
        .map(decode_field)
        .collect();
    let columns = Columns::from_header(&header, path)?;

    let mut rows = Vec::new();
    let mut rows_read = 0;
    let mut record = ByteRecord::new();

    loop {
        let more = reader
            .read_byte_record(&mut record)
            .map_err(|e| malformed(path, e.position().map_or(0, |p| p.line() as usize), e.to_string()))?;
        if !more {
            break;
        }

        let line = record.position().map_or(0, |p| p.line() as usize);
        let field = |idx: usize| record.get(idx).map(decode_field).unwrap_or_default();
        rows_read += 1;

        let company = field(columns.company).trim().to_string();
        let marker = field(columns.period);
        if !keep(&company, &marker) {
            continue;
        }

        let reference_date = NaiveDate::parse_from_str(field(columns.reference_date).trim(), "%Y-%m-%d")
            .map_err(|e| malformed(path, line, format!("DT_REFER: {}", e)))?;

        let raw_value = field(columns.value);
        let value = parse_decimal(&raw_value)
            .ok_or_else(|| malformed(path, line, format!("VL_CONTA: '{}' is not a number", raw_value)))?;

        let period = if config.is_current_marker(&marker) {
            Period::Current
        } else {
            Period::Prior
        };

        rows.push(FilingRow {
            company,
            reference_date,
            period,
            label: field(columns.label).trim().to_string(),
            code: field(columns.code).trim().to_string(),
            value,
            group: field(columns.group),
            currency: field(columns.currency),
            currency_scale: field(columns.currency_scale),
        });
    }

    Ok((rows, rows_read))
}

fn malformed(path: &Path, line: usize, reason: String) -> PipelineError {
    PipelineError::MalformedSource {
        path: path.to_path_buf(),
        line,
        reason,
    }
}

/// UTF-8 when valid, otherwise Latin-1 (the CVM archives' encoding)
pub fn decode_field(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

/// Accepts `1234.56` and, when no `.` is present, `1234,56`
pub fn parse_decimal(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let normalized = if trimmed.contains('.') {
        trimmed.to_string()
    } else {
        trimmed.replace(',', ".")
    };

    normalized.parse::<f64>().ok().filter(|v| v.is_finite())
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const HEADER: &str = "CNPJ_CIA;DT_REFER;VERSAO;DENOM_CIA;CD_CVM;GRUPO_DFP;MOEDA;ESCALA_MOEDA;ORDEM_EXERC;DT_FIM_EXERC;CD_CONTA;DS_CONTA;VL_CONTA;ST_CONTA_FIXA";

    struct MemorySource {
        tables: HashMap<(StatementType, i32), Vec<u8>>,
    }

    impl StatementSource for MemorySource {
        fn open(&self, statement: StatementType, year: i32) -> Result<(PathBuf, Vec<u8>)> {
            let path = PathBuf::from(format!("mem/{}_{}.csv", statement.code(), year));
            self.tables
                .get(&(statement, year))
                .cloned()
                .map(|bytes| (path.clone(), bytes))
                .ok_or(PipelineError::SourceUnavailable {
                    year,
                    statement: statement.code().to_string(),
                    path,
                    reason: "not registered".to_string(),
                })
        }
    }

    fn line(company: &str, order: &str, code: &str, label: &str, value: &str) -> String {
        format!(
            "00.000.000/0001-91;2021-12-31;1;{};1023;DF Consolidado - Balanço Patrimonial Ativo;REAL;MIL;{};2021-12-31;{};{};{};S",
            company, order, code, label, value
        )
    }

    fn latin1(text: &str) -> Vec<u8> {
        text.chars().map(|c| c as u32 as u8).collect()
    }

    #[test]
    fn test_load_keeps_current_period_roster_rows() {
        let content = [
            HEADER.to_string(),
            line("BCO BRASIL S.A.", "ÚLTIMO", "1", "Ativo Total", "1500000.0000000000"),
            line("BCO BRASIL S.A.", "PENÚLTIMO", "1", "Ativo Total", "1200000.0000000000"),
            line("PETROBRAS S.A.", "ÚLTIMO", "1", "Ativo Total", "999.0"),
        ]
        .join("\n");

        let mut tables = HashMap::new();
        tables.insert((StatementType::Bpa, 2021), latin1(&content));
        let source = MemorySource { tables };

        let config = BenchmarkConfig::default();
        let loaded = load_statement(&source, &config, StatementType::Bpa, 2021).unwrap();

        assert_eq!(loaded.fingerprint.rows_read, 3);
        assert_eq!(loaded.table.len(), 1);
        assert_eq!(loaded.table.rows[0].value, 1_500_000.0);
        assert_eq!(loaded.table.rows[0].currency_scale, "MIL");
        assert_eq!(loaded.fingerprint.sha256.len(), 64);

        println!("✅ Loader filter test passed");
    }

    #[test]
    fn test_read_source_keeps_every_row() {
        let content = [
            HEADER.to_string(),
            line("BCO BRASIL S.A.", "ÚLTIMO", "1", "Ativo Total", "10"),
            line("BCO BRASIL S.A.", "PENÚLTIMO", "1", "Ativo Total", "9"),
            line("PETROBRAS S.A.", "ÚLTIMO", "1", "Ativo Total", "8"),
        ]
        .join("\n");

        let mut tables = HashMap::new();
        tables.insert((StatementType::Bpa, 2021), latin1(&content));
        let source = MemorySource { tables };

        let table = read_source(&source, &BenchmarkConfig::default(), StatementType::Bpa, 2021).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.rows.iter().filter(|r| r.is_current()).count(), 2);
        assert_eq!(table.companies().len(), 2);
    }

    #[test]
    fn test_malformed_row_of_other_issuer_is_skipped() {
        let content = [
            HEADER.to_string(),
            line("BCO BRASIL S.A.", "ÚLTIMO", "1", "Ativo Total", "10"),
            line("PETROBRAS S.A.", "ÚLTIMO", "1", "Ativo Total", ""),
            line("BCO BRASIL S.A.", "PENÚLTIMO", "1", "Ativo Total", "n/d"),
        ]
        .join("\n");

        let mut tables = HashMap::new();
        tables.insert((StatementType::Bpa, 2021), latin1(&content));
        let source = MemorySource { tables };
        let config = BenchmarkConfig::default();

        let loaded = load_statement(&source, &config, StatementType::Bpa, 2021).unwrap();
        assert_eq!(loaded.fingerprint.rows_read, 3);
        assert_eq!(loaded.fingerprint.rows_kept, 1);
        assert_eq!(loaded.table.rows[0].value, 10.0);

        // The unfiltered read still validates every row
        let err = read_source(&source, &config, StatementType::Bpa, 2021).unwrap_err();
        assert!(matches!(err, PipelineError::MalformedSource { line: 3, .. }));

        println!("✅ Non-roster malformed row test passed");
    }

    #[test]
    fn test_malformed_roster_row_still_fails() {
        let content = [
            HEADER.to_string(),
            line("BCO BRASIL S.A.", "ÚLTIMO", "1", "Ativo Total", ""),
        ]
        .join("\n");

        let mut tables = HashMap::new();
        tables.insert((StatementType::Bpa, 2021), latin1(&content));
        let source = MemorySource { tables };

        let err = load_statement(&source, &BenchmarkConfig::default(), StatementType::Bpa, 2021).unwrap_err();
        assert!(matches!(err, PipelineError::MalformedSource { line: 2, .. }));
    }

    #[test]
    fn test_missing_source_is_source_unavailable() {
        let source = MemorySource {
            tables: HashMap::new(),
        };
        let config = BenchmarkConfig::default();

        let err = load_statement(&source, &config, StatementType::Dre, 2020).unwrap_err();
        assert!(matches!(err, PipelineError::SourceUnavailable { year: 2020, .. }));
    }

    #[test]
    fn test_wrong_delimiter_is_malformed() {
        let content = HEADER.replace(';', ",");
        let config = BenchmarkConfig::default();

        let err = parse_rows(content.as_bytes(), Path::new("x.csv"), &config).unwrap_err();
        assert!(matches!(err, PipelineError::MalformedSource { line: 1, .. }));
    }

    #[test]
    fn test_bad_value_reports_line() {
        let content = [
            HEADER.to_string(),
            line("BCO BRASIL S.A.", "ÚLTIMO", "1", "Ativo Total", "abc"),
        ]
        .join("\n");
        let config = BenchmarkConfig::default();

        let err = parse_rows(content.as_bytes(), Path::new("x.csv"), &config).unwrap_err();
        match err {
            PipelineError::MalformedSource { line, reason, .. } => {
                assert_eq!(line, 2);
                assert!(reason.contains("VL_CONTA"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_decode_field_latin1_and_utf8() {
        assert_eq!(decode_field("Patrimônio".as_bytes()), "Patrimônio");
        assert_eq!(decode_field(&[0x50, 0x61, 0x74, 0x72, 0x69, 0x6D, 0xF4, 0x6E, 0x69, 0x6F]), "Patrimônio");
    }

    #[test]
    fn test_parse_decimal() {
        assert_eq!(parse_decimal("1500000.0000000000"), Some(1_500_000.0));
        assert_eq!(parse_decimal("-12,5"), Some(-12.5));
        assert_eq!(parse_decimal(""), None);
        assert_eq!(parse_decimal("n/a"), None);
    }
}
