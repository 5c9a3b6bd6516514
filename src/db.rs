// 🗄️ SQLite persistence of a pipeline run
// A run replaces the previous one inside a single transaction, so dashboard
// readers never see a half-written table.

use crate::aggregator::{MappingStatus, MappingUsage, PipelineOutput, ReconciledRecord, YearFailure};
use crate::error::Result;
use crate::statement::StatementType;
use crate::unmapped::{ShadowedLine, UnmappedLine};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

/// One row of `pipeline_runs`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub record_count: i64,
    pub unmapped_count: i64,
    pub failed_years: i64,
    /// Metric and YoY columns of the run, in output order
    pub columns: Vec<String>,
    pub sources: serde_json::Value,
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS reconciled_records (
            company TEXT NOT NULL,
            year INTEGER NOT NULL,
            reference_date TEXT NOT NULL,
            payload TEXT NOT NULL,
            PRIMARY KEY (company, year, reference_date)
        );

        CREATE TABLE IF NOT EXISTS unmapped_lines (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            year INTEGER NOT NULL,
            statement TEXT NOT NULL,
            company TEXT NOT NULL,
            reference_date TEXT NOT NULL,
            label TEXT NOT NULL,
            code TEXT NOT NULL,
            value REAL NOT NULL,
            grp TEXT NOT NULL,
            currency_scale TEXT NOT NULL,
            currency TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_unmapped_year_statement
            ON unmapped_lines(year, statement);

        CREATE TABLE IF NOT EXISTS mapping_usage (
            year INTEGER NOT NULL,
            metric TEXT NOT NULL,
            statement TEXT NOT NULL,
            label_used TEXT,
            status TEXT NOT NULL,
            PRIMARY KEY (year, metric)
        );

        CREATE TABLE IF NOT EXISTS shadowed_lines (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            year INTEGER NOT NULL,
            statement TEXT NOT NULL,
            metric TEXT NOT NULL,
            company TEXT NOT NULL,
            reference_date TEXT NOT NULL,
            label TEXT NOT NULL,
            code TEXT NOT NULL,
            value REAL NOT NULL,
            label_used TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS year_failures (
            year INTEGER PRIMARY KEY,
            statement TEXT,
            kind TEXT NOT NULL,
            reason TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS pipeline_runs (
            run_id TEXT PRIMARY KEY,
            started_at TEXT NOT NULL,
            finished_at TEXT NOT NULL,
            record_count INTEGER NOT NULL,
            unmapped_count INTEGER NOT NULL,
            failed_years INTEGER NOT NULL,
            columns TEXT NOT NULL,
            sources TEXT NOT NULL
        );",
    )?;

    Ok(())
}

/// Replace every table with the contents of `output` atomically
pub fn replace_run(conn: &mut Connection, output: &PipelineOutput) -> Result<()> {
    let tx = conn.transaction()?;

    tx.execute("DELETE FROM reconciled_records", [])?;
    tx.execute("DELETE FROM unmapped_lines", [])?;
    tx.execute("DELETE FROM mapping_usage", [])?;
    tx.execute("DELETE FROM shadowed_lines", [])?;
    tx.execute("DELETE FROM year_failures", [])?;

    {
        let mut stmt = tx.prepare(
            "INSERT INTO reconciled_records (company, year, reference_date, payload)
             VALUES (?1, ?2, ?3, ?4)",
        )?;
        for record in &output.records {
            stmt.execute(params![
                record.company,
                record.year,
                record.reference_date.to_string(),
                serde_json::to_string(record)?,
            ])?;
        }

        let mut stmt = tx.prepare(
            "INSERT INTO unmapped_lines
             (year, statement, company, reference_date, label, code, value, grp, currency_scale, currency)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )?;
        for line in &output.unmapped {
            stmt.execute(params![
                line.year,
                line.statement.code(),
                line.company,
                line.reference_date.to_string(),
                line.label,
                line.code,
                line.value,
                line.group,
                line.currency_scale,
                line.currency,
            ])?;
        }

        let mut stmt = tx.prepare(
            "INSERT INTO mapping_usage (year, metric, statement, label_used, status)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        for usage in &output.mapping_usage {
            stmt.execute(params![
                usage.year,
                usage.metric,
                usage.statement.code(),
                usage.label_used,
                usage.status.code(),
            ])?;
        }

        let mut stmt = tx.prepare(
            "INSERT INTO shadowed_lines
             (year, statement, metric, company, reference_date, label, code, value, label_used)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )?;
        for line in &output.shadowed {
            stmt.execute(params![
                line.year,
                line.statement.code(),
                line.metric,
                line.company,
                line.reference_date.to_string(),
                line.label,
                line.code,
                line.value,
                line.label_used,
            ])?;
        }

        let mut stmt = tx.prepare(
            "INSERT INTO year_failures (year, statement, kind, reason) VALUES (?1, ?2, ?3, ?4)",
        )?;
        for failure in &output.failures {
            stmt.execute(params![
                failure.year,
                failure.statement.map(|s| s.code()),
                failure.kind,
                failure.reason,
            ])?;
        }
    }

    let columns: Vec<&String> = output.metric_columns.iter().chain(output.yoy_columns.iter()).collect();
    tx.execute(
        "INSERT INTO pipeline_runs
         (run_id, started_at, finished_at, record_count, unmapped_count, failed_years, columns, sources)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            output.run_id,
            output.started_at.to_rfc3339(),
            output.finished_at.to_rfc3339(),
            output.records.len() as i64,
            output.unmapped.len() as i64,
            output.failures.len() as i64,
            serde_json::to_string(&columns)?,
            serde_json::to_string(&output.sources)?,
        ],
    )?;

    tx.commit()?;
    Ok(())
}

// ============================================================================
// READERS
// ============================================================================

fn parse_date(text: &str, idx: usize) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(text, "%Y-%m-%d").map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn parse_statement(text: &str, idx: usize) -> rusqlite::Result<StatementType> {
    StatementType::from_code(text).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("unknown statement '{}'", text).into(),
        )
    })
}

pub fn get_records(conn: &Connection) -> Result<Vec<ReconciledRecord>> {
    let mut stmt = conn.prepare("SELECT payload FROM reconciled_records ORDER BY company, year, reference_date")?;
    let payloads = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut records = Vec::with_capacity(payloads.len());
    for payload in payloads {
        records.push(serde_json::from_str(&payload)?);
    }
    Ok(records)
}

pub fn get_unmapped_lines(conn: &Connection) -> Result<Vec<UnmappedLine>> {
    let mut stmt = conn.prepare(
        "SELECT year, statement, company, reference_date, label, code, value, grp, currency_scale, currency
         FROM unmapped_lines ORDER BY id",
    )?;

    let lines = stmt
        .query_map([], |row| {
            Ok(UnmappedLine {
                year: row.get(0)?,
                statement: parse_statement(&row.get::<_, String>(1)?, 1)?,
                company: row.get(2)?,
                reference_date: parse_date(&row.get::<_, String>(3)?, 3)?,
                label: row.get(4)?,
                code: row.get(5)?,
                value: row.get(6)?,
                group: row.get(7)?,
                currency_scale: row.get(8)?,
                currency: row.get(9)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(lines)
}

pub fn get_mapping_usage(conn: &Connection) -> Result<Vec<MappingUsage>> {
    let mut stmt = conn.prepare(
        "SELECT year, metric, statement, label_used, status FROM mapping_usage ORDER BY year, rowid",
    )?;

    let usage = stmt
        .query_map([], |row| {
            let status: String = row.get(4)?;
            Ok(MappingUsage {
                year: row.get(0)?,
                metric: row.get(1)?,
                statement: parse_statement(&row.get::<_, String>(2)?, 2)?,
                label_used: row.get(3)?,
                status: MappingStatus::from_code(&status).ok_or_else(|| {
                    rusqlite::Error::FromSqlConversionFailure(
                        4,
                        rusqlite::types::Type::Text,
                        format!("unknown status '{}'", status).into(),
                    )
                })?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(usage)
}

pub fn get_shadowed_lines(conn: &Connection) -> Result<Vec<ShadowedLine>> {
    let mut stmt = conn.prepare(
        "SELECT year, statement, metric, company, reference_date, label, code, value, label_used
         FROM shadowed_lines ORDER BY id",
    )?;

    let lines = stmt
        .query_map([], |row| {
            Ok(ShadowedLine {
                year: row.get(0)?,
                statement: parse_statement(&row.get::<_, String>(1)?, 1)?,
                metric: row.get(2)?,
                company: row.get(3)?,
                reference_date: parse_date(&row.get::<_, String>(4)?, 4)?,
                label: row.get(5)?,
                code: row.get(6)?,
                value: row.get(7)?,
                label_used: row.get(8)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(lines)
}

pub fn get_year_failures(conn: &Connection) -> Result<Vec<YearFailure>> {
    let mut stmt = conn.prepare("SELECT year, statement, kind, reason FROM year_failures ORDER BY year")?;

    let failures = stmt
        .query_map([], |row| {
            let statement: Option<String> = row.get(1)?;
            Ok(YearFailure {
                year: row.get(0)?,
                statement: statement.as_deref().and_then(StatementType::from_code),
                kind: row.get(2)?,
                reason: row.get(3)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(failures)
}

fn parse_timestamp(text: &str, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e)))
}

pub fn get_latest_run(conn: &Connection) -> Result<Option<RunSummary>> {
    let row = conn
        .query_row(
            "SELECT run_id, started_at, finished_at, record_count, unmapped_count, failed_years, columns, sources
             FROM pipeline_runs ORDER BY finished_at DESC, rowid DESC LIMIT 1",
            [],
            |row| {
                let summary = RunSummary {
                    run_id: row.get(0)?,
                    started_at: parse_timestamp(&row.get::<_, String>(1)?, 1)?,
                    finished_at: parse_timestamp(&row.get::<_, String>(2)?, 2)?,
                    record_count: row.get(3)?,
                    unmapped_count: row.get(4)?,
                    failed_years: row.get(5)?,
                    columns: Vec::new(),
                    sources: serde_json::Value::Null,
                };
                Ok((summary, row.get::<_, String>(6)?, row.get::<_, String>(7)?))
            },
        )
        .optional()?;

    let Some((mut summary, columns, sources)) = row else {
        return Ok(None);
    };
    summary.columns = serde_json::from_str(&columns)?;
    summary.sources = serde_json::from_str(&sources)?;

    Ok(Some(summary))
}
