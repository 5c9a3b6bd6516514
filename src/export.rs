// 💾 CSV artifacts for the dashboard
// `;`-delimited, undefined cells written empty. Each file goes to a temporary
// sibling first and is renamed into place once complete.

use crate::aggregator::PipelineOutput;
use crate::derived;
use crate::error::Result;
use crate::unmapped::{ShadowedLine, UnmappedLine};
use csv::WriterBuilder;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

pub const FINAL_DATASET: &str = "final_dataset.csv";
pub const UNMAPPED_LINES: &str = "unmapped_lines_all_years.csv";
pub const MAPPING_USAGE: &str = "mapping_usage.csv";
pub const SHADOWED_LINES: &str = "shadowed_lines.csv";
pub const YEAR_FAILURES: &str = "year_failures.csv";

/// Rendered in place of an absent label
pub const NONE_MARKER: &str = "<none>";

fn cell(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

pub(crate) fn csv_writer<W: Write>(writer: W) -> csv::Writer<W> {
    WriterBuilder::new().delimiter(b';').from_writer(writer)
}

/// Column order of the reconciled table
pub fn final_dataset_header(output: &PipelineOutput) -> Vec<String> {
    let mut header = vec!["company".to_string(), "year".to_string(), "reference_date".to_string()];
    header.extend(output.metric_columns.iter().cloned());
    for column in [derived::TOTAL_LIABILITIES, derived::ROE, derived::ROA, derived::OPERATING_ROA] {
        if !header.iter().any(|h| h == column) {
            header.push(column.to_string());
        }
    }
    header.extend(output.yoy_columns.iter().cloned());
    header
}

pub fn write_final_dataset<W: Write>(writer: W, output: &PipelineOutput) -> Result<()> {
    let mut wtr = csv_writer(writer);
    let header = final_dataset_header(output);
    wtr.write_record(&header)?;

    for record in &output.records {
        let mut row = vec![
            record.company.clone(),
            record.year.to_string(),
            record.reference_date.to_string(),
        ];
        row.extend(header[3..].iter().map(|column| cell(record.column(column))));
        wtr.write_record(&row)?;
    }

    wtr.flush()?;
    Ok(())
}

pub fn write_unmapped<W: Write>(writer: W, lines: &[UnmappedLine]) -> Result<()> {
    let mut wtr = csv_writer(writer);
    wtr.write_record([
        "year",
        "statement",
        "company",
        "reference_date",
        "label",
        "code",
        "value",
        "group",
        "currency_scale",
        "currency",
    ])?;

    for line in lines {
        wtr.write_record([
            line.year.to_string(),
            line.statement.code().to_string(),
            line.company.clone(),
            line.reference_date.to_string(),
            line.label.clone(),
            line.code.clone(),
            line.value.to_string(),
            line.group.clone(),
            line.currency_scale.clone(),
            line.currency.clone(),
        ])?;
    }

    wtr.flush()?;
    Ok(())
}

pub fn write_mapping_usage<W: Write>(writer: W, output: &PipelineOutput) -> Result<()> {
    let mut wtr = csv_writer(writer);
    wtr.write_record(["year", "metric", "statement", "label_used", "status"])?;

    for usage in &output.mapping_usage {
        wtr.write_record([
            usage.year.to_string(),
            usage.metric.clone(),
            usage.statement.code().to_string(),
            usage.label_used.clone().unwrap_or_else(|| NONE_MARKER.to_string()),
            usage.status.code().to_string(),
        ])?;
    }

    wtr.flush()?;
    Ok(())
}

pub fn write_shadowed<W: Write>(writer: W, lines: &[ShadowedLine]) -> Result<()> {
    let mut wtr = csv_writer(writer);
    wtr.write_record([
        "year",
        "statement",
        "metric",
        "company",
        "reference_date",
        "label",
        "code",
        "value",
        "label_used",
    ])?;

    for line in lines {
        wtr.write_record([
            line.year.to_string(),
            line.statement.code().to_string(),
            line.metric.clone(),
            line.company.clone(),
            line.reference_date.to_string(),
            line.label.clone(),
            line.code.clone(),
            line.value.to_string(),
            line.label_used.clone(),
        ])?;
    }

    wtr.flush()?;
    Ok(())
}

pub fn write_failures<W: Write>(writer: W, output: &PipelineOutput) -> Result<()> {
    let mut wtr = csv_writer(writer);
    wtr.write_record(["year", "statement", "kind", "reason"])?;

    for failure in &output.failures {
        wtr.write_record([
            failure.year.to_string(),
            failure.statement.map(|s| s.code().to_string()).unwrap_or_default(),
            failure.kind.clone(),
            failure.reason.clone(),
        ])?;
    }

    wtr.flush()?;
    Ok(())
}

/// Write into `<path>.tmp`, then rename over `path`
pub(crate) fn write_atomically<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(fs::File) -> Result<()>,
{
    let tmp = path.with_extension("csv.tmp");
    write(fs::File::create(&tmp)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Write every artifact into `output_dir`
pub fn write_artifacts(output_dir: &Path, output: &PipelineOutput) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(output_dir)?;

    let final_path = output_dir.join(FINAL_DATASET);
    write_atomically(&final_path, |f| write_final_dataset(f, output))?;

    let unmapped_path = output_dir.join(UNMAPPED_LINES);
    write_atomically(&unmapped_path, |f| write_unmapped(f, &output.unmapped))?;

    let usage_path = output_dir.join(MAPPING_USAGE);
    write_atomically(&usage_path, |f| write_mapping_usage(f, output))?;

    let shadowed_path = output_dir.join(SHADOWED_LINES);
    write_atomically(&shadowed_path, |f| write_shadowed(f, &output.shadowed))?;

    let failures_path = output_dir.join(YEAR_FAILURES);
    write_atomically(&failures_path, |f| write_failures(f, output))?;

    info!(dir = %output_dir.display(), run_id = %output.run_id, "artifacts written");
    Ok(vec![final_path, unmapped_path, usage_path, shadowed_path, failures_path])
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::{MappingStatus, MappingUsage, ReconciledRecord, YearFailure};
    use crate::derived::DerivedMetrics;
    use crate::statement::StatementType;
    use chrono::{NaiveDate, Utc};
    use std::collections::BTreeMap;

    fn sample_output() -> PipelineOutput {
        let mut yoy = BTreeMap::new();
        yoy.insert("total_assets_yoy".to_string(), None);
        yoy.insert("total_liabilities_yoy".to_string(), None);

        let mut values = BTreeMap::new();
        values.insert("total_assets".to_string(), 100.0);

        PipelineOutput {
            run_id: "run-1".to_string(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            extracted: vec![],
            records: vec![ReconciledRecord {
                company: "BCO BRASIL S.A.".to_string(),
                year: 2021,
                reference_date: NaiveDate::from_ymd_opt(2021, 12, 31).unwrap(),
                values,
                derived: DerivedMetrics {
                    yoy,
                    ..DerivedMetrics::default()
                },
            }],
            mapping_usage: vec![MappingUsage {
                year: 2021,
                metric: "equity".to_string(),
                statement: StatementType::Bpp,
                label_used: None,
                status: MappingStatus::NoCandidateMatched,
            }],
            unmapped: vec![],
            shadowed: vec![ShadowedLine {
                year: 2021,
                statement: StatementType::Bpp,
                metric: "equity".to_string(),
                company: "BCO BRASIL S.A.".to_string(),
                reference_date: NaiveDate::from_ymd_opt(2021, 12, 31).unwrap(),
                label: "Patrimônio Líquido".to_string(),
                code: "2.08".to_string(),
                value: 120.0,
                label_used: "Patrimônio Líquido Consolidado".to_string(),
            }],
            failures: vec![YearFailure {
                year: 2020,
                statement: Some(StatementType::Dre),
                kind: "SourceUnavailable".to_string(),
                reason: "missing".to_string(),
            }],
            sources: vec![],
            metric_columns: vec!["total_assets".to_string(), "equity".to_string()],
            yoy_columns: vec!["total_assets_yoy".to_string(), "total_liabilities_yoy".to_string()],
        }
    }

    #[test]
    fn test_final_dataset_undefined_cells_are_empty() {
        let mut buf = Vec::new();
        write_final_dataset(&mut buf, &sample_output()).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(
            lines[0],
            "company;year;reference_date;total_assets;equity;total_liabilities;ROE;ROA;operating_ROA;total_assets_yoy;total_liabilities_yoy"
        );
        assert_eq!(lines[1], "BCO BRASIL S.A.;2021;2021-12-31;100;;;;;;;");

        println!("✅ Final dataset export test passed");
    }

    #[test]
    fn test_mapping_usage_marks_absent_label() {
        let mut buf = Vec::new();
        write_mapping_usage(&mut buf, &sample_output()).unwrap();
        let text = String::from_utf8(buf).unwrap();

        assert!(text.contains("2021;equity;BPP;<none>;no_candidate_matched"));
    }

    #[test]
    fn test_write_artifacts_replaces_files() {
        let dir = tempfile::tempdir().unwrap();
        let paths = write_artifacts(dir.path(), &sample_output()).unwrap();

        assert_eq!(paths.len(), 5);
        for path in &paths {
            assert!(path.exists());
            assert!(!path.with_extension("csv.tmp").exists());
        }

        let failures = fs::read_to_string(dir.path().join(YEAR_FAILURES)).unwrap();
        assert!(failures.contains("2020;DRE;SourceUnavailable;missing"));

        let shadowed = fs::read_to_string(dir.path().join(SHADOWED_LINES)).unwrap();
        assert!(shadowed.contains(
            "2021;BPP;equity;BCO BRASIL S.A.;2021-12-31;Patrimônio Líquido;2.08;120;Patrimônio Líquido Consolidado"
        ));
    }
}
