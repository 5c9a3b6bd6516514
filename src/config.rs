// ⚙️ Benchmark configuration - Rules as Data
// Roster, year range and metric-label mapping travel as one immutable value.

use crate::error::{PipelineError, Result};
use crate::statement::StatementType;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

// ============================================================================
// METRIC DEFINITION
// ============================================================================

/// Canonical metric mapped to an ordered list of acceptable line-item labels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDefinition {
    /// Canonical name (column in the reconciled table)
    pub metric: String,

    /// Statement that carries the line item
    pub statement: StatementType,

    /// Candidate labels, most preferred first
    pub labels: Vec<String>,
}

impl MetricDefinition {
    pub fn new(metric: &str, statement: StatementType, labels: &[&str]) -> Self {
        MetricDefinition {
            metric: metric.to_string(),
            statement,
            labels: labels.iter().map(|l| l.to_string()).collect(),
        }
    }
}

// ============================================================================
// BENCHMARK CONFIG
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchmarkConfig {
    /// Root of the unpacked DFP archives
    pub data_dir: PathBuf,

    /// Where CSV artifacts are written
    pub output_dir: PathBuf,

    /// SQLite file holding the persisted run
    pub database_path: PathBuf,

    pub first_year: i32,
    pub last_year: i32,

    /// Exact DENOM_CIA values
    pub roster: Vec<String>,

    /// ORDEM_EXERC value of the reference fiscal period
    pub current_period_marker: String,

    pub metrics: Vec<MetricDefinition>,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        BenchmarkConfig {
            data_dir: PathBuf::from("data_raw"),
            output_dir: PathBuf::from("outputs"),
            database_path: PathBuf::from("outputs/benchmark.db"),
            first_year: 2020,
            last_year: 2024,
            roster: vec![
                "ITAU UNIBANCO HOLDING S.A.".to_string(),
                "BCO BRASIL S.A.".to_string(),
                "BCO BRADESCO S.A.".to_string(),
                "BCO SANTANDER (BRASIL) S.A.".to_string(),
                "BCO BTG PACTUAL S.A.".to_string(),
            ],
            current_period_marker: "ÚLTIMO".to_string(),
            metrics: default_metrics(),
        }
    }
}

fn default_metrics() -> Vec<MetricDefinition> {
    vec![
        MetricDefinition::new("total_assets", StatementType::Bpa, &["Ativo Total"]),
        MetricDefinition::new(
            "equity",
            StatementType::Bpp,
            &["Patrimônio Líquido Consolidado", "Patrimônio Líquido"],
        ),
        MetricDefinition::new(
            "net_income",
            StatementType::Dre,
            &[
                "Lucro ou Prejuízo Líquido Consolidado do Período",
                "Lucro/Prejuízo Consolidado do Período",
                "Lucro ou Prejuízo Líquido do Período",
            ],
        ),
        MetricDefinition::new(
            "operating_result_proxy",
            StatementType::Dre,
            &[
                "Resultado Antes dos Tributos sobre o Lucro",
                "Resultado Antes dos Tributos sobre o Lucro e Participações",
                "Resultado Bruto de Intermediação Financeira",
            ],
        ),
    ]
}

impl BenchmarkConfig {
    /// Load configuration from a JSON file; absent fields keep their defaults
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        let config: BenchmarkConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn years(&self) -> RangeInclusive<i32> {
        self.first_year..=self.last_year
    }

    pub fn validate(&self) -> Result<()> {
        if self.first_year > self.last_year {
            return Err(PipelineError::InvalidConfig(format!(
                "empty year range {}..={}",
                self.first_year, self.last_year
            )));
        }

        if self.roster.is_empty() {
            return Err(PipelineError::InvalidConfig("roster is empty".to_string()));
        }

        if self.metrics.is_empty() {
            return Err(PipelineError::InvalidConfig("no metric is defined".to_string()));
        }

        let mut seen = HashSet::new();
        for definition in &self.metrics {
            if !seen.insert(definition.metric.as_str()) {
                return Err(PipelineError::InvalidConfig(format!(
                    "metric '{}' is defined twice",
                    definition.metric
                )));
            }
            if definition.labels.is_empty() {
                return Err(PipelineError::InvalidConfig(format!(
                    "metric '{}' has no candidate labels",
                    definition.metric
                )));
            }
            if definition.labels.iter().any(|l| l.trim().is_empty()) {
                return Err(PipelineError::InvalidConfig(format!(
                    "metric '{}' has a blank candidate label",
                    definition.metric
                )));
            }
        }

        Ok(())
    }

    pub fn is_in_roster(&self, company: &str) -> bool {
        self.roster.iter().any(|c| c == company)
    }

    pub fn is_current_marker(&self, value: &str) -> bool {
        value.trim().to_uppercase() == self.current_period_marker.trim().to_uppercase()
    }

    /// Definitions mapped to one statement, in config order
    pub fn metrics_for(&self, statement: StatementType) -> impl Iterator<Item = &MetricDefinition> {
        self.metrics.iter().filter(move |d| d.statement == statement)
    }

    /// Union of every candidate label registered for a statement
    pub fn candidate_labels(&self, statement: StatementType) -> HashSet<&str> {
        self.metrics_for(statement)
            .flat_map(|d| d.labels.iter().map(String::as_str))
            .collect()
    }

    pub fn metric_names(&self) -> Vec<&str> {
        self.metrics.iter().map(|d| d.metric.as_str()).collect()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = BenchmarkConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.years().count(), 5);
        assert_eq!(config.roster.len(), 5);
        assert_eq!(config.metrics_for(StatementType::Dre).count(), 2);
    }

    #[test]
    fn test_candidate_labels_union() {
        let config = BenchmarkConfig::default();
        let labels = config.candidate_labels(StatementType::Dre);

        assert_eq!(labels.len(), 6);
        assert!(labels.contains("Lucro/Prejuízo Consolidado do Período"));
        assert!(labels.contains("Resultado Bruto de Intermediação Financeira"));
        assert!(!labels.contains("Ativo Total"));
    }

    #[test]
    fn test_validate_rejects_empty_labels() {
        let mut config = BenchmarkConfig::default();
        config.metrics.push(MetricDefinition::new("broken", StatementType::Bpa, &[]));

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("broken"));
    }

    #[test]
    fn test_validate_rejects_empty_metrics() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"metrics": []}}"#).unwrap();

        let err = BenchmarkConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
        assert!(err.to_string().contains("no metric"));
    }

    #[test]
    fn test_validate_rejects_duplicate_metric() {
        let mut config = BenchmarkConfig::default();
        config
            .metrics
            .push(MetricDefinition::new("equity", StatementType::Bpp, &["PL"]));

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_current_marker_is_case_insensitive() {
        let config = BenchmarkConfig::default();
        assert!(config.is_current_marker("ÚLTIMO"));
        assert!(config.is_current_marker(" último "));
        assert!(!config.is_current_marker("PENÚLTIMO"));
    }

    #[test]
    fn test_from_file_partial_override() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"first_year": 2021, "last_year": 2022, "roster": ["BCO BRASIL S.A."]}}"#
        )
        .unwrap();

        let config = BenchmarkConfig::from_file(file.path()).unwrap();
        assert_eq!(config.years().collect::<Vec<_>>(), vec![2021, 2022]);
        assert_eq!(config.roster, vec!["BCO BRASIL S.A.".to_string()]);
        assert_eq!(config.metrics.len(), 4);

        println!("✅ Partial config override test passed");
    }
}
