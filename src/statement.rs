// 📄 Statement model - DFP filing rows and tables
// One table per (statement type, year). Rows are immutable once loaded.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

// ============================================================================
// STATEMENT TYPE
// ============================================================================

/// Consolidated DFP statements used by the benchmark
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StatementType {
    /// Balanço Patrimonial Ativo
    Bpa,
    /// Balanço Patrimonial Passivo (liabilities + equity)
    Bpp,
    /// Demonstração do Resultado
    Dre,
}

impl StatementType {
    pub const ALL: [StatementType; 3] = [StatementType::Bpa, StatementType::Bpp, StatementType::Dre];

    /// Short code used in file names and audit tables
    pub fn code(&self) -> &'static str {
        match self {
            StatementType::Bpa => "BPA",
            StatementType::Bpp => "BPP",
            StatementType::Dre => "DRE",
        }
    }

    /// Human-readable name for display
    pub fn name(&self) -> &'static str {
        match self {
            StatementType::Bpa => "Asset statement",
            StatementType::Bpp => "Liability and equity statement",
            StatementType::Dre => "Income statement",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|s| s.code().eq_ignore_ascii_case(code.trim()))
    }

    /// `<data_dir>/dfp_cia_aberta_<year>/dfp_cia_aberta_<CODE>_con_<year>.csv`
    pub fn source_path(&self, data_dir: &Path, year: i32) -> PathBuf {
        data_dir
            .join(format!("dfp_cia_aberta_{}", year))
            .join(format!("dfp_cia_aberta_{}_con_{}.csv", self.code(), year))
    }
}

impl std::fmt::Display for StatementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

// ============================================================================
// FILING ROW
// ============================================================================

/// Current fiscal year vs. prior-year comparison column of the same table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Period {
    Current,
    Prior,
}

/// One line item from one statement table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilingRow {
    pub company: String,
    pub reference_date: NaiveDate,
    pub period: Period,
    pub label: String,
    pub code: String,
    pub value: f64,
    pub group: String,
    pub currency: String,
    pub currency_scale: String,
}

impl FilingRow {
    pub fn is_current(&self) -> bool {
        self.period == Period::Current
    }
}

// ============================================================================
// STATEMENT TABLE
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatementTable {
    pub statement: StatementType,
    pub year: i32,
    pub rows: Vec<FilingRow>,
}

impl StatementTable {
    pub fn new(statement: StatementType, year: i32, rows: Vec<FilingRow>) -> Self {
        StatementTable { statement, year, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Distinct companies present in the table
    pub fn companies(&self) -> BTreeSet<&str> {
        self.rows.iter().map(|row| row.company.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_path_layout() {
        let path = StatementType::Bpp.source_path(Path::new("data_raw"), 2023);
        assert_eq!(
            path,
            PathBuf::from("data_raw/dfp_cia_aberta_2023/dfp_cia_aberta_BPP_con_2023.csv")
        );
    }

    #[test]
    fn test_from_code() {
        assert_eq!(StatementType::from_code("dre"), Some(StatementType::Dre));
        assert_eq!(StatementType::from_code(" BPA "), Some(StatementType::Bpa));
        assert_eq!(StatementType::from_code("DFC"), None);
    }
}
