// 📊 Dashboard view model
// Filtering, formatting and ranking shared by the terminal UI and the API.
// Undefined values always render as "-", never as zero.

use crate::aggregator::ReconciledRecord;
use crate::derived;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub const UNDEFINED_MARKER: &str = "-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetricKind {
    Money,
    Ratio,
}

/// A selectable dashboard metric: display label -> record column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DashboardMetric {
    pub label: &'static str,
    pub column: &'static str,
    pub kind: MetricKind,
}

pub const DASHBOARD_METRICS: [DashboardMetric; 8] = [
    DashboardMetric { label: "Ativo Total", column: derived::TOTAL_ASSETS, kind: MetricKind::Money },
    DashboardMetric { label: "Passivo Total (derivado)", column: derived::TOTAL_LIABILITIES, kind: MetricKind::Money },
    DashboardMetric { label: "Patrimônio Líquido", column: derived::EQUITY, kind: MetricKind::Money },
    DashboardMetric { label: "Lucro Líquido", column: derived::NET_INCOME, kind: MetricKind::Money },
    DashboardMetric { label: "ROE", column: derived::ROE, kind: MetricKind::Ratio },
    DashboardMetric { label: "ROA", column: derived::ROA, kind: MetricKind::Ratio },
    DashboardMetric { label: "Resultado Operacional (proxy)", column: derived::OPERATING_RESULT_PROXY, kind: MetricKind::Money },
    DashboardMetric { label: "ROA Operacional", column: derived::OPERATING_ROA, kind: MetricKind::Ratio },
];

impl DashboardMetric {
    pub fn by_column(column: &str) -> Option<DashboardMetric> {
        DASHBOARD_METRICS.iter().copied().find(|m| m.column == column)
    }

    pub fn format(&self, value: Option<f64>) -> String {
        match self.kind {
            MetricKind::Money => format_brl(value),
            MetricKind::Ratio => format_pct(value),
        }
    }
}

// ============================================================================
// FORMATTING
// ============================================================================

/// `R$ 1.234.567,89`; undefined -> `-`
pub fn format_brl(value: Option<f64>) -> String {
    let Some(v) = value.filter(|v| v.is_finite()) else {
        return UNDEFINED_MARKER.to_string();
    };

    let formatted = format!("{:.2}", v.abs());
    let (int_part, dec_part) = formatted.split_once('.').unwrap_or((&formatted, "00"));

    let mut grouped = String::new();
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(ch);
    }

    let sign = if v < 0.0 && formatted != "0.00" { "-" } else { "" };
    format!("R$ {}{},{}", sign, grouped, dec_part)
}

/// `12.34%`; undefined -> `-`
pub fn format_pct(value: Option<f64>) -> String {
    match value.filter(|v| v.is_finite()) {
        Some(v) => format!("{:.2}%", v * 100.0),
        None => UNDEFINED_MARKER.to_string(),
    }
}

// ============================================================================
// FILTERING
// ============================================================================

/// Empty set = no restriction
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub banks: BTreeSet<String>,
    pub years: BTreeSet<i32>,
}

impl Filter {
    pub fn matches(&self, record: &ReconciledRecord) -> bool {
        (self.banks.is_empty() || self.banks.contains(&record.company))
            && (self.years.is_empty() || self.years.contains(&record.year))
    }

    pub fn is_empty(&self) -> bool {
        self.banks.is_empty() && self.years.is_empty()
    }
}

pub fn apply_filter<'a>(records: &'a [ReconciledRecord], filter: &Filter) -> Vec<&'a ReconciledRecord> {
    let mut filtered: Vec<&ReconciledRecord> = records.iter().filter(|r| filter.matches(r)).collect();
    filtered.sort_by(|a, b| a.company.cmp(&b.company).then(a.year.cmp(&b.year)));
    filtered
}

pub fn banks(records: &[ReconciledRecord]) -> Vec<String> {
    let set: BTreeSet<&str> = records.iter().map(|r| r.company.as_str()).collect();
    set.into_iter().map(String::from).collect()
}

pub fn years(records: &[ReconciledRecord]) -> Vec<i32> {
    let set: BTreeSet<i32> = records.iter().map(|r| r.year).collect();
    set.into_iter().collect()
}

// ============================================================================
// RANKING
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankingEntry {
    pub rank: usize,
    pub company: String,
    pub value: Option<f64>,
    pub display: String,
}

/// Rank companies for one year by metric, highest first; undefined last
pub fn ranking(records: &[&ReconciledRecord], metric: &DashboardMetric, year: i32) -> Vec<RankingEntry> {
    let mut rows: Vec<(&str, Option<f64>)> = records
        .iter()
        .filter(|r| r.year == year)
        .map(|r| (r.company.as_str(), r.column(metric.column)))
        .collect();

    rows.sort_by(|a, b| match (a.1, b.1) {
        (Some(x), Some(y)) => y.total_cmp(&x).then(a.0.cmp(b.0)),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a.0.cmp(b.0),
    });

    rows.into_iter()
        .enumerate()
        .map(|(i, (company, value))| RankingEntry {
            rank: i + 1,
            company: company.to_string(),
            value,
            display: metric.format(value),
        })
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::derived::DerivedMetrics;
    use chrono::NaiveDate;
    use std::collections::BTreeMap;

    fn record(company: &str, year: i32, assets: Option<f64>, roe: Option<f64>) -> ReconciledRecord {
        let mut values = BTreeMap::new();
        if let Some(a) = assets {
            values.insert("total_assets".to_string(), a);
        }
        ReconciledRecord {
            company: company.to_string(),
            year,
            reference_date: NaiveDate::from_ymd_opt(year, 12, 31).unwrap(),
            values,
            derived: DerivedMetrics {
                roe,
                ..DerivedMetrics::default()
            },
        }
    }

    #[test]
    fn test_format_brl() {
        assert_eq!(format_brl(Some(1_234_567.891)), "R$ 1.234.567,89");
        assert_eq!(format_brl(Some(999.5)), "R$ 999,50");
        assert_eq!(format_brl(Some(-1000.0)), "R$ -1.000,00");
        assert_eq!(format_brl(Some(0.0)), "R$ 0,00");
        assert_eq!(format_brl(None), "-");
        assert_eq!(format_brl(Some(f64::NAN)), "-");
    }

    #[test]
    fn test_format_pct() {
        assert_eq!(format_pct(Some(0.1234)), "12.34%");
        assert_eq!(format_pct(Some(-0.05)), "-5.00%");
        assert_eq!(format_pct(None), "-");
    }

    #[test]
    fn test_filter_by_bank_and_year() {
        let records = vec![
            record("BCO BRASIL S.A.", 2021, Some(1.0), None),
            record("BCO BRASIL S.A.", 2022, Some(2.0), None),
            record("BCO BRADESCO S.A.", 2022, Some(3.0), None),
        ];

        let mut filter = Filter::default();
        assert_eq!(apply_filter(&records, &filter).len(), 3);

        filter.years.insert(2022);
        let filtered = apply_filter(&records, &filter);
        assert_eq!(filtered.len(), 2);
        assert_eq!(filtered[0].company, "BCO BRADESCO S.A.");

        filter.banks.insert("BCO BRASIL S.A.".to_string());
        assert_eq!(apply_filter(&records, &filter).len(), 1);

        assert_eq!(banks(&records), vec!["BCO BRADESCO S.A.".to_string(), "BCO BRASIL S.A.".to_string()]);
        assert_eq!(years(&records), vec![2021, 2022]);
    }

    #[test]
    fn test_ranking_puts_undefined_last() {
        let records = vec![
            record("BCO BRASIL S.A.", 2023, None, Some(0.10)),
            record("BCO BRADESCO S.A.", 2023, None, None),
            record("ITAU UNIBANCO HOLDING S.A.", 2023, None, Some(0.20)),
            record("ITAU UNIBANCO HOLDING S.A.", 2022, None, Some(0.99)),
        ];
        let refs: Vec<&ReconciledRecord> = records.iter().collect();
        let roe = DashboardMetric::by_column("ROE").unwrap();

        let ranked = ranking(&refs, &roe, 2023);

        assert_eq!(ranked.len(), 3);
        assert_eq!(ranked[0].company, "ITAU UNIBANCO HOLDING S.A.");
        assert_eq!(ranked[0].display, "20.00%");
        assert_eq!(ranked[1].company, "BCO BRASIL S.A.");
        assert_eq!(ranked[2].company, "BCO BRADESCO S.A.");
        assert_eq!(ranked[2].display, "-");
        assert_eq!(ranked[2].rank, 3);

        println!("✅ Ranking test passed");
    }
}
