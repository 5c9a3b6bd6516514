// ⚖️ Derived Metrics Calculator
// residual liability = total assets - equity, plus ROE / ROA / operating ROA
// and year-over-year change per company per metric.
//
// Undefined is None everywhere: a missing or zero denominator never becomes
// zero, infinity or a panic.

use crate::aggregator::ReconciledRecord;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

pub const TOTAL_ASSETS: &str = "total_assets";
pub const EQUITY: &str = "equity";
pub const NET_INCOME: &str = "net_income";
pub const OPERATING_RESULT_PROXY: &str = "operating_result_proxy";
pub const TOTAL_LIABILITIES: &str = "total_liabilities";
pub const ROE: &str = "ROE";
pub const ROA: &str = "ROA";
pub const OPERATING_ROA: &str = "operating_ROA";
pub const YOY_SUFFIX: &str = "_yoy";

// ============================================================================
// DERIVED METRICS
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DerivedMetrics {
    pub total_liabilities: Option<f64>,
    pub roe: Option<f64>,
    pub roa: Option<f64>,
    pub operating_roa: Option<f64>,

    /// `<metric>_yoy` -> change vs. the company's previous observed year
    pub yoy: BTreeMap<String, Option<f64>>,
}

/// numerator / denominator, undefined on missing input or zero denominator
pub fn ratio(numerator: Option<f64>, denominator: Option<f64>) -> Option<f64> {
    let (n, d) = (numerator?, denominator?);
    if d == 0.0 {
        return None;
    }
    Some(n / d).filter(|v| v.is_finite())
}

/// (current - previous) / previous
pub fn pct_change(current: Option<f64>, previous: Option<f64>) -> Option<f64> {
    let (c, p) = (current?, previous?);
    ratio(Some(c - p), Some(p))
}

pub fn yoy_column(metric: &str) -> String {
    format!("{}{}", metric, YOY_SUFFIX)
}

// ============================================================================
// CALCULATOR
// ============================================================================

pub struct DerivedMetricsCalculator {
    /// Metrics that get a YoY column, in output order
    base_metrics: Vec<String>,
}

impl DerivedMetricsCalculator {
    /// `metrics` are the configured metric names; total_liabilities is appended
    pub fn new(metrics: &[&str]) -> Self {
        let mut base_metrics: Vec<String> = metrics.iter().map(|m| m.to_string()).collect();
        if !base_metrics.iter().any(|m| m == TOTAL_LIABILITIES) {
            base_metrics.push(TOTAL_LIABILITIES.to_string());
        }
        DerivedMetricsCalculator { base_metrics }
    }

    pub fn base_metrics(&self) -> &[String] {
        &self.base_metrics
    }

    pub fn yoy_columns(&self) -> Vec<String> {
        self.base_metrics.iter().map(|m| yoy_column(m)).collect()
    }

    /// Per-row residual and ratios (no cross-row dependency)
    pub fn compute_row(record: &ReconciledRecord) -> DerivedMetrics {
        let assets = record.value(TOTAL_ASSETS);
        let equity = record.value(EQUITY);
        let net_income = record.value(NET_INCOME);
        let operating = record.value(OPERATING_RESULT_PROXY);

        let total_liabilities = match (assets, equity) {
            (Some(a), Some(e)) => Some(a - e),
            _ => None,
        };

        DerivedMetrics {
            total_liabilities,
            roe: ratio(net_income, equity),
            roa: ratio(net_income, assets),
            operating_roa: ratio(operating, assets),
            yoy: BTreeMap::new(),
        }
    }

    /// Fill `derived` on every record, ratios first then YoY
    pub fn apply(&self, records: &mut [ReconciledRecord]) {
        for record in records.iter_mut() {
            record.derived = Self::compute_row(record);
        }

        // Company -> indices in year-ascending order
        let mut by_company: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, record) in records.iter().enumerate() {
            by_company.entry(record.company.clone()).or_default().push(idx);
        }

        for indices in by_company.values_mut() {
            indices.sort_by_key(|&i| (records[i].year, records[i].reference_date));

            let mut previous: Option<usize> = None;
            for &idx in indices.iter() {
                let mut yoy = BTreeMap::new();
                for metric in &self.base_metrics {
                    // First observed year has no YoY; gaps use the prior observed row
                    let change = previous.and_then(|p| {
                        pct_change(records[idx].column(metric), records[p].column(metric))
                    });
                    yoy.insert(yoy_column(metric), change);
                }
                records[idx].derived.yoy = yoy;
                previous = Some(idx);
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn record(company: &str, year: i32, values: &[(&str, f64)]) -> ReconciledRecord {
        ReconciledRecord {
            company: company.to_string(),
            year,
            reference_date: NaiveDate::from_ymd_opt(year, 12, 31).unwrap(),
            values: values.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            derived: DerivedMetrics::default(),
        }
    }

    fn calculator() -> DerivedMetricsCalculator {
        DerivedMetricsCalculator::new(&[TOTAL_ASSETS, EQUITY, NET_INCOME, OPERATING_RESULT_PROXY])
    }

    #[test]
    fn test_residual_and_ratios() {
        let mut records = vec![record(
            "BCO BRASIL S.A.",
            2023,
            &[
                (TOTAL_ASSETS, 2000.0),
                (EQUITY, 200.0),
                (NET_INCOME, 30.0),
                (OPERATING_RESULT_PROXY, 50.0),
            ],
        )];

        calculator().apply(&mut records);
        let derived = &records[0].derived;

        assert_eq!(derived.total_liabilities, Some(1800.0));
        assert_eq!(derived.roe, Some(0.15));
        assert_eq!(derived.roa, Some(0.015));
        assert_eq!(derived.operating_roa, Some(0.025));

        println!("✅ Residual and ratio test passed");
    }

    #[test]
    fn test_zero_equity_is_undefined_not_infinite() {
        let mut records = vec![record(
            "BCO BTG PACTUAL S.A.",
            2021,
            &[(TOTAL_ASSETS, 0.0), (EQUITY, 0.0), (NET_INCOME, 10.0)],
        )];

        calculator().apply(&mut records);
        let derived = &records[0].derived;

        assert_eq!(derived.roe, None);
        assert_eq!(derived.roa, None);
        assert_eq!(derived.total_liabilities, Some(0.0));
    }

    #[test]
    fn test_missing_input_propagates_undefined() {
        let mut records = vec![record("BCO BRADESCO S.A.", 2022, &[(TOTAL_ASSETS, 100.0)])];

        calculator().apply(&mut records);
        let derived = &records[0].derived;

        assert_eq!(derived.total_liabilities, None);
        assert_eq!(derived.roa, None);
        assert_eq!(derived.operating_roa, None);
    }

    #[test]
    fn test_yoy_per_company_with_gaps() {
        let mut records = vec![
            record("BCO BRASIL S.A.", 2022, &[(TOTAL_ASSETS, 150.0)]),
            record("BCO BRADESCO S.A.", 2020, &[(TOTAL_ASSETS, 999.0)]),
            record("BCO BRASIL S.A.", 2020, &[(TOTAL_ASSETS, 100.0)]),
            record("BCO BRADESCO S.A.", 2021, &[(TOTAL_ASSETS, 1998.0)]),
        ];

        calculator().apply(&mut records);
        let yoy = |i: usize| records[i].derived.yoy.get("total_assets_yoy").copied().flatten();

        // BCO BRASIL 2020 is first observed: undefined
        assert_eq!(yoy(2), None);
        // 2022 vs 2020 (gap tolerated): (150 - 100) / 100
        assert_eq!(yoy(0), Some(0.5));
        // Never across companies
        assert_eq!(yoy(1), None);
        assert_eq!(yoy(3), Some(1.0));

        // Every base metric gets a column even when undefined
        assert_eq!(records[0].derived.yoy.len(), 5);
        assert!(records[0].derived.yoy.contains_key("total_liabilities_yoy"));
    }

    #[test]
    fn test_yoy_undefined_when_previous_is_zero_or_missing() {
        let mut records = vec![
            record("BCO BRASIL S.A.", 2020, &[(NET_INCOME, 0.0)]),
            record("BCO BRASIL S.A.", 2021, &[(NET_INCOME, 5.0), (EQUITY, 50.0)]),
            record("BCO BRASIL S.A.", 2022, &[(NET_INCOME, 10.0), (EQUITY, 60.0)]),
        ];

        calculator().apply(&mut records);

        assert_eq!(records[1].derived.yoy["net_income_yoy"], None);
        assert_eq!(records[1].derived.yoy["equity_yoy"], None);
        assert_eq!(records[2].derived.yoy["net_income_yoy"], Some(1.0));
        assert_eq!(records[2].derived.yoy["equity_yoy"], Some(0.2));
    }

    #[test]
    fn test_ratio_helpers() {
        assert_eq!(ratio(Some(1.0), Some(4.0)), Some(0.25));
        assert_eq!(ratio(None, Some(4.0)), None);
        assert_eq!(ratio(Some(1.0), None), None);
        assert_eq!(ratio(Some(1.0), Some(0.0)), None);
        assert_eq!(pct_change(Some(110.0), Some(100.0)), Some(0.1));
    }
}
