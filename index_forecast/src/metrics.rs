//! Sub-series change rates relative to their aggregate

use crate::data::{SeriesMeta, TimeSeriesData};
use index_math::{difference, pct_change, Month};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};

/// One sub-series's relationship to its aggregate for one month
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelativeMetric {
    /// Group of the aggregate the deltas are measured against
    pub group: String,
    pub month: Month,
    pub code: String,
    pub label: String,
    pub value: f64,
    pub mom_pct: Option<f64>,
    pub yoy_pct: Option<f64>,
    pub delta_mom_vs_total: Option<f64>,
    pub delta_yoy_vs_total: Option<f64>,
    /// Basket weight of the category, when the group publishes weights
    #[serde(default)]
    pub weight: Option<f64>,
}

impl RelativeMetric {
    /// Ranking score: `|delta_yoy|`, else `|delta_mom|`, else unranked
    pub fn mover_score(&self) -> Option<f64> {
        self.delta_yoy_vs_total
            .or(self.delta_mom_vs_total)
            .map(f64::abs)
    }
}

/// Month-over-month and year-over-year percent changes at one month
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ChangeRates {
    pub mom_pct: Option<f64>,
    pub yoy_pct: Option<f64>,
}

/// Change rates of `series` at `month`, looked up by calendar month
pub fn change_rates(series: &TimeSeriesData, month: Month) -> ChangeRates {
    ChangeRates {
        mom_pct: change_over(series, month, 1),
        yoy_pct: change_over(series, month, 12),
    }
}

/// Percent change of `series` from `months` calendar months before `month`
pub fn change_over(series: &TimeSeriesData, month: Month, months: u32) -> Option<f64> {
    pct_change(
        series.value_at(month),
        series.value_at(month.offset(-i64::from(months))),
    )
}

/// Percent change over `months` of every series, each at its own latest month
///
/// Series without a value `months` back (or with a zero base) are left out.
pub fn changes_over_months(
    sub_series: &[(SeriesMeta, TimeSeriesData)],
    months: u32,
) -> BTreeMap<String, f64> {
    sub_series
        .iter()
        .filter_map(|(meta, series)| {
            let latest = series.last()?;
            change_over(series, latest.month, months).map(|pct| (meta.code.clone(), pct))
        })
        .collect()
}

/// Metric of one sub-series at `month`; `None` if it has no value that month
pub fn relative_metric(
    group: &str,
    total_rates: ChangeRates,
    meta: &SeriesMeta,
    series: &TimeSeriesData,
    month: Month,
) -> Option<RelativeMetric> {
    let value = series.value_at(month)?;
    let rates = change_rates(series, month);
    Some(RelativeMetric {
        group: group.to_string(),
        month,
        code: meta.code.clone(),
        label: meta.label.clone(),
        value,
        mom_pct: rates.mom_pct,
        yoy_pct: rates.yoy_pct,
        delta_mom_vs_total: difference(rates.mom_pct, total_rates.mom_pct),
        delta_yoy_vs_total: difference(rates.yoy_pct, total_rates.yoy_pct),
        weight: None,
    })
}

/// Metrics of every sub-series for the latest month of `total`
///
/// Sub-series keep their input order; those missing the month are left out.
pub fn relative_metrics(
    group: &str,
    total: &TimeSeriesData,
    sub_series: &[(SeriesMeta, TimeSeriesData)],
) -> Vec<RelativeMetric> {
    let Some(latest) = total.last() else {
        return Vec::new();
    };
    relative_metrics_at(group, total, sub_series, latest.month)
}

/// Metrics of every sub-series for an explicit month
pub fn relative_metrics_at(
    group: &str,
    total: &TimeSeriesData,
    sub_series: &[(SeriesMeta, TimeSeriesData)],
    month: Month,
) -> Vec<RelativeMetric> {
    let total_rates = change_rates(total, month);
    sub_series
        .iter()
        .filter_map(|(meta, series)| relative_metric(group, total_rates, meta, series, month))
        .collect()
}

/// Top `k` metrics by mover score, skipping `excluded` codes
///
/// Unscored metrics are dropped; equal scores keep their input order.
pub fn rank_movers<'a>(
    metrics: &'a [RelativeMetric],
    excluded: &[String],
    k: usize,
) -> Vec<&'a RelativeMetric> {
    let mut scored: Vec<(f64, &RelativeMetric)> = metrics
        .iter()
        .filter(|m| !excluded.contains(&m.code))
        .filter_map(|m| m.mover_score().map(|score| (score, m)))
        .collect();
    // Vec::sort_by is stable
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));
    scored.into_iter().take(k).map(|(_, m)| m).collect()
}

/// Curated codes present this month, in curated order, then the top `k`
/// ranked movers not already shown
pub fn movers_panel(metrics: &[RelativeMetric], curated: &[String], k: usize) -> Vec<RelativeMetric> {
    let mut seen = HashSet::new();
    let mut panel = Vec::new();

    for code in curated {
        if let Some(metric) = metrics.iter().find(|m| &m.code == code) {
            if seen.insert(metric.code.as_str()) {
                panel.push(metric.clone());
            }
        }
    }
    for metric in rank_movers(metrics, curated, k) {
        if seen.insert(metric.code.as_str()) {
            panel.push(metric.clone());
        }
    }
    panel
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn m(s: &str) -> Month {
        s.parse().unwrap()
    }

    fn metric(code: &str, delta_mom: Option<f64>, delta_yoy: Option<f64>) -> RelativeMetric {
        RelativeMetric {
            group: "CPI".to_string(),
            month: m("2024-12"),
            code: code.to_string(),
            label: code.to_string(),
            value: 100.0,
            mom_pct: None,
            yoy_pct: None,
            delta_mom_vs_total: delta_mom,
            delta_yoy_vs_total: delta_yoy,
            weight: None,
        }
    }

    #[test]
    fn change_rates_use_calendar_months() {
        // 2024-02 is missing, so the month-over-month change is undefined
        let series = TimeSeriesData::new(vec![
            (m("2023-03"), 100.0),
            (m("2024-01"), 104.0),
            (m("2024-03"), 106.0),
        ])
        .unwrap();
        let rates = change_rates(&series, m("2024-03"));
        assert_eq!(rates.mom_pct, None);
        assert_relative_eq!(rates.yoy_pct.unwrap(), 6.0, epsilon = 1e-9);
    }

    #[test]
    fn change_over_any_span() {
        let series = TimeSeriesData::new(vec![
            (m("2023-12"), 80.0),
            (m("2024-03"), 100.0),
            (m("2024-06"), 110.0),
        ])
        .unwrap();
        assert_relative_eq!(change_over(&series, m("2024-06"), 3).unwrap(), 10.0, epsilon = 1e-9);
        assert_relative_eq!(change_over(&series, m("2024-06"), 6).unwrap(), 37.5, epsilon = 1e-9);
        assert_eq!(change_over(&series, m("2024-06"), 2), None);
        assert_eq!(change_over(&series, m("2024-06"), 0), Some(0.0));
    }

    #[test]
    fn missing_month_yields_no_row() {
        let total = TimeSeriesData::new(vec![(m("2024-01"), 1.0), (m("2024-02"), 1.0)]).unwrap();
        let sub = TimeSeriesData::new(vec![(m("2024-01"), 1.0)]).unwrap();
        let rows = relative_metrics("CPI", &total, &[(SeriesMeta::new("A", None), sub)]);
        assert!(rows.is_empty());
    }

    #[test]
    fn ties_keep_input_order() {
        let metrics = vec![
            metric("X", None, Some(2.0)),
            metric("Y", None, Some(-2.0)),
            metric("Z", None, None),
        ];
        let ranked: Vec<&str> = rank_movers(&metrics, &[], 5)
            .iter()
            .map(|m| m.code.as_str())
            .collect();
        assert_eq!(ranked, vec!["X", "Y"]);
    }

    #[test]
    fn panel_puts_curated_first() {
        let metrics = vec![
            metric("A", None, Some(6.0)),
            metric("B", None, Some(-2.0)),
            metric("FOOD", None, Some(0.1)),
        ];
        let curated = vec!["FOOD".to_string(), "ABSENT".to_string()];
        let codes: Vec<String> = movers_panel(&metrics, &curated, 1)
            .into_iter()
            .map(|m| m.code)
            .collect();
        assert_eq!(codes, vec!["FOOD", "A"]);
    }
}
