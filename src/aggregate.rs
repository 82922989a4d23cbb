//! Aggregation engine: pure functions from rows + widget config to the
//! numbers the dashboard shows.
//!
//! A partially-wrong spec is expected input, not an exception. Missing
//! columns and non-numeric cells degrade to neutral defaults; the only
//! error out of this module is an unsupported chart type, and that stays
//! local to the one widget that carries it.

use std::cmp::Ordering;
use std::fmt;

use serde::Serialize;

use crate::dataset::Row;
use crate::spec::{Aggregation, ChartConfig, ChartType, KpiConfig};

/// Bounded working set for chart grouping. Keeps slicer-driven redraws
/// responsive on large uploads.
pub const CHART_ROW_CAP: usize = 100;
/// Largest-value slices kept for PIE legends.
pub const PIE_SLICE_CAP: usize = 15;

/// A KPI result. Sum and count of an empty set are 0; avg/max/min of an
/// empty set have no defined value and render as a placeholder.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum KpiValue {
    Value(f64),
    Undefined,
}

impl KpiValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            KpiValue::Value(v) => Some(*v),
            KpiValue::Undefined => None,
        }
    }
}

pub fn kpi_value(rows: &[Row], cfg: &KpiConfig) -> KpiValue {
    let values: Vec<f64> = rows
        .iter()
        .filter_map(|row| row.get(&cfg.value_key).and_then(|v| v.as_number()))
        .collect();

    match cfg.aggregation {
        Aggregation::Sum => KpiValue::Value(values.iter().sum()),
        Aggregation::Count => KpiValue::Value(values.len() as f64),
        Aggregation::Avg => {
            if values.is_empty() {
                KpiValue::Undefined
            } else {
                KpiValue::Value(values.iter().sum::<f64>() / values.len() as f64)
            }
        }
        Aggregation::Max => values.iter().copied().fold(None, fold_max).map_or(KpiValue::Undefined, KpiValue::Value),
        Aggregation::Min => values.iter().copied().fold(None, fold_min).map_or(KpiValue::Undefined, KpiValue::Value),
    }
}

fn fold_max(acc: Option<f64>, v: f64) -> Option<f64> {
    Some(acc.map_or(v, |a| a.max(v)))
}

fn fold_min(acc: Option<f64>, v: f64) -> Option<f64> {
    Some(acc.map_or(v, |a| a.min(v)))
}

/// Display formatting for a KPI value. Magnitudes above 10^6 compact to
/// K/M/B/T notation, values above 1000 keep at most one fractional digit,
/// everything else prints at full precision. Display rule only; the
/// underlying value is never rounded.
pub fn format_kpi(value: KpiValue, cfg: &KpiConfig) -> String {
    let body = match value {
        KpiValue::Undefined => "—".to_string(),
        KpiValue::Value(v) => format_magnitude(v),
    };
    let prefix = cfg.prefix.as_deref().unwrap_or("");
    let suffix = cfg.suffix.as_deref().unwrap_or("");
    format!("{}{}{}", prefix, body, suffix)
}

fn format_magnitude(v: f64) -> String {
    let abs = v.abs();
    if abs > 1e6 {
        let (scaled, unit) = if abs >= 1e12 {
            (v / 1e12, "T")
        } else if abs >= 1e9 {
            (v / 1e9, "B")
        } else {
            (v / 1e6, "M")
        };
        format!("{}{}", trim_one_decimal(scaled), unit)
    } else if abs > 1000.0 {
        trim_one_decimal(v)
    } else if v.fract() == 0.0 {
        format!("{}", v as i64)
    } else {
        format!("{}", v)
    }
}

fn trim_one_decimal(v: f64) -> String {
    let s = format!("{:.1}", v);
    s.strip_suffix(".0").map(|t| t.to_string()).unwrap_or(s)
}

/// One grouped point of a chart series. `average` and `previous` are
/// derived tooltip annotations, recomputed on every pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesPoint {
    pub key: String,
    pub value: f64,
    pub count: u64,
    pub average: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChartTypeError {
    pub chart_type: String,
}

impl fmt::Display for ChartTypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unsupported visualization type {:?}", self.chart_type)
    }
}

impl std::error::Error for ChartTypeError {}

/// Groups the first `CHART_ROW_CAP` rows by the chart's x-axis value and
/// sums the y-axis values per group (non-numeric cells count as 0).
/// BAR/LINE/AREA/SCATTER sort ascending by key, numeric when both keys
/// parse as numbers. PIE keeps the `PIE_SLICE_CAP` largest slices.
pub fn chart_series(rows: &[Row], cfg: &ChartConfig) -> Result<Vec<SeriesPoint>, ChartTypeError> {
    if !cfg.chart_type.is_supported() {
        return Err(ChartTypeError { chart_type: cfg.chart_type.as_str().to_string() });
    }

    let working = &rows[..rows.len().min(CHART_ROW_CAP)];
    let mut order: Vec<String> = Vec::new();
    let mut sums: std::collections::HashMap<String, (f64, u64)> = std::collections::HashMap::new();
    for row in working {
        let key = row
            .get(&cfg.x_axis_key)
            .map(|v| v.group_key())
            .unwrap_or_else(|| "Other".to_string());
        let y = row.get(&cfg.y_axis_key).and_then(|v| v.as_number()).unwrap_or(0.0);
        let entry = sums.entry(key.clone()).or_insert_with(|| {
            order.push(key.clone());
            (0.0, 0)
        });
        entry.0 += y;
        entry.1 += 1;
    }

    let mut groups: Vec<(String, f64, u64)> = order
        .into_iter()
        .map(|k| {
            let (sum, count) = sums[&k];
            (k, sum, count)
        })
        .collect();

    match cfg.chart_type {
        ChartType::Pie => {
            groups.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
            groups.truncate(PIE_SLICE_CAP);
        }
        _ => groups.sort_by(|a, b| compare_keys(&a.0, &b.0)),
    }

    let n = groups.len();
    let mean = if n == 0 {
        0.0
    } else {
        groups.iter().map(|g| g.1).sum::<f64>() / n as f64
    };

    let mut points = Vec::with_capacity(n);
    let mut previous = None;
    for (key, value, count) in groups {
        points.push(SeriesPoint { key, value, count, average: mean, previous });
        previous = Some(value);
    }
    Ok(points)
}

/// Numeric compare when both sides parse as numbers, lexicographic
/// otherwise.
fn compare_keys(a: &str, b: &str) -> Ordering {
    match (a.parse::<f64>(), b.parse::<f64>()) {
        (Ok(x), Ok(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => a.cmp(b),
    }
}
