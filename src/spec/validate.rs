//! Validation boundary for the raw AI response.
//!
//! The response is untrusted: fields may be missing, mistyped, duplicated,
//! or reference columns and ids that do not exist. Parse, don't assume:
//! everything that survives normalization is well-formed by construction,
//! and nothing downstream re-checks it.

use std::collections::HashSet;
use std::fmt;

use serde_json::Value as Json;

use super::{Aggregation, ChartConfig, ChartType, DashboardSpec, KpiConfig, ReportPage, Trend};

#[derive(Debug, Clone, PartialEq)]
pub enum SpecError {
    /// Body was not JSON at all.
    Json(String),
    /// JSON parsed but the document shape is unusable.
    Schema(String),
}

impl fmt::Display for SpecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpecError::Json(msg) => write!(f, "response is not valid JSON: {}", msg),
            SpecError::Schema(msg) => write!(f, "response failed schema validation: {}", msg),
        }
    }
}

impl std::error::Error for SpecError {}

/// A normalized spec plus what got repaired on the way in. Warnings are
/// for logging, not for the user to act on.
#[derive(Debug, Clone)]
pub struct Normalized {
    pub spec: DashboardSpec,
    pub warnings: Vec<String>,
}

/// Raw response text → validated spec, or a terminal error. Partial
/// documents never escape: either every check passes or the caller gets
/// a `SpecError` carrying the reason.
pub fn normalize(raw: &str) -> Result<Normalized, SpecError> {
    let doc: Json = serde_json::from_str(raw).map_err(|e| SpecError::Json(e.to_string()))?;
    let root = doc
        .as_object()
        .ok_or_else(|| SpecError::Schema("top level is not an object".to_string()))?;

    let summary = match root.get("summary") {
        Some(Json::String(s)) => s.clone(),
        Some(_) => return Err(SpecError::Schema("summary is not a string".to_string())),
        None => return Err(SpecError::Schema("missing required field: summary".to_string())),
    };
    let raw_kpis = required_array(root, "kpis")?;
    let raw_charts = required_array(root, "charts")?;

    let mut warnings = Vec::new();
    let kpis = normalize_kpis(raw_kpis, &mut warnings);
    let charts = normalize_charts(raw_charts, &mut warnings);

    let kpi_ids: HashSet<&str> = kpis.iter().map(|k| k.id.as_str()).collect();
    let chart_ids: HashSet<&str> = charts.iter().map(|c| c.id.as_str()).collect();
    let pages = normalize_pages(root.get("pages"), &kpi_ids, &chart_ids, &mut warnings);

    let spec = DashboardSpec {
        summary,
        insights: string_array(root.get("insights")),
        kpis,
        charts,
        pages,
        dimensions: string_array(root.get("dimensions")),
        suggested_joins: string_array(root.get("suggestedJoins")),
    };
    Ok(Normalized { spec, warnings })
}

fn required_array<'a>(root: &'a serde_json::Map<String, Json>, key: &str) -> Result<&'a [Json], SpecError> {
    match root.get(key) {
        Some(Json::Array(items)) => Ok(items),
        Some(_) => Err(SpecError::Schema(format!("{} is not an array", key))),
        None => Err(SpecError::Schema(format!("missing required field: {}", key))),
    }
}

fn normalize_kpis(items: &[Json], warnings: &mut Vec<String>) -> Vec<KpiConfig> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut out = Vec::new();
    for (idx, item) in items.iter().enumerate() {
        let Some(obj) = item.as_object() else {
            warnings.push(format!("kpi[{}] is not an object, dropped", idx));
            continue;
        };
        let Some(id) = nonempty_string(obj.get("id")) else {
            warnings.push(format!("kpi[{}] has no id, dropped", idx));
            continue;
        };
        // First occurrence wins so document order stays deterministic.
        if !seen.insert(id.clone()) {
            warnings.push(format!("duplicate kpi id {:?}, kept first", id));
            continue;
        }
        let raw_agg = string_or_default(obj.get("aggregation"));
        let Some(aggregation) = Aggregation::parse(&raw_agg) else {
            warnings.push(format!("kpi {:?} has unknown aggregation {:?}, dropped", id, raw_agg));
            seen.remove(&id);
            continue;
        };
        out.push(KpiConfig {
            id,
            label: string_or_default(obj.get("label")),
            value_key: string_or_default(obj.get("valueKey")),
            aggregation,
            prefix: nonempty_string(obj.get("prefix")),
            suffix: nonempty_string(obj.get("suffix")),
            trend: obj.get("trend").and_then(|v| v.as_str()).and_then(Trend::parse),
        });
    }
    out
}

fn normalize_charts(items: &[Json], warnings: &mut Vec<String>) -> Vec<ChartConfig> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut out = Vec::new();
    for (idx, item) in items.iter().enumerate() {
        let Some(obj) = item.as_object() else {
            warnings.push(format!("chart[{}] is not an object, dropped", idx));
            continue;
        };
        let Some(id) = nonempty_string(obj.get("id")) else {
            warnings.push(format!("chart[{}] has no id, dropped", idx));
            continue;
        };
        if !seen.insert(id.clone()) {
            warnings.push(format!("duplicate chart id {:?}, kept first", id));
            continue;
        }
        // Unknown chart types are kept: the widget degrades on its own
        // without taking the document down.
        out.push(ChartConfig {
            id,
            title: string_or_default(obj.get("title")),
            chart_type: ChartType::parse(&string_or_default(obj.get("type"))),
            x_axis_key: string_or_default(obj.get("xAxisKey")),
            y_axis_key: string_or_default(obj.get("yAxisKey")),
            category_key: nonempty_string(obj.get("categoryKey")),
            description: string_or_default(obj.get("description")),
        });
    }
    out
}

fn normalize_pages(
    raw: Option<&Json>,
    kpi_ids: &HashSet<&str>,
    chart_ids: &HashSet<&str>,
    warnings: &mut Vec<String>,
) -> Vec<ReportPage> {
    let Some(Json::Array(items)) = raw else {
        if matches!(raw, Some(v) if !v.is_null()) {
            warnings.push("pages is not an array, ignored".to_string());
        }
        return Vec::new();
    };
    let mut seen: HashSet<String> = HashSet::new();
    let mut out = Vec::new();
    for (idx, item) in items.iter().enumerate() {
        let Some(obj) = item.as_object() else {
            warnings.push(format!("page[{}] is not an object, dropped", idx));
            continue;
        };
        let Some(id) = nonempty_string(obj.get("id")) else {
            warnings.push(format!("page[{}] has no id, dropped", idx));
            continue;
        };
        if !seen.insert(id.clone()) {
            warnings.push(format!("duplicate page id {:?}, kept first", id));
            continue;
        }
        let kpi_refs = prune_refs(string_array(obj.get("kpiIds")), kpi_ids, &id, "kpi", warnings);
        let chart_refs = prune_refs(string_array(obj.get("chartIds")), chart_ids, &id, "chart", warnings);
        out.push(ReportPage {
            id,
            title: string_or_default(obj.get("title")),
            kpi_ids: kpi_refs,
            chart_ids: chart_refs,
            summary: nonempty_string(obj.get("summary")),
        });
    }
    out
}

/// Dangling references are dropped, never dereferenced.
fn prune_refs(
    refs: Vec<String>,
    known: &HashSet<&str>,
    page_id: &str,
    kind: &str,
    warnings: &mut Vec<String>,
) -> Vec<String> {
    refs.into_iter()
        .filter(|r| {
            let ok = known.contains(r.as_str());
            if !ok {
                warnings.push(format!("page {:?} references unknown {} {:?}, dropped", page_id, kind, r));
            }
            ok
        })
        .collect()
}

fn nonempty_string(v: Option<&Json>) -> Option<String> {
    v.and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn string_or_default(v: Option<&Json>) -> String {
    v.and_then(|v| v.as_str()).unwrap_or("").trim().to_string()
}

fn string_array(v: Option<&Json>) -> Vec<String> {
    match v {
        Some(Json::Array(items)) => items
            .iter()
            .filter_map(|i| i.as_str())
            .map(|s| s.to_string())
            .collect(),
        _ => Vec::new(),
    }
}
