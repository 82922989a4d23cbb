//! The dashboard specification document.
//!
//! This is the AI-returned payload after it has passed through
//! [`validate::normalize`]. Everything downstream (aggregation, layout,
//! rendering) operates only on these types; raw JSON never leaves the
//! validation boundary.

use serde::{Serialize, Serializer};

pub mod validate;

pub use validate::{normalize, Normalized, SpecError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    Sum,
    Avg,
    Count,
    Max,
    Min,
}

impl Aggregation {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "sum" => Some(Aggregation::Sum),
            "avg" | "average" | "mean" => Some(Aggregation::Avg),
            "count" => Some(Aggregation::Count),
            "max" => Some(Aggregation::Max),
            "min" => Some(Aggregation::Min),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Aggregation::Sum => "sum",
            Aggregation::Avg => "avg",
            Aggregation::Count => "count",
            Aggregation::Max => "max",
            Aggregation::Min => "min",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Up,
    Down,
    Neutral,
}

impl Trend {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "up" => Some(Trend::Up),
            "down" => Some(Trend::Down),
            "neutral" => Some(Trend::Neutral),
            _ => None,
        }
    }
}

/// Visualization kind. Unrecognized strings are carried through so the
/// owning widget can degrade to an "unsupported" placeholder instead of
/// sinking the whole document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChartType {
    Bar,
    Line,
    Pie,
    Area,
    Scatter,
    Other(String),
}

impl ChartType {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "BAR" => ChartType::Bar,
            "LINE" => ChartType::Line,
            "PIE" => ChartType::Pie,
            "AREA" => ChartType::Area,
            "SCATTER" => ChartType::Scatter,
            _ => ChartType::Other(raw.trim().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ChartType::Bar => "BAR",
            ChartType::Line => "LINE",
            ChartType::Pie => "PIE",
            ChartType::Area => "AREA",
            ChartType::Scatter => "SCATTER",
            ChartType::Other(s) => s.as_str(),
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, ChartType::Other(_))
    }
}

impl Serialize for ChartType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KpiConfig {
    pub id: String,
    pub label: String,
    pub value_key: String,
    pub aggregation: Aggregation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suffix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trend: Option<Trend>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartConfig {
    pub id: String,
    pub title: String,
    #[serde(rename = "type")]
    pub chart_type: ChartType,
    pub x_axis_key: String,
    pub y_axis_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_key: Option<String>,
    pub description: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportPage {
    pub id: String,
    pub title: String,
    pub kpi_ids: Vec<String>,
    pub chart_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSpec {
    pub summary: String,
    pub insights: Vec<String>,
    pub kpis: Vec<KpiConfig>,
    pub charts: Vec<ChartConfig>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub pages: Vec<ReportPage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dimensions: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub suggested_joins: Vec<String>,
}

impl DashboardSpec {
    pub fn kpi_ids(&self) -> Vec<String> {
        self.kpis.iter().map(|k| k.id.clone()).collect()
    }

    pub fn chart_ids(&self) -> Vec<String> {
        self.charts.iter().map(|c| c.id.clone()).collect()
    }

    pub fn kpi(&self, id: &str) -> Option<&KpiConfig> {
        self.kpis.iter().find(|k| k.id == id)
    }

    pub fn chart(&self, id: &str) -> Option<&ChartConfig> {
        self.charts.iter().find(|c| c.id == id)
    }

    /// The page list to render. A spec without pages is one implicit page
    /// holding every KPI and chart in document order.
    pub fn effective_pages(&self) -> Vec<ReportPage> {
        if !self.pages.is_empty() {
            return self.pages.clone();
        }
        vec![ReportPage {
            id: "page-main".to_string(),
            title: "Overview".to_string(),
            kpi_ids: self.kpi_ids(),
            chart_ids: self.chart_ids(),
            summary: None,
        }]
    }

    /// Read-only projection for the download/export affordance.
    pub fn export_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kpi(id: &str) -> KpiConfig {
        KpiConfig {
            id: id.to_string(),
            label: id.to_string(),
            value_key: "v".to_string(),
            aggregation: Aggregation::Sum,
            prefix: None,
            suffix: None,
            trend: None,
        }
    }

    fn chart(id: &str) -> ChartConfig {
        ChartConfig {
            id: id.to_string(),
            title: id.to_string(),
            chart_type: ChartType::Bar,
            x_axis_key: "x".to_string(),
            y_axis_key: "y".to_string(),
            category_key: None,
            description: String::new(),
        }
    }

    fn spec() -> DashboardSpec {
        DashboardSpec {
            summary: "s".to_string(),
            insights: vec![],
            kpis: vec![kpi("k1"), kpi("k2")],
            charts: vec![chart("c1")],
            pages: vec![],
            dimensions: vec![],
            suggested_joins: vec![],
        }
    }

    #[test]
    fn test_chart_type_parse_round_trip() {
        assert_eq!(ChartType::parse("bar"), ChartType::Bar);
        assert_eq!(ChartType::parse(" PIE "), ChartType::Pie);
        assert_eq!(ChartType::parse("DONUT"), ChartType::Other("DONUT".to_string()));
        assert!(!ChartType::parse("DONUT").is_supported());
    }

    #[test]
    fn test_aggregation_parse() {
        assert_eq!(Aggregation::parse("SUM"), Some(Aggregation::Sum));
        assert_eq!(Aggregation::parse("mean"), Some(Aggregation::Avg));
        assert_eq!(Aggregation::parse("median"), None);
    }

    #[test]
    fn test_effective_pages_implicit() {
        let s = spec();
        let pages = s.effective_pages();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].kpi_ids, vec!["k1", "k2"]);
        assert_eq!(pages[0].chart_ids, vec!["c1"]);
    }

    #[test]
    fn test_effective_pages_explicit_kept() {
        let mut s = spec();
        s.pages.push(ReportPage {
            id: "p1".to_string(),
            title: "Revenue".to_string(),
            kpi_ids: vec!["k2".to_string()],
            chart_ids: vec![],
            summary: None,
        });
        let pages = s.effective_pages();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].id, "p1");
    }

    #[test]
    fn test_export_json_shape() {
        let s = spec();
        let out = s.export_json();
        let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed["kpis"][0]["valueKey"], "v");
        assert_eq!(parsed["kpis"][0]["aggregation"], "sum");
        assert_eq!(parsed["charts"][0]["type"], "BAR");
    }
}
