//! The generative-analysis collaborator: an opaque remote function from a
//! dataset snapshot to a raw dashboard-spec document.
//!
//! The provider returns response *text*. JSON parsing and schema
//! validation happen at the workspace boundary so transport failures,
//! credential failures, and malformed documents stay distinct causes.

use std::fmt;

use async_trait::async_trait;
use serde_json::json;

use crate::dataset::DatasetRegistry;
use crate::spec::SpecError;
use crate::state::Config;

pub mod gemini;

#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisError {
    /// Credential missing, invalid, or insufficient. Callers offer a
    /// credential-selection affordance; nothing retries on its own.
    Auth(String),
    /// Endpoint or model not found, which is a configuration problem.
    NotFound(String),
    /// Network or HTTP-level failure.
    Transport(String),
    /// The call succeeded but the body carried no document.
    EmptyResponse,
    /// The document parsed or validated badly.
    MalformedSpec(SpecError),
}

impl fmt::Display for AnalysisError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnalysisError::Auth(msg) => write!(f, "authentication failed: {}", msg),
            AnalysisError::NotFound(msg) => write!(f, "analysis endpoint not found: {}", msg),
            AnalysisError::Transport(msg) => write!(f, "analysis request failed: {}", msg),
            AnalysisError::EmptyResponse => write!(f, "analysis returned an empty response"),
            AnalysisError::MalformedSpec(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for AnalysisError {}

impl AnalysisError {
    pub fn is_auth(&self) -> bool {
        matches!(self, AnalysisError::Auth(_))
    }
}

/// Schema-plus-sample payload sent to the provider. Multi-dataset
/// workspaces send one entry per dataset; a single dataset collapses to
/// the flat single-table form.
pub fn build_request(registry: &DatasetRegistry, sample_rows: usize) -> serde_json::Value {
    let datasets: Vec<serde_json::Value> = registry
        .all()
        .iter()
        .map(|ds| {
            json!({
                "name": ds.name,
                "columns": ds.columns,
                "sample": &ds.rows[..ds.rows.len().min(sample_rows)],
            })
        })
        .collect();
    if datasets.len() == 1 {
        json!({
            "columns": registry.primary().map(|d| d.columns.clone()).unwrap_or_default(),
            "sample": datasets[0]["sample"],
        })
    } else {
        json!({ "datasets": datasets })
    }
}

/// The instruction text wrapped around the request payload.
pub fn render_prompt(request: &serde_json::Value) -> String {
    format!(
        "Act as a data analyst. Analyze this dataset schema and sample rows.\n\
         Input: {}\n\n\
         Produce a JSON dashboard specification with:\n\
         1. \"summary\": a concise executive summary of the dataset.\n\
         2. \"kpis\": the most important metrics; each has id, label, valueKey \
         (an existing numeric column), and aggregation (sum, avg, count, max, or min).\n\
         3. \"charts\": visualizations; each has id, title, type (BAR, LINE, PIE, \
         AREA, or SCATTER), xAxisKey, yAxisKey, and description using existing columns.\n\
         4. \"insights\": three analytical observations.\n\
         Optionally include \"pages\" grouping kpi/chart ids, \"dimensions\" naming \
         categorical columns worth filtering on, and \"suggestedJoins\".\n\
         Return only valid JSON.",
        request
    )
}

#[async_trait]
pub trait AnalysisProvider {
    /// One outstanding call per workspace; the implementation never
    /// retries silently.
    async fn generate_spec(&self, request: &serde_json::Value) -> Result<String, AnalysisError>;
}

#[derive(Clone, Copy, Debug)]
pub enum ProviderKind {
    Gemini,
}

impl ProviderKind {
    pub fn from_env() -> Self {
        // Single provider today; the enum keeps the selection seam the
        // config already points at.
        ProviderKind::Gemini
    }

    pub fn build(self, cfg: &Config) -> Box<dyn AnalysisProvider + Send + Sync> {
        match self {
            ProviderKind::Gemini => Box::new(gemini::Gemini::new(cfg)),
        }
    }
}
