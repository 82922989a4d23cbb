use serde_json::json;
use std::fmt;

use crate::analysis::{build_request, AnalysisError};
use crate::dataset::{DatasetRegistry, Row};
use crate::filter::{dimension_value_counts, filtered_rows, FilterState};
use crate::layout::{signature_for_columns, signature_for_spec, DashboardLayout, WidgetKind};
use crate::logging::{log, obj, v_num, v_str, Domain, Level};
use crate::spec::{normalize, DashboardSpec};
use crate::storage::ClientStore;

#[derive(Clone, Debug)]
pub struct Config {
    pub sample_rows: usize,
    pub sqlite_path: String,
    pub api_key: Option<String>,
    pub gemini_base: String,
    pub gemini_model: String,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            sample_rows: std::env::var("SAMPLE_ROWS").ok().and_then(|v| v.parse().ok()).unwrap_or(10),
            sqlite_path: std::env::var("SQLITE_PATH").unwrap_or_else(|_| "./nexusdash.sqlite".to_string()),
            api_key: std::env::var("API_KEY").ok(),
            gemini_base: std::env::var("GEMINI_BASE")
                .unwrap_or_else(|_| "https://generativelanguage.googleapis.com".to_string()),
            gemini_model: std::env::var("GEMINI_MODEL").unwrap_or_else(|_| "gemini-3-flash-preview".to_string()),
        }
    }

    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            sample_rows: 10,
            sqlite_path: String::new(),
            api_key: None,
            gemini_base: String::new(),
            gemini_model: "test-model".to_string(),
        }
    }
}

pub fn now_ts() -> u64 {
    chrono::Utc::now().timestamp() as u64
}

/// Workspace lifecycle. `Ready` is the only phase in which filtering and
/// layout editing mean anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Empty,
    Staged,
    Analyzing,
    Ready,
    Error,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Empty => "empty",
            Phase::Staged => "staged",
            Phase::Analyzing => "analyzing",
            Phase::Ready => "ready",
            Phase::Error => "error",
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransitionError {
    pub msg: String,
}

impl fmt::Display for TransitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.msg)
    }
}

impl std::error::Error for TransitionError {}

fn rejected(msg: impl Into<String>) -> TransitionError {
    TransitionError { msg: msg.into() }
}

/// Handle for one in-flight analysis call. The generation number pins the
/// response to the dataset set it was computed from; anything staler is
/// discarded on completion.
#[derive(Debug)]
pub struct AnalysisTicket {
    pub generation: u64,
    pub request: serde_json::Value,
}

/// What `complete_analysis` did with the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Ready,
    Failed,
    Stale,
}

/// The multi-dataset workspace: owns the registry, the active spec, the
/// filter state, and the in-memory layout. All mutations run on the
/// caller's single thread; the only suspension point is the provider
/// call, which lives between `begin_analysis` and `complete_analysis`.
pub struct Workspace {
    cfg: Config,
    registry: DatasetRegistry,
    phase: Phase,
    spec: Option<DashboardSpec>,
    filters: FilterState,
    layout: Option<DashboardLayout>,
    signature: Option<String>,
    edit_mode: bool,
    last_error: Option<AnalysisError>,
    generation: u64,
    in_flight: Option<u64>,
}

impl Workspace {
    pub fn new(cfg: Config) -> Self {
        Self {
            cfg,
            registry: DatasetRegistry::new(),
            phase: Phase::Empty,
            spec: None,
            filters: FilterState::new(),
            layout: None,
            signature: None,
            edit_mode: false,
            last_error: None,
            generation: 0,
            in_flight: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn registry(&self) -> &DatasetRegistry {
        &self.registry
    }

    pub fn spec(&self) -> Option<&DashboardSpec> {
        if self.phase == Phase::Ready {
            self.spec.as_ref()
        } else {
            None
        }
    }

    pub fn layout(&self) -> Option<&DashboardLayout> {
        self.layout.as_ref()
    }

    pub fn signature(&self) -> Option<&str> {
        self.signature.as_deref()
    }

    pub fn last_error(&self) -> Option<&AnalysisError> {
        self.last_error.as_ref()
    }

    pub fn edit_mode(&self) -> bool {
        self.edit_mode
    }

    pub fn filters(&self) -> &FilterState {
        &self.filters
    }

    /// Registers a dataset and drops any prior analysis: results are tied
    /// to the dataset set they were computed from and must not be shown
    /// against a different one.
    pub fn add_dataset(&mut self, name: impl Into<String>, columns: Vec<String>, rows: Vec<Row>) -> String {
        let name = name.into();
        let id = self.registry.add(name.clone(), columns, rows);
        self.invalidate_analysis();
        self.phase = Phase::Staged;
        log(
            Level::Info,
            Domain::Workspace,
            "dataset_added",
            obj(&[
                ("id", v_str(&id)),
                ("name", v_str(&name)),
                ("datasets", v_num(self.registry.len() as f64)),
            ]),
        );
        id
    }

    /// Removes by id (no-op if absent) and invalidates the spec the same
    /// way `add_dataset` does. Removing the last dataset lands in Empty.
    pub fn remove_dataset(&mut self, id: &str) -> bool {
        let removed = self.registry.remove(id);
        if removed {
            self.invalidate_analysis();
            self.phase = if self.registry.is_empty() { Phase::Empty } else { Phase::Staged };
            log(
                Level::Info,
                Domain::Workspace,
                "dataset_removed",
                obj(&[("id", v_str(id)), ("phase", v_str(self.phase.as_str()))]),
            );
        }
        removed
    }

    fn invalidate_analysis(&mut self) {
        self.generation += 1;
        self.in_flight = None;
        self.spec = None;
        self.filters.clear_all();
        self.layout = None;
        self.signature = None;
        self.edit_mode = false;
        self.last_error = None;
    }

    /// Starts one analysis call. Returns `Ok(None)` when a request is
    /// already outstanding; the caller must not issue a second one.
    /// Valid from Staged, and from Error as the explicit retry path.
    pub fn begin_analysis(&mut self) -> Result<Option<AnalysisTicket>, TransitionError> {
        match self.phase {
            Phase::Analyzing => return Ok(None),
            Phase::Staged | Phase::Error => {}
            Phase::Empty => return Err(rejected("no datasets staged for analysis")),
            Phase::Ready => return Err(rejected("analysis already complete; change datasets to re-analyze")),
        }
        self.phase = Phase::Analyzing;
        self.last_error = None;
        self.in_flight = Some(self.generation);
        let request = build_request(&self.registry, self.cfg.sample_rows);
        log(
            Level::Info,
            Domain::Analysis,
            "analysis_started",
            obj(&[("generation", v_num(self.generation as f64))]),
        );
        Ok(Some(AnalysisTicket { generation: self.generation, request }))
    }

    /// Applies the provider outcome for `ticket`. Responses that raced a
    /// dataset mutation or reset are discarded: their generation no
    /// longer matches the one in flight.
    pub fn complete_analysis(
        &mut self,
        ticket: &AnalysisTicket,
        outcome: Result<String, AnalysisError>,
        store: &mut ClientStore,
    ) -> Applied {
        if self.in_flight != Some(ticket.generation) || self.generation != ticket.generation {
            log(
                Level::Warn,
                Domain::Analysis,
                "analysis_discarded",
                obj(&[
                    ("ticket_generation", v_num(ticket.generation as f64)),
                    ("generation", v_num(self.generation as f64)),
                ]),
            );
            return Applied::Stale;
        }
        self.in_flight = None;

        let normalized = outcome.and_then(|raw| {
            normalize(&raw).map_err(AnalysisError::MalformedSpec)
        });
        match normalized {
            Ok(n) => {
                for warning in &n.warnings {
                    log(Level::Warn, Domain::Analysis, "spec_repaired", obj(&[("detail", v_str(warning))]));
                }
                self.install_spec(n.spec, store);
                Applied::Ready
            }
            Err(err) => {
                log(
                    Level::Error,
                    Domain::Analysis,
                    "analysis_failed",
                    obj(&[("error", v_str(&err.to_string())), ("auth", json!(err.is_auth()))]),
                );
                self.last_error = Some(err);
                self.phase = Phase::Error;
                Applied::Failed
            }
        }
    }

    fn install_spec(&mut self, spec: DashboardSpec, store: &mut ClientStore) {
        // Single-table workspaces key the layout off the column set, so a
        // re-upload of same-shape data finds its customization even when
        // the provider hands back different widget ids. Multi-dataset
        // workspaces key off the spec's id set.
        let signature = match self.registry.primary() {
            Some(primary) if self.registry.len() == 1 => signature_for_columns(&primary.columns),
            _ => signature_for_spec(&spec),
        };
        let mut layout = store
            .load_layout(&signature)
            .unwrap_or_else(|| DashboardLayout::default_for(&spec));
        layout.reconcile(&spec.kpi_ids(), &spec.chart_ids());

        self.filters.clear_all();
        self.layout = Some(layout);
        self.signature = Some(signature.clone());
        self.spec = Some(spec);
        self.last_error = None;
        self.edit_mode = false;
        self.phase = Phase::Ready;
        log(
            Level::Info,
            Domain::Workspace,
            "spec_installed",
            obj(&[("signature", v_str(&signature))]),
        );
    }

    /// Clears everything back to Empty. Any in-flight response becomes
    /// stale. Persisted layouts survive; only the in-memory selection is
    /// dropped.
    pub fn reset(&mut self) {
        self.registry.clear();
        self.invalidate_analysis();
        self.phase = Phase::Empty;
        log(Level::Info, Domain::Workspace, "workspace_reset", obj(&[]));
    }

    // ------------------------------------------------------------------
    // Filtering (Ready only)
    // ------------------------------------------------------------------

    /// Total replacement of the allowed set for `column`. The column must
    /// exist in the primary dataset, keeping the filter state free of
    /// keys that cannot match anything.
    pub fn set_filter(
        &mut self,
        column: &str,
        values: impl IntoIterator<Item = String>,
    ) -> Result<(), TransitionError> {
        self.require_ready("set_filter")?;
        let known = self
            .registry
            .primary()
            .map(|d| d.columns.iter().any(|c| c == column))
            .unwrap_or(false);
        if !known {
            return Err(rejected(format!("unknown filter column {:?}", column)));
        }
        self.filters.set_filter(column, values);
        log(Level::Debug, Domain::Filter, "filter_set", obj(&[("column", v_str(column))]));
        Ok(())
    }

    pub fn clear_filters(&mut self) -> Result<(), TransitionError> {
        self.require_ready("clear_filters")?;
        self.filters.clear_all();
        Ok(())
    }

    /// The filtered view of the primary dataset. Pure recomputation on
    /// every read.
    pub fn filtered_rows(&self) -> Vec<Row> {
        match self.registry.primary() {
            Some(primary) => filtered_rows(&primary.rows, &self.filters),
            None => Vec::new(),
        }
    }

    /// Slicer values for one column of the primary dataset.
    pub fn dimension_values(&self, column: &str) -> Result<Vec<(String, u64)>, TransitionError> {
        self.require_ready("dimension_values")?;
        let rows = self
            .registry
            .primary()
            .map(|d| d.rows.as_slice())
            .unwrap_or(&[]);
        Ok(dimension_value_counts(rows, column))
    }

    /// Columns offered as slicers: the spec's dimensions that actually
    /// exist in the primary dataset.
    pub fn slicer_columns(&self) -> Vec<String> {
        let Some(spec) = self.spec() else { return Vec::new() };
        let Some(primary) = self.registry.primary() else { return Vec::new() };
        spec.dimensions
            .iter()
            .filter(|d| primary.columns.contains(d))
            .cloned()
            .collect()
    }

    // ------------------------------------------------------------------
    // Layout editing (Ready only)
    // ------------------------------------------------------------------

    pub fn set_edit_mode(&mut self, on: bool) -> Result<(), TransitionError> {
        self.require_ready("set_edit_mode")?;
        self.edit_mode = on;
        Ok(())
    }

    pub fn move_widget(&mut self, kind: WidgetKind, id: &str, delta: isize) -> Result<(), TransitionError> {
        self.require_ready("move_widget")?;
        if let Some(layout) = self.layout.as_mut() {
            layout.move_widget(kind, id, delta);
        }
        Ok(())
    }

    pub fn toggle_hidden(&mut self, id: &str) -> Result<(), TransitionError> {
        self.require_ready("toggle_hidden")?;
        if let Some(layout) = self.layout.as_mut() {
            layout.toggle_hidden(id);
        }
        Ok(())
    }

    /// Persists the current layout under the active signature.
    pub fn save_layout(&mut self, store: &mut ClientStore) -> Result<(), TransitionError> {
        self.require_ready("save_layout")?;
        let (Some(signature), Some(layout)) = (self.signature.as_deref(), self.layout.as_ref()) else {
            return Err(rejected("no active layout to save"));
        };
        store
            .save_layout(signature, layout, now_ts())
            .map_err(|e| rejected(format!("layout save failed: {}", e)))?;
        log(Level::Info, Domain::Layout, "layout_saved", obj(&[("signature", v_str(signature))]));
        Ok(())
    }

    /// Erases the persisted record and restores the in-memory layout to
    /// the freshly derived default.
    pub fn reset_layout(&mut self, store: &mut ClientStore) -> Result<(), TransitionError> {
        self.require_ready("reset_layout")?;
        let Some(signature) = self.signature.clone() else {
            return Err(rejected("no active layout to reset"));
        };
        store
            .reset_layout(&signature)
            .map_err(|e| rejected(format!("layout reset failed: {}", e)))?;
        if let Some(spec) = self.spec.as_ref() {
            self.layout = Some(DashboardLayout::default_for(spec));
        }
        log(Level::Info, Domain::Layout, "layout_reset", obj(&[("signature", v_str(&signature))]));
        Ok(())
    }

    fn require_ready(&self, op: &str) -> Result<(), TransitionError> {
        if self.phase != Phase::Ready {
            return Err(rejected(format!(
                "{} is only valid in the ready phase (currently {})",
                op,
                self.phase.as_str()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Value;

    fn cfg() -> Config {
        Config::for_tests()
    }

    fn store() -> ClientStore {
        let mut s = ClientStore::open_in_memory().unwrap();
        s.init().unwrap();
        s
    }

    fn sales_rows() -> Vec<Row> {
        vec![
            [
                ("region".to_string(), Value::Text("East".to_string())),
                ("sales".to_string(), Value::Number(100.0)),
            ]
            .into_iter()
            .collect(),
            [
                ("region".to_string(), Value::Text("West".to_string())),
                ("sales".to_string(), Value::Number(50.0)),
            ]
            .into_iter()
            .collect(),
        ]
    }

    fn staged_workspace() -> Workspace {
        let mut ws = Workspace::new(cfg());
        ws.add_dataset(
            "sales.csv",
            vec!["region".to_string(), "sales".to_string()],
            sales_rows(),
        );
        ws
    }

    const SPEC_RAW: &str = r#"{
        "summary": "sales",
        "kpis": [{"id":"k1","label":"Total","valueKey":"sales","aggregation":"sum"}],
        "charts": [{"id":"c1","title":"By region","type":"BAR","xAxisKey":"region","yAxisKey":"sales","description":""}],
        "dimensions": ["region"]
    }"#;

    fn ready_workspace() -> (Workspace, ClientStore) {
        let mut ws = staged_workspace();
        let mut st = store();
        let ticket = ws.begin_analysis().unwrap().unwrap();
        let applied = ws.complete_analysis(&ticket, Ok(SPEC_RAW.to_string()), &mut st);
        assert_eq!(applied, Applied::Ready);
        (ws, st)
    }

    #[test]
    fn test_initial_phase_empty() {
        let ws = Workspace::new(cfg());
        assert_eq!(ws.phase(), Phase::Empty);
        assert!(ws.spec().is_none());
    }

    #[test]
    fn test_add_dataset_stages() {
        let ws = staged_workspace();
        assert_eq!(ws.phase(), Phase::Staged);
        assert_eq!(ws.registry().len(), 1);
    }

    #[test]
    fn test_begin_analysis_from_empty_rejected() {
        let mut ws = Workspace::new(cfg());
        assert!(ws.begin_analysis().is_err());
    }

    #[test]
    fn test_second_begin_is_noop() {
        let mut ws = staged_workspace();
        let first = ws.begin_analysis().unwrap();
        assert!(first.is_some());
        let second = ws.begin_analysis().unwrap();
        assert!(second.is_none(), "no second request while analyzing");
        assert_eq!(ws.phase(), Phase::Analyzing);
    }

    #[test]
    fn test_successful_analysis_reaches_ready() {
        let (ws, _) = ready_workspace();
        assert_eq!(ws.phase(), Phase::Ready);
        assert_eq!(ws.spec().unwrap().kpis.len(), 1);
        assert!(ws.filters().is_empty());
        assert_eq!(ws.layout().unwrap().kpi_order, vec!["k1"]);
    }

    #[test]
    fn test_malformed_response_reaches_error() {
        let mut ws = staged_workspace();
        let mut st = store();
        let ticket = ws.begin_analysis().unwrap().unwrap();
        let applied = ws.complete_analysis(&ticket, Ok("not json".to_string()), &mut st);
        assert_eq!(applied, Applied::Failed);
        assert_eq!(ws.phase(), Phase::Error);
        assert!(matches!(ws.last_error(), Some(AnalysisError::MalformedSpec(_))));
    }

    #[test]
    fn test_transport_failure_reaches_error_then_retries() {
        let mut ws = staged_workspace();
        let mut st = store();
        let ticket = ws.begin_analysis().unwrap().unwrap();
        ws.complete_analysis(&ticket, Err(AnalysisError::Transport("boom".to_string())), &mut st);
        assert_eq!(ws.phase(), Phase::Error);

        // Explicit retry from Error is allowed.
        let ticket = ws.begin_analysis().unwrap().unwrap();
        let applied = ws.complete_analysis(&ticket, Ok(SPEC_RAW.to_string()), &mut st);
        assert_eq!(applied, Applied::Ready);
    }

    #[test]
    fn test_dataset_mutation_discards_late_response() {
        let mut ws = staged_workspace();
        let mut st = store();
        let ticket = ws.begin_analysis().unwrap().unwrap();
        // Mutation races the in-flight call.
        ws.add_dataset("more.csv", vec!["x".to_string()], vec![]);
        let applied = ws.complete_analysis(&ticket, Ok(SPEC_RAW.to_string()), &mut st);
        assert_eq!(applied, Applied::Stale);
        assert_eq!(ws.phase(), Phase::Staged);
        assert!(ws.spec().is_none());
    }

    #[test]
    fn test_reset_discards_late_response() {
        let mut ws = staged_workspace();
        let mut st = store();
        let ticket = ws.begin_analysis().unwrap().unwrap();
        ws.reset();
        assert_eq!(ws.phase(), Phase::Empty);
        let applied = ws.complete_analysis(&ticket, Ok(SPEC_RAW.to_string()), &mut st);
        assert_eq!(applied, Applied::Stale);
        assert_eq!(ws.phase(), Phase::Empty);
    }

    #[test]
    fn test_add_while_ready_returns_to_staged_and_clears_spec() {
        let (mut ws, _) = ready_workspace();
        ws.add_dataset("extra.csv", vec!["x".to_string()], vec![]);
        assert_eq!(ws.phase(), Phase::Staged);
        assert!(ws.spec().is_none());
        assert!(ws.layout().is_none());
    }

    #[test]
    fn test_remove_last_dataset_returns_to_empty() {
        let (mut ws, _) = ready_workspace();
        let id = ws.registry().primary().unwrap().id.clone();
        assert!(ws.remove_dataset(&id));
        assert_eq!(ws.phase(), Phase::Empty);
    }

    #[test]
    fn test_filtering_requires_ready() {
        let mut ws = staged_workspace();
        assert!(ws.set_filter("region", ["East".to_string()]).is_err());
        assert!(ws.clear_filters().is_err());
        assert!(ws.dimension_values("region").is_err());
    }

    #[test]
    fn test_filter_unknown_column_rejected() {
        let (mut ws, _) = ready_workspace();
        assert!(ws.set_filter("ghost", ["x".to_string()]).is_err());
    }

    #[test]
    fn test_filtered_rows_respond_to_filters() {
        let (mut ws, _) = ready_workspace();
        assert_eq!(ws.filtered_rows().len(), 2);
        ws.set_filter("region", ["East".to_string()]).unwrap();
        let rows = ws.filtered_rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["sales"], Value::Number(100.0));
    }

    #[test]
    fn test_slicer_columns_intersect_primary() {
        let (ws, _) = ready_workspace();
        assert_eq!(ws.slicer_columns(), vec!["region"]);
    }

    #[test]
    fn test_layout_editing_requires_ready() {
        let mut ws = staged_workspace();
        assert!(ws.set_edit_mode(true).is_err());
        assert!(ws.move_widget(WidgetKind::Kpi, "k1", 1).is_err());
        assert!(ws.toggle_hidden("k1").is_err());
    }

    #[test]
    fn test_saved_layout_survives_reanalysis_of_same_shape() {
        let (mut ws, mut st) = ready_workspace();
        ws.toggle_hidden("c1").unwrap();
        ws.save_layout(&mut st).unwrap();

        // Same dataset set re-staged: same spec shape loads the saved layout.
        let id = ws.registry().primary().unwrap().id.clone();
        let (columns, rows) = (
            vec!["region".to_string(), "sales".to_string()],
            sales_rows(),
        );
        ws.remove_dataset(&id);
        ws.add_dataset("sales.csv", columns, rows);
        let ticket = ws.begin_analysis().unwrap().unwrap();
        ws.complete_analysis(&ticket, Ok(SPEC_RAW.to_string()), &mut st);
        assert!(ws.layout().unwrap().is_hidden("c1"));
    }

    #[test]
    fn test_reset_layout_restores_default_and_erases_record() {
        let (mut ws, mut st) = ready_workspace();
        ws.toggle_hidden("k1").unwrap();
        ws.save_layout(&mut st).unwrap();
        ws.reset_layout(&mut st).unwrap();
        assert!(!ws.layout().unwrap().is_hidden("k1"));
        let sig = ws.signature().unwrap().to_string();
        assert_eq!(st.load_layout(&sig), None);
    }

    #[test]
    fn test_stale_persisted_layout_reconciled_on_load() {
        let (ws, mut st) = ready_workspace();
        let sig = ws.signature().unwrap().to_string();
        // Persist a record carrying a dead id and missing a live one.
        let corrupt = DashboardLayout {
            kpi_order: vec!["dead".to_string()],
            chart_order: vec!["c1".to_string()],
            hidden_ids: Default::default(),
        };
        st.save_layout(&sig, &corrupt, 0).unwrap();

        let mut ws2 = staged_workspace();
        let ticket = ws2.begin_analysis().unwrap().unwrap();
        ws2.complete_analysis(&ticket, Ok(SPEC_RAW.to_string()), &mut st);
        let layout = ws2.layout().unwrap();
        assert_eq!(layout.kpi_order, vec!["k1"]);
        assert_eq!(layout.chart_order, vec!["c1"]);
    }
}
