//! End-to-end pipeline scenarios: ingest → stage → analyze → validate →
//! aggregate → filter, with a scripted provider standing in for the
//! remote analysis service.

use async_trait::async_trait;

use nexusdash::aggregate::{kpi_value, KpiValue};
use nexusdash::analysis::{AnalysisError, AnalysisProvider};
use nexusdash::ingest::parse_named;
use nexusdash::spec::normalize;
use nexusdash::state::{Applied, Config, Phase, Workspace};
use nexusdash::storage::{ClientStore, Theme};

const SALES_CSV: &str = "region,sales\nEast,100\nWest,50\n";

const SALES_SPEC: &str = r#"{
    "summary": "Regional sales",
    "insights": ["East outsells West"],
    "kpis": [{"id":"k-total","label":"Total Sales","valueKey":"sales","aggregation":"sum","prefix":"$"}],
    "charts": [{"id":"c-region","title":"Sales by Region","type":"BAR","xAxisKey":"region","yAxisKey":"sales","description":""}],
    "dimensions": ["region"]
}"#;

/// Provider that returns a fixed response body.
struct ScriptedProvider {
    response: Result<String, AnalysisError>,
}

impl ScriptedProvider {
    fn ok(body: &str) -> Self {
        Self { response: Ok(body.to_string()) }
    }

    fn err(err: AnalysisError) -> Self {
        Self { response: Err(err) }
    }
}

#[async_trait]
impl AnalysisProvider for ScriptedProvider {
    async fn generate_spec(&self, _request: &serde_json::Value) -> Result<String, AnalysisError> {
        self.response.clone()
    }
}

fn test_config(sqlite_path: &str) -> Config {
    Config {
        sample_rows: 10,
        sqlite_path: sqlite_path.to_string(),
        api_key: None,
        gemini_base: String::new(),
        gemini_model: String::new(),
    }
}

fn memory_store() -> ClientStore {
    let mut store = ClientStore::open_in_memory().unwrap();
    store.init().unwrap();
    store
}

fn staged_workspace() -> Workspace {
    let (columns, rows) = parse_named("sales.csv", SALES_CSV).unwrap();
    let mut ws = Workspace::new(test_config(""));
    ws.add_dataset("sales.csv", columns, rows);
    ws
}

async fn run_analysis(ws: &mut Workspace, provider: &dyn AnalysisProvider, store: &mut ClientStore) -> Applied {
    let ticket = ws.begin_analysis().unwrap().expect("a request should be issued");
    let outcome = provider.generate_spec(&ticket.request).await;
    ws.complete_analysis(&ticket, outcome, store)
}

// ---------------------------------------------------------------------------
// P01: Upload → analyze → KPI, then slicer interaction recomputes the KPI
// without a second analysis call
// ---------------------------------------------------------------------------
#[tokio::test]
async fn p01_end_to_end_kpi_and_filter() {
    let mut ws = staged_workspace();
    let mut store = memory_store();
    let provider = ScriptedProvider::ok(SALES_SPEC);

    let applied = run_analysis(&mut ws, &provider, &mut store).await;
    assert_eq!(applied, Applied::Ready);
    assert_eq!(ws.phase(), Phase::Ready);

    let spec = ws.spec().unwrap();
    let kpi = spec.kpi("k-total").unwrap().clone();
    assert_eq!(kpi_value(&ws.filtered_rows(), &kpi), KpiValue::Value(150.0));

    ws.set_filter("region", ["East".to_string()]).unwrap();
    assert_eq!(kpi_value(&ws.filtered_rows(), &kpi), KpiValue::Value(100.0));

    ws.clear_filters().unwrap();
    assert_eq!(kpi_value(&ws.filtered_rows(), &kpi), KpiValue::Value(150.0));
}

// ---------------------------------------------------------------------------
// P02: Malformed response → Error phase, explicit retry recovers
// ---------------------------------------------------------------------------
#[tokio::test]
async fn p02_malformed_then_retry() {
    let mut ws = staged_workspace();
    let mut store = memory_store();

    let bad = ScriptedProvider::ok(r#"{"summary":"s","charts":[]}"#); // missing kpis
    assert_eq!(run_analysis(&mut ws, &bad, &mut store).await, Applied::Failed);
    assert_eq!(ws.phase(), Phase::Error);
    assert!(matches!(ws.last_error(), Some(AnalysisError::MalformedSpec(_))));

    let good = ScriptedProvider::ok(SALES_SPEC);
    assert_eq!(run_analysis(&mut ws, &good, &mut store).await, Applied::Ready);
}

// ---------------------------------------------------------------------------
// P03: Auth failure is distinguishable so the UI can offer a credential
// affordance
// ---------------------------------------------------------------------------
#[tokio::test]
async fn p03_auth_failure_classified() {
    let mut ws = staged_workspace();
    let mut store = memory_store();
    let provider = ScriptedProvider::err(AnalysisError::Auth("key revoked".to_string()));

    assert_eq!(run_analysis(&mut ws, &provider, &mut store).await, Applied::Failed);
    assert!(ws.last_error().unwrap().is_auth());
}

// ---------------------------------------------------------------------------
// P04: Dataset mutation while a call is in flight discards the late
// response instead of applying it to the new dataset set
// ---------------------------------------------------------------------------
#[tokio::test]
async fn p04_late_response_discarded() {
    let mut ws = staged_workspace();
    let mut store = memory_store();
    let provider = ScriptedProvider::ok(SALES_SPEC);

    let ticket = ws.begin_analysis().unwrap().unwrap();
    let outcome = provider.generate_spec(&ticket.request).await;

    let (columns, rows) = parse_named("other.csv", "a,b\n1,2\n").unwrap();
    ws.add_dataset("other.csv", columns, rows);

    assert_eq!(ws.complete_analysis(&ticket, outcome, &mut store), Applied::Stale);
    assert_eq!(ws.phase(), Phase::Staged);
    assert!(ws.spec().is_none());
}

// ---------------------------------------------------------------------------
// P05: Layout customization persists across a store reopen under the
// same signature, and reset restores the identity layout
// ---------------------------------------------------------------------------
#[tokio::test]
async fn p05_layout_round_trip_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("client.sqlite");
    let db_path = db.to_str().unwrap();

    let provider = ScriptedProvider::ok(SALES_SPEC);
    let signature;
    {
        let mut store = ClientStore::new(db_path).unwrap();
        store.init().unwrap();
        let mut ws = staged_workspace();
        run_analysis(&mut ws, &provider, &mut store).await;
        ws.toggle_hidden("c-region").unwrap();
        ws.save_layout(&mut store).unwrap();
        signature = ws.signature().unwrap().to_string();
    }

    {
        let mut store = ClientStore::new(db_path).unwrap();
        store.init().unwrap();
        let mut ws = staged_workspace();
        run_analysis(&mut ws, &provider, &mut store).await;
        assert_eq!(ws.signature().unwrap(), signature);
        assert!(ws.layout().unwrap().is_hidden("c-region"));

        ws.reset_layout(&mut store).unwrap();
        assert!(!ws.layout().unwrap().is_hidden("c-region"));
        assert_eq!(store.load_layout(&signature), None);
    }
}

// ---------------------------------------------------------------------------
// P06: Theme preference survives a reopen; corruption falls back to light
// ---------------------------------------------------------------------------
#[test]
fn p06_theme_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("client.sqlite");
    let db_path = db.to_str().unwrap();

    {
        let mut store = ClientStore::new(db_path).unwrap();
        store.init().unwrap();
        assert_eq!(store.theme(), Theme::Light);
        store.set_theme(Theme::Dark).unwrap();
    }
    {
        let mut store = ClientStore::new(db_path).unwrap();
        store.init().unwrap();
        assert_eq!(store.theme(), Theme::Dark);
    }
}

// ---------------------------------------------------------------------------
// P07: Export is a faithful projection: the exported document passes
// validation again and keeps ids and order
// ---------------------------------------------------------------------------
#[tokio::test]
async fn p07_export_revalidates() {
    let mut ws = staged_workspace();
    let mut store = memory_store();
    let provider = ScriptedProvider::ok(SALES_SPEC);
    run_analysis(&mut ws, &provider, &mut store).await;

    let exported = ws.spec().unwrap().export_json();
    let reparsed = normalize(&exported).unwrap();
    assert!(reparsed.warnings.is_empty());
    assert_eq!(reparsed.spec.kpi_ids(), ws.spec().unwrap().kpi_ids());
    assert_eq!(reparsed.spec.chart_ids(), ws.spec().unwrap().chart_ids());
}

// ---------------------------------------------------------------------------
// P08: Multi-dataset staging reports shared columns and sends the
// multi-dataset request form
// ---------------------------------------------------------------------------
#[test]
fn p08_multi_dataset_shared_columns() {
    let mut ws = staged_workspace();
    let (columns, rows) = parse_named("targets.csv", "region,target\nEast,120\n").unwrap();
    ws.add_dataset("targets.csv", columns, rows);

    let shared = ws.registry().shared_columns();
    assert!(shared.contains("region"));
    assert!(!shared.contains("sales"));

    let ticket = ws.begin_analysis().unwrap().unwrap();
    assert!(ticket.request.get("datasets").is_some());
}
