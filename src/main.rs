use anyhow::{anyhow, Result};
use serde_json::json;

use nexusdash::aggregate::{chart_series, format_kpi, kpi_value};
use nexusdash::analysis::ProviderKind;
use nexusdash::ingest;
use nexusdash::layout::WidgetKind;
use nexusdash::logging::{log, obj, v_num, v_str, Domain, Level};
use nexusdash::state::{Applied, Config, Phase, Workspace};
use nexusdash::storage::ClientStore;

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env();
    let provider = ProviderKind::from_env().build(&cfg);
    let mut store = ClientStore::new(&cfg.sqlite_path)?;
    store.init()?;
    let mut workspace = Workspace::new(cfg);

    let paths: Vec<String> = std::env::args().skip(1).collect();
    if paths.is_empty() {
        return Err(anyhow!("usage: nexusdash <dataset.csv|dataset.json>..."));
    }

    for path in &paths {
        let (name, columns, rows) = ingest::load_path(std::path::Path::new(path))?;
        log(
            Level::Info,
            Domain::Ingest,
            "dataset_loaded",
            obj(&[("name", v_str(&name)), ("rows", v_num(rows.len() as f64))]),
        );
        workspace.add_dataset(name, columns, rows);
    }

    let shared = workspace.registry().shared_columns();
    if !shared.is_empty() {
        let cols: Vec<&str> = shared.iter().map(|s| s.as_str()).collect();
        log(
            Level::Info,
            Domain::Workspace,
            "shared_columns",
            obj(&[("columns", v_str(&cols.join(",")))]),
        );
    }

    let ticket = workspace
        .begin_analysis()?
        .ok_or_else(|| anyhow!("analysis already in flight"))?;
    let outcome = provider.generate_spec(&ticket.request).await;
    match workspace.complete_analysis(&ticket, outcome, &mut store) {
        Applied::Ready => {}
        Applied::Stale => return Err(anyhow!("analysis response discarded as stale")),
        Applied::Failed => {
            let err = workspace
                .last_error()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown analysis failure".to_string());
            let hint = if workspace.last_error().map(|e| e.is_auth()).unwrap_or(false) {
                "set API_KEY and re-run"
            } else {
                "re-run to retry"
            };
            return Err(anyhow!("{} ({})", err, hint));
        }
    }

    debug_assert_eq!(workspace.phase(), Phase::Ready);
    render(&workspace)?;
    Ok(())
}

/// Prints the dashboard as JSON lines: the document header, each KPI with
/// its formatted value, and each chart's grouped series.
fn render(workspace: &Workspace) -> Result<()> {
    let spec = workspace
        .spec()
        .ok_or_else(|| anyhow!("no spec available after analysis"))?;
    let layout = workspace
        .layout()
        .ok_or_else(|| anyhow!("no layout available after analysis"))?;
    let rows = workspace.filtered_rows();

    println!(
        "{}",
        json!({
            "kind": "dashboard",
            "summary": spec.summary,
            "insights": spec.insights,
            "pages": spec.effective_pages().iter().map(|p| p.title.clone()).collect::<Vec<_>>(),
            "slicers": workspace.slicer_columns(),
        })
    );

    for id in layout.visible(WidgetKind::Kpi, false) {
        if let Some(kpi) = spec.kpi(&id) {
            let value = kpi_value(&rows, kpi);
            println!(
                "{}",
                json!({
                    "kind": "kpi",
                    "id": kpi.id,
                    "label": kpi.label,
                    "value": value.as_f64(),
                    "display": format_kpi(value, kpi),
                })
            );
        }
    }

    for id in layout.visible(WidgetKind::Chart, false) {
        let Some(chart) = spec.chart(&id) else { continue };
        match chart_series(&rows, chart) {
            Ok(points) => println!(
                "{}",
                json!({
                    "kind": "chart",
                    "id": chart.id,
                    "title": chart.title,
                    "type": chart.chart_type.as_str(),
                    "series": points,
                })
            ),
            Err(err) => println!(
                "{}",
                json!({
                    "kind": "chart",
                    "id": chart.id,
                    "title": chart.title,
                    "unsupported": err.to_string(),
                })
            ),
        }
    }

    Ok(())
}
