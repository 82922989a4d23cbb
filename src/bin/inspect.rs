//! Offline inspection: validate a saved spec document against a dataset
//! file and dump what each widget would compute. No network, no storage.

use anyhow::{anyhow, Result};
use serde_json::json;

use nexusdash::aggregate::{chart_series, format_kpi, kpi_value};
use nexusdash::ingest;
use nexusdash::spec::normalize;

fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let (Some(dataset_path), Some(spec_path)) = (args.next(), args.next()) else {
        return Err(anyhow!("usage: inspect <dataset.csv|json> <spec.json>"));
    };

    let (name, columns, rows) = ingest::load_path(std::path::Path::new(&dataset_path))?;
    let raw = std::fs::read_to_string(&spec_path)?;
    let normalized = normalize(&raw)?;

    println!(
        "{}",
        json!({
            "dataset": name,
            "columns": columns,
            "rows": rows.len(),
            "warnings": normalized.warnings,
        })
    );

    let spec = &normalized.spec;
    for kpi in &spec.kpis {
        let value = kpi_value(&rows, kpi);
        println!(
            "{}",
            json!({
                "kpi": kpi.id,
                "label": kpi.label,
                "aggregation": kpi.aggregation.as_str(),
                "display": format_kpi(value, kpi),
            })
        );
    }
    for chart in &spec.charts {
        match chart_series(&rows, chart) {
            Ok(points) => println!(
                "{}",
                json!({ "chart": chart.id, "type": chart.chart_type.as_str(), "points": points.len() })
            ),
            Err(err) => println!("{}", json!({ "chart": chart.id, "unsupported": err.to_string() })),
        }
    }
    Ok(())
}
