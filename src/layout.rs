//! Layout customization: user-controlled ordering and visibility for
//! dashboard widgets, keyed by a signature of the widget id set.
//!
//! The order lists are always a permutation of the live id set. Every
//! render passes through `reconcile`, so a spec that gained or lost
//! widgets needs no migration step: new ids append, dead ids fall out.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::spec::DashboardSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WidgetKind {
    Kpi,
    Chart,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardLayout {
    pub kpi_order: Vec<String>,
    pub chart_order: Vec<String>,
    pub hidden_ids: BTreeSet<String>,
}

/// Persistence key for a spec's layout: a digest over the sorted id set.
/// Two specs with the same widget ids share a signature on purpose:
/// same-shape dashboards get the same saved customization.
pub fn signature_for_spec(spec: &DashboardSpec) -> String {
    let mut parts: Vec<String> = spec.kpis.iter().map(|k| format!("k:{}", k.id)).collect();
    parts.extend(spec.charts.iter().map(|c| format!("c:{}", c.id)));
    digest_sorted(parts)
}

/// Single-table variant keyed off the dataset's column set.
pub fn signature_for_columns(columns: &[String]) -> String {
    digest_sorted(columns.iter().map(|c| format!("col:{}", c)).collect())
}

fn digest_sorted(mut parts: Vec<String>) -> String {
    parts.sort();
    let mut hasher = Sha256::new();
    for part in &parts {
        hasher.update(part.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

impl DashboardLayout {
    /// Identity layout: the spec's natural order, nothing hidden.
    pub fn default_for(spec: &DashboardSpec) -> Self {
        Self {
            kpi_order: spec.kpi_ids(),
            chart_order: spec.chart_ids(),
            hidden_ids: BTreeSet::new(),
        }
    }

    /// Restores the permutation invariant against the live id sets:
    /// stale ids are pruned, missing live ids are appended in their
    /// natural order.
    pub fn reconcile(&mut self, live_kpi_ids: &[String], live_chart_ids: &[String]) {
        reconcile_order(&mut self.kpi_order, live_kpi_ids);
        reconcile_order(&mut self.chart_order, live_chart_ids);
        self.hidden_ids.retain(|id| {
            live_kpi_ids.iter().any(|k| k == id) || live_chart_ids.iter().any(|c| c == id)
        });
    }

    /// Swaps `id` with its neighbor; positive `delta` moves toward the
    /// end. No-op at either boundary or for unknown ids.
    pub fn move_widget(&mut self, kind: WidgetKind, id: &str, delta: isize) {
        let order = match kind {
            WidgetKind::Kpi => &mut self.kpi_order,
            WidgetKind::Chart => &mut self.chart_order,
        };
        let Some(idx) = order.iter().position(|x| x == id) else {
            return;
        };
        let target = match delta.signum() {
            1 => idx + 1,
            -1 => {
                if idx == 0 {
                    return;
                }
                idx - 1
            }
            _ => return,
        };
        if target < order.len() {
            order.swap(idx, target);
        }
    }

    pub fn toggle_hidden(&mut self, id: &str) {
        if !self.hidden_ids.remove(id) {
            self.hidden_ids.insert(id.to_string());
        }
    }

    pub fn is_hidden(&self, id: &str) -> bool {
        self.hidden_ids.contains(id)
    }

    /// Render order for one widget kind. Edit mode keeps hidden widgets
    /// in the list (the view marks them); otherwise they are excluded
    /// entirely.
    pub fn visible(&self, kind: WidgetKind, edit_mode: bool) -> Vec<String> {
        let order = match kind {
            WidgetKind::Kpi => &self.kpi_order,
            WidgetKind::Chart => &self.chart_order,
        };
        order
            .iter()
            .filter(|id| edit_mode || !self.hidden_ids.contains(*id))
            .cloned()
            .collect()
    }
}

fn reconcile_order(order: &mut Vec<String>, live: &[String]) {
    order.retain(|id| live.iter().any(|l| l == id));
    // Dedup defensively: a corrupt persisted record must not survive.
    let mut seen = BTreeSet::new();
    order.retain(|id| seen.insert(id.clone()));
    for id in live {
        if !order.iter().any(|x| x == id) {
            order.push(id.clone());
        }
    }
}
