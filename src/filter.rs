//! Filter engine: per-column allowed-value sets over the primary dataset.
//!
//! Selection is a conjunction across columns and a disjunction within a
//! column's set. The filtered view is derived on read, never stored as
//! its own mutable state.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::dataset::Row;

/// Distinct values offered per slicer. High-cardinality columns are cut
/// to the most frequent values so the slicer stays usable.
pub const SLICER_VALUE_CAP: usize = 15;

/// Column → allowed values, keyed on the canonical value string. An
/// absent column imposes no constraint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterState {
    allowed: BTreeMap<String, BTreeSet<String>>,
}

impl FilterState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total replacement of the allowed set for `column`. Callers toggle
    /// membership themselves and hand over the complete new set; an empty
    /// set lifts the restriction.
    pub fn set_filter(&mut self, column: &str, values: impl IntoIterator<Item = String>) {
        let set: BTreeSet<String> = values.into_iter().collect();
        if set.is_empty() {
            self.allowed.remove(column);
        } else {
            self.allowed.insert(column.to_string(), set);
        }
    }

    pub fn clear_all(&mut self) {
        self.allowed.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.allowed.is_empty()
    }

    pub fn allowed(&self, column: &str) -> Option<&BTreeSet<String>> {
        self.allowed.get(column)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.allowed.keys().map(|k| k.as_str())
    }

    /// Drops restrictions on columns that no longer exist, keeping the
    /// state consistent with the primary dataset.
    pub fn retain_columns(&mut self, columns: &[String]) {
        self.allowed.retain(|col, _| columns.iter().any(|c| c == col));
    }

    pub fn matches(&self, row: &Row) -> bool {
        self.allowed.iter().all(|(column, set)| {
            let key = row
                .get(column)
                .map(|v| v.group_key())
                .unwrap_or_else(|| "Other".to_string());
            set.contains(&key)
        })
    }
}

/// The filtered row view every widget consumes. An empty state passes
/// rows through untouched.
pub fn filtered_rows(rows: &[Row], state: &FilterState) -> Vec<Row> {
    if state.is_empty() {
        return rows.to_vec();
    }
    rows.iter().filter(|r| state.matches(r)).cloned().collect()
}

/// Distinct values of `column` with occurrence counts, most frequent
/// first (ties break on the value), capped to `SLICER_VALUE_CAP`.
pub fn dimension_value_counts(rows: &[Row], column: &str) -> Vec<(String, u64)> {
    let mut counts: HashMap<String, u64> = HashMap::new();
    for row in rows {
        let key = row
            .get(column)
            .map(|v| v.group_key())
            .unwrap_or_else(|| "Other".to_string());
        *counts.entry(key).or_insert(0) += 1;
    }
    let mut out: Vec<(String, u64)> = counts.into_iter().collect();
    out.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    out.truncate(SLICER_VALUE_CAP);
    out
}
