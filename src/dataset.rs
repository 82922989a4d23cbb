use std::collections::{BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

/// A single cell value. Untagged so JSON arrays of objects deserialize
/// directly into rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Number(f64),
    Text(String),
    Null,
}

impl Value {
    /// Numeric coercion. Text parses if it holds a finite number, booleans
    /// coerce to 0/1, null and non-numeric text are not numbers.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) if n.is_finite() => Some(*n),
            Value::Number(_) => None,
            Value::Text(s) => {
                let t = s.trim();
                if t.is_empty() {
                    return None;
                }
                t.parse::<f64>().ok().filter(|n| n.is_finite())
            }
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Null => None,
        }
    }

    /// Canonical display string used for grouping keys and filter
    /// membership. Null collapses to "Other" so half-empty columns still
    /// chart (the slicer shows the same label).
    pub fn group_key(&self) -> String {
        match self {
            Value::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    format!("{}", *n as i64)
                } else {
                    format!("{}", n)
                }
            }
            Value::Text(s) => s.clone(),
            Value::Bool(b) => b.to_string(),
            Value::Null => "Other".to_string(),
        }
    }
}

pub type Row = HashMap<String, Value>;

/// An uploaded dataset. Immutable once registered; removal replaces the
/// registry's collection rather than mutating rows in place.
#[derive(Debug, Clone, Serialize)]
pub struct DatasetMetadata {
    pub id: String,
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    pub row_count: usize,
}

impl DatasetMetadata {
    pub fn new(id: impl Into<String>, name: impl Into<String>, columns: Vec<String>, rows: Vec<Row>) -> Self {
        let row_count = rows.len();
        Self { id: id.into(), name: name.into(), columns, rows, row_count }
    }
}

#[derive(Debug, Clone)]
pub struct DuplicateDatasetError {
    pub name: String,
}

impl fmt::Display for DuplicateDatasetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dataset named {:?} already registered", self.name)
    }
}

impl std::error::Error for DuplicateDatasetError {}

/// Owns every uploaded dataset. The first-added dataset is the primary
/// one: single-table preview and filtering always run against it.
#[derive(Debug, Default)]
pub struct DatasetRegistry {
    datasets: Vec<DatasetMetadata>,
    next_id: u64,
}

impl DatasetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a dataset under a fresh id. Duplicate names are allowed;
    /// ids stay distinct.
    pub fn add(&mut self, name: impl Into<String>, columns: Vec<String>, rows: Vec<Row>) -> String {
        self.next_id += 1;
        let id = format!("ds-{}", self.next_id);
        self.datasets.push(DatasetMetadata::new(id.clone(), name, columns, rows));
        id
    }

    /// Like `add`, but refuses a name that is already registered.
    pub fn add_unique(
        &mut self,
        name: impl Into<String>,
        columns: Vec<String>,
        rows: Vec<Row>,
    ) -> Result<String, DuplicateDatasetError> {
        let name = name.into();
        if self.datasets.iter().any(|d| d.name == name) {
            return Err(DuplicateDatasetError { name });
        }
        Ok(self.add(name, columns, rows))
    }

    /// Removes by id. Returns whether anything was removed; unknown ids
    /// are a no-op.
    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.datasets.len();
        self.datasets.retain(|d| d.id != id);
        self.datasets.len() != before
    }

    pub fn primary(&self) -> Option<&DatasetMetadata> {
        self.datasets.first()
    }

    pub fn get(&self, id: &str) -> Option<&DatasetMetadata> {
        self.datasets.iter().find(|d| d.id == id)
    }

    pub fn all(&self) -> &[DatasetMetadata] {
        &self.datasets
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }

    pub fn len(&self) -> usize {
        self.datasets.len()
    }

    pub fn clear(&mut self) {
        self.datasets.clear();
    }

    /// Column names occurring in two or more datasets. Advisory only:
    /// used to hint at join candidates, never to join automatically.
    pub fn shared_columns(&self) -> BTreeSet<String> {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for ds in &self.datasets {
            let unique: BTreeSet<&str> = ds.columns.iter().map(|c| c.as_str()).collect();
            for col in unique {
                *counts.entry(col).or_insert(0) += 1;
            }
        }
        counts
            .into_iter()
            .filter(|(_, n)| *n >= 2)
            .map(|(c, _)| c.to_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_value_numeric_coercion() {
        assert_eq!(Value::Number(3.5).as_number(), Some(3.5));
        assert_eq!(Value::Text("42".to_string()).as_number(), Some(42.0));
        assert_eq!(Value::Text(" 1.5 ".to_string()).as_number(), Some(1.5));
        assert_eq!(Value::Text("abc".to_string()).as_number(), None);
        assert_eq!(Value::Text("".to_string()).as_number(), None);
        assert_eq!(Value::Bool(true).as_number(), Some(1.0));
        assert_eq!(Value::Null.as_number(), None);
        assert_eq!(Value::Number(f64::NAN).as_number(), None);
    }

    #[test]
    fn test_value_group_key() {
        assert_eq!(Value::Number(10.0).group_key(), "10");
        assert_eq!(Value::Number(2.5).group_key(), "2.5");
        assert_eq!(Value::Text("East".to_string()).group_key(), "East");
        assert_eq!(Value::Null.group_key(), "Other");
    }

    #[test]
    fn test_registry_distinct_ids_for_duplicate_names() {
        let mut reg = DatasetRegistry::new();
        let a = reg.add("sales.csv", vec!["x".into()], vec![]);
        let b = reg.add("sales.csv", vec!["x".into()], vec![]);
        assert_ne!(a, b);
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn test_registry_add_unique_rejects() {
        let mut reg = DatasetRegistry::new();
        reg.add_unique("sales.csv", vec![], vec![]).unwrap();
        let err = reg.add_unique("sales.csv", vec![], vec![]).unwrap_err();
        assert_eq!(err.name, "sales.csv");
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_registry_primary_is_first_added() {
        let mut reg = DatasetRegistry::new();
        assert!(reg.primary().is_none());
        reg.add("first.csv", vec![], vec![]);
        reg.add("second.csv", vec![], vec![]);
        assert_eq!(reg.primary().unwrap().name, "first.csv");
    }

    #[test]
    fn test_registry_remove_unknown_is_noop() {
        let mut reg = DatasetRegistry::new();
        reg.add("a.csv", vec![], vec![]);
        assert!(!reg.remove("ds-999"));
        assert_eq!(reg.len(), 1);
        assert!(reg.remove("ds-1"));
        assert!(reg.is_empty());
    }

    #[test]
    fn test_shared_columns() {
        let mut reg = DatasetRegistry::new();
        reg.add("a", vec!["region".into(), "sales".into()], vec![]);
        reg.add("b", vec!["region".into(), "profit".into()], vec![]);
        reg.add("c", vec!["profit".into()], vec![]);
        let shared = reg.shared_columns();
        assert!(shared.contains("region"));
        assert!(shared.contains("profit"));
        assert!(!shared.contains("sales"));
    }

    #[test]
    fn test_row_count_matches_rows() {
        let rows = vec![row(&[("v", Value::Number(1.0))]), row(&[("v", Value::Number(2.0))])];
        let ds = DatasetMetadata::new("ds-1", "t", vec!["v".into()], rows);
        assert_eq!(ds.row_count, ds.rows.len());
    }
}
