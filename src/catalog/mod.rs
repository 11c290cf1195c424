//! Schema catalog: the authority on which datasets and columns exist.
//!
//! The catalog is built once at startup and shared read-only across
//! requests. Resolution is case-sensitive exact matching; anything the
//! catalog cannot resolve is rejected during compilation, which is what
//! keeps identifier injection out of the rendered SQL.

use std::collections::HashMap;
use std::sync::Arc;

use crate::spec::SemanticType;

/// A fully resolved column: the only way identifiers enter a plan.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnRef {
    pub dataset: String,
    pub name: String,
    pub semantic_type: SemanticType,
    pub nullable: bool,
}

impl ColumnRef {
    pub fn new(
        dataset: impl Into<String>,
        name: impl Into<String>,
        semantic_type: SemanticType,
    ) -> Self {
        ColumnRef {
            dataset: dataset.into(),
            name: name.into(),
            semantic_type,
            nullable: true,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Output label used for raw projections: `dataset.name`.
    pub fn output_label(&self) -> String {
        format!("{}.{}", self.dataset, self.name)
    }
}

/// Read-only schema lookup shared by the compiler and the plan builder.
pub trait SchemaCatalog: Send + Sync {
    /// Resolves a column within a dataset, or `None` if either is unknown.
    fn resolve_column(&self, dataset: &str, name: &str) -> Option<ColumnRef>;

    /// All columns of a dataset in declaration order, or `None` if the
    /// dataset is unknown.
    fn list_columns(&self, dataset: &str) -> Option<&[ColumnRef]>;

    fn has_dataset(&self, dataset: &str) -> bool {
        self.list_columns(dataset).is_some()
    }
}

impl<T: SchemaCatalog + ?Sized> SchemaCatalog for Arc<T> {
    fn resolve_column(&self, dataset: &str, name: &str) -> Option<ColumnRef> {
        (**self).resolve_column(dataset, name)
    }

    fn list_columns(&self, dataset: &str) -> Option<&[ColumnRef]> {
        (**self).list_columns(dataset)
    }
}

/// In-memory catalog keyed by dataset name.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    datasets: HashMap<String, Vec<ColumnRef>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        MemoryCatalog::default()
    }

    /// Registers a dataset with its columns in declaration order.
    /// Replaces any previous registration under the same name.
    pub fn add_dataset(&mut self, dataset: impl Into<String>, columns: Vec<ColumnRef>) {
        self.datasets.insert(dataset.into(), columns);
    }

    pub fn dataset_count(&self) -> usize {
        self.datasets.len()
    }
}

impl SchemaCatalog for MemoryCatalog {
    fn resolve_column(&self, dataset: &str, name: &str) -> Option<ColumnRef> {
        self.datasets
            .get(dataset)?
            .iter()
            .find(|c| c.name == name)
            .cloned()
    }

    fn list_columns(&self, dataset: &str) -> Option<&[ColumnRef]> {
        self.datasets.get(dataset).map(|v| v.as_slice())
    }
}
