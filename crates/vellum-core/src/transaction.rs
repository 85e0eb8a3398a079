//! Transactions: a recorded list of steps applied atomically on commit.

use vellum_query::Query;

use crate::namespace::ItemMode;

/// One recorded step.
#[derive(Debug, Clone)]
pub enum TxStep {
    /// An item mutation, staged as JSON.
    Item { json: String, mode: ItemMode },
    /// A query-shaped update/delete/truncate.
    Query(Query),
}

/// A transaction bound to one namespace. Steps are applied on commit:
/// either in place under the write lock, or replayed onto a namespace
/// copy that is atomically swapped in.
#[derive(Debug, Clone)]
pub struct Transaction {
    pub namespace: String,
    pub(crate) steps: Vec<TxStep>,
}

impl Transaction {
    #[must_use]
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            steps: Vec::new(),
        }
    }

    pub fn insert(&mut self, json: impl Into<String>) {
        self.modify(json, ItemMode::Insert);
    }

    pub fn update(&mut self, json: impl Into<String>) {
        self.modify(json, ItemMode::Update);
    }

    pub fn upsert(&mut self, json: impl Into<String>) {
        self.modify(json, ItemMode::Upsert);
    }

    pub fn delete(&mut self, json: impl Into<String>) {
        self.modify(json, ItemMode::Delete);
    }

    pub fn modify(&mut self, json: impl Into<String>, mode: ItemMode) {
        self.steps.push(TxStep::Item {
            json: json.into(),
            mode,
        });
    }

    /// Stage a query-shaped step (update/delete/truncate).
    pub fn query(&mut self, query: Query) {
        self.steps.push(TxStep::Query(query));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}
