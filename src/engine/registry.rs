//! Registry of tables known to be loaded in the engine.

use std::collections::BTreeSet;
use tokio::sync::RwLock;

/// Sorted set of loaded table names.
///
/// Filled at startup, extended by `load_table`, and replaced whenever the
/// engine's own `tables[]` is re-read.
#[derive(Debug, Default)]
pub struct TableRegistry {
    tables: RwLock<BTreeSet<String>>,
}

impl TableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.tables.read().await.contains(name)
    }

    pub async fn insert(&self, name: impl Into<String>) {
        self.tables.write().await.insert(name.into());
    }

    /// Replace the whole set with the engine's current view.
    pub async fn replace(&self, names: impl IntoIterator<Item = String>) {
        let mut tables = self.tables.write().await;
        *tables = names.into_iter().collect();
    }

    pub async fn names(&self) -> Vec<String> {
        self.tables.read().await.iter().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.tables.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tables.read().await.is_empty()
    }
}
