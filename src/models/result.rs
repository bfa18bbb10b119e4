//! Shapes an engine result can take once decoded.

use crate::models::value::{QAtom, QTable, QValue};

/// A decoded engine result, classified for rendering.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineResult {
    Scalar(QAtom),
    /// Dictionary with one value per key, in key order.
    Record(Vec<(String, QValue)>),
    Table(QTable),
    List(Vec<QValue>),
    /// Strings, functions and anything else shown as-is.
    Opaque(String),
}

impl EngineResult {
    /// Rows (tables), items (lists) or entries (records); 1 otherwise.
    pub fn len(&self) -> usize {
        match self {
            Self::Table(t) => t.row_count(),
            Self::List(items) => items.len(),
            Self::Record(entries) => entries.len(),
            Self::Scalar(_) | Self::Opaque(_) => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keep the first `n` rows; true if anything was cut.
    pub fn truncate(&mut self, n: usize) -> bool {
        if self.len() <= n {
            return false;
        }
        match self {
            Self::Table(t) => t.truncate(n),
            Self::List(items) => items.truncate(n),
            Self::Record(entries) => entries.truncate(n),
            Self::Scalar(_) | Self::Opaque(_) => return false,
        }
        true
    }
}

impl From<QValue> for EngineResult {
    fn from(value: QValue) -> Self {
        match value {
            QValue::Atom(atom) => Self::Scalar(atom),
            QValue::CharVector(s) => Self::Opaque(s),
            QValue::Table(table) => Self::Table(table),
            QValue::List(items) => Self::List(items),
            QValue::Vector { items, .. } => Self::List(items.into_iter().map(QValue::Atom).collect()),
            QValue::Dict { keys, values } => record(&keys, &values).unwrap_or_else(|| {
                Self::Opaque(format!("{}!{}", keys.to_inline_string(), values.to_inline_string()))
            }),
            QValue::Function(text) => Self::Opaque(text),
            QValue::Nil => Self::Opaque("::".to_string()),
        }
    }
}

fn record(keys: &QValue, values: &QValue) -> Option<EngineResult> {
    let n = keys.count()?;
    if matches!(keys, QValue::Table(_)) || values.count()? != n {
        return None;
    }
    let entries = (0..n)
        .map(|i| Some((keys.item(i)?.to_inline_string(), values.item(i)?)))
        .collect::<Option<Vec<_>>>()?;
    Some(EngineResult::Record(entries))
}
