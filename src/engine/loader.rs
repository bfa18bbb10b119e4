//! Loading splayed tables from disk into the engine.
//!
//! A splayed table is a directory holding one file per column plus a `.d`
//! file listing the column order.

use crate::engine::{Engine, TableRegistry};
use crate::error::{KdbError, KdbResult};
use crate::models::value::QValue;
use crate::tools::compose;
use crate::tools::identifier::Identifier;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Column order file present in every splayed table directory.
pub const COLUMN_ORDER_FILE: &str = ".d";

/// A table successfully loaded into the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedTable {
    pub name: Identifier,
    pub path: PathBuf,
    pub rows: i64,
}

pub fn is_splayed_table(path: &Path) -> bool {
    path.is_dir() && path.join(COLUMN_ORDER_FILE).is_file()
}

/// Check that `path` is a loadable splayed table and make it absolute.
pub fn resolve_table_path(path: &Path) -> KdbResult<PathBuf> {
    if !path.exists() {
        return Err(KdbError::validation(format!(
            "table path does not exist: {}",
            path.display()
        )));
    }
    if !is_splayed_table(path) {
        return Err(KdbError::validation(format!(
            "not a splayed table (missing {COLUMN_ORDER_FILE} file): {}",
            path.display()
        )));
    }
    path.canonicalize().map_err(|e| {
        KdbError::validation(format!("cannot resolve {}: {e}", path.display()))
    })
}

/// Table name for a path: the explicit name, or the directory name.
pub fn table_name_for(path: &Path, explicit: Option<&str>) -> KdbResult<Identifier> {
    match explicit {
        Some(name) => Identifier::parse_field("table_name", name),
        None => {
            let dir_name = path
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| {
                    KdbError::validation(format!(
                        "cannot derive a table name from {}",
                        path.display()
                    ))
                })?;
            Identifier::parse_field("table_name", dir_name)
        }
    }
}

/// Splayed tables directly under `dir`, sorted by name.
///
/// Subdirectories whose names are not valid identifiers are skipped with a
/// warning.
pub fn discover_tables(dir: &Path) -> KdbResult<Vec<(Identifier, PathBuf)>> {
    let entries = std::fs::read_dir(dir).map_err(|e| {
        KdbError::validation(format!("cannot read data directory {}: {e}", dir.display()))
    })?;

    let mut tables = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if !is_splayed_table(&path) {
            continue;
        }
        match table_name_for(&path, None) {
            Ok(name) => tables.push((name, path)),
            Err(err) => warn!(path = %path.display(), error = %err, "Skipping table directory"),
        }
    }
    tables.sort();
    Ok(tables)
}

/// Row count from a `count T` result.
pub fn row_count(value: &QValue) -> KdbResult<i64> {
    match value {
        QValue::Atom(atom) => atom
            .as_i64()
            .ok_or_else(|| KdbError::protocol(format!("expected a row count, got {atom}"))),
        other => Err(KdbError::protocol(format!(
            "expected a row count, got {}",
            other.to_inline_string()
        ))),
    }
}

/// Load one splayed table, register it, and return its row count.
pub async fn load_table<E: Engine>(
    engine: &E,
    registry: &TableRegistry,
    path: &Path,
    name: &Identifier,
) -> KdbResult<LoadedTable> {
    let path = resolve_table_path(path)?;
    engine.execute(&compose::load_splayed(name, &path)?).await?;
    registry.insert(name.as_str()).await;

    let rows = row_count(&engine.execute(&compose::table_count(name)).await?)?;
    info!(table = %name, rows, path = %path.display(), "Loaded table");
    Ok(LoadedTable {
        name: name.clone(),
        path,
        rows,
    })
}

/// Load every splayed table under `dir`. Failures are logged and skipped.
pub async fn load_directory<E: Engine>(
    engine: &E,
    registry: &TableRegistry,
    dir: &Path,
) -> KdbResult<Vec<LoadedTable>> {
    let mut loaded = Vec::new();
    for (name, path) in discover_tables(dir)? {
        match load_table(engine, registry, &path, &name).await {
            Ok(table) => loaded.push(table),
            Err(err) => warn!(table = %name, error = %err, "Failed to load table"),
        }
    }
    info!(dir = %dir.display(), tables = loaded.len(), "Data directory loaded");
    Ok(loaded)
}
