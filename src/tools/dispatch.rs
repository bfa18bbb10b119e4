//! Tool dispatch.
//!
//! A call moves through: look up the tool, parse and validate its arguments
//! into a [`ToolPlan`], check the table is loaded, compose (or screen) the
//! query, execute it, and render the result. Any failure along the way is
//! turned into classified error text; nothing escapes [`Dispatcher::dispatch`].

use crate::engine::{Engine, Gateway, TableRegistry, loader};
use crate::error::{ErrorKind, KdbError, KdbResult};
use crate::models::query::{ComposedQuery, Limit};
use crate::models::result::EngineResult;
use crate::models::value::group_thousands;
use crate::tools::args::Arguments;
use crate::tools::catalog;
use crate::tools::compose::{self, Ticker, ToolPlan};
use crate::tools::format::{self, RenderOptions};
use crate::tools::identifier::Identifier;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, warn};

/// Text handed back to the MCP client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolResponse {
    pub text: String,
    pub is_error: bool,
}

impl ToolResponse {
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: false,
        }
    }

    pub fn error(err: &KdbError) -> Self {
        Self {
            text: err.to_string(),
            is_error: true,
        }
    }
}

/// Routes tool calls to the engine.
#[derive(Debug)]
pub struct Dispatcher<E: Engine = Gateway> {
    engine: Arc<E>,
    registry: Arc<TableRegistry>,
    data_dir: Option<PathBuf>,
    render: RenderOptions,
}

impl<E: Engine> Dispatcher<E> {
    pub fn new(engine: Arc<E>, registry: Arc<TableRegistry>) -> Self {
        Self {
            engine,
            registry,
            data_dir: None,
            render: RenderOptions::default(),
        }
    }

    /// Directory reported by `server_info` and scanned by [`Self::startup`].
    pub fn with_data_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.data_dir = dir;
        self
    }

    pub fn with_render_options(mut self, render: RenderOptions) -> Self {
        self.render = render;
        self
    }

    pub fn engine(&self) -> &Arc<E> {
        &self.engine
    }

    pub fn registry(&self) -> &Arc<TableRegistry> {
        &self.registry
    }

    pub fn data_dir(&self) -> Option<&Path> {
        self.data_dir.as_deref()
    }

    /// Load the data directory, if any, then sync the registry with the
    /// tables the engine already holds. Failures are logged, not returned.
    pub async fn startup(&self) {
        if let Some(dir) = &self.data_dir
            && let Err(err) = loader::load_directory(&*self.engine, &self.registry, dir).await
        {
            warn!(dir = %dir.display(), error = %err, "Failed to load data directory");
        }
        if let Err(err) = self.refresh_tables().await {
            warn!(error = %err, "Could not list engine tables at startup");
        }
    }

    /// Release engine connections.
    pub async fn shutdown(&self) {
        self.engine.close().await;
    }

    /// Run one tool call. Never fails; errors come back as text.
    pub async fn dispatch(&self, name: &str, arguments: &Map<String, Value>) -> ToolResponse {
        let start = Instant::now();
        let result = self.run(name, arguments).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(text) => {
                debug!(tool = name, elapsed_ms, "Tool call completed");
                ToolResponse::ok(text)
            }
            Err(err) => {
                let kind = err.kind();
                if kind == ErrorKind::Unclassified {
                    error!(tool = name, elapsed_ms, error = %err, "Tool call failed");
                } else {
                    warn!(tool = name, elapsed_ms, kind = %kind, error = %err, "Tool call rejected");
                }
                ToolResponse::error(&err)
            }
        }
    }

    async fn run(&self, name: &str, arguments: &Map<String, Value>) -> KdbResult<String> {
        let spec = catalog::lookup(name).ok_or_else(|| KdbError::unknown_tool(name))?;
        let plan = (spec.parse)(&Arguments::new(arguments))?;

        if let Some(table) = plan.table() {
            self.ensure_table(table).await?;
        }

        match &plan {
            ToolPlan::ListTables => self.list_tables().await,
            ToolPlan::ServerInfo => self.server_info().await,
            ToolPlan::TableCount { table } => self.table_count(table).await,
            ToolPlan::FilterBySymbol {
                table,
                symbol,
                limit,
            } => self.filter_by_symbol(&plan, table, symbol, *limit).await,
            ToolPlan::ExecuteQuery { query, max_rows } => {
                self.execute_query(query, *max_rows).await
            }
            ToolPlan::LoadTable { path, name } => self.load_table(path, name).await,
            _ => self.run_template(&plan).await,
        }
    }

    async fn run_template(&self, plan: &ToolPlan) -> KdbResult<String> {
        let query = plan
            .compose()
            .ok_or_else(|| KdbError::internal("tool has no query template"))?;
        let result = self.execute(&query).await?;
        Ok(format!("{}:\n{}", plan.header(), self.render(&result)))
    }

    async fn execute(&self, query: &ComposedQuery) -> KdbResult<EngineResult> {
        debug!(query = %query, "Executing");
        Ok(EngineResult::from(self.engine.execute(query).await?))
    }

    fn render(&self, result: &EngineResult) -> String {
        format::render(result, self.render)
    }

    async fn count(&self, query: &ComposedQuery) -> KdbResult<i64> {
        loader::row_count(&self.engine.execute(query).await?)
    }

    /// Fail with NotFound unless the engine holds `table`. A registry miss
    /// triggers one refresh from the engine before giving up.
    async fn ensure_table(&self, table: &Identifier) -> KdbResult<()> {
        if self.registry.contains(table.as_str()).await {
            return Ok(());
        }
        self.refresh_tables().await?;
        if self.registry.contains(table.as_str()).await {
            Ok(())
        } else {
            Err(KdbError::table_not_found(table.as_str()))
        }
    }

    /// Replace the registry contents with the engine's `tables[]`.
    async fn refresh_tables(&self) -> KdbResult<Vec<String>> {
        let value = self.engine.execute(&compose::list_tables()).await?;
        let names = value.as_symbols().ok_or_else(|| {
            KdbError::protocol(format!(
                "expected a symbol list from tables[], got {}",
                value.to_inline_string()
            ))
        })?;
        self.registry.replace(names.iter().cloned()).await;
        Ok(names)
    }

    async fn list_tables(&self) -> KdbResult<String> {
        let names = self.refresh_tables().await?;
        if names.is_empty() {
            return Ok("No tables found in the current session.".to_string());
        }
        let listing: Vec<String> = names.iter().map(|t| format!("  - {t}")).collect();
        Ok(format!(
            "Available tables ({}):\n{}",
            names.len(),
            listing.join("\n")
        ))
    }

    async fn table_count(&self, table: &Identifier) -> KdbResult<String> {
        let rows = self.count(&compose::table_count(table)).await?;
        Ok(format!("Table '{table}' has {} rows", group_thousands(rows)))
    }

    async fn filter_by_symbol(
        &self,
        plan: &ToolPlan,
        table: &Identifier,
        symbol: &Ticker,
        limit: Limit,
    ) -> KdbResult<String> {
        let total = self.count(&compose::symbol_count(table, symbol)).await?;
        let query = plan
            .compose()
            .ok_or_else(|| KdbError::internal("tool has no query template"))?;
        let result = self.execute(&query).await?;
        Ok(format!(
            "{} ({} total rows, showing {limit}):\n{}",
            plan.header(),
            group_thousands(total),
            self.render(&result)
        ))
    }

    async fn execute_query(&self, raw: &str, max_rows: Limit) -> KdbResult<String> {
        let query = ComposedQuery::screened(raw)?;
        let mut result = self.execute(&query).await?;
        let header = if result.truncate(max_rows.as_usize()) {
            format!("Query result (limited to {max_rows} rows)")
        } else {
            "Query result".to_string()
        };
        Ok(format!("{header}:\n{}", self.render(&result)))
    }

    async fn server_info(&self) -> KdbResult<String> {
        let version = match self.engine.execute(&compose::engine_version()).await {
            Ok(value) => value.to_inline_string(),
            Err(err) => {
                debug!(error = %err, "Engine version unavailable");
                "unknown".to_string()
            }
        };
        let tables = match self.refresh_tables().await {
            Ok(names) => names,
            Err(err) => {
                warn!(error = %err, "Falling back to cached table list");
                self.registry.names().await
            }
        };

        let mut lines = vec![
            "KDB+ MCP Server Info:".to_string(),
            format!("  Server Version: {version}"),
            format!("  Engine: {}", self.engine.endpoint()),
            format!(
                "  Data Directory: {}",
                self.data_dir
                    .as_ref()
                    .map_or_else(|| "Not set".to_string(), |d| d.display().to_string())
            ),
            format!("  Loaded Tables ({}):", tables.len()),
        ];
        for name in &tables {
            let rows = match Identifier::parse(name) {
                Ok(table) => self.count(&compose::table_count(&table)).await.ok(),
                Err(_) => None,
            };
            lines.push(match rows {
                Some(rows) => format!("    {name}: {} rows", group_thousands(rows)),
                None => format!("    {name}: N/A"),
            });
        }
        Ok(lines.join("\n"))
    }

    async fn load_table(&self, path: &Path, name: &Identifier) -> KdbResult<String> {
        let loaded = loader::load_table(&*self.engine, &self.registry, path, name).await?;
        Ok(format!(
            "Loaded table '{}' with {} rows",
            loaded.name,
            group_thousands(loaded.rows)
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::value::{QAtom, QTable, QValue, type_code};
    use serde_json::json;
    use std::sync::Mutex;

    /// Answers a fixed set of queries and records what it was sent.
    #[derive(Default)]
    struct ScriptedEngine {
        sent: Mutex<Vec<String>>,
    }

    impl ScriptedEngine {
        fn sent(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl Engine for ScriptedEngine {
        async fn execute(&self, query: &ComposedQuery) -> KdbResult<QValue> {
            self.sent.lock().unwrap().push(query.as_str().to_string());
            match query.as_str() {
                "tables[]" => Ok(QValue::symbols(["stocks"])),
                "count stocks" => Ok(QValue::long(1_234_567)),
                ".z.K" => Ok(QValue::Atom(QAtom::Float(4.1))),
                q if q.starts_with("count select") => Ok(QValue::long(2)),
                q if q.starts_with("100#select") => Ok(QValue::Table(QTable::new(
                    vec!["symbol".into(), "close".into()],
                    vec![
                        QValue::symbols(["AAPL", "AAPL"]),
                        QValue::Vector {
                            type_code: type_code::FLOAT,
                            items: vec![QAtom::Float(150.5), QAtom::Float(151.0)],
                        },
                    ],
                ))),
                "til 500" => Ok(QValue::Vector {
                    type_code: type_code::LONG,
                    items: (0..500).map(QAtom::Long).collect(),
                }),
                "cols stocks" => Err(KdbError::engine("stocks")),
                other => Err(KdbError::engine(format!("unexpected {other}"))),
            }
        }

        fn endpoint(&self) -> String {
            "scripted".to_string()
        }
    }

    fn dispatcher() -> Dispatcher<ScriptedEngine> {
        Dispatcher::new(
            Arc::new(ScriptedEngine::default()),
            Arc::new(TableRegistry::new()),
        )
    }

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn test_table_count_grouped() {
        let d = dispatcher();
        let res = d.dispatch("table_count", &args(json!({"table_name": "stocks"}))).await;
        assert!(!res.is_error);
        assert_eq!(res.text, "Table 'stocks' has 1,234,567 rows");
    }

    #[tokio::test]
    async fn test_unknown_table_is_not_found() {
        let d = dispatcher();
        let res = d.dispatch("table_schema", &args(json!({"table_name": "trades"}))).await;
        assert!(res.is_error);
        assert!(res.text.starts_with("Not found"));
        assert_eq!(d.engine().sent(), vec!["tables[]"]);
    }

    #[tokio::test]
    async fn test_filter_by_symbol_reports_total() {
        let d = dispatcher();
        let res = d
            .dispatch("filter_by_symbol", &args(json!({"symbol": "aapl"})))
            .await;
        assert!(!res.is_error, "{}", res.text);
        assert!(res.text.starts_with("Data for AAPL (2 total rows, showing 100):\n"));
        assert!(res.text.contains("150.5"));
    }

    #[tokio::test]
    async fn test_execute_query_limited() {
        let d = dispatcher();
        let res = d
            .dispatch("execute_query", &args(json!({"query": "til 500", "max_rows": 3})))
            .await;
        assert_eq!(res.text, "Query result (limited to 3 rows):\n0\n1\n2");
    }

    #[tokio::test]
    async fn test_execute_query_blocked_without_engine_call() {
        let d = dispatcher();
        let res = d
            .dispatch("execute_query", &args(json!({"query": "system \"ls\""})))
            .await;
        assert!(res.is_error);
        assert!(res.text.starts_with("Query blocked for safety."));
        assert!(d.engine().sent().is_empty());
    }

    #[tokio::test]
    async fn test_engine_error_classified() {
        let d = dispatcher();
        let res = d.dispatch("column_names", &args(json!({"table_name": "stocks"}))).await;
        assert!(res.is_error);
        assert_eq!(res.text, "KDB+ error: stocks");
    }

    #[tokio::test]
    async fn test_server_info() {
        let d = dispatcher().with_data_dir(Some(PathBuf::from("/data")));
        let res = d.dispatch("server_info", &Map::new()).await;
        assert!(!res.is_error);
        assert!(res.text.contains("  Server Version: 4.1"));
        assert!(res.text.contains("  Engine: scripted"));
        assert!(res.text.contains("  Data Directory: /data"));
        assert!(res.text.contains("  Loaded Tables (1):\n    stocks: 1,234,567 rows"));
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let d = dispatcher();
        let res = d.dispatch("drop_all", &Map::new()).await;
        assert!(res.is_error);
        assert_eq!(res.text, "Unknown tool: drop_all");
        assert!(d.engine().sent().is_empty());
    }
}
