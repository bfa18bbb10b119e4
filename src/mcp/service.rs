//! MCP service implementation using rmcp.
//!
//! Every `tools/call` goes straight to the [`Dispatcher`] with its raw JSON
//! arguments, so unknown tool names and malformed arguments come back as
//! classified error text rather than protocol errors. The argument structs
//! below only describe each tool's input schema for `tools/list`.

use crate::tools::dispatch::{Dispatcher, ToolResponse};
use rmcp::{
    ErrorData as McpError, RoleServer, ServerHandler,
    handler::server::tool::schema_for_type,
    model::{
        CallToolRequestParam, CallToolResult, Content, EmptyObject, Implementation,
        ListToolsResult, PaginatedRequestParam, ProtocolVersion, ServerCapabilities, ServerInfo,
        Tool,
    },
    schemars::JsonSchema,
    service::RequestContext,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Arguments naming one table.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TableArgs {
    /// Name of the table
    pub table_name: String,
}

/// Arguments for the market-data tools that only need a table.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct MarketTableArgs {
    /// Name of the table. Default: stocks
    #[serde(default)]
    pub table_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TableSampleArgs {
    /// Name of the table
    pub table_name: String,
    /// Number of rows to return. Default: 10, max: 100
    #[serde(default)]
    pub num_rows: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DistinctValuesArgs {
    /// Name of the table
    pub table_name: String,
    /// Name of the column
    pub column_name: String,
    /// Maximum distinct values to return. Default: 50, max: 500
    #[serde(default)]
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ColumnArgs {
    /// Name of the table
    pub table_name: String,
    /// Name of the numeric column
    pub column_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CountByGroupArgs {
    /// Name of the table
    pub table_name: String,
    /// Column to group by
    pub group_column: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DateRangeArgs {
    /// Name of the table
    pub table_name: String,
    /// Date or timestamp column. Default: timestamp
    #[serde(default)]
    pub date_column: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DataPointsPerDayArgs {
    /// Name of the table
    pub table_name: String,
    /// Date or timestamp column. Default: timestamp
    #[serde(default)]
    pub date_column: Option<String>,
    /// Number of days to return. Default: 10, max: 1000
    #[serde(default)]
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct PriceArgs {
    /// Name of the table. Default: stocks
    #[serde(default)]
    pub table_name: Option<String>,
    /// Price column (open, high, low, close). Default: close
    #[serde(default)]
    pub price_column: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct TopVolumeArgs {
    /// Name of the table. Default: stocks
    #[serde(default)]
    pub table_name: Option<String>,
    /// Number of records to return. Default: 10, max: 1000
    #[serde(default)]
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FilterBySymbolArgs {
    /// Name of the table. Default: stocks
    #[serde(default)]
    pub table_name: Option<String>,
    /// Stock symbol (e.g. AAPL)
    pub symbol: String,
    /// Maximum rows to return. Default: 100, max: 1000
    #[serde(default)]
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PriceThresholdArgs {
    /// Name of the table. Default: stocks
    #[serde(default)]
    pub table_name: Option<String>,
    /// Price column. Default: close
    #[serde(default)]
    pub price_column: Option<String>,
    /// Price threshold
    pub threshold: f64,
    /// Comparison: gt, lt, gte or lte. Default: gt
    #[serde(default)]
    pub operator: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct DateFilterArgs {
    /// Name of the table. Default: stocks
    #[serde(default)]
    pub table_name: Option<String>,
    /// Everything from January 1st of this year
    #[serde(default)]
    pub year: Option<i64>,
    /// Range start (YYYY.MM.DD). Requires end_date
    #[serde(default)]
    pub start_date: Option<String>,
    /// Range end (YYYY.MM.DD). Requires start_date
    #[serde(default)]
    pub end_date: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SymbolSummaryArgs {
    /// Name of the table. Default: stocks
    #[serde(default)]
    pub table_name: Option<String>,
    /// Stock symbol (e.g. AAPL)
    pub symbol: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DailyOhlcArgs {
    /// Name of the table. Default: stocks
    #[serde(default)]
    pub table_name: Option<String>,
    /// Stock symbol (e.g. AAPL)
    pub symbol: String,
    /// Number of days to return. Default: 10, max: 1000
    #[serde(default)]
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ExecuteQueryArgs {
    /// q expression to evaluate
    pub query: String,
    /// Maximum rows to return. Default: 100, max: 10000
    #[serde(default)]
    pub max_rows: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct LoadTableArgs {
    /// Path to the splayed table directory
    pub table_path: String,
    /// Name for the table in the session. Default: the directory name
    #[serde(default)]
    pub table_name: Option<String>,
}

impl From<ToolResponse> for CallToolResult {
    fn from(response: ToolResponse) -> Self {
        let content = vec![Content::text(response.text)];
        if response.is_error {
            CallToolResult::error(content)
        } else {
            CallToolResult::success(content)
        }
    }
}

fn tool<A: JsonSchema + 'static>(name: &'static str, description: &'static str) -> Tool {
    Tool::new(name, description, schema_for_type::<A>())
}

/// Definitions advertised by `tools/list`, one per catalog entry.
fn tool_definitions() -> Vec<Tool> {
    vec![
        tool::<EmptyObject>("list_tables", "List all tables available in the KDB+ session"),
        tool::<TableArgs>(
            "table_schema",
            "Get the schema (column names, types, attributes) of a table using meta",
        ),
        tool::<TableArgs>("table_count", "Get the number of rows in a table"),
        tool::<TableSampleArgs>("table_sample", "Get sample rows from a table (first N rows)"),
        tool::<TableArgs>("column_names", "Get the list of column names in a table"),
        tool::<DistinctValuesArgs>(
            "distinct_values",
            "Get distinct values in a column (useful for symbols, categories)",
        ),
        tool::<CountByGroupArgs>(
            "count_by_group",
            "Get row counts grouped by a column (distribution)",
        ),
        tool::<DateRangeArgs>("date_range", "Get the min and max dates/timestamps in a table"),
        tool::<DataPointsPerDayArgs>(
            "data_points_per_day",
            "Count data points per day for time series analysis",
        ),
        tool::<ColumnArgs>(
            "column_stats",
            "Get basic statistics for a numeric column (count, nulls, distinct count)",
        ),
        tool::<PriceArgs>(
            "average_price_by_symbol",
            "Calculate average price (close) for each symbol",
        ),
        tool::<PriceArgs>("price_range_by_symbol", "Get min, max, and price range for each symbol"),
        tool::<PriceArgs>("highest_prices", "Get the highest (max) price for each symbol"),
        tool::<PriceArgs>(
            "price_volatility",
            "Calculate price volatility (standard deviation) for each symbol",
        ),
        tool::<PriceArgs>(
            "price_statistics",
            "Get comprehensive price stats: avg, median, std dev for each symbol",
        ),
        tool::<MarketTableArgs>(
            "average_volume_by_symbol",
            "Calculate average trading volume for each symbol",
        ),
        tool::<MarketTableArgs>(
            "total_volume_by_symbol",
            "Calculate total trading volume for each symbol",
        ),
        tool::<TopVolumeArgs>("top_volume_records", "Get records with the highest trading volume"),
        tool::<FilterBySymbolArgs>(
            "filter_by_symbol",
            "Get data for a specific stock symbol.\n\
             Reports the total matching row count plus up to `limit` rows.",
        ),
        tool::<PriceThresholdArgs>(
            "filter_by_price_threshold",
            "Get records where price exceeds a threshold",
        ),
        tool::<DateFilterArgs>(
            "filter_by_date",
            "Get data from a specific year or date range.\n\
             Provide either `year` or both `start_date` and `end_date`.",
        ),
        tool::<SymbolSummaryArgs>(
            "symbol_summary",
            "Get a summary for a specific symbol: count, avg price, avg volume",
        ),
        tool::<DailyOhlcArgs>(
            "daily_ohlc",
            "Get daily OHLC (Open, High, Low, Close) aggregation for a symbol",
        ),
        tool::<MarketTableArgs>(
            "price_change_analysis",
            "Analyze daily price ranges and spread percentages by symbol",
        ),
        tool::<ExecuteQueryArgs>(
            "execute_query",
            "Execute a custom q query. Use for complex queries not covered by other tools.\n\
             Dangerous operations (system commands, exit, file deletion, ...) are blocked.\n\
             Results longer than `max_rows` are cut.",
        ),
        tool::<EmptyObject>(
            "server_info",
            "Get information about the KDB+ engine and loaded tables",
        ),
        tool::<LoadTableArgs>(
            "load_table",
            "Load a splayed table from disk into the session.\n\
             The directory must contain a .d file.",
        ),
    ]
}

#[derive(Clone)]
pub struct KdbService {
    /// Shared dispatcher for all tool calls
    dispatcher: Arc<Dispatcher>,
    /// Tool definitions served by `tools/list`
    tools: Arc<Vec<Tool>>,
}

impl KdbService {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            tools: Arc::new(tool_definitions()),
        }
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn tools(&self) -> &[Tool] {
        &self.tools
    }

    /// Run one tool call. Missing arguments are treated as an empty object.
    pub async fn call(&self, name: &str, arguments: Option<Map<String, Value>>) -> CallToolResult {
        let arguments = arguments.unwrap_or_default();
        self.dispatcher.dispatch(name, &arguments).await.into()
    }
}

impl ServerHandler for KdbService {
    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        Ok(self.call(&request.name, request.arguments).await)
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        Ok(ListToolsResult::with_all_items(self.tools.to_vec()))
    }

    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2025_03_26,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "kdb-mcp-server".to_owned(),
                title: Some("KDB+ MCP Server".to_owned()),
                version: env!("CARGO_PKG_VERSION").to_owned(),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Tools for exploring and querying kdb+ tables.\n\
                \n\
                ## Workflow\n\
                1. Call `list_tables` to see what is loaded (or `load_table` to load a splayed table)\n\
                2. Call `table_schema` or `column_names` before querying unfamiliar tables\n\
                3. Prefer the dedicated tools; fall back to `execute_query` for anything else\n\
                \n\
                ## Market data tools\n\
                Price and volume tools default to a table named `stocks` with `symbol`, `timestamp`,\n\
                `open`, `high`, `low`, `close` and `volume` columns.\n\
                \n\
                ## Limits\n\
                Row limits are clamped to each tool's maximum. Output is capped at 100 lines of\n\
                120 characters; longer results end with `... (N more rows)`."
                    .to_string(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::{Gateway, TableRegistry};
    use crate::tools::catalog;
    use serde_json::json;
    use std::collections::BTreeSet;

    fn create_test_service() -> KdbService {
        // Nothing listens here; these tests never reach the engine.
        let config = EngineConfig::parse("kdb://127.0.0.1:1").unwrap();
        let gateway = Arc::new(Gateway::from_config(Arc::new(config)));
        let dispatcher = Dispatcher::new(gateway, Arc::new(TableRegistry::new()));
        KdbService::new(Arc::new(dispatcher))
    }

    fn text(result: &CallToolResult) -> &str {
        result.content[0].as_text().map(|t| t.text.as_str()).unwrap()
    }

    #[test]
    fn test_tool_list_matches_catalog() {
        let service = create_test_service();
        let listed: BTreeSet<String> = service
            .tools()
            .iter()
            .map(|tool| tool.name.to_string())
            .collect();
        let cataloged: BTreeSet<String> = catalog::names().map(String::from).collect();
        assert_eq!(service.tools().len(), cataloged.len());
        assert_eq!(listed, cataloged);
    }

    #[test]
    fn test_schemas_name_arguments() {
        let service = create_test_service();
        let sample = service
            .tools()
            .iter()
            .find(|tool| tool.name == "table_sample")
            .unwrap();
        let properties = sample.input_schema["properties"].as_object().unwrap();
        assert!(properties.contains_key("table_name"));
        assert!(properties.contains_key("num_rows"));
    }

    #[tokio::test]
    async fn test_unknown_tool_is_error_text() {
        let service = create_test_service();
        let result = service.call("frobnicate", None).await;
        assert_eq!(result.is_error, Some(true));
        assert_eq!(text(&result), "Unknown tool: frobnicate");
    }

    #[tokio::test]
    async fn test_raw_arguments_reach_dispatcher() {
        let service = create_test_service();

        // Whole float accepted as an integer; the bad name is what fails.
        let args = json!({"table_name": "1bad", "num_rows": 10.0});
        let result = service
            .call("table_sample", args.as_object().cloned())
            .await;
        assert_eq!(result.is_error, Some(true));
        assert!(text(&result).starts_with("Validation error"), "{}", text(&result));
        assert!(text(&result).contains("table_name"), "{}", text(&result));

        // A missing required argument is validation text, not a protocol error.
        let result = service.call("table_count", None).await;
        assert_eq!(result.is_error, Some(true));
        assert!(text(&result).contains("'table_name' is required"), "{}", text(&result));

        let args = json!({"table_name": "stocks", "num_rows": "ten"});
        let result = service
            .call("table_sample", args.as_object().cloned())
            .await;
        assert!(text(&result).contains("'num_rows' must be an integer"), "{}", text(&result));
    }

    #[test]
    fn test_error_response_is_flagged() {
        let result: CallToolResult = ToolResponse {
            text: "Unknown tool: x".into(),
            is_error: true,
        }
        .into();
        assert_eq!(result.is_error, Some(true));
    }

    #[test]
    fn test_server_info() {
        let service = create_test_service();
        let info = service.get_info();
        assert_eq!(info.server_info.name, "kdb-mcp-server");
        assert!(info.capabilities.tools.is_some());
    }
}
