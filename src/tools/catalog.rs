//! Tool table: each tool name maps to the parser that turns its JSON
//! arguments into a validated [`ToolPlan`].

use crate::error::{KdbError, KdbResult};
use crate::models::query::*;
use crate::tools::args::Arguments;
use crate::tools::compose::{ComparisonOp, DateWindow, QDate, Threshold, Ticker, ToolPlan};
use std::path::PathBuf;

/// Table used by the market-data tools when none is given.
pub const DEFAULT_TABLE: &str = "stocks";
pub const DEFAULT_PRICE_COLUMN: &str = "close";
pub const DEFAULT_DATE_COLUMN: &str = "timestamp";

pub type ParseFn = fn(&Arguments<'_>) -> KdbResult<ToolPlan>;

/// One entry of the tool table.
#[derive(Clone, Copy)]
pub struct ToolSpec {
    pub name: &'static str,
    pub parse: ParseFn,
}

impl std::fmt::Debug for ToolSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolSpec").field("name", &self.name).finish()
    }
}

pub static TOOLS: &[ToolSpec] = &[
    ToolSpec {
        name: "list_tables",
        parse: |_| Ok(ToolPlan::ListTables),
    },
    ToolSpec {
        name: "table_schema",
        parse: |a| {
            Ok(ToolPlan::TableSchema {
                table: a.identifier("table_name")?,
            })
        },
    },
    ToolSpec {
        name: "table_count",
        parse: |a| {
            Ok(ToolPlan::TableCount {
                table: a.identifier("table_name")?,
            })
        },
    },
    ToolSpec {
        name: "table_sample",
        parse: |a| {
            Ok(ToolPlan::TableSample {
                table: a.identifier("table_name")?,
                rows: a.limit("num_rows", DEFAULT_SAMPLE_ROWS, MAX_SAMPLE_ROWS)?,
            })
        },
    },
    ToolSpec {
        name: "column_names",
        parse: |a| {
            Ok(ToolPlan::ColumnNames {
                table: a.identifier("table_name")?,
            })
        },
    },
    ToolSpec {
        name: "distinct_values",
        parse: |a| {
            Ok(ToolPlan::DistinctValues {
                table: a.identifier("table_name")?,
                column: a.identifier("column_name")?,
                limit: a.limit("limit", DEFAULT_DISTINCT_LIMIT, MAX_DISTINCT_LIMIT)?,
            })
        },
    },
    ToolSpec {
        name: "count_by_group",
        parse: |a| {
            Ok(ToolPlan::CountByGroup {
                table: a.identifier("table_name")?,
                group: a.identifier("group_column")?,
            })
        },
    },
    ToolSpec {
        name: "date_range",
        parse: |a| {
            Ok(ToolPlan::DateRange {
                table: a.identifier("table_name")?,
                column: a.identifier_or("date_column", DEFAULT_DATE_COLUMN)?,
            })
        },
    },
    ToolSpec {
        name: "data_points_per_day",
        parse: |a| {
            Ok(ToolPlan::DataPointsPerDay {
                table: a.identifier("table_name")?,
                column: a.identifier_or("date_column", DEFAULT_DATE_COLUMN)?,
                limit: a.limit("limit", DEFAULT_DAYS_LIMIT, MAX_DAYS_LIMIT)?,
            })
        },
    },
    ToolSpec {
        name: "column_stats",
        parse: |a| {
            Ok(ToolPlan::ColumnStats {
                table: a.identifier("table_name")?,
                column: a.identifier("column_name")?,
            })
        },
    },
    ToolSpec {
        name: "average_price_by_symbol",
        parse: |a| {
            Ok(ToolPlan::AveragePriceBySymbol {
                table: market_table(a)?,
                price: price_column(a)?,
            })
        },
    },
    ToolSpec {
        name: "price_range_by_symbol",
        parse: |a| {
            Ok(ToolPlan::PriceRangeBySymbol {
                table: market_table(a)?,
                price: price_column(a)?,
            })
        },
    },
    ToolSpec {
        name: "highest_prices",
        parse: |a| {
            Ok(ToolPlan::HighestPrices {
                table: market_table(a)?,
                price: price_column(a)?,
            })
        },
    },
    ToolSpec {
        name: "price_volatility",
        parse: |a| {
            Ok(ToolPlan::PriceVolatility {
                table: market_table(a)?,
                price: price_column(a)?,
            })
        },
    },
    ToolSpec {
        name: "price_statistics",
        parse: |a| {
            Ok(ToolPlan::PriceStatistics {
                table: market_table(a)?,
                price: price_column(a)?,
            })
        },
    },
    ToolSpec {
        name: "average_volume_by_symbol",
        parse: |a| {
            Ok(ToolPlan::AverageVolumeBySymbol {
                table: market_table(a)?,
            })
        },
    },
    ToolSpec {
        name: "total_volume_by_symbol",
        parse: |a| {
            Ok(ToolPlan::TotalVolumeBySymbol {
                table: market_table(a)?,
            })
        },
    },
    ToolSpec {
        name: "top_volume_records",
        parse: |a| {
            Ok(ToolPlan::TopVolumeRecords {
                table: market_table(a)?,
                limit: a.limit("limit", DEFAULT_TOP_LIMIT, MAX_TOP_LIMIT)?,
            })
        },
    },
    ToolSpec {
        name: "filter_by_symbol",
        parse: |a| {
            Ok(ToolPlan::FilterBySymbol {
                table: market_table(a)?,
                symbol: ticker(a)?,
                limit: a.limit("limit", DEFAULT_SYMBOL_ROWS, MAX_SYMBOL_ROWS)?,
            })
        },
    },
    ToolSpec {
        name: "filter_by_price_threshold",
        parse: |a| {
            Ok(ToolPlan::FilterByPriceThreshold {
                table: market_table(a)?,
                price: price_column(a)?,
                op: ComparisonOp::from_name(a.string("operator")?.unwrap_or("gt")),
                threshold: Threshold::new(a.required_number("threshold")?)?,
            })
        },
    },
    ToolSpec {
        name: "filter_by_date",
        parse: |a| {
            Ok(ToolPlan::FilterByDate {
                table: market_table(a)?,
                window: date_window(a)?,
            })
        },
    },
    ToolSpec {
        name: "symbol_summary",
        parse: |a| {
            Ok(ToolPlan::SymbolSummary {
                table: market_table(a)?,
                symbol: ticker(a)?,
            })
        },
    },
    ToolSpec {
        name: "daily_ohlc",
        parse: |a| {
            Ok(ToolPlan::DailyOhlc {
                table: market_table(a)?,
                symbol: ticker(a)?,
                limit: a.limit("limit", DEFAULT_OHLC_DAYS, MAX_OHLC_DAYS)?,
            })
        },
    },
    ToolSpec {
        name: "price_change_analysis",
        parse: |a| {
            Ok(ToolPlan::PriceChangeAnalysis {
                table: market_table(a)?,
            })
        },
    },
    ToolSpec {
        name: "execute_query",
        parse: |a| {
            let query = a.required_string("query")?.trim();
            if query.is_empty() {
                return Err(KdbError::validation("'query' is required"));
            }
            Ok(ToolPlan::ExecuteQuery {
                query: query.to_string(),
                max_rows: a.limit("max_rows", DEFAULT_ROW_LIMIT, MAX_ROW_LIMIT)?,
            })
        },
    },
    ToolSpec {
        name: "server_info",
        parse: |_| Ok(ToolPlan::ServerInfo),
    },
    ToolSpec {
        name: "load_table",
        parse: |a| {
            let path = PathBuf::from(a.required_string("table_path")?);
            let name = crate::engine::loader::table_name_for(&path, a.string("table_name")?)?;
            Ok(ToolPlan::LoadTable { path, name })
        },
    },
];

/// Find a tool by name.
pub fn lookup(name: &str) -> Option<&'static ToolSpec> {
    TOOLS.iter().find(|spec| spec.name == name)
}

/// All tool names, in catalog order.
pub fn names() -> impl Iterator<Item = &'static str> {
    TOOLS.iter().map(|spec| spec.name)
}

fn market_table(a: &Arguments<'_>) -> KdbResult<crate::tools::identifier::Identifier> {
    a.identifier_or("table_name", DEFAULT_TABLE)
}

fn price_column(a: &Arguments<'_>) -> KdbResult<crate::tools::identifier::Identifier> {
    a.identifier_or("price_column", DEFAULT_PRICE_COLUMN)
}

fn ticker(a: &Arguments<'_>) -> KdbResult<Ticker> {
    Ticker::parse(a.required_string("symbol")?)
}

fn date_window(a: &Arguments<'_>) -> KdbResult<DateWindow> {
    if let Some(year) = a.integer("year")? {
        return Ok(DateWindow::FromYear(year, QDate::year_start(year)?));
    }
    match (a.string("start_date")?, a.string("end_date")?) {
        (Some(start), Some(end)) => Ok(DateWindow::Between(
            QDate::parse("start_date", start)?,
            QDate::parse("end_date", end)?,
        )),
        _ => Err(KdbError::validation(
            "provide either 'year' or both 'start_date' and 'end_date'",
        )),
    }
}
