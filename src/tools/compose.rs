//! Query composition.
//!
//! Every tool except `execute_query` is a fixed q template. Identifier slots
//! take only [`Identifier`]s and literal slots only typed values, so nothing
//! a caller sends is spliced into q unchecked.

use crate::error::{KdbError, KdbResult};
use crate::models::query::{ComposedQuery, Limit};
use crate::tools::identifier::Identifier;
use chrono::NaiveDate;
use std::fmt;
use std::path::{Path, PathBuf};

/// Comparison for price threshold filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ComparisonOp {
    #[default]
    Gt,
    Lt,
    Gte,
    Lte,
}

impl ComparisonOp {
    /// Map an operator name; anything unrecognised means `gt`.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "lt" => Self::Lt,
            "gte" => Self::Gte,
            "lte" => Self::Lte,
            _ => Self::Gt,
        }
    }

    pub fn token(&self) -> &'static str {
        match self {
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Gte => ">=",
            Self::Lte => "<=",
        }
    }
}

/// A calendar date rendered as a q date literal (`2024.01.31`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct QDate(NaiveDate);

impl QDate {
    /// Accepts `YYYY.MM.DD` or `YYYY-MM-DD`.
    pub fn parse(field: &str, s: &str) -> KdbResult<Self> {
        let trimmed = s.trim();
        NaiveDate::parse_from_str(trimmed, "%Y.%m.%d")
            .or_else(|_| NaiveDate::parse_from_str(trimmed, "%Y-%m-%d"))
            .map(Self)
            .map_err(|_| {
                KdbError::validation(format!("{field} must be a date like 2024.01.31, got '{s}'"))
            })
    }

    /// January 1st of `year`.
    pub fn year_start(year: i64) -> KdbResult<Self> {
        i32::try_from(year)
            .ok()
            .filter(|y| (1..=9999).contains(y))
            .and_then(|y| NaiveDate::from_ymd_opt(y, 1, 1))
            .map(Self)
            .ok_or_else(|| KdbError::validation(format!("year must be between 1 and 9999, got {year}")))
    }
}

impl fmt::Display for QDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y.%m.%d"))
    }
}

/// An upper-cased ticker symbol of `[A-Z0-9._-]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticker(String);

impl Ticker {
    pub fn parse(s: &str) -> KdbResult<Self> {
        let upper = s.trim().to_ascii_uppercase();
        let valid = !upper.is_empty()
            && upper.len() <= 32
            && upper
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || "._-".contains(c));
        if valid {
            Ok(Self(upper))
        } else {
            Err(KdbError::validation(format!(
                "symbol must be 1-32 letters, digits, '.', '_' or '-', got '{s}'"
            )))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Ticker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A finite price threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Threshold(f64);

impl Threshold {
    pub fn new(value: f64) -> KdbResult<Self> {
        if value.is_finite() {
            Ok(Self(value))
        } else {
            Err(KdbError::validation("threshold must be a finite number"))
        }
    }
}

impl fmt::Display for Threshold {
    /// Always carries a decimal point so q reads it as a float.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = self.0.to_string();
        if text.contains('.') || text.contains('e') {
            f.write_str(&text)
        } else {
            write!(f, "{text}.0")
        }
    }
}

/// Date window for `filter_by_date`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DateWindow {
    /// Everything from January 1st of the year onwards.
    FromYear(i64, QDate),
    Between(QDate, QDate),
}

/// A fully validated tool invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolPlan {
    ListTables,
    ServerInfo,
    TableSchema { table: Identifier },
    TableCount { table: Identifier },
    TableSample { table: Identifier, rows: Limit },
    ColumnNames { table: Identifier },
    DistinctValues { table: Identifier, column: Identifier, limit: Limit },
    CountByGroup { table: Identifier, group: Identifier },
    DateRange { table: Identifier, column: Identifier },
    DataPointsPerDay { table: Identifier, column: Identifier, limit: Limit },
    ColumnStats { table: Identifier, column: Identifier },
    AveragePriceBySymbol { table: Identifier, price: Identifier },
    PriceRangeBySymbol { table: Identifier, price: Identifier },
    HighestPrices { table: Identifier, price: Identifier },
    PriceVolatility { table: Identifier, price: Identifier },
    PriceStatistics { table: Identifier, price: Identifier },
    AverageVolumeBySymbol { table: Identifier },
    TotalVolumeBySymbol { table: Identifier },
    TopVolumeRecords { table: Identifier, limit: Limit },
    FilterBySymbol { table: Identifier, symbol: Ticker, limit: Limit },
    FilterByPriceThreshold {
        table: Identifier,
        price: Identifier,
        op: ComparisonOp,
        threshold: Threshold,
    },
    FilterByDate { table: Identifier, window: DateWindow },
    SymbolSummary { table: Identifier, symbol: Ticker },
    DailyOhlc { table: Identifier, symbol: Ticker, limit: Limit },
    PriceChangeAnalysis { table: Identifier },
    ExecuteQuery { query: String, max_rows: Limit },
    LoadTable { path: PathBuf, name: Identifier },
}

impl ToolPlan {
    /// The loaded table this plan reads, if any.
    pub fn table(&self) -> Option<&Identifier> {
        match self {
            Self::ListTables
            | Self::ServerInfo
            | Self::ExecuteQuery { .. }
            | Self::LoadTable { .. } => None,
            Self::TableSchema { table }
            | Self::TableCount { table }
            | Self::TableSample { table, .. }
            | Self::ColumnNames { table }
            | Self::DistinctValues { table, .. }
            | Self::CountByGroup { table, .. }
            | Self::DateRange { table, .. }
            | Self::DataPointsPerDay { table, .. }
            | Self::ColumnStats { table, .. }
            | Self::AveragePriceBySymbol { table, .. }
            | Self::PriceRangeBySymbol { table, .. }
            | Self::HighestPrices { table, .. }
            | Self::PriceVolatility { table, .. }
            | Self::PriceStatistics { table, .. }
            | Self::AverageVolumeBySymbol { table }
            | Self::TotalVolumeBySymbol { table }
            | Self::TopVolumeRecords { table, .. }
            | Self::FilterBySymbol { table, .. }
            | Self::FilterByPriceThreshold { table, .. }
            | Self::FilterByDate { table, .. }
            | Self::SymbolSummary { table, .. }
            | Self::DailyOhlc { table, .. }
            | Self::PriceChangeAnalysis { table } => Some(table),
        }
    }

    /// The primary query for this plan.
    ///
    /// `None` for `execute_query` (caller text goes through the danger
    /// scanner instead) and `load_table` (see [`load_splayed`]).
    pub fn compose(&self) -> Option<ComposedQuery> {
        let q = match self {
            Self::ListTables | Self::ServerInfo => return Some(list_tables()),
            Self::ExecuteQuery { .. } | Self::LoadTable { .. } => return None,
            Self::TableSchema { table } => format!("meta {table}"),
            Self::TableCount { table } => return Some(table_count(table)),
            Self::TableSample { table, rows } => format!("{rows}#{table}"),
            Self::ColumnNames { table } => format!("cols {table}"),
            Self::DistinctValues {
                table,
                column,
                limit,
            } => format!("{limit}#distinct {table}`{column}"),
            Self::CountByGroup { table, group } => {
                format!("select cnt: count i by {group} from {table}")
            }
            Self::DateRange { table, column } => {
                format!("select min_date: min {column}, max_date: max {column} from {table}")
            }
            Self::DataPointsPerDay {
                table,
                column,
                limit,
            } => format!("{limit}#select cnt: count i by dt: `date${column} from {table}"),
            Self::ColumnStats { table, column } => format!(
                "select cnt: count {column}, nulls: sum null {column}, \
                 distinct_cnt: count distinct {column} from {table}"
            ),
            Self::AveragePriceBySymbol { table, price } => {
                format!("select avg_{price}: avg {price} by symbol from {table}")
            }
            Self::PriceRangeBySymbol { table, price } => format!(
                "select min_{price}: min {price}, max_{price}: max {price}, \
                 price_range: (max {price}) - min {price} by symbol from {table}"
            ),
            Self::HighestPrices { table, price } => {
                format!("select max_{price}: max {price} by symbol from {table}")
            }
            Self::PriceVolatility { table, price } => {
                format!("select volatility: dev {price} by symbol from {table}")
            }
            Self::PriceStatistics { table, price } => format!(
                "select avg_{price}: avg {price}, median_{price}: med {price}, \
                 std_{price}: dev {price} by symbol from {table}"
            ),
            Self::AverageVolumeBySymbol { table } => {
                format!("select avg_volume: avg volume by symbol from {table}")
            }
            Self::TotalVolumeBySymbol { table } => {
                format!("select total_volume: sum volume by symbol from {table}")
            }
            Self::TopVolumeRecords { table, limit } => format!(
                "{limit} sublist `volume xdesc select symbol, timestamp, volume from {table}"
            ),
            Self::FilterBySymbol {
                table,
                symbol,
                limit,
            } => format!("{limit}#select from {table} where symbol like \"{symbol}\""),
            Self::FilterByPriceThreshold {
                table,
                price,
                op,
                threshold,
            } => format!(
                "select cnt: count i, symbols: distinct symbol from {table} \
                 where {price} {} {threshold}",
                op.token()
            ),
            Self::FilterByDate { table, window } => match window {
                DateWindow::FromYear(_, start) => format!(
                    "select cnt: count i by symbol from {table} where timestamp >= {start}"
                ),
                DateWindow::Between(start, end) => format!(
                    "select cnt: count i by symbol from {table} \
                     where timestamp >= {start}, timestamp <= {end}"
                ),
            },
            Self::SymbolSummary { table, symbol } => format!(
                "select cnt: count i, avg_close: avg close, avg_volume: avg volume \
                 from {table} where symbol like \"{symbol}\""
            ),
            Self::DailyOhlc {
                table,
                symbol,
                limit,
            } => format!(
                "{limit} sublist `dt xdesc select open: first open, high: max high, \
                 low: min low, close: last close, volume: sum volume \
                 by dt: `date$timestamp from {table} where symbol like \"{symbol}\""
            ),
            Self::PriceChangeAnalysis { table } => format!(
                "select avg_daily_range: avg (high - low), \
                 avg_spread_pct: avg 100 * (high - low) % low by symbol from {table}"
            ),
        };
        Some(ComposedQuery::from_template(q))
    }

    /// Heading placed above the rendered result.
    pub fn header(&self) -> String {
        match self {
            Self::ListTables => "Available tables".to_string(),
            Self::ServerInfo => "KDB+ MCP Server Info".to_string(),
            Self::TableSchema { table } => format!("Schema for '{table}'"),
            Self::TableCount { table } => format!("Row count for '{table}'"),
            Self::TableSample { table, rows } => format!("Sample ({rows} rows) from '{table}'"),
            Self::ColumnNames { table } => format!("Columns in '{table}'"),
            Self::DistinctValues { table, column, .. } => {
                format!("Distinct values in '{table}.{column}'")
            }
            Self::CountByGroup { group, .. } => format!("Count by '{group}'"),
            Self::DateRange { table, .. } => format!("Date range in '{table}'"),
            Self::DataPointsPerDay { .. } => "Data points per day".to_string(),
            Self::ColumnStats { table, column } => {
                format!("Stats for '{table}.{column}'")
            }
            Self::AveragePriceBySymbol { price, .. } => format!("Average {price} by symbol"),
            Self::PriceRangeBySymbol { .. } => "Price range by symbol".to_string(),
            Self::HighestPrices { price, .. } => format!("Highest {price} by symbol"),
            Self::PriceVolatility { .. } => "Price volatility (std dev) by symbol".to_string(),
            Self::PriceStatistics { .. } => "Price statistics by symbol".to_string(),
            Self::AverageVolumeBySymbol { .. } => "Average volume by symbol".to_string(),
            Self::TotalVolumeBySymbol { .. } => "Total volume by symbol".to_string(),
            Self::TopVolumeRecords { limit, .. } => format!("Top {limit} highest volume records"),
            Self::FilterBySymbol { symbol, .. } => format!("Data for {symbol}"),
            Self::FilterByPriceThreshold {
                price,
                op,
                threshold,
                ..
            } => format!("Records where {price} {} {threshold}", op.token()),
            Self::FilterByDate { window, .. } => match window {
                DateWindow::FromYear(year, _) => format!("Data from {year} onward"),
                DateWindow::Between(start, end) => format!("Data from {start} to {end}"),
            },
            Self::SymbolSummary { symbol, .. } => format!("Summary for {symbol}"),
            Self::DailyOhlc { symbol, limit, .. } => {
                format!("Daily OHLC for {symbol} (last {limit} days)")
            }
            Self::PriceChangeAnalysis { .. } => "Price change analysis by symbol".to_string(),
            Self::ExecuteQuery { .. } => "Query result".to_string(),
            Self::LoadTable { name, .. } => format!("Loaded table '{name}'"),
        }
    }
}

/// `tables[]`
pub fn list_tables() -> ComposedQuery {
    ComposedQuery::from_template("tables[]".to_string())
}

/// `count T`
pub fn table_count(table: &Identifier) -> ComposedQuery {
    ComposedQuery::from_template(format!("count {table}"))
}

/// Matching row count for a ticker.
pub fn symbol_count(table: &Identifier, symbol: &Ticker) -> ComposedQuery {
    ComposedQuery::from_template(format!(
        "count select from {table} where symbol like \"{symbol}\""
    ))
}

/// Release version of the engine (`.z.K`).
pub fn engine_version() -> ComposedQuery {
    ComposedQuery::from_template(".z.K".to_string())
}

/// Map a splayed table directory into the session as `name`.
pub fn load_splayed(name: &Identifier, path: &Path) -> KdbResult<ComposedQuery> {
    let text = path.to_str().ok_or_else(|| {
        KdbError::validation(format!("table path is not valid UTF-8: {}", path.display()))
    })?;
    Ok(ComposedQuery::from_template(format!(
        "{name}: get hsym `$\"{}\"",
        q_string_body(text)?
    )))
}

/// Escape text for use inside a q string literal.
fn q_string_body(text: &str) -> KdbResult<String> {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            c if c.is_control() => {
                return Err(KdbError::validation(
                    "table path must not contain control characters",
                ));
            }
            c => out.push(c),
        }
    }
    Ok(out)
}
