//! Query-related data models.
//!
//! This module defines the composed q text sent to the engine and the
//! row-limit rules applied before composition.

use crate::error::{KdbError, KdbResult};
use crate::tools::guard::{DangerousOperationResult, check_dangerous_q};
use std::fmt;

/// Default rows for `table_sample`.
pub const DEFAULT_SAMPLE_ROWS: i64 = 10;
/// Maximum rows for `table_sample`.
pub const MAX_SAMPLE_ROWS: i64 = 100;

/// Default values for `distinct_values`.
pub const DEFAULT_DISTINCT_LIMIT: i64 = 50;
/// Maximum values for `distinct_values`.
pub const MAX_DISTINCT_LIMIT: i64 = 500;

/// Default days for `data_points_per_day`.
pub const DEFAULT_DAYS_LIMIT: i64 = 10;
/// Maximum days for `data_points_per_day`.
pub const MAX_DAYS_LIMIT: i64 = 1000;

/// Default records for `top_volume_records`.
pub const DEFAULT_TOP_LIMIT: i64 = 10;
/// Maximum records for `top_volume_records`.
pub const MAX_TOP_LIMIT: i64 = 1000;

/// Default rows for `filter_by_symbol`.
pub const DEFAULT_SYMBOL_ROWS: i64 = 100;
/// Maximum rows for `filter_by_symbol`.
pub const MAX_SYMBOL_ROWS: i64 = 1000;

/// Default days for `daily_ohlc`.
pub const DEFAULT_OHLC_DAYS: i64 = 10;
/// Maximum days for `daily_ohlc`.
pub const MAX_OHLC_DAYS: i64 = 1000;

/// Default row limit for free-form query results.
pub const DEFAULT_ROW_LIMIT: i64 = 100;
/// Maximum row limit for free-form query results.
pub const MAX_ROW_LIMIT: i64 = 10000;

/// A row limit already clamped to `1..=max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limit(i64);

impl Limit {
    /// Apply the default when absent, then clamp into `1..=max`.
    pub fn clamped(requested: Option<i64>, default: i64, max: i64) -> Self {
        Self(requested.unwrap_or(default).clamp(1, max))
    }

    pub fn get(self) -> i64 {
        self.0
    }

    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// q text ready to send to the engine.
///
/// Built by the composer from validated identifiers and typed literals, or
/// from caller text through [`ComposedQuery::screened`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedQuery(String);

impl ComposedQuery {
    pub(crate) fn from_template(text: String) -> Self {
        Self(text)
    }

    /// Accept free-form q text only if the danger scanner lets it through.
    pub fn screened(raw: &str) -> KdbResult<Self> {
        if raw.trim().is_empty() {
            return Err(KdbError::validation("query must not be empty"));
        }
        match check_dangerous_q(raw) {
            DangerousOperationResult::Safe => Ok(Self(raw.to_string())),
            DangerousOperationResult::Dangerous(pattern) => {
                Err(KdbError::safety_blocked(pattern.describe()))
            }
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ComposedQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_defaults_and_clamps() {
        assert_eq!(Limit::clamped(None, 10, 100).get(), 10);
        assert_eq!(Limit::clamped(Some(0), 10, 100).get(), 1);
        assert_eq!(Limit::clamped(Some(-5), 10, 100).get(), 1);
        assert_eq!(Limit::clamped(Some(5000), 10, 100).get(), 100);
        assert_eq!(Limit::clamped(Some(42), 10, 100).get(), 42);
    }

    #[test]
    fn test_screened_accepts_safe_query() {
        let q = ComposedQuery::screened("select from stocks where close > 100").unwrap();
        assert_eq!(q.as_str(), "select from stocks where close > 100");
    }

    #[test]
    fn test_screened_rejects_dangerous_query() {
        let err = ComposedQuery::screened("delete from stocks").unwrap_err();
        assert!(err.to_string().starts_with("Query blocked for safety"));
        assert!(err.to_string().contains("delete"));
    }

    #[test]
    fn test_screened_rejects_blank_query() {
        assert!(matches!(
            ComposedQuery::screened("   "),
            Err(KdbError::Validation { .. })
        ));
    }
}
