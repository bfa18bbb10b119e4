//! Typed access to a tool call's JSON arguments.
//!
//! `null` is treated the same as an absent key.

use crate::error::{KdbError, KdbResult};
use crate::models::query::Limit;
use crate::tools::identifier::Identifier;
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy)]
pub struct Arguments<'a> {
    map: &'a Map<String, Value>,
}

impl<'a> Arguments<'a> {
    pub fn new(map: &'a Map<String, Value>) -> Self {
        Self { map }
    }

    fn get(&self, key: &str) -> Option<&'a Value> {
        self.map.get(key).filter(|v| !v.is_null())
    }

    pub fn string(&self, key: &str) -> KdbResult<Option<&'a str>> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.as_str())),
            Some(_) => Err(KdbError::validation(format!("'{key}' must be a string"))),
        }
    }

    pub fn required_string(&self, key: &str) -> KdbResult<&'a str> {
        self.string(key)?
            .ok_or_else(|| KdbError::validation(format!("'{key}' is required")))
    }

    pub fn identifier(&self, key: &str) -> KdbResult<Identifier> {
        Identifier::parse_field(key, self.required_string(key)?)
    }

    /// Identifier argument with a default used when absent.
    pub fn identifier_or(&self, key: &str, default: &str) -> KdbResult<Identifier> {
        Identifier::parse_field(key, self.string(key)?.unwrap_or(default))
    }

    /// Integer argument; whole floats such as `10.0` are accepted.
    ///
    /// Values outside the `i64` range saturate so that limits clamp to their
    /// maximum instead of failing.
    pub fn integer(&self, key: &str) -> KdbResult<Option<i64>> {
        let Some(value) = self.get(key) else {
            return Ok(None);
        };
        let not_integer = || KdbError::validation(format!("'{key}' must be an integer"));
        match value {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_u64().map(|_| i64::MAX))
                .or_else(|| {
                    n.as_f64()
                        .filter(|f| f.is_finite() && f.fract() == 0.0)
                        .map(|f| f as i64)
                })
                .map(Some)
                .ok_or_else(not_integer),
            _ => Err(not_integer()),
        }
    }

    pub fn number(&self, key: &str) -> KdbResult<Option<f64>> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::Number(n)) => Ok(n.as_f64()),
            Some(_) => Err(KdbError::validation(format!("'{key}' must be a number"))),
        }
    }

    pub fn required_number(&self, key: &str) -> KdbResult<f64> {
        self.number(key)?
            .ok_or_else(|| KdbError::validation(format!("'{key}' is required")))
    }

    /// Row limit with default, clamped to `1..=max`.
    pub fn limit(&self, key: &str, default: i64, max: i64) -> KdbResult<Limit> {
        Ok(Limit::clamped(self.integer(key)?, default, max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_identifier_required_and_validated() {
        let m = map(json!({"table_name": "stocks", "bad": "1x", "num": 3}));
        let args = Arguments::new(&m);
        assert_eq!(args.identifier("table_name").unwrap().as_str(), "stocks");
        assert!(args.identifier("bad").is_err());
        assert!(args.identifier("missing").unwrap_err().to_string().contains("is required"));
        assert!(args.identifier("num").unwrap_err().to_string().contains("must be a string"));
    }

    #[test]
    fn test_identifier_default_and_null() {
        let m = map(json!({"price_column": null}));
        let args = Arguments::new(&m);
        assert_eq!(args.identifier_or("price_column", "close").unwrap().as_str(), "close");
    }

    #[test]
    fn test_integer_coercion() {
        let m = map(json!({"a": 5, "b": 7.0, "c": 2.5, "d": "10"}));
        let args = Arguments::new(&m);
        assert_eq!(args.integer("a").unwrap(), Some(5));
        assert_eq!(args.integer("b").unwrap(), Some(7));
        assert!(args.integer("c").is_err());
        assert!(args.integer("d").is_err());
        assert_eq!(args.integer("e").unwrap(), None);
    }

    #[test]
    fn test_limit_clamped() {
        let m = map(json!({"num_rows": 100000, "limit": -3}));
        let args = Arguments::new(&m);
        assert_eq!(args.limit("num_rows", 10, 100).unwrap().get(), 100);
        assert_eq!(args.limit("limit", 50, 500).unwrap().get(), 1);
        assert_eq!(args.limit("absent", 50, 500).unwrap().get(), 50);
    }

    #[test]
    fn test_limit_beyond_i64_saturates() {
        let m = map(json!({"huge": u64::MAX, "big_float": 1e30, "tiny": -1e30}));
        let args = Arguments::new(&m);
        assert_eq!(args.integer("huge").unwrap(), Some(i64::MAX));
        assert_eq!(args.limit("huge", 10, 100).unwrap().get(), 100);
        assert_eq!(args.limit("big_float", 10, 100).unwrap().get(), 100);
        assert_eq!(args.limit("tiny", 10, 100).unwrap().get(), 1);
    }
}
