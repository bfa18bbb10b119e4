//! Identifier validation.
//!
//! Table and column names are spliced into q text, so every identifier-shaped
//! parameter must pass through [`Identifier::parse`] first.

use crate::error::{KdbError, KdbResult};
use std::fmt;

/// A name matching `^[A-Za-z_][A-Za-z0-9_]*$`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identifier(String);

impl Identifier {
    /// Check a candidate name. No trimming, ASCII only.
    pub fn is_valid(name: &str) -> bool {
        let mut chars = name.chars();
        match chars.next() {
            Some(first) if first.is_ascii_alphabetic() || first == '_' => {
                chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
            }
            _ => false,
        }
    }

    pub fn parse(name: &str) -> KdbResult<Self> {
        Self::parse_field("identifier", name)
    }

    /// Parse, naming the offending argument in the error.
    pub fn parse_field(field: &str, name: &str) -> KdbResult<Self> {
        if Self::is_valid(name) {
            Ok(Self(name.to_string()))
        } else {
            Err(KdbError::validation(format!(
                "invalid {field} '{name}': must start with a letter or underscore \
                 and contain only letters, digits and underscores"
            )))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;

    #[test]
    fn test_valid_identifiers() {
        for name in ["stocks", "_tmp", "T1", "trade_2024", "a", "_"] {
            assert!(Identifier::is_valid(name), "{name}");
        }
    }

    #[test]
    fn test_invalid_identifiers() {
        for name in [
            "",
            "1abc",
            "bad name",
            " stocks",
            "stocks ",
            "t;drop",
            "a.b",
            "x`y",
            "tbl-1",
            "caf\u{e9}",
        ] {
            assert!(!Identifier::is_valid(name), "{name:?}");
        }
    }

    #[test]
    fn test_matches_grammar_regex() {
        let grammar = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
        let samples = [
            "abc", "A_b9", "9x", "_9", "a b", "", "x\n", "ok_", "\u{0661}", "Z", "é", "a-b",
        ];
        for s in samples {
            assert_eq!(Identifier::is_valid(s), grammar.is_match(s), "{s:?}");
        }
    }

    #[test]
    fn test_parse_error_names_field() {
        let err = Identifier::parse_field("table_name", "1bad").unwrap_err();
        let text = err.to_string();
        assert!(text.starts_with("Validation error"));
        assert!(text.contains("table_name"));
        assert!(text.contains("1bad"));
    }
}
