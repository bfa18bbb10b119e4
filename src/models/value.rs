//! In-memory representation of q values decoded from kdb+ IPC.
//!
//! Atoms keep their raw wire representation (epoch offsets, null sentinels)
//! and are only converted to human-readable text when displayed.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use std::fmt;

/// q type codes for atoms (negated on the wire) and simple vectors.
pub mod type_code {
    pub const LIST: i8 = 0;
    pub const BOOLEAN: i8 = 1;
    pub const GUID: i8 = 2;
    pub const BYTE: i8 = 4;
    pub const SHORT: i8 = 5;
    pub const INT: i8 = 6;
    pub const LONG: i8 = 7;
    pub const REAL: i8 = 8;
    pub const FLOAT: i8 = 9;
    pub const CHAR: i8 = 10;
    pub const SYMBOL: i8 = 11;
    pub const TIMESTAMP: i8 = 12;
    pub const MONTH: i8 = 13;
    pub const DATE: i8 = 14;
    pub const DATETIME: i8 = 15;
    pub const TIMESPAN: i8 = 16;
    pub const MINUTE: i8 = 17;
    pub const SECOND: i8 = 18;
    pub const TIME: i8 = 19;
    pub const TABLE: i8 = 98;
    pub const DICT: i8 = 99;
    pub const LAMBDA: i8 = 100;
    pub const UNARY_PRIMITIVE: i8 = 101;
    pub const SORTED_DICT: i8 = 127;
    pub const ERROR: i8 = -128;
}

const NANOS_PER_SEC: i64 = 1_000_000_000;

/// A single q atom.
#[derive(Debug, Clone, PartialEq)]
pub enum QAtom {
    Boolean(bool),
    Guid([u8; 16]),
    Byte(u8),
    Short(i16),
    Int(i32),
    Long(i64),
    Real(f32),
    Float(f64),
    Char(u8),
    Symbol(String),
    /// Nanoseconds since 2000.01.01D00:00.
    Timestamp(i64),
    /// Months since 2000.01.
    Month(i32),
    /// Days since 2000.01.01.
    Date(i32),
    /// Fractional days since 2000.01.01.
    Datetime(f64),
    /// Nanoseconds.
    Timespan(i64),
    Minute(i32),
    Second(i32),
    /// Milliseconds since midnight.
    Time(i32),
}

impl QAtom {
    /// Wire type code of the corresponding vector (positive).
    pub fn type_code(&self) -> i8 {
        use type_code::*;
        match self {
            Self::Boolean(_) => BOOLEAN,
            Self::Guid(_) => GUID,
            Self::Byte(_) => BYTE,
            Self::Short(_) => SHORT,
            Self::Int(_) => INT,
            Self::Long(_) => LONG,
            Self::Real(_) => REAL,
            Self::Float(_) => FLOAT,
            Self::Char(_) => CHAR,
            Self::Symbol(_) => SYMBOL,
            Self::Timestamp(_) => TIMESTAMP,
            Self::Month(_) => MONTH,
            Self::Date(_) => DATE,
            Self::Datetime(_) => DATETIME,
            Self::Timespan(_) => TIMESPAN,
            Self::Minute(_) => MINUTE,
            Self::Second(_) => SECOND,
            Self::Time(_) => TIME,
        }
    }

    /// Integer view of the atom, if it is an integral non-null number.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Self::Short(v) if v != i16::MIN => Some(v as i64),
            Self::Int(v) if v != i32::MIN => Some(v as i64),
            Self::Long(v) if v != i64::MIN => Some(v),
            Self::Byte(v) => Some(v as i64),
            _ => None,
        }
    }

    /// Text used when the atom stands alone (symbols carry their backtick).
    pub fn to_scalar_string(&self) -> String {
        match self {
            Self::Symbol(s) => format!("`{s}"),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for QAtom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean(b) => write!(f, "{}b", u8::from(*b)),
            Self::Guid(bytes) => write!(f, "{}", uuid::Uuid::from_bytes(*bytes)),
            Self::Byte(b) => write!(f, "0x{b:02x}"),
            Self::Short(v) => f.write_str(&format_integer(*v as i64, *v == i16::MIN, *v == i16::MAX, *v == -i16::MAX)),
            Self::Int(v) => f.write_str(&format_integer(*v as i64, *v == i32::MIN, *v == i32::MAX, *v == -i32::MAX)),
            Self::Long(v) => f.write_str(&format_integer(*v, *v == i64::MIN, *v == i64::MAX, *v == -i64::MAX)),
            Self::Real(v) => f.write_str(&format_float(*v as f64)),
            Self::Float(v) => f.write_str(&format_float(*v)),
            Self::Char(c) => write!(f, "{}", *c as char),
            Self::Symbol(s) => f.write_str(s),
            Self::Timestamp(ns) => f.write_str(&format_timestamp(*ns)),
            Self::Month(m) => f.write_str(&format_month(*m)),
            Self::Date(d) => f.write_str(&format_date(*d)),
            Self::Datetime(days) => f.write_str(&format_datetime(*days)),
            Self::Timespan(ns) => f.write_str(&format_timespan(*ns)),
            Self::Minute(m) => f.write_str(&format_clock(*m, |v| {
                format!("{:02}:{:02}", v / 60, v % 60)
            })),
            Self::Second(s) => f.write_str(&format_clock(*s, |v| {
                format!("{:02}:{:02}:{:02}", v / 3600, (v / 60) % 60, v % 60)
            })),
            Self::Time(ms) => f.write_str(&format_clock(*ms, |v| {
                format!(
                    "{:02}:{:02}:{:02}.{:03}",
                    v / 3_600_000,
                    (v / 60_000) % 60,
                    (v / 1000) % 60,
                    v % 1000
                )
            })),
        }
    }
}

/// A table: column names with one column value (vector or list) per name.
#[derive(Debug, Clone, PartialEq)]
pub struct QTable {
    pub columns: Vec<String>,
    pub data: Vec<QValue>,
    /// Number of leading key columns (non-zero for keyed tables).
    pub key_columns: usize,
}

impl QTable {
    pub fn new(columns: Vec<String>, data: Vec<QValue>) -> Self {
        Self {
            columns,
            data,
            key_columns: 0,
        }
    }

    /// Merge a keyed table (`key table ! value table`) into one table.
    pub fn keyed(keys: QTable, values: QTable) -> Self {
        let key_columns = keys.columns.len();
        let mut columns = keys.columns;
        columns.extend(values.columns);
        let mut data = keys.data;
        data.extend(values.data);
        Self {
            columns,
            data,
            key_columns,
        }
    }

    pub fn row_count(&self) -> usize {
        self.data.first().and_then(QValue::count).unwrap_or(0)
    }

    /// Cell at (row, column) rendered for a table block.
    pub fn cell(&self, row: usize, column: usize) -> String {
        self.data
            .get(column)
            .and_then(|col| col.item(row))
            .map(|v| v.to_inline_string())
            .unwrap_or_default()
    }

    /// Keep only the first `n` rows.
    pub fn truncate(&mut self, n: usize) {
        for column in &mut self.data {
            column.truncate(n);
        }
    }
}

/// Any q value the gateway can decode.
#[derive(Debug, Clone, PartialEq)]
pub enum QValue {
    Atom(QAtom),
    /// Simple vector of atoms sharing one type code.
    Vector { type_code: i8, items: Vec<QAtom> },
    /// Char vector (q string).
    CharVector(String),
    /// General (mixed) list.
    List(Vec<QValue>),
    Dict {
        keys: Box<QValue>,
        values: Box<QValue>,
    },
    Table(QTable),
    /// Lambdas, primitives, projections: shown, never decoded further.
    Function(String),
    /// The generic null `::`.
    Nil,
}

impl QValue {
    pub fn symbol(s: impl Into<String>) -> Self {
        Self::Atom(QAtom::Symbol(s.into()))
    }

    pub fn long(v: i64) -> Self {
        Self::Atom(QAtom::Long(v))
    }

    pub fn symbols<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Vector {
            type_code: type_code::SYMBOL,
            items: items.into_iter().map(|s| QAtom::Symbol(s.into())).collect(),
        }
    }

    /// Number of items for list-like values.
    pub fn count(&self) -> Option<usize> {
        match self {
            Self::Vector { items, .. } => Some(items.len()),
            Self::CharVector(s) => Some(s.len()),
            Self::List(items) => Some(items.len()),
            Self::Table(t) => Some(t.row_count()),
            Self::Dict { keys, .. } => keys.count(),
            _ => None,
        }
    }

    /// Item `i` of a list-like value.
    pub fn item(&self, i: usize) -> Option<QValue> {
        match self {
            Self::Vector { items, .. } => items.get(i).cloned().map(QValue::Atom),
            Self::CharVector(s) => s.as_bytes().get(i).map(|c| QValue::Atom(QAtom::Char(*c))),
            Self::List(items) => items.get(i).cloned(),
            _ => None,
        }
    }

    /// Keep only the first `n` items of a list-like value.
    pub fn truncate(&mut self, n: usize) {
        match self {
            Self::Vector { items, .. } => items.truncate(n),
            Self::CharVector(s) => {
                let cut = s
                    .char_indices()
                    .nth(n)
                    .map(|(idx, _)| idx)
                    .unwrap_or(s.len());
                s.truncate(cut);
            }
            Self::List(items) => items.truncate(n),
            Self::Table(t) => t.truncate(n),
            _ => {}
        }
    }

    /// Symbol names held by a symbol atom or vector.
    pub fn as_symbols(&self) -> Option<Vec<String>> {
        match self {
            Self::Atom(QAtom::Symbol(s)) => Some(vec![s.clone()]),
            Self::Vector { items, .. } => items
                .iter()
                .map(|a| match a {
                    QAtom::Symbol(s) => Some(s.clone()),
                    _ => None,
                })
                .collect(),
            Self::List(items) if items.is_empty() => Some(Vec::new()),
            _ => None,
        }
    }

    /// One-line rendering used inside table cells and list items.
    pub fn to_inline_string(&self) -> String {
        match self {
            Self::Atom(a) => a.to_string(),
            Self::Vector { type_code, items } => {
                if items.is_empty() {
                    return "()".to_string();
                }
                if *type_code == type_code::SYMBOL {
                    items.iter().map(|a| format!("`{a}")).collect()
                } else {
                    items
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join(" ")
                }
            }
            Self::CharVector(s) => escape_control(s),
            Self::List(items) => {
                let inner: Vec<String> = items.iter().map(|v| v.to_inline_string()).collect();
                format!("({})", inner.join(";"))
            }
            Self::Dict { keys, values } => {
                format!("{}!{}", keys.to_inline_string(), values.to_inline_string())
            }
            Self::Table(t) => format!("+{}!({} rows)", t.columns.join("`"), t.row_count()),
            Self::Function(text) => text.clone(),
            Self::Nil => "::".to_string(),
        }
    }
}

/// Escape control characters as the q console prints them inside strings,
/// so a rendered value always stays on one line.
pub fn escape_control(s: &str) -> String {
    if !s.chars().any(char::is_control) {
        return s.to_string();
    }
    let mut out = String::with_capacity(s.len() + 8);
    for ch in s.chars() {
        match ch {
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => out.push_str(&format!("\\{:03o}", c as u32)),
            c => out.push(c),
        }
    }
    out
}

/// Group an integer's digits in thousands: `1234567` -> `1,234,567`.
pub fn group_thousands(n: i64) -> String {
    let digits = n.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if n < 0 {
        out.push('-');
    }
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

fn format_integer(v: i64, is_null: bool, is_inf: bool, is_neg_inf: bool) -> String {
    if is_null {
        "0N".to_string()
    } else if is_inf {
        "0W".to_string()
    } else if is_neg_inf {
        "-0W".to_string()
    } else {
        v.to_string()
    }
}

/// Float display with q's default precision of 7 significant digits.
pub fn format_float(v: f64) -> String {
    if v.is_nan() {
        return "0n".to_string();
    }
    if v.is_infinite() {
        return if v > 0.0 { "0w" } else { "-0w" }.to_string();
    }
    if v == 0.0 {
        return "0".to_string();
    }
    let magnitude = v.abs().log10().floor() as i32 + 1;
    if !(-4..=15).contains(&magnitude) {
        let formatted = format!("{v:.6e}");
        let (mantissa, exponent) = formatted.split_once('e').unwrap_or((&formatted, "0"));
        let exponent: i32 = exponent.parse().unwrap_or(0);
        let sign = if exponent < 0 { '-' } else { '+' };
        return format!("{}e{}{:02}", trim_fraction(mantissa), sign, exponent.abs());
    }
    let decimals = (7 - magnitude).max(0) as usize;
    trim_fraction(&format!("{v:.decimals$}")).to_string()
}

fn trim_fraction(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

fn epoch() -> Option<NaiveDateTime> {
    NaiveDate::from_ymd_opt(2000, 1, 1).and_then(|d| d.and_hms_opt(0, 0, 0))
}

fn format_date(days: i32) -> String {
    if days == i32::MIN {
        return "0Nd".to_string();
    }
    epoch()
        .and_then(|e| e.date().checked_add_signed(Duration::days(days as i64)))
        .map(|d| d.format("%Y.%m.%d").to_string())
        .unwrap_or_else(|| days.to_string())
}

fn format_month(months: i32) -> String {
    if months == i32::MIN {
        return "0Nm".to_string();
    }
    let year = 2000 + months.div_euclid(12);
    let month = months.rem_euclid(12) + 1;
    format!("{year:04}.{month:02}m")
}

fn format_timestamp(ns: i64) -> String {
    if ns == i64::MIN {
        return "0Np".to_string();
    }
    epoch()
        .and_then(|e| e.checked_add_signed(Duration::nanoseconds(ns)))
        .map(|t| t.format("%Y.%m.%dD%H:%M:%S%.9f").to_string())
        .unwrap_or_else(|| ns.to_string())
}

fn format_datetime(days: f64) -> String {
    if days.is_nan() {
        return "0Nz".to_string();
    }
    let millis = (days * 86_400_000.0).round() as i64;
    epoch()
        .and_then(|e| e.checked_add_signed(Duration::milliseconds(millis)))
        .map(|t| t.format("%Y.%m.%dT%H:%M:%S%.3f").to_string())
        .unwrap_or_else(|| days.to_string())
}

fn format_timespan(ns: i64) -> String {
    if ns == i64::MIN {
        return "0Nn".to_string();
    }
    let sign = if ns < 0 { "-" } else { "" };
    let total = ns.unsigned_abs();
    let nanos = total % NANOS_PER_SEC as u64;
    let secs = total / NANOS_PER_SEC as u64;
    format!(
        "{sign}{}D{:02}:{:02}:{:02}.{:09}",
        secs / 86_400,
        (secs / 3600) % 24,
        (secs / 60) % 60,
        secs % 60,
        nanos
    )
}

fn format_clock(v: i32, render: impl Fn(i32) -> String) -> String {
    if v == i32::MIN {
        return "0N".to_string();
    }
    if v < 0 {
        format!("-{}", render(-v))
    } else {
        render(v)
    }
}
