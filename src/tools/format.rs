//! Output formatting for tool results.
//!
//! Engine results are rendered the way the q console shows them (aligned
//! columns, `key| value` dictionaries) and then bounded in both width and
//! height so a huge result can never flood the assistant's context.

use crate::models::result::EngineResult;
use crate::models::value::{QTable, QValue, escape_control};
use unicode_width::UnicodeWidthStr;

/// Longest line kept before truncation.
pub const DEFAULT_MAX_WIDTH: usize = 120;
/// Most content lines kept before the summary line.
pub const DEFAULT_MAX_LINES: usize = 100;

const ELLIPSIS: &str = "...";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderOptions {
    pub max_width: usize,
    pub max_lines: usize,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            max_width: DEFAULT_MAX_WIDTH,
            max_lines: DEFAULT_MAX_LINES,
        }
    }
}

/// Render a result as bounded text. Never fails.
pub fn render(result: &EngineResult, options: RenderOptions) -> String {
    let (lines, total) = match result {
        EngineResult::Scalar(atom) => (vec![atom.to_scalar_string()], 1),
        EngineResult::Record(entries) => record_lines(entries, options.max_lines),
        EngineResult::Table(table) => table_lines(table, options.max_lines),
        EngineResult::List(items) => {
            let lines: Vec<String> = items
                .iter()
                .take(options.max_lines)
                .map(|item| item.to_inline_string())
                .collect();
            (lines, items.len())
        }
        EngineResult::Opaque(text) => {
            let lines: Vec<String> = text.lines().map(String::from).collect();
            let total = lines.len();
            (lines, total)
        }
    };
    bound(lines, total, options)
}

/// Cut one line to `max_width` characters plus an ellipsis.
pub fn truncate_line(line: &str, max_width: usize) -> String {
    match line.char_indices().nth(max_width) {
        Some((cut, _)) => format!("{}{ELLIPSIS}", &line[..cut]),
        None => line.to_string(),
    }
}

fn bound(lines: Vec<String>, total: usize, options: RenderOptions) -> String {
    let mut out: Vec<String> = lines
        .iter()
        .take(options.max_lines)
        .map(|line| truncate_line(&escape_control(line), options.max_width))
        .collect();
    if total > options.max_lines {
        out.push(format!("... ({} more rows)", total - options.max_lines));
    }
    out.join("\n")
}

fn pad(cell: &str, width: usize) -> String {
    let fill = width.saturating_sub(cell.width());
    format!("{cell}{}", " ".repeat(fill))
}

fn join_row(cells: &[String], widths: &[usize], key_columns: usize) -> String {
    let mut line = String::new();
    for (i, (cell, width)) in cells.iter().zip(widths).enumerate() {
        if i > 0 {
            line.push_str(if i == key_columns { "| " } else { " " });
        }
        line.push_str(&pad(cell, *width));
    }
    line.trim_end().to_string()
}

/// Header, dash rule, then at most `max_rows` rows. Returns the lines and
/// the line count the full table would need.
fn table_lines(table: &QTable, max_rows: usize) -> (Vec<String>, usize) {
    if table.columns.is_empty() {
        return (vec!["(empty table)".to_string()], 1);
    }
    let rows = table.row_count();
    let shown = rows.min(max_rows);
    let cells: Vec<Vec<String>> = (0..shown)
        .map(|row| {
            (0..table.columns.len())
                .map(|col| table.cell(row, col))
                .collect()
        })
        .collect();

    let mut widths: Vec<usize> = table.columns.iter().map(|c| c.width()).collect();
    for row in &cells {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.width());
        }
    }

    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    let mut lines = Vec::with_capacity(shown + 2);
    lines.push(join_row(&table.columns, &widths, table.key_columns));
    lines.push(join_row(&rule, &widths, table.key_columns));
    lines.extend(
        cells
            .iter()
            .map(|row| join_row(row, &widths, table.key_columns)),
    );
    (lines, rows + 2)
}

fn record_lines(
    entries: &[(String, QValue)],
    max_lines: usize,
) -> (Vec<String>, usize) {
    let shown = &entries[..entries.len().min(max_lines)];
    let key_width = shown.iter().map(|(k, _)| k.width()).max().unwrap_or(0);
    let lines = shown
        .iter()
        .map(|(key, value)| {
            format!("{}| {}", pad(key, key_width), value.to_inline_string())
                .trim_end()
                .to_string()
        })
        .collect();
    (lines, entries.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::value::{QAtom, type_code};

    fn floats(values: &[f64]) -> QValue {
        QValue::Vector {
            type_code: type_code::FLOAT,
            items: values.iter().map(|v| QAtom::Float(*v)).collect(),
        }
    }

    #[test]
    fn test_scalar() {
        let text = render(&EngineResult::Scalar(QAtom::Long(42)), RenderOptions::default());
        assert_eq!(text, "42");
        let text = render(
            &EngineResult::Scalar(QAtom::Symbol("AAPL".into())),
            RenderOptions::default(),
        );
        assert_eq!(text, "`AAPL");
    }

    #[test]
    fn test_table_alignment() {
        let table = QTable::new(
            vec!["symbol".into(), "close".into()],
            vec![QValue::symbols(["AAPL", "GOOGL"]), floats(&[150.5, 2800.25])],
        );
        let text = render(&EngineResult::Table(table), RenderOptions::default());
        assert_eq!(
            text,
            "symbol close\n\
             ------ -------\n\
             AAPL   150.5\n\
             GOOGL  2800.25"
        );
    }

    #[test]
    fn test_keyed_table_separator() {
        let keys = QTable::new(vec!["symbol".into()], vec![QValue::symbols(["AAPL"])]);
        let values = QTable::new(vec!["avg_close".into()], vec![floats(&[150.0])]);
        let text = render(
            &EngineResult::Table(QTable::keyed(keys, values)),
            RenderOptions::default(),
        );
        assert_eq!(text, "symbol| avg_close\n------| ---------\nAAPL  | 150");
    }

    #[test]
    fn test_record() {
        let result = EngineResult::Record(vec![
            ("cnt".into(), QValue::long(1200)),
            ("avg_close".into(), QValue::Atom(QAtom::Float(101.25))),
        ]);
        let text = render(&result, RenderOptions::default());
        assert_eq!(text, "cnt      | 1200\navg_close| 101.25");
    }

    #[test]
    fn test_long_line_truncated() {
        let line = "x".repeat(500);
        let text = render(&EngineResult::Opaque(line), RenderOptions::default());
        assert_eq!(text.chars().count(), DEFAULT_MAX_WIDTH + 3);
        assert!(text.ends_with("..."));
    }

    #[test]
    fn test_truncate_line_multibyte() {
        assert_eq!(truncate_line("ééééé", 3), "ééé...");
        assert_eq!(truncate_line("abc", 3), "abc");
    }

    #[test]
    fn test_many_rows_capped() {
        let n = 150;
        let table = QTable::new(
            vec!["v".into()],
            vec![floats(&(0..n).map(|i| i as f64).collect::<Vec<_>>())],
        );
        let text = render(&EngineResult::Table(table), RenderOptions::default());
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), DEFAULT_MAX_LINES + 1);
        assert_eq!(lines.last().unwrap(), &"... (52 more rows)");
    }

    #[test]
    fn test_render_caps_hold_for_wide_results() {
        let options = RenderOptions {
            max_width: 40,
            max_lines: 10,
        };
        let wide = "y".repeat(300);
        let items: Vec<QValue> = (0..50).map(|_| QValue::CharVector(wide.clone())).collect();
        let text = render(&EngineResult::List(items), options);
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines.len() <= options.max_lines + 1);
        assert!(lines.iter().all(|l| l.chars().count() <= options.max_width + 3));
    }

    #[test]
    fn test_embedded_newlines_stay_on_one_line() {
        let items: Vec<QValue> = (0..200)
            .map(|i| QValue::CharVector(format!("row{i}\nmore")))
            .collect();
        let text = render(&EngineResult::List(items), RenderOptions::default());
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), DEFAULT_MAX_LINES + 1);
        assert_eq!(lines[0], "row0\\nmore");
        assert_eq!(lines[DEFAULT_MAX_LINES], "... (100 more rows)");

        let table = QTable::new(
            vec!["note".into()],
            vec![QValue::List(vec![QValue::CharVector("a\r\nb".into())])],
        );
        let text = render(&EngineResult::Table(table), RenderOptions::default());
        assert_eq!(text, "note\n------\na\\r\\nb");

        let record = EngineResult::Record(vec![(
            "sym".into(),
            QValue::Atom(QAtom::Symbol("x\ty".into())),
        )]);
        let text = render(&record, RenderOptions::default());
        assert_eq!(text, "sym| x\\ty");
    }

    #[test]
    fn test_opaque_multiline() {
        let text = render(
            &EngineResult::Opaque("line one\nline two".into()),
            RenderOptions::default(),
        );
        assert_eq!(text, "line one\nline two");
    }
}
