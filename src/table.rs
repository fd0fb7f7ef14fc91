use std::fmt::Write as _;

use serde_json::Value as JsonValue;

use crate::executor::QueryResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Align {
    Left,
    Right,
}

/// Renders rows under an underlined header. Columns whose non-null cells
/// are all numbers are right-aligned; a row count closes the table.
pub fn render_query(result: &QueryResult) -> String {
    let aligns: Vec<Align> = (0..result.columns.len())
        .map(|idx| {
            let mut present = result
                .rows
                .iter()
                .filter_map(|row| row.get(idx))
                .filter(|cell| !cell.is_null())
                .peekable();
            if present.peek().is_some() && present.all(JsonValue::is_number) {
                Align::Right
            } else {
                Align::Left
            }
        })
        .collect();
    let rows: Vec<Vec<String>> = result
        .rows
        .iter()
        .map(|row| row.iter().map(cell_text).collect())
        .collect();

    let mut output = render_aligned(&result.columns, &rows, &aligns);
    let noun = if rows.len() == 1 { "row" } else { "rows" };
    let _ = writeln!(output, "({} {noun})", rows.len());
    output
}

pub fn cell_text(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => String::new(),
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn render_aligned(headers: &[String], rows: &[Vec<String>], aligns: &[Align]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| display_width(h).max(1)).collect();
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(display_width(&flatten(cell)));
        }
    }

    let mut output = String::new();
    let _ = writeln!(output, "{}", format_line(headers, &widths, aligns));
    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    let _ = writeln!(output, "{}", format_line(&rule, &widths, aligns));
    for row in rows {
        let _ = writeln!(output, "{}", format_line(row, &widths, aligns));
    }
    output
}

fn format_line(cells: &[String], widths: &[usize], aligns: &[Align]) -> String {
    let line = cells
        .iter()
        .zip(widths)
        .zip(aligns)
        .map(|((cell, &width), &align)| {
            let cell = flatten(cell);
            let pad = " ".repeat(width.saturating_sub(display_width(&cell)));
            match align {
                Align::Left => format!("{cell}{pad}"),
                Align::Right => format!("{pad}{cell}"),
            }
        })
        .collect::<Vec<_>>()
        .join("  ");
    line.trim_end().to_string()
}

// Cells must stay on one line.
fn flatten(cell: &str) -> String {
    cell.chars()
        .map(|ch| if matches!(ch, '\n' | '\r' | '\t') { ' ' } else { ch })
        .collect()
}

fn display_width(value: &str) -> usize {
    let mut width = 0usize;
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch == '\u{1b}' {
            for next in chars.by_ref() {
                if next == 'm' {
                    break;
                }
            }
        } else {
            width += 1;
        }
    }
    width
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn numeric_columns_are_right_aligned() {
        let result = QueryResult {
            columns: vec!["region".into(), "total".into()],
            rows: vec![
                vec![json!("north"), json!(12.5)],
                vec![json!("south"), json!(2)],
                vec![json!("east"), JsonValue::Null],
            ],
        };
        let rendered = render_query(&result);
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(
            lines,
            vec![
                "region  total",
                "------  -----",
                "north    12.5",
                "south       2",
                "east",
                "(3 rows)",
            ]
        );
    }

    #[test]
    fn control_characters_are_flattened() {
        let result = QueryResult {
            columns: vec!["note".into()],
            rows: vec![vec![json!("a\nb\tc")], vec![json!("d\r\ne")]],
        };
        let rendered = render_query(&result);
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines, vec!["note", "-----", "a b c", "d  e", "(2 rows)"]);
    }

    #[test]
    fn empty_result_still_prints_header() {
        let result = QueryResult {
            columns: vec!["a".into()],
            rows: Vec::new(),
        };
        assert_eq!(render_query(&result), "a\n-\n(0 rows)\n");
    }
}
