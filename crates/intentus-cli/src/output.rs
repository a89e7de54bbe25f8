//! Output rendering for the operator CLI: `json`, `jsonl`, or `table`.

use clap::ValueEnum;
use serde_json::Value;

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Jsonl,
    Table,
}

/// Print a value in the selected format. Arrays render as one line per
/// element under `jsonl` and as aligned columns under `table`.
pub fn print_value(format: OutputFormat, value: &Value) {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(value).unwrap_or_default())
        }
        OutputFormat::Jsonl => match value {
            Value::Array(items) => {
                for item in items {
                    println!("{}", serde_json::to_string(item).unwrap_or_default());
                }
            }
            other => println!("{}", serde_json::to_string(other).unwrap_or_default()),
        },
        OutputFormat::Table => print_table(value),
    }
}

fn print_table(value: &Value) {
    match value {
        Value::Array(items) => {
            let rows: Vec<&serde_json::Map<String, Value>> =
                items.iter().filter_map(Value::as_object).collect();
            if rows.is_empty() {
                println!("(empty)");
                return;
            }
            // Column set: union of keys, in first-seen order.
            let mut columns: Vec<String> = Vec::new();
            for row in &rows {
                for key in row.keys() {
                    if !columns.contains(key) {
                        columns.push(key.clone());
                    }
                }
            }
            let mut widths: Vec<usize> = columns.iter().map(String::len).collect();
            let cells: Vec<Vec<String>> = rows
                .iter()
                .map(|row| {
                    columns
                        .iter()
                        .enumerate()
                        .map(|(i, col)| {
                            let cell = row.get(col).map(render_cell).unwrap_or_default();
                            widths[i] = widths[i].max(cell.len());
                            cell
                        })
                        .collect()
                })
                .collect();

            let header: Vec<String> = columns
                .iter()
                .enumerate()
                .map(|(i, c)| format!("{:<width$}", c.to_uppercase(), width = widths[i]))
                .collect();
            println!("{}", header.join("  "));
            for row in cells {
                let line: Vec<String> = row
                    .iter()
                    .enumerate()
                    .map(|(i, cell)| format!("{:<width$}", cell, width = widths[i]))
                    .collect();
                println!("{}", line.join("  "));
            }
        }
        Value::Object(map) => {
            let width = map.keys().map(String::len).max().unwrap_or(0);
            for (key, val) in map {
                println!("{:<width$}  {}", key, render_cell(val), width = width);
            }
        }
        other => println!("{}", render_cell(other)),
    }
}

fn render_cell(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}
