use super::{Record, TabularFilter};
use crate::errors::TaskError;
use serde_json::Value;
use std::path::Path;

/// Header-row CSV reader with per-cell type inference.
pub struct CsvFilter;

impl TabularFilter for CsvFilter {
    fn filter(&self, input: &Path, column: &str, value: &Value) -> Result<Vec<Record>, TaskError> {
        let mut reader = csv::Reader::from_path(input).map_err(TaskError::external)?;
        let headers = reader.headers().map_err(TaskError::external)?.clone();
        let idx = headers
            .iter()
            .position(|h| h == column)
            .ok_or_else(|| TaskError::InvalidArgument(format!("no column named {column:?}")))?;

        let mut out = Vec::new();
        for row in reader.records() {
            let row = row.map_err(TaskError::external)?;
            let raw = row.get(idx).unwrap_or("");
            if !matches(raw, &infer(raw), value) {
                continue;
            }
            let record: Record = headers.iter().zip(row.iter()).map(|(h, cell)| (h.to_string(), infer(cell))).collect();
            out.push(record);
        }
        Ok(out)
    }
}

/// Integer, then finite float, then boolean; empty cells are null.
pub fn infer(cell: &str) -> Value {
    if cell.is_empty() {
        return Value::Null;
    }
    if let Ok(i) = cell.parse::<i64>() {
        return Value::from(i);
    }
    if let Ok(f) = cell.parse::<f64>() {
        if f.is_finite() {
            return Value::from(f);
        }
    }
    match cell.to_ascii_lowercase().as_str() {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(cell.to_string()),
    }
}

fn matches(raw: &str, cell: &Value, wanted: &Value) -> bool {
    match (cell, wanted) {
        (_, Value::Null) => false,
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        (_, Value::String(s)) => s == raw,
        (a, b) => a == b,
    }
}
