//! Result normalizer - converts sandbox values into response JSON
//!
//! Branch order is fixed: table, column, list, then scalar. A table
//! becomes an array of row objects with keys in column order, a column
//! becomes an index-to-value object, a list passes through, and anything
//! else is stringified under a `value` key so the response shape is
//! always JSON.

use polars::prelude::*;
use serde_json::{json, Map, Value as JsonValue};

use crate::error::Result;
use crate::sandbox::Value;

/// Normalize a script result into `(json, row_count)`.
pub fn normalize(value: &Value) -> Result<(JsonValue, usize)> {
    match value {
        Value::Table(df) => {
            let rows = table_to_records(df)?;
            let count = df.height();
            Ok((JsonValue::Array(rows), count))
        }
        Value::Column(series) => {
            let mut map = Map::new();
            for idx in 0..series.len() {
                let cell = series.get(idx)?;
                map.insert(idx.to_string(), any_value_to_json(&cell));
            }
            let count = series.len();
            Ok((JsonValue::Object(map), count))
        }
        Value::List(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(scalar_to_json(item));
            }
            let count = out.len();
            Ok((JsonValue::Array(out), count))
        }
        scalar => Ok((json!({ "value": scalar_label(scalar) }), 1)),
    }
}

/// One JSON object per row, keys in column order.
fn table_to_records(df: &DataFrame) -> Result<Vec<JsonValue>> {
    let columns = df.get_columns();
    let mut rows = Vec::with_capacity(df.height());

    for row_idx in 0..df.height() {
        let mut record = Map::new();
        for series in columns {
            let cell = series.get(row_idx)?;
            record.insert(series.name().to_string(), any_value_to_json(&cell));
        }
        rows.push(JsonValue::Object(record));
    }

    Ok(rows)
}

fn scalar_to_json(value: &Value) -> JsonValue {
    match value {
        Value::Str(s) => JsonValue::String(s.clone()),
        Value::Num(n) => serde_json::Number::from_f64(*n)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        Value::Null => JsonValue::Null,
        other => JsonValue::String(scalar_label(other)),
    }
}

/// Stringified form used for the scalar `value` envelope.
fn scalar_label(value: &Value) -> String {
    match value {
        Value::Num(n) => {
            if n.fract() == 0.0 && n.abs() < 1e15 {
                format!("{}", *n as i64)
            } else {
                format!("{}", n)
            }
        }
        Value::Str(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => format!("<{}>", other.kind()),
    }
}

fn any_value_to_json(value: &AnyValue) -> JsonValue {
    match value {
        AnyValue::Null => JsonValue::Null,
        AnyValue::Boolean(b) => JsonValue::Bool(*b),
        AnyValue::String(s) => JsonValue::String(s.to_string()),
        AnyValue::StringOwned(s) => JsonValue::String(s.to_string()),
        AnyValue::Int8(v) => json!(*v),
        AnyValue::Int16(v) => json!(*v),
        AnyValue::Int32(v) => json!(*v),
        AnyValue::Int64(v) => json!(*v),
        AnyValue::UInt8(v) => json!(*v),
        AnyValue::UInt16(v) => json!(*v),
        AnyValue::UInt32(v) => json!(*v),
        AnyValue::UInt64(v) => json!(*v),
        AnyValue::Float32(v) => serde_json::Number::from_f64(*v as f64)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        AnyValue::Float64(v) => serde_json::Number::from_f64(*v)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        other => JsonValue::String(other.to_string()),
    }
}
