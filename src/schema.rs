//! Schema summarizer - structural metadata shown to the code generator
//!
//! Summaries are a display artifact: column lists, sample rows and the
//! wide-format flag are truncated for payload economy, while the sandbox
//! always sees the full untruncated DataFrame.

use polars::prelude::*;
use serde::{Deserialize, Serialize};

/// Columns listed by name before switching to a "+N more" suffix.
const MAX_LISTED_COLUMNS: usize = 20;
/// Sample rows rendered into the payload.
const MAX_SAMPLE_ROWS: usize = 2;
/// Key-value pairs rendered per sample row.
const MAX_SAMPLE_PAIRS: usize = 5;
/// Dimension columns listed for a wide-format table.
const MAX_DIMENSION_COLUMNS: usize = 10;
/// More date-pattern columns than this flags the table as wide format.
const WIDE_FORMAT_THRESHOLD: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnSummary {
    pub name: String,
    pub dtype: String,
}

/// Wide-format metadata: time periods encoded as individual columns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WideFormatInfo {
    pub date_column_count: usize,
    pub first_date_column: String,
    pub last_date_column: String,
    /// Non-date columns, truncated for display.
    pub dimension_columns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaSummary {
    pub table_name: String,
    pub row_count: usize,
    pub columns: Vec<ColumnSummary>,
    /// First rows of data, each truncated to a few pairs.
    pub sample_rows: Vec<Vec<(String, String)>>,
    pub wide_format: Option<WideFormatInfo>,
}

/// A column name matches the wide-date pattern if it contains a '.' and at
/// least one digit (e.g. "01.01.2024").
pub fn is_date_column_name(name: &str) -> bool {
    name.contains('.') && name.chars().any(|c| c.is_ascii_digit())
}

/// Date-pattern column names of a table. When every name parses as
/// DD.MM.YYYY the list is sorted chronologically, otherwise table order is
/// kept.
pub fn wide_date_columns(df: &DataFrame) -> Vec<String> {
    let mut cols: Vec<String> = df
        .get_column_names()
        .iter()
        .filter(|name| is_date_column_name(name))
        .map(|name| name.to_string())
        .collect();

    let parsed: Option<Vec<chrono::NaiveDate>> = cols
        .iter()
        .map(|c| chrono::NaiveDate::parse_from_str(c, "%d.%m.%Y").ok())
        .collect();
    if let Some(dates) = parsed {
        let mut keyed: Vec<(chrono::NaiveDate, String)> =
            dates.into_iter().zip(cols.iter().cloned()).collect();
        keyed.sort_by_key(|(d, _)| *d);
        cols = keyed.into_iter().map(|(_, c)| c).collect();
    }

    cols
}

impl SchemaSummary {
    /// Derive a summary from a loaded table. Pure, no side effects.
    pub fn from_table(table_name: &str, df: &DataFrame) -> Self {
        let columns: Vec<ColumnSummary> = df
            .get_columns()
            .iter()
            .map(|s| ColumnSummary {
                name: s.name().to_string(),
                dtype: dtype_label(s.dtype()),
            })
            .collect();

        let sample_rows = sample_rows(df);
        let wide_format = detect_wide_format(df);

        Self {
            table_name: table_name.to_string(),
            row_count: df.height(),
            columns,
            sample_rows,
            wide_format,
        }
    }

    /// Render the summary as a payload section for the code generator.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "### Table: {} ({} rows, {} columns)\n",
            self.table_name,
            self.row_count,
            self.columns.len()
        ));

        let listed: Vec<String> = self
            .columns
            .iter()
            .take(MAX_LISTED_COLUMNS)
            .map(|c| format!("{} ({})", c.name, c.dtype))
            .collect();
        out.push_str(&format!("Columns: {}", listed.join(", ")));
        if self.columns.len() > MAX_LISTED_COLUMNS {
            out.push_str(&format!(
                " ... and {} more",
                self.columns.len() - MAX_LISTED_COLUMNS
            ));
        }
        out.push('\n');

        if let Some(wide) = &self.wide_format {
            out.push_str(&format!(
                "WIDE FORMAT: {} date columns from {} to {}\n",
                wide.date_column_count, wide.first_date_column, wide.last_date_column
            ));
            out.push_str(&format!(
                "Dimension columns: {}\n",
                wide.dimension_columns.join(", ")
            ));
        }

        for (i, row) in self.sample_rows.iter().enumerate() {
            let pairs: Vec<String> = row.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
            out.push_str(&format!("Sample row {}: {}\n", i + 1, pairs.join(", ")));
        }

        out
    }
}

fn detect_wide_format(df: &DataFrame) -> Option<WideFormatInfo> {
    let date_cols = wide_date_columns(df);
    if date_cols.len() <= WIDE_FORMAT_THRESHOLD {
        return None;
    }

    let dimension_columns: Vec<String> = df
        .get_column_names()
        .iter()
        .filter(|name| !is_date_column_name(name))
        .take(MAX_DIMENSION_COLUMNS)
        .map(|name| name.to_string())
        .collect();

    Some(WideFormatInfo {
        date_column_count: date_cols.len(),
        first_date_column: date_cols.first().cloned().unwrap_or_default(),
        last_date_column: date_cols.last().cloned().unwrap_or_default(),
        dimension_columns,
    })
}

fn sample_rows(df: &DataFrame) -> Vec<Vec<(String, String)>> {
    let mut rows = Vec::new();
    let names = df.get_column_names();

    for row_idx in 0..df.height().min(MAX_SAMPLE_ROWS) {
        let mut pairs = Vec::new();
        for name in names.iter().take(MAX_SAMPLE_PAIRS) {
            if let Ok(series) = df.column(name) {
                if let Ok(value) = series.get(row_idx) {
                    pairs.push((name.to_string(), any_value_label(&value)));
                }
            }
        }
        rows.push(pairs);
    }

    rows
}

fn any_value_label(value: &AnyValue) -> String {
    match value {
        AnyValue::Null => "null".to_string(),
        AnyValue::String(s) => s.to_string(),
        other => other.to_string(),
    }
}

fn dtype_label(dtype: &DataType) -> String {
    match dtype {
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32
        | DataType::UInt64 => "int".to_string(),
        DataType::Float32 | DataType::Float64 => "float".to_string(),
        DataType::String => "text".to_string(),
        DataType::Boolean => "bool".to_string(),
        DataType::Date | DataType::Datetime(_, _) => "date".to_string(),
        other => format!("{:?}", other).to_lowercase(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wide_df() -> DataFrame {
        df![
            "Country" => ["CZ", "SK"],
            "Segment" => ["B2B", "B2C"],
            "01.01.2024" => [1.0, 2.0],
            "01.02.2024" => [3.0, 4.0],
            "01.03.2024" => [5.0, 6.0],
            "01.04.2024" => [7.0, 8.0],
            "01.05.2024" => [9.0, 10.0],
            "01.06.2024" => [11.0, 12.0]
        ]
        .unwrap()
    }

    #[test]
    fn wide_format_detection_six_date_columns() {
        let summary = SchemaSummary::from_table("Sales", &wide_df());
        let wide = summary.wide_format.expect("should be flagged wide");
        assert_eq!(wide.date_column_count, 6);
        assert_eq!(wide.first_date_column, "01.01.2024");
        assert_eq!(wide.last_date_column, "01.06.2024");
        assert_eq!(wide.dimension_columns, vec!["Country", "Segment"]);
    }

    #[test]
    fn five_date_columns_is_not_wide() {
        let df = df![
            "Country" => ["CZ"],
            "01.01.2024" => [1.0],
            "01.02.2024" => [1.0],
            "01.03.2024" => [1.0],
            "01.04.2024" => [1.0],
            "01.05.2024" => [1.0]
        ]
        .unwrap();
        assert!(SchemaSummary::from_table("Sales", &df).wide_format.is_none());
    }

    #[test]
    fn date_columns_sort_chronologically() {
        let df = df![
            "01.03.2024" => [1.0],
            "01.01.2024" => [1.0],
            "01.02.2024" => [1.0]
        ]
        .unwrap();
        assert_eq!(
            wide_date_columns(&df),
            vec!["01.01.2024", "01.02.2024", "01.03.2024"]
        );
    }

    #[test]
    fn sample_rows_are_truncated() {
        let df = df![
            "a" => [1, 2, 3],
            "b" => [1, 2, 3],
            "c" => [1, 2, 3],
            "d" => [1, 2, 3],
            "e" => [1, 2, 3],
            "f" => [1, 2, 3],
            "g" => [1, 2, 3]
        ]
        .unwrap();
        let summary = SchemaSummary::from_table("t", &df);
        assert_eq!(summary.sample_rows.len(), 2);
        assert_eq!(summary.sample_rows[0].len(), 5);
        assert_eq!(summary.row_count, 3);
    }

    #[test]
    fn render_appends_remaining_column_count() {
        let series: Vec<Series> = (0..25)
            .map(|i| Series::new(&format!("col{}", i), &[1i64]))
            .collect();
        let df = DataFrame::new(series).unwrap();
        let rendered = SchemaSummary::from_table("t", &df).render();
        assert!(rendered.contains("and 5 more"));
    }
}
