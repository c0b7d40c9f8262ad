//! Tabular loader - turns tenant dataset files into named DataFrames
//!
//! Tenant uploads come in a handful of regional CSV flavours, so the loader
//! tries a fixed sequence of format hypotheses until one parses cleanly:
//!
//! 1. UTF-8, semicolon delimiter, comma decimal separator
//! 2. UTF-8, comma delimiter, dot decimal separator
//! 3. windows-1250, semicolon delimiter, comma decimal separator
//!
//! Parquet files skip the hypothesis chain and go straight through the
//! native reader. A file that defeats every hypothesis is skipped with a
//! warning; the request continues with whatever did load.

use polars::prelude::*;
use std::collections::HashMap;
use tracing::{info, warn};

use crate::catalog::{DatasetCatalog, DatasetRecord, FileFormat};
use crate::error::{EngineError, Result};

/// Identifies one dataset at query time: the stored record plus the
/// normalized name generated code will refer to it by.
#[derive(Debug, Clone)]
pub struct TableHandle {
    pub record: DatasetRecord,
    pub table_name: String,
}

impl TableHandle {
    pub fn from_record(record: DatasetRecord) -> Self {
        let table_name = normalize_table_name(&record.original_filename);
        Self { record, table_name }
    }
}

/// Tables loaded for one request, in handle order.
pub struct LoadedTables {
    pub order: Vec<String>,
    pub tables: HashMap<String, DataFrame>,
    pub warnings: Vec<String>,
}

impl LoadedTables {
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// Strip the file extension and make the rest identifier-safe. The result is
/// both the in-memory lookup key and the variable name in generated scripts.
pub fn normalize_table_name(filename: &str) -> String {
    let stem = match filename.rsplit_once('.') {
        Some((stem, _ext)) => stem,
        None => filename,
    };
    stem.replace([' ', '-'], "_")
}

#[derive(Debug, Clone, Copy)]
enum SourceEncoding {
    Utf8,
    Windows1250,
}

#[derive(Debug, Clone, Copy)]
struct ReadHypothesis {
    encoding: SourceEncoding,
    delimiter: u8,
    decimal: char,
}

const HYPOTHESES: [ReadHypothesis; 3] = [
    ReadHypothesis {
        encoding: SourceEncoding::Utf8,
        delimiter: b';',
        decimal: ',',
    },
    ReadHypothesis {
        encoding: SourceEncoding::Utf8,
        delimiter: b',',
        decimal: '.',
    },
    ReadHypothesis {
        encoding: SourceEncoding::Windows1250,
        delimiter: b';',
        decimal: ',',
    },
];

/// Load every handle that parses, skipping the rest. Successfully loaded
/// tables get a best-effort `mark_used` update on the catalog.
pub async fn load_tables(
    handles: &[TableHandle],
    catalog: &dyn DatasetCatalog,
) -> LoadedTables {
    let mut order = Vec::new();
    let mut tables = HashMap::new();
    let mut warnings = Vec::new();

    for handle in handles {
        match load_one(handle) {
            Ok(df) => {
                info!(
                    "Loaded table '{}' ({} rows, {} columns)",
                    handle.table_name,
                    df.height(),
                    df.width()
                );
                if let Err(e) = catalog.mark_used(&handle.record.id).await {
                    warn!("mark_used failed for {}: {}", handle.record.id, e);
                }
                order.push(handle.table_name.clone());
                tables.insert(handle.table_name.clone(), df);
            }
            Err(e) => {
                warn!("Skipping dataset '{}': {}", handle.record.original_filename, e);
                warnings.push(format!("{}: {}", handle.record.original_filename, e));
            }
        }
    }

    LoadedTables {
        order,
        tables,
        warnings,
    }
}

fn load_one(handle: &TableHandle) -> Result<DataFrame> {
    match handle.record.file_format {
        FileFormat::Parquet => {
            let file = std::fs::File::open(&handle.record.file_path)?;
            Ok(ParquetReader::new(file).finish()?)
        }
        FileFormat::Csv => {
            let bytes = std::fs::read(&handle.record.file_path)?;
            load_csv_bytes(&bytes)
        }
    }
}

/// Run the hypothesis chain over raw CSV bytes.
pub fn load_csv_bytes(bytes: &[u8]) -> Result<DataFrame> {
    let mut errors = Vec::new();

    for (i, hypothesis) in HYPOTHESES.iter().enumerate() {
        match try_hypothesis(bytes, hypothesis) {
            Ok(df) => return Ok(df),
            Err(e) => errors.push(format!("option {}: {}", i + 1, e)),
        }
    }

    Err(EngineError::Load(format!(
        "all format hypotheses failed ({})",
        errors.join("; ")
    )))
}

fn try_hypothesis(bytes: &[u8], hypothesis: &ReadHypothesis) -> Result<DataFrame> {
    let text = match hypothesis.encoding {
        SourceEncoding::Utf8 => std::str::from_utf8(bytes)
            .map_err(|e| EngineError::Load(format!("not valid UTF-8: {}", e)))?
            .to_string(),
        SourceEncoding::Windows1250 => {
            let (decoded, _, _) = encoding_rs::WINDOWS_1250.decode(bytes);
            decoded.into_owned()
        }
    };

    parse_csv_text(&text, hypothesis.delimiter, hypothesis.decimal)
}

fn parse_csv_text(text: &str, delimiter: u8, decimal: char) -> Result<DataFrame> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .delimiter(delimiter)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = rdr
        .headers()
        .map_err(|e| EngineError::Load(format!("failed to read headers: {}", e)))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    if headers.is_empty() {
        return Err(EngineError::Load("no columns".to_string()));
    }

    // A single column whose header still contains a delimiter character means
    // the file was split with the wrong separator; let the next hypothesis try.
    if headers.len() == 1 && (headers[0].contains(';') || headers[0].contains(',')) {
        return Err(EngineError::Load(format!(
            "single mis-split column '{}'",
            headers[0]
        )));
    }

    let headers = dedupe_headers(headers);

    let mut columns: Vec<Vec<Option<String>>> = vec![Vec::new(); headers.len()];
    for record in rdr.records() {
        let record = record.map_err(|e| EngineError::Load(format!("bad record: {}", e)))?;
        for (idx, cell) in columns.iter_mut().enumerate() {
            let value = record.get(idx).unwrap_or("").trim();
            cell.push(if value.is_empty() {
                None
            } else {
                Some(value.to_string())
            });
        }
    }

    if columns[0].is_empty() {
        return Err(EngineError::Load("no data rows".to_string()));
    }

    let series: Vec<Series> = headers
        .iter()
        .zip(columns.into_iter())
        .map(|(name, values)| build_series(name, values, decimal))
        .collect();

    Ok(DataFrame::new(series)?)
}

/// Column names within one table must be unique; repeated headers get a
/// positional suffix the way spreadsheet tools disambiguate them.
fn dedupe_headers(headers: Vec<String>) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    headers
        .into_iter()
        .map(|h| {
            let count = seen.entry(h.clone()).or_insert(0);
            *count += 1;
            if *count == 1 {
                h
            } else {
                format!("{}_{}", h, count)
            }
        })
        .collect()
}

/// Infer the narrowest type that fits every non-null cell, honouring the
/// hypothesis's decimal convention for numbers.
fn build_series(name: &str, values: Vec<Option<String>>, decimal: char) -> Series {
    let non_null: Vec<&String> = values.iter().flatten().collect();

    if !non_null.is_empty() && non_null.iter().all(|v| parse_int(v).is_some()) {
        let ints: Vec<Option<i64>> = values
            .iter()
            .map(|v| v.as_deref().and_then(parse_int))
            .collect();
        return Series::new(name, ints);
    }

    if !non_null.is_empty()
        && non_null.iter().all(|v| parse_float(v, decimal).is_some())
    {
        let floats: Vec<Option<f64>> = values
            .iter()
            .map(|v| v.as_deref().and_then(|s| parse_float(s, decimal)))
            .collect();
        return Series::new(name, floats);
    }

    Series::new(name, values)
}

fn parse_int(raw: &str) -> Option<i64> {
    raw.trim().parse::<i64>().ok()
}

fn parse_float(raw: &str, decimal: char) -> Option<f64> {
    // Regional exports pad numbers with spaces as thousands separators.
    let cleaned: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    let normalized = if decimal == ',' {
        cleaned.replace(',', ".")
    } else {
        cleaned
    };
    normalized.parse::<f64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_normalization() {
        assert_eq!(normalize_table_name("Sales.csv"), "Sales");
        assert_eq!(
            normalize_table_name("Bridge Shipping-Types.csv"),
            "Bridge_Shipping_Types"
        );
        assert_eq!(normalize_table_name("noext"), "noext");
    }

    #[test]
    fn semicolon_comma_decimal_csv() {
        let text = "Country;Revenue\nCZ;1234,5\nSK;2,0\n";
        let df = load_csv_bytes(text.as_bytes()).unwrap();
        assert_eq!(df.height(), 2);
        let revenue = df.column("Revenue").unwrap();
        assert_eq!(revenue.dtype(), &DataType::Float64);
        assert_eq!(revenue.f64().unwrap().get(0), Some(1234.5));
    }

    #[test]
    fn comma_dot_decimal_csv_falls_through_to_second_hypothesis() {
        let text = "Country,Revenue\nCZ,1234.5\nSK,2\n";
        let df = load_csv_bytes(text.as_bytes()).unwrap();
        assert_eq!(df.width(), 2);
        assert_eq!(df.height(), 2);
        let revenue = df.column("Revenue").unwrap();
        assert_eq!(revenue.f64().unwrap().get(0), Some(1234.5));
    }

    #[test]
    fn windows_1250_bytes_use_legacy_fallback() {
        // 0xEC is 'ě' in windows-1250 and invalid on its own in UTF-8.
        let bytes = b"M\xECsto;Hodnota\nBrno;1\n";
        let df = load_csv_bytes(bytes).unwrap();
        assert_eq!(df.get_column_names()[0], "Město");
        assert_eq!(df.height(), 1);
    }

    #[test]
    fn unparseable_file_exhausts_all_hypotheses() {
        // Ragged semicolon rows defeat hypotheses 1 and 3; the comma pass
        // produces a single mis-split column and is rejected too.
        let text = "a;b\n1;2;3\n";
        let err = load_csv_bytes(text.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("all format hypotheses failed"));
    }

    #[test]
    fn integers_stay_integers() {
        let text = "Id;Count\n1;10\n2;\n";
        let df = load_csv_bytes(text.as_bytes()).unwrap();
        let count = df.column("Count").unwrap();
        assert_eq!(count.dtype(), &DataType::Int64);
        assert_eq!(count.i64().unwrap().get(1), None);
    }

    #[test]
    fn duplicate_headers_are_deduped() {
        let text = "A;A;B\n1;2;3\n";
        let df = load_csv_bytes(text.as_bytes()).unwrap();
        assert_eq!(df.get_column_names(), &["A", "A_2", "B"]);
    }
}
