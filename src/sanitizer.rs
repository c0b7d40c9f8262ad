//! Code sanitizer - cleans raw generator output before execution
//!
//! Two passes, in order: markdown fence stripping, then file-read
//! elimination. The generator cannot know the data is pre-loaded rather
//! than file-backed, so disk-read calls referencing a loaded table's
//! original filename are rewritten to the in-memory variable plus a copy.
//! Patterns that do not match are left unchanged; sanitization never fails.

use regex::Regex;

/// A loaded table the sanitizer knows how to patch references to.
#[derive(Debug, Clone)]
pub struct SanitizeTarget {
    /// In-memory variable name (normalized), e.g. `Sales`.
    pub table_name: String,
    /// Original uploaded filename, e.g. `Sales.csv`.
    pub original_filename: String,
}

/// Produce sanitized code from raw generated text. Always returns a new
/// string; the input is never mutated. Idempotent: sanitizing the output
/// again yields the same text.
pub fn sanitize(raw: &str, targets: &[SanitizeTarget]) -> String {
    let code = strip_markdown_fence(raw);
    let code = rewrite_file_reads(&code, targets);
    neutralize_rebinds(&code, targets)
}

/// Extract the inner content of the first fenced code block, if any;
/// otherwise return the trimmed raw text.
fn strip_markdown_fence(raw: &str) -> String {
    let fence =
        Regex::new(r"(?s)```[a-zA-Z]*[ \t]*\r?\n?(.*?)```").expect("fence regex is valid");
    match fence.captures(raw) {
        Some(caps) => caps[1].trim().to_string(),
        None => raw.trim().to_string(),
    }
}

/// Replace disk-read calls that reference a loaded table's filename (either
/// quoting style, any trailing arguments) with `<Table>.copy()`.
fn rewrite_file_reads(code: &str, targets: &[SanitizeTarget]) -> String {
    let mut out = code.to_string();
    for target in targets {
        let pattern = format!(
            r#"(?:pd\s*\.\s*)?read_(?:csv|excel|parquet)\(\s*['"]{}['"][^)]*\)"#,
            regex::escape(&target.original_filename)
        );
        let re = Regex::new(&pattern).expect("read regex is valid");
        out = re
            .replace_all(&out, format!("{}.copy()", target.table_name).as_str())
            .into_owned();
    }
    out
}

/// Guard against the generator re-binding a table variable to a failed
/// disk read, e.g. `SALES = pd.read_csv('sales_2024.csv')`. The whole
/// statement becomes a no-op comment.
fn neutralize_rebinds(code: &str, targets: &[SanitizeTarget]) -> String {
    let mut out = code.to_string();
    for target in targets {
        let upper = target.table_name.to_uppercase();
        let pattern = format!(
            r"(?m)^[ \t]*{}\s*=\s*(?:pd\s*\.\s*)?read_\w+\([^)]*\)[ \t]*$",
            regex::escape(&upper)
        );
        let re = Regex::new(&pattern).expect("rebind regex is valid");
        out = re
            .replace_all(
                &out,
                format!("# {} is already loaded", target.table_name).as_str(),
            )
            .into_owned();
    }
    out
}
