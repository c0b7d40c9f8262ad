//! Instruction composer - builds the payload sent to the code generator
//!
//! Deterministic string concatenation: business context, per-table schema
//! sections in load order, then the fixed output contract. Every convention
//! the downstream stages rely on (table variable names, the first-line
//! `title` assignment, the designated `result` variable) is imposed here.

use crate::schema::SchemaSummary;

/// The single, by-convention variable the sandbox reads after execution.
pub const RESULT_VARIABLE: &str = "result";

/// Optional first-line title variable captured into the response.
pub const TITLE_VARIABLE: &str = "title";

/// Business-context collaborator. The pipeline treats it as an opaque
/// string-producing function over the available dataset names.
pub trait PromptTemplate: Send + Sync {
    fn business_context(&self, dataset_names: &[String]) -> String;
}

/// Compose the full instruction payload. Immutable once built.
pub fn compose_instructions(
    query: &str,
    summaries: &[SchemaSummary],
    template: &dyn PromptTemplate,
) -> String {
    let dataset_names: Vec<String> = summaries.iter().map(|s| s.table_name.clone()).collect();

    let mut payload = String::new();
    payload.push_str(&template.business_context(&dataset_names));
    payload.push_str("\n\n## AVAILABLE TABLES\n\n");
    for summary in summaries {
        payload.push_str(&summary.render());
        payload.push('\n');
    }

    payload.push_str(&script_contract(&dataset_names));
    payload.push_str("\n## USER QUERY\n\n");
    payload.push_str(query);
    payload.push_str("\n\nGenerate the transform script now. Remember the title on the first line.\n");

    payload
}

/// Fixed boilerplate describing the transform-script language and the
/// output contract.
fn script_contract(table_names: &[String]) -> String {
    format!(
        r#"## TRANSFORM SCRIPT LANGUAGE

Answer by emitting a transform script, one statement per line, each of the
form `name = expression`. Lines starting with `#` are comments. Expressions
are string/number literals, `[a, b]` lists, table variables and method
chains. The available table methods are:

- copy()
- filter(column, op, value)        # op: "==", "!=", ">", "<", ">=", "<=", "contains"
- select([columns])
- sort(column) / sort(column, "desc")
- head(n)
- group_sum(by_column, value_column)
- group_mean(by_column, value_column)
- group_count(by_column)
- sum(column) / mean(column) / count()
- melt([id_columns], [value_columns])   # wide to long; produces "variable"/"value"
- rename(old_name, new_name)
- column(name)                     # single column; supports .sum() .mean() .min() .max() .count()
- date_columns()                   # wide-format date column names, chronological

## OUTPUT RULES

1. The FIRST line must be a title assignment: {title} = "Short descriptive name"
2. The LAST line must assign the answer: {result} = <table, column or value>
3. Use ONLY the pre-loaded table variables listed below. NEVER read files
   from disk - read_csv and read_excel do not exist here.
4. Do not format numeric columns into strings before derived numeric
   computations are complete.
5. Sort descending (highest first) unless the user asks otherwise.

Pre-loaded tables in memory: {tables}
"#,
        title = TITLE_VARIABLE,
        result = RESULT_VARIABLE,
        tables = table_names.join(", "),
    )
}
