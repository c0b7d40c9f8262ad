//! Script sandbox - interprets transform scripts over in-memory tables
//!
//! The generated script never touches the filesystem or the network: the
//! only data reachable from a script is the table map handed in by the
//! pipeline, and the only operations are the closed method set below.
//! Statements execute top to bottom; the designated `result` variable is
//! the script's answer and a first-line `title` string is captured into
//! the output when present.

use polars::prelude::*;
use std::collections::HashMap;

use crate::error::{EngineError, Result};
use crate::prompt::{RESULT_VARIABLE, TITLE_VARIABLE};
use crate::schema;
use crate::script::{self, Expr};

// The script AST claims `Expr`; refer to the polars one by an alias.
use polars::lazy::dsl::Expr as PolarsExpr;

/// A runtime value inside a script.
#[derive(Debug, Clone)]
pub enum Value {
    Table(DataFrame),
    Column(Series),
    Num(f64),
    Str(String),
    List(Vec<Value>),
    Null,
}

impl Value {
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Table(_) => "table",
            Value::Column(_) => "column",
            Value::Num(_) => "number",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Null => "null",
        }
    }
}

/// The outcome of a successful script run.
#[derive(Debug, Clone)]
pub struct ScriptOutput {
    pub value: Value,
    pub title: Option<String>,
}

fn exec_err(line: usize, msg: impl Into<String>) -> EngineError {
    EngineError::Execution(format!("line {}: {}", line, msg.into()))
}

/// Parse and run a sanitized script against the loaded tables. Polars
/// failures inside a running script (missing column, bad cast) count as
/// execution errors, not internal ones.
pub fn execute(code: &str, tables: &HashMap<String, DataFrame>) -> Result<ScriptOutput> {
    match run(code, tables) {
        Err(EngineError::Polars(e)) => Err(EngineError::Execution(e.to_string())),
        other => other,
    }
}

fn run(code: &str, tables: &HashMap<String, DataFrame>) -> Result<ScriptOutput> {
    let parsed = script::parse(code)?;

    let mut env: HashMap<String, Value> = HashMap::new();
    let mut title: Option<String> = None;

    for stmt in &parsed.statements {
        let value = eval(&stmt.expr, &env, tables, stmt.line)?;
        if stmt.target == TITLE_VARIABLE {
            if let Value::Str(t) = &value {
                title = Some(t.clone());
            }
        }
        env.insert(stmt.target.clone(), value);
    }

    let value = env
        .remove(RESULT_VARIABLE)
        .ok_or(EngineError::MissingResult)?;

    // `result = [table]` is treated as the table itself.
    let value = match value {
        Value::List(mut items) if items.len() == 1 && matches!(items[0], Value::Table(_)) => {
            items.remove(0)
        }
        other => other,
    };

    Ok(ScriptOutput { value, title })
}

fn eval(
    expr: &Expr,
    env: &HashMap<String, Value>,
    tables: &HashMap<String, DataFrame>,
    line: usize,
) -> Result<Value> {
    match expr {
        Expr::Str(s) => Ok(Value::Str(s.clone())),
        Expr::Num(n) => Ok(Value::Num(*n)),
        Expr::Ident(name) => lookup(name, env, tables, line),
        Expr::List(items) => {
            let values: Result<Vec<Value>> = items
                .iter()
                .map(|item| eval(item, env, tables, line))
                .collect();
            Ok(Value::List(values?))
        }
        Expr::MethodCall {
            receiver,
            method,
            args,
        } => {
            let target = eval(receiver, env, tables, line)?;
            let arg_values: Result<Vec<Value>> =
                args.iter().map(|a| eval(a, env, tables, line)).collect();
            call_method(target, method, &arg_values?, line)
        }
    }
}

fn lookup(
    name: &str,
    env: &HashMap<String, Value>,
    tables: &HashMap<String, DataFrame>,
    line: usize,
) -> Result<Value> {
    if let Some(value) = env.get(name) {
        return Ok(value.clone());
    }
    if let Some(df) = tables.get(name) {
        return Ok(Value::Table(df.clone()));
    }
    Err(exec_err(line, format!("unknown variable '{}'", name)))
}

fn call_method(target: Value, method: &str, args: &[Value], line: usize) -> Result<Value> {
    match target {
        Value::Table(df) => table_method(df, method, args, line),
        Value::Column(series) => column_method(series, method, args, line),
        other => Err(exec_err(
            line,
            format!("cannot call '{}' on a {}", method, other.kind()),
        )),
    }
}

fn table_method(df: DataFrame, method: &str, args: &[Value], line: usize) -> Result<Value> {
    match method {
        "copy" => Ok(Value::Table(df)),
        "filter" => {
            let (column, op, value) = match args {
                [Value::Str(c), Value::Str(o), v] => (c, o, v),
                _ => {
                    return Err(exec_err(
                        line,
                        "filter expects (column, op, value)".to_string(),
                    ))
                }
            };
            Ok(Value::Table(filter_table(&df, column, op, value, line)?))
        }
        "select" => {
            let columns = string_list_arg(args, line, "select expects a list of column names")?;
            Ok(Value::Table(df.select(columns)?))
        }
        "sort" => {
            let column = str_arg(args, 0, line, "sort expects a column name")?;
            let descending = match args.get(1) {
                None => false,
                Some(Value::Str(s)) if s.eq_ignore_ascii_case("desc") => true,
                Some(Value::Str(s)) if s.eq_ignore_ascii_case("asc") => false,
                Some(other) => {
                    return Err(exec_err(
                        line,
                        format!("sort direction must be 'asc' or 'desc', got {}", other.kind()),
                    ))
                }
            };
            let indices = df.column(&column)?.arg_sort(SortOptions {
                descending,
                ..Default::default()
            });
            Ok(Value::Table(df.take(&indices)?))
        }
        "head" => {
            let n = usize_arg(args, 0, line, "head expects a row count")?;
            Ok(Value::Table(df.head(Some(n))))
        }
        "group_sum" => grouped_agg(df, args, line, |value_col| col(value_col).sum()),
        "group_mean" => grouped_agg(df, args, line, |value_col| col(value_col).mean()),
        "group_count" => {
            let by = str_arg(args, 0, line, "group_count expects a column name")?;
            let out = df
                .lazy()
                .group_by_stable([col(&by)])
                .agg([len().alias("count")])
                .collect()?;
            Ok(Value::Table(out))
        }
        "sum" => {
            let column = str_arg(args, 0, line, "sum expects a column name")?;
            numeric_reduce(df.column(&column)?, "sum")
        }
        "mean" => {
            let column = str_arg(args, 0, line, "mean expects a column name")?;
            numeric_reduce(df.column(&column)?, "mean")
        }
        "count" => Ok(Value::Num(df.height() as f64)),
        "melt" => {
            let id_vars = match args.first() {
                Some(list @ Value::List(_)) => value_strings(list, line)?,
                _ => return Err(exec_err(line, "melt expects ([id_columns], [value_columns])")),
            };
            let value_vars = match args.get(1) {
                Some(list @ Value::List(_)) => value_strings(list, line)?,
                _ => return Err(exec_err(line, "melt expects ([id_columns], [value_columns])")),
            };
            Ok(Value::Table(df.melt(id_vars, value_vars)?))
        }
        "rename" => {
            let old = str_arg(args, 0, line, "rename expects (old_name, new_name)")?;
            let new = str_arg(args, 1, line, "rename expects (old_name, new_name)")?;
            let mut out = df;
            out.rename(&old, &new)?;
            Ok(Value::Table(out))
        }
        "column" => {
            let name = str_arg(args, 0, line, "column expects a column name")?;
            Ok(Value::Column(df.column(&name)?.clone()))
        }
        "date_columns" => Ok(Value::List(
            schema::wide_date_columns(&df)
                .into_iter()
                .map(Value::Str)
                .collect(),
        )),
        other => Err(exec_err(line, format!("unknown table method '{}'", other))),
    }
}

fn column_method(series: Series, method: &str, args: &[Value], line: usize) -> Result<Value> {
    if !args.is_empty() {
        return Err(exec_err(
            line,
            format!("column method '{}' takes no arguments", method),
        ));
    }
    match method {
        "sum" => numeric_reduce(&series, "sum"),
        "mean" => numeric_reduce(&series, "mean"),
        "min" => numeric_reduce(&series, "min"),
        "max" => numeric_reduce(&series, "max"),
        "count" => Ok(Value::Num(series.len() as f64)),
        other => Err(exec_err(line, format!("unknown column method '{}'", other))),
    }
}

fn filter_table(
    df: &DataFrame,
    column: &str,
    op: &str,
    value: &Value,
    line: usize,
) -> Result<DataFrame> {
    if op == "contains" {
        let needle = match value {
            Value::Str(s) => s.clone(),
            other => {
                return Err(exec_err(
                    line,
                    format!("contains expects a string, got {}", other.kind()),
                ))
            }
        };
        let out = df
            .clone()
            .lazy()
            .filter(col(column).str().contains(lit(needle), false))
            .collect()?;
        return Ok(out);
    }

    let literal = match value {
        Value::Str(s) => lit(s.clone()),
        Value::Num(n) => lit(*n),
        other => {
            return Err(exec_err(
                line,
                format!("filter value must be a string or number, got {}", other.kind()),
            ))
        }
    };

    let predicate = match op {
        "==" => col(column).eq(literal),
        "!=" => col(column).neq(literal),
        ">" => col(column).gt(literal),
        "<" => col(column).lt(literal),
        ">=" => col(column).gt_eq(literal),
        "<=" => col(column).lt_eq(literal),
        other => return Err(exec_err(line, format!("unknown filter op '{}'", other))),
    };

    Ok(df.clone().lazy().filter(predicate).collect()?)
}

fn grouped_agg(
    df: DataFrame,
    args: &[Value],
    line: usize,
    agg: impl Fn(&str) -> PolarsExpr,
) -> Result<Value> {
    let by = str_arg(args, 0, line, "grouped aggregate expects (by_column, value_column)")?;
    let value_col = str_arg(args, 1, line, "grouped aggregate expects (by_column, value_column)")?;
    let out = df
        .lazy()
        .group_by_stable([col(&by)])
        .agg([agg(&value_col)])
        .collect()?;
    Ok(Value::Table(out))
}

/// Reduce a series to a single number, casting to float first so integer
/// and float columns behave the same.
fn numeric_reduce(series: &Series, op: &str) -> Result<Value> {
    let floats = series.cast(&DataType::Float64)?;
    let ca = floats.f64()?;
    let reduced = match op {
        "sum" => ca.sum(),
        "mean" => ca.mean(),
        "min" => ca.min(),
        "max" => ca.max(),
        _ => unreachable!("callers pass a fixed op name"),
    };
    Ok(reduced.map(Value::Num).unwrap_or(Value::Null))
}

fn str_arg(args: &[Value], index: usize, line: usize, msg: &str) -> Result<String> {
    match args.get(index) {
        Some(Value::Str(s)) => Ok(s.clone()),
        _ => Err(exec_err(line, msg.to_string())),
    }
}

fn usize_arg(args: &[Value], index: usize, line: usize, msg: &str) -> Result<usize> {
    match args.get(index) {
        Some(Value::Num(n)) if *n >= 0.0 && n.fract() == 0.0 => Ok(*n as usize),
        _ => Err(exec_err(line, msg.to_string())),
    }
}

fn string_list_arg(args: &[Value], line: usize, msg: &str) -> Result<Vec<String>> {
    match args.first() {
        Some(list @ Value::List(_)) => value_strings(list, line),
        _ => Err(exec_err(line, msg.to_string())),
    }
}

fn value_strings(value: &Value, line: usize) -> Result<Vec<String>> {
    match value {
        Value::List(items) => items
            .iter()
            .map(|item| match item {
                Value::Str(s) => Ok(s.clone()),
                other => Err(exec_err(
                    line,
                    format!("expected a column name, got {}", other.kind()),
                )),
            })
            .collect(),
        other => Err(exec_err(
            line,
            format!("expected a list, got {}", other.kind()),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sales_tables() -> HashMap<String, DataFrame> {
        let df = df![
            "Country" => ["CZ", "SK", "CZ", "PL"],
            "Segment" => ["B2B", "B2B", "B2C", "B2C"],
            "Revenue" => [100.0, 50.0, 25.0, 75.0]
        ]
        .unwrap();
        HashMap::from([("Sales".to_string(), df)])
    }

    #[test]
    fn group_sum_sort_head() {
        let script = "title = 'Revenue by country'\n\
                      by_country = Sales.group_sum('Country', 'Revenue')\n\
                      result = by_country.sort('Revenue', 'desc').head(2)\n";
        let output = execute(script, &sales_tables()).unwrap();
        assert_eq!(output.title.as_deref(), Some("Revenue by country"));

        let table = match output.value {
            Value::Table(df) => df,
            other => panic!("expected table, got {}", other.kind()),
        };
        assert_eq!(table.height(), 2);
        let countries = table.column("Country").unwrap();
        assert_eq!(countries.get(0).unwrap(), AnyValue::String("CZ"));
        let revenue = table.column("Revenue").unwrap().f64().unwrap();
        assert_eq!(revenue.get(0), Some(125.0));
    }

    #[test]
    fn filter_preserves_row_semantics() {
        let script = "result = Sales.filter('Country', '==', 'CZ')";
        let output = execute(script, &sales_tables()).unwrap();
        match output.value {
            Value::Table(df) => assert_eq!(df.height(), 2),
            other => panic!("expected table, got {}", other.kind()),
        }
    }

    #[test]
    fn numeric_filter_and_contains() {
        let script = "result = Sales.filter('Revenue', '>=', 75)";
        let output = execute(script, &sales_tables()).unwrap();
        match output.value {
            Value::Table(df) => assert_eq!(df.height(), 2),
            other => panic!("expected table, got {}", other.kind()),
        }

        let script = "result = Sales.filter('Segment', 'contains', '2B')";
        let output = execute(script, &sales_tables()).unwrap();
        match output.value {
            Value::Table(df) => assert_eq!(df.height(), 2),
            other => panic!("expected table, got {}", other.kind()),
        }
    }

    #[test]
    fn scalar_sum_over_integer_and_float_columns() {
        let df = df!["a" => [1i64, 2, 3], "b" => [0.5, 0.25, 0.25]].unwrap();
        let tables = HashMap::from([("T".to_string(), df)]);

        let output = execute("result = T.sum('a')", &tables).unwrap();
        assert!(matches!(output.value, Value::Num(n) if n == 6.0));

        let output = execute("result = T.column('b').sum()", &tables).unwrap();
        assert!(matches!(output.value, Value::Num(n) if n == 1.0));
    }

    #[test]
    fn copy_count_and_mean() {
        let script = "working = Sales.copy()\nresult = working.count()";
        let output = execute(script, &sales_tables()).unwrap();
        assert!(matches!(output.value, Value::Num(n) if n == 4.0));

        let output = execute("result = Sales.mean('Revenue')", &sales_tables()).unwrap();
        assert!(matches!(output.value, Value::Num(n) if n == 62.5));
    }

    #[test]
    fn melt_produces_variable_value_columns() {
        let df = df![
            "Country" => ["CZ"],
            "01.01.2024" => [10.0],
            "01.02.2024" => [20.0]
        ]
        .unwrap();
        let tables = HashMap::from([("Wide".to_string(), df)]);
        let script = "result = Wide.melt(['Country'], ['01.01.2024', '01.02.2024'])";
        let output = execute(script, &tables).unwrap();
        match output.value {
            Value::Table(df) => {
                assert_eq!(df.height(), 2);
                assert!(df.column("variable").is_ok());
                assert!(df.column("value").is_ok());
            }
            other => panic!("expected table, got {}", other.kind()),
        }
    }

    #[test]
    fn rename_and_select() {
        let script =
            "renamed = Sales.rename('Revenue', 'Amount')\nresult = renamed.select(['Country', 'Amount'])";
        let output = execute(script, &sales_tables()).unwrap();
        match output.value {
            Value::Table(df) => {
                assert_eq!(df.width(), 2);
                assert!(df.column("Amount").is_ok());
            }
            other => panic!("expected table, got {}", other.kind()),
        }
    }

    #[test]
    fn single_table_list_result_is_unwrapped() {
        let script = "result = [Sales.copy()]";
        let output = execute(script, &sales_tables()).unwrap();
        assert!(matches!(output.value, Value::Table(_)));
    }

    #[test]
    fn missing_result_variable_is_its_own_error() {
        let script = "by_country = Sales.group_sum('Country', 'Revenue')";
        let err = execute(script, &sales_tables()).unwrap_err();
        assert!(matches!(err, EngineError::MissingResult));
    }

    #[test]
    fn unknown_variable_reports_line() {
        let script = "title = 'x'\nresult = Orders.count()";
        let err = execute(script, &sales_tables()).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("line 2"), "got: {}", msg);
        assert!(msg.contains("Orders"), "got: {}", msg);
    }

    #[test]
    fn unknown_method_is_an_execution_error() {
        let script = "result = Sales.pivot('Country')";
        let err = execute(script, &sales_tables()).unwrap_err();
        assert!(matches!(err, EngineError::Execution(_)));
    }

    #[test]
    fn date_columns_are_chronological() {
        let df = df![
            "Country" => ["CZ"],
            "01.03.2024" => [1.0],
            "01.01.2024" => [1.0]
        ]
        .unwrap();
        let tables = HashMap::from([("Wide".to_string(), df)]);
        let output = execute("result = Wide.date_columns()", &tables).unwrap();
        match output.value {
            Value::List(items) => {
                let names: Vec<&str> = items
                    .iter()
                    .map(|v| match v {
                        Value::Str(s) => s.as_str(),
                        other => panic!("expected string, got {}", other.kind()),
                    })
                    .collect();
                assert_eq!(names, vec!["01.01.2024", "01.03.2024"]);
            }
            other => panic!("expected list, got {}", other.kind()),
        }
    }

    #[test]
    fn group_count_column() {
        let script = "result = Sales.group_count('Country')";
        let output = execute(script, &sales_tables()).unwrap();
        match output.value {
            Value::Table(df) => {
                assert_eq!(df.height(), 3);
                assert!(df.column("count").is_ok());
            }
            other => panic!("expected table, got {}", other.kind()),
        }
    }
}
