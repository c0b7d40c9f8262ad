//! Default prompt template - business vocabulary for the code generator
//!
//! The pipeline treats templates as opaque; this default one picks a flavour
//! from the dataset names the same way the product's module detector does:
//! accounting datasets get P&L guidance, sales datasets get commerce
//! guidance, a mix gets both.

use crate::prompt::PromptTemplate;

const BASE_CONTEXT: &str = r#"# ANALYST CONTEXT

You are a data analyst answering business questions over tabular datasets.
Datasets are often exported in WIDE format: one column per time period,
named DD.MM.YYYY (e.g. "01.01.2024" is January 2024). There is no
'order_date' column in wide tables - aggregate over the date columns
instead. Monthly trend questions should include month-over-month change
when the data allows it."#;

const SALES_CONTEXT: &str = r#"## SALES DATA

- Revenue columns hold amounts for the month named by the column.
- Dimension columns (country, segment, payment method, category) describe
  each row; group by them for breakdowns.
- Breakdown answers should carry a share-of-total where it helps.
- Top-N questions: sort descending, then head(n)."#;

const ACCOUNTING_CONTEXT: &str = r#"## ACCOUNTING DATA

- Profit & loss exports are WIDE with one column per month.
- An account-class column separates costs from revenue; filter it before
  aggregating, never sum the whole statement blindly.
- Costs are commonly negative; report absolute values in summaries."#;

pub struct DefaultTemplate;

impl DefaultTemplate {
    fn looks_accounting(name: &str) -> bool {
        let lower = name.to_lowercase();
        lower.contains("pl") || lower.contains("ovh") || lower.contains("ledger")
    }

    fn looks_sales(name: &str) -> bool {
        let lower = name.to_lowercase();
        lower.contains("sales") || lower.contains("document") || lower.contains("order")
    }
}

impl PromptTemplate for DefaultTemplate {
    fn business_context(&self, dataset_names: &[String]) -> String {
        let has_accounting = dataset_names.iter().any(|n| Self::looks_accounting(n));
        let has_sales = dataset_names.iter().any(|n| Self::looks_sales(n));

        let mut context = String::from(BASE_CONTEXT);
        if has_sales || !has_accounting {
            context.push_str("\n\n");
            context.push_str(SALES_CONTEXT);
        }
        if has_accounting {
            context.push_str("\n\n");
            context.push_str(ACCOUNTING_CONTEXT);
        }
        context
    }
}
