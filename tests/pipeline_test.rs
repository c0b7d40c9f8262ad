//! End-to-end pipeline tests with a canned code generator

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

use askdata::catalog::{DatasetRecord, FileFormat, InMemoryCatalog};
use askdata::db::history::{HistoryRecord, HistoryStore, InMemoryHistoryStore};
use askdata::error::Result;
use askdata::llm::CodeGenerator;
use askdata::pipeline::{QueryEngine, QueryRequest};
use askdata::templates::DefaultTemplate;

struct CannedGenerator {
    script: String,
}

#[async_trait]
impl CodeGenerator for CannedGenerator {
    async fn generate(&self, _instructions: &str) -> Result<String> {
        Ok(self.script.clone())
    }
}

fn temp_dataset(name: &str, content: &str) -> DatasetRecord {
    let dir = std::env::temp_dir().join(format!("askdata-it-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    DatasetRecord {
        id: name.to_lowercase(),
        original_filename: name.to_string(),
        file_path: path,
        file_format: FileFormat::from_filename(name),
    }
}

fn engine(script: &str, records: Vec<DatasetRecord>) -> (QueryEngine, Arc<InMemoryCatalog>) {
    let catalog = Arc::new(InMemoryCatalog::new("t1", records));
    let engine = QueryEngine::new(
        catalog.clone(),
        Arc::new(DefaultTemplate),
        Arc::new(CannedGenerator {
            script: script.to_string(),
        }),
    );
    (engine, catalog)
}

fn request(query: &str) -> QueryRequest {
    QueryRequest {
        query: query.to_string(),
        context_query_id: None,
        dataset_ids: None,
    }
}

#[tokio::test]
async fn table_result_becomes_row_objects() {
    let sales = temp_dataset(
        "Sales.csv",
        "Country;Revenue\nCZ;120,0\nSK;80,5\nPL;40,0\n",
    );
    let script = "```python\n\
                  title = 'Revenue by country'\n\
                  result = Sales.sort('Revenue', 'desc')\n\
                  ```";
    let (engine, catalog) = engine(script, vec![sales]);

    let response = engine
        .execute_query("t1", &request("revenue by country"), None)
        .await
        .unwrap();

    assert!(response.success);
    assert_eq!(response.result_rows, Some(3));
    assert_eq!(response.title.as_deref(), Some("Revenue by country"));
    assert_eq!(response.datasets_used, vec!["sales.csv"]);

    let rows = response.result.unwrap();
    let rows = rows.as_array().unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0]["Country"], "CZ");
    assert_eq!(rows[0]["Revenue"], 120.0);

    // Loading marks the dataset as used.
    assert_eq!(catalog.used_ids(), vec!["sales.csv"]);
}

#[tokio::test]
async fn scalar_result_is_wrapped_under_value_key() {
    let sales = temp_dataset("Sales.csv", "Country;Revenue\nCZ;40,0\nSK;2,5\n");
    let script = "title = 'Total'\nresult = Sales.sum('Revenue')";
    let (engine, _) = engine(script, vec![sales]);

    let response = engine.execute_query("t1", &request("total?"), None).await.unwrap();

    assert!(response.success);
    assert_eq!(response.result_rows, Some(1));
    assert_eq!(
        response.result.unwrap(),
        serde_json::json!({ "value": "42.5" })
    );
}

#[tokio::test]
async fn file_reads_in_generated_code_are_rewritten() {
    let sales = temp_dataset("Sales.csv", "Country;Revenue\nCZ;1,0\nSK;2,0\n");
    // The generator hallucinated a disk read; sanitization maps it onto
    // the pre-loaded table.
    let script = "```python\n\
                  df = pd.read_csv('Sales.csv', sep=';')\n\
                  result = df.count()\n\
                  ```";
    let (engine, _) = engine(script, vec![sales]);

    let response = engine.execute_query("t1", &request("row count"), None).await.unwrap();

    assert!(response.success, "error: {:?}", response.error_message);
    assert_eq!(
        response.result.unwrap(),
        serde_json::json!({ "value": "2" })
    );
    assert!(response.generated_code.unwrap().contains("Sales.copy()"));
}

#[tokio::test]
async fn unreadable_dataset_is_skipped_not_fatal() {
    let good = temp_dataset("Sales.csv", "Country;Revenue\nCZ;1,0\n");
    let bad = DatasetRecord {
        id: "broken".to_string(),
        original_filename: "Broken.csv".to_string(),
        file_path: PathBuf::from("/nonexistent/Broken.csv"),
        file_format: FileFormat::Csv,
    };
    let script = "result = Sales.count()";
    let (engine, _) = engine(script, vec![bad, good]);

    let response = engine.execute_query("t1", &request("count"), None).await.unwrap();

    assert!(response.success);
    assert_eq!(response.datasets_used, vec!["sales.csv"]);
}

#[tokio::test]
async fn normalized_filenames_become_table_variables() {
    let dataset = temp_dataset(
        "Monthly Sales-2024.csv",
        "Country;Revenue\nCZ;5,0\nSK;5,0\n",
    );
    let script = "result = Monthly_Sales_2024.sum('Revenue')";
    let (engine, _) = engine(script, vec![dataset]);

    let response = engine.execute_query("t1", &request("total"), None).await.unwrap();

    assert!(response.success, "error: {:?}", response.error_message);
    assert_eq!(
        response.result.unwrap(),
        serde_json::json!({ "value": "10" })
    );
}

#[tokio::test]
async fn responses_round_trip_through_history() {
    let sales = temp_dataset("Sales.csv", "Country;Revenue\nCZ;1,0\n");
    let script = "title = 'T'\nresult = Sales.count()";
    let (engine, _) = engine(script, vec![sales]);
    let history = InMemoryHistoryStore::new();

    let response = engine.execute_query("t1", &request("count"), None).await.unwrap();
    let entry = HistoryRecord::from_response("t1", &response);
    history.record(&entry).await.unwrap();

    let fetched = history.fetch("t1", &response.query_id).await.unwrap();
    assert_eq!(fetched.query_text, "count");
    assert_eq!(fetched.title.as_deref(), Some("T"));
    assert!(fetched.success);
    // The full response payload is persisted, not just metadata.
    assert_eq!(fetched.result, Some(serde_json::json!({ "value": "1" })));
    assert_eq!(fetched.generated_code, response.generated_code);
    assert_eq!(fetched.datasets_used, vec!["sales.csv"]);

    let (items, total) = history.list("t1", 10, 0).await.unwrap();
    assert_eq!(total, 1);
    assert_eq!(items[0].query_id, response.query_id);
}

#[tokio::test]
async fn dataset_id_filter_narrows_the_run() {
    let sales = temp_dataset("Sales.csv", "Country;Revenue\nCZ;1,0\n");
    let other = temp_dataset("Orders.csv", "Id;Qty\n1;2\n");
    let script = "result = Sales.count()";
    let sales_id = sales.id.clone();
    let (engine, _) = engine(script, vec![sales, other]);

    let req = QueryRequest {
        query: "count".to_string(),
        context_query_id: None,
        dataset_ids: Some(vec![sales_id]),
    };
    let response = engine.execute_query("t1", &req, None).await.unwrap();

    assert!(response.success);
    assert_eq!(response.datasets_used, vec!["sales.csv"]);
}
