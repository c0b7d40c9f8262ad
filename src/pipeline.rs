//! Query pipeline - orchestrates one natural-language query end to end
//!
//! Load, summarize, compose, generate, sanitize, execute, normalize,
//! assemble. Stage failures split two ways: generation failures abort the
//! request, while script and execution failures still produce a response
//! with `success = false` and the generated code attached, so the caller
//! can show what was attempted.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

use crate::catalog::DatasetCatalog;
use crate::error::{EngineError, Result};
use crate::llm::CodeGenerator;
use crate::loader::{self, TableHandle};
use crate::normalizer;
use crate::prompt::{self, PromptTemplate};
use crate::sandbox;
use crate::sanitizer::{self, SanitizeTarget};
use crate::schema::SchemaSummary;

#[derive(Debug, Clone, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    /// Previous query to carry conversational context from.
    #[serde(default)]
    pub context_query_id: Option<String>,
    /// Restrict the run to these dataset ids; `None` means all of them.
    #[serde(default)]
    pub dataset_ids: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub query_id: String,
    pub success: bool,
    pub query_text: String,
    pub title: Option<String>,
    pub generated_code: Option<String>,
    pub result: Option<serde_json::Value>,
    pub result_rows: Option<usize>,
    pub execution_time_ms: u64,
    pub error_message: Option<String>,
    pub datasets_used: Vec<String>,
}

pub struct QueryEngine {
    catalog: Arc<dyn DatasetCatalog>,
    template: Arc<dyn PromptTemplate>,
    generator: Arc<dyn CodeGenerator>,
}

impl QueryEngine {
    pub fn new(
        catalog: Arc<dyn DatasetCatalog>,
        template: Arc<dyn PromptTemplate>,
        generator: Arc<dyn CodeGenerator>,
    ) -> Self {
        Self {
            catalog,
            template,
            generator,
        }
    }

    /// Run one query for a tenant. `context_query` is the resolved text of
    /// an earlier question, carried into the instruction payload.
    pub async fn execute_query(
        &self,
        tenant_id: &str,
        request: &QueryRequest,
        context_query: Option<&str>,
    ) -> Result<QueryResponse> {
        let started = Instant::now();
        let query_id = uuid::Uuid::new_v4().to_string();

        info!("Query {} for tenant {}: {}", query_id, tenant_id, request.query);

        let records = self
            .catalog
            .list_datasets(tenant_id, request.dataset_ids.as_deref())
            .await?;
        let handles: Vec<TableHandle> =
            records.into_iter().map(TableHandle::from_record).collect();

        let loaded = loader::load_tables(&handles, self.catalog.as_ref()).await;
        // A tenant with no datasets at all still gets a generation run (the
        // script can answer dataset-free questions); only a set where every
        // load failed is a failure.
        if !handles.is_empty() && loaded.is_empty() {
            let message = format!(
                "no datasets could be loaded ({})",
                loaded.warnings.join("; ")
            );
            return Ok(self.failure(query_id, request, None, message, started));
        }

        // Ids echoed back to the caller, matching the request's dataset_ids.
        let loaded_ids: Vec<String> = handles
            .iter()
            .filter(|h| loaded.tables.contains_key(&h.table_name))
            .map(|h| h.record.id.clone())
            .collect();

        let summaries: Vec<SchemaSummary> = loaded
            .order
            .iter()
            .map(|name| SchemaSummary::from_table(name, &loaded.tables[name]))
            .collect();

        let effective_query = match context_query {
            Some(previous) => format!(
                "Earlier question: {}\n\nCurrent question: {}",
                previous, request.query
            ),
            None => request.query.clone(),
        };
        let instructions =
            prompt::compose_instructions(&effective_query, &summaries, self.template.as_ref());

        // Generation failures are fatal for the request.
        let raw = self.generator.generate(&instructions).await?;

        let targets: Vec<SanitizeTarget> = handles
            .iter()
            .filter(|h| loaded.tables.contains_key(&h.table_name))
            .map(|h| SanitizeTarget {
                table_name: h.table_name.clone(),
                original_filename: h.record.original_filename.clone(),
            })
            .collect();
        let code = sanitizer::sanitize(&raw, &targets);

        match sandbox::execute(&code, &loaded.tables) {
            Ok(output) => {
                let (result, rows) = normalizer::normalize(&output.value)?;
                info!("Query {} succeeded with {} result rows", query_id, rows);
                Ok(QueryResponse {
                    query_id,
                    success: true,
                    query_text: request.query.clone(),
                    title: output.title,
                    generated_code: Some(code),
                    result: Some(result),
                    result_rows: Some(rows),
                    execution_time_ms: started.elapsed().as_millis() as u64,
                    error_message: None,
                    datasets_used: loaded_ids,
                })
            }
            Err(
                e @ (EngineError::Script(_)
                | EngineError::Execution(_)
                | EngineError::MissingResult),
            ) => {
                info!("Query {} failed in execution: {}", query_id, e);
                let mut response =
                    self.failure(query_id, request, Some(code), e.to_string(), started);
                response.datasets_used = loaded_ids;
                Ok(response)
            }
            Err(other) => Err(other),
        }
    }

    fn failure(
        &self,
        query_id: String,
        request: &QueryRequest,
        generated_code: Option<String>,
        message: String,
        started: Instant,
    ) -> QueryResponse {
        QueryResponse {
            query_id,
            success: false,
            query_text: request.query.clone(),
            title: None,
            generated_code,
            result: None,
            result_rows: None,
            execution_time_ms: started.elapsed().as_millis() as u64,
            error_message: Some(message),
            datasets_used: Vec::new(),
        }
    }
}
