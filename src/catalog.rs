//! Dataset catalog - the persistence collaborator seen by the pipeline
//!
//! The pipeline only needs two things from storage: an ordered list of a
//! tenant's dataset records (optionally filtered by id) and a best-effort
//! "mark used" update. Everything else about dataset persistence lives
//! behind this trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::error::Result;

/// File format of an uploaded dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    Csv,
    Parquet,
}

impl FileFormat {
    pub fn from_filename(filename: &str) -> Self {
        if filename.to_lowercase().ends_with(".parquet") {
            FileFormat::Parquet
        } else {
            FileFormat::Csv
        }
    }
}

/// One tenant dataset as stored by the persistence layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetRecord {
    pub id: String,
    pub original_filename: String,
    pub file_path: PathBuf,
    pub file_format: FileFormat,
}

#[async_trait]
pub trait DatasetCatalog: Send + Sync {
    /// Ordered list of a tenant's datasets. `dataset_ids` narrows the list;
    /// `None` means all datasets the tenant owns.
    async fn list_datasets(
        &self,
        tenant_id: &str,
        dataset_ids: Option<&[String]>,
    ) -> Result<Vec<DatasetRecord>>;

    /// Best-effort last-used timestamp update. Last write wins; failures are
    /// logged by callers, never propagated.
    async fn mark_used(&self, dataset_id: &str) -> Result<()>;
}

/// In-memory catalog backed by a directory of files. Used by tests and by
/// the server when no DATABASE_URL is configured.
pub struct InMemoryCatalog {
    records: HashMap<String, Vec<DatasetRecord>>,
    used: Mutex<Vec<String>>,
}

impl InMemoryCatalog {
    pub fn new(tenant_id: &str, records: Vec<DatasetRecord>) -> Self {
        let mut map = HashMap::new();
        map.insert(tenant_id.to_string(), records);
        Self {
            records: map,
            used: Mutex::new(Vec::new()),
        }
    }

    /// Build a catalog from every *.csv / *.parquet file in a directory.
    pub fn from_dir(tenant_id: &str, dir: &std::path::Path) -> Result<Self> {
        let mut records = Vec::new();
        let mut entries: Vec<_> = std::fs::read_dir(dir)?.filter_map(|e| e.ok()).collect();
        entries.sort_by_key(|e| e.file_name());
        for entry in entries {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let lower = name.to_lowercase();
            if !lower.ends_with(".csv") && !lower.ends_with(".parquet") {
                continue;
            }
            records.push(DatasetRecord {
                id: name.to_string(),
                original_filename: name.to_string(),
                file_path: path.clone(),
                file_format: FileFormat::from_filename(name),
            });
        }
        Ok(Self::new(tenant_id, records))
    }

    /// Ids that have been marked used, in call order.
    pub fn used_ids(&self) -> Vec<String> {
        self.used.lock().expect("used lock poisoned").clone()
    }
}

#[async_trait]
impl DatasetCatalog for InMemoryCatalog {
    async fn list_datasets(
        &self,
        tenant_id: &str,
        dataset_ids: Option<&[String]>,
    ) -> Result<Vec<DatasetRecord>> {
        let all = self.records.get(tenant_id).cloned().unwrap_or_default();
        match dataset_ids {
            Some(ids) => Ok(all.into_iter().filter(|r| ids.contains(&r.id)).collect()),
            None => Ok(all),
        }
    }

    async fn mark_used(&self, dataset_id: &str) -> Result<()> {
        self.used
            .lock()
            .expect("used lock poisoned")
            .push(dataset_id.to_string());
        Ok(())
    }
}
