use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;
use crate::error::ValidationWarning;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryEntry {
    pub file_name: String,
    pub path: String,
    pub format: String,
    pub size_bytes: u64,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryManifest {
    pub manifest_version: u32,
    pub generated_at: String,
    pub pdf_directory: String,
    pub ini_directory: String,
    pub document_count: usize,
    pub pdf_count: usize,
    pub ini_count: usize,
    pub documents: Vec<InventoryEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestPaths {
    pub cache_root: String,
    pub manifest_dir: String,
    pub pdf_dir: String,
    pub ini_dir: String,
    pub db_path: String,
    pub ansi_table_path: Option<String>,
    pub config_path: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IngestCounts {
    pub discovered: usize,
    pub success: usize,
    pub error: usize,
    pub duplicate: usize,
    pub skipped: usize,
    pub rows_inserted: i64,
    pub rows_skipped: i64,
    pub parameters_dropped: usize,
    pub relays_replaced: usize,
    pub canonical_rows_total: i64,
}

/// One line of the per-file status table every run produces.
#[derive(Debug, Clone, Serialize)]
pub struct FileStatusRow {
    pub file_name: String,
    pub file_hash: String,
    pub format: String,
    pub vendor: Option<String>,
    pub status: String,
    pub final_state: String,
    /// Every lifecycle state the document passed through, in order.
    pub state_path: Vec<String>,
    pub records_inserted: i64,
    pub rows_skipped: i64,
    pub relay_replaced: bool,
    pub coverage: Option<f64>,
    pub strategy: Option<String>,
    pub parameters_dropped: usize,
    pub warnings: Vec<ValidationWarning>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestRunManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub db_schema_version: String,
    pub status: String,
    pub started_at: String,
    pub updated_at: String,
    pub command: String,
    pub force: bool,
    pub ansi_rule_count: usize,
    pub config: PipelineConfig,
    pub paths: IngestPaths,
    pub counts: IngestCounts,
    pub files: Vec<FileStatusRow>,
}
