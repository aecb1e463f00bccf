use std::fs;

use anyhow::Result;
use chrono::Utc;
use rusqlite::Connection;
use tracing::{info, warn};

use super::lifecycle::DocumentState;
use super::pipeline::Pipeline;
use crate::ansi::AnsiClassifier;
use crate::cli::IngestArgs;
use crate::commands::inventory::{self, SourceDocument};
use crate::config::PipelineConfig;
use crate::db::{self, DB_SCHEMA_VERSION};
use crate::extract::DocumentExtractor;
use crate::model::{FileStatusRow, IngestCounts, IngestPaths, IngestRunManifest};
use crate::registry::{
    MemoryRegistryStore, ProcessingRegistry, ProcessingStatus, SqliteRegistryStore,
};
use crate::util::{ensure_directory, now_utc_string, utc_compact_string, write_json_pretty};

pub fn run(args: IngestArgs) -> Result<()> {
    let started_ts = Utc::now();
    let started_at = now_utc_string();
    let run_id = format!("run-{}", utc_compact_string(started_ts));

    let cache_root = args.cache_root.clone();
    let manifest_dir = cache_root.join("manifests");
    ensure_directory(&manifest_dir)?;

    let manifest_path = args.manifest_path.clone().unwrap_or_else(|| {
        manifest_dir.join(format!("ingest_run_{}.json", utc_compact_string(started_ts)))
    });
    let db_path = args.resolved_db_path();
    if let Some(parent) = db_path.parent().filter(|_| !args.dry_run) {
        ensure_directory(parent)?;
    }

    info!(cache_root = %cache_root.display(), run_id = %run_id, "starting ingest");

    let config = PipelineConfig::load(args.config.as_deref())?;
    let ansi = AnsiClassifier::load(args.ansi_table.as_deref())?;
    let ansi_rule_count = ansi.rule_count();
    let documents = inventory::discover(&args.inputs)?;
    info!(documents = documents.len(), "discovered input documents");

    let (mut connection, registry) = if args.dry_run {
        info!("dry run: nothing will be persisted");
        (
            db::open_in_memory()?,
            ProcessingRegistry::new(Box::new(MemoryRegistryStore::new())),
        )
    } else {
        (
            db::open(&db_path)?,
            ProcessingRegistry::new(Box::new(SqliteRegistryStore::open(&db_path)?)),
        )
    };
    let mut pipeline = Pipeline::new(
        config.clone(),
        ansi,
        DocumentExtractor::default(),
        registry,
        args.force,
    )?;

    let files = process_all(&mut pipeline, &mut connection, &documents);
    for (status, count) in pipeline.registry().store().counts()? {
        info!(status = status.as_str(), count, "ledger entries");
    }

    let mut counts = tally(&files);
    counts.canonical_rows_total = db::total_canonical_rows(&connection)?;

    let manifest = IngestRunManifest {
        manifest_version: 1,
        run_id: run_id.clone(),
        db_schema_version: DB_SCHEMA_VERSION.to_string(),
        status: if args.dry_run { "dry_run" } else { "completed" }.to_string(),
        started_at,
        updated_at: now_utc_string(),
        command: render_ingest_command(&args),
        force: args.force,
        ansi_rule_count,
        config,
        paths: IngestPaths {
            cache_root: cache_root.display().to_string(),
            manifest_dir: manifest_dir.display().to_string(),
            pdf_dir: args.inputs.pdf_dir.display().to_string(),
            ini_dir: args.inputs.ini_dir.display().to_string(),
            db_path: db_path.display().to_string(),
            ansi_table_path: args.ansi_table.as_ref().map(|path| path.display().to_string()),
            config_path: args.config.as_ref().map(|path| path.display().to_string()),
        },
        counts: counts.clone(),
        files,
    };

    write_json_pretty(&manifest_path, &manifest)?;

    info!(path = %manifest_path.display(), "wrote ingest run manifest");
    info!(
        discovered = counts.discovered,
        success = counts.success,
        error = counts.error,
        duplicate = counts.duplicate,
        skipped = counts.skipped,
        rows_inserted = counts.rows_inserted,
        "ingest completed"
    );

    Ok(())
}

/// Walks every document. A file that cannot even be read has no content
/// hash, so it is reported in the run table but never reaches the ledger.
fn process_all(
    pipeline: &mut Pipeline,
    connection: &mut Connection,
    documents: &[SourceDocument],
) -> Vec<FileStatusRow> {
    let mut files = Vec::with_capacity(documents.len());
    for document in documents {
        let bytes = match fs::read(&document.path) {
            Ok(bytes) => bytes,
            Err(error) => {
                warn!(file = %document.file_name, error = %error, "failed to read input document");
                files.push(unreadable_row(document, &error));
                continue;
            }
        };
        files.push(pipeline.process(connection, &document.file_name, document.format, &bytes));
    }
    files
}

fn unreadable_row(document: &SourceDocument, error: &std::io::Error) -> FileStatusRow {
    FileStatusRow {
        file_name: document.file_name.clone(),
        file_hash: String::new(),
        format: document.format.as_str().to_string(),
        vendor: None,
        status: ProcessingStatus::Error.as_str().to_string(),
        final_state: DocumentState::ExtractionFailed.as_str().to_string(),
        state_path: [DocumentState::Discovered, DocumentState::ExtractionFailed]
            .iter()
            .map(|state| state.as_str().to_string())
            .collect(),
        records_inserted: 0,
        rows_skipped: 0,
        relay_replaced: false,
        coverage: None,
        strategy: None,
        parameters_dropped: 0,
        warnings: Vec::new(),
        error_message: Some(format!("extraction failed: {error}")),
    }
}

pub(super) fn tally(files: &[FileStatusRow]) -> IngestCounts {
    let mut counts = IngestCounts {
        discovered: files.len(),
        ..IngestCounts::default()
    };
    for file in files {
        match ProcessingStatus::parse(&file.status) {
            Some(ProcessingStatus::Success) => counts.success += 1,
            Some(ProcessingStatus::Duplicate) => counts.duplicate += 1,
            Some(ProcessingStatus::Skipped) => counts.skipped += 1,
            Some(ProcessingStatus::Error) | None => counts.error += 1,
        }
        counts.rows_inserted += file.records_inserted;
        counts.rows_skipped += file.rows_skipped;
        counts.parameters_dropped += file.parameters_dropped;
        counts.relays_replaced += usize::from(file.relay_replaced);
    }
    counts
}

fn render_ingest_command(args: &IngestArgs) -> String {
    let mut command = format!(
        "relayconf ingest --pdf-dir {} --ini-dir {} --cache-root {}",
        args.inputs.pdf_dir.display(),
        args.inputs.ini_dir.display(),
        args.cache_root.display()
    );
    if let Some(path) = &args.db_path {
        command.push_str(&format!(" --db-path {}", path.display()));
    }
    if let Some(path) = &args.manifest_path {
        command.push_str(&format!(" --manifest-path {}", path.display()));
    }
    if let Some(path) = &args.config {
        command.push_str(&format!(" --config {}", path.display()));
    }
    if let Some(path) = &args.ansi_table {
        command.push_str(&format!(" --ansi-table {}", path.display()));
    }
    if args.force {
        command.push_str(" --force");
    }
    if args.dry_run {
        command.push_str(" --dry-run");
    }
    command
}
