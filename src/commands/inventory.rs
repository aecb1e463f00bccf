use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::{info, warn};

use crate::cli::{InputArgs, InventoryArgs};
use crate::extract::SourceFormat;
use crate::model::{InventoryEntry, InventoryManifest};
use crate::util::{now_utc_string, sha256_file, write_json_pretty};

/// An input file found on disk, not yet read.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceDocument {
    pub path: PathBuf,
    pub file_name: String,
    pub format: SourceFormat,
}

pub fn run(args: InventoryArgs) -> Result<()> {
    let manifest = build_manifest(&args.inputs)?;

    if args.dry_run {
        info!(
            documents = manifest.document_count,
            pdf_count = manifest.pdf_count,
            ini_count = manifest.ini_count,
            "inventory dry-run complete"
        );
        return Ok(());
    }

    let manifest_path = args
        .manifest_path
        .unwrap_or_else(|| args.cache_root.join("manifests").join("inventory.json"));

    write_json_pretty(&manifest_path, &manifest)?;
    info!(path = %manifest_path.display(), "wrote inventory manifest");
    info!(documents = manifest.document_count, "inventory completed");

    Ok(())
}

pub fn build_manifest(inputs: &InputArgs) -> Result<InventoryManifest> {
    let documents = discover(inputs)?;

    let mut entries = Vec::with_capacity(documents.len());
    for document in &documents {
        let size_bytes = fs::metadata(&document.path)
            .with_context(|| format!("failed to stat {}", document.path.display()))?
            .len();
        entries.push(InventoryEntry {
            file_name: document.file_name.clone(),
            path: document.path.display().to_string(),
            format: document.format.as_str().to_string(),
            size_bytes,
            sha256: sha256_file(&document.path)?,
        });
    }

    let pdf_count = documents
        .iter()
        .filter(|document| document.format == SourceFormat::Pdf)
        .count();

    Ok(InventoryManifest {
        manifest_version: 1,
        generated_at: now_utc_string(),
        pdf_directory: inputs.pdf_dir.display().to_string(),
        ini_directory: inputs.ini_dir.display().to_string(),
        document_count: entries.len(),
        pdf_count,
        ini_count: entries.len() - pdf_count,
        documents: entries,
    })
}

/// PDF reports from the PDF directory and scripts from the script
/// directory, sorted by file name within each. A missing directory counts
/// as empty; finding nothing at all is an error.
pub fn discover(inputs: &InputArgs) -> Result<Vec<SourceDocument>> {
    let mut documents = discover_in(&inputs.pdf_dir, SourceFormat::Pdf)?;
    documents.extend(discover_in(&inputs.ini_dir, SourceFormat::Ini)?);

    if documents.is_empty() {
        bail!(
            "no input documents found in {} or {}",
            inputs.pdf_dir.display(),
            inputs.ini_dir.display()
        );
    }
    Ok(documents)
}

fn discover_in(directory: &Path, wanted: SourceFormat) -> Result<Vec<SourceDocument>> {
    if !directory.is_dir() {
        warn!(path = %directory.display(), "input directory missing");
        return Ok(Vec::new());
    }

    let mut documents = Vec::new();
    let entries = fs::read_dir(directory)
        .with_context(|| format!("failed to read {}", directory.display()))?;

    for entry in entries {
        let entry =
            entry.with_context(|| format!("failed to read entry in {}", directory.display()))?;
        let path = entry.path();

        if !entry
            .file_type()
            .with_context(|| format!("failed to inspect file type: {}", path.display()))?
            .is_file()
        {
            continue;
        }
        if SourceFormat::from_path(&path) != Some(wanted) {
            continue;
        }

        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(ToOwned::to_owned)
            .with_context(|| format!("invalid UTF-8 filename: {}", path.display()))?;

        documents.push(SourceDocument {
            path,
            file_name,
            format: wanted,
        });
    }

    documents.sort_by(|a, b| a.file_name.cmp(&b.file_name));
    Ok(documents)
}
