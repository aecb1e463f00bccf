use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "relayconf",
    version,
    about = "Protective-relay configuration export ingestion"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Inventory(InventoryArgs),
    Ingest(IngestArgs),
    Status(StatusArgs),
}

#[derive(Args, Debug, Clone)]
pub struct InputArgs {
    /// Directory of PDF settings reports.
    #[arg(long, default_value = "inputs/pdf")]
    pub pdf_dir: PathBuf,

    /// Directory of SEPAM `.S40` / `.ini` scripts.
    #[arg(long, default_value = "inputs/txt")]
    pub ini_dir: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct InventoryArgs {
    #[command(flatten)]
    pub inputs: InputArgs,

    #[arg(long, default_value = ".cache/relayconf")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub manifest_path: Option<PathBuf>,

    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
}

#[derive(Args, Debug, Clone)]
pub struct IngestArgs {
    #[command(flatten)]
    pub inputs: InputArgs,

    #[arg(long, default_value = ".cache/relayconf")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub db_path: Option<PathBuf>,

    #[arg(long)]
    pub manifest_path: Option<PathBuf>,

    /// JSON file overriding pipeline constants.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// JSON file replacing the built-in ANSI classification table.
    #[arg(long)]
    pub ansi_table: Option<PathBuf>,

    /// Reprocess documents the ledger already marks as loaded.
    #[arg(long, default_value_t = false)]
    pub force: bool,

    /// Run the pipeline against an in-memory store and ledger.
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[arg(long, default_value = ".cache/relayconf")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub db_path: Option<PathBuf>,

    /// Ledger entries to list, newest first.
    #[arg(long, default_value_t = 10)]
    pub limit: usize,
}

impl IngestArgs {
    pub fn resolved_db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| self.cache_root.join("relays.sqlite"))
    }
}

impl StatusArgs {
    pub fn resolved_db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| self.cache_root.join("relays.sqlite"))
    }
}
