use anyhow::{Context, Result};
use rusqlite::{Connection, OpenFlags, OptionalExtension};
use tracing::{info, warn};

use crate::cli::StatusArgs;
use crate::db;
use crate::registry::{RegistryStore, SqliteRegistryStore};

pub fn run(args: StatusArgs) -> Result<()> {
    let db_path = args.resolved_db_path();

    info!(cache_root = %args.cache_root.display(), "status requested");

    if !db_path.exists() {
        warn!(path = %db_path.display(), "database missing; run ingest first");
        return Ok(());
    }

    // Read-only, so a status check never blocks a running ingest.
    let connection = Connection::open_with_flags(&db_path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .with_context(|| format!("failed to open {}", db_path.display()))?;

    let schema_version: Option<String> = connection
        .query_row(
            "SELECT value FROM metadata WHERE key = 'db_schema_version'",
            [],
            |row| row.get(0),
        )
        .optional()
        .context("failed to read schema version")?;
    info!(
        path = %db_path.display(),
        schema_version = %schema_version.unwrap_or_default(),
        "database status"
    );

    for (table, count) in db::table_counts(&connection)? {
        info!(table, rows = count, "table rows");
    }

    let ledger = SqliteRegistryStore::new(connection);
    for (status, count) in ledger.counts()? {
        info!(status = status.as_str(), count, "ledger entries");
    }
    for record in ledger.latest(args.limit)? {
        info!(
            file = %record.file_name,
            status = record.status.as_str(),
            records = record.records_inserted,
            processed_at = %record.processed_at,
            error = %record.error_message.unwrap_or_default(),
            "ledger entry"
        );
    }

    Ok(())
}
