use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::Connection;

use crate::util::now_utc_string;

pub const DB_SCHEMA_VERSION: &str = "1.1.0";

/// Canonical tables in load order, as reported by `status`.
pub const CANONICAL_TABLES: &[&str] = &[
    "manufacturers",
    "relay_models",
    "relays",
    "current_transformers",
    "voltage_transformers",
    "ansi_functions",
    "protection_functions",
    "parameters",
];

pub fn open(path: &Path) -> Result<Connection> {
    let connection =
        Connection::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    configure_connection(&connection)?;
    ensure_schema(&connection)?;
    Ok(connection)
}

pub fn configure_connection(connection: &Connection) -> Result<()> {
    connection
        .pragma_update(None, "journal_mode", "WAL")
        .context("failed to set journal_mode=WAL")?;
    connection
        .pragma_update(None, "synchronous", "NORMAL")
        .context("failed to set synchronous=NORMAL")?;
    enable_foreign_keys(connection)
}

fn enable_foreign_keys(connection: &Connection) -> Result<()> {
    connection
        .pragma_update(None, "foreign_keys", "ON")
        .context("failed to enable foreign_keys")
}

/// In-memory store with the full schema. WAL does not apply to memory
/// databases, so only foreign keys are switched on.
pub fn open_in_memory() -> Result<Connection> {
    let connection = Connection::open_in_memory().context("failed to open in-memory db")?;
    enable_foreign_keys(&connection)?;
    ensure_schema(&connection)?;
    Ok(connection)
}

pub fn ensure_schema(connection: &Connection) -> Result<()> {
    connection
        .execute_batch(
            "
        CREATE TABLE IF NOT EXISTS metadata (
          key TEXT PRIMARY KEY,
          value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS manufacturers (
          id INTEGER PRIMARY KEY,
          name TEXT NOT NULL UNIQUE,
          country TEXT
        );

        CREATE TABLE IF NOT EXISTS relay_models (
          id INTEGER PRIMARY KEY,
          manufacturer_id INTEGER NOT NULL,
          model_name TEXT NOT NULL,
          series_or_firmware TEXT,
          UNIQUE(manufacturer_id, model_name),
          FOREIGN KEY(manufacturer_id) REFERENCES manufacturers(id)
        );

        CREATE TABLE IF NOT EXISTS relays (
          id INTEGER PRIMARY KEY,
          relay_model_id INTEGER NOT NULL,
          substation_id INTEGER,
          bay_identifier TEXT NOT NULL,
          relay_type TEXT,
          voltage_class_kv REAL,
          vt_defined INTEGER NOT NULL DEFAULT 0,
          vt_enabled INTEGER,
          voltage_source TEXT NOT NULL,
          voltage_confidence REAL NOT NULL,
          substation_code TEXT,
          device_number TEXT,
          panel_type TEXT,
          panel_description TEXT,
          config_date TEXT,
          software_version TEXT,
          frequency_hz REAL,
          plant_reference TEXT,
          serial_number TEXT,
          logic_matrix TEXT,
          source_file TEXT NOT NULL,
          file_hash TEXT NOT NULL,
          updated_at TEXT NOT NULL,
          FOREIGN KEY(relay_model_id) REFERENCES relay_models(id)
        );

        CREATE TABLE IF NOT EXISTS current_transformers (
          id INTEGER PRIMARY KEY,
          relay_id INTEGER NOT NULL,
          type TEXT NOT NULL,
          primary_rating REAL NOT NULL CHECK(primary_rating > 0),
          secondary_rating REAL NOT NULL CHECK(secondary_rating > 0),
          ratio REAL NOT NULL,
          FOREIGN KEY(relay_id) REFERENCES relays(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS voltage_transformers (
          id INTEGER PRIMARY KEY,
          relay_id INTEGER NOT NULL,
          type TEXT NOT NULL,
          primary_rating REAL NOT NULL CHECK(primary_rating > 0),
          secondary_rating REAL NOT NULL CHECK(secondary_rating > 0),
          ratio REAL NOT NULL,
          FOREIGN KEY(relay_id) REFERENCES relays(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS ansi_functions (
          id INTEGER PRIMARY KEY,
          code TEXT NOT NULL UNIQUE,
          name TEXT
        );

        CREATE TABLE IF NOT EXISTS protection_functions (
          id INTEGER PRIMARY KEY,
          relay_id INTEGER NOT NULL,
          ansi_code TEXT NOT NULL,
          function_label TEXT NOT NULL,
          is_enabled INTEGER NOT NULL DEFAULT 0,
          setting_group INTEGER,
          source_code TEXT,
          continuation_text TEXT,
          FOREIGN KEY(relay_id) REFERENCES relays(id) ON DELETE CASCADE,
          FOREIGN KEY(ansi_code) REFERENCES ansi_functions(code)
        );

        CREATE TABLE IF NOT EXISTS parameters (
          id INTEGER PRIMARY KEY,
          protection_function_id INTEGER NOT NULL,
          code TEXT NOT NULL CHECK(length(trim(code)) > 0),
          name TEXT NOT NULL CHECK(length(trim(name)) > 0),
          value TEXT NOT NULL,
          unit TEXT,
          type TEXT,
          FOREIGN KEY(protection_function_id) REFERENCES protection_functions(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS processing_log (
          id INTEGER PRIMARY KEY,
          file_hash TEXT NOT NULL UNIQUE,
          file_name TEXT NOT NULL,
          status TEXT NOT NULL CHECK(status IN ('SUCCESS', 'ERROR', 'DUPLICATE', 'SKIPPED')),
          records_inserted INTEGER NOT NULL DEFAULT 0,
          error_message TEXT,
          processed_at TEXT NOT NULL
        );
        ",
        )
        .context("failed to create relay schema")?;

    connection
        .execute_batch(
            "
        CREATE UNIQUE INDEX IF NOT EXISTS idx_relays_natural
          ON relays(relay_model_id, COALESCE(substation_code, ''), COALESCE(device_number, ''), bay_identifier);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_protection_functions_natural
          ON protection_functions(relay_id, ansi_code, function_label, COALESCE(setting_group, -1));
        CREATE INDEX IF NOT EXISTS idx_parameters_function ON parameters(protection_function_id);
        CREATE INDEX IF NOT EXISTS idx_current_transformers_relay ON current_transformers(relay_id);
        CREATE INDEX IF NOT EXISTS idx_voltage_transformers_relay ON voltage_transformers(relay_id);
        CREATE INDEX IF NOT EXISTS idx_processing_log_status ON processing_log(status);
        ",
        )
        .context("failed to create relay indexes")?;

    let now = now_utc_string();
    connection.execute(
        "INSERT INTO metadata(key, value) VALUES('db_schema_version', ?1)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
        [DB_SCHEMA_VERSION],
    )?;
    connection.execute(
        "INSERT INTO metadata(key, value) VALUES('db_updated_at', ?1)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
        [now],
    )?;

    Ok(())
}

pub fn count_rows(connection: &Connection, sql: &str) -> Result<i64> {
    connection
        .query_row(sql, [], |row| row.get(0))
        .with_context(|| format!("failed to count rows with query: {sql}"))
}

pub fn table_counts(connection: &Connection) -> Result<Vec<(&'static str, i64)>> {
    CANONICAL_TABLES
        .iter()
        .map(|table| Ok((*table, count_rows(connection, &format!("SELECT COUNT(*) FROM {table}"))?)))
        .collect()
}

pub fn total_canonical_rows(connection: &Connection) -> Result<i64> {
    Ok(table_counts(connection)?.iter().map(|(_, count)| count).sum())
}
