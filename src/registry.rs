//! Content-hash ledger. Every document that reaches the per-document
//! boundary leaves exactly one row here, keyed by the SHA-256 of its bytes.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, RwLock};

use anyhow::{Context, Result, anyhow};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Serialize;

use crate::db;
use crate::util::now_utc_string;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessingStatus {
    Success,
    Error,
    Duplicate,
    Skipped,
}

impl ProcessingStatus {
    pub const ALL: [Self; 4] = [Self::Success, Self::Error, Self::Duplicate, Self::Skipped];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Error => "ERROR",
            Self::Duplicate => "DUPLICATE",
            Self::Skipped => "SKIPPED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == value)
    }

    /// Statuses that mean the bytes are already in the canonical tables.
    pub fn is_loaded(self) -> bool {
        matches!(self, Self::Success | Self::Duplicate)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessingRecord {
    pub file_hash: String,
    pub file_name: String,
    pub status: ProcessingStatus,
    pub records_inserted: i64,
    pub error_message: Option<String>,
    pub processed_at: String,
}

/// Storage port behind the registry. Readers may call in from other
/// threads while a run writes.
pub trait RegistryStore: Send + Sync {
    fn get(&self, file_hash: &str) -> Result<Option<ProcessingRecord>>;

    fn put(&self, record: &ProcessingRecord) -> Result<()>;

    /// Newest first.
    fn latest(&self, limit: usize) -> Result<Vec<ProcessingRecord>>;

    fn counts(&self) -> Result<Vec<(ProcessingStatus, i64)>>;
}

pub struct SqliteRegistryStore {
    connection: Mutex<Connection>,
}

impl SqliteRegistryStore {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::new(db::open(path)?))
    }

    pub fn new(connection: Connection) -> Self {
        Self {
            connection: Mutex::new(connection),
        }
    }

    fn with_connection<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let connection = self
            .connection
            .lock()
            .map_err(|_| anyhow!("registry connection lock poisoned"))?;
        f(&connection)
    }
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<(ProcessingRecord, String)> {
    let status: String = row.get(2)?;
    Ok((
        ProcessingRecord {
            file_hash: row.get(0)?,
            file_name: row.get(1)?,
            status: ProcessingStatus::Error,
            records_inserted: row.get(3)?,
            error_message: row.get(4)?,
            processed_at: row.get(5)?,
        },
        status,
    ))
}

fn with_status((mut record, status): (ProcessingRecord, String)) -> Result<ProcessingRecord> {
    record.status = ProcessingStatus::parse(&status)
        .with_context(|| format!("unknown ledger status {status:?} for {}", record.file_hash))?;
    Ok(record)
}

impl RegistryStore for SqliteRegistryStore {
    fn get(&self, file_hash: &str) -> Result<Option<ProcessingRecord>> {
        self.with_connection(|connection| {
            let row = connection
                .query_row(
                    "SELECT file_hash, file_name, status, records_inserted, error_message, processed_at
                     FROM processing_log WHERE file_hash = ?1",
                    [file_hash],
                    record_from_row,
                )
                .optional()
                .with_context(|| format!("failed to read ledger entry {file_hash}"))?;
            row.map(with_status).transpose()
        })
    }

    fn put(&self, record: &ProcessingRecord) -> Result<()> {
        self.with_connection(|connection| {
            connection
                .execute(
                    "INSERT INTO processing_log(file_hash, file_name, status, records_inserted, error_message, processed_at)
                     VALUES(?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(file_hash) DO UPDATE SET
                       file_name=excluded.file_name,
                       status=excluded.status,
                       records_inserted=excluded.records_inserted,
                       error_message=excluded.error_message,
                       processed_at=excluded.processed_at",
                    params![
                        record.file_hash,
                        record.file_name,
                        record.status.as_str(),
                        record.records_inserted,
                        record.error_message,
                        record.processed_at,
                    ],
                )
                .with_context(|| format!("failed to write ledger entry {}", record.file_hash))?;
            Ok(())
        })
    }

    fn latest(&self, limit: usize) -> Result<Vec<ProcessingRecord>> {
        self.with_connection(|connection| {
            let mut statement = connection.prepare(
                "SELECT file_hash, file_name, status, records_inserted, error_message, processed_at
                 FROM processing_log ORDER BY processed_at DESC, id DESC LIMIT ?1",
            )?;
            let rows = statement.query_map([limit as i64], record_from_row)?;
            let mut records = Vec::new();
            for row in rows {
                records.push(with_status(row?)?);
            }
            Ok(records)
        })
    }

    fn counts(&self) -> Result<Vec<(ProcessingStatus, i64)>> {
        self.with_connection(|connection| {
            ProcessingStatus::ALL
                .into_iter()
                .map(|status| {
                    let count = connection
                        .query_row(
                            "SELECT COUNT(*) FROM processing_log WHERE status = ?1",
                            [status.as_str()],
                            |row| row.get(0),
                        )
                        .with_context(|| format!("failed to count {} ledger rows", status.as_str()))?;
                    Ok((status, count))
                })
                .collect()
        })
    }
}

/// Map-backed store for tests and dry runs.
#[derive(Default)]
pub struct MemoryRegistryStore {
    records: RwLock<HashMap<String, (u64, ProcessingRecord)>>,
}

impl MemoryRegistryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RegistryStore for MemoryRegistryStore {
    fn get(&self, file_hash: &str) -> Result<Option<ProcessingRecord>> {
        let records = self
            .records
            .read()
            .map_err(|_| anyhow!("registry lock poisoned"))?;
        Ok(records.get(file_hash).map(|(_, record)| record.clone()))
    }

    fn put(&self, record: &ProcessingRecord) -> Result<()> {
        let mut records = self
            .records
            .write()
            .map_err(|_| anyhow!("registry lock poisoned"))?;
        let sequence = records.len() as u64;
        records
            .entry(record.file_hash.clone())
            .and_modify(|(_, existing)| *existing = record.clone())
            .or_insert_with(|| (sequence, record.clone()));
        Ok(())
    }

    fn latest(&self, limit: usize) -> Result<Vec<ProcessingRecord>> {
        let records = self
            .records
            .read()
            .map_err(|_| anyhow!("registry lock poisoned"))?;
        let mut ordered: Vec<&(u64, ProcessingRecord)> = records.values().collect();
        ordered.sort_by(|(left_seq, left), (right_seq, right)| {
            right
                .processed_at
                .cmp(&left.processed_at)
                .then(right_seq.cmp(left_seq))
        });
        Ok(ordered
            .into_iter()
            .take(limit)
            .map(|(_, record)| record.clone())
            .collect())
    }

    fn counts(&self) -> Result<Vec<(ProcessingStatus, i64)>> {
        let records = self
            .records
            .read()
            .map_err(|_| anyhow!("registry lock poisoned"))?;
        Ok(ProcessingStatus::ALL
            .into_iter()
            .map(|status| {
                let count = records
                    .values()
                    .filter(|(_, record)| record.status == status)
                    .count();
                (status, count as i64)
            })
            .collect())
    }
}

/// What the ledger says about a document before it is processed.
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerCheck {
    /// Never seen, or seen and failed; process it.
    Process(Option<ProcessingStatus>),
    /// Already loaded from these exact bytes.
    AlreadyLoaded(ProcessingRecord),
}

pub struct ProcessingRegistry {
    store: Box<dyn RegistryStore>,
}

impl ProcessingRegistry {
    pub fn new(store: Box<dyn RegistryStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &dyn RegistryStore {
        self.store.as_ref()
    }

    pub fn check(&self, file_hash: &str) -> Result<LedgerCheck> {
        Ok(match self.store.get(file_hash)? {
            Some(record) if record.status.is_loaded() => LedgerCheck::AlreadyLoaded(record),
            Some(record) => LedgerCheck::Process(Some(record.status)),
            None => LedgerCheck::Process(None),
        })
    }

    /// Rewrites an already-loaded entry as DUPLICATE for this run. The only
    /// mutation a settled entry ever receives.
    pub fn confirm_duplicate(&self, previous: &ProcessingRecord, file_name: &str) -> Result<ProcessingRecord> {
        let record = ProcessingRecord {
            file_hash: previous.file_hash.clone(),
            file_name: file_name.to_string(),
            status: ProcessingStatus::Duplicate,
            records_inserted: 0,
            error_message: None,
            processed_at: now_utc_string(),
        };
        self.store.put(&record)?;
        Ok(record)
    }

    pub fn record(
        &self,
        file_hash: &str,
        file_name: &str,
        status: ProcessingStatus,
        records_inserted: i64,
        error_message: Option<String>,
    ) -> Result<ProcessingRecord> {
        let record = ProcessingRecord {
            file_hash: file_hash.to_string(),
            file_name: file_name.to_string(),
            status,
            records_inserted,
            error_message,
            processed_at: now_utc_string(),
        };
        self.store.put(&record)?;
        Ok(record)
    }
}
