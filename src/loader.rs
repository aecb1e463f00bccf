//! Writes one [`RelayGraph`] inside one transaction. Child rows each get a
//! savepoint, so a row that violates a constraint is skipped while its
//! siblings still commit.

use std::collections::{HashMap, HashSet};

use rusqlite::{Connection, OptionalExtension, Transaction, params};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{DocumentError, DocumentResult};
use crate::normalize::{FunctionDraft, RelayGraph, TransformerDraft};
use crate::util::now_utc_string;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LoadReport {
    pub relay_id: i64,
    pub rows_inserted: i64,
    pub rows_skipped: i64,
    /// An existing relay with the same natural key had its children replaced.
    pub replaced: bool,
}

#[derive(Default)]
struct IdCache {
    manufacturers: HashMap<String, i64>,
    models: HashMap<(i64, String), i64>,
    ansi_codes: HashSet<String>,
}

impl IdCache {
    fn merge(&mut self, other: IdCache) {
        self.manufacturers.extend(other.manufacturers);
        self.models.extend(other.models);
        self.ansi_codes.extend(other.ansi_codes);
    }
}

/// Holds natural-key ids resolved earlier in the run. Ids only enter the
/// cache once their transaction has committed.
#[derive(Default)]
pub struct DatabaseLoader {
    cache: IdCache,
}

enum TransformerTable {
    Current,
    Voltage,
}

impl TransformerTable {
    fn insert_sql(&self) -> &'static str {
        match self {
            Self::Current => {
                "INSERT INTO current_transformers(relay_id, type, primary_rating, secondary_rating, ratio)
                 VALUES(?1, ?2, ?3, ?4, ?5)"
            }
            Self::Voltage => {
                "INSERT INTO voltage_transformers(relay_id, type, primary_rating, secondary_rating, ratio)
                 VALUES(?1, ?2, ?3, ?4, ?5)"
            }
        }
    }
}

impl DatabaseLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&mut self, connection: &mut Connection, graph: &RelayGraph) -> DocumentResult<LoadReport> {
        let mut fresh = IdCache::default();
        let mut report = LoadReport::default();

        let mut tx = connection.transaction()?;

        let manufacturer_id = self.manufacturer_id(&tx, graph, &mut fresh, &mut report)?;
        let model_id = self.model_id(&tx, graph, manufacturer_id, &mut fresh, &mut report)?;
        let (relay_id, replaced) = upsert_relay(&tx, graph, model_id)?;
        report.relay_id = relay_id;
        report.replaced = replaced;
        report.rows_inserted += 1;

        for draft in &graph.current_transformers {
            insert_transformer(&mut tx, TransformerTable::Current, relay_id, draft, &mut report)?;
        }
        for draft in &graph.voltage_transformers {
            insert_transformer(&mut tx, TransformerTable::Voltage, relay_id, draft, &mut report)?;
        }
        for function in &graph.functions {
            self.insert_function(&mut tx, relay_id, function, &mut fresh, &mut report)?;
        }

        tx.commit()?;
        self.cache.merge(fresh);

        debug!(
            relay_id,
            inserted = report.rows_inserted,
            skipped = report.rows_skipped,
            replaced,
            "loaded relay graph"
        );
        Ok(report)
    }

    fn manufacturer_id(
        &self,
        tx: &Transaction<'_>,
        graph: &RelayGraph,
        fresh: &mut IdCache,
        report: &mut LoadReport,
    ) -> DocumentResult<i64> {
        let name = &graph.manufacturer.name;
        if let Some(id) = self.cache.manufacturers.get(name) {
            return Ok(*id);
        }

        let existing: Option<i64> = tx
            .query_row("SELECT id FROM manufacturers WHERE name = ?1", [name], |row| row.get(0))
            .optional()?;
        let id = match existing {
            Some(id) => id,
            None => {
                tx.execute(
                    "INSERT INTO manufacturers(name, country) VALUES(?1, ?2)",
                    params![name, graph.manufacturer.country],
                )?;
                report.rows_inserted += 1;
                tx.last_insert_rowid()
            }
        };
        fresh.manufacturers.insert(name.clone(), id);
        Ok(id)
    }

    fn model_id(
        &self,
        tx: &Transaction<'_>,
        graph: &RelayGraph,
        manufacturer_id: i64,
        fresh: &mut IdCache,
        report: &mut LoadReport,
    ) -> DocumentResult<i64> {
        let key = (manufacturer_id, graph.model.model_name.clone());
        if let Some(id) = self.cache.models.get(&key) {
            return Ok(*id);
        }

        let existing: Option<i64> = tx
            .query_row(
                "SELECT id FROM relay_models WHERE manufacturer_id = ?1 AND model_name = ?2",
                params![manufacturer_id, graph.model.model_name],
                |row| row.get(0),
            )
            .optional()?;
        let id = match existing {
            Some(id) => id,
            None => {
                tx.execute(
                    "INSERT INTO relay_models(manufacturer_id, model_name, series_or_firmware)
                     VALUES(?1, ?2, ?3)",
                    params![manufacturer_id, graph.model.model_name, graph.model.series_or_firmware],
                )?;
                report.rows_inserted += 1;
                tx.last_insert_rowid()
            }
        };
        fresh.models.insert(key, id);
        Ok(id)
    }

    fn insert_function(
        &self,
        tx: &mut Transaction<'_>,
        relay_id: i64,
        function: &FunctionDraft,
        fresh: &mut IdCache,
        report: &mut LoadReport,
    ) -> DocumentResult<()> {
        let known = self.cache.ansi_codes.contains(&function.ansi_code)
            || fresh.ansi_codes.contains(&function.ansi_code);

        let savepoint = tx.savepoint()?;
        let inserted = (|| -> rusqlite::Result<(usize, i64)> {
            let catalogued = if known {
                0
            } else {
                savepoint.execute(
                    "INSERT INTO ansi_functions(code, name) VALUES(?1, ?2)
                     ON CONFLICT(code) DO NOTHING",
                    params![function.ansi_code, function.ansi_name],
                )?
            };
            savepoint.execute(
                "INSERT INTO protection_functions(
                   relay_id, ansi_code, function_label, is_enabled, setting_group, source_code, continuation_text
                 ) VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    relay_id,
                    function.ansi_code,
                    function.label,
                    function.is_enabled,
                    function.setting_group,
                    function.source_code,
                    function.continuation_text,
                ],
            )?;
            Ok((catalogued, savepoint.last_insert_rowid()))
        })();

        let function_id = match inserted {
            Ok((catalogued, function_id)) => {
                savepoint.commit()?;
                fresh.ansi_codes.insert(function.ansi_code.clone());
                report.rows_inserted += 1 + catalogued as i64;
                function_id
            }
            Err(error) => {
                warn!(
                    label = %function.label,
                    ansi_code = %function.ansi_code,
                    error = %error,
                    "skipping protection function row and its parameters"
                );
                report.rows_skipped += 1 + function.parameters.len() as i64;
                return Ok(());
            }
        };

        for parameter in &function.parameters {
            let savepoint = tx.savepoint()?;
            let result = savepoint.execute(
                "INSERT INTO parameters(protection_function_id, code, name, value, unit, type)
                 VALUES(?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    function_id,
                    parameter.code,
                    parameter.name,
                    parameter.value,
                    parameter.unit,
                    parameter.parameter_type.as_str(),
                ],
            );
            match result {
                Ok(_) => {
                    savepoint.commit()?;
                    report.rows_inserted += 1;
                }
                Err(error) => {
                    warn!(code = %parameter.code, error = %error, "skipping parameter row");
                    report.rows_skipped += 1;
                }
            }
        }
        Ok(())
    }
}

/// Relays are keyed by (model, substation, device number, bay); a missing
/// substation or device number compares as empty. A hit keeps the row id
/// and replaces everything hanging off it.
fn upsert_relay(tx: &Transaction<'_>, graph: &RelayGraph, model_id: i64) -> DocumentResult<(i64, bool)> {
    let relay = &graph.relay;
    let now = now_utc_string();

    let existing: Option<i64> = tx
        .query_row(
            "SELECT id FROM relays
             WHERE relay_model_id = ?1
               AND COALESCE(substation_code, '') = COALESCE(?2, '')
               AND COALESCE(device_number, '') = COALESCE(?3, '')
               AND bay_identifier = ?4",
            params![model_id, relay.substation_code, relay.device_number, relay.bay_identifier],
            |row| row.get(0),
        )
        .optional()?;

    match existing {
        Some(relay_id) => {
            tx.execute(
                "DELETE FROM parameters WHERE protection_function_id IN
                   (SELECT id FROM protection_functions WHERE relay_id = ?1)",
                [relay_id],
            )?;
            tx.execute("DELETE FROM protection_functions WHERE relay_id = ?1", [relay_id])?;
            tx.execute("DELETE FROM current_transformers WHERE relay_id = ?1", [relay_id])?;
            tx.execute("DELETE FROM voltage_transformers WHERE relay_id = ?1", [relay_id])?;
            tx.execute(
                "UPDATE relays SET
                   relay_type = ?2, voltage_class_kv = ?3, vt_defined = ?4, vt_enabled = ?5,
                   voltage_source = ?6, voltage_confidence = ?7, substation_code = ?8,
                   config_date = ?9, software_version = ?10, frequency_hz = ?11,
                   plant_reference = ?12, serial_number = ?13, source_file = ?14,
                   file_hash = ?15, updated_at = ?16, device_number = ?17, panel_type = ?18,
                   panel_description = ?19, logic_matrix = ?20
                 WHERE id = ?1",
                params![
                    relay_id,
                    relay.relay_type,
                    relay.voltage_class_kv,
                    relay.vt_defined,
                    relay.vt_enabled,
                    relay.voltage_source.as_str(),
                    relay.voltage_confidence,
                    relay.substation_code,
                    relay.config_date,
                    relay.software_version,
                    relay.frequency_hz,
                    relay.plant_reference,
                    relay.serial_number,
                    relay.source_file,
                    relay.file_hash,
                    now,
                    relay.device_number,
                    relay.panel_type,
                    relay.panel_description,
                    relay.logic_matrix,
                ],
            )?;
            Ok((relay_id, true))
        }
        None => {
            let inserted = tx.execute(
                "INSERT INTO relays(
                   relay_model_id, bay_identifier, relay_type, voltage_class_kv, vt_defined,
                   vt_enabled, voltage_source, voltage_confidence, substation_code, config_date,
                   software_version, frequency_hz, plant_reference, serial_number, source_file,
                   file_hash, updated_at, device_number, panel_type, panel_description, logic_matrix)
                 VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
                        ?18, ?19, ?20, ?21)",
                params![
                    model_id,
                    relay.bay_identifier,
                    relay.relay_type,
                    relay.voltage_class_kv,
                    relay.vt_defined,
                    relay.vt_enabled,
                    relay.voltage_source.as_str(),
                    relay.voltage_confidence,
                    relay.substation_code,
                    relay.config_date,
                    relay.software_version,
                    relay.frequency_hz,
                    relay.plant_reference,
                    relay.serial_number,
                    relay.source_file,
                    relay.file_hash,
                    now,
                    relay.device_number,
                    relay.panel_type,
                    relay.panel_description,
                    relay.logic_matrix,
                ],
            );
            match inserted {
                Ok(_) => Ok((tx.last_insert_rowid(), false)),
                Err(error) => Err(DocumentError::Load(format!(
                    "relay {} could not be stored: {error}",
                    relay.bay_identifier
                ))),
            }
        }
    }
}

fn insert_transformer(
    tx: &mut Transaction<'_>,
    table: TransformerTable,
    relay_id: i64,
    draft: &TransformerDraft,
    report: &mut LoadReport,
) -> DocumentResult<()> {
    let savepoint = tx.savepoint()?;
    let result = savepoint.execute(
        table.insert_sql(),
        params![
            relay_id,
            draft.kind,
            draft.primary_rating,
            draft.secondary_rating,
            draft.ratio,
        ],
    );
    match result {
        Ok(_) => {
            savepoint.commit()?;
            report.rows_inserted += 1;
        }
        Err(error) => {
            warn!(kind = %draft.kind, error = %error, "skipping transformer row");
            report.rows_skipped += 1;
        }
    }
    Ok(())
}
