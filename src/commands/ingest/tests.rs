use anyhow::anyhow;
use rusqlite::Connection;

use super::lifecycle::DocumentState;
use super::pipeline::Pipeline;
use super::run::tally;
use crate::ansi::AnsiClassifier;
use crate::config::PipelineConfig;
use crate::db;
use crate::extract::{DocumentExtractor, PdfTextBackend, SourceFormat};
use crate::registry::{
    MemoryRegistryStore, ProcessingRecord, ProcessingRegistry, ProcessingStatus, RegistryStore,
};

struct InlineText;

impl PdfTextBackend for InlineText {
    fn extract_pages(&self, bytes: &[u8]) -> anyhow::Result<Vec<String>> {
        Ok(vec![String::from_utf8_lossy(bytes).into_owned()])
    }
}

const SEPAM_NAME: &str = "00-MF-12_2016-03-31.S40";
const SEPAM_SCRIPT: &str = "[Sepam_Caracteristiques]
application=S40
frequence_reseau=0
i_nominal=600
calibre_TC=1
tension_primaire_nominale=20000
tension_secondaire_nominale=1
[Sepam_ConfigMaterielle]
repere=00-MF-12 NS08170043
modele=S40
[Protection50_51]
activite_0=1
seuil_0=720
tempo_0=0.3
[Protection27]
activite_0=0
seuil_0=80
[Matrice]
1 0 1
0 1 0
";

const EASERGY_NAME: &str = "P122 52-MF-03B1_2021-03-17.pdf";
const EASERGY_REPORT: &str = "Easergy Studio settings
0120: Line CT primary: 1500
0121: Line CT sec: 5
0200: Function I>: Yes
0201: I>: 0.63In
0202: tI>: 100 ms
0210: I>> FUNCTION ?: NO
0211: I>>: 5.0In
";

fn pipeline(force: bool) -> Pipeline {
    let registry = ProcessingRegistry::new(Box::new(MemoryRegistryStore::new()));
    Pipeline::new(
        PipelineConfig::default(),
        AnsiClassifier::builtin().expect("builtin table"),
        DocumentExtractor::new(Box::new(InlineText)),
        registry,
        force,
    )
    .expect("pipeline builds")
}

fn database() -> Connection {
    db::open_in_memory().expect("in-memory db")
}

#[test]
fn second_run_over_unchanged_input_inserts_nothing() {
    let mut connection = database();
    let mut pipeline = pipeline(false);
    let inputs = [
        (SEPAM_NAME, SourceFormat::Ini, SEPAM_SCRIPT),
        (EASERGY_NAME, SourceFormat::Pdf, EASERGY_REPORT),
    ];

    let first: Vec<_> = inputs
        .iter()
        .map(|(name, format, body)| {
            pipeline
                .process(&mut connection, name, *format, body.as_bytes())
        })
        .collect();
    assert!(first.iter().all(|row| row.status == "SUCCESS"), "{first:?}");
    let rows_after_first = db::total_canonical_rows(&connection).expect("count");

    let second: Vec<_> = inputs
        .iter()
        .map(|(name, format, body)| {
            pipeline
                .process(&mut connection, name, *format, body.as_bytes())
        })
        .collect();
    assert!(second.iter().all(|row| row.status == "DUPLICATE"));
    assert!(second.iter().all(|row| row.records_inserted == 0));
    assert!(second.iter().all(|row| row.final_state == DocumentState::Registered.as_str()));
    assert_eq!(db::total_canonical_rows(&connection).expect("count"), rows_after_first);

    let counts = tally(&second);
    assert_eq!(counts.duplicate, 2);
    assert_eq!(counts.rows_inserted, 0);
}

#[test]
fn sepam_script_lands_as_a_complete_relay() {
    let mut connection = database();
    let row = pipeline(false)
        .process(&mut connection, SEPAM_NAME, SourceFormat::Ini, SEPAM_SCRIPT.as_bytes());

    assert_eq!(row.status, "SUCCESS");
    assert_eq!(row.vendor.as_deref(), Some("sepam"));
    assert_eq!(row.coverage, Some(1.0));
    assert!(row.parameters_dropped > 0);

    let (bay, voltage, source, frequency): (String, f64, String, f64) = connection
        .query_row(
            "SELECT bay_identifier, voltage_class_kv, voltage_source, frequency_hz FROM relays",
            [],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .expect("relay row");
    assert_eq!(bay, "12");
    assert_eq!(voltage, 20.0);
    assert_eq!(source, "derived");
    assert_eq!(frequency, 50.0);

    let overcurrent_parameters = db::count_rows(
        &connection,
        "SELECT COUNT(*) FROM parameters p JOIN protection_functions f ON f.id = p.protection_function_id
         WHERE f.ansi_code = '50/51'",
    )
    .expect("count");
    assert_eq!(overcurrent_parameters, 3);

    let vt_secondary: f64 = connection
        .query_row("SELECT secondary_rating FROM voltage_transformers", [], |r| r.get(0))
        .expect("vt row");
    assert_eq!(vt_secondary, 100.0);

    let matrix: String = connection
        .query_row("SELECT logic_matrix FROM relays", [], |r| r.get(0))
        .expect("logic matrix");
    assert!(matrix.contains("1 0 1"), "{matrix}");
    assert_eq!(
        row.state_path.last().map(String::as_str),
        Some(DocumentState::Registered.as_str())
    );
    assert_eq!(row.state_path.len(), 8);
}

#[test]
fn easergy_report_attaches_parameters_to_their_function() {
    let mut connection = database();
    let row = pipeline(false)
        .process(&mut connection, EASERGY_NAME, SourceFormat::Pdf, EASERGY_REPORT.as_bytes());

    assert_eq!(row.status, "SUCCESS", "{row:?}");
    assert_eq!(row.strategy.as_deref(), Some("structural"));

    let (model, bay, config_date): (String, String, String) = connection
        .query_row(
            "SELECT m.model_name, r.bay_identifier, r.config_date
             FROM relays r JOIN relay_models m ON m.id = r.relay_model_id",
            [],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .expect("relay row");
    assert_eq!(model, "P122");
    assert_eq!(bay, "03B1");
    assert_eq!(config_date, "2021-03-17");

    let (device, panel): (String, String) = connection
        .query_row("SELECT device_number, panel_description FROM relays", [], |r| {
            Ok((r.get(0)?, r.get(1)?))
        })
        .expect("filename metadata");
    assert_eq!(device, "52");
    assert_eq!(panel, "Main Feeder");

    let stage_one: i64 = connection
        .query_row(
            "SELECT COUNT(*) FROM parameters p JOIN protection_functions f ON f.id = p.protection_function_id
             WHERE f.function_label = 'I>'",
            [],
            |r| r.get(0),
        )
        .expect("count");
    assert_eq!(stage_one, 2);

    let ct_ratio: f64 = connection
        .query_row("SELECT ratio FROM current_transformers", [], |r| r.get(0))
        .expect("ct row");
    assert_eq!(ct_ratio, 300.0);
}

#[test]
fn unknown_format_is_skipped_and_the_batch_continues() {
    let mut connection = database();
    let mut pipeline = pipeline(false);

    let unknown = pipeline
        .process(&mut connection, "notes.ini", SourceFormat::Ini, b"just some notes\nnothing coded\n");
    assert_eq!(unknown.status, "SKIPPED");
    assert_eq!(unknown.final_state, DocumentState::FormatUnknown.as_str());
    assert!(unknown.error_message.is_some());

    let next = pipeline
        .process(&mut connection, SEPAM_NAME, SourceFormat::Ini, SEPAM_SCRIPT.as_bytes());
    assert_eq!(next.status, "SUCCESS");

    let counts = tally(&[unknown, next]);
    assert_eq!(counts.skipped, 1);
    assert_eq!(counts.success, 1);
}

#[test]
fn undecodable_bytes_fail_extraction_and_are_retried_later() {
    let mut connection = database();
    let mut pipeline = pipeline(false);
    let garbage = b"[Sepam\0Caracteristiques]\n\0\0";

    let first = pipeline
        .process(&mut connection, "broken.S40", SourceFormat::Ini, garbage);
    assert_eq!(first.status, "ERROR");
    assert_eq!(first.final_state, DocumentState::ExtractionFailed.as_str());

    let retry = pipeline
        .process(&mut connection, "broken.S40", SourceFormat::Ini, garbage);
    assert_eq!(retry.status, "ERROR");
    assert_eq!(db::total_canonical_rows(&connection).expect("count"), 0);
}

#[test]
fn report_without_model_ends_in_parse_failed() {
    let mut connection = database();
    let row = pipeline(false)
        .process(
            &mut connection,
            "empty.pdf",
            SourceFormat::Pdf,
            b"0100: Password: ****\nSettings\n",
        );

    // classified as Easergy, but nothing identifies the relay model
    assert_eq!(row.status, "ERROR");
    assert_eq!(row.final_state, DocumentState::ParseFailed.as_str());
}

#[test]
fn force_reprocesses_loaded_documents_in_place() {
    let mut connection = database();
    let mut pipeline = pipeline(true);

    pipeline
        .process(&mut connection, SEPAM_NAME, SourceFormat::Ini, SEPAM_SCRIPT.as_bytes());
    let rows_after_first = db::total_canonical_rows(&connection).expect("count");

    let again = pipeline
        .process(&mut connection, SEPAM_NAME, SourceFormat::Ini, SEPAM_SCRIPT.as_bytes());
    assert_eq!(again.status, "SUCCESS");
    assert!(again.relay_replaced);
    assert_eq!(db::total_canonical_rows(&connection).expect("count"), rows_after_first);
}

#[test]
fn same_bay_in_another_substation_is_a_second_relay() {
    let mut connection = database();
    let mut pipeline = pipeline(false);

    let first = pipeline.process(&mut connection, SEPAM_NAME, SourceFormat::Ini, SEPAM_SCRIPT.as_bytes());
    let neighbour_script = SEPAM_SCRIPT
        .replace("repere=00-MF-12 NS08170043", "repere=01-MF-12 NS08170077")
        .replace("i_nominal=600", "i_nominal=800");
    let second = pipeline.process(
        &mut connection,
        "01-MF-12_2016-03-31.S40",
        SourceFormat::Ini,
        neighbour_script.as_bytes(),
    );

    assert_eq!(first.status, "SUCCESS", "{first:?}");
    assert_eq!(second.status, "SUCCESS", "{second:?}");
    assert!(!second.relay_replaced);
    assert_eq!(db::count_rows(&connection, "SELECT COUNT(*) FROM relays").expect("count"), 2);

    let mut statement = connection
        .prepare("SELECT substation_code FROM relays ORDER BY substation_code")
        .expect("prepare");
    let substations: Vec<String> = statement
        .query_map([], |r| r.get(0))
        .expect("query")
        .collect::<rusqlite::Result<_>>()
        .expect("substations");
    assert_eq!(substations, ["00", "01"]);
}

/// Reads succeed and find nothing; every write fails.
struct ReadOnlyLedger;

impl RegistryStore for ReadOnlyLedger {
    fn get(&self, _file_hash: &str) -> anyhow::Result<Option<ProcessingRecord>> {
        Ok(None)
    }

    fn put(&self, _record: &ProcessingRecord) -> anyhow::Result<()> {
        Err(anyhow!("database is locked"))
    }

    fn latest(&self, _limit: usize) -> anyhow::Result<Vec<ProcessingRecord>> {
        Ok(Vec::new())
    }

    fn counts(&self) -> anyhow::Result<Vec<(ProcessingStatus, i64)>> {
        Ok(Vec::new())
    }
}

/// Every ledger call fails.
struct UnreachableLedger;

impl RegistryStore for UnreachableLedger {
    fn get(&self, _file_hash: &str) -> anyhow::Result<Option<ProcessingRecord>> {
        Err(anyhow!("unable to open database file"))
    }

    fn put(&self, _record: &ProcessingRecord) -> anyhow::Result<()> {
        Err(anyhow!("unable to open database file"))
    }

    fn latest(&self, _limit: usize) -> anyhow::Result<Vec<ProcessingRecord>> {
        Ok(Vec::new())
    }

    fn counts(&self) -> anyhow::Result<Vec<(ProcessingStatus, i64)>> {
        Ok(Vec::new())
    }
}

fn pipeline_with_ledger(store: Box<dyn RegistryStore>) -> Pipeline {
    Pipeline::new(
        PipelineConfig::default(),
        AnsiClassifier::builtin().expect("builtin table"),
        DocumentExtractor::new(Box::new(InlineText)),
        ProcessingRegistry::new(store),
        false,
    )
    .expect("pipeline builds")
}

#[test]
fn ledger_write_failures_are_reported_per_file_and_the_batch_continues() {
    let mut connection = database();
    let mut pipeline = pipeline_with_ledger(Box::new(ReadOnlyLedger));

    let loaded = pipeline.process(&mut connection, SEPAM_NAME, SourceFormat::Ini, SEPAM_SCRIPT.as_bytes());
    assert_eq!(loaded.status, "ERROR");
    assert_eq!(loaded.final_state, DocumentState::Loaded.as_str());
    assert!(loaded.records_inserted > 0);
    let message = loaded.error_message.as_deref().unwrap_or_default();
    assert!(message.contains("ledger unavailable"), "{message}");
    assert!(message.contains("database is locked"), "{message}");

    let unknown = pipeline.process(&mut connection, "notes.ini", SourceFormat::Ini, b"just some notes\nnothing coded\n");
    assert_eq!(unknown.final_state, DocumentState::FormatUnknown.as_str());
    assert_eq!(unknown.status, "ERROR");
    let message = unknown.error_message.as_deref().unwrap_or_default();
    assert!(message.starts_with("unknown document format"), "{message}");
    assert!(message.contains("ledger unavailable"), "{message}");

    let counts = tally(&[loaded, unknown]);
    assert_eq!(counts.error, 2);
    assert!(db::total_canonical_rows(&connection).expect("count") > 0);
}

#[test]
fn unreadable_ledger_leaves_documents_untouched() {
    let mut connection = database();
    let mut pipeline = pipeline_with_ledger(Box::new(UnreachableLedger));

    let row = pipeline.process(&mut connection, SEPAM_NAME, SourceFormat::Ini, SEPAM_SCRIPT.as_bytes());
    assert_eq!(row.status, "ERROR");
    assert_eq!(row.final_state, DocumentState::Discovered.as_str());
    assert_eq!(row.state_path, [DocumentState::Discovered.as_str()]);
    assert!(
        row.error_message
            .as_deref()
            .is_some_and(|message| message.contains("unable to open database file"))
    );
    assert_eq!(db::total_canonical_rows(&connection).expect("count"), 0);
}
