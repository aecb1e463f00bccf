use super::*;
use crate::parse::{ParameterContext, ProtectionEntry, RawParameter, StrategyOutcome, VendorRecords};
use crate::vendor::Manufacturer;

fn transformer(kind: &str, ratio: &str) -> TransformerEntry {
    TransformerEntry {
        kind: kind.to_string(),
        primary_rating: None,
        secondary_rating: None,
        ratio_string: ratio.to_string(),
    }
}

fn protection(code: &str, label: &str, enabled: Option<bool>, group: Option<u32>) -> ProtectionEntry {
    ProtectionEntry {
        code: Some(code.to_string()),
        label: label.to_string(),
        is_enabled: enabled,
        continuation_text: None,
        setting_group: group,
    }
}

fn parameter(code: &str, name: &str, value: &str, context: Option<ParameterContext>) -> RawParameter {
    RawParameter {
        code: code.to_string(),
        name: name.to_string(),
        value: value.to_string(),
        line_number: 0,
        context,
    }
}

fn anchored(anchor: &str) -> Option<ParameterContext> {
    Some(ParameterContext {
        anchor: Some(anchor.to_string()),
        label: String::new(),
        setting_group: None,
    })
}

fn easergy_document() -> ParsedDocument {
    ParsedDocument {
        manufacturer: Manufacturer::SchneiderElectric,
        model: Some("P122".to_string()),
        model_number: None,
        series: "Easergy MiCOM",
        bay_or_serial: None,
        serial_number: None,
        plant_reference: Some("FEEDER 3".to_string()),
        firmware_version: Some("6.G".to_string()),
        frequency_hz: Some(60.0),
        declared_voltage_kv: None,
        ct_entries: vec![transformer("Phase", "1500:5"), transformer("Ground", "100:0")],
        vt_entries: vec![transformer("Main", "13800:120")],
        strategy_outcomes: vec![
            StrategyOutcome {
                name: StrategyName::Structural,
                entries: vec![
                    protection("0200", "I>", Some(true), Some(1)),
                    protection("0210", "I>>", Some(false), Some(1)),
                    protection("0400", "Undervoltage", Some(true), None),
                    protection("0500", "Mystery block", None, None),
                ],
            },
            StrategyOutcome {
                name: StrategyName::PackedContinuation,
                entries: vec![protection("0900", "Thermal", Some(true), None)],
            },
        ],
        raw_parameters: vec![
            parameter("0201", "I>", "0.63In", anchored("0200")),
            parameter("0202", "tI>", "100 ms", anchored("0200")),
            parameter("0211", "I>>", "5.0In", anchored("0210")),
            parameter("0300", "Latch", "NO", None),
        ],
        logic_matrix: None,
        records: VendorRecords::Easergy(Vec::new()),
        matched_lines: 0,
        coverage: 1.0,
        warnings: Vec::new(),
    }
}

struct Fixture {
    ansi: AnsiClassifier,
    units: UnitConverter,
    config: PipelineConfig,
}

impl Fixture {
    fn new() -> Self {
        Self {
            ansi: AnsiClassifier::builtin().expect("builtin table"),
            units: UnitConverter::new().expect("units build"),
            config: PipelineConfig::default(),
        }
    }

    fn normalize(&self, parsed: &ParsedDocument, filename: &FilenameMetadata) -> DocumentResult<RelayGraph> {
        let source = SourceIdentity {
            file_name: "P122 52-MF-03B1.pdf",
            file_hash: "abc123",
            filename,
        };
        Normalizer::new(&self.ansi, &self.units, &self.config).normalize(parsed, &source)
    }
}

#[test]
fn zero_rated_transformer_is_dropped_and_the_rest_survive() {
    let fixture = Fixture::new();
    let graph = fixture
        .normalize(&easergy_document(), &FilenameMetadata::default())
        .expect("normalizes");

    assert_eq!(graph.current_transformers.len(), 1);
    assert_eq!(graph.current_transformers[0].ratio, 300.0);
    assert_eq!(graph.voltage_transformers.len(), 1);
    assert!(
        graph
            .warnings
            .iter()
            .any(|warning| warning.scope == "transformer Ground")
    );
}

#[test]
fn missing_voltage_class_is_derived_from_main_vt() {
    let fixture = Fixture::new();
    let graph = fixture
        .normalize(&easergy_document(), &FilenameMetadata::default())
        .expect("normalizes");

    assert_eq!(graph.relay.voltage_class_kv, Some(13.8));
    assert_eq!(graph.relay.voltage_source, VoltageSource::Derived);
    assert_eq!(graph.relay.voltage_confidence, 0.6);
    assert!(graph.relay.vt_defined);
    assert_eq!(graph.relay.vt_enabled, Some(true));
}

#[test]
fn declared_voltage_outranks_derivation() {
    let fixture = Fixture::new();
    let mut parsed = easergy_document();
    parsed.declared_voltage_kv = Some(34.5);
    let graph = fixture
        .normalize(&parsed, &FilenameMetadata::default())
        .expect("normalizes");

    assert_eq!(graph.relay.voltage_class_kv, Some(34.5));
    assert_eq!(graph.relay.voltage_source, VoltageSource::Declared);
    assert_eq!(graph.relay.voltage_confidence, 1.0);
}

#[test]
fn no_voltage_information_leaves_class_unavailable() {
    let fixture = Fixture::new();
    let mut parsed = easergy_document();
    parsed.vt_entries.clear();
    let graph = fixture
        .normalize(&parsed, &FilenameMetadata::default())
        .expect("normalizes");

    assert_eq!(graph.relay.voltage_class_kv, None);
    assert_eq!(graph.relay.voltage_source, VoltageSource::Unavailable);
    assert_eq!(graph.relay.voltage_confidence, 0.0);
    assert_eq!(graph.relay.vt_enabled, None);
}

#[test]
fn only_the_first_non_empty_strategy_becomes_functions() {
    let fixture = Fixture::new();
    let graph = fixture
        .normalize(&easergy_document(), &FilenameMetadata::default())
        .expect("normalizes");

    assert_eq!(graph.strategy, Some(StrategyName::Structural));
    assert_eq!(graph.functions.len(), 4);
    assert!(graph.functions.iter().all(|function| function.label != "Thermal"));
}

#[test]
fn unmatched_labels_are_kept_with_the_unknown_code() {
    let fixture = Fixture::new();
    let graph = fixture
        .normalize(&easergy_document(), &FilenameMetadata::default())
        .expect("normalizes");

    let mystery = graph
        .functions
        .iter()
        .find(|function| function.label == "Mystery block")
        .expect("kept");
    assert_eq!(mystery.ansi_code, crate::ansi::UNKNOWN_CODE);
    assert!(!mystery.is_enabled);
}

#[test]
fn parameters_follow_their_anchor_and_orphans_are_dropped() {
    let fixture = Fixture::new();
    let graph = fixture
        .normalize(&easergy_document(), &FilenameMetadata::default())
        .expect("normalizes");

    let first_stage = graph
        .functions
        .iter()
        .find(|function| function.label == "I>")
        .expect("I> present");
    assert_eq!(first_stage.parameters.len(), 2);
    assert_eq!(first_stage.parameters[0].value, "0.63");
    assert_eq!(first_stage.parameters[0].unit.as_deref(), Some("In"));
    assert_eq!(first_stage.parameters[1].parameter_type, ParameterType::Delay);

    assert_eq!(graph.parameters_dropped, 1);
    assert_eq!(graph.parameter_count(), 3);
    assert!(
        graph
            .functions
            .iter()
            .flat_map(|function| &function.parameters)
            .all(|param| param.code != "0300")
    );
}

#[test]
fn function_header_line_is_not_its_own_parameter() {
    let fixture = Fixture::new();
    let mut parsed = easergy_document();
    parsed
        .raw_parameters
        .insert(0, parameter("0200", "Function I>", "Yes", anchored("0200")));
    let graph = fixture
        .normalize(&parsed, &FilenameMetadata::default())
        .expect("normalizes");

    let first_stage = graph
        .functions
        .iter()
        .find(|function| function.label == "I>")
        .expect("I> present");
    assert!(first_stage.is_enabled);
    assert_eq!(first_stage.parameters.len(), 2);
    assert!(first_stage.parameters.iter().all(|param| param.code != "0200"));
    assert_eq!(graph.parameters_dropped, 1);
}

#[test]
fn label_context_resolves_when_no_anchor_matches() {
    let fixture = Fixture::new();
    let mut parsed = easergy_document();
    parsed.raw_parameters = vec![parameter(
        "0401",
        "U<",
        "90 V",
        Some(ParameterContext {
            anchor: None,
            label: "UNDERVOLTAGE".to_string(),
            setting_group: None,
        }),
    )];
    let graph = fixture
        .normalize(&parsed, &FilenameMetadata::default())
        .expect("normalizes");

    let undervoltage = graph
        .functions
        .iter()
        .find(|function| function.label == "Undervoltage")
        .expect("present");
    assert_eq!(undervoltage.parameters.len(), 1);
    assert_eq!(graph.parameters_dropped, 0);
}

#[test]
fn repeated_entries_collapse_into_one_function() {
    let fixture = Fixture::new();
    let mut parsed = easergy_document();
    parsed.strategy_outcomes[0].entries = vec![
        protection("0200", "I>", Some(false), Some(1)),
        protection("0220", "I>", Some(true), Some(1)),
        protection("0240", "I>", Some(true), Some(2)),
    ];
    parsed.raw_parameters.clear();
    let graph = fixture
        .normalize(&parsed, &FilenameMetadata::default())
        .expect("normalizes");

    assert_eq!(graph.functions.len(), 2);
    assert!(graph.functions[0].is_enabled);
    assert_eq!(graph.functions[1].setting_group, Some(2));
}

#[test]
fn filename_metadata_fills_identity_fields() {
    let fixture = Fixture::new();
    let filename = FilenameMetadata {
        relay_model: Some("P123".to_string()),
        bay_identifier: Some("03B1".to_string()),
        substation_code: Some("52".to_string()),
        ..FilenameMetadata::default()
    };
    let graph = fixture
        .normalize(&easergy_document(), &filename)
        .expect("normalizes");

    assert_eq!(graph.model.model_name, "P123");
    assert_eq!(graph.relay.bay_identifier, "03B1");
    assert_eq!(graph.relay.relay_type.as_deref(), Some("Overcurrent"));
    assert_eq!(graph.relay.substation_code.as_deref(), Some("52"));
    assert_eq!(graph.manufacturer.name, "SCHNEIDER ELECTRIC");
}

#[test]
fn bay_falls_back_to_plant_reference_then_file_stem() {
    let fixture = Fixture::new();
    let graph = fixture
        .normalize(&easergy_document(), &FilenameMetadata::default())
        .expect("normalizes");
    assert_eq!(graph.relay.bay_identifier, "FEEDER 3");

    let mut parsed = easergy_document();
    parsed.plant_reference = None;
    let graph = fixture
        .normalize(&parsed, &FilenameMetadata::default())
        .expect("normalizes");
    assert_eq!(graph.relay.bay_identifier, "P122 52-MF-03B1");
}

#[test]
fn missing_model_is_a_parse_error() {
    let fixture = Fixture::new();
    let mut parsed = easergy_document();
    parsed.model = None;
    let error = fixture
        .normalize(&parsed, &FilenameMetadata::default())
        .expect_err("no model anywhere");
    assert!(matches!(error, DocumentError::Parse(_)));
}
