use super::strategy::{self, ExtractionStrategy, StrategyName};
use super::{
    ParameterContext, ParsedDocument, ProtectionEntry, RawParameter, TransformerEntry,
    VendorParser, VendorRecords,
};
use crate::classify::VendorFormat;
use crate::error::{DocumentError, DocumentResult, ValidationWarning};
use crate::extract::{ExtractedDocument, IniSection};
use crate::units::{RatioKind, UnitConverter};
use crate::vendor::Manufacturer;

const CHARACTERISTICS: &str = "Sepam_Caracteristiques";
const HARDWARE: &str = "Sepam_ConfigMaterielle";
const LOGIC_MATRIX: &str = "Matrice";
const PROTECTION_PREFIX: &str = "Protection";
const ACTIVITY_PREFIX: &str = "activite_";

const STRATEGIES: [ExtractionStrategy<SepamParser, [IniSection]>; 3] = [
    ExtractionStrategy { name: StrategyName::Structural, extract: SepamParser::activity_sections },
    ExtractionStrategy { name: StrategyName::SingleLine, extract: SepamParser::protection_sections },
    ExtractionStrategy { name: StrategyName::PackedContinuation, extract: SepamParser::no_packed_lines },
];

/// Coded `tension_secondaire_nominale` values.
fn secondary_voltage(code: Option<&str>) -> f64 {
    match code.map(str::trim) {
        Some("1") => 100.0,
        Some("2") => 110.0,
        Some("3") => 120.0,
        _ => 115.0,
    }
}

fn frequency(code: &str) -> f64 {
    if code.trim() == "1" { 60.0 } else { 50.0 }
}

/// SEPAM `.S40` scripts. Sections are read straight off the INI model.
pub struct SepamParser;

impl SepamParser {
    fn activity_sections(&self, sections: &[IniSection]) -> Vec<ProtectionEntry> {
        protection_sections(sections)
            .filter_map(|section| {
                let mut flags = section
                    .entries
                    .iter()
                    .filter(|entry| entry.key.to_lowercase().starts_with(ACTIVITY_PREFIX))
                    .peekable();
                flags.peek()?;
                let enabled = flags.any(|entry| entry.value.trim() == "1");
                Some(section_entry(section, Some(enabled)))
            })
            .collect()
    }

    fn protection_sections(&self, sections: &[IniSection]) -> Vec<ProtectionEntry> {
        protection_sections(sections)
            .map(|section| {
                let enabled = section
                    .entries
                    .iter()
                    .filter(|entry| {
                        let key = entry.key.to_lowercase();
                        key.contains("activ") || key.contains("actif")
                    })
                    .filter_map(|entry| UnitConverter::parse_boolean(&entry.value))
                    .reduce(|any, flag| any || flag);
                section_entry(section, enabled)
            })
            .collect()
    }

    fn no_packed_lines(&self, _sections: &[IniSection]) -> Vec<ProtectionEntry> {
        Vec::new()
    }
}

fn protection_sections(sections: &[IniSection]) -> impl Iterator<Item = &IniSection> {
    sections.iter().filter(|section| is_protection_section(&section.name))
}

fn is_protection_section(name: &str) -> bool {
    name.len() > PROTECTION_PREFIX.len()
        && name
            .get(..PROTECTION_PREFIX.len())
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(PROTECTION_PREFIX))
}

fn section_entry(section: &IniSection, enabled: Option<bool>) -> ProtectionEntry {
    ProtectionEntry {
        code: Some(section.name.clone()),
        label: section.name.clone(),
        is_enabled: enabled,
        continuation_text: None,
        setting_group: None,
    }
}

fn find_section<'a>(sections: &'a [IniSection], name: &str) -> Option<&'a IniSection> {
    sections
        .iter()
        .find(|section| section.name.eq_ignore_ascii_case(name))
}

fn rating(
    units: &UnitConverter,
    raw: &str,
    kind: RatioKind,
    scope: &str,
    warnings: &mut Vec<ValidationWarning>,
) -> Option<f64> {
    match units.parse_rating(raw, kind) {
        Ok(value) => Some(value),
        Err(error) => {
            warnings.push(ValidationWarning::new(
                format!("transformer {scope}"),
                format!("rating {raw:?} unusable: {error}"),
            ));
            None
        }
    }
}

impl VendorParser for SepamParser {
    fn vendor(&self) -> VendorFormat {
        VendorFormat::Sepam
    }

    fn parse(&self, document: &ExtractedDocument, units: &UnitConverter) -> DocumentResult<ParsedDocument> {
        let sections = &document.sections;
        if sections.iter().all(|section| section.name.is_empty()) {
            return Err(DocumentError::Parse("script has no INI sections".to_string()));
        }

        let mut warnings = Vec::new();
        let mut ct_entries = Vec::new();
        let mut vt_entries = Vec::new();
        let mut model = None;
        let mut firmware_version = None;
        let mut frequency_hz = None;

        if let Some(characteristics) = find_section(sections, CHARACTERISTICS) {
            if let Some(application) = characteristics.first("application") {
                model = Some(format!("SEPAM {}", application.trim()));
                firmware_version = Some(application.trim().to_string());
            }
            frequency_hz = characteristics.first("frequence_reseau").map(frequency);

            if let Some(primary) = characteristics.first("i_nominal") {
                let secondary = if characteristics.first("calibre_TC").map(str::trim) == Some("1") {
                    5.0
                } else {
                    1.0
                };
                ct_entries.push(TransformerEntry {
                    kind: "Phase".to_string(),
                    primary_rating: rating(units, primary, RatioKind::Current, "Phase", &mut warnings),
                    secondary_rating: Some(secondary),
                    ratio_string: format!("{}:{secondary}", primary.trim()),
                });
            }

            if let Some(residual) = characteristics.first("courant_nominal_residuel") {
                ct_entries.push(TransformerEntry {
                    kind: "Residual".to_string(),
                    primary_rating: rating(units, residual, RatioKind::Current, "Residual", &mut warnings),
                    secondary_rating: Some(1.0),
                    ratio_string: format!("{}:1", residual.trim()),
                });
            }

            if let Some(primary) = characteristics.first("tension_primaire_nominale") {
                let secondary = secondary_voltage(characteristics.first("tension_secondaire_nominale"));
                vt_entries.push(TransformerEntry {
                    kind: "Main".to_string(),
                    primary_rating: rating(units, primary, RatioKind::Voltage, "Main", &mut warnings),
                    secondary_rating: Some(secondary),
                    ratio_string: format!("{}:{secondary}", primary.trim()),
                });
            }
        } else {
            warnings.push(ValidationWarning::new(
                "document",
                format!("[{CHARACTERISTICS}] section missing"),
            ));
        }

        let mut plant_reference = None;
        let mut bay_or_serial = None;
        let mut serial_number = None;
        let mut model_number = None;
        if let Some(hardware) = find_section(sections, HARDWARE) {
            if let Some(repere) = hardware.first("repere").map(str::trim).filter(|r| !r.is_empty()) {
                let tokens: Vec<&str> = repere.split_whitespace().collect();
                bay_or_serial = tokens.first().map(|token| token.to_string());
                if tokens.len() > 1 {
                    serial_number = tokens.last().map(|token| token.to_string());
                }
                plant_reference = Some(repere.to_string());
            }
            model_number = hardware.first("modele").map(|value| value.trim().to_string());
        }

        let mut raw_parameters = Vec::new();
        let mut logic_matrix = None;
        for section in sections {
            if section.name.eq_ignore_ascii_case(LOGIC_MATRIX) {
                let block = section
                    .entries
                    .iter()
                    .map(|entry| {
                        if entry.key.is_empty() {
                            entry.value.clone()
                        } else {
                            format!("{}={}", entry.key, entry.value)
                        }
                    })
                    .collect::<Vec<_>>()
                    .join("\n");
                raw_parameters.push(RawParameter {
                    code: section.name.clone(),
                    name: section.name.clone(),
                    value: block.clone(),
                    line_number: section.line_number,
                    context: None,
                });
                logic_matrix = Some(block);
                continue;
            }

            let context = is_protection_section(&section.name).then(|| ParameterContext {
                anchor: Some(section.name.clone()),
                label: section.name.clone(),
                setting_group: None,
            });
            for entry in section.entries.iter().filter(|entry| !entry.key.is_empty()) {
                raw_parameters.push(RawParameter {
                    code: entry.key.clone(),
                    name: entry.key.clone(),
                    value: entry.value.clone(),
                    line_number: entry.line_number,
                    context: context.clone(),
                });
            }
        }

        let matched_lines = sections
            .iter()
            .map(|section| {
                let header = usize::from(!section.name.is_empty());
                header + section.entries.iter().map(|entry| entry.line_count).sum::<usize>()
            })
            .sum();

        let strategy_outcomes = strategy::run_all(&STRATEGIES, self, sections.as_slice());

        Ok(ParsedDocument {
            manufacturer: Manufacturer::SchneiderElectric,
            model: model.or_else(|| Some("SEPAM S40".to_string())),
            model_number,
            series: "SEPAM Series 40",
            bay_or_serial,
            serial_number,
            plant_reference,
            firmware_version,
            frequency_hz,
            declared_voltage_kv: None,
            ct_entries,
            vt_entries,
            strategy_outcomes,
            raw_parameters,
            logic_matrix,
            records: VendorRecords::Sepam(sections.clone()),
            matched_lines,
            coverage: 0.0,
            warnings,
        })
    }
}
