//! One parsed document to one canonical entity graph.
//!
//! Pure: nothing here touches the database. The loader turns a
//! [`RelayGraph`] into rows.

mod parameters;

use std::collections::HashMap;
use std::path::Path;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::debug;

use crate::ansi::AnsiClassifier;
use crate::config::PipelineConfig;
use crate::error::{DocumentError, DocumentResult, ValidationWarning};
use crate::filename::FilenameMetadata;
use crate::parse::{ParsedDocument, StrategyName, TransformerEntry};
use crate::units::{ParameterType, RatioKind, UnitConverter};
use crate::vendor::relay_type_for_model;

/// ANSI codes whose elements need a voltage input.
const VOLTAGE_FUNCTIONS: &[&str] = &[
    "27", "27D", "27/59", "32", "40", "47", "59", "59N", "67", "67N", "78", "81",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VoltageSource {
    Declared,
    Derived,
    Unavailable,
}

impl VoltageSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Declared => "declared",
            Self::Derived => "derived",
            Self::Unavailable => "unavailable",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ManufacturerDraft {
    pub name: String,
    pub country: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelDraft {
    pub model_name: String,
    pub series_or_firmware: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelayDraft {
    pub bay_identifier: String,
    pub relay_type: Option<String>,
    pub voltage_class_kv: Option<f64>,
    pub vt_defined: bool,
    pub vt_enabled: Option<bool>,
    pub voltage_source: VoltageSource,
    pub voltage_confidence: f64,
    pub substation_code: Option<String>,
    pub device_number: Option<String>,
    pub panel_type: Option<String>,
    pub panel_description: Option<String>,
    pub config_date: Option<NaiveDate>,
    pub software_version: Option<String>,
    pub frequency_hz: Option<f64>,
    pub plant_reference: Option<String>,
    pub serial_number: Option<String>,
    /// Sepam output matrix block, kept verbatim.
    pub logic_matrix: Option<String>,
    pub source_file: String,
    pub file_hash: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransformerDraft {
    pub kind: String,
    pub primary_rating: f64,
    pub secondary_rating: f64,
    pub ratio: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParameterDraft {
    pub code: String,
    pub name: String,
    pub value: String,
    pub unit: Option<String>,
    pub parameter_type: ParameterType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDraft {
    pub ansi_code: String,
    pub ansi_name: String,
    pub label: String,
    pub is_enabled: bool,
    pub setting_group: Option<u32>,
    pub source_code: Option<String>,
    pub continuation_text: Option<String>,
    pub parameters: Vec<ParameterDraft>,
}

#[derive(Debug, Clone)]
pub struct RelayGraph {
    pub manufacturer: ManufacturerDraft,
    pub model: ModelDraft,
    pub relay: RelayDraft,
    pub current_transformers: Vec<TransformerDraft>,
    pub voltage_transformers: Vec<TransformerDraft>,
    pub functions: Vec<FunctionDraft>,
    pub strategy: Option<StrategyName>,
    pub parameters_dropped: usize,
    pub warnings: Vec<ValidationWarning>,
}

impl RelayGraph {
    pub fn parameter_count(&self) -> usize {
        self.functions.iter().map(|function| function.parameters.len()).sum()
    }
}

/// Where a document came from, as opposed to what it says.
#[derive(Debug, Clone)]
pub struct SourceIdentity<'a> {
    pub file_name: &'a str,
    pub file_hash: &'a str,
    pub filename: &'a FilenameMetadata,
}

pub struct Normalizer<'a> {
    ansi: &'a AnsiClassifier,
    units: &'a UnitConverter,
    config: &'a PipelineConfig,
}

impl<'a> Normalizer<'a> {
    pub fn new(ansi: &'a AnsiClassifier, units: &'a UnitConverter, config: &'a PipelineConfig) -> Self {
        Self { ansi, units, config }
    }

    pub fn normalize(&self, parsed: &ParsedDocument, source: &SourceIdentity<'_>) -> DocumentResult<RelayGraph> {
        let mut warnings = parsed.warnings.clone();

        let manufacturer = ManufacturerDraft {
            name: parsed.manufacturer.name().to_string(),
            country: Some(parsed.manufacturer.country().to_string()),
        };
        if let Some(hint) = source
            .filename
            .manufacturer
            .filter(|hint| *hint != parsed.manufacturer)
        {
            warnings.push(ValidationWarning::new(
                "relay",
                format!(
                    "file name suggests {} but content is {}",
                    hint.name(),
                    parsed.manufacturer.name()
                ),
            ));
        }

        let model_name = source
            .filename
            .relay_model
            .clone()
            .or_else(|| parsed.model.clone())
            .or_else(|| parsed.model_number.clone())
            .ok_or_else(|| {
                DocumentError::Parse(format!(
                    "{}: relay model not found in file name or content",
                    source.file_name
                ))
            })?;
        let model = ModelDraft {
            series_or_firmware: Some(parsed.series.to_string()),
            model_name,
        };

        let current_transformers = self.transformers(&parsed.ct_entries, RatioKind::Current, &mut warnings);
        let voltage_transformers = self.transformers(&parsed.vt_entries, RatioKind::Voltage, &mut warnings);

        let (strategy, mut functions, anchors) = self.functions(parsed, &mut warnings);
        let parameters_dropped =
            parameters::attach(self.ansi, self.units, parsed, &mut functions, &anchors, &mut warnings);

        let (voltage_class_kv, voltage_source, voltage_confidence) =
            self.voltage_class(parsed, &voltage_transformers);
        let vt_defined = !voltage_transformers.is_empty();
        let vt_enabled = vt_defined.then(|| {
            functions.iter().any(|function| {
                function.is_enabled && VOLTAGE_FUNCTIONS.contains(&function.ansi_code.as_str())
            })
        });

        let relay = RelayDraft {
            bay_identifier: bay_identifier(parsed, source),
            relay_type: relay_type_for_model(&model.model_name).map(ToOwned::to_owned),
            voltage_class_kv,
            vt_defined,
            vt_enabled,
            voltage_source,
            voltage_confidence,
            substation_code: source.filename.substation_code.clone(),
            device_number: source.filename.device_number.clone(),
            panel_type: source.filename.panel_type.clone(),
            panel_description: source.filename.panel_description.clone(),
            config_date: source.filename.config_date,
            software_version: parsed.firmware_version.clone(),
            frequency_hz: parsed.frequency_hz.or(Some(self.config.default_frequency_hz)),
            plant_reference: parsed.plant_reference.clone(),
            serial_number: parsed.serial_number.clone(),
            logic_matrix: parsed.logic_matrix.clone(),
            source_file: source.file_name.to_string(),
            file_hash: source.file_hash.to_string(),
        };

        debug!(
            file = %source.file_name,
            model = %model.model_name,
            bay = %relay.bay_identifier,
            functions = functions.len(),
            "normalized document"
        );

        Ok(RelayGraph {
            manufacturer,
            model,
            relay,
            current_transformers,
            voltage_transformers,
            functions,
            strategy,
            parameters_dropped,
            warnings,
        })
    }

    /// Entries without two strictly positive ratings are dropped with a
    /// warning, never stored as placeholders.
    fn transformers(
        &self,
        entries: &[TransformerEntry],
        kind: RatioKind,
        warnings: &mut Vec<ValidationWarning>,
    ) -> Vec<TransformerDraft> {
        let mut drafts = Vec::new();
        for entry in entries {
            match self.units.parse_ratio(&entry.ratio_string, kind) {
                Ok(ratio) => drafts.push(TransformerDraft {
                    kind: entry.kind.clone(),
                    primary_rating: ratio.primary,
                    secondary_rating: ratio.secondary,
                    ratio: ratio.ratio,
                }),
                Err(error) => warnings.push(ValidationWarning::new(
                    format!("transformer {}", entry.kind),
                    format!("dropped {:?}: ratio unavailable ({error})", entry.ratio_string),
                )),
            }
        }
        drafts
    }

    fn functions(
        &self,
        parsed: &ParsedDocument,
        warnings: &mut Vec<ValidationWarning>,
    ) -> (Option<StrategyName>, Vec<FunctionDraft>, HashMap<String, usize>) {
        let mut functions: Vec<FunctionDraft> = Vec::new();
        let mut anchors = HashMap::new();
        let mut keys: HashMap<(String, String, Option<u32>), usize> = HashMap::new();

        let Some((strategy, entries)) = parsed.protection_entries() else {
            warnings.push(ValidationWarning::new("relay", "no protection entries found"));
            return (None, functions, anchors);
        };

        for entry in entries {
            let label = entry.label.trim().to_string();
            if label.is_empty() {
                continue;
            }
            let ansi = self.ansi.classify(&label);
            if ansi.is_unknown() {
                warnings.push(ValidationWarning::new(
                    format!("function {label}"),
                    "label did not match any ANSI rule",
                ));
            }

            let key = (ansi.code.clone(), label.clone(), entry.setting_group);
            let index = match keys.get(&key) {
                Some(&index) => {
                    if entry.is_enabled == Some(true) {
                        functions[index].is_enabled = true;
                    }
                    index
                }
                None => {
                    functions.push(FunctionDraft {
                        ansi_code: ansi.code,
                        ansi_name: ansi.name,
                        label,
                        is_enabled: entry.is_enabled.unwrap_or(false),
                        setting_group: entry.setting_group,
                        source_code: entry.code.clone(),
                        continuation_text: entry.continuation_text.clone(),
                        parameters: Vec::new(),
                    });
                    keys.insert(key, functions.len() - 1);
                    functions.len() - 1
                }
            };

            if let Some(code) = &entry.code {
                anchors.entry(code.clone()).or_insert(index);
            }
        }

        (Some(strategy), functions, anchors)
    }

    fn voltage_class(
        &self,
        parsed: &ParsedDocument,
        voltage_transformers: &[TransformerDraft],
    ) -> (Option<f64>, VoltageSource, f64) {
        if let Some(kv) = parsed.declared_voltage_kv.filter(|kv| *kv > 0.0) {
            return (Some(kv), VoltageSource::Declared, self.config.declared_voltage_confidence);
        }

        let main = voltage_transformers
            .iter()
            .find(|vt| vt.kind.eq_ignore_ascii_case("Main"));
        match main {
            Some(vt) if self.config.voltage_derivation_divisor > 0.0 => (
                Some(vt.primary_rating / self.config.voltage_derivation_divisor),
                VoltageSource::Derived,
                self.config.derived_voltage_confidence,
            ),
            _ => (None, VoltageSource::Unavailable, 0.0),
        }
    }
}

fn bay_identifier(parsed: &ParsedDocument, source: &SourceIdentity<'_>) -> String {
    source
        .filename
        .bay_identifier
        .clone()
        .or_else(|| parsed.bay_or_serial.clone())
        .or_else(|| parsed.plant_reference.clone())
        .filter(|bay| !bay.trim().is_empty())
        .unwrap_or_else(|| {
            Path::new(source.file_name)
                .file_stem()
                .and_then(|stem| stem.to_str())
                .unwrap_or(source.file_name)
                .to_string()
        })
}

#[cfg(test)]
mod tests;
