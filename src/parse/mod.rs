//! Vendor parsers: classified lines in, one [`ParsedDocument`] out.
//!
//! The vendor is decided once by the classifier; each parser keeps its own
//! record shape in [`VendorRecords`] and maps it onto the shared fields the
//! normalizer consumes.

mod easergy;
mod micom;
mod sepam;
mod strategy;

use anyhow::{Context, Result};
use regex::{Regex, RegexBuilder};
use serde::Serialize;
use tracing::{debug, warn};

use crate::classify::VendorFormat;
use crate::error::{DocumentResult, ValidationWarning};
use crate::extract::{ExtractedDocument, IniSection, RawLine, is_trivial_line};
use crate::units::{RatioKind, UnitConverter};
use crate::vendor::Manufacturer;

pub use easergy::EasergyParser;
pub use micom::MicomParser;
pub use sepam::SepamParser;
pub use strategy::{StrategyName, StrategyOutcome};

/// Joins a coded entry's value with the lines stitched onto it.
pub const CONTINUATION_SEPARATOR: &str = " | ";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransformerEntry {
    pub kind: String,
    pub primary_rating: Option<f64>,
    pub secondary_rating: Option<f64>,
    pub ratio_string: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProtectionEntry {
    /// Source anchor: the coded line or INI section the entry came from.
    pub code: Option<String>,
    pub label: String,
    pub is_enabled: Option<bool>,
    pub continuation_text: Option<String>,
    pub setting_group: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterContext {
    pub anchor: Option<String>,
    pub label: String,
    pub setting_group: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawParameter {
    pub code: String,
    pub name: String,
    pub value: String,
    pub line_number: usize,
    pub context: Option<ParameterContext>,
}

/// A `code: name: value` line from a PDF report, with any continuation
/// lines already stitched onto it.
#[derive(Debug, Clone, PartialEq)]
pub struct CodedEntry {
    pub code: String,
    pub name: String,
    /// Value as stored: the coded line's own value plus stitched lines.
    pub value: String,
    /// What the coded line itself carried after its last colon.
    pub line_value: String,
    pub line_number: usize,
    pub continuation: Vec<String>,
    pub packed: bool,
    pub questioned: bool,
    pub setting_group: Option<u32>,
    pub context: Option<ParameterContext>,
}

impl CodedEntry {
    /// The coded line's own value. An open line (`0121: Line CT sec:`) takes
    /// its value from the first stitched line instead.
    pub fn own_value(&self) -> &str {
        if self.line_value.is_empty() {
            self.continuation.first().map(String::as_str).unwrap_or_default()
        } else {
            &self.line_value
        }
    }

    pub fn continuation_text(&self) -> Option<String> {
        if self.continuation.is_empty() {
            None
        } else {
            Some(self.continuation.join(CONTINUATION_SEPARATOR))
        }
    }

    fn append_continuation(&mut self, text: &str) {
        if self.value.is_empty() {
            self.value.push_str(text);
        } else {
            self.value.push_str(CONTINUATION_SEPARATOR);
            self.value.push_str(text);
        }
        self.continuation.push(text.to_string());
    }

    fn to_raw_parameter(&self) -> RawParameter {
        RawParameter {
            code: self.code.clone(),
            name: self.name.clone(),
            value: self.value.clone(),
            line_number: self.line_number,
            context: self.context.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum VendorRecords {
    Easergy(Vec<CodedEntry>),
    Micom(Vec<CodedEntry>),
    Sepam(Vec<IniSection>),
}

impl VendorRecords {
    pub fn len(&self) -> usize {
        match self {
            Self::Easergy(entries) | Self::Micom(entries) => entries.len(),
            Self::Sepam(sections) => sections.len(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParsedDocument {
    pub manufacturer: Manufacturer,
    pub model: Option<String>,
    pub model_number: Option<String>,
    pub series: &'static str,
    pub bay_or_serial: Option<String>,
    pub serial_number: Option<String>,
    pub plant_reference: Option<String>,
    pub firmware_version: Option<String>,
    pub frequency_hz: Option<f64>,
    pub declared_voltage_kv: Option<f64>,
    pub ct_entries: Vec<TransformerEntry>,
    pub vt_entries: Vec<TransformerEntry>,
    pub strategy_outcomes: Vec<StrategyOutcome>,
    pub raw_parameters: Vec<RawParameter>,
    pub logic_matrix: Option<String>,
    pub records: VendorRecords,
    /// Lines accounted for by the parsed model, used by `validate`.
    pub matched_lines: usize,
    pub coverage: f64,
    pub warnings: Vec<ValidationWarning>,
}

impl ParsedDocument {
    /// First strategy, in priority order, that produced any entry.
    pub fn protection_entries(&self) -> Option<(StrategyName, &[ProtectionEntry])> {
        self.strategy_outcomes
            .iter()
            .find(|outcome| !outcome.entries.is_empty())
            .map(|outcome| (outcome.name, outcome.entries.as_slice()))
    }
}

pub trait VendorParser {
    fn vendor(&self) -> VendorFormat;

    fn parse(&self, document: &ExtractedDocument, units: &UnitConverter) -> DocumentResult<ParsedDocument>;

    /// Share of content-bearing input lines represented in the parsed model.
    fn validate(&self, document: &ExtractedDocument, parsed: &ParsedDocument) -> f64 {
        let total = document
            .lines
            .iter()
            .filter(|line| !is_trivial_line(&line.text, document.format))
            .count();
        if total == 0 {
            return 0.0;
        }
        (parsed.matched_lines.min(total)) as f64 / total as f64
    }
}

pub struct ParserSet {
    easergy: EasergyParser,
    micom: MicomParser,
    sepam: SepamParser,
    coverage_threshold: f64,
}

impl ParserSet {
    pub fn new(coverage_threshold: f64) -> Result<Self> {
        Ok(Self {
            easergy: EasergyParser::new()?,
            micom: MicomParser::new()?,
            sepam: SepamParser,
            coverage_threshold,
        })
    }

    pub fn for_format(&self, format: VendorFormat) -> &dyn VendorParser {
        match format {
            VendorFormat::Easergy => &self.easergy,
            VendorFormat::Micom => &self.micom,
            VendorFormat::Sepam => &self.sepam,
        }
    }

    /// Parses, then runs the coverage check. Low coverage is a warning on
    /// the document, never a failure.
    pub fn parse(
        &self,
        format: VendorFormat,
        file_name: &str,
        document: &ExtractedDocument,
        units: &UnitConverter,
    ) -> DocumentResult<ParsedDocument> {
        let parser = self.for_format(format);
        let mut parsed = parser.parse(document, units)?;
        parsed.coverage = parser.validate(document, &parsed);
        debug!(
            file = %file_name,
            vendor = parser.vendor().as_str(),
            records = parsed.records.len(),
            parameters = parsed.raw_parameters.len(),
            coverage = parsed.coverage,
            "parsed"
        );

        if parsed.coverage < self.coverage_threshold {
            warn!(
                file = %file_name,
                coverage = parsed.coverage,
                threshold = self.coverage_threshold,
                "parse coverage below threshold"
            );
            parsed.warnings.push(ValidationWarning::new(
                "document",
                format!(
                    "coverage {:.3} below threshold {:.2}",
                    parsed.coverage, self.coverage_threshold
                ),
            ));
        }
        Ok(parsed)
    }
}

/// Report-level fields that PDF exports print outside the coded lines, or
/// inside them in the MiCOM case.
pub(crate) struct HeaderScanner {
    model_number: Regex,
    plant_reference: Regex,
    software: Regex,
    frequency: Regex,
    model_type: Regex,
    model_designation: Regex,
    nominal_voltage: Regex,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub(crate) struct HeaderFields {
    pub model_number: Option<String>,
    pub plant_reference: Option<String>,
    pub software_version: Option<String>,
    pub frequency_hz: Option<f64>,
    pub model_type: Option<String>,
    pub declared_voltage_kv: Option<f64>,
}

impl HeaderScanner {
    pub(crate) fn new() -> Result<Self> {
        Ok(Self {
            model_number: Regex::new(r"Model Number:\s*([A-Z0-9]{4,})")
                .context("failed to compile model number regex")?,
            plant_reference: Regex::new(r"Plant Reference:\s*(.+)$")
                .context("failed to compile plant reference regex")?,
            software: Regex::new(r"Software (?:Version|Ref\.?\s*1):\s*(.+)$")
                .context("failed to compile software version regex")?,
            frequency: Regex::new(r"Frequency:\s*(\d+(?:[.,]\d+)?\s*Hz)")
                .context("failed to compile frequency regex")?,
            model_type: Regex::new(r"TYPE\s*=:\s*(P\d+[-\d]*)")
                .context("failed to compile model type regex")?,
            model_designation: Regex::new(r"^(P\d{3})").context("failed to compile designation regex")?,
            nominal_voltage: RegexBuilder::new(r"(?:nominal|rated|system)\s+voltage:\s*(\d+(?:[.,]\d+)?)\s*kV")
                .case_insensitive(true)
                .build()
                .context("failed to compile nominal voltage regex")?,
        })
    }

    /// First occurrence of each field wins.
    pub(crate) fn scan(&self, lines: &[RawLine]) -> HeaderFields {
        let mut fields = HeaderFields::default();
        for line in lines {
            let text = line.text.as_str();
            if fields.model_number.is_none() {
                fields.model_number = capture(&self.model_number, text);
            }
            if fields.plant_reference.is_none() {
                fields.plant_reference = capture(&self.plant_reference, text);
            }
            if fields.software_version.is_none() {
                fields.software_version = capture(&self.software, text);
            }
            if fields.frequency_hz.is_none() {
                fields.frequency_hz =
                    capture(&self.frequency, text).and_then(|hz| UnitConverter::parse_frequency(&hz));
            }
            if fields.model_type.is_none() {
                fields.model_type = capture(&self.model_type, text);
            }
            if fields.declared_voltage_kv.is_none() {
                fields.declared_voltage_kv = capture(&self.nominal_voltage, text)
                    .and_then(|kv| kv.replace(',', ".").parse().ok());
            }
        }
        fields
    }

    /// `P143312A2A0150C` carries its family in the leading `Pnnn`.
    pub(crate) fn designation(&self, fields: &HeaderFields) -> Option<String> {
        fields
            .model_type
            .as_deref()
            .and_then(|raw| capture(&self.model_designation, raw))
            .or_else(|| {
                fields
                    .model_number
                    .as_deref()
                    .and_then(|raw| capture(&self.model_designation, raw))
            })
    }
}

fn capture(pattern: &Regex, text: &str) -> Option<String> {
    pattern
        .captures(text)
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Primary/secondary label pair for one instrument transformer.
pub(crate) struct TransformerLabels {
    pub kind: &'static str,
    pub primary: &'static str,
    pub secondary: &'static str,
    pub ratio_kind: RatioKind,
}

/// Lowercased, whitespace-collapsed label with trailing `=`/`?` removed so
/// `PRIM PH =` and `prim ph` compare equal.
pub(crate) fn normalize_label(label: &str) -> String {
    let collapsed = label.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed
        .trim_end_matches(['=', '?', ':', ' '])
        .to_lowercase()
}

pub(crate) fn collect_transformers(
    entries: &[CodedEntry],
    labels: &[TransformerLabels],
    units: &UnitConverter,
    warnings: &mut Vec<ValidationWarning>,
) -> (Vec<TransformerEntry>, Vec<TransformerEntry>) {
    let mut currents = Vec::new();
    let mut voltages = Vec::new();

    for pair in labels {
        let primary = find_value(entries, pair.primary);
        let secondary = find_value(entries, pair.secondary);
        if primary.is_none() && secondary.is_none() {
            continue;
        }

        let rating = |raw: Option<&str>,
                      side: &str,
                      warnings: &mut Vec<ValidationWarning>|
         -> Option<f64> {
            let raw = raw?;
            match units.parse_rating(raw, pair.ratio_kind) {
                Ok(value) => Some(value),
                Err(error) => {
                    warnings.push(ValidationWarning::new(
                        format!("transformer {}", pair.kind),
                        format!("{side} rating {raw:?} unusable: {error}"),
                    ));
                    None
                }
            }
        };

        let entry = TransformerEntry {
            kind: pair.kind.to_string(),
            primary_rating: rating(primary, "primary", warnings),
            secondary_rating: rating(secondary, "secondary", warnings),
            ratio_string: format!(
                "{}:{}",
                primary.unwrap_or_default(),
                secondary.unwrap_or_default()
            ),
        };

        match pair.ratio_kind {
            RatioKind::Current => currents.push(entry),
            RatioKind::Voltage => voltages.push(entry),
        }
    }

    (currents, voltages)
}

fn find_value<'a>(entries: &'a [CodedEntry], label: &str) -> Option<&'a str> {
    let wanted = normalize_label(label);
    entries
        .iter()
        .find(|entry| normalize_label(&entry.name) == wanted)
        .map(CodedEntry::own_value)
}
