use anyhow::{Context, Result};
use regex::{Regex, RegexBuilder};

use super::strategy::{self, ExtractionStrategy, StrategyName};
use super::{
    CodedEntry, HeaderScanner, ParameterContext, ParsedDocument, ProtectionEntry,
    TransformerLabels, VendorParser, VendorRecords, collect_transformers,
};
use crate::classify::VendorFormat;
use crate::error::{DocumentError, DocumentResult};
use crate::extract::ExtractedDocument;
use crate::units::{RatioKind, UnitConverter};
use crate::vendor::Manufacturer;

const TRANSFORMERS: &[TransformerLabels] = &[
    TransformerLabels { kind: "Phase", primary: "Phase CT Primary", secondary: "Phase CT Sec'y", ratio_kind: RatioKind::Current },
    TransformerLabels { kind: "Ground", primary: "E/F CT Primary", secondary: "E/F CT Secondary", ratio_kind: RatioKind::Current },
    TransformerLabels { kind: "SEF", primary: "SEF CT Primary", secondary: "SEF CT Secondary", ratio_kind: RatioKind::Current },
    TransformerLabels { kind: "Main", primary: "Main VT Primary", secondary: "Main VT Sec'y", ratio_kind: RatioKind::Voltage },
    TransformerLabels { kind: "Check Sync", primary: "C/S VT Primary", secondary: "C/S VT Secondary", ratio_kind: RatioKind::Voltage },
    TransformerLabels { kind: "NVD", primary: "NVD VT Primary", secondary: "NVD VT Secondary", ratio_kind: RatioKind::Voltage },
];

const STRATEGIES: [ExtractionStrategy<MicomParser, [CodedEntry]>; 3] = [
    ExtractionStrategy { name: StrategyName::Structural, extract: MicomParser::configuration_column },
    ExtractionStrategy { name: StrategyName::SingleLine, extract: MicomParser::standalone_lines },
    ExtractionStrategy { name: StrategyName::PackedContinuation, extract: MicomParser::packed_lines },
];

/// MiCOM S1 reports: `09.01: Earth Fault: Enabled`, several of which may be
/// packed onto one physical line separated by `|`.
pub struct MicomParser {
    protection: Regex,
    parameter: Regex,
    group_heading: Regex,
    header: HeaderScanner,
}

impl MicomParser {
    pub fn new() -> Result<Self> {
        Ok(Self {
            protection: Regex::new(r"^([0-9A-F]{2}\.[0-9A-F]{2}):\s*(.+?):\s*(Enabled|Disabled)$")
                .context("failed to compile micom protection regex")?,
            parameter: Regex::new(r"^([0-9A-F]{2}\.[0-9A-F]{2}):\s*(.+?):\s*(.+)$")
                .context("failed to compile micom parameter regex")?,
            group_heading: RegexBuilder::new(r"^group\s+(\d+)\s*[:\-]?\s*(.+)$")
                .case_insensitive(true)
                .build()
                .context("failed to compile micom group regex")?,
            header: HeaderScanner::new()?,
        })
    }

    fn protection_entry(&self, entry: &CodedEntry) -> Option<ProtectionEntry> {
        let line = format!("{}: {}: {}", entry.code, entry.name, entry.value);
        let captures = self.protection.captures(&line)?;
        Some(ProtectionEntry {
            code: Some(entry.code.clone()),
            label: captures.get(2)?.as_str().trim().to_string(),
            is_enabled: Some(captures.get(3)?.as_str() == "Enabled"),
            continuation_text: None,
            setting_group: entry.setting_group,
        })
    }

    fn configuration_column(&self, entries: &[CodedEntry]) -> Vec<ProtectionEntry> {
        entries
            .iter()
            .filter(|entry| !entry.packed && entry.code.starts_with("09."))
            .filter_map(|entry| self.protection_entry(entry))
            .collect()
    }

    fn standalone_lines(&self, entries: &[CodedEntry]) -> Vec<ProtectionEntry> {
        entries
            .iter()
            .filter(|entry| !entry.packed)
            .filter_map(|entry| self.protection_entry(entry))
            .collect()
    }

    fn packed_lines(&self, entries: &[CodedEntry]) -> Vec<ProtectionEntry> {
        entries
            .iter()
            .filter(|entry| entry.packed)
            .filter_map(|entry| self.protection_entry(entry))
            .collect()
    }
}

/// Column headings are printed in capitals; page furniture is not.
fn is_column_heading(text: &str) -> bool {
    text.chars().any(char::is_alphabetic) && !text.chars().any(char::is_lowercase)
}

impl VendorParser for MicomParser {
    fn vendor(&self) -> VendorFormat {
        VendorFormat::Micom
    }

    fn parse(&self, document: &ExtractedDocument, units: &UnitConverter) -> DocumentResult<ParsedDocument> {
        let mut entries: Vec<CodedEntry> = Vec::new();
        let mut matched_lines = 0usize;
        let mut setting_group: Option<u32> = None;
        let mut context: Option<ParameterContext> = None;

        for line in &document.lines {
            let text = line.text.trim();
            if text.is_empty() {
                continue;
            }

            let segments: Vec<&str> = text
                .split('|')
                .map(str::trim)
                .filter(|segment| !segment.is_empty())
                .collect();
            let packed = segments.len() > 1;

            let mut any_segment = false;
            for segment in segments {
                let Some(captures) = self.parameter.captures(segment) else {
                    continue;
                };
                let (Some(code), Some(name), Some(value)) = (captures.get(1), captures.get(2), captures.get(3)) else {
                    continue;
                };
                entries.push(CodedEntry {
                    code: code.as_str().to_string(),
                    name: name.as_str().trim().to_string(),
                    value: value.as_str().trim().to_string(),
                    line_value: value.as_str().trim().to_string(),
                    line_number: line.line_number,
                    continuation: Vec::new(),
                    packed,
                    questioned: false,
                    setting_group,
                    context: context.clone(),
                });
                any_segment = true;
            }
            if any_segment {
                matched_lines += 1;
                continue;
            }

            if let Some(captures) = self.group_heading.captures(text) {
                let group = captures.get(1).and_then(|m| m.as_str().parse().ok());
                let label = captures.get(2).map(|m| m.as_str().trim().to_string()).unwrap_or_default();
                setting_group = group;
                context = (!label.is_empty()).then(|| ParameterContext {
                    anchor: None,
                    label,
                    setting_group: group,
                });
                matched_lines += 1;
                continue;
            }

            if is_column_heading(text) {
                setting_group = None;
                context = None;
            }
        }

        if entries.is_empty() {
            return Err(DocumentError::Parse(
                "no hex-coded setting lines in MiCOM report".to_string(),
            ));
        }

        let header = self.header.scan(&document.lines);
        let mut warnings = Vec::new();
        let (ct_entries, vt_entries) = collect_transformers(&entries, TRANSFORMERS, units, &mut warnings);
        let strategy_outcomes = strategy::run_all(&STRATEGIES, self, entries.as_slice());
        let raw_parameters = entries.iter().map(CodedEntry::to_raw_parameter).collect();

        Ok(ParsedDocument {
            manufacturer: Manufacturer::GeneralElectric,
            model: self.header.designation(&header),
            model_number: header.model_number.clone(),
            series: "MiCOM",
            bay_or_serial: None,
            serial_number: None,
            plant_reference: header.plant_reference.clone(),
            firmware_version: header.software_version.clone(),
            frequency_hz: header.frequency_hz,
            declared_voltage_kv: header.declared_voltage_kv,
            ct_entries,
            vt_entries,
            strategy_outcomes,
            raw_parameters,
            logic_matrix: None,
            records: VendorRecords::Micom(entries),
            matched_lines,
            coverage: 0.0,
            warnings,
        })
    }
}
