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
    TransformerLabels { kind: "Phase", primary: "Line CT primary", secondary: "Line CT sec", ratio_kind: RatioKind::Current },
    TransformerLabels { kind: "Ground", primary: "E/Gnd CT primary", secondary: "E/Gnd CT sec", ratio_kind: RatioKind::Current },
    TransformerLabels { kind: "Phase", primary: "PRIM PH", secondary: "SEC PH", ratio_kind: RatioKind::Current },
    TransformerLabels { kind: "Ground", primary: "PRIM E", secondary: "SEC E", ratio_kind: RatioKind::Current },
    TransformerLabels { kind: "Main", primary: "Main VT Primary", secondary: "Main VT Secundary", ratio_kind: RatioKind::Voltage },
    TransformerLabels { kind: "Residual", primary: "E/Gnd VT Primary", secondary: "E/Gnd VT Secundary", ratio_kind: RatioKind::Voltage },
];

const STRATEGIES: [ExtractionStrategy<EasergyParser, [CodedEntry]>; 3] = [
    ExtractionStrategy { name: StrategyName::Structural, extract: EasergyParser::function_headers },
    ExtractionStrategy { name: StrategyName::SingleLine, extract: EasergyParser::questioned_toggles },
    ExtractionStrategy { name: StrategyName::PackedContinuation, extract: EasergyParser::packed_toggles },
];

/// Easergy Studio reports: `0210: I>> FUNCTION ?: YES`. Lines without the
/// four-digit prefix continue the previous entry, except the printed
/// `PROTECTION G<n>` group banner. A bare `G1` or `Group 2` is still a
/// continuation.
pub struct EasergyParser {
    coded: Regex,
    coded_open: Regex,
    function_header: Regex,
    group_heading: Regex,
    packed_segment: Regex,
    header: HeaderScanner,
}

impl EasergyParser {
    pub fn new() -> Result<Self> {
        Ok(Self {
            coded: Regex::new(r"^(\d{4}):\s*(.+?)(\s*\?)?:\s*(.+)$")
                .context("failed to compile easergy line regex")?,
            coded_open: Regex::new(r"^(\d{4}):\s*(.+?)(\s*\?)?:\s*$")
                .context("failed to compile easergy open line regex")?,
            function_header: RegexBuilder::new(r"^(?:function\s+(.+)|(.+?)\s+function)$")
                .case_insensitive(true)
                .build()
                .context("failed to compile easergy function regex")?,
            group_heading: RegexBuilder::new(r"^protection\s+(?:g|group\s*)([1-8])$")
                .case_insensitive(true)
                .build()
                .context("failed to compile easergy group regex")?,
            packed_segment: Regex::new(r"^(.+?)\s*\??\s*[:=]\s*(.+)$")
                .context("failed to compile easergy segment regex")?,
            header: HeaderScanner::new()?,
        })
    }

    fn coded_entry(&self, text: &str, line_number: usize, setting_group: Option<u32>) -> Option<CodedEntry> {
        let captures = self
            .coded
            .captures(text)
            .or_else(|| self.coded_open.captures(text))?;
        let value = captures
            .get(4)
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_default();
        Some(CodedEntry {
            code: captures.get(1)?.as_str().to_string(),
            name: captures.get(2)?.as_str().trim().to_string(),
            line_value: value.clone(),
            value,
            line_number,
            continuation: Vec::new(),
            packed: false,
            questioned: captures.get(3).is_some(),
            setting_group,
            context: None,
        })
    }

    fn function_name(&self, name: &str) -> Option<String> {
        let captures = self.function_header.captures(name.trim())?;
        captures
            .get(1)
            .or_else(|| captures.get(2))
            .map(|m| m.as_str().trim().to_string())
    }

    /// Label of an on/off line that opens a function block.
    fn toggle_label(&self, entry: &CodedEntry) -> Option<String> {
        head_value(entry)?;
        self.function_name(&entry.name)
            .or_else(|| entry.questioned.then(|| entry.name.clone()))
    }

    fn function_headers(&self, entries: &[CodedEntry]) -> Vec<ProtectionEntry> {
        entries
            .iter()
            .filter_map(|entry| {
                let enabled = head_value(entry)?;
                let label = self.function_name(&entry.name)?;
                Some(protection_entry(entry, label, enabled))
            })
            .collect()
    }

    fn questioned_toggles(&self, entries: &[CodedEntry]) -> Vec<ProtectionEntry> {
        entries
            .iter()
            .filter(|entry| entry.questioned)
            .filter_map(|entry| {
                let enabled = head_value(entry)?;
                Some(protection_entry(entry, entry.name.clone(), enabled))
            })
            .collect()
    }

    fn packed_toggles(&self, entries: &[CodedEntry]) -> Vec<ProtectionEntry> {
        let mut found = Vec::new();
        for entry in entries {
            for segment in entry.continuation.iter().flat_map(|line| line.split('|')) {
                let Some(captures) = self.packed_segment.captures(segment.trim()) else {
                    continue;
                };
                let (Some(label), Some(value)) = (captures.get(1), captures.get(2)) else {
                    continue;
                };
                let Some(enabled) = UnitConverter::parse_boolean(value.as_str()) else {
                    continue;
                };
                found.push(ProtectionEntry {
                    code: Some(entry.code.clone()),
                    label: label.as_str().trim().to_string(),
                    is_enabled: Some(enabled),
                    continuation_text: None,
                    setting_group: entry.setting_group,
                });
            }
        }
        found
    }
}

fn head_value(entry: &CodedEntry) -> Option<bool> {
    UnitConverter::parse_boolean(entry.own_value())
}

fn protection_entry(entry: &CodedEntry, label: String, enabled: bool) -> ProtectionEntry {
    ProtectionEntry {
        code: Some(entry.code.clone()),
        label,
        is_enabled: Some(enabled),
        continuation_text: entry.continuation_text(),
        setting_group: entry.setting_group,
    }
}

impl VendorParser for EasergyParser {
    fn vendor(&self) -> VendorFormat {
        VendorFormat::Easergy
    }

    fn parse(&self, document: &ExtractedDocument, units: &UnitConverter) -> DocumentResult<ParsedDocument> {
        let mut entries: Vec<CodedEntry> = Vec::new();
        let mut matched_lines = 0usize;
        let mut setting_group: Option<u32> = None;
        let mut context: Option<(String, ParameterContext)> = None;

        for line in &document.lines {
            let text = line.text.trim();
            if text.is_empty() {
                continue;
            }

            if let Some(mut entry) = self.coded_entry(text, line.line_number, setting_group) {
                let block = entry.code.chars().take(3).collect::<String>();
                if let Some(label) = self.toggle_label(&entry) {
                    context = Some((
                        block,
                        ParameterContext {
                            anchor: Some(entry.code.clone()),
                            label,
                            setting_group,
                        },
                    ));
                } else if context.as_ref().is_some_and(|(open, _)| *open != block) {
                    context = None;
                }
                entry.context = context.as_ref().map(|(_, ctx)| ctx.clone());
                entries.push(entry);
                matched_lines += 1;
                continue;
            }

            if let Some(group) = self
                .group_heading
                .captures(text)
                .and_then(|captures| captures.get(1))
                .and_then(|m| m.as_str().parse().ok())
            {
                setting_group = Some(group);
                context = None;
                matched_lines += 1;
                continue;
            }

            if let Some(previous) = entries.last_mut() {
                previous.append_continuation(text);
                matched_lines += 1;
            }
        }

        if entries.is_empty() {
            return Err(DocumentError::Parse(
                "no four-digit coded lines in Easergy report".to_string(),
            ));
        }

        let header = self.header.scan(&document.lines);
        let mut warnings = Vec::new();
        let (ct_entries, vt_entries) = collect_transformers(&entries, TRANSFORMERS, units, &mut warnings);
        let strategy_outcomes = strategy::run_all(&STRATEGIES, self, entries.as_slice());
        let raw_parameters = entries.iter().map(CodedEntry::to_raw_parameter).collect();

        Ok(ParsedDocument {
            manufacturer: Manufacturer::SchneiderElectric,
            model: self.header.designation(&header),
            model_number: header.model_number.clone(),
            series: "Easergy",
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
            records: VendorRecords::Easergy(entries),
            matched_lines,
            coverage: 0.0,
            warnings,
        })
    }
}
