//! Metadata carried in export file names.
//!
//! SEPAM scripts: `00-MF-12_2016-03-31.S40` (substation, panel, bay, date).
//! PDF reports: `P_122 52-MF-03B1_2021-03-17.pdf` or `P922 52-MF-01BC.pdf`
//! (model, device number, panel, bay, optional date).

use anyhow::{Context, Result};
use chrono::NaiveDate;
use regex::{Regex, RegexBuilder};
use serde::Serialize;

use crate::vendor::Manufacturer;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FilenameMetadata {
    pub relay_model: Option<String>,
    pub substation_code: Option<String>,
    pub device_number: Option<String>,
    pub panel_type: Option<String>,
    pub panel_description: Option<String>,
    pub bay_identifier: Option<String>,
    pub config_date: Option<NaiveDate>,
    #[serde(skip)]
    pub manufacturer: Option<Manufacturer>,
}

pub struct FilenameParser {
    sepam: Regex,
    pdf: Regex,
}

impl FilenameParser {
    pub fn new() -> Result<Self> {
        Ok(Self {
            sepam: RegexBuilder::new(r"^(\d+)-([A-Z]{2,})-(\w+?)_(\d{4}-\d{2}-\d{2})\.S40$")
                .case_insensitive(true)
                .build()
                .context("failed to compile SEPAM filename regex")?,
            pdf: RegexBuilder::new(
                r"^P_?(\d{3})[\s_](\d+)-([A-Z]{2})-(\w+?)(?:_(\d{4}-\d{2}-\d{2}))?\.pdf$",
            )
            .case_insensitive(true)
            .build()
            .context("failed to compile PDF filename regex")?,
        })
    }

    /// Unrecognised names yield empty metadata rather than an error; the
    /// document body may still identify the relay.
    pub fn parse(&self, file_name: &str) -> FilenameMetadata {
        if let Some(captures) = self.sepam.captures(file_name) {
            let panel = captures.get(2).map(|m| m.as_str().to_uppercase());
            return FilenameMetadata {
                relay_model: None,
                substation_code: captures.get(1).map(|m| m.as_str().to_string()),
                device_number: None,
                panel_description: panel.as_deref().map(panel_description),
                panel_type: panel,
                bay_identifier: captures.get(3).map(|m| m.as_str().to_string()),
                config_date: captures.get(4).and_then(|m| parse_date(m.as_str())),
                manufacturer: Some(Manufacturer::SchneiderElectric),
            };
        }

        if let Some(captures) = self.pdf.captures(file_name) {
            let number = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
            let panel = captures.get(3).map(|m| m.as_str().to_uppercase());
            return FilenameMetadata {
                relay_model: Some(format!("P{number}")),
                substation_code: None,
                device_number: captures.get(2).map(|m| m.as_str().to_string()),
                panel_description: panel.as_deref().map(panel_description),
                panel_type: panel,
                bay_identifier: captures.get(4).map(|m| m.as_str().to_string()),
                config_date: captures.get(5).and_then(|m| parse_date(m.as_str())),
                manufacturer: number.parse().ok().map(Manufacturer::from_model_number),
            };
        }

        FilenameMetadata::default()
    }
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()
}

fn panel_description(code: &str) -> String {
    match code {
        "MF" => "Main Feeder",
        "MK" => "Main Coupling",
        "MP" => "Main Protection",
        "TR" => "Transformer",
        "GN" => "Generator",
        "MT" => "Motor",
        "BU" => "Bus",
        "PT" => "Potential Transformer",
        "CT" => "Current Transformer",
        other => other,
    }
    .to_string()
}
