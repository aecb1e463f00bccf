use anyhow::{Context, Result};
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::error::{DocumentError, DocumentResult};
use crate::extract::ExtractedDocument;

/// The three export dialects the pipeline understands. Chosen once per
/// document and carried through parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VendorFormat {
    Sepam,
    Easergy,
    Micom,
}

impl VendorFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sepam => "sepam",
            Self::Easergy => "easergy",
            Self::Micom => "micom",
        }
    }
}

pub struct FormatClassifier {
    section_marker: Regex,
    easergy_prefix: Regex,
    micom_prefix: Regex,
    window: usize,
}

impl FormatClassifier {
    pub fn new(window: usize) -> Result<Self> {
        Ok(Self {
            section_marker: Regex::new(r"^\[[^\]]+\]$")
                .context("failed to compile section marker regex")?,
            easergy_prefix: Regex::new(r"^\d{4}:").context("failed to compile easergy regex")?,
            micom_prefix: Regex::new(r"^[0-9A-F]{2}\.[0-9A-F]{2}:")
                .context("failed to compile micom regex")?,
            window: window.max(1),
        })
    }

    /// Looks at the first `window` lines only. Each rule is checked over the
    /// whole window before the next rule is tried, so a single section marker
    /// anywhere in the window wins over coded lines.
    pub fn classify(&self, file_name: &str, document: &ExtractedDocument) -> DocumentResult<VendorFormat> {
        let head = document.line_texts(self.window);

        let format = if head.iter().any(|line| self.section_marker.is_match(line)) {
            VendorFormat::Sepam
        } else if head.iter().any(|line| self.easergy_prefix.is_match(line)) {
            VendorFormat::Easergy
        } else if head.iter().any(|line| self.micom_prefix.is_match(line)) {
            VendorFormat::Micom
        } else {
            return Err(DocumentError::UnknownFormat(format!(
                "{file_name}: no section marker or coded prefix in the first {} lines",
                head.len()
            )));
        };

        debug!(file = %file_name, format = format.as_str(), "classified document");
        Ok(format)
    }
}
