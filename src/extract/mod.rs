//! Raw bytes to ordered line sequences.
//!
//! PDF reports and INI scripts both come out as a flat list of [`RawLine`]s so
//! the classifier and parsers see one shape. INI sources additionally expose
//! the parsed section/key/value model.

mod ini;
mod pdf;

use std::path::Path;

use serde::Serialize;

use crate::error::{DocumentError, DocumentResult};

pub use ini::IniSection;
use ini::decode_text;
pub use pdf::{PdfTextBackend, PdftotextBackend};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    Pdf,
    Ini,
}

impl SourceFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?;
        if ext.eq_ignore_ascii_case("pdf") {
            Some(Self::Pdf)
        } else if ext.eq_ignore_ascii_case("s40") || ext.eq_ignore_ascii_case("ini") {
            Some(Self::Ini)
        } else {
            None
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Ini => "ini",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawLine {
    pub text: String,
    pub line_number: usize,
    pub page: Option<usize>,
    pub section_name: Option<String>,
    pub is_continuation: bool,
}

#[derive(Debug, Clone)]
pub struct ExtractedDocument {
    pub format: SourceFormat,
    pub lines: Vec<RawLine>,
    pub sections: Vec<IniSection>,
    pub page_count: usize,
}

impl ExtractedDocument {
    pub fn line_texts(&self, limit: usize) -> Vec<&str> {
        self.lines
            .iter()
            .take(limit)
            .map(|line| line.text.as_str())
            .collect()
    }
}

pub struct DocumentExtractor {
    pdf_backend: Box<dyn PdfTextBackend>,
}

impl Default for DocumentExtractor {
    fn default() -> Self {
        Self::new(Box::new(PdftotextBackend))
    }
}

impl DocumentExtractor {
    pub fn new(pdf_backend: Box<dyn PdfTextBackend>) -> Self {
        Self { pdf_backend }
    }

    pub fn extract(&self, bytes: &[u8], format: SourceFormat) -> DocumentResult<ExtractedDocument> {
        if bytes.is_empty() {
            return Err(DocumentError::Extraction("document is empty".to_string()));
        }

        match format {
            SourceFormat::Pdf => {
                let pages = self
                    .pdf_backend
                    .extract_pages(bytes)
                    .map_err(|error| DocumentError::Extraction(format!("{error:#}")))?;
                let page_count = pages.len();
                let lines = pdf::lines_from_pages(&pages)
                    .map_err(|error| DocumentError::Extraction(format!("{error:#}")))?;
                Ok(ExtractedDocument {
                    format,
                    lines,
                    sections: Vec::new(),
                    page_count,
                })
            }
            SourceFormat::Ini => {
                let text = decode_text(bytes)?;
                let (lines, sections) = ini::parse_ini(&text);
                Ok(ExtractedDocument {
                    format,
                    lines,
                    sections,
                    page_count: 1,
                })
            }
        }
    }
}

/// Lines that carry content: not blank, and for INI sources not a comment.
pub fn is_trivial_line(text: &str, format: SourceFormat) -> bool {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return true;
    }
    matches!(format, SourceFormat::Ini) && (trimmed.starts_with(';') || trimmed.starts_with('#'))
}
