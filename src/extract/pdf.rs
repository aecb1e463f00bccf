use std::fs;
use std::process::Command;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use regex::Regex;

use super::RawLine;

/// Turns PDF bytes into per-page text.
pub trait PdfTextBackend: Send + Sync {
    fn extract_pages(&self, bytes: &[u8]) -> Result<Vec<String>>;
}

/// Shells out to poppler's `pdftotext`, one page per form feed.
pub struct PdftotextBackend;

impl PdfTextBackend for PdftotextBackend {
    fn extract_pages(&self, bytes: &[u8]) -> Result<Vec<String>> {
        let stamp = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let pdf_path = std::env::temp_dir().join(format!(
            "relayconf_extract_{}_{}.pdf",
            std::process::id(),
            stamp
        ));
        fs::write(&pdf_path, bytes)
            .with_context(|| format!("failed to stage pdf at {}", pdf_path.display()))?;

        let output = Command::new("pdftotext")
            .arg("-enc")
            .arg("UTF-8")
            .arg(&pdf_path)
            .arg("-")
            .output();
        let _ = fs::remove_file(&pdf_path);
        let output = output.context("failed to execute pdftotext")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("pdftotext returned non-zero exit status: {}", stderr.trim());
        }

        let raw = String::from_utf8_lossy(&output.stdout);
        let mut pages: Vec<String> = raw
            .split('\u{000C}')
            .map(|chunk| chunk.replace('\u{0000}', ""))
            .collect();

        while let Some(last_page) = pages.last() {
            if last_page.trim().is_empty() {
                pages.pop();
                continue;
            }
            break;
        }

        if pages.is_empty() {
            bail!("pdf has no text layer");
        }

        Ok(pages)
    }
}

/// Flattens pages into numbered lines. A line without a coded prefix that
/// follows coded content is flagged as a continuation; whether to stitch it
/// is left to the vendor parser.
pub(super) fn lines_from_pages(pages: &[String]) -> Result<Vec<RawLine>> {
    let coded_prefix = Regex::new(r"^(?:\d{4}|[0-9A-F]{2}\.[0-9A-F]{2}):")
        .context("failed to compile coded prefix regex")?;
    let mut lines = Vec::new();
    let mut line_number = 0usize;
    let mut seen_coded = false;

    for (page_index, page) in pages.iter().enumerate() {
        for physical in page.lines() {
            line_number += 1;
            let text = physical.trim();
            if text.is_empty() {
                continue;
            }

            let coded = coded_prefix.is_match(text);
            lines.push(RawLine {
                text: text.to_string(),
                line_number,
                page: Some(page_index + 1),
                section_name: None,
                is_continuation: !coded && seen_coded,
            });
            seen_coded |= coded;
        }
    }

    Ok(lines)
}
