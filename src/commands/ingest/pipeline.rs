use anyhow::Result;
use rusqlite::Connection;
use tracing::{debug, info, warn};

use super::lifecycle::{DocumentLifecycle, DocumentState};
use crate::ansi::AnsiClassifier;
use crate::classify::{FormatClassifier, VendorFormat};
use crate::config::PipelineConfig;
use crate::error::{DocumentResult, ValidationWarning};
use crate::extract::{DocumentExtractor, SourceFormat};
use crate::filename::FilenameParser;
use crate::loader::{DatabaseLoader, LoadReport};
use crate::model::FileStatusRow;
use crate::normalize::{Normalizer, SourceIdentity};
use crate::parse::{ParserSet, StrategyName};
use crate::registry::{LedgerCheck, ProcessingRegistry, ProcessingStatus};
use crate::units::UnitConverter;
use crate::util::sha256_bytes;

/// What a document that made it all the way through produced.
struct Loaded {
    vendor: VendorFormat,
    coverage: f64,
    strategy: Option<StrategyName>,
    parameters_dropped: usize,
    warnings: Vec<ValidationWarning>,
    report: LoadReport,
}

/// Everything one run needs to take a document from bytes to rows.
pub struct Pipeline {
    config: PipelineConfig,
    extractor: DocumentExtractor,
    classifier: FormatClassifier,
    parsers: ParserSet,
    units: UnitConverter,
    ansi: AnsiClassifier,
    filenames: FilenameParser,
    loader: DatabaseLoader,
    registry: ProcessingRegistry,
    force: bool,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        ansi: AnsiClassifier,
        extractor: DocumentExtractor,
        registry: ProcessingRegistry,
        force: bool,
    ) -> Result<Self> {
        Ok(Self {
            classifier: FormatClassifier::new(config.classifier_window)?,
            parsers: ParserSet::new(config.coverage_threshold)?,
            units: UnitConverter::new()?,
            filenames: FilenameParser::new()?,
            loader: DatabaseLoader::new(),
            config,
            extractor,
            ansi,
            registry,
            force,
        })
    }

    pub fn registry(&self) -> &ProcessingRegistry {
        &self.registry
    }

    /// Runs one document as far as it goes. Document-scoped failures and
    /// ledger I/O failures both end up on the returned row; neither stops
    /// the batch.
    pub fn process(
        &mut self,
        connection: &mut Connection,
        file_name: &str,
        format: SourceFormat,
        bytes: &[u8],
    ) -> FileStatusRow {
        let file_hash = sha256_bytes(bytes);
        let mut lifecycle = DocumentLifecycle::new(file_name);
        let mut row = FileStatusRow {
            file_name: file_name.to_string(),
            file_hash: file_hash.clone(),
            format: format.as_str().to_string(),
            vendor: None,
            status: ProcessingStatus::Error.as_str().to_string(),
            final_state: DocumentState::Discovered.as_str().to_string(),
            state_path: Vec::new(),
            records_inserted: 0,
            rows_skipped: 0,
            relay_replaced: false,
            coverage: None,
            strategy: None,
            parameters_dropped: 0,
            warnings: Vec::new(),
            error_message: None,
        };

        if self.force || !self.skip_loaded(&file_hash, file_name, &mut lifecycle, &mut row) {
            self.run_stages(connection, file_name, &file_hash, format, bytes, &mut lifecycle, &mut row);
        }

        if !lifecycle.state().is_terminal() {
            warn!(
                file = %file_name,
                state = lifecycle.state().as_str(),
                "document left unregistered"
            );
        }
        row.final_state = lifecycle.state().as_str().to_string();
        row.state_path = lifecycle
            .history()
            .iter()
            .map(|state| state.as_str().to_string())
            .collect();
        row
    }

    /// True when the ledger says these bytes are already loaded, or when the
    /// ledger cannot be read at all.
    fn skip_loaded(
        &self,
        file_hash: &str,
        file_name: &str,
        lifecycle: &mut DocumentLifecycle,
        row: &mut FileStatusRow,
    ) -> bool {
        let check = match self.registry.check(file_hash) {
            Ok(check) => check,
            Err(error) => {
                ledger_failure(row, file_name, &error);
                return true;
            }
        };

        match check {
            LedgerCheck::AlreadyLoaded(previous) => {
                match self.registry.confirm_duplicate(&previous, file_name) {
                    Ok(record) => {
                        lifecycle.advance(DocumentState::Registered);
                        info!(file = %file_name, hash = %file_hash, "already loaded, skipping");
                        row.status = record.status.as_str().to_string();
                    }
                    Err(error) => ledger_failure(row, file_name, &error),
                }
                true
            }
            LedgerCheck::Process(Some(previous)) => {
                info!(file = %file_name, previous = previous.as_str(), "retrying document");
                false
            }
            LedgerCheck::Process(None) => false,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn run_stages(
        &mut self,
        connection: &mut Connection,
        file_name: &str,
        file_hash: &str,
        format: SourceFormat,
        bytes: &[u8],
        lifecycle: &mut DocumentLifecycle,
        row: &mut FileStatusRow,
    ) {
        match self.walk(connection, file_name, file_hash, format, bytes, lifecycle) {
            Ok(loaded) => {
                for warning in &loaded.warnings {
                    warn!(file = %file_name, scope = %warning.scope, "{}", warning.message);
                }
                info!(
                    file = %file_name,
                    vendor = loaded.vendor.as_str(),
                    relay_id = loaded.report.relay_id,
                    inserted = loaded.report.rows_inserted,
                    skipped = loaded.report.rows_skipped,
                    coverage = loaded.coverage,
                    "document loaded"
                );

                row.vendor = Some(loaded.vendor.as_str().to_string());
                row.records_inserted = loaded.report.rows_inserted;
                row.rows_skipped = loaded.report.rows_skipped;
                row.relay_replaced = loaded.report.replaced;
                row.coverage = Some(loaded.coverage);
                row.strategy = loaded.strategy.map(|name| name.as_str().to_string());
                row.parameters_dropped = loaded.parameters_dropped;
                row.warnings = loaded.warnings;

                match self.registry.record(
                    file_hash,
                    file_name,
                    ProcessingStatus::Success,
                    loaded.report.rows_inserted,
                    None,
                ) {
                    Ok(record) => {
                        lifecycle.advance(DocumentState::Registered);
                        row.status = record.status.as_str().to_string();
                    }
                    Err(error) => ledger_failure(row, file_name, &error),
                }
            }
            Err(error) => {
                lifecycle.fail(&error);
                let status = error.ledger_status();
                warn!(
                    file = %file_name,
                    state = lifecycle.state().as_str(),
                    status = status.as_str(),
                    error = %error,
                    "document not loaded"
                );
                row.status = status.as_str().to_string();
                row.error_message = Some(error.to_string());

                if let Err(ledger_error) =
                    self.registry.record(file_hash, file_name, status, 0, Some(error.to_string()))
                {
                    ledger_failure(row, file_name, &ledger_error);
                }
            }
        }
    }

    fn walk(
        &mut self,
        connection: &mut Connection,
        file_name: &str,
        file_hash: &str,
        format: SourceFormat,
        bytes: &[u8],
        lifecycle: &mut DocumentLifecycle,
    ) -> DocumentResult<Loaded> {
        let extracted = self.extractor.extract(bytes, format)?;
        lifecycle.advance(DocumentState::Extracted);
        debug!(
            file = %file_name,
            format = extracted.format.as_str(),
            lines = extracted.lines.len(),
            pages = extracted.page_count,
            sections = extracted.sections.len(),
            "extracted"
        );

        let vendor = self.classifier.classify(file_name, &extracted)?;
        lifecycle.advance(DocumentState::Classified);

        let parsed = self.parsers.parse(vendor, file_name, &extracted, &self.units)?;
        lifecycle.advance(DocumentState::Parsed);
        lifecycle.advance(DocumentState::Validated);

        let filename = self.filenames.parse(file_name);
        let source = SourceIdentity {
            file_name,
            file_hash,
            filename: &filename,
        };
        let graph = Normalizer::new(&self.ansi, &self.units, &self.config).normalize(&parsed, &source)?;
        lifecycle.advance(DocumentState::Normalized);
        debug!(
            file = %file_name,
            functions = graph.functions.len(),
            parameters = graph.parameter_count(),
            dropped = graph.parameters_dropped,
            "normalized"
        );

        let report = self.loader.load(connection, &graph)?;
        lifecycle.advance(DocumentState::Loaded);

        Ok(Loaded {
            vendor,
            coverage: parsed.coverage,
            strategy: graph.strategy,
            parameters_dropped: graph.parameters_dropped,
            warnings: graph.warnings,
            report,
        })
    }
}

/// The ledger could not be read or written. The row says so and is
/// reported as ERROR, so the next run tries the document again.
fn ledger_failure(row: &mut FileStatusRow, file_name: &str, error: &anyhow::Error) {
    warn!(file = %file_name, error = %format!("{error:#}"), "ledger unavailable");
    let message = format!("ledger unavailable: {error:#}");
    row.status = ProcessingStatus::Error.as_str().to_string();
    row.error_message = Some(match row.error_message.take() {
        Some(previous) => format!("{previous}; {message}"),
        None => message,
    });
}
