use serde::Serialize;
use tracing::debug;

use crate::error::DocumentError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentState {
    Discovered,
    Extracted,
    Classified,
    Parsed,
    Validated,
    Normalized,
    Loaded,
    Registered,
    ExtractionFailed,
    FormatUnknown,
    ParseFailed,
    LoadFailed,
}

impl DocumentState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Discovered => "DISCOVERED",
            Self::Extracted => "EXTRACTED",
            Self::Classified => "CLASSIFIED",
            Self::Parsed => "PARSED",
            Self::Validated => "VALIDATED",
            Self::Normalized => "NORMALIZED",
            Self::Loaded => "LOADED",
            Self::Registered => "REGISTERED",
            Self::ExtractionFailed => "EXTRACTION_FAILED",
            Self::FormatUnknown => "FORMAT_UNKNOWN",
            Self::ParseFailed => "PARSE_FAILED",
            Self::LoadFailed => "LOAD_FAILED",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Registered
                | Self::ExtractionFailed
                | Self::FormatUnknown
                | Self::ParseFailed
                | Self::LoadFailed
        )
    }

    pub fn can_advance_to(self, next: Self) -> bool {
        use DocumentState::*;
        matches!(
            (self, next),
            (Discovered, Extracted)
                | (Extracted, Classified)
                | (Classified, Parsed)
                | (Parsed, Validated)
                | (Validated, Normalized)
                | (Normalized, Loaded)
                | (Loaded, Registered)
                // ledger hit: the bytes are already loaded
                | (Discovered, Registered)
                | (Discovered, ExtractionFailed)
                | (Extracted, FormatUnknown)
                | (Classified, ParseFailed)
                | (Validated, ParseFailed)
                | (Normalized, LoadFailed)
        )
    }
}

/// Failure state a document error lands in.
pub fn failure_state(error: &DocumentError) -> DocumentState {
    match error {
        DocumentError::Extraction(_) => DocumentState::ExtractionFailed,
        DocumentError::UnknownFormat(_) => DocumentState::FormatUnknown,
        DocumentError::Parse(_) => DocumentState::ParseFailed,
        DocumentError::Load(_) => DocumentState::LoadFailed,
    }
}

/// Tracks one document's walk and logs each step.
#[derive(Debug)]
pub struct DocumentLifecycle {
    file_name: String,
    state: DocumentState,
    history: Vec<DocumentState>,
}

impl DocumentLifecycle {
    pub fn new(file_name: &str) -> Self {
        debug!(file = %file_name, state = DocumentState::Discovered.as_str(), "document state");
        Self {
            file_name: file_name.to_string(),
            state: DocumentState::Discovered,
            history: vec![DocumentState::Discovered],
        }
    }

    pub fn state(&self) -> DocumentState {
        self.state
    }

    pub fn history(&self) -> &[DocumentState] {
        &self.history
    }

    pub fn advance(&mut self, next: DocumentState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "illegal transition {} -> {}",
            self.state.as_str(),
            next.as_str()
        );
        debug!(
            file = %self.file_name,
            from = self.state.as_str(),
            to = next.as_str(),
            "document state"
        );
        self.state = next;
        self.history.push(next);
    }

    pub fn fail(&mut self, error: &DocumentError) {
        self.advance(failure_state(error));
    }
}
