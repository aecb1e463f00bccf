use serde::Serialize;

use super::ProtectionEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyName {
    Structural,
    SingleLine,
    PackedContinuation,
}

impl StrategyName {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Structural => "structural",
            Self::SingleLine => "single_line",
            Self::PackedContinuation => "packed_continuation",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StrategyOutcome {
    pub name: StrategyName,
    pub entries: Vec<ProtectionEntry>,
}

/// One named way of finding protection entries in a vendor's records.
pub(super) struct ExtractionStrategy<P, R: ?Sized> {
    pub name: StrategyName,
    pub extract: fn(&P, &R) -> Vec<ProtectionEntry>,
}

/// Runs every strategy in priority order. All outcomes are kept so the
/// manifest can show which ones matched; consumers take the first
/// non-empty one.
pub(super) fn run_all<P, R: ?Sized>(
    strategies: &[ExtractionStrategy<P, R>],
    parser: &P,
    records: &R,
) -> Vec<StrategyOutcome> {
    strategies
        .iter()
        .map(|strategy| StrategyOutcome {
            name: strategy.name,
            entries: (strategy.extract)(parser, records),
        })
        .collect()
}
