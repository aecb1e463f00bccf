//! Free-text protection labels to ANSI device codes.
//!
//! The rule table is data: an ordered JSON list of `{pattern, code, name}`
//! where the first matching pattern wins. `code` and `name` may refer to
//! capture groups (`$1`).

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use regex::{Regex, RegexBuilder};
use serde::Deserialize;

pub const UNKNOWN_CODE: &str = "Unknown";

const BUILTIN_TABLE: &str = include_str!("../data/ansi_table.json");

#[derive(Debug, Deserialize)]
struct AnsiTableFile {
    version: u32,
    rules: Vec<AnsiRuleEntry>,
}

#[derive(Debug, Deserialize)]
struct AnsiRuleEntry {
    pattern: String,
    code: String,
    name: String,
}

struct AnsiRule {
    pattern: Regex,
    code: String,
    name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnsiMatch {
    pub code: String,
    pub name: String,
}

impl AnsiMatch {
    pub fn is_unknown(&self) -> bool {
        self.code == UNKNOWN_CODE
    }
}

pub struct AnsiClassifier {
    rules: Vec<AnsiRule>,
}

impl AnsiClassifier {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let raw = fs::read_to_string(path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                Self::from_json(&raw).with_context(|| format!("invalid ANSI table {}", path.display()))
            }
            None => Self::builtin(),
        }
    }

    pub fn builtin() -> Result<Self> {
        Self::from_json(BUILTIN_TABLE).context("invalid built-in ANSI table")
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let table: AnsiTableFile = serde_json::from_str(raw).context("failed to parse ANSI table")?;
        if table.version != 1 {
            bail!("unsupported ANSI table version {}", table.version);
        }

        let mut rules = Vec::with_capacity(table.rules.len());
        for entry in table.rules {
            let pattern = RegexBuilder::new(&entry.pattern)
                .case_insensitive(true)
                .build()
                .with_context(|| format!("invalid ANSI pattern {:?}", entry.pattern))?;
            rules.push(AnsiRule {
                pattern,
                code: entry.code,
                name: entry.name,
            });
        }

        if rules.is_empty() {
            bail!("ANSI table has no rules");
        }
        Ok(Self { rules })
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    pub fn classify(&self, label: &str) -> AnsiMatch {
        let label = label.trim();
        for rule in &self.rules {
            let Some(captures) = rule.pattern.captures(label) else {
                continue;
            };

            let mut code = String::new();
            captures.expand(&rule.code, &mut code);
            let mut name = String::new();
            captures.expand(&rule.name, &mut name);
            if code.is_empty() {
                continue;
            }
            return AnsiMatch {
                code: code.to_uppercase(),
                name,
            };
        }

        AnsiMatch {
            code: UNKNOWN_CODE.to_string(),
            name: "Unclassified protection function".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> AnsiClassifier {
        AnsiClassifier::builtin().expect("built-in table loads")
    }

    #[test]
    fn directional_ground_wins_over_plain_directional() {
        assert_eq!(classifier().classify("67N Directional Ground Overcurrent").code, "67N");
        assert_eq!(classifier().classify("Directional O/C").code, "67");
    }

    #[test]
    fn novel_text_is_unknown() {
        let result = classifier().classify("completely novel text");
        assert_eq!(result.code, UNKNOWN_CODE);
        assert!(result.is_unknown());
    }

    #[test]
    fn breaker_failure_precedes_overcurrent() {
        assert_eq!(classifier().classify("CB Fail").code, "50BF");
        assert_eq!(classifier().classify("Overcurrent").code, "50/51");
    }

    #[test]
    fn threshold_stages_resolve_most_specific_first() {
        let classifier = classifier();
        assert_eq!(classifier.classify("Ie>>>").code, "50N");
        assert_eq!(classifier.classify("Ie>>").code, "51N");
        assert_eq!(classifier.classify("I>> FUNCTION").code, "51");
        assert_eq!(classifier.classify("I2>").code, "46");
        assert_eq!(classifier.classify("Neg Seq O/C").code, "46");
        assert_eq!(classifier.classify("Neg Seq O/V").code, "47");
        assert_eq!(classifier.classify("Earth Fault").code, "50N/51N");
    }

    #[test]
    fn sepam_section_names_expand_their_device_number() {
        let classifier = classifier();
        assert_eq!(classifier.classify("Protection50_51N").code, "50N/51N");
        assert_eq!(classifier.classify("Protection2727S").code, "27");
        let expanded = classifier.classify("Protection50BF");
        assert_eq!(expanded.code, "50BF");
        assert_eq!(expanded.name, "Sepam Protection 50BF");
    }

    #[test]
    fn custom_table_replaces_builtin_rules() {
        let classifier = AnsiClassifier::from_json(
            r#"{"version": 1, "rules": [{"pattern": "arc flash", "code": "AFD", "name": "Arc Flash"}]}"#,
        )
        .expect("custom table loads");
        assert_eq!(classifier.rule_count(), 1);
        assert_eq!(classifier.classify("Arc Flash Detection").code, "AFD");
        assert_eq!(classifier.classify("Overcurrent").code, UNKNOWN_CODE);
    }
}
