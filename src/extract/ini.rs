use crate::error::{DocumentError, DocumentResult};

use super::RawLine;

#[derive(Debug, Clone, PartialEq)]
pub struct IniEntry {
    pub key: String,
    pub value: String,
    pub line_number: usize,
    /// Physical lines folded into this entry, the key line included.
    pub line_count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IniSection {
    pub name: String,
    pub line_number: usize,
    pub entries: Vec<IniEntry>,
}

impl IniSection {
    /// Every value stored under `key`, in source order. Repeated keys are kept.
    pub fn values<'a, 'k>(&'a self, key: &'k str) -> impl Iterator<Item = &'a str> + use<'a, 'k> {
        self.entries
            .iter()
            .filter(move |entry| entry.key.eq_ignore_ascii_case(key))
            .map(|entry| entry.value.as_str())
    }

    /// The returned value borrows from the section only, not from `key`.
    pub fn first(&self, key: &str) -> Option<&str> {
        self.values(key).next()
    }
}

/// UTF-8 first, then ISO-8859-1. Bytes with embedded NULs are treated as
/// binary and rejected.
pub fn decode_text(bytes: &[u8]) -> DocumentResult<String> {
    if bytes.contains(&0) {
        return Err(DocumentError::Extraction(
            "input contains NUL bytes and is not a text script".to_string(),
        ));
    }

    let text = match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => bytes.iter().map(|&byte| char::from(byte)).collect(),
    };

    Ok(text.trim_start_matches('\u{feff}').to_string())
}

pub(super) fn parse_ini(text: &str) -> (Vec<RawLine>, Vec<IniSection>) {
    let mut lines = Vec::new();
    let mut sections: Vec<IniSection> = Vec::new();

    for (index, physical) in text.lines().enumerate() {
        let line_number = index + 1;
        let trimmed = physical.trim();
        if trimmed.is_empty() || trimmed.starts_with(';') || trimmed.starts_with('#') {
            continue;
        }

        if let Some(name) = section_header(trimmed) {
            sections.push(IniSection {
                name: name.to_string(),
                line_number,
                entries: Vec::new(),
            });
            lines.push(RawLine {
                text: trimmed.to_string(),
                line_number,
                page: None,
                section_name: Some(name.to_string()),
                is_continuation: false,
            });
            continue;
        }

        if sections.is_empty() {
            sections.push(IniSection {
                name: String::new(),
                line_number,
                entries: Vec::new(),
            });
        }
        let Some(section) = sections.last_mut() else {
            continue;
        };

        let is_continuation = match trimmed.split_once('=') {
            Some((key, value)) => {
                section.entries.push(IniEntry {
                    key: key.trim().to_string(),
                    value: value.trim().to_string(),
                    line_number,
                    line_count: 1,
                });
                false
            }
            None => {
                match section.entries.last_mut() {
                    Some(entry) => {
                        if !entry.value.is_empty() {
                            entry.value.push('\n');
                        }
                        entry.value.push_str(trimmed);
                        entry.line_count += 1;
                    }
                    None => section.entries.push(IniEntry {
                        key: String::new(),
                        value: trimmed.to_string(),
                        line_number,
                        line_count: 1,
                    }),
                }
                true
            }
        };

        lines.push(RawLine {
            text: trimmed.to_string(),
            line_number,
            page: None,
            section_name: Some(section.name.clone()).filter(|name| !name.is_empty()),
            is_continuation,
        });
    }

    (lines, sections)
}

fn section_header(line: &str) -> Option<&str> {
    let inner = line.strip_prefix('[')?.strip_suffix(']')?.trim();
    if inner.is_empty() { None } else { Some(inner) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latin1_fallback_decodes_accented_labels() {
        let bytes = b"[Libelles]\nlibelle=D\xe9part 12\n";
        let text = decode_text(bytes).expect("latin-1 decodes");
        assert!(text.contains("Départ 12"));
    }

    #[test]
    fn utf8_input_is_kept_as_is() {
        let text = decode_text("[Libelles]\nlibelle=Départ\n".as_bytes()).expect("utf-8");
        assert!(text.contains("Départ"));
    }

    #[test]
    fn nul_bytes_are_rejected() {
        assert!(decode_text(b"[a]\0\0").is_err());
    }

    #[test]
    fn repeated_keys_accumulate_within_a_section() {
        let (_, sections) = parse_ini("[Logique]\nequation=A\nequation=B\n");
        let values: Vec<&str> = sections[0].values("equation").collect();
        assert_eq!(values, vec!["A", "B"]);
    }

    #[test]
    fn unkeyed_lines_fold_into_the_previous_entry() {
        let (lines, sections) = parse_ini("[Matrice]\nligne=1 0\n0 1\n1 1\n");
        assert_eq!(sections[0].entries.len(), 1);
        assert_eq!(sections[0].entries[0].value, "1 0\n0 1\n1 1");
        assert_eq!(sections[0].entries[0].line_count, 3);
        assert!(lines[2].is_continuation);
        assert_eq!(lines[3].section_name.as_deref(), Some("Matrice"));
    }

    #[test]
    fn keys_before_any_section_land_in_an_anonymous_section() {
        let (lines, sections) = parse_ini("version=2\n[A]\nx=1\n");
        assert_eq!(sections[0].name, "");
        assert_eq!(sections[0].first("VERSION"), Some("2"));
        assert_eq!(lines[0].section_name, None);
    }

    #[test]
    fn looked_up_values_outlive_the_lookup_key() {
        let (_, sections) = parse_ini("[Sepam_ConfigMaterielle]\nrepere=00-MF-12 NS08170043\n");
        let repere = {
            let key = String::from("REPERE");
            sections[0].first(&key)
        };
        assert_eq!(repere, Some("00-MF-12 NS08170043"));
    }
}
