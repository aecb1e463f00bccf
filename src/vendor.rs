use serde::Serialize;

/// Fixed vendor profile for the manufacturers the pipeline knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Manufacturer {
    SchneiderElectric,
    GeneralElectric,
}

impl Manufacturer {
    pub fn name(self) -> &'static str {
        match self {
            Self::SchneiderElectric => "SCHNEIDER ELECTRIC",
            Self::GeneralElectric => "GENERAL ELECTRIC",
        }
    }

    pub fn country(self) -> &'static str {
        match self {
            Self::SchneiderElectric => "France",
            Self::GeneralElectric => "United States",
        }
    }

    /// MiCOM numbering overlaps the Easergy range, so known GE families are
    /// listed first and the 14x/24x blocks default to GE.
    pub fn from_model_number(number: u32) -> Self {
        match number {
            143 | 241..=243 | 441..=443 | 542..=545 => Self::GeneralElectric,
            122 | 123 | 125 | 127 | 220..=223 | 225 | 922 | 923 => Self::SchneiderElectric,
            140..=149 | 240..=249 => Self::GeneralElectric,
            _ => Self::SchneiderElectric,
        }
    }
}

/// Application family inferred from a model designation such as `P122` or
/// `P143312A2A0150C`.
pub fn relay_type_for_model(model: &str) -> Option<&'static str> {
    let upper = model.trim().to_uppercase();
    if upper.starts_with("SEPAM") {
        return Some("Feeder");
    }

    let digits: String = upper
        .strip_prefix('P')?
        .chars()
        .take_while(char::is_ascii_digit)
        .take(3)
        .collect();
    if digits.len() < 3 {
        return None;
    }

    match digits.as_str() {
        "122" | "123" => Some("Overcurrent"),
        family if family.starts_with("22") => Some("Motor"),
        family if family.starts_with("92") => Some("Voltage"),
        family if family.starts_with("14") => Some("Feeder"),
        family if family.starts_with("24") => Some("Motor"),
        _ => None,
    }
}
