use anyhow::{Context, Result};
use regex::Regex;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConversionError {
    #[error("no numeric value in {0:?}")]
    NotNumeric(String),

    #[error("no ratio separator in {0:?}")]
    MissingSeparator(String),

    #[error("rating must be strictly positive, got {0}")]
    NonPositive(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RatioKind {
    Current,
    Voltage,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Ratio {
    pub primary: f64,
    pub secondary: f64,
    pub ratio: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    Setpoint,
    Delay,
    Curve,
    Logic,
    Mode,
}

impl ParameterType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Setpoint => "setpoint",
            Self::Delay => "delay",
            Self::Curve => "curve",
            Self::Logic => "logic",
            Self::Mode => "mode",
        }
    }
}

const TRUE_TOKENS: &[&str] = &[
    "YES", "Y", "TRUE", "T", "ON", "1", "ENABLED", "ENABLE", "ACTIVE", "ACTIVATED", "SIM", "OUI",
    "IN SERVICE", "EN SERVICE", "ACTIF", "ACTIVE/ON",
];

const FALSE_TOKENS: &[&str] = &[
    "NO", "N", "FALSE", "F", "OFF", "0", "DISABLED", "DISABLE", "INACTIVE", "NAO", "NÃO", "NON",
    "OUT OF SERVICE", "HORS SERVICE", "INACTIF",
];

const TIME_UNITS: &[&str] = &["s", "ms", "min", "h", "cy", "cycles"];

/// Parses vendor value tokens into typed values. Holds its regexes so the
/// parsers can share one compiled instance per run.
pub struct UnitConverter {
    quantity: Regex,
    value_with_unit: Regex,
    curve_value: Regex,
}

impl UnitConverter {
    pub fn new() -> Result<Self> {
        Ok(Self {
            quantity: Regex::new(r"^\s*([-+]?\d+(?:[.,]\d+)?)\s*([A-Za-z]*)\s*$")
                .context("failed to compile quantity regex")?,
            value_with_unit: Regex::new(r"^([-+]?\d+(?:\.\d+)?)\s*([A-Za-z%°][A-Za-z0-9/%°]*)?$")
                .context("failed to compile value/unit regex")?,
            curve_value: Regex::new(r"(?i)\b(IEC|IEEE|ANSI|US|DT|DMT|IDMT|inverse|definite|RI|RECT)\b")
                .context("failed to compile curve regex")?,
        })
    }

    /// `"P:S"`, `"P unit : S unit"` and `"P/S"`. kV and kA sides are scaled
    /// to V and A so both ratings share a unit.
    pub fn parse_ratio(&self, text: &str, kind: RatioKind) -> Result<Ratio, ConversionError> {
        let (primary, secondary) = text
            .split_once([':', '/'])
            .ok_or_else(|| ConversionError::MissingSeparator(text.trim().to_string()))?;

        let primary = self.parse_rating(primary, kind)?;
        let secondary = self.parse_rating(secondary, kind)?;

        Ok(Ratio {
            primary,
            secondary,
            ratio: primary / secondary,
        })
    }

    /// A single rating such as `1.000 kA`, `110.0 V` or `5`.
    pub fn parse_rating(&self, text: &str, kind: RatioKind) -> Result<f64, ConversionError> {
        let captures = self
            .quantity
            .captures(text)
            .ok_or_else(|| ConversionError::NotNumeric(text.trim().to_string()))?;

        let number = captures
            .get(1)
            .map(|m| m.as_str().replace(',', "."))
            .unwrap_or_default();
        let value: f64 = number
            .parse()
            .map_err(|_| ConversionError::NotNumeric(text.trim().to_string()))?;

        let unit = captures.get(2).map(|m| m.as_str()).unwrap_or_default();
        let scale = match (kind, unit.to_ascii_lowercase().as_str()) {
            (RatioKind::Current, "ka") | (RatioKind::Voltage, "kv") => 1000.0,
            _ => 1.0,
        };

        let scaled = value * scale;
        if !scaled.is_finite() || scaled <= 0.0 {
            return Err(ConversionError::NonPositive(scaled));
        }
        Ok(scaled)
    }

    pub fn parse_boolean(text: &str) -> Option<bool> {
        let token = text.trim().to_uppercase();
        if TRUE_TOKENS.contains(&token.as_str()) {
            Some(true)
        } else if FALSE_TOKENS.contains(&token.as_str()) {
            Some(false)
        } else {
            None
        }
    }

    /// `60 Hz`, `50Hz`, `60,00 Hz` or a bare number.
    pub fn parse_frequency(text: &str) -> Option<f64> {
        let trimmed = text.trim();
        let digits = trimmed
            .strip_suffix("Hz")
            .or_else(|| trimmed.strip_suffix("hz"))
            .or_else(|| trimmed.strip_suffix("HZ"))
            .unwrap_or(trimmed)
            .trim()
            .replace(',', ".");
        digits.parse::<f64>().ok().filter(|hz| hz.is_finite() && *hz > 0.0)
    }

    /// `0.63In` becomes (`0.63`, `In`); text without a leading number is
    /// returned whole with no unit.
    pub fn split_value_unit(&self, value: &str) -> (String, Option<String>) {
        let trimmed = value.trim();
        match self.value_with_unit.captures(trimmed) {
            Some(captures) => {
                let number = captures.get(1).map(|m| m.as_str()).unwrap_or(trimmed);
                let unit = captures.get(2).map(|m| m.as_str().to_string());
                (number.to_string(), unit)
            }
            None => (trimmed.to_string(), None),
        }
    }

    pub fn infer_parameter_type(&self, name: &str, value: &str, unit: Option<&str>) -> ParameterType {
        let lowered = name.to_lowercase();

        if unit.is_some_and(|unit| TIME_UNITS.contains(&unit))
            || ["delay", "time", "tms", "tempo", "tempor"]
                .iter()
                .any(|needle| lowered.contains(needle))
        {
            return ParameterType::Delay;
        }
        if ["curve", "courbe", "characteristic", "char"]
            .iter()
            .any(|needle| lowered.contains(needle))
            || self.curve_value.is_match(value)
        {
            return ParameterType::Curve;
        }
        if Self::parse_boolean(value).is_some() {
            return ParameterType::Logic;
        }
        if unit.is_some() || value.trim().parse::<f64>().is_ok() {
            return ParameterType::Setpoint;
        }
        ParameterType::Mode
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn converter() -> UnitConverter {
        UnitConverter::new().expect("regexes compile")
    }

    #[test]
    fn current_ratio_with_colon() {
        let ratio = converter().parse_ratio("1500:5", RatioKind::Current).expect("parses");
        assert_eq!(ratio, Ratio { primary: 1500.0, secondary: 5.0, ratio: 300.0 });
    }

    #[test]
    fn voltage_ratio_strips_units() {
        let ratio = converter()
            .parse_ratio("13800V:120V", RatioKind::Voltage)
            .expect("parses");
        assert_eq!(ratio.primary, 13800.0);
        assert_eq!(ratio.secondary, 120.0);
        assert_eq!(ratio.ratio, 115.0);
    }

    #[test]
    fn spaced_units_and_slash_separator() {
        let converter = converter();
        let spaced = converter
            .parse_ratio("13.8 kV : 115 V", RatioKind::Voltage)
            .expect("parses");
        assert_eq!(spaced.primary, 13800.0);
        let slash = converter.parse_ratio("600/1", RatioKind::Current).expect("parses");
        assert_eq!(slash.ratio, 600.0);
    }

    #[test]
    fn ratio_failures_are_typed() {
        let converter = converter();
        assert!(matches!(
            converter.parse_ratio("abc:5", RatioKind::Current),
            Err(ConversionError::NotNumeric(_))
        ));
        assert!(matches!(
            converter.parse_ratio("1500", RatioKind::Current),
            Err(ConversionError::MissingSeparator(_))
        ));
        assert!(matches!(
            converter.parse_ratio("1500:0", RatioKind::Current),
            Err(ConversionError::NonPositive(_))
        ));
    }

    #[test]
    fn kilo_ratings_are_scaled() {
        let converter = converter();
        assert_eq!(converter.parse_rating("1.000 kA", RatioKind::Current), Ok(1000.0));
        assert_eq!(converter.parse_rating("13.80 KV", RatioKind::Voltage), Ok(13800.0));
        assert_eq!(converter.parse_rating("0,5 A", RatioKind::Current), Ok(0.5));
    }

    #[test]
    fn boolean_tokens_cover_vendor_phrasing() {
        assert_eq!(UnitConverter::parse_boolean(" yes "), Some(true));
        assert_eq!(UnitConverter::parse_boolean("Enabled"), Some(true));
        assert_eq!(UnitConverter::parse_boolean("en service"), Some(true));
        assert_eq!(UnitConverter::parse_boolean("Hors service"), Some(false));
        assert_eq!(UnitConverter::parse_boolean("0"), Some(false));
        assert_eq!(UnitConverter::parse_boolean("maybe"), None);
    }

    #[test]
    fn frequency_accepts_hz_suffix() {
        assert_eq!(UnitConverter::parse_frequency("60 Hz"), Some(60.0));
        assert_eq!(UnitConverter::parse_frequency("50Hz"), Some(50.0));
        assert_eq!(UnitConverter::parse_frequency("fifty"), None);
    }

    #[test]
    fn values_split_into_number_and_unit() {
        let converter = converter();
        assert_eq!(converter.split_value_unit("0.63In"), ("0.63".to_string(), Some("In".to_string())));
        assert_eq!(converter.split_value_unit("100 ms"), ("100".to_string(), Some("ms".to_string())));
        assert_eq!(converter.split_value_unit("IEC S Inverse"), ("IEC S Inverse".to_string(), None));
    }

    #[test]
    fn parameter_types_follow_name_and_unit() {
        let converter = converter();
        assert_eq!(converter.infer_parameter_type("tI>", "100", Some("ms")), ParameterType::Delay);
        assert_eq!(converter.infer_parameter_type("I> Time Delay", "1.00", Some("s")), ParameterType::Delay);
        assert_eq!(converter.infer_parameter_type("I> Curve", "IEC SI", None), ParameterType::Curve);
        assert_eq!(converter.infer_parameter_type("I> Function", "YES", None), ParameterType::Logic);
        assert_eq!(converter.infer_parameter_type("I>", "0.63", Some("In")), ParameterType::Setpoint);
        assert_eq!(converter.infer_parameter_type("I> Direction", "Forward", None), ParameterType::Mode);
    }
}
