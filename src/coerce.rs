//! Cell value coercion
//!
//! Converts a raw spreadsheet cell into the representation a declared remote
//! field type requires. Coercion never fails hard: an unusable value becomes
//! `None` (the field is left out of the outgoing record), optionally with a
//! warning for the run log.
//!
//! Failure policy differs by type: `number`/`currency` fall back to `None`,
//! `percent` falls back to 0.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::schema::FieldType;
use crate::types::{CellValue, FieldValue};

static NON_NUMERIC: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^0-9.\-]+").unwrap());

static NON_DIGIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^0-9]").unwrap());

/// Longest decimal literal at the start of a string
static DECIMAL_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[+-]?(?:Infinity|(?:[0-9]+\.?[0-9]*|\.[0-9]+)(?:[eE][+-]?[0-9]+)?)").unwrap()
});

/// A non-fatal problem met while coercing a value
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoercionWarning {
    /// Column the value came from, filled in by the caller when known
    pub field: Option<String>,
    pub raw: String,
    pub message: String,
}

impl CoercionWarning {
    fn new(raw: &CellValue, message: impl Into<String>) -> Self {
        Self {
            field: None,
            raw: raw.to_text(),
            message: message.into(),
        }
    }

    pub fn for_field(mut self, field: &str) -> Self {
        self.field = Some(field.to_string());
        self
    }
}

impl std::fmt::Display for CoercionWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.field {
            Some(field) => write!(f, "{} ({:?}): {}", field, self.raw, self.message),
            None => write!(f, "{:?}: {}", self.raw, self.message),
        }
    }
}

/// Result of coercing one cell
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Coercion {
    pub value: Option<FieldValue>,
    pub warning: Option<CoercionWarning>,
}

impl Coercion {
    fn value(value: FieldValue) -> Self {
        Self {
            value: Some(value),
            warning: None,
        }
    }

    fn omitted() -> Self {
        Self::default()
    }

    fn rejected(warning: CoercionWarning) -> Self {
        Self {
            value: None,
            warning: Some(warning),
        }
    }
}

/// Coerce a raw cell for a declared field type
pub fn coerce(raw: &CellValue, field_type: &FieldType) -> Coercion {
    if raw.is_blank() {
        return Coercion::omitted();
    }

    tracing::trace!("Converting {} value: {:?}", field_type, raw);

    match field_type {
        FieldType::Name => Coercion::value(FieldValue::Text(raw.to_text())),
        FieldType::Number | FieldType::Currency => {
            let text = raw.to_text();
            let stripped = NON_NUMERIC.replace_all(&text, "");
            match parse_float_prefix(&stripped) {
                Some(n) => Coercion::value(FieldValue::Number(n)),
                None => Coercion::rejected(CoercionWarning::new(
                    raw,
                    format!("could not parse {} value", field_type),
                )),
            }
        }
        FieldType::Percent => {
            let n = parse_float_prefix(&raw.to_text()).unwrap_or(0.0);
            Coercion::value(FieldValue::Number(n))
        }
        FieldType::PhoneNumber => Coercion::value(FieldValue::Text(format_phone_number(raw))),
        FieldType::Checkbox => Coercion::value(FieldValue::Bool(raw.to_text() == "true")),
        FieldType::SingleSelect | FieldType::Email => {
            Coercion::value(FieldValue::Text(raw.to_text().trim().to_string()))
        }
        FieldType::MultipleSelects => {
            let items = match raw {
                CellValue::List(items) => items
                    .iter()
                    .map(|item| item.to_text().trim().to_string())
                    .collect(),
                other => other
                    .to_text()
                    .split(',')
                    .map(|part| part.trim().to_string())
                    .collect(),
            };
            Coercion::value(FieldValue::List(items))
        }
        FieldType::Text | FieldType::Other(_) => Coercion::value(FieldValue::Text(raw.to_text())),
    }
}

/// Digits only. The leading '+' strip runs after the digit filter and never
/// matches.
fn format_phone_number(raw: &CellValue) -> String {
    let digits = NON_DIGIT.replace_all(&raw.to_text(), "").into_owned();
    match digits.strip_prefix('+') {
        Some(rest) => rest.to_string(),
        None => digits,
    }
}

/// Re-parse a cell for the fields that bypass the generic numeric rule.
/// Numeric cells pass through; anything else is prefix-parsed as is,
/// without stripping currency symbols.
pub fn overlay_number(raw: &CellValue) -> Option<f64> {
    match raw {
        CellValue::Number(n) => Some(*n),
        other => parse_float_prefix(&other.to_text()),
    }
}

/// Parse the longest decimal literal at the start of `s` (after leading
/// whitespace). `"1.2.3"` gives 1.2, `"12-3"` gives 12, `"-"` gives `None`.
pub fn parse_float_prefix(s: &str) -> Option<f64> {
    let trimmed = s.trim_start();
    let literal = DECIMAL_PREFIX.find(trimmed)?.as_str();

    let value = match literal.trim_start_matches(['+', '-']) {
        "Infinity" => {
            if literal.starts_with('-') {
                f64::NEG_INFINITY
            } else {
                f64::INFINITY
            }
        }
        _ => literal.parse::<f64>().ok()?,
    };

    (!value.is_nan()).then_some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value(raw: impl Into<CellValue>, ty: FieldType) -> Option<FieldValue> {
        coerce(&raw.into(), &ty).value
    }

    #[test]
    fn test_blank_is_omitted_for_every_type() {
        for ty in [
            FieldType::Checkbox,
            FieldType::Number,
            FieldType::Percent,
            FieldType::Text,
            FieldType::MultipleSelects,
        ] {
            let result = coerce(&CellValue::from(""), &ty);
            assert_eq!(result.value, None);
            assert_eq!(result.warning, None);
            assert_eq!(coerce(&CellValue::Empty, &ty).value, None);
        }
    }

    #[test]
    fn test_checkbox() {
        assert_eq!(value("true", FieldType::Checkbox), Some(FieldValue::Bool(true)));
        assert_eq!(value("false", FieldType::Checkbox), Some(FieldValue::Bool(false)));
        assert_eq!(value(true, FieldType::Checkbox), Some(FieldValue::Bool(true)));
        assert_eq!(value("TRUE", FieldType::Checkbox), Some(FieldValue::Bool(false)));
    }

    #[test]
    fn test_currency_strips_symbols() {
        assert_eq!(
            value("$1,234.56", FieldType::Currency),
            Some(FieldValue::Number(1234.56))
        );
        assert_eq!(value(42.0, FieldType::Number), Some(FieldValue::Number(42.0)));
        assert_eq!(value("-7 USD", FieldType::Number), Some(FieldValue::Number(-7.0)));
    }

    #[test]
    fn test_number_failure_warns() {
        let result = coerce(&"abc".into(), &FieldType::Number);
        assert_eq!(result.value, None);
        assert!(result.warning.is_some());
    }

    #[test]
    fn test_percent_falls_back_to_zero() {
        assert_eq!(value("abc", FieldType::Percent), Some(FieldValue::Number(0.0)));
        assert_eq!(value("12.5%", FieldType::Percent), Some(FieldValue::Number(12.5)));
        assert_eq!(value(0.25, FieldType::Percent), Some(FieldValue::Number(0.25)));
        assert_eq!(coerce(&"abc".into(), &FieldType::Percent).warning, None);
    }

    #[test]
    fn test_phone_number_keeps_digits() {
        assert_eq!(
            value("+1 (555) 010-2030", FieldType::PhoneNumber),
            Some(FieldValue::Text("15550102030".into()))
        );
        assert_eq!(
            value(5550100.0, FieldType::PhoneNumber),
            Some(FieldValue::Text("5550100".into()))
        );
    }

    #[test]
    fn test_select_and_email_trim() {
        assert_eq!(
            value("  Gold ", FieldType::SingleSelect),
            Some(FieldValue::Text("Gold".into()))
        );
        assert_eq!(
            value(" a@x.com\t", FieldType::Email),
            Some(FieldValue::Text("a@x.com".into()))
        );
    }

    #[test]
    fn test_multiple_selects() {
        assert_eq!(
            value("a, b ,c", FieldType::MultipleSelects),
            Some(FieldValue::List(vec!["a".into(), "b".into(), "c".into()]))
        );
        let list = CellValue::List(vec![" x ".into(), CellValue::Number(2.0)]);
        assert_eq!(
            coerce(&list, &FieldType::MultipleSelects).value,
            Some(FieldValue::List(vec!["x".into(), "2".into()]))
        );
    }

    #[test]
    fn test_default_is_untrimmed_text() {
        assert_eq!(
            value(" hello ", FieldType::Text),
            Some(FieldValue::Text(" hello ".into()))
        );
        assert_eq!(
            value(3.0, FieldType::Name),
            Some(FieldValue::Text("3".into()))
        );
        assert_eq!(
            value(false, FieldType::Other("date".into())),
            Some(FieldValue::Text("false".into()))
        );
    }

    #[test]
    fn test_parse_float_prefix() {
        assert_eq!(parse_float_prefix("1.2.3"), Some(1.2));
        assert_eq!(parse_float_prefix("  42abc"), Some(42.0));
        assert_eq!(parse_float_prefix(".5"), Some(0.5));
        assert_eq!(parse_float_prefix("1e3x"), Some(1000.0));
        assert_eq!(parse_float_prefix("-Infinity"), Some(f64::NEG_INFINITY));
        assert_eq!(parse_float_prefix("-"), None);
        assert_eq!(parse_float_prefix(""), None);
        assert_eq!(parse_float_prefix("$5"), None);
    }

    #[test]
    fn test_overlay_number() {
        assert_eq!(overlay_number(&CellValue::Number(9.5)), Some(9.5));
        assert_eq!(overlay_number(&"120.40".into()), Some(120.4));
        assert_eq!(overlay_number(&"$120".into()), None);
        assert_eq!(overlay_number(&true.into()), None);
    }
}
