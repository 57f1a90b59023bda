//! Field validators: pure functions from one raw answer to a normalized value
//! or a rejection reason.

use super::types::{ChoiceOption, ValidatorSpec};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Accepted date-time formats, most specific first.
const DATETIME_FORMATS: &[&str] = &[
    "%d/%m/%Y %H:%M",
    "%Y-%m-%d %H:%M",
    "%d-%m-%Y %H:%M",
    "%d.%m.%Y %H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
];

/// Date-only formats; the time defaults to midnight.
const DATE_FORMATS: &[&str] = &["%d/%m/%Y", "%Y-%m-%d", "%d-%m-%Y", "%d.%m.%Y"];

/// Display format for collected date-times.
pub const DISPLAY_DATETIME: &str = "%d/%m/%Y %H:%M";

/// Minimum characters for a typed place name.
const MIN_PLACE_LEN: usize = 2;

/// A validated, normalized answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Text(String),
    /// Ten ASCII digits.
    Phone(String),
    /// Canonical option id.
    Choice(String),
    Number(u64),
    DateTime(NaiveDateTime),
    Location(LocationValue),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LocationValue {
    Coordinates { latitude: f64, longitude: f64 },
    Named { name: String },
    NotProvided,
}

impl FieldValue {
    /// Key used to match branch transitions.
    pub fn match_key(&self) -> Option<&str> {
        match self {
            FieldValue::Choice(id) => Some(id),
            FieldValue::Text(t) => Some(t),
            _ => None,
        }
    }

    /// Flat string form used in stored records.
    pub fn to_record_string(&self) -> String {
        match self {
            FieldValue::DateTime(dt) => dt.format("%Y-%m-%dT%H:%M:%S").to_string(),
            FieldValue::Location(LocationValue::NotProvided) => String::new(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Text(s) | FieldValue::Phone(s) | FieldValue::Choice(s) => f.write_str(s),
            FieldValue::Number(n) => write!(f, "{n}"),
            FieldValue::DateTime(dt) => write!(f, "{}", dt.format(DISPLAY_DATETIME)),
            FieldValue::Location(LocationValue::Coordinates {
                latitude,
                longitude,
            }) => write!(f, "{latitude:.6}, {longitude:.6}"),
            FieldValue::Location(LocationValue::Named { name }) => f.write_str(name),
            FieldValue::Location(LocationValue::NotProvided) => f.write_str("not provided"),
        }
    }
}

/// One raw answer as delivered by the transport.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RawInput<'a> {
    Text(&'a str),
    Selection(&'a str),
    Location { latitude: f64, longitude: f64 },
    /// Explicit "skip" for a side-effect field.
    Skip,
}

/// Why an answer was refused. Each maps to a re-prompt message key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    Empty,
    TooShort { min: usize },
    InvalidPhone,
    InvalidChoice,
    NotANumber,
    TooManyDigits { max: u32 },
    InvalidDateTime,
    InvalidCoordinates,
    LocationExpected,
    /// A button press on a field that takes typed text.
    TypedAnswerExpected,
}

impl Rejection {
    pub fn reason_key(&self) -> &'static str {
        match self {
            Rejection::Empty => "invalid.empty",
            Rejection::TooShort { .. } => "invalid.too_short",
            Rejection::InvalidPhone => "invalid.phone",
            Rejection::InvalidChoice => "invalid.choice",
            Rejection::NotANumber => "invalid.number",
            Rejection::TooManyDigits { .. } => "invalid.too_many_digits",
            Rejection::InvalidDateTime => "invalid.datetime",
            Rejection::InvalidCoordinates => "invalid.coordinates",
            Rejection::LocationExpected => "invalid.location",
            Rejection::TypedAnswerExpected => "invalid.typed_answer",
        }
    }

    pub fn params(&self) -> Vec<(String, String)> {
        match self {
            Rejection::TooShort { min } => vec![("min".into(), min.to_string())],
            Rejection::TooManyDigits { max } => vec![("max".into(), max.to_string())],
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.reason_key())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ValidationResult {
    Accepted(FieldValue),
    Rejected(Rejection),
}

/// Handling of numbers longer than a field's digit bound.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NumericOverflow {
    /// Saturate to the largest value with `max_digits` digits.
    #[default]
    Clip,
    Reject,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidationPolicy {
    pub numeric_overflow: NumericOverflow,
}

/// Validate one answer against a field's rule.
pub fn validate(spec: &ValidatorSpec, input: RawInput<'_>, policy: &ValidationPolicy) -> ValidationResult {
    use ValidationResult::{Accepted, Rejected};

    if let ValidatorSpec::Location = spec {
        return validate_location(input);
    }

    let text = match input {
        RawInput::Text(t) => t.trim(),
        RawInput::Selection(id) if matches!(spec, ValidatorSpec::Choice { .. }) => id.trim(),
        RawInput::Selection(_) => return Rejected(Rejection::TypedAnswerExpected),
        RawInput::Location { .. } => return Rejected(Rejection::LocationExpected),
        RawInput::Skip => return Rejected(Rejection::Empty),
    };

    match spec {
        ValidatorSpec::Text { min_len } => validate_text(text, *min_len),
        ValidatorSpec::Phone => match normalize_phone(text) {
            Some(digits) => Accepted(FieldValue::Phone(digits)),
            None if text.is_empty() => Rejected(Rejection::Empty),
            None => Rejected(Rejection::InvalidPhone),
        },
        ValidatorSpec::Choice { options } => match match_option(options, text) {
            Some(opt) => Accepted(FieldValue::Choice(opt.id.clone())),
            None => Rejected(Rejection::InvalidChoice),
        },
        ValidatorSpec::Numeric { max_digits } => validate_numeric(text, *max_digits, policy),
        ValidatorSpec::DateTime => match parse_datetime(text) {
            Some(dt) => Accepted(FieldValue::DateTime(dt)),
            None if text.is_empty() => Rejected(Rejection::Empty),
            None => Rejected(Rejection::InvalidDateTime),
        },
        ValidatorSpec::FreeForm => Accepted(FieldValue::Text(text.to_string())),
        ValidatorSpec::Location => validate_location(input),
    }
}

fn validate_text(text: &str, min_len: usize) -> ValidationResult {
    let len = text.chars().count();
    if len == 0 {
        ValidationResult::Rejected(Rejection::Empty)
    } else if len < min_len {
        ValidationResult::Rejected(Rejection::TooShort { min: min_len })
    } else {
        ValidationResult::Accepted(FieldValue::Text(text.to_string()))
    }
}

fn validate_location(input: RawInput<'_>) -> ValidationResult {
    use ValidationResult::{Accepted, Rejected};
    match input {
        RawInput::Location {
            latitude,
            longitude,
        } => {
            let in_range = (-90.0..=90.0).contains(&latitude) && (-180.0..=180.0).contains(&longitude);
            if in_range {
                Accepted(FieldValue::Location(LocationValue::Coordinates {
                    latitude,
                    longitude,
                }))
            } else {
                Rejected(Rejection::InvalidCoordinates)
            }
        }
        RawInput::Skip => Accepted(FieldValue::Location(LocationValue::NotProvided)),
        RawInput::Selection(_) => Rejected(Rejection::LocationExpected),
        RawInput::Text(t) => {
            let name = t.trim();
            if name.is_empty() {
                Rejected(Rejection::Empty)
            } else if name.chars().count() < MIN_PLACE_LEN {
                Rejected(Rejection::TooShort { min: MIN_PLACE_LEN })
            } else {
                Accepted(FieldValue::Location(LocationValue::Named {
                    name: name.to_string(),
                }))
            }
        }
    }
}

/// Strip separators and a leading country or trunk prefix; `Some` only for
/// exactly ten digits.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let mut digits: String = raw
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')' | '.'))
        .collect();
    if let Some(rest) = digits.strip_prefix('+') {
        digits = rest.to_string();
    }
    if digits.len() == 12 && digits.starts_with("91") {
        digits.drain(..2);
    } else if digits.len() == 11 && digits.starts_with('0') {
        digits.drain(..1);
    }
    (digits.len() == 10 && digits.bytes().all(|b| b.is_ascii_digit())).then_some(digits)
}

/// Match by option id, 1-based position, or alias; all case-insensitive.
pub fn match_option<'a>(options: &'a [ChoiceOption], raw: &str) -> Option<&'a ChoiceOption> {
    let needle = raw.trim();
    if needle.is_empty() {
        return None;
    }
    if let Ok(n) = needle.parse::<usize>() {
        if n >= 1 {
            if let Some(opt) = options.get(n - 1) {
                return Some(opt);
            }
        }
    }
    let lowered = needle.to_lowercase();
    options.iter().find(|opt| {
        opt.id.to_lowercase() == lowered || opt.aliases.iter().any(|a| a.to_lowercase() == lowered)
    })
}

fn validate_numeric(text: &str, max_digits: u32, policy: &ValidationPolicy) -> ValidationResult {
    use ValidationResult::{Accepted, Rejected};
    let compact: String = text.chars().filter(|c| !c.is_whitespace() && *c != ',').collect();
    if compact.is_empty() {
        return Rejected(Rejection::Empty);
    }
    if !compact.bytes().all(|b| b.is_ascii_digit()) {
        return Rejected(Rejection::NotANumber);
    }
    let significant = compact.trim_start_matches('0');
    if significant.len() > max_digits as usize {
        return match policy.numeric_overflow {
            NumericOverflow::Clip => Accepted(FieldValue::Number(largest_with_digits(max_digits))),
            NumericOverflow::Reject => Rejected(Rejection::TooManyDigits { max: max_digits }),
        };
    }
    match significant.parse::<u64>() {
        Ok(n) => Accepted(FieldValue::Number(n)),
        Err(_) if significant.is_empty() => Accepted(FieldValue::Number(0)),
        Err(_) => Rejected(Rejection::NotANumber),
    }
}

fn largest_with_digits(digits: u32) -> u64 {
    10u64.saturating_pow(digits).saturating_sub(1)
}

pub fn parse_datetime(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}
