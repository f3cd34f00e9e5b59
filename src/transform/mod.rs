//! Named value transformations a mapping entry may request.
//!
//! Every transformation is total: any input string produces a value.

pub mod string_ops;

use std::{fmt, str::FromStr};

use anyhow::{Result, anyhow};
use serde_json::{Number, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transformation {
    SplitNameFirst,
    SplitNameLast,
    NormalizeDate,
    NormalizeStatus,
    NormalizePhone,
    ToNumber,
    ToLowercase,
}

impl Transformation {
    pub const ALL: [Transformation; 7] = [
        Transformation::SplitNameFirst,
        Transformation::SplitNameLast,
        Transformation::NormalizeDate,
        Transformation::NormalizeStatus,
        Transformation::NormalizePhone,
        Transformation::ToNumber,
        Transformation::ToLowercase,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Transformation::SplitNameFirst => "split_name_first",
            Transformation::SplitNameLast => "split_name_last",
            Transformation::NormalizeDate => "normalize_date",
            Transformation::NormalizeStatus => "normalize_status",
            Transformation::NormalizePhone => "normalize_phone",
            Transformation::ToNumber => "to_number",
            Transformation::ToLowercase => "to_lowercase",
        }
    }

    /// Looks up a transformation by name; unknown names yield `None`.
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL
            .into_iter()
            .find(|candidate| candidate.as_str().eq_ignore_ascii_case(name))
    }

    pub fn apply(&self, value: &str) -> Value {
        let trimmed = value.trim();
        match self {
            Transformation::SplitNameFirst => {
                Value::String(string_ops::split_name_first(trimmed).into_owned())
            }
            Transformation::SplitNameLast => {
                Value::String(string_ops::split_name_last(trimmed).into_owned())
            }
            Transformation::NormalizeDate => {
                Value::String(string_ops::normalize_date(trimmed).into_owned())
            }
            Transformation::NormalizeStatus => {
                Value::String(string_ops::normalize_status(trimmed).into_owned())
            }
            Transformation::NormalizePhone => {
                Value::String(string_ops::normalize_phone(trimmed).into_owned())
            }
            Transformation::ToNumber => string_ops::parse_number(trimmed)
                .and_then(Number::from_f64)
                .map(Value::Number)
                .unwrap_or_else(|| Value::String(trimmed.to_string())),
            Transformation::ToLowercase => {
                Value::String(string_ops::lowercase(trimmed).into_owned())
            }
        }
    }
}

impl fmt::Display for Transformation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Transformation {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_name(s).ok_or_else(|| anyhow!("Unknown transformation '{s}'"))
    }
}

/// Applies an optional, possibly unknown, transformation name.
/// Absent or unrecognized names pass the trimmed value through.
pub fn apply_named(name: Option<&str>, value: &str) -> Value {
    match name.and_then(Transformation::from_name) {
        Some(transformation) => transformation.apply(value),
        None => Value::String(string_ops::trim(value).into_owned()),
    }
}
