use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Invalid language code: '{0}'")]
pub struct LanguageError(pub String);

/// An OCR engine language pack identifier (`por`, `eng`, `chi_sim`, …).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LanguageCode(String);

impl LanguageCode {
    pub fn new(code: &str) -> Result<Self, LanguageError> {
        let (base, script) = match code.split_once('_') {
            Some((base, script)) => (base, Some(script)),
            None => (code, None),
        };
        let base_ok = base.len() == 3 && base.chars().all(|c| c.is_ascii_lowercase());
        let script_ok = script
            .map(|s| !s.is_empty() && s.chars().all(|c| c.is_ascii_alphabetic()))
            .unwrap_or(true);
        if base_ok && script_ok {
            Ok(LanguageCode(code.to_string()))
        } else {
            Err(LanguageError(code.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Joins languages into the `a+b+c` form the engine expects; order is priority.
    pub fn join(languages: &[LanguageCode]) -> String {
        languages
            .iter()
            .map(LanguageCode::as_str)
            .collect::<Vec<_>>()
            .join("+")
    }

    /// Portuguese first, English as fallback.
    pub fn invoice_default() -> Vec<LanguageCode> {
        vec![LanguageCode("por".into()), LanguageCode("eng".into())]
    }
}

impl fmt::Display for LanguageCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for LanguageCode {
    type Err = LanguageError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LanguageCode::new(s)
    }
}

impl TryFrom<String> for LanguageCode {
    type Error = LanguageError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        LanguageCode::new(&s)
    }
}

impl From<LanguageCode> for String {
    fn from(code: LanguageCode) -> Self {
        code.0
    }
}
