//! Subject keys identify the logical job slot (one active job per key).

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Maximum length of a ticker symbol in characters.
pub const MAX_SUBJECT_LENGTH: usize = 12;

/// Ticker symbols: upper-case letters, digits, `.` and `-` (e.g. `BRK.B`, `RDS-A`).
pub const SUBJECT_PATTERN: &str = r"^[A-Z0-9][A-Z0-9.\-]*$";

static SUBJECT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(SUBJECT_PATTERN).expect("valid regex"));

/// Normalised ticker symbol.
///
/// Two requests with equal keys occupy the same job slot, so the key is
/// trimmed and upper-cased on construction (`" aapl "` and `"AAPL"` are
/// the same subject).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SubjectKey(String);

impl SubjectKey {
    /// Normalise and validate a raw ticker.
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        let normalised = raw.trim().to_ascii_uppercase();
        if normalised.is_empty() {
            return Err(CoreError::Validation(
                "Ticker must not be empty".to_string(),
            ));
        }
        if normalised.len() > MAX_SUBJECT_LENGTH {
            return Err(CoreError::Validation(format!(
                "Ticker exceeds maximum length of {MAX_SUBJECT_LENGTH} characters (got {})",
                normalised.len()
            )));
        }
        if !SUBJECT_RE.is_match(&normalised) {
            return Err(CoreError::Validation(format!(
                "Ticker '{normalised}' contains invalid characters"
            )));
        }
        Ok(Self(normalised))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SubjectKey {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SubjectKey> for String {
    fn from(key: SubjectKey) -> Self {
        key.0
    }
}

impl AsRef<str> for SubjectKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_normalises_case_and_whitespace() {
        let key = SubjectKey::parse("  aapl ").unwrap();
        assert_eq!(key.as_str(), "AAPL");
        assert_eq!(key, SubjectKey::parse("AAPL").unwrap());
    }

    #[test]
    fn parse_accepts_class_shares() {
        assert!(SubjectKey::parse("brk.b").is_ok());
        assert!(SubjectKey::parse("RDS-A").is_ok());
    }

    #[test]
    fn parse_rejects_empty() {
        assert!(matches!(
            SubjectKey::parse("   "),
            Err(CoreError::Validation(_))
        ));
    }

    #[test]
    fn parse_rejects_too_long() {
        let err = SubjectKey::parse("ABCDEFGHIJKLM").unwrap_err();
        assert!(err.to_string().contains("maximum length"));
    }

    #[test]
    fn parse_rejects_invalid_characters() {
        assert!(SubjectKey::parse("AA PL").is_err());
        assert!(SubjectKey::parse("../etc").is_err());
        assert!(SubjectKey::parse(".AAPL").is_err());
    }

    #[test]
    fn deserialize_validates() {
        let key: SubjectKey = serde_json::from_str("\"msft\"").unwrap();
        assert_eq!(key.as_str(), "MSFT");
        assert!(serde_json::from_str::<SubjectKey>("\"a b\"").is_err());
    }
}
