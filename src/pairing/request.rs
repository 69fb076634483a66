//! Pairing requests and target identifier handling.

use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PairingError;

static TARGET_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9]{8,15}$").expect("target pattern is a valid regex")
});

/// Canonical form the transport expects for a target identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetFormat {
    /// Digits only, e.g. `263714757857`.
    Digits,
    /// Digits with a leading `+`, e.g. `+263714757857`.
    #[serde(rename = "plus")]
    LeadingPlus,
}

impl FromStr for TargetFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "digits" => Ok(Self::Digits),
            "plus" | "leading-plus" => Ok(Self::LeadingPlus),
            other => Err(format!("unknown target format '{}' (expected plus|digits)", other)),
        }
    }
}

impl std::fmt::Display for TargetFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetFormat::Digits => write!(f, "digits"),
            TargetFormat::LeadingPlus => write!(f, "plus"),
        }
    }
}

/// A validated target identifier: 8 to 15 ASCII digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct TargetId(String);

impl TargetId {
    /// Validate a raw identifier: 8 to 15 ASCII digits, nothing else.
    pub fn parse(raw: &str) -> Result<Self, PairingError> {
        if TARGET_PATTERN.is_match(raw) {
            Ok(Self(raw.to_string()))
        } else {
            Err(PairingError::InvalidInput {
                reason: "Invalid or missing number parameter".to_string(),
            })
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Render the identifier in the form the transport expects.
    ///
    /// Non-digit characters are stripped before the format is applied.
    pub fn normalized(&self, format: TargetFormat) -> String {
        let digits: String = self.0.chars().filter(|c| c.is_ascii_digit()).collect();
        match format {
            TargetFormat::Digits => digits,
            TargetFormat::LeadingPlus => format!("+{}", digits),
        }
    }
}

impl std::fmt::Display for TargetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One immutable pairing request.
#[derive(Debug, Clone)]
pub struct PairingRequest {
    pub id: Uuid,
    pub target: TargetId,
    pub requested_at: DateTime<Utc>,
}

impl PairingRequest {
    pub fn new(target: TargetId) -> Self {
        Self {
            id: Uuid::new_v4(),
            target,
            requested_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_eight_to_fifteen_digits() {
        for raw in ["12345678", "263714757857", "123456789012345"] {
            assert!(TargetId::parse(raw).is_ok(), "{} should be valid", raw);
        }
    }

    #[test]
    fn rejects_malformed_targets() {
        let cases = [
            "",
            "1234567",
            "1234567890123456",
            "+263714757857",
            "2637 1475 7857",
            "26371475785a",
            "263714757857\n",
            "\u{0662}\u{0666}\u{0663}\u{0667}\u{0661}\u{0664}\u{0667}\u{0665}",
        ];
        for raw in cases {
            let err = TargetId::parse(raw).unwrap_err();
            assert!(
                matches!(err, PairingError::InvalidInput { .. }),
                "{:?} should be rejected",
                raw
            );
        }
    }

    #[test]
    fn normalization_respects_format() {
        let target = TargetId::parse("263714757857").unwrap();
        assert_eq!(target.normalized(TargetFormat::Digits), "263714757857");
        assert_eq!(target.normalized(TargetFormat::LeadingPlus), "+263714757857");
    }

    #[test]
    fn target_format_parse() {
        assert_eq!("plus".parse::<TargetFormat>().unwrap(), TargetFormat::LeadingPlus);
        assert_eq!("DIGITS".parse::<TargetFormat>().unwrap(), TargetFormat::Digits);
        assert!("e164".parse::<TargetFormat>().is_err());
    }

    #[test]
    fn new_request_gets_unique_id() {
        let target = TargetId::parse("15550001234").unwrap();
        let a = PairingRequest::new(target.clone());
        let b = PairingRequest::new(target);
        assert_ne!(a.id, b.id);
    }
}
