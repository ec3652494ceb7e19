//! # Targets
//!
//! The business entity (a CASE or a LOT) that events and settlements refer to.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

/// Kind of business entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TargetType {
    /// A collection case.
    Case,
    /// A physical lot.
    Lot,
}

impl TargetType {
    /// The canonical string name of this target type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Case => "CASE",
            Self::Lot => "LOT",
        }
    }
}

impl std::fmt::Display for TargetType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetType {
    type Err = ValidationError;

    /// Accepts `CASE` / `LOT` in any case, and the plural route forms.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CASE" | "CASES" => Ok(Self::Case),
            "LOT" | "LOTS" => Ok(Self::Lot),
            _ => Err(ValidationError::InvalidTargetType(s.to_string())),
        }
    }
}

/// A reference to one business entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TargetRef {
    /// Kind of entity.
    pub target_type: TargetType,
    /// Entity identifier.
    pub target_id: Uuid,
}

impl TargetRef {
    /// Build a reference.
    pub fn new(target_type: TargetType, target_id: Uuid) -> Self {
        Self {
            target_type,
            target_id,
        }
    }

    /// Parse a reference from raw path segments.
    pub fn parse(target_type: &str, target_id: &str) -> Result<Self, ValidationError> {
        let target_type = target_type.parse()?;
        let target_id =
            Uuid::parse_str(target_id.trim()).map_err(|_| ValidationError::InvalidIdentifier {
                kind: "target id",
                value: target_id.to_string(),
            })?;
        Ok(Self::new(target_type, target_id))
    }
}

impl std::fmt::Display for TargetRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.target_type, self.target_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_type_parses_case_insensitively() {
        assert_eq!("case".parse::<TargetType>().unwrap(), TargetType::Case);
        assert_eq!("LOT".parse::<TargetType>().unwrap(), TargetType::Lot);
        assert_eq!("lots".parse::<TargetType>().unwrap(), TargetType::Lot);
        assert!("pallet".parse::<TargetType>().is_err());
    }

    #[test]
    fn target_type_serializes_screaming() {
        assert_eq!(serde_json::to_string(&TargetType::Case).unwrap(), "\"CASE\"");
    }

    #[test]
    fn target_ref_parse() {
        let id = Uuid::new_v4();
        let r = TargetRef::parse("CASE", &id.to_string()).unwrap();
        assert_eq!(r.target_id, id);
        assert_eq!(r.to_string(), format!("CASE:{id}"));
        assert!(TargetRef::parse("CASE", "nope").is_err());
    }
}
