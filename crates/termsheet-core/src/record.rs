use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Label -> matched text. Ordered so stored and serialized output is stable.
pub type Entities = BTreeMap<String, String>;

/// Review state of a stored extraction. Every record starts out `Pending`;
/// moving it on is the job of whoever reviews it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValidationStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

impl ValidationStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Approved => "Approved",
            Self::Rejected => "Rejected",
        }
    }
}

impl std::fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ValidationStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(Self::Pending),
            "Approved" => Ok(Self::Approved),
            "Rejected" => Ok(Self::Rejected),
            _ => Err(crate::Error::InvalidValidationStatus(s.to_string())),
        }
    }
}

/// An extraction assembled by the pipeline but not yet persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewExtraction {
    pub document_name: String,
    pub document_type: String,
    pub extracted_text: String,
    pub ocr_confidence: f64,
    pub entities: Entities,
    pub validation_status: ValidationStatus,
}

impl NewExtraction {
    #[must_use]
    pub fn new(document_name: String, document_type: String) -> Self {
        Self {
            document_name,
            document_type,
            extracted_text: String::new(),
            ocr_confidence: 0.0,
            entities: Entities::new(),
            validation_status: ValidationStatus::Pending,
        }
    }

    #[must_use]
    pub fn with_text(mut self, text: String, confidence: f64) -> Self {
        self.extracted_text = text;
        self.ocr_confidence = confidence;
        self
    }

    #[must_use]
    pub fn with_entities(mut self, entities: Entities) -> Self {
        self.entities = entities;
        self
    }

    /// Attach the identity handed out by a store.
    #[must_use]
    pub fn into_stored(self, id: String, created_at: DateTime<Utc>) -> ExtractionResult {
        ExtractionResult {
            id,
            document_name: self.document_name,
            document_type: self.document_type,
            extracted_text: self.extracted_text,
            ocr_confidence: self.ocr_confidence,
            entities: self.entities,
            validation_status: self.validation_status,
            created_at,
        }
    }
}

/// A persisted extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub id: String,
    pub document_name: String,
    pub document_type: String,
    pub extracted_text: String,
    pub ocr_confidence: f64,
    pub entities: Entities,
    pub validation_status: ValidationStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEmailRecord {
    pub subject: Option<String>,
    pub sender: Option<String>,
    pub body: String,
    pub entities: Entities,
}

impl NewEmailRecord {
    #[must_use]
    pub fn into_stored(self, id: String, created_at: DateTime<Utc>) -> EmailRecord {
        EmailRecord {
            id,
            subject: self.subject,
            sender: self.sender,
            body: self.body,
            entities: self.entities,
            created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailRecord {
    pub id: String,
    pub subject: Option<String>,
    pub sender: Option<String>,
    pub body: String,
    pub entities: Entities,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            ValidationStatus::Pending,
            ValidationStatus::Approved,
            ValidationStatus::Rejected,
        ] {
            assert_eq!(status.as_str().parse::<ValidationStatus>().unwrap(), status);
        }
        assert!("pending".parse::<ValidationStatus>().is_err());
    }

    #[test]
    fn test_new_extraction_starts_pending() {
        let draft = NewExtraction::new("deal.png".into(), "image/png".into());
        assert_eq!(draft.validation_status, ValidationStatus::Pending);
        assert!((draft.ocr_confidence - 0.0).abs() < f64::EPSILON);
        assert!(draft.entities.is_empty());
    }

    #[test]
    fn test_status_serializes_as_name() {
        let json = serde_json::to_string(&ValidationStatus::Pending).unwrap();
        assert_eq!(json, "\"Pending\"");
    }
}
