use std::sync::Arc;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::record::Entities;

#[derive(Debug, Error)]
pub enum EntityError {
    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),
    #[error("Recognition failed: {0}")]
    Failed(String),
}

pub type EntityResult<T> = Result<T, EntityError>;

/// A labelled stretch of text found by a recognizer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecognizedSpan {
    pub label: String,
    pub text: String,
    pub start: usize,
    pub end: usize,
}

impl RecognizedSpan {
    #[must_use]
    pub fn new(label: impl Into<String>, text: impl Into<String>, start: usize, end: usize) -> Self {
        Self {
            label: label.into(),
            text: text.into(),
            start,
            end,
        }
    }
}

/// Named-entity recognition over plain text. Spans come back in text order.
#[async_trait::async_trait]
pub trait EntityRecognizer: Send + Sync {
    fn name(&self) -> &str;

    async fn recognize(&self, text: &str) -> EntityResult<Vec<RecognizedSpan>>;
}

/// Recognizes nothing; leaves extraction to the clause patterns.
pub struct NoopRecognizer;

#[async_trait::async_trait]
impl EntityRecognizer for NoopRecognizer {
    fn name(&self) -> &str {
        "none"
    }

    async fn recognize(&self, _text: &str) -> EntityResult<Vec<RecognizedSpan>> {
        Ok(Vec::new())
    }
}

pub struct EntityPattern {
    pub label: String,
    pub regex: Regex,
}

impl EntityPattern {
    pub fn new(label: impl Into<String>, pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            label: label.into(),
            regex: Regex::new(pattern)?,
        })
    }
}

/// Rule-based tagger for the entity kinds that matter in deal documents.
pub struct PatternRecognizer {
    patterns: Vec<EntityPattern>,
}

const MONTHS: &str = "January|February|March|April|May|June|July|August|September|October|November|December";

impl PatternRecognizer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            patterns: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_pattern(mut self, pattern: EntityPattern) -> Self {
        self.patterns.push(pattern);
        self
    }

    pub fn with_default_patterns() -> EntityResult<Self> {
        let money = EntityPattern::new(
            "MONEY",
            r"(?:US)?[$€£]\s?\d{1,3}(?:,\d{3})*(?:\.\d+)?(?:\s?(?:million|billion|thousand)\b)?|\b\d{1,3}(?:,\d{3})*(?:\.\d+)?\s?(?:USD|EUR|GBP|dollars)\b",
        )?;
        let percent = EntityPattern::new("PERCENT", r"\b\d+(?:\.\d+)?\s?(?:%|percent\b)")?;
        let date = EntityPattern::new(
            "DATE",
            &format!(
                r"\b(?:(?:{MONTHS})\s+\d{{1,2}},\s+\d{{4}}|\d{{1,2}}\s+(?:{MONTHS})\s+\d{{4}}|\d{{4}}-\d{{2}}-\d{{2}}|\d{{1,2}}/\d{{1,2}}/\d{{2,4}})\b"
            ),
        )?;
        let org = EntityPattern::new(
            "ORG",
            r"\b(?:[A-Z][A-Za-z0-9&'-]*\s+){1,4}(?:Inc|LLC|Ltd|Limited|Corp|Corporation|LP|LLP|GmbH|PLC|Partners|Ventures|Capital)\b\.?",
        )?;

        Ok(Self::new()
            .with_pattern(money)
            .with_pattern(percent)
            .with_pattern(date)
            .with_pattern(org))
    }
}

impl Default for PatternRecognizer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl EntityRecognizer for PatternRecognizer {
    fn name(&self) -> &str {
        "patterns"
    }

    async fn recognize(&self, text: &str) -> EntityResult<Vec<RecognizedSpan>> {
        let mut spans: Vec<RecognizedSpan> = self
            .patterns
            .iter()
            .flat_map(|pattern| {
                pattern.regex.find_iter(text).map(move |m| {
                    RecognizedSpan::new(pattern.label.as_str(), m.as_str(), m.start(), m.end())
                })
            })
            .collect();

        spans.sort_by_key(|s| (s.start, s.end));
        Ok(spans)
    }
}

/// One domain clause: a label and a case-insensitive pattern.
pub struct ClausePattern {
    pub label: String,
    pub regex: Regex,
}

impl ClausePattern {
    pub fn new(label: impl Into<String>, pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            label: label.into(),
            regex: RegexBuilder::new(pattern).case_insensitive(true).build()?,
        })
    }
}

/// Term-sheet clauses in the order they are applied.
pub const TERM_SHEET_CLAUSES: &[(&str, &str)] = &[
    (
        "VALUATION",
        r"\b(?:pre|post)[- ]money valuation of (?:US)?\$?(?:\d{1,3}(?:,\d{3})+|\d+(?:\.\d+)?(?:\s?(?:million|billion))?)\b",
    ),
    (
        "EQUITY_STAKE",
        r"\b(?:\d+(?:\.\d+)?% (?:equity|ownership|stake)\b|equity (?:stake )?of \d+(?:\.\d+)?%)",
    ),
    (
        "EXIT_TERMS",
        r"\b(?:exit strategy|buyout clause|IPO|initial public offering)\b",
    ),
    (
        "GOVERNING_LAW",
        r"\b(?:governed by (?:and construed in accordance with )?the laws of (?:the )?(?:state of )?[A-Za-z]+|jurisdiction (?:of|in) (?:the )?[A-Za-z]+)\b",
    ),
    (
        "LIQUIDATION_PREFERENCE",
        r"\b(?:\d+(?:\.\d+)?x\s+)?(?:non-participating\s+|participating\s+)?liquidation preference(?:\s+of\s+\d+(?:\.\d+)?x)?",
    ),
    (
        "DRAG_ALONG_RIGHTS",
        r"\bdrag[- ]along(?: rights?| provisions?)?",
    ),
    (
        "TAG_ALONG_RIGHTS",
        r"\b(?:tag[- ]along|co-sale)(?: rights?)?",
    ),
    (
        "VESTING_SCHEDULE",
        r"\b(?:vest(?:ing|s)? (?:over|monthly over) (?:\d+|one|two|three|four|five) (?:years?|months?)(?: with (?:a )?(?:\d+|one)[- ](?:year|month) cliff)?|(?:\d+|three|four|five)[- ]year vesting(?: schedule)?)",
    ),
    (
        "ANTI_DILUTION",
        r"\b(?:broad[- ]based |narrow[- ]based )?(?:weighted[- ]average |full[- ]ratchet )?anti-dilution(?: protection| provisions?| adjustment)?",
    ),
    (
        "PRO_RATA_RIGHTS",
        r"\bpro[- ]rata (?:rights?|participation)",
    ),
    (
        "BOARD_COMPOSITION",
        r"\bboard(?: of directors)? (?:shall |will )?(?:consist|be comprised|be composed) of (?:\w+ )?(?:\(\d+\) )?(?:members|directors)",
    ),
    (
        "INVESTMENT_AMOUNT",
        r"\b(?:aggregate )?(?:investment|purchase price|financing) (?:amount )?of (?:up to )?(?:US)?\$(?:\d{1,3}(?:,\d{3})+|\d+(?:\.\d+)?(?:\s?(?:million|billion))?)\b",
    ),
    (
        "DIVIDENDS",
        r"\b(?:(?:non-)?cumulative )?dividends? (?:at (?:a|the) rate of |of )\d+(?:\.\d+)?%",
    ),
    (
        "NO_SHOP",
        r"\bno[- ]shop(?: (?:clause|period|provision))?|\bexclusivity period of \d+ days",
    ),
    (
        "CONVERSION_RIGHTS",
        r"\bconvertible (?:at any time )?(?:into|to) (?:shares of )?common (?:stock|shares)",
    ),
];

/// Ordered clause patterns; each contributes at most its first match.
pub struct ClauseSet {
    patterns: Vec<ClausePattern>,
}

impl ClauseSet {
    #[must_use]
    pub fn new() -> Self {
        Self {
            patterns: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_pattern(mut self, pattern: ClausePattern) -> Self {
        self.patterns.push(pattern);
        self
    }

    pub fn term_sheet() -> EntityResult<Self> {
        let mut set = Self::new();
        for (label, pattern) in TERM_SHEET_CLAUSES {
            set = set.with_pattern(ClausePattern::new(*label, pattern)?);
        }
        Ok(set)
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.patterns.iter().map(|p| p.label.as_str())
    }

    /// Write each clause's first match into `entities`, replacing any value
    /// already stored under the same label.
    pub fn apply(&self, text: &str, entities: &mut Entities) {
        for pattern in &self.patterns {
            if let Some(m) = pattern.regex.find(text) {
                entities.insert(pattern.label.clone(), m.as_str().to_string());
            }
        }
    }
}

impl Default for ClauseSet {
    fn default() -> Self {
        Self::new()
    }
}

/// Named entities first, then clause patterns on top of them.
pub struct EntityExtractor {
    recognizer: Arc<dyn EntityRecognizer>,
    clauses: ClauseSet,
}

impl EntityExtractor {
    #[must_use]
    pub fn new(recognizer: Arc<dyn EntityRecognizer>, clauses: ClauseSet) -> Self {
        Self {
            recognizer,
            clauses,
        }
    }

    /// Rule-based recognizer plus the term-sheet clause set.
    pub fn term_sheet() -> EntityResult<Self> {
        Ok(Self::new(
            Arc::new(PatternRecognizer::with_default_patterns()?),
            ClauseSet::term_sheet()?,
        ))
    }

    #[must_use]
    pub fn recognizer_name(&self) -> &str {
        self.recognizer.name()
    }

    pub async fn extract(&self, text: &str) -> EntityResult<Entities> {
        let mut entities = Entities::new();

        // Later spans overwrite earlier ones with the same label.
        for span in self.recognizer.recognize(text).await? {
            entities.insert(span.label, span.text);
        }

        self.clauses.apply(text, &mut entities);

        Ok(entities)
    }
}
