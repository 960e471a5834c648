use serde::{Deserialize, Serialize};

/// Upper bound of the quality score scale.
pub const MAX_SCORE: f64 = 100.0;

/// The scored text produced by one (variant, config) pair.
///
/// Fields are private: a candidate is built once, after normalization and
/// scoring, and never changes afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candidate {
    source_label: String,
    raw_text: String,
    normalized_text: String,
    score: f64,
}

impl Candidate {
    pub fn new(
        source_label: impl Into<String>,
        raw_text: impl Into<String>,
        normalized_text: impl Into<String>,
        score: f64,
    ) -> Self {
        let score = if score.is_nan() { 0.0 } else { score.clamp(0.0, MAX_SCORE) };
        Self {
            source_label: source_label.into(),
            raw_text: raw_text.into(),
            normalized_text: normalized_text.into(),
            score,
        }
    }

    pub fn source_label(&self) -> &str {
        &self.source_label
    }

    pub fn raw_text(&self) -> &str {
        &self.raw_text
    }

    pub fn normalized_text(&self) -> &str {
        &self.normalized_text
    }

    pub fn score(&self) -> f64 {
        self.score
    }
}

/// A pair that contributed no candidate, and why.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SkippedPair {
    pub source_label: String,
    pub reason: String,
}

/// Candidates ranked by score (best first) plus the pairs that were skipped.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExtractionResult {
    candidates: Vec<Candidate>,
    pub skipped: Vec<SkippedPair>,
}

impl ExtractionResult {
    /// Wraps candidates that are already in rank order.
    pub fn from_ranked(candidates: Vec<Candidate>, skipped: Vec<SkippedPair>) -> Self {
        Self { candidates, skipped }
    }

    pub fn best(&self) -> Option<&Candidate> {
        self.candidates.first()
    }

    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    pub fn top(&self, n: usize) -> &[Candidate] {
        &self.candidates[..n.min(self.candidates.len())]
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    /// Zero candidates is a valid outcome, not an error.
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}
