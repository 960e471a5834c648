use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use nfscan_core::candidate::MAX_SCORE;

// ── Compiled regex cache ─────────────────────────────────────────────────────

macro_rules! re {
    ($name:ident, $pat:expr) => {
        fn $name() -> &'static Regex {
            static R: OnceLock<Regex> = OnceLock::new();
            R.get_or_init(|| Regex::new($pat).expect("invalid regex"))
        }
    };
}

re!(re_barcode, r"\b[0-9]{13,14}\b");
re!(re_money, r"\b[0-9]+,[0-9]{2}\b");
re!(re_quantity, r"(?i)[0-9]+,[0-9]{3}\s*(?:KG|MCO|GF|UNID)");

/// Invoice header vocabulary; each contributes at most once.
pub const INVOICE_KEYWORDS: [&str; 8] =
    ["ITEM", "DESCRIÇÃO", "DESCRICAO", "QTD", "UNID", "TOTAL", "COD", "VALOR"];

pub const KEYWORD_POINTS: f64 = 20.0;
pub const BARCODE_POINTS: f64 = 15.0;
pub const MONEY_POINTS: f64 = 10.0;
pub const QUANTITY_POINTS: f64 = 10.0;
pub const DENSITY_POINTS: f64 = 5.0;

/// Per-signal counts behind a score.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    pub keywords: usize,
    pub barcodes: usize,
    pub amounts: usize,
    pub quantities: usize,
    /// Share of alphanumeric-or-whitespace characters, 0.0–1.0.
    pub density: f64,
}

impl ScoreBreakdown {
    pub fn total(&self) -> f64 {
        let raw = self.keywords as f64 * KEYWORD_POINTS
            + self.barcodes as f64 * BARCODE_POINTS
            + self.amounts as f64 * MONEY_POINTS
            + self.quantities as f64 * QUANTITY_POINTS
            + self.density * DENSITY_POINTS;
        raw.clamp(0.0, MAX_SCORE)
    }
}

/// Ground-truth-free plausibility estimate for invoice-shaped text.
#[derive(Debug, Clone, Copy, Default)]
pub struct QualityScorer;

impl QualityScorer {
    /// Deterministic, always within `0.0..=100.0`; blank text scores 0.
    pub fn score(&self, text: &str) -> f64 {
        self.breakdown(text).total()
    }

    pub fn breakdown(&self, text: &str) -> ScoreBreakdown {
        if text.trim().is_empty() {
            return ScoreBreakdown::default();
        }
        let upper = text.to_uppercase();
        let keywords = INVOICE_KEYWORDS.iter().filter(|k| upper.contains(*k)).count();

        let (valid, total) = text.chars().fold((0usize, 0usize), |(v, t), c| {
            (v + usize::from(c.is_alphanumeric() || c.is_whitespace()), t + 1)
        });

        ScoreBreakdown {
            keywords,
            barcodes: re_barcode().find_iter(text).count(),
            amounts: re_money().find_iter(text).count(),
            quantities: re_quantity().find_iter(&upper).count(),
            density: if total == 0 { 0.0 } else { valid as f64 / total as f64 },
        }
    }
}
