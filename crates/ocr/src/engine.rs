use nfscan_core::LanguageCode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Latin letters, Portuguese accented letters, digits and invoice punctuation.
pub const INVOICE_WHITELIST: &str = "0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz\
ÀÁÂÃÇÉÊÍÓÔÕÚàáâãçéêíóôõú.,;:()[]{}+-*/%=$@# ";

pub const DIGITS_WHITELIST: &str = "0123456789";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineMode {
    Legacy,
    Lstm,
    LegacyAndLstm,
    /// Whatever the installed engine supports best.
    Default,
}

impl EngineMode {
    pub fn code(self) -> u8 {
        match self {
            EngineMode::Legacy => 0,
            EngineMode::Lstm => 1,
            EngineMode::LegacyAndLstm => 2,
            EngineMode::Default => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SegmentationMode {
    /// Fully automatic page segmentation.
    FullPage,
    SingleColumn,
    SingleBlock,
    SingleWord,
    SparseText,
}

impl SegmentationMode {
    pub fn code(self) -> u8 {
        match self {
            SegmentationMode::FullPage => 3,
            SegmentationMode::SingleColumn => 4,
            SegmentationMode::SingleBlock => 6,
            SegmentationMode::SingleWord => 8,
            SegmentationMode::SparseText => 11,
        }
    }
}

/// One OCR invocation profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OcrConfig {
    pub engine_mode: EngineMode,
    pub segmentation_mode: SegmentationMode,
    pub char_whitelist: Option<BTreeSet<char>>,
    pub preserve_spaces: bool,
    pub languages: Vec<LanguageCode>,
}

impl OcrConfig {
    pub fn new(segmentation_mode: SegmentationMode, languages: &[LanguageCode]) -> Self {
        Self {
            engine_mode: EngineMode::Default,
            segmentation_mode,
            char_whitelist: None,
            preserve_spaces: false,
            languages: languages.to_vec(),
        }
    }

    pub fn preserving_spaces(mut self) -> Self {
        self.preserve_spaces = true;
        self
    }

    pub fn with_whitelist(mut self, chars: &str) -> Self {
        self.char_whitelist = Some(chars.chars().collect());
        self
    }

    /// The fixed menu of profiles tried against every variant, in enumeration order.
    pub fn invoice_catalog(languages: &[LanguageCode]) -> Vec<OcrConfig> {
        vec![
            OcrConfig::new(SegmentationMode::SingleBlock, languages).preserving_spaces(),
            OcrConfig::new(SegmentationMode::SingleBlock, languages).with_whitelist(INVOICE_WHITELIST),
            OcrConfig::new(SegmentationMode::SingleColumn, languages)
                .preserving_spaces()
                .with_whitelist(INVOICE_WHITELIST),
            OcrConfig::new(SegmentationMode::FullPage, languages).preserving_spaces(),
            OcrConfig::new(SegmentationMode::SingleWord, languages).with_whitelist(DIGITS_WHITELIST),
            OcrConfig::new(SegmentationMode::SparseText, languages).preserving_spaces(),
        ]
    }

    pub fn whitelist_string(&self) -> Option<String> {
        self.char_whitelist.as_ref().map(|set| set.iter().collect())
    }

    /// Engine variables as `name=value` pairs.
    pub fn variables(&self) -> Vec<(&'static str, String)> {
        let mut vars = Vec::new();
        if self.preserve_spaces {
            vars.push(("preserve_interword_spaces", "1".to_string()));
        }
        if let Some(whitelist) = self.whitelist_string() {
            vars.push(("tessedit_char_whitelist", whitelist));
        }
        vars
    }

    /// Command-line arguments for the engine, excluding input/output and languages.
    pub fn engine_args(&self) -> Vec<String> {
        let mut args = vec![
            "--oem".to_string(),
            self.engine_mode.code().to_string(),
            "--psm".to_string(),
            self.segmentation_mode.code().to_string(),
        ];
        for (name, value) in self.variables() {
            args.push("-c".to_string());
            args.push(format!("{name}={value}"));
        }
        args
    }

    /// Single-string form of `engine_args`, for logs.
    pub fn token(&self) -> String {
        self.engine_args().join(" ")
    }

    pub fn language_arg(&self) -> String {
        LanguageCode::join(&self.languages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> Vec<OcrConfig> {
        OcrConfig::invoice_catalog(&LanguageCode::invoice_default())
    }

    #[test]
    fn catalog_has_six_profiles_in_order() {
        let modes: Vec<_> = catalog().iter().map(|c| c.segmentation_mode).collect();
        assert_eq!(
            modes,
            vec![
                SegmentationMode::SingleBlock,
                SegmentationMode::SingleBlock,
                SegmentationMode::SingleColumn,
                SegmentationMode::FullPage,
                SegmentationMode::SingleWord,
                SegmentationMode::SparseText,
            ]
        );
    }

    #[test]
    fn every_profile_uses_both_languages() {
        for config in catalog() {
            assert_eq!(config.language_arg(), "por+eng");
        }
    }

    #[test]
    fn first_profile_token() {
        assert_eq!(catalog()[0].token(), "--oem 3 --psm 6 -c preserve_interword_spaces=1");
    }

    #[test]
    fn numeric_profile_whitelists_digits_only() {
        let config = &catalog()[4];
        assert_eq!(config.whitelist_string().as_deref(), Some("0123456789"));
        assert!(!config.preserve_spaces);
        assert_eq!(
            config.engine_args(),
            vec!["--oem", "3", "--psm", "8", "-c", "tessedit_char_whitelist=0123456789"]
        );
    }

    #[test]
    fn invoice_whitelist_keeps_accents_and_space() {
        let config = &catalog()[1];
        let set = config.char_whitelist.as_ref().unwrap();
        for c in ['Ç', 'ã', ',', ' ', '$', 'Z'] {
            assert!(set.contains(&c), "missing {c:?}");
        }
        assert!(!set.contains(&'!'));
    }
}
