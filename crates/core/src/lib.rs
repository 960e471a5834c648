pub mod candidate;
pub mod config;
pub mod language;

pub use candidate::{Candidate, ExtractionResult, SkippedPair};
pub use config::{AppConfig, ConfigError, OcrSettings, OutputSettings, PipelineSettings};
pub use language::{LanguageCode, LanguageError};
