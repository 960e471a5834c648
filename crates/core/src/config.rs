use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::language::LanguageCode;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub const ENV_TESSERACT_CMD: &str = "NFSCAN_TESSERACT_CMD";
pub const ENV_TESSDATA_DIR: &str = "NFSCAN_TESSDATA_DIR";
pub const ENV_DATABASE: &str = "NFSCAN_DATABASE";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub ocr: OcrSettings,
    pub pipeline: PipelineSettings,
    pub output: OutputSettings,
}

/// Where the OCR engine lives and how it is invoked.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OcrSettings {
    pub command: PathBuf,
    pub tessdata_dir: Option<PathBuf>,
    pub languages: Vec<LanguageCode>,
    pub timeout_secs: u64,
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self {
            command: PathBuf::from("tesseract"),
            tessdata_dir: None,
            languages: LanguageCode::invoice_default(),
            timeout_secs: 60,
        }
    }
}

impl OcrSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineSettings {
    /// Parallel workers; 0 means one per available core.
    pub workers: usize,
    /// Global deadline in seconds; 0 disables it.
    pub deadline_secs: u64,
    pub max_variant_pixels: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self { workers: 0, deadline_secs: 0, max_variant_pixels: 600_000_000 }
    }
}

impl PipelineSettings {
    pub fn worker_count(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
    }

    pub fn deadline(&self) -> Option<Duration> {
        (self.deadline_secs > 0).then(|| Duration::from_secs(self.deadline_secs))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OutputSettings {
    pub report_path: PathBuf,
    /// Empty path disables persistence.
    pub database_path: PathBuf,
    pub top: usize,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            report_path: PathBuf::from("melhor_resultado_ocr.txt"),
            database_path: PathBuf::new(),
            top: 5,
        }
    }
}

impl OutputSettings {
    pub fn database(&self) -> Option<&Path> {
        (!self.database_path.as_os_str().is_empty()).then_some(self.database_path.as_path())
    }
}

impl AppConfig {
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a TOML file, apply environment overrides, validate.
    /// `None` starts from the defaults; a path that does not exist is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) if p.exists() => toml::from_str(&std::fs::read_to_string(p)?)?,
            Some(p) => {
                return Err(ConfigError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("{} does not exist", p.display()),
                )))
            }
            None => AppConfig::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Overlay values from the environment; `lookup` is injectable for tests.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(cmd) = lookup(ENV_TESSERACT_CMD).filter(|v| !v.is_empty()) {
            self.ocr.command = PathBuf::from(cmd);
        }
        if let Some(dir) = lookup(ENV_TESSDATA_DIR).filter(|v| !v.is_empty()) {
            self.ocr.tessdata_dir = Some(PathBuf::from(dir));
        }
        if let Some(db) = lookup(ENV_DATABASE) {
            self.output.database_path = PathBuf::from(db);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ocr.languages.is_empty() {
            return Err(ConfigError::Invalid("ocr.languages must not be empty".into()));
        }
        if self.ocr.timeout_secs == 0 {
            return Err(ConfigError::Invalid("ocr.timeout_secs must be positive".into()));
        }
        if self.pipeline.max_variant_pixels == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.max_variant_pixels must be positive".into(),
            ));
        }
        if self.output.top == 0 {
            return Err(ConfigError::Invalid("output.top must be positive".into()));
        }
        Ok(())
    }
}
