pub mod engine;
pub mod fingerprint;
pub mod normalize;
pub mod pipeline;
pub mod preprocess;
pub mod raster;
pub mod recognizer;
pub mod report;
pub mod score;
pub mod source;

pub use engine::{EngineMode, OcrConfig, SegmentationMode};
pub use fingerprint::{image_fingerprint, Fingerprint};
pub use normalize::{ConfusionTable, RemapScope, TextNormalizer};
pub use pipeline::{
    intake_paths, spawn_intake_watcher, wait_for_stable_file, ExtractionOrchestrator, PipelineError,
    PipelineOptions,
};
pub use preprocess::{Variant, VariantError};
pub use recognizer::{MockRecognizer, OcrBackend, OcrError, TesseractCli};
pub use score::{QualityScorer, ScoreBreakdown};
pub use source::{SourceError, SourceImage};
