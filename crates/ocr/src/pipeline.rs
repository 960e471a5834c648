use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use nfscan_core::{Candidate, ExtractionResult, OcrSettings, PipelineSettings, SkippedPair};
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::engine::OcrConfig;
use crate::normalize::TextNormalizer;
use crate::preprocess::{Variant, VariantError};
use crate::recognizer::{OcrBackend, OcrError};
use crate::score::QualityScorer;
use crate::source::{SourceError, SourceImage};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Cannot read invoice image: {0}")]
    Source(#[from] SourceError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOptions {
    /// Pairs evaluated at once.
    pub workers: usize,
    /// Per OCR call; a slower pair is skipped.
    pub call_timeout: Duration,
    /// No new pair starts once this much time has passed.
    pub deadline: Option<Duration>,
    pub max_variant_pixels: u64,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self::from_settings(&OcrSettings::default(), &PipelineSettings::default())
    }
}

impl PipelineOptions {
    pub fn from_settings(ocr: &OcrSettings, pipeline: &PipelineSettings) -> Self {
        Self {
            workers: pipeline.worker_count(),
            call_timeout: ocr.timeout(),
            deadline: pipeline.deadline(),
            max_variant_pixels: pipeline.max_variant_pixels,
        }
    }
}

/// Raw outcome of one (variant, config) pair, before normalization.
#[derive(Debug)]
struct PairOutcome {
    order: usize,
    label: String,
    raw: Result<String, String>,
}

pub fn source_label(variant: Variant, config_index: usize) -> String {
    format!("{}_config_{}", variant.name(), config_index + 1)
}

/// Normalize and score one raw text. `None` when nothing survives cleanup.
pub fn evaluate(
    label: &str,
    raw: &str,
    normalizer: &TextNormalizer,
    scorer: &QualityScorer,
) -> Option<Candidate> {
    if raw.trim().is_empty() {
        return None;
    }
    let normalized = normalizer.normalize(raw);
    if normalized.is_empty() {
        return None;
    }
    let score = scorer.score(&normalized);
    Some(Candidate::new(label, raw, normalized, score))
}

/// Best first. Stable: equal scores keep their enumeration order.
pub fn rank(mut candidates: Vec<Candidate>) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.score().total_cmp(&a.score()));
    candidates
}

/// Tries every variant × config pair against the OCR engine and ranks the texts.
pub struct ExtractionOrchestrator<R: OcrBackend> {
    recognizer: Arc<R>,
    variants: Vec<Variant>,
    configs: Vec<OcrConfig>,
    normalizer: TextNormalizer,
    scorer: QualityScorer,
    options: PipelineOptions,
}

impl<R: OcrBackend + 'static> ExtractionOrchestrator<R> {
    pub fn new(recognizer: R, configs: Vec<OcrConfig>) -> Self {
        Self {
            recognizer: Arc::new(recognizer),
            variants: Variant::ALL.to_vec(),
            configs,
            normalizer: TextNormalizer::default(),
            scorer: QualityScorer,
            options: PipelineOptions::default(),
        }
    }

    pub fn with_variants(mut self, variants: Vec<Variant>) -> Self {
        self.variants = variants;
        self
    }

    pub fn with_normalizer(mut self, normalizer: TextNormalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn with_options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn configs(&self) -> &[OcrConfig] {
        &self.configs
    }

    pub fn variants(&self) -> &[Variant] {
        &self.variants
    }

    /// Process a file on disk. Only an unreadable image is an error.
    pub async fn run_path(&self, path: &Path) -> Result<ExtractionResult, PipelineError> {
        let bytes = tokio::fs::read(path).await.map_err(SourceError::Io)?;
        self.run_bytes(&bytes).await
    }

    /// Process encoded image bytes (camera capture, upload, file read).
    pub async fn run_bytes(&self, data: &[u8]) -> Result<ExtractionResult, PipelineError> {
        let source = SourceImage::from_bytes(data)?;
        Ok(self.run(&source).await)
    }

    pub async fn run(&self, source: &SourceImage) -> ExtractionResult {
        let started = Instant::now();
        let deadline = self.options.deadline.map(|d| started + d);
        let permits = Arc::new(Semaphore::new(self.options.workers.max(1)));

        let mut skipped = Vec::new();
        let rendered = self.render_variants(source, &permits, &mut skipped).await;
        let outcomes = self.recognize_pairs(rendered, &permits, deadline).await;

        let mut accepted = Vec::new();
        for outcome in outcomes {
            match outcome.raw {
                Ok(raw) => match evaluate(&outcome.label, &raw, &self.normalizer, &self.scorer) {
                    Some(candidate) => {
                        debug!(label = %outcome.label, score = candidate.score(), "Candidate accepted");
                        accepted.push(candidate);
                    }
                    None => skipped.push(SkippedPair {
                        source_label: outcome.label,
                        reason: "no text detected".to_string(),
                    }),
                },
                Err(reason) => {
                    warn!(label = %outcome.label, error = %reason, "OCR pair skipped");
                    skipped.push(SkippedPair { source_label: outcome.label, reason });
                }
            }
        }

        let result = ExtractionResult::from_ranked(rank(accepted), skipped);
        match result.best() {
            Some(best) => info!(
                candidates = result.len(),
                skipped = result.skipped.len(),
                best = best.source_label(),
                score = best.score(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Extraction finished"
            ),
            None => info!(
                skipped = result.skipped.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Extraction finished without candidates"
            ),
        }
        result
    }

    /// PNG buffers for every variant that could be generated, in enumeration order.
    async fn render_variants(
        &self,
        source: &SourceImage,
        permits: &Arc<Semaphore>,
        skipped: &mut Vec<SkippedPair>,
    ) -> Vec<(usize, Variant, Arc<Vec<u8>>)> {
        let mut tasks = JoinSet::new();
        for (index, variant) in self.variants.iter().copied().enumerate() {
            let source = source.clone();
            let permits = Arc::clone(permits);
            let max_pixels = self.options.max_variant_pixels;
            tasks.spawn(async move {
                let permit = permits.acquire_owned().await;
                let rendered = tokio::task::spawn_blocking(move || {
                    let _permit = permit;
                    variant.render_png(&source, max_pixels)
                })
                .await;
                (index, variant, rendered)
            });
        }

        let mut rendered = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let Ok((index, variant, outcome)) = joined else {
                continue;
            };
            match outcome {
                Ok(Ok(png)) => rendered.push((index, variant, Arc::new(png))),
                Ok(Err(e)) => {
                    warn!(variant = %variant, error = %e, "Variant skipped");
                    skipped.push(variant_skip(variant, &e));
                }
                Err(e) => {
                    warn!(variant = %variant, error = %e, "Variant task failed");
                    skipped.push(SkippedPair {
                        source_label: variant.name().to_string(),
                        reason: format!("variant task failed: {e}"),
                    });
                }
            }
        }
        rendered.sort_by_key(|(index, _, _)| *index);
        rendered
    }

    async fn recognize_pairs(
        &self,
        rendered: Vec<(usize, Variant, Arc<Vec<u8>>)>,
        permits: &Arc<Semaphore>,
        deadline: Option<Instant>,
    ) -> Vec<PairOutcome> {
        let per_variant = self.configs.len();
        let call_timeout = self.options.call_timeout;
        let mut tasks = JoinSet::new();

        for (variant_index, variant, png) in rendered {
            for (config_index, config) in self.configs.iter().enumerate() {
                let order = variant_index * per_variant + config_index;
                let label = source_label(variant, config_index);
                let recognizer = Arc::clone(&self.recognizer);
                let permits = Arc::clone(permits);
                let png = Arc::clone(&png);
                let config = config.clone();
                tasks.spawn(async move {
                    let permit = permits.acquire_owned().await;
                    if deadline.is_some_and(|d| Instant::now() >= d) {
                        return PairOutcome { order, label, raw: Err("deadline exceeded".to_string()) };
                    }
                    debug!(label = %label, config = %config.token(), "Running OCR");
                    // An abandoned call keeps its slot until the engine returns.
                    let call = tokio::task::spawn_blocking(move || {
                        let _permit = permit;
                        recognizer.recognize(&png, &config)
                    });
                    let raw = match tokio::time::timeout(call_timeout, call).await {
                        Ok(Ok(Ok(text))) => Ok(text),
                        Ok(Ok(Err(e))) => Err(e.to_string()),
                        Ok(Err(e)) => Err(format!("OCR task failed: {e}")),
                        Err(_) => Err(OcrError::Timeout(call_timeout).to_string()),
                    };
                    PairOutcome { order, label, raw }
                });
            }
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => warn!(error = %e, "OCR pair task failed"),
            }
        }
        outcomes.sort_by_key(|o| o.order);
        outcomes
    }
}

fn variant_skip(variant: Variant, error: &VariantError) -> SkippedPair {
    SkippedPair { source_label: variant.name().to_string(), reason: error.to_string() }
}

// ── Watch-folder integration ──────────────────────────────────────────────────

const IMAGE_EXTENSIONS: [&str; 7] = ["jpg", "jpeg", "png", "webp", "bmp", "tif", "tiff"];

pub fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Paths in a watcher event that should be queued: images created in, or
/// renamed into, the watched folder.
pub fn intake_paths(event: &notify::Event) -> Vec<PathBuf> {
    use notify::event::{EventKind, ModifyKind, RenameMode};

    let queued = matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(RenameMode::To))
    );
    if !queued {
        return Vec::new();
    }
    event.paths.iter().filter(|p| is_supported_image(p)).cloned().collect()
}

/// Queue the event's images without blocking. Returns how many were dropped.
fn forward_intake(tx: &mpsc::Sender<PathBuf>, event: &notify::Event) -> usize {
    let mut dropped = 0;
    for path in intake_paths(event) {
        if let Err(e) = tx.try_send(path) {
            warn!(error = %e, "Intake queue full, image dropped");
            dropped += 1;
        }
    }
    dropped
}

/// Spawn a notify watcher on `watch_dir` that sends newly created invoice
/// images to `tx`. Returns the watcher; it must be kept alive for watching to continue.
///
/// A path is sent as soon as the file appears, possibly while it is still
/// being written; receivers should call [`wait_for_stable_file`] first.
pub fn spawn_intake_watcher(
    watch_dir: &Path,
    tx: mpsc::Sender<PathBuf>,
) -> notify::Result<impl notify::Watcher> {
    use notify::{RecursiveMode, Watcher};

    let mut watcher = notify::recommended_watcher(move |event: notify::Result<notify::Event>| {
        if let Ok(ev) = event {
            forward_intake(&tx, &ev);
        }
    })?;

    watcher.watch(watch_dir, RecursiveMode::NonRecursive)?;
    Ok(watcher)
}

/// Poll the size of `path` until two reads `poll` apart agree on a non-zero
/// length, or `max_wait` has passed. Returns the last observed length.
pub async fn wait_for_stable_file(path: &Path, poll: Duration, max_wait: Duration) -> std::io::Result<u64> {
    let started = Instant::now();
    let mut last = tokio::fs::metadata(path).await?.len();
    loop {
        tokio::time::sleep(poll).await;
        let len = tokio::fs::metadata(path).await?.len();
        if (len == last && len > 0) || started.elapsed() >= max_wait {
            return Ok(len);
        }
        last = len;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::SegmentationMode;
    use crate::recognizer::MockRecognizer;
    use image::{DynamicImage, GrayImage, ImageBuffer, Luma};
    use nfscan_core::LanguageCode;
    use std::io::Cursor;

    fn tiny_png() -> Vec<u8> {
        let img: GrayImage = ImageBuffer::from_fn(4, 4, |x, _| Luma([if x == 1 { 20 } else { 200 }]));
        let mut buf = Vec::new();
        DynamicImage::ImageLuma8(img)
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    }

    fn catalog() -> Vec<OcrConfig> {
        OcrConfig::invoice_catalog(&LanguageCode::invoice_default())
    }

    fn options() -> PipelineOptions {
        PipelineOptions {
            workers: 4,
            call_timeout: Duration::from_secs(10),
            deadline: None,
            max_variant_pixels: u64::MAX,
        }
    }

    #[test]
    fn labels_are_one_based() {
        assert_eq!(source_label(Variant::EnhancedInvoice, 0), "enhanced_invoice_config_1");
        assert_eq!(source_label(Variant::PilAdvanced, 5), "pil_advanced_config_6");
    }

    #[test]
    fn evaluate_discards_blank_text() {
        let n = TextNormalizer::default();
        assert!(evaluate("a", "", &n, &QualityScorer).is_none());
        assert!(evaluate("a", " \n ", &n, &QualityScorer).is_none());
        assert!(evaluate("a", "|||", &n, &QualityScorer).is_none());
    }

    #[test]
    fn evaluate_scores_normalized_text() {
        let n = TextNormalizer::default();
        let c = evaluate("lbl", "|TOTAL 12,5O", &n, &QualityScorer).unwrap();
        assert_eq!(c.normalized_text(), "TOTAL 12,50");
        assert_eq!(c.raw_text(), "|TOTAL 12,5O");
        assert_eq!(c.score(), QualityScorer.score("TOTAL 12,50"));
    }

    #[test]
    fn rank_is_stable_for_ties() {
        let ranked = rank(vec![
            Candidate::new("a", "x", "x", 10.0),
            Candidate::new("b", "x", "x", 30.0),
            Candidate::new("c", "x", "x", 10.0),
            Candidate::new("d", "x", "x", 30.0),
        ]);
        let labels: Vec<_> = ranked.iter().map(|c| c.source_label()).collect();
        assert_eq!(labels, vec!["b", "d", "a", "c"]);
    }

    #[tokio::test]
    async fn full_cross_product_with_mock() {
        let pipeline = ExtractionOrchestrator::new(MockRecognizer::new("ITEM TOTAL\n1 ARROZ 12,50"), catalog())
            .with_options(options());
        let result = pipeline.run_bytes(&tiny_png()).await.unwrap();

        assert_eq!(result.len(), Variant::ALL.len() * 6);
        assert!(result.skipped.is_empty());
        // identical text everywhere: the first enumerated pair wins
        assert_eq!(result.best().unwrap().source_label(), "pil_advanced_config_1");
    }

    #[tokio::test]
    async fn best_profile_wins() {
        let backend = |_: &[u8], c: &OcrConfig| -> Result<String, OcrError> {
            Ok(match c.segmentation_mode {
                SegmentationMode::SparseText => "ITEM COD DESCRIÇÃO QTD\n7891234567890 5,00".to_string(),
                _ => "ruido".to_string(),
            })
        };
        let pipeline = ExtractionOrchestrator::new(backend, catalog())
            .with_variants(vec![Variant::Original, Variant::ExtremeContrast])
            .with_options(options());
        let result = pipeline.run_bytes(&tiny_png()).await.unwrap();

        assert_eq!(result.best().unwrap().source_label(), "original_config_6");
        assert_eq!(result.candidates()[1].source_label(), "extreme_contrast_config_6");
    }

    #[tokio::test]
    async fn engine_failures_become_skips() {
        let backend = |_: &[u8], c: &OcrConfig| -> Result<String, OcrError> {
            if c.segmentation_mode == SegmentationMode::SingleWord {
                Err(OcrError::Engine("crashed".into()))
            } else {
                Ok("TOTAL 1,00".into())
            }
        };
        let pipeline = ExtractionOrchestrator::new(backend, catalog())
            .with_variants(vec![Variant::Original])
            .with_options(options());
        let result = pipeline.run_bytes(&tiny_png()).await.unwrap();

        assert_eq!(result.len(), 5);
        assert_eq!(result.skipped.len(), 1);
        assert_eq!(result.skipped[0].source_label, "original_config_5");
        assert!(result.skipped[0].reason.contains("crashed"));
    }

    #[tokio::test]
    async fn oversized_variants_are_excluded() {
        let pipeline = ExtractionOrchestrator::new(MockRecognizer::new("TOTAL"), catalog())
            .with_options(PipelineOptions { max_variant_pixels: 16, ..options() });
        let result = pipeline.run_bytes(&tiny_png()).await.unwrap();

        // only the 4x4 identity fits in 16 pixels
        assert_eq!(result.len(), 6);
        assert!(result.candidates().iter().all(|c| c.source_label().starts_with("original_")));
        assert_eq!(result.skipped.len(), 4);
    }

    #[tokio::test]
    async fn slow_calls_time_out_without_failing_the_run() {
        let backend = |_: &[u8], c: &OcrConfig| -> Result<String, OcrError> {
            if c.segmentation_mode == SegmentationMode::FullPage {
                std::thread::sleep(Duration::from_millis(500));
            }
            Ok("TOTAL 2,00".into())
        };
        let pipeline = ExtractionOrchestrator::new(backend, catalog())
            .with_variants(vec![Variant::Original])
            .with_options(PipelineOptions { call_timeout: Duration::from_millis(100), ..options() });
        let result = pipeline.run_bytes(&tiny_png()).await.unwrap();

        assert_eq!(result.len(), 5);
        assert_eq!(result.skipped.len(), 1);
        assert_eq!(result.skipped[0].source_label, "original_config_4");
        assert!(result.skipped[0].reason.contains("timed out"));
    }

    #[tokio::test]
    async fn timed_out_calls_keep_their_worker_slot() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (a, p) = (Arc::clone(&active), Arc::clone(&peak));
        let backend = move |_: &[u8], _: &OcrConfig| -> Result<String, OcrError> {
            let now = a.fetch_add(1, Ordering::SeqCst) + 1;
            p.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(150));
            a.fetch_sub(1, Ordering::SeqCst);
            Ok("TOTAL 1,00".into())
        };
        let pipeline = ExtractionOrchestrator::new(backend, catalog())
            .with_variants(vec![Variant::Original])
            .with_options(PipelineOptions { workers: 1, call_timeout: Duration::from_millis(20), ..options() });
        let result = pipeline.run_bytes(&tiny_png()).await.unwrap();

        assert!(result.is_empty());
        assert_eq!(result.skipped.len(), 6);
        assert!(result.skipped.iter().all(|s| s.reason.contains("timed out")));
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expired_deadline_stops_dispatch() {
        let pipeline = ExtractionOrchestrator::new(MockRecognizer::new("TOTAL"), catalog())
            .with_variants(vec![Variant::Original])
            .with_options(PipelineOptions { deadline: Some(Duration::ZERO), ..options() });
        let result = pipeline.run_bytes(&tiny_png()).await.unwrap();

        assert!(result.is_empty());
        assert_eq!(result.skipped.len(), 6);
        assert!(result.skipped.iter().all(|s| s.reason == "deadline exceeded"));
    }

    #[tokio::test]
    async fn undecodable_bytes_are_fatal() {
        let pipeline = ExtractionOrchestrator::new(MockRecognizer::new("TOTAL"), catalog());
        let err = pipeline.run_bytes(b"not an image").await.unwrap_err();
        assert!(matches!(err, PipelineError::Source(SourceError::Decode(_))));
    }

    #[tokio::test]
    async fn run_path_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nota.png");
        std::fs::write(&path, tiny_png()).unwrap();
        let pipeline = ExtractionOrchestrator::new(MockRecognizer::new("VALOR 3,50"), catalog())
            .with_variants(vec![Variant::Original])
            .with_options(options());
        let result = pipeline.run_path(&path).await.unwrap();
        assert_eq!(result.len(), 6);
    }

    #[test]
    fn created_and_renamed_images_are_queued() {
        use notify::event::{AccessKind, CreateKind, EventKind, ModifyKind, RenameMode};

        let created = notify::Event::new(EventKind::Create(CreateKind::File))
            .add_path(PathBuf::from("/in/nota.jpg"))
            .add_path(PathBuf::from("/in/nota.txt"));
        assert_eq!(intake_paths(&created), vec![PathBuf::from("/in/nota.jpg")]);

        let moved_in = notify::Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::To)))
            .add_path(PathBuf::from("/in/scan.png"));
        assert_eq!(intake_paths(&moved_in), vec![PathBuf::from("/in/scan.png")]);

        let read = notify::Event::new(EventKind::Access(AccessKind::Read)).add_path(PathBuf::from("/in/nota.jpg"));
        assert!(intake_paths(&read).is_empty());
    }

    #[test]
    fn full_queue_drops_and_counts() {
        use notify::event::{CreateKind, EventKind};

        let (tx, mut rx) = mpsc::channel(1);
        let event = notify::Event::new(EventKind::Create(CreateKind::File))
            .add_path(PathBuf::from("/in/a.jpg"))
            .add_path(PathBuf::from("/in/b.jpg"));
        assert_eq!(forward_intake(&tx, &event), 1);
        assert_eq!(rx.try_recv().unwrap(), PathBuf::from("/in/a.jpg"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn waits_for_a_file_written_in_two_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nota.png");
        let png = tiny_png();
        let (head, tail) = png.split_at(png.len() / 2);
        std::fs::write(&path, head).unwrap();

        let writer_path = path.clone();
        let tail = tail.to_vec();
        let writer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let mut file = std::fs::OpenOptions::new().append(true).open(&writer_path).unwrap();
            std::io::Write::write_all(&mut file, &tail).unwrap();
        });

        let len = wait_for_stable_file(&path, Duration::from_millis(300), Duration::from_secs(5))
            .await
            .unwrap();
        writer.await.unwrap();

        assert_eq!(len, png.len() as u64);
        assert!(SourceImage::from_bytes(&std::fs::read(&path).unwrap()).is_ok());
    }

    #[tokio::test]
    async fn stable_wait_gives_up_after_max_wait() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.jpg");
        std::fs::write(&path, b"").unwrap();
        let len = wait_for_stable_file(&path, Duration::from_millis(10), Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(len, 0);
    }

    #[test]
    fn supported_image_extensions() {
        assert!(is_supported_image(Path::new("/in/nota.JPG")));
        assert!(is_supported_image(Path::new("scan.tiff")));
        assert!(!is_supported_image(Path::new("notes.txt")));
        assert!(!is_supported_image(Path::new("no_extension")));
    }
}
