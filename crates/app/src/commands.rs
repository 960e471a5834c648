use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use nfscan_core::{AppConfig, ExtractionResult};
use nfscan_ocr::{
    image_fingerprint, report, ExtractionOrchestrator, OcrBackend, OcrConfig, PipelineError,
    PipelineOptions, SourceError, TesseractCli,
};
use nfscan_storage::DbPool;
use tokio::sync::mpsc;

pub struct ExtractOptions {
    pub report: Option<PathBuf>,
    pub top: Option<usize>,
    pub json: bool,
    pub force: bool,
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    AppConfig::load(path).with_context(|| match path {
        Some(p) => format!("Failed to load config {}", p.display()),
        None => "Invalid configuration".to_string(),
    })
}

pub fn build_pipeline(config: &AppConfig) -> ExtractionOrchestrator<TesseractCli> {
    let engine = TesseractCli::new(
        &config.ocr.command,
        config.ocr.tessdata_dir.clone(),
        config.ocr.timeout(),
    );
    ExtractionOrchestrator::new(engine, OcrConfig::invoice_catalog(&config.ocr.languages))
        .with_options(PipelineOptions::from_settings(&config.ocr, &config.pipeline))
}

async fn open_db(config: &AppConfig) -> anyhow::Result<Option<DbPool>> {
    let Some(path) = config.output.database() else {
        return Ok(None);
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let pool = nfscan_storage::create_db(path)
        .await
        .with_context(|| format!("Failed to open database {}", path.display()))?;
    Ok(Some(pool))
}

/// A result loaded from the database for an image seen before.
async fn previous_result(pool: &DbPool, fingerprint: &str) -> anyhow::Result<Option<ExtractionResult>> {
    let Some(run) = nfscan_storage::find_run_by_fingerprint(pool, fingerprint).await? else {
        return Ok(None);
    };
    tracing::info!(run = run.id, source = %run.source_path, "Image already processed");
    let candidates = nfscan_storage::get_run_candidates(pool, run.id)
        .await?
        .into_iter()
        .map(|c| c.into_candidate())
        .collect();
    Ok(Some(ExtractionResult::from_ranked(candidates, Vec::new())))
}

async fn process_image<R: OcrBackend + 'static>(
    pipeline: &ExtractionOrchestrator<R>,
    db: Option<&DbPool>,
    image: &Path,
    force: bool,
) -> anyhow::Result<ExtractionResult> {
    let bytes = tokio::fs::read(image)
        .await
        .with_context(|| format!("Failed to read {}", image.display()))?;
    let fingerprint = image_fingerprint(&bytes);

    if let (Some(pool), false) = (db, force) {
        if let Some(result) = previous_result(pool, &fingerprint).await? {
            return Ok(result);
        }
    }

    tracing::info!(image = %image.display(), "Processing invoice image");
    let result = pipeline
        .run_bytes(&bytes)
        .await
        .with_context(|| format!("Failed to process {}", image.display()))?;

    if let Some(pool) = db {
        let source = image.display().to_string();
        let id = nfscan_storage::insert_extraction(pool, &fingerprint, &source, &result).await?;
        tracing::debug!(run = id, "Extraction stored");
    }
    if result.is_empty() {
        tracing::warn!(image = %image.display(), "No OCR text extracted");
    }
    Ok(result)
}

pub async fn extract(config: &AppConfig, image: &Path, opts: &ExtractOptions) -> anyhow::Result<()> {
    let pipeline = build_pipeline(config);
    let db = open_db(config).await?;
    let result = process_image(&pipeline, db.as_ref(), image, opts.force).await?;

    let report_path = opts.report.clone().unwrap_or_else(|| config.output.report_path.clone());
    if report::write_best(&report_path, &result)
        .with_context(|| format!("Failed to write {}", report_path.display()))?
    {
        tracing::info!(path = %report_path.display(), "Best result written");
    }

    if opts.json {
        println!("{}", report::render_json(&result)?);
        return Ok(());
    }
    match result.best() {
        Some(best) => {
            print!("{}", report::render_summary(&result, opts.top.unwrap_or(config.output.top)));
            println!();
            print!("{}", report::render(best));
        }
        None => println!("No text extracted from {}", image.display()),
    }
    Ok(())
}

/// How long a dropped file may take to finish arriving.
#[derive(Debug, Clone, Copy)]
pub struct IntakeTiming {
    pub poll: Duration,
    pub max_wait: Duration,
    pub retry_delay: Duration,
}

impl Default for IntakeTiming {
    fn default() -> Self {
        Self {
            poll: Duration::from_millis(250),
            max_wait: Duration::from_secs(30),
            retry_delay: Duration::from_secs(2),
        }
    }
}

fn is_decode_failure(e: &anyhow::Error) -> bool {
    matches!(e.downcast_ref::<PipelineError>(), Some(PipelineError::Source(SourceError::Decode(_))))
}

/// Process a file seen by the watcher: wait for its size to settle, and
/// retry once if it still does not decode.
async fn intake_image<R: OcrBackend + 'static>(
    pipeline: &ExtractionOrchestrator<R>,
    db: Option<&DbPool>,
    path: &Path,
    timing: IntakeTiming,
) -> anyhow::Result<ExtractionResult> {
    nfscan_ocr::wait_for_stable_file(path, timing.poll, timing.max_wait)
        .await
        .with_context(|| format!("Failed to stat {}", path.display()))?;
    match process_image(pipeline, db, path, false).await {
        Err(e) if is_decode_failure(&e) => {
            tracing::debug!(image = %path.display(), "Image not decodable yet, retrying");
            tokio::time::sleep(timing.retry_delay).await;
            process_image(pipeline, db, path, false).await
        }
        other => other,
    }
}

pub async fn watch(config: &AppConfig, dir: &Path) -> anyhow::Result<()> {
    if !dir.is_dir() {
        bail!("{} is not a directory", dir.display());
    }
    let pipeline = build_pipeline(config);
    let db = open_db(config).await?;

    // The channel bridges the notify watcher thread and the async processor.
    let (tx, mut rx) = mpsc::channel::<PathBuf>(64);
    let _watcher = nfscan_ocr::spawn_intake_watcher(dir, tx)
        .with_context(|| format!("Failed to watch {}", dir.display()))?;
    tracing::info!("Watching intake folder: {}", dir.display());

    loop {
        tokio::select! {
            received = rx.recv() => {
                let Some(path) = received else { break };
                match intake_image(&pipeline, db.as_ref(), &path, IntakeTiming::default()).await {
                    Ok(result) => {
                        let report_path = path.with_extension("txt");
                        if let Err(e) = report::write_best(&report_path, &result) {
                            tracing::warn!("Cannot write {}: {e}", report_path.display());
                        }
                        match result.best() {
                            Some(best) => tracing::info!(
                                image = %path.display(),
                                best = best.source_label(),
                                score = best.score(),
                                "Invoice processed"
                            ),
                            None => tracing::info!(image = %path.display(), "Invoice had no text"),
                        }
                    }
                    Err(e) => tracing::warn!("Intake error: {e:#}"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Stopping watcher");
                break;
            }
        }
    }
    Ok(())
}

pub async fn history(config: &AppConfig, limit: u32) -> anyhow::Result<()> {
    let Some(pool) = open_db(config).await? else {
        bail!("No database configured; set output.database_path or NFSCAN_DATABASE");
    };
    for run in nfscan_storage::list_runs(&pool, limit).await? {
        println!(
            "{:>5}  {}  {:<40}  {:<28}  {:>5}",
            run.id,
            run.created_at,
            run.source_path,
            run.best_label.as_deref().unwrap_or("-"),
            run.best_score.map(|s| format!("{s:.1}")).unwrap_or_else(|| "-".to_string()),
        );
    }
    Ok(())
}
