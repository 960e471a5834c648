use nfscan_core::{Candidate, ExtractionResult};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;

pub type DbPool = Pool<Sqlite>;

/// One processed invoice image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractionRun {
    pub id: i64,
    /// Hex SHA-256 of the source image bytes.
    pub fingerprint: String,
    pub source_path: String,
    pub best_label: Option<String>,
    pub best_score: Option<f64>,
    pub candidate_count: i64,
    pub skipped_count: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredCandidate {
    /// 1-based position in the ranking.
    pub rank: i64,
    pub source_label: String,
    pub raw_text: String,
    pub normalized_text: String,
    pub score: f64,
}

impl StoredCandidate {
    pub fn into_candidate(self) -> Candidate {
        Candidate::new(self.source_label, self.raw_text, self.normalized_text, self.score)
    }
}

type RunRow = (i64, String, String, Option<String>, Option<f64>, i64, i64, String);

const RUN_COLUMNS: &str =
    "id, fingerprint, source_path, best_label, best_score, candidate_count, skipped_count, created_at";

fn run_from_row(r: RunRow) -> ExtractionRun {
    ExtractionRun {
        id: r.0,
        fingerprint: r.1,
        source_path: r.2,
        best_label: r.3,
        best_score: r.4,
        candidate_count: r.5,
        skipped_count: r.6,
        created_at: r.7,
    }
}

pub async fn create_db(path: &Path) -> Result<DbPool, sqlx::Error> {
    let options = SqliteConnectOptions::new().filename(path).create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous = NORMAL")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA busy_timeout = 5000")
        .execute(&pool)
        .await?;

    run_migrations(&pool).await?;

    Ok(pool)
}

async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS extraction_runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            fingerprint TEXT NOT NULL,
            source_path TEXT NOT NULL,
            best_label TEXT,
            best_score REAL,
            candidate_count INTEGER NOT NULL,
            skipped_count INTEGER NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_runs_fingerprint ON extraction_runs(fingerprint)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS candidates (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id INTEGER NOT NULL,
            rank INTEGER NOT NULL,
            source_label TEXT NOT NULL,
            raw_text TEXT NOT NULL,
            normalized_text TEXT NOT NULL,
            score REAL NOT NULL,
            FOREIGN KEY (run_id) REFERENCES extraction_runs(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Stores a run and its ranked candidates in one transaction. Returns the run id.
pub async fn insert_extraction(
    pool: &DbPool,
    fingerprint: &str,
    source_path: &str,
    result: &ExtractionResult,
) -> Result<i64, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let best = result.best();
    let run_id = sqlx::query(
        "INSERT INTO extraction_runs (fingerprint, source_path, best_label, best_score, candidate_count, skipped_count) VALUES (?, ?, ?, ?, ?, ?)"
    )
    .bind(fingerprint)
    .bind(source_path)
    .bind(best.map(|c| c.source_label()))
    .bind(best.map(|c| c.score()))
    .bind(result.len() as i64)
    .bind(result.skipped.len() as i64)
    .execute(&mut *tx)
    .await?
    .last_insert_rowid();

    for (i, candidate) in result.candidates().iter().enumerate() {
        sqlx::query(
            "INSERT INTO candidates (run_id, rank, source_label, raw_text, normalized_text, score) VALUES (?, ?, ?, ?, ?, ?)"
        )
        .bind(run_id)
        .bind(i as i64 + 1)
        .bind(candidate.source_label())
        .bind(candidate.raw_text())
        .bind(candidate.normalized_text())
        .bind(candidate.score())
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(run_id)
}

/// Most recent run for an image fingerprint, if it was processed before.
pub async fn find_run_by_fingerprint(
    pool: &DbPool,
    fingerprint: &str,
) -> Result<Option<ExtractionRun>, sqlx::Error> {
    let row = sqlx::query_as::<_, RunRow>(&format!(
        "SELECT {RUN_COLUMNS} FROM extraction_runs WHERE fingerprint = ? ORDER BY id DESC LIMIT 1"
    ))
    .bind(fingerprint)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(run_from_row))
}

pub async fn get_run_candidates(pool: &DbPool, run_id: i64) -> Result<Vec<StoredCandidate>, sqlx::Error> {
    let rows = sqlx::query_as::<_, (i64, String, String, String, f64)>(
        "SELECT rank, source_label, raw_text, normalized_text, score FROM candidates WHERE run_id = ? ORDER BY rank"
    )
    .bind(run_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|r| StoredCandidate {
            rank: r.0,
            source_label: r.1,
            raw_text: r.2,
            normalized_text: r.3,
            score: r.4,
        })
        .collect())
}

/// Newest first.
pub async fn list_runs(pool: &DbPool, limit: u32) -> Result<Vec<ExtractionRun>, sqlx::Error> {
    let rows = sqlx::query_as::<_, RunRow>(&format!(
        "SELECT {RUN_COLUMNS} FROM extraction_runs ORDER BY id DESC LIMIT ?"
    ))
    .bind(i64::from(limit))
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(run_from_row).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nfscan_core::SkippedPair;

    async fn pool() -> (tempfile::TempDir, DbPool) {
        let dir = tempfile::tempdir().unwrap();
        let pool = create_db(&dir.path().join("nfscan.db")).await.unwrap();
        (dir, pool)
    }

    fn result() -> ExtractionResult {
        ExtractionResult::from_ranked(
            vec![
                Candidate::new("pil_advanced_config_1", "|TOTAL 12,5O", "TOTAL 12,50", 35.0),
                Candidate::new("original_config_6", "ruido", "ruido", 5.0),
            ],
            vec![SkippedPair { source_label: "original_config_5".into(), reason: "no text detected".into() }],
        )
    }

    #[tokio::test]
    async fn insert_and_read_back() {
        let (_dir, pool) = pool().await;
        let id = insert_extraction(&pool, "abc123", "/in/nota.jpg", &result()).await.unwrap();

        let run = find_run_by_fingerprint(&pool, "abc123").await.unwrap().unwrap();
        assert_eq!(run.id, id);
        assert_eq!(run.source_path, "/in/nota.jpg");
        assert_eq!(run.best_label.as_deref(), Some("pil_advanced_config_1"));
        assert_eq!(run.best_score, Some(35.0));
        assert_eq!(run.candidate_count, 2);
        assert_eq!(run.skipped_count, 1);

        let stored = get_run_candidates(&pool, id).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].rank, 1);
        assert_eq!(stored[0].raw_text, "|TOTAL 12,5O");
        assert_eq!(stored[1].clone().into_candidate(), result().candidates()[1]);
    }

    #[tokio::test]
    async fn empty_result_has_no_best() {
        let (_dir, pool) = pool().await;
        let id = insert_extraction(&pool, "empty", "/in/blank.png", &ExtractionResult::default()).await.unwrap();
        let run = find_run_by_fingerprint(&pool, "empty").await.unwrap().unwrap();
        assert_eq!(run.best_label, None);
        assert_eq!(run.best_score, None);
        assert!(get_run_candidates(&pool, id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_fingerprint_is_none() {
        let (_dir, pool) = pool().await;
        assert!(find_run_by_fingerprint(&pool, "nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_runs_newest_first_with_limit() {
        let (_dir, pool) = pool().await;
        for fp in ["a", "b", "c"] {
            insert_extraction(&pool, fp, fp, &result()).await.unwrap();
        }
        let runs = list_runs(&pool, 2).await.unwrap();
        let fps: Vec<_> = runs.iter().map(|r| r.fingerprint.as_str()).collect();
        assert_eq!(fps, vec!["c", "b"]);
    }

    #[tokio::test]
    async fn reopening_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nfscan.db");
        {
            let pool = create_db(&path).await.unwrap();
            insert_extraction(&pool, "keep", "x", &result()).await.unwrap();
            pool.close().await;
        }
        let pool = create_db(&path).await.unwrap();
        assert!(find_run_by_fingerprint(&pool, "keep").await.unwrap().is_some());
    }
}
