pub mod db;

pub use db::{
    create_db, find_run_by_fingerprint, get_run_candidates, insert_extraction, list_runs, DbPool,
    ExtractionRun, StoredCandidate,
};
