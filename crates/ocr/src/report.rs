//! Plain-text rendering of the winning candidate.

use std::io;
use std::path::Path;

use nfscan_core::{Candidate, ExtractionResult};

const SEPARATOR_WIDTH: usize = 50;

/// Source label, score with one decimal, a dashed rule, then the text.
pub fn render(candidate: &Candidate) -> String {
    format!(
        "{}\nScore: {:.1}\n{}\n{}\n",
        candidate.source_label(),
        candidate.score(),
        "-".repeat(SEPARATOR_WIDTH),
        candidate.normalized_text()
    )
}

/// Ranked summary of the first `n` candidates, one line each.
pub fn render_summary(result: &ExtractionResult, n: usize) -> String {
    result
        .top(n)
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{:>2}. {:<32} {:>5.1}\n", i + 1, c.source_label(), c.score()))
        .collect()
}

/// Full result (ranked candidates plus skipped pairs) as pretty JSON.
pub fn render_json(result: &ExtractionResult) -> serde_json::Result<String> {
    serde_json::to_string_pretty(result)
}

/// Writes the best candidate to `path`. Returns `false`, writing nothing, when there is none.
pub fn write_best(path: &Path, result: &ExtractionResult) -> io::Result<bool> {
    let Some(best) = result.best() else {
        return Ok(false);
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, render(best))?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result() -> ExtractionResult {
        ExtractionResult::from_ranked(
            vec![
                Candidate::new("pil_advanced_config_1", "raw", "ITEM TOTAL\n1 ARROZ 12,50", 67.5),
                Candidate::new("original_config_2", "raw", "ruido", 4.25),
            ],
            Vec::new(),
        )
    }

    #[test]
    fn render_layout() {
        let text = render(result().best().unwrap());
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines[0], "pil_advanced_config_1");
        assert_eq!(lines[1], "Score: 67.5");
        assert_eq!(lines[2], "-".repeat(50));
        assert_eq!(&lines[3..], &["ITEM TOTAL", "1 ARROZ 12,50"]);
    }

    #[test]
    fn summary_lists_top_n() {
        let summary = render_summary(&result(), 1);
        assert_eq!(summary.lines().count(), 1);
        assert!(summary.contains("pil_advanced_config_1"));
        assert!(summary.contains("67.5"));
    }

    #[test]
    fn json_keeps_rank_order() {
        let json = render_json(&result()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["candidates"][0]["source_label"], "pil_advanced_config_1");
        assert_eq!(value["candidates"][1]["score"], 4.25);
    }

    #[test]
    fn write_best_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("melhor_resultado_ocr.txt");
        assert!(write_best(&path, &result()).unwrap());
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.starts_with("pil_advanced_config_1\nScore: 67.5\n"));
    }

    #[test]
    fn nothing_written_without_candidates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("melhor_resultado_ocr.txt");
        assert!(!write_best(&path, &ExtractionResult::default()).unwrap());
        assert!(!path.exists());
    }
}
