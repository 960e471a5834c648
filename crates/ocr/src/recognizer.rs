use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::engine::OcrConfig;

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("Image decode error: {0}")]
    ImageDecode(String),
    #[error("OCR engine error: {0}")]
    Engine(String),
    #[error("OCR engine not available: {0}")]
    NotAvailable(String),
    #[error("OCR call timed out after {0:?}")]
    Timeout(Duration),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Abstraction over an OCR engine.
/// Implementations accept encoded (PNG) image bytes plus a profile and return
/// the engine's text verbatim; an empty string means nothing was detected.
pub trait OcrBackend: Send + Sync {
    fn recognize(&self, image_bytes: &[u8], config: &OcrConfig) -> Result<String, OcrError>;
}

/// Closures are backends too, handy for scripting per-profile output.
impl<F> OcrBackend for F
where
    F: Fn(&[u8], &OcrConfig) -> Result<String, OcrError> + Send + Sync,
{
    fn recognize(&self, image_bytes: &[u8], config: &OcrConfig) -> Result<String, OcrError> {
        self(image_bytes, config)
    }
}

// ── Mock backend (always available, used for tests) ───────────────────────────

/// Returns a pre-set string regardless of image and profile.
pub struct MockRecognizer {
    pub text: String,
}

impl MockRecognizer {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

impl OcrBackend for MockRecognizer {
    fn recognize(&self, _image_bytes: &[u8], _config: &OcrConfig) -> Result<String, OcrError> {
        Ok(self.text.clone())
    }
}

// ── External executable backend ───────────────────────────────────────────────

/// Runs the `tesseract` executable located at `command`, one process per call.
#[derive(Debug, Clone)]
pub struct TesseractCli {
    command: PathBuf,
    tessdata_dir: Option<PathBuf>,
    timeout: Duration,
}

const POLL_INTERVAL: Duration = Duration::from_millis(20);

impl TesseractCli {
    pub fn new(command: impl Into<PathBuf>, tessdata_dir: Option<PathBuf>, timeout: Duration) -> Self {
        Self { command: command.into(), tessdata_dir, timeout }
    }

    /// Full argument list for one call on `input`.
    pub fn args(&self, input: &std::path::Path, config: &OcrConfig) -> Vec<String> {
        let mut args = vec![input.display().to_string(), "stdout".to_string()];
        if let Some(dir) = &self.tessdata_dir {
            args.push("--tessdata-dir".to_string());
            args.push(dir.display().to_string());
        }
        args.push("-l".to_string());
        args.push(config.language_arg());
        args.extend(config.engine_args());
        args
    }

    fn spawn(&self, args: &[String]) -> Result<Child, OcrError> {
        Command::new(&self.command)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                    OcrError::NotAvailable(format!("{}: {e}", self.command.display()))
                }
                _ => OcrError::Io(e),
            })
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> std::thread::JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    })
}

impl OcrBackend for TesseractCli {
    fn recognize(&self, image_bytes: &[u8], config: &OcrConfig) -> Result<String, OcrError> {
        let input = tempfile::Builder::new().prefix("nfscan-").suffix(".png").tempfile()?;
        std::fs::write(input.path(), image_bytes)?;

        let mut child = self.spawn(&self.args(input.path(), config))?;
        // Pipes are drained on their own threads so a chatty engine never blocks on a full buffer.
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let started = Instant::now();
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if started.elapsed() >= self.timeout {
                let _ = child.kill();
                let _ = child.wait();
                return Err(OcrError::Timeout(self.timeout));
            }
            std::thread::sleep(POLL_INTERVAL);
        };

        let out = stdout.join().unwrap_or_default();
        let err = stderr.join().unwrap_or_default();
        if !status.success() {
            let message = String::from_utf8_lossy(&err).trim().to_string();
            if message.contains("Error in pixReadMem") || message.contains("Image file") {
                return Err(OcrError::ImageDecode(message));
            }
            return Err(OcrError::Engine(format!("exit {status}: {message}")));
        }
        Ok(String::from_utf8_lossy(&out).into_owned())
    }
}

// ── Tesseract in-process backend (optional, gated behind `tesseract` feature) ─

#[cfg(feature = "tesseract")]
pub mod tesseract_backend {
    use super::{OcrBackend, OcrConfig, OcrError};
    use leptess::{LepTess, Variable};

    pub struct LeptessRecognizer {
        data_path: Option<String>,
    }

    impl LeptessRecognizer {
        pub fn new(data_path: Option<String>) -> Self {
            Self { data_path }
        }
    }

    impl OcrBackend for LeptessRecognizer {
        fn recognize(&self, image_bytes: &[u8], config: &OcrConfig) -> Result<String, OcrError> {
            let mut lt = LepTess::new(self.data_path.as_deref(), &config.language_arg())
                .map_err(|e| OcrError::Engine(e.to_string()))?;
            let psm = config.segmentation_mode.code().to_string();
            lt.set_variable(Variable::TesseditPagesegMode, &psm)
                .map_err(|e| OcrError::Engine(e.to_string()))?;
            if config.preserve_spaces {
                lt.set_variable(Variable::PreserveInterwordSpaces, "1")
                    .map_err(|e| OcrError::Engine(e.to_string()))?;
            }
            if let Some(whitelist) = config.whitelist_string() {
                lt.set_variable(Variable::TesseditCharWhitelist, &whitelist)
                    .map_err(|e| OcrError::Engine(e.to_string()))?;
            }
            lt.set_image_from_mem(image_bytes)
                .map_err(|e| OcrError::ImageDecode(e.to_string()))?;
            lt.get_utf8_text().map_err(|e| OcrError::Engine(e.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::SegmentationMode;
    use nfscan_core::LanguageCode;

    fn config() -> OcrConfig {
        OcrConfig::new(SegmentationMode::SingleBlock, &LanguageCode::invoice_default()).preserving_spaces()
    }

    #[test]
    fn mock_returns_preset_text() {
        let r = MockRecognizer::new("ITEM COD DESCRIÇÃO\n1 7891234567890 ARROZ");
        assert_eq!(r.recognize(b"fake image data", &config()).unwrap(), "ITEM COD DESCRIÇÃO\n1 7891234567890 ARROZ");
    }

    #[test]
    fn mock_ignores_image_content() {
        let r = MockRecognizer::new("hello");
        assert_eq!(r.recognize(b"anything", &config()).unwrap(), "hello");
        assert_eq!(r.recognize(b"", &config()).unwrap(), "hello");
    }

    #[test]
    fn closure_backend_sees_profile() {
        let backend = |_: &[u8], c: &OcrConfig| Ok::<_, OcrError>(format!("psm {}", c.segmentation_mode.code()));
        assert_eq!(backend.recognize(b"", &config()).unwrap(), "psm 6");
    }

    #[test]
    fn cli_args_order() {
        let cli = TesseractCli::new("tesseract", Some(PathBuf::from("/share/tessdata")), Duration::from_secs(5));
        let args = cli.args(std::path::Path::new("/tmp/in.png"), &config());
        assert_eq!(
            args,
            vec![
                "/tmp/in.png", "stdout", "--tessdata-dir", "/share/tessdata", "-l", "por+eng",
                "--oem", "3", "--psm", "6", "-c", "preserve_interword_spaces=1",
            ]
        );
    }

    #[test]
    fn missing_executable_is_not_available() {
        let cli = TesseractCli::new("/nonexistent/bin/tesseract", None, Duration::from_secs(5));
        let err = cli.recognize(b"png", &config()).unwrap_err();
        assert!(matches!(err, OcrError::NotAvailable(_)), "got {err:?}");
    }

    #[cfg(unix)]
    #[test]
    fn slow_engine_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("slow-ocr");
        std::fs::write(&script, "#!/bin/sh\nsleep 5\n").unwrap();
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let cli = TesseractCli::new(&script, None, Duration::from_millis(200));
        let err = cli.recognize(b"png", &config()).unwrap_err();
        assert!(matches!(err, OcrError::Timeout(_)), "got {err:?}");
    }

    #[cfg(unix)]
    #[test]
    fn engine_stdout_is_returned_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("echo-ocr");
        std::fs::write(&script, "#!/bin/sh\nprintf 'TOTAL 12,50\\n\\n'\n").unwrap();
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let cli = TesseractCli::new(&script, None, Duration::from_secs(5));
        assert_eq!(cli.recognize(b"png", &config()).unwrap(), "TOTAL 12,50\n\n");
    }
}
