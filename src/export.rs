//! Produces `<name>.onnx` for a pretrained model: fetch into the weights
//! cache, verify, then copy to the export directory.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::{Result, VisionError};
use crate::model::{OnnxModel, log_signature};
use crate::registry::{self, DEFAULT_BASE_URL, ModelInfo};

/// Protobuf tag of `ModelProto.ir_version` (field 1, varint), the first
/// field every ONNX serializer writes.
const ONNX_IR_VERSION_TAG: u8 = 0x08;

#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub model: String,
    pub output_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub base_url: String,
    pub connect_timeout: Duration,
    /// Download again even when the cache has the file.
    pub refresh: bool,
    /// Open the exported file with ONNX Runtime.
    pub check: bool,
    pub cuda: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            model: "yolov8n".to_string(),
            output_dir: PathBuf::from("."),
            cache_dir: registry::default_cache_dir(),
            base_url: DEFAULT_BASE_URL.to_string(),
            connect_timeout: Duration::from_secs(30),
            refresh: false,
            check: false,
            cuda: false,
        }
    }
}

/// Runs the export flow and returns the path of the exported file.
pub fn export(options: &ExportOptions) -> Result<PathBuf> {
    let info = registry::resolve(&options.model)?;
    info!("Exporting {} ({})", info.name, info.description);

    let cached = fetch(info, options)?;
    verify(&cached)?;

    fs::create_dir_all(&options.output_dir)?;
    let target = options.output_dir.join(info.filename);
    if same_file(&cached, &target) {
        debug!("Cache and export target are the same file");
    } else {
        copy_atomic(&cached, &target)?;
    }

    if options.check {
        let session = OnnxModel::new(options.cuda).load_model(&target)?;
        log_signature(&session);
    }

    info!("Exported {}", target.display());
    Ok(target)
}

/// Returns the cached model file, downloading it when missing or when
/// `refresh` is set.
pub fn fetch(info: &ModelInfo, options: &ExportOptions) -> Result<PathBuf> {
    fs::create_dir_all(&options.cache_dir)?;
    let path = options.cache_dir.join(info.filename);

    if path.is_file() && !options.refresh {
        debug!("Model {} already cached at {}", info.name, path.display());
        return Ok(path);
    }

    download(&info.url(&options.base_url), &path, options.connect_timeout)?;
    Ok(path)
}

/// Streams `url` into `path` through a temp file in the same directory, so
/// the destination only ever holds a complete download.
pub fn download(url: &str, path: &Path, connect_timeout: Duration) -> Result<()> {
    info!("Downloading {url}");
    let agent = ureq::AgentBuilder::new()
        .timeout_connect(connect_timeout)
        .build();

    let response = agent.get(url).call().map_err(|e| VisionError::Download {
        url: url.to_string(),
        reason: e.to_string(),
    })?;

    let total = response
        .header("Content-Length")
        .and_then(|v| v.parse::<u64>().ok());
    let pb = progress_bar(total)?;
    let mut reader = pb.wrap_read(response.into_reader());

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    let written = io::copy(&mut reader, &mut tmp).map_err(|e| VisionError::Download {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    pb.finish_and_clear();

    if let Some(expected) = total {
        if written != expected {
            return Err(VisionError::Download {
                url: url.to_string(),
                reason: format!("received {written} of {expected} bytes"),
            });
        }
    }

    tmp.persist(path).map_err(|e| VisionError::Io(e.error))?;
    info!("Downloaded {} ({written} bytes)", path.display());
    Ok(())
}

fn progress_bar(total: Option<u64>) -> Result<ProgressBar> {
    let pb = match total {
        Some(len) => ProgressBar::new(len),
        None => ProgressBar::new_spinner(),
    };
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
            .map_err(|e| VisionError::Io(io::Error::other(format!("progress template: {e}"))))?
            .progress_chars("#>-"),
    );
    Ok(pb)
}

/// Checks that `path` holds a serialized ONNX model.
pub fn verify(path: &Path) -> Result<()> {
    let invalid = |reason: &str| VisionError::InvalidOnnx {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };

    let mut head = [0u8; 2];
    let mut file = File::open(path)?;
    let read = file.read(&mut head)?;
    match read {
        0 => Err(invalid("file is empty")),
        _ if head[0] != ONNX_IR_VERSION_TAG => Err(invalid(
            "missing ir_version header, delete the cached file or pass --refresh",
        )),
        1 => Err(invalid("file is truncated")),
        _ => Ok(()),
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Replaces `to` with a copy of `from` in one rename.
fn copy_atomic(from: &Path, to: &Path) -> Result<()> {
    let dir = to.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    io::copy(&mut File::open(from)?, &mut tmp)?;
    tmp.persist(to).map_err(|e| VisionError::Io(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Smallest byte sequence that passes [`verify`]: ir_version = 8.
    const FAKE_ONNX: &[u8] = &[0x08, 0x08, 0x12, 0x07, b'p', b'y', b't', b'o', b'r', b'c', b'h'];

    fn options(cache: &Path, out: &Path) -> ExportOptions {
        ExportOptions {
            output_dir: out.to_path_buf(),
            cache_dir: cache.to_path_buf(),
            // unroutable, any attempt to download fails fast
            base_url: "http://127.0.0.1:9".to_string(),
            connect_timeout: Duration::from_millis(200),
            ..ExportOptions::default()
        }
    }

    #[test]
    fn test_verify() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.onnx");
        fs::write(&good, FAKE_ONNX).unwrap();
        assert!(verify(&good).is_ok());

        let empty = dir.path().join("empty.onnx");
        fs::write(&empty, b"").unwrap();
        assert!(matches!(verify(&empty), Err(VisionError::InvalidOnnx { .. })));

        let html = dir.path().join("html.onnx");
        fs::write(&html, b"<!DOCTYPE html>").unwrap();
        assert!(matches!(verify(&html), Err(VisionError::InvalidOnnx { .. })));

        assert!(matches!(verify(&dir.path().join("missing.onnx")), Err(VisionError::Io(_))));
    }

    #[test]
    fn test_export_from_cache_is_idempotent() {
        let cache = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        fs::write(cache.path().join("yolov8n.onnx"), FAKE_ONNX).unwrap();

        let opts = options(cache.path(), out.path());
        let first = export(&opts).unwrap();
        let second = export(&opts).unwrap();

        assert_eq!(first, out.path().join("yolov8n.onnx"));
        assert_eq!(first, second);
        assert_eq!(fs::read(&first).unwrap(), FAKE_ONNX);
        assert_eq!(fs::read_dir(out.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_export_overwrites_stale_target() {
        let cache = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        fs::write(cache.path().join("yolov8s.onnx"), FAKE_ONNX).unwrap();
        fs::write(out.path().join("yolov8s.onnx"), b"old").unwrap();

        let opts = ExportOptions {
            model: "yolov8s.pt".to_string(),
            ..options(cache.path(), out.path())
        };
        let target = export(&opts).unwrap();
        assert_eq!(fs::read(target).unwrap(), FAKE_ONNX);
    }

    #[test]
    fn test_export_into_cache_dir() {
        let cache = tempfile::tempdir().unwrap();
        fs::write(cache.path().join("yolov8n.onnx"), FAKE_ONNX).unwrap();

        let target = export(&options(cache.path(), cache.path())).unwrap();
        assert_eq!(fs::read(target).unwrap(), FAKE_ONNX);
    }

    #[test]
    fn test_export_unknown_model() {
        let cache = tempfile::tempdir().unwrap();
        let opts = ExportOptions {
            model: "resnet50".to_string(),
            ..options(cache.path(), cache.path())
        };
        assert!(matches!(export(&opts), Err(VisionError::UnknownModel { .. })));
    }

    #[test]
    fn test_export_invalid_cache_leaves_no_output() {
        let cache = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        fs::write(cache.path().join("yolov8n.onnx"), b"Not Found").unwrap();

        let result = export(&options(cache.path(), out.path()));
        assert!(matches!(result, Err(VisionError::InvalidOnnx { .. })));
        assert!(!out.path().join("yolov8n.onnx").exists());
    }

    #[test]
    fn test_fetch_download_failure_leaves_cache_clean() {
        let cache = tempfile::tempdir().unwrap();
        let info = registry::resolve("yolov8n").unwrap();
        let opts = options(cache.path(), cache.path());

        assert!(matches!(fetch(info, &opts), Err(VisionError::Download { .. })));
        assert_eq!(fs::read_dir(cache.path()).unwrap().count(), 0);
    }
}
