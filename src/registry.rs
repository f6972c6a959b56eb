//! Known pretrained detection models.

use std::path::PathBuf;

use crate::error::{Result, VisionError};

/// Release the ONNX weights are fetched from unless overridden.
pub const DEFAULT_BASE_URL: &str = "https://github.com/ultralytics/assets/releases/download/v8.2.0";

/// Model metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelInfo {
    /// Model name/identifier.
    pub name: &'static str,
    /// Filename of the exported model, in the cache and in the export directory.
    pub filename: &'static str,
    pub description: &'static str,
}

/// YOLOv8 detection variants, smallest first.
pub const MODELS: &[ModelInfo] = &[
    ModelInfo {
        name: "yolov8n",
        filename: "yolov8n.onnx",
        description: "nano, small and fast",
    },
    ModelInfo {
        name: "yolov8s",
        filename: "yolov8s.onnx",
        description: "small",
    },
    ModelInfo {
        name: "yolov8m",
        filename: "yolov8m.onnx",
        description: "medium",
    },
    ModelInfo {
        name: "yolov8l",
        filename: "yolov8l.onnx",
        description: "large",
    },
    ModelInfo {
        name: "yolov8x",
        filename: "yolov8x.onnx",
        description: "extra large",
    },
];

impl ModelInfo {
    /// Download URL under `base_url`.
    pub fn url(&self, base_url: &str) -> String {
        format!("{}/{}", base_url.trim_end_matches('/'), self.filename)
    }
}

/// Resolves `yolov8n`, `yolov8n.pt` or `yolov8n.onnx` (any case) to a known model.
pub fn resolve(identifier: &str) -> Result<&'static ModelInfo> {
    let name = identifier.trim().to_ascii_lowercase();
    let stem = name
        .strip_suffix(".pt")
        .or_else(|| name.strip_suffix(".onnx"))
        .unwrap_or(&name);

    MODELS.iter().find(|m| m.name == stem).ok_or_else(|| {
        VisionError::UnknownModel {
            name: identifier.to_string(),
            known: MODELS.iter().map(|m| m.name).collect::<Vec<_>>().join(", "),
        }
    })
}

/// Returns the default weights cache: `~/.cache/yolo-plates/models` on Linux.
#[must_use]
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("yolo-plates")
        .join("models")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_variants() {
        assert_eq!(resolve("yolov8n").unwrap().filename, "yolov8n.onnx");
        assert_eq!(resolve("yolov8n.pt").unwrap().name, "yolov8n");
        assert_eq!(resolve("YOLOv8S.onnx").unwrap().name, "yolov8s");
        assert_eq!(resolve(" yolov8x ").unwrap().name, "yolov8x");
    }

    #[test]
    fn test_resolve_unknown() {
        let err = resolve("yolov9z").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("yolov9z"));
        assert!(msg.contains("yolov8n"));
    }

    #[test]
    fn test_url() {
        let info = resolve("yolov8n").unwrap();
        assert_eq!(
            info.url(DEFAULT_BASE_URL),
            "https://github.com/ultralytics/assets/releases/download/v8.2.0/yolov8n.onnx"
        );
        assert_eq!(info.url("http://mirror.local/models/"), "http://mirror.local/models/yolov8n.onnx");
    }

    #[test]
    fn test_default_cache_dir() {
        assert!(default_cache_dir().ends_with("yolo-plates/models"));
    }
}
