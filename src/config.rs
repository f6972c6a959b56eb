//! Configuration file support for yolo-plates.
//!
//! Supports TOML configuration from:
//! - XDG config: `~/.config/yolo-plates/config.toml` (lowest priority)
//! - Project-local: `.yolo-plates.toml` (searched up directory tree)
//! - An explicit `--config <PATH>`, which replaces both
//! - CLI flags (highest priority, applied separately)

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, info, warn};

pub const PROJECT_CONFIG: &str = ".yolo-plates.toml";

/// Top-level configuration structure.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub export: ExportConfig,
    pub predict: PredictConfig,
}

/// Export flow settings.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExportConfig {
    /// Pretrained model identifier.
    pub model: Option<String>,
    /// Directory the `.onnx` file is written to.
    pub output_dir: Option<PathBuf>,
    /// Weights cache directory.
    pub cache_dir: Option<PathBuf>,
    /// Release URL the weights are downloaded from.
    pub base_url: Option<String>,
    /// Connect timeout for downloads, in seconds.
    pub timeout_secs: Option<u64>,
}

/// Inference flow settings.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PredictConfig {
    pub model: Option<PathBuf>,
    pub source: Option<PathBuf>,
    pub output: Option<PathBuf>,
    /// Confidence threshold (0.0-1.0).
    pub conf: Option<f32>,
    /// NMS IoU threshold (0.0-1.0).
    pub iou: Option<f32>,
    pub max_det: Option<usize>,
    /// Open the rendered result in an image viewer.
    pub show: Option<bool>,
    pub cuda: Option<bool>,
    pub font: Option<PathBuf>,
    pub labels: Option<PathBuf>,
    pub line_width: Option<u32>,
    pub agnostic_nms: Option<bool>,
    /// Directory for per-detection crops.
    pub save_crop: Option<PathBuf>,
    /// CSV log appended to on every run.
    pub save_csv: Option<PathBuf>,
}

impl AppConfig {
    /// Load configuration.
    ///
    /// With `explicit`, only that file is read and a failure to read or parse
    /// it is an error. Otherwise the XDG and project-local files are merged,
    /// and missing or broken files are skipped with a warning.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match explicit {
            Some(path) => {
                info!("Loading config: {}", path.display());
                let content = std::fs::read_to_string(path)
                    .map_err(|e| anyhow::anyhow!("failed to read config {}: {e}", path.display()))?;
                toml::from_str(&content)
                    .map_err(|e| anyhow::anyhow!("failed to parse config {}: {e}", path.display()))?
            }
            None => Self::discover(),
        };
        config.sanitize();
        Ok(config)
    }

    fn discover() -> Self {
        let mut config = Self::default();

        if let Some(xdg_path) = xdg_config_path() {
            if xdg_path.exists() {
                info!("Loading XDG config: {}", xdg_path.display());
                if let Some(xdg_config) = load_file(&xdg_path) {
                    config = xdg_config;
                }
            } else {
                debug!("XDG config not found: {}", xdg_path.display());
            }
        }

        if let Some(project_path) = find_project_config() {
            info!("Loading project config: {}", project_path.display());
            if let Some(project_config) = load_file(&project_path) {
                config.merge(project_config);
            }
        }

        config
    }

    /// Drops out-of-range values so the built-in defaults apply instead.
    fn sanitize(&mut self) {
        for (key, value) in [("conf", &mut self.predict.conf), ("iou", &mut self.predict.iou)] {
            if let Some(t) = *value {
                if !(0.0..=1.0).contains(&t) {
                    warn!("predict.{key} must be 0.0-1.0, got {t}; ignoring");
                    *value = None;
                }
            }
        }
        if self.predict.max_det == Some(0) {
            warn!("predict.max_det must be positive; ignoring");
            self.predict.max_det = None;
        }
        if self.predict.line_width == Some(0) {
            warn!("predict.line_width must be positive; ignoring");
            self.predict.line_width = None;
        }
    }

    /// Merge another config into this one.
    /// Values from `other` override values in `self` when present.
    fn merge(&mut self, other: Self) {
        let export = other.export;
        self.export.model = export.model.or_else(|| self.export.model.take());
        self.export.output_dir = export.output_dir.or_else(|| self.export.output_dir.take());
        self.export.cache_dir = export.cache_dir.or_else(|| self.export.cache_dir.take());
        self.export.base_url = export.base_url.or_else(|| self.export.base_url.take());
        self.export.timeout_secs = export.timeout_secs.or(self.export.timeout_secs);

        let predict = other.predict;
        self.predict.model = predict.model.or_else(|| self.predict.model.take());
        self.predict.source = predict.source.or_else(|| self.predict.source.take());
        self.predict.output = predict.output.or_else(|| self.predict.output.take());
        self.predict.conf = predict.conf.or(self.predict.conf);
        self.predict.iou = predict.iou.or(self.predict.iou);
        self.predict.max_det = predict.max_det.or(self.predict.max_det);
        self.predict.show = predict.show.or(self.predict.show);
        self.predict.cuda = predict.cuda.or(self.predict.cuda);
        self.predict.font = predict.font.or_else(|| self.predict.font.take());
        self.predict.labels = predict.labels.or_else(|| self.predict.labels.take());
        self.predict.line_width = predict.line_width.or(self.predict.line_width);
        self.predict.agnostic_nms = predict.agnostic_nms.or(self.predict.agnostic_nms);
        self.predict.save_crop = predict.save_crop.or_else(|| self.predict.save_crop.take());
        self.predict.save_csv = predict.save_csv.or_else(|| self.predict.save_csv.take());
    }
}

/// Get the XDG config file path.
fn xdg_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("yolo-plates").join("config.toml"))
}

/// Find project-local config by searching up from current directory.
fn find_project_config() -> Option<PathBuf> {
    let cwd = std::env::current_dir().ok()?;
    find_config_in_parents(&cwd)
}

/// Search for `.yolo-plates.toml` in the given directory and its parents.
fn find_config_in_parents(start: &Path) -> Option<PathBuf> {
    let mut current = Some(start);

    while let Some(dir) = current {
        let config_path = dir.join(PROJECT_CONFIG);
        if config_path.exists() {
            return Some(config_path);
        }
        current = dir.parent();
    }

    None
}

/// Load and parse a TOML config file.
fn load_file(path: &Path) -> Option<AppConfig> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to read config file {}: {}", path.display(), e);
            return None;
        }
    };

    match toml::from_str(&content) {
        Ok(config) => Some(config),
        Err(e) => {
            warn!("Failed to parse config file {}: {}", path.display(), e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty_config() {
        let config: AppConfig = toml::from_str("").expect("parse empty config");
        assert!(config.export.model.is_none());
        assert!(config.predict.conf.is_none());
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r"
[export]
model = 'yolov8s'
output_dir = 'models'
cache_dir = '/tmp/cache'
base_url = 'https://mirror.local/v8'
timeout_secs = 5

[predict]
model = 'models/yolov8s.onnx'
source = 'Plates/car2.jpg'
output = 'out/car2.jpg'
conf = 0.4
iou = 0.5
max_det = 10
show = false
cuda = true
font = 'fonts/Arial.ttf'
labels = 'labels.txt'
line_width = 3
agnostic_nms = true
save_crop = 'Resources/Plates'
save_csv = 'plates.csv'
";
        let config: AppConfig = toml::from_str(toml).expect("parse full config");
        assert_eq!(config.export.model.as_deref(), Some("yolov8s"));
        assert_eq!(config.export.timeout_secs, Some(5));
        assert_eq!(config.predict.source, Some(PathBuf::from("Plates/car2.jpg")));
        assert_eq!(config.predict.conf, Some(0.4));
        assert_eq!(config.predict.show, Some(false));
        assert_eq!(config.predict.agnostic_nms, Some(true));
        assert_eq!(config.predict.save_csv, Some(PathBuf::from("plates.csv")));
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let result: Result<AppConfig, _> = toml::from_str("[predict]\nconfidence = 0.3\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_merge_configs() {
        let mut base: AppConfig = toml::from_str(
            r"
[export]
model = 'yolov8n'
output_dir = 'models'

[predict]
conf = 0.5
",
        )
        .expect("parse base");

        let override_config: AppConfig = toml::from_str(
            r"
[export]
model = 'yolov8m'

[predict]
iou = 0.45
",
        )
        .expect("parse override");

        base.merge(override_config);

        assert_eq!(base.export.model.as_deref(), Some("yolov8m"));
        assert_eq!(base.export.output_dir, Some(PathBuf::from("models")));
        assert_eq!(base.predict.conf, Some(0.5));
        assert_eq!(base.predict.iou, Some(0.45));
    }

    #[test]
    fn test_sanitize_drops_out_of_range() {
        let mut config: AppConfig = toml::from_str(
            r"
[predict]
conf = 1.5
iou = 0.6
max_det = 0
",
        )
        .expect("parse");
        config.sanitize();
        assert!(config.predict.conf.is_none());
        assert_eq!(config.predict.iou, Some(0.6));
        assert!(config.predict.max_det.is_none());
    }

    #[test]
    fn test_find_config_in_parents() {
        let root = tempfile::tempdir().unwrap();
        let nested = root.path().join("a/b");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(root.path().join(PROJECT_CONFIG), "").unwrap();

        let found = find_config_in_parents(&nested).unwrap();
        assert_eq!(found, root.path().join(PROJECT_CONFIG));
    }

    #[test]
    fn test_explicit_config_errors() {
        assert!(AppConfig::load(Some(Path::new("/nonexistent/config.toml"))).is_err());

        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "[predict\n").unwrap();
        assert!(AppConfig::load(Some(file.path())).is_err());
    }

    #[test]
    fn test_explicit_config_loads() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "[predict]\nshow = false\nconf = 2.0\n").unwrap();
        let config = AppConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.predict.show, Some(false));
        assert!(config.predict.conf.is_none());
    }
}
