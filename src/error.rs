//! Error types for yolo-plates

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VisionError {
    #[error("unknown model '{name}', expected one of: {known}")]
    UnknownModel { name: String, known: String },

    #[error("model file not found: {}", .0.display())]
    ModelNotFound(PathBuf),

    #[error("image file not found: {}", .0.display())]
    ImageNotFound(PathBuf),

    #[error("{} is not a valid ONNX model: {reason}", .path.display())]
    InvalidOnnx { path: PathBuf, reason: String },

    #[error("unexpected model output shape {0:?}")]
    OutputShape(Vec<usize>),

    #[error("model has no {0}")]
    MissingTensor(&'static str),

    #[error("failed to download {url}: {reason}")]
    Download { url: String, reason: String },

    #[error("no display available to show results")]
    DisplayUnavailable,

    #[error("failed to launch image viewer '{viewer}'")]
    Viewer {
        viewer: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("ONNX Runtime error: {0}")]
    Ort(#[from] ort::Error),

    #[error("Shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("Resize error: {0}")]
    Resize(#[from] fast_image_resize::ResizeError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = VisionError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_model_lists_known_names() {
        let err = VisionError::UnknownModel {
            name: "yolov9z".to_string(),
            known: "yolov8n, yolov8s".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("yolov9z"));
        assert!(msg.contains("yolov8n, yolov8s"));
    }

    #[test]
    fn test_not_found_errors_show_path() {
        let err = VisionError::ModelNotFound(PathBuf::from("missing.onnx"));
        assert_eq!(err.to_string(), "model file not found: missing.onnx");

        let err = VisionError::ImageNotFound(PathBuf::from("Plates/none.jpg"));
        assert!(err.to_string().contains("Plates/none.jpg"));
    }
}
