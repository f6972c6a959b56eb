//! The inference flow: load model, detect, show, save.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::display;
use crate::error::{Result, VisionError};
use crate::helpers::{Annotator, find_system_font, load_font};
use crate::model::{ModelOptions, YoloModel};
use crate::postprocess::PostprocessConfig;
use crate::results::Results;

#[derive(Debug, Clone)]
pub struct PredictOptions {
    pub model: PathBuf,
    pub source: PathBuf,
    pub output: PathBuf,
    pub postprocess: PostprocessConfig,
    pub model_options: ModelOptions,
    pub show: bool,
    pub font: Option<PathBuf>,
    pub line_width: Option<u32>,
    pub hide_labels: bool,
    pub hide_conf: bool,
    pub save_json: Option<PathBuf>,
    /// Directory for per-detection crops.
    pub save_crop: Option<PathBuf>,
    /// CSV log that detections are appended to.
    pub save_csv: Option<PathBuf>,
}

impl Default for PredictOptions {
    fn default() -> Self {
        Self {
            model: PathBuf::from("yolov8n.onnx"),
            source: PathBuf::from("Plates/car.jpg"),
            output: PathBuf::from("output_car.jpg"),
            postprocess: PostprocessConfig::default(),
            model_options: ModelOptions::default(),
            show: true,
            font: None,
            line_width: None,
            hide_labels: false,
            hide_conf: false,
            save_json: None,
            save_crop: None,
            save_csv: None,
        }
    }
}

impl PredictOptions {
    fn annotator(&self) -> Result<Annotator> {
        let font = match &self.font {
            Some(path) => Some(load_font(path)?),
            None if self.hide_labels => None,
            None => {
                let font = find_system_font();
                if font.is_none() {
                    warn!("No font found, drawing boxes without labels (use --font)");
                }
                font
            }
        };
        Ok(Annotator {
            line_width: self.line_width,
            hide_labels: self.hide_labels,
            hide_conf: self.hide_conf,
            ..Annotator::default()
        }
        .with_font(font))
    }
}

/// Runs the inference flow. Returns the results and the written image path.
///
/// Both input files are checked before the model is built, so a bad path
/// fails without touching the output.
pub fn run(options: &PredictOptions) -> Result<(Results, PathBuf)> {
    if !options.model.is_file() {
        return Err(VisionError::ModelNotFound(options.model.clone()));
    }
    if !options.source.is_file() {
        return Err(VisionError::ImageNotFound(options.source.clone()));
    }
    let annotator = options.annotator()?;

    let model = YoloModel::load(&options.model, &options.model_options)?;
    let image = image::open(&options.source)?;
    debug!("Decoded {} ({}x{})", options.source.display(), image.width(), image.height());

    let results = model.predict(image, &options.source, &options.postprocess)?;
    log_results(&results);

    let saved = write_outputs(
        &results,
        model.path(),
        options,
        &annotator,
        display::display_available(),
    )?;
    Ok((results, saved))
}

fn log_results(results: &Results) {
    info!("{}", results.summary());
    for det in &results.detections {
        info!(
            "  {} {:.2}% [{:.0}, {:.0}, {:.0}, {:.0}]",
            results.names.get(det.class_id),
            det.confidence * 100.0,
            det.bbox.x1,
            det.bbox.y1,
            det.bbox.x2,
            det.bbox.y2
        );
    }
    info!("{}", results.speed_summary());
}

/// Shows the rendered result, then saves it and the optional reports.
/// Returns the saved image path.
///
/// A failed show returns before anything is written.
pub fn write_outputs(
    results: &Results,
    model: &Path,
    options: &PredictOptions,
    annotator: &Annotator,
    display_available: bool,
) -> Result<PathBuf> {
    if options.show {
        results.show_on(annotator, display_available)?;
    }
    let saved = results.save(&options.output, annotator)?;

    if let Some(json) = &options.save_json {
        results.save_json(json, model)?;
        info!("Wrote detections to {}", json.display());
    }
    if let Some(dir) = &options.save_crop {
        let crops = results.save_crops(dir)?;
        info!("Saved {} crops to {}", crops.len(), dir.display());
    }
    if let Some(csv) = &options.save_csv {
        results.save_csv(csv)?;
        info!("Appended {} rows to {}", results.len(), csv.display());
    }

    Ok(saved)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use image::{Rgb, RgbImage};

    use super::*;
    use crate::mapping::ClassNames;
    use crate::results::{BBox, Detection, Speed};

    fn results() -> Results {
        Results {
            path: PathBuf::from("Plates/car.jpg"),
            orig_img: RgbImage::from_pixel(64, 48, Rgb([90, 90, 90])),
            input_shape: (640, 640),
            detections: vec![Detection {
                bbox: BBox::new(8.0, 8.0, 40.0, 30.0),
                class_id: 2,
                confidence: 0.87,
            }],
            names: ClassNames::coco(),
            speed: Speed {
                inference: Duration::from_millis(30),
                ..Speed::default()
            },
        }
    }

    fn all_outputs(dir: &Path, show: bool) -> PredictOptions {
        PredictOptions {
            output: dir.join("output_car.jpg"),
            show,
            save_json: Some(dir.join("detections.json")),
            save_crop: Some(dir.join("crops")),
            save_csv: Some(dir.join("plates.csv")),
            ..PredictOptions::default()
        }
    }

    #[test]
    fn test_display_failure_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let options = all_outputs(dir.path(), true);

        let err = write_outputs(
            &results(),
            Path::new("yolov8n.onnx"),
            &options,
            &Annotator::default(),
            false,
        );
        assert!(matches!(err, Err(VisionError::DisplayUnavailable)));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_no_show_saves_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let options = all_outputs(dir.path(), false);

        let saved = write_outputs(
            &results(),
            Path::new("yolov8n.onnx"),
            &options,
            &Annotator::default(),
            false,
        )
        .unwrap();

        assert_eq!(saved, dir.path().join("output_car.jpg"));
        let decoded = image::open(&saved).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (64, 48));
        assert!(dir.path().join("detections.json").is_file());
        assert!(dir.path().join("crops/0.png").is_file());
        assert_eq!(
            std::fs::read_to_string(dir.path().join("plates.csv")).unwrap().lines().count(),
            2
        );
    }

    #[test]
    fn test_second_run_overwrites_output() {
        let dir = tempfile::tempdir().unwrap();
        let options = PredictOptions {
            output: dir.path().join("output_car.jpg"),
            show: false,
            ..PredictOptions::default()
        };
        std::fs::write(&options.output, b"stale").unwrap();

        for _ in 0..2 {
            write_outputs(&results(), Path::new("m.onnx"), &options, &Annotator::default(), true)
                .unwrap();
        }
        assert!(image::open(&options.output).is_ok());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_defaults_match_original_paths() {
        let options = PredictOptions::default();
        assert_eq!(options.model, PathBuf::from("yolov8n.onnx"));
        assert_eq!(options.source, PathBuf::from("Plates/car.jpg"));
        assert_eq!(options.output, PathBuf::from("output_car.jpg"));
        assert!(options.show);
    }

    #[test]
    fn test_missing_model_fails_before_output() {
        let dir = tempfile::tempdir().unwrap();
        let options = PredictOptions {
            model: dir.path().join("missing.onnx"),
            output: dir.path().join("out.jpg"),
            ..PredictOptions::default()
        };
        assert!(matches!(run(&options), Err(VisionError::ModelNotFound(_))));
        assert!(!options.output.exists());
    }

    #[test]
    fn test_missing_image_fails_before_output() {
        let dir = tempfile::tempdir().unwrap();
        let model = dir.path().join("yolov8n.onnx");
        std::fs::write(&model, [0x08, 0x08]).unwrap();
        let options = PredictOptions {
            model,
            source: dir.path().join("missing.jpg"),
            output: dir.path().join("out.jpg"),
            ..PredictOptions::default()
        };
        assert!(matches!(run(&options), Err(VisionError::ImageNotFound(_))));
        assert!(!options.output.exists());
    }

    #[test]
    fn test_bad_font_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let font = dir.path().join("font.ttf");
        std::fs::write(&font, b"nope").unwrap();
        let options = PredictOptions {
            font: Some(font),
            ..PredictOptions::default()
        };
        assert!(options.annotator().is_err());
    }
}
