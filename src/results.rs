use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use image::RgbImage;
use serde::Serialize;
use tracing::debug;

use crate::display;
use crate::error::Result;
use crate::helpers::Annotator;
use crate::mapping::ClassNames;

/// Axis-aligned box in `xyxy` pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn xyxy(&self) -> [f32; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }

    /// Whole-pixel `(x, y, width, height)` covering the box inside a
    /// `width`x`height` image. Never empty; `None` only for an empty image.
    pub fn pixel_rect(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        if width == 0 || height == 0 {
            return None;
        }
        let x1 = (self.x1.floor().max(0.0) as u32).min(width - 1);
        let y1 = (self.y1.floor().max(0.0) as u32).min(height - 1);
        let x2 = (self.x2.ceil().max(0.0) as u32).clamp(x1 + 1, width);
        let y2 = (self.y2.ceil().max(0.0) as u32).clamp(y1 + 1, height);
        Some((x1, y1, x2 - x1, y2 - y1))
    }
}

impl From<[f32; 4]> for BBox {
    fn from(xyxy: [f32; 4]) -> Self {
        Self::new(xyxy[0], xyxy[1], xyxy[2], xyxy[3])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub bbox: BBox,
    pub class_id: usize,
    pub confidence: f32,
}

/// Wall time of each inference stage.
#[derive(Debug, Clone, Copy, Default)]
pub struct Speed {
    pub preprocess: Duration,
    pub inference: Duration,
    pub postprocess: Duration,
}

impl Speed {
    pub fn total(&self) -> Duration {
        self.preprocess + self.inference + self.postprocess
    }
}

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Detections for one image, with the image they were found in.
#[derive(Debug, Clone)]
pub struct Results {
    pub path: PathBuf,
    pub orig_img: RgbImage,
    /// Model input (height, width) the image was letterboxed to.
    pub input_shape: (u32, u32),
    pub detections: Vec<Detection>,
    pub names: ClassNames,
    pub speed: Speed,
}

impl Results {
    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    /// Detection count per class name, e.g. `1 car, 2 persons`.
    pub fn verbose(&self) -> String {
        if self.detections.is_empty() {
            return "(no detections)".to_string();
        }
        let mut counts: BTreeMap<usize, usize> = BTreeMap::new();
        for det in &self.detections {
            *counts.entry(det.class_id).or_default() += 1;
        }
        counts
            .into_iter()
            .map(|(id, n)| {
                let name = self.names.get(id);
                if n > 1 { format!("{n} {name}s") } else { format!("{n} {name}") }
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// One line summary in the form `image 1/1 <path>: 384x640 1 car, 41.2ms`.
    pub fn summary(&self) -> String {
        format!(
            "image 1/1 {}: {}x{} {}, {:.1}ms",
            self.path.display(),
            self.input_shape.0,
            self.input_shape.1,
            self.verbose(),
            millis(self.speed.inference)
        )
    }

    pub fn speed_summary(&self) -> String {
        format!(
            "Speed: {:.1}ms preprocess, {:.1}ms inference, {:.1}ms postprocess per image at shape (1, 3, {}, {})",
            millis(self.speed.preprocess),
            millis(self.speed.inference),
            millis(self.speed.postprocess),
            self.input_shape.0,
            self.input_shape.1
        )
    }

    /// Renders the detections onto a copy of the original image.
    pub fn plot(&self, annotator: &Annotator) -> RgbImage {
        annotator.annotate(&self.orig_img, &self.detections, &self.names)
    }

    /// Renders and opens the result in the platform image viewer. Returns the
    /// preview file handed to the viewer.
    pub fn show(&self, annotator: &Annotator) -> Result<PathBuf> {
        display::show(&self.plot(annotator))
    }

    /// Like [`Results::show`], with display availability decided by the caller.
    pub fn show_on(&self, annotator: &Annotator, display_available: bool) -> Result<PathBuf> {
        display::show_on(&self.plot(annotator), display_available)
    }

    /// Renders and writes the result to `filename`, replacing any existing file.
    /// The format follows the file extension.
    pub fn save(&self, filename: impl AsRef<Path>, annotator: &Annotator) -> Result<PathBuf> {
        let filename = filename.as_ref();
        if let Some(parent) = filename.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        self.plot(annotator).save(filename)?;
        debug!("Saved annotated image to {}", filename.display());
        Ok(filename.to_path_buf())
    }

    pub fn report(&self, model: &Path) -> Report {
        Report {
            source: self.path.clone(),
            model: model.to_path_buf(),
            width: self.orig_img.width(),
            height: self.orig_img.height(),
            detections: self
                .detections
                .iter()
                .map(|det| ReportDetection {
                    class_id: det.class_id,
                    name: self.names.get(det.class_id),
                    confidence: det.confidence,
                    bbox: det.bbox,
                })
                .collect(),
            speed_ms: ReportSpeed {
                preprocess: millis(self.speed.preprocess),
                inference: millis(self.speed.inference),
                postprocess: millis(self.speed.postprocess),
            },
            created_at: Utc::now(),
        }
    }

    /// Writes the JSON report of these detections.
    pub fn save_json(&self, filename: impl AsRef<Path>, model: &Path) -> Result<()> {
        let filename = filename.as_ref();
        if let Some(parent) = filename.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.report(model))?;
        fs::write(filename, json)?;
        Ok(())
    }

    /// Writes every detection cut from the original image as `<dir>/<i>.png`,
    /// `i` being the detection's rank.
    pub fn save_crops(&self, dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let (width, height) = self.orig_img.dimensions();

        let mut saved = Vec::with_capacity(self.detections.len());
        for (i, det) in self.detections.iter().enumerate() {
            let Some((x, y, w, h)) = det.bbox.pixel_rect(width, height) else {
                continue;
            };
            let path = dir.join(format!("{i}.png"));
            image::imageops::crop_imm(&self.orig_img, x, y, w, h)
                .to_image()
                .save(&path)?;
            saved.push(path);
        }
        debug!("Saved {} crops to {}", saved.len(), dir.display());
        Ok(saved)
    }

    /// Appends one row per detection to a CSV log, writing the header when the
    /// file is new. All rows of one call share a timestamp.
    pub fn save_csv(&self, filename: impl AsRef<Path>) -> Result<()> {
        let filename = filename.as_ref();
        if let Some(parent) = filename.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(filename)?;
        let is_new = file.metadata()?.len() == 0;
        let mut out = BufWriter::new(file);
        if is_new {
            writeln!(out, "{CSV_HEADER}")?;
        }

        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        for det in &self.detections {
            let name = self.names.get(det.class_id);
            writeln!(
                out,
                "{},{:.4},{:.1},{:.1},{:.1},{:.1},{timestamp}",
                csv_field(&name),
                det.confidence,
                det.bbox.x1,
                det.bbox.y1,
                det.bbox.x2,
                det.bbox.y2
            )?;
        }
        out.flush()?;
        Ok(())
    }
}

pub const CSV_HEADER: &str = "name,confidence,x1,y1,x2,y2,timestamp";

fn csv_field(value: &str) -> Cow<'_, str> {
    if value.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", value.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(value)
    }
}

#[derive(Debug, Serialize)]
pub struct Report {
    pub source: PathBuf,
    pub model: PathBuf,
    pub width: u32,
    pub height: u32,
    pub detections: Vec<ReportDetection>,
    pub speed_ms: ReportSpeed,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ReportDetection {
    pub class_id: usize,
    pub name: String,
    pub confidence: f32,
    pub bbox: BBox,
}

#[derive(Debug, Serialize)]
pub struct ReportSpeed {
    pub preprocess: f64,
    pub inference: f64,
    pub postprocess: f64,
}
