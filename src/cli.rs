use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Export pretrained YOLOv8 detectors to ONNX and run them on images.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file, replaces `.yolo-plates.toml` discovery
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Fetch a pretrained model and write it as <MODEL>.onnx
    Export(ExportArgs),
    /// Run an exported model on one image, show and save the result
    Predict(PredictArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct ExportArgs {
    /// Pretrained model identifier [default: yolov8n]
    pub model: Option<String>,

    /// Directory the ONNX file is written to [default: .]
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Weights cache directory
    #[arg(long, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Release URL the weights are downloaded from
    #[arg(long, value_name = "URL")]
    pub base_url: Option<String>,

    /// Connect timeout for downloads, in seconds [default: 30]
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Download again even if the model is cached
    #[arg(long)]
    pub refresh: bool,

    /// Load the exported model with ONNX Runtime and print its signature
    #[arg(long)]
    pub check: bool,

    /// Use the CUDA execution provider for --check
    #[arg(long)]
    pub cuda: bool,
}

#[derive(Args, Debug, Clone, Default)]
pub struct PredictArgs {
    /// ONNX model path [default: yolov8n.onnx]
    #[arg(long, value_name = "PATH")]
    pub model: Option<PathBuf>,

    /// image path [default: Plates/car.jpg]
    #[arg(long, value_name = "PATH")]
    pub source: Option<PathBuf>,

    /// Annotated image path, format from extension [default: output_car.jpg]
    #[arg(long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Confidence threshold [default: 0.25]
    #[arg(long, value_parser = unit_interval)]
    pub conf: Option<f32>,

    /// NMS IoU threshold [default: 0.7]
    #[arg(long, value_parser = unit_interval)]
    pub iou: Option<f32>,

    /// Maximum detections per image [default: 300]
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub max_det: Option<u32>,

    /// Keep only these class ids
    #[arg(long, num_args = 1.., value_name = "ID")]
    pub classes: Option<Vec<usize>>,

    /// Class-agnostic NMS
    #[arg(long)]
    pub agnostic_nms: bool,

    /// Do not open the result in an image viewer
    #[arg(long)]
    pub no_show: bool,

    /// TrueType font for labels
    #[arg(long, value_name = "PATH")]
    pub font: Option<PathBuf>,

    /// Labels file, one class name per line
    #[arg(long, value_name = "PATH")]
    pub labels: Option<PathBuf>,

    /// Box line width in pixels
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub line_width: Option<u32>,

    /// Draw boxes without labels
    #[arg(long)]
    pub hide_labels: bool,

    /// Draw labels without confidences
    #[arg(long)]
    pub hide_conf: bool,

    /// Also write the detections as JSON
    #[arg(long, value_name = "PATH")]
    pub save_json: Option<PathBuf>,

    /// Also write each detection cropped from the input as <DIR>/<i>.png
    #[arg(long, value_name = "DIR")]
    pub save_crop: Option<PathBuf>,

    /// Append detections with a timestamp to a CSV log
    #[arg(long, value_name = "PATH")]
    pub save_csv: Option<PathBuf>,

    /// Use the CUDA execution provider
    #[arg(long)]
    pub cuda: bool,
}

fn unit_interval(s: &str) -> Result<f32, String> {
    let v: f32 = s.parse().map_err(|e| format!("{e}"))?;
    if (0.0..=1.0).contains(&v) {
        Ok(v)
    } else {
        Err(format!("{v} is not in 0.0..=1.0"))
    }
}
