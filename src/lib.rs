pub mod cli;
pub mod commands;
pub mod config;
pub mod display;
pub mod error;
pub mod export;
pub mod helpers;
pub mod mapping;
pub mod model;
pub mod postprocess;
pub mod predict;
pub mod preprocess;
pub mod registry;
pub mod results;

pub use crate::error::{Result, VisionError};
pub use crate::export::{ExportOptions, export};
pub use crate::helpers::Annotator;
pub use crate::mapping::{ClassNames, load_class_mapping};
pub use crate::model::{ModelOptions, OnnxModel, YoloModel};
pub use crate::postprocess::{PostprocessConfig, non_maximum_suppression};
pub use crate::predict::PredictOptions;
pub use crate::preprocess::{Letterbox, PreprocessConfig, Processor};
pub use crate::results::{BBox, Detection, Results};
