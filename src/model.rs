use std::path::{Path, PathBuf};
use std::time::Instant;

use image::DynamicImage;
use ndarray::CowArray;
use ort::execution_providers::{
    CPUExecutionProvider, CUDAExecutionProvider, ExecutionProviderDispatch,
};
use ort::session::Session;
use ort::session::builder::{GraphOptimizationLevel, SessionBuilder};
use ort::value::ValueType;
use tracing::{debug, info, warn};

use crate::error::{Result, VisionError};
use crate::mapping::{ClassNames, load_class_mapping, parse_metadata_imgsz, parse_metadata_names};
use crate::postprocess::{PostprocessConfig, decode};
use crate::preprocess::{PreprocessConfig, Processor};
use crate::results::{Results, Speed};

const DEFAULT_IMGSZ: u32 = 640;

/// Builds ONNX Runtime sessions on the selected execution provider.
pub struct OnnxModel {
    provider: [ExecutionProviderDispatch; 1],
}

impl OnnxModel {
    pub fn new(cuda: bool) -> Self {
        let provider = if cuda {
            [CUDAExecutionProvider::default().build().error_on_failure()]
        } else {
            [CPUExecutionProvider::default().build()]
        };
        Self { provider }
    }

    pub fn load_model(&self, model_path: &Path) -> Result<Session> {
        let session = SessionBuilder::new()?
            .with_execution_providers(self.provider.clone())?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .commit_from_file(model_path)?;
        Ok(session)
    }
}

/// Logs the inputs and outputs of a session.
pub fn log_signature(session: &Session) {
    for input in &session.inputs {
        info!("input  {}: {:?}", input.name, input.input_type);
    }
    for output in &session.outputs {
        info!("output {}: {:?}", output.name, output.output_type);
    }
}

#[derive(Debug, Clone, Default)]
pub struct ModelOptions {
    pub cuda: bool,
    /// Labels file overriding the names stored in the model.
    pub labels: Option<PathBuf>,
}

/// A YOLOv8 detection model exported to ONNX.
pub struct YoloModel {
    session: Session,
    path: PathBuf,
    processor: Processor,
    names: ClassNames,
}

impl std::fmt::Debug for YoloModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("YoloModel")
            .field("path", &self.path)
            .field("input_size", &self.input_size())
            .field("classes", &self.names.len())
            .finish()
    }
}

impl YoloModel {
    pub fn load(path: impl AsRef<Path>, options: &ModelOptions) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(VisionError::ModelNotFound(path.to_path_buf()));
        }

        let session = OnnxModel::new(options.cuda).load_model(path)?;
        let (metadata_names, metadata_imgsz) = match session.metadata() {
            Ok(metadata) => (
                metadata.custom("names").ok().flatten(),
                metadata.custom("imgsz").ok().flatten(),
            ),
            Err(e) => {
                debug!("Model has no readable metadata: {e}");
                (None, None)
            }
        };

        let (height, width) = input_size(&session, metadata_imgsz.as_deref())?;
        let names = match &options.labels {
            Some(labels) => load_class_mapping(labels)?,
            None => metadata_names
                .as_deref()
                .and_then(parse_metadata_names)
                .unwrap_or_default(),
        };

        let model = Self {
            session,
            path: path.to_path_buf(),
            processor: Processor::new(PreprocessConfig {
                height,
                width,
                ..PreprocessConfig::default()
            }),
            names,
        };
        model.summary();
        Ok(model)
    }

    pub fn summary(&self) {
        let (height, width) = self.input_size();
        info!(
            "Loaded {} ({}x{}, {} classes)",
            self.path.display(),
            height,
            width,
            self.names.len()
        );
        log_signature(&self.session);
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Model input (height, width).
    pub fn input_size(&self) -> (u32, u32) {
        (self.processor.config.height, self.processor.config.width)
    }

    pub fn names(&self) -> &ClassNames {
        &self.names
    }

    /// Runs the model on one image.
    pub fn predict(
        &self,
        image: DynamicImage,
        source: impl AsRef<Path>,
        config: &PostprocessConfig,
    ) -> Result<Results> {
        let t = Instant::now();
        let (xs, letterboxes) = self.processor.preprocess(std::slice::from_ref(&image))?;
        let preprocess = t.elapsed();

        let t = Instant::now();
        let xs = CowArray::from(xs);
        let ys = self.session.run(ort::inputs![xs.view()]?)?;
        let inference = t.elapsed();

        let t = Instant::now();
        let (_, output) = ys
            .iter()
            .next()
            .ok_or(VisionError::MissingTensor("outputs"))?;
        let output = output.try_extract_tensor::<f32>()?;
        let letterbox = letterboxes
            .first()
            .ok_or(VisionError::MissingTensor("preprocessed input"))?;
        let detections = decode(&output, 0, letterbox, config, Some(self.names.len()))?;
        let postprocess = t.elapsed();

        Ok(Results {
            path: source.as_ref().to_path_buf(),
            orig_img: image.to_rgb8(),
            input_shape: self.input_size(),
            detections,
            names: self.names.clone(),
            speed: Speed {
                preprocess,
                inference,
                postprocess,
            },
        })
    }
}

/// Reads (height, width) from the first input's `[N, C, H, W]` dims, falling
/// back to the exporter's `imgsz` metadata for dynamic axes.
fn input_size(session: &Session, metadata_imgsz: Option<&str>) -> Result<(u32, u32)> {
    let input = session
        .inputs
        .first()
        .ok_or(VisionError::MissingTensor("inputs"))?;

    if let ValueType::Tensor { dimensions, .. } = &input.input_type {
        if let [_, _, h, w] = dimensions.as_slice() {
            if *h > 0 && *w > 0 {
                return Ok((*h as u32, *w as u32));
            }
        }
    }

    match metadata_imgsz.and_then(parse_metadata_imgsz) {
        Some(size) => Ok(size),
        None => {
            warn!("Dynamic input size without imgsz metadata, using {DEFAULT_IMGSZ}");
            Ok((DEFAULT_IMGSZ, DEFAULT_IMGSZ))
        }
    }
}
