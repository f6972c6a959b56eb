//! Subcommand handlers: CLI flags over config values over built-in defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::info;

use crate::cli::{ExportArgs, PredictArgs};
use crate::config::{ExportConfig, PredictConfig};
use crate::error::Result;
use crate::export::{self, ExportOptions};
use crate::model::ModelOptions;
use crate::postprocess::PostprocessConfig;
use crate::predict::{self, PredictOptions};

pub fn export_options(args: &ExportArgs, config: &ExportConfig) -> ExportOptions {
    let defaults = ExportOptions::default();
    ExportOptions {
        model: args
            .model
            .clone()
            .or_else(|| config.model.clone())
            .unwrap_or(defaults.model),
        output_dir: args
            .output_dir
            .clone()
            .or_else(|| config.output_dir.clone())
            .unwrap_or(defaults.output_dir),
        cache_dir: args
            .cache_dir
            .clone()
            .or_else(|| config.cache_dir.clone())
            .unwrap_or(defaults.cache_dir),
        base_url: args
            .base_url
            .clone()
            .or_else(|| config.base_url.clone())
            .unwrap_or(defaults.base_url),
        connect_timeout: args
            .timeout
            .or(config.timeout_secs)
            .map_or(defaults.connect_timeout, Duration::from_secs),
        refresh: args.refresh,
        check: args.check,
        cuda: args.cuda,
    }
}

pub fn predict_options(args: &PredictArgs, config: &PredictConfig) -> PredictOptions {
    let defaults = PredictOptions::default();
    let pp = PostprocessConfig::default();
    PredictOptions {
        model: pick(&args.model, &config.model).unwrap_or(defaults.model),
        source: pick(&args.source, &config.source).unwrap_or(defaults.source),
        output: pick(&args.output, &config.output).unwrap_or(defaults.output),
        postprocess: PostprocessConfig {
            conf: args.conf.or(config.conf).unwrap_or(pp.conf),
            iou: args.iou.or(config.iou).unwrap_or(pp.iou),
            max_det: args
                .max_det
                .map(|n| n as usize)
                .or(config.max_det)
                .unwrap_or(pp.max_det),
            classes: args.classes.clone(),
            agnostic: args.agnostic_nms || config.agnostic_nms.unwrap_or(false),
        },
        model_options: ModelOptions {
            cuda: args.cuda || config.cuda.unwrap_or(false),
            labels: pick(&args.labels, &config.labels),
        },
        show: !args.no_show && config.show.unwrap_or(defaults.show),
        font: pick(&args.font, &config.font),
        line_width: args.line_width.or(config.line_width),
        hide_labels: args.hide_labels,
        hide_conf: args.hide_conf,
        save_json: args.save_json.clone(),
        save_crop: pick(&args.save_crop, &config.save_crop),
        save_csv: pick(&args.save_csv, &config.save_csv),
    }
}

fn pick(arg: &Option<PathBuf>, config: &Option<PathBuf>) -> Option<PathBuf> {
    arg.clone().or_else(|| config.clone())
}

/// `export [MODEL]`
pub fn run_export(args: &ExportArgs, config: &ExportConfig) -> Result<PathBuf> {
    export::export(&export_options(args, config))
}

/// `predict`
pub fn run_predict(args: &PredictArgs, config: &PredictConfig) -> Result<PathBuf> {
    let options = predict_options(args, config);
    info!(
        "Predicting {} with {} (conf {}, iou {})",
        options.source.display(),
        options.model.display(),
        options.postprocess.conf,
        options.postprocess.iou
    );
    let (_, saved) = predict::run(&options)?;
    println!("{}", saved_message(&saved));
    Ok(saved)
}

/// The one line `predict` prints to stdout.
pub fn saved_message(output: &Path) -> String {
    format!("✅ Results saved as {}", output.display())
}
