use std::cmp::Reverse;
use std::collections::HashMap;

use ndarray::{ArrayView1, ArrayViewD, Axis, Ix3, s};
use ordered_float::OrderedFloat;

use crate::error::{Result, VisionError};
use crate::preprocess::Letterbox;
use crate::results::{BBox, Detection};

#[derive(Debug, Clone)]
pub struct PostprocessConfig {
    /// Minimum class confidence for a candidate box.
    pub conf: f32,
    /// IoU above which the weaker of two boxes is suppressed.
    pub iou: f32,
    pub max_det: usize,
    /// Keep only these class ids.
    pub classes: Option<Vec<usize>>,
    /// Suppress across classes instead of per class.
    pub agnostic: bool,
}

impl Default for PostprocessConfig {
    fn default() -> Self {
        Self {
            conf: 0.25,
            iou: 0.7,
            max_det: 300,
            classes: None,
            agnostic: false,
        }
    }
}

/// Returns the index and value of the largest score.
pub fn argmax_and_max(scores: &ArrayView1<f32>) -> (usize, f32) {
    scores
        .iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |(max_idx, max_val), (i, &val)| {
            if val > max_val { (i, val) } else { (max_idx, max_val) }
        })
}

/// Decodes the detection head output of one batch item.
///
/// The head emits `[batch, 4 + nc, anchors]` with `cx, cy, w, h` followed by
/// per-class scores; some exports transpose the last two axes. With
/// `num_classes` the layout is found by matching `4 + nc` against either axis,
/// otherwise the longer axis is taken as the anchors.
pub fn decode(
    output: &ArrayViewD<f32>,
    batch_index: usize,
    letterbox: &Letterbox,
    config: &PostprocessConfig,
    num_classes: Option<usize>,
) -> Result<Vec<Detection>> {
    let shape = output.shape().to_vec();
    let output = output
        .view()
        .into_dimensionality::<Ix3>()
        .map_err(|_| VisionError::OutputShape(shape.clone()))?;
    if batch_index >= output.len_of(Axis(0)) {
        return Err(VisionError::OutputShape(shape));
    }

    let preds = output.index_axis(Axis(0), batch_index);
    let channels_first = match num_classes.map(|nc| nc + 4) {
        Some(c) if preds.nrows() == c => true,
        Some(c) if preds.ncols() == c => false,
        _ => preds.nrows() <= preds.ncols(),
    };
    let preds = if channels_first { preds } else { preds.reversed_axes() };
    if preds.nrows() < 5 {
        return Err(VisionError::OutputShape(shape));
    }

    let mut candidates = Vec::new();
    for column in preds.axis_iter(Axis(1)) {
        let (class_id, confidence) = argmax_and_max(&column.slice(s![4..]));
        if !(confidence >= config.conf) {
            continue;
        }
        if let Some(classes) = &config.classes {
            if !classes.contains(&class_id) {
                continue;
            }
        }
        let (cx, cy, w, h) = (column[0], column[1], column[2], column[3]);
        candidates.push(Detection {
            bbox: BBox::new(cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0),
            class_id,
            confidence,
        });
    }

    let mut kept = non_maximum_suppression(candidates, config.iou, config.agnostic);
    kept.truncate(config.max_det);

    Ok(kept
        .into_iter()
        .map(|det| Detection {
            bbox: BBox::from(letterbox.unletterbox(det.bbox.xyxy())),
            ..det
        })
        .collect())
}

/// Compute the Intersection over Union (IoU) of two `xyxy` boxes.
pub fn compute_iou(b1: &BBox, b2: &BBox) -> f32 {
    let inter_x1 = b1.x1.max(b2.x1);
    let inter_y1 = b1.y1.max(b2.y1);
    let inter_x2 = b1.x2.min(b2.x2);
    let inter_y2 = b1.y2.min(b2.y2);

    let inter_area = (inter_x2 - inter_x1).max(0.0) * (inter_y2 - inter_y1).max(0.0);
    let union_area = b1.area() + b2.area() - inter_area;
    if union_area <= 0.0 { 0.0 } else { inter_area / union_area }
}

/// Greedy NMS. Boxes are grouped by class unless `agnostic` is set; the
/// result is ordered by descending confidence.
pub fn non_maximum_suppression(
    detections: Vec<Detection>,
    iou_threshold: f32,
    agnostic: bool,
) -> Vec<Detection> {
    let mut by_class: HashMap<usize, Vec<usize>> = HashMap::new();
    for (i, det) in detections.iter().enumerate() {
        let key = if agnostic { 0 } else { det.class_id };
        by_class.entry(key).or_default().push(i);
    }

    let mut keep_indices: Vec<usize> = Vec::new();
    for indices in by_class.values_mut() {
        indices.sort_by_key(|&i| Reverse(OrderedFloat(detections[i].confidence)));

        let mut suppressed = vec![false; indices.len()];
        for i in 0..indices.len() {
            if suppressed[i] {
                continue;
            }
            let idx_i = indices[i];
            keep_indices.push(idx_i);
            for j in (i + 1)..indices.len() {
                if suppressed[j] {
                    continue;
                }
                let iou = compute_iou(&detections[idx_i].bbox, &detections[indices[j]].bbox);
                if iou > iou_threshold {
                    suppressed[j] = true;
                }
            }
        }
    }

    // ties keep input order so output is deterministic across HashMap layouts
    keep_indices.sort_by_key(|&i| (Reverse(OrderedFloat(detections[i].confidence)), i));
    keep_indices.into_iter().map(|i| detections[i].clone()).collect()
}
