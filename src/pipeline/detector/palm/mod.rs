mod anchors;

use std::{cmp::Ordering, f32::consts::PI, path::Path};

use anchors::{NUM_ANCHORS, anchors};
use anyhow::{Context, Result, anyhow, ensure};
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::Tensor;

use super::common::{LetterboxInfo, PALM_INPUT_SIZE, prepare_frame_with_size};
use crate::types::{Frame, PalmRegion};

const PALM_KEYPOINTS: usize = 7;
const BOX_FEATURES: usize = 4 + PALM_KEYPOINTS * 2;
const MIN_CROP_SIDE: f32 = 80.0;
const CROP_EXPANSION: f32 = 2.4;

#[derive(Clone, Debug)]
pub struct PalmDetectorConfig {
    pub score_threshold: f32,
    pub nms_threshold: f32,
    pub top_k: usize,
}

impl Default for PalmDetectorConfig {
    fn default() -> Self {
        Self {
            score_threshold: 0.5,
            nms_threshold: 0.3,
            top_k: 32,
        }
    }
}

pub struct PalmDetector {
    session: Session,
    cfg: PalmDetectorConfig,
}

impl PalmDetector {
    pub fn new(model_path: &Path, cfg: PalmDetectorConfig) -> Result<Self> {
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(2)?
            .commit_from_file(model_path)
            .with_context(|| format!("failed to load palm detector from {}", model_path.display()))?;

        Ok(Self { session, cfg })
    }

    pub fn detect(&mut self, frame: &Frame) -> Result<Vec<PalmRegion>> {
        let (input, letterbox) = prepare_frame_with_size(frame, PALM_INPUT_SIZE)?;
        let tensor = Tensor::from_array(input)?;
        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .context("failed to run palm detector session")?;

        ensure!(
            outputs.len() >= 2,
            "palm detector returned {} outputs, expected at least 2",
            outputs.len()
        );
        let boxes = outputs[0].try_extract_array::<f32>()?;
        let scores = outputs[1].try_extract_array::<f32>()?;

        let raw = RawPalmOutput {
            boxes: boxes
                .as_slice()
                .ok_or_else(|| anyhow!("palm boxes not contiguous"))?,
            box_shape: boxes.shape(),
            scores: scores
                .as_slice()
                .ok_or_else(|| anyhow!("palm scores not contiguous"))?,
            score_shape: scores.shape(),
        };
        decode_palms(&raw, &letterbox, &self.cfg)
    }
}

/// Borrowed view of the two palm detector output tensors.
pub(crate) struct RawPalmOutput<'a> {
    pub boxes: &'a [f32],
    pub box_shape: &'a [usize],
    pub scores: &'a [f32],
    pub score_shape: &'a [usize],
}

fn trailing_dims(shape: &[usize], what: &str) -> Result<(usize, usize)> {
    match shape {
        [.., anchors, features] if shape.len() >= 3 => Ok((*anchors, *features)),
        _ => Err(anyhow!("unexpected palm {what} shape {shape:?}, need [batch, anchors, features]")),
    }
}

pub(crate) fn decode_palms(
    raw: &RawPalmOutput<'_>,
    letterbox: &LetterboxInfo,
    cfg: &PalmDetectorConfig,
) -> Result<Vec<PalmRegion>> {
    let (box_anchors, features) = trailing_dims(raw.box_shape, "box")?;
    let (score_anchors, score_stride) = trailing_dims(raw.score_shape, "score")?;
    ensure!(
        features >= BOX_FEATURES,
        "palm box feature dimension too small: {features}"
    );
    ensure!(
        box_anchors == score_anchors,
        "anchor dimension mismatch between boxes ({box_anchors}) and scores ({score_anchors})"
    );

    let input = PALM_INPUT_SIZE as f32;
    let scale = letterbox.orig_w.max(letterbox.orig_h) as f32;
    let bias = (letterbox.pad_x / letterbox.scale, letterbox.pad_y / letterbox.scale);
    // Normalized model coordinates relative to an anchor, back to frame pixels.
    let to_frame = |anchor: [f32; 2], dx: f32, dy: f32| {
        (
            (dx / input + anchor[0]) * scale - bias.0,
            (dy / input + anchor[1]) * scale - bias.1,
        )
    };

    let mut candidates = Vec::new();
    for (idx, anchor) in anchors().iter().take(NUM_ANCHORS.min(box_anchors)).enumerate() {
        let raw_score = *raw
            .scores
            .get(idx * score_stride)
            .ok_or_else(|| anyhow!("missing score for palm anchor {idx}"))?;
        let score = sigmoid(raw_score);
        if score < cfg.score_threshold {
            continue;
        }

        let f = raw
            .boxes
            .get(idx * features..idx * features + BOX_FEATURES)
            .ok_or_else(|| anyhow!("missing box features for palm anchor {idx}"))?;

        let (cx, cy) = to_frame(*anchor, f[0], f[1]);
        let (hw, hh) = (f[2] / input * scale / 2.0, f[3] / input * scale / 2.0);
        if hw <= 0.0 || hh <= 0.0 {
            continue;
        }
        let bbox = clamp_box(
            [cx - hw, cy - hh, cx + hw, cy + hh],
            letterbox.orig_w,
            letterbox.orig_h,
        );

        let landmarks = f[4..BOX_FEATURES]
            .chunks_exact(2)
            .map(|p| to_frame(*anchor, p[0], p[1]))
            .collect();

        candidates.push(PalmRegion {
            bbox,
            landmarks,
            score,
        });
    }

    let kept = nms(&candidates, cfg.nms_threshold, cfg.top_k);
    let mut kept_set = vec![false; candidates.len()];
    for idx in &kept {
        kept_set[*idx] = true;
    }
    let mut detections: Vec<PalmRegion> = candidates
        .into_iter()
        .zip(kept_set)
        .filter_map(|(c, keep)| keep.then_some(c))
        .collect();
    detections.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    Ok(detections)
}

pub fn pick_primary_region(regions: &[PalmRegion]) -> Option<&PalmRegion> {
    regions
        .iter()
        .max_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(Ordering::Equal))
}

/// Center, side length and rotation of the square crop fed to the landmark
/// model. The crop is generous so fingers extending past the palm survive.
pub fn crop_from_palm(region: &PalmRegion) -> ((f32, f32), f32, f32) {
    let center = mean(&region.landmarks).unwrap_or((
        (region.bbox[0] + region.bbox[2]) * 0.5,
        (region.bbox[1] + region.bbox[3]) * 0.5,
    ));

    let box_side = (region.bbox[2] - region.bbox[0])
        .abs()
        .max((region.bbox[3] - region.bbox[1]).abs());
    let keypoint_span = if region.landmarks.is_empty() {
        0.0
    } else {
        let (min_x, max_x, min_y, max_y) = region.landmarks.iter().fold(
            (f32::MAX, f32::MIN, f32::MAX, f32::MIN),
            |acc, (x, y)| (acc.0.min(*x), acc.1.max(*x), acc.2.min(*y), acc.3.max(*y)),
        );
        (max_x - min_x).max(max_y - min_y)
    };
    let side = box_side.max(keypoint_span).max(MIN_CROP_SIDE) * CROP_EXPANSION;

    (center, side, estimate_orientation(region))
}

/// Angle of the palm keypoints' principal axis, rotated so fingers point up.
pub fn estimate_orientation(region: &PalmRegion) -> f32 {
    let Some(m) = mean(&region.landmarks) else {
        return 0.0;
    };
    if region.landmarks.len() < 2 {
        return 0.0;
    }

    let n = region.landmarks.len() as f32;
    let (xx, xy, yy) = region
        .landmarks
        .iter()
        .fold((0.0, 0.0, 0.0), |acc, (x, y)| {
            let (dx, dy) = (x - m.0, y - m.1);
            (acc.0 + dx * dx, acc.1 + dx * dy, acc.2 + dy * dy)
        });
    let (xx, xy, yy) = (xx / n, xy / n, yy / n);

    let half_trace = (xx + yy) * 0.5;
    let det = xx * yy - xy * xy;
    let lambda = (half_trace + (half_trace.powi(2) - det).max(0.0).sqrt()).max(1e-6);
    let (vx, vy) = if xy.abs() > 1e-6 {
        (lambda - yy, xy)
    } else if xx >= yy {
        (1.0, 0.0)
    } else {
        (0.0, 1.0)
    };

    vy.atan2(vx) - PI * 0.5
}

fn mean(points: &[(f32, f32)]) -> Option<(f32, f32)> {
    if points.is_empty() {
        return None;
    }
    let (sx, sy) = points
        .iter()
        .fold((0.0_f32, 0.0_f32), |acc, p| (acc.0 + p.0, acc.1 + p.1));
    let n = points.len() as f32;
    Some((sx / n, sy / n))
}

/// Greedy non-maximum suppression; returns indices of kept candidates,
/// best score first.
fn nms(candidates: &[PalmRegion], threshold: f32, top_k: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..candidates.len()).collect();
    order.sort_by(|a, b| {
        candidates[*b]
            .score
            .partial_cmp(&candidates[*a].score)
            .unwrap_or(Ordering::Equal)
    });

    let mut keep: Vec<usize> = Vec::new();
    for idx in order {
        if keep.len() >= top_k {
            break;
        }
        let suppressed = keep
            .iter()
            .any(|k| iou(&candidates[idx].bbox, &candidates[*k].bbox) >= threshold);
        if !suppressed {
            keep.push(idx);
        }
    }
    keep
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let inter_w = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
    let inter_h = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
    let inter = inter_w * inter_h;
    if inter <= 0.0 {
        return 0.0;
    }

    let area = |r: &[f32; 4]| (r[2] - r[0]).max(0.0) * (r[3] - r[1]).max(0.0);
    let union = area(a) + area(b) - inter;
    if union <= 0.0 { 0.0 } else { inter / union }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

fn clamp_box(b: [f32; 4], w: u32, h: u32) -> [f32; 4] {
    let max_w = w.saturating_sub(1) as f32;
    let max_h = h.saturating_sub(1) as f32;
    [
        b[0].clamp(0.0, max_w),
        b[1].clamp(0.0, max_h),
        b[2].clamp(0.0, max_w),
        b[3].clamp(0.0, max_h),
    ]
}
