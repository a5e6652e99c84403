use std::path::{Path, PathBuf};

use anyhow::{Context, Result, ensure};
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::Tensor;

use super::{
    DetectorLoader, HandLandmarker,
    common::{self, LANDMARK_INPUT_SIZE},
    palm::{PalmDetector, PalmDetectorConfig, crop_from_palm, pick_primary_region},
};
use crate::{
    error::SetupError,
    model_download::{ModelDownloadEvent, ModelKind, ensure_model_ready},
    types::{Frame, HandDetection, LandmarkSet},
};

/// Fetches (if needed) and opens the palm detector and hand landmark models.
#[derive(Clone, Debug)]
pub struct OrtLoader {
    models_dir: PathBuf,
    min_confidence: f32,
}

impl OrtLoader {
    pub fn new(models_dir: impl Into<PathBuf>, min_confidence: f32) -> Self {
        Self {
            models_dir: models_dir.into(),
            min_confidence,
        }
    }

    fn prepare(&self, model: ModelKind) -> Result<PathBuf> {
        ensure_model_ready(model, &self.models_dir, |event| {
            if let ModelDownloadEvent::AlreadyPresent { model } = event {
                log::debug!("{} model already present", model.label());
            }
        })
    }
}

impl DetectorLoader for OrtLoader {
    type Model = OrtLandmarker;

    fn load(&self) -> Result<OrtLandmarker, SetupError> {
        let load = || -> Result<OrtLandmarker> {
            let landmark_path = self.prepare(ModelKind::HandLandmarks)?;
            let palm_path = self.prepare(ModelKind::PalmDetector)?;
            let landmarker = OrtLandmarker::new(&landmark_path, &palm_path, self.min_confidence)?;
            log::info!(
                "hand landmark ORT backend ready using {} and palm detector {}",
                landmark_path.display(),
                palm_path.display()
            );
            Ok(landmarker)
        };

        load().map_err(|err| {
            log::error!("failed to load hand landmark models: {err:?}");
            SetupError::ModelLoad(format!("{err:#}"))
        })
    }
}

/// Two-stage estimator: palm detection on the full frame, then 21 landmarks
/// on a rotated crop around the best palm.
pub struct OrtLandmarker {
    landmarks: Session,
    palm_detector: PalmDetector,
    min_confidence: f32,
}

impl OrtLandmarker {
    fn new(landmark_path: &Path, palm_path: &Path, min_confidence: f32) -> Result<Self> {
        let landmarks = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(2)?
            .commit_from_file(landmark_path)
            .with_context(|| format!("failed to load ORT session from {}", landmark_path.display()))?;
        let palm_detector = PalmDetector::new(palm_path, PalmDetectorConfig::default())?;

        Ok(Self {
            landmarks,
            palm_detector,
            min_confidence,
        })
    }
}

impl HandLandmarker for OrtLandmarker {
    fn estimate_hands(&mut self, frame: &Frame) -> Result<Option<HandDetection>> {
        let palms = self.palm_detector.detect(frame)?;
        let Some(palm) = pick_primary_region(&palms) else {
            return Ok(None);
        };
        let (center, side, angle) = crop_from_palm(palm);

        let (input, transform) =
            common::prepare_rotated_crop(frame, center, side, angle, LANDMARK_INPUT_SIZE)?;
        let tensor = Tensor::from_array(input)?;
        let outputs = self
            .landmarks
            .run(ort::inputs![tensor])
            .context("failed to run hand landmark session")?;
        ensure!(outputs.len() >= 1, "hand landmark model returned no outputs");

        let coords: Vec<f32> = outputs[0].try_extract_array::<f32>()?.iter().copied().collect();
        let raw = common::decode_landmarks(&coords)?;
        let scalar_at = |index: usize| -> f32 {
            if outputs.len() <= index {
                return 0.0;
            }
            outputs[index]
                .try_extract_array::<f32>()
                .ok()
                .and_then(|arr| arr.iter().next().copied())
                .unwrap_or(0.0)
        };
        let confidence = (scalar_at(1) * palm.score).clamp(0.0, 1.0);
        let handedness = scalar_at(2);

        if confidence < self.min_confidence {
            log::trace!("dropping hand with confidence {confidence:.2}");
            return Ok(None);
        }

        let projected: Vec<[f32; 3]> = raw
            .iter()
            .map(|[x, y, z]| {
                let (px, py) = transform.project(*x, *y);
                [px, py, *z]
            })
            .collect();
        let landmarks = LandmarkSet::from_points(&projected)
            .context("hand landmark model returned too few points")?;

        Ok(Some(HandDetection {
            landmarks,
            confidence,
            handedness,
        }))
    }
}
