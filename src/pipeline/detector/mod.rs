mod common;
mod ort;
mod palm;

pub use self::ort::{OrtLandmarker, OrtLoader};

use crate::{
    error::SetupError,
    types::{Frame, HandDetection},
};

pub const DEFAULT_MIN_CONFIDENCE: f32 = 0.5;

/// Produces a ready landmark model. Runs once, before the first tick.
pub trait DetectorLoader {
    type Model: HandLandmarker;

    fn load(&self) -> Result<Self::Model, SetupError>;
}

/// Per-frame hand landmark estimation.
pub trait HandLandmarker {
    /// Returns the most confident hand in `frame`, if any.
    fn estimate_hands(&mut self, frame: &Frame) -> anyhow::Result<Option<HandDetection>>;
}
