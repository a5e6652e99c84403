pub mod camera;
pub mod detector;
#[cfg(feature = "camera-nokhwa")]
pub mod rgba_converter;

// Re-exports for convenience
pub use camera::{CameraConstraints, DefaultFrameSource, FrameSource, available_cameras};
pub use detector::{DEFAULT_MIN_CONFIDENCE, DetectorLoader, HandLandmarker, OrtLoader};
