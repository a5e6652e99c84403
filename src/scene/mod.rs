pub mod cube;
pub mod overlay;

pub use cube::{CubeObject, CubeRenderer, drive_object};
pub use overlay::{Canvas, draw_overlay};

use crate::{
    gesture,
    types::{DemoVariant, Frame, Gesture, LandmarkSet},
};

const HAND_TRACKED_STATUS: &str = "Hand detected.";

/// Everything one tick mutates: the landmark overlay, and for the cube demo
/// the cube and its render target.
#[derive(Debug)]
pub struct SceneContext {
    variant: DemoVariant,
    overlay: Canvas,
    cube: CubeObject,
    cube_layer: Canvas,
    renderer: CubeRenderer,
}

/// Result of one tick. `status` is the text shown to the user; `gesture` is
/// the classifier's verdict. They differ only in the cube demo with a hand in
/// view: nothing is classified there (`Unrecognized`), and the status reports
/// that the hand is being tracked.
#[derive(Clone, Debug, PartialEq)]
pub struct TickOutcome {
    pub gesture: Gesture,
    pub status: String,
}

impl SceneContext {
    pub fn new(variant: DemoVariant) -> Self {
        Self {
            variant,
            overlay: Canvas::new(0, 0),
            cube: CubeObject::default(),
            cube_layer: Canvas::new(0, 0),
            renderer: CubeRenderer,
        }
    }

    pub fn cube(&self) -> &CubeObject {
        &self.cube
    }

    pub fn overlay(&self) -> &Canvas {
        &self.overlay
    }

    /// Runs the variant's reactions for one tick on a `width x height` frame.
    pub fn react(&mut self, landmarks: Option<&LandmarkSet>, width: u32, height: u32) -> TickOutcome {
        self.overlay.resize(width, height);
        if let Some(landmarks) = landmarks {
            draw_overlay(&mut self.overlay, landmarks);
        }

        if self.variant.drives_cube() {
            self.cube_layer.resize(width, height);
            drive_object(&mut self.cube, landmarks, width, height);
            self.renderer.render(&self.cube, &mut self.cube_layer);
        }

        let gesture = match landmarks {
            Some(_) if !self.variant.classifies() => Gesture::Unrecognized,
            _ => gesture::classify_detection(landmarks),
        };
        let status = match (gesture, self.variant) {
            (Gesture::NoneDetected, _) | (_, DemoVariant::Gesture) => {
                gesture.status_text().to_string()
            }
            (_, DemoVariant::Cube) => HAND_TRACKED_STATUS.to_string(),
        };

        TickOutcome { gesture, status }
    }

    /// A tick with no camera frame: the cube still spins, on the last frame size.
    pub fn react_without_frame(&mut self) {
        if self.variant.drives_cube() {
            let (width, height) = (self.cube_layer.width(), self.cube_layer.height());
            drive_object(&mut self.cube, None, width, height);
            self.renderer.render(&self.cube, &mut self.cube_layer);
        }
    }

    /// Layers the cube and the landmark dots over the camera frame.
    pub fn compose(&self, mut frame: Frame) -> Frame {
        if self.variant.drives_cube() {
            self.cube_layer.composite_onto(&mut frame);
        }
        self.overlay.composite_onto(&mut frame);
        frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Landmark, NUM_LANDMARKS};
    use approx::assert_relative_eq;

    fn open_hand() -> LandmarkSet {
        let mut points = [Landmark::default(); NUM_LANDMARKS];
        for (idx, p) in points.iter_mut().enumerate() {
            *p = Landmark::new(100.0 + idx as f32 * 5.0, 50.0 + idx as f32 * 10.0, 0.0);
        }
        LandmarkSet::new(points)
    }

    #[test]
    fn gesture_demo_reports_classification() {
        let mut scene = SceneContext::new(DemoVariant::Gesture);
        let outcome = scene.react(Some(&open_hand()), 640, 480);
        assert_eq!(outcome.gesture, Gesture::OpenHand);
        assert_eq!(outcome.status, "Hand Open Detected! 🖐️");
        assert!(!scene.overlay().is_clear());
        assert_eq!(scene.cube(), &CubeObject::default());
    }

    #[test]
    fn missing_hand_clears_overlay() {
        let mut scene = SceneContext::new(DemoVariant::Gesture);
        scene.react(Some(&open_hand()), 640, 480);
        let outcome = scene.react(None, 640, 480);
        assert_eq!(outcome.status, "No hand detected.");
        assert!(scene.overlay().is_clear());
    }

    #[test]
    fn cube_demo_moves_cube_and_skips_classification() {
        let mut scene = SceneContext::new(DemoVariant::Cube);
        let outcome = scene.react(Some(&open_hand()), 640, 480);
        assert_eq!(outcome.status, HAND_TRACKED_STATUS);
        assert_eq!(outcome.gesture, Gesture::Unrecognized);
        assert_relative_eq!(scene.cube().rotation.0, 0.01);

        let tip = open_hand().index_tip();
        assert_relative_eq!(scene.cube().position.0, tip.x / 640.0 * 4.0 - 2.0);
        assert_relative_eq!(scene.cube().position.1, -(tip.y / 480.0) * 4.0 + 2.0);
    }

    #[test]
    fn cube_demo_without_hand_reports_none() {
        let mut scene = SceneContext::new(DemoVariant::Cube);
        let outcome = scene.react(None, 640, 480);
        assert_eq!(outcome.gesture, Gesture::NoneDetected);
        assert_eq!(outcome.status, "No hand detected.");
    }

    #[test]
    fn frameless_tick_still_spins_cube() {
        let mut scene = SceneContext::new(DemoVariant::Cube);
        scene.react(None, 64, 48);

        scene.react_without_frame();
        scene.react_without_frame();

        assert_relative_eq!(scene.cube().rotation.0, 0.03);
        assert_relative_eq!(scene.cube().rotation.1, 0.03);
        assert_eq!(scene.cube().position, CubeObject::default().position);
        assert_eq!((scene.cube_layer.width(), scene.cube_layer.height()), (64, 48));
        assert!(!scene.cube_layer.is_clear());
    }

    #[test]
    fn frameless_tick_leaves_gesture_demo_alone() {
        let mut scene = SceneContext::new(DemoVariant::Gesture);
        scene.react_without_frame();
        assert_eq!(scene.cube(), &CubeObject::default());
    }

    #[test]
    fn compose_paints_cube_over_frame() {
        let mut scene = SceneContext::new(DemoVariant::Cube);
        scene.react(None, 64, 48);
        let frame = Frame::new(vec![0; 64 * 48 * 4], 64, 48);
        let composed = scene.compose(frame);
        assert!(composed.rgba.chunks_exact(4).any(|px| px[1] == 255));
    }
}
