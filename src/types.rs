use std::time::Instant;

pub const NUM_LANDMARKS: usize = 21;

pub const THUMB_TIP: usize = 4;
pub const INDEX_TIP: usize = 8;
pub const MIDDLE_TIP: usize = 12;
pub const RING_TIP: usize = 16;
pub const PINKY_TIP: usize = 20;

/// Fingertip indices in thumb-to-pinky order.
pub const FINGERTIPS: [usize; 5] = [THUMB_TIP, INDEX_TIP, MIDDLE_TIP, RING_TIP, PINKY_TIP];

#[derive(Clone, Debug)]
pub struct Frame {
    pub rgba: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: Instant,
}

impl Frame {
    pub fn new(rgba: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            rgba,
            width,
            height,
            timestamp: Instant::now(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Landmark {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// The 21 keypoints of one hand, in frame pixel coordinates.
#[derive(Clone, Debug, PartialEq)]
pub struct LandmarkSet {
    points: [Landmark; NUM_LANDMARKS],
}

impl LandmarkSet {
    pub fn new(points: [Landmark; NUM_LANDMARKS]) -> Self {
        Self { points }
    }

    /// Builds a set from `(x, y, z)` triples. Returns `None` when fewer than
    /// 21 points are given; extra points are ignored.
    pub fn from_points(points: &[[f32; 3]]) -> Option<Self> {
        if points.len() < NUM_LANDMARKS {
            return None;
        }
        let mut set = [Landmark::default(); NUM_LANDMARKS];
        for (dst, [x, y, z]) in set.iter_mut().zip(points) {
            *dst = Landmark::new(*x, *y, *z);
        }
        Some(Self { points: set })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Landmark> {
        self.points.iter()
    }

    pub fn index_tip(&self) -> Landmark {
        self.points[INDEX_TIP]
    }

    pub fn fingertip_ys(&self) -> [f32; 5] {
        FINGERTIPS.map(|idx| self.points[idx].y)
    }
}

#[derive(Clone, Debug)]
pub struct HandDetection {
    pub landmarks: LandmarkSet,
    pub confidence: f32,
    pub handedness: f32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Gesture {
    OpenHand,
    ClosedFist,
    NoneDetected,
    Unrecognized,
}

impl Gesture {
    pub fn status_text(&self) -> &'static str {
        match self {
            Gesture::OpenHand => "Hand Open Detected! 🖐️",
            Gesture::ClosedFist => "Closed Fist Detected! ✊",
            Gesture::NoneDetected => "No hand detected.",
            Gesture::Unrecognized => "No specific gesture detected.",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DemoVariant {
    /// Landmark circles plus the open/closed readout.
    Gesture,
    /// Landmark circles plus a cube that follows the index fingertip.
    Cube,
}

impl DemoVariant {
    pub fn classifies(&self) -> bool {
        matches!(self, DemoVariant::Gesture)
    }

    pub fn drives_cube(&self) -> bool {
        matches!(self, DemoVariant::Cube)
    }

    pub fn title(&self) -> &'static str {
        match self {
            DemoVariant::Gesture => "Hand Gesture",
            DemoVariant::Cube => "Hand Cube",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopState {
    AwaitingPermissions,
    AwaitingModel,
    Running,
    Stalled,
    Stopped,
}

impl LoopState {
    pub fn label(&self) -> &'static str {
        match self {
            LoopState::AwaitingPermissions => "Waiting for camera",
            LoopState::AwaitingModel => "Loading hand model",
            LoopState::Running => "Running",
            LoopState::Stalled => "Stalled",
            LoopState::Stopped => "Stopped",
        }
    }
}

/// One composed tick, ready for display.
#[derive(Clone, Debug)]
pub struct PresentedFrame {
    pub frame: Frame,
    pub status: String,
    pub gesture: Gesture,
}

#[derive(Clone, Debug)]
pub struct PalmRegion {
    pub bbox: [f32; 4],
    pub landmarks: Vec<(f32, f32)>,
    pub score: f32,
}
