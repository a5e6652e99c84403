use crate::types::{Gesture, LandmarkSet};

/// Coarse open-hand / closed-fist readout from fingertip heights.
///
/// Only the y coordinates of the five fingertips are consulted. The chain
/// thumb < index < middle < ring < pinky (screen y grows downward) reads as an
/// open hand, the reverse chain as a fist. Comparisons are exact: a tie or a
/// NaN anywhere breaks both chains and yields `Unrecognized`.
pub fn classify(landmarks: &LandmarkSet) -> Gesture {
    let ys = landmarks.fingertip_ys();

    if ys.windows(2).all(|pair| pair[0] < pair[1]) {
        Gesture::OpenHand
    } else if ys.windows(2).all(|pair| pair[0] > pair[1]) {
        Gesture::ClosedFist
    } else {
        Gesture::Unrecognized
    }
}

pub fn classify_detection(landmarks: Option<&LandmarkSet>) -> Gesture {
    landmarks.map(classify).unwrap_or(Gesture::NoneDetected)
}
