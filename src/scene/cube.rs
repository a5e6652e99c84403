use std::f32::consts::PI;

use super::overlay::Canvas;
use crate::types::LandmarkSet;

/// Rotation added to both axes on every tick, hand or no hand.
pub const ROTATION_STEP: f32 = 0.01;
/// Object space spans `[-EXTENT, EXTENT]` on both axes across the frame.
pub const OBJECT_EXTENT: f32 = 2.0;

const CAMERA_DISTANCE: f32 = 5.0;
const FIELD_OF_VIEW: f32 = 75.0 * PI / 180.0;
const CUBE_HALF_SIZE: f32 = 0.5;
const EDGE_COLOR: [u8; 4] = [0, 255, 0, 255];
const EDGE_THICKNESS: i32 = 3;

const CUBE_EDGES: [(usize, usize); 12] = [
    (0, 1),
    (1, 3),
    (3, 2),
    (2, 0),
    (4, 5),
    (5, 7),
    (7, 6),
    (6, 4),
    (0, 4),
    (1, 5),
    (2, 6),
    (3, 7),
];

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct CubeObject {
    pub position: (f32, f32),
    pub rotation: (f32, f32),
}

/// Maps a pixel on a `width x height` canvas into object space, flipping y
/// so that screen-down becomes object-up.
pub fn map_to_object_space(pixel: (f32, f32), width: u32, height: u32) -> Option<(f32, f32)> {
    if width == 0 || height == 0 {
        return None;
    }
    let span = OBJECT_EXTENT * 2.0;
    let x = (pixel.0 / width as f32) * span - OBJECT_EXTENT;
    let y = -(pixel.1 / height as f32) * span + OBJECT_EXTENT;
    Some((x, y))
}

/// Moves the cube under the index fingertip and advances its spin.
///
/// Position is absolute and is only written when a hand is present; the spin
/// advances regardless.
pub fn drive_object(
    object: &mut CubeObject,
    landmarks: Option<&LandmarkSet>,
    width: u32,
    height: u32,
) {
    if let Some(landmarks) = landmarks {
        let tip = landmarks.index_tip();
        if let Some(position) = map_to_object_space((tip.x, tip.y), width, height) {
            object.position = position;
        }
    }

    object.rotation.0 += ROTATION_STEP;
    object.rotation.1 += ROTATION_STEP;
}

/// Wireframe perspective renderer for a unit cube.
#[derive(Clone, Debug, Default)]
pub struct CubeRenderer;

impl CubeRenderer {
    pub fn render(&self, object: &CubeObject, canvas: &mut Canvas) {
        canvas.clear();
        let (width, height) = (canvas.width(), canvas.height());
        if width == 0 || height == 0 {
            return;
        }

        let projected: Vec<Option<(f32, f32)>> = cube_vertices()
            .iter()
            .map(|v| {
                let rotated = rotate(*v, object.rotation);
                let world = [
                    rotated[0] + object.position.0,
                    rotated[1] + object.position.1,
                    rotated[2],
                ];
                project(world, width, height)
            })
            .collect();

        for (a, b) in CUBE_EDGES {
            if let (Some(pa), Some(pb)) = (projected[a], projected[b]) {
                canvas.draw_line(pa, pb, EDGE_COLOR, EDGE_THICKNESS);
            }
        }
    }
}

fn cube_vertices() -> [[f32; 3]; 8] {
    let h = CUBE_HALF_SIZE;
    let mut vertices = [[0.0; 3]; 8];
    for (idx, v) in vertices.iter_mut().enumerate() {
        let sx = if idx & 1 == 0 { -h } else { h };
        let sy = if idx & 2 == 0 { -h } else { h };
        let sz = if idx & 4 == 0 { -h } else { h };
        *v = [sx, sy, sz];
    }
    vertices
}

// Euler XYZ: the Y rotation is applied to the vertex first, then X.
fn rotate(v: [f32; 3], rotation: (f32, f32)) -> [f32; 3] {
    let (sin_y, cos_y) = rotation.1.sin_cos();
    let x1 = v[0] * cos_y + v[2] * sin_y;
    let z1 = -v[0] * sin_y + v[2] * cos_y;
    let y1 = v[1];

    let (sin_x, cos_x) = rotation.0.sin_cos();
    let y2 = y1 * cos_x - z1 * sin_x;
    let z2 = y1 * sin_x + z1 * cos_x;
    [x1, y2, z2]
}

/// Projects a world-space point seen from `(0, 0, CAMERA_DISTANCE)` looking
/// down -z. Points at or behind the camera plane are dropped.
pub(crate) fn project(world: [f32; 3], width: u32, height: u32) -> Option<(f32, f32)> {
    let depth = CAMERA_DISTANCE - world[2];
    if depth <= 1e-3 {
        return None;
    }
    let focal = 1.0 / (FIELD_OF_VIEW / 2.0).tan();
    let aspect = width as f32 / height as f32;
    let ndc_x = focal / aspect * world[0] / depth;
    let ndc_y = focal * world[1] / depth;
    Some((
        (ndc_x + 1.0) * 0.5 * width as f32,
        (1.0 - ndc_y) * 0.5 * height as f32,
    ))
}
