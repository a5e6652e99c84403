use rayon::prelude::*;

use crate::types::{Frame, LandmarkSet};

pub const LANDMARK_RADIUS: i32 = 5;
pub const LANDMARK_COLOR: [u8; 4] = [255, 0, 0, 255];

/// A transparent RGBA drawing surface layered over the camera frame.
#[derive(Clone, Debug)]
pub struct Canvas {
    rgba: Vec<u8>,
    width: u32,
    height: u32,
}

impl Canvas {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            rgba: vec![0; width as usize * height as usize * 4],
            width,
            height,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Reallocates to the new size if it changed. Contents are cleared either way.
    pub fn resize(&mut self, width: u32, height: u32) {
        if self.width != width || self.height != height {
            *self = Canvas::new(width, height);
        } else {
            self.clear();
        }
    }

    pub fn clear(&mut self) {
        self.rgba.fill(0);
    }

    pub fn is_clear(&self) -> bool {
        self.rgba.iter().all(|&b| b == 0)
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = ((y * self.width + x) as usize) * 4;
        self.rgba
            .get(idx..idx + 4)
            .map(|px| [px[0], px[1], px[2], px[3]])
    }

    pub fn fill_circle(&mut self, center: (f32, f32), radius: i32, color: [u8; 4]) {
        if !center.0.is_finite() || !center.1.is_finite() {
            return;
        }
        let (cx, cy) = (center.0.round() as i32, center.1.round() as i32);
        for dy in -radius..=radius {
            for dx in -radius..=radius {
                if dx * dx + dy * dy <= radius * radius {
                    self.put_pixel(cx + dx, cy + dy, color);
                }
            }
        }
    }

    /// Bresenham line, widened to a diamond brush for `thickness > 1`.
    pub fn draw_line(&mut self, p0: (f32, f32), p1: (f32, f32), color: [u8; 4], thickness: i32) {
        if ![p0.0, p0.1, p1.0, p1.1].iter().all(|v| v.is_finite()) {
            return;
        }
        let (mut x0, mut y0) = (p0.0 as i32, p0.1 as i32);
        let (x1, y1) = (p1.0 as i32, p1.1 as i32);
        let dx = (x1 - x0).abs();
        let sx = if x0 < x1 { 1 } else { -1 };
        let dy = -(y1 - y0).abs();
        let sy = if y0 < y1 { 1 } else { -1 };
        let mut err = dx + dy;
        let radius = (thickness.max(1) - 1) / 2;

        loop {
            for ox in -radius..=radius {
                for oy in -radius..=radius {
                    if ox.abs() + oy.abs() <= radius {
                        self.put_pixel(x0 + ox, y0 + oy, color);
                    }
                }
            }
            if x0 == x1 && y0 == y1 {
                break;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x0 += sx;
            }
            if e2 <= dx {
                err += dx;
                y0 += sy;
            }
        }
    }

    /// Alpha-blends this canvas over `frame` in place. Sizes must match.
    pub fn composite_onto(&self, frame: &mut Frame) {
        if frame.width != self.width || frame.height != self.height {
            log::warn!(
                "skipping overlay: canvas {}x{} does not match frame {}x{}",
                self.width,
                self.height,
                frame.width,
                frame.height
            );
            return;
        }

        frame
            .rgba
            .par_chunks_exact_mut(4)
            .zip(self.rgba.par_chunks_exact(4))
            .for_each(|(dst, src)| {
                let alpha = src[3] as u32;
                if alpha == 0 {
                    return;
                }
                for c in 0..3 {
                    dst[c] = ((src[c] as u32 * alpha + dst[c] as u32 * (255 - alpha)) / 255) as u8;
                }
                dst[3] = 255;
            });
    }

    fn put_pixel(&mut self, x: i32, y: i32, color: [u8; 4]) {
        if x < 0 || y < 0 {
            return;
        }
        let (ux, uy) = (x as u32, y as u32);
        if ux >= self.width || uy >= self.height {
            return;
        }
        let idx = ((uy * self.width + ux) as usize) * 4;
        if idx + 3 < self.rgba.len() {
            self.rgba[idx..idx + 4].copy_from_slice(&color);
        }
    }
}

/// Wipes the previous overlay and marks every landmark with a red dot.
pub fn draw_overlay(canvas: &mut Canvas, landmarks: &LandmarkSet) {
    canvas.clear();
    for point in landmarks.iter() {
        canvas.fill_circle((point.x, point.y), LANDMARK_RADIUS, LANDMARK_COLOR);
    }
}
