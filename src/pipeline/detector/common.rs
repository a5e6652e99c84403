use anyhow::{Context, Result, anyhow, ensure};
use fast_image_resize as fir;
use ndarray::Array4;
use rayon::prelude::*;

use crate::types::{Frame, NUM_LANDMARKS};

pub const LANDMARK_INPUT_SIZE: u32 = 224;
pub const PALM_INPUT_SIZE: u32 = 192;

/// How a frame was scaled and padded into a square model input.
#[derive(Clone, Debug)]
pub struct LetterboxInfo {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    pub orig_w: u32,
    pub orig_h: u32,
}

/// A rotated square crop of the frame, resampled to `output_size`.
#[derive(Clone, Debug)]
pub struct CropTransform {
    pub center: (f32, f32),
    pub side: f32,
    pub angle: f32,
    pub output_size: u32,
    pub orig_w: u32,
    pub orig_h: u32,
}

impl CropTransform {
    /// Maps a point in crop pixel space back to frame pixels, clamped to the frame.
    pub fn project(&self, x: f32, y: f32) -> (f32, f32) {
        let half = self.output_size as f32 / 2.0;
        let scale = self.side / self.output_size as f32;
        let dx = (x - half) * scale;
        let dy = (y - half) * scale;
        let (sin, cos) = self.angle.sin_cos();
        let ox = self.center.0 + dx * cos - dy * sin;
        let oy = self.center.1 + dx * sin + dy * cos;
        (
            ox.clamp(0.0, self.orig_w.saturating_sub(1) as f32),
            oy.clamp(0.0, self.orig_h.saturating_sub(1) as f32),
        )
    }
}

fn check_frame(frame: &Frame) -> Result<()> {
    let expected = (frame.width as usize)
        .saturating_mul(frame.height as usize)
        .saturating_mul(4);
    ensure!(
        frame.rgba.len() == expected,
        "frame buffer size mismatch: got {}, expected {expected}",
        frame.rgba.len()
    );
    Ok(())
}

/// Resizes the frame to fit `target_size` on its long edge, centers it on a
/// black square and returns an NHWC tensor with values in `[0, 1]`.
pub fn prepare_frame_with_size(frame: &Frame, target_size: u32) -> Result<(Array4<f32>, LetterboxInfo)> {
    check_frame(frame)?;
    ensure!(frame.width > 0 && frame.height > 0, "empty frame");

    let scale = target_size as f32 / frame.width.max(frame.height) as f32;
    let new_w = ((frame.width as f32 * scale).round() as u32).clamp(1, target_size);
    let new_h = ((frame.height as f32 * scale).round() as u32).clamp(1, target_size);

    let src = fir::images::Image::from_vec_u8(
        frame.width,
        frame.height,
        frame.rgba.clone(),
        fir::PixelType::U8x4,
    )?;
    let mut dst = fir::images::Image::new(new_w, new_h, fir::PixelType::U8x4);
    let options = fir::ResizeOptions::new()
        .resize_alg(fir::ResizeAlg::Interpolation(fir::FilterType::Bilinear));
    fir::Resizer::new()
        .resize(&src, &mut dst, Some(&options))
        .context("fast resize failed")?;
    let resized = dst.into_vec();

    let side = target_size as usize;
    let pad_x = (side - new_w as usize) / 2;
    let pad_y = (side - new_h as usize) / 2;
    let row_len = new_w as usize * 3;

    let mut data = vec![0f32; side * side * 3];
    data.par_chunks_exact_mut(side * 3)
        .enumerate()
        .filter(|(row, _)| *row >= pad_y && *row < pad_y + new_h as usize)
        .for_each(|(row, out)| {
            let src_row = &resized[(row - pad_y) * new_w as usize * 4..][..new_w as usize * 4];
            let dst_row = &mut out[pad_x * 3..pad_x * 3 + row_len];
            for (dst_px, src_px) in dst_row.chunks_exact_mut(3).zip(src_row.chunks_exact(4)) {
                dst_px[0] = src_px[0] as f32 / 255.0;
                dst_px[1] = src_px[1] as f32 / 255.0;
                dst_px[2] = src_px[2] as f32 / 255.0;
            }
        });

    let input = Array4::from_shape_vec((1, side, side, 3), data)
        .map_err(|err| anyhow!("failed to build input tensor: {err}"))?;

    Ok((
        input,
        LetterboxInfo {
            scale,
            pad_x: pad_x as f32,
            pad_y: pad_y as f32,
            orig_w: frame.width,
            orig_h: frame.height,
        },
    ))
}

/// Samples a rotated square around `center` into an NHWC tensor.
pub fn prepare_rotated_crop(
    frame: &Frame,
    center: (f32, f32),
    side: f32,
    angle: f32,
    output_size: u32,
) -> Result<(Array4<f32>, CropTransform)> {
    check_frame(frame)?;

    let transform = CropTransform {
        center,
        side,
        angle,
        output_size,
        orig_w: frame.width,
        orig_h: frame.height,
    };

    let size = output_size as usize;
    let half = output_size as f32 / 2.0;
    let step = side / output_size as f32;
    let (sin, cos) = angle.sin_cos();

    let mut data = vec![0f32; size * size * 3];
    data.par_chunks_exact_mut(size * 3)
        .enumerate()
        .for_each(|(y, row)| {
            let dy = (y as f32 + 0.5 - half) * step;
            for (x, px) in row.chunks_exact_mut(3).enumerate() {
                let dx = (x as f32 + 0.5 - half) * step;
                let src_x = center.0 + dx * cos - dy * sin;
                let src_y = center.1 + dx * sin + dy * cos;
                px.copy_from_slice(&sample_bilinear(frame, src_x, src_y));
            }
        });

    let array = Array4::from_shape_vec((1, size, size, 3), data)
        .map_err(|err| anyhow!("failed to build rotated crop tensor: {err}"))?;
    Ok((array, transform))
}

pub fn decode_landmarks(flat: &[f32]) -> Result<Vec<[f32; 3]>> {
    ensure!(
        flat.len() >= NUM_LANDMARKS * 3,
        "unexpected landmarks length: got {}, need {}",
        flat.len(),
        NUM_LANDMARKS * 3
    );
    Ok(flat
        .chunks_exact(3)
        .take(NUM_LANDMARKS)
        .map(|c| [c[0], c[1], c[2]])
        .collect())
}

fn sample_bilinear(frame: &Frame, x: f32, y: f32) -> [f32; 3] {
    if !x.is_finite() || !y.is_finite() {
        return [0.0; 3];
    }
    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;

    let fetch = |cx: f32, cy: f32| -> [f32; 3] {
        let (ix, iy) = (cx as i64, cy as i64);
        if ix < 0 || iy < 0 || ix >= frame.width as i64 || iy >= frame.height as i64 {
            return [0.0; 3];
        }
        let idx = (iy as usize * frame.width as usize + ix as usize) * 4;
        match frame.rgba.get(idx..idx + 3) {
            Some(px) => [
                px[0] as f32 / 255.0,
                px[1] as f32 / 255.0,
                px[2] as f32 / 255.0,
            ],
            None => [0.0; 3],
        }
    };

    let c00 = fetch(x0, y0);
    let c10 = fetch(x0 + 1.0, y0);
    let c01 = fetch(x0, y0 + 1.0);
    let c11 = fetch(x0 + 1.0, y0 + 1.0);

    let lerp = |a: f32, b: f32, t: f32| a + (b - a) * t;
    std::array::from_fn(|c| lerp(lerp(c00[c], c10[c], fx), lerp(c01[c], c11[c], fx), fy))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn solid_frame(width: u32, height: u32, rgb: [u8; 3]) -> Frame {
        let mut rgba = Vec::with_capacity(width as usize * height as usize * 4);
        for _ in 0..width * height {
            rgba.extend_from_slice(&[rgb[0], rgb[1], rgb[2], 255]);
        }
        Frame::new(rgba, width, height)
    }

    #[test]
    fn letterbox_pads_short_edge() {
        let frame = solid_frame(64, 32, [255, 255, 255]);
        let (input, info) = prepare_frame_with_size(&frame, 16).unwrap();

        assert_eq!(input.shape(), &[1, 16, 16, 3]);
        assert_relative_eq!(info.scale, 0.25);
        assert_relative_eq!(info.pad_x, 0.0);
        assert_relative_eq!(info.pad_y, 4.0);
        assert_relative_eq!(input[[0, 0, 8, 0]], 0.0);
        assert_relative_eq!(input[[0, 8, 8, 0]], 1.0);
    }

    #[test]
    fn mismatched_buffer_is_rejected() {
        let frame = Frame::new(vec![0; 10], 4, 4);
        assert!(prepare_frame_with_size(&frame, 16).is_err());
        assert!(prepare_rotated_crop(&frame, (2.0, 2.0), 4.0, 0.0, 8).is_err());
    }

    #[test]
    fn crop_projection_round_trips_center() {
        let frame = solid_frame(100, 80, [0, 128, 0]);
        let (input, transform) = prepare_rotated_crop(&frame, (50.0, 40.0), 40.0, 0.3, 32).unwrap();
        assert_eq!(input.shape(), &[1, 32, 32, 3]);
        assert_relative_eq!(input[[0, 16, 16, 1]], 128.0 / 255.0, epsilon = 1e-5);

        let (x, y) = transform.project(16.0, 16.0);
        assert_relative_eq!(x, 50.0, epsilon = 1e-4);
        assert_relative_eq!(y, 40.0, epsilon = 1e-4);

        let (cx, cy) = transform.project(-10_000.0, 10_000.0);
        assert!((0.0..=99.0).contains(&cx));
        assert!((0.0..=79.0).contains(&cy));
    }

    #[test]
    fn landmarks_decode_in_triples() {
        let flat: Vec<f32> = (0..63).map(|v| v as f32).collect();
        let landmarks = decode_landmarks(&flat).unwrap();
        assert_eq!(landmarks.len(), NUM_LANDMARKS);
        assert_eq!(landmarks[20], [60.0, 61.0, 62.0]);
        assert!(decode_landmarks(&flat[..62]).is_err());
    }
}
