use anyhow::{Result, anyhow, ensure};
use nokhwa::{Buffer, utils::FrameFormat};
use rayon::prelude::*;
use yuv::{
    YuvBiPlanarImage, YuvConversionMode, YuvPackedImage, YuvRange, YuvStandardMatrix,
    yuv_nv12_to_rgba, yuyv422_to_rgba,
};
use zune_jpeg::{
    JpegDecoder,
    zune_core::{bytestream::ZCursor, colorspace::ColorSpace, options::DecoderOptions},
};

#[derive(Debug)]
pub struct RgbaFrame {
    pub rgba: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Decodes whatever the camera delivered into tightly packed RGBA.
pub fn convert_camera_frame(buffer: &Buffer) -> Result<RgbaFrame> {
    let resolution = buffer.resolution();
    convert_raw(
        buffer.source_frame_format(),
        buffer.buffer(),
        resolution.width_x,
        resolution.height_y,
    )
}

pub fn convert_raw(format: FrameFormat, data: &[u8], width: u32, height: u32) -> Result<RgbaFrame> {
    let pixels = width as usize * height as usize;
    let rgba = match format {
        FrameFormat::NV12 => {
            expect_len("NV12", data, pixels + pixels / 2)?;
            nv12(data, width, height)?
        }
        FrameFormat::YUYV => {
            expect_len("YUYV", data, pixels * 2)?;
            yuyv(data, width, height)?
        }
        FrameFormat::MJPEG => return mjpeg(data),
        FrameFormat::RAWRGB => {
            expect_len("RGB", data, pixels * 3)?;
            packed_rgb(data, pixels, [0, 1, 2])
        }
        FrameFormat::RAWBGR => {
            expect_len("BGR", data, pixels * 3)?;
            packed_rgb(data, pixels, [2, 1, 0])
        }
        FrameFormat::GRAY => {
            expect_len("GRAY", data, pixels)?;
            gray(data, pixels)
        }
    };

    Ok(RgbaFrame {
        rgba,
        width,
        height,
    })
}

fn expect_len(label: &str, data: &[u8], needed: usize) -> Result<()> {
    ensure!(
        data.len() >= needed,
        "{label} buffer too small: got {}, expected {needed}",
        data.len()
    );
    Ok(())
}

fn nv12(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let luma_len = width as usize * height as usize;
    let (y_plane, rest) = data.split_at(luma_len);
    let image = YuvBiPlanarImage {
        y_plane,
        y_stride: width,
        uv_plane: &rest[..luma_len / 2],
        uv_stride: width,
        width,
        height,
    };

    let mut rgba = vec![0u8; luma_len * 4];
    yuv_nv12_to_rgba(
        &image,
        &mut rgba,
        width * 4,
        YuvRange::Full,
        YuvStandardMatrix::Bt709,
        YuvConversionMode::Balanced,
    )
    .map_err(|err| anyhow!("NV12 to RGBA failed: {err:?}"))?;
    Ok(rgba)
}

fn yuyv(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let packed = YuvPackedImage {
        yuy: data,
        yuy_stride: width * 2,
        width,
        height,
    };

    let mut rgba = vec![0u8; width as usize * height as usize * 4];
    yuyv422_to_rgba(
        &packed,
        &mut rgba,
        width * 4,
        YuvRange::Full,
        YuvStandardMatrix::Bt709,
    )
    .map_err(|err| anyhow!("YUYV422 to RGBA failed: {err:?}"))?;
    Ok(rgba)
}

fn mjpeg(data: &[u8]) -> Result<RgbaFrame> {
    let options = DecoderOptions::default().jpeg_set_out_colorspace(ColorSpace::RGBA);
    let mut decoder = JpegDecoder::new_with_options(ZCursor::new(data), options);
    let rgba = decoder
        .decode()
        .map_err(|err| anyhow!("MJPEG decode failed: {err:?}"))?;
    let info = decoder
        .info()
        .ok_or_else(|| anyhow!("MJPEG decoder reported no image info"))?;

    let (width, height) = (info.width as u32, info.height as u32);
    expect_len("decoded MJPEG", &rgba, width as usize * height as usize * 4)?;
    Ok(RgbaFrame {
        rgba,
        width,
        height,
    })
}

/// `order` gives the source byte offset of R, G and B within each pixel.
fn packed_rgb(data: &[u8], pixels: usize, order: [usize; 3]) -> Vec<u8> {
    let mut rgba = vec![0u8; pixels * 4];
    rgba.par_chunks_exact_mut(4)
        .zip(data.par_chunks_exact(3))
        .for_each(|(dst, src)| {
            dst[0] = src[order[0]];
            dst[1] = src[order[1]];
            dst[2] = src[order[2]];
            dst[3] = 255;
        });
    rgba
}

fn gray(data: &[u8], pixels: usize) -> Vec<u8> {
    let mut rgba = vec![0u8; pixels * 4];
    rgba.par_chunks_exact_mut(4)
        .zip(data[..pixels].par_iter())
        .for_each(|(dst, &value)| {
            dst[..3].fill(value);
            dst[3] = 255;
        });
    rgba
}
