//! Internal conversion helpers.
//!
//! Pixel-plane copying, decoded-frame → [`DynamicImage`] conversion and
//! timestamp arithmetic shared by the decoder and the playback element.

use ffmpeg_next::{
    Rational,
    format::Pixel,
    frame::Video as VideoFrame,
    software::scaling::{Context as ScalingContext, Flags as ScalingFlags},
};
use image::{DynamicImage, GrayImage, RgbImage, RgbaImage};

use crate::configuration::{FrameOutputOptions, PixelFormat};
use crate::error::FrameError;

/// Scales decoded frames to the configured output and copies them into
/// owned images.
///
/// The scaler is rebuilt whenever the input geometry changes mid-stream.
pub(crate) struct FrameConverter {
    output: FrameOutputOptions,
    scaler: Option<(ScalerKey, ScalingContext)>,
    scaled: VideoFrame,
}

/// Input geometry a scaler was built for.
#[derive(Clone, Copy, PartialEq, Eq)]
struct ScalerKey {
    format: Pixel,
    width: u32,
    height: u32,
}

impl FrameConverter {
    pub(crate) fn new(output: &FrameOutputOptions) -> Self {
        Self {
            output: *output,
            scaler: None,
            scaled: VideoFrame::empty(),
        }
    }

    pub(crate) fn convert(&mut self, decoded: &VideoFrame) -> Result<DynamicImage, FrameError> {
        let key = ScalerKey {
            format: decoded.format(),
            width: decoded.width(),
            height: decoded.height(),
        };
        let (width, height) = self.output.resolve_dimensions(key.width, key.height);
        let format = self.output.pixel_format;

        let scaler = match self.scaler.take() {
            Some((existing, scaler)) if existing == key => scaler,
            _ => ScalingContext::get(
                key.format,
                key.width,
                key.height,
                format.to_ffmpeg_pixel(),
                width,
                height,
                ScalingFlags::BILINEAR,
            )?,
        };
        let (_, scaler) = self.scaler.insert((key, scaler));
        scaler.run(decoded, &mut self.scaled)?;
        frame_to_image(&self.scaled, width, height, format)
    }
}

/// Copy the first plane of a scaled frame into a tightly-packed buffer.
///
/// FFmpeg pads rows to an alignment boundary, so `stride` may exceed
/// `width * bytes_per_pixel`; the padding is dropped here.
pub(crate) fn frame_to_buffer(
    video_frame: &VideoFrame,
    width: u32,
    height: u32,
    bytes_per_pixel: usize,
) -> Vec<u8> {
    let stride = video_frame.stride(0);
    let row_len = (width as usize) * bytes_per_pixel;
    let data = video_frame.data(0);

    if stride == row_len {
        data[..row_len * (height as usize)].to_vec()
    } else {
        let mut buffer = Vec::with_capacity(row_len * (height as usize));
        for row in 0..(height as usize) {
            let row_start = row * stride;
            buffer.extend_from_slice(&data[row_start..row_start + row_len]);
        }
        buffer
    }
}

/// Build an owned image from a frame already scaled to `format`.
pub(crate) fn frame_to_image(
    scaled_frame: &VideoFrame,
    width: u32,
    height: u32,
    format: PixelFormat,
) -> Result<DynamicImage, FrameError> {
    let buffer = frame_to_buffer(scaled_frame, width, height, format.bytes_per_pixel());
    let image = match format {
        PixelFormat::Rgb8 => RgbImage::from_raw(width, height, buffer).map(DynamicImage::ImageRgb8),
        PixelFormat::Rgba8 => {
            RgbaImage::from_raw(width, height, buffer).map(DynamicImage::ImageRgba8)
        }
        PixelFormat::Gray8 => {
            GrayImage::from_raw(width, height, buffer).map(DynamicImage::ImageLuma8)
        }
    };
    image.ok_or_else(|| {
        FrameError::Decode(format!(
            "decoded plane does not fill a {width}x{height} {format:?} image"
        ))
    })
}

/// Rescale a PTS value from stream time base to seconds.
pub(crate) fn pts_to_seconds(pts: i64, time_base: Rational) -> f64 {
    if time_base.denominator() == 0 {
        return 0.0;
    }
    pts as f64 * time_base.numerator() as f64 / time_base.denominator() as f64
}

/// Convert seconds to a container-level seek timestamp in AV_TIME_BASE
/// (microseconds), as expected by `input.seek()` with no stream index.
pub(crate) fn seconds_to_seek_timestamp(seconds: f64) -> i64 {
    (seconds.max(0.0) * 1_000_000.0) as i64
}

/// Convert track ticks to seconds for the given timescale.
pub(crate) fn ticks_to_seconds(ticks: i64, timescale: u32) -> f64 {
    if timescale == 0 {
        return 0.0;
    }
    ticks as f64 / timescale as f64
}

