//! Playback elements.
//!
//! A [`Playback`] is a single seekable view onto a video: it has exactly one
//! position at a time, can be moved to a time with a deadline, and can
//! snapshot whatever frame sits at that position. The metadata probe and the
//! sequential seek extractor both drive one.
//!
//! This module also carries the luma helpers behind the black-frame guard.

use std::path::Path;
use std::time::{Duration, Instant};

use ffmpeg_next::{
    Rational,
    decoder::Video as VideoDecoder,
    format::context::Input,
    frame::Video as VideoFrame,
    media::Type as MediaType,
};
use image::DynamicImage;

use crate::configuration::FrameOutputOptions;
use crate::conversion::{FrameConverter, pts_to_seconds, seconds_to_seek_timestamp};
use crate::error::FrameError;
use crate::metadata::DEFAULT_FRAME_RATE;

/// Forward distance (seconds) below which a seek decodes onward instead of
/// repositioning the demuxer.
const FORWARD_DECODE_WINDOW: f64 = 1.0;

/// A seekable, single-position view onto a video.
///
/// Implementations are created and used on one blocking worker thread.
pub trait Playback {
    /// Duration in seconds.
    fn duration(&self) -> f64;

    /// Pixel dimensions `(width, height)`.
    fn dimensions(&self) -> (u32, u32);

    /// The exact constant frame rate, when the container states one.
    fn stated_frame_rate(&self) -> Option<f64>;

    /// Play forward by one frame and return its presentation time.
    ///
    /// Returns `Ok(None)` at end of stream or when frame-delivery timing is
    /// not available.
    fn next_frame_delivery(&mut self) -> Result<Option<f64>, FrameError>;

    /// Move to `time`, giving up with [`FrameError::FrameTimeout`] once
    /// `timeout` has elapsed.
    fn seek(&mut self, time: f64, timeout: Duration) -> Result<(), FrameError>;

    /// Copy the frame at the current position into an owned image.
    fn snapshot(&mut self) -> Result<DynamicImage, FrameError>;
}

/// Mean BT.601 luma over every 4th pixel, in `0.0..=255.0`.
pub fn average_luma(image: &DynamicImage) -> f64 {
    let rgb = image.to_rgb8();
    let mut total = 0.0;
    let mut count = 0u64;
    for pixel in rgb.pixels().step_by(4) {
        let [r, g, b] = pixel.0;
        total += 0.299 * r as f64 + 0.587 * g as f64 + 0.114 * b as f64;
        count += 1;
    }
    if count == 0 { 0.0 } else { total / count as f64 }
}

/// Returns `true` when the average luma falls below `threshold`.
pub fn is_black_frame(image: &DynamicImage, threshold: f64) -> bool {
    average_luma(image) < threshold
}

/// A point in time after which a seek is abandoned.
struct Deadline {
    at: Instant,
    time: f64,
    timeout: Duration,
}

impl Deadline {
    fn new(time: f64, timeout: Duration) -> Self {
        Self {
            at: Instant::now() + timeout,
            time,
            timeout,
        }
    }

    fn check(&self) -> Result<(), FrameError> {
        if Instant::now() >= self.at {
            return Err(FrameError::FrameTimeout {
                time: self.time,
                timeout: self.timeout,
            });
        }
        Ok(())
    }
}

/// [`Playback`] over an FFmpeg demuxer and decoder.
pub struct FfmpegPlayback {
    input: Input,
    stream_index: usize,
    time_base: Rational,
    start_pts: i64,
    decoder: VideoDecoder,
    converter: FrameConverter,
    frame: VideoFrame,
    has_frame: bool,
    position: Option<f64>,
    end_of_stream: bool,
    duration: f64,
    width: u32,
    height: u32,
    stated_rate: Option<f64>,
}

impl FfmpegPlayback {
    /// Open `path` and prepare its best video stream.
    ///
    /// # Errors
    ///
    /// [`FrameError::MediaOpen`] if the file cannot be opened, has no video
    /// stream, or its decoder cannot be created.
    pub fn open(path: &Path, output: &FrameOutputOptions) -> Result<Self, FrameError> {
        let open_error = |reason: String| FrameError::MediaOpen {
            source_name: path.display().to_string(),
            reason,
        };

        crate::ffmpeg::initialize()?;
        let input = ffmpeg_next::format::input(path).map_err(|error| open_error(error.to_string()))?;

        let stream = input
            .streams()
            .best(MediaType::Video)
            .ok_or_else(|| open_error("no video stream".to_string()))?;
        let stream_index = stream.index();
        let time_base = stream.time_base();
        let start_pts = match stream.start_time() {
            i64::MIN => 0,
            pts => pts,
        };

        let average = stream.avg_frame_rate();
        let real = stream.rate();
        let stated_rate = (average.numerator() > 0 && average.denominator() > 0 && average == real)
            .then(|| f64::from(average));

        let stream_duration = pts_to_seconds(stream.duration(), time_base);
        let container_duration = input.duration() as f64 / f64::from(ffmpeg_next::ffi::AV_TIME_BASE);
        let duration = if container_duration > 0.0 {
            container_duration
        } else {
            stream_duration
        };

        let context = ffmpeg_next::codec::Context::from_parameters(stream.parameters())
            .map_err(|error| open_error(error.to_string()))?;
        let decoder = context
            .decoder()
            .video()
            .map_err(|error| open_error(error.to_string()))?;
        let (width, height) = (decoder.width(), decoder.height());

        log::debug!(
            "Opened playback for {}: {:.3}s, {}x{}, stated rate {:?}",
            path.display(),
            duration,
            width,
            height,
            stated_rate
        );

        Ok(Self {
            input,
            stream_index,
            time_base,
            start_pts,
            decoder,
            converter: FrameConverter::new(output),
            frame: VideoFrame::empty(),
            has_frame: false,
            position: None,
            end_of_stream: false,
            duration,
            width,
            height,
            stated_rate,
        })
    }

    fn frame_tolerance(&self) -> f64 {
        0.5 / self.stated_rate.unwrap_or(DEFAULT_FRAME_RATE)
    }

    /// Decode the next frame of the video stream into `self.frame`.
    fn decode_next(&mut self, deadline: Option<&Deadline>) -> Result<Option<f64>, FrameError> {
        loop {
            if self.decoder.receive_frame(&mut self.frame).is_ok() {
                let pts = self.frame.pts().or_else(|| self.frame.timestamp()).unwrap_or(0);
                let time = pts_to_seconds(pts - self.start_pts, self.time_base).max(0.0);
                self.has_frame = true;
                self.position = Some(time);
                return Ok(Some(time));
            }
            if self.end_of_stream {
                return Ok(None);
            }
            if let Some(deadline) = deadline {
                deadline.check()?;
            }

            let next = self
                .input
                .packets()
                .next()
                .map(|(stream, packet)| (stream.index(), packet));
            match next {
                Some((index, packet)) if index == self.stream_index => {
                    if let Err(error) = self.decoder.send_packet(&packet) {
                        log::debug!("Dropping undecodable packet: {error}");
                    }
                }
                Some(_) => {}
                None => {
                    self.decoder.send_eof()?;
                    self.end_of_stream = true;
                }
            }
        }
    }
}

impl Playback for FfmpegPlayback {
    fn duration(&self) -> f64 {
        self.duration
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn stated_frame_rate(&self) -> Option<f64> {
        self.stated_rate
    }

    fn next_frame_delivery(&mut self) -> Result<Option<f64>, FrameError> {
        self.decode_next(None)
    }

    fn seek(&mut self, time: f64, timeout: Duration) -> Result<(), FrameError> {
        let deadline = Deadline::new(time, timeout);
        let target = time.clamp(0.0, self.duration.max(0.0));
        let tolerance = self.frame_tolerance();

        let reuse_position = self
            .position
            .is_some_and(|pos| target + tolerance >= pos && target - pos < FORWARD_DECODE_WINDOW);
        if !reuse_position {
            let timestamp = seconds_to_seek_timestamp(target);
            self.input.seek(timestamp, ..timestamp)?;
            self.decoder.flush();
            self.has_frame = false;
            self.position = None;
            self.end_of_stream = false;
        }

        loop {
            if let Some(position) = self.position {
                if position + tolerance >= target {
                    return Ok(());
                }
            }
            deadline.check()?;
            if self.decode_next(Some(&deadline))?.is_none() {
                // Past the last frame: stay on it.
                return if self.has_frame {
                    Ok(())
                } else {
                    Err(FrameError::Decode(format!("no frame decodable at {time:.3}s")))
                };
            }
        }
    }

    fn snapshot(&mut self) -> Result<DynamicImage, FrameError> {
        if !self.has_frame {
            return Err(FrameError::Decode("no frame at the current position".to_string()));
        }
        self.converter.convert(&self.frame)
    }
}
