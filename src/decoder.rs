//! Stream decoders.
//!
//! A [`StreamDecoder`] turns demuxed [`CodedSample`]s into owned images. It
//! is configured once from a [`DecoderConfig`] and fed samples strictly in
//! decode order; images come back in whatever order the codec releases them,
//! each tagged with the composition timestamp of the sample it came from.

use ffmpeg_next::{
    Packet,
    codec::{self, packet::Flags as PacketFlags},
    decoder::Video as VideoDecoder,
    frame::Video as VideoFrame,
};
use image::DynamicImage;

use crate::configuration::FrameOutputOptions;
use crate::conversion::FrameConverter;
use crate::demux::{CodedSample, TrackInfo};
use crate::error::FrameError;

/// Everything a decoder needs before the first sample.
#[derive(Debug, Clone, PartialEq)]
pub struct DecoderConfig {
    /// Sample entry four-character code.
    pub codec: String,
    /// Coded width in pixels.
    pub width: u32,
    /// Coded height in pixels.
    pub height: u32,
    /// Out-of-band codec configuration record (avcC, hvcC, ...).
    pub description: Option<Vec<u8>>,
    /// Track timescale used by sample timestamps.
    pub timescale: u32,
}

impl From<&TrackInfo> for DecoderConfig {
    fn from(track: &TrackInfo) -> Self {
        Self {
            codec: track.codec.clone(),
            width: track.width,
            height: track.height,
            description: track.codec_config.clone(),
            timescale: track.timescale,
        }
    }
}

/// A decoded image and the timestamp tag of the sample that produced it.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    /// Composition timestamp of the source sample, in track ticks.
    pub timestamp: i64,
    /// The owned bitmap.
    pub image: DynamicImage,
}

/// A configured streaming decoder.
///
/// Implementations run on a blocking worker thread and are never shared.
pub trait StreamDecoder {
    /// Submit one sample and collect any images the codec released.
    fn decode(&mut self, sample: &CodedSample) -> Result<Vec<DecodedImage>, FrameError>;

    /// Signal end of stream and drain buffered images.
    fn flush(&mut self) -> Result<Vec<DecodedImage>, FrameError>;
}

/// [`StreamDecoder`] backed by an FFmpeg codec context.
pub struct FfmpegDecoder {
    decoder: VideoDecoder,
    converter: FrameConverter,
    decoded: VideoFrame,
}

impl FfmpegDecoder {
    /// Open an FFmpeg decoder for `config`.
    ///
    /// # Errors
    ///
    /// [`FrameError::DecoderInit`] when the codec is unknown, not compiled
    /// into FFmpeg, or rejects the configuration record.
    pub fn new(config: &DecoderConfig, output: &FrameOutputOptions) -> Result<Self, FrameError> {
        crate::ffmpeg::initialize()?;

        let codec_id = crate::ffmpeg::codec_id_for_fourcc(&config.codec).ok_or_else(|| {
            FrameError::DecoderInit(format!("unsupported codec {}", config.codec))
        })?;
        let codec = codec::decoder::find(codec_id).ok_or_else(|| {
            FrameError::DecoderInit(format!("no FFmpeg decoder for {codec_id:?}"))
        })?;

        let mut context = codec::Context::new_with_codec(codec);
        // SAFETY: `context` owns a freshly allocated AVCodecContext that has
        // not been opened yet. The extradata buffer is allocated by FFmpeg
        // with the required padding and freed by it when the context closes.
        unsafe {
            let raw = context.as_mut_ptr();
            (*raw).width = config.width as i32;
            (*raw).height = config.height as i32;
            (*raw).pkt_timebase = ffmpeg_sys_next::AVRational {
                num: 1,
                den: config.timescale.max(1) as i32,
            };

            if let Some(description) = config.description.as_deref() {
                let padding = ffmpeg_sys_next::AV_INPUT_BUFFER_PADDING_SIZE as usize;
                let buffer =
                    ffmpeg_sys_next::av_mallocz(description.len() + padding) as *mut u8;
                if buffer.is_null() {
                    return Err(FrameError::DecoderInit(
                        "could not allocate codec extradata".to_string(),
                    ));
                }
                std::ptr::copy_nonoverlapping(description.as_ptr(), buffer, description.len());
                (*raw).extradata = buffer;
                (*raw).extradata_size = description.len() as i32;
            }
        }

        let decoder = context
            .decoder()
            .video()
            .map_err(|error| FrameError::DecoderInit(format!("{}: {error}", config.codec)))?;

        log::debug!(
            "Opened {:?} decoder for {} ({}x{}, timescale {})",
            codec_id,
            config.codec,
            config.width,
            config.height,
            config.timescale
        );

        Ok(Self {
            decoder,
            converter: FrameConverter::new(output),
            decoded: VideoFrame::empty(),
        })
    }

    fn drain(&mut self) -> Result<Vec<DecodedImage>, FrameError> {
        let mut images = Vec::new();
        while self.decoder.receive_frame(&mut self.decoded).is_ok() {
            let timestamp = self
                .decoded
                .pts()
                .or_else(|| self.decoded.timestamp())
                .unwrap_or(0);
            let image = self.converter.convert(&self.decoded)?;
            images.push(DecodedImage { timestamp, image });
        }
        Ok(images)
    }
}

impl StreamDecoder for FfmpegDecoder {
    fn decode(&mut self, sample: &CodedSample) -> Result<Vec<DecodedImage>, FrameError> {
        let mut packet = Packet::copy(&sample.payload);
        packet.set_pts(Some(sample.composition_timestamp));
        packet.set_dts(Some(sample.decode_timestamp));
        packet.set_duration(sample.duration as i64);
        if sample.is_keyframe {
            packet.set_flags(PacketFlags::KEY);
        }

        self.decoder
            .send_packet(&packet)
            .map_err(|error| FrameError::Decode(format!("sample {}: {error}", sample.index)))?;
        self.drain()
    }

    fn flush(&mut self) -> Result<Vec<DecodedImage>, FrameError> {
        self.decoder
            .send_eof()
            .map_err(|error| FrameError::Decode(format!("flush: {error}")))?;
        self.drain()
    }
}

