//! Shared test support: an in-memory MP4 writer and a synthetic media
//! backend whose playback elements and decoders behave on command.

#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use framegrab::{
    CodedSample, DecodedImage, DecoderConfig, ExtractedFrame, ExtractionReport,
    ExtractionStrategy, FrameError, FrameOutputOptions, FrameRateSource, FrameStore,
    MediaBackend, Playback, ProgressCallback, ProgressInfo, StreamDecoder, VideoMetadata,
};
use image::{DynamicImage, Rgb, RgbImage};

pub fn sample_video_path() -> &'static str {
    "tests/fixtures/sample_video.mp4"
}

// ── MP4 writer ─────────────────────────────────────────────────────

/// Describes a single-track MP4 to synthesize.
#[derive(Debug, Clone)]
pub struct Mp4Spec {
    pub codec: [u8; 4],
    pub handler: [u8; 4],
    pub width: u16,
    pub height: u16,
    pub timescale: u32,
    pub sample_delta: u32,
    pub sample_count: u32,
    pub samples_per_chunk: u32,
    /// Every Nth sample is a sync sample; `None` omits `stss`.
    pub keyframe_interval: Option<u32>,
    /// Per-sample composition offsets; `None` omits `ctts`.
    pub composition_offsets: Option<Vec<i32>>,
    pub codec_config: Option<Vec<u8>>,
}

impl Mp4Spec {
    /// An H.264 track of `sample_count` frames at an integral frame rate.
    pub fn h264(sample_count: u32, fps: u32) -> Self {
        Self {
            codec: *b"avc1",
            handler: *b"vide",
            width: 64,
            height: 48,
            timescale: fps * 1000,
            sample_delta: 1000,
            sample_count,
            samples_per_chunk: 4,
            keyframe_interval: Some(10),
            composition_offsets: None,
            codec_config: Some(avc_config()),
        }
    }
}

/// A plausible `avcC` record body.
pub fn avc_config() -> Vec<u8> {
    vec![
        0x01, 0x42, 0xC0, 0x1E, 0xFF, 0xE1, 0x00, 0x04, 0x67, 0x42, 0xC0, 0x1E, 0x01, 0x00, 0x02,
        0x68, 0xCE,
    ]
}

/// Payload of sample `index`: its index, then filler of varying length.
pub fn sample_payload(index: u32) -> Vec<u8> {
    let mut payload = index.to_be_bytes().to_vec();
    payload.extend(std::iter::repeat_n(0xAB, 12 + (index % 5) as usize));
    payload
}

pub fn payload_index(payload: &[u8]) -> u32 {
    u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]])
}

fn mp4_box(kind: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 8);
    out.extend_from_slice(&(body.len() as u32 + 8).to_be_bytes());
    out.extend_from_slice(kind);
    out.extend_from_slice(body);
    out
}

fn full_box(kind: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let mut with_header = vec![0, 0, 0, 0];
    with_header.extend_from_slice(body);
    mp4_box(kind, &with_header)
}

fn table<T>(entries: &[T], write: impl Fn(&mut Vec<u8>, &T)) -> Vec<u8> {
    let mut body = (entries.len() as u32).to_be_bytes().to_vec();
    for entry in entries {
        write(&mut body, entry);
    }
    body
}

fn be32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_be_bytes());
}

fn tkhd(spec: &Mp4Spec, duration: u32) -> Vec<u8> {
    let mut body = Vec::new();
    be32(&mut body, 0); // creation
    be32(&mut body, 0); // modification
    be32(&mut body, 1); // track id
    be32(&mut body, 0);
    be32(&mut body, duration);
    body.extend_from_slice(&[0; 52]);
    be32(&mut body, (spec.width as u32) << 16);
    be32(&mut body, (spec.height as u32) << 16);
    full_box(b"tkhd", &body)
}

fn mdhd(spec: &Mp4Spec, duration: u32) -> Vec<u8> {
    let mut body = Vec::new();
    be32(&mut body, 0);
    be32(&mut body, 0);
    be32(&mut body, spec.timescale);
    be32(&mut body, duration);
    body.extend_from_slice(&[0x55, 0xC4, 0, 0]);
    full_box(b"mdhd", &body)
}

fn hdlr(spec: &Mp4Spec) -> Vec<u8> {
    let mut body = vec![0; 4];
    body.extend_from_slice(&spec.handler);
    body.extend_from_slice(&[0; 12]);
    body.push(0);
    full_box(b"hdlr", &body)
}

fn stsd(spec: &Mp4Spec) -> Vec<u8> {
    let mut entry = vec![0; 6];
    entry.extend_from_slice(&1u16.to_be_bytes());
    entry.extend_from_slice(&[0; 16]);
    entry.extend_from_slice(&spec.width.to_be_bytes());
    entry.extend_from_slice(&spec.height.to_be_bytes());
    be32(&mut entry, 0x0048_0000);
    be32(&mut entry, 0x0048_0000);
    be32(&mut entry, 0);
    entry.extend_from_slice(&1u16.to_be_bytes());
    entry.extend_from_slice(&[0; 32]);
    entry.extend_from_slice(&0x0018u16.to_be_bytes());
    entry.extend_from_slice(&0xFFFFu16.to_be_bytes());
    if let Some(config) = &spec.codec_config {
        let kind = if &spec.codec == b"hvc1" { b"hvcC" } else { b"avcC" };
        entry.extend_from_slice(&mp4_box(kind, config));
    }

    let mut body = Vec::new();
    be32(&mut body, 1);
    body.extend_from_slice(&mp4_box(&spec.codec, &entry));
    full_box(b"stsd", &body)
}

fn moov(spec: &Mp4Spec, payloads: &[Vec<u8>], data_start: u32) -> Vec<u8> {
    let duration = spec.sample_count * spec.sample_delta;
    let per_chunk = spec.samples_per_chunk.max(1) as usize;

    let mut chunk_offsets = Vec::new();
    let mut offset = data_start;
    for chunk in payloads.chunks(per_chunk) {
        chunk_offsets.push(offset);
        offset += chunk.iter().map(|p| p.len() as u32).sum::<u32>();
    }

    let mut stbl = stsd(spec);
    stbl.extend(full_box(
        b"stts",
        &table(&[(spec.sample_count, spec.sample_delta)], |out, &(count, delta)| {
            be32(out, count);
            be32(out, delta);
        }),
    ));
    if let Some(interval) = spec.keyframe_interval {
        let sync: Vec<u32> = (0..spec.sample_count)
            .filter(|i| i % interval.max(1) == 0)
            .map(|i| i + 1)
            .collect();
        stbl.extend(full_box(b"stss", &table(&sync, |out, &n| be32(out, n))));
    }
    if let Some(offsets) = &spec.composition_offsets {
        stbl.extend(full_box(
            b"ctts",
            &table(offsets, |out, &offset| {
                be32(out, 1);
                out.extend_from_slice(&offset.to_be_bytes());
            }),
        ));
    }
    stbl.extend(full_box(
        b"stsc",
        &table(&[(1u32, per_chunk as u32)], |out, &(first, count)| {
            be32(out, first);
            be32(out, count);
            be32(out, 1);
        }),
    ));
    let mut stsz = Vec::new();
    be32(&mut stsz, 0);
    be32(&mut stsz, spec.sample_count);
    for payload in payloads {
        be32(&mut stsz, payload.len() as u32);
    }
    stbl.extend(full_box(b"stsz", &stsz));
    stbl.extend(full_box(b"stco", &table(&chunk_offsets, |out, &o| be32(out, o))));

    let minf = mp4_box(b"minf", &mp4_box(b"stbl", &stbl));
    let mut mdia = mdhd(spec, duration);
    mdia.extend(hdlr(spec));
    mdia.extend(minf);

    let mut trak = tkhd(spec, duration);
    trak.extend(mp4_box(b"mdia", &mdia));

    let mut mvhd = vec![0; 96];
    mvhd[8..12].copy_from_slice(&spec.timescale.to_be_bytes());
    mvhd[12..16].copy_from_slice(&duration.to_be_bytes());
    let mut moov = full_box(b"mvhd", &mvhd);
    moov.extend(mp4_box(b"trak", &trak));
    mp4_box(b"moov", &moov)
}

/// Serialize `spec` as `ftyp`, `moov`, `mdat`.
pub fn build_mp4(spec: &Mp4Spec) -> Vec<u8> {
    let payloads: Vec<Vec<u8>> = (0..spec.sample_count).map(sample_payload).collect();
    let ftyp = mp4_box(b"ftyp", b"isom\0\0\x02\0isomavc1");

    let placeholder = moov(spec, &payloads, 0);
    let data_start = (ftyp.len() + placeholder.len() + 8) as u32;
    let moov = moov(spec, &payloads, data_start);
    let mdat = mp4_box(b"mdat", &payloads.concat());

    [ftyp, moov, mdat].concat()
}

// ── Images ─────────────────────────────────────────────────────────

pub const BRIGHT: u8 = 200;
pub const DARK: u8 = 4;

pub fn solid_image(width: u32, height: u32, level: u8) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([level; 3])))
}

/// A bright 4x4 image carrying `tag` in its red and green channels.
pub fn tagged_image(tag: u32) -> DynamicImage {
    let pixel = Rgb([(tag % 256) as u8, (tag / 256 % 256) as u8, BRIGHT]);
    DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 4, pixel))
}

pub fn image_tag(image: &DynamicImage) -> u32 {
    let [r, g, _] = image.to_rgb8().get_pixel(0, 0).0;
    r as u32 + g as u32 * 256
}

/// A store of `count` frames spaced `1 / fps` apart.
pub fn synthetic_store(count: u64, fps: f64) -> FrameStore {
    let duration = count as f64 / fps;
    let frames: Vec<ExtractedFrame> = (0..count)
        .map(|i| ExtractedFrame {
            time: (i as f64 / fps).min(duration - 0.01),
            image: tagged_image(i as u32),
        })
        .collect();
    let metadata = VideoMetadata::new(duration, 4, 4, fps, FrameRateSource::Container);
    let report = ExtractionReport {
        expected: count,
        extracted: frames.len() as u64,
        failed_indices: Vec::new(),
        strategy: ExtractionStrategy::PipelineDecode,
        fell_back: false,
    };
    FrameStore::new(frames, metadata, report)
}

// ── Synthetic decoder ──────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct DecoderBehavior {
    /// Images held back before release, emulating codec delay.
    pub reorder_depth: usize,
    pub failing_samples: HashSet<u64>,
    pub emit_duplicates: bool,
    pub produce_nothing: bool,
    pub per_sample_delay: Duration,
    pub init_error: bool,
}

pub struct FakeDecoder {
    behavior: DecoderBehavior,
    held: VecDeque<DecodedImage>,
}

impl FakeDecoder {
    pub fn new(behavior: DecoderBehavior) -> Self {
        Self {
            behavior,
            held: VecDeque::new(),
        }
    }

    pub fn boxed(behavior: DecoderBehavior) -> Result<Box<dyn StreamDecoder>, FrameError> {
        if behavior.init_error {
            return Err(FrameError::DecoderInit("synthetic decoder refused".to_string()));
        }
        Ok(Box::new(Self::new(behavior)))
    }
}

impl StreamDecoder for FakeDecoder {
    fn decode(&mut self, sample: &CodedSample) -> Result<Vec<DecodedImage>, FrameError> {
        if !self.behavior.per_sample_delay.is_zero() {
            std::thread::sleep(self.behavior.per_sample_delay);
        }
        if self.behavior.failing_samples.contains(&sample.index) {
            return Err(FrameError::Decode(format!("sample {} is corrupt", sample.index)));
        }
        if self.behavior.produce_nothing {
            return Ok(Vec::new());
        }

        self.held.push_back(DecodedImage {
            timestamp: sample.composition_timestamp,
            image: tagged_image(payload_index(&sample.payload)),
        });
        let mut released = Vec::new();
        while self.held.len() > self.behavior.reorder_depth {
            if let Some(image) = self.held.pop_front() {
                if self.behavior.emit_duplicates {
                    released.push(image.clone());
                }
                released.push(image);
            }
        }
        Ok(released)
    }

    fn flush(&mut self) -> Result<Vec<DecodedImage>, FrameError> {
        Ok(self.held.drain(..).collect())
    }
}

// ── Synthetic playback ─────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct PlaybackBehavior {
    pub duration: f64,
    pub width: u32,
    pub height: u32,
    pub stated_rate: Option<f64>,
    /// Times reported by successive frame deliveries; empty when delivery
    /// timing is unavailable.
    pub delivery_times: Vec<f64>,
    /// Seeks to these times fail.
    pub failing_times: Vec<f64>,
    /// Captures inside these half-open ranges are black.
    pub black_ranges: Vec<(f64, f64)>,
    /// While set, every seek fails.
    pub broken: Arc<AtomicBool>,
    pub seek_delay: Duration,
    pub seek_log: Arc<Mutex<Vec<f64>>>,
}

impl PlaybackBehavior {
    pub fn new(duration: f64, stated_rate: Option<f64>) -> Self {
        Self {
            duration,
            width: 8,
            height: 8,
            stated_rate,
            delivery_times: Vec::new(),
            failing_times: Vec::new(),
            black_ranges: Vec::new(),
            broken: Arc::new(AtomicBool::new(false)),
            seek_delay: Duration::ZERO,
            seek_log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn seeks(&self) -> Vec<f64> {
        self.seek_log.lock().unwrap().clone()
    }
}

pub struct FakePlayback {
    behavior: PlaybackBehavior,
    position: Option<f64>,
    delivered: usize,
}

impl FakePlayback {
    pub fn new(behavior: PlaybackBehavior) -> Self {
        Self {
            behavior,
            position: None,
            delivered: 0,
        }
    }
}

impl Playback for FakePlayback {
    fn duration(&self) -> f64 {
        self.behavior.duration
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.behavior.width, self.behavior.height)
    }

    fn stated_frame_rate(&self) -> Option<f64> {
        self.behavior.stated_rate
    }

    fn next_frame_delivery(&mut self) -> Result<Option<f64>, FrameError> {
        let time = self.behavior.delivery_times.get(self.delivered).copied();
        self.delivered += 1;
        Ok(time)
    }

    fn seek(&mut self, time: f64, timeout: Duration) -> Result<(), FrameError> {
        self.behavior.seek_log.lock().unwrap().push(time);
        if !self.behavior.seek_delay.is_zero() {
            std::thread::sleep(self.behavior.seek_delay);
        }
        let fails = self.behavior.broken.load(Ordering::SeqCst)
            || self
                .behavior
                .failing_times
                .iter()
                .any(|t| (t - time).abs() < 1e-6);
        if fails {
            self.position = None;
            return Err(FrameError::FrameTimeout { time, timeout });
        }
        self.position = Some(time);
        Ok(())
    }

    fn snapshot(&mut self) -> Result<DynamicImage, FrameError> {
        let position = self
            .position
            .ok_or_else(|| FrameError::Decode("no frame at the current position".to_string()))?;
        let black = self
            .behavior
            .black_ranges
            .iter()
            .any(|&(start, end)| position >= start && position < end);
        let level = if black { DARK } else { BRIGHT };
        Ok(solid_image(self.behavior.width, self.behavior.height, level))
    }
}

// ── Synthetic backend ──────────────────────────────────────────────

pub struct FakeBackend {
    pub pipeline: bool,
    pub decoder: DecoderBehavior,
    pub playback: PlaybackBehavior,
    pub decoders_created: AtomicUsize,
    pub playbacks_opened: AtomicUsize,
    pub opened_paths: Mutex<Vec<PathBuf>>,
}

impl FakeBackend {
    /// A backend with pipeline decoding available.
    pub fn new(playback: PlaybackBehavior, decoder: DecoderBehavior) -> Self {
        Self {
            pipeline: true,
            decoder,
            playback,
            decoders_created: AtomicUsize::new(0),
            playbacks_opened: AtomicUsize::new(0),
            opened_paths: Mutex::new(Vec::new()),
        }
    }

    /// A backend that can only seek.
    pub fn seek_only(playback: PlaybackBehavior) -> Self {
        Self {
            pipeline: false,
            ..Self::new(playback, DecoderBehavior::default())
        }
    }

    pub fn decoders_created(&self) -> usize {
        self.decoders_created.load(Ordering::SeqCst)
    }

    pub fn playbacks_opened(&self) -> usize {
        self.playbacks_opened.load(Ordering::SeqCst)
    }

    pub fn last_opened_path(&self) -> Option<PathBuf> {
        self.opened_paths.lock().unwrap().last().cloned()
    }
}

impl MediaBackend for FakeBackend {
    fn open_playback(
        &self,
        path: &Path,
        _output: &FrameOutputOptions,
    ) -> Result<Box<dyn Playback>, FrameError> {
        self.playbacks_opened.fetch_add(1, Ordering::SeqCst);
        self.opened_paths.lock().unwrap().push(path.to_path_buf());
        Ok(Box::new(FakePlayback::new(self.playback.clone())))
    }

    fn supports_pipeline_decode(&self) -> bool {
        self.pipeline
    }

    fn create_decoder(
        &self,
        _config: &DecoderConfig,
        _output: &FrameOutputOptions,
    ) -> Result<Box<dyn StreamDecoder>, FrameError> {
        self.decoders_created.fetch_add(1, Ordering::SeqCst);
        FakeDecoder::boxed(self.decoder.clone())
    }
}

// ── Progress ───────────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingProgress {
    pub infos: Mutex<Vec<ProgressInfo>>,
}

impl RecordingProgress {
    pub fn snapshot(&self) -> Vec<ProgressInfo> {
        self.infos.lock().unwrap().clone()
    }
}

impl ProgressCallback for RecordingProgress {
    fn on_progress(&self, info: &ProgressInfo) {
        self.infos.lock().unwrap().push(info.clone());
    }
}
