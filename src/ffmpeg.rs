//! FFmpeg glue.
//!
//! One-time library initialisation, mapping of MP4 sample-entry codes to
//! FFmpeg codec IDs, and control over FFmpeg's own console logging.
//!
//! FFmpeg logs to stderr through its own machinery, independent of the
//! [`log`](https://crates.io/crates/log) facade used by this crate. Use
//! [`set_ffmpeg_log_level`] to quieten it:
//!
//! ```no_run
//! use framegrab::FfmpegLogLevel;
//!
//! framegrab::set_ffmpeg_log_level(FfmpegLogLevel::Error);
//! assert_eq!(framegrab::get_ffmpeg_log_level(), Some(FfmpegLogLevel::Error));
//! ```

use ffmpeg_next::codec::Id as CodecId;
use ffmpeg_next::util::log::Level;

use crate::error::FrameError;

/// Initialise FFmpeg. Safe to call repeatedly.
pub(crate) fn initialize() -> Result<(), FrameError> {
    ffmpeg_next::init()
        .map_err(|error| FrameError::FfmpegError(format!("initialisation failed: {error}")))
}

/// FFmpeg codec for an MP4 sample-entry four-character code.
pub(crate) fn codec_id_for_fourcc(fourcc: &str) -> Option<CodecId> {
    match fourcc {
        "avc1" | "avc3" => Some(CodecId::H264),
        "hvc1" | "hev1" => Some(CodecId::HEVC),
        "vp08" => Some(CodecId::VP8),
        "vp09" => Some(CodecId::VP9),
        "av01" => Some(CodecId::AV1),
        "mp4v" => Some(CodecId::MPEG4),
        _ => None,
    }
}

/// FFmpeg console verbosity, quietest first. `Warning` is FFmpeg's default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FfmpegLogLevel {
    /// No console output.
    Quiet,
    /// Only conditions that crash the process.
    Panic,
    /// Errors FFmpeg cannot recover from.
    Fatal,
    /// Recoverable errors such as corrupt packets.
    Error,
    Warning,
    Info,
    /// Extra informational detail.
    Verbose,
    /// Developer diagnostics.
    Debug,
    /// Per-packet tracing; very noisy.
    Trace,
}

const LEVELS: [(FfmpegLogLevel, Level); 9] = [
    (FfmpegLogLevel::Quiet, Level::Quiet),
    (FfmpegLogLevel::Panic, Level::Panic),
    (FfmpegLogLevel::Fatal, Level::Fatal),
    (FfmpegLogLevel::Error, Level::Error),
    (FfmpegLogLevel::Warning, Level::Warning),
    (FfmpegLogLevel::Info, Level::Info),
    (FfmpegLogLevel::Verbose, Level::Verbose),
    (FfmpegLogLevel::Debug, Level::Debug),
    (FfmpegLogLevel::Trace, Level::Trace),
];

impl From<FfmpegLogLevel> for Level {
    fn from(level: FfmpegLogLevel) -> Self {
        LEVELS
            .iter()
            .find(|(ours, _)| *ours == level)
            .map_or(Level::Warning, |&(_, theirs)| theirs)
    }
}

/// Set FFmpeg's console verbosity. Output through the `log` facade is
/// unaffected.
pub fn set_ffmpeg_log_level(level: FfmpegLogLevel) {
    ffmpeg_next::util::log::set_level(level.into());
}

/// `None` when FFmpeg reports a level outside the known set.
pub fn get_ffmpeg_log_level() -> Option<FfmpegLogLevel> {
    let current = ffmpeg_next::util::log::get_level().ok()?;
    LEVELS
        .iter()
        .find(|(_, theirs)| *theirs == current)
        .map(|&(ours, _)| ours)
}
