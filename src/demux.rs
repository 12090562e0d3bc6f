//! MP4 / ISO-BMFF demuxing.
//!
//! [`Mp4Demuxer`] walks the box tree of an in-memory container, locates the
//! first video track, and returns its [`TrackInfo`] together with the coded
//! samples in decode order. Only the boxes needed for that are parsed:
//!
//! ```text
//! moov ─ mvhd
//!      └ trak ─ tkhd
//!             └ mdia ─ mdhd
//!                    ├ hdlr
//!                    └ minf ─ stbl ─ stsd, stts, ctts, stss, stsc, stsz, stco/co64
//! ```
//!
//! Every read is bounds-checked; a truncated or inconsistent box yields
//! [`FrameError::InvalidContainer`] instead of a panic.
//!
//! # Example
//!
//! ```no_run
//! use framegrab::Mp4Demuxer;
//!
//! # fn example() -> Result<(), framegrab::FrameError> {
//! let bytes = std::fs::read("input.mp4")?;
//! let (track, samples) = Mp4Demuxer::demux(&bytes, Some(30))?;
//! println!("{} {}x{}, first {} of {} samples", track.codec, track.width, track.height,
//!     samples.len(), track.sample_count);
//! # Ok(())
//! # }
//! ```

use crate::conversion::ticks_to_seconds;
use crate::error::FrameError;
use crate::sample_table::SampleTableBuilder;

/// Offset of the child boxes inside a visual sample entry, from the start
/// of the entry (8 header + 78 fixed fields).
const VISUAL_SAMPLE_ENTRY_CHILDREN: usize = 86;

/// Codec configuration boxes recognised inside a visual sample entry.
const CONFIG_BOXES: [&[u8; 4]; 4] = [b"avcC", b"hvcC", b"vpcC", b"av1C"];

/// Video track description.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackInfo {
    /// Track ID from `tkhd`.
    pub track_id: u32,
    /// Sample entry four-character code, e.g. `avc1`, `hvc1`, `vp09`.
    pub codec: String,
    /// Coded width in pixels.
    pub width: u32,
    /// Coded height in pixels.
    pub height: u32,
    /// Media timescale (ticks per second).
    pub timescale: u32,
    /// Media duration in ticks.
    pub duration: u64,
    /// Total samples in the track, independent of any sample limit.
    pub sample_count: u32,
    /// Codec configuration record (the config box body, without its header).
    pub codec_config: Option<Vec<u8>>,
}

impl TrackInfo {
    /// Media duration in seconds.
    pub fn duration_seconds(&self) -> f64 {
        ticks_to_seconds(self.duration as i64, self.timescale)
    }

    /// `sample_count / duration`, or `None` when the duration is zero.
    pub fn frame_rate(&self) -> Option<f64> {
        let duration = self.duration_seconds();
        (duration > 0.0 && self.sample_count > 0).then(|| self.sample_count as f64 / duration)
    }
}

/// One compressed access unit of the video track.
#[derive(Debug, Clone, PartialEq)]
pub struct CodedSample {
    /// Zero-based position in decode order.
    pub index: u64,
    /// Decode timestamp in track ticks.
    pub decode_timestamp: i64,
    /// Composition (display) timestamp in track ticks.
    pub composition_timestamp: i64,
    /// Duration in track ticks.
    pub duration: u32,
    /// Sync sample flag.
    pub is_keyframe: bool,
    /// Compressed payload.
    pub payload: Vec<u8>,
}

/// Box-tree parser for MP4 / ISO-BMFF containers held in memory.
#[derive(Debug, Clone, Copy, Default)]
pub struct Mp4Demuxer;

impl Mp4Demuxer {
    /// Parse `bytes` and return the first video track with its samples.
    ///
    /// `limit` restricts sample resolution to the first K samples in decode
    /// order; the returned [`TrackInfo::sample_count`] still reports the full
    /// count.
    ///
    /// # Errors
    ///
    /// - [`FrameError::NoVideoTrack`] when no `trak` has a `vide` handler.
    /// - [`FrameError::CodecConfig`] when an `avc1`/`hvc1` entry carries no
    ///   `avcC`/`hvcC` box.
    /// - [`FrameError::InvalidContainer`] for malformed boxes or samples that
    ///   lie outside `bytes`.
    pub fn demux(
        bytes: &[u8],
        limit: Option<usize>,
    ) -> Result<(TrackInfo, Vec<CodedSample>), FrameError> {
        let (track, table) = Self::find_video_track(bytes)?;
        let locations = table.build(limit, bytes.len() as u64)?;
        log::debug!(
            "Demuxed {} track {}: {}x{}, {} samples (resolving {})",
            track.codec,
            track.track_id,
            track.width,
            track.height,
            track.sample_count,
            locations.len()
        );

        let samples = locations
            .into_iter()
            .enumerate()
            .map(|(index, location)| {
                let start = usize::try_from(location.offset).ok();
                let end = start.and_then(|s| s.checked_add(location.size as usize));
                let payload = match (start, end) {
                    (Some(s), Some(e)) if e <= bytes.len() => bytes[s..e].to_vec(),
                    _ => {
                        return Err(FrameError::InvalidContainer(format!(
                            "sample {index} at offset {} ({} bytes) lies outside the {}-byte file",
                            location.offset,
                            location.size,
                            bytes.len()
                        )));
                    }
                };
                Ok(CodedSample {
                    index: index as u64,
                    decode_timestamp: location.decode_timestamp,
                    composition_timestamp: location.decode_timestamp
                        + location.composition_offset as i64,
                    duration: location.duration,
                    is_keyframe: location.is_keyframe,
                    payload,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok((track, samples))
    }

    /// Parse only the video track description, without resolving samples.
    pub fn track_info(bytes: &[u8]) -> Result<TrackInfo, FrameError> {
        Self::find_video_track(bytes).map(|(track, _)| track)
    }

    fn find_video_track(bytes: &[u8]) -> Result<(TrackInfo, SampleTableBuilder), FrameError> {
        let top = read_boxes(bytes)?;
        let moov = top
            .iter()
            .find(|b| &b.kind == b"moov")
            .ok_or_else(|| FrameError::InvalidContainer("missing moov box".to_string()))?;

        for trak in read_boxes(moov.body)?.iter().filter(|b| &b.kind == b"trak") {
            if let Some(found) = parse_trak(trak.body)? {
                return Ok(found);
            }
        }
        Err(FrameError::NoVideoTrack)
    }
}

/// A box borrowed from the container buffer.
struct Mp4Box<'a> {
    kind: [u8; 4],
    body: &'a [u8],
}

/// Split `data` into its sibling boxes.
fn read_boxes(data: &[u8]) -> Result<Vec<Mp4Box<'_>>, FrameError> {
    let mut boxes = Vec::new();
    let mut reader = ByteReader::new(data);

    while reader.remaining() >= 8 {
        let start = reader.position();
        let size = reader.u32()? as u64;
        let kind = reader.fourcc()?;
        let (total, header) = match size {
            1 => (reader.u64()?, 16u64),
            0 => ((data.len() - start) as u64, 8u64),
            n => (n, 8u64),
        };

        if total < header || total > (data.len() - start) as u64 {
            return Err(FrameError::InvalidContainer(format!(
                "box {} at offset {start} declares {total} bytes, {} available",
                String::from_utf8_lossy(&kind),
                data.len() - start
            )));
        }

        let body_start = start + header as usize;
        let end = start + total as usize;
        boxes.push(Mp4Box {
            kind,
            body: &data[body_start..end],
        });
        reader.seek(end);
    }

    Ok(boxes)
}

fn child<'a>(boxes: &'a [Mp4Box<'a>], kind: &[u8; 4]) -> Option<&'a Mp4Box<'a>> {
    boxes.iter().find(|b| &b.kind == kind)
}

fn parse_trak(trak: &[u8]) -> Result<Option<(TrackInfo, SampleTableBuilder)>, FrameError> {
    let children = read_boxes(trak)?;
    let Some(mdia) = child(&children, b"mdia") else {
        return Ok(None);
    };
    let mdia_children = read_boxes(mdia.body)?;

    let is_video = match child(&mdia_children, b"hdlr") {
        Some(hdlr) => {
            let mut reader = ByteReader::new(hdlr.body);
            reader.skip(8)?;
            &reader.fourcc()? == b"vide"
        }
        None => false,
    };
    if !is_video {
        return Ok(None);
    }

    let (track_id, tkhd_width, tkhd_height) = match child(&children, b"tkhd") {
        Some(tkhd) => parse_tkhd(tkhd.body)?,
        None => (0, 0, 0),
    };
    let (timescale, duration) = match child(&mdia_children, b"mdhd") {
        Some(mdhd) => parse_mdhd(mdhd.body)?,
        None => return Err(FrameError::InvalidContainer("video track without mdhd".to_string())),
    };

    let stbl = child(&mdia_children, b"minf")
        .map(|minf| read_boxes(minf.body))
        .transpose()?
        .and_then(|minf| {
            minf.iter()
                .find(|b| &b.kind == b"stbl")
                .map(|stbl| stbl.body)
        })
        .ok_or_else(|| FrameError::InvalidContainer("video track without stbl".to_string()))?;
    let stbl_children = read_boxes(stbl)?;

    let stsd = child(&stbl_children, b"stsd")
        .ok_or_else(|| FrameError::InvalidContainer("video track without stsd".to_string()))?;
    let entry = parse_stsd(stsd.body)?;

    let mut builder = SampleTableBuilder::new();
    for table in &stbl_children {
        match &table.kind {
            b"stts" => builder.set_stts(read_pairs(table.body, |r| Ok((r.u32()?, r.u32()?)))?),
            b"ctts" => builder.set_ctts(read_pairs(table.body, |r| {
                // Version 0 offsets are unsigned, version 1 signed; both fit i32
                // for any sane stream.
                Ok((r.u32()?, r.u32()? as i32))
            })?),
            b"stss" => builder.set_sync_samples(read_pairs(table.body, |r| r.u32())?),
            b"stsc" => builder.set_stsc(read_pairs(table.body, |r| {
                let first = r.u32()?;
                let per_chunk = r.u32()?;
                r.skip(4)?;
                Ok((first, per_chunk))
            })?),
            b"stsz" => {
                let mut reader = ByteReader::new(table.body);
                reader.skip(4)?;
                let uniform = reader.u32()?;
                let count = reader.u32()?;
                let mut sizes = Vec::new();
                if uniform == 0 {
                    sizes.reserve((count as usize).min(reader.remaining() / 4));
                    for _ in 0..count {
                        sizes.push(reader.u32()?);
                    }
                }
                builder.set_stsz(uniform, count, sizes);
            }
            b"stco" => builder.set_chunk_offsets(read_pairs(table.body, |r| Ok(r.u32()? as u64))?),
            b"co64" => builder.set_chunk_offsets(read_pairs(table.body, |r| r.u64())?),
            _ => {}
        }
    }

    let width = if entry.width > 0 { entry.width } else { tkhd_width };
    let height = if entry.height > 0 { entry.height } else { tkhd_height };

    let track = TrackInfo {
        track_id,
        codec: entry.codec,
        width,
        height,
        timescale,
        duration,
        sample_count: builder.sample_count(),
        codec_config: entry.config,
    };
    Ok(Some((track, builder)))
}

/// Returns `(track_id, width, height)`; dimensions are 16.16 fixed point.
fn parse_tkhd(body: &[u8]) -> Result<(u32, u32, u32), FrameError> {
    let mut reader = ByteReader::new(body);
    let version = reader.u8()?;
    reader.skip(3)?;
    let track_id = if version == 1 {
        reader.skip(16)?;
        let id = reader.u32()?;
        reader.skip(4 + 8)?;
        id
    } else {
        reader.skip(8)?;
        let id = reader.u32()?;
        reader.skip(4 + 4)?;
        id
    };
    // reserved(8) layer(2) alternate_group(2) volume(2) reserved(2) matrix(36)
    reader.skip(52)?;
    let width = reader.u32()? >> 16;
    let height = reader.u32()? >> 16;
    Ok((track_id, width, height))
}

/// Returns `(timescale, duration)`.
fn parse_mdhd(body: &[u8]) -> Result<(u32, u64), FrameError> {
    let mut reader = ByteReader::new(body);
    let version = reader.u8()?;
    reader.skip(3)?;
    if version == 1 {
        reader.skip(16)?;
        Ok((reader.u32()?, reader.u64()?))
    } else {
        reader.skip(8)?;
        Ok((reader.u32()?, reader.u32()? as u64))
    }
}

struct SampleEntry {
    codec: String,
    width: u32,
    height: u32,
    config: Option<Vec<u8>>,
}

fn parse_stsd(body: &[u8]) -> Result<SampleEntry, FrameError> {
    let mut reader = ByteReader::new(body);
    reader.skip(4)?;
    let entry_count = reader.u32()?;
    if entry_count == 0 {
        return Err(FrameError::InvalidContainer("stsd has no sample entries".to_string()));
    }

    let entries = read_boxes(&body[reader.position()..])?;
    let entry = entries
        .first()
        .ok_or_else(|| FrameError::InvalidContainer("stsd has no sample entries".to_string()))?;
    let codec = String::from_utf8_lossy(&entry.kind).into_owned();

    // The body starts after the 8-byte header: reserved(6) data_ref(2)
    // pre_defined/reserved(16) width(2) height(2).
    let mut fields = ByteReader::new(entry.body);
    fields.skip(24)?;
    let width = fields.u16()? as u32;
    let height = fields.u16()? as u32;

    let children_at = VISUAL_SAMPLE_ENTRY_CHILDREN - 8;
    let config = if entry.body.len() > children_at {
        read_boxes(&entry.body[children_at..])?
            .into_iter()
            .find(|b| CONFIG_BOXES.contains(&&b.kind))
            .map(|b| b.body.to_vec())
    } else {
        None
    };

    if config.is_none() && matches!(codec.as_str(), "avc1" | "hvc1") {
        return Err(FrameError::CodecConfig(format!(
            "{codec} sample entry has no {} box",
            if codec == "avc1" { "avcC" } else { "hvcC" }
        )));
    }

    Ok(SampleEntry {
        codec,
        width,
        height,
        config,
    })
}

/// Read a full-box table: version/flags, entry count, then `entry_count`
/// entries decoded by `read`.
fn read_pairs<T>(
    body: &[u8],
    mut read: impl FnMut(&mut ByteReader<'_>) -> Result<T, FrameError>,
) -> Result<Vec<T>, FrameError> {
    let mut reader = ByteReader::new(body);
    reader.skip(4)?;
    let count = reader.u32()? as usize;
    // Never trust the declared count for the allocation.
    let mut entries = Vec::with_capacity(count.min(reader.remaining() / 4));
    for _ in 0..count {
        entries.push(read(&mut reader)?);
    }
    Ok(entries)
}

/// Big-endian cursor over a byte slice.
struct ByteReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> ByteReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    fn position(&self) -> usize {
        self.position
    }

    fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.position)
    }

    fn seek(&mut self, position: usize) {
        self.position = position;
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], FrameError> {
        if self.remaining() < n {
            return Err(FrameError::InvalidContainer(format!(
                "unexpected end of box data: wanted {n} bytes at offset {}, {} left",
                self.position,
                self.remaining()
            )));
        }
        let slice = &self.data[self.position..self.position + n];
        self.position += n;
        Ok(slice)
    }

    fn skip(&mut self, n: usize) -> Result<(), FrameError> {
        self.take(n).map(|_| ())
    }

    fn u8(&mut self) -> Result<u8, FrameError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, FrameError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, FrameError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64, FrameError> {
        let b = self.take(8)?;
        Ok(u64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
    }

    fn fourcc(&mut self) -> Result<[u8; 4], FrameError> {
        let b = self.take(4)?;
        Ok([b[0], b[1], b[2], b[3]])
    }
}
