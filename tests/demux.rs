//! MP4 demuxer tests against synthesized containers.

mod common;

use framegrab::{FrameError, Mp4Demuxer};

use common::{Mp4Spec, avc_config, build_mp4, payload_index, sample_payload};

// ── Track description ──────────────────────────────────────────────

#[test]
fn track_info_describes_video_track() {
    let bytes = build_mp4(&Mp4Spec::h264(60, 30));
    let track = Mp4Demuxer::track_info(&bytes).expect("Failed to parse track");

    assert_eq!(track.track_id, 1);
    assert_eq!(track.codec, "avc1");
    assert_eq!((track.width, track.height), (64, 48));
    assert_eq!(track.timescale, 30_000);
    assert_eq!(track.duration, 60_000);
    assert_eq!(track.sample_count, 60);
    assert_eq!(track.codec_config.as_deref(), Some(avc_config().as_slice()));
}

#[test]
fn track_frame_rate_from_sample_count_and_duration() {
    let bytes = build_mp4(&Mp4Spec::h264(300, 30));
    let track = Mp4Demuxer::track_info(&bytes).expect("Failed to parse track");

    assert!((track.duration_seconds() - 10.0).abs() < 1e-9);
    let fps = track.frame_rate().expect("Expected a frame rate");
    assert!((fps - 30.0).abs() < 1e-9);
}

// ── Samples ────────────────────────────────────────────────────────

#[test]
fn samples_resolve_payloads_across_chunks() {
    let spec = Mp4Spec {
        samples_per_chunk: 3,
        ..Mp4Spec::h264(20, 25)
    };
    let bytes = build_mp4(&spec);
    let (_, samples) = Mp4Demuxer::demux(&bytes, None).expect("Failed to demux");

    assert_eq!(samples.len(), 20);
    for (i, sample) in samples.iter().enumerate() {
        assert_eq!(sample.index, i as u64);
        assert_eq!(sample.payload, sample_payload(i as u32));
    }
}

#[test]
fn samples_carry_decode_timestamps_and_keyframes() {
    let bytes = build_mp4(&Mp4Spec::h264(25, 30));
    let (_, samples) = Mp4Demuxer::demux(&bytes, None).expect("Failed to demux");

    for (i, sample) in samples.iter().enumerate() {
        assert_eq!(sample.decode_timestamp, i as i64 * 1000);
        assert_eq!(sample.composition_timestamp, sample.decode_timestamp);
        assert_eq!(sample.duration, 1000);
        assert_eq!(sample.is_keyframe, i % 10 == 0, "sample {i}");
    }
}

#[test]
fn missing_sync_table_marks_every_sample_key() {
    let spec = Mp4Spec {
        keyframe_interval: None,
        ..Mp4Spec::h264(12, 30)
    };
    let (_, samples) = Mp4Demuxer::demux(&build_mp4(&spec), None).expect("Failed to demux");
    assert!(samples.iter().all(|s| s.is_keyframe));
}

#[test]
fn composition_offsets_shift_presentation_order() {
    // I P B B pattern: decode order 0 1 2 3, display order 0 3 1 2.
    let offsets = vec![1000, 3000, 0, 0, 1000, 3000, 0, 0];
    let spec = Mp4Spec {
        composition_offsets: Some(offsets.clone()),
        ..Mp4Spec::h264(8, 30)
    };
    let (_, samples) = Mp4Demuxer::demux(&build_mp4(&spec), None).expect("Failed to demux");

    for (sample, offset) in samples.iter().zip(&offsets) {
        assert_eq!(
            sample.composition_timestamp,
            sample.decode_timestamp + *offset as i64
        );
    }
}

#[test]
fn limit_resolves_leading_samples_only() {
    let bytes = build_mp4(&Mp4Spec::h264(100, 30));
    let (track, samples) = Mp4Demuxer::demux(&bytes, Some(10)).expect("Failed to demux");

    assert_eq!(track.sample_count, 100);
    assert_eq!(samples.len(), 10);
    assert_eq!(payload_index(&samples[9].payload), 9);
}

#[test]
fn limit_larger_than_track_is_ignored() {
    let bytes = build_mp4(&Mp4Spec::h264(5, 30));
    let (_, samples) = Mp4Demuxer::demux(&bytes, Some(50)).expect("Failed to demux");
    assert_eq!(samples.len(), 5);
}

// ── Errors ─────────────────────────────────────────────────────────

#[test]
fn audio_only_container_has_no_video_track() {
    let spec = Mp4Spec {
        handler: *b"soun",
        ..Mp4Spec::h264(10, 30)
    };
    let result = Mp4Demuxer::demux(&build_mp4(&spec), None);
    assert!(matches!(result, Err(FrameError::NoVideoTrack)));
}

#[test]
fn avc_entry_without_config_record_is_rejected() {
    let spec = Mp4Spec {
        codec_config: None,
        ..Mp4Spec::h264(10, 30)
    };
    let result = Mp4Demuxer::demux(&build_mp4(&spec), None);
    assert!(matches!(result, Err(FrameError::CodecConfig(_))));
}

#[test]
fn vp9_entry_without_config_record_is_accepted() {
    let spec = Mp4Spec {
        codec: *b"vp09",
        codec_config: None,
        ..Mp4Spec::h264(10, 30)
    };
    let track = Mp4Demuxer::track_info(&build_mp4(&spec)).expect("Failed to parse track");
    assert_eq!(track.codec, "vp09");
    assert!(track.codec_config.is_none());
}

#[test]
fn truncated_media_data_is_invalid() {
    let mut bytes = build_mp4(&Mp4Spec::h264(30, 30));
    bytes.truncate(bytes.len() - 40);
    // Patch the mdat size so the box tree itself stays well formed.
    let mdat = bytes
        .windows(4)
        .rposition(|w| w == b"mdat")
        .expect("mdat present")
        - 4;
    let size = (bytes.len() - mdat) as u32;
    bytes[mdat..mdat + 4].copy_from_slice(&size.to_be_bytes());

    let result = Mp4Demuxer::demux(&bytes, None);
    assert!(matches!(result, Err(FrameError::InvalidContainer(_))));
}

#[test]
fn garbage_is_invalid() {
    let result = Mp4Demuxer::demux(b"this is not a media file at all", None);
    assert!(matches!(result, Err(FrameError::InvalidContainer(_))));
}

#[test]
fn oversized_box_is_invalid() {
    let mut bytes = build_mp4(&Mp4Spec::h264(4, 30));
    // Inflate the ftyp size past the end of the buffer.
    bytes[0..4].copy_from_slice(&u32::MAX.to_be_bytes());
    let result = Mp4Demuxer::track_info(&bytes);
    assert!(matches!(result, Err(FrameError::InvalidContainer(_))));
}

/// Offset of the body of the first `kind` box, just past its type field.
fn box_body(bytes: &[u8], kind: &[u8; 4]) -> usize {
    bytes
        .windows(4)
        .position(|w| w == kind)
        .expect("box present")
        + 4
}

#[test]
fn sample_count_beyond_file_size_is_invalid() {
    let mut bytes = build_mp4(&Mp4Spec::h264(4, 30));
    // stsz: version/flags, uniform size, sample count.
    let stsz = box_body(&bytes, b"stsz");
    bytes[stsz + 4..stsz + 8].copy_from_slice(&1u32.to_be_bytes());
    bytes[stsz + 8..stsz + 12].copy_from_slice(&u32::MAX.to_be_bytes());

    let result = Mp4Demuxer::demux(&bytes, None);
    assert!(matches!(result, Err(FrameError::InvalidContainer(_))));

    let limited = Mp4Demuxer::demux(&bytes, Some(2));
    assert!(matches!(limited, Err(FrameError::InvalidContainer(_))));
}

#[test]
fn samples_past_the_last_chunk_are_invalid() {
    let mut bytes = build_mp4(&Mp4Spec::h264(100, 30));
    // stsc: version/flags, entry count, then (first_chunk, samples_per_chunk, ...).
    // 25 chunks at one sample each cannot hold 100 samples.
    let stsc = box_body(&bytes, b"stsc");
    bytes[stsc + 12..stsc + 16].copy_from_slice(&1u32.to_be_bytes());

    let result = Mp4Demuxer::demux(&bytes, None);
    assert!(matches!(result, Err(FrameError::InvalidContainer(_))));

    let (_, leading) = Mp4Demuxer::demux(&bytes, Some(25)).expect("Failed to demux");
    assert_eq!(leading.len(), 25);
}
