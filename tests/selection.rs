//! Frame selection tests.

mod common;

use framegrab::{
    FrameError, FrameSelection, approximate_even_sampling, calculate_time_points, every_nth,
    fixed_interval, target_fps,
};

use common::{image_tag, synthetic_store};

// ── every_nth ──────────────────────────────────────────────────────

#[test]
fn every_fifth_frame_of_ten_seconds_at_30fps() {
    let store = synthetic_store(300, 30.0);
    let frames = every_nth(&store, 5).expect("Failed to select");

    assert_eq!(frames.len(), 60);
    for (k, frame) in frames.iter().enumerate() {
        let expected = (5 * k) as f64 / 30.0;
        assert!((frame.time - expected).abs() < 1e-9, "frame {k} at {}", frame.time);
    }
}

#[test]
fn every_nth_count_is_ceiling() {
    let store = synthetic_store(101, 30.0);
    for n in 1..=12u64 {
        let frames = every_nth(&store, n).expect("Failed to select");
        assert_eq!(frames.len() as u64, 101u64.div_ceil(n), "n = {n}");
    }
}

#[test]
fn every_first_frame_is_the_whole_store() {
    let store = synthetic_store(40, 30.0);
    assert_eq!(every_nth(&store, 1).unwrap().len(), 40);
}

#[test]
fn every_zeroth_frame_is_invalid() {
    let store = synthetic_store(10, 30.0);
    assert!(matches!(every_nth(&store, 0), Err(FrameError::InvalidInterval)));
}

// ── fixed_interval ─────────────────────────────────────────────────

#[test]
fn fixed_interval_keeps_frames_at_least_interval_apart() {
    let store = synthetic_store(300, 30.0);
    for interval in [0.1, 0.25, 0.5, 1.3] {
        let frames = fixed_interval(&store, interval).expect("Failed to select");
        assert_eq!(frames[0].time, 0.0);
        for pair in frames.windows(2) {
            assert!(pair[1].time - pair[0].time >= interval - 1e-9);
        }
    }
}

#[test]
fn fixed_interval_keeps_earliest_qualifying_frame() {
    let store = synthetic_store(60, 30.0);
    let frames = fixed_interval(&store, 0.5).expect("Failed to select");
    let tags: Vec<u32> = frames.iter().map(|f| image_tag(&f.image)).collect();
    assert_eq!(tags, vec![0, 15, 30, 45]);
}

#[test]
fn interval_longer_than_video_keeps_first_frame() {
    let store = synthetic_store(30, 30.0);
    let frames = fixed_interval(&store, 60.0).expect("Failed to select");
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].time, 0.0);
}

#[test]
fn non_positive_interval_is_invalid() {
    let store = synthetic_store(10, 30.0);
    for interval in [0.0, -1.0, f64::NAN, f64::INFINITY] {
        assert!(
            matches!(fixed_interval(&store, interval), Err(FrameError::InvalidInterval)),
            "interval {interval}"
        );
    }
}

// ── target_fps ─────────────────────────────────────────────────────

#[test]
fn target_fps_resamples_to_duration_times_rate() {
    let store = synthetic_store(300, 30.0);
    let frames = target_fps(&store, 5.0).expect("Failed to select");

    assert_eq!(frames.len(), 50);
    let tags: Vec<u32> = frames.iter().map(|f| image_tag(&f.image)).collect();
    let expected: Vec<u32> = (0..50).map(|i| i * 6).collect();
    assert_eq!(tags, expected);
}

#[test]
fn target_fps_above_source_rate_returns_every_frame() {
    let store = synthetic_store(90, 30.0);
    assert_eq!(target_fps(&store, 60.0).unwrap().len(), 90);
}

#[test]
fn non_positive_target_fps_is_invalid() {
    let store = synthetic_store(10, 30.0);
    for fps in [0.0, -2.0, f64::NAN] {
        assert!(matches!(
            target_fps(&store, fps),
            Err(FrameError::InvalidFrameRate(_))
        ));
    }
}

// ── approximate_even_sampling ──────────────────────────────────────

#[test]
fn even_sampling_picks_at_least_ten() {
    let store = synthetic_store(120, 30.0);
    assert_eq!(approximate_even_sampling(&store).len(), 10);
}

#[test]
fn even_sampling_scales_with_length() {
    let store = synthetic_store(900, 30.0);
    let frames = approximate_even_sampling(&store);
    assert_eq!(frames.len(), 30);
    for pair in frames.windows(2) {
        assert!(pair[1].time > pair[0].time);
    }
}

#[test]
fn even_sampling_of_short_store_returns_everything() {
    let store = synthetic_store(6, 30.0);
    assert_eq!(approximate_even_sampling(&store).len(), 6);
}

// ── FrameSelection ─────────────────────────────────────────────────

#[test]
fn selection_enum_dispatches() {
    let store = synthetic_store(300, 30.0);

    assert_eq!(FrameSelection::All.apply(&store).unwrap().len(), 300);
    assert_eq!(FrameSelection::EveryNth(5).apply(&store).unwrap().len(), 60);
    assert_eq!(FrameSelection::TargetFps(5.0).apply(&store).unwrap().len(), 50);
    assert_eq!(FrameSelection::EvenSampling.apply(&store).unwrap().len(), 10);
    assert!(matches!(
        FrameSelection::IntervalSeconds(0.0).apply(&store),
        Err(FrameError::InvalidInterval)
    ));
}

// ── calculate_time_points ──────────────────────────────────────────

#[test]
fn time_points_span_the_video() {
    let points = calculate_time_points(10.0, 5);
    assert_eq!(points.len(), 5);
    assert_eq!(points[..4], [0.0, 2.5, 5.0, 7.5]);
    assert!((points[4] - 9.99).abs() < 1e-9);
}

#[test]
fn single_time_point_is_mid_video() {
    assert_eq!(calculate_time_points(8.0, 1), vec![4.0]);
}

#[test]
fn zero_time_points_is_empty() {
    assert!(calculate_time_points(8.0, 0).is_empty());
}

#[test]
fn time_points_never_go_negative() {
    let points = calculate_time_points(0.004, 2);
    assert_eq!(points, vec![0.0, 0.0]);
}
