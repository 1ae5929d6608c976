mod support;

use nbody_common::{MemoryStore, VideoConfig, VisError};
use nbody_visualizer::{assemble_video, render_store};
use std::fs;
use support::{init_logging, ring_snapshots, small_frames_config, write_detailed_frame, write_solid_frame, TestDir};

fn count_boxes(bytes: &[u8], tag: &[u8; 4]) -> usize {
    bytes.windows(4).filter(|w| *w == tag).count()
}

/// Per-sample byte sizes from the video track's `stsz` box.
fn sample_sizes(bytes: &[u8]) -> Vec<u32> {
    let pos = bytes.windows(4).position(|w| w == b"stsz").expect("stsz box");
    let read = |at: usize| u32::from_be_bytes(bytes[at..at + 4].try_into().unwrap());
    // version/flags, sample_size, sample_count, then one entry per sample
    let (uniform, count) = (read(pos + 8), read(pos + 12) as usize);
    if uniform != 0 {
        return vec![uniform; count];
    }
    (0..count).map(|i| read(pos + 16 + 4 * i)).collect()
}

#[test]
fn encodes_every_frame_in_the_directory() {
    init_logging();
    let dir = TestDir::new("encode");
    let frames = dir.join("frames");
    fs::create_dir_all(&frames).unwrap();
    for i in 0..4 {
        write_solid_frame(&frames.join(format!("render_{:04}.png", i)), 64, 48, i as u8 * 60);
    }

    let output = dir.join("out/movie.mp4");
    let summary = assemble_video(&frames, &output, &VideoConfig::default()).unwrap();
    assert_eq!(summary.frames, 4);
    assert_eq!((summary.width, summary.height), (64, 48));

    let bytes = fs::read(&output).unwrap();
    assert!(count_boxes(&bytes, b"ftyp") >= 1);
    assert!(count_boxes(&bytes, b"moov") >= 1);
    assert_eq!(sample_sizes(&bytes).len(), 4);
}

#[test]
fn frames_are_encoded_in_file_name_order() {
    init_logging();
    let dir = TestDir::new("order");
    let frames = dir.join("frames");
    fs::create_dir_all(&frames).unwrap();
    // written first, sorted third
    write_detailed_frame(&frames.join("render_0002.png"), 128, 96);
    for i in [3, 0, 1] {
        write_solid_frame(&frames.join(format!("render_{:04}.png", i)), 128, 96, 90);
    }

    let output = dir.join("movie.mp4");
    let config = VideoConfig { bitrate_bps: 4_000_000, ..VideoConfig::default() };
    assemble_video(&frames, &output, &config).unwrap();

    let sizes = sample_sizes(&fs::read(&output).unwrap());
    assert_eq!(sizes.len(), 4);
    let largest = (0..sizes.len()).max_by_key(|&i| sizes[i]).unwrap();
    assert_eq!(largest, 2, "sample sizes {:?}", sizes);
}

#[test]
fn explicit_resolution_resizes_frames() {
    init_logging();
    let dir = TestDir::new("resize");
    let frames = dir.join("frames");
    fs::create_dir_all(&frames).unwrap();
    write_solid_frame(&frames.join("render_0000.png"), 64, 48, 10);
    write_solid_frame(&frames.join("render_0001.png"), 33, 21, 200);

    let config = VideoConfig { resolution: Some([48, 32]), ..VideoConfig::default() };
    let summary = assemble_video(&frames, &dir.join("movie.mp4"), &config).unwrap();
    assert_eq!(summary.frames, 2);
    assert_eq!((summary.width, summary.height), (48, 32));
}

#[test]
fn mismatched_frame_sizes_fail_without_output() {
    init_logging();
    let dir = TestDir::new("mismatch");
    let frames = dir.join("frames");
    fs::create_dir_all(&frames).unwrap();
    write_solid_frame(&frames.join("render_0000.png"), 64, 48, 10);
    write_solid_frame(&frames.join("render_0001.png"), 32, 48, 10);

    let output = dir.join("movie.mp4");
    let err = assemble_video(&frames, &output, &VideoConfig::default()).unwrap_err();
    match err.downcast_ref::<VisError>() {
        Some(VisError::FrameSizeMismatch { expected, found, .. }) => {
            assert_eq!(*expected, (64, 48));
            assert_eq!(*found, (32, 48));
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(!output.exists());
}

#[test]
fn missing_frame_directory_is_empty_input() {
    init_logging();
    let dir = TestDir::new("no-frames");
    let err = assemble_video(&dir.join("nothing"), &dir.join("movie.mp4"), &VideoConfig::default()).unwrap_err();
    assert!(matches!(err.downcast_ref::<VisError>(), Some(VisError::EmptyFrameDir(_))));
}

#[test]
fn rendered_frames_assemble_into_a_video() {
    init_logging();
    let dir = TestDir::new("pipeline");
    let frames = dir.join("frames");
    let mut store = MemoryStore::new(ring_snapshots(40, 3)).unwrap();
    render_store(&mut store, &frames, &small_frames_config()).unwrap();

    let config = VideoConfig { fps: 10, ..VideoConfig::default() };
    let summary = assemble_video(&frames, &dir.join("movie.mp4"), &config).unwrap();
    assert_eq!(summary.frames, 3);
    assert_eq!(sample_sizes(&fs::read(dir.join("movie.mp4")).unwrap()).len(), 3);
}
