// Shared fixtures for the pipeline integration tests.
#![allow(dead_code)]

use image::{Rgb, RgbImage};
use nbody_common::{write_bincode_store, FramesConfig, Snapshot, Vec3};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

static NEXT_DIR: AtomicUsize = AtomicUsize::new(0);

// Route library logs through the test harness; repeated calls are no-ops.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// Scratch directory that is removed when dropped.
pub struct TestDir {
    path: PathBuf,
}

impl TestDir {
    pub fn new(name: &str) -> Self {
        let id = NEXT_DIR.fetch_add(1, Ordering::SeqCst);
        let path = std::env::temp_dir().join(format!("nbody-it-{}-{}-{}", std::process::id(), name, id));
        let _ = fs::remove_dir_all(&path);
        fs::create_dir_all(&path).expect("create scratch dir");
        TestDir { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn join(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }
}

impl Drop for TestDir {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.path);
    }
}

// Particles on a slowly rotating ring, one snapshot per time step.
pub fn ring_snapshots(particles: usize, count: usize) -> Vec<Snapshot> {
    (0..count)
        .map(|i| {
            let phase = i as f32 * 0.1;
            let positions = (0..particles)
                .map(|p| {
                    let angle = phase + p as f32 * std::f32::consts::TAU / particles as f32;
                    Vec3::new(10.0 * angle.cos(), 10.0 * angle.sin(), 2.0 * (2.0 * angle).sin())
                })
                .collect();
            Snapshot { time: i as f64 * 0.01, positions }
        })
        .collect()
}

pub fn write_ring_store(path: &Path, particles: usize, count: usize) {
    write_bincode_store(path, &ring_snapshots(particles, count)).expect("write store");
}

// Small figure so the rendering tests stay fast.
pub fn small_frames_config() -> FramesConfig {
    FramesConfig {
        fig_size: 120,
        dpi: 100.0,
        ..FramesConfig::default()
    }
}

pub fn write_solid_frame(path: &Path, width: u32, height: u32, shade: u8) {
    RgbImage::from_pixel(width, height, Rgb([shade, shade / 2, 255 - shade]))
        .save(path)
        .expect("write frame");
}

/// Writes a frame of hashed per-pixel noise, which compresses poorly.
pub fn write_detailed_frame(path: &Path, width: u32, height: u32) {
    RgbImage::from_fn(width, height, |x, y| {
        let h = (x.wrapping_mul(73_856_093) ^ y.wrapping_mul(19_349_663)).wrapping_mul(2_654_435_761);
        Rgb([(h >> 24) as u8, (h >> 16) as u8, (h >> 8) as u8])
    })
    .save(path)
    .expect("write frame");
}

pub fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .expect("read dir")
        .map(|e| e.expect("dir entry").file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}
