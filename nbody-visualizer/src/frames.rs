use crate::color::parse_color;
use crate::figure::{Figure, HAlign, PanelId, SaveOptions, ScatterStyle, SubplotParams, TextLabel, VAlign};
use anyhow::{Context, Result};
use image::Rgba;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use nbody_common::{open_store, project_all, FramesConfig, Plane, Snapshot, SnapshotStore, VisError};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Simulation time unit in Gyr; labels are printed in Myr.
const TIME_UNIT_GYR: f64 = 0.98;

/// Caption drawn in the corner of the XY panel.
pub fn time_label(time: f64) -> String {
    format!("Time: {:.2} Myr", 1000.0 * TIME_UNIT_GYR * time)
}

/// Marker area used when none is configured; keeps total ink roughly
/// independent of the particle count.
pub fn default_marker_size(particle_count: usize) -> f32 {
    100.0 / particle_count.max(1) as f32
}

pub fn frame_file_name(index: usize) -> String {
    format!("render_{:04}.jpg", index)
}

/// Frames to render for a store of `snapshot_count` snapshots.
pub fn effective_frame_count(max_frames: Option<usize>, snapshot_count: usize) -> usize {
    match max_frames {
        Some(cap) => cap.min(snapshot_count),
        None => snapshot_count,
    }
}

/// Removes `dir` with everything in it and creates it empty.
pub fn reset_frame_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        debug!("Clearing frame directory {}", dir.display());
        fs::remove_dir_all(dir)
            .map_err(|e| VisError::resource(format!("cannot clear {}: {}", dir.display(), e)))?;
    }
    fs::create_dir_all(dir).map_err(|e| VisError::resource(format!("cannot create {}: {}", dir.display(), e)))?;
    Ok(())
}

/// Outcome of a frame rendering run.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderSummary {
    pub output_dir: PathBuf,
    pub frames_written: usize,
    pub particle_count: usize,
    pub snapshot_count: usize,
    pub elapsed: Duration,
}

/// Two-panel (XY, XZ) renderer that reuses one figure for every snapshot.
pub struct FrameRenderer {
    figure: Figure,
    xy: PanelId,
    xz: PanelId,
    marker_color: Rgba<u8>,
    ax_color: Rgba<u8>,
    marker_size: Option<f32>,
    save_options: SaveOptions,
}

impl FrameRenderer {
    pub fn new(config: &FramesConfig) -> Result<Self> {
        config.validate()?;
        let mut figure = Figure::new(config.figure_config())?;
        let panels = figure.axes(true).flat();
        let (xy, xz) = (panels[0], panels[1]);

        let (x0, x1) = config.lim.x();
        let (y0, y1) = config.lim.y();
        for id in [xy, xz] {
            let panel = figure.panel_mut(id);
            panel.set_equal_aspect(true);
            panel.set_xlim(x0, x1);
            panel.set_ylim(y0, y1);
            panel.set_xlabel("kpc");
            panel.set_ylabel("kpc");
        }

        Ok(FrameRenderer {
            figure,
            xy,
            xz,
            marker_color: parse_color(&config.marker_color)?,
            ax_color: parse_color(&config.ax_color)?,
            marker_size: config.marker_size,
            save_options: SaveOptions { jpeg_quality: config.jpeg_quality, ..SaveOptions::default() },
        })
    }

    pub fn figure(&self) -> &Figure {
        &self.figure
    }

    /// Draws `snapshot`, writes it to `path` and clears the drawn data again.
    pub fn render_snapshot(&mut self, snapshot: &Snapshot, marker_size: f32, path: &Path) -> Result<()> {
        let scale = self.figure.fs();
        let style = ScatterStyle {
            color: self.marker_color,
            size: scale * marker_size,
            edge_width: 0.0,
        };

        let xy_points = self.figure.scatter(self.xy, project_all(&snapshot.positions, Plane::XY), style);
        let xz_points = self.figure.scatter(self.xz, project_all(&snapshot.positions, Plane::XZ), style);
        let caption = self.figure.text(
            self.xy,
            TextLabel {
                text: time_label(snapshot.time),
                position: (0.98, 0.02),
                h_align: HAlign::Right,
                v_align: VAlign::Bottom,
                size: scale * 1.5,
                color: self.ax_color,
            },
        );

        // The XZ panel shares the vertical scale of the XY panel.
        let xz_panel = self.figure.panel_mut(self.xz);
        xz_panel.set_yticklabels_visible(false);
        xz_panel.set_ylabel("");

        self.figure.subplots_adjust(SubplotParams::edge_to_edge());
        let saved = self.figure.save_with(path, &self.save_options);

        for id in [xy_points, xz_points, caption] {
            self.figure.remove(id);
        }
        saved
    }

    /// Renders the first `max_frames` snapshots (all if `None`) into `frames_dir`.
    pub fn render_all(
        &mut self,
        store: &mut dyn SnapshotStore,
        frames_dir: &Path,
        max_frames: Option<usize>,
    ) -> Result<RenderSummary> {
        let header = store.header();
        let count = effective_frame_count(max_frames, header.snapshot_count);
        if header.particle_count == 0 {
            warn!("Store holds no particles; frames will only show axes.");
        }
        let marker_size = self
            .marker_size
            .unwrap_or_else(|| default_marker_size(header.particle_count));
        info!(
            "Rendering {} of {} snapshots ({} particles, marker size {:.4})",
            count, header.snapshot_count, header.particle_count, marker_size
        );

        let progress_bar = ProgressBar::new(count as u64);
        progress_bar.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} frames ({percent}%) [{eta}]")?
                .progress_chars("#>-"),
        );

        let start_time = Instant::now();
        for index in 0..count {
            let snapshot = store.read(index)?;
            let path = frames_dir.join(frame_file_name(index));
            self.render_snapshot(&snapshot, marker_size, &path)
                .with_context(|| format!("Failed to render snapshot {:04}", index))?;
            progress_bar.inc(1);
        }
        let elapsed = start_time.elapsed();
        progress_bar.finish_with_message(format!("Rendered {} frames", count));

        info!("Save images time: {:.2} s", elapsed.as_secs_f64());
        Ok(RenderSummary {
            output_dir: frames_dir.to_path_buf(),
            frames_written: count,
            particle_count: header.particle_count,
            snapshot_count: header.snapshot_count,
            elapsed,
        })
    }
}

/// Renders the snapshots of the store at `input` into `frames_dir`.
///
/// The frame directory is deleted and recreated first, so it must not hold
/// anything else.
pub fn render_frames(input: &Path, frames_dir: &Path, config: &FramesConfig) -> Result<RenderSummary> {
    config.validate()?;
    // Colors and layout are resolved before anything in frames_dir is removed.
    let mut renderer = FrameRenderer::new(config)?;
    reset_frame_dir(frames_dir)?;
    info!("Opening snapshot store: {}", input.display());
    let mut store = open_store(input)?;
    renderer.render_all(store.as_mut(), frames_dir, config.max_frames)
}

/// Like [`render_frames`] for a store that is already open.
pub fn render_store(store: &mut dyn SnapshotStore, frames_dir: &Path, config: &FramesConfig) -> Result<RenderSummary> {
    config.validate()?;
    let mut renderer = FrameRenderer::new(config)?;
    reset_frame_dir(frames_dir)?;
    renderer.render_all(store, frames_dir, config.max_frames)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_label_formatting() {
        assert_eq!(time_label(0.0), "Time: 0.00 Myr");
        assert_eq!(time_label(1.5), "Time: 1470.00 Myr");
        assert_eq!(time_label(0.001), "Time: 0.98 Myr");
    }

    #[test]
    fn default_marker_size_scales_inversely() {
        assert_eq!(default_marker_size(100), 1.0);
        assert_eq!(default_marker_size(1000), 0.1);
        assert_eq!(default_marker_size(0), 100.0);
    }

    #[test]
    fn frame_names_are_zero_padded() {
        assert_eq!(frame_file_name(0), "render_0000.jpg");
        assert_eq!(frame_file_name(42), "render_0042.jpg");
        assert_eq!(frame_file_name(12345), "render_12345.jpg");
    }

    #[test]
    fn frame_count_is_capped_by_store() {
        for m in [0usize, 1, 5, 20] {
            assert_eq!(effective_frame_count(None, m), m);
            for k in [0usize, 3, 10, 100] {
                assert_eq!(effective_frame_count(Some(k), m), k.min(m));
            }
        }
    }

    #[test]
    fn renderer_sets_up_both_panels() {
        let config = FramesConfig { fig_size: 100, dpi: 100.0, lim: nbody_common::AxisLimits::Symmetric(5.0), ..FramesConfig::default() };
        let renderer = FrameRenderer::new(&config).unwrap();
        let fig = renderer.figure();
        assert_eq!(fig.size(), (200, 100));
        for id in fig.axes(true).flat() {
            let panel = fig.panel(id);
            assert_eq!(panel.xlim(), (-5.0, 5.0));
            assert_eq!(panel.ylim(), (-5.0, 5.0));
            assert_eq!(panel.xlabel(), Some("kpc"));
        }
    }
}
