use crate::error::VisError;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Layout and style of a multi-panel figure.
///
/// Sizes are in pixels (`fig_size` is the canvas height, `ratio` the
/// width/height ratio); stroke and font sizes are derived from the physical
/// canvas size at `dpi`.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct FigureConfig {
    pub rows: usize,
    pub cols: usize,
    pub fig_size: u32,
    pub ratio: f32,
    pub dpi: f32,
    pub width_ratios: Option<Vec<f32>>,
    pub height_ratios: Option<Vec<f32>>,
    /// Vertical gap between rows, as a fraction of the average row height.
    pub hspace: Option<f32>,
    /// Horizontal gap between columns, as a fraction of the average column width.
    pub wspace: Option<f32>,
    /// Tick label size per unit of the figure scale factor.
    pub tick_scale: f32,
    /// Stroke width per unit of the figure scale factor.
    pub stroke_scale: f32,
    /// Tick-to-label distance per unit of the figure scale factor.
    pub pad: f32,
    pub minor_ticks: bool,
    pub grid: bool,
    pub ax_color: String,
    pub facecolor: String,
    pub text_color: String,
}

impl Default for FigureConfig {
    fn default() -> Self {
        FigureConfig {
            rows: 1,
            cols: 2,
            fig_size: 720,
            ratio: 1.0,
            dpi: 300.0,
            width_ratios: None,
            height_ratios: None,
            hspace: None,
            wspace: None,
            tick_scale: 2.0,
            stroke_scale: 0.2,
            pad: 0.21,
            minor_ticks: true,
            grid: false,
            ax_color: "k".to_string(),
            facecolor: "w".to_string(),
            text_color: "k".to_string(),
        }
    }
}

impl FigureConfig {
    pub fn validate(&self) -> Result<()> {
        if self.rows == 0 || self.cols == 0 {
            return Err(VisError::config(format!(
                "subplot grid must be at least 1x1, got {}x{}",
                self.rows, self.cols
            ))
            .into());
        }
        if self.fig_size == 0 {
            return Err(VisError::config("fig_size must be positive").into());
        }
        if !(self.ratio > 0.0) || !(self.dpi > 0.0) {
            return Err(VisError::config(format!(
                "ratio and dpi must be positive, got ratio={} dpi={}",
                self.ratio, self.dpi
            ))
            .into());
        }
        check_ratios("width_ratios", self.width_ratios.as_deref(), self.cols)?;
        check_ratios("height_ratios", self.height_ratios.as_deref(), self.rows)?;
        for (name, value) in [("hspace", self.hspace), ("wspace", self.wspace)] {
            if let Some(v) = value {
                if !(v >= 0.0) {
                    return Err(VisError::config(format!("{} must be non-negative, got {}", name, v)).into());
                }
            }
        }
        Ok(())
    }
}

fn check_ratios(name: &str, ratios: Option<&[f32]>, expected: usize) -> Result<()> {
    let Some(ratios) = ratios else {
        return Ok(());
    };
    if ratios.len() != expected {
        return Err(VisError::config(format!(
            "{} has {} entries but the grid has {}",
            name,
            ratios.len(),
            expected
        ))
        .into());
    }
    if ratios.iter().any(|r| !(*r > 0.0)) {
        return Err(VisError::config(format!("{} entries must be positive", name)).into());
    }
    Ok(())
}

/// Axis limits in kpc, applied to both projection panels.
///
/// In TOML either `lim = 25.0` (symmetric, both axes) or
/// `lim = { x = [-30.0, 30.0], y = [-10.0, 10.0] }`.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq)]
#[serde(untagged)]
pub enum AxisLimits {
    Symmetric(f32),
    Bounds { x: [f32; 2], y: [f32; 2] },
}

impl Default for AxisLimits {
    fn default() -> Self {
        AxisLimits::Symmetric(25.0)
    }
}

impl AxisLimits {
    pub fn x(&self) -> (f32, f32) {
        match *self {
            AxisLimits::Symmetric(lim) => (-lim, lim),
            AxisLimits::Bounds { x, .. } => (x[0], x[1]),
        }
    }

    pub fn y(&self) -> (f32, f32) {
        match *self {
            AxisLimits::Symmetric(lim) => (-lim, lim),
            AxisLimits::Bounds { y, .. } => (y[0], y[1]),
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (axis, (lo, hi)) in [("x", self.x()), ("y", self.y())] {
            if !lo.is_finite() || !hi.is_finite() || lo >= hi {
                return Err(VisError::config(format!(
                    "{} limits must be finite and increasing, got [{}, {}]",
                    axis, lo, hi
                ))
                .into());
            }
        }
        Ok(())
    }
}

/// Settings for the frame renderer (`[frames]` table).
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct FramesConfig {
    /// Snapshot store to render.
    #[serde(default)]
    pub input: Option<PathBuf>,
    /// Frame directory; recreated on every run. Defaults to `frames/` next to the store.
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    #[serde(default)]
    pub lim: AxisLimits,
    #[serde(default = "default_marker_color")]
    pub marker_color: String,
    /// Marker area per unit of the figure scale factor. Defaults to `100 / N`.
    #[serde(default)]
    pub marker_size: Option<f32>,
    #[serde(default = "default_facecolor")]
    pub facecolor: String,
    #[serde(default = "default_ax_color")]
    pub ax_color: String,
    #[serde(default)]
    pub max_frames: Option<usize>,
    #[serde(default = "default_frame_fig_size")]
    pub fig_size: u32,
    #[serde(default = "default_frame_ratio")]
    pub ratio: f32,
    #[serde(default = "default_dpi")]
    pub dpi: f32,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

fn default_marker_color() -> String {
    "k".to_string()
}

fn default_facecolor() -> String {
    "w".to_string()
}

fn default_ax_color() -> String {
    "k".to_string()
}

fn default_frame_fig_size() -> u32 {
    1400
}

fn default_frame_ratio() -> f32 {
    2.0
}

fn default_dpi() -> f32 {
    300.0
}

fn default_jpeg_quality() -> u8 {
    95
}

impl Default for FramesConfig {
    fn default() -> Self {
        FramesConfig {
            input: None,
            output_dir: None,
            lim: AxisLimits::default(),
            marker_color: default_marker_color(),
            marker_size: None,
            facecolor: default_facecolor(),
            ax_color: default_ax_color(),
            max_frames: None,
            fig_size: default_frame_fig_size(),
            ratio: default_frame_ratio(),
            dpi: default_dpi(),
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

impl FramesConfig {
    /// Directory the frames are written to for the store at `input`.
    pub fn frames_dir(&self, input: &Path) -> PathBuf {
        match &self.output_dir {
            Some(dir) => dir.clone(),
            None => input
                .parent()
                .map(|p| p.join("frames"))
                .unwrap_or_else(|| PathBuf::from("frames")),
        }
    }

    /// The 1x2 figure used for the XY / XZ projections.
    pub fn figure_config(&self) -> FigureConfig {
        FigureConfig {
            rows: 1,
            cols: 2,
            fig_size: self.fig_size,
            ratio: self.ratio,
            dpi: self.dpi,
            ax_color: self.ax_color.clone(),
            facecolor: self.facecolor.clone(),
            ..FigureConfig::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.lim.validate()?;
        if let Some(size) = self.marker_size {
            if !(size > 0.0) {
                return Err(VisError::config(format!("marker_size must be positive, got {}", size)).into());
            }
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(VisError::config(format!(
                "jpeg_quality must be in 1..=100, got {}",
                self.jpeg_quality
            ))
            .into());
        }
        self.figure_config().validate()
    }
}

/// Settings for the video assembler (`[video]` table).
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct VideoConfig {
    /// Frame directory to read. Defaults to the frame renderer's output directory.
    #[serde(default)]
    pub frames_dir: Option<PathBuf>,
    #[serde(default = "default_video_output")]
    pub output: PathBuf,
    #[serde(default = "default_fps")]
    pub fps: u32,
    /// Explicit `[width, height]`; every frame is resized to it.
    #[serde(default)]
    pub resolution: Option<[u32; 2]>,
    #[serde(default = "default_bitrate")]
    pub bitrate_bps: u32,
}

fn default_video_output() -> PathBuf {
    PathBuf::from("simulation.mp4")
}

fn default_fps() -> u32 {
    30
}

fn default_bitrate() -> u32 {
    5_000_000 // 5 Mbps
}

impl Default for VideoConfig {
    fn default() -> Self {
        VideoConfig {
            frames_dir: None,
            output: default_video_output(),
            fps: default_fps(),
            resolution: None,
            bitrate_bps: default_bitrate(),
        }
    }
}

impl VideoConfig {
    pub fn validate(&self) -> Result<()> {
        if self.fps == 0 {
            return Err(VisError::config("fps must be positive").into());
        }
        if self.bitrate_bps == 0 {
            return Err(VisError::config("bitrate_bps must be positive").into());
        }
        if let Some([w, h]) = self.resolution {
            if w == 0 || h == 0 {
                return Err(VisError::config(format!("resolution must be positive, got {}x{}", w, h)).into());
            }
        }
        Ok(())
    }
}

/// Top-level configuration file.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct RenderConfig {
    #[serde(default)]
    pub frames: FramesConfig,
    #[serde(default)]
    pub video: VideoConfig,
}

impl RenderConfig {
    /// Loads and validates a TOML configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();

        let config_str = std::fs::read_to_string(path_ref)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path_ref.display(), e))?;
        let config = Self::from_toml(&config_str)
            .map_err(|e| e.context(format!("Invalid config file '{}'", path_ref.display())))?;
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: RenderConfig =
            toml::from_str(text).map_err(|e| VisError::config(format!("TOML parse error: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.frames.validate()?;
        self.video.validate()
    }
}
