//! Multi-panel plotting surface with uniform axis styling.
//!
//! A [`Figure`] owns a grid of panels laid out like a gridspec
//! (margins, inter-panel spacing, per-row/column size ratios). Every stroke
//! and font size is expressed in points and scaled by the figure scale factor
//! `fs`, the geometric mean of the canvas width and height in inches, so a
//! figure looks the same at any resolution. Panels hold limits, labels and a
//! list of artists (scatter layers and text); the figure rasterizes all of it
//! on demand in [`Figure::render`] / [`Figure::save`].

use crate::color::{blend, parse_color};
use crate::text::TextPainter;
use crate::ticks::{axis_ticks, bins_for_axis, AxisTicks};
use ab_glyph::PxScale;
use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{imageops, DynamicImage, Rgb, RgbImage, Rgba, RgbaImage};
use imageproc::drawing::draw_filled_rect_mut;
use imageproc::rect::Rect;
use log::debug;
use nbody_common::{FigureConfig, VisError};
use plotters::coord::Shift;
use plotters::prelude::{
    BitMapBackend, ChartBuilder, Circle, Color, DrawingArea, DrawingAreaErrorKind, DrawingBackend,
    IntoDrawingArea, PathElement, Pixel, RGBColor,
};
use std::fs::File;
use std::io::BufWriter;
use std::ops::Range;
use std::path::{Path, PathBuf};

const POINTS_PER_INCH: f32 = 72.0;
const AXIS_LABEL_PT: f32 = 10.0;
const AXIS_LABEL_PAD_PT: f32 = 4.0;
const GRID_ALPHA: f32 = 0.25;
const DEFAULT_JPEG_QUALITY: u8 = 95;

/// Subplot margins and spacing, as fractions of the figure.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SubplotParams {
    pub left: f32,
    pub right: f32,
    pub bottom: f32,
    pub top: f32,
    /// Horizontal gap as a fraction of the average column width.
    pub wspace: f32,
    /// Vertical gap as a fraction of the average row height.
    pub hspace: f32,
}

impl Default for SubplotParams {
    fn default() -> Self {
        SubplotParams {
            left: 0.125,
            right: 0.9,
            bottom: 0.11,
            top: 0.88,
            wspace: 0.2,
            hspace: 0.2,
        }
    }
}

impl SubplotParams {
    /// Panels fill the whole canvas with no gaps.
    pub fn edge_to_edge() -> Self {
        SubplotParams {
            left: 0.0,
            right: 1.0,
            bottom: 0.0,
            top: 1.0,
            wspace: 0.0,
            hspace: 0.0,
        }
    }
}

/// Which region of the canvas a save writes out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BBox {
    /// The nominal canvas.
    Full,
    /// The union of everything drawn (tick labels and axis labels may lie
    /// outside the nominal canvas), plus padding.
    Tight,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SaveOptions {
    pub bbox: BBox,
    /// Padding around a tight bounding box; `None` means 0.1 in.
    pub pad_inches: Option<f32>,
    pub jpeg_quality: u8,
}

impl Default for SaveOptions {
    fn default() -> Self {
        SaveOptions {
            bbox: BBox::Tight,
            pad_inches: None,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

/// Handle to a panel of a [`Figure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PanelId(usize);

impl PanelId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Handle to a drawn element, used to remove it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArtistId(u64);

/// Panel handles as returned by [`Figure::axes`].
#[derive(Debug, Clone, PartialEq)]
pub enum Axes {
    /// A 1x1 grid yields its panel directly.
    Single(PanelId),
    /// Row-major list.
    Flat(Vec<PanelId>),
    /// `grid[row][col]`.
    Grid(Vec<Vec<PanelId>>),
}

impl Axes {
    /// All handles in row-major order.
    pub fn flat(&self) -> Vec<PanelId> {
        match self {
            Axes::Single(id) => vec![*id],
            Axes::Flat(ids) => ids.clone(),
            Axes::Grid(rows) => rows.iter().flatten().copied().collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScatterStyle {
    pub color: Rgba<u8>,
    /// Marker area in points squared.
    pub size: f32,
    /// Marker edge width in points; 0 draws filled discs only.
    pub edge_width: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HAlign {
    Left,
    Center,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VAlign {
    Top,
    Center,
    Bottom,
}

/// Text placed in panel coordinates: (0, 0) is the bottom-left corner of the
/// panel, (1, 1) the top-right.
#[derive(Debug, Clone, PartialEq)]
pub struct TextLabel {
    pub text: String,
    pub position: (f32, f32),
    pub h_align: HAlign,
    pub v_align: VAlign,
    /// Font size in points.
    pub size: f32,
    pub color: Rgba<u8>,
}

#[derive(Debug, Clone, PartialEq)]
enum Artist {
    Scatter { points: Vec<(f32, f32)>, style: ScatterStyle },
    Text(TextLabel),
}

/// One set of axes in the figure grid.
#[derive(Debug, Clone)]
pub struct Panel {
    row: usize,
    col: usize,
    xlim: (f32, f32),
    ylim: (f32, f32),
    xlabel: Option<String>,
    ylabel: Option<String>,
    show_xticklabels: bool,
    show_yticklabels: bool,
    equal_aspect: bool,
    artists: Vec<(ArtistId, Artist)>,
}

impl Panel {
    fn new(row: usize, col: usize) -> Self {
        Panel {
            row,
            col,
            xlim: (0.0, 1.0),
            ylim: (0.0, 1.0),
            xlabel: None,
            ylabel: None,
            show_xticklabels: true,
            show_yticklabels: true,
            equal_aspect: false,
            artists: Vec::new(),
        }
    }

    pub fn position(&self) -> (usize, usize) {
        (self.row, self.col)
    }

    pub fn set_xlim(&mut self, lo: f32, hi: f32) {
        self.xlim = (lo, hi);
    }

    pub fn set_ylim(&mut self, lo: f32, hi: f32) {
        self.ylim = (lo, hi);
    }

    pub fn xlim(&self) -> (f32, f32) {
        self.xlim
    }

    pub fn ylim(&self) -> (f32, f32) {
        self.ylim
    }

    /// An empty label removes it.
    pub fn set_xlabel(&mut self, label: &str) {
        self.xlabel = (!label.is_empty()).then(|| label.to_string());
    }

    pub fn set_ylabel(&mut self, label: &str) {
        self.ylabel = (!label.is_empty()).then(|| label.to_string());
    }

    pub fn xlabel(&self) -> Option<&str> {
        self.xlabel.as_deref()
    }

    pub fn ylabel(&self) -> Option<&str> {
        self.ylabel.as_deref()
    }

    pub fn set_xticklabels_visible(&mut self, visible: bool) {
        self.show_xticklabels = visible;
    }

    pub fn set_yticklabels_visible(&mut self, visible: bool) {
        self.show_yticklabels = visible;
    }

    pub fn xticklabels_visible(&self) -> bool {
        self.show_xticklabels
    }

    pub fn yticklabels_visible(&self) -> bool {
        self.show_yticklabels
    }

    /// One data unit spans the same number of pixels on both axes; the data
    /// limits are widened about their centre to fit the panel shape.
    pub fn set_equal_aspect(&mut self, equal: bool) {
        self.equal_aspect = equal;
    }

    pub fn artist_count(&self) -> usize {
        self.artists.len()
    }

    /// Limits actually used for a panel of `width` x `height` pixels.
    fn effective_limits(&self, width: f32, height: f32) -> ((f32, f32), (f32, f32)) {
        if !self.equal_aspect || width <= 0.0 || height <= 0.0 {
            return (self.xlim, self.ylim);
        }
        let (dx, dy) = (self.xlim.1 - self.xlim.0, self.ylim.1 - self.ylim.0);
        let x_per_px = dx / width;
        let y_per_px = dy / height;
        if x_per_px > y_per_px {
            let half = x_per_px * height / 2.0;
            let mid = (self.ylim.0 + self.ylim.1) / 2.0;
            (self.xlim, (mid - half, mid + half))
        } else {
            let half = y_per_px * width / 2.0;
            let mid = (self.xlim.0 + self.xlim.1) / 2.0;
            ((mid - half, mid + half), self.ylim)
        }
    }
}

/// Stroke, tick and font sizes in pixels, derived from the figure scale.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Strokes {
    spine: f32,
    major_len: f32,
    major_width: f32,
    minor_len: f32,
    minor_width: f32,
    grid_width: f32,
    tick_label_pt: f32,
    tick_label_px: f32,
    tick_pad: f32,
    axis_label_px: f32,
    axis_label_pad: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct RectF {
    x0: f32,
    y0: f32,
    x1: f32,
    y1: f32,
}

impl RectF {
    fn width(&self) -> f32 {
        self.x1 - self.x0
    }

    fn height(&self) -> f32 {
        self.y1 - self.y0
    }

    fn union(&self, other: &RectF) -> RectF {
        RectF {
            x0: self.x0.min(other.x0),
            y0: self.y0.min(other.y0),
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
        }
    }

    fn grow(&self, by: f32) -> RectF {
        RectF { x0: self.x0 - by, y0: self.y0 - by, x1: self.x1 + by, y1: self.y1 + by }
    }
}

struct PlacedText {
    text: String,
    rect: RectF,
    scale: PxScale,
    color: Rgba<u8>,
    vertical: bool,
}

/// Pixel geometry of one panel for one render.
struct PanelLayout {
    rect: RectF,
    xlim: (f32, f32),
    ylim: (f32, f32),
    x_ticks: AxisTicks,
    y_ticks: AxisTicks,
    texts: Vec<PlacedText>,
}

impl PanelLayout {
    fn to_px(&self, x: f32, y: f32) -> (f32, f32) {
        let px = self.rect.x0 + (x - self.xlim.0) / (self.xlim.1 - self.xlim.0) * self.rect.width();
        let py = self.rect.y1 - (y - self.ylim.0) / (self.ylim.1 - self.ylim.0) * self.rect.height();
        (px, py)
    }

    /// Panel rectangle snapped to whole pixels on the nominal canvas.
    fn pixel_range(&self) -> (Range<i32>, Range<i32>) {
        let snap = |v: f32| v.round() as i32;
        (snap(self.rect.x0)..snap(self.rect.x1), snap(self.rect.y0)..snap(self.rect.y1))
    }
}

/// Resolved colors.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Palette {
    ax: Rgba<u8>,
    face: Rgba<u8>,
    text: Rgba<u8>,
}

/// A grid of styled panels on a fixed-size canvas.
pub struct Figure {
    config: FigureConfig,
    colors: Palette,
    width_px: u32,
    height_px: u32,
    fs: f32,
    params: SubplotParams,
    panels: Vec<Panel>,
    next_artist: u64,
    painter: TextPainter,
    last_saved: Option<PathBuf>,
}

impl Figure {
    /// Builds the canvas and its panels.
    ///
    /// Fails with [`VisError::InvalidConfig`] for an empty grid, ratio lists
    /// whose length does not match the grid, non-positive sizes or unknown
    /// colors.
    pub fn new(config: FigureConfig) -> Result<Self> {
        config.validate()?;
        let colors = Palette {
            ax: parse_color(&config.ax_color)?,
            face: parse_color(&config.facecolor)?,
            text: parse_color(&config.text_color)?,
        };

        let width_px = (config.fig_size as f32 * config.ratio).round().max(1.0) as u32;
        let height_px = config.fig_size;
        let width_in = width_px as f32 / config.dpi;
        let height_in = height_px as f32 / config.dpi;
        let fs = (width_in * height_in).sqrt();

        let defaults = SubplotParams::default();
        let params = SubplotParams {
            hspace: config.hspace.unwrap_or(defaults.hspace),
            wspace: config.wspace.unwrap_or(defaults.wspace),
            ..defaults
        };

        let mut panels = Vec::with_capacity(config.rows * config.cols);
        for row in 0..config.rows {
            for col in 0..config.cols {
                let mut panel = Panel::new(row, col);
                // Rows share the x axis look when they touch.
                if config.hspace == Some(0.0) && row != config.rows - 1 {
                    panel.show_xticklabels = false;
                }
                panels.push(panel);
            }
        }

        debug!(
            "Figure {}x{} px at {} dpi (fs = {:.3}), {}x{} panels",
            width_px, height_px, config.dpi, fs, config.rows, config.cols
        );

        Ok(Figure {
            config,
            colors,
            width_px,
            height_px,
            fs,
            params,
            panels,
            next_artist: 0,
            painter: TextPainter::new()?,
            last_saved: None,
        })
    }

    /// Figure scale factor: geometric mean of the canvas size in inches.
    pub fn fs(&self) -> f32 {
        self.fs
    }

    /// Nominal canvas size in pixels.
    pub fn size(&self) -> (u32, u32) {
        (self.width_px, self.height_px)
    }

    pub fn grid_shape(&self) -> (usize, usize) {
        (self.config.rows, self.config.cols)
    }

    /// Panel handles: the panel itself for a 1x1 grid, otherwise a
    /// row-major list (`flat`) or a grid of rows.
    pub fn axes(&self, flat: bool) -> Axes {
        let (rows, cols) = self.grid_shape();
        if rows == 1 && cols == 1 {
            return Axes::Single(PanelId(0));
        }
        if flat {
            Axes::Flat((0..rows * cols).map(PanelId).collect())
        } else {
            Axes::Grid(
                (0..rows)
                    .map(|r| (0..cols).map(|c| PanelId(r * cols + c)).collect())
                    .collect(),
            )
        }
    }

    pub fn panel(&self, id: PanelId) -> &Panel {
        &self.panels[id.0]
    }

    pub fn panel_mut(&mut self, id: PanelId) -> &mut Panel {
        &mut self.panels[id.0]
    }

    pub fn subplots_adjust(&mut self, params: SubplotParams) {
        self.params = params;
    }

    fn push_artist(&mut self, panel: PanelId, artist: Artist) -> ArtistId {
        let id = ArtistId(self.next_artist);
        self.next_artist += 1;
        self.panels[panel.0].artists.push((id, artist));
        id
    }

    /// Adds a scatter layer of `(x, y)` data points to `panel`.
    pub fn scatter(&mut self, panel: PanelId, points: Vec<(f32, f32)>, style: ScatterStyle) -> ArtistId {
        self.push_artist(panel, Artist::Scatter { points, style })
    }

    pub fn text(&mut self, panel: PanelId, label: TextLabel) -> ArtistId {
        self.push_artist(panel, Artist::Text(label))
    }

    /// Removes a previously added artist. Returns false if it was already gone.
    pub fn remove(&mut self, id: ArtistId) -> bool {
        for panel in &mut self.panels {
            if let Some(pos) = panel.artists.iter().position(|(a, _)| *a == id) {
                panel.artists.remove(pos);
                return true;
            }
        }
        false
    }

    /// Drops every artist; limits, labels and styling stay.
    pub fn clear_artists(&mut self) {
        for panel in &mut self.panels {
            panel.artists.clear();
        }
    }

    /// Path of the most recent successful save.
    pub fn last_saved_path(&self) -> Option<&Path> {
        self.last_saved.as_deref()
    }

    fn px_per_pt(&self) -> f32 {
        self.config.dpi / POINTS_PER_INCH
    }

    fn strokes(&self) -> Strokes {
        let ppt = self.px_per_pt();
        let fs = self.fs;
        let sw = self.config.stroke_scale;
        let tick_label_pt = self.config.tick_scale * fs;
        Strokes {
            spine: fs * sw * ppt,
            major_len: fs * sw * 5.0 * ppt,
            major_width: fs * sw * 0.9 * ppt,
            minor_len: fs * sw * 2.5 * ppt,
            minor_width: fs * sw * 0.8 * ppt,
            grid_width: fs * sw * 0.5 * ppt,
            tick_label_pt,
            tick_label_px: tick_label_pt * ppt,
            tick_pad: self.config.pad * fs * ppt,
            axis_label_px: AXIS_LABEL_PT * ppt,
            axis_label_pad: AXIS_LABEL_PAD_PT * ppt,
        }
    }

    /// Panel rectangles in canvas pixels (y down), row-major.
    fn panel_rects(&self) -> Vec<RectF> {
        let (rows, cols) = self.grid_shape();
        let p = self.params;
        let (w, h) = (self.width_px as f32, self.height_px as f32);

        let ones_w = vec![1.0; cols];
        let ones_h = vec![1.0; rows];
        let width_ratios = self.config.width_ratios.as_deref().unwrap_or(&ones_w);
        let height_ratios = self.config.height_ratios.as_deref().unwrap_or(&ones_h);

        let spans = |start: f32, total: f32, n: usize, space: f32, ratios: &[f32]| -> Vec<(f32, f32)> {
            let cell = total / (n as f32 + space * (n as f32 - 1.0));
            let sep = space * cell;
            let norm = cell * n as f32 / ratios.iter().sum::<f32>();
            let mut pos = start;
            let mut out = Vec::with_capacity(n);
            for (i, r) in ratios.iter().enumerate() {
                if i > 0 {
                    pos += sep;
                }
                let size = r * norm;
                out.push((pos, pos + size));
                pos += size;
            }
            out
        };

        // Columns run left to right, rows top to bottom.
        let xs = spans(p.left, p.right - p.left, cols, p.wspace, width_ratios);
        let ys = spans(1.0 - p.top, p.top - p.bottom, rows, p.hspace, height_ratios);

        let mut rects = Vec::with_capacity(rows * cols);
        for (y0, y1) in &ys {
            for (x0, x1) in &xs {
                rects.push(RectF { x0: x0 * w, y0: y0 * h, x1: x1 * w, y1: y1 * h });
            }
        }
        rects
    }

    fn place(&self, text: &str, px_per_em: f32, color: Rgba<u8>, anchor: (f32, f32), h: HAlign, v: VAlign) -> PlacedText {
        let scale = self.painter.scale(px_per_em);
        let extent = self.painter.measure(text, scale);
        let x0 = match h {
            HAlign::Left => anchor.0,
            HAlign::Center => anchor.0 - extent.width / 2.0,
            HAlign::Right => anchor.0 - extent.width,
        };
        let y0 = match v {
            VAlign::Top => anchor.1,
            VAlign::Center => anchor.1 - extent.height() / 2.0,
            VAlign::Bottom => anchor.1 - extent.height(),
        };
        PlacedText {
            text: text.to_string(),
            rect: RectF { x0, y0, x1: x0 + extent.width, y1: y0 + extent.height() },
            scale,
            color,
            vertical: false,
        }
    }

    fn layout(&self) -> Vec<PanelLayout> {
        let s = self.strokes();
        let ppt = self.px_per_pt();
        let out = s.major_len / 2.0;

        self.panels
            .iter()
            .zip(self.panel_rects())
            .map(|(panel, rect)| {
                let (xlim, ylim) = panel.effective_limits(rect.width(), rect.height());
                let x_bins = bins_for_axis(rect.width() / ppt, s.tick_label_pt, 3.0);
                let y_bins = bins_for_axis(rect.height() / ppt, s.tick_label_pt, 2.0);
                let minor = self.config.minor_ticks;
                let x_ticks = axis_ticks(xlim.0 as f64, xlim.1 as f64, x_bins, minor);
                let y_ticks = axis_ticks(ylim.0 as f64, ylim.1 as f64, y_bins, minor);
                let mut texts = Vec::new();

                let to_px = |x: f32, y: f32| {
                    (
                        rect.x0 + (x - xlim.0) / (xlim.1 - xlim.0) * rect.width(),
                        rect.y1 - (y - ylim.0) / (ylim.1 - ylim.0) * rect.height(),
                    )
                };

                // Tick labels sit outside the bottom and left spines.
                let mut label_bottom = rect.y1 + out;
                if panel.show_xticklabels {
                    for (v, label) in x_ticks.major.iter().zip(&x_ticks.labels) {
                        let (px, _) = to_px(*v as f32, ylim.0);
                        let placed = self.place(
                            label,
                            s.tick_label_px,
                            self.colors.ax,
                            (px, rect.y1 + out + s.tick_pad),
                            HAlign::Center,
                            VAlign::Top,
                        );
                        label_bottom = label_bottom.max(placed.rect.y1);
                        texts.push(placed);
                    }
                }
                let mut label_left = rect.x0 - out;
                if panel.show_yticklabels {
                    for (v, label) in y_ticks.major.iter().zip(&y_ticks.labels) {
                        let (_, py) = to_px(xlim.0, *v as f32);
                        let placed = self.place(
                            label,
                            s.tick_label_px,
                            self.colors.ax,
                            (rect.x0 - out - s.tick_pad, py),
                            HAlign::Right,
                            VAlign::Center,
                        );
                        label_left = label_left.min(placed.rect.x0);
                        texts.push(placed);
                    }
                }

                if let Some(xlabel) = &panel.xlabel {
                    let placed = self.place(
                        xlabel,
                        s.axis_label_px,
                        self.colors.text,
                        ((rect.x0 + rect.x1) / 2.0, label_bottom + s.axis_label_pad),
                        HAlign::Center,
                        VAlign::Top,
                    );
                    texts.push(placed);
                }
                if let Some(ylabel) = &panel.ylabel {
                    let scale = self.painter.scale(s.axis_label_px);
                    let extent = self.painter.measure(ylabel, scale);
                    // Rotated: the box is as wide as the text is tall.
                    let x1 = label_left - s.axis_label_pad;
                    let x0 = x1 - extent.height();
                    let cy = (rect.y0 + rect.y1) / 2.0;
                    texts.push(PlacedText {
                        text: ylabel.clone(),
                        rect: RectF { x0, y0: cy - extent.width / 2.0, x1, y1: cy + extent.width / 2.0 },
                        scale,
                        color: self.colors.text,
                        vertical: true,
                    });
                }

                for (_, artist) in &panel.artists {
                    if let Artist::Text(label) = artist {
                        let anchor = (
                            rect.x0 + label.position.0 * rect.width(),
                            rect.y1 - label.position.1 * rect.height(),
                        );
                        texts.push(self.place(
                            &label.text,
                            label.size * ppt,
                            label.color,
                            anchor,
                            label.h_align,
                            label.v_align,
                        ));
                    }
                }
                PanelLayout { rect, xlim, ylim, x_ticks, y_ticks, texts }
            })
            .collect()
    }

    /// Rasterizes the figure.
    pub fn render(&self, options: &SaveOptions) -> Result<RgbaImage> {
        let s = self.strokes();
        let layouts = self.layout();
        let nominal = RectF { x0: 0.0, y0: 0.0, x1: self.width_px as f32, y1: self.height_px as f32 };

        let (bbox, pad) = match options.bbox {
            BBox::Full => (nominal, 0.0),
            BBox::Tight => {
                let mut bbox = layouts
                    .first()
                    .map(|l| l.rect.grow(s.major_len / 2.0))
                    .unwrap_or(nominal);
                for layout in &layouts {
                    bbox = bbox.union(&layout.rect.grow(s.major_len / 2.0));
                    for t in &layout.texts {
                        bbox = bbox.union(&t.rect);
                    }
                }
                (bbox, options.pad_inches.unwrap_or(0.1) * self.config.dpi)
            }
        };

        let (mut width, mut height) = (
            (bbox.width() + 2.0 * pad).ceil().max(1.0) as u32,
            (bbox.height() + 2.0 * pad).ceil().max(1.0) as u32,
        );
        if options.bbox == BBox::Tight {
            // Even sizes encode directly as 4:2:0 video.
            width += width % 2;
            height += height % 2;
        }
        let offset = (pad - bbox.x0, pad - bbox.y0);
        debug!("Rendering {}x{} canvas (offset {:.1}, {:.1})", width, height, offset.0, offset.1);

        let mut canvas = RgbaImage::from_pixel(width, height, self.colors.face);

        let layer = self.draw_panel_layer(&layouts, &s)?;
        for layout in &layouts {
            let (xr, yr) = layout.pixel_range();
            if xr.is_empty() || yr.is_empty() {
                continue;
            }
            let tile = imageops::crop_imm(
                &layer,
                xr.start.max(0) as u32,
                yr.start.max(0) as u32,
                xr.len() as u32,
                yr.len() as u32,
            )
            .to_image();
            imageops::overlay(
                &mut canvas,
                &tile,
                (xr.start as f32 + offset.0).round() as i64,
                (yr.start as f32 + offset.1).round() as i64,
            );
        }
        for layout in &layouts {
            self.draw_frame_lines(&mut canvas, layout, &s, offset);
            for t in &layout.texts {
                let (x, y) = (t.rect.x0 + offset.0, t.rect.y0 + offset.1);
                if t.vertical {
                    self.painter.draw_vertical(&mut canvas, &t.text, x, y, t.scale, t.color);
                } else {
                    self.painter.draw(&mut canvas, &t.text, x, y, t.scale, t.color);
                }
            }
        }
        Ok(canvas)
    }

    /// Grid and scatter layers of every panel, drawn by plotters on a
    /// nominal-size buffer split into one drawing area per panel.
    fn draw_panel_layer(&self, layouts: &[PanelLayout], s: &Strokes) -> Result<RgbaImage> {
        let (w, h) = (self.width_px, self.height_px);
        let [r, g, b, _] = self.colors.face.0;
        let mut layer = RgbImage::from_pixel(w, h, Rgb([r, g, b]));
        {
            let root = BitMapBackend::with_buffer(&mut layer, (w, h)).into_drawing_area();
            let mut xs: Vec<i32> = Vec::new();
            let mut ys: Vec<i32> = Vec::new();
            for layout in layouts {
                let (xr, yr) = layout.pixel_range();
                xs.extend([xr.start, xr.end]);
                ys.extend([yr.start, yr.end]);
            }
            for breaks in [&mut xs, &mut ys] {
                breaks.sort_unstable();
                breaks.dedup();
            }
            let areas = root.split_by_breakpoints(&xs, &ys);

            for (panel, layout) in self.panels.iter().zip(layouts) {
                let range = layout.pixel_range();
                let Some(area) = areas.iter().find(|a| a.get_pixel_range() == range) else {
                    continue;
                };
                self.draw_panel_area(area, panel, layout, s)
                    .map_err(|e| VisError::resource(format!("failed to draw panel: {:?}", e)))?;
            }
            root.present()
                .map_err(|e| VisError::resource(format!("failed to draw panels: {:?}", e)))?;
        }
        Ok(DynamicImage::ImageRgb8(layer).to_rgba8())
    }

    fn draw_panel_area<DB: DrawingBackend>(
        &self,
        area: &DrawingArea<DB, Shift>,
        panel: &Panel,
        layout: &PanelLayout,
        s: &Strokes,
    ) -> Result<(), DrawingAreaErrorKind<DB::ErrorType>> {
        let (xlim, ylim) = (layout.xlim, layout.ylim);
        let mut chart = ChartBuilder::on(area).build_cartesian_2d(xlim.0..xlim.1, ylim.0..ylim.1)?;

        if self.config.grid {
            let color = to_rgb(blend(self.colors.ax, self.colors.face, GRID_ALPHA));
            let style = color.stroke_width(s.grid_width.round().max(1.0) as u32);
            let vertical = layout.x_ticks.major.iter().map(|v| vec![(*v as f32, ylim.0), (*v as f32, ylim.1)]);
            let horizontal = layout.y_ticks.major.iter().map(|v| vec![(xlim.0, *v as f32), (xlim.1, *v as f32)]);
            let lines = vertical.chain(horizontal);
            chart.draw_series(lines.map(|line| PathElement::<(f32, f32)>::new(line, style)))?;
        }

        let ppt = self.px_per_pt();
        for (_, artist) in &panel.artists {
            let Artist::Scatter { points, style } = artist else {
                continue;
            };
            let color = to_rgb(style.color);
            let radius = style.size.max(0.0).sqrt() / 2.0 * ppt;
            let edge = style.edge_width * ppt;
            let visible = points
                .iter()
                .copied()
                .filter(|&(x, y)| x >= xlim.0 && x <= xlim.1 && y >= ylim.0 && y <= ylim.1);

            if radius < 0.5 {
                chart.draw_series(visible.clone().map(|p| Pixel::<(f32, f32)>::new(p, color)))?;
            } else {
                let r = radius.round() as u32;
                chart.draw_series(visible.clone().map(|p| Circle::new(p, r, color.filled())))?;
            }
            if edge >= 0.5 {
                let ring = color.stroke_width(edge.round() as u32);
                let r = (radius + edge / 2.0).round() as u32;
                chart.draw_series(visible.map(|p| Circle::new(p, r, ring)))?;
            }
        }
        Ok(())
    }

    /// Spines and in-out tick marks on all four sides.
    fn draw_frame_lines(&self, canvas: &mut RgbaImage, layout: &PanelLayout, s: &Strokes, offset: (f32, f32)) {
        let r = RectF {
            x0: layout.rect.x0 + offset.0,
            y0: layout.rect.y0 + offset.1,
            x1: layout.rect.x1 + offset.0,
            y1: layout.rect.y1 + offset.1,
        };
        let color = self.colors.ax;
        let half = s.spine / 2.0;

        fill_rect(canvas, RectF { x0: r.x0 - half, y0: r.y0 - half, x1: r.x1 + half, y1: r.y0 + half }, color);
        fill_rect(canvas, RectF { x0: r.x0 - half, y0: r.y1 - half, x1: r.x1 + half, y1: r.y1 + half }, color);
        fill_rect(canvas, RectF { x0: r.x0 - half, y0: r.y0 - half, x1: r.x0 + half, y1: r.y1 + half }, color);
        fill_rect(canvas, RectF { x0: r.x1 - half, y0: r.y0 - half, x1: r.x1 + half, y1: r.y1 + half }, color);

        let ticks = [
            (&layout.x_ticks.major, &layout.y_ticks.major, s.major_len, s.major_width),
            (&layout.x_ticks.minor, &layout.y_ticks.minor, s.minor_len, s.minor_width),
        ];
        for (xs, ys, len, width) in ticks {
            for v in xs.iter() {
                let x = layout.to_px(*v as f32, layout.ylim.0).0 + offset.0;
                for edge in [r.y0, r.y1] {
                    fill_rect(
                        canvas,
                        RectF { x0: x - width / 2.0, y0: edge - len / 2.0, x1: x + width / 2.0, y1: edge + len / 2.0 },
                        color,
                    );
                }
            }
            for v in ys.iter() {
                let y = layout.to_px(layout.xlim.0, *v as f32).1 + offset.1;
                for edge in [r.x0, r.x1] {
                    fill_rect(
                        canvas,
                        RectF { x0: edge - len / 2.0, y0: y - width / 2.0, x1: edge + len / 2.0, y1: y + width / 2.0 },
                        color,
                    );
                }
            }
        }
    }

    /// Saves with a tight bounding box and default padding.
    pub fn save<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.save_with(path, &SaveOptions::default())
    }

    /// Renders and writes the figure; the format follows the file extension.
    pub fn save_with<P: AsRef<Path>>(&mut self, path: P, options: &SaveOptions) -> Result<()> {
        let path = path.as_ref();
        let canvas = self.render(options)?;
        let rgb = DynamicImage::ImageRgba8(canvas).to_rgb8();

        let is_jpeg = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("jpg") || e.eq_ignore_ascii_case("jpeg"))
            .unwrap_or(false);
        if is_jpeg {
            let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
            let mut writer = BufWriter::new(file);
            JpegEncoder::new_with_quality(&mut writer, options.jpeg_quality)
                .encode_image(&rgb)
                .with_context(|| format!("Failed to encode {}", path.display()))?;
        } else {
            rgb.save(path).with_context(|| format!("Failed to write {}", path.display()))?;
        }

        self.last_saved = Some(path.to_path_buf());
        Ok(())
    }
}

fn to_rgb(color: Rgba<u8>) -> RGBColor {
    RGBColor(color[0], color[1], color[2])
}

fn fill_rect(canvas: &mut RgbaImage, r: RectF, color: Rgba<u8>) {
    let x0 = r.x0.round();
    let y0 = r.y0.round();
    let w = (r.x1.round() - x0).max(1.0);
    let h = (r.y1.round() - y0).max(1.0);
    draw_filled_rect_mut(canvas, Rect::at(x0 as i32, y0 as i32).of_size(w as u32, h as u32), color);
}
