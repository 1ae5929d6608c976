use ab_glyph::{Font, FontRef, PxScale, ScaleFont};
use anyhow::Result;
use image::{imageops, Rgba, RgbaImage};
use imageproc::drawing::{draw_text_mut, text_size};
use nbody_common::VisError;

static FONT_DATA: &[u8] = include_bytes!("../assets/DejaVuSans.ttf");

/// Width and vertical metrics of a single line of text, in pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextExtent {
    pub width: f32,
    pub ascent: f32,
    pub descent: f32,
}

impl TextExtent {
    pub fn height(&self) -> f32 {
        self.ascent - self.descent
    }
}

/// Draws single-line text with the bundled DejaVu Sans face.
pub struct TextPainter {
    font: FontRef<'static>,
}

impl TextPainter {
    pub fn new() -> Result<Self> {
        let font = FontRef::try_from_slice(FONT_DATA)
            .map_err(|e| VisError::resource(format!("bundled font failed to load: {}", e)))?;
        Ok(TextPainter { font })
    }

    /// Glyph scale for a font size given in pixels per em.
    pub fn scale(&self, px_per_em: f32) -> PxScale {
        let units_per_em = self.font.units_per_em().unwrap_or(1.0);
        PxScale::from(px_per_em * self.font.height_unscaled() / units_per_em)
    }

    pub fn measure(&self, text: &str, scale: PxScale) -> TextExtent {
        let scaled = self.font.as_scaled(scale);
        let (width, _) = text_size(scale, &self.font, text);
        TextExtent {
            width: width as f32,
            ascent: scaled.ascent(),
            descent: scaled.descent(),
        }
    }

    /// Draws `text` with its line box's top-left corner at (`x`, `y`).
    pub fn draw(&self, canvas: &mut RgbaImage, text: &str, x: f32, y: f32, scale: PxScale, color: Rgba<u8>) {
        draw_text_mut(canvas, color, x.round() as i32, y.round() as i32, scale, &self.font, text);
    }

    /// Draws `text` rotated 90 degrees counter-clockwise (reading bottom to
    /// top) with the rotated box's top-left corner at (`x`, `y`).
    pub fn draw_vertical(&self, canvas: &mut RgbaImage, text: &str, x: f32, y: f32, scale: PxScale, color: Rgba<u8>) {
        let extent = self.measure(text, scale);
        let w = extent.width.ceil().max(1.0) as u32 + 2;
        let h = extent.height().ceil().max(1.0) as u32 + 2;
        // Transparent tile in the text color so the coverage ends up in alpha only.
        let mut tile = RgbaImage::from_pixel(w, h, Rgba([color[0], color[1], color[2], 0]));
        draw_text_mut(&mut tile, color, 1, 1, scale, &self.font, text);
        let rotated = imageops::rotate270(&tile);
        imageops::overlay(canvas, &rotated, x.round() as i64 - 1, y.round() as i64 - 1);
    }
}
