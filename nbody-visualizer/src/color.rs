use anyhow::Result;
use image::Rgba;
use log::debug;
use nbody_common::VisError;
use palette::Srgb;
use std::str::FromStr;

// Single-letter color codes (RGBA format), as used by scientific plotting tools.
const SHORT_COLORS: &[(&str, [u8; 4])] = &[
    ("k", [0, 0, 0, 255]),
    ("w", [255, 255, 255, 255]),
    ("r", [255, 0, 0, 255]),
    ("g", [0, 128, 0, 255]),
    ("b", [0, 0, 255, 255]),
    ("c", [0, 191, 191, 255]),
    ("m", [191, 0, 191, 255]),
    ("y", [191, 191, 0, 255]),
];

/// Parses a color given as a single-letter code (`"k"`), an SVG/CSS name
/// (`"black"`, `"steelblue"`) or a hex triplet (`"#1f77b4"`).
pub fn parse_color(spec: &str) -> Result<Rgba<u8>> {
    let trimmed = spec.trim();
    let lower = trimmed.to_ascii_lowercase();

    if let Some(&(_, rgba)) = SHORT_COLORS.iter().find(|(name, _)| *name == lower) {
        return Ok(Rgba(rgba));
    }
    if let Some(rgb) = palette::named::from_str(&lower) {
        return Ok(to_rgba(rgb));
    }
    if trimmed.starts_with('#') {
        if let Ok(rgb) = Srgb::<u8>::from_str(trimmed) {
            return Ok(to_rgba(rgb));
        }
    }

    Err(VisError::config(format!("color '{}' not recognized", spec)).into())
}

fn to_rgba(rgb: Srgb<u8>) -> Rgba<u8> {
    let (r, g, b) = rgb.into_components();
    debug!("Parsed color #{:02x}{:02x}{:02x}", r, g, b);
    Rgba([r, g, b, 255])
}

/// Mixes `fg` over `bg` with opacity `alpha` (0..=1); the result is opaque.
pub fn blend(fg: Rgba<u8>, bg: Rgba<u8>, alpha: f32) -> Rgba<u8> {
    let a = alpha.clamp(0.0, 1.0);
    let mix = |f: u8, b: u8| (f as f32 * a + b as f32 * (1.0 - a)).round() as u8;
    Rgba([mix(fg[0], bg[0]), mix(fg[1], bg[1]), mix(fg[2], bg[2]), 255])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_codes() {
        assert_eq!(parse_color("k").unwrap(), Rgba([0, 0, 0, 255]));
        assert_eq!(parse_color("W").unwrap(), Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn names_and_hex() {
        assert_eq!(parse_color("white").unwrap(), Rgba([255, 255, 255, 255]));
        assert_eq!(parse_color("Navy").unwrap(), Rgba([0, 0, 128, 255]));
        assert_eq!(parse_color("#1f77b4").unwrap(), Rgba([0x1f, 0x77, 0xb4, 255]));
    }

    #[test]
    fn unknown_color_is_a_configuration_error() {
        let err = parse_color("not-a-color").unwrap_err();
        assert!(matches!(err.downcast_ref::<VisError>(), Some(VisError::InvalidConfig(_))));
    }

    #[test]
    fn blend_quarter_black_on_white() {
        let c = blend(Rgba([0, 0, 0, 255]), Rgba([255, 255, 255, 255]), 0.25);
        assert_eq!(c, Rgba([191, 191, 191, 255]));
    }
}
