//! Axis ticks and tick labels, placed by plotters' numeric key-point locator.

use plotters::coord::ranged1d::{BoldPoints, Ranged};
use plotters::coord::types::RangedCoordf64;
use plotters::data::float::pretty_print_float;

const MAX_BINS: usize = 9;

/// Major and minor tick positions of one axis, with the major labels.
#[derive(Debug, Clone, PartialEq)]
pub struct AxisTicks {
    pub major: Vec<f64>,
    pub minor: Vec<f64>,
    pub labels: Vec<String>,
    pub step: f64,
}

/// Number of major intervals that fit an axis `length_pt` long when labels
/// are `label_pt` tall and need `spacing` label heights each.
pub fn bins_for_axis(length_pt: f32, label_pt: f32, spacing: f32) -> usize {
    if !(label_pt > 0.0) {
        return MAX_BINS;
    }
    let bins = (length_pt / (label_pt * spacing)).floor();
    (bins.max(1.0) as usize).min(MAX_BINS)
}

/// Ticks for `[lo, hi]` with at most `max_bins` major intervals.
///
/// Minor ticks split each major interval in 5 (steps 1 and 5) or 4 (step 2)
/// and skip positions already taken by a major tick.
pub fn axis_ticks(lo: f64, hi: f64, max_bins: usize, with_minor: bool) -> AxisTicks {
    let coord: RangedCoordf64 = (lo..hi).into();
    let major = coord.key_points(BoldPoints(max_bins.max(1) + 1));
    let step = match major.as_slice() {
        [a, b, ..] => b - a,
        _ => hi - lo,
    };

    let minor = if with_minor && step > 0.0 {
        let mantissa = step / 10f64.powf(step.log10().floor());
        let ndivs = if (mantissa - 2.0).abs() < 1e-6 { 4.0 } else { 5.0 };
        let budget = ((hi - lo) * ndivs / step).floor() as usize + 1;
        coord
            .key_points(BoldPoints(budget))
            .into_iter()
            .filter(|v| major.iter().all(|m| (v - m).abs() > step * 1e-6))
            .collect()
    } else {
        Vec::new()
    };

    let labels = major.iter().map(|v| tick_label(*v, step)).collect();
    AxisTicks { major, minor, labels, step }
}

/// Tick label text with a typographic minus sign.
fn tick_label(value: f64, step: f64) -> String {
    let value = if value.abs() < step.abs() * 1e-9 { 0.0 } else { value };
    let text = pretty_print_float(value, false);
    match text.strip_prefix('-') {
        Some(rest) => format!("\u{2212}{}", rest),
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: &[f64], b: &[f64]) -> bool {
        a.len() == b.len() && a.iter().zip(b).all(|(x, y)| (x - y).abs() < 1e-9)
    }

    #[test]
    fn symmetric_limits_get_round_ticks() {
        let ticks = axis_ticks(-25.0, 25.0, 8, false);
        assert!((ticks.step - 10.0).abs() < 1e-9);
        assert!(close(&ticks.major, &[-20.0, -10.0, 0.0, 10.0, 20.0]));
        assert!(ticks.minor.is_empty());
    }

    #[test]
    fn fewer_bins_give_coarser_steps() {
        let coarse = axis_ticks(0.0, 100.0, 2, false);
        let fine = axis_ticks(0.0, 100.0, 9, false);
        assert!(coarse.step > fine.step);
        assert!(coarse.major.len() <= 3);
    }

    #[test]
    fn minor_ticks_subdivide_majors() {
        let ticks = axis_ticks(-25.0, 25.0, 8, true);
        // fifths of 10
        assert!(close(&ticks.minor[..3], &[-24.0, -22.0, -18.0]));
        assert!(ticks.minor.iter().all(|v| ticks.major.iter().all(|m| (v - m).abs() > 1e-9)));
    }

    #[test]
    fn labels_use_typographic_minus() {
        let ticks = axis_ticks(-25.0, 25.0, 8, false);
        assert_eq!(ticks.labels.len(), ticks.major.len());
        assert!(ticks.labels[0].starts_with('\u{2212}'));
        assert!(ticks.labels[0].contains("20"));
        assert!(ticks.labels.iter().all(|l| !l.contains('-')));
        assert_eq!(ticks.labels[2], "0");
    }

    #[test]
    fn axis_bins_are_clamped() {
        assert_eq!(bins_for_axis(336.0, 13.2, 3.0), 8);
        assert_eq!(bins_for_axis(10.0, 13.2, 3.0), 1);
        assert_eq!(bins_for_axis(10_000.0, 13.2, 3.0), 9);
    }
}
