//! Sweep sequence construction.
//!
//! A sweep is described by two ranges: a wide *coarse* grid covering the full span and
//! a narrow *fine* grid that replaces the coarse points inside its sub-range at higher
//! resolution. [`build`] merges them into the forward pass, then appends the exact
//! reverse and a trailing `0.0` so the coil ends de-energised.
//!
//! ```
//! use mag_sweep::sequence::{build, RangeSpec};
//!
//! let seq = build(RangeSpec::new(-10.0, 10.0, 0.5), RangeSpec::new(-1.0, 1.0, 0.05));
//! assert_eq!(seq.forward().len(), 77);
//! assert_eq!(seq.len(), 155);
//! assert_eq!(seq.recorded_len(), 153);
//! ```

use serde::{Deserialize, Serialize};

/// Number of decimal places values are rounded to before deduplication.
pub const ROUND_DECIMALS: i32 = 6;

/// Upper bound on `(end - start) / step` for a single range.
pub const MAX_GRID_STEPS: f64 = 1e6;

/// One voltage range: `start..=end` in increments of `step`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RangeSpec {
    /// First grid value in volts
    pub start: f64,
    /// Last grid value in volts (inclusive, with half-step tolerance)
    pub end: f64,
    /// Grid spacing in volts, must be positive
    pub step: f64,
}

impl RangeSpec {
    /// Create a new range.
    pub fn new(start: f64, end: f64, step: f64) -> Self {
        Self { start, end, step }
    }

    /// Check the range can produce a grid.
    ///
    /// `start > end` is accepted and yields an empty grid. A range spanning more
    /// than [`MAX_GRID_STEPS`] steps is rejected.
    pub fn validate(&self, name: &str) -> Result<(), String> {
        if !(self.start.is_finite() && self.end.is_finite() && self.step.is_finite()) {
            return Err(format!("{name} range values must be finite numbers"));
        }
        if self.step <= 0.0 {
            return Err(format!(
                "{name} step must be greater than zero (got {})",
                self.step
            ));
        }
        let steps = (self.end - self.start).max(0.0) / self.step;
        if steps > MAX_GRID_STEPS {
            return Err(format!(
                "{name} step {} is too small for {} .. {} (more than {} points)",
                self.step, self.start, self.end, MAX_GRID_STEPS
            ));
        }
        Ok(())
    }

    /// True if `value` lies inside `[start, end]`.
    pub fn contains(&self, value: f64) -> bool {
        self.start <= value && value <= self.end
    }

    /// Grid values `start + k*step` up to `end + step/2`, unrounded.
    ///
    /// The element count is `ceil((end + step/2 - start) / step)`. Invalid ranges
    /// and `start > end` give an empty grid.
    pub fn grid(&self) -> Vec<f64> {
        if self.validate("grid").is_err() {
            return Vec::new();
        }
        let stop = self.end + self.step / 2.0;
        let count = ((stop - self.start) / self.step)
            .ceil()
            .min(MAX_GRID_STEPS + 1.0);
        if count <= 0.0 {
            return Vec::new();
        }
        (0..count as usize)
            .map(|k| self.start + k as f64 * self.step)
            .collect()
    }
}

/// Round to [`ROUND_DECIMALS`] places, folding `-0.0` into `0.0`.
pub fn round_volts(value: f64) -> f64 {
    let scale = 10f64.powi(ROUND_DECIMALS);
    (value * scale).round() / scale + 0.0
}

/// Ordered voltages to traverse: forward ++ reverse(forward) ++ `[0.0]`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoltageSequence {
    points: Vec<f64>,
    forward_len: usize,
}

impl VoltageSequence {
    fn from_forward(forward: Vec<f64>) -> Self {
        let forward_len = forward.len();
        let mut points = Vec::with_capacity(forward_len * 2 + 1);
        points.extend_from_slice(&forward);
        points.extend(forward.iter().rev());
        points.push(0.0);
        Self {
            points,
            forward_len,
        }
    }

    /// All points in traversal order.
    pub fn points(&self) -> &[f64] {
        &self.points
    }

    /// The ascending forward pass.
    pub fn forward(&self) -> &[f64] {
        &self.points[..self.forward_len]
    }

    /// The descending return pass (forward reversed).
    pub fn backward(&self) -> &[f64] {
        &self.points[self.forward_len..self.forward_len * 2]
    }

    /// Total points, both passes and the trailing zero.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// True if there are no points.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Samples a full traversal records: first and last points are suppressed.
    pub fn recorded_len(&self) -> usize {
        self.points.len().saturating_sub(2)
    }

    /// True if `index` is the first or last point of the traversal.
    pub fn is_boundary(&self, index: usize) -> bool {
        index == 0 || index + 1 == self.points.len()
    }

    /// Lowest and highest forward voltages, if any.
    pub fn span(&self) -> Option<(f64, f64)> {
        let forward = self.forward();
        Some((*forward.first()?, *forward.last()?))
    }

    /// One-line description for logs and the CLI.
    pub fn summary(&self) -> String {
        match self.span() {
            Some((lo, hi)) => format!(
                "{} points ({} forward, {:.6} V .. {:.6} V), {} recorded",
                self.len(),
                self.forward_len,
                lo,
                hi,
                self.recorded_len()
            ),
            None => format!("{} points (empty forward pass)", self.len()),
        }
    }
}

/// Build the traversal sequence from a coarse and a fine range.
///
/// Coarse values inside `[fine.start, fine.end]` are dropped before rounding; the
/// survivors and the fine grid are rounded, merged, deduplicated and sorted into the
/// forward pass.
pub fn build(coarse: RangeSpec, fine: RangeSpec) -> VoltageSequence {
    let mut forward: Vec<f64> = coarse
        .grid()
        .into_iter()
        .filter(|v| !fine.contains(*v))
        .chain(fine.grid())
        .map(round_volts)
        .collect();

    forward.sort_by(f64::total_cmp);
    forward.dedup();

    VoltageSequence::from_forward(forward)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_counts() {
        assert_eq!(RangeSpec::new(-10.0, 10.0, 0.5).grid().len(), 41);
        assert_eq!(RangeSpec::new(-1.0, 1.0, 0.05).grid().len(), 41);
        assert_eq!(RangeSpec::new(0.0, 0.0, 1.0).grid(), vec![0.0]);
    }

    #[test]
    fn test_grid_half_step_tolerance() {
        // 0.3 is not exactly representable; the tolerance keeps the end point.
        let grid = RangeSpec::new(0.0, 0.3, 0.1).grid();
        assert_eq!(grid.len(), 4);
        assert!((grid[3] - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_reversed_range_is_empty() {
        assert!(RangeSpec::new(1.0, -1.0, 0.1).grid().is_empty());
    }

    #[test]
    fn test_invalid_step_is_empty() {
        assert!(RangeSpec::new(0.0, 1.0, 0.0).grid().is_empty());
        assert!(RangeSpec::new(0.0, 1.0, -0.1).grid().is_empty());
        assert!(RangeSpec::new(0.0, f64::NAN, 0.1).grid().is_empty());
    }

    #[test]
    fn test_validate() {
        assert!(RangeSpec::new(0.0, 1.0, 0.1).validate("coarse").is_ok());
        assert!(RangeSpec::new(1.0, 0.0, 0.1).validate("coarse").is_ok());
        let err = RangeSpec::new(0.0, 1.0, 0.0).validate("fine").unwrap_err();
        assert!(err.contains("fine step"));
    }

    #[test]
    fn test_tiny_step_rejected_without_allocating() {
        let range = RangeSpec::new(-10.0, 10.0, 1e-300);
        let err = range.validate("coarse").unwrap_err();
        assert!(err.contains("coarse step"));
        assert!(err.contains("too small"));
        assert!(range.grid().is_empty());

        // Right at the limit is still accepted.
        let dense = RangeSpec::new(0.0, 1e6, 1.0);
        assert!(dense.validate("fine").is_ok());
        assert_eq!(dense.grid().len(), 1_000_001);
        assert!(RangeSpec::new(0.0, 1e6 + 1.0, 1.0).validate("fine").is_err());
    }

    #[test]
    fn test_round_volts() {
        assert_eq!(round_volts(0.1234564), 0.123456);
        assert_eq!(round_volts(-1e-12).to_bits(), 0.0f64.to_bits());
        assert_eq!(round_volts(-0.95 + 1e-13), -0.95);
    }

    #[test]
    fn test_reference_example() {
        let seq = build(
            RangeSpec::new(-10.0, 10.0, 0.5),
            RangeSpec::new(-1.0, 1.0, 0.05),
        );
        assert_eq!(seq.forward().len(), 77);
        assert_eq!(seq.len(), 155);
        assert_eq!(seq.recorded_len(), 153);
        assert_eq!(seq.span(), Some((-10.0, 10.0)));
        assert_eq!(*seq.points().last().unwrap(), 0.0);
    }

    #[test]
    fn test_fine_covers_coarse() {
        let seq = build(RangeSpec::new(-1.0, 1.0, 0.5), RangeSpec::new(-2.0, 2.0, 1.0));
        assert_eq!(seq.forward(), &[-2.0, -1.0, 0.0, 1.0, 2.0]);
    }

    #[test]
    fn test_empty_fine_range_keeps_coarse() {
        let seq = build(RangeSpec::new(0.0, 2.0, 1.0), RangeSpec::new(5.0, 4.0, 0.1));
        assert_eq!(seq.forward(), &[0.0, 1.0, 2.0]);
        assert_eq!(seq.points(), &[0.0, 1.0, 2.0, 2.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_both_empty() {
        let seq = build(RangeSpec::new(1.0, 0.0, 1.0), RangeSpec::new(1.0, 0.0, 1.0));
        assert_eq!(seq.points(), &[0.0]);
        assert_eq!(seq.recorded_len(), 0);
        assert!(seq.is_boundary(0));
        assert!(seq.summary().contains("empty"));
    }

    #[test]
    fn test_boundary_indices() {
        let seq = build(RangeSpec::new(0.0, 1.0, 1.0), RangeSpec::new(5.0, 4.0, 1.0));
        assert_eq!(seq.len(), 5);
        assert!(seq.is_boundary(0));
        assert!(!seq.is_boundary(1));
        assert!(!seq.is_boundary(3));
        assert!(seq.is_boundary(4));
    }
}
