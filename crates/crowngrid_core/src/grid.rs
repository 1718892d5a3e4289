//! Altitude grid arithmetic.
//!
//! # Responsibility
//! - Hold the configured set of canonical altitude levels.
//! - Answer the nearest-level, neighbor-pair and bracketing questions the
//!   pipeline stages ask.
//!
//! # Invariants
//! - A constructed grid is non-empty, finite, strictly ascending.
//! - Distance ties always resolve toward the smaller altitude.

use std::error::Error;
use std::fmt;

/// Validated, ascending set of canonical altitude levels in metres.
#[derive(Debug, Clone, PartialEq)]
pub struct AltitudeGrid {
    levels: Vec<f64>,
}

/// Rejected altitude grid input.
#[derive(Debug, Clone, PartialEq)]
pub enum GridError {
    Empty,
    NonFinite(f64),
    Duplicate(f64),
}

impl fmt::Display for GridError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GridError::Empty => write!(f, "altitude grid must contain at least one level"),
            GridError::NonFinite(v) => write!(f, "altitude grid level must be finite, got {v}"),
            GridError::Duplicate(v) => write!(f, "altitude grid level {v} appears twice"),
        }
    }
}

impl Error for GridError {}

impl AltitudeGrid {
    /// Builds a grid from configured levels in any order.
    pub fn new(levels: Vec<f64>) -> Result<Self, GridError> {
        if levels.is_empty() {
            return Err(GridError::Empty);
        }
        for level in &levels {
            if !level.is_finite() {
                return Err(GridError::NonFinite(*level));
            }
        }

        let mut sorted = levels;
        sorted.sort_by(f64::total_cmp);
        for pair in sorted.windows(2) {
            if pair[0] == pair[1] {
                return Err(GridError::Duplicate(pair[0]));
            }
        }

        Ok(Self { levels: sorted })
    }

    /// Levels in ascending order.
    pub fn levels(&self) -> &[f64] {
        &self.levels
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// The grid level closest to `altitude`; the smaller level on a tie.
    pub fn nearest(&self, altitude: f64) -> f64 {
        // Constructor guarantees at least one level.
        nearest_of(&self.levels, altitude).unwrap_or(self.levels[0])
    }

    pub fn contains(&self, level: f64) -> bool {
        self.levels.iter().any(|&l| l == level)
    }

    /// Adjacent level pairs `(lower, upper)` in ascending order.
    pub fn neighbor_pairs(&self) -> Vec<(f64, f64)> {
        self.levels.windows(2).map(|w| (w[0], w[1])).collect()
    }
}

/// The value in `levels` closest to `target`; the smaller value on a tie.
/// Works on any finite, duplicate-free slice, sorted or not.
pub fn nearest_of(levels: &[f64], target: f64) -> Option<f64> {
    let mut best: Option<(f64, f64)> = None;
    for &level in levels {
        let distance = (target - level).abs();
        let replace = match best {
            None => true,
            Some((best_level, best_distance)) => {
                distance < best_distance || (distance == best_distance && level < best_level)
            }
        };
        if replace {
            best = Some((level, distance));
        }
    }
    best.map(|(level, _)| level)
}

/// The closest values strictly below and strictly above `target`, when both
/// exist.
pub fn bracketing_of(levels: &[f64], target: f64) -> Option<(f64, f64)> {
    let mut below: Option<f64> = None;
    let mut above: Option<f64> = None;
    for &level in levels {
        if level < target && below.map_or(true, |b| level > b) {
            below = Some(level);
        }
        if level > target && above.map_or(true, |a| level < a) {
            above = Some(level);
        }
    }
    match (below, above) {
        (Some(low), Some(high)) => Some((low, high)),
        _ => None,
    }
}

/// Renders an altitude for filenames and manifests: whole metres without a
/// decimal point (`15`), fractional metres as-is (`12.5`).
pub fn level_tag(level: f64) -> String {
    format!("{level}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_sorts_and_keeps_levels() {
        let grid = AltitudeGrid::new(vec![15.0, 5.0, 10.0]).unwrap();
        assert_eq!(grid.levels(), &[5.0, 10.0, 15.0]);
        assert_eq!(grid.len(), 3);
    }

    #[test]
    fn empty_grid_is_rejected() {
        assert_eq!(AltitudeGrid::new(vec![]), Err(GridError::Empty));
    }

    #[test]
    fn non_finite_level_is_rejected() {
        assert!(matches!(
            AltitudeGrid::new(vec![5.0, f64::NAN]),
            Err(GridError::NonFinite(_))
        ));
    }

    #[test]
    fn duplicate_level_is_rejected() {
        assert_eq!(
            AltitudeGrid::new(vec![5.0, 10.0, 5.0]),
            Err(GridError::Duplicate(5.0))
        );
    }

    #[test]
    fn nearest_picks_closest_level() {
        let grid = AltitudeGrid::new(vec![5.0, 10.0, 15.0]).unwrap();
        assert_eq!(grid.nearest(11.2), 10.0);
        assert_eq!(grid.nearest(13.8), 15.0);
        assert_eq!(grid.nearest(-3.0), 5.0);
        assert_eq!(grid.nearest(40.0), 15.0);
    }

    #[test]
    fn nearest_tie_resolves_to_smaller_level() {
        let grid = AltitudeGrid::new(vec![5.0, 10.0]).unwrap();
        assert_eq!(grid.nearest(7.5), 5.0);
    }

    #[test]
    fn neighbor_pairs_are_adjacent_and_ascending() {
        let grid = AltitudeGrid::new(vec![15.0, 5.0, 10.0]).unwrap();
        assert_eq!(grid.neighbor_pairs(), vec![(5.0, 10.0), (10.0, 15.0)]);
    }

    #[test]
    fn single_level_grid_has_no_pairs() {
        let grid = AltitudeGrid::new(vec![10.0]).unwrap();
        assert!(grid.neighbor_pairs().is_empty());
    }

    #[test]
    fn bracketing_requires_both_sides() {
        let levels = [0.0, 5.0, 15.0];
        assert_eq!(bracketing_of(&levels, 10.0), Some((5.0, 15.0)));
        assert_eq!(bracketing_of(&levels, 20.0), None);
        assert_eq!(bracketing_of(&levels, -2.0), None);
        assert_eq!(bracketing_of(&levels, 5.0), Some((0.0, 15.0)));
    }

    #[test]
    fn nearest_of_tie_prefers_smaller_even_unsorted() {
        assert_eq!(nearest_of(&[15.0, 5.0], 10.0), Some(5.0));
        assert_eq!(nearest_of(&[], 10.0), None);
    }

    #[test]
    fn level_tags_drop_trailing_zeroes() {
        assert_eq!(level_tag(15.0), "15");
        assert_eq!(level_tag(12.5), "12.5");
        assert_eq!(level_tag(0.0), "0");
    }
}
