//! XP-to-level curve.
//!
//! The curve is configuration, not logic: the aggregate maintainer only looks
//! levels up in whatever versioned step table it is given.

use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, Result};

/// XP step of the default curve (level `n` starts at `step * n * (n - 1) / 2`).
pub const DEFAULT_CURVE_STEP_XP: i64 = 100;

/// Highest level of the default curve.
pub const DEFAULT_CURVE_MAX_LEVEL: u32 = 50;

/// A versioned, monotonic XP-to-level step table.
///
/// `thresholds[i]` is the minimum XP for level `i + 1`. The first threshold is
/// always zero, so every total (including negative ones) maps to level 1 or
/// above.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelCurve {
    /// Curve version, stored on every aggregate computed with it.
    pub version: u32,

    /// Minimum XP per level, strictly increasing, starting at 0.
    pub thresholds: Vec<i64>,
}

impl LevelCurve {
    /// Build a curve from explicit thresholds.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::Configuration` if the table is empty, does not start
    /// at zero, or is not strictly increasing.
    pub fn new(version: u32, thresholds: Vec<i64>) -> Result<Self> {
        let curve = Self {
            version,
            thresholds,
        };
        curve.validate()?;
        Ok(curve)
    }

    /// Check the step table invariants.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::Configuration` describing the first violation.
    pub fn validate(&self) -> Result<()> {
        match self.thresholds.first() {
            None => {
                return Err(LedgerError::Configuration(
                    "level curve needs at least one threshold".into(),
                ))
            }
            Some(first) if *first != 0 => {
                return Err(LedgerError::Configuration(
                    "level curve must start at 0 XP".into(),
                ))
            }
            Some(_) => {}
        }

        if self.thresholds.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(LedgerError::Configuration(
                "level curve thresholds must be strictly increasing".into(),
            ));
        }

        Ok(())
    }

    /// The level reached with `total_xp`.
    #[must_use]
    pub fn level_for(&self, total_xp: i64) -> u32 {
        let reached = self.thresholds.partition_point(|threshold| *threshold <= total_xp);
        u32::try_from(reached.max(1)).unwrap_or(u32::MAX)
    }

    /// XP still needed to reach the next level, or `None` at the top of the curve.
    #[must_use]
    pub fn xp_to_next_level(&self, total_xp: i64) -> Option<i64> {
        self.thresholds
            .iter()
            .find(|threshold| **threshold > total_xp)
            .map(|threshold| threshold.saturating_sub(total_xp))
    }

    /// The highest level on the curve.
    #[must_use]
    pub fn max_level(&self) -> u32 {
        u32::try_from(self.thresholds.len()).unwrap_or(u32::MAX)
    }
}

impl Default for LevelCurve {
    fn default() -> Self {
        let thresholds = (1..=i64::from(DEFAULT_CURVE_MAX_LEVEL))
            .map(|level| DEFAULT_CURVE_STEP_XP * level * (level - 1) / 2)
            .collect();

        Self {
            version: 1,
            thresholds,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_curve_is_valid() {
        let curve = LevelCurve::default();
        curve.validate().unwrap();
        assert_eq!(curve.version, 1);
        assert_eq!(curve.max_level(), DEFAULT_CURVE_MAX_LEVEL);
        assert_eq!(&curve.thresholds[..4], &[0, 100, 300, 600]);
    }

    #[test]
    fn level_lookup() {
        let curve = LevelCurve::default();
        assert_eq!(curve.level_for(-40), 1);
        assert_eq!(curve.level_for(0), 1);
        assert_eq!(curve.level_for(99), 1);
        assert_eq!(curve.level_for(100), 2);
        assert_eq!(curve.level_for(299), 2);
        assert_eq!(curve.level_for(300), 3);
        assert_eq!(curve.level_for(i64::MAX), DEFAULT_CURVE_MAX_LEVEL);
    }

    #[test]
    fn xp_to_next_level() {
        let curve = LevelCurve::new(2, vec![0, 50, 150]).unwrap();
        assert_eq!(curve.xp_to_next_level(20), Some(30));
        assert_eq!(curve.xp_to_next_level(150), None);
        assert_eq!(curve.xp_to_next_level(i64::MIN), Some(i64::MAX));
    }

    #[test]
    fn rejects_invalid_tables() {
        assert!(LevelCurve::new(1, vec![]).is_err());
        assert!(LevelCurve::new(1, vec![10, 20]).is_err());
        assert!(LevelCurve::new(1, vec![0, 20, 20]).is_err());
    }
}
