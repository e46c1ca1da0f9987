//! Threshold classification of pulse values

use crate::data::Status;

/// Default lower bound of the normal band (inclusive)
pub const LOW_THRESHOLD: i64 = 60;
/// Default upper bound of the normal band (inclusive)
pub const HIGH_THRESHOLD: i64 = 100;

/// Band limits shared by every classification site.
///
/// The gateway and the aggregator must be built from the same value, otherwise
/// immediate and windowed alerts disagree on the same data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    pub low: i64,
    pub high: i64,
}

impl Thresholds {
    pub fn new(low: i64, high: i64) -> Result<Self, ThresholdError> {
        if low > high {
            return Err(ThresholdError::Inverted { low, high });
        }
        Ok(Self { low, high })
    }

    /// `value < low` is Low, `value > high` is High, anything else Normal
    pub fn classify(&self, value: i64) -> Status {
        if value < self.low {
            Status::Low
        } else if value > self.high {
            Status::High
        } else {
            Status::Normal
        }
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            low: LOW_THRESHOLD,
            high: HIGH_THRESHOLD,
        }
    }
}

/// Classify against the default thresholds
pub fn classify(value: i64) -> Status {
    Thresholds::default().classify(value)
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ThresholdError {
    #[error("low threshold {low} is above high threshold {high}")]
    Inverted { low: i64, high: i64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boundaries() {
        assert_eq!(classify(59), Status::Low);
        assert_eq!(classify(60), Status::Normal);
        assert_eq!(classify(100), Status::Normal);
        assert_eq!(classify(101), Status::High);
    }

    #[test]
    fn test_extremes() {
        assert_eq!(classify(i64::MIN), Status::Low);
        assert_eq!(classify(0), Status::Low);
        assert_eq!(classify(i64::MAX), Status::High);
    }

    #[test]
    fn test_custom_thresholds() {
        let t = Thresholds::new(50, 120).unwrap();
        assert_eq!(t.classify(49), Status::Low);
        assert_eq!(t.classify(50), Status::Normal);
        assert_eq!(t.classify(101), Status::Normal);
        assert_eq!(t.classify(121), Status::High);
    }

    #[test]
    fn test_single_point_band() {
        let t = Thresholds::new(70, 70).unwrap();
        assert_eq!(t.classify(69), Status::Low);
        assert_eq!(t.classify(70), Status::Normal);
        assert_eq!(t.classify(71), Status::High);
    }

    #[test]
    fn test_inverted_thresholds_rejected() {
        assert_eq!(
            Thresholds::new(100, 60),
            Err(ThresholdError::Inverted { low: 100, high: 60 })
        );
    }
}
