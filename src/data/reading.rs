use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier assigned to a raw reading by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReadingId(pub u64);

impl fmt::Display for ReadingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier assigned to an aggregate result by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AggregateId(pub u64);

impl fmt::Display for AggregateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Classification band of a pulse value, ordered Low < Normal < High
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Status {
    Low,
    Normal,
    High,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Low => "Low",
            Status::Normal => "Normal",
            Status::High => "High",
        }
    }

    /// Anything outside the normal band is worth an alert
    pub fn is_abnormal(&self) -> bool {
        !matches!(self, Status::Normal)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single raw sample as received from the sensing device.
///
/// Immutable once stored. The windowed aggregator deletes it after folding
/// it into an [`AggregateResult`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reading {
    pub id: ReadingId,
    pub value: i64,
    pub timestamp: DateTime<Utc>,
}

/// Rounded mean of one aggregation window, stamped with the window end
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateResult {
    pub id: AggregateId,
    pub value: i64,
    pub status: Status,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_ordering() {
        assert!(Status::Low < Status::Normal);
        assert!(Status::Normal < Status::High);
    }

    #[test]
    fn test_status_abnormal() {
        assert!(Status::Low.is_abnormal());
        assert!(Status::High.is_abnormal());
        assert!(!Status::Normal.is_abnormal());
    }

    #[test]
    fn test_status_serializes_as_name() {
        assert_eq!(serde_json::to_string(&Status::High).unwrap(), "\"High\"");
        assert_eq!(Status::Low.to_string(), "Low");
    }

    #[test]
    fn test_reading_id_is_transparent() {
        let json = serde_json::to_string(&ReadingId(42)).unwrap();
        assert_eq!(json, "42");
    }
}
