use serde::{Deserialize, Serialize};

use crate::error::{GovernorError, GovernorResult};

/// Submission priority on a 0..=10 scale (higher values = more urgent)
///
/// Ordering inside a queue: `heap.push(item)` with items compared by
/// `(priority, Reverse(sequence))`, so higher priority runs first and
/// equal priorities run in submission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Priority(u8);

impl Priority {
    pub const MIN: Priority = Priority(0);
    pub const LOW: Priority = Priority(1);
    pub const NORMAL: Priority = Priority(5);
    pub const HIGH: Priority = Priority(8);
    pub const CRITICAL: Priority = Priority(10);
    pub const MAX: Priority = Priority::CRITICAL;

    /// Create a priority, rejecting values outside 0..=10
    pub fn new(value: i64) -> GovernorResult<Self> {
        if (0..=Self::MAX.0 as i64).contains(&value) {
            Ok(Self(value as u8))
        } else {
            Err(GovernorError::InvalidPriority(value))
        }
    }

    /// Create a priority, clamping into 0..=10
    pub fn clamped(value: i64) -> Self {
        Self(value.clamp(0, Self::MAX.0 as i64) as u8)
    }

    /// Get the numeric value
    pub fn as_u8(self) -> u8 {
        self.0
    }

    /// Get human-readable band name
    pub fn name(self) -> &'static str {
        match self.0 {
            0..=2 => "low",
            3..=6 => "normal",
            7..=9 => "high",
            _ => "critical",
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::NORMAL
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.name(), self.0)
    }
}

impl TryFrom<u8> for Priority {
    type Error = GovernorError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value as i64)
    }
}

impl From<Priority> for u8 {
    fn from(priority: Priority) -> Self {
        priority.0
    }
}

impl std::str::FromStr for Priority {
    type Err = GovernorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Self::LOW),
            "normal" => Ok(Self::NORMAL),
            "high" => Ok(Self::HIGH),
            "critical" => Ok(Self::CRITICAL),
            other => other
                .parse::<i64>()
                .map_err(|_| GovernorError::Config(format!("Invalid priority: {}", s)))
                .and_then(Self::new),
        }
    }
}
