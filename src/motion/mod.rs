// src/motion/mod.rs - Axis identity, travel bounds and per-slice planning
pub mod bounds;
pub mod planner;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use bounds::{AxisMotionState, BoundSpec, Direction};
pub use planner::{AxisMove, FeedRate, MotionPlanner, SlicePlan};

/// One independently driven linear axis, named by its G-code letter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AxisId(char);

impl AxisId {
    pub const X: AxisId = AxisId('X');
    pub const Y: AxisId = AxisId('Y');
    pub const Z: AxisId = AxisId('Z');

    /// Accepts a single ASCII letter in either case; stored upper-case.
    pub fn new(letter: char) -> Option<Self> {
        if letter.is_ascii_alphabetic() {
            Some(AxisId(letter.to_ascii_uppercase()))
        } else {
            None
        }
    }

    pub fn letter(&self) -> char {
        self.0
    }
}

impl fmt::Display for AxisId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for AxisId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let mut chars = value.trim().chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => AxisId::new(c).ok_or_else(|| format!("invalid axis name '{}'", value)),
            _ => Err(format!("axis name must be a single letter, got '{}'", value)),
        }
    }
}

impl From<AxisId> for String {
    fn from(axis: AxisId) -> Self {
        axis.0.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_axis_id_parsing() {
        assert_eq!(AxisId::try_from("x".to_string()).unwrap(), AxisId::X);
        assert_eq!(AxisId::try_from(" Y ".to_string()).unwrap(), AxisId::Y);
        assert!(AxisId::try_from("XY".to_string()).is_err());
        assert!(AxisId::try_from("1".to_string()).is_err());
        assert!(AxisId::try_from(String::new()).is_err());
    }

    #[test]
    fn test_axis_ordering_follows_letters() {
        let mut axes = vec![AxisId::Z, AxisId::X, AxisId::Y];
        axes.sort();
        assert_eq!(axes, vec![AxisId::X, AxisId::Y, AxisId::Z]);
    }
}
