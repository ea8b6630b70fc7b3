// src/motion/bounds.rs - Per-axis travel envelope and direction policy
//!
//! Every axis owns an [`AxisMotionState`] that tracks where the carriage is and
//! which way it is heading. Before a note's distance is applied, the configured
//! [`BoundSpec`] decides the direction and clips the move so the carriage never
//! leaves its legal range.
//!
//! Two policies are supported:
//!
//! - `Centered`: the axis always heads back toward `center`, and moves are
//!   clipped to `[center - max_travel, center + max_travel]`.
//! - `Absolute`: the axis keeps its direction until a move would cross `min` or
//!   `max`; the move is clipped onto the crossed bound and the direction flips.

use serde::{Deserialize, Serialize};

use super::AxisId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Reverse,
}

impl Direction {
    pub fn sign(self) -> f64 {
        match self {
            Direction::Forward => 1.0,
            Direction::Reverse => -1.0,
        }
    }

    pub fn reversed(self) -> Self {
        match self {
            Direction::Forward => Direction::Reverse,
            Direction::Reverse => Direction::Forward,
        }
    }
}

/// Legal travel range of one axis.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BoundSpec {
    Centered { center: f64, max_travel: f64 },
    Absolute { min: f64, max: f64 },
}

impl BoundSpec {
    /// Lower and upper position limits, inclusive.
    pub fn range(&self) -> (f64, f64) {
        match *self {
            BoundSpec::Centered { center, max_travel } => (center - max_travel, center + max_travel),
            BoundSpec::Absolute { min, max } => (min, max),
        }
    }

    pub fn contains(&self, position: f64) -> bool {
        let (lo, hi) = self.range();
        position >= lo && position <= hi
    }

    /// Clip a signed move so that `position + result` stays inside the range.
    pub fn clip(&self, position: f64, signed_distance: f64) -> f64 {
        let (lo, hi) = self.range();
        let target = position + signed_distance;
        if target > hi {
            hi - position
        } else if target < lo {
            lo - position
        } else {
            signed_distance
        }
    }

    /// Direction a `Centered` axis takes for the next move. `Absolute` axes keep `current`.
    pub fn choose_direction(&self, position: f64, current: Direction, magnitude: f64) -> Direction {
        match *self {
            BoundSpec::Centered { center, max_travel } => {
                if position > center {
                    Direction::Reverse
                } else if position < center {
                    Direction::Forward
                } else if position + magnitude <= center + max_travel {
                    Direction::Forward
                } else {
                    Direction::Reverse
                }
            }
            BoundSpec::Absolute { .. } => current,
        }
    }

    /// Turn an unsigned distance into a signed, in-range move.
    ///
    /// Returns the adjusted signed distance and the direction for the next call.
    pub fn adjust(&self, position: f64, direction: Direction, magnitude: f64) -> (f64, Direction) {
        let magnitude = magnitude.abs();
        match *self {
            BoundSpec::Centered { .. } => {
                let direction = self.choose_direction(position, direction, magnitude);
                (self.clip(position, direction.sign() * magnitude), direction)
            }
            BoundSpec::Absolute { min, max } => {
                let signed = direction.sign() * magnitude;
                let target = position + signed;
                if target > max || target < min {
                    let flipped = direction.reversed();
                    let clipped = self.clip(position, signed);
                    if clipped == 0.0 && magnitude > 0.0 {
                        // Parked on the bound already: reflect now instead of stalling a slice.
                        (self.clip(position, flipped.sign() * magnitude), flipped)
                    } else {
                        (clipped, flipped)
                    }
                } else {
                    (signed, direction)
                }
            }
        }
    }
}

/// Position and heading of one axis. Only the scheduling task mutates it.
#[derive(Debug, Clone, PartialEq)]
pub struct AxisMotionState {
    pub axis: AxisId,
    pub position: f64,
    pub direction: Direction,
    pub bound: BoundSpec,
}

impl AxisMotionState {
    pub fn new(axis: AxisId, position: f64, bound: BoundSpec) -> Self {
        Self {
            axis,
            position,
            direction: Direction::Forward,
            bound,
        }
    }

    /// Apply an unsigned move through the bound policy and return the signed
    /// distance actually travelled.
    pub fn advance(&mut self, magnitude: f64) -> f64 {
        let (adjusted, direction) = self.bound.adjust(self.position, self.direction, magnitude);
        let (lo, hi) = self.bound.range();
        self.position = (self.position + adjusted).clamp(lo, hi);
        self.direction = direction;
        adjusted
    }
}
