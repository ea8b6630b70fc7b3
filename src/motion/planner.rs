// src/motion/planner.rs - Note to feed-rate math and trapezoidal move timing
use std::collections::BTreeMap;
use std::time::Duration;

use crate::gcode::MovementCommand;
use crate::motion::{AxisId, AxisMotionState};
use crate::song::NoteInterval;

/// Feed rate required by one note, after the machine ceiling was applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeedRate {
    pub mm_per_min: f64,
    pub clamped: bool,
}

/// Bounded move of one axis inside a slice.
#[derive(Debug, Clone, PartialEq)]
pub struct AxisMove {
    pub axis: AxisId,
    pub distance: f64,
    pub required_feed_rate: f64,
}

/// Everything the scheduler needs to act on one slice.
#[derive(Debug, Clone, PartialEq)]
pub struct SlicePlan {
    pub moves: Vec<AxisMove>,
    pub total_distance: f64,
    pub feed_rate: f64,
    pub movement_time: Duration,
    pub clamped_notes: usize,
}

impl SlicePlan {
    /// The coordinated move for this slice, or `None` when no axis travels.
    pub fn command(&self) -> Option<MovementCommand> {
        if self.moves.is_empty() || self.feed_rate <= 0.0 {
            return None;
        }
        let axis_deltas = self.moves.iter().map(|m| (m.axis, m.distance)).collect();
        Some(MovementCommand::new(axis_deltas, self.feed_rate))
    }
}

#[derive(Debug, Clone)]
pub struct MotionPlanner {
    mm_per_step: f64,
    max_feed_rate: f64,
    acceleration: f64,
}

impl MotionPlanner {
    /// `acceleration` is in mm/s² and should be the lowest of the axes in use.
    pub fn new(mm_per_step: f64, max_feed_rate: f64, acceleration: f64) -> Self {
        Self {
            mm_per_step,
            max_feed_rate,
            acceleration,
        }
    }

    pub fn acceleration(&self) -> f64 {
        self.acceleration
    }

    pub fn max_feed_rate(&self) -> f64 {
        self.max_feed_rate
    }

    /// mm/min a note needs so that the stepper pulses at the note's frequency.
    pub fn required_feed_rate(&self, frequency_hz: f64) -> FeedRate {
        let rate = frequency_hz * self.mm_per_step * 60.0;
        if rate > self.max_feed_rate {
            FeedRate {
                mm_per_min: self.max_feed_rate,
                clamped: true,
            }
        } else {
            FeedRate {
                mm_per_min: rate,
                clamped: false,
            }
        }
    }

    /// Distance covered in `seconds` at `feed_rate` mm/min.
    pub fn raw_distance(feed_rate: f64, seconds: f64) -> f64 {
        feed_rate * (seconds / 60.0)
    }

    pub fn total_distance(moves: &[AxisMove]) -> f64 {
        moves.iter().map(|m| m.distance * m.distance).sum::<f64>().sqrt()
    }

    /// Feed rate for the combined vector that still gives every axis at least
    /// its own required linear speed.
    pub fn combined_feed_rate(moves: &[AxisMove]) -> f64 {
        let total = Self::total_distance(moves);
        moves
            .iter()
            .filter(|m| m.distance != 0.0)
            .map(|m| m.required_feed_rate * (total / m.distance.abs()))
            .fold(0.0, f64::max)
    }

    /// Estimated seconds for a move of `total_distance` mm at `feed_rate` mm/min
    /// with symmetric acceleration and deceleration.
    pub fn movement_time(&self, total_distance: f64, feed_rate: f64) -> f64 {
        if total_distance <= 0.0 || feed_rate <= 0.0 || self.acceleration <= 0.0 {
            return 0.0;
        }
        let accel = self.acceleration;
        let speed = feed_rate / 60.0;
        let t_accel = speed / accel;
        let d_accel = 0.5 * accel * t_accel * t_accel;

        let seconds = if total_distance < 2.0 * d_accel {
            // Triangular: cruise speed is never reached
            2.0 * (total_distance / accel).sqrt()
        } else {
            let d_constant = total_distance - 2.0 * d_accel;
            2.0 * t_accel + d_constant / speed
        };
        if seconds.is_finite() { seconds } else { 0.0 }
    }

    /// Plan one slice: size every active note's move, push it through the
    /// axis bound policy, and combine the axes into one coordinated move.
    ///
    /// When several active notes share an axis, the one listed last wins.
    /// Notes on axes missing from `axes` are ignored.
    pub fn plan_slice(
        &self,
        slice_duration: f64,
        active: &[&NoteInterval],
        axes: &mut BTreeMap<AxisId, AxisMotionState>,
    ) -> SlicePlan {
        let mut per_axis: BTreeMap<AxisId, &NoteInterval> = BTreeMap::new();
        for note in active {
            if let Some(previous) = per_axis.insert(note.axis, note) {
                tracing::warn!(
                    "Notes {} and {} overlap on axis {}, playing {}",
                    previous.label(),
                    note.label(),
                    note.axis,
                    note.label()
                );
            }
        }

        let mut moves = Vec::with_capacity(per_axis.len());
        let mut clamped_notes = 0;
        for (axis, note) in per_axis {
            let Some(state) = axes.get_mut(&axis) else {
                tracing::warn!("No motion state for axis {}, skipping note {}", axis, note.label());
                continue;
            };
            let rate = self.required_feed_rate(note.frequency);
            if rate.clamped {
                clamped_notes += 1;
                tracing::warn!(
                    "Feed rate too high for {} ({} Hz), limiting to {} mm/min",
                    note.label(),
                    note.frequency,
                    self.max_feed_rate
                );
            }
            let distance = state.advance(Self::raw_distance(rate.mm_per_min, slice_duration));
            if distance != 0.0 {
                moves.push(AxisMove {
                    axis,
                    distance,
                    required_feed_rate: rate.mm_per_min,
                });
            }
        }

        let total_distance = Self::total_distance(&moves);
        let feed_rate = Self::combined_feed_rate(&moves);
        let movement_time =
            Duration::try_from_secs_f64(self.movement_time(total_distance, feed_rate)).unwrap_or(Duration::ZERO);
        SlicePlan {
            moves,
            total_distance,
            feed_rate,
            movement_time,
            clamped_notes,
        }
    }
}
