// src/machine/session.rs - The scheduling task: pace slices, plan moves, hand off commands
use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::cancel::CancelFlag;
use crate::gcode::MovementCommand;
use crate::hardware::CommandSender;
use crate::machine::{MachineError, PlaybackReport};
use crate::motion::{AxisId, AxisMotionState, MotionPlanner, SlicePlan};
use crate::scheduler::{IntervalScheduler, SongClock, TimeSlice};

/// Where the scheduling task delivers its commands.
#[async_trait]
pub trait CommandSink: Send {
    async fn submit(&mut self, command: MovementCommand) -> Result<(), MachineError>;
}

#[async_trait]
impl CommandSink for CommandSender {
    async fn submit(&mut self, command: MovementCommand) -> Result<(), MachineError> {
        self.enqueue(command).await?;
        Ok(())
    }
}

/// Play a song against `sink` in real time.
///
/// Each slice waits until its start on the song timeline, is planned against
/// `axes`, and, when anything moves, is submitted followed by a pause for the
/// estimated move time. A set `cancel` flag or a sink that closes while the
/// session is cancelled ends playback early with `cancelled` set.
pub async fn run_schedule<K>(
    scheduler: &IntervalScheduler,
    planner: &MotionPlanner,
    axes: &mut BTreeMap<AxisId, AxisMotionState>,
    sink: &mut K,
    cancel: &CancelFlag,
) -> Result<PlaybackReport, MachineError>
where
    K: CommandSink + ?Sized,
{
    let mut report = PlaybackReport::default();
    let clock = SongClock::start();
    tracing::info!(
        "Playing {} notes over {:.2}s",
        scheduler.notes().len(),
        scheduler.song_length()
    );

    for scheduled in scheduler.slices() {
        if cancel.is_cancelled() {
            report.cancelled = true;
            break;
        }
        let slice = scheduled.slice;
        let late = clock.elapsed() - slice.start;
        if late > 0.0 {
            tracing::debug!("Running {:.3}s behind at slice {:.3}s", late, slice.start);
        }
        clock.wait_until(slice.start).await;
        if cancel.is_cancelled() {
            report.cancelled = true;
            break;
        }

        let plan = planner.plan_slice(slice.duration(), &scheduled.active, axes);
        report.slices_played += 1;
        report.clamped_notes += plan.clamped_notes;
        let Some(command) = plan.command() else {
            tracing::debug!("No motion in slice {:.3}s..{:.3}s", slice.start, slice.end);
            continue;
        };

        tracing::trace!("Slice {:.3}s..{:.3}s -> {}", slice.start, slice.end, command);
        if let Err(e) = sink.submit(command).await {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            return Err(e);
        }
        report.commands_emitted += 1;

        if !plan.movement_time.is_zero() {
            tokio::time::sleep(plan.movement_time).await;
        }
    }

    if report.cancelled {
        tracing::info!("Playback cancelled after {} slices", report.slices_played);
    }
    report.final_positions = axes.iter().map(|(axis, state)| (*axis, state.position)).collect();
    Ok(report)
}

/// Plan every slice of a song without pacing or sending anything.
pub fn plan_song(
    scheduler: &IntervalScheduler,
    planner: &MotionPlanner,
    axes: &mut BTreeMap<AxisId, AxisMotionState>,
) -> Vec<(TimeSlice, SlicePlan)> {
    scheduler
        .slices()
        .map(|scheduled| {
            let plan = planner.plan_slice(scheduled.slice.duration(), &scheduled.active, axes);
            (scheduled.slice, plan)
        })
        .collect()
}
