// src/machine/simulated.rs - In-process machine for previewing songs without hardware
use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::cancel::CancelFlag;
use crate::config::{Config, InitConfig};
use crate::gcode::{self, MovementCommand, ProtocolResponse};
use crate::hardware::TransportReport;
use crate::machine::{check_axes, run_schedule, CommandSink, Machine, MachineError, PlaybackReport};
use crate::motion::{AxisId, AxisMotionState, MotionPlanner};
use crate::scheduler::IntervalScheduler;
use crate::song::{validate_notes, NoteInterval};

/// Stand-in for a GRBL controller. Applies G0/G1 words to its own axis
/// positions, clamped to the bed, and keeps every position it visited so
/// preview tooling can draw the path.
#[derive(Debug, Clone)]
pub struct SimulatedController {
    positions: BTreeMap<AxisId, f64>,
    travel: f64,
    absolute: bool,
    history: Vec<BTreeMap<AxisId, f64>>,
}

impl SimulatedController {
    pub fn new(positions: BTreeMap<AxisId, f64>, travel: f64) -> Self {
        let history = vec![positions.clone()];
        Self {
            positions,
            travel,
            absolute: false,
            history,
        }
    }

    pub fn positions(&self) -> &BTreeMap<AxisId, f64> {
        &self.positions
    }

    pub fn history(&self) -> &[BTreeMap<AxisId, f64>] {
        &self.history
    }

    /// Handle one command line the way the real controller would answer it.
    pub fn execute(&mut self, line: &str) -> ProtocolResponse {
        let line = line.trim();
        tracing::debug!("Simulated controller received: {}", line);
        match line.split_whitespace().next().map(str::to_ascii_uppercase).as_deref() {
            Some(gcode::ABSOLUTE_POSITIONING) => {
                self.absolute = true;
                ProtocolResponse::Ok
            }
            Some(gcode::RELATIVE_POSITIONING) => {
                self.absolute = false;
                ProtocolResponse::Ok
            }
            Some(gcode::HOME) | Some(gcode::UNLOCK) | Some(gcode::QUERY_SETTINGS) => ProtocolResponse::Ok,
            Some("G0") | Some("G1") => match line.parse::<MovementCommand>() {
                Ok(command) => {
                    self.apply(&command);
                    ProtocolResponse::Ok
                }
                Err(e) => ProtocolResponse::Error(format!("error: {}", e)),
            },
            _ => ProtocolResponse::Error("error: unsupported command".to_string()),
        }
    }

    fn apply(&mut self, command: &MovementCommand) {
        for (axis, value) in &command.axis_deltas {
            let position = self.positions.entry(*axis).or_insert(0.0);
            let target = if self.absolute { *value } else { *position + value };
            *position = target.clamp(0.0, self.travel);
        }
        self.history.push(self.positions.clone());
    }
}

/// Feeds commands straight into the simulated controller, no channel needed.
struct DirectSink<'a> {
    controller: &'a mut SimulatedController,
    report: &'a mut TransportReport,
}

#[async_trait]
impl CommandSink for DirectSink<'_> {
    async fn submit(&mut self, command: MovementCommand) -> Result<(), MachineError> {
        let text = command.to_string();
        let response = self.controller.execute(&text);
        if !response.is_ok() {
            tracing::warn!("Simulated controller rejected '{}': {}", text, response);
        }
        self.report.record(text, &response);
        Ok(())
    }
}

pub struct SimulatedMachine {
    config: Config,
    controller: SimulatedController,
    axes: BTreeMap<AxisId, AxisMotionState>,
    connected: bool,
    cancel: CancelFlag,
}

impl SimulatedMachine {
    pub fn new(config: Config) -> Self {
        let start = config
            .axes
            .iter()
            .map(|(axis, cfg)| (*axis, cfg.start_position))
            .collect();
        let controller = SimulatedController::new(start, config.simulator.travel);
        let axes = config.axis_states();
        Self {
            config,
            controller,
            axes,
            connected: false,
            cancel: CancelFlag::new(),
        }
    }

    /// Snapshot of the simulated controller, for preview rendering.
    pub fn controller(&self) -> &SimulatedController {
        &self.controller
    }

    pub fn axis_states(&self) -> &BTreeMap<AxisId, AxisMotionState> {
        &self.axes
    }
}

#[async_trait]
impl Machine for SimulatedMachine {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn connect(&mut self) -> Result<(), MachineError> {
        if self.connected {
            return Ok(());
        }
        self.cancel.reset();
        self.connected = true;
        tracing::info!("Simulated machine ready");
        Ok(())
    }

    async fn disconnect(&mut self) {
        if self.connected {
            self.connected = false;
            tracing::info!("Simulated machine stopped");
        }
    }

    async fn initialize(&mut self, init: &InitConfig) -> Result<(), MachineError> {
        if init.home {
            self.send_command(gcode::HOME).await?;
        } else if init.unlock {
            self.send_command(gcode::UNLOCK).await?;
        }
        if init.park {
            let start = self
                .config
                .axes
                .iter()
                .map(|(axis, cfg)| (*axis, cfg.start_position))
                .collect();
            let park = MovementCommand::new(start, init.park_feed_rate);
            self.send_command(gcode::ABSOLUTE_POSITIONING).await?;
            self.send_command(&park.to_rapid()).await?;
            self.axes = self.config.axis_states();
        }
        self.send_command(gcode::RELATIVE_POSITIONING).await?;
        Ok(())
    }

    async fn send_command(&mut self, command: &str) -> Result<ProtocolResponse, MachineError> {
        if !self.connected {
            return Err(MachineError::NotConnected);
        }
        Ok(self.controller.execute(command))
    }

    async fn play_notes(&mut self, notes: &[NoteInterval]) -> Result<PlaybackReport, MachineError> {
        validate_notes(notes)?;
        check_axes(notes, &self.config.axes)?;
        if !self.connected {
            return Err(MachineError::NotConnected);
        }

        let planner = MotionPlanner::new(
            self.config.motion.mm_per_step,
            self.config.motion.max_feed_rate,
            self.config.planning_acceleration(),
        );
        let scheduler = IntervalScheduler::new(notes.to_vec());

        let mut transport = TransportReport::default();
        let mut sink = DirectSink {
            controller: &mut self.controller,
            report: &mut transport,
        };
        let mut report = run_schedule(&scheduler, &planner, &mut self.axes, &mut sink, &self.cancel).await?;
        report.transport = transport;
        tracing::info!(
            "Simulated playback finished: {} slices, {} commands",
            report.slices_played,
            report.commands_emitted
        );
        Ok(report)
    }

    fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }
}
