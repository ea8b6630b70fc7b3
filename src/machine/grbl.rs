// src/machine/grbl.rs - Physical machine: GRBL controller over a serial link
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::cancel::CancelFlag;
use crate::config::{Config, InitConfig};
use crate::gcode::{self, MovementCommand, ProtocolResponse};
use crate::hardware::{command_channel, Exchange, LineLink, PortOpener, SerialPortOpener, TransportWorker};
use crate::machine::{check_axes, run_schedule, Machine, MachineError, PlaybackReport};
use crate::motion::{AxisId, AxisMotionState, MotionPlanner};
use crate::scheduler::IntervalScheduler;
use crate::song::{validate_notes, NoteInterval};

/// A GRBL-driven CNC machine. During playback the serial link is owned by a
/// transport task fed through a bounded command channel; between sessions the
/// machine holds it directly for setup commands.
pub struct GrblMachine<O: PortOpener = SerialPortOpener> {
    config: Config,
    opener: O,
    link: Option<LineLink<O::Port>>,
    axes: BTreeMap<AxisId, AxisMotionState>,
    cancel: CancelFlag,
}

impl GrblMachine<SerialPortOpener> {
    pub fn new(config: Config) -> Self {
        Self::with_opener(config, SerialPortOpener)
    }
}

impl<O: PortOpener> GrblMachine<O> {
    pub fn with_opener(config: Config, opener: O) -> Self {
        let axes = config.axis_states();
        Self {
            config,
            opener,
            link: None,
            axes,
            cancel: CancelFlag::new(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    /// Where the scheduler believes each axis is.
    pub fn axis_states(&self) -> &BTreeMap<AxisId, AxisMotionState> {
        &self.axes
    }

    /// Exchange one command, releasing the link if the transport fails.
    async fn exchange(&mut self, command: &str) -> Result<Exchange, MachineError> {
        let link = self.link.as_mut().ok_or(MachineError::NotConnected)?;
        match link.exchange(command).await {
            Ok(exchange) => Ok(exchange),
            Err(e) => {
                tracing::error!("Error sending G-code '{}': {}", command, e);
                self.release();
                Err(e.into())
            }
        }
    }

    /// Send a setup command and log anything but `ok`.
    async fn send_logged(&mut self, command: &str) -> Result<ProtocolResponse, MachineError> {
        let response = self.send_command(command).await?;
        if !response.is_ok() {
            tracing::warn!("'{}' answered with: {}", command, response);
        }
        Ok(response)
    }

    /// Lowest acceleration over all configured axes, in mm/s². Controller
    /// settings win over configured values when querying is enabled.
    async fn planning_acceleration(&mut self) -> Result<f64, MachineError> {
        let mut reported = BTreeMap::new();
        if self.config.motion.query_controller_acceleration {
            let exchange = self.exchange(gcode::QUERY_SETTINGS).await?;
            if exchange.response.is_ok() {
                reported = gcode::parse_acceleration_settings(exchange.info.iter().map(String::as_str));
            } else {
                tracing::warn!("Settings query failed ({}), using configured acceleration", exchange.response);
            }
        }
        let acceleration = self
            .config
            .axes
            .keys()
            .map(|axis| reported.get(axis).copied().unwrap_or_else(|| self.config.axis_acceleration(*axis)))
            .fold(f64::INFINITY, f64::min);
        tracing::info!("Planning with acceleration {} mm/s²", acceleration);
        Ok(acceleration)
    }

    fn release(&mut self) {
        if self.link.take().is_some() {
            tracing::info!("Serial connection closed.");
        }
    }
}

#[async_trait]
impl<O: PortOpener> Machine for GrblMachine<O> {
    fn name(&self) -> &str {
        "grbl"
    }

    async fn connect(&mut self) -> Result<(), MachineError> {
        if self.link.is_some() {
            return Ok(());
        }
        // A new connection is a new session; a stop from the last one must not carry over.
        self.cancel.reset();
        let port = self.opener.open(&self.config.serial).await.map_err(|e| {
            tracing::error!("Serial communication error: {}", e);
            e
        })?;
        let mut link = LineLink::new(port);
        let banner = link
            .wake(
                Duration::from_millis(self.config.serial.wake_delay_ms),
                Duration::from_millis(self.config.serial.drain_timeout_ms),
            )
            .await?;
        tracing::info!("Connected to controller ({} startup lines)", banner.len());
        self.link = Some(link);
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.release();
    }

    async fn initialize(&mut self, init: &InitConfig) -> Result<(), MachineError> {
        if init.home {
            tracing::info!("Starting homing cycle...");
            self.send_logged(gcode::HOME).await?;
            tokio::time::sleep(Duration::from_millis(init.home_settle_ms)).await;
        } else if init.unlock {
            tracing::warn!("Skipping homing and unlocking the controller; machine position must already be known");
            self.send_logged(gcode::UNLOCK).await?;
        }

        if init.park {
            let start: BTreeMap<AxisId, f64> = self
                .config
                .axes
                .iter()
                .map(|(axis, cfg)| (*axis, cfg.start_position))
                .collect();
            let park = MovementCommand::new(start, init.park_feed_rate);
            tracing::info!("Moving to start position");
            self.send_logged(gcode::ABSOLUTE_POSITIONING).await?;
            self.send_logged(&park.to_rapid()).await?;
            self.axes = self.config.axis_states();
        }

        self.send_logged(gcode::RELATIVE_POSITIONING).await?;
        Ok(())
    }

    async fn send_command(&mut self, command: &str) -> Result<ProtocolResponse, MachineError> {
        Ok(self.exchange(command).await?.response)
    }

    async fn play_notes(&mut self, notes: &[NoteInterval]) -> Result<PlaybackReport, MachineError> {
        validate_notes(notes)?;
        check_axes(notes, &self.config.axes)?;
        if self.link.is_none() {
            return Err(MachineError::NotConnected);
        }

        let acceleration = self.planning_acceleration().await?;
        let planner = MotionPlanner::new(
            self.config.motion.mm_per_step,
            self.config.motion.max_feed_rate,
            acceleration,
        );
        let scheduler = IntervalScheduler::new(notes.to_vec());

        let link = self.link.take().ok_or(MachineError::NotConnected)?;
        let (mut sender, receiver) = command_channel(self.config.motion.queue_capacity);
        let worker = TransportWorker::new(link, receiver, self.cancel.clone());
        let transport = tokio::spawn(worker.run());

        let schedule = run_schedule(&scheduler, &planner, &mut self.axes, &mut sender, &self.cancel).await;
        sender.close();

        let (link, transport_result) = match transport.await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!("Transport task failed: {}", e);
                self.cancel.cancel();
                self.axes = self.config.axis_states();
                return Err(MachineError::TransportFailed(e.to_string()));
            }
        };
        let transport_report = match transport_result {
            Ok(report) => report,
            Err(e) => {
                // Fatal: the link is dropped here, closing the port.
                drop(link);
                tracing::info!("Serial connection closed after transport fault.");
                // Queued moves may never have run, so the tracked positions are unreliable.
                tracing::warn!("Axis positions reset to start positions; park before playing again");
                self.axes = self.config.axis_states();
                return Err(e.into());
            }
        };
        self.link = Some(link);

        let mut report = schedule?;
        report.transport = transport_report;
        tracing::info!(
            "Playback finished: {} slices, {} commands ({} ok, {} errors, {} alarms)",
            report.slices_played,
            report.commands_emitted,
            report.transport.ok,
            report.transport.errors,
            report.transport.alarms
        );
        Ok(report)
    }

    fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }
}
