// src/machine/mod.rs - Machine capability interface shared by real and simulated controllers
pub mod grbl;
pub mod session;
pub mod simulated;

use async_trait::async_trait;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::cancel::CancelFlag;
use crate::config::{AxisConfig, ConfigError, InitConfig};
use crate::gcode::ProtocolResponse;
use crate::hardware::{ChannelClosed, HardwareError, TransportReport};
use crate::motion::AxisId;
use crate::song::{NoteInterval, SongError};

pub use grbl::GrblMachine;
pub use session::{plan_song, run_schedule, CommandSink};
pub use simulated::{SimulatedController, SimulatedMachine};

#[derive(Debug, Error)]
pub enum MachineError {
    #[error("Hardware error: {0}")]
    Hardware(#[from] HardwareError),
    #[error("Song error: {0}")]
    Song(#[from] SongError),
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("Not connected to machine")]
    NotConnected,
    #[error("Song uses axis {0}, which is not configured")]
    UnknownAxis(AxisId),
    #[error("Transport stopped: {0}")]
    ChannelClosed(#[from] ChannelClosed),
    #[error("Transport task failed: {0}")]
    TransportFailed(String),
}

/// Outcome of one `play_notes` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaybackReport {
    /// Slices with at least one active note.
    pub slices_played: usize,
    pub commands_emitted: usize,
    /// Notes whose feed rate hit the machine ceiling.
    pub clamped_notes: usize,
    /// Playback stopped early because the session was cancelled.
    pub cancelled: bool,
    pub final_positions: BTreeMap<AxisId, f64>,
    pub transport: TransportReport,
}

/// What every machine profile can do. The physical profile talks G-code over
/// a serial link; the simulated one applies commands in process. Both share
/// the same scheduler, planner and bound policies.
#[async_trait]
pub trait Machine: Send {
    fn name(&self) -> &str;

    async fn connect(&mut self) -> Result<(), MachineError>;

    /// Release the transport. Safe to call in any state.
    async fn disconnect(&mut self);

    async fn initialize(&mut self, init: &InitConfig) -> Result<(), MachineError>;

    async fn send_command(&mut self, command: &str) -> Result<ProtocolResponse, MachineError>;

    async fn play_notes(&mut self, notes: &[NoteInterval]) -> Result<PlaybackReport, MachineError>;

    /// Flag that stops a running playback at the next slice.
    fn cancel_flag(&self) -> CancelFlag;
}

/// Reject songs that reference axes the machine does not have.
pub fn check_axes(notes: &[NoteInterval], axes: &BTreeMap<AxisId, AxisConfig>) -> Result<(), MachineError> {
    match notes.iter().find(|n| !axes.contains_key(&n.axis)) {
        Some(note) => Err(MachineError::UnknownAxis(note.axis)),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn test_check_axes() {
        let config = Config::default();
        let ok = vec![NoteInterval::new(AxisId::X, 440.0, 0.0, 1.0)];
        assert!(check_axes(&ok, &config.axes).is_ok());
        let bad = vec![
            NoteInterval::new(AxisId::Y, 440.0, 0.0, 1.0),
            NoteInterval::new(AxisId::Z, 440.0, 0.0, 1.0),
        ];
        assert!(matches!(check_axes(&bad, &config.axes), Err(MachineError::UnknownAxis(AxisId::Z))));
    }
}
