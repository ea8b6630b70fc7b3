// src/lib.rs - Turn note intervals into timed multi-axis moves and play them on a GRBL machine
pub mod cancel;
pub mod config;
pub mod gcode;
pub mod hardware;
pub mod machine;
pub mod motion;
pub mod scheduler;
pub mod song;

pub use cancel::CancelFlag;
pub use config::{load_config, Config, ConfigError};
pub use gcode::{MovementCommand, ProtocolResponse};
pub use hardware::{HardwareError, PortOpener, SerialPortOpener};
pub use machine::{GrblMachine, Machine, MachineError, PlaybackReport, SimulatedMachine};
pub use motion::{AxisId, BoundSpec, MotionPlanner};
pub use scheduler::{IntervalScheduler, TimeSlice};
pub use song::{load_song, NoteInterval, SongError};
