//! # Machine Configuration
//!
//! Everything a playback session needs is described by one TOML file.
//! Every section is optional; missing values fall back to the defaults of an
//! X-Carve style two-axis machine.
//!
//! ## Example: TOML Configuration
//!
//! ```toml
//! [serial]
//! port = "/dev/ttyUSB0"
//! baud = 115200
//!
//! [motion]
//! mm_per_step = 0.0375
//! max_feed_rate = 8000.0
//! queue_capacity = 15
//!
//! [init]
//! home = true
//!
//! [axes.X]
//! start_position = 100.0
//! bound = { type = "centered", center = 100.0, max_travel = 50.0 }
//!
//! [axes.Y]
//! start_position = 150.0
//! acceleration = 800.0
//! bound = { type = "absolute", min = 100.0, max = 300.0 }
//! ```

// src/config.rs - Single configuration file
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

use crate::motion::{AxisId, AxisMotionState, BoundSpec};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration struct: serial link, motion limits, startup sequence and axes.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub motion: MotionSettings,
    #[serde(default)]
    pub init: InitConfig,
    #[serde(default)]
    pub simulator: SimulatorConfig,
    #[serde(default = "default_axes")]
    pub axes: BTreeMap<AxisId, AxisConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            serial: SerialConfig::default(),
            motion: MotionSettings::default(),
            init: InitConfig::default(),
            simulator: SimulatorConfig::default(),
            axes: default_axes(),
        }
    }
}

/// Serial link to the motion controller.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SerialConfig {
    #[serde(default)]
    pub port: String,
    #[serde(default = "default_baud")]
    pub baud: u32,
    /// Pause after the wake-up sequence before draining the startup banner.
    #[serde(default = "default_wake_delay_ms")]
    pub wake_delay_ms: u64,
    /// Silence that ends the banner drain.
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud: default_baud(),
            wake_delay_ms: default_wake_delay_ms(),
            drain_timeout_ms: default_drain_timeout_ms(),
        }
    }
}

/// Note to motion conversion limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MotionSettings {
    #[serde(default = "default_mm_per_step")]
    pub mm_per_step: f64,
    /// mm/min
    #[serde(default = "default_max_feed_rate")]
    pub max_feed_rate: f64,
    /// mm/s², used for axes without their own value.
    #[serde(default = "default_acceleration")]
    pub default_acceleration: f64,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Ask the controller for its acceleration settings before playing.
    #[serde(default = "default_true")]
    pub query_controller_acceleration: bool,
}

impl Default for MotionSettings {
    fn default() -> Self {
        Self {
            mm_per_step: default_mm_per_step(),
            max_feed_rate: default_max_feed_rate(),
            default_acceleration: default_acceleration(),
            queue_capacity: default_queue_capacity(),
            query_controller_acceleration: true,
        }
    }
}

/// Startup sequence run by `initialize`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InitConfig {
    #[serde(default)]
    pub home: bool,
    /// Clear the alarm lock instead of homing. Ignored when `home` is set.
    #[serde(default)]
    pub unlock: bool,
    #[serde(default = "default_home_settle_ms")]
    pub home_settle_ms: u64,
    /// Move every axis to its start position before switching to relative mode.
    #[serde(default)]
    pub park: bool,
    #[serde(default = "default_max_feed_rate")]
    pub park_feed_rate: f64,
}

impl Default for InitConfig {
    fn default() -> Self {
        Self {
            home: false,
            unlock: false,
            home_settle_ms: default_home_settle_ms(),
            park: false,
            park_feed_rate: default_max_feed_rate(),
        }
    }
}

/// In-process controller used for previews.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimulatorConfig {
    /// Bed extent in mm; simulated positions are clamped to `[0, travel]`.
    #[serde(default = "default_travel")]
    pub travel: f64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self { travel: default_travel() }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AxisConfig {
    pub start_position: f64,
    /// mm/s²; overrides `motion.default_acceleration` for this axis.
    #[serde(default)]
    pub acceleration: Option<f64>,
    pub bound: BoundSpec,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let motion = &self.motion;
        positive("mm_per_step", motion.mm_per_step)?;
        positive("max_feed_rate", motion.max_feed_rate)?;
        positive("default_acceleration", motion.default_acceleration)?;
        positive("init.park_feed_rate", self.init.park_feed_rate)?;
        positive("simulator travel", self.simulator.travel)?;
        if motion.queue_capacity == 0 {
            return Err(ConfigError::Invalid("queue_capacity must be at least 1".to_string()));
        }
        if self.axes.is_empty() {
            return Err(ConfigError::Invalid("at least one axis must be configured".to_string()));
        }
        for (axis, cfg) in &self.axes {
            let (lo, hi) = cfg.bound.range();
            if !(lo.is_finite() && hi.is_finite() && lo < hi) {
                return Err(ConfigError::Invalid(format!(
                    "axis {} has an empty travel range [{}, {}]",
                    axis, lo, hi
                )));
            }
            if !cfg.bound.contains(cfg.start_position) {
                return Err(ConfigError::Invalid(format!(
                    "axis {} start position {} is outside [{}, {}]",
                    axis, cfg.start_position, lo, hi
                )));
            }
            if let Some(accel) = cfg.acceleration {
                positive(&format!("axis {} acceleration", axis), accel)?;
            }
        }
        Ok(())
    }

    /// Fresh motion state for every configured axis, parked at its start position.
    pub fn axis_states(&self) -> BTreeMap<AxisId, AxisMotionState> {
        self.axes
            .iter()
            .map(|(axis, cfg)| (*axis, AxisMotionState::new(*axis, cfg.start_position, cfg.bound)))
            .collect()
    }

    /// Configured acceleration of one axis in mm/s².
    pub fn axis_acceleration(&self, axis: AxisId) -> f64 {
        self.axes
            .get(&axis)
            .and_then(|cfg| cfg.acceleration)
            .unwrap_or(self.motion.default_acceleration)
    }

    /// Lowest configured acceleration over all axes, the planner's limit when
    /// the controller is not asked.
    pub fn planning_acceleration(&self) -> f64 {
        self.axes
            .keys()
            .map(|axis| self.axis_acceleration(*axis))
            .fold(f64::INFINITY, f64::min)
    }
}

/// Finite and strictly positive.
fn positive(name: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!("{} must be a finite value > 0, got {}", name, value)))
    }
}

// Default value functions
fn default_baud() -> u32 { 115200 }
fn default_wake_delay_ms() -> u64 { 2000 }
fn default_drain_timeout_ms() -> u64 { 100 }
fn default_mm_per_step() -> f64 { 0.0375 }
fn default_max_feed_rate() -> f64 { 8000.0 }
fn default_acceleration() -> f64 { 1000.0 }
fn default_queue_capacity() -> usize { 15 }
fn default_true() -> bool { true }
fn default_home_settle_ms() -> u64 { 2000 }
fn default_travel() -> f64 { 750.0 }

fn default_axes() -> BTreeMap<AxisId, AxisConfig> {
    let centered = AxisConfig {
        start_position: 100.0,
        acceleration: None,
        bound: BoundSpec::Centered { center: 100.0, max_travel: 50.0 },
    };
    BTreeMap::from([(AxisId::X, centered.clone()), (AxisId::Y, centered)])
}

/// Load and validate configuration from a TOML file at the given path.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) => {
            tracing::error!("Failed to read config file '{}': {}", path.display(), e);
            return Err(ConfigError::Io(e));
        }
    };
    let config: Config = match toml::from_str(&contents) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to parse config TOML: {}", e);
            return Err(ConfigError::Toml(e));
        }
    };
    config.validate()?;
    Ok(config)
}
