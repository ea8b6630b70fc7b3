// src/gcode.rs - Controller command text and response classification
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::motion::AxisId;

/// Switch the controller to relative positioning.
pub const RELATIVE_POSITIONING: &str = "G91";
/// Switch the controller to absolute positioning.
pub const ABSOLUTE_POSITIONING: &str = "G90";
pub const HOME: &str = "$H";
pub const UNLOCK: &str = "$X";
/// Dump controller settings, one `$n=value` line each.
pub const QUERY_SETTINGS: &str = "$$";
/// Sent right after opening the port to wake the controller up.
pub const WAKE_UP: &str = "\r\n\r\n";

/// Prefix of the banner a GRBL controller prints after a reset.
const RESET_BANNER: &str = "Grbl";

#[derive(Debug, Error, PartialEq)]
pub enum GCodeError {
    #[error("Not a motion command: {0}")]
    NotMotion(String),
    #[error("Invalid word '{word}' in '{line}'")]
    InvalidWord { word: String, line: String },
}

/// Coordinated relative move produced once per non-empty slice.
#[derive(Debug, Clone, PartialEq)]
pub struct MovementCommand {
    pub axis_deltas: BTreeMap<AxisId, f64>,
    /// mm/min
    pub feed_rate: f64,
}

impl MovementCommand {
    pub fn new(axis_deltas: BTreeMap<AxisId, f64>, feed_rate: f64) -> Self {
        Self { axis_deltas, feed_rate }
    }

    /// The same axis words as a rapid `G0` move, used for parking.
    pub fn to_rapid(&self) -> String {
        let mut line = String::from("G0");
        self.push_words(&mut line);
        line
    }

    fn push_words(&self, line: &mut String) {
        use std::fmt::Write;
        for (axis, value) in &self.axis_deltas {
            let _ = write!(line, " {}{:.4}", axis, value);
        }
        let _ = write!(line, " F{:.2}", self.feed_rate);
    }
}

impl fmt::Display for MovementCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut line = String::from("G1");
        self.push_words(&mut line);
        f.write_str(&line)
    }
}

impl FromStr for MovementCommand {
    type Err = GCodeError;

    /// Parses `G0`/`G1` lines. A missing `F` word yields a feed rate of zero.
    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        match words.next() {
            Some(w) if w.eq_ignore_ascii_case("G1") || w.eq_ignore_ascii_case("G0") => {}
            _ => return Err(GCodeError::NotMotion(line.to_string())),
        }

        let mut axis_deltas = BTreeMap::new();
        let mut feed_rate = 0.0;
        for word in words {
            let invalid = || GCodeError::InvalidWord {
                word: word.to_string(),
                line: line.to_string(),
            };
            let mut chars = word.chars();
            let letter = chars.next().ok_or_else(invalid)?;
            let value: f64 = chars.as_str().parse().map_err(|_| invalid())?;
            if letter.eq_ignore_ascii_case(&'F') {
                feed_rate = value;
            } else {
                let axis = AxisId::new(letter).ok_or_else(invalid)?;
                axis_deltas.insert(axis, value);
            }
        }
        Ok(Self { axis_deltas, feed_rate })
    }
}

/// Terminal answer to one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolResponse {
    Ok,
    Error(String),
    Alarm(String),
    ControllerReset(String),
}

impl ProtocolResponse {
    /// Classify one response line. Returns `None` for empty and informational
    /// lines, which do not end an exchange.
    pub fn classify(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            None
        } else if line == "ok" {
            Some(ProtocolResponse::Ok)
        } else if line.starts_with("error") {
            Some(ProtocolResponse::Error(line.to_string()))
        } else if line.starts_with("ALARM") {
            Some(ProtocolResponse::Alarm(line.to_string()))
        } else if line.starts_with(RESET_BANNER) {
            Some(ProtocolResponse::ControllerReset(line.to_string()))
        } else {
            None
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, ProtocolResponse::Ok)
    }
}

impl fmt::Display for ProtocolResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolResponse::Ok => write!(f, "ok"),
            ProtocolResponse::Error(text)
            | ProtocolResponse::Alarm(text)
            | ProtocolResponse::ControllerReset(text) => write!(f, "{}", text),
        }
    }
}

/// Pull per-axis acceleration (mm/s²) out of `$$` setting lines.
/// GRBL reports X/Y/Z acceleration as `$120`/`$121`/`$122`.
pub fn parse_acceleration_settings<'a, I>(lines: I) -> BTreeMap<AxisId, f64>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut accelerations = BTreeMap::new();
    for line in lines {
        let Some((key, value)) = line.trim().split_once('=') else {
            continue;
        };
        let axis = match key {
            "$120" => AxisId::X,
            "$121" => AxisId::Y,
            "$122" => AxisId::Z,
            _ => continue,
        };
        // Settings may carry a trailing comment, e.g. "$120=10.000 (x accel, mm/sec^2)"
        let value = value.split_whitespace().next().unwrap_or_default();
        match value.parse::<f64>() {
            Ok(accel) if accel.is_finite() && accel > 0.0 => {
                accelerations.insert(axis, accel);
            }
            _ => tracing::debug!("Ignoring unusable acceleration setting: {}", line),
        }
    }
    accelerations
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_movement_command_format() {
        let mut deltas = BTreeMap::new();
        deltas.insert(AxisId::Y, -10.0);
        deltas.insert(AxisId::X, 16.5);
        let cmd = MovementCommand::new(deltas, 1234.5678);
        assert_eq!(cmd.to_string(), "G1 X16.5000 Y-10.0000 F1234.57");
    }

    #[test]
    fn test_movement_command_parse() {
        let cmd: MovementCommand = "G1 X16.5000 Y-10.0000 F990.00".parse().unwrap();
        assert_eq!(cmd.axis_deltas[&AxisId::X], 16.5);
        assert_eq!(cmd.axis_deltas[&AxisId::Y], -10.0);
        assert_eq!(cmd.feed_rate, 990.0);

        let park: MovementCommand = "G0 X100 Y100".parse().unwrap();
        assert_eq!(park.feed_rate, 0.0);

        assert!(matches!("G91".parse::<MovementCommand>(), Err(GCodeError::NotMotion(_))));
        assert!(matches!("G1 Xabc".parse::<MovementCommand>(), Err(GCodeError::InvalidWord { .. })));
    }

    #[test]
    fn test_classify_responses() {
        assert_eq!(ProtocolResponse::classify("ok"), Some(ProtocolResponse::Ok));
        assert_eq!(ProtocolResponse::classify("ok\r"), Some(ProtocolResponse::Ok));
        assert_eq!(
            ProtocolResponse::classify("error: bad command"),
            Some(ProtocolResponse::Error("error: bad command".to_string()))
        );
        assert_eq!(
            ProtocolResponse::classify("ALARM:1"),
            Some(ProtocolResponse::Alarm("ALARM:1".to_string()))
        );
        assert_eq!(
            ProtocolResponse::classify("Grbl 1.1h ['$' for help]"),
            Some(ProtocolResponse::ControllerReset("Grbl 1.1h ['$' for help]".to_string()))
        );
    }

    #[test]
    fn test_informational_lines_are_not_terminal() {
        assert_eq!(ProtocolResponse::classify(""), None);
        assert_eq!(ProtocolResponse::classify("   "), None);
        assert_eq!(ProtocolResponse::classify("okay"), None);
        assert_eq!(ProtocolResponse::classify("<Idle|MPos:0.000,0.000,0.000>"), None);
        assert_eq!(ProtocolResponse::classify("$120=1000.000"), None);
    }

    #[test]
    fn test_parse_acceleration_settings() {
        let lines = ["$110=8000.000", "$120=500.000", "$121=750.000 (y accel)", "$122=bogus", "garbage"];
        let accel = parse_acceleration_settings(lines);
        assert_eq!(accel.len(), 2);
        assert_eq!(accel[&AxisId::X], 500.0);
        assert_eq!(accel[&AxisId::Y], 750.0);

        let degenerate = ["$120=inf", "$121=NaN", "$122=0.000"];
        assert!(parse_acceleration_settings(degenerate).is_empty());
    }

    #[test]
    fn test_rapid_rendering_shares_axis_words() {
        let park = MovementCommand::new(BTreeMap::from([(AxisId::X, 100.0), (AxisId::Y, 150.0)]), 8000.0);
        assert_eq!(park.to_rapid(), "G0 X100.0000 Y150.0000 F8000.00");
        assert_eq!(park.to_string(), "G1 X100.0000 Y150.0000 F8000.00");
        let parsed: MovementCommand = park.to_rapid().parse().unwrap();
        assert_eq!(parsed, park);
    }
}
