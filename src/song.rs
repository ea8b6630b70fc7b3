// src/song.rs - Note intervals handed over by the MIDI converter
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::motion::AxisId;

#[derive(Debug, Error)]
pub enum SongError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Note {index}: {reason}")]
    Invalid { index: usize, reason: String },
}

/// One note held on one axis over `[start_time, start_time + duration)`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct NoteInterval {
    pub axis: AxisId,
    pub frequency: f64,
    /// Seconds from song start.
    pub start_time: f64,
    /// Seconds, always > 0.
    pub duration: f64,
    /// Note name such as "A4", only used for log messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl NoteInterval {
    pub fn new(axis: AxisId, frequency: f64, start_time: f64, duration: f64) -> Self {
        Self {
            axis,
            frequency,
            start_time,
            duration,
            note: None,
        }
    }

    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }

    pub fn label(&self) -> &str {
        self.note.as_deref().unwrap_or("note")
    }

    fn validate(&self) -> Result<(), String> {
        if !self.frequency.is_finite() || self.frequency <= 0.0 {
            return Err(format!("frequency must be > 0, got {}", self.frequency));
        }
        if !self.start_time.is_finite() || self.start_time < 0.0 {
            return Err(format!("start_time must be >= 0, got {}", self.start_time));
        }
        if !self.duration.is_finite() || self.duration <= 0.0 {
            return Err(format!("duration must be > 0, got {}", self.duration));
        }
        Ok(())
    }
}

/// Check every record before any of them reaches the scheduler.
pub fn validate_notes(notes: &[NoteInterval]) -> Result<(), SongError> {
    for (index, note) in notes.iter().enumerate() {
        note.validate().map_err(|reason| SongError::Invalid { index, reason })?;
    }
    Ok(())
}

/// Parse and validate a JSON array of note intervals.
pub fn parse_song(json: &str) -> Result<Vec<NoteInterval>, SongError> {
    let notes: Vec<NoteInterval> = serde_json::from_str(json)?;
    validate_notes(&notes)?;
    Ok(notes)
}

/// Load a song file written by the converter.
pub fn load_song<P: AsRef<Path>>(path: P) -> Result<Vec<NoteInterval>, SongError> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|e| {
        tracing::error!("Failed to read song file '{}': {}", path.display(), e);
        SongError::Io(e)
    })?;
    let notes = parse_song(&contents)?;
    tracing::info!("Loaded {} notes from {}", notes.len(), path.display());
    Ok(notes)
}

/// Speed a song up (`multiplier > 1`) or slow it down (`multiplier < 1`).
pub fn scale_tempo(notes: &mut [NoteInterval], multiplier: f64) -> Result<(), SongError> {
    if !multiplier.is_finite() || multiplier <= 0.0 {
        return Err(SongError::Invalid {
            index: 0,
            reason: format!("speed multiplier must be > 0, got {}", multiplier),
        });
    }
    for note in notes.iter_mut() {
        note.start_time /= multiplier;
        note.duration /= multiplier;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SONG: &str = r#"[
        {"axis": "X", "note": "A4", "frequency": 440.0, "start_time": 0.0, "duration": 0.5},
        {"axis": "y", "frequency": 220.0, "start_time": 0.25, "duration": 1.0}
    ]"#;

    #[test]
    fn test_parse_song() {
        let notes = parse_song(SONG).unwrap();
        assert_eq!(notes.len(), 2);
        assert_eq!(notes[0].axis, AxisId::X);
        assert_eq!(notes[0].label(), "A4");
        assert_eq!(notes[1].axis, AxisId::Y);
        assert_eq!(notes[1].note, None);
        assert_eq!(notes[1].end_time(), 1.25);
    }

    #[test]
    fn test_missing_field_is_rejected() {
        let json = r#"[{"axis": "X", "frequency": 440.0, "duration": 0.5}]"#;
        assert!(matches!(parse_song(json), Err(SongError::Json(_))));
    }

    #[test]
    fn test_bad_values_are_rejected() {
        let zero = r#"[{"axis": "X", "frequency": 440.0, "start_time": 0.0, "duration": 0.0}]"#;
        assert!(matches!(parse_song(zero), Err(SongError::Invalid { index: 0, .. })));
        let negative = r#"[
            {"axis": "X", "frequency": 440.0, "start_time": 0.0, "duration": 1.0},
            {"axis": "X", "frequency": -1.0, "start_time": 0.0, "duration": 1.0}
        ]"#;
        assert!(matches!(parse_song(negative), Err(SongError::Invalid { index: 1, .. })));
        let axis = r#"[{"axis": "XY", "frequency": 440.0, "start_time": 0.0, "duration": 1.0}]"#;
        assert!(matches!(parse_song(axis), Err(SongError::Json(_))));
    }

    #[test]
    fn test_load_song_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SONG.as_bytes()).unwrap();
        file.flush().unwrap();
        let notes = load_song(file.path()).unwrap();
        assert_eq!(notes.len(), 2);
        assert!(matches!(load_song("no_such_song.json"), Err(SongError::Io(_))));
    }

    #[test]
    fn test_scale_tempo() {
        let mut notes = parse_song(SONG).unwrap();
        scale_tempo(&mut notes, 2.0).unwrap();
        assert_eq!(notes[1].start_time, 0.125);
        assert_eq!(notes[1].duration, 0.5);
        assert!(scale_tempo(&mut notes, 0.0).is_err());
    }
}
