// src/scheduler/mod.rs - Split a song into slices with a constant set of active notes
pub mod clock;

use crate::song::NoteInterval;

pub use clock::SongClock;

/// Interval between two consecutive note boundaries, in song seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeSlice {
    pub start: f64,
    pub end: f64,
}

impl TimeSlice {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    /// Half-open overlap: a note ending exactly at `start`, or starting
    /// exactly at `end`, is not active in this slice.
    pub fn overlaps(&self, note: &NoteInterval) -> bool {
        note.start_time < self.end && note.end_time() > self.start
    }
}

/// A slice that has at least one active note.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledSlice<'a> {
    pub slice: TimeSlice,
    pub active: Vec<&'a NoteInterval>,
}

#[derive(Debug, Clone)]
pub struct IntervalScheduler {
    notes: Vec<NoteInterval>,
    boundaries: Vec<f64>,
}

impl IntervalScheduler {
    pub fn new(notes: Vec<NoteInterval>) -> Self {
        let mut boundaries: Vec<f64> = notes
            .iter()
            .flat_map(|n| [n.start_time, n.end_time()])
            .collect();
        boundaries.sort_by(f64::total_cmp);
        boundaries.dedup();
        Self { notes, boundaries }
    }

    pub fn notes(&self) -> &[NoteInterval] {
        &self.notes
    }

    /// Sorted, de-duplicated start and end times of every note.
    pub fn boundaries(&self) -> &[f64] {
        &self.boundaries
    }

    /// End of the last note, in song seconds.
    pub fn song_length(&self) -> f64 {
        self.boundaries.last().copied().unwrap_or(0.0)
    }

    /// Every slice between consecutive boundaries, including silent ones.
    pub fn time_slices(&self) -> impl Iterator<Item = TimeSlice> + '_ {
        self.boundaries.windows(2).map(|w| TimeSlice::new(w[0], w[1]))
    }

    pub fn active_notes(&self, slice: TimeSlice) -> Vec<&NoteInterval> {
        self.notes.iter().filter(|n| slice.overlaps(n)).collect()
    }

    /// Lazily walk the playable slices from the start of the song. Each call
    /// starts over.
    pub fn slices(&self) -> Slices<'_> {
        Slices {
            scheduler: self,
            next: 0,
        }
    }
}

pub struct Slices<'a> {
    scheduler: &'a IntervalScheduler,
    next: usize,
}

impl<'a> Iterator for Slices<'a> {
    type Item = ScheduledSlice<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let boundaries = &self.scheduler.boundaries;
        while self.next + 1 < boundaries.len() {
            let slice = TimeSlice::new(boundaries[self.next], boundaries[self.next + 1]);
            self.next += 1;
            if slice.duration() <= 0.0 {
                continue;
            }
            let active = self.scheduler.active_notes(slice);
            if active.is_empty() {
                tracing::trace!("Silent slice {:.3}s..{:.3}s", slice.start, slice.end);
                continue;
            }
            return Some(ScheduledSlice { slice, active });
        }
        None
    }
}
