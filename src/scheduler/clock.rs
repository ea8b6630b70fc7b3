// src/scheduler/clock.rs - Wall-clock pacing against the song timeline
use tokio::time::{Duration, Instant};

/// Maps song seconds onto wall-clock time. Every wait is computed from the
/// song origin, so sleep overshoot never accumulates across slices.
#[derive(Debug, Clone, Copy)]
pub struct SongClock {
    origin: Instant,
}

impl SongClock {
    pub fn start() -> Self {
        Self { origin: Instant::now() }
    }

    /// Seconds since the song started.
    pub fn elapsed(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }

    /// How long until `song_time`, or zero when it already passed.
    pub fn wait_for(&self, song_time: f64) -> Duration {
        let wait = song_time - self.elapsed();
        if wait > 0.0 {
            Duration::from_secs_f64(wait)
        } else {
            Duration::ZERO
        }
    }

    /// Suspend until `song_time`. Returns immediately when running late.
    pub async fn wait_until(&self, song_time: f64) -> Duration {
        let wait = self.wait_for(song_time);
        if !wait.is_zero() {
            tokio::time::sleep_until(self.origin + Duration::from_secs_f64(song_time)).await;
        }
        wait
    }
}
