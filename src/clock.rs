//! Monotonic animation clock

use std::time::{Duration, Instant};

/// Elapsed animation time that can be paused
///
/// Time is sampled once per frame with [`FrameClock::sample`]; everything
/// drawn in that frame sees the same value.
#[derive(Debug, Clone)]
pub struct FrameClock {
    start: Instant,
    /// Time spent paused before the current pause, if any
    paused_total: Duration,
    paused_at: Option<Instant>,
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameClock {
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    fn starting_at(start: Instant) -> Self {
        Self {
            start,
            paused_total: Duration::ZERO,
            paused_at: None,
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused_at.is_some()
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.set_paused_at(paused, Instant::now());
    }

    pub fn toggle_pause(&mut self) {
        let paused = !self.is_paused();
        self.set_paused(paused);
    }

    fn set_paused_at(&mut self, paused: bool, now: Instant) {
        match (paused, self.paused_at) {
            (true, None) => self.paused_at = Some(now),
            (false, Some(since)) => {
                self.paused_total += now.saturating_duration_since(since);
                self.paused_at = None;
            }
            _ => {}
        }
    }

    /// Seconds since start, excluding paused time
    pub fn sample(&self) -> f32 {
        self.sample_at(Instant::now())
    }

    fn sample_at(&self, now: Instant) -> f32 {
        let now = self.paused_at.unwrap_or(now);
        now.saturating_duration_since(self.start)
            .saturating_sub(self.paused_total)
            .as_secs_f32()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_advances_while_running() {
        let start = Instant::now();
        let clock = FrameClock::starting_at(start);
        assert_eq!(clock.sample_at(start), 0.0);
        assert!((clock.sample_at(start + Duration::from_millis(1500)) - 1.5).abs() < 1e-6);
    }

    #[test]
    fn test_paused_time_is_excluded() {
        let start = Instant::now();
        let mut clock = FrameClock::starting_at(start);

        clock.set_paused_at(true, start + Duration::from_secs(1));
        assert!(clock.is_paused());
        assert!((clock.sample_at(start + Duration::from_secs(5)) - 1.0).abs() < 1e-6);

        clock.set_paused_at(false, start + Duration::from_secs(3));
        assert!(!clock.is_paused());
        assert!((clock.sample_at(start + Duration::from_secs(4)) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_repeated_pause_keeps_first_instant() {
        let start = Instant::now();
        let mut clock = FrameClock::starting_at(start);
        clock.set_paused_at(true, start + Duration::from_secs(1));
        clock.set_paused_at(true, start + Duration::from_secs(2));
        assert!((clock.sample_at(start + Duration::from_secs(9)) - 1.0).abs() < 1e-6);
    }
}
