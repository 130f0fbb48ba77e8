//! Round lifecycle: `NotStarted -> Running -> Ended`.

use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RoundPhase {
    NotStarted,
    Running,
    Ended,
}

/// Wall-clock bookkeeping for one round.
///
/// Ending is idempotent: only the first `end` after a start reports a
/// transition, so cleanup keyed on it runs once.
#[derive(Clone, Debug)]
pub struct Round {
    phase: RoundPhase,
    duration: Duration,
    started_at: Option<Instant>,
    ended_at: Option<Instant>,
}

impl Round {
    pub fn new(duration: Duration) -> Self {
        Self {
            phase: RoundPhase::NotStarted,
            duration,
            started_at: None,
            ended_at: None,
        }
    }

    /// Begin a round. A finished round may be started again.
    ///
    /// Returns false if a round is already running.
    pub fn start(&mut self, now: Instant) -> bool {
        if self.phase == RoundPhase::Running {
            return false;
        }
        self.phase = RoundPhase::Running;
        self.started_at = Some(now);
        self.ended_at = None;
        log::info!("[ROUND] Started ({:?})", self.duration);
        true
    }

    /// Finish the running round. Returns true only on the transition.
    pub fn end(&mut self, now: Instant) -> bool {
        if self.phase != RoundPhase::Running {
            return false;
        }
        self.phase = RoundPhase::Ended;
        self.ended_at = Some(now);
        log::info!("[ROUND] Ended after {:?}", self.elapsed(now));
        true
    }

    pub fn phase(&self) -> RoundPhase {
        self.phase
    }

    pub fn is_running(&self) -> bool {
        self.phase == RoundPhase::Running
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Time spent in the round; frozen once it ends.
    pub fn elapsed(&self, now: Instant) -> Duration {
        match (self.started_at, self.ended_at) {
            (Some(start), Some(end)) => end.saturating_duration_since(start),
            (Some(start), None) => now.saturating_duration_since(start),
            _ => Duration::ZERO,
        }
    }

    pub fn remaining(&self, now: Instant) -> Duration {
        self.duration.saturating_sub(self.elapsed(now))
    }

    /// Fraction of the round elapsed, in `[0, 1]`.
    pub fn progress(&self, now: Instant) -> f64 {
        self.progress_at(self.elapsed(now))
    }

    /// Fraction of the round covered after `elapsed`, in `[0, 1]`.
    pub fn progress_at(&self, elapsed: Duration) -> f64 {
        if self.duration.is_zero() {
            return 1.0;
        }
        (elapsed.as_secs_f64() / self.duration.as_secs_f64()).clamp(0.0, 1.0)
    }

    /// True once a running round has used up its duration.
    pub fn is_expired(&self, now: Instant) -> bool {
        self.is_running() && self.elapsed(now) >= self.duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle() {
        let mut round = Round::new(Duration::from_secs(120));
        let t0 = Instant::now();
        assert_eq!(round.phase(), RoundPhase::NotStarted);
        assert!(!round.end(t0));
        assert_eq!(round.progress(t0), 0.0);

        assert!(round.start(t0));
        assert!(!round.start(t0));
        assert_eq!(round.phase(), RoundPhase::Running);

        let t1 = t0 + Duration::from_secs(30);
        assert!((round.progress(t1) - 0.25).abs() < 1e-9);
        assert_eq!(round.progress_at(Duration::from_secs(60)), 0.5);
        assert_eq!(round.progress_at(Duration::from_secs(600)), 1.0);
        assert_eq!(round.remaining(t1), Duration::from_secs(90));
        assert!(!round.is_expired(t1));
        assert!(round.is_expired(t0 + Duration::from_secs(120)));

        assert!(round.end(t1));
        assert!(!round.end(t1 + Duration::from_secs(1)));
        assert_eq!(round.phase(), RoundPhase::Ended);
        assert_eq!(round.elapsed(t0 + Duration::from_secs(500)), Duration::from_secs(30));
        assert!(!round.is_expired(t0 + Duration::from_secs(500)));
    }

    #[test]
    fn test_restart_after_end() {
        let mut round = Round::new(Duration::from_secs(10));
        let t0 = Instant::now();
        round.start(t0);
        round.end(t0 + Duration::from_secs(10));
        let t1 = t0 + Duration::from_secs(20);
        assert!(round.start(t1));
        assert_eq!(round.elapsed(t1), Duration::ZERO);
    }
}
