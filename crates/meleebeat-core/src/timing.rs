//! Timing primitives for the transport and scheduler.
//!
//! This module provides the fundamental timing types used throughout the engine:
//!
//! - [`BeatTime`] - Fixed-point beat representation for deterministic ordering
//! - [`TimeSignature`] - Musical time signature (e.g., 4/4, 3/4)
//! - [`TempoRamp`] - A linear tempo change over logical time
//! - [`TransportClock`] - Tempo-ramping clock for seconds/beats/bars conversion

use crate::error::{EngineError, Result};
use std::time::Instant;

/// Fixed-point beat representation with 16 fractional bits.
///
/// Used as the ordering key for scheduled events: two events whose float
/// positions differ only by rounding noise compare equal, so registration
/// order decides between them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BeatTime {
    beats: i64,
}

impl BeatTime {
    const SCALE: i64 = 65_536;

    /// Zero beat time constant.
    pub const ZERO: BeatTime = BeatTime { beats: 0 };

    /// Create a BeatTime from a floating-point beat value.
    #[inline]
    pub fn from_float(value: f64) -> Self {
        Self {
            beats: (value * Self::SCALE as f64).round() as i64,
        }
    }

    /// Convert to a floating-point beat value.
    #[inline]
    pub fn to_float(self) -> f64 {
        self.beats as f64 / Self::SCALE as f64
    }
}

impl From<f64> for BeatTime {
    fn from(value: f64) -> Self {
        BeatTime::from_float(value)
    }
}

/// Musical time signature (numerator/denominator).
///
/// The numerator indicates beats per bar, and the denominator indicates
/// the note value that gets one beat (4 = quarter note, 8 = eighth note).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TimeSignature {
    pub numerator: u32,
    pub denominator: u32,
}

impl TimeSignature {
    /// Create a new time signature.
    ///
    /// Values are clamped to at least 1 to prevent division by zero.
    pub fn new(numerator: u32, denominator: u32) -> Self {
        Self {
            numerator: numerator.max(1),
            denominator: denominator.max(1),
        }
    }

    /// Calculate the number of quarter-note beats per bar.
    ///
    /// For 4/4: 4 beats per bar
    /// For 6/8: 3 beats per bar (6 eighth notes = 3 quarter notes)
    pub fn beats_per_bar(&self) -> f64 {
        self.numerator as f64 * (4.0 / self.denominator as f64)
    }
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self::new(4, 4)
    }
}

/// A linear tempo ramp in logical time.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TempoRamp {
    /// Tempo reached at the end of the ramp.
    pub target_bpm: f64,
    /// Ramp length in logical seconds.
    pub duration_seconds: f64,
    /// Logical time at which the ramp started.
    pub start_time: f64,
}

/// Snapshot of the transport at one instant.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TransportState {
    pub logical_time_seconds: f64,
    pub running: bool,
    pub bpm_current: f64,
    pub bpm_ramp: Option<TempoRamp>,
}

fn validate_bpm(bpm: f64) -> Result<f64> {
    if bpm.is_finite() && bpm > 0.0 {
        Ok(bpm)
    } else {
        Err(EngineError::InvalidTempo(bpm))
    }
}

/// Transport clock with a possibly ramping tempo.
///
/// The clock keeps an anchor (logical seconds, beats and tempo at a known
/// wall-clock instant). Logical time advances 1:1 with wall-clock time while
/// running. Beats are the closed-form integral of `bpm(t) / 60` from the
/// anchor, so ramps never accumulate summation drift. Any tempo change
/// re-anchors at the current position, keeping both axes continuous.
#[derive(Clone, Debug)]
pub struct TransportClock {
    signature: TimeSignature,
    running: bool,
    anchor_instant: Instant,
    anchor_seconds: f64,
    anchor_beats: f64,
    anchor_bpm: f64,
    ramp: Option<TempoRamp>,
    pending_ramp: Option<(f64, f64)>,
}

impl Default for TransportClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportClock {
    /// Create a new transport clock at 120 BPM, 4/4 time, stopped at zero.
    pub fn new() -> Self {
        Self {
            signature: TimeSignature::default(),
            running: false,
            anchor_instant: Instant::now(),
            anchor_seconds: 0.0,
            anchor_beats: 0.0,
            anchor_bpm: 120.0,
            ramp: None,
            pending_ramp: None,
        }
    }

    /// Create a stopped clock at the given tempo.
    pub fn with_bpm(bpm: f64) -> Result<Self> {
        let mut clock = Self::new();
        clock.anchor_bpm = validate_bpm(bpm)?;
        Ok(clock)
    }

    /// Return to logical time zero, stopped, keeping tempo and signature.
    pub fn reset(&mut self) {
        self.running = false;
        self.anchor_seconds = 0.0;
        self.anchor_beats = 0.0;
        self.ramp = None;
        self.pending_ramp = None;
    }

    /// Start the transport at the given instant.
    ///
    /// A ramp requested while stopped begins here.
    pub fn start(&mut self, now: Instant) {
        if self.running {
            return;
        }
        self.anchor_instant = now;
        self.running = true;
        if let Some((target_bpm, duration_seconds)) = self.pending_ramp.take() {
            self.begin_ramp(target_bpm, duration_seconds);
        }
    }

    /// Stop the transport, freezing logical time and cancelling any ramp.
    pub fn stop(&mut self, now: Instant) {
        if !self.running {
            self.pending_ramp = None;
            return;
        }
        self.rebase(now);
        self.ramp = None;
        self.pending_ramp = None;
        self.running = false;
    }

    /// Change the tempo immediately, preserving logical-time and beat continuity.
    ///
    /// An active ramp is superseded. A rejected tempo leaves the clock untouched.
    pub fn set_tempo(&mut self, bpm: f64, now: Instant) -> Result<()> {
        let bpm = validate_bpm(bpm)?;
        self.rebase(now);
        self.anchor_bpm = bpm;
        self.ramp = None;
        self.pending_ramp = None;
        Ok(())
    }

    /// Linearly ramp the tempo to `target_bpm` over `duration_seconds` of logical time.
    ///
    /// While stopped the ramp is deferred until [`start`](Self::start).
    pub fn ramp_tempo(&mut self, target_bpm: f64, duration_seconds: f64, now: Instant) -> Result<()> {
        let target_bpm = validate_bpm(target_bpm)?;
        if !duration_seconds.is_finite() || duration_seconds < 0.0 {
            return Err(EngineError::Config(format!(
                "ramp duration must be finite and >= 0, got {duration_seconds}"
            )));
        }
        if !self.running {
            log::debug!(
                "[TRANSPORT] Ramp to {target_bpm} BPM over {duration_seconds}s deferred until start"
            );
            self.pending_ramp = Some((target_bpm, duration_seconds));
            return Ok(());
        }
        self.rebase(now);
        self.begin_ramp(target_bpm, duration_seconds);
        Ok(())
    }

    fn begin_ramp(&mut self, target_bpm: f64, duration_seconds: f64) {
        if duration_seconds <= f64::EPSILON {
            self.anchor_bpm = target_bpm;
            self.ramp = None;
        } else {
            self.ramp = Some(TempoRamp {
                target_bpm,
                duration_seconds,
                start_time: self.anchor_seconds,
            });
        }
    }

    /// Move the anchor to `now` without changing any observable value.
    fn rebase(&mut self, now: Instant) {
        let seconds = self.seconds_at(now);
        let beats = self.beats_at_seconds(seconds);
        let bpm = self.bpm_at_seconds(seconds);
        self.ramp = self.ramp.and_then(|ramp| {
            let remaining = ramp.duration_seconds - (seconds - self.anchor_seconds);
            (remaining > f64::EPSILON).then_some(TempoRamp {
                target_bpm: ramp.target_bpm,
                duration_seconds: remaining,
                start_time: seconds,
            })
        });
        self.anchor_seconds = seconds;
        self.anchor_beats = beats;
        self.anchor_bpm = bpm;
        if self.running && now > self.anchor_instant {
            self.anchor_instant = now;
        }
    }

    /// Logical time in seconds at the given instant.
    pub fn seconds_at(&self, now: Instant) -> f64 {
        if !self.running || now <= self.anchor_instant {
            return self.anchor_seconds;
        }
        self.anchor_seconds + now.duration_since(self.anchor_instant).as_secs_f64()
    }

    /// Tempo at a logical time at or after the anchor.
    pub fn bpm_at_seconds(&self, seconds: f64) -> f64 {
        match self.ramp {
            Some(ramp) => {
                let x = (seconds - self.anchor_seconds).max(0.0);
                if x >= ramp.duration_seconds {
                    ramp.target_bpm
                } else {
                    self.anchor_bpm
                        + (ramp.target_bpm - self.anchor_bpm) * x / ramp.duration_seconds
                }
            }
            None => self.anchor_bpm,
        }
    }

    /// Current tempo at the given instant.
    pub fn bpm_at(&self, now: Instant) -> f64 {
        self.bpm_at_seconds(self.seconds_at(now))
    }

    /// Beats elapsed at a logical time.
    ///
    /// Times before the anchor are extrapolated at the anchor tempo.
    pub fn beats_at_seconds(&self, seconds: f64) -> f64 {
        let x = seconds - self.anchor_seconds;
        if x <= 0.0 {
            return self.anchor_beats + x * self.anchor_bpm / 60.0;
        }
        let b0 = self.anchor_bpm;
        let delta = match self.ramp {
            Some(ramp) => {
                let d = ramp.duration_seconds;
                let b1 = ramp.target_bpm;
                if x < d {
                    let slope = (b1 - b0) / d;
                    (b0 * x + 0.5 * slope * x * x) / 60.0
                } else {
                    (b0 + b1) * 0.5 * d / 60.0 + b1 * (x - d) / 60.0
                }
            }
            None => b0 * x / 60.0,
        };
        self.anchor_beats + delta
    }

    /// Logical time at which the given beat position is reached.
    pub fn seconds_at_beats(&self, beats: f64) -> f64 {
        let db = beats - self.anchor_beats;
        let b0 = self.anchor_bpm;
        if db <= 0.0 {
            return self.anchor_seconds + db * 60.0 / b0;
        }
        match self.ramp {
            Some(ramp) => {
                let d = ramp.duration_seconds;
                let b1 = ramp.target_bpm;
                let ramp_beats = (b0 + b1) * 0.5 * d / 60.0;
                if db <= ramp_beats {
                    // Solve 60*db = b0*x + slope*x^2/2 in the cancellation-free form.
                    let slope = (b1 - b0) / d;
                    let disc = (b0 * b0 + 120.0 * slope * db).max(0.0);
                    self.anchor_seconds + 120.0 * db / (b0 + disc.sqrt())
                } else {
                    self.anchor_seconds + d + (db - ramp_beats) * 60.0 / b1
                }
            }
            None => self.anchor_seconds + db * 60.0 / b0,
        }
    }

    /// Beats elapsed since logical zero at the given instant.
    pub fn beats_elapsed(&self, now: Instant) -> f64 {
        self.beats_at_seconds(self.seconds_at(now))
    }

    /// Bars elapsed since logical zero at the given instant.
    pub fn bars_elapsed(&self, now: Instant) -> f64 {
        self.beats_elapsed(now) / self.signature.beats_per_bar()
    }

    /// Calculate how many beats fit in the lookahead window starting at `now`.
    pub fn lookahead_beats(&self, now: Instant, lookahead_seconds: f64) -> f64 {
        let seconds = self.seconds_at(now);
        self.beats_at_seconds(seconds + lookahead_seconds) - self.beats_at_seconds(seconds)
    }

    /// Set the time signature.
    pub fn set_time_signature(&mut self, numerator: u32, denominator: u32) {
        self.signature = TimeSignature::new(numerator, denominator);
    }

    /// Get the current time signature.
    pub fn time_signature(&self) -> TimeSignature {
        self.signature
    }

    /// Check if the transport is running.
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Active ramp, if any.
    pub fn ramp(&self) -> Option<TempoRamp> {
        self.ramp
    }

    /// Snapshot the transport state at `now`.
    pub fn state(&self, now: Instant) -> TransportState {
        let seconds = self.seconds_at(now);
        TransportState {
            logical_time_seconds: seconds,
            running: self.running,
            bpm_current: self.bpm_at_seconds(seconds),
            bpm_ramp: self.ramp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn secs(s: f64) -> Duration {
        Duration::from_secs_f64(s)
    }

    #[test]
    fn test_beat_time_ordering() {
        let a = BeatTime::from_float(1.0);
        let b = BeatTime::from_float(1.0 + 1e-9);
        assert_eq!(a, b);
        assert!(BeatTime::from_float(0.5) < a);
        assert!((BeatTime::from_float(3.75).to_float() - 3.75).abs() < 1e-9);
    }

    #[test]
    fn test_time_signature_beats_per_bar() {
        assert!((TimeSignature::new(4, 4).beats_per_bar() - 4.0).abs() < 0.001);
        assert!((TimeSignature::new(6, 8).beats_per_bar() - 3.0).abs() < 0.001);
    }

    #[test]
    fn test_logical_time_advances_only_while_running() {
        let t0 = Instant::now();
        let mut clock = TransportClock::with_bpm(120.0).unwrap();
        assert_eq!(clock.seconds_at(t0 + secs(1.0)), 0.0);

        clock.start(t0);
        assert!((clock.seconds_at(t0 + secs(0.5)) - 0.5).abs() < 1e-9);
        assert!((clock.beats_elapsed(t0 + secs(0.5)) - 1.0).abs() < 1e-9);

        clock.stop(t0 + secs(1.0));
        assert!((clock.seconds_at(t0 + secs(5.0)) - 1.0).abs() < 1e-9);
        assert!((clock.beats_elapsed(t0 + secs(5.0)) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_set_tempo_preserves_continuity() {
        let t0 = Instant::now();
        let mut clock = TransportClock::with_bpm(60.0).unwrap();
        clock.start(t0);
        clock.set_tempo(120.0, t0 + secs(2.0)).unwrap();
        assert!((clock.beats_elapsed(t0 + secs(2.0)) - 2.0).abs() < 1e-9);
        assert!((clock.beats_elapsed(t0 + secs(3.0)) - 4.0).abs() < 1e-9);
        assert!((clock.seconds_at(t0 + secs(3.0)) - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_invalid_tempo_rejected() {
        let t0 = Instant::now();
        let mut clock = TransportClock::with_bpm(100.0).unwrap();
        clock.start(t0);
        assert!(matches!(
            clock.set_tempo(0.0, t0),
            Err(EngineError::InvalidTempo(_))
        ));
        assert!(clock.set_tempo(-5.0, t0).is_err());
        assert!(clock.set_tempo(f64::NAN, t0).is_err());
        assert!(clock.ramp_tempo(0.0, 10.0, t0).is_err());
        assert!((clock.bpm_at(t0 + secs(1.0)) - 100.0).abs() < 1e-9);
        assert!(TransportClock::with_bpm(-1.0).is_err());
    }

    #[test]
    fn test_ramp_trapezoid_closed_form() {
        let t0 = Instant::now();
        for (bpm0, bpm1, d) in [(100.0, 180.0, 120.0), (140.0, 70.0, 8.0), (90.0, 90.5, 0.25)] {
            let mut clock = TransportClock::with_bpm(bpm0).unwrap();
            clock.start(t0);
            clock.ramp_tempo(bpm1, d, t0).unwrap();
            let expected = (bpm0 + bpm1) / 2.0 * d / 60.0;
            let beats = clock.beats_elapsed(t0 + secs(d));
            assert!((beats - expected).abs() < 1e-6, "{bpm0}->{bpm1}: {beats} vs {expected}");
            assert!((clock.bpm_at(t0 + secs(d / 2.0)) - (bpm0 + bpm1) / 2.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_ramp_holds_target_after_completion() {
        let t0 = Instant::now();
        let mut clock = TransportClock::with_bpm(100.0).unwrap();
        clock.start(t0);
        clock.ramp_tempo(180.0, 10.0, t0).unwrap();
        assert!((clock.bpm_at(t0 + secs(25.0)) - 180.0).abs() < 1e-9);
        let at_end = clock.beats_elapsed(t0 + secs(10.0));
        let later = clock.beats_elapsed(t0 + secs(12.0));
        assert!((later - at_end - 6.0).abs() < 1e-6);
    }

    #[test]
    fn test_ramp_while_stopped_is_deferred() {
        let t0 = Instant::now();
        let mut clock = TransportClock::with_bpm(100.0).unwrap();
        clock.ramp_tempo(180.0, 60.0, t0).unwrap();
        assert!(clock.ramp().is_none());
        assert!((clock.bpm_at(t0 + secs(30.0)) - 100.0).abs() < 1e-9);

        let start = t0 + secs(5.0);
        clock.start(start);
        let ramp = clock.ramp().unwrap();
        assert!((ramp.start_time - 0.0).abs() < 1e-9);
        assert!((clock.bpm_at(start + secs(30.0)) - 140.0).abs() < 1e-6);
    }

    #[test]
    fn test_stop_cancels_ramp() {
        let t0 = Instant::now();
        let mut clock = TransportClock::with_bpm(100.0).unwrap();
        clock.start(t0);
        clock.ramp_tempo(200.0, 10.0, t0).unwrap();
        clock.stop(t0 + secs(5.0));
        assert!(clock.ramp().is_none());
        assert!((clock.bpm_at(t0 + secs(9.0)) - 150.0).abs() < 1e-6);
        clock.start(t0 + secs(20.0));
        assert!((clock.bpm_at(t0 + secs(30.0)) - 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_rebase_mid_ramp_is_invisible() {
        let t0 = Instant::now();
        let mut a = TransportClock::with_bpm(100.0).unwrap();
        a.start(t0);
        a.ramp_tempo(180.0, 20.0, t0).unwrap();
        let b = a.clone();
        a.rebase(t0 + secs(7.3));
        for s in [7.3, 10.0, 19.9, 20.0, 31.0] {
            assert!((a.beats_elapsed(t0 + secs(s)) - b.beats_elapsed(t0 + secs(s))).abs() < 1e-6);
        }
    }

    #[test]
    fn test_seconds_at_beats_inverts_ramp() {
        let t0 = Instant::now();
        let mut clock = TransportClock::with_bpm(100.0).unwrap();
        clock.start(t0);
        clock.ramp_tempo(60.0, 30.0, t0).unwrap();
        for s in [0.0, 0.3, 5.0, 29.0, 30.0, 45.0] {
            let beats = clock.beats_at_seconds(s);
            assert!((clock.seconds_at_beats(beats) - s).abs() < 1e-6, "s={s}");
        }
    }

    #[test]
    fn test_lookahead_beats_follows_tempo() {
        let t0 = Instant::now();
        let mut clock = TransportClock::with_bpm(120.0).unwrap();
        clock.start(t0);
        assert!((clock.lookahead_beats(t0, 0.5) - 1.0).abs() < 1e-9);
        assert!((clock.bars_elapsed(t0 + secs(4.0)) - 2.0).abs() < 1e-9);
    }
}
