//! Timing judge: distance from "now" to the nearest rhythmic subdivision.

use crate::config::JudgeConfig;
use crate::error::{EngineError, Result};
use crate::timing::TransportClock;
use std::fmt;
use std::time::Instant;

/// Discrete timing-accuracy classification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Tier {
    Perfect,
    Good,
    Ok,
    Off,
    /// The clock was stopped; no meaningful verdict exists.
    Undefined,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Tier::Perfect => "Perfect",
            Tier::Good => "Good",
            Tier::Ok => "Ok",
            Tier::Off => "Off",
            Tier::Undefined => "-",
        };
        f.write_str(name)
    }
}

/// Upper bounds (exclusive, in ms) for each tier. Anything at or above
/// `ok_ms` is [`Tier::Off`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TierTable {
    pub perfect_ms: f64,
    pub good_ms: f64,
    pub ok_ms: f64,
}

impl Default for TierTable {
    fn default() -> Self {
        Self {
            perfect_ms: 30.0,
            good_ms: 60.0,
            ok_ms: 100.0,
        }
    }
}

impl TierTable {
    pub fn classify(&self, abs_error_ms: f64) -> Tier {
        if abs_error_ms.is_nan() {
            Tier::Undefined
        } else if abs_error_ms < self.perfect_ms {
            Tier::Perfect
        } else if abs_error_ms < self.good_ms {
            Tier::Good
        } else if abs_error_ms < self.ok_ms {
            Tier::Ok
        } else {
            Tier::Off
        }
    }
}

/// Result of judging one action.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TimingVerdict {
    /// Negative when the action came before the nearest boundary.
    pub signed_error_seconds: f64,
    pub abs_error_ms: f64,
    pub tier: Tier,
    /// Half the subdivision length in ms; the largest possible error.
    pub max_error_ms: f64,
}

impl TimingVerdict {
    pub fn undefined() -> Self {
        Self {
            signed_error_seconds: f64::NAN,
            abs_error_ms: f64::NAN,
            tier: Tier::Undefined,
            max_error_ms: f64::NAN,
        }
    }

    /// 100 on the boundary, 0 exactly between two boundaries.
    pub fn accuracy_percent(&self) -> f64 {
        if self.tier == Tier::Undefined || self.max_error_ms <= 0.0 {
            return 0.0;
        }
        (100.0 - self.abs_error_ms / self.max_error_ms * 100.0).clamp(0.0, 100.0)
    }
}

/// Judges actions against a subdivision of the beat.
#[derive(Clone, Debug)]
pub struct TimingJudge {
    subdivision: u32,
    tiers: TierTable,
}

impl TimingJudge {
    /// `subdivision` is per beat: 2 judges against eighth notes in x/4.
    pub fn new(subdivision: u32, tiers: TierTable) -> Result<Self> {
        if subdivision == 0 {
            return Err(EngineError::InvalidSubdivision(subdivision));
        }
        Ok(Self { subdivision, tiers })
    }

    pub fn from_config(config: &JudgeConfig) -> Result<Self> {
        Self::new(
            config.subdivision,
            TierTable {
                perfect_ms: config.perfect_ms,
                good_ms: config.good_ms,
                ok_ms: config.ok_ms,
            },
        )
    }

    pub fn subdivision(&self) -> u32 {
        self.subdivision
    }

    pub fn tiers(&self) -> &TierTable {
        &self.tiers
    }

    /// Length of one subdivision in seconds.
    pub fn subdivision_length(&self, bpm: f64) -> Result<f64> {
        if !(bpm.is_finite() && bpm > 0.0) {
            return Err(EngineError::InvalidTempo(bpm));
        }
        Ok(60.0 / bpm / self.subdivision as f64)
    }

    /// Judge an action at logical time `seconds` under tempo `bpm`.
    pub fn judge_at(&self, seconds: f64, bpm: f64) -> Result<TimingVerdict> {
        let length = self.subdivision_length(bpm)?;
        let half = length / 2.0;
        let phase = seconds.rem_euclid(length);
        let signed_error_seconds = if phase <= half { phase } else { phase - length };

        let max_error_ms = half * 1000.0;
        // Quantized to 1us so values that are exact in decimal land on the
        // tier boundary they name.
        let abs_error_ms = ((signed_error_seconds.abs() * 1_000_000.0).round() / 1000.0).min(max_error_ms);

        Ok(TimingVerdict {
            signed_error_seconds,
            abs_error_ms,
            tier: self.tiers.classify(abs_error_ms),
            max_error_ms,
        })
    }

    /// Judge an action happening at `now` on `clock`.
    ///
    /// A stopped clock yields [`TimingVerdict::undefined`].
    pub fn judge(&self, clock: &TransportClock, now: Instant) -> TimingVerdict {
        if !clock.is_running() {
            return TimingVerdict::undefined();
        }
        let seconds = clock.seconds_at(now);
        self.judge_at(seconds, clock.bpm_at_seconds(seconds))
            .unwrap_or_else(|e| {
                log::warn!("[JUDGE] {e}");
                TimingVerdict::undefined()
            })
    }
}

impl Default for TimingJudge {
    fn default() -> Self {
        Self {
            subdivision: 2,
            tiers: TierTable::default(),
        }
    }
}
