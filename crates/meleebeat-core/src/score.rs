//! Score and combo tracking.

use crate::config::ScoreConfig;
use crate::judge::{Tier, TimingVerdict};
use crate::music::{PitchClass, Scale};

/// Multiplier applied per timing tier.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BonusTable {
    pub perfect: f64,
    pub good: f64,
}

impl Default for BonusTable {
    fn default() -> Self {
        Self {
            perfect: 1.5,
            good: 1.2,
        }
    }
}

impl BonusTable {
    pub fn bonus_for(&self, tier: Tier) -> f64 {
        match tier {
            Tier::Perfect => self.perfect,
            Tier::Good => self.good,
            Tier::Ok | Tier::Off | Tier::Undefined => 1.0,
        }
    }
}

/// Running score. `score` never drops below zero; `combo_multiplier` is
/// at least one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScoreState {
    pub score: u64,
    pub combo_multiplier: u32,
    pub max_combo_seen: u32,
}

impl Default for ScoreState {
    fn default() -> Self {
        Self {
            score: 0,
            combo_multiplier: 1,
            max_combo_seen: 1,
        }
    }
}

/// Effect of one judged hit.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScoreDelta {
    /// Signed change actually applied to the score.
    pub points: i64,
    pub in_scale: bool,
    pub bonus: f64,
    pub combo_before: u32,
    pub combo_after: u32,
    pub score_after: u64,
}

/// Applies hits to a [`ScoreState`].
#[derive(Clone, Debug)]
pub struct ScoreTracker {
    base_points: u32,
    bonuses: BonusTable,
    state: ScoreState,
}

impl ScoreTracker {
    pub fn new(base_points: u32, bonuses: BonusTable) -> Self {
        Self {
            base_points,
            bonuses,
            state: ScoreState::default(),
        }
    }

    pub fn from_config(config: &ScoreConfig) -> Self {
        Self::new(
            config.base_points,
            BonusTable {
                perfect: config.perfect_bonus,
                good: config.good_bonus,
            },
        )
    }

    /// In-scale hits earn `base * combo * bonus` (rounded) and grow the
    /// combo. Off-scale hits cost `base` and reset the combo.
    pub fn on_judged_hit(&mut self, verdict: &TimingVerdict, pitch_class: PitchClass, active_scale: &Scale) -> ScoreDelta {
        let combo_before = self.state.combo_multiplier;
        let in_scale = active_scale.contains(pitch_class);
        let bonus = self.bonuses.bonus_for(verdict.tier);

        let points = if in_scale {
            let earned = (self.base_points as f64 * combo_before as f64 * bonus).round() as u64;
            self.state.score = self.state.score.saturating_add(earned);
            self.state.combo_multiplier = combo_before.saturating_add(1);
            self.state.max_combo_seen = self.state.max_combo_seen.max(self.state.combo_multiplier);
            earned as i64
        } else {
            let lost = self.state.score.min(self.base_points as u64);
            self.state.score -= lost;
            self.state.combo_multiplier = 1;
            -(lost as i64)
        };

        ScoreDelta {
            points,
            in_scale,
            bonus: if in_scale { bonus } else { 1.0 },
            combo_before,
            combo_after: self.state.combo_multiplier,
            score_after: self.state.score,
        }
    }

    pub fn state(&self) -> ScoreState {
        self.state
    }

    pub fn reset(&mut self) {
        self.state = ScoreState::default();
    }
}

impl Default for ScoreTracker {
    fn default() -> Self {
        Self::new(10, BonusTable::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verdict(tier: Tier) -> TimingVerdict {
        TimingVerdict {
            signed_error_seconds: 0.0,
            abs_error_ms: 0.0,
            tier,
            max_error_ms: 150.0,
        }
    }

    #[test]
    fn test_perfect_streak_then_off_scale() {
        let scale = Scale::c_lydian();
        let mut tracker = ScoreTracker::default();
        let n = 6u64;
        for _ in 0..n {
            tracker.on_judged_hit(&verdict(Tier::Perfect), PitchClass::Fs, &scale);
        }
        let expected = (10.0 * 1.5 * (n * (n + 1) / 2) as f64).round() as u64;
        assert_eq!(tracker.state().score, expected);
        assert_eq!(tracker.state().combo_multiplier, n as u32 + 1);
        assert_eq!(tracker.state().max_combo_seen, n as u32 + 1);

        let delta = tracker.on_judged_hit(&verdict(Tier::Perfect), PitchClass::F, &scale);
        assert!(!delta.in_scale);
        assert_eq!(delta.points, -10);
        assert_eq!(tracker.state().combo_multiplier, 1);
        assert_eq!(tracker.state().score, expected - 10);
        assert_eq!(tracker.state().max_combo_seen, n as u32 + 1);
    }

    #[test]
    fn test_penalty_floors_at_zero() {
        let scale = Scale::c_lydian();
        let mut tracker = ScoreTracker::default();
        let delta = tracker.on_judged_hit(&verdict(Tier::Ok), PitchClass::Cs, &scale);
        assert_eq!(delta.points, 0);
        assert_eq!(tracker.state().score, 0);

        tracker.on_judged_hit(&verdict(Tier::Ok), PitchClass::C, &scale);
        assert_eq!(tracker.state().score, 10);
        let delta = tracker.on_judged_hit(&verdict(Tier::Ok), PitchClass::Cs, &scale);
        assert_eq!(delta.points, -10);
        assert_eq!(tracker.state().score, 0);
        tracker.on_judged_hit(&verdict(Tier::Off), PitchClass::Cs, &scale);
        assert_eq!(tracker.state().score, 0);
    }

    #[test]
    fn test_bonus_table() {
        let table = BonusTable::default();
        assert_eq!(table.bonus_for(Tier::Perfect), 1.5);
        assert_eq!(table.bonus_for(Tier::Good), 1.2);
        assert_eq!(table.bonus_for(Tier::Ok), 1.0);
        assert_eq!(table.bonus_for(Tier::Undefined), 1.0);

        let scale = Scale::c_lydian();
        let mut tracker = ScoreTracker::default();
        tracker.on_judged_hit(&verdict(Tier::Good), PitchClass::E, &scale);
        // Combo 2, Good: 10 * 2 * 1.2 = 24.
        let delta = tracker.on_judged_hit(&verdict(Tier::Good), PitchClass::E, &scale);
        assert_eq!(delta.points, 24);
        assert_eq!(delta.combo_before, 2);
        assert_eq!(tracker.state().score, 12 + 24);
    }
}
