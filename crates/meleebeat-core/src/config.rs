//! Engine configuration.
//!
//! Stored as TOML. Every section and field has a default, so an empty
//! file (or no file) yields the stock game tuning. Durations are written
//! as humantime strings such as `"150ms"` or `"2m"`; plain numbers are
//! read as seconds.
//!
//! ```toml
//! [transport]
//! start_bpm = 100
//! ramp_target_bpm = 180
//! ramp_duration = "120s"
//!
//! [pool]
//! exhaustion = "steal-oldest"
//!
//! [judge]
//! subdivision = 2
//! perfect_ms = 30
//! ```

use crate::error::{EngineError, Result};
use crate::music::{Scale, TimbreClass};
use crate::voice_pool::ExhaustionPolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub transport: TransportConfig,
    pub scheduler: SchedulerConfig,
    pub pool: PoolConfig,
    pub judge: JudgeConfig,
    pub bridge: BridgeConfig,
    pub score: ScoreConfig,
    pub round: RoundConfig,
}

impl EngineConfig {
    /// Load and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Load a configuration file, falling back to defaults on any error.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path.as_ref()) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("Using default engine config ({:?}): {}", path.as_ref(), e);
                Self::default()
            }
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Write the configuration, creating parent directories.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        let t = &self.transport;
        for (name, bpm) in [("start_bpm", t.start_bpm), ("ramp_target_bpm", t.ramp_target_bpm)] {
            if !(bpm.is_finite() && bpm > 0.0) {
                return Err(EngineError::Config(format!("transport.{name} must be > 0, got {bpm}")));
            }
        }
        if t.beats_per_bar == 0 {
            return Err(EngineError::Config("transport.beats_per_bar must be > 0".into()));
        }
        if self.scheduler.lookahead.is_zero() {
            return Err(EngineError::Config("scheduler.lookahead must be > 0".into()));
        }
        if self.scheduler.poll_interval >= self.scheduler.lookahead {
            log::warn!(
                "scheduler.poll_interval ({:?}) is not shorter than lookahead ({:?}); notes may be late",
                self.scheduler.poll_interval,
                self.scheduler.lookahead
            );
        }

        let j = &self.judge;
        if j.subdivision == 0 {
            return Err(EngineError::Config("judge.subdivision must be > 0".into()));
        }
        if !(0.0 <= j.perfect_ms && j.perfect_ms <= j.good_ms && j.good_ms <= j.ok_ms) {
            return Err(EngineError::Config(format!(
                "judge tiers must be ascending: perfect {} <= good {} <= ok {}",
                j.perfect_ms, j.good_ms, j.ok_ms
            )));
        }

        let b = &self.bridge;
        if !(b.max_distance > 0.0) {
            return Err(EngineError::Config("bridge.max_distance must be > 0".into()));
        }
        if !(b.note_beats > 0.0) {
            return Err(EngineError::Config("bridge.note_beats must be > 0".into()));
        }

        self.score.scale()?;

        let [low, high] = self.round.intensity_thresholds;
        if !(0.0 <= low && low <= high && high <= 1.0) {
            return Err(EngineError::Config(format!(
                "round.intensity_thresholds must satisfy 0 <= {low} <= {high} <= 1"
            )));
        }
        if self.round.duration.is_zero() {
            return Err(EngineError::Config("round.duration must be > 0".into()));
        }
        Ok(())
    }
}

/// Tempo and meter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub start_bpm: f64,
    pub ramp_target_bpm: f64,
    #[serde(with = "duration_str")]
    pub ramp_duration: Duration,
    pub beats_per_bar: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            start_bpm: 100.0,
            ramp_target_bpm: 180.0,
            ramp_duration: Duration::from_secs(120),
            beats_per_bar: 4,
        }
    }
}

/// Poll cadence and lookahead window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// How often the host is expected to call `poll`.
    #[serde(with = "duration_str")]
    pub poll_interval: Duration,
    #[serde(with = "duration_str")]
    pub lookahead: Duration,
    /// Initial registry capacity.
    pub capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(25),
            lookahead: Duration::from_millis(100),
            capacity: 64,
        }
    }
}

/// Voice and node pool capacities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub sine: usize,
    pub membrane: usize,
    pub fm: usize,
    pub am: usize,
    pub pad: usize,
    pub click: usize,
    pub filters: usize,
    pub spatializers: usize,
    pub gains: usize,
    pub exhaustion: ExhaustionPolicy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            sine: 10,
            membrane: 10,
            fm: 5,
            am: 5,
            pad: 4,
            click: 2,
            filters: 30,
            spatializers: 30,
            gains: 30,
            exhaustion: ExhaustionPolicy::Skip,
        }
    }
}

impl PoolConfig {
    pub fn capacity(&self, class: TimbreClass) -> usize {
        match class {
            TimbreClass::Sine => self.sine,
            TimbreClass::Membrane => self.membrane,
            TimbreClass::Fm => self.fm,
            TimbreClass::Am => self.am,
            TimbreClass::Pad => self.pad,
            TimbreClass::Click => self.click,
        }
    }
}

/// Subdivision and tier thresholds (exclusive upper bounds in ms).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JudgeConfig {
    pub subdivision: u32,
    pub perfect_ms: f64,
    pub good_ms: f64,
    pub ok_ms: f64,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            subdivision: 2,
            perfect_ms: 30.0,
            good_ms: 60.0,
            ok_ms: 100.0,
        }
    }
}

/// Impact filtering and collision volume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Impacts slower than this are ignored.
    pub min_impact_speed: f32,
    /// Minimum interval between two triggers of one entity.
    #[serde(with = "duration_str")]
    pub cooldown: Duration,
    /// Distance at which the distance falloff bottoms out.
    pub max_distance: f32,
    pub base_db: f64,
    pub falloff_db: f64,
    pub db_per_speed: f64,
    /// Speed assumed for pointer strikes.
    pub strike_speed: f32,
    /// How long a struck block stays highlighted.
    #[serde(with = "duration_str")]
    pub flash: Duration,
    /// Sounding length of a struck note.
    pub note_beats: f64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            min_impact_speed: 2.0,
            cooldown: Duration::from_millis(150),
            max_distance: 50.0,
            base_db: -12.0,
            falloff_db: 20.0,
            db_per_speed: 2.0,
            strike_speed: 10.0,
            flash: Duration::from_millis(150),
            note_beats: 0.5,
        }
    }
}

/// Scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreConfig {
    pub base_points: u32,
    pub perfect_bonus: f64,
    pub good_bonus: f64,
    /// Root and mode, e.g. `"C lydian"`.
    pub active_scale: String,
}

impl Default for ScoreConfig {
    fn default() -> Self {
        Self {
            base_points: 10,
            perfect_bonus: 1.5,
            good_bonus: 1.2,
            active_scale: "C lydian".to_string(),
        }
    }
}

impl ScoreConfig {
    pub fn scale(&self) -> Result<Scale> {
        Scale::parse(&self.active_scale).map_err(|e| EngineError::Config(format!("score.active_scale: {e}")))
    }
}

/// Round length and content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoundConfig {
    #[serde(with = "duration_str")]
    pub duration: Duration,
    /// Blocks requested as soon as the round starts.
    pub initial_blocks: usize,
    /// Seed for block and melody randomness. Absent means OS entropy.
    pub seed: Option<u64>,
    pub sequence_length: usize,
    /// Progress values where intensity steps up.
    pub intensity_thresholds: [f64; 2],
}

impl Default for RoundConfig {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(120),
            initial_blocks: 30,
            seed: None,
            sequence_length: 150,
            intensity_thresholds: [0.3, 0.7],
        }
    }
}

/// Serde adapter for `Duration` as a humantime string or seconds.
mod duration_str {
    use serde::{de, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Seconds(f64),
        Text(String),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        match Raw::deserialize(deserializer)? {
            Raw::Seconds(s) if s.is_finite() && s >= 0.0 => Ok(Duration::from_secs_f64(s)),
            Raw::Seconds(s) => Err(de::Error::custom(format!("invalid duration {s}"))),
            Raw::Text(text) => humantime::parse_duration(&text)
                .map_err(|e| de::Error::custom(format!("invalid duration '{text}': {e}"))),
        }
    }
}
