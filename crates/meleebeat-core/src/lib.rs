//! Meleebeat Core - Beat-synchronized audio scheduling and timing judgement
//! for the Music Melee arena game.
//!
//! This crate provides the musical engine behind a round:
//!
//! - **Timing** - Tempo-ramping transport clock, beat time, time signatures
//! - **Scheduler** - Lookahead scheduler dispatching events with exact target times
//! - **Voice Pool** - Fixed-capacity voices and processing nodes, no allocation per note
//! - **Patterns** - Seeded block sequences and intensity-indexed progressions
//! - **Judge** - Distance from an action to the nearest subdivision, as a tier
//! - **Bridge** - Physics impacts to voice triggers, with threshold and cooldown
//! - **Score** - Scale-membership scoring with a multiplicative combo
//! - **Engine** - [`AudioEngineContext`], which owns all of the above for one round
//!
//! # Architecture
//!
//! The engine renders no audio. The host polls [`AudioEngineContext::poll`]
//! from its audio timer and receives [`VoiceTrigger`]s through a
//! [`TriggerSink`]; each carries the logical time at which it must sound.
//! Gameplay feedback is queued as [`UiEvent`]s and drained per frame.
//! All time-dependent calls take an explicit [`std::time::Instant`].

pub mod bridge;
pub mod config;
pub mod engine;
pub mod error;
pub mod judge;
pub mod music;
pub mod patterns;
pub mod round;
pub mod scheduler;
pub mod score;
pub mod sink;
pub mod spatial;
pub mod timing;
pub mod voice_pool;

pub use bridge::{BridgeOutcome, CollisionBridge, EntityId, IgnoreReason, ImpactEvent};
pub use config::EngineConfig;
pub use engine::{AudioEngineContext, EngineStats, EngineTask, HitReport, UiEvent};
pub use error::{EngineError, Result};
pub use judge::{Tier, TierTable, TimingJudge, TimingVerdict};
pub use music::{Decibels, Mode, Pitch, PitchClass, Scale, TimbreClass};
pub use patterns::{BlockConfig, BlockSequence, IntensityLevel, PatternLibrary};
pub use round::{Round, RoundPhase};
pub use scheduler::{Dispatch, EventId, LookaheadScheduler};
pub use score::{BonusTable, ScoreDelta, ScoreState, ScoreTracker};
pub use sink::{ChannelSink, TriggerSink};
pub use spatial::{ListenerPose, Vec3};
pub use timing::{BeatTime, TimeSignature, TransportClock, TransportState};
pub use voice_pool::{ExhaustionPolicy, VoiceHandle, VoicePool, VoiceTrigger};
