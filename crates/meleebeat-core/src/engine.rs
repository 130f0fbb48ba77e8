//! The engine context: owns every component and runs a round.
//!
//! The host drives it from two cadences:
//!
//! - its audio timer calls [`AudioEngineContext::poll`] every few tens of
//!   milliseconds;
//! - its render loop forwards physics impacts, the listener pose and block
//!   positions, then drains [`UiEvent`]s once per frame.
//!
//! Nothing here blocks. Deferred work (voice release, flash revert, the
//! next bar's notes) is queued as one-shot events on the same lookahead
//! scheduler that plays the music.

use crate::bridge::{AcceptedHit, BridgeOutcome, BridgeStats, CollisionBridge, EntityId, ImpactEvent};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::judge::{Tier, TimingJudge, TimingVerdict};
use crate::music::{Decibels, Pitch, PitchClass, Scale, TimbreClass};
use crate::patterns::{round_rng, BlockConfig, BlockSequence, IntensityLevel, NoteEvent, PatternLibrary};
use crate::round::{Round, RoundPhase};
use crate::scheduler::{Dispatch, LookaheadScheduler, SchedulerStats};
use crate::score::{ScoreDelta, ScoreState, ScoreTracker};
use crate::sink::TriggerSink;
use crate::spatial::{ListenerPose, Vec3};
use crate::timing::TransportClock;
use crate::voice_pool::{ChainSpec, PoolStats, VoiceHandle, VoicePool};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::{Duration, Instant};

const METRONOME_PITCH: Pitch = Pitch {
    class: PitchClass::A,
    octave: 5,
};
const TICKER_PITCH: Pitch = Pitch {
    class: PitchClass::C,
    octave: 6,
};
const CLICK_BEATS: f64 = 0.25;
const METRONOME_START_DB: f64 = -30.0;
const METRONOME_END_DB: f64 = -6.0;
const TICKER_DB: f64 = -6.0;
const PAD_DB: f64 = -18.0;
const BASS_DB: f64 = -14.0;
const MELODY_DB: f64 = -16.0;
const PERCUSSION_DB: f64 = -12.0;

/// Work items carried by the scheduler.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum EngineTask {
    /// Click on every beat.
    Metronome,
    /// Spatialized click at the arena centre every two bars.
    Ticker,
    /// Ask the host to spawn the next block.
    SpawnBlock,
    /// Queue the notes of the bar starting one beat later.
    PrepareBar,
    /// A single backing-track note.
    Note {
        timbre: TimbreClass,
        pitch: Pitch,
        duration_beats: f64,
        velocity: f32,
        level: Decibels,
    },
    /// Return a voice to the pool once its note has finished.
    ReleaseVoice(VoiceHandle),
    /// End a block's hit highlight.
    RevertFlash(EntityId),
}

/// Messages for the UI layer, drained once per frame.
#[derive(Clone, Debug, PartialEq)]
pub enum UiEvent {
    RoundStarted,
    RoundEnded { final_score: ScoreState },
    ScoreUpdated { score: u64, combo_multiplier: u32 },
    TimingFeedback { abs_error_ms: f64, tier: Tier, accuracy_percent: f64 },
    NotePlayed { pitch: Pitch },
    BlockFlash { entity: EntityId, on: bool },
    SpawnBlock(BlockConfig),
    TickerFlash,
    TempoChanged { bpm: u32 },
}

/// Outcome of an accepted impact or strike.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HitReport {
    pub entity_id: EntityId,
    pub verdict: TimingVerdict,
    pub delta: ScoreDelta,
    /// `None` when the voice pool was exhausted and the note dropped.
    pub voice: Option<VoiceHandle>,
    pub level: Decibels,
}

/// Snapshot of every counter in the engine.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct EngineStats {
    pub pool: PoolStats,
    pub scheduler: SchedulerStats,
    pub bridge: BridgeStats,
    /// Notes lost to pool exhaustion, a refusing sink, or a poll that
    /// came too late for them.
    pub dropped_notes: u64,
    pub triggers_emitted: u64,
    /// Time from receiving the latest accepted impact to handing its
    /// trigger to the sink. Measured on the real clock (`Instant::now`),
    /// not on the `now` passed in by the host.
    pub last_trigger_latency: Option<Duration>,
}

/// Owns the clock, scheduler, pools, content, judge, bridge and score.
pub struct AudioEngineContext<S: TriggerSink> {
    config: EngineConfig,
    clock: TransportClock,
    scheduler: LookaheadScheduler<EngineTask>,
    pool: VoicePool,
    library: PatternLibrary,
    blocks: BlockSequence,
    judge: TimingJudge,
    bridge: CollisionBridge,
    score: ScoreTracker,
    active_scale: Scale,
    round: Round,
    listener: ListenerPose,
    sink: S,
    rng: StdRng,
    ui_events: Vec<UiEvent>,
    dispatch_buf: Vec<Dispatch<EngineTask>>,
    displayed_bpm: Option<u32>,
    dropped_notes: u64,
    triggers_emitted: u64,
    last_trigger_latency: Option<Duration>,
}

impl<S: TriggerSink> AudioEngineContext<S> {
    pub fn new(config: EngineConfig, sink: S) -> Result<Self> {
        config.validate()?;

        let mut rng = round_rng(config.round.seed);
        let library = PatternLibrary::new(StdRng::seed_from_u64(rng.random()));
        let blocks = BlockSequence::generate(config.round.sequence_length, &mut rng);

        let mut clock = TransportClock::with_bpm(config.transport.start_bpm)?;
        clock.set_time_signature(config.transport.beats_per_bar, 4);

        let mut bridge = CollisionBridge::new(config.bridge.clone());
        bridge.set_active(false);

        Ok(Self {
            clock,
            scheduler: LookaheadScheduler::new(
                config.scheduler.lookahead.as_secs_f64(),
                config.scheduler.capacity,
            ),
            pool: VoicePool::new(&config.pool),
            library,
            blocks,
            judge: TimingJudge::from_config(&config.judge)?,
            bridge,
            score: ScoreTracker::from_config(&config.score),
            active_scale: config.score.scale()?,
            round: Round::new(config.round.duration),
            listener: ListenerPose::default(),
            sink,
            rng,
            ui_events: Vec::with_capacity(64),
            dispatch_buf: Vec::with_capacity(config.scheduler.capacity),
            displayed_bpm: None,
            dropped_notes: 0,
            triggers_emitted: 0,
            last_trigger_latency: None,
            config,
        })
    }

    fn beats_per_bar(&self) -> f64 {
        self.clock.time_signature().beats_per_bar()
    }

    /// Reset everything and start a round at `now`.
    ///
    /// Returns false if a round is already running.
    pub fn start_round(&mut self, now: Instant) -> bool {
        if self.round.is_running() {
            return false;
        }

        self.scheduler.cancel_all();
        self.pool.release_all();
        self.bridge.clear();
        self.score.reset();
        self.library.reset();
        self.blocks = BlockSequence::generate(self.config.round.sequence_length, &mut self.rng);
        self.displayed_bpm = None;

        let transport = &self.config.transport;
        self.clock.reset();
        if let Err(e) = self.clock.set_tempo(transport.start_bpm, now) {
            log::warn!("[ROUND] {e}; keeping previous tempo");
        }
        if let Err(e) = self.clock.ramp_tempo(
            transport.ramp_target_bpm,
            transport.ramp_duration.as_secs_f64(),
            now,
        ) {
            log::warn!("[ROUND] {e}; tempo ramp disabled");
        }
        self.clock.start(now);

        let bar = self.beats_per_bar();
        let registrations = [
            (0.0, 1.0, EngineTask::Metronome),
            (0.0, 2.0 * bar, EngineTask::Ticker),
            (bar, bar, EngineTask::SpawnBlock),
            (bar - 1.0, bar, EngineTask::PrepareBar),
        ];
        for (first, period, task) in registrations {
            if let Err(e) = self.scheduler.schedule_repeating(first, period, task) {
                log::warn!("[ROUND] Could not schedule {task:?}: {e}");
            }
        }
        self.prepare_bar(0.0);

        self.round.start(now);
        self.bridge.set_active(true);
        self.ui_events.push(UiEvent::RoundStarted);
        for _ in 0..self.config.round.initial_blocks {
            let block = self.blocks.next_block_config();
            self.ui_events.push(UiEvent::SpawnBlock(block));
        }
        true
    }

    /// Finish the round: stop the clock, cancel scheduled work and free
    /// every voice. Only the first call after a start does anything.
    pub fn end_round(&mut self, now: Instant) -> bool {
        if !self.round.end(now) {
            return false;
        }
        self.bridge.set_active(false);
        self.clock.stop(now);
        self.scheduler.cancel_all();
        self.pool.release_all();
        self.ui_events.push(UiEvent::RoundEnded {
            final_score: self.score.state(),
        });
        true
    }

    /// Run one scheduler pass. Call from the host's audio timer.
    pub fn poll(&mut self, now: Instant) {
        if self.round.is_expired(now) {
            self.end_round(now);
            return;
        }

        let now_seconds = self.clock.seconds_at(now);
        let mut batch = std::mem::take(&mut self.dispatch_buf);
        self.scheduler.poll_into(&self.clock, now, &mut batch);
        for dispatch in batch.iter() {
            self.handle_task(dispatch, now_seconds);
        }
        batch.clear();
        self.dispatch_buf = batch;

        if self.clock.is_running() {
            let bpm = self.clock.bpm_at(now).round() as u32;
            if self.displayed_bpm != Some(bpm) {
                self.displayed_bpm = Some(bpm);
                self.ui_events.push(UiEvent::TempoChanged { bpm });
            }
        }
    }

    fn handle_task(&mut self, dispatch: &Dispatch<EngineTask>, now_seconds: f64) {
        let (beats, seconds) = (dispatch.target_beats, dispatch.target_seconds);
        match dispatch.payload {
            EngineTask::Metronome => {
                let level = self.metronome_level(seconds);
                self.play_note(TimbreClass::Click, METRONOME_PITCH, CLICK_BEATS, 0.8, level, None, beats, seconds);
            }
            EngineTask::Ticker => {
                let level = Decibels::new(TICKER_DB);
                self.play_note(TimbreClass::Click, TICKER_PITCH, CLICK_BEATS, 1.0, level, Some(Vec3::ZERO), beats, seconds);
                self.ui_events.push(UiEvent::TickerFlash);
            }
            EngineTask::SpawnBlock => {
                let block = self.blocks.next_block_config();
                self.ui_events.push(UiEvent::SpawnBlock(block));
            }
            EngineTask::PrepareBar => self.prepare_bar(beats + 1.0),
            EngineTask::Note {
                timbre,
                pitch,
                duration_beats,
                velocity,
                level,
            } => {
                // A note the host polled too late for is dropped, not played late.
                if now_seconds - seconds > self.scheduler.lookahead_seconds() {
                    self.dropped_notes += 1;
                    log::debug!("[SCHEDULER] Dropped late {pitch} ({timbre:?}) due at {seconds:.3}s");
                    return;
                }
                self.play_note(timbre, pitch, duration_beats, velocity, level, None, beats, seconds);
            }
            EngineTask::ReleaseVoice(handle) => {
                self.pool.release(handle);
            }
            EngineTask::RevertFlash(entity) => {
                self.ui_events.push(UiEvent::BlockFlash { entity, on: false });
            }
        }
    }

    /// Round progress at `seconds` on the transport.
    fn round_progress(&self, seconds: f64) -> f64 {
        let elapsed = Duration::try_from_secs_f64(seconds.max(0.0)).unwrap_or(Duration::MAX);
        self.round.progress_at(elapsed)
    }

    /// Metronome level ramps linearly across the round.
    fn metronome_level(&self, seconds: f64) -> Decibels {
        let progress = self.round_progress(seconds);
        Decibels::new(METRONOME_START_DB + (METRONOME_END_DB - METRONOME_START_DB) * progress)
    }

    /// Queue the backing-track notes of the bar starting at `bar_start`.
    fn prepare_bar(&mut self, bar_start: f64) {
        let progress = self.round_progress(self.clock.seconds_at_beats(bar_start));
        let level = IntensityLevel::from_progress(progress, self.config.round.intensity_thresholds);
        let bar = self.library.next_bar(level);
        let bar_beats = self.beats_per_bar();

        log::trace!("[SCHEDULER] Bar at beat {bar_start}: {} ({level:?})", bar.chord);

        let chord_notes = bar.chord.pitches().map(|pitch| NoteEvent {
            offset_beats: 0.0,
            pitch,
            duration_beats: bar_beats,
            velocity: 0.5,
        });
        let layers = chord_notes
            .map(|n| (TimbreClass::Pad, PAD_DB, n))
            .chain(bar.bass.iter().map(|n| (TimbreClass::Am, BASS_DB, *n)))
            .chain(bar.melody.iter().map(|n| (TimbreClass::Fm, MELODY_DB, *n)))
            .chain(bar.percussion.iter().map(|n| (TimbreClass::Membrane, PERCUSSION_DB, *n)));

        for (timbre, db, note) in layers {
            self.scheduler.schedule_once(
                bar_start + note.offset_beats,
                EngineTask::Note {
                    timbre,
                    pitch: note.pitch,
                    duration_beats: note.duration_beats,
                    velocity: note.velocity,
                    level: Decibels::new(db),
                },
            );
        }
    }

    /// Acquire, route and trigger a voice, then queue its release.
    #[allow(clippy::too_many_arguments)]
    fn play_note(
        &mut self,
        timbre: TimbreClass,
        pitch: Pitch,
        duration_beats: f64,
        velocity: f32,
        level: Decibels,
        position: Option<Vec3>,
        target_beats: f64,
        target_seconds: f64,
    ) -> Option<VoiceHandle> {
        let Some(handle) = self.pool.acquire(timbre, target_beats) else {
            self.dropped_notes += 1;
            log::debug!("[POOL] Dropped {pitch} ({timbre:?}): no free voice");
            return None;
        };

        let chain = ChainSpec {
            filter_cutoff_hz: None,
            position,
            gain: level,
        };
        let end_beats = target_beats + duration_beats;
        let duration_seconds = (self.clock.seconds_at_beats(end_beats) - target_seconds).max(0.0);
        let trigger = self
            .pool
            .build_chain(handle, chain)
            .and_then(|_| self.pool.trigger(handle, pitch, duration_seconds, velocity, target_seconds));

        match trigger {
            Ok(trigger) => {
                if self.sink.submit(trigger) {
                    self.triggers_emitted += 1;
                } else {
                    self.dropped_notes += 1;
                }
                self.scheduler.schedule_once(end_beats, EngineTask::ReleaseVoice(handle));
                Some(handle)
            }
            Err(e) => {
                log::warn!("[POOL] Trigger failed: {e}");
                self.pool.release(handle);
                self.dropped_notes += 1;
                None
            }
        }
    }

    /// Feed a physics impact. Returns a report for accepted hits; every
    /// impact is ignored unless a round is running.
    ///
    /// `entity_position` overrides the block position last reported via
    /// [`set_entity_position`](Self::set_entity_position).
    pub fn on_impact(&mut self, event: &ImpactEvent, entity_position: Option<Vec3>, now: Instant) -> Option<HitReport> {
        let received = Instant::now();
        match self.bridge.on_impact(event, entity_position, &self.listener, now) {
            BridgeOutcome::Accepted(hit) => Some(self.play_hit(hit, now, received)),
            BridgeOutcome::Ignored(_) => None,
        }
    }

    /// Pointer "click to play" on a block. Ignored outside a round.
    pub fn strike(&mut self, entity: EntityId, now: Instant) -> Option<HitReport> {
        let received = Instant::now();
        match self.bridge.strike(entity, &self.listener, now) {
            BridgeOutcome::Accepted(hit) => Some(self.play_hit(hit, now, received)),
            BridgeOutcome::Ignored(_) => None,
        }
    }

    fn play_hit(&mut self, hit: AcceptedHit, now: Instant, received: Instant) -> HitReport {
        // A block is monophonic: a new hit cuts its previous note.
        if let Some(previous) = hit.previous_voice {
            self.pool.release(previous);
        }

        let seconds = self.clock.seconds_at(now);
        let beats = self.clock.beats_at_seconds(seconds);
        let voice = self.play_note(
            hit.block.timbre,
            hit.block.pitch,
            self.config.bridge.note_beats,
            1.0,
            hit.level,
            Some(hit.position),
            beats,
            seconds,
        );
        if voice.is_some() {
            self.last_trigger_latency = Some(received.elapsed());
        }
        self.bridge.set_voice(hit.entity_id, voice);

        self.ui_events.push(UiEvent::BlockFlash {
            entity: hit.entity_id,
            on: true,
        });
        let flash_end = self.clock.beats_at_seconds(seconds + self.config.bridge.flash.as_secs_f64());
        self.scheduler.schedule_once(flash_end, EngineTask::RevertFlash(hit.entity_id));

        let verdict = self.judge.judge(&self.clock, now);
        let delta = self.score.on_judged_hit(&verdict, hit.block.pitch_class(), &self.active_scale);
        self.ui_events.push(UiEvent::TimingFeedback {
            abs_error_ms: verdict.abs_error_ms,
            tier: verdict.tier,
            accuracy_percent: verdict.accuracy_percent(),
        });
        self.ui_events.push(UiEvent::ScoreUpdated {
            score: delta.score_after,
            combo_multiplier: delta.combo_after,
        });
        self.ui_events.push(UiEvent::NotePlayed {
            pitch: hit.block.pitch,
        });

        HitReport {
            entity_id: hit.entity_id,
            verdict,
            delta,
            voice,
            level: hit.level,
        }
    }

    /// Register a spawned block with the bridge.
    pub fn attach_block(&mut self, entity: EntityId, block: BlockConfig, position: Vec3) {
        self.bridge.register(entity, block, position);
    }

    pub fn detach_block(&mut self, entity: EntityId) {
        if let Some(audio) = self.bridge.unregister(entity) {
            if let Some(voice) = audio.voice {
                self.pool.release(voice);
            }
        }
    }

    /// Identify the player body; only its contacts are judged.
    pub fn set_player(&mut self, player: EntityId) {
        self.bridge.set_player(player);
    }

    /// Per-frame listener pose from the camera.
    pub fn set_listener_pose(&mut self, pose: ListenerPose) {
        self.listener = pose;
    }

    /// Per-frame block position. Also moves a still-sounding voice.
    pub fn set_entity_position(&mut self, entity: EntityId, position: Vec3) {
        if !self.bridge.set_position(entity, position) {
            return;
        }
        if let Some(voice) = self.bridge.entity(entity).and_then(|audio| audio.voice) {
            // Stale once the note has been released; nothing to move then.
            let _ = self.pool.set_position(voice, position);
        }
    }

    pub fn drain_ui_events(&mut self) -> std::vec::Drain<'_, UiEvent> {
        self.ui_events.drain(..)
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            pool: self.pool.stats(),
            scheduler: self.scheduler.stats(),
            bridge: self.bridge.stats(),
            dropped_notes: self.dropped_notes,
            triggers_emitted: self.triggers_emitted,
            last_trigger_latency: self.last_trigger_latency,
        }
    }

    pub fn round_phase(&self) -> RoundPhase {
        self.round.phase()
    }

    pub fn round(&self) -> &Round {
        &self.round
    }

    pub fn score(&self) -> ScoreState {
        self.score.state()
    }

    pub fn clock(&self) -> &TransportClock {
        &self.clock
    }

    pub fn pool(&self) -> &VoicePool {
        &self.pool
    }

    pub fn scheduler(&self) -> &LookaheadScheduler<EngineTask> {
        &self.scheduler
    }

    pub fn blocks(&self) -> &BlockSequence {
        &self.blocks
    }

    pub fn listener(&self) -> &ListenerPose {
        &self.listener
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }
}
