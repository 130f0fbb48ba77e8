//! Fixed-capacity voice and processing-node pools.
//!
//! Every voice and node is constructed up front. Callers check a voice out
//! for the length of one note and hand it back afterwards, so the hot path
//! never allocates. Acquisition is an O(n) scan over a small array.
//!
//! When a class runs dry the configured [`ExhaustionPolicy`] decides
//! between skipping the request and stealing the least-recently-acquired
//! slot; either way the event is counted in [`PoolStats`].

use crate::config::PoolConfig;
use crate::error::{EngineError, Result};
use crate::music::{clamp_velocity, Decibels, Pitch, TimbreClass};
use crate::spatial::Vec3;
use serde::{Deserialize, Serialize};

/// What to do when a timbre class has no free voice.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExhaustionPolicy {
    /// Return no voice; the note is dropped.
    #[default]
    Skip,
    /// Reuse the least-recently-acquired voice of the class.
    StealOldest,
}

/// Kind of processing node in a voice chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Filter,
    Spatializer,
    Gain,
}

/// A checked-out voice.
///
/// The generation makes handles single-use: once the slot is released or
/// stolen, operations on the old handle fail with [`EngineError::StaleHandle`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VoiceHandle {
    slot: usize,
    timbre: TimbreClass,
    generation: u32,
}

impl VoiceHandle {
    pub fn pool_slot_index(&self) -> usize {
        self.slot
    }

    pub fn timbre_class(&self) -> TimbreClass {
        self.timbre
    }
}

/// Requested processing for a voice. `None` stages are bypassed.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ChainSpec {
    pub filter_cutoff_hz: Option<f32>,
    pub position: Option<Vec3>,
    pub gain: Decibels,
}

impl Default for ChainSpec {
    fn default() -> Self {
        Self {
            filter_cutoff_hz: None,
            position: None,
            gain: Decibels::CEILING,
        }
    }
}

/// The node slots a voice is currently routed through, ending at the limiter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Route {
    pub filter: Option<usize>,
    pub spatializer: Option<usize>,
    pub gain: Option<usize>,
}

/// A request for the audio backend to produce one note.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VoiceTrigger {
    pub timbre_class: TimbreClass,
    pub slot: usize,
    pub pitch: Pitch,
    pub frequency_hz: f64,
    pub duration_seconds: f64,
    pub velocity: f32,
    /// Logical time at which the note should start.
    pub target_time: f64,
    pub level: Decibels,
    pub route: Route,
}

/// Pool counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub acquired: u64,
    pub released: u64,
    /// Requests that found no free voice.
    pub exhausted: u64,
    /// Exhausted requests satisfied by stealing.
    pub stolen: u64,
    /// Chain stages bypassed because a node pool ran dry.
    pub node_exhausted: u64,
}

#[derive(Clone, Debug)]
struct VoiceSlot {
    in_use: bool,
    generation: u32,
    acquired_at_beats: f64,
    acquire_seq: u64,
    route: Route,
    level: Decibels,
    release_at_seconds: Option<f64>,
}

impl VoiceSlot {
    fn new() -> Self {
        Self {
            in_use: false,
            generation: 0,
            acquired_at_beats: 0.0,
            acquire_seq: 0,
            route: Route::default(),
            level: Decibels::CEILING,
            release_at_seconds: None,
        }
    }
}

struct NodePool<T> {
    kind: NodeKind,
    slots: Vec<(bool, T)>,
}

impl<T: Default> NodePool<T> {
    fn new(kind: NodeKind, capacity: usize) -> Self {
        Self {
            kind,
            slots: (0..capacity).map(|_| (false, T::default())).collect(),
        }
    }

    fn acquire(&mut self) -> Result<usize> {
        let index = self
            .slots
            .iter()
            .position(|(used, _)| !used)
            .ok_or(EngineError::NodePoolExhausted { kind: self.kind })?;
        self.slots[index].0 = true;
        Ok(index)
    }

    fn release(&mut self, index: usize) {
        if let Some(slot) = self.slots.get_mut(index) {
            slot.0 = false;
        }
    }

    fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.slots.get_mut(index).map(|(_, node)| node)
    }

    fn get(&self, index: usize) -> Option<&T> {
        self.slots.get(index).map(|(_, node)| node)
    }

    fn in_use(&self) -> usize {
        self.slots.iter().filter(|(used, _)| *used).count()
    }
}

/// Filter node parameters.
#[derive(Clone, Copy, Debug, Default)]
pub struct FilterNode {
    pub cutoff_hz: f32,
}

/// Spatializer parameters. The render loop overwrites `position` each frame.
#[derive(Clone, Copy, Debug, Default)]
pub struct SpatialNode {
    pub position: Vec3,
}

/// Gain node parameters.
#[derive(Clone, Copy, Debug, Default)]
pub struct GainNode {
    pub level: Decibels,
}

/// Pre-constructed voices grouped by timbre class plus shared node pools.
pub struct VoicePool {
    voices: [Vec<VoiceSlot>; TimbreClass::ALL.len()],
    filters: NodePool<FilterNode>,
    spatializers: NodePool<SpatialNode>,
    gains: NodePool<GainNode>,
    policy: ExhaustionPolicy,
    acquire_counter: u64,
    stats: PoolStats,
}

impl VoicePool {
    pub fn new(config: &PoolConfig) -> Self {
        Self {
            voices: TimbreClass::ALL.map(|class| vec![VoiceSlot::new(); config.capacity(class)]),
            filters: NodePool::new(NodeKind::Filter, config.filters),
            spatializers: NodePool::new(NodeKind::Spatializer, config.spatializers),
            gains: NodePool::new(NodeKind::Gain, config.gains),
            policy: config.exhaustion,
            acquire_counter: 0,
            stats: PoolStats::default(),
        }
    }

    /// Check out a voice of the given class.
    ///
    /// Returns `None` when the class is exhausted and the policy is `Skip`.
    pub fn acquire(&mut self, class: TimbreClass, now_beats: f64) -> Option<VoiceHandle> {
        let free = self.voices[class.index()].iter().position(|slot| !slot.in_use);
        let index = match free {
            Some(index) => index,
            None => {
                self.stats.exhausted += 1;
                match self.policy {
                    ExhaustionPolicy::Skip => {
                        log::debug!("[POOL] {:?} exhausted; request skipped", class);
                        return None;
                    }
                    ExhaustionPolicy::StealOldest => {
                        let oldest = self.voices[class.index()]
                            .iter()
                            .enumerate()
                            .min_by_key(|(_, slot)| slot.acquire_seq)
                            .map(|(index, _)| index)?;
                        log::debug!("[POOL] {:?} exhausted; stealing slot {}", class, oldest);
                        self.free_slot(class, oldest);
                        self.stats.stolen += 1;
                        oldest
                    }
                }
            }
        };

        self.acquire_counter += 1;
        let slot = &mut self.voices[class.index()][index];
        slot.in_use = true;
        slot.generation = slot.generation.wrapping_add(1);
        slot.acquired_at_beats = now_beats;
        slot.acquire_seq = self.acquire_counter;
        slot.release_at_seconds = None;
        slot.level = Decibels::CEILING;
        self.stats.acquired += 1;
        Some(VoiceHandle {
            slot: index,
            timbre: class,
            generation: slot.generation,
        })
    }

    /// Like [`acquire`](Self::acquire) but reports exhaustion as an error.
    pub fn acquire_or_err(&mut self, class: TimbreClass, now_beats: f64) -> Result<VoiceHandle> {
        self.acquire(class, now_beats)
            .ok_or(EngineError::PoolExhausted { class })
    }

    fn slot(&self, handle: VoiceHandle) -> Result<&VoiceSlot> {
        self.voices[handle.timbre.index()]
            .get(handle.slot)
            .filter(|slot| slot.in_use && slot.generation == handle.generation)
            .ok_or(EngineError::StaleHandle)
    }

    fn slot_mut(&mut self, handle: VoiceHandle) -> Result<&mut VoiceSlot> {
        self.voices[handle.timbre.index()]
            .get_mut(handle.slot)
            .filter(|slot| slot.in_use && slot.generation == handle.generation)
            .ok_or(EngineError::StaleHandle)
    }

    fn release_route(&mut self, route: Route) {
        if let Some(i) = route.filter {
            self.filters.release(i);
        }
        if let Some(i) = route.spatializer {
            self.spatializers.release(i);
        }
        if let Some(i) = route.gain {
            self.gains.release(i);
        }
    }

    fn free_slot(&mut self, class: TimbreClass, index: usize) {
        let slot = &mut self.voices[class.index()][index];
        let route = std::mem::take(&mut slot.route);
        slot.in_use = false;
        slot.release_at_seconds = None;
        self.release_route(route);
        self.stats.released += 1;
    }

    /// Disconnect the voice's previous routing and reconnect it through
    /// pooled nodes ending at the shared limiter.
    ///
    /// A stage whose node pool is exhausted is bypassed and counted.
    pub fn build_chain(&mut self, handle: VoiceHandle, spec: ChainSpec) -> Result<Route> {
        let previous = self.slot(handle)?.route;
        self.release_route(previous);

        let mut route = Route::default();
        if let Some(cutoff_hz) = spec.filter_cutoff_hz {
            route.filter = self.checkout(NodeKind::Filter);
            if let Some(node) = route.filter.and_then(|i| self.filters.get_mut(i)) {
                node.cutoff_hz = cutoff_hz;
            }
        }
        if let Some(position) = spec.position {
            route.spatializer = self.checkout(NodeKind::Spatializer);
            if let Some(node) = route.spatializer.and_then(|i| self.spatializers.get_mut(i)) {
                node.position = position;
            }
        }
        route.gain = self.checkout(NodeKind::Gain);
        if let Some(node) = route.gain.and_then(|i| self.gains.get_mut(i)) {
            node.level = spec.gain;
        }

        let slot = self.slot_mut(handle)?;
        slot.route = route;
        slot.level = spec.gain;
        Ok(route)
    }

    fn checkout(&mut self, kind: NodeKind) -> Option<usize> {
        let result = match kind {
            NodeKind::Filter => self.filters.acquire(),
            NodeKind::Spatializer => self.spatializers.acquire(),
            NodeKind::Gain => self.gains.acquire(),
        };
        match result {
            Ok(index) => Some(index),
            Err(e) => {
                self.stats.node_exhausted += 1;
                log::debug!("[POOL] {e}; stage bypassed");
                None
            }
        }
    }

    /// Request a note on a checked-out voice at `target_time`.
    ///
    /// Records `target_time + duration` as the slot's release deadline; the
    /// caller schedules the matching release.
    pub fn trigger(
        &mut self,
        handle: VoiceHandle,
        pitch: Pitch,
        duration_seconds: f64,
        velocity: f32,
        target_time: f64,
    ) -> Result<VoiceTrigger> {
        let duration_seconds = duration_seconds.max(0.0);
        let slot = self.slot_mut(handle)?;
        slot.release_at_seconds = Some(target_time + duration_seconds);
        Ok(VoiceTrigger {
            timbre_class: handle.timbre,
            slot: handle.slot,
            pitch,
            frequency_hz: pitch.frequency_hz(),
            duration_seconds,
            velocity: clamp_velocity(velocity),
            target_time,
            level: slot.level,
            route: slot.route,
        })
    }

    /// Return a voice and its nodes to the pool.
    ///
    /// Returns false for a stale handle (already released or stolen).
    pub fn release(&mut self, handle: VoiceHandle) -> bool {
        if self.slot(handle).is_err() {
            return false;
        }
        self.free_slot(handle.timbre, handle.slot);
        true
    }

    /// Release every voice, e.g. at round end.
    pub fn release_all(&mut self) {
        for class in TimbreClass::ALL {
            for index in 0..self.voices[class.index()].len() {
                if self.voices[class.index()][index].in_use {
                    self.free_slot(class, index);
                }
            }
        }
    }

    /// Overwrite the spatializer position of a voice (last writer wins).
    pub fn set_position(&mut self, handle: VoiceHandle, position: Vec3) -> Result<()> {
        let route = self.slot(handle)?.route;
        if let Some(node) = route.spatializer.and_then(|i| self.spatializers.get_mut(i)) {
            node.position = position;
        }
        Ok(())
    }

    /// Current spatializer position of a voice, if it has one.
    pub fn position(&self, handle: VoiceHandle) -> Option<Vec3> {
        let route = self.slot(handle).ok()?.route;
        route
            .spatializer
            .and_then(|i| self.spatializers.get(i))
            .map(|node| node.position)
    }

    pub fn is_in_use(&self, handle: VoiceHandle) -> bool {
        self.slot(handle).is_ok()
    }

    /// Beat position at which the voice was checked out.
    pub fn acquired_at_beats(&self, handle: VoiceHandle) -> Option<f64> {
        self.slot(handle).ok().map(|slot| slot.acquired_at_beats)
    }

    /// Logical time the current note on this voice ends.
    pub fn release_deadline(&self, handle: VoiceHandle) -> Option<f64> {
        self.slot(handle).ok().and_then(|slot| slot.release_at_seconds)
    }

    pub fn in_use_count(&self, class: TimbreClass) -> usize {
        self.voices[class.index()].iter().filter(|s| s.in_use).count()
    }

    pub fn capacity(&self, class: TimbreClass) -> usize {
        self.voices[class.index()].len()
    }

    pub fn nodes_in_use(&self, kind: NodeKind) -> usize {
        match kind {
            NodeKind::Filter => self.filters.in_use(),
            NodeKind::Spatializer => self.spatializers.in_use(),
            NodeKind::Gain => self.gains.in_use(),
        }
    }

    pub fn policy(&self) -> ExhaustionPolicy {
        self.policy
    }

    pub fn stats(&self) -> PoolStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::music::PitchClass;
    use std::collections::HashSet;

    fn small_pool(policy: ExhaustionPolicy) -> VoicePool {
        VoicePool::new(&PoolConfig {
            membrane: 3,
            filters: 2,
            spatializers: 2,
            gains: 2,
            exhaustion: policy,
            ..PoolConfig::default()
        })
    }

    #[test]
    fn test_no_double_checkout_under_skip() {
        let mut pool = small_pool(ExhaustionPolicy::Skip);
        let mut held = Vec::new();
        for i in 0..5 {
            if let Some(handle) = pool.acquire(TimbreClass::Membrane, i as f64) {
                held.push(handle);
            }
        }
        assert_eq!(held.len(), 3);
        let slots: HashSet<_> = held.iter().map(|h| h.pool_slot_index()).collect();
        assert_eq!(slots.len(), 3);
        assert_eq!(pool.in_use_count(TimbreClass::Membrane), 3);
        assert_eq!(pool.stats().exhausted, 2);
        assert!(matches!(
            pool.acquire_or_err(TimbreClass::Membrane, 0.0),
            Err(EngineError::PoolExhausted { class: TimbreClass::Membrane })
        ));
    }

    #[test]
    fn test_steal_oldest_invalidates_previous_handle() {
        let mut pool = small_pool(ExhaustionPolicy::StealOldest);
        let first = pool.acquire(TimbreClass::Membrane, 0.0).unwrap();
        let _second = pool.acquire(TimbreClass::Membrane, 1.0).unwrap();
        let _third = pool.acquire(TimbreClass::Membrane, 2.0).unwrap();

        let stolen = pool.acquire(TimbreClass::Membrane, 3.0).unwrap();
        assert_eq!(stolen.pool_slot_index(), first.pool_slot_index());
        assert!(!pool.is_in_use(first));
        assert!(pool.is_in_use(stolen));
        assert!(!pool.release(first));
        assert_eq!(pool.in_use_count(TimbreClass::Membrane), 3);
        assert_eq!(pool.stats().stolen, 1);
        assert_eq!(pool.acquired_at_beats(stolen), Some(3.0));
    }

    #[test]
    fn test_release_frees_slot_once() {
        let mut pool = small_pool(ExhaustionPolicy::Skip);
        let handle = pool.acquire(TimbreClass::Membrane, 0.0).unwrap();
        assert!(pool.release(handle));
        assert!(!pool.is_in_use(handle));
        assert!(!pool.release(handle));
        assert_eq!(pool.in_use_count(TimbreClass::Membrane), 0);

        // A new checkout of the same slot is not affected by the old handle.
        let again = pool.acquire(TimbreClass::Membrane, 1.0).unwrap();
        assert_eq!(again.pool_slot_index(), handle.pool_slot_index());
        assert!(!pool.release(handle));
        assert!(pool.is_in_use(again));
    }

    #[test]
    fn test_build_chain_reroutes_and_returns_nodes() {
        let mut pool = small_pool(ExhaustionPolicy::Skip);
        let handle = pool.acquire(TimbreClass::Membrane, 0.0).unwrap();
        let spec = ChainSpec {
            filter_cutoff_hz: Some(400.0),
            position: Some(Vec3::new(1.0, 0.0, 0.0)),
            gain: Decibels::new(-12.0),
        };
        let route = pool.build_chain(handle, spec).unwrap();
        assert!(route.filter.is_some() && route.spatializer.is_some() && route.gain.is_some());
        assert_eq!(pool.nodes_in_use(NodeKind::Filter), 1);

        // Rebuilding releases the previous nodes first.
        pool.build_chain(handle, spec).unwrap();
        assert_eq!(pool.nodes_in_use(NodeKind::Filter), 1);
        assert_eq!(pool.nodes_in_use(NodeKind::Gain), 1);

        pool.release(handle);
        assert_eq!(pool.nodes_in_use(NodeKind::Filter), 0);
        assert_eq!(pool.nodes_in_use(NodeKind::Spatializer), 0);
    }

    #[test]
    fn test_node_exhaustion_bypasses_stage() {
        let mut pool = small_pool(ExhaustionPolicy::Skip);
        let spec = ChainSpec {
            filter_cutoff_hz: Some(400.0),
            ..ChainSpec::default()
        };
        let handles: Vec<_> = (0..3)
            .map(|_| pool.acquire(TimbreClass::Membrane, 0.0).unwrap())
            .collect();
        let routes: Vec<_> = handles
            .iter()
            .map(|h| pool.build_chain(*h, spec).unwrap())
            .collect();
        assert!(routes[2].filter.is_none());
        assert!(routes[2].gain.is_none());
        assert_eq!(pool.stats().node_exhausted, 2);
    }

    #[test]
    fn test_trigger_records_deadline_and_clamps() {
        let mut pool = small_pool(ExhaustionPolicy::Skip);
        let handle = pool.acquire(TimbreClass::Membrane, 0.0).unwrap();
        let pitch = Pitch::new(PitchClass::A, 4);
        let trigger = pool.trigger(handle, pitch, 0.25, 1.5, 2.0).unwrap();
        assert_eq!(trigger.velocity, 1.0);
        assert!((trigger.frequency_hz - 440.0).abs() < 1e-9);
        assert_eq!(pool.release_deadline(handle), Some(2.25));

        pool.release(handle);
        assert!(matches!(
            pool.trigger(handle, pitch, 0.25, 0.5, 3.0),
            Err(EngineError::StaleHandle)
        ));
    }

    #[test]
    fn test_set_position_last_writer_wins() {
        let mut pool = small_pool(ExhaustionPolicy::Skip);
        let handle = pool.acquire(TimbreClass::Membrane, 0.0).unwrap();
        pool.build_chain(
            handle,
            ChainSpec {
                position: Some(Vec3::ZERO),
                ..ChainSpec::default()
            },
        )
        .unwrap();
        pool.set_position(handle, Vec3::new(1.0, 2.0, 3.0)).unwrap();
        pool.set_position(handle, Vec3::new(4.0, 5.0, 6.0)).unwrap();
        assert_eq!(pool.position(handle), Some(Vec3::new(4.0, 5.0, 6.0)));
    }

    #[test]
    fn test_release_all() {
        let mut pool = small_pool(ExhaustionPolicy::Skip);
        for _ in 0..3 {
            pool.acquire(TimbreClass::Membrane, 0.0);
        }
        pool.acquire(TimbreClass::Pad, 0.0);
        pool.release_all();
        assert_eq!(pool.in_use_count(TimbreClass::Membrane), 0);
        assert_eq!(pool.in_use_count(TimbreClass::Pad), 0);
    }
}
