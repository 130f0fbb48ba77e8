//! Beat-based lookahead scheduler.
//!
//! The scheduler owns a registry of repeating and one-shot events. The host
//! polls it on its own timer; each poll collects every occurrence whose
//! beat position falls inside `[now, now + lookahead]` and hands it back
//! with its *target* time, never the poll time, so the audio backend can
//! render it sample-accurately regardless of poll jitter.
//!
//! # Ordering
//!
//! Within one poll, dispatches are sorted by beat position (quantized to
//! [`BeatTime`]); ties keep registration order.
//!
//! # Cancellation
//!
//! [`LookaheadScheduler::cancel`] removes an event from the registry. A
//! dispatch already collected into the current poll's batch is not
//! recalled, so a cancelled event can fire at most one more time.

use crate::error::{EngineError, Result};
use crate::timing::{BeatTime, TransportClock};
use std::time::Instant;

/// Upper bound on occurrences of a single repeating event per poll.
const MAX_OCCURRENCES_PER_POLL: usize = 2048;

/// Identifier of a registered event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventId(u64);

impl EventId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// How an event recurs.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum EventKind {
    /// Fires every `period_beats`.
    Repeating { period_beats: f64 },
    /// Fires once at `at_beats`, then is removed.
    OneShot { at_beats: f64 },
}

/// An entry in the scheduler registry.
#[derive(Clone, Debug)]
pub struct ScheduledEvent<P> {
    pub id: EventId,
    pub kind: EventKind,
    pub next_fire_beats: f64,
    pub payload: P,
    /// Registration sequence number, used for FIFO tie-breaking.
    seq: u64,
}

/// One occurrence handed back by a poll.
#[derive(Clone, Debug, PartialEq)]
pub struct Dispatch<P> {
    pub id: EventId,
    /// Beat position at which the event should sound.
    pub target_beats: f64,
    /// Logical time in seconds at which the event should sound.
    pub target_seconds: f64,
    pub payload: P,
}

/// Scheduler counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Total occurrences dispatched.
    pub dispatched: u64,
    /// Repeating occurrences that were already in the past when polled.
    pub late_skipped: u64,
    /// Successful cancellations.
    pub cancelled: u64,
}

/// Lookahead scheduler for beat-positioned events.
pub struct LookaheadScheduler<P> {
    events: Vec<ScheduledEvent<P>>,
    lookahead_seconds: f64,
    next_id: u64,
    next_seq: u64,
    /// Pre-allocated scratch for sorting due occurrences: (key, seq, event index, beats).
    due_scratch: Vec<(BeatTime, u64, usize, f64)>,
    /// Indices of one-shot events to remove after a poll.
    remove_scratch: Vec<usize>,
    stats: SchedulerStats,
}

impl<P: Clone> LookaheadScheduler<P> {
    /// Create a scheduler with the given lookahead window and registry capacity.
    pub fn new(lookahead_seconds: f64, capacity: usize) -> Self {
        Self {
            events: Vec::with_capacity(capacity),
            lookahead_seconds: lookahead_seconds.max(0.0),
            next_id: 0,
            next_seq: 0,
            due_scratch: Vec::with_capacity(capacity * 4),
            remove_scratch: Vec::with_capacity(capacity),
            stats: SchedulerStats::default(),
        }
    }

    fn register(&mut self, kind: EventKind, next_fire_beats: f64, payload: P) -> EventId {
        let id = EventId(self.next_id);
        self.next_id += 1;
        let seq = self.next_seq;
        self.next_seq += 1;
        self.events.push(ScheduledEvent {
            id,
            kind,
            next_fire_beats,
            payload,
            seq,
        });
        id
    }

    /// Register an event that fires every `period_beats`, first at `first_beats`.
    pub fn schedule_repeating(
        &mut self,
        first_beats: f64,
        period_beats: f64,
        payload: P,
    ) -> Result<EventId> {
        if !period_beats.is_finite() || period_beats <= 0.0 {
            return Err(EngineError::InvalidPeriod(period_beats));
        }
        Ok(self.register(EventKind::Repeating { period_beats }, first_beats, payload))
    }

    /// Register an event that fires once at `at_beats`.
    pub fn schedule_once(&mut self, at_beats: f64, payload: P) -> EventId {
        self.register(EventKind::OneShot { at_beats }, at_beats, payload)
    }

    /// Remove an event from the registry.
    ///
    /// Returns false if the id is unknown (already fired or cancelled).
    pub fn cancel(&mut self, id: EventId) -> bool {
        match self.events.iter().position(|e| e.id == id) {
            Some(index) => {
                self.events.remove(index);
                self.stats.cancelled += 1;
                true
            }
            None => false,
        }
    }

    /// Remove every event.
    pub fn cancel_all(&mut self) {
        self.stats.cancelled += self.events.len() as u64;
        self.events.clear();
    }

    /// Collect every occurrence due within the lookahead window into `out`.
    ///
    /// `out` is cleared first; reusing the same buffer keeps the poll free
    /// of allocation once capacities have settled. Repeating events are
    /// advanced past the window and one-shots are removed before this
    /// returns.
    pub fn poll_into(&mut self, clock: &TransportClock, now: Instant, out: &mut Vec<Dispatch<P>>) {
        out.clear();
        if !clock.is_running() {
            return;
        }

        let now_beats = clock.beats_elapsed(now);
        let window_end = now_beats + clock.lookahead_beats(now, self.lookahead_seconds);
        let window_end_key = BeatTime::from_float(window_end);

        self.due_scratch.clear();
        self.remove_scratch.clear();

        for (index, event) in self.events.iter_mut().enumerate() {
            match event.kind {
                EventKind::OneShot { .. } => {
                    // Late one-shots still fire: they carry releases and reverts.
                    if BeatTime::from_float(event.next_fire_beats) <= window_end_key {
                        self.due_scratch.push((
                            BeatTime::from_float(event.next_fire_beats),
                            event.seq,
                            index,
                            event.next_fire_beats,
                        ));
                        self.remove_scratch.push(index);
                    }
                }
                EventKind::Repeating { period_beats } => {
                    if event.next_fire_beats < now_beats {
                        let behind = ((now_beats - event.next_fire_beats) / period_beats).ceil();
                        event.next_fire_beats += behind * period_beats;
                        self.stats.late_skipped += behind as u64;
                        log::debug!(
                            "[SCHEDULER] Event {:?} fell {} occurrence(s) behind; skipped",
                            event.id,
                            behind
                        );
                    }
                    for _ in 0..MAX_OCCURRENCES_PER_POLL {
                        let key = BeatTime::from_float(event.next_fire_beats);
                        if key > window_end_key {
                            break;
                        }
                        self.due_scratch
                            .push((key, event.seq, index, event.next_fire_beats));
                        event.next_fire_beats += period_beats;
                    }
                }
            }
        }

        self.due_scratch
            .sort_unstable_by_key(|(key, seq, _, _)| (*key, *seq));

        for (_, _, index, beats) in self.due_scratch.iter().copied() {
            let event = &self.events[index];
            out.push(Dispatch {
                id: event.id,
                target_beats: beats,
                target_seconds: clock.seconds_at_beats(beats),
                payload: event.payload.clone(),
            });
        }
        self.stats.dispatched += out.len() as u64;

        // Indices were pushed in ascending order; remove from the back.
        for index in self.remove_scratch.drain(..).rev() {
            self.events.remove(index);
        }

        if !out.is_empty() {
            log::trace!(
                "[SCHEDULER] Dispatched {} event(s) in window [{:.3}, {:.3}]",
                out.len(),
                now_beats,
                window_end
            );
        }
    }

    /// Allocating convenience wrapper around [`poll_into`](Self::poll_into).
    pub fn poll(&mut self, clock: &TransportClock, now: Instant) -> Vec<Dispatch<P>> {
        let mut out = Vec::new();
        self.poll_into(clock, now, &mut out);
        out
    }

    /// Look up a registered event.
    pub fn get(&self, id: EventId) -> Option<&ScheduledEvent<P>> {
        self.events.iter().find(|e| e.id == id)
    }

    /// Number of registered events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn lookahead_seconds(&self) -> f64 {
        self.lookahead_seconds
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }
}
