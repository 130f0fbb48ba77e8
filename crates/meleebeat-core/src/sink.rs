//! Output boundary between the engine and the audio backend.
//!
//! The engine never renders audio. It hands [`VoiceTrigger`]s to a
//! [`TriggerSink`] and leaves synthesis to whoever sits on the other side.

use crate::voice_pool::VoiceTrigger;
use crossbeam_channel::{Receiver, Sender, TrySendError};

/// Receives note requests produced by the engine.
pub trait TriggerSink {
    /// Accept a trigger. Returns false if it was dropped.
    fn submit(&mut self, trigger: VoiceTrigger) -> bool;
}

/// Collects triggers in memory. Handy for tests and offline rendering.
impl TriggerSink for Vec<VoiceTrigger> {
    fn submit(&mut self, trigger: VoiceTrigger) -> bool {
        self.push(trigger);
        true
    }
}

/// Forwards triggers over a bounded channel without blocking.
pub struct ChannelSink {
    tx: Sender<VoiceTrigger>,
    dropped: u64,
}

impl ChannelSink {
    /// Create a sink and its receiving end with room for `capacity` triggers.
    pub fn bounded(capacity: usize) -> (Self, Receiver<VoiceTrigger>) {
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        (Self { tx, dropped: 0 }, rx)
    }

    pub fn from_sender(tx: Sender<VoiceTrigger>) -> Self {
        Self { tx, dropped: 0 }
    }

    /// Triggers dropped because the channel was full or disconnected.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl TriggerSink for ChannelSink {
    fn submit(&mut self, trigger: VoiceTrigger) -> bool {
        match self.tx.try_send(trigger) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                log::warn!("[SINK] Trigger channel full, dropping note");
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                self.dropped += 1;
                log::warn!("[SINK] Trigger channel disconnected");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::music::{Decibels, Pitch, PitchClass, TimbreClass};
    use crate::voice_pool::Route;

    fn trigger() -> VoiceTrigger {
        let pitch = Pitch::new(PitchClass::C, 4);
        VoiceTrigger {
            timbre_class: TimbreClass::Click,
            slot: 0,
            pitch,
            frequency_hz: pitch.frequency_hz(),
            duration_seconds: 0.1,
            velocity: 1.0,
            target_time: 0.0,
            level: Decibels::CEILING,
            route: Route::default(),
        }
    }

    #[test]
    fn test_channel_sink_drops_when_full() {
        let (mut sink, rx) = ChannelSink::bounded(1);
        assert!(sink.submit(trigger()));
        assert!(!sink.submit(trigger()));
        assert_eq!(sink.dropped(), 1);
        assert_eq!(rx.try_recv().unwrap().timbre_class, TimbreClass::Click);

        drop(rx);
        assert!(!sink.submit(trigger()));
        assert_eq!(sink.dropped(), 2);
    }

    #[test]
    fn test_vec_sink() {
        let mut sink: Vec<VoiceTrigger> = Vec::new();
        assert!(sink.submit(trigger()));
        assert_eq!(sink.len(), 1);
    }
}
