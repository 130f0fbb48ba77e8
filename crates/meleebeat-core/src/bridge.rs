//! Collision-to-event bridge.
//!
//! Turns physics impacts into accepted hits. The bridge owns a side table
//! keyed by entity id holding each block's content, its last sounding
//! voice and the wall-clock time it last triggered. Filtering happens in
//! this order: round active, player contact, known entity, minimum speed,
//! cooldown.

use crate::config::BridgeConfig;
use crate::music::Decibels;
use crate::patterns::BlockConfig;
use crate::spatial::{ListenerPose, Vec3};
use crate::voice_pool::VoiceHandle;
use std::collections::HashMap;
use std::fmt;
use std::time::Instant;

/// Identifier of a physics body, assigned by the physics engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(pub u64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A contact reported by the physics engine.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ImpactEvent {
    pub entity_id: EntityId,
    pub other_entity_id: EntityId,
    pub impact_speed: f32,
    pub contact_normal_velocity: f32,
}

/// Per-entity audio state.
#[derive(Clone, Copy, Debug)]
pub struct EntityAudio {
    pub block: BlockConfig,
    pub position: Vec3,
    /// Voice of the most recent note, if it may still be sounding.
    pub voice: Option<VoiceHandle>,
    pub last_trigger: Option<Instant>,
}

/// Why an impact produced no sound.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IgnoreReason {
    /// No round is running.
    RoundInactive,
    /// Neither body is the player.
    NotPlayerContact,
    /// The entity has no registered block.
    UnknownEntity,
    /// Impact speed below the threshold.
    TooSoft,
    /// Entity re-triggered within the cooldown (inclusive).
    CoolingDown,
}

/// An impact that should sound and be judged.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AcceptedHit {
    pub entity_id: EntityId,
    pub block: BlockConfig,
    pub position: Vec3,
    pub level: Decibels,
    pub impact_speed: f32,
    /// Voice of the entity's previous note, to be reused or released.
    pub previous_voice: Option<VoiceHandle>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum BridgeOutcome {
    Accepted(AcceptedHit),
    Ignored(IgnoreReason),
}

/// Counters per outcome.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BridgeStats {
    pub accepted: u64,
    pub round_inactive: u64,
    pub not_player_contact: u64,
    pub unknown_entity: u64,
    pub too_soft: u64,
    pub cooling_down: u64,
}

impl BridgeStats {
    fn count(&mut self, outcome: &BridgeOutcome) {
        match outcome {
            BridgeOutcome::Accepted(_) => self.accepted += 1,
            BridgeOutcome::Ignored(IgnoreReason::RoundInactive) => self.round_inactive += 1,
            BridgeOutcome::Ignored(IgnoreReason::NotPlayerContact) => self.not_player_contact += 1,
            BridgeOutcome::Ignored(IgnoreReason::UnknownEntity) => self.unknown_entity += 1,
            BridgeOutcome::Ignored(IgnoreReason::TooSoft) => self.too_soft += 1,
            BridgeOutcome::Ignored(IgnoreReason::CoolingDown) => self.cooling_down += 1,
        }
    }

    pub fn rejected(&self) -> u64 {
        self.round_inactive + self.not_player_contact + self.unknown_entity + self.too_soft + self.cooling_down
    }
}

/// Level of a collision heard from `distance` away at `impact_speed`.
///
/// Linear falloff from `base_db` at the listener to `base_db - falloff_db`
/// at `max_distance` and beyond, plus `db_per_speed` per unit of speed,
/// capped at 0 dB.
pub fn collision_level(config: &BridgeConfig, distance: f32, impact_speed: f32) -> Decibels {
    let factor = (1.0 - distance as f64 / config.max_distance as f64).clamp(0.0, 1.0);
    let attenuated = config.base_db - (1.0 - factor) * config.falloff_db;
    Decibels::new(attenuated + impact_speed as f64 * config.db_per_speed)
}

/// Side table and impact filter.
pub struct CollisionBridge {
    config: BridgeConfig,
    player: Option<EntityId>,
    active: bool,
    entities: HashMap<EntityId, EntityAudio>,
    stats: BridgeStats,
}

impl CollisionBridge {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config,
            player: None,
            active: true,
            entities: HashMap::new(),
            stats: BridgeStats::default(),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Only impacts involving this entity are accepted once set.
    pub fn set_player(&mut self, player: EntityId) {
        self.player = Some(player);
    }

    /// While inactive every impact and strike is ignored.
    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn register(&mut self, entity: EntityId, block: BlockConfig, position: Vec3) {
        self.entities.insert(
            entity,
            EntityAudio {
                block,
                position,
                voice: None,
                last_trigger: None,
            },
        );
    }

    pub fn unregister(&mut self, entity: EntityId) -> Option<EntityAudio> {
        self.entities.remove(&entity)
    }

    /// Update an entity's position (render loop, once per frame).
    pub fn set_position(&mut self, entity: EntityId, position: Vec3) -> bool {
        match self.entities.get_mut(&entity) {
            Some(audio) => {
                audio.position = position;
                true
            }
            None => false,
        }
    }

    /// Record the voice now sounding for an entity.
    pub fn set_voice(&mut self, entity: EntityId, voice: Option<VoiceHandle>) {
        if let Some(audio) = self.entities.get_mut(&entity) {
            audio.voice = voice;
        }
    }

    pub fn entity(&self, entity: EntityId) -> Option<&EntityAudio> {
        self.entities.get(&entity)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn clear(&mut self) {
        self.entities.clear();
    }

    /// Resolve which body of a contact is the block.
    fn block_of(&self, event: &ImpactEvent) -> std::result::Result<EntityId, IgnoreReason> {
        match self.player {
            None => Ok(event.entity_id),
            Some(player) if event.other_entity_id == player => Ok(event.entity_id),
            Some(player) if event.entity_id == player => Ok(event.other_entity_id),
            Some(_) => Err(IgnoreReason::NotPlayerContact),
        }
    }

    /// Filter a physics impact.
    ///
    /// `entity_position` is the block's position at contact time; when
    /// `None` the last position reported through [`set_position`](Self::set_position) is used.
    pub fn on_impact(
        &mut self,
        event: &ImpactEvent,
        entity_position: Option<Vec3>,
        listener: &ListenerPose,
        now: Instant,
    ) -> BridgeOutcome {
        let outcome = self.evaluate(event, entity_position, listener, now);
        self.stats.count(&outcome);
        match &outcome {
            BridgeOutcome::Accepted(hit) => {
                log::trace!("[BRIDGE] {} accepted at {:.1} dB", hit.entity_id, hit.level.value());
            }
            BridgeOutcome::Ignored(reason) => {
                log::trace!("[BRIDGE] {} ignored: {:?}", event.entity_id, reason);
            }
        }
        outcome
    }

    fn evaluate(
        &mut self,
        event: &ImpactEvent,
        entity_position: Option<Vec3>,
        listener: &ListenerPose,
        now: Instant,
    ) -> BridgeOutcome {
        if !self.active {
            return BridgeOutcome::Ignored(IgnoreReason::RoundInactive);
        }
        let entity = match self.block_of(event) {
            Ok(entity) => entity,
            Err(reason) => return BridgeOutcome::Ignored(reason),
        };
        let Some(audio) = self.entities.get_mut(&entity) else {
            return BridgeOutcome::Ignored(IgnoreReason::UnknownEntity);
        };
        let speed = if event.impact_speed.is_finite() { event.impact_speed } else { 0.0 };
        if speed < self.config.min_impact_speed {
            return BridgeOutcome::Ignored(IgnoreReason::TooSoft);
        }
        if let Some(last) = audio.last_trigger {
            if now.saturating_duration_since(last) <= self.config.cooldown {
                return BridgeOutcome::Ignored(IgnoreReason::CoolingDown);
            }
        }

        if let Some(position) = entity_position {
            audio.position = position;
        }
        audio.last_trigger = Some(now);
        let distance = audio.position.distance(listener.position);
        BridgeOutcome::Accepted(AcceptedHit {
            entity_id: entity,
            block: audio.block,
            position: audio.position,
            level: collision_level(&self.config, distance, speed),
            impact_speed: speed,
            previous_voice: audio.voice,
        })
    }

    /// Pointer strike: bypasses the speed threshold and cooldown.
    pub fn strike(&mut self, entity: EntityId, listener: &ListenerPose, now: Instant) -> BridgeOutcome {
        if !self.active {
            self.stats.count(&BridgeOutcome::Ignored(IgnoreReason::RoundInactive));
            return BridgeOutcome::Ignored(IgnoreReason::RoundInactive);
        }
        let outcome = match self.entities.get_mut(&entity) {
            None => BridgeOutcome::Ignored(IgnoreReason::UnknownEntity),
            Some(audio) => {
                audio.last_trigger = Some(now);
                let distance = audio.position.distance(listener.position);
                BridgeOutcome::Accepted(AcceptedHit {
                    entity_id: entity,
                    block: audio.block,
                    position: audio.position,
                    level: collision_level(&self.config, distance, self.config.strike_speed),
                    impact_speed: self.config.strike_speed,
                    previous_voice: audio.voice,
                })
            }
        };
        self.stats.count(&outcome);
        outcome
    }

    pub fn stats(&self) -> BridgeStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const PLAYER: EntityId = EntityId(1);
    const BLOCK: EntityId = EntityId(100);

    fn bridge() -> CollisionBridge {
        let mut bridge = CollisionBridge::new(BridgeConfig::default());
        bridge.set_player(PLAYER);
        bridge.register(BLOCK, BlockConfig::new(0, 2.0).unwrap(), Vec3::new(0.0, 0.0, -10.0));
        bridge
    }

    fn impact(speed: f32) -> ImpactEvent {
        ImpactEvent {
            entity_id: BLOCK,
            other_entity_id: PLAYER,
            impact_speed: speed,
            contact_normal_velocity: speed,
        }
    }

    #[test]
    fn test_soft_impact_rejected() {
        let mut bridge = bridge();
        let outcome = bridge.on_impact(&impact(1.9), None, &ListenerPose::default(), Instant::now());
        assert_eq!(outcome, BridgeOutcome::Ignored(IgnoreReason::TooSoft));
        assert_eq!(bridge.stats().too_soft, 1);
        assert_eq!(bridge.stats().accepted, 0);
        assert!(bridge.entity(BLOCK).unwrap().last_trigger.is_none());
    }

    #[test]
    fn test_cooldown_per_entity() {
        let mut bridge = bridge();
        let listener = ListenerPose::default();
        let t0 = Instant::now();
        assert!(matches!(bridge.on_impact(&impact(5.0), None, &listener, t0), BridgeOutcome::Accepted(_)));
        assert_eq!(
            bridge.on_impact(&impact(5.0), None, &listener, t0 + Duration::from_millis(149)),
            BridgeOutcome::Ignored(IgnoreReason::CoolingDown)
        );
        // Exactly one cooldown later is still too soon.
        assert_eq!(
            bridge.on_impact(&impact(5.0), None, &listener, t0 + Duration::from_millis(150)),
            BridgeOutcome::Ignored(IgnoreReason::CoolingDown)
        );
        assert!(matches!(
            bridge.on_impact(&impact(5.0), None, &listener, t0 + Duration::from_millis(151)),
            BridgeOutcome::Accepted(_)
        ));
        assert_eq!(bridge.stats().accepted, 2);
        assert_eq!(bridge.stats().cooling_down, 2);
    }

    #[test]
    fn test_contact_filtering() {
        let mut bridge = bridge();
        let listener = ListenerPose::default();
        let now = Instant::now();

        let reversed = ImpactEvent {
            entity_id: PLAYER,
            other_entity_id: BLOCK,
            ..impact(5.0)
        };
        match bridge.on_impact(&reversed, None, &listener, now) {
            BridgeOutcome::Accepted(hit) => assert_eq!(hit.entity_id, BLOCK),
            other => panic!("unexpected {other:?}"),
        }

        let ground = ImpactEvent {
            other_entity_id: EntityId(2),
            ..impact(5.0)
        };
        assert_eq!(
            bridge.on_impact(&ground, None, &listener, now),
            BridgeOutcome::Ignored(IgnoreReason::NotPlayerContact)
        );

        let stranger = ImpactEvent {
            entity_id: EntityId(999),
            ..impact(5.0)
        };
        assert_eq!(
            bridge.on_impact(&stranger, None, &listener, now),
            BridgeOutcome::Ignored(IgnoreReason::UnknownEntity)
        );
        assert_eq!(bridge.stats().rejected(), 2);
    }

    #[test]
    fn test_collision_level_falloff() {
        let config = BridgeConfig::default();
        // At the listener: -12 dB + 2 dB per unit of speed.
        assert!((collision_level(&config, 0.0, 2.0).value() - -8.0).abs() < 1e-9);
        // Half way: -12 - 10 + 4.
        assert!((collision_level(&config, 25.0, 2.0).value() - -18.0).abs() < 1e-9);
        // Beyond max distance clamps to the full falloff.
        assert!((collision_level(&config, 80.0, 2.0).value() - -28.0).abs() < 1e-9);
        // Hard hits cap at the ceiling.
        assert_eq!(collision_level(&config, 0.0, 20.0), Decibels::CEILING);
    }

    #[test]
    fn test_explicit_position_updates_side_table() {
        let mut bridge = bridge();
        let listener = ListenerPose::default();
        let outcome = bridge.on_impact(&impact(2.0), Some(Vec3::ZERO), &listener, Instant::now());
        match outcome {
            BridgeOutcome::Accepted(hit) => {
                assert_eq!(hit.position, Vec3::ZERO);
                assert!((hit.level.value() - -8.0).abs() < 1e-6);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(bridge.entity(BLOCK).unwrap().position, Vec3::ZERO);
    }

    #[test]
    fn test_strike_bypasses_threshold_and_cooldown() {
        let mut bridge = bridge();
        let listener = ListenerPose::default();
        let now = Instant::now();
        assert!(matches!(bridge.strike(BLOCK, &listener, now), BridgeOutcome::Accepted(_)));
        match bridge.strike(BLOCK, &listener, now) {
            BridgeOutcome::Accepted(hit) => assert_eq!(hit.impact_speed, 10.0),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            bridge.strike(EntityId(5), &listener, now),
            BridgeOutcome::Ignored(IgnoreReason::UnknownEntity)
        );
        // A strike still arms the cooldown for physical impacts.
        assert_eq!(
            bridge.on_impact(&impact(5.0), None, &listener, now),
            BridgeOutcome::Ignored(IgnoreReason::CoolingDown)
        );
    }

    #[test]
    fn test_inactive_bridge_ignores_everything() {
        let mut bridge = bridge();
        let listener = ListenerPose::default();
        let now = Instant::now();
        bridge.set_active(false);
        assert!(!bridge.is_active());
        assert_eq!(
            bridge.on_impact(&impact(5.0), None, &listener, now),
            BridgeOutcome::Ignored(IgnoreReason::RoundInactive)
        );
        assert_eq!(
            bridge.strike(BLOCK, &listener, now),
            BridgeOutcome::Ignored(IgnoreReason::RoundInactive)
        );
        assert_eq!(bridge.stats().round_inactive, 2);
        assert_eq!(bridge.stats().rejected(), 2);
        assert!(bridge.entity(BLOCK).unwrap().last_trigger.is_none());

        bridge.set_active(true);
        assert!(matches!(bridge.on_impact(&impact(5.0), None, &listener, now), BridgeOutcome::Accepted(_)));
    }
}
