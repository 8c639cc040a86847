//! Entities and their capabilities
//!
//! An [`Entity`] is identity + role + transform + a kind. Behavior comes from
//! capability traits the kind implements: every kind is [`Replicated`],
//! characters are also [`Damageable`], bombs carry velocity and timers.

use glam::Vec3;

use crate::config::GameConfig;
use crate::net::field::{Applied, FieldId, FieldState};
use crate::net::protocol::{EntityClass, EntitySnapshot, Transform};
use crate::net::{ConnectionId, EntityId, Role};

use super::bomb::Bomb;
use super::character::Character;
use super::presentation::Presentation;

/// Errors applying replicated state on an observer
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ReplicationError {
    #[error("Unknown entity {0}")]
    UnknownEntity(EntityId),

    #[error("{class:?} has no replicated field {field:?}")]
    UnknownField { class: EntityClass, field: FieldId },

    #[error("Field {0:?} received a value of the wrong type")]
    TypeMismatch(FieldId),

    #[error("Entity {0} is under local authority and cannot accept replicated writes")]
    LocalAuthority(EntityId),
}

/// State that flows from the authority to observers
pub trait Replicated {
    /// Current value and sequence of every replicated field
    fn replicated_fields(&self) -> Vec<FieldState>;

    /// Changes written since the last drain, in write order per field
    fn drain_field_updates(&mut self) -> Vec<FieldState>;

    /// Drop queued changes (a spawn snapshot already carries them)
    fn discard_field_updates(&mut self);

    /// Apply one replicated state on an observer
    fn apply_field(&mut self, state: &FieldState) -> Result<Applied, ReplicationError>;

    /// Change hook: runs on observers after a field changed
    fn on_replicated(&self, entity: EntityId, field: FieldId, presentation: &mut dyn Presentation);

    /// Refresh every presentation side effect from current values. The
    /// authority calls this after its own writes since it gets no change hook.
    fn present(&self, entity: EntityId, presentation: &mut dyn Presentation);
}

/// Result of applying damage
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DamageOutcome {
    /// Health after the hit (after respawn, if it happened)
    pub health: f32,
    /// Health hit zero and was reset to max
    pub respawned: bool,
}

pub trait Damageable {
    fn take_damage(&mut self, damage: f32) -> DamageOutcome;
}

/// Concrete entity kinds
#[derive(Debug)]
pub enum EntityKind {
    Character(Character),
    Bomb(Bomb),
}

/// A replicated game object
#[derive(Debug)]
pub struct Entity {
    pub id: EntityId,
    pub role: Role,
    /// Connection that owns this entity, if any
    pub owner: Option<ConnectionId>,
    /// Entity responsible for this one (the thrower of a bomb)
    pub instigator: Option<EntityId>,
    pub transform: Transform,
    pub velocity: Vec3,
    pub kind: EntityKind,
}

impl Entity {
    pub fn class(&self) -> EntityClass {
        match self.kind {
            EntityKind::Character(_) => EntityClass::Character,
            EntityKind::Bomb(_) => EntityClass::Bomb,
        }
    }

    pub fn replicated(&self) -> &dyn Replicated {
        match &self.kind {
            EntityKind::Character(c) => c,
            EntityKind::Bomb(b) => b,
        }
    }

    pub fn replicated_mut(&mut self) -> &mut dyn Replicated {
        match &mut self.kind {
            EntityKind::Character(c) => c,
            EntityKind::Bomb(b) => b,
        }
    }

    pub fn damageable_mut(&mut self) -> Option<&mut dyn Damageable> {
        match &mut self.kind {
            EntityKind::Character(c) => Some(c),
            EntityKind::Bomb(_) => None,
        }
    }

    pub fn is_damageable(&self) -> bool {
        matches!(self.kind, EntityKind::Character(_))
    }

    /// Movable entities are integrated by the physics step
    pub fn is_movable(&self) -> bool {
        matches!(self.kind, EntityKind::Bomb(_))
    }

    pub fn as_character(&self) -> Option<&Character> {
        match &self.kind {
            EntityKind::Character(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_character_mut(&mut self) -> Option<&mut Character> {
        match &mut self.kind {
            EntityKind::Character(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_bomb(&self) -> Option<&Bomb> {
        match &self.kind {
            EntityKind::Bomb(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_bomb_mut(&mut self) -> Option<&mut Bomb> {
        match &mut self.kind {
            EntityKind::Bomb(b) => Some(b),
            _ => None,
        }
    }

    pub fn snapshot(&self) -> EntitySnapshot {
        EntitySnapshot {
            entity: self.id,
            class: self.class(),
            transform: self.transform,
            velocity: self.velocity,
            owner: self.owner,
            instigator: self.instigator,
            fields: self.replicated().replicated_fields(),
        }
    }

    /// Build an observer mirror from a spawn snapshot
    pub fn from_snapshot(
        snapshot: &EntitySnapshot,
        config: &GameConfig,
    ) -> Result<Self, ReplicationError> {
        let mut kind = match snapshot.class {
            EntityClass::Character => EntityKind::Character(Character::new(
                config.max_health,
                config.max_bomb_count,
            )),
            EntityClass::Bomb => EntityKind::Bomb(Bomb::new(config.into())),
        };

        for state in &snapshot.fields {
            let adopted = match &mut kind {
                EntityKind::Character(c) => c.adopt_field(state),
                EntityKind::Bomb(b) => b.adopt_field(state),
            };
            adopted?;
        }

        Ok(Self {
            id: snapshot.entity,
            role: Role::Observer,
            owner: snapshot.owner,
            instigator: snapshot.instigator,
            transform: snapshot.transform,
            velocity: snapshot.velocity,
            kind,
        })
    }
}
