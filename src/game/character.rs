//! Player character: replicated health and bomb count

use crate::net::field::{Applied, FieldId, FieldState, ReplicatedField};
use crate::net::EntityId;

use super::entity::{DamageOutcome, Damageable, Replicated, ReplicationError};
use super::presentation::Presentation;

#[derive(Debug)]
pub struct Character {
    health: ReplicatedField<f32>,
    bomb_count: ReplicatedField<i32>,
    max_health: f32,
}

impl Character {
    /// Fresh character at full health and full bombs
    pub fn new(max_health: f32, max_bomb_count: i32) -> Self {
        Self {
            health: ReplicatedField::new(FieldId::Health, max_health),
            bomb_count: ReplicatedField::new(FieldId::BombCount, max_bomb_count),
            max_health,
        }
    }

    pub fn health(&self) -> f32 {
        *self.health.get()
    }

    pub fn bomb_count(&self) -> i32 {
        *self.bomb_count.get()
    }

    pub fn has_bombs(&self) -> bool {
        self.bomb_count() > 0
    }

    pub fn init_health(&mut self) {
        self.health.write(self.max_health);
    }

    /// Take one bomb out of the inventory. Refuses at zero.
    pub fn consume_bomb(&mut self) -> bool {
        if !self.has_bombs() {
            return false;
        }
        self.bomb_count.write(self.bomb_count() - 1);
        true
    }

    /// Text shown above the character
    pub fn char_text(&self) -> String {
        format!(
            "Health: {} BombCount: {}",
            self.health(),
            self.bomb_count()
        )
    }

    pub(crate) fn adopt_field(&mut self, state: &FieldState) -> Result<(), ReplicationError> {
        let adopted = match state.field {
            FieldId::Health => self.health.adopt(state.value, state.sequence),
            FieldId::BombCount => self.bomb_count.adopt(state.value, state.sequence),
            field => {
                return Err(ReplicationError::UnknownField {
                    class: crate::net::protocol::EntityClass::Character,
                    field,
                })
            }
        };
        adopted.ok_or(ReplicationError::TypeMismatch(state.field))
    }
}

impl Damageable for Character {
    /// Subtract damage. Reaching zero resets to full health in the same write,
    /// so observers never see a value outside `[0, max_health]`.
    fn take_damage(&mut self, damage: f32) -> DamageOutcome {
        let next = (self.health() - damage).min(self.max_health);
        let respawned = next <= 0.0;

        if respawned {
            self.init_health();
        } else {
            self.health.write(next);
        }

        DamageOutcome {
            health: self.health(),
            respawned,
        }
    }
}

impl Replicated for Character {
    fn replicated_fields(&self) -> Vec<FieldState> {
        vec![self.health.state(), self.bomb_count.state()]
    }

    fn drain_field_updates(&mut self) -> Vec<FieldState> {
        let mut updates: Vec<FieldState> = self.health.drain_pending().collect();
        updates.extend(self.bomb_count.drain_pending());
        updates
    }

    fn discard_field_updates(&mut self) {
        self.health.clear_pending();
        self.bomb_count.clear_pending();
    }

    fn apply_field(&mut self, state: &FieldState) -> Result<Applied, ReplicationError> {
        let applied = match state.field {
            FieldId::Health => self.health.apply_remote(state.value, state.sequence),
            FieldId::BombCount => self.bomb_count.apply_remote(state.value, state.sequence),
            field => {
                return Err(ReplicationError::UnknownField {
                    class: crate::net::protocol::EntityClass::Character,
                    field,
                })
            }
        };
        applied.ok_or(ReplicationError::TypeMismatch(state.field))
    }

    fn on_replicated(&self, entity: EntityId, field: FieldId, presentation: &mut dyn Presentation) {
        match field {
            FieldId::Health | FieldId::BombCount => presentation.set_text(entity, &self.char_text()),
            FieldId::Armed => {}
        }
    }

    fn present(&self, entity: EntityId, presentation: &mut dyn Presentation) {
        presentation.set_text(entity, &self.char_text());
    }
}
