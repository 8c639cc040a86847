//! Throwable bomb: replicated arming latch plus authority-local fuse state

use std::time::Duration;

use crate::config::GameConfig;
use crate::net::field::{Applied, FieldId, FieldState, ReplicatedField};
use crate::net::protocol::EntityClass;
use crate::net::EntityId;

use super::entity::{Replicated, ReplicationError};
use super::presentation::{Color, Presentation};
use super::scheduler::TimerHandle;

/// Explosion tuning. Authority-local, never replicated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExplosionParams {
    pub fuse: Duration,
    pub radius: f32,
    pub damage: f32,
    /// Grace between the explosion and removal of the bomb
    pub destroy_delay: Duration,
}

impl From<&GameConfig> for ExplosionParams {
    fn from(config: &GameConfig) -> Self {
        Self {
            fuse: config.fuse_delay(),
            radius: config.explosion_radius,
            damage: config.explosion_damage,
            destroy_delay: config.destroy_grace(),
        }
    }
}

#[derive(Debug)]
pub struct Bomb {
    armed: ReplicatedField<bool>,
    params: ExplosionParams,
    fuse_timer: Option<TimerHandle>,
    cleanup_timer: Option<TimerHandle>,
    exploded: bool,
}

impl Bomb {
    pub fn new(params: ExplosionParams) -> Self {
        Self {
            armed: ReplicatedField::new(FieldId::Armed, false),
            params,
            fuse_timer: None,
            cleanup_timer: None,
            exploded: false,
        }
    }

    pub fn is_armed(&self) -> bool {
        *self.armed.get()
    }

    pub fn params(&self) -> &ExplosionParams {
        &self.params
    }

    pub fn has_exploded(&self) -> bool {
        self.exploded
    }

    /// One-way latch. Returns false if the bomb was already armed.
    pub fn arm(&mut self) -> bool {
        if self.is_armed() {
            return false;
        }
        self.armed.write(true)
    }

    /// Mark the explosion as done. Returns false on a second call.
    pub fn mark_exploded(&mut self) -> bool {
        !std::mem::replace(&mut self.exploded, true)
    }

    pub fn fuse_timer(&self) -> Option<TimerHandle> {
        self.fuse_timer
    }

    pub fn cleanup_timer(&self) -> Option<TimerHandle> {
        self.cleanup_timer
    }

    /// Release the fuse handle. The caller cancels it before scheduling a
    /// replacement.
    pub fn take_fuse_timer(&mut self) -> Option<TimerHandle> {
        self.fuse_timer.take()
    }

    pub fn set_fuse_timer(&mut self, handle: TimerHandle) {
        self.fuse_timer = Some(handle);
    }

    pub fn take_cleanup_timer(&mut self) -> Option<TimerHandle> {
        self.cleanup_timer.take()
    }

    pub fn set_cleanup_timer(&mut self, handle: TimerHandle) {
        self.cleanup_timer = Some(handle);
    }

    /// All timer handles still held, emptied
    pub fn take_timers(&mut self) -> Vec<TimerHandle> {
        self.fuse_timer
            .take()
            .into_iter()
            .chain(self.cleanup_timer.take())
            .collect()
    }

    pub(crate) fn adopt_field(&mut self, state: &FieldState) -> Result<(), ReplicationError> {
        match state.field {
            FieldId::Armed => self
                .armed
                .adopt(state.value, state.sequence)
                .ok_or(ReplicationError::TypeMismatch(state.field)),
            field => Err(ReplicationError::UnknownField {
                class: EntityClass::Bomb,
                field,
            }),
        }
    }
}

impl Replicated for Bomb {
    fn replicated_fields(&self) -> Vec<FieldState> {
        vec![self.armed.state()]
    }

    fn drain_field_updates(&mut self) -> Vec<FieldState> {
        self.armed.drain_pending().collect()
    }

    fn discard_field_updates(&mut self) {
        self.armed.clear_pending();
    }

    fn apply_field(&mut self, state: &FieldState) -> Result<Applied, ReplicationError> {
        match state.field {
            FieldId::Armed => self
                .armed
                .apply_remote(state.value, state.sequence)
                .ok_or(ReplicationError::TypeMismatch(state.field)),
            field => Err(ReplicationError::UnknownField {
                class: EntityClass::Bomb,
                field,
            }),
        }
    }

    fn on_replicated(&self, entity: EntityId, field: FieldId, presentation: &mut dyn Presentation) {
        if field == FieldId::Armed {
            self.present(entity, presentation);
        }
    }

    fn present(&self, entity: EntityId, presentation: &mut dyn Presentation) {
        if self.is_armed() {
            presentation.set_tint_color(entity, Color::RED);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::presentation::RecordingPresentation;

    fn bomb() -> Bomb {
        Bomb::new((&GameConfig::default()).into())
    }

    #[test]
    fn arming_is_a_one_way_latch() {
        let mut bomb = bomb();
        assert!(!bomb.is_armed());
        assert!(bomb.arm());
        assert!(!bomb.arm());
        assert!(bomb.is_armed());
        assert_eq!(bomb.drain_field_updates().len(), 1);
    }

    #[test]
    fn unarmed_bomb_has_no_tint() {
        let mut presentation = RecordingPresentation::new();
        let id = EntityId::new();
        let mut bomb = bomb();

        bomb.present(id, &mut presentation);
        assert_eq!(presentation.tint_calls(id), 0);

        bomb.arm();
        bomb.present(id, &mut presentation);
        assert_eq!(presentation.visible_state().tint.get(&id), Some(&Color::RED));
    }

    #[test]
    fn explosion_is_marked_once() {
        let mut bomb = bomb();
        assert!(bomb.mark_exploded());
        assert!(!bomb.mark_exploded());
    }

    #[test]
    fn params_follow_config() {
        let params = *bomb().params();
        assert_eq!(params.fuse, Duration::from_millis(2500));
        assert_eq!(params.radius, 200.0);
        assert_eq!(params.damage, 25.0);
    }
}
