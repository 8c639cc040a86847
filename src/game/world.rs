//! Entity store for one process
//!
//! On the server every entity is spawned under [`Role::Authority`] and the
//! world runs the whole bomb lifecycle: throw, bounce, fuse, explosion, area
//! damage and delayed cleanup. On a client the same type holds observer
//! mirrors built from spawn snapshots and fed by field updates.

use std::collections::HashMap;
use std::f32::consts::TAU;
use std::time::Duration;

use glam::Vec3;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, warn};

use crate::config::GameConfig;
use crate::net::field::Applied;
use crate::net::protocol::{EntityClass, EntitySnapshot, FieldUpdate, Multicast, Transform};
use crate::net::rpc::{self, Dispatch, Intent};
use crate::net::{is_authority, ConnectionId, EntityId, Role, Route};
use crate::util::time::secs;

use super::bomb::Bomb;
use super::character::Character;
use super::entity::{DamageOutcome, Damageable, Entity, EntityKind, Replicated, ReplicationError};
use super::physics::{Bounce, PhysicsSystem, ProjectileStats, GROUND_Z};
use super::presentation::Presentation;
use super::scheduler::Scheduler;

/// Deferred work owned by the authority
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerAction {
    Explode(EntityId),
    Destroy(EntityId),
}

/// Authority-side changes the server must tell observers about
#[derive(Debug, Clone, PartialEq)]
pub enum WorldEvent {
    Spawned(EntityId),
    Destroyed(EntityId),
    Multicast(Multicast),
}

/// Parameters for creating an authoritative entity
#[derive(Debug, Clone)]
pub struct SpawnRequest {
    pub class: EntityClass,
    pub transform: Transform,
    pub velocity: Vec3,
    pub owner: Option<ConnectionId>,
    pub instigator: Option<EntityId>,
}

/// Gameplay errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GameError {
    #[error("Unknown entity {0}")]
    UnknownEntity(EntityId),

    #[error("Entity {0} is not under local authority")]
    NotAuthority(EntityId),

    #[error("Observer process cannot perform authority operations")]
    ObserverProcess,

    #[error("Entity {0} is not a character")]
    NotACharacter(EntityId),

    #[error("Entity {0} is not a bomb")]
    NotABomb(EntityId),

    #[error("Entity {0} cannot take damage")]
    NotDamageable(EntityId),

    #[error("Invalid damage value {0}")]
    InvalidDamage(f32),

    #[error(transparent)]
    Replication(#[from] ReplicationError),
}

pub struct World {
    role: Role,
    config: GameConfig,
    entities: HashMap<EntityId, Entity>,
    scheduler: Scheduler<TimerAction>,
    presentation: Box<dyn Presentation>,
    projectile: ProjectileStats,
    rng: ChaCha8Rng,
    events: Vec<WorldEvent>,
}

impl World {
    pub fn new(role: Role, config: GameConfig, presentation: Box<dyn Presentation>) -> Self {
        let rng = ChaCha8Rng::seed_from_u64(config.world_seed);
        Self {
            role,
            config,
            entities: HashMap::new(),
            scheduler: Scheduler::new(),
            presentation,
            projectile: ProjectileStats::default(),
            rng,
            events: Vec::new(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    pub fn character(&self, id: EntityId) -> Option<&Character> {
        self.entities.get(&id).and_then(Entity::as_character)
    }

    pub fn bomb(&self, id: EntityId) -> Option<&Bomb> {
        self.entities.get(&id).and_then(Entity::as_bomb)
    }

    pub fn scheduler(&self) -> &Scheduler<TimerAction> {
        &self.scheduler
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    // ---------------------------------------------------------------------
    // Authority operations
    // ---------------------------------------------------------------------

    /// Create an authoritative entity from a template
    pub fn spawn(&mut self, request: SpawnRequest) -> Result<EntityId, GameError> {
        if !self.role.is_authority() {
            return Err(GameError::ObserverProcess);
        }

        let kind = match request.class {
            EntityClass::Character => EntityKind::Character(Character::new(
                self.config.max_health,
                self.config.max_bomb_count,
            )),
            EntityClass::Bomb => EntityKind::Bomb(Bomb::new((&self.config).into())),
        };

        let id = EntityId::new();
        let entity = Entity {
            id,
            role: Role::Authority,
            owner: request.owner,
            instigator: request.instigator,
            transform: request.transform,
            velocity: request.velocity,
            kind,
        };

        entity.replicated().present(id, &mut *self.presentation);
        self.entities.insert(id, entity);
        self.events.push(WorldEvent::Spawned(id));

        debug!(entity = %id, class = ?request.class, "Spawned entity");
        Ok(id)
    }

    /// Spawn a character at a seeded random point inside the spawn disc
    pub fn spawn_character(&mut self, owner: Option<ConnectionId>) -> Result<EntityId, GameError> {
        let angle = self.rng.gen_range(0.0..TAU);
        let distance = self.rng.gen_range(0.0..=self.config.spawn_radius.max(0.0));
        let yaw = self.rng.gen_range(0.0..TAU);

        let location = Vec3::new(angle.cos() * distance, angle.sin() * distance, GROUND_Z);
        self.spawn_character_at(owner, Transform::new(location, yaw))
    }

    pub fn spawn_character_at(
        &mut self,
        owner: Option<ConnectionId>,
        transform: Transform,
    ) -> Result<EntityId, GameError> {
        let id = self.spawn(SpawnRequest {
            class: EntityClass::Character,
            transform,
            velocity: Vec3::ZERO,
            owner,
            instigator: None,
        })?;

        info!(
            entity = %id,
            owner = ?owner,
            x = transform.location.x,
            y = transform.location.y,
            "Character spawned"
        );
        Ok(id)
    }

    /// Throw a bomb from a character. Returns `None` when the character has
    /// no bombs left; that is a refusal, not an error.
    pub fn throw_bomb(&mut self, character: EntityId) -> Result<Option<EntityId>, GameError> {
        let entity = self
            .entities
            .get_mut(&character)
            .ok_or(GameError::UnknownEntity(character))?;
        if !is_authority(entity) {
            return Err(GameError::NotAuthority(character));
        }

        let owner = entity.owner;
        let transform = entity.transform;
        let Some(thrower) = entity.as_character_mut() else {
            return Err(GameError::NotACharacter(character));
        };

        if !thrower.consume_bomb() {
            debug!(character = %character, "Throw refused, no bombs left");
            return Ok(None);
        }
        thrower.present(character, &mut *self.presentation);
        let remaining = thrower.bomb_count();

        let forward = transform.forward();
        let speed = self.config.throw_speed;
        let bomb = self.spawn(SpawnRequest {
            class: EntityClass::Bomb,
            transform: Transform::new(
                transform.location + forward * self.config.throw_offset,
                transform.yaw,
            ),
            velocity: forward * speed + Vec3::Z * speed * 0.5,
            owner,
            instigator: Some(character),
        })?;

        info!(character = %character, bomb = %bomb, remaining, "Bomb thrown");
        Ok(Some(bomb))
    }

    /// Physics reported a ground hit. Arms an unarmed bomb and lights its
    /// fuse. Returns true only when this call armed the bomb.
    pub fn handle_bounce(&mut self, id: EntityId, bounce: Bounce) -> bool {
        let Some(entity) = self.entities.get_mut(&id) else {
            return false;
        };
        if !is_authority(entity) {
            return false;
        }
        let Some(bomb) = entity.as_bomb_mut() else {
            return false;
        };
        if !bomb.arm() {
            return false;
        }

        bomb.present(id, &mut *self.presentation);

        let fuse = bomb.params().fuse;
        if let Some(previous) = bomb.take_fuse_timer() {
            self.scheduler.cancel(previous);
        }
        let handle = self
            .scheduler
            .schedule(TimerAction::Explode(id), fuse, false);
        bomb.set_fuse_timer(handle);

        info!(
            bomb = %id,
            x = bounce.impact_point.x,
            y = bounce.impact_point.y,
            fuse_secs = fuse.as_secs_f32(),
            "Bomb armed"
        );
        true
    }

    /// Detonate a bomb: area damage, explosion broadcast, then delayed
    /// removal. Returns the entities that were hit.
    pub fn explode(&mut self, id: EntityId) -> Result<Vec<EntityId>, GameError> {
        let entity = self
            .entities
            .get_mut(&id)
            .ok_or(GameError::UnknownEntity(id))?;
        if !is_authority(entity) {
            return Err(GameError::NotAuthority(id));
        }

        let transform = entity.transform;
        let bomb = entity.as_bomb_mut().ok_or(GameError::NotABomb(id))?;
        if !bomb.mark_exploded() {
            return Ok(Vec::new());
        }
        let params = *bomb.params();

        let hits = self.damageables_in_radius(transform.location, params.radius);
        for &target in &hits {
            if let Err(e) = self.apply_damage(target, params.damage, Some(id)) {
                warn!(bomb = %id, victim = %target, error = %e, "Explosion damage failed");
            }
        }

        self.multicast(Multicast::ExplosionFx {
            entity: id,
            transform,
        })?;

        if let Some(bomb) = self.entities.get_mut(&id).and_then(Entity::as_bomb_mut) {
            // A spent fuse is already inactive; cancelling it is a no-op
            for previous in bomb.take_fuse_timer().into_iter().chain(bomb.take_cleanup_timer()) {
                self.scheduler.cancel(previous);
            }
            let cleanup =
                self.scheduler
                    .schedule(TimerAction::Destroy(id), params.destroy_delay, false);
            bomb.set_cleanup_timer(cleanup);
        }

        info!(bomb = %id, hits = hits.len(), "Bomb exploded");
        Ok(hits)
    }

    /// Damageable entities whose distance from `center` is at most `radius`
    pub fn damageables_in_radius(&self, center: Vec3, radius: f32) -> Vec<EntityId> {
        let mut hits: Vec<EntityId> = self
            .entities
            .values()
            .filter(|e| e.is_damageable())
            .filter(|e| PhysicsSystem::within_radius(center, e.transform.location, radius))
            .map(|e| e.id)
            .collect();
        hits.sort();
        hits
    }

    pub fn apply_damage(
        &mut self,
        target: EntityId,
        damage: f32,
        causer: Option<EntityId>,
    ) -> Result<DamageOutcome, GameError> {
        if !damage.is_finite() {
            return Err(GameError::InvalidDamage(damage));
        }

        let entity = self
            .entities
            .get_mut(&target)
            .ok_or(GameError::UnknownEntity(target))?;
        if !is_authority(entity) {
            return Err(GameError::NotAuthority(target));
        }

        let outcome = entity
            .damageable_mut()
            .ok_or(GameError::NotDamageable(target))?
            .take_damage(damage);
        entity.replicated().present(target, &mut *self.presentation);

        if outcome.respawned {
            info!(victim = %target, causer = ?causer, "Character killed and respawned");
        } else {
            debug!(victim = %target, damage, health = outcome.health, "Damage applied");
        }
        Ok(outcome)
    }

    /// Remove an entity and cancel its timers. Returns false if it was
    /// already gone.
    pub fn destroy(&mut self, id: EntityId) -> bool {
        let Some(mut entity) = self.entities.remove(&id) else {
            return false;
        };

        if let Some(bomb) = entity.as_bomb_mut() {
            for handle in bomb.take_timers() {
                self.scheduler.cancel(handle);
            }
        }

        if is_authority(&entity) {
            self.events.push(WorldEvent::Destroyed(id));
        }

        debug!(entity = %id, "Destroyed entity");
        true
    }

    /// Issue a broadcast: runs here now and is queued for every observer
    pub fn multicast(&mut self, call: Multicast) -> Result<(), GameError> {
        if !self.role.is_authority() {
            return Err(GameError::ObserverProcess);
        }
        self.execute_multicast(&call);
        self.events.push(WorldEvent::Multicast(call));
        Ok(())
    }

    /// Run a broadcast call's local presentation side effects
    pub fn execute_multicast(&mut self, call: &Multicast) {
        match call {
            Multicast::ExplosionFx { entity, transform } => match &self.config.explosion_fx {
                Some(effect) => self.presentation.spawn_effect(effect, *transform),
                None => debug!(bomb = %entity, "No explosion effect configured, skipping"),
            },
        }
    }

    /// Advance the simulation: due timers first, then projectile physics
    pub fn advance(&mut self, dt: Duration) {
        for action in self.scheduler.advance(dt) {
            self.run_timer(action);
        }

        let step = secs(dt);
        let mut bounces = Vec::new();
        for entity in self.entities.values_mut().filter(|e| e.is_movable()) {
            if let Some(bounce) = PhysicsSystem::step_projectile(
                &mut entity.transform.location,
                &mut entity.velocity,
                step,
                &self.projectile,
            ) {
                bounces.push((entity.id, bounce));
            }
        }

        for (id, bounce) in bounces {
            self.handle_bounce(id, bounce);
        }
    }

    fn run_timer(&mut self, action: TimerAction) {
        match action {
            TimerAction::Explode(id) => {
                if !self.contains(id) {
                    debug!(bomb = %id, "Fuse fired for a destroyed entity");
                    return;
                }
                if let Err(e) = self.explode(id) {
                    warn!(bomb = %id, error = %e, "Explosion failed");
                }
            }
            TimerAction::Destroy(id) => {
                if !self.destroy(id) {
                    debug!(entity = %id, "Cleanup fired for a destroyed entity");
                }
            }
        }
    }

    pub fn drain_events(&mut self) -> Vec<WorldEvent> {
        std::mem::take(&mut self.events)
    }

    /// Field changes written since the last drain, per entity in write order
    pub fn drain_field_updates(&mut self) -> Vec<FieldUpdate> {
        let mut updates = Vec::new();
        for entity in self.entities.values_mut().filter(|e| is_authority(e)) {
            let id = entity.id;
            updates.extend(
                entity
                    .replicated_mut()
                    .drain_field_updates()
                    .into_iter()
                    .map(|state| FieldUpdate { entity: id, state }),
            );
        }
        updates
    }

    /// Snapshot for an entity every observer is about to learn of. Its
    /// queued updates are dropped since the snapshot carries them.
    pub fn spawn_snapshot(&mut self, id: EntityId) -> Option<EntitySnapshot> {
        let entity = self.entities.get_mut(&id)?;
        entity.replicated_mut().discard_field_updates();
        Some(entity.snapshot())
    }

    // ---------------------------------------------------------------------
    // Observer operations
    // ---------------------------------------------------------------------

    /// Create a mirror from a spawn snapshot. Returns false if the entity is
    /// already known.
    pub fn apply_spawn(&mut self, snapshot: &EntitySnapshot) -> Result<bool, GameError> {
        if self.entities.contains_key(&snapshot.entity) {
            return Ok(false);
        }

        let entity = Entity::from_snapshot(snapshot, &self.config)?;
        entity
            .replicated()
            .present(snapshot.entity, &mut *self.presentation);
        self.entities.insert(snapshot.entity, entity);

        debug!(entity = %snapshot.entity, class = ?snapshot.class, "Mirrored entity");
        Ok(true)
    }

    /// Apply one replicated field change. The change hook runs only when the
    /// mirrored value actually changed.
    pub fn apply_update(&mut self, update: &FieldUpdate) -> Result<Applied, GameError> {
        let entity = self
            .entities
            .get_mut(&update.entity)
            .ok_or(ReplicationError::UnknownEntity(update.entity))?;
        if is_authority(entity) {
            return Err(ReplicationError::LocalAuthority(update.entity).into());
        }

        let applied = entity.replicated_mut().apply_field(&update.state)?;
        if applied == Applied::Changed {
            entity
                .replicated()
                .on_replicated(update.entity, update.state.field, &mut *self.presentation);
        }
        Ok(applied)
    }

    // ---------------------------------------------------------------------
    // Intent routing
    // ---------------------------------------------------------------------

    /// Route an intent by the subject's role: execute in place on the
    /// authority, or hand back the request to forward.
    pub fn dispatch(&mut self, intent: Intent) -> Result<Dispatch, GameError> {
        let subject = intent.subject();
        let entity = self
            .entities
            .get(&subject)
            .ok_or(GameError::UnknownEntity(subject))?;

        let route = entity.role.route();
        let out_of_bombs = matches!(intent, Intent::ThrowBomb { .. })
            && entity.as_character().is_some_and(|c| !c.has_bombs());

        if out_of_bombs {
            debug!(character = %subject, "Throw suppressed, no bombs left");
            return Ok(Dispatch::Suppressed);
        }

        match route {
            Route::Local => {
                rpc::execute(self, &intent.into())?;
                Ok(Dispatch::Applied)
            }
            Route::Remote => Ok(Dispatch::Forwarded(intent.into())),
        }
    }
}
