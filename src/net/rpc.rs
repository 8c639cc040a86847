//! Remote invocation
//!
//! Intents name a state change. [`crate::game::world::World::dispatch`] sends
//! an intent through the authority check: applied in place on the authority,
//! turned into a [`ServerRequest`] everywhere else. On the authority, a
//! request first passes a [`RequestValidator`], then [`execute`] runs it.

use tracing::debug;

use crate::game::world::{GameError, World};

use super::protocol::ServerRequest;
use super::{ConnectionId, EntityId};

/// A validator refused a request
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct Rejection(pub String);

/// Remote invocation errors
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("Request rejected: {0}")]
    Rejected(#[from] Rejection),

    #[error("Request from unknown connection {0}")]
    UnknownCaller(ConnectionId),

    #[error(transparent)]
    Game(#[from] GameError),
}

/// Predicate run on the authority before any request executes. A rejection
/// terminates the caller's connection.
pub trait RequestValidator: Send {
    fn validate(&self, caller: ConnectionId, request: &ServerRequest) -> Result<(), Rejection>;
}

impl<F> RequestValidator for F
where
    F: Fn(ConnectionId, &ServerRequest) -> Result<(), Rejection> + Send,
{
    fn validate(&self, caller: ConnectionId, request: &ServerRequest) -> Result<(), Rejection> {
        self(caller, request)
    }
}

/// Accepts every request. Not a security boundary: install a real validator
/// (ownership, cooldown, range) before exposing the server.
#[derive(Debug, Default, Clone, Copy)]
pub struct TrustAll;

impl RequestValidator for TrustAll {
    fn validate(&self, _caller: ConnectionId, _request: &ServerRequest) -> Result<(), Rejection> {
        Ok(())
    }
}

/// A state change some process wants to happen
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    ThrowBomb {
        character: EntityId,
    },
    TakeDamage {
        target: EntityId,
        damage: f32,
        causer: Option<EntityId>,
    },
}

impl Intent {
    /// Entity whose authority decides the route
    pub fn subject(&self) -> EntityId {
        match self {
            Intent::ThrowBomb { character } => *character,
            Intent::TakeDamage { target, .. } => *target,
        }
    }
}

impl From<Intent> for ServerRequest {
    fn from(intent: Intent) -> Self {
        match intent {
            Intent::ThrowBomb { character } => ServerRequest::SpawnBomb { character },
            Intent::TakeDamage {
                target,
                damage,
                causer,
            } => ServerRequest::TakeDamage {
                target,
                damage,
                causer,
            },
        }
    }
}

/// What happened to an intent
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// Executed on this process (it holds authority)
    Applied,
    /// Must be sent to the authority
    Forwarded(ServerRequest),
    /// Dropped locally by a guard (e.g. no bombs left in the mirror)
    Suppressed,
}

/// Execute a validated request on the authority
pub fn execute(world: &mut World, request: &ServerRequest) -> Result<(), GameError> {
    match request {
        ServerRequest::SpawnBomb { character } => {
            let bomb = world.throw_bomb(*character)?;
            debug!(character = %character, bomb = ?bomb, "Executed spawn_bomb");
        }
        ServerRequest::TakeDamage {
            target,
            damage,
            causer,
        } => {
            let outcome = world.apply_damage(*target, *damage, *causer)?;
            debug!(victim = %target, damage, health = outcome.health, "Executed take_damage");
        }
    }
    Ok(())
}
