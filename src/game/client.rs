//! Observer process
//!
//! Mirrors the authority's entities from the replication stream, runs change
//! hooks and broadcasts locally, and forwards intents it cannot apply itself.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::GameConfig;
use crate::net::protocol::{ClientMsg, ServerMsg};
use crate::net::rpc::{Dispatch, Intent};
use crate::net::transport::{ClientTransport, TransportError};
use crate::net::{ConnectionId, EntityId, Role};
use crate::util::time::unix_millis;

use super::character::Character;
use super::presentation::Presentation;
use super::world::{GameError, World};

/// Client errors
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Game(#[from] GameError),

    #[error("Not joined yet")]
    NotJoined,
}

pub struct GameClient<T: ClientTransport> {
    world: World,
    transport: T,
    connection_id: Option<ConnectionId>,
    /// Character this connection possesses
    character: Option<EntityId>,
    disconnect_reason: Option<String>,
    last_rtt_ms: Option<u64>,
}

impl<T: ClientTransport> GameClient<T> {
    pub fn new(config: GameConfig, transport: T, presentation: Box<dyn Presentation>) -> Self {
        Self {
            world: World::new(Role::Observer, config, presentation),
            transport,
            connection_id: None,
            character: None,
            disconnect_reason: None,
            last_rtt_ms: None,
        }
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.connection_id
    }

    pub fn character(&self) -> Option<EntityId> {
        self.character
    }

    /// Mirror of the possessed character, once it has been replicated
    pub fn my_character(&self) -> Option<&Character> {
        self.character.and_then(|id| self.world.character(id))
    }

    pub fn disconnect_reason(&self) -> Option<&str> {
        self.disconnect_reason.as_deref()
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnect_reason.is_some()
    }

    pub fn last_rtt_ms(&self) -> Option<u64> {
        self.last_rtt_ms
    }

    /// Apply every message that has arrived. Returns how many were handled.
    pub fn poll(&mut self) -> usize {
        let mut handled = 0;
        while let Some(msg) = self.transport.try_recv() {
            self.handle_message(msg);
            handled += 1;
        }
        handled
    }

    /// Poll, then move mirrored projectiles locally
    pub fn tick(&mut self, dt: Duration) {
        self.poll();
        self.world.advance(dt);
    }

    pub fn handle_message(&mut self, msg: ServerMsg) {
        match msg {
            ServerMsg::Welcome {
                connection_id,
                character,
                server_time,
            } => {
                info!(
                    connection_id = %connection_id,
                    character = %character,
                    server_time,
                    "Joined server"
                );
                self.connection_id = Some(connection_id);
                self.character = Some(character);
            }
            ServerMsg::Spawn { snapshot } => {
                if let Err(e) = self.world.apply_spawn(&snapshot) {
                    warn!(entity = %snapshot.entity, error = %e, "Failed to mirror entity");
                }
            }
            ServerMsg::Replicate { updates } => {
                for update in &updates {
                    if let Err(e) = self.world.apply_update(update) {
                        warn!(entity = %update.entity, error = %e, "Failed to apply update");
                    }
                }
            }
            ServerMsg::Multicast { call } => self.world.execute_multicast(&call),
            ServerMsg::Despawn { entity } => {
                self.world.destroy(entity);
            }
            ServerMsg::Disconnect { reason } => {
                warn!(reason = %reason, "Disconnected by server");
                self.disconnect_reason = Some(reason);
            }
            ServerMsg::Pong { t } => {
                let rtt = unix_millis().saturating_sub(t);
                debug!(rtt_ms = rtt, "Pong");
                self.last_rtt_ms = Some(rtt);
            }
        }
    }

    /// Route an intent through the mirror. Forwarded intents are sent to the
    /// authority; the mirror only changes once replication comes back.
    pub fn submit(&mut self, intent: Intent) -> Result<Dispatch, ClientError> {
        let dispatch = self.world.dispatch(intent)?;
        if let Dispatch::Forwarded(request) = &dispatch {
            self.transport.send(ClientMsg::Request {
                request: request.clone(),
            })?;
        }
        Ok(dispatch)
    }

    pub fn throw_bomb(&mut self) -> Result<Dispatch, ClientError> {
        let character = self.character.ok_or(ClientError::NotJoined)?;
        self.submit(Intent::ThrowBomb { character })
    }

    /// Ask the authority to damage `target`, caused by the possessed character
    pub fn request_damage(&mut self, target: EntityId, damage: f32) -> Result<Dispatch, ClientError> {
        self.submit(Intent::TakeDamage {
            target,
            damage,
            causer: self.character,
        })
    }

    pub fn ping(&mut self) -> Result<(), ClientError> {
        self.transport.send(ClientMsg::Ping { t: unix_millis() })?;
        Ok(())
    }
}
