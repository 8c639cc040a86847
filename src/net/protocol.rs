//! Wire message definitions
//! These are the JSON types exchanged between the authority and its observers

use glam::Vec3;
use serde::{Deserialize, Serialize};

use super::field::FieldState;
use super::{ConnectionId, EntityId};

/// Location and facing of an entity
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Transform {
    pub location: Vec3,
    /// Facing around the vertical axis, radians
    pub yaw: f32,
}

impl Transform {
    pub fn new(location: Vec3, yaw: f32) -> Self {
        Self { location, yaw }
    }

    /// Unit vector the entity faces on the ground plane
    pub fn forward(&self) -> Vec3 {
        Vec3::new(self.yaw.cos(), self.yaw.sin(), 0.0)
    }
}

/// Spawnable templates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityClass {
    Character,
    Bomb,
}

/// Full state of one entity, sent when an observer first learns about it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub entity: EntityId,
    pub class: EntityClass,
    pub transform: Transform,
    pub velocity: Vec3,
    pub owner: Option<ConnectionId>,
    pub instigator: Option<EntityId>,
    pub fields: Vec<FieldState>,
}

/// One replicated field change
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FieldUpdate {
    pub entity: EntityId,
    pub state: FieldState,
}

/// Authority-bound requests. Validated, then executed on the authority only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ServerRequest {
    /// Throw a bomb from the given character
    SpawnBomb { character: EntityId },
    /// Apply damage to a damageable entity
    TakeDamage {
        target: EntityId,
        damage: f32,
        causer: Option<EntityId>,
    },
}

/// Broadcast calls. Executed on every process, presentation only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum Multicast {
    /// Play the explosion effect where a bomb went off
    ExplosionFx { entity: EntityId, transform: Transform },
}

/// Messages sent from client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Ask the authority to perform a state change
    Request { request: ServerRequest },

    /// Ping for latency measurement
    Ping {
        /// Client timestamp
        t: u64,
    },
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// First message on a new connection
    Welcome {
        connection_id: ConnectionId,
        /// Character owned by this connection
        character: EntityId,
        server_time: u64,
    },

    /// An entity became visible to the observer
    Spawn { snapshot: EntitySnapshot },

    /// Field changes, in the order the authority wrote them
    Replicate { updates: Vec<FieldUpdate> },

    /// Broadcast call to run locally
    Multicast { call: Multicast },

    /// Entity was destroyed on the authority
    Despawn { entity: EntityId },

    /// Connection is being terminated by the authority
    Disconnect { reason: String },

    /// Pong response
    Pong {
        /// Echo back client timestamp
        t: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::field::{FieldId, FieldValue};

    #[test]
    fn client_request_wire_shape() {
        let msg = ClientMsg::Request {
            request: ServerRequest::SpawnBomb {
                character: EntityId(uuid::Uuid::nil()),
            },
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "request");
        assert_eq!(json["request"]["op"], "spawn_bomb");
        assert_eq!(json["request"]["character"], uuid::Uuid::nil().to_string());
    }

    #[test]
    fn replicate_message_parses() {
        let raw = format!(
            r#"{{"type":"replicate","updates":[{{"entity":"{}","state":{{"field":"health","value":{{"kind":"float","value":60.0}},"sequence":1}}}}]}}"#,
            uuid::Uuid::nil()
        );
        let msg: ServerMsg = serde_json::from_str(&raw).unwrap();
        match msg {
            ServerMsg::Replicate { updates } => {
                assert_eq!(updates.len(), 1);
                assert_eq!(updates[0].state.field, FieldId::Health);
                assert_eq!(updates[0].state.value, FieldValue::Float(60.0));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn forward_follows_yaw() {
        let t = Transform::new(Vec3::ZERO, std::f32::consts::FRAC_PI_2);
        let f = t.forward();
        assert!(f.x.abs() < 1e-6);
        assert!((f.y - 1.0).abs() < 1e-6);
    }
}
