//! Replication core: authority, replicated fields, wire protocol, transport and
//! remote invocation

pub mod authority;
pub mod field;
pub mod protocol;
pub mod rpc;
pub mod transport;

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use authority::{is_authority, Role, Route};
pub use field::{FieldId, FieldState, FieldType, FieldValue, ReplicatedField};

/// Identity of a replicated entity, assigned by the authority at spawn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub Uuid);

impl EntityId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identity of a client connection, assigned when the transport accepts it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
