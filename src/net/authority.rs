//! Authority resolution
//!
//! Every process holds a [`Role`] per entity. The server spawns everything it
//! owns as [`Role::Authority`]; a client mirrors the same entities as
//! [`Role::Observer`]. Intent handlers consult [`is_authority`] and either
//! apply the change in-process or forward it to the authority.

use serde::{Deserialize, Serialize};

use crate::game::entity::Entity;

/// Role of the local process with respect to one entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Owns the canonical values and may write replicated fields
    Authority,
    /// Holds a read-only mirror fed by replication
    Observer,
}

/// Where a state-changing intent must execute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Apply directly, no network hop
    Local,
    /// Send an authority-bound request
    Remote,
}

impl Role {
    pub fn is_authority(self) -> bool {
        matches!(self, Role::Authority)
    }

    pub fn route(self) -> Route {
        match self {
            Role::Authority => Route::Local,
            Role::Observer => Route::Remote,
        }
    }
}

/// True when this process may write the entity's replicated fields
pub fn is_authority(entity: &Entity) -> bool {
    entity.role.is_authority()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authority_applies_locally_observer_forwards() {
        assert_eq!(Role::Authority.route(), Route::Local);
        assert_eq!(Role::Observer.route(), Route::Remote);
        assert!(Role::Authority.is_authority());
        assert!(!Role::Observer.is_authority());
    }
}
