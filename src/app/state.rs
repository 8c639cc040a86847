//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::game::ServerHandle;
use crate::net::transport::ChannelHub;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// Entry point for new connections into the game server
    pub hub: ChannelHub,
    pub server: ServerHandle,
}

impl AppState {
    pub fn new(config: Config, hub: ChannelHub, server: ServerHandle) -> Self {
        Self {
            config: Arc::new(config),
            hub,
            server,
        }
    }
}
