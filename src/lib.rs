//! Authoritative replication core for a multiplayer bomb-throwing arena
//!
//! The server owns every replicated field; clients mirror them through
//! sequenced field updates and ask for changes with authority-bound requests.

pub mod app;
pub mod config;
pub mod game;
pub mod http;
pub mod net;
pub mod util;
pub mod ws;
