//! Game simulation modules

pub mod bomb;
pub mod character;
pub mod client;
pub mod entity;
pub mod physics;
pub mod presentation;
pub mod scheduler;
pub mod server;
pub mod world;

#[cfg(test)]
mod scenario_tests;

pub use client::{ClientError, GameClient};
pub use server::{GameServer, ServerHandle};
pub use world::{GameError, World};
