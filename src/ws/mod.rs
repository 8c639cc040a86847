//! WebSocket bridge onto the game transport

pub mod handler;
