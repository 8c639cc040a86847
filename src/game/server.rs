//! Authoritative server loop
//!
//! Each tick drains connection events and requests, advances the world, then
//! flushes replication to every joined connection in a fixed order: spawns,
//! field updates, broadcasts, despawns.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::GameConfig;
use crate::net::protocol::{ClientMsg, EntitySnapshot, ServerMsg, ServerRequest};
use crate::net::rpc::{self, RequestValidator, RpcError, TrustAll};
use crate::net::transport::{Inbound, ServerTransport};
use crate::net::{ConnectionId, EntityId, Role};
use crate::util::time::unix_millis;

use super::entity::Entity;
use super::presentation::Presentation;
use super::world::{World, WorldEvent};

/// Live counters readable from outside the server task
#[derive(Debug, Clone, Default)]
pub struct ServerHandle {
    connections: Arc<AtomicUsize>,
    entities: Arc<AtomicUsize>,
}

impl ServerHandle {
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }

    pub fn entities(&self) -> usize {
        self.entities.load(Ordering::Relaxed)
    }
}

pub struct GameServer<T: ServerTransport> {
    world: World,
    transport: T,
    validator: Box<dyn RequestValidator>,
    /// Joined connections and the character each one possesses
    connections: HashMap<ConnectionId, EntityId>,
    tick: u64,
    handle: ServerHandle,
}

impl<T: ServerTransport> GameServer<T> {
    pub fn new(config: GameConfig, transport: T, presentation: Box<dyn Presentation>) -> Self {
        Self {
            world: World::new(Role::Authority, config, presentation),
            transport,
            validator: Box::new(TrustAll),
            connections: HashMap::new(),
            tick: 0,
            handle: ServerHandle::default(),
        }
    }

    /// Replace the request validator. Rejected requests terminate the caller.
    pub fn with_validator<V: RequestValidator + 'static>(mut self, validator: V) -> Self {
        self.validator = Box::new(validator);
        self
    }

    pub fn handle(&self) -> ServerHandle {
        self.handle.clone()
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Character possessed by a connection
    pub fn character_of(&self, connection: ConnectionId) -> Option<EntityId> {
        self.connections.get(&connection).copied()
    }

    /// Run the fixed-tick loop until `shutdown` flips to true or its sender
    /// is dropped
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let tick_duration = self.world.config().tick_duration();
        info!(
            tps = self.world.config().simulation_tps,
            "Game server started"
        );

        let mut tick_interval = interval(tick_duration);
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = tick_interval.tick() => self.tick(tick_duration),
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.shutdown("Server shutting down");
        info!(ticks = self.tick, "Game server stopped");
    }

    /// One simulation step
    pub fn tick(&mut self, dt: Duration) {
        self.tick += 1;

        self.process_inbound();
        self.world.advance(dt);
        self.flush();

        self.handle
            .connections
            .store(self.connections.len(), Ordering::Relaxed);
        self.handle
            .entities
            .store(self.world.len(), Ordering::Relaxed);
    }

    fn process_inbound(&mut self) {
        while let Some(inbound) = self.transport.try_recv() {
            match inbound {
                Inbound::Connected(id) => self.handle_connect(id),
                Inbound::Message(id, msg) => self.handle_message(id, msg),
                Inbound::Disconnected(id) => self.handle_disconnect(id),
            }
        }
    }

    fn handle_connect(&mut self, id: ConnectionId) {
        if self.connections.contains_key(&id) {
            warn!(connection_id = %id, "Connection already joined");
            return;
        }

        // Everyone already joined must be caught up before the newcomer's
        // snapshot is cut
        self.flush();

        let character = match self.world.spawn_character(Some(id)) {
            Ok(character) => character,
            Err(e) => {
                error!(connection_id = %id, error = %e, "Failed to spawn character");
                self.transport.disconnect(id);
                return;
            }
        };

        let welcome = ServerMsg::Welcome {
            connection_id: id,
            character,
            server_time: unix_millis(),
        };
        if let Err(e) = self.transport.send_to(id, welcome) {
            warn!(connection_id = %id, error = %e, "Connection closed before welcome");
            self.world.destroy(character);
            self.transport.disconnect(id);
            return;
        }

        // The new character goes out to everyone with the next flush
        let existing: Vec<EntitySnapshot> = self
            .world
            .entities()
            .filter(|e| e.id != character)
            .map(Entity::snapshot)
            .collect();
        for snapshot in existing {
            if self
                .transport
                .send_to(id, ServerMsg::Spawn { snapshot })
                .is_err()
            {
                break;
            }
        }

        self.connections.insert(id, character);
        info!(
            connection_id = %id,
            character = %character,
            players = self.connections.len(),
            "Player joined"
        );
    }

    fn handle_message(&mut self, id: ConnectionId, msg: ClientMsg) {
        match msg {
            ClientMsg::Request { request } => {
                if let Err(e) = self.handle_request(id, &request) {
                    match &e {
                        RpcError::Rejected(_) => {
                            warn!(connection_id = %id, error = %e, "Request rejected")
                        }
                        RpcError::UnknownCaller(_) => {
                            debug!(connection_id = %id, "Request from a connection that left")
                        }
                        RpcError::Game(_) => {
                            warn!(connection_id = %id, error = %e, "Request failed")
                        }
                    }
                }
            }
            ClientMsg::Ping { t } => {
                let _ = self.transport.send_to(id, ServerMsg::Pong { t });
            }
        }
    }

    /// Validate then execute an authority-bound request. A rejection closes
    /// the caller's connection before anything is applied.
    fn handle_request(
        &mut self,
        caller: ConnectionId,
        request: &ServerRequest,
    ) -> Result<(), RpcError> {
        if !self.connections.contains_key(&caller) {
            return Err(RpcError::UnknownCaller(caller));
        }

        if let Err(rejection) = self.validator.validate(caller, request) {
            self.terminate(caller, &rejection.0);
            return Err(rejection.into());
        }

        rpc::execute(&mut self.world, request)?;
        Ok(())
    }

    fn handle_disconnect(&mut self, id: ConnectionId) {
        // The peer is gone, release its outbound channel too
        self.transport.disconnect(id);
        self.drop_connection(id);
    }

    /// Close a connection from the server side
    fn terminate(&mut self, id: ConnectionId, reason: &str) {
        let _ = self.transport.send_to(
            id,
            ServerMsg::Disconnect {
                reason: reason.to_string(),
            },
        );
        self.transport.disconnect(id);
        self.drop_connection(id);
    }

    fn drop_connection(&mut self, id: ConnectionId) {
        let Some(character) = self.connections.remove(&id) else {
            return;
        };
        self.world.destroy(character);
        info!(
            connection_id = %id,
            players = self.connections.len(),
            "Player left"
        );
    }

    /// Send everything the world queued since the last flush
    fn flush(&mut self) {
        let mut spawned = Vec::new();
        let mut calls = Vec::new();
        let mut despawned = Vec::new();
        for event in self.world.drain_events() {
            match event {
                WorldEvent::Spawned(id) => spawned.push(id),
                WorldEvent::Multicast(call) => calls.push(call),
                WorldEvent::Destroyed(id) => despawned.push(id),
            }
        }

        // Snapshots first: they absorb the pending updates of new entities
        let mut messages: Vec<ServerMsg> = spawned
            .into_iter()
            .filter_map(|id| self.world.spawn_snapshot(id))
            .map(|snapshot| ServerMsg::Spawn { snapshot })
            .collect();

        let updates = self.world.drain_field_updates();
        if !updates.is_empty() {
            messages.push(ServerMsg::Replicate { updates });
        }
        messages.extend(calls.into_iter().map(|call| ServerMsg::Multicast { call }));
        messages.extend(
            despawned
                .into_iter()
                .map(|entity| ServerMsg::Despawn { entity }),
        );

        if messages.is_empty() {
            return;
        }
        self.broadcast(&messages);
    }

    fn broadcast(&mut self, messages: &[ServerMsg]) {
        for &connection in self.connections.keys() {
            for msg in messages {
                if let Err(e) = self.transport.send_to(connection, msg.clone()) {
                    debug!(connection_id = %connection, error = %e, "Dropped outbound message");
                    break;
                }
            }
        }
    }

    /// Tell every connection the server is going away and close it
    fn shutdown(&mut self, reason: &str) {
        let connections: Vec<ConnectionId> = self.connections.keys().copied().collect();
        for id in connections {
            self.terminate(id, reason);
        }
        self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::presentation::RecordingPresentation;
    use crate::net::protocol::EntityClass;
    use crate::net::transport::{channel_transport, ChannelServerTransport, ClientTransport};

    fn server() -> (GameServer<ChannelServerTransport>, crate::net::transport::ChannelHub) {
        let (hub, transport) = channel_transport();
        let server = GameServer::new(
            GameConfig::default(),
            transport,
            Box::new(RecordingPresentation::new()),
        );
        (server, hub)
    }

    fn dt() -> Duration {
        GameConfig::default().tick_duration()
    }

    #[test]
    fn join_sends_welcome_then_spawns_the_character() {
        let (mut server, hub) = server();
        let mut client = hub.connect().unwrap();

        server.tick(dt());

        let mut inbox = Vec::new();
        client.on_receive(|msg| inbox.push(msg));
        assert_eq!(inbox.len(), 2);

        let ServerMsg::Welcome { character, .. } = inbox[0].clone() else {
            panic!("expected welcome, got {:?}", inbox[0]);
        };
        match &inbox[1] {
            ServerMsg::Spawn { snapshot } => {
                assert_eq!(snapshot.entity, character);
                assert_eq!(snapshot.class, EntityClass::Character);
                assert_eq!(snapshot.owner, Some(client.id()));
            }
            other => panic!("expected spawn, got {other:?}"),
        }
        assert_eq!(server.character_of(client.id()), Some(character));
        assert_eq!(server.handle().connections(), 1);
        assert_eq!(server.handle().entities(), 1);
    }

    #[test]
    fn tick_counter_advances_once_per_step() {
        let (mut server, _hub) = server();
        assert_eq!(server.tick_count(), 0);
        for _ in 0..3 {
            server.tick(dt());
        }
        assert_eq!(server.tick_count(), 3);
    }

    #[test]
    fn late_joiner_receives_existing_entities_once() {
        let (mut server, hub) = server();
        let _first = hub.connect().unwrap();
        server.tick(dt());

        let mut second = hub.connect().unwrap();
        server.tick(dt());

        let mut spawns = 0;
        second.on_receive(|msg| {
            if matches!(msg, ServerMsg::Spawn { .. }) {
                spawns += 1;
            }
        });
        assert_eq!(spawns, 2);
    }

    #[test]
    fn disconnect_destroys_the_character() {
        let (mut server, hub) = server();
        let client = hub.connect().unwrap();
        server.tick(dt());
        let character = server.character_of(client.id()).unwrap();

        drop(client);
        server.tick(dt());

        assert!(!server.world().contains(character));
        assert_eq!(server.connection_count(), 0);
    }

    #[test]
    fn dropped_clients_release_their_transport_peers() {
        let (mut server, hub) = server();
        for _ in 0..5 {
            let client = hub.connect().unwrap();
            server.tick(dt());
            assert_eq!(hub.connection_count(), 1);
            drop(client);
            server.tick(dt());
        }

        assert_eq!(server.connection_count(), 0);
        assert_eq!(hub.connection_count(), 0);
        assert_eq!(server.handle().connections(), 0);
    }

    #[test]
    fn client_gone_before_welcome_is_released() {
        let (mut server, hub) = server();
        let client = hub.connect().unwrap();
        let (sender, inbox) = client.split();
        // Inbox dropped: the welcome cannot be delivered
        drop(inbox);
        server.tick(dt());

        assert_eq!(server.connection_count(), 0);
        assert_eq!(hub.connection_count(), 0);
        assert!(server.world().is_empty());
        drop(sender);
        server.tick(dt());
        assert_eq!(hub.connection_count(), 0);
    }

    #[test]
    fn ping_is_echoed() {
        let (mut server, hub) = server();
        let mut client = hub.connect().unwrap();
        client.send(ClientMsg::Ping { t: 42 }).unwrap();
        server.tick(dt());

        let mut pongs = Vec::new();
        client.on_receive(|msg| {
            if let ServerMsg::Pong { t } = msg {
                pongs.push(t);
            }
        });
        assert_eq!(pongs, vec![42]);
    }
}
