//! End-to-end scenarios: one server, observers over the channel transport,
//! ticked by hand

use std::time::Duration;

use tokio::sync::watch;

use crate::config::GameConfig;
use crate::net::field::{FieldId, FieldState, FieldValue};
use crate::net::protocol::{EntityClass, FieldUpdate, ServerMsg, ServerRequest};
use crate::net::rpc::{Dispatch, Rejection};
use crate::net::transport::{channel_transport, ChannelClientTransport, ChannelHub, ChannelServerTransport};
use crate::net::{ConnectionId, EntityId};

use super::presentation::{LogPresentation, RecordingPresentation};
use super::{GameClient, GameServer};

type Server = GameServer<ChannelServerTransport>;
type Client = GameClient<ChannelClientTransport>;

fn start(config: GameConfig) -> (Server, ChannelHub, RecordingPresentation) {
    let (hub, transport) = channel_transport();
    let presentation = RecordingPresentation::new();
    let server = GameServer::new(config, transport, Box::new(presentation.clone()));
    (server, hub, presentation)
}

fn join(server: &mut Server, hub: &ChannelHub) -> (Client, RecordingPresentation) {
    let presentation = RecordingPresentation::new();
    let config = server.world().config().clone();
    let mut client = GameClient::new(config, hub.connect().unwrap(), Box::new(presentation.clone()));
    server.tick(dt());
    client.poll();
    assert!(client.character().is_some());
    (client, presentation)
}

fn dt() -> Duration {
    GameConfig::default().tick_duration()
}

/// One server tick, then every client drains its inbox
fn step(server: &mut Server, clients: &mut [&mut Client]) {
    server.tick(dt());
    for client in clients.iter_mut() {
        client.poll();
    }
}

fn bomb_of(server: &Server) -> EntityId {
    server
        .world()
        .entities()
        .find(|e| e.class() == EntityClass::Bomb)
        .map(|e| e.id)
        .unwrap()
}

#[test]
fn damage_propagates_and_respawns_at_zero() {
    let (mut server, hub, _) = start(GameConfig::default());
    let (mut a, a_view) = join(&mut server, &hub);
    let (mut b, _) = join(&mut server, &hub);
    a.poll();
    let target = a.character().unwrap();

    assert!(matches!(
        b.request_damage(target, 40.0).unwrap(),
        Dispatch::Forwarded(_)
    ));
    // Nothing moves until the authority executes
    assert_eq!(b.world().character(target).unwrap().health(), 100.0);
    assert_eq!(server.world().character(target).unwrap().health(), 100.0);

    step(&mut server, &mut [&mut a, &mut b]);
    assert_eq!(server.world().character(target).unwrap().health(), 60.0);
    assert_eq!(a.my_character().unwrap().health(), 60.0);
    assert_eq!(b.world().character(target).unwrap().health(), 60.0);
    assert_eq!(
        a_view.text_of(target).as_deref(),
        Some("Health: 60 BombCount: 3")
    );

    b.request_damage(target, 70.0).unwrap();
    step(&mut server, &mut [&mut a, &mut b]);
    assert_eq!(server.world().character(target).unwrap().health(), 100.0);
    assert_eq!(a.my_character().unwrap().health(), 100.0);
    assert_eq!(b.world().character(target).unwrap().health(), 100.0);
}

#[test]
fn throw_decrements_bomb_count_everywhere() {
    let (mut server, hub, _) = start(GameConfig::default());
    let (mut a, _) = join(&mut server, &hub);
    let (mut b, b_view) = join(&mut server, &hub);
    a.poll();
    let thrower = a.character().unwrap();

    a.throw_bomb().unwrap();
    assert_eq!(a.my_character().unwrap().bomb_count(), 3);

    step(&mut server, &mut [&mut a, &mut b]);
    assert_eq!(server.world().character(thrower).unwrap().bomb_count(), 2);
    assert_eq!(a.my_character().unwrap().bomb_count(), 2);
    assert_eq!(b.world().character(thrower).unwrap().bomb_count(), 2);
    assert_eq!(
        b_view.text_of(thrower).as_deref(),
        Some("Health: 100 BombCount: 2")
    );

    let bomb = bomb_of(&server);
    let mirrored = b.world().entity(bomb).unwrap();
    assert_eq!(mirrored.instigator, Some(thrower));
    assert_eq!(mirrored.owner, a.connection_id());
}

#[test]
fn observers_move_mirrored_bombs_between_updates() {
    let (mut server, hub, _) = start(GameConfig::default());
    let (mut a, _) = join(&mut server, &hub);
    let (mut b, _) = join(&mut server, &hub);

    a.throw_bomb().unwrap();
    step(&mut server, &mut [&mut a, &mut b]);
    let bomb = bomb_of(&server);
    let mirrored_at_spawn = b.world().entity(bomb).unwrap().transform.location;
    assert_eq!(
        mirrored_at_spawn,
        server.world().entity(bomb).unwrap().transform.location
    );

    server.tick(dt());
    b.tick(dt());

    let mirrored = b.world().entity(bomb).unwrap().transform.location;
    assert_ne!(mirrored, mirrored_at_spawn);
    assert_eq!(mirrored, server.world().entity(bomb).unwrap().transform.location);
}

#[test]
fn ping_measures_round_trip() {
    let (mut server, hub, _) = start(GameConfig::default());
    let (mut a, _) = join(&mut server, &hub);
    assert_eq!(a.last_rtt_ms(), None);

    a.ping().unwrap();
    server.tick(dt());
    a.tick(dt());

    let rtt = a.last_rtt_ms().unwrap();
    assert!(rtt < 1_000, "rtt {rtt}ms");
}

#[test]
fn throwing_at_zero_never_goes_negative() {
    let config = GameConfig {
        max_bomb_count: 1,
        ..GameConfig::default()
    };
    let (mut server, hub, _) = start(config);
    let (mut a, _) = join(&mut server, &hub);
    let thrower = a.character().unwrap();

    // Both pass the mirror guard: the mirror still shows one bomb
    assert!(matches!(a.throw_bomb().unwrap(), Dispatch::Forwarded(_)));
    assert!(matches!(a.throw_bomb().unwrap(), Dispatch::Forwarded(_)));

    step(&mut server, &mut [&mut a]);
    assert_eq!(server.world().character(thrower).unwrap().bomb_count(), 0);
    assert_eq!(a.my_character().unwrap().bomb_count(), 0);
    assert_eq!(
        server
            .world()
            .entities()
            .filter(|e| e.class() == EntityClass::Bomb)
            .count(),
        1
    );
    // Refusal is not a protocol violation
    assert!(!a.is_disconnected());

    assert_eq!(a.throw_bomb().unwrap(), Dispatch::Suppressed);
}

#[test]
fn explosion_fx_runs_once_per_process_and_bomb_leaves_after_grace() {
    let (mut server, hub, server_view) = start(GameConfig::default());
    let (mut a, a_view) = join(&mut server, &hub);
    let (mut b, b_view) = join(&mut server, &hub);
    a.poll();

    a.throw_bomb().unwrap();
    step(&mut server, &mut [&mut a, &mut b]);
    let bomb = bomb_of(&server);
    assert!(b.world().contains(bomb));

    let mut ticks = 0;
    while !server.world().bomb(bomb).unwrap().has_exploded() {
        step(&mut server, &mut [&mut a, &mut b]);
        ticks += 1;
        assert!(ticks < 300, "bomb never exploded");
    }

    assert_eq!(server_view.effect_count(), 1);
    assert_eq!(a_view.effect_count(), 1);
    assert_eq!(b_view.effect_count(), 1);
    assert_eq!(b_view.visible_state().tint.len(), 1);

    // Grace is 0.3 s; nine ticks is just short of it
    for _ in 0..9 {
        step(&mut server, &mut [&mut a, &mut b]);
    }
    assert!(server.world().contains(bomb));
    assert!(b.world().contains(bomb));

    step(&mut server, &mut [&mut a, &mut b]);
    assert!(!server.world().contains(bomb));
    assert!(!a.world().contains(bomb));
    assert!(!b.world().contains(bomb));
    assert_eq!(a_view.effect_count(), 1);
}

#[test]
fn rejected_request_terminates_the_caller() {
    let (hub, transport) = channel_transport();
    let mut server = GameServer::new(GameConfig::default(), transport, Box::new(LogPresentation))
        .with_validator(|_: ConnectionId, request: &ServerRequest| match request {
            ServerRequest::TakeDamage { .. } => Err(Rejection("damage is server-only".to_string())),
            ServerRequest::SpawnBomb { .. } => Ok(()),
        });
    let (mut a, _) = join(&mut server, &hub);
    let (mut b, _) = join(&mut server, &hub);
    a.poll();
    let a_char = a.character().unwrap();
    let b_char = b.character().unwrap();

    a.request_damage(b_char, 10.0).unwrap();
    step(&mut server, &mut [&mut a, &mut b]);

    assert_eq!(a.disconnect_reason(), Some("damage is server-only"));
    assert_eq!(server.world().character(b_char).unwrap().health(), 100.0);
    assert!(!server.world().contains(a_char));
    assert!(!b.world().contains(a_char));
    assert_eq!(server.connection_count(), 1);
}

#[test]
fn redelivered_values_leave_the_same_visible_state() {
    let (mut server, hub, _) = start(GameConfig::default());
    let (mut a, a_view) = join(&mut server, &hub);
    let character = a.character().unwrap();

    let update = |sequence| ServerMsg::Replicate {
        updates: vec![FieldUpdate {
            entity: character,
            state: FieldState {
                field: FieldId::Health,
                value: FieldValue::Float(60.0),
                sequence,
            },
        }],
    };

    a.handle_message(update(1));
    let seen = a_view.visible_state();
    let calls = a_view.calls().len();

    a.handle_message(update(1));
    assert_eq!(a_view.visible_state(), seen);

    // A newer sequence carrying an equal value does not rerun the hook
    a.handle_message(update(2));
    assert_eq!(a_view.calls().len(), calls);
    assert_eq!(a.my_character().unwrap().health(), 60.0);
}

#[test]
fn field_writes_arrive_in_order() {
    let (mut server, hub, _) = start(GameConfig::default());
    let (mut a, a_view) = join(&mut server, &hub);
    let (mut b, _) = join(&mut server, &hub);
    a.poll();
    let target = a.character().unwrap();

    for damage in [10.0, 20.0, 30.0] {
        b.request_damage(target, damage).unwrap();
    }
    a_view.clear();
    step(&mut server, &mut [&mut a, &mut b]);

    let texts: Vec<String> = a_view
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            super::presentation::PresentationCall::SetText { entity, text } if entity == target => {
                Some(text)
            }
            _ => None,
        })
        .collect();
    assert_eq!(
        texts,
        vec![
            "Health: 90 BombCount: 3",
            "Health: 70 BombCount: 3",
            "Health: 40 BombCount: 3",
        ]
    );
}

#[tokio::test]
async fn run_loop_serves_until_shutdown() {
    let (hub, transport) = channel_transport();
    let server = GameServer::new(GameConfig::default(), transport, Box::new(LogPresentation));
    let handle = server.handle();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(server.run(shutdown_rx));

    let mut client = GameClient::new(
        GameConfig::default(),
        hub.connect().unwrap(),
        Box::new(RecordingPresentation::new()),
    );
    for _ in 0..100 {
        client.poll();
        if client.my_character().is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(client.my_character().is_some());
    assert_eq!(handle.connections(), 1);

    shutdown_tx.send(true).unwrap();
    tokio_test::assert_ok!(task.await);

    client.poll();
    assert_eq!(client.disconnect_reason(), Some("Server shutting down"));
}
