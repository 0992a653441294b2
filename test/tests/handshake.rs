mod common;

use common::*;
use riptide_client::ClientEvent;
use riptide_server::ServerEvent;
use riptide_shared::{ConnectionFailedReason, RejectReason};
use std::time::Duration;

#[test]
fn auto_accept_handshake_assigns_matching_ids_both_sides() {
    let (mut client, mut server) = new_pair(false);
    client.connect("127.0.0.1", 0, 3, None).unwrap();

    let (client_events, server_events) =
        pump(&mut client, &mut server, Duration::from_millis(500), |c, _| connected(c));

    let assigned_id = client_events
        .iter()
        .find_map(|e| match e {
            ClientEvent::Connected { assigned_id } => Some(*assigned_id),
            _ => None,
        })
        .expect("client never connected");
    assert_eq!(client.assigned_id(), Some(assigned_id));

    assert!(server_events
        .iter()
        .any(|e| matches!(e, ServerEvent::ClientConnected(id) if *id == assigned_id)));
}

#[test]
fn manual_accept_requires_explicit_accept_call() {
    let (mut client, mut server) = new_pair(true);
    client.connect("127.0.0.1", 0, 3, None).unwrap();

    let (_, server_events) = pump(&mut client, &mut server, Duration::from_millis(200), |_, s| {
        s.iter().any(|e| matches!(e, ServerEvent::ConnectionRequested(_)))
    });
    assert!(client.assigned_id().is_none(), "client should not be connected yet");

    let handle = server_events
        .iter()
        .find_map(|e| match e {
            ServerEvent::ConnectionRequested(h) => Some(*h),
            _ => None,
        })
        .expect("server never requested a decision");
    server.accept(&handle);

    let (client_events, _) =
        pump(&mut client, &mut server, Duration::from_millis(300), |c, _| connected(c));
    assert!(connected(&client_events));
}

#[test]
fn manual_reject_surfaces_as_connection_failed() {
    let (mut client, mut server) = new_pair(true);
    client.connect("127.0.0.1", 0, 3, None).unwrap();

    let (_, server_events) = pump(&mut client, &mut server, Duration::from_millis(200), |_, s| {
        s.iter().any(|e| matches!(e, ServerEvent::ConnectionRequested(_)))
    });
    let handle = server_events
        .iter()
        .find_map(|e| match e {
            ServerEvent::ConnectionRequested(h) => Some(*h),
            _ => None,
        })
        .unwrap();
    server.reject(&handle, RejectReason::ServerFull, None);

    let (client_events, _) = pump(&mut client, &mut server, Duration::from_millis(300), |c, _| {
        c.iter().any(|e| matches!(e, ClientEvent::ConnectionFailed(_)))
    });
    assert!(client_events.iter().any(|e| matches!(
        e,
        ClientEvent::ConnectionFailed(ConnectionFailedReason::Rejected(RejectReason::ServerFull))
    )));
}

#[test]
fn server_full_rejects_beyond_capacity() {
    let hub_config = fast_config();
    let hub = riptide_test::LoopbackHub::new();
    let mut server = riptide_server::Server::new(hub.server(), hub_config.clone(), 1, false);
    server.listen("127.0.0.1", 0).unwrap();

    let mut first = riptide_client::Client::new(hub.client(), hub_config.clone());
    first.connect("127.0.0.1", 0, 3, None).unwrap();
    let mut second = riptide_client::Client::new(hub.client(), hub_config);
    second.connect("127.0.0.1", 0, 3, None).unwrap();

    let start = std::time::Instant::now();
    let mut second_events = Vec::new();
    while start.elapsed() < Duration::from_millis(300) {
        first.update();
        server.update();
        second_events.extend(second.update());
        if second_events
            .iter()
            .any(|e| matches!(e, ClientEvent::ConnectionFailed(_)))
        {
            break;
        }
        std::thread::sleep(Duration::from_millis(1));
    }

    assert!(second_events.iter().any(|e| matches!(
        e,
        ClientEvent::ConnectionFailed(ConnectionFailedReason::Rejected(RejectReason::ServerFull))
    )));
}
