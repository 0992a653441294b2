mod common;

use common::*;
use riptide_client::ClientEvent;
use riptide_server::ServerEvent;
use riptide_shared::{DisconnectReason, PeerConfig, SendMode};
use std::thread::sleep;
use std::time::{Duration, Instant};

#[test]
fn client_times_out_when_server_goes_silent() {
    let (mut client, mut server) = new_pair(false);
    connect(&mut client, &mut server);

    // Stop driving the server entirely; the client never hears another
    // heartbeat response and must time itself out.
    let start = Instant::now();
    let mut events = Vec::new();
    while start.elapsed() < Duration::from_millis(400) {
        events.extend(client.update());
        if events.iter().any(|e| matches!(e, ClientEvent::Disconnected(_))) {
            break;
        }
        sleep(Duration::from_millis(1));
    }

    assert!(events
        .iter()
        .any(|e| matches!(e, ClientEvent::Disconnected(DisconnectReason::TimedOut))));
}

#[test]
fn server_times_out_a_silent_client() {
    let (mut client, mut server) = new_pair(false);
    let id = connect(&mut client, &mut server);

    // Stop driving the client; the server's heartbeat sweep must evict it.
    let start = Instant::now();
    let mut events = Vec::new();
    while start.elapsed() < Duration::from_millis(400) {
        events.extend(server.update());
        if events
            .iter()
            .any(|e| matches!(e, ServerEvent::ClientDisconnected(i, _) if *i == id))
        {
            break;
        }
        sleep(Duration::from_millis(1));
    }

    assert!(events.iter().any(
        |e| matches!(e, ServerEvent::ClientDisconnected(i, DisconnectReason::TimedOut) if *i == id)
    ));
    assert!(server.client_ids().next().is_none());
}

#[test]
fn sustained_send_failures_trigger_a_quality_disconnect() {
    let mut config = PeerConfig::default();
    config.connect_timeout = Duration::from_millis(200);
    config.connection.timeout = Duration::from_secs(30); // don't let a plain timeout race the quality check
    config.connection.heartbeat_interval = Duration::from_millis(5);
    config.quality.max_send_attempts = 3;

    let hub = riptide_test::LoopbackHub::new();
    let mut client = riptide_client::Client::new(hub.client(), config.clone());
    let mut server = riptide_server::Server::new(hub.server(), config, 4, false);
    server.listen("127.0.0.1", 0).unwrap();

    client.connect("127.0.0.1", 0, 3, None).unwrap();
    let (events, _) = pump(&mut client, &mut server, Duration::from_millis(500), |c, _| connected(c));
    assert!(connected(&events));

    // Every ack/response from the server onward is swallowed, so the
    // client's reliable send can never clear and keeps retrying until it
    // exhausts `max_send_attempts`.
    hub.drop_next_to_client(FIRST_CLIENT_HANDLE, usize::MAX);
    client.send(SendMode::Reliable, b"are you there").unwrap();

    let start = Instant::now();
    let mut client_events = Vec::new();
    while start.elapsed() < Duration::from_millis(2000) {
        client_events.extend(client.update());
        if client_events.iter().any(|e| matches!(e, ClientEvent::Disconnected(_))) {
            break;
        }
        sleep(Duration::from_millis(1));
    }

    assert!(client_events
        .iter()
        .any(|e| matches!(e, ClientEvent::Disconnected(DisconnectReason::PoorConnection))));
}
