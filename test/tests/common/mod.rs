use riptide_client::{Client, ClientEvent};
use riptide_server::{Server, ServerEvent};
use riptide_shared::PeerConfig;
use riptide_test::{LoopbackClientTransport, LoopbackHub, LoopbackServerTransport};
use std::thread::sleep;
use std::time::{Duration, Instant};

pub type TestClient = Client<LoopbackClientTransport>;
pub type TestServer = Server<LoopbackServerTransport>;

/// Tight timing config so integration tests don't need to block for seconds
/// of real wall-clock time; still realistic relative proportions.
pub fn fast_config() -> PeerConfig {
    let mut config = PeerConfig::default();
    config.connect_timeout = Duration::from_millis(200);
    config.connection.timeout = Duration::from_millis(60);
    config.connection.heartbeat_interval = Duration::from_millis(10);
    config
}

pub fn new_pair(manual_accept: bool) -> (TestClient, TestServer) {
    let (client, server, _hub) = new_pair_with_hub(manual_accept);
    (client, server)
}

/// Like [`new_pair`], but also returns the shared hub so a test can reach
/// into it (e.g. to drop a specific server->client send) after ownership of
/// both transports has moved into the `Client`/`Server`.
pub fn new_pair_with_hub(manual_accept: bool) -> (TestClient, TestServer, LoopbackHub) {
    let _ = env_logger::builder().is_test(true).try_init();
    let hub = LoopbackHub::new();
    let client = Client::new(hub.client(), fast_config());
    let mut server = Server::new(hub.server(), fast_config(), 16, manual_accept);
    server.listen("127.0.0.1", 0).unwrap();
    (client, server, hub)
}

/// The loopback transport hands out handles in creation order starting at 0;
/// the first (and in most tests, only) connecting client always gets handle
/// 0, which is what the hub-level drop hooks need.
pub const FIRST_CLIENT_HANDLE: usize = 0;

/// Repeatedly ticks both sides, collecting every event either one emits,
/// until `done` is satisfied or the deadline passes.
pub fn pump(
    client: &mut TestClient,
    server: &mut TestServer,
    deadline: Duration,
    mut done: impl FnMut(&[ClientEvent], &[ServerEvent<usize>]) -> bool,
) -> (Vec<ClientEvent>, Vec<ServerEvent<usize>>) {
    let start = Instant::now();
    let mut client_events = Vec::new();
    let mut server_events = Vec::new();
    loop {
        client_events.extend(client.update());
        server_events.extend(server.update());
        if done(&client_events, &server_events) || start.elapsed() > deadline {
            return (client_events, server_events);
        }
        sleep(Duration::from_millis(1));
    }
}

pub fn connected(events: &[ClientEvent]) -> bool {
    events.iter().any(|e| matches!(e, ClientEvent::Connected { .. }))
}

/// Drives the handshake to completion and returns the client's assigned id.
pub fn connect(client: &mut TestClient, server: &mut TestServer) -> u16 {
    client.connect("127.0.0.1", 0, 3, None).unwrap();
    let (events, _) = pump(client, server, Duration::from_millis(500), |c, _| connected(c));
    events
        .iter()
        .find_map(|e| match e {
            ClientEvent::Connected { assigned_id } => Some(*assigned_id),
            _ => None,
        })
        .expect("handshake never completed")
}
