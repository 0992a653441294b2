//! An in-process loopback transport double: no sockets, just shared queues
//! connecting one [`LoopbackServerTransport`] to any number of
//! [`LoopbackClientTransport`]s, so the integration tests can drive a real
//! `Client`/`Server` pair without touching the network.

use riptide_shared::{ClientTransport, ServerTransport, TransportEvent};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

type Queue = Rc<RefCell<VecDeque<Vec<u8>>>>;

#[derive(Default)]
struct HubInner {
    next_handle: usize,
    pending_connects: VecDeque<usize>,
    /// server -> client delivery, keyed by the client's handle.
    client_inboxes: HashMap<usize, Queue>,
    /// client -> server delivery, tagged with the sending client's handle.
    server_inbox: VecDeque<(usize, Vec<u8>)>,
    /// Per-handle countdown of server->client sends to blackhole, set by a
    /// test through the hub since it no longer holds the server transport
    /// once it's been handed to a `Server`.
    drop_to_client: HashMap<usize, usize>,
    /// Countdown of client->server sends to blackhole, same rationale.
    drop_to_server: usize,
}

/// Shared switchboard a test wires one server and any number of clients
/// through. Cloning a handle shares the same underlying queues.
#[derive(Clone)]
pub struct LoopbackHub(Rc<RefCell<HubInner>>);

impl LoopbackHub {
    pub fn new() -> Self {
        Self(Rc::new(RefCell::new(HubInner::default())))
    }

    pub fn client(&self) -> LoopbackClientTransport {
        LoopbackClientTransport {
            hub: self.0.clone(),
            handle: None,
            inbox: Rc::new(RefCell::new(VecDeque::new())),
            drop_next_sends: Cell::new(0),
        }
    }

    pub fn server(&self) -> LoopbackServerTransport {
        LoopbackServerTransport { hub: self.0.clone(), drop_next_sends: Cell::new(0) }
    }

    /// Blackholes the next `count` server->client sends addressed to
    /// `handle`, for tests that no longer hold the server's own transport.
    pub fn drop_next_to_client(&self, handle: usize, count: usize) {
        self.0.borrow_mut().drop_to_client.insert(handle, count);
    }

    /// Blackholes the next `count` client->server sends, across all clients
    /// sharing this hub, for tests that no longer hold the client transport.
    pub fn drop_next_to_server(&self, count: usize) {
        self.0.borrow_mut().drop_to_server = count;
    }
}

impl Default for LoopbackHub {
    fn default() -> Self {
        Self::new()
    }
}

pub struct LoopbackClientTransport {
    hub: Rc<RefCell<HubInner>>,
    handle: Option<usize>,
    inbox: Queue,
    drop_next_sends: Cell<usize>,
}

impl LoopbackClientTransport {
    /// Blackholes the next `count` outbound sends instead of delivering them,
    /// to drive packet-loss scenarios (notify loss, reliable retransmit).
    pub fn drop_next_sends(&self, count: usize) {
        self.drop_next_sends.set(count);
    }
}

impl ClientTransport for LoopbackClientTransport {
    fn connect(&mut self, _addr: &str, _port: u16) -> Result<(), String> {
        let mut hub = self.hub.borrow_mut();
        let handle = hub.next_handle;
        hub.next_handle += 1;
        hub.client_inboxes.insert(handle, self.inbox.clone());
        hub.pending_connects.push_back(handle);
        self.handle = Some(handle);
        Ok(())
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), String> {
        let pending = self.drop_next_sends.get();
        if pending > 0 {
            self.drop_next_sends.set(pending - 1);
            return Ok(());
        }
        let handle = self.handle.ok_or("client not connected")?;
        let mut hub = self.hub.borrow_mut();
        if hub.drop_to_server > 0 {
            hub.drop_to_server -= 1;
            return Ok(());
        }
        hub.server_inbox.push_back((handle, bytes.to_vec()));
        Ok(())
    }

    fn poll(&mut self) -> Vec<Vec<u8>> {
        self.inbox.borrow_mut().drain(..).collect()
    }

    fn close(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.hub.borrow_mut().client_inboxes.remove(&handle);
        }
    }
}

pub struct LoopbackServerTransport {
    hub: Rc<RefCell<HubInner>>,
    drop_next_sends: Cell<usize>,
}

impl LoopbackServerTransport {
    pub fn drop_next_sends(&self, count: usize) {
        self.drop_next_sends.set(count);
    }
}

impl ServerTransport for LoopbackServerTransport {
    type ConnectionHandle = usize;

    fn listen(&mut self, _addr: &str, _port: u16) -> Result<(), String> {
        Ok(())
    }

    fn send_to(&mut self, handle: &usize, bytes: &[u8]) -> Result<(), String> {
        let pending = self.drop_next_sends.get();
        if pending > 0 {
            self.drop_next_sends.set(pending - 1);
            return Ok(());
        }
        let mut hub = self.hub.borrow_mut();
        if let Some(remaining) = hub.drop_to_client.get_mut(handle) {
            if *remaining > 0 {
                *remaining -= 1;
                return Ok(());
            }
        }
        match hub.client_inboxes.get(handle) {
            Some(queue) => {
                queue.borrow_mut().push_back(bytes.to_vec());
                Ok(())
            }
            None => Err("no such connection handle".to_string()),
        }
    }

    fn poll(&mut self) -> Vec<TransportEvent<usize>> {
        let mut hub = self.hub.borrow_mut();
        let mut events = Vec::with_capacity(hub.pending_connects.len() + hub.server_inbox.len());
        for handle in hub.pending_connects.drain(..) {
            events.push(TransportEvent::Connected(handle));
        }
        for (handle, bytes) in hub.server_inbox.drain(..) {
            events.push(TransportEvent::Data(handle, bytes));
        }
        events
    }

    fn close(&mut self) {
        self.hub.borrow_mut().client_inboxes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_send_reaches_server_poll() {
        let hub = LoopbackHub::new();
        let mut client = hub.client();
        let mut server = hub.server();
        client.connect("127.0.0.1", 0).unwrap();
        let events = server.poll();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], TransportEvent::Connected(0)));

        client.send(&[1, 2, 3]).unwrap();
        let events = server.poll();
        assert_eq!(events.len(), 1);
        match &events[0] {
            TransportEvent::Data(h, bytes) => {
                assert_eq!(*h, 0);
                assert_eq!(bytes, &[1, 2, 3]);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn server_send_to_reaches_client_poll() {
        let hub = LoopbackHub::new();
        let mut client = hub.client();
        let mut server = hub.server();
        client.connect("127.0.0.1", 0).unwrap();
        server.poll();

        server.send_to(&0, &[9, 9]).unwrap();
        assert_eq!(client.poll(), vec![vec![9, 9]]);
    }

    #[test]
    fn dropped_sends_never_arrive() {
        let hub = LoopbackHub::new();
        let mut client = hub.client();
        let mut server = hub.server();
        client.connect("127.0.0.1", 0).unwrap();
        server.poll();

        client.drop_next_sends(1);
        client.send(&[1]).unwrap();
        client.send(&[2]).unwrap();
        let events = server.poll();
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], TransportEvent::Data(_, b) if b == &[2]));
    }
}
