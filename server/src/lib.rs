//! A server driver: accepts many clients behind a [`ServerTransport`], each
//! tracked by its own [`Connection`], and dispatches accepted/rejected
//! handshakes, reliable/notify/unreliable delivery, and timeouts through a
//! cooperative `update()` tick loop.

use log::{debug, warn};
use riptide_shared::{
    Connection, DisconnectReason, Header, Message, PeerConfig, RejectReason, SendMode, SeqId,
    ServerTransport, TimedEventQueue, TransportEvent,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Instant;

#[derive(Debug)]
pub enum ServerEvent<H> {
    /// A client asked to connect and manual acceptance is enabled; the
    /// application must call `accept(handle)` or `reject(handle, ..)`.
    ConnectionRequested(H),
    ClientConnected(u16),
    ClientDisconnected(u16, DisconnectReason),
    Unreliable(u16, Vec<u8>),
    Notify(u16, Vec<u8>),
    NotifyDelivered(u16, SeqId),
    NotifyLost(u16, SeqId),
    Reliable(u16, Vec<u8>),
}

enum TimedAction<H> {
    Heartbeat(u16),
    ResendReliable { id: u16, seq: SeqId, initiated_at: u64 },
    ConnectAttemptCheck(H),
    HeartbeatSweep,
}

/// A free-id pool over `[1, max_client_count]`: fresh ids are handed out in
/// order, and freed ids are reused oldest-freed-first (FIFO), so a id that
/// just disconnected isn't immediately handed back out to the next connect.
struct IdPool {
    next: u16,
    max: u16,
    free: VecDeque<u16>,
}

impl IdPool {
    fn new(max: u16) -> Self {
        Self { next: 1, max, free: VecDeque::new() }
    }

    fn get(&mut self) -> Option<u16> {
        if let Some(id) = self.free.pop_front() {
            return Some(id);
        }
        if self.next > self.max {
            return None;
        }
        let id = self.next;
        self.next += 1;
        Some(id)
    }

    fn put(&mut self, id: u16) {
        self.free.push_back(id);
    }
}

pub struct Server<T: ServerTransport> {
    transport: T,
    config: PeerConfig,
    manual_accept: bool,
    pending: HashMap<T::ConnectionHandle, Connection>,
    clients: HashMap<u16, (T::ConnectionHandle, Connection)>,
    handle_ids: HashMap<T::ConnectionHandle, u16>,
    id_pool: IdPool,
    timers: TimedEventQueue<TimedAction<T::ConnectionHandle>>,
    start: Option<Instant>,
    current_time: u64,
    relay_filter: Option<HashSet<u16>>,
}

impl<T: ServerTransport> Server<T> {
    pub fn new(transport: T, config: PeerConfig, max_client_count: u16, manual_accept: bool) -> Self {
        Self {
            transport,
            config,
            manual_accept,
            pending: HashMap::new(),
            clients: HashMap::new(),
            handle_ids: HashMap::new(),
            id_pool: IdPool::new(max_client_count.min(65534)),
            timers: TimedEventQueue::new(),
            start: None,
            current_time: 0,
            relay_filter: None,
        }
    }

    pub fn set_relay_filter(&mut self, ids: HashSet<u16>) {
        self.relay_filter = Some(ids);
    }

    pub fn listen(&mut self, addr: &str, port: u16) -> Result<(), String> {
        self.transport.listen(addr, port)?;
        self.start = Some(Instant::now());
        self.current_time = 0;
        self.timers.schedule(self.config.connection.heartbeat_interval.as_millis() as u64, TimedAction::HeartbeatSweep);
        Ok(())
    }

    pub fn client_ids(&self) -> impl Iterator<Item = &u16> {
        self.clients.keys()
    }

    pub fn update(&mut self) -> Vec<ServerEvent<T::ConnectionHandle>> {
        let mut events = Vec::new();
        if let Some(start) = self.start {
            self.current_time = start.elapsed().as_millis() as u64;
        }

        for action in self.timers.drain_due(self.current_time) {
            self.handle_timer(action, &mut events);
        }

        for event in self.transport.poll() {
            match event {
                TransportEvent::Connected(handle) => {
                    debug!("transport reports new connection");
                    let _ = handle;
                }
                TransportEvent::Disconnected(handle) => {
                    self.drop_handle(&handle, DisconnectReason::TimedOut, &mut events);
                }
                TransportEvent::Data(handle, bytes) => {
                    self.handle_data(handle, bytes, &mut events);
                }
            }
        }

        events
    }

    fn handle_timer(&mut self, action: TimedAction<T::ConnectionHandle>, events: &mut Vec<ServerEvent<T::ConnectionHandle>>) {
        match action {
            TimedAction::HeartbeatSweep => {
                let timed_out: Vec<u16> = self
                    .clients
                    .iter()
                    .filter(|(_, (_, conn))| conn.has_timed_out(self.current_time))
                    .map(|(id, _)| *id)
                    .collect();
                for id in timed_out {
                    self.disconnect_client_internal(id, DisconnectReason::TimedOut, events);
                }
                self.timers.schedule(
                    self.current_time + self.config.connection.heartbeat_interval.as_millis() as u64,
                    TimedAction::HeartbeatSweep,
                );
            }
            TimedAction::Heartbeat(id) => {
                if let Some((handle, conn)) = self.clients.get_mut(&id) {
                    if conn.quality_exceeded() {
                        if let Ok(mut msg) = Message::from_header(Header::Disconnect, 8) {
                            let _ = msg.write(DisconnectReason::PoorConnection.to_u8());
                            let _ = self.transport.send_to(handle, msg.as_bytes());
                        }
                        let handle = handle.clone();
                        self.finish_disconnect(id, &handle, DisconnectReason::PoorConnection, events);
                        return;
                    }
                    if let Ok(bytes) = conn.send_heartbeat(self.current_time) {
                        let _ = self.transport.send_to(handle, &bytes);
                    }
                    self.timers.schedule(
                        self.current_time + self.config.connection.heartbeat_interval.as_millis() as u64,
                        TimedAction::Heartbeat(id),
                    );
                }
            }
            TimedAction::ResendReliable { id, seq, initiated_at } => {
                if let Some((handle, conn)) = self.clients.get_mut(&id) {
                    if let Some(bytes) = conn.try_resend(seq, initiated_at, self.current_time) {
                        let _ = self.transport.send_to(handle, &bytes);
                        let delay = conn.resend_delay_ms();
                        self.timers.schedule(
                            self.current_time + delay,
                            TimedAction::ResendReliable { id, seq, initiated_at: self.current_time },
                        );
                    }
                }
            }
            TimedAction::ConnectAttemptCheck(handle) => {
                if let Some(conn) = self.pending.get(&handle) {
                    if conn.has_connect_attempt_timed_out(self.current_time, self.config.connect_timeout.as_millis() as u64) {
                        self.pending.remove(&handle);
                    } else {
                        self.timers.schedule(self.current_time + 1000, TimedAction::ConnectAttemptCheck(handle));
                    }
                }
            }
        }
    }

    fn handle_data(&mut self, handle: T::ConnectionHandle, bytes: Vec<u8>, events: &mut Vec<ServerEvent<T::ConnectionHandle>>) {
        if bytes.is_empty() {
            return;
        }
        let header = match Header::from_u8(bytes[0] & 0x0F) {
            Some(h) => h,
            None => {
                warn!("dropping frame with unknown header byte {:#04x}", bytes[0]);
                return;
            }
        };

        if header == Header::Connect {
            self.handle_connect(handle, events);
            return;
        }

        let Some(id) = self.handle_ids.get(&handle).copied() else {
            return;
        };

        let len = bytes.len();
        let mut msg = match Message::init_from_byte(bytes.into_boxed_slice(), len) {
            Ok(m) => m,
            Err(e) => {
                warn!("dropping malformed {:?} frame from client {id}: {e}", header);
                return;
            }
        };

        let mut newly_connected = false;

        let Some((conn_handle, conn)) = self.clients.get_mut(&id) else {
            return;
        };
        conn.touch_heartbeat(self.current_time);

        match header {
            Header::Heartbeat => {
                if let Ok(response) = conn.handle_heartbeat(&mut msg, self.current_time) {
                    let _ = self.transport.send_to(conn_handle, &response);
                }
            }
            Header::Ack => {
                let _ = conn.handle_ack(&mut msg);
            }
            Header::Notify => {
                if let Ok((_seq, notify_events, handled)) = conn.process_notify(&msg) {
                    for ev in notify_events {
                        match ev {
                            riptide_shared::NotifyEvent::Delivered(s) => events.push(ServerEvent::NotifyDelivered(id, s)),
                            riptide_shared::NotifyEvent::Lost(s) => events.push(ServerEvent::NotifyLost(id, s)),
                        }
                    }
                    if handled {
                        if let Ok(payload) = msg.write_remaining_bytes() {
                            self.dispatch_user_message(id, payload, events);
                        }
                    }
                }
            }
            Header::Reliable => {
                let seq: SeqId = match msg.read() {
                    Ok(s) => s,
                    Err(_) => return,
                };
                let (handle_it, ack) = conn.should_handle(seq, &msg);
                if let Ok(ack_msg) = ack {
                    let _ = self.transport.send_to(conn_handle, ack_msg.as_bytes());
                }
                if handle_it {
                    if let Ok(payload) = msg.write_remaining_bytes() {
                        self.dispatch_user_message(id, payload, events);
                    }
                }
            }
            Header::Unreliable => {
                conn.record_unreliable_received(msg.len_bytes());
                if let Ok(payload) = msg.write_remaining_bytes() {
                    events.push(ServerEvent::Unreliable(id, payload));
                }
            }
            Header::Welcome => {
                // Client echoes `welcome{id}` back as its own reliable send;
                // the first time we see it, the handshake is complete.
                let seq: SeqId = match msg.read() {
                    Ok(s) => s,
                    Err(_) => return,
                };
                let (handled, ack) = conn.should_handle(seq, &msg);
                if let Ok(ack_msg) = ack {
                    let _ = self.transport.send_to(conn_handle, ack_msg.as_bytes());
                }
                if handled {
                    conn.mark_connected();
                    newly_connected = true;
                }
            }
            Header::Disconnect => {
                let reason_byte: u8 = msg.read().unwrap_or(DisconnectReason::Disconnected.to_u8());
                let reason = DisconnectReason::from_u8(reason_byte).unwrap_or(DisconnectReason::Disconnected);
                let conn_handle = conn_handle.clone();
                self.finish_disconnect(id, &conn_handle, reason, events);
                return;
            }
            Header::ClientConnected | Header::ClientDisconnected | Header::Connect | Header::Reject => {}
        }

        if newly_connected {
            events.push(ServerEvent::ClientConnected(id));
            self.broadcast_peer_connected(id);
        }
    }

    /// Tells every other connected client that `id` just joined, via the
    /// dedicated `clientConnected` header rather than an ordinary reliable
    /// send, so the receiving client can tell it apart from its own traffic.
    fn broadcast_peer_connected(&mut self, id: u16) {
        let others: Vec<u16> = self.clients.keys().copied().filter(|other| *other != id).collect();
        for other in others {
            self.send_peer_event(other, id, true);
        }
    }

    /// Same as [`Self::broadcast_peer_connected`], for the `clientDisconnected` header.
    fn broadcast_peer_disconnected(&mut self, id: u16) {
        let others: Vec<u16> = self.clients.keys().copied().collect();
        for other in others {
            self.send_peer_event(other, id, false);
        }
    }

    fn send_peer_event(&mut self, to: u16, peer_id: u16, connected: bool) {
        let Some((handle, conn)) = self.clients.get_mut(&to) else {
            return;
        };
        let result = if connected {
            conn.send_client_connected(peer_id, self.current_time)
        } else {
            conn.send_client_disconnected(peer_id, self.current_time)
        };
        if let Ok((bytes, seq)) = result {
            let _ = self.transport.send_to(handle, &bytes);
            if let Some(seq) = seq {
                let delay = conn.resend_delay_ms();
                self.timers.schedule(
                    self.current_time + delay,
                    TimedAction::ResendReliable { id: to, seq, initiated_at: self.current_time },
                );
            }
        }
    }

    fn dispatch_user_message(&self, id: u16, payload: Vec<u8>, events: &mut Vec<ServerEvent<T::ConnectionHandle>>) {
        if let Some(filter) = &self.relay_filter {
            if filter.contains(&id) {
                // Relayed, not dispatched locally; caller relays via `send_to_all_except`.
                return;
            }
        }
        events.push(ServerEvent::Reliable(id, payload));
    }

    fn handle_connect(&mut self, handle: T::ConnectionHandle, events: &mut Vec<ServerEvent<T::ConnectionHandle>>) {
        if self.handle_ids.contains_key(&handle) {
            self.send_reject(&handle, RejectReason::AlreadyConnected, None);
            return;
        }

        if !self.pending.contains_key(&handle) {
            if self.clients.len() >= self.id_pool.max as usize {
                self.send_reject(&handle, RejectReason::ServerFull, None);
                return;
            }
            let conn = Connection::new(self.config.connection.clone(), self.config.quality.clone(), self.current_time);
            self.pending.insert(handle.clone(), conn);
            self.timers.schedule(self.current_time + self.config.connect_timeout.as_millis() as u64, TimedAction::ConnectAttemptCheck(handle.clone()));
        }

        if let Some(conn) = self.pending.get_mut(&handle) {
            conn.set_pending();
            conn.touch_heartbeat(self.current_time);
        }

        if self.manual_accept {
            let echo = Message::from_header(Header::Connect, 8).expect("connect header fits");
            let _ = self.transport.send_to(&handle, echo.as_bytes());
            events.push(ServerEvent::ConnectionRequested(handle));
        } else {
            self.accept(&handle);
        }
    }

    /// Assigns an id and sends `welcome{id}`. Emits no event itself;
    /// `ClientConnected` fires once the client echoes `welcome` back.
    pub fn accept(&mut self, handle: &T::ConnectionHandle) {
        let Some(mut conn) = self.pending.remove(handle) else {
            return;
        };
        let Some(id) = self.id_pool.get() else {
            self.send_reject(handle, RejectReason::ServerFull, None);
            return;
        };

        conn.touch_heartbeat(self.current_time);
        if let Ok((bytes, seq)) = conn.send_welcome(id, self.current_time) {
            let _ = self.transport.send_to(handle, &bytes);
            if let Some(seq) = seq {
                let delay = conn.resend_delay_ms();
                self.timers.schedule(self.current_time + delay, TimedAction::ResendReliable { id, seq, initiated_at: self.current_time });
            }
        }
        self.timers.schedule(
            self.current_time + self.config.connection.heartbeat_interval.as_millis() as u64,
            TimedAction::Heartbeat(id),
        );

        self.handle_ids.insert(handle.clone(), id);
        self.clients.insert(id, (handle.clone(), conn));
    }

    pub fn reject(&mut self, handle: &T::ConnectionHandle, reason: RejectReason, payload: Option<&[u8]>) {
        self.pending.remove(handle);
        self.send_reject(handle, reason, payload);
    }

    fn send_reject(&mut self, handle: &T::ConnectionHandle, reason: RejectReason, payload: Option<&[u8]>) {
        if reason == RejectReason::AlreadyConnected {
            return;
        }
        if let Ok(mut msg) = Message::from_header(Header::Reject, 512) {
            let _ = msg.write(reason.to_u8());
            if reason == RejectReason::Custom {
                if let Some(payload) = payload {
                    let _ = msg.write_bytes(payload);
                }
            }
            for _ in 0..3 {
                let _ = self.transport.send_to(handle, msg.as_bytes());
            }
        }
    }

    pub fn send(&mut self, id: u16, mode: SendMode, payload: &[u8]) -> riptide_shared::NetResult<()> {
        let Some((handle, conn)) = self.clients.get_mut(&id) else {
            return Err(riptide_shared::NetError::NoSuchConnection);
        };
        let (bytes, seq) = conn.send_message(mode, payload, self.current_time)?;
        let _ = self.transport.send_to(handle, &bytes);
        if let Some(seq) = seq {
            let delay = conn.resend_delay_ms();
            self.timers.schedule(self.current_time + delay, TimedAction::ResendReliable { id, seq, initiated_at: self.current_time });
        }
        Ok(())
    }

    pub fn send_to_all(&mut self, mode: SendMode, payload: &[u8]) {
        let ids: Vec<u16> = self.clients.keys().copied().collect();
        for id in ids {
            let _ = self.send(id, mode, payload);
        }
    }

    pub fn send_to_all_except(&mut self, except: u16, mode: SendMode, payload: &[u8]) {
        let ids: Vec<u16> = self.clients.keys().copied().filter(|id| *id != except).collect();
        for id in ids {
            let _ = self.send(id, mode, payload);
        }
    }

    pub fn disconnect_client(&mut self, id: u16, payload: Option<&[u8]>) {
        let mut events = Vec::new();
        if let Some((handle, _)) = self.clients.get(&id) {
            let handle = handle.clone();
            if let Ok(mut msg) = Message::from_header(Header::Disconnect, 512) {
                let _ = msg.write(DisconnectReason::Kicked.to_u8());
                if let Some(payload) = payload {
                    let _ = msg.write_bytes(payload);
                }
                let _ = self.transport.send_to(&handle, msg.as_bytes());
            }
            self.finish_disconnect(id, &handle, DisconnectReason::Kicked, &mut events);
        }
    }

    fn disconnect_client_internal(&mut self, id: u16, reason: DisconnectReason, events: &mut Vec<ServerEvent<T::ConnectionHandle>>) {
        if let Some((handle, _)) = self.clients.get(&id) {
            let handle = handle.clone();
            self.finish_disconnect(id, &handle, reason, events);
        }
    }

    fn finish_disconnect(&mut self, id: u16, handle: &T::ConnectionHandle, reason: DisconnectReason, events: &mut Vec<ServerEvent<T::ConnectionHandle>>) {
        if let Some((_, mut conn)) = self.clients.remove(&id) {
            conn.local_disconnect();
            self.handle_ids.remove(handle);
            self.id_pool.put(id);
            events.push(ServerEvent::ClientDisconnected(id, reason));
            self.broadcast_peer_disconnected(id);
        }
    }

    fn drop_handle(&mut self, handle: &T::ConnectionHandle, reason: DisconnectReason, events: &mut Vec<ServerEvent<T::ConnectionHandle>>) {
        self.pending.remove(handle);
        if let Some(id) = self.handle_ids.get(handle).copied() {
            self.finish_disconnect(id, handle, reason, events);
        }
    }

    pub fn stop(&mut self) {
        let ids: Vec<u16> = self.clients.keys().copied().collect();
        for id in ids {
            if let Some((handle, _)) = self.clients.get(&id) {
                if let Ok(mut msg) = Message::from_header(Header::Disconnect, 8) {
                    let _ = msg.write(DisconnectReason::ServerStopped.to_u8());
                    let _ = self.transport.send_to(handle, msg.as_bytes());
                }
            }
        }
        self.clients.clear();
        self.pending.clear();
        self.handle_ids.clear();
        self.transport.close();
    }
}
