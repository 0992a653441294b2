//! A single-connection client driver: connects to one server, drives the
//! handshake, and pumps reliable/notify/unreliable traffic through a
//! cooperative `update()` tick loop.

use log::{debug, warn};
use riptide_shared::{
    ClientTransport, Connection, ConnectionFailedReason, ConnectionState, DisconnectReason,
    Header, Message, PeerConfig, RejectReason, SendMode, SeqId, TimedEventQueue,
};
use std::time::Instant;

#[derive(Debug)]
pub enum ClientEvent {
    Connected { assigned_id: u16 },
    ConnectionFailed(ConnectionFailedReason),
    Disconnected(DisconnectReason),
    Unreliable(Vec<u8>),
    Notify(Vec<u8>),
    NotifyDelivered(SeqId),
    NotifyLost(SeqId),
    Reliable(Vec<u8>),
    /// Another client joined the server, relayed via the server's
    /// `clientConnected` broadcast.
    PeerConnected(u16),
    /// Another client left the server, relayed via the server's
    /// `clientDisconnected` broadcast.
    PeerDisconnected(u16),
}

enum TimedAction {
    ResendConnect,
    ConnectAttemptTimeout,
    Heartbeat,
    ResendReliable { seq: SeqId, initiated_at: u64 },
}

pub struct Client<T: ClientTransport> {
    transport: T,
    config: PeerConfig,
    connection: Connection,
    timers: TimedEventQueue<TimedAction>,
    start: Option<Instant>,
    current_time: u64,
    connect_payload: Option<Vec<u8>>,
    connection_attempts: u32,
    max_connection_attempts: u32,
    assigned_id: Option<u16>,
}

impl<T: ClientTransport> Client<T> {
    pub fn new(transport: T, config: PeerConfig) -> Self {
        let connection = Connection::new(config.connection.clone(), config.quality.clone(), 0);
        Self {
            transport,
            config,
            connection,
            timers: TimedEventQueue::new(),
            start: None,
            current_time: 0,
            connect_payload: None,
            connection_attempts: 0,
            max_connection_attempts: 1,
            assigned_id: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn assigned_id(&self) -> Option<u16> {
        self.assigned_id
    }

    pub fn connect(&mut self, addr: &str, port: u16, attempts: u32, payload: Option<Vec<u8>>) -> Result<(), String> {
        self.transport.connect(addr, port)?;
        self.start = Some(Instant::now());
        self.current_time = 0;
        self.connection = Connection::new(self.config.connection.clone(), self.config.quality.clone(), 0);
        self.connection.set_connecting();
        self.connect_payload = payload;
        self.connection_attempts = 0;
        self.max_connection_attempts = attempts.max(1);
        self.assigned_id = None;
        self.send_connect_request();
        self.timers.schedule(self.current_time + self.config.connection.heartbeat_interval.as_millis() as u64, TimedAction::ResendConnect);
        self.timers.schedule(self.current_time + self.config.connect_timeout.as_millis() as u64, TimedAction::ConnectAttemptTimeout);
        Ok(())
    }

    fn send_connect_request(&mut self) {
        self.connection_attempts += 1;
        let mut msg = Message::from_header(Header::Connect, 512).expect("connect header fits");
        if let Some(payload) = &self.connect_payload {
            let _ = msg.write_bytes(payload);
        }
        let _ = self.transport.send(msg.as_bytes());
    }

    pub fn send(&mut self, mode: SendMode, payload: &[u8]) -> riptide_shared::NetResult<()> {
        let (bytes, seq) = self.connection.send_message(mode, payload, self.current_time)?;
        let _ = self.transport.send(&bytes);
        if let Some(seq) = seq {
            let delay = self.connection.resend_delay_ms();
            self.timers.schedule(
                self.current_time + delay,
                TimedAction::ResendReliable { seq, initiated_at: self.current_time },
            );
        }
        Ok(())
    }

    pub fn disconnect(&mut self) {
        if self.connection.state() == ConnectionState::Connected {
            if let Ok(mut msg) = Message::from_header(Header::Disconnect, 8) {
                let _ = msg.write(DisconnectReason::Disconnected.to_u8());
                let _ = self.transport.send(msg.as_bytes());
            }
        }
        self.connection.local_disconnect();
        self.transport.close();
    }

    /// Advances the virtual clock, fires due timers, pumps the transport
    /// once, and dispatches any received frames. Call on a fixed cadence.
    pub fn update(&mut self) -> Vec<ClientEvent> {
        let mut events = Vec::new();
        if let Some(start) = self.start {
            self.current_time = start.elapsed().as_millis() as u64;
        }

        for action in self.timers.drain_due(self.current_time) {
            self.handle_timer(action, &mut events);
        }

        for datagram in self.transport.poll() {
            self.handle_datagram(datagram, &mut events);
        }

        events
    }

    fn handle_timer(&mut self, action: TimedAction, events: &mut Vec<ClientEvent>) {
        match action {
            TimedAction::ResendConnect => {
                if self.connection.state() == ConnectionState::Connecting {
                    if self.connection_attempts >= self.max_connection_attempts {
                        self.connection.local_disconnect();
                        events.push(ClientEvent::ConnectionFailed(ConnectionFailedReason::NoConnection));
                    } else {
                        self.send_connect_request();
                        self.timers.schedule(
                            self.current_time + self.config.connection.heartbeat_interval.as_millis() as u64,
                            TimedAction::ResendConnect,
                        );
                    }
                }
            }
            TimedAction::ConnectAttemptTimeout => {
                if matches!(self.connection.state(), ConnectionState::Connecting | ConnectionState::Pending)
                    && self
                        .connection
                        .has_connect_attempt_timed_out(self.current_time, self.config.connect_timeout.as_millis() as u64)
                {
                    self.connection.local_disconnect();
                    events.push(ClientEvent::ConnectionFailed(ConnectionFailedReason::NoConnection));
                }
            }
            TimedAction::Heartbeat => {
                if self.connection.state() == ConnectionState::Connected {
                    if self.connection.has_timed_out(self.current_time) {
                        self.connection.local_disconnect();
                        events.push(ClientEvent::Disconnected(DisconnectReason::TimedOut));
                        return;
                    }
                    if self.connection.quality_exceeded() {
                        if let Ok(mut msg) = Message::from_header(Header::Disconnect, 8) {
                            let _ = msg.write(DisconnectReason::PoorConnection.to_u8());
                            let _ = self.transport.send(msg.as_bytes());
                        }
                        self.connection.local_disconnect();
                        events.push(ClientEvent::Disconnected(DisconnectReason::PoorConnection));
                        return;
                    }
                    if let Ok(bytes) = self.connection.send_heartbeat(self.current_time) {
                        let _ = self.transport.send(&bytes);
                    }
                    self.timers.schedule(
                        self.current_time + self.config.connection.heartbeat_interval.as_millis() as u64,
                        TimedAction::Heartbeat,
                    );
                }
            }
            TimedAction::ResendReliable { seq, initiated_at } => {
                if let Some(bytes) = self.connection.try_resend(seq, initiated_at, self.current_time) {
                    let _ = self.transport.send(&bytes);
                    let delay = self.connection.resend_delay_ms();
                    self.timers.schedule(
                        self.current_time + delay,
                        TimedAction::ResendReliable { seq, initiated_at: self.current_time },
                    );
                }
            }
        }
    }

    fn handle_datagram(&mut self, bytes: Vec<u8>, events: &mut Vec<ClientEvent>) {
        if bytes.is_empty() {
            return;
        }
        let len = bytes.len();
        let header = match Header::from_u8(bytes[0] & 0x0F) {
            Some(h) => h,
            None => {
                warn!("dropping frame with unknown header byte {:#04x}", bytes[0]);
                return;
            }
        };
        let mut msg = match Message::init_from_byte(bytes.into_boxed_slice(), len) {
            Ok(m) => m,
            Err(e) => {
                warn!("dropping malformed {:?} frame: {}", header, e);
                return;
            }
        };

        self.connection.touch_heartbeat(self.current_time);

        match header {
            Header::Welcome => self.handle_welcome(&mut msg, events),
            Header::Reject => self.handle_reject(&mut msg, events),
            Header::Disconnect => self.handle_disconnect_frame(&mut msg, events),
            Header::Heartbeat => {
                if let Ok(response) = self.connection.handle_heartbeat(&mut msg, self.current_time) {
                    let _ = self.transport.send(&response);
                }
            }
            Header::Ack => {
                let _ = self.connection.handle_ack(&mut msg);
            }
            Header::Notify => {
                if let Ok((_seq, notify_events, handled)) = self.connection.process_notify(&msg) {
                    for ev in notify_events {
                        match ev {
                            riptide_shared::NotifyEvent::Delivered(s) => events.push(ClientEvent::NotifyDelivered(s)),
                            riptide_shared::NotifyEvent::Lost(s) => events.push(ClientEvent::NotifyLost(s)),
                        }
                    }
                    if handled {
                        if let Ok(payload) = msg.write_remaining_bytes() {
                            events.push(ClientEvent::Notify(payload));
                        }
                    }
                }
            }
            Header::Reliable => {
                let seq: SeqId = match msg.read() {
                    Ok(s) => s,
                    Err(_) => return,
                };
                let (handle, ack) = self.connection.should_handle(seq, &msg);
                if let Ok(ack_msg) = ack {
                    let _ = self.transport.send(ack_msg.as_bytes());
                }
                if handle {
                    if let Ok(payload) = msg.write_remaining_bytes() {
                        events.push(ClientEvent::Reliable(payload));
                    }
                }
            }
            Header::ClientConnected | Header::ClientDisconnected => {
                let seq: SeqId = match msg.read() {
                    Ok(s) => s,
                    Err(_) => return,
                };
                let (handle, ack) = self.connection.should_handle(seq, &msg);
                if let Ok(ack_msg) = ack {
                    let _ = self.transport.send(ack_msg.as_bytes());
                }
                if handle {
                    if let Ok(peer_id) = msg.read::<u16>() {
                        events.push(if header == Header::ClientConnected {
                            ClientEvent::PeerConnected(peer_id)
                        } else {
                            ClientEvent::PeerDisconnected(peer_id)
                        });
                    }
                }
            }
            Header::Unreliable => {
                self.connection.record_unreliable_received(msg.len_bytes());
                if let Ok(payload) = msg.write_remaining_bytes() {
                    events.push(ClientEvent::Unreliable(payload));
                }
            }
            Header::Connect => {}
        }
    }

    fn handle_welcome(&mut self, msg: &mut Message, events: &mut Vec<ClientEvent>) {
        if self.connection.state() == ConnectionState::Connected {
            return;
        }
        let seq: SeqId = match msg.read() {
            Ok(s) => s,
            Err(_) => return,
        };
        let (handle, ack) = self.connection.should_handle(seq, msg);
        if let Ok(ack_msg) = ack {
            let _ = self.transport.send(ack_msg.as_bytes());
        }
        if !handle {
            return;
        }
        let id_bytes = match msg.read_bytes(2) {
            Ok(b) => b,
            Err(_) => return,
        };
        let assigned_id = u16::from_le_bytes([id_bytes[0], id_bytes[1]]);
        self.assigned_id = Some(assigned_id);
        self.connection.mark_connected();
        debug!("connected with assigned id {assigned_id}");

        if let Ok((bytes, seq)) = self.connection.send_welcome(assigned_id, self.current_time) {
            let _ = self.transport.send(&bytes);
            if let Some(seq) = seq {
                let delay = self.connection.resend_delay_ms();
                self.timers
                    .schedule(self.current_time + delay, TimedAction::ResendReliable { seq, initiated_at: self.current_time });
            }
        }
        self.timers.schedule(
            self.current_time + self.config.connection.heartbeat_interval.as_millis() as u64,
            TimedAction::Heartbeat,
        );
        events.push(ClientEvent::Connected { assigned_id });
    }

    fn handle_reject(&mut self, msg: &mut Message, events: &mut Vec<ClientEvent>) {
        if self.connection.state() == ConnectionState::Connected {
            return;
        }
        let reason_byte: u8 = msg.read().unwrap_or(0);
        let reason = RejectReason::from_u8(reason_byte).unwrap_or(RejectReason::Custom);
        self.connection.local_disconnect();
        events.push(ClientEvent::ConnectionFailed(ConnectionFailedReason::Rejected(reason)));
    }

    fn handle_disconnect_frame(&mut self, msg: &mut Message, events: &mut Vec<ClientEvent>) {
        let reason_byte: u8 = msg.read().unwrap_or(DisconnectReason::Disconnected.to_u8());
        let reason = DisconnectReason::from_u8(reason_byte).unwrap_or(DisconnectReason::Disconnected);
        self.connection.local_disconnect();
        events.push(ClientEvent::Disconnected(reason));
    }
}
