//! Per-remote-peer state: the connection lifecycle, RTT estimation, the
//! pending-reliable-message table and the quality thresholds that can
//! trigger a local disconnect.

use crate::config::{ConnectionConfig, QualityThresholds};
use crate::error::{NetError, NetResult};
use crate::header::{Header, SendMode};
use crate::message::{Message, SEQ_ID_BIT_OFFSET};
use crate::metrics::{NotifyLossWindow, RollingStat};
use crate::pending::PendingMessage;
use crate::seq_id::SeqId;
use crate::sequencer::{NotifyEvent, NotifySequencer, ReliableSequencer};
use std::collections::HashMap;

const DEFAULT_MESSAGE_CAPACITY_BYTES: usize = 1200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    NotConnected,
    Connecting,
    Pending,
    Connected,
}

/// Traffic counters for one connection, split by send mode. Bytes cover the
/// whole wire frame (header included); message counts exclude control
/// traffic (acks, heartbeats) that carries no send mode of its own.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConnectionMetrics {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub unreliable_sent: u64,
    pub unreliable_received: u64,
    pub notify_sent: u64,
    pub notify_received: u64,
    pub notify_delivered: u64,
    pub notify_lost: u64,
    pub reliable_sent: u64,
    pub reliable_received: u64,
    pub reliable_discarded: u64,
}

pub struct Connection {
    state: ConnectionState,
    config: ConnectionConfig,
    quality: QualityThresholds,
    notify: NotifySequencer,
    reliable: ReliableSequencer,
    pending_messages: HashMap<SeqId, PendingMessage>,
    can_timeout: bool,
    last_heartbeat: u64,
    rtt: Option<f64>,
    smooth_rtt: Option<f64>,
    next_ping_id: u8,
    pending_ping_id: Option<u8>,
    pending_ping_send_time: u64,
    send_attempts: RollingStat,
    notify_loss: NotifyLossWindow,
    avg_send_attempts_over_threshold: usize,
    notify_loss_over_threshold: usize,
    metrics: ConnectionMetrics,
}

impl Connection {
    pub fn new(config: ConnectionConfig, quality: QualityThresholds, now_ms: u64) -> Self {
        Self {
            state: ConnectionState::NotConnected,
            config,
            quality,
            notify: NotifySequencer::new(),
            reliable: ReliableSequencer::new(),
            pending_messages: HashMap::new(),
            can_timeout: true,
            last_heartbeat: now_ms,
            rtt: None,
            smooth_rtt: None,
            next_ping_id: 0,
            pending_ping_id: None,
            pending_ping_send_time: 0,
            send_attempts: RollingStat::new(64),
            notify_loss: NotifyLossWindow::new(64),
            avg_send_attempts_over_threshold: 0,
            notify_loss_over_threshold: 0,
            metrics: ConnectionMetrics::default(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn metrics(&self) -> ConnectionMetrics {
        self.metrics
    }

    pub fn set_pending(&mut self) {
        self.state = ConnectionState::Pending;
    }

    pub fn set_connecting(&mut self) {
        self.state = ConnectionState::Connecting;
    }

    pub fn mark_connected(&mut self) {
        self.state = ConnectionState::Connected;
    }

    pub fn touch_heartbeat(&mut self, now_ms: u64) {
        self.last_heartbeat = now_ms;
    }

    pub fn has_timed_out(&self, now_ms: u64) -> bool {
        self.can_timeout && now_ms.saturating_sub(self.last_heartbeat) > self.config.timeout.as_millis() as u64
    }

    pub fn has_connect_attempt_timed_out(&self, now_ms: u64, connect_timeout_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_heartbeat) > connect_timeout_ms
    }

    pub fn smooth_rtt(&self) -> Option<f64> {
        self.smooth_rtt
    }

    /// Resets to `notConnected`, dropping every pending reliable message.
    pub fn local_disconnect(&mut self) {
        self.state = ConnectionState::NotConnected;
        for (_, pending) in self.pending_messages.drain() {
            let _ = pending;
        }
    }

    // -- outgoing user messages --------------------------------------------------

    /// Builds the wire bytes for an outgoing user message under the given
    /// send mode. For reliable messages, also registers a `PendingMessage`
    /// the caller is responsible for scheduling a resend for (see
    /// [`Self::resend_delay_ms`]).
    pub fn send_message(&mut self, mode: SendMode, payload: &[u8], now_ms: u64) -> NetResult<(Vec<u8>, Option<SeqId>)> {
        match mode {
            SendMode::Unreliable => {
                let mut msg = Message::from_header(Header::Unreliable, DEFAULT_MESSAGE_CAPACITY_BYTES)?;
                msg.write_bytes(payload)?;
                let bytes = msg.as_bytes().to_vec();
                self.metrics.unreliable_sent += 1;
                self.metrics.bytes_sent += bytes.len() as u64;
                Ok((bytes, None))
            }
            SendMode::Notify => {
                let mut msg = Message::from_header(Header::Notify, DEFAULT_MESSAGE_CAPACITY_BYTES)?;
                self.notify.insert_header(&mut msg)?;
                msg.write_bytes(payload)?;
                let bytes = msg.as_bytes().to_vec();
                self.metrics.notify_sent += 1;
                self.metrics.bytes_sent += bytes.len() as u64;
                Ok((bytes, None))
            }
            SendMode::Reliable => {
                let mut msg = Message::from_header(Header::Reliable, DEFAULT_MESSAGE_CAPACITY_BYTES)?;
                let seq = self.reliable.next_seq_id();
                msg.patch_bits(u16::from(seq) as u64, 16, SEQ_ID_BIT_OFFSET)?;
                msg.write_bytes(payload)?;
                let bytes = msg.as_bytes().to_vec();
                let mut pending = PendingMessage::new(seq, bytes.clone());
                pending.mark_sent(now_ms);
                self.pending_messages.insert(seq, pending);
                self.metrics.reliable_sent += 1;
                self.metrics.bytes_sent += bytes.len() as u64;
                Ok((bytes, Some(seq)))
            }
        }
    }

    pub fn resend_delay_ms(&self) -> u64 {
        PendingMessage::resend_delay_ms(self.smooth_rtt)
    }

    /// Re-sends a still-pending reliable message if `initiated_at` still
    /// matches its last send time (i.e. it hasn't already been resent by a
    /// more recent event).
    pub fn try_resend(&mut self, seq: SeqId, initiated_at: u64, now_ms: u64) -> Option<Vec<u8>> {
        let pending = self.pending_messages.get_mut(&seq)?;
        if pending.cleared {
            return None;
        }
        if pending.last_send_time != initiated_at {
            return None;
        }
        if pending.send_attempts >= self.quality.max_send_attempts {
            return None;
        }
        Some(pending.mark_sent(now_ms).to_vec())
    }

    fn clear_pending(&mut self, seq: SeqId) {
        if let Some(mut pending) = self.pending_messages.remove(&seq) {
            let attempts = pending.clear();
            self.send_attempts.sample(attempts as f64);
        }
    }

    // -- incoming frames ----------------------------------------------------------

    pub fn process_notify(&mut self, msg: &Message) -> NetResult<(SeqId, Vec<NotifyEvent>, bool)> {
        let (remote_last_received, remote_first8, incoming_seq) = NotifySequencer::read_header(msg)?;
        self.metrics.bytes_received += msg.len_bytes() as u64;
        let events = self.notify.process_ack(remote_last_received, remote_first8);
        for event in &events {
            let lost = matches!(event, NotifyEvent::Lost(_));
            self.notify_loss.record(lost);
            if lost {
                self.metrics.notify_lost += 1;
            } else {
                self.metrics.notify_delivered += 1;
            }
        }
        let handled = self.notify.should_handle(incoming_seq);
        if handled {
            self.metrics.notify_received += 1;
        }
        Ok((incoming_seq, events, handled))
    }

    /// Applies the reliable sequencer and returns whether the message should
    /// be dispatched to the user, plus the ack message the caller must send.
    pub fn should_handle(&mut self, incoming_seq: SeqId, msg: &Message) -> (bool, NetResult<Message>) {
        let handle = self.reliable.should_handle(incoming_seq);
        self.metrics.bytes_received += msg.len_bytes() as u64;
        if handle {
            self.metrics.reliable_received += 1;
        } else {
            self.metrics.reliable_discarded += 1;
        }
        let ack = self
            .reliable
            .build_ack(incoming_seq, DEFAULT_MESSAGE_CAPACITY_BYTES)
            .map_err(NetError::from);
        (handle, ack)
    }

    /// Unreliable frames bypass the reliable/notify sequencers entirely, so
    /// callers feed their byte count in here to keep it in the same tally.
    pub fn record_unreliable_received(&mut self, bytes: usize) {
        self.metrics.unreliable_received += 1;
        self.metrics.bytes_received += bytes as u64;
    }

    /// Rolling mean of send attempts per reliable message, over the last
    /// window of cleared messages.
    pub fn avg_send_attempts(&self) -> f64 {
        self.send_attempts.mean()
    }

    /// Rolling notify loss rate over the last window of notify acks.
    pub fn notify_loss_rate(&self) -> f64 {
        self.notify_loss.loss_rate()
    }

    pub fn handle_ack(&mut self, msg: &mut Message) -> NetResult<Vec<SeqId>> {
        let (remote_last_received, remote_acks, explicit) = ReliableSequencer::read_ack(msg)?;
        let outcome = self.reliable.process_ack(remote_last_received, remote_acks, explicit);
        for seq in &outcome.to_clear {
            self.clear_pending(*seq);
        }
        Ok(outcome.to_resend)
    }

    pub fn send_heartbeat(&mut self, now_ms: u64) -> NetResult<Vec<u8>> {
        let ping_id = self.next_ping_id;
        self.next_ping_id = self.next_ping_id.wrapping_add(1);
        self.pending_ping_id = Some(ping_id);
        self.pending_ping_send_time = now_ms;

        let rtt_i16 = self.rtt.map(|r| r as i16).unwrap_or(-1);
        let mut msg = Message::from_header(Header::Heartbeat, 8)?;
        msg.write(ping_id)?;
        msg.write(rtt_i16)?;
        Ok(msg.as_bytes().to_vec())
    }

    /// Echoes a received heartbeat's ping id straight back and touches the
    /// liveness clock.
    pub fn handle_heartbeat(&mut self, msg: &mut Message, now_ms: u64) -> NetResult<Vec<u8>> {
        self.touch_heartbeat(now_ms);
        let ping_id: u8 = msg.read()?;
        let _remote_rtt: i16 = msg.read()?;
        let mut echo = Message::from_header(Header::Heartbeat, 8)?;
        echo.write(ping_id)?;
        echo.write(self.rtt.map(|r| r as i16).unwrap_or(-1))?;
        Ok(echo.as_bytes().to_vec())
    }

    pub fn handle_heartbeat_response(&mut self, msg: &mut Message, now_ms: u64) -> NetResult<()> {
        self.touch_heartbeat(now_ms);
        let ping_id: u8 = msg.read()?;
        if self.pending_ping_id == Some(ping_id) {
            let sample = now_ms.saturating_sub(self.pending_ping_send_time).max(1) as f64;
            self.sample_rtt(sample);
            self.pending_ping_id = None;
        }
        Ok(())
    }

    fn sample_rtt(&mut self, sample_ms: f64) {
        self.rtt = Some(sample_ms);
        self.smooth_rtt = Some(match self.smooth_rtt {
            Some(prev) => (0.7 * prev + 0.3 * sample_ms).round().max(1.0),
            None => sample_ms,
        });
    }

    /// Builds and registers a `welcome{u16 id}` message; like any other
    /// reliable send, the caller must schedule its resend.
    pub fn send_welcome(&mut self, assigned_id: u16, now_ms: u64) -> NetResult<(Vec<u8>, Option<SeqId>)> {
        self.send_reliable_with_header(Header::Welcome, &assigned_id.to_le_bytes(), now_ms)
    }

    fn send_reliable_with_header(&mut self, header: Header, payload: &[u8], now_ms: u64) -> NetResult<(Vec<u8>, Option<SeqId>)> {
        let mut msg = Message::from_header(header, DEFAULT_MESSAGE_CAPACITY_BYTES)?;
        let seq = self.reliable.next_seq_id();
        msg.patch_bits(u16::from(seq) as u64, 16, SEQ_ID_BIT_OFFSET)?;
        msg.write_bytes(payload)?;
        let bytes = msg.as_bytes().to_vec();
        let mut pending = PendingMessage::new(seq, bytes.clone());
        pending.mark_sent(now_ms);
        self.pending_messages.insert(seq, pending);
        self.metrics.reliable_sent += 1;
        self.metrics.bytes_sent += bytes.len() as u64;
        Ok((bytes, Some(seq)))
    }

    pub fn send_client_connected(&mut self, id: u16, now_ms: u64) -> NetResult<(Vec<u8>, Option<SeqId>)> {
        self.send_reliable_with_header(Header::ClientConnected, &id.to_le_bytes(), now_ms)
    }

    pub fn send_client_disconnected(&mut self, id: u16, now_ms: u64) -> NetResult<(Vec<u8>, Option<SeqId>)> {
        self.send_reliable_with_header(Header::ClientDisconnected, &id.to_le_bytes(), now_ms)
    }

    /// Quality-based disconnect check: sustained high average send-attempts,
    /// sustained high notify loss, or a single message exhausting its retry
    /// budget.
    pub fn quality_exceeded(&mut self) -> bool {
        if !self.quality.can_quality_disconnect {
            return false;
        }

        if self.send_attempts.is_full() && self.send_attempts.mean() > self.quality.max_avg_send_attempts {
            self.avg_send_attempts_over_threshold += 1;
        } else {
            self.avg_send_attempts_over_threshold = 0;
        }

        if self.notify_loss.is_full() && self.notify_loss.loss_rate() > self.quality.max_notify_loss {
            self.notify_loss_over_threshold += 1;
        } else {
            self.notify_loss_over_threshold = 0;
        }

        let single_message_exhausted = self
            .pending_messages
            .values()
            .any(|p| p.send_attempts >= self.quality.max_send_attempts);

        self.avg_send_attempts_over_threshold >= self.quality.avg_send_attempts_resilience
            || self.notify_loss_over_threshold >= self.quality.notify_loss_resilience
            || single_message_exhausted
    }
}
