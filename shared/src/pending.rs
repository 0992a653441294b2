use crate::seq_id::SeqId;

/// A reliable message awaiting acknowledgment. Owned by the connection's
/// pending-message table; retransmission is driven by the connection and
/// the peer's timed-event queue, not by this struct itself.
pub struct PendingMessage {
    pub seq_id: SeqId,
    pub bytes: Vec<u8>,
    pub send_attempts: u32,
    pub cleared: bool,
    pub last_send_time: u64,
}

impl PendingMessage {
    pub fn new(seq_id: SeqId, bytes: Vec<u8>) -> Self {
        Self {
            seq_id,
            bytes,
            send_attempts: 0,
            cleared: false,
            last_send_time: 0,
        }
    }

    /// `max(10, smoothRtt * 1.2)` ms, or 50ms with no RTT estimate yet.
    pub fn resend_delay_ms(smooth_rtt: Option<f64>) -> u64 {
        match smooth_rtt {
            Some(rtt) if rtt >= 0.0 => ((rtt * 1.2).round() as u64).max(10),
            _ => 50,
        }
    }

    /// Records a send attempt at `now_ms` and returns the bytes to transmit.
    pub fn mark_sent(&mut self, now_ms: u64) -> &[u8] {
        self.send_attempts += 1;
        self.last_send_time = now_ms;
        &self.bytes
    }

    /// Idempotent: returns the send-attempt count to feed into the
    /// connection's rolling stat the first time, `0` on any later call.
    pub fn clear(&mut self) -> u32 {
        if self.cleared {
            return 0;
        }
        self.cleared = true;
        self.send_attempts
    }
}
