//! Per-connection sender and receiver state for the notify and reliable
//! send modes.

use crate::bitfield::{Bitfield256, DynamicBitfield};
use crate::header::Header;
use crate::message::{Message, SEQ_ID_BIT_OFFSET};
use crate::seq_id::SeqId;
use riptide_serde::SerdeResult;

/// Outcome of a notify delivery/loss reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyEvent {
    Delivered(SeqId),
    Lost(SeqId),
}

pub struct NotifySequencer {
    next_seq_id: SeqId,
    last_received_seq_id: SeqId,
    received_seq_ids: DynamicBitfield,
    last_acked_seq_id: SeqId,
    acked_seq_ids: Bitfield256,
}

impl NotifySequencer {
    pub fn new() -> Self {
        Self {
            next_seq_id: SeqId(1),
            last_received_seq_id: SeqId(0),
            received_seq_ids: DynamicBitfield::new(),
            last_acked_seq_id: SeqId(0),
            acked_seq_ids: Bitfield256::new(),
        }
    }

    /// Writes the 40-bit notify header field and returns the sequence id
    /// assigned to this outgoing message.
    pub fn insert_header(&mut self, msg: &mut Message) -> SerdeResult<SeqId> {
        let new_seq = self.next_seq_id;
        self.next_seq_id.incr();

        let field: u64 = self.last_received_seq_id.0 as u64
            | ((self.received_seq_ids.first8() as u64) << 16)
            | ((new_seq.0 as u64) << 24);
        msg.patch_bits(field, 40, SEQ_ID_BIT_OFFSET)?;
        Ok(new_seq)
    }

    /// Reads the 40-bit notify header field back out.
    pub fn read_header(msg: &Message) -> SerdeResult<(SeqId, u8, SeqId)> {
        let field = msg.peek_bits(40, SEQ_ID_BIT_OFFSET)?;
        let remote_last_received = SeqId((field & 0xFFFF) as u16);
        let remote_received_first8 = ((field >> 16) & 0xFF) as u8;
        let incoming_seq = SeqId(((field >> 24) & 0xFFFF) as u16);
        Ok((remote_last_received, remote_received_first8, incoming_seq))
    }

    pub fn should_handle(&mut self, incoming_seq: SeqId) -> bool {
        let gap = incoming_seq.gap(self.last_received_seq_id);
        if gap <= 0 {
            return false;
        }
        let gap = gap as u32;
        self.received_seq_ids.shift_by(gap);
        self.last_received_seq_id = incoming_seq;
        if self.received_seq_ids.is_set(gap) {
            false
        } else {
            self.received_seq_ids.set(gap);
            true
        }
    }

    /// Reconciles delivery/loss for previously sent notify messages using
    /// the remote's ack window carried in an inbound notify header.
    pub fn process_ack(&mut self, remote_last_received: SeqId, remote_received_first8: u8) -> Vec<NotifyEvent> {
        let mut events = Vec::new();
        let mut gap = remote_last_received.gap(self.last_acked_seq_id);
        if gap <= 0 {
            return events;
        }

        while gap > 9 {
            self.last_acked_seq_id.incr();
            events.push(NotifyEvent::Lost(self.last_acked_seq_id));
            gap -= 1;
        }

        let bit_count = (gap - 1).max(0) as u32;
        for i in 0..bit_count {
            let bit_pos = bit_count - 1 - i;
            let seq = self.last_acked_seq_id + (i as u16 + 1);
            if (remote_received_first8 >> bit_pos) & 1 != 0 {
                events.push(NotifyEvent::Delivered(seq));
            } else {
                events.push(NotifyEvent::Lost(seq));
            }
        }

        self.last_acked_seq_id = remote_last_received;
        events.push(NotifyEvent::Delivered(self.last_acked_seq_id));
        events
    }
}

impl Default for NotifySequencer {
    fn default() -> Self {
        Self::new()
    }
}

/// What a reliable ack-processing pass expects the caller (the owning
/// `Connection`) to do with its pending-message map.
pub struct AckOutcome {
    pub to_clear: Vec<SeqId>,
    pub to_resend: Vec<SeqId>,
}

pub struct ReliableSequencer {
    next_seq_id: SeqId,
    last_received_seq_id: SeqId,
    received_seq_ids: DynamicBitfield,
    last_acked_seq_id: SeqId,
    acked_seq_ids: Bitfield256,
}

impl ReliableSequencer {
    pub fn new() -> Self {
        Self {
            next_seq_id: SeqId(1),
            last_received_seq_id: SeqId(0),
            received_seq_ids: DynamicBitfield::new(),
            last_acked_seq_id: SeqId(0),
            acked_seq_ids: Bitfield256::new(),
        }
    }

    pub fn next_seq_id(&mut self) -> SeqId {
        let id = self.next_seq_id;
        self.next_seq_id.incr();
        id
    }

    /// Returns whether `incoming_seq` should be handled (dispatched to the
    /// user); duplicates and already-seen out-of-order frames return false.
    /// An ack is owed regardless of the outcome (see [`Self::build_ack`]).
    pub fn should_handle(&mut self, incoming_seq: SeqId) -> bool {
        let gap = incoming_seq.gap(self.last_received_seq_id);
        if gap == 0 {
            false
        } else if gap > 0 {
            let gap = gap as u32;
            self.received_seq_ids.shift_by(gap);
            self.last_received_seq_id = incoming_seq;
            let handle = !self.received_seq_ids.is_set(gap);
            self.received_seq_ids.set(gap);
            handle
        } else {
            let g = (-gap) as u32;
            let handle = !self.received_seq_ids.is_set(g);
            self.received_seq_ids.set(g);
            handle
        }
    }

    pub fn build_ack(&self, incoming_seq: SeqId, capacity_bytes: usize) -> SerdeResult<Message> {
        let mut msg = Message::from_header(Header::Ack, capacity_bytes)?;
        msg.write(self.last_received_seq_id)?;
        msg.write(self.received_seq_ids.first16())?;
        let has_explicit_target = incoming_seq != self.last_received_seq_id;
        msg.write(has_explicit_target)?;
        if has_explicit_target {
            msg.write(incoming_seq)?;
        }
        Ok(msg)
    }

    pub fn read_ack(msg: &mut Message) -> SerdeResult<(SeqId, u16, Option<SeqId>)> {
        let remote_last_received: SeqId = msg.read()?;
        let remote_acks: u16 = msg.read()?;
        let has_explicit_target: bool = msg.read()?;
        let explicit = if has_explicit_target {
            Some(msg.read()?)
        } else {
            None
        };
        Ok((remote_last_received, remote_acks, explicit))
    }

    pub fn process_ack(&mut self, remote_last_received: SeqId, remote_acks: u16, explicit_ack: Option<SeqId>) -> AckOutcome {
        let mut to_clear = vec![explicit_ack.unwrap_or(remote_last_received)];
        let mut to_resend = Vec::new();

        let gap = remote_last_received.gap(self.last_acked_seq_id);
        if gap > 0 {
            let gap_u = gap as u32;
            let (ok, overflow) = self.acked_seq_ids.has_capacity_for(gap_u);
            if !ok {
                for _ in 0..overflow {
                    let (was_set, pos) = self.acked_seq_ids.check_and_trim_last();
                    let seq = self.last_acked_seq_id - (pos as u16);
                    if was_set {
                        to_clear.push(seq);
                    } else {
                        to_resend.push(seq);
                    }
                }
            }

            self.acked_seq_ids.shift_by(gap_u);
            self.last_acked_seq_id = remote_last_received;

            for i in 0..16u32 {
                let bit_set = (remote_acks >> i) & 1 != 0;
                if bit_set && !self.acked_seq_ids.is_set(i + 1) {
                    let seq = self.last_acked_seq_id - (i as u16 + 1);
                    to_clear.push(seq);
                }
            }

            self.acked_seq_ids.combine(remote_acks as u64);
            self.acked_seq_ids.set(gap_u);
            to_clear.push(self.last_acked_seq_id);
        } else if gap < 0 {
            self.acked_seq_ids.set((-gap) as u32);
        } else {
            self.acked_seq_ids.combine(remote_acks as u64);
        }

        AckOutcome { to_clear, to_resend }
    }
}

impl Default for ReliableSequencer {
    fn default() -> Self {
        Self::new()
    }
}
