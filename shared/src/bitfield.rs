//! Sliding-window sets over the last N positive integer positions, position 1
//! being the most recent. `Bitfield256` is the fixed 256-bit, four-lane
//! variant used for acked-sequence tracking; `DynamicBitfield` grows by
//! 64-bit lanes as it is shifted and is used for the received-sequence
//! window, which has no natural upper bound.

const LANE_BITS: u32 = 64;

fn shift_lanes_left(lanes: &[u64], k: u32) -> Vec<u64> {
    let n = lanes.len();
    let word_shift = (k / LANE_BITS) as usize;
    let bit_shift = k % LANE_BITS;
    let mut out = vec![0u64; n];

    if word_shift >= n {
        return out;
    }

    for i in 0..n {
        let src_idx = i as i64 - word_shift as i64;
        if src_idx < 0 {
            continue;
        }
        let src_idx = src_idx as usize;
        let mut v = if bit_shift == 0 {
            lanes[src_idx]
        } else {
            lanes[src_idx] << bit_shift
        };
        if bit_shift > 0 && src_idx > 0 {
            v |= lanes[src_idx - 1] >> (LANE_BITS - bit_shift);
        }
        out[i] = v;
    }

    out
}

fn lane_index(pos: u32) -> (usize, u32) {
    let bit = pos - 1;
    ((bit / LANE_BITS) as usize, bit % LANE_BITS)
}

/// Fixed 256-bit / four-lane sliding window. Used for `acked_seq_ids`.
pub struct Bitfield256 {
    lanes: [u64; 4],
    count: u32,
}

impl Bitfield256 {
    pub const CAPACITY: u32 = 256;

    pub fn new() -> Self {
        Self {
            lanes: [0; 4],
            count: 0,
        }
    }

    pub fn shift_by(&mut self, k: u32) {
        if k == 0 {
            return;
        }
        if k >= Self::CAPACITY {
            self.lanes = [0; 4];
        } else {
            let shifted = shift_lanes_left(&self.lanes, k);
            self.lanes.copy_from_slice(&shifted);
        }
        self.count = (self.count + k).min(Self::CAPACITY);
    }

    pub fn set(&mut self, pos: u32) {
        debug_assert!(pos >= 1);
        let (lane, bit) = lane_index(pos.min(Self::CAPACITY));
        self.lanes[lane] |= 1u64 << bit;
    }

    fn raw_is_set(&self, pos: u32) -> bool {
        let (lane, bit) = lane_index(pos);
        (self.lanes[lane] >> bit) & 1 != 0
    }

    /// Positions past the current tracked count are treated as already acked.
    pub fn is_set(&self, pos: u32) -> bool {
        if pos > self.count {
            return true;
        }
        self.raw_is_set(pos)
    }

    pub fn combine(&mut self, mask: u64) {
        self.lanes[0] |= mask;
    }

    pub fn first8(&self) -> u8 {
        (self.lanes[0] & 0xFF) as u8
    }

    pub fn first16(&self) -> u16 {
        (self.lanes[0] & 0xFFFF) as u16
    }

    /// Reports whether a `shift_by(k)` would fit without losing tracked
    /// positions, and how many positions would be lost if not.
    pub fn has_capacity_for(&self, k: u32) -> (bool, u32) {
        let projected = self.count + k;
        if projected <= Self::CAPACITY {
            (true, 0)
        } else {
            (false, projected - Self::CAPACITY)
        }
    }

    /// Inspects the oldest tracked position (the one a `shift_by(1)` would
    /// drop), then shrinks the tracked window by one, without touching the
    /// underlying lanes.
    pub fn check_and_trim_last(&mut self) -> (bool, u32) {
        if self.count == 0 {
            return (false, 0);
        }
        let pos = self.count;
        let was_set = self.raw_is_set(pos);
        self.count -= 1;
        (was_set, pos)
    }
}

impl Default for Bitfield256 {
    fn default() -> Self {
        Self::new()
    }
}

/// Growable sliding window, used for `received_seq_ids`. Grows by whole
/// 64-bit lanes as positions are shifted in; never clips.
pub struct DynamicBitfield {
    lanes: Vec<u64>,
    count: u32,
}

impl DynamicBitfield {
    pub fn new() -> Self {
        Self {
            lanes: Vec::new(),
            count: 0,
        }
    }

    fn lanes_needed(count: u32) -> usize {
        ((count as usize) + 63) / 64
    }

    pub fn shift_by(&mut self, k: u32) {
        if k == 0 {
            return;
        }
        self.count += k;
        let needed = Self::lanes_needed(self.count);
        if self.lanes.len() < needed {
            self.lanes.resize(needed, 0);
        }
        let shifted = shift_lanes_left(&self.lanes, k);
        self.lanes = shifted;
    }

    pub fn set(&mut self, pos: u32) {
        debug_assert!(pos >= 1);
        let needed = Self::lanes_needed(pos);
        if self.lanes.len() < needed {
            self.lanes.resize(needed, 0);
        }
        let (lane, bit) = lane_index(pos);
        self.lanes[lane] |= 1u64 << bit;
    }

    fn raw_is_set(&self, pos: u32) -> bool {
        let (lane, bit) = lane_index(pos);
        self.lanes.get(lane).map(|l| (l >> bit) & 1 != 0).unwrap_or(false)
    }

    pub fn is_set(&self, pos: u32) -> bool {
        if pos > self.count {
            return true;
        }
        self.raw_is_set(pos)
    }

    pub fn combine(&mut self, mask: u64) {
        if self.lanes.is_empty() {
            self.lanes.push(0);
        }
        self.lanes[0] |= mask;
    }

    pub fn first8(&self) -> u8 {
        self.lanes.first().map(|l| (*l & 0xFF) as u8).unwrap_or(0)
    }

    pub fn first16(&self) -> u16 {
        self.lanes.first().map(|l| (*l & 0xFFFF) as u16).unwrap_or(0)
    }
}

impl Default for DynamicBitfield {
    fn default() -> Self {
        Self::new()
    }
}
