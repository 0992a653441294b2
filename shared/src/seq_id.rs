use riptide_serde::{BitBuffer, Primitive, SerdeResult};
use std::cmp::Ordering;
use std::fmt::Display;
use std::ops::{Add, AddAssign, Sub, SubAssign};

/// A 16-bit sequence number that wraps, with modular ordering and distance.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct SeqId(pub u16);

impl SeqId {
    pub const ZERO: Self = Self(0);

    pub fn incr(&mut self) {
        *self += 1;
    }

    /// Signed modular distance `self - rhs`, in `[-32768, 32767]`.
    pub fn gap(self, rhs: Self) -> i16 {
        gap(self.0, rhs.0)
    }
}

/// Signed modular distance between two wrapping 16-bit sequence numbers.
pub fn gap(lhs: u16, rhs: u16) -> i16 {
    let range = u16::MAX as i32 + 1;
    let diff = lhs as i32 - rhs as i32;
    (if diff > i16::MAX as i32 {
        diff - range
    } else if diff < i16::MIN as i32 {
        diff + range
    } else {
        diff
    }) as i16
}

fn seq_gt(lhs: u16, rhs: u16) -> bool {
    let half_range = u16::MAX / 2 + 1;
    (lhs > rhs && lhs - rhs <= half_range) || (lhs < rhs && rhs - lhs > half_range)
}

impl Display for SeqId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u16> for SeqId {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

impl From<SeqId> for u16 {
    fn from(value: SeqId) -> Self {
        value.0
    }
}

impl Ord for SeqId {
    fn cmp(&self, rhs: &Self) -> Ordering {
        if self == rhs {
            Ordering::Equal
        } else if seq_gt(self.0, rhs.0) {
            Ordering::Greater
        } else {
            Ordering::Less
        }
    }
}

impl PartialOrd for SeqId {
    fn partial_cmp(&self, rhs: &Self) -> Option<Ordering> {
        Some(self.cmp(rhs))
    }
}

impl Add<u16> for SeqId {
    type Output = Self;
    fn add(self, rhs: u16) -> Self::Output {
        Self(self.0.wrapping_add(rhs))
    }
}

impl AddAssign<u16> for SeqId {
    fn add_assign(&mut self, rhs: u16) {
        self.0 = self.0.wrapping_add(rhs);
    }
}

impl Sub<u16> for SeqId {
    type Output = Self;
    fn sub(self, rhs: u16) -> Self::Output {
        Self(self.0.wrapping_sub(rhs))
    }
}

impl SubAssign<u16> for SeqId {
    fn sub_assign(&mut self, rhs: u16) {
        self.0 = self.0.wrapping_sub(rhs);
    }
}

impl Primitive for SeqId {
    const BITS: u8 = 16;
    const NAME: &'static str = "SeqId";

    fn put(&self, buf: &mut BitBuffer, at: &mut u32) -> SerdeResult<()> {
        self.0.put(buf, at)
    }

    fn get(buf: &BitBuffer, at: &mut u32) -> SerdeResult<Self> {
        u16::get(buf, at).map(Self)
    }
}
