//! Per-replica logical timestamp vector.
//!
//! A `VectorClock` only ever moves forward: `inc` bumps exactly the named
//! slot, `set` refuses to go backwards, and `max` never lowers a slot. This
//! is the sole invariant the anti-entropy protocol leans on to detect a
//! misbehaving peer (a rewind) rather than silently losing history.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorClock {
    slots: Vec<u64>,
}

impl VectorClock {
    pub fn new(n: usize) -> Self {
        Self { slots: vec![0; n] }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, i: usize) -> u64 {
        self.slots[i]
    }

    /// `V[i] += 1`. Never fails.
    pub fn inc(&mut self, i: usize) -> u64 {
        self.slots[i] += 1;
        self.slots[i]
    }

    /// `V[i] = t`, rejecting any attempt to move a slot backwards.
    pub fn set(&mut self, i: usize, t: u64) -> Result<()> {
        if t < self.slots[i] {
            return Err(Error::ClockRewind {
                slot: i,
                attempted: t,
                current: self.slots[i],
            });
        }
        self.slots[i] = t;
        Ok(())
    }

    /// Pointwise `V[i] = max(V[i], other[i])`. `other` is untouched.
    pub fn max(&mut self, other: &VectorClock) {
        for (slot, other_slot) in self.slots.iter_mut().zip(other.slots.iter()) {
            if *other_slot > *slot {
                *slot = *other_slot;
            }
        }
    }

    /// True iff `self` and `other` have equal length and `self[i] >= other[i]` everywhere.
    pub fn dominates(&self, other: &VectorClock) -> bool {
        self.slots.len() == other.slots.len()
            && self
                .slots
                .iter()
                .zip(other.slots.iter())
                .all(|(a, b)| a >= b)
    }

    /// True iff `other` dominates `self` and the two clocks are not equal.
    pub fn strictly_less(&self, other: &VectorClock) -> bool {
        if self.slots.len() != other.slots.len() {
            return false;
        }
        other.dominates(self) && self != other
    }

    pub fn as_slice(&self) -> &[u64] {
        &self.slots
    }
}
