//! Replicated fields
//!
//! A [`ReplicatedField`] carries a value, a wrapping sequence number, and a
//! queue of changes not yet sent. The authority writes through
//! [`ReplicatedField::write`], which records every change in order. Observers
//! apply incoming [`FieldState`]s through [`ReplicatedField::apply_remote`],
//! which drops anything not newer than what the mirror already holds.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Names of every replicated field in the game
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldId {
    /// Bomb arming latch
    Armed,
    /// Character health
    Health,
    /// Bombs the character still carries
    BombCount,
}

/// Type-erased field value as carried on the wire
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Bool(bool),
    Float(f32),
    Int(i32),
}

/// Conversion between a concrete field type and [`FieldValue`]
pub trait FieldType: Clone + PartialEq {
    fn to_value(&self) -> FieldValue;
    fn from_value(value: FieldValue) -> Option<Self>;
}

impl FieldType for bool {
    fn to_value(&self) -> FieldValue {
        FieldValue::Bool(*self)
    }

    fn from_value(value: FieldValue) -> Option<Self> {
        match value {
            FieldValue::Bool(v) => Some(v),
            _ => None,
        }
    }
}

impl FieldType for f32 {
    fn to_value(&self) -> FieldValue {
        FieldValue::Float(*self)
    }

    fn from_value(value: FieldValue) -> Option<Self> {
        match value {
            FieldValue::Float(v) => Some(v),
            _ => None,
        }
    }
}

impl FieldType for i32 {
    fn to_value(&self) -> FieldValue {
        FieldValue::Int(*self)
    }

    fn from_value(value: FieldValue) -> Option<Self> {
        match value {
            FieldValue::Int(v) => Some(v),
            _ => None,
        }
    }
}

/// One versioned value of one field
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FieldState {
    pub field: FieldId,
    pub value: FieldValue,
    pub sequence: u16,
}

/// Returns whether or not a wrapping sequence is newer than another
/// sequence_greater_than(2,1) will return true
/// sequence_greater_than(1,2) will return false
/// sequence_greater_than(1,1) will return false
pub fn sequence_greater_than(s1: u16, s2: u16) -> bool {
    ((s1 > s2) && (s1 - s2 <= 32768)) || ((s1 < s2) && (s2 - s1 > 32768))
}

/// Result of applying a remote state to a mirror
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// Newer sequence with a different value; the change hook must run
    Changed,
    /// Newer sequence carrying the value already mirrored
    Unchanged,
    /// Not newer than the mirror; dropped
    Stale,
}

/// A value with a single writer and any number of mirrors
#[derive(Debug, Clone)]
pub struct ReplicatedField<T> {
    id: FieldId,
    value: T,
    sequence: u16,
    pending: VecDeque<FieldState>,
}

impl<T: FieldType> ReplicatedField<T> {
    pub fn new(id: FieldId, value: T) -> Self {
        Self {
            id,
            value,
            sequence: 0,
            pending: VecDeque::new(),
        }
    }

    pub fn id(&self) -> FieldId {
        self.id
    }

    pub fn get(&self) -> &T {
        &self.value
    }

    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    /// Current value with its sequence, used for spawn snapshots
    pub fn state(&self) -> FieldState {
        FieldState {
            field: self.id,
            value: self.value.to_value(),
            sequence: self.sequence,
        }
    }

    /// Authority write. Returns true when the value changed and an update was
    /// queued. Writing the current value is a no-op.
    pub fn write(&mut self, value: T) -> bool {
        if self.value == value {
            return false;
        }
        self.value = value;
        self.sequence = self.sequence.wrapping_add(1);
        let state = self.state();
        self.pending.push_back(state);
        true
    }

    /// Queued updates in write order
    pub fn drain_pending(&mut self) -> impl Iterator<Item = FieldState> + '_ {
        self.pending.drain(..)
    }

    pub fn clear_pending(&mut self) {
        self.pending.clear();
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Observer apply. Returns `None` if the payload does not decode as `T`.
    pub fn apply_remote(&mut self, value: FieldValue, sequence: u16) -> Option<Applied> {
        let value = T::from_value(value)?;
        if !sequence_greater_than(sequence, self.sequence) {
            return Some(Applied::Stale);
        }
        self.sequence = sequence;
        if self.value == value {
            return Some(Applied::Unchanged);
        }
        self.value = value;
        Some(Applied::Changed)
    }

    /// Adopt a snapshot state unconditionally (initial spawn)
    pub fn adopt(&mut self, value: FieldValue, sequence: u16) -> Option<()> {
        self.value = T::from_value(value)?;
        self.sequence = sequence;
        Some(())
    }
}
