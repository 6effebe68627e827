//! Local view of the server's shared sequence space
//!
//! The server hands out a full snapshot of per-participant counters at
//! registration and stamps every broadcast with a position in that space.
//! Ordering decisions only ever look at slot 0.

use crate::error::ChatError;
use serde_json::Value;
use std::collections::BTreeMap;

/// Server-assigned participant index
pub type ParticipantIndex = u32;

/// Slot holding the sequence position used for ordering
pub const SEQUENCE_SLOT: ParticipantIndex = 0;

/// Per-participant counters as sent in `time_vector`
pub type TimeVector = BTreeMap<ParticipantIndex, u64>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClockStore {
    counters: TimeVector,
}

impl ClockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current local sequence position, 0 until seeded
    pub fn current(&self) -> u64 {
        self.counters.get(&SEQUENCE_SLOT).copied().unwrap_or(0)
    }

    /// Moves the local position forward to `to`; never moves it back
    pub fn advance(&mut self, to: u64) {
        if to > self.current() {
            self.counters.insert(SEQUENCE_SLOT, to);
        }
    }

    /// Increments the local position and returns the new value
    pub fn tick(&mut self) -> u64 {
        let next = self.current().saturating_add(1);
        self.counters.insert(SEQUENCE_SLOT, next);
        next
    }

    /// Replaces all counters with the snapshot from a registration reply
    ///
    /// The snapshot must be a JSON object whose keys are participant indices
    /// and whose values are non-negative integers, and it must contain the
    /// sequence slot. Nothing is modified unless the whole snapshot is valid.
    pub fn seed(&mut self, snapshot: &Value) -> Result<(), ChatError> {
        let entries = snapshot
            .as_object()
            .ok_or_else(|| ChatError::Protocol("time_vector is not an object".to_string()))?;

        let mut counters = TimeVector::new();
        for (key, value) in entries {
            let index = key.parse::<ParticipantIndex>().map_err(|_| {
                ChatError::Protocol(format!("time_vector key '{}' is not an index", key))
            })?;
            let counter = value.as_u64().ok_or_else(|| {
                ChatError::Protocol(format!(
                    "time_vector value for '{}' is not an integer: {}",
                    key, value
                ))
            })?;
            counters.insert(index, counter);
        }

        if !counters.contains_key(&SEQUENCE_SLOT) {
            return Err(ChatError::Protocol(
                "time_vector is missing slot 0".to_string(),
            ));
        }

        self.counters = counters;
        Ok(())
    }

    pub fn snapshot(&self) -> &TimeVector {
        &self.counters
    }

    pub fn reset(&mut self) {
        self.counters.clear();
    }
}
