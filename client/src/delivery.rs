//! Delayed delivery of messages that arrive ahead of the local clock
//!
//! Every sender advances the sequence by exactly one per action, so a message
//! stamped more than one past our position means something in between is
//! still in flight. Such messages wait here, keyed by sequence, until the gap
//! closes. A sender that skips ahead by more than one will stall itself and
//! everything after it.

use log::debug;
use shared::{ChatError, ClockStore, InboundMessage};
use std::collections::BTreeMap;

/// Outcome of offering a message for delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Offer {
    DeliverNow(InboundMessage),
    Buffered,
}

#[derive(Debug, Default)]
pub struct DelayedDeliveryQueue {
    pending: BTreeMap<u64, InboundMessage>,
}

impl DelayedDeliveryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decides whether `message` can be delivered now, advancing the clock when
    /// it moves us forward by one step
    ///
    /// A second message for an already buffered sequence is rejected with
    /// `DuplicateSequence` and the held one is kept.
    pub fn offer(
        &mut self,
        message: InboundMessage,
        clock: &mut ClockStore,
    ) -> Result<Offer, ChatError> {
        let theirs = message.sequence;
        let ours = clock.current();

        if theirs > ours.saturating_add(1) {
            if self.pending.contains_key(&theirs) {
                return Err(ChatError::DuplicateSequence(theirs));
            }
            debug!("Holding message {} (clock at {})", theirs, ours);
            self.pending.insert(theirs, message);
            return Ok(Offer::Buffered);
        }

        if theirs > ours {
            clock.advance(theirs);
        }

        Ok(Offer::DeliverNow(message))
    }

    /// Removes and yields, in sequence order, every held message that is no
    /// longer ahead of the clock: anything at or below the current position
    /// plus the contiguous run starting right after it
    ///
    /// Each released message advances the clock to its own sequence. Dropping
    /// the iterator early leaves the remaining messages buffered.
    pub fn drain<'a>(&'a mut self, clock: &'a mut ClockStore) -> Drain<'a> {
        Drain {
            pending: &mut self.pending,
            clock,
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

pub struct Drain<'a> {
    pending: &'a mut BTreeMap<u64, InboundMessage>,
    clock: &'a mut ClockStore,
}

impl Iterator for Drain<'_> {
    type Item = InboundMessage;

    fn next(&mut self) -> Option<InboundMessage> {
        let entry = self.pending.first_entry()?;
        let sequence = *entry.key();
        if sequence > self.clock.current().saturating_add(1) {
            return None;
        }
        self.clock.advance(sequence);
        Some(entry.remove())
    }
}
