//! Shared session state and the inbound dispatch path
//!
//! The clock and the delayed-delivery queue are touched both by the listener
//! task and by the caller sending messages, so they live behind one lock.
//! Ticking, sending, echoing and draining for an outgoing message all happen
//! under a single acquisition, as does every delivery of a network message,
//! so local echoes and network messages cannot overtake each other.

use crate::delivery::{DelayedDeliveryQueue, Offer};
use crate::filter::MessageFilter;
use crate::sink::DeliverySink;
use crate::transport::CommandChannel;
use log::{debug, warn};
use serde_json::Value;
use shared::protocol::decode_inbound;
use shared::{ChatError, ClockStore, Command, InboundMessage, TimeVector};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct SequenceState {
    clock: ClockStore,
    queue: DelayedDeliveryQueue,
}

pub struct Dispatcher {
    state: Mutex<SequenceState>,
    filter: MessageFilter,
    sink: Arc<dyn DeliverySink>,
    /// Name shown for our own messages
    user: String,
    group_tag: String,
}

impl Dispatcher {
    pub fn new(
        user: impl Into<String>,
        group_tag: impl Into<String>,
        filter: MessageFilter,
        sink: Arc<dyn DeliverySink>,
    ) -> Self {
        Self {
            state: Mutex::new(SequenceState::default()),
            filter,
            sink,
            user: user.into(),
            group_tag: group_tag.into(),
        }
    }

    pub async fn seed(&self, snapshot: &Value) -> Result<(), ChatError> {
        self.state.lock().await.clock.seed(snapshot)
    }

    /// Decodes a raw datagram from the message channel and dispatches it.
    /// Undecodable packets are logged and dropped.
    pub async fn dispatch_datagram(&self, bytes: &[u8]) {
        match decode_inbound(bytes) {
            Ok(message) => self.handle(message).await,
            Err(e) => warn!("Dropping packet: {}", e),
        }
    }

    /// Runs a decoded message through filter and ordering, delivering whatever
    /// becomes deliverable
    pub async fn handle(&self, message: InboundMessage) {
        let mut state = self.state.lock().await;

        if message.is_local() {
            self.deliver_and_drain(&mut state, &message);
            return;
        }

        if !self.filter.accept(&message) {
            debug!(
                "Filtered message from {:?} tagged {:?}",
                message.sender, message.tag
            );
            return;
        }

        let SequenceState { clock, queue } = &mut *state;
        match queue.offer(message, clock) {
            Ok(Offer::DeliverNow(message)) => self.deliver_and_drain(&mut state, &message),
            Ok(Offer::Buffered) => {}
            Err(ChatError::DuplicateSequence(sequence)) => {
                debug!("Discarding duplicate of held message {}", sequence);
            }
            Err(e) => warn!("Failed to order message: {}", e),
        }
    }

    /// Ticks the clock, sends `text` stamped with the new snapshot and
    /// delivers the local echo
    ///
    /// If the send fails the tick stays but nothing is echoed.
    pub async fn send_text(
        &self,
        text: &str,
        commands: &CommandChannel,
    ) -> Result<(), ChatError> {
        let mut state = self.state.lock().await;
        let sequence = state.clock.tick();

        let payload = Command::Message {
            text: text.to_string(),
            tag: self.group_tag.clone(),
            time_vector: state.clock.snapshot().clone(),
        }
        .encode()?;
        commands.notify(&payload).await?;

        let echo = InboundMessage::local(text, &self.group_tag, sequence);
        self.deliver_and_drain(&mut state, &echo);
        Ok(())
    }

    /// Ticks the clock and sends a keepalive ping
    pub async fn send_ping(&self, commands: &CommandChannel) -> Result<(), ChatError> {
        let payload = {
            let mut state = self.state.lock().await;
            state.clock.tick();
            let payload = Command::Ping {
                time_vector: state.clock.snapshot().clone(),
            }
            .encode()?;
            self.drain(&mut state);
            payload
        };

        commands.notify(&payload).await
    }

    /// Drops held messages and the clock, and clears the sink
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        state.queue.clear();
        state.clock.reset();
        self.sink.clear();
    }

    pub async fn current_sequence(&self) -> u64 {
        self.state.lock().await.clock.current()
    }

    pub async fn clock_snapshot(&self) -> TimeVector {
        self.state.lock().await.clock.snapshot().clone()
    }

    pub async fn pending(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    fn deliver_and_drain(&self, state: &mut SequenceState, message: &InboundMessage) {
        self.deliver(message);
        self.drain(state);
    }

    // Releases whatever the latest clock movement made deliverable
    fn drain(&self, state: &mut SequenceState) {
        let SequenceState { clock, queue } = state;
        for held in queue.drain(clock) {
            self.deliver(&held);
        }
    }

    fn deliver(&self, message: &InboundMessage) {
        let sender = message.sender.as_deref().unwrap_or(&self.user);
        self.sink.deliver(sender, &message.text);
    }
}
