//! Where delivered messages end up

use tokio::sync::mpsc;

/// Receives messages once they are in causal order
///
/// Implementations are called from whichever task performed the delivery, so
/// they must not assume a particular thread.
pub trait DeliverySink: Send + Sync + 'static {
    fn deliver(&self, sender: &str, text: &str);
    fn clear(&self);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Message { sender: String, text: String },
    Clear,
}

/// Forwards deliveries over a channel so the host can consume them on its own
/// task
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Delivery>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Delivery>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn forward(&self, delivery: Delivery) {
        // The host stopped listening; nothing left to deliver to
        let _ = self.tx.send(delivery);
    }
}

impl DeliverySink for ChannelSink {
    fn deliver(&self, sender: &str, text: &str) {
        self.forward(Delivery::Message {
            sender: sender.to_string(),
            text: text.to_string(),
        });
    }

    fn clear(&self) {
        self.forward(Delivery::Clear);
    }
}
