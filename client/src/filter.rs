//! Decides which network messages belong to our conversation at all

use shared::InboundMessage;

#[derive(Debug, Clone)]
pub struct MessageFilter {
    tag: String,
    whitelist: Vec<String>,
}

impl MessageFilter {
    pub fn new(tag: impl Into<String>, whitelist: Vec<String>) -> Self {
        Self {
            tag: tag.into(),
            whitelist,
        }
    }

    /// Local echoes always pass. Network messages pass if they carry the group
    /// tag or come from a whitelisted sender.
    pub fn accept(&self, message: &InboundMessage) -> bool {
        let Some(sender) = message.sender.as_deref() else {
            return true;
        };

        if message.tag.as_deref() == Some(self.tag.as_str()) {
            return true;
        }

        self.whitelist.iter().any(|allowed| allowed == sender)
    }
}
