//! Wire protocol and logical clock shared by the chat client and its tests

pub mod clock;
mod error;
pub mod protocol;

pub use clock::{ClockStore, ParticipantIndex, TimeVector, SEQUENCE_SLOT};
pub use error::ChatError;
pub use protocol::{Command, InboundMessage, Registration};

/// Tag attached to every message belonging to our group
pub const GROUP_TAG: &str = "[g54]";
/// Senders whose untagged messages are still part of the conversation
pub const SENDER_WHITELIST: [&str; 3] = ["Server", "QuestionBot", "AnswerBot"];

pub const SERVER_PORT: u16 = 4000;
pub const COMMAND_PORT: u16 = 4000;
pub const MESSAGE_PORT: u16 = 4001;
/// Largest datagram we expect from the server
pub const MESSAGE_BUFFER_SIZE: usize = 2048;
