//! Client settings with defaults matching the relay's well-known ports

use shared::{
    COMMAND_PORT, GROUP_TAG, MESSAGE_BUFFER_SIZE, MESSAGE_PORT, SENDER_WHITELIST, SERVER_PORT,
};
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Read timeouts without traffic before a keepalive ping goes out
pub const KEEPALIVE_TIMEOUTS: u32 = 20;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Relay server as `host:port`
    pub server: String,
    /// Local address the command channel binds to
    pub command_bind: SocketAddr,
    /// Local address the message channel listens on
    pub message_bind: SocketAddr,
    /// Message channel read timeout, also the stop-signal latency
    pub read_timeout: Duration,
    /// How long a command waits for its reply
    pub request_timeout: Duration,
    pub keepalive_timeouts: u32,
    pub group_tag: String,
    pub sender_whitelist: Vec<String>,
    pub buffer_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: format!("127.0.0.1:{}", SERVER_PORT),
            command_bind: SocketAddr::from((Ipv4Addr::UNSPECIFIED, COMMAND_PORT)),
            message_bind: SocketAddr::from((Ipv4Addr::UNSPECIFIED, MESSAGE_PORT)),
            read_timeout: Duration::from_secs(1),
            request_timeout: Duration::from_secs(10),
            keepalive_timeouts: KEEPALIVE_TIMEOUTS,
            group_tag: GROUP_TAG.to_string(),
            sender_whitelist: SENDER_WHITELIST.iter().map(|s| s.to_string()).collect(),
            buffer_size: MESSAGE_BUFFER_SIZE,
        }
    }
}

impl ClientConfig {
    /// Config for a server on `server`, with both local channels on ephemeral
    /// loopback ports
    pub fn local(server: impl Into<String>) -> Self {
        let loopback = SocketAddr::from((Ipv4Addr::LOCALHOST, 0));
        Self {
            server: server.into(),
            command_bind: loopback,
            message_bind: loopback,
            ..Self::default()
        }
    }
}
