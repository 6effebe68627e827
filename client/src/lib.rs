//! # Group Chat Client Library
//!
//! Client endpoint for a relay-based group chat spoken over UDP. The server
//! stamps every broadcast with a position in a shared logical clock; because
//! UDP may reorder or drop datagrams, the client holds back messages that
//! arrive early and hands them to the application only once everything before
//! them has been delivered.
//!
//! ## Architecture Overview
//!
//! Two UDP conversations run side by side:
//!
//! - The **command channel** carries requests (`register`, `deregister`,
//!   `info`, `get_clients`, `message`, `ping`) and, where the protocol has
//!   one, waits for the reply. Only one request is in flight at a time.
//! - The **message channel** receives the server's broadcasts. A background
//!   task reads it with a short timeout, dispatches each datagram and sends a
//!   keepalive ping after a stretch of silence.
//!
//! Inbound data flows listener → filter → delayed delivery → sink. Outbound
//! text ticks the clock, is sent on the command channel and is echoed to the
//! sink straight away.
//!
//! ## Module Organization
//!
//! ### Controller Module (`controller`)
//! Connection lifecycle and the public client API:
//! - Registration and clock seeding
//! - Sending text, listing clients, server info
//! - Listener start/stop and deregistration
//!
//! ### Dispatch Module (`dispatch`)
//! Session state shared between the caller and the listener task: the clock
//! and the delayed-delivery queue behind a single lock.
//!
//! ### Delivery Module (`delivery`)
//! The ordering buffer that decides between delivering now and waiting for a
//! gap to close.
//!
//! ### Filter Module (`filter`)
//! Drops messages that are not part of our group before they can occupy a
//! slot in the ordering buffer.
//!
//! ### Transport Module (`transport`)
//! UDP sockets for both channels, the listener task and keepalive counting.
//!
//! ### Sink Module (`sink`)
//! The delivery interface consumed by whatever displays messages.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::config::ClientConfig;
//! use client::controller::ConnectionController;
//! use client::sink::{ChannelSink, Delivery};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (sink, mut deliveries) = ChannelSink::new();
//!     let config = ClientConfig {
//!         server: "chat.example.org:4000".to_string(),
//!         ..ClientConfig::default()
//!     };
//!
//!     let mut controller = ConnectionController::new(config, Arc::new(sink));
//!     controller.connect("Llama").await?;
//!     controller.send_text("hello").await?;
//!
//!     if let Some(Delivery::Message { sender, text }) = deliveries.recv().await {
//!         println!("{}: {}", sender, text);
//!     }
//!
//!     controller.disconnect().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod controller;
pub mod delivery;
pub mod dispatch;
pub mod filter;
pub mod sink;
pub mod transport;
