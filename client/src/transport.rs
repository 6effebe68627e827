//! UDP channels to the relay server
//!
//! The command channel is a connected socket used for one request/response at
//! a time. The message channel is a separate socket serviced by a background
//! task that dispatches pushed messages and keeps the registration alive
//! during silence.

use crate::config::ClientConfig;
use crate::dispatch::Dispatcher;
use log::{debug, error, info, warn};
use shared::{ChatError, Command};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{lookup_host, UdpSocket};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

/// Request/response conversation with the server
pub struct CommandChannel {
    // Held for the whole round trip so requests never overlap
    socket: Mutex<UdpSocket>,
    server: SocketAddr,
    request_timeout: Duration,
    buffer_size: usize,
}

impl CommandChannel {
    pub async fn open(
        bind: SocketAddr,
        server: &str,
        request_timeout: Duration,
        buffer_size: usize,
    ) -> Result<Self, ChatError> {
        let server = lookup_host(server)
            .await?
            .next()
            .ok_or_else(|| ChatError::Network(format!("cannot resolve {}", server)))?;

        let socket = UdpSocket::bind(bind).await?;
        socket.connect(server).await?;
        debug!(
            "Command channel {} -> {}",
            socket.local_addr()?,
            server
        );

        Ok(Self {
            socket: Mutex::new(socket),
            server,
            request_timeout,
            buffer_size,
        })
    }

    /// Sends `payload` and, if `expect_reply`, waits for a single reply
    ///
    /// One attempt only: a send failure or a missing reply is reported as a
    /// `Network` error and left to the caller.
    pub async fn request(
        &self,
        payload: &[u8],
        expect_reply: bool,
    ) -> Result<Option<Vec<u8>>, ChatError> {
        let socket = self.socket.lock().await;
        let mut buffer = vec![0u8; self.buffer_size];

        // Late replies to an earlier, timed-out request must not be taken as
        // the answer to this one
        while let Ok(len) = socket.try_recv(&mut buffer) {
            debug!("Discarding stale reply ({} bytes)", len);
        }

        socket.send(payload).await?;
        if !expect_reply {
            return Ok(None);
        }

        match timeout(self.request_timeout, socket.recv(&mut buffer)).await {
            Ok(Ok(len)) => {
                buffer.truncate(len);
                Ok(Some(buffer))
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(ChatError::Network(format!(
                "no reply from {} within {:?}",
                self.server, self.request_timeout
            ))),
        }
    }

    /// Sends a command and returns its reply
    pub async fn call(&self, command: &Command) -> Result<Vec<u8>, ChatError> {
        self.request(&command.encode()?, true)
            .await?
            .ok_or_else(|| ChatError::Network(format!("no reply to {}", command.name())))
    }

    /// Sends a command without waiting for a reply
    pub async fn notify(&self, payload: &[u8]) -> Result<(), ChatError> {
        self.request(payload, false).await.map(|_| ())
    }
}

/// Counts read timeouts and says when a keepalive is due
#[derive(Debug, Clone)]
pub struct Keepalive {
    every: u32,
    remaining: u32,
}

impl Keepalive {
    pub fn new(every: u32) -> Self {
        let every = every.max(1);
        Self {
            every,
            remaining: every,
        }
    }

    /// Records a read timeout; true when a ping should go out now
    pub fn on_timeout(&mut self) -> bool {
        self.remaining -= 1;
        if self.remaining == 0 {
            self.remaining = self.every;
            return true;
        }
        false
    }

    pub fn on_traffic(&mut self) {
        self.remaining = self.every;
    }
}

/// Identifies one connect..disconnect span of a controller
pub type SessionId = u64;

/// Reported by the listener task to whoever owns the connection
///
/// Events from every session share one channel, so each carries the session
/// that produced it. An event can outlive its session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The message channel is bound and receiving
    Listening { session: SessionId, addr: SocketAddr },
    /// The message channel could not be opened; the session is unusable
    Lost { session: SessionId, reason: String },
}

impl ConnectionEvent {
    pub fn session(&self) -> SessionId {
        match self {
            ConnectionEvent::Listening { session, .. } | ConnectionEvent::Lost { session, .. } => {
                *session
            }
        }
    }
}

/// Handle to the background task servicing the message channel
pub struct Listener {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Listener {
    pub fn spawn(
        session: SessionId,
        config: &ClientConfig,
        dispatcher: Arc<Dispatcher>,
        commands: Arc<CommandChannel>,
        events: mpsc::UnboundedSender<ConnectionEvent>,
    ) -> Self {
        let (stop, stop_rx) = watch::channel(false);
        let task = ListenerTask {
            session,
            bind: config.message_bind,
            read_timeout: config.read_timeout,
            keepalive: Keepalive::new(config.keepalive_timeouts),
            buffer_size: config.buffer_size,
            dispatcher,
            commands,
            events,
            stop: stop_rx,
        };

        Self {
            stop,
            handle: tokio::spawn(task.run()),
        }
    }

    /// Signals the task and waits for it to exit. Takes at most one read
    /// timeout plus any dispatch already in progress.
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        if let Err(e) = self.handle.await {
            error!("Message listener task failed: {}", e);
        }
    }
}

struct ListenerTask {
    session: SessionId,
    bind: SocketAddr,
    read_timeout: Duration,
    keepalive: Keepalive,
    buffer_size: usize,
    dispatcher: Arc<Dispatcher>,
    commands: Arc<CommandChannel>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    stop: watch::Receiver<bool>,
}

impl ListenerTask {
    async fn run(mut self) {
        let socket = match self.open().await {
            Ok(socket) => socket,
            Err(e) => {
                error!("Cannot open message channel on {}: {}", self.bind, e);
                let _ = self.events.send(ConnectionEvent::Lost {
                    session: self.session,
                    reason: e.to_string(),
                });
                return;
            }
        };

        let mut buffer = vec![0u8; self.buffer_size];

        while !*self.stop.borrow() {
            tokio::select! {
                changed = self.stop.changed() => {
                    // A dropped handle counts as a stop request too
                    if changed.is_err() {
                        break;
                    }
                },

                result = timeout(self.read_timeout, socket.recv_from(&mut buffer)) => {
                    match result {
                        Ok(Ok((len, addr))) => {
                            debug!("Received {} bytes from {}", len, addr);
                            self.keepalive.on_traffic();
                            self.dispatcher.dispatch_datagram(&buffer[..len]).await;
                        }
                        Ok(Err(e)) => {
                            warn!("Error receiving message: {}", e);
                            sleep(Duration::from_millis(10)).await;
                        }
                        Err(_) => {
                            if self.keepalive.on_timeout() {
                                self.send_ping().await;
                            }
                        }
                    }
                },
            }
        }

        drop(socket);
        info!("Message listener stopped");
    }

    async fn open(&self) -> Result<UdpSocket, ChatError> {
        let socket = UdpSocket::bind(self.bind).await?;
        let local = socket.local_addr()?;
        info!("Listening for messages on {}", local);
        let _ = self.events.send(ConnectionEvent::Listening {
            session: self.session,
            addr: local,
        });
        Ok(socket)
    }

    async fn send_ping(&self) {
        match self.dispatcher.send_ping(&self.commands).await {
            Ok(()) => debug!("Sent keepalive ping"),
            Err(e) => warn!("Keepalive ping failed: {}", e),
        }
    }
}
