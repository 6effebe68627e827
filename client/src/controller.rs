//! Connection lifecycle: register, run, deregister
//!
//! The controller is the only owner of session state. It opens the command
//! channel, seeds the clock from the registration reply, starts the message
//! listener and tears everything down again on disconnect.

use crate::config::ClientConfig;
use crate::dispatch::Dispatcher;
use crate::filter::MessageFilter;
use crate::sink::DeliverySink;
use crate::transport::{CommandChannel, ConnectionEvent, Listener, SessionId};
use log::{debug, info, warn};
use serde_json::Value;
use shared::protocol::{
    decode_clients_reply, decode_deregister_reply, decode_info_reply, decode_register_reply,
};
use shared::{ChatError, Command, ParticipantIndex, TimeVector};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Registering,
    Connected,
    Disconnecting,
}

struct Session {
    id: SessionId,
    index: ParticipantIndex,
    dispatcher: Arc<Dispatcher>,
    commands: Arc<CommandChannel>,
    listener: Listener,
}

pub struct ConnectionController {
    config: ClientConfig,
    sink: Arc<dyn DeliverySink>,
    state: ConnectionState,
    session: Option<Session>,
    // Id handed to the next session; events carrying an older id are stale
    next_session: SessionId,
    events_tx: mpsc::UnboundedSender<ConnectionEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<ConnectionEvent>>,
}

impl ConnectionController {
    pub fn new(config: ClientConfig, sink: Arc<dyn DeliverySink>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            config,
            sink,
            state: ConnectionState::Disconnected,
            session: None,
            next_session: 1,
            events_tx,
            events_rx: Some(events_rx),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Hands out the receiver for listener events; only the first call gets it
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<ConnectionEvent>> {
        self.events_rx.take()
    }

    /// Index the server assigned to us at registration
    pub fn participant_index(&self) -> Option<ParticipantIndex> {
        self.session.as_ref().map(|session| session.index)
    }

    /// Registers `user` with the server and starts listening for messages
    ///
    /// On any failure the controller is back in `Disconnected`.
    pub async fn connect(&mut self, user: &str) -> Result<(), ChatError> {
        if self.state != ConnectionState::Disconnected {
            return Err(ChatError::InvalidState(format!(
                "cannot connect while {:?}",
                self.state
            )));
        }

        info!("Registering as {} with {}", user, self.config.server);
        self.state = ConnectionState::Registering;

        let (index, dispatcher, commands) = match self.register(user).await {
            Ok(registered) => registered,
            Err(e) => {
                warn!("Registration failed: {}", e);
                self.state = ConnectionState::Disconnected;
                return Err(e);
            }
        };

        let id = self.next_session;
        self.next_session += 1;

        self.state = ConnectionState::Connected;
        let listener = Listener::spawn(
            id,
            &self.config,
            Arc::clone(&dispatcher),
            Arc::clone(&commands),
            self.events_tx.clone(),
        );

        info!("Connected as participant {}", index);
        self.session = Some(Session {
            id,
            index,
            dispatcher,
            commands,
            listener,
        });
        Ok(())
    }

    async fn register(
        &self,
        user: &str,
    ) -> Result<(ParticipantIndex, Arc<Dispatcher>, Arc<CommandChannel>), ChatError> {
        let commands = CommandChannel::open(
            self.config.command_bind,
            &self.config.server,
            self.config.request_timeout,
            self.config.buffer_size,
        )
        .await?;

        let reply = commands
            .call(&Command::Register {
                user: user.to_string(),
            })
            .await?;
        let registration = decode_register_reply(&reply)?;

        let filter = MessageFilter::new(
            self.config.group_tag.clone(),
            self.config.sender_whitelist.clone(),
        );
        let dispatcher = Dispatcher::new(
            user,
            self.config.group_tag.clone(),
            filter,
            Arc::clone(&self.sink),
        );
        dispatcher.seed(&registration.time_vector).await?;

        Ok((registration.index, Arc::new(dispatcher), Arc::new(commands)))
    }

    /// Sends a chat message and delivers it locally right away
    pub async fn send_text(&self, text: &str) -> Result<(), ChatError> {
        let session = self.connected_session()?;
        session.dispatcher.send_text(text, &session.commands).await
    }

    /// Raw reply to the server's `info` command
    pub async fn info(&self) -> Result<Value, ChatError> {
        let session = self.connected_session()?;
        let reply = session.commands.call(&Command::Info).await?;
        decode_info_reply(&reply)
    }

    /// Connected clients as address to user name
    pub async fn clients(&self) -> Result<BTreeMap<String, String>, ChatError> {
        let session = self.connected_session()?;
        let reply = session.commands.call(&Command::GetClients).await?;
        decode_clients_reply(&reply)
    }

    /// Stops the listener and deregisters. Does nothing unless connected.
    ///
    /// Held messages and the sink are cleared even when deregistration fails;
    /// the failure is still reported.
    pub async fn disconnect(&mut self) -> Result<(), ChatError> {
        if self.state != ConnectionState::Connected {
            debug!("Disconnect ignored while {:?}", self.state);
            return Ok(());
        }

        let Some(session) = self.session.take() else {
            self.state = ConnectionState::Disconnected;
            return Ok(());
        };

        info!("Disconnecting");
        self.state = ConnectionState::Disconnecting;

        let Session {
            dispatcher,
            commands,
            listener,
            ..
        } = session;
        listener.stop().await;

        let result = match commands.call(&Command::Deregister).await {
            Ok(reply) => decode_deregister_reply(&reply),
            Err(e) => Err(e),
        };

        dispatcher.reset().await;
        self.state = ConnectionState::Disconnected;

        match &result {
            Ok(()) => info!("Deregistered"),
            Err(e) => warn!("Deregistration failed: {}", e),
        }
        result
    }

    /// Reacts to an event from the listener task; a lost message channel ends
    /// the session that reported it
    ///
    /// Events from a session that has already ended are ignored.
    pub async fn handle_event(&mut self, event: ConnectionEvent) -> Result<(), ChatError> {
        if self.session_id() != Some(event.session()) {
            debug!("Ignoring event from ended session: {:?}", event);
            return Ok(());
        }

        match event {
            ConnectionEvent::Listening { addr, .. } => {
                debug!("Message channel ready on {}", addr);
                Ok(())
            }
            ConnectionEvent::Lost { reason, .. } => {
                warn!("Connection lost: {}", reason);
                self.disconnect().await
            }
        }
    }

    /// Id of the running session, as carried by its listener's events
    pub fn session_id(&self) -> Option<SessionId> {
        self.session.as_ref().map(|session| session.id)
    }

    pub async fn current_sequence(&self) -> Option<u64> {
        match &self.session {
            Some(session) => Some(session.dispatcher.current_sequence().await),
            None => None,
        }
    }

    pub async fn clock_snapshot(&self) -> Option<TimeVector> {
        match &self.session {
            Some(session) => Some(session.dispatcher.clock_snapshot().await),
            None => None,
        }
    }

    fn connected_session(&self) -> Result<&Session, ChatError> {
        match (&self.state, &self.session) {
            (ConnectionState::Connected, Some(session)) => Ok(session),
            _ => Err(ChatError::InvalidState(format!(
                "not connected ({:?})",
                self.state
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{ChannelSink, Delivery};
    use std::net::{Ipv4Addr, SocketAddr};
    use std::time::Duration;
    use tokio::net::UdpSocket;
    use tokio_test::{assert_err, assert_ok};

    fn controller(server: &str) -> (ConnectionController, mpsc::UnboundedReceiver<Delivery>) {
        let (sink, rx) = ChannelSink::new();
        let mut config = ClientConfig::local(server);
        config.request_timeout = Duration::from_millis(200);
        (ConnectionController::new(config, Arc::new(sink)), rx)
    }

    #[tokio::test]
    async fn test_disconnect_before_connect_is_noop() {
        let (mut controller, mut rx) = controller("127.0.0.1:9");

        assert_ok!(controller.disconnect().await);
        assert_eq!(controller.state(), ConnectionState::Disconnected);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_operations_require_connection() {
        let (controller, _rx) = controller("127.0.0.1:9");

        assert!(matches!(
            controller.send_text("hi").await,
            Err(ChatError::InvalidState(_))
        ));
        assert_err!(controller.info().await);
        assert_err!(controller.clients().await);
        assert_eq!(controller.participant_index(), None);
        assert_eq!(controller.current_sequence().await, None);
    }

    #[tokio::test]
    async fn test_silent_server_fails_connect() {
        let server = UdpSocket::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)))
            .await
            .unwrap();
        let (mut controller, _rx) = controller(&server.local_addr().unwrap().to_string());

        let result = controller.connect("Llama").await;
        assert!(matches!(result, Err(ChatError::Network(_))));
        assert_eq!(controller.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_rejected_registration_fails_connect() {
        let server = UdpSocket::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)))
            .await
            .unwrap();
        let server_addr = server.local_addr().unwrap();

        tokio::spawn(async move {
            let mut buf = [0u8; 2048];
            if let Ok((_, from)) = server.recv_from(&mut buf).await {
                let _ = server
                    .send_to(br#"{"success":"reg_fail"}"#, from)
                    .await;
            }
        });

        let (mut controller, _rx) = controller(&server_addr.to_string());
        let result = controller.connect("Llama").await;

        assert!(matches!(result, Err(ChatError::Protocol(_))));
        assert_eq!(controller.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_events_can_only_be_taken_once() {
        let (mut controller, _rx) = controller("127.0.0.1:9");
        assert!(controller.take_events().is_some());
        assert!(controller.take_events().is_none());
    }

    #[tokio::test]
    async fn test_lost_event_while_disconnected_is_harmless() {
        let (mut controller, _rx) = controller("127.0.0.1:9");

        let result = controller
            .handle_event(ConnectionEvent::Lost {
                session: 1,
                reason: "bind failed".to_string(),
            })
            .await;

        assert_ok!(result);
        assert_eq!(controller.state(), ConnectionState::Disconnected);
    }
}
