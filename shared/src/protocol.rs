//! JSON wire format spoken with the relay server
//!
//! Requests go out on the command channel as flat objects with a `cmd`
//! discriminator. Replies come back on the same channel; broadcasts arrive on
//! the message channel as `{sender?, tag?, text, time_vector}`.

use crate::clock::{ParticipantIndex, TimeVector, SEQUENCE_SLOT};
use crate::error::ChatError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub const REGISTER_OK: &str = "reg_ok";
pub const DEREGISTER_OK: &str = "dreg_ok";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Command {
    Register {
        user: String,
    },
    Deregister,
    Info,
    GetClients,
    Message {
        text: String,
        tag: String,
        time_vector: TimeVector,
    },
    Ping {
        time_vector: TimeVector,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Register { .. } => "register",
            Command::Deregister => "deregister",
            Command::Info => "info",
            Command::GetClients => "get_clients",
            Command::Message { .. } => "message",
            Command::Ping { .. } => "ping",
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, ChatError> {
        serde_json::to_vec(self).map_err(|e| {
            ChatError::MalformedMessage(format!("cannot encode {}: {}", self.name(), e))
        })
    }
}

/// A chat message ready for filtering and ordering
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Absent for local echoes
    pub sender: Option<String>,
    pub tag: Option<String>,
    pub text: String,
    /// Slot 0 of the attached `time_vector`
    pub sequence: u64,
}

impl InboundMessage {
    /// Builds the echo of a message this client just sent
    pub fn local(text: impl Into<String>, tag: impl Into<String>, sequence: u64) -> Self {
        Self {
            sender: None,
            tag: Some(tag.into()),
            text: text.into(),
            sequence,
        }
    }

    pub fn is_local(&self) -> bool {
        self.sender.is_none()
    }
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    sender: Option<String>,
    tag: Option<String>,
    text: Option<String>,
    time_vector: Option<Value>,
}

/// Decodes a datagram received on the message channel
pub fn decode_inbound(bytes: &[u8]) -> Result<InboundMessage, ChatError> {
    let wire: WireMessage = serde_json::from_slice(trim_padding(bytes))
        .map_err(|e| ChatError::MalformedMessage(e.to_string()))?;

    let text = wire
        .text
        .ok_or_else(|| ChatError::MalformedMessage("missing field 'text'".to_string()))?;

    let slot = SEQUENCE_SLOT.to_string();
    let sequence = match wire.time_vector.as_ref().and_then(|tv| tv.get(&slot)) {
        Some(value) => value.as_u64().ok_or_else(|| {
            ChatError::MalformedMessage(format!("non-numeric sequence: {}", value))
        })?,
        // Local echoes are never ordered, so they may omit the clock
        None if wire.sender.is_none() => 0,
        None => {
            return Err(ChatError::MalformedMessage(
                "missing time_vector sequence".to_string(),
            ))
        }
    };

    Ok(InboundMessage {
        sender: wire.sender,
        tag: wire.tag,
        text,
        sequence,
    })
}

/// Successful registration
#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    pub index: ParticipantIndex,
    /// Raw snapshot, validated when the clock is seeded
    pub time_vector: Value,
}

pub fn decode_register_reply(bytes: &[u8]) -> Result<Registration, ChatError> {
    let reply = parse_reply(bytes)?;
    expect_success(&reply, REGISTER_OK)?;

    let index = reply
        .get("index")
        .and_then(Value::as_u64)
        .and_then(|i| ParticipantIndex::try_from(i).ok())
        .ok_or_else(|| ChatError::Protocol("register reply has no valid index".to_string()))?;

    let time_vector = reply
        .get("time_vector")
        .cloned()
        .ok_or_else(|| ChatError::Protocol("register reply has no time_vector".to_string()))?;

    Ok(Registration { index, time_vector })
}

pub fn decode_deregister_reply(bytes: &[u8]) -> Result<(), ChatError> {
    let reply = parse_reply(bytes)?;
    expect_success(&reply, DEREGISTER_OK)
}

/// Decodes a `get_clients` reply into an address to name map
pub fn decode_clients_reply(bytes: &[u8]) -> Result<BTreeMap<String, String>, ChatError> {
    let reply = parse_reply(bytes)?;
    let clients = reply
        .get("clients")
        .and_then(Value::as_object)
        .ok_or_else(|| ChatError::Protocol("reply has no clients object".to_string()))?;

    clients
        .iter()
        .map(|(addr, name)| match name.as_str() {
            Some(name) => Ok((addr.clone(), name.to_string())),
            None => Err(ChatError::Protocol(format!(
                "client name for {} is not a string",
                addr
            ))),
        })
        .collect()
}

/// The info reply has no fixed shape; it is handed back as-is
pub fn decode_info_reply(bytes: &[u8]) -> Result<Value, ChatError> {
    parse_reply(bytes)
}

fn parse_reply(bytes: &[u8]) -> Result<Value, ChatError> {
    serde_json::from_slice(trim_padding(bytes))
        .map_err(|e| ChatError::MalformedMessage(format!("undecodable reply: {}", e)))
}

fn expect_success(reply: &Value, marker: &str) -> Result<(), ChatError> {
    match reply.get("success").and_then(Value::as_str) {
        Some(success) if success == marker => Ok(()),
        Some(other) => Err(ChatError::Protocol(format!(
            "expected success '{}', got '{}'",
            marker, other
        ))),
        None => Err(ChatError::Protocol(format!(
            "reply has no success marker (expected '{}')",
            marker
        ))),
    }
}

// Some servers send fixed-size, zero-filled datagrams
fn trim_padding(bytes: &[u8]) -> &[u8] {
    let end = bytes
        .iter()
        .rposition(|b| *b != 0)
        .map_or(0, |i| i + 1);
    &bytes[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn to_json(command: &Command) -> Value {
        serde_json::from_slice(&command.encode().unwrap()).unwrap()
    }

    #[test]
    fn test_register_command_shape() {
        let command = Command::Register {
            user: "Llama".to_string(),
        };
        assert_eq!(to_json(&command), json!({"cmd": "register", "user": "Llama"}));
    }

    #[test]
    fn test_fieldless_commands() {
        assert_eq!(to_json(&Command::Deregister), json!({"cmd": "deregister"}));
        assert_eq!(to_json(&Command::Info), json!({"cmd": "info"}));
        assert_eq!(to_json(&Command::GetClients), json!({"cmd": "get_clients"}));
    }

    #[test]
    fn test_message_command_carries_clock() {
        let mut time_vector = TimeVector::new();
        time_vector.insert(0, 11);
        time_vector.insert(1, 5);

        let command = Command::Message {
            text: "hi".to_string(),
            tag: "[g54]".to_string(),
            time_vector,
        };

        assert_eq!(
            to_json(&command),
            json!({
                "cmd": "message",
                "text": "hi",
                "tag": "[g54]",
                "time_vector": {"0": 11, "1": 5}
            })
        );
    }

    #[test]
    fn test_ping_command_shape() {
        let mut time_vector = TimeVector::new();
        time_vector.insert(0, 3);
        let command = Command::Ping { time_vector };
        assert_eq!(to_json(&command), json!({"cmd": "ping", "time_vector": {"0": 3}}));
        assert_eq!(command.name(), "ping");
    }

    #[test]
    fn test_decode_network_message() {
        let bytes = br#"{"sender":"QuestionBot","tag":"[g54]","text":"why?","time_vector":{"0":12,"1":4}}"#;
        let message = decode_inbound(bytes).unwrap();

        assert_eq!(message.sender.as_deref(), Some("QuestionBot"));
        assert_eq!(message.tag.as_deref(), Some("[g54]"));
        assert_eq!(message.text, "why?");
        assert_eq!(message.sequence, 12);
        assert!(!message.is_local());
    }

    #[test]
    fn test_decode_local_echo_without_clock() {
        let message = decode_inbound(br#"{"text":"hello"}"#).unwrap();
        assert!(message.is_local());
        assert_eq!(message.sequence, 0);
    }

    #[test]
    fn test_decode_ignores_zero_padding() {
        let mut bytes = br#"{"sender":"Server","text":"x","time_vector":{"0":1}}"#.to_vec();
        bytes.resize(2048, 0);
        assert_eq!(decode_inbound(&bytes).unwrap().sequence, 1);
    }

    #[test]
    fn test_decode_rejects_malformed_payloads() {
        let cases: [&[u8]; 6] = [
            b"not json",
            &[0xff, 0xfe, 0x00],
            br#"{"sender":"Server","time_vector":{"0":1}}"#,
            br#"{"sender":"Server","text":"x"}"#,
            br#"{"sender":"Server","text":"x","time_vector":{"0":"one"}}"#,
            br#"{"sender":42,"text":"x","time_vector":{"0":1}}"#,
        ];

        for bytes in cases {
            assert!(
                matches!(decode_inbound(bytes), Err(ChatError::MalformedMessage(_))),
                "expected malformed for {:?}",
                String::from_utf8_lossy(bytes)
            );
        }
    }

    #[test]
    fn test_decode_register_reply() {
        let bytes = br#"{"index":3,"time_vector":{"3":0,"2":70,"1":71,"0":74},"success":"reg_ok"}"#;
        let registration = decode_register_reply(bytes).unwrap();
        assert_eq!(registration.index, 3);
        assert_eq!(registration.time_vector["0"], json!(74));
    }

    #[test]
    fn test_register_reply_failures() {
        assert!(matches!(
            decode_register_reply(br#"{"success":"reg_fail"}"#),
            Err(ChatError::Protocol(_))
        ));
        assert!(matches!(
            decode_register_reply(br#"{"success":"reg_ok","time_vector":{"0":1}}"#),
            Err(ChatError::Protocol(_))
        ));
        assert!(matches!(
            decode_register_reply(br#"{"success":"reg_ok","index":1}"#),
            Err(ChatError::Protocol(_))
        ));
        assert!(matches!(
            decode_register_reply(b"garbage"),
            Err(ChatError::MalformedMessage(_))
        ));
    }

    #[test]
    fn test_deregister_reply() {
        assert!(decode_deregister_reply(br#"{"success":"dreg_ok"}"#).is_ok());
        assert!(matches!(
            decode_deregister_reply(br#"{"error":"not registered"}"#),
            Err(ChatError::Protocol(_))
        ));
    }

    #[test]
    fn test_clients_reply() {
        let bytes = br#"{"clients":{"/129.132.75.130":"QuestionBot","/77.58.228.17":"willi"}}"#;
        let clients = decode_clients_reply(bytes).unwrap();
        assert_eq!(clients.len(), 2);
        assert_eq!(clients.get("/77.58.228.17").map(String::as_str), Some("willi"));

        assert!(matches!(
            decode_clients_reply(br#"{"clients":{"/1.2.3.4":7}}"#),
            Err(ChatError::Protocol(_))
        ));
    }

    #[test]
    fn test_info_reply_is_passed_through() {
        let info = decode_info_reply(br#"{"clients":3,"uptime":"2h"}"#).unwrap();
        assert_eq!(info["clients"], json!(3));
    }
}
