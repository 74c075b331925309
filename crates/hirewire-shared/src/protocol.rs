//! JSON event protocol for the live transport.
//!
//! Every frame, in both directions, is an envelope
//! `{"event": "<name>", "data": {...}}`. Field names are camelCase.

use serde::{Deserialize, Serialize};

use crate::constants::MAX_FRAME_SIZE;
use crate::error::ProtocolError;
use crate::message::Message;
use crate::types::UserId;

// ---------------------------------------------------------------------------
// Client -> server
// ---------------------------------------------------------------------------

/// Events a connected client may emit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    SendMessage(SendMessagePayload),
    Typing(TypingPayload),
    StopTyping(TypingPayload),
    MarkAsRead(MarkAsReadPayload),
    GoOnline,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    #[serde(default)]
    pub receiver_id: Option<String>,
    /// Older clients send the body under `message`.
    #[serde(default, alias = "message")]
    pub body: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    #[serde(default)]
    pub receiver_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkAsReadPayload {
    #[serde(default)]
    pub partner_id: Option<String>,
}

#[derive(Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

impl ClientEvent {
    /// Decode a text frame.
    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        if text.len() > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: text.len(),
                max: MAX_FRAME_SIZE,
            });
        }

        let Envelope { event, data } = serde_json::from_str(text)?;
        // `null` / missing data decodes as an empty payload
        let data = if data.is_null() {
            serde_json::Value::Object(Default::default())
        } else {
            data
        };

        match event.as_str() {
            "sendMessage" => Ok(Self::SendMessage(serde_json::from_value(data)?)),
            "typing" => Ok(Self::Typing(serde_json::from_value(data)?)),
            "stopTyping" => Ok(Self::StopTyping(serde_json::from_value(data)?)),
            "markAsRead" => Ok(Self::MarkAsRead(serde_json::from_value(data)?)),
            "goOnline" => Ok(Self::GoOnline),
            _ => Err(ProtocolError::UnknownEvent(event)),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::SendMessage(_) => "sendMessage",
            Self::Typing(_) => "typing",
            Self::StopTyping(_) => "stopTyping",
            Self::MarkAsRead(_) => "markAsRead",
            Self::GoOnline => "goOnline",
        }
    }
}

// ---------------------------------------------------------------------------
// Server -> client
// ---------------------------------------------------------------------------

/// Events pushed to a connected client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    /// Acknowledges a persisted send to the originating connection.
    MessageSent { success: bool, message: Message },
    /// Live delivery of a message to its receiver.
    NewMessage { message: Message, sender_id: UserId },
    /// A send (or other request) from this connection failed.
    MessageError { success: bool, error: String },
    UserTyping { sender_id: UserId },
    UserStoppedTyping { sender_id: UserId },
    /// The receiver of your messages has read them.
    MessagesRead { read_by: UserId },
    UserOnline { user_id: UserId },
    UserOffline { user_id: UserId },
}

impl ServerEvent {
    pub fn sent(message: Message) -> Self {
        Self::MessageSent {
            success: true,
            message,
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self::MessageError {
            success: false,
            error: error.into(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::MessageSent { .. } => "messageSent",
            Self::NewMessage { .. } => "newMessage",
            Self::MessageError { .. } => "messageError",
            Self::UserTyping { .. } => "userTyping",
            Self::UserStoppedTyping { .. } => "userStoppedTyping",
            Self::MessagesRead { .. } => "messagesRead",
            Self::UserOnline { .. } => "userOnline",
            Self::UserOffline { .. } => "userOffline",
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn decodes_send_message_with_legacy_field() {
        let ev = ClientEvent::from_json(
            r#"{"event":"sendMessage","data":{"receiverId":"b","message":"hey"}}"#,
        )
        .unwrap();
        assert_eq!(
            ev,
            ClientEvent::SendMessage(SendMessagePayload {
                receiver_id: Some("b".into()),
                body: Some("hey".into()),
            })
        );
    }

    #[test]
    fn decodes_go_online_without_data() {
        assert_eq!(
            ClientEvent::from_json(r#"{"event":"goOnline"}"#).unwrap(),
            ClientEvent::GoOnline
        );
        assert_eq!(
            ClientEvent::from_json(r#"{"event":"goOnline","data":{}}"#).unwrap(),
            ClientEvent::GoOnline
        );
    }

    #[test]
    fn missing_fields_decode_as_none() {
        let ev = ClientEvent::from_json(r#"{"event":"markAsRead","data":{}}"#).unwrap();
        assert_eq!(ev, ClientEvent::MarkAsRead(MarkAsReadPayload { partner_id: None }));
    }

    #[test]
    fn rejects_unknown_and_malformed() {
        assert!(matches!(
            ClientEvent::from_json(r#"{"event":"deleteMessage","data":{}}"#),
            Err(ProtocolError::UnknownEvent(name)) if name == "deleteMessage"
        ));
        assert!(matches!(
            ClientEvent::from_json("not json"),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn server_event_envelope() {
        let msg = Message::new(UserId::new("a"), UserId::new("b"), "Hi".into(), Utc::now());
        let ev = ServerEvent::NewMessage {
            message: msg.clone(),
            sender_id: UserId::new("a"),
        };
        let json: serde_json::Value = serde_json::from_str(&ev.to_json().unwrap()).unwrap();
        assert_eq!(json["event"], "newMessage");
        assert_eq!(json["data"]["senderId"], "a");
        assert_eq!(json["data"]["message"]["body"], "Hi");

        let read = serde_json::to_value(ServerEvent::MessagesRead {
            read_by: UserId::new("b"),
        })
        .unwrap();
        assert_eq!(read["event"], "messagesRead");
        assert_eq!(read["data"]["readBy"], "b");
    }
}
