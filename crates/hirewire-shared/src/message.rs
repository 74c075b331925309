//! The persisted direct-message record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::MAX_MESSAGE_BODY;
use crate::error::ValidationError;
use crate::types::UserId;

/// A single direct message between two users.
///
/// Created only by a successful send; the `read` flag is the one field
/// that ever changes afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    /// Trimmed, never empty.
    pub body: String,
    /// Assigned by the server at persistence time.
    pub created_at: DateTime<Utc>,
    pub read: bool,
}

impl Message {
    /// Build a new, unread message. The body must already be validated.
    pub fn new(
        sender_id: UserId,
        receiver_id: UserId,
        body: String,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender_id,
            receiver_id,
            body,
            created_at,
            read: false,
        }
    }

    /// The participant that is not `me`.
    pub fn partner_of(&self, me: &UserId) -> &UserId {
        if &self.sender_id == me {
            &self.receiver_id
        } else {
            &self.sender_id
        }
    }
}

/// A validated send request, ready to be persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub receiver_id: UserId,
    pub body: String,
}

impl OutgoingMessage {
    /// Validate raw request fields: the receiver must be present and the
    /// body non-empty after trimming. The receiver is checked first.
    pub fn validate(receiver_id: Option<&str>, body: Option<&str>) -> Result<Self, ValidationError> {
        let receiver_id =
            UserId::parse_optional(receiver_id).ok_or(ValidationError::MissingReceiver)?;
        let body = body.map(str::trim).unwrap_or_default();
        if body.is_empty() {
            return Err(ValidationError::EmptyMessage);
        }
        if body.len() > MAX_MESSAGE_BODY {
            return Err(ValidationError::MessageTooLong {
                len: body.len(),
                max: MAX_MESSAGE_BODY,
            });
        }

        Ok(Self {
            receiver_id,
            body: body.to_string(),
        })
    }
}
