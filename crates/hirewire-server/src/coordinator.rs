//! Delivery Coordinator: turns a send into a durable record plus
//! best-effort live delivery, and routes typing and read signals.
//!
//! A send runs validate -> persist -> acknowledge sender -> push to receiver.
//! Nothing is pushed for a message that failed to persist, and a failed
//! push never fails the send. Live delivery is not queued or retried.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, SubsecRound, Utc};
use tracing::{debug, info, warn};

use hirewire_shared::message::OutgoingMessage;
use hirewire_shared::protocol::{SendMessagePayload, ServerEvent};
use hirewire_shared::{Message, UserId, ValidationError};

use crate::error::ChatError;
use crate::presence::{ConnectionHandle, Delivery, MissReason, PresenceRegistry};
use crate::store::MessageStore;

/// Where a request came from, and so where its acknowledgment goes.
#[derive(Debug, Clone, Copy)]
pub enum Origin<'a> {
    /// A live connection: it receives `messageSent`.
    Connection(&'a ConnectionHandle),
    /// A REST call: the HTTP response is the acknowledgment.
    Rest,
}

#[derive(Debug, Clone)]
pub struct SendReceipt {
    pub message: Message,
    pub delivery: Delivery,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadReceipt {
    /// Messages flipped to read by this call.
    pub updated: usize,
    /// Outcome of the `messagesRead` push to the partner.
    pub notified: Delivery,
}

/// Strictly increasing, microsecond-precision server timestamps.
#[derive(Debug)]
pub struct MonotonicClock {
    last: Mutex<DateTime<Utc>>,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            last: Mutex::new(DateTime::<Utc>::MIN_UTC),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        let now = Utc::now().trunc_subsecs(6);
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        let next = if now > *last {
            now
        } else {
            *last + Duration::microseconds(1)
        };
        *last = next;
        next
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

pub struct DeliveryCoordinator {
    store: Arc<dyn MessageStore>,
    presence: Arc<PresenceRegistry>,
    clock: MonotonicClock,
}

impl DeliveryCoordinator {
    pub fn new(store: Arc<dyn MessageStore>, presence: Arc<PresenceRegistry>) -> Self {
        Self {
            store,
            presence,
            clock: MonotonicClock::new(),
        }
    }

    pub fn presence(&self) -> &Arc<PresenceRegistry> {
        &self.presence
    }

    /// Validate, persist, acknowledge and deliver one message.
    ///
    /// `Ok` means the message is durably stored, whatever happened to the
    /// live push.
    pub async fn send(
        &self,
        sender: &UserId,
        request: &SendMessagePayload,
        origin: Origin<'_>,
    ) -> Result<SendReceipt, ChatError> {
        let outgoing = OutgoingMessage::validate(
            request.receiver_id.as_deref(),
            request.body.as_deref(),
        )?;

        let message = Message::new(
            sender.clone(),
            outgoing.receiver_id,
            outgoing.body,
            self.clock.now(),
        );

        let message = self.store.insert(message).await?;
        info!(
            id = %message.id,
            sender = %message.sender_id,
            receiver = %message.receiver_id,
            "Message persisted"
        );

        if let Origin::Connection(handle) = origin {
            if let Err(e) = handle.emit(ServerEvent::sent(message.clone())) {
                // Sender dropped mid-send: the message stays stored and
                // shows up in their history on reconnect.
                warn!(
                    id = %message.id,
                    connection = %handle.connection_id,
                    reason = ?e,
                    "Could not acknowledge sender"
                );
            }
        }

        let delivery = self.presence.deliver(
            &message.receiver_id,
            ServerEvent::NewMessage {
                message: message.clone(),
                sender_id: sender.clone(),
            },
        );
        debug!(id = %message.id, ?delivery, "Live delivery attempted");

        Ok(SendReceipt { message, delivery })
    }

    /// Route a typing indicator. Never persisted; dropped when the receiver
    /// is offline or missing.
    pub fn typing(&self, sender: &UserId, receiver: Option<&str>, typing: bool) -> Delivery {
        let Some(receiver) = UserId::parse_optional(receiver) else {
            debug!(sender = %sender, "Typing event without receiver, dropping");
            return Delivery::Missed(MissReason::Offline);
        };

        let event = if typing {
            ServerEvent::UserTyping {
                sender_id: sender.clone(),
            }
        } else {
            ServerEvent::UserStoppedTyping {
                sender_id: sender.clone(),
            }
        };
        self.presence.deliver(&receiver, event)
    }

    /// Mark everything `partner` sent to `reader` as read, then tell the
    /// partner if they are online. Repeating the call updates nothing but
    /// still notifies.
    pub async fn mark_as_read(
        &self,
        reader: &UserId,
        partner: Option<&str>,
    ) -> Result<ReadReceipt, ChatError> {
        let partner = UserId::parse_optional(partner).ok_or(ValidationError::MissingPartner)?;

        let updated = self.store.mark_read(reader, &partner).await?;
        info!(reader = %reader, partner = %partner, updated, "Messages marked as read");

        let notified = self.presence.deliver(
            &partner,
            ServerEvent::MessagesRead {
                read_by: reader.clone(),
            },
        );

        Ok(ReadReceipt { updated, notified })
    }
}
