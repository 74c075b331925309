//! Process-wide presence: which users have a live connection, and how to
//! reach it.
//!
//! One handle per user; a reconnect replaces the previous handle. Entries
//! are independently locked (one `DashMap` shard each), so connects and
//! disconnects of different users never contend on a global lock.

use std::collections::BTreeSet;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use hirewire_shared::protocol::ServerEvent;
use hirewire_shared::{UserId, UserKind};

/// Sending side of one live connection's outbound queue.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub connection_id: Uuid,
    pub user_kind: UserKind,
    tx: mpsc::Sender<ServerEvent>,
}

/// Why an event could not be pushed onto a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitError {
    /// The connection is not draining its queue.
    Full,
    /// The connection is gone.
    Closed,
}

impl ConnectionHandle {
    /// Create a handle and the receiver its writer task drains.
    pub fn channel(user_kind: UserKind, buffer: usize) -> (Self, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let handle = Self {
            connection_id: Uuid::new_v4(),
            user_kind,
            tx,
        };
        (handle, rx)
    }

    /// Queue an event without waiting.
    pub fn emit(&self, event: ServerEvent) -> Result<(), EmitError> {
        self.tx.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => EmitError::Full,
            mpsc::error::TrySendError::Closed(_) => EmitError::Closed,
        })
    }
}

/// Outcome of a live push. A miss is never an error: the store remains the
/// source of truth and the recipient catches up on its next fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    Missed(MissReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissReason {
    Offline,
    StaleHandle(EmitError),
}

impl Delivery {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Delivery::Delivered)
    }
}

#[derive(Debug, Default)]
pub struct PresenceRegistry {
    entries: DashMap<UserId, ConnectionHandle>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `handle` as the user's live connection, returning the handle it
    /// replaced, if any.
    pub fn register(&self, user: UserId, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let connection = handle.connection_id;
        debug!(user = %user, kind = %handle.user_kind, connection = %connection, "Registering presence");
        let previous = self.entries.insert(user.clone(), handle);
        if let Some(prev) = &previous {
            debug!(
                user = %user,
                old = %prev.connection_id,
                new = %connection,
                "Reconnect replaced previous session"
            );
        }
        previous
    }

    /// Remove the user's entry only if it still belongs to `connection_id`.
    /// A session evicted by a reconnect must not unregister its successor.
    /// Absent users are a no-op.
    pub fn unregister(&self, user: &UserId, connection_id: Uuid) -> bool {
        self.entries
            .remove_if(user, |_, handle| handle.connection_id == connection_id)
            .is_some()
    }

    pub fn lookup(&self, user: &UserId) -> Option<ConnectionHandle> {
        self.entries.get(user).map(|entry| entry.value().clone())
    }

    #[cfg(test)]
    pub fn is_online(&self, user: &UserId) -> bool {
        self.entries.contains_key(user)
    }

    /// Snapshot of online users. Eventually consistent around
    /// connect/disconnect boundaries.
    pub fn list_online(&self) -> BTreeSet<UserId> {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn online_count(&self) -> usize {
        self.entries.len()
    }

    /// Push `event` to `user` if they are online.
    pub fn deliver(&self, user: &UserId, event: ServerEvent) -> Delivery {
        let Some(handle) = self.lookup(user) else {
            debug!(user = %user, event = event.name(), "Recipient offline, skipping live push");
            return Delivery::Missed(MissReason::Offline);
        };

        let name = event.name();
        match handle.emit(event) {
            Ok(()) => Delivery::Delivered,
            Err(e) => {
                warn!(
                    user = %user,
                    connection = %handle.connection_id,
                    event = name,
                    reason = ?e,
                    "Live push failed on stale handle"
                );
                Delivery::Missed(MissReason::StaleHandle(e))
            }
        }
    }

    /// Push `event` to every online user except `except`. Returns how many
    /// connections accepted it.
    pub fn broadcast_except(&self, except: &UserId, event: &ServerEvent) -> usize {
        let targets: Vec<(UserId, ConnectionHandle)> = self
            .entries
            .iter()
            .filter(|entry| entry.key() != except)
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        let mut delivered = 0;
        for (user, handle) in targets {
            match handle.emit(event.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => debug!(
                    user = %user,
                    event = event.name(),
                    reason = ?e,
                    "Dropping broadcast for stale connection"
                ),
            }
        }
        delivered
    }
}
