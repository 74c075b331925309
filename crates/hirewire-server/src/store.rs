//! Async persistence seams over the synchronous SQLite [`Database`].
//!
//! The coordinator and aggregator only see the [`MessageStore`] and
//! [`UserDirectory`] traits. [`SqliteStore`] implements both by running each
//! call on the blocking pool under a bounded timeout.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::error;

use hirewire_shared::{Message, UserId, UserIdentity, UserKind};
use hirewire_store::{Contact, Database, StoreError};

#[derive(Debug, Error)]
pub enum StoreFailure {
    #[error("{0}")]
    Unavailable(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl From<StoreError> for StoreFailure {
    fn from(e: StoreError) -> Self {
        StoreFailure::Unavailable(e.to_string())
    }
}

/// Document-style access to the message collection.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn insert(&self, message: Message) -> Result<Message, StoreFailure>;

    /// All messages between `a` and `b`, oldest first.
    async fn history(&self, a: &UserId, b: &UserId) -> Result<Vec<Message>, StoreFailure>;

    /// All messages `user` sent or received, newest first.
    async fn involving(&self, user: &UserId) -> Result<Vec<Message>, StoreFailure>;

    /// Flip unread `partner -> reader` messages to read; returns the count.
    async fn mark_read(&self, reader: &UserId, partner: &UserId) -> Result<usize, StoreFailure>;

    async fn count_unread(&self, receiver: &UserId, sender: &UserId) -> Result<u64, StoreFailure>;
}

/// Resolves user ids against the job seeker and employer collections.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// `Ok(None)` is the valid "unknown user" outcome.
    async fn lookup(&self, id: &UserId) -> Result<Option<UserIdentity>, StoreFailure>;

    async fn connectable(
        &self,
        requester: &UserId,
        kind: UserKind,
    ) -> Result<Vec<Contact>, StoreFailure>;
}

/// SQLite-backed [`MessageStore`] and [`UserDirectory`].
#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Mutex<Database>>,
    timeout: Duration,
}

impl SqliteStore {
    pub fn new(db: Database, timeout: Duration) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
            timeout,
        }
    }

    /// Run `op` against the database on the blocking pool.
    async fn run<T, F>(&self, op: &'static str, f: F) -> Result<T, StoreFailure>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> hirewire_store::Result<T> + Send + 'static,
    {
        let db = self.db.clone();
        let task = tokio::task::spawn_blocking(move || {
            let guard = db
                .lock()
                .map_err(|_| StoreFailure::Unavailable("database lock poisoned".into()))?;
            f(&guard).map_err(StoreFailure::from)
        });

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => {
                if let Err(e) = &result {
                    error!(op, error = %e, "Store operation failed");
                }
                result
            }
            Ok(Err(join_err)) => {
                error!(op, error = %join_err, "Store task panicked");
                Err(StoreFailure::Unavailable(format!("store task failed: {join_err}")))
            }
            Err(_) => {
                error!(op, timeout = ?self.timeout, "Store operation timed out");
                Err(StoreFailure::Timeout(self.timeout))
            }
        }
    }
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn insert(&self, message: Message) -> Result<Message, StoreFailure> {
        self.run("insert_message", move |db| {
            db.insert_message(&message)?;
            Ok(message)
        })
        .await
    }

    async fn history(&self, a: &UserId, b: &UserId) -> Result<Vec<Message>, StoreFailure> {
        let (a, b) = (a.clone(), b.clone());
        self.run("get_history", move |db| db.get_history(&a, &b)).await
    }

    async fn involving(&self, user: &UserId) -> Result<Vec<Message>, StoreFailure> {
        let user = user.clone();
        self.run("get_messages_involving", move |db| {
            db.get_messages_involving(&user)
        })
        .await
    }

    async fn mark_read(&self, reader: &UserId, partner: &UserId) -> Result<usize, StoreFailure> {
        let (reader, partner) = (reader.clone(), partner.clone());
        self.run("mark_read", move |db| db.mark_read(&reader, &partner))
            .await
    }

    async fn count_unread(&self, receiver: &UserId, sender: &UserId) -> Result<u64, StoreFailure> {
        let (receiver, sender) = (receiver.clone(), sender.clone());
        self.run("count_unread", move |db| db.count_unread(&receiver, &sender))
            .await
    }
}

#[async_trait]
impl UserDirectory for SqliteStore {
    async fn lookup(&self, id: &UserId) -> Result<Option<UserIdentity>, StoreFailure> {
        let id = id.clone();
        self.run("lookup_user", move |db| db.lookup_user(&id)).await
    }

    async fn connectable(
        &self,
        requester: &UserId,
        kind: UserKind,
    ) -> Result<Vec<Contact>, StoreFailure> {
        let requester = requester.clone();
        self.run("list_connectable_users", move |db| {
            db.list_connectable_users(&requester, kind)
        })
        .await
    }
}
