//! Conversation Aggregator: derives a user's conversation list from the
//! message collection on every call. Nothing here is persisted.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};

use hirewire_shared::constants::UNKNOWN_USER_NAME;
use hirewire_shared::{Message, UserId, UserKind};

use crate::store::{MessageStore, StoreFailure, UserDirectory};

/// Category of a conversation partner as shown in the list.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PartnerKind {
    Jobseeker,
    #[serde(rename = "Employeer")]
    Employer,
    /// Partner found in neither user collection.
    Unknown,
}

impl From<UserKind> for PartnerKind {
    fn from(kind: UserKind) -> Self {
        match kind {
            UserKind::Jobseeker => PartnerKind::Jobseeker,
            UserKind::Employer => PartnerKind::Employer,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub partner_id: UserId,
    pub partner_name: String,
    #[serde(rename = "partnerType")]
    pub partner_kind: PartnerKind,
    #[serde(rename = "lastMessage")]
    pub last_message_body: String,
    pub last_message_at: DateTime<Utc>,
    pub unread_count: u64,
}

pub struct ConversationAggregator {
    store: Arc<dyn MessageStore>,
    users: Arc<dyn UserDirectory>,
}

impl ConversationAggregator {
    pub fn new(store: Arc<dyn MessageStore>, users: Arc<dyn UserDirectory>) -> Self {
        Self { store, users }
    }

    /// One entry per distinct partner, newest conversation first.
    pub async fn list_conversations(&self, user: &UserId) -> Result<Vec<Conversation>, StoreFailure> {
        let messages = self.store.involving(user).await?;
        let latest = latest_per_partner(user, messages);

        let mut conversations = try_join_all(
            latest
                .into_iter()
                .map(|(partner, last)| self.summarize(user, partner, last)),
        )
        .await?;

        conversations.sort_by(|a, b| {
            b.last_message_at
                .cmp(&a.last_message_at)
                .then_with(|| a.partner_id.cmp(&b.partner_id))
        });
        Ok(conversations)
    }

    /// Full history between two users, oldest first.
    pub async fn get_history(&self, a: &UserId, b: &UserId) -> Result<Vec<Message>, StoreFailure> {
        self.store.history(a, b).await
    }

    async fn summarize(
        &self,
        user: &UserId,
        partner: UserId,
        last: Message,
    ) -> Result<Conversation, StoreFailure> {
        let unread_count = self.store.count_unread(user, &partner).await?;
        let (partner_name, partner_kind) = match self.users.lookup(&partner).await? {
            Some(identity) => (identity.display_name, identity.kind.into()),
            None => {
                tracing::debug!(partner = %partner, "Conversation partner not found in either collection");
                (UNKNOWN_USER_NAME.to_string(), PartnerKind::Unknown)
            }
        };

        Ok(Conversation {
            partner_id: partner,
            partner_name,
            partner_kind,
            last_message_body: last.body,
            last_message_at: last.created_at,
            unread_count,
        })
    }
}

/// Reduce a newest-first message list to the first (latest) message per
/// partner. Messages a user sent to themselves have no partner.
fn latest_per_partner(user: &UserId, newest_first: Vec<Message>) -> HashMap<UserId, Message> {
    let mut latest = HashMap::new();
    for message in newest_first {
        let partner = message.partner_of(user).clone();
        if partner == *user {
            continue;
        }
        latest.entry(partner).or_insert(message);
    }
    latest
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use hirewire_store::{Employer, JobSeeker};

    use super::*;
    use crate::store::test_support::{memory_store, seed, FailingStore};

    fn uid(s: &str) -> UserId {
        UserId::new(s)
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    async fn put(store: &dyn MessageStore, from: &str, to: &str, body: &str, secs: i64) {
        store
            .insert(Message::new(uid(from), uid(to), body.into(), at(secs)))
            .await
            .unwrap();
    }

    fn seeded() -> Arc<crate::store::SqliteStore> {
        let store = memory_store();
        seed(&store, |db| {
            db.upsert_jobseeker(&JobSeeker {
                id: uid("a"),
                name: "Alice".into(),
                email: "alice@example.com".into(),
                job_preference: None,
                skills: vec!["rust".into()],
                experience: 3,
                test_completed: true,
            })
            .unwrap();
            db.upsert_employer(&Employer {
                id: uid("b"),
                name: "Bobco".into(),
                email: "hr@bobco.example".into(),
                industry: Some("Logistics".into()),
                description: None,
            })
            .unwrap();
            db.upsert_employer(&Employer {
                id: uid("c"),
                name: "Carta".into(),
                email: "jobs@carta.example".into(),
                industry: None,
                description: None,
            })
            .unwrap();
        });
        Arc::new(store)
    }

    #[tokio::test]
    async fn two_partners_two_conversations() {
        let store = seeded();
        put(store.as_ref(), "a", "b", "hi b", 1).await;
        put(store.as_ref(), "b", "a", "hello a", 2).await;
        put(store.as_ref(), "b", "a", "are you there?", 3).await;
        put(store.as_ref(), "c", "a", "interview?", 4).await;
        put(store.as_ref(), "a", "c", "sure", 5).await;

        let aggregator = ConversationAggregator::new(store.clone(), store.clone());
        let list = aggregator.list_conversations(&uid("a")).await.unwrap();

        assert_eq!(list.len(), 2);

        assert_eq!(list[0].partner_id, uid("c"));
        assert_eq!(list[0].partner_name, "Carta");
        assert_eq!(list[0].partner_kind, PartnerKind::Employer);
        assert_eq!(list[0].last_message_body, "sure");
        assert_eq!(list[0].last_message_at, at(5));
        assert_eq!(list[0].unread_count, 1);

        assert_eq!(list[1].partner_id, uid("b"));
        assert_eq!(list[1].partner_name, "Bobco");
        assert_eq!(list[1].last_message_body, "are you there?");
        assert_eq!(list[1].unread_count, 2);
    }

    #[tokio::test]
    async fn offline_receiver_sees_unread_hello() {
        let store = seeded();
        put(store.as_ref(), "a", "b", "Hello", 1).await;

        let aggregator = ConversationAggregator::new(store.clone(), store.clone());
        let list = aggregator.list_conversations(&uid("b")).await.unwrap();

        assert_eq!(list.len(), 1);
        assert_eq!(list[0].partner_id, uid("a"));
        assert_eq!(list[0].partner_name, "Alice");
        assert_eq!(list[0].partner_kind, PartnerKind::Jobseeker);
        assert_eq!(list[0].last_message_body, "Hello");
        assert_eq!(list[0].unread_count, 1);

        // the sender has nothing unread
        let mine = aggregator.list_conversations(&uid("a")).await.unwrap();
        assert_eq!(mine[0].unread_count, 0);
    }

    #[tokio::test]
    async fn unknown_partner_does_not_fail_the_list() {
        let store = seeded();
        put(store.as_ref(), "ghost", "a", "boo", 1).await;

        let aggregator = ConversationAggregator::new(store.clone(), store.clone());
        let list = aggregator.list_conversations(&uid("a")).await.unwrap();

        assert_eq!(list.len(), 1);
        assert_eq!(list[0].partner_name, UNKNOWN_USER_NAME);
        assert_eq!(list[0].partner_kind, PartnerKind::Unknown);
    }

    #[tokio::test]
    async fn no_messages_no_conversations() {
        let store = seeded();
        let aggregator = ConversationAggregator::new(store.clone(), store.clone());
        assert!(aggregator.list_conversations(&uid("a")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn history_is_oldest_first() {
        let store = seeded();
        put(store.as_ref(), "b", "a", "second", 2).await;
        put(store.as_ref(), "a", "b", "first", 1).await;
        put(store.as_ref(), "a", "c", "elsewhere", 3).await;

        let aggregator = ConversationAggregator::new(store.clone(), store.clone());
        let history = aggregator.get_history(&uid("a"), &uid("b")).await.unwrap();
        let bodies: Vec<_> = history.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, ["first", "second"]);
    }

    #[tokio::test]
    async fn store_failure_propagates() {
        let store = seeded();
        let aggregator = ConversationAggregator::new(Arc::new(FailingStore), store);
        assert!(aggregator.list_conversations(&uid("a")).await.is_err());
    }

    #[test]
    fn serializes_with_wire_field_names() {
        let conversation = Conversation {
            partner_id: uid("b"),
            partner_name: "Bobco".into(),
            partner_kind: PartnerKind::Employer,
            last_message_body: "hi".into(),
            last_message_at: at(0),
            unread_count: 2,
        };
        let json = serde_json::to_value(&conversation).unwrap();
        assert_eq!(json["partnerId"], "b");
        assert_eq!(json["partnerName"], "Bobco");
        assert_eq!(json["partnerType"], "Employeer");
        assert_eq!(json["lastMessage"], "hi");
        assert_eq!(json["unreadCount"], 2);
        assert!(json.get("lastMessageAt").is_some());
    }
}
