//! Connection Gateway: authenticates the WebSocket handshake, binds the
//! connection to a user for its lifetime, and dispatches inbound events.
//!
//! Each connection is a [`ConnectionSession`]. Its reader loop feeds frames
//! to [`ConnectionSession::handle_frame`] one at a time and gives up on a
//! silent peer after the idle timeout. A writer task drains the outbound
//! queue onto the socket and pings the client in between.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::HeaderMap,
    response::Response,
};
use futures::{SinkExt, Stream, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use hirewire_shared::constants::MAX_FRAME_SIZE;
use hirewire_shared::protocol::{ClientEvent, ServerEvent};
use hirewire_shared::UserId;

use crate::api::AppState;
use crate::auth::{bearer_token, AuthError, CredentialVerifier, Identity};
use crate::coordinator::{DeliveryCoordinator, Origin};
use crate::error::ServerError;
use crate::presence::{ConnectionHandle, PresenceRegistry};
use crate::rate_limit::RateLimiter;

/// Resolve the handshake credential. The `token` query parameter wins over
/// the `Authorization` header since browsers cannot set headers on a
/// WebSocket upgrade.
pub fn authenticate_connection(
    verifier: &dyn CredentialVerifier,
    query_token: Option<&str>,
    headers: &HeaderMap,
) -> Result<Identity, AuthError> {
    let token = match query_token.map(str::trim).filter(|t| !t.is_empty()) {
        Some(token) => token,
        None => bearer_token(headers)?,
    };
    verifier.verify(token)
}

/// Per-connection session state. Exists only for authenticated connections.
pub struct ConnectionSession {
    identity: Identity,
    handle: ConnectionHandle,
    coordinator: Arc<DeliveryCoordinator>,
    send_limiter: RateLimiter<UserId>,
    closed: AtomicBool,
}

impl ConnectionSession {
    /// Register the connection in presence and announce the user online.
    /// Returns the session and the outbound queue its writer must drain.
    pub fn open(
        identity: Identity,
        coordinator: Arc<DeliveryCoordinator>,
        send_limiter: RateLimiter<UserId>,
        outbound_buffer: usize,
    ) -> (Self, mpsc::Receiver<ServerEvent>) {
        let (handle, outbound) = ConnectionHandle::channel(identity.kind, outbound_buffer);
        let session = Self {
            identity,
            handle,
            coordinator,
            send_limiter,
            closed: AtomicBool::new(false),
        };

        session
            .presence()
            .register(session.user().clone(), session.handle.clone());
        info!(
            user = %session.user(),
            kind = %session.identity.kind,
            connection = %session.connection_id(),
            "User connected"
        );
        session.announce_online();

        (session, outbound)
    }

    pub fn user(&self) -> &UserId {
        &self.identity.user_id
    }

    pub fn connection_id(&self) -> Uuid {
        self.handle.connection_id
    }

    fn presence(&self) -> &PresenceRegistry {
        self.coordinator.presence()
    }

    fn announce_online(&self) {
        let event = ServerEvent::UserOnline {
            user_id: self.user().clone(),
        };
        let notified = self.presence().broadcast_except(self.user(), &event);
        debug!(user = %self.user(), notified, "Broadcast userOnline");
    }

    /// Report a failure to this connection only.
    fn reject(&self, error: impl Into<String>) {
        if let Err(e) = self.handle.emit(ServerEvent::error(error)) {
            debug!(connection = %self.connection_id(), reason = ?e, "Could not report error");
        }
    }

    /// Decode and dispatch one text frame.
    pub async fn handle_frame(&self, text: &str) {
        match ClientEvent::from_json(text) {
            Ok(event) => self.handle(event).await,
            Err(e) => {
                debug!(connection = %self.connection_id(), error = %e, "Rejected inbound frame");
                self.reject(e.to_string());
            }
        }
    }

    /// Single entry point for every client event of this connection.
    pub async fn handle(&self, event: ClientEvent) {
        debug!(user = %self.user(), event = event.name(), "Inbound event");
        match event {
            ClientEvent::SendMessage(request) => {
                if !self.send_limiter.check(self.user()).await {
                    warn!(user = %self.user(), "Send rate limit exceeded");
                    self.reject("Too many messages, slow down");
                    return;
                }
                let origin = Origin::Connection(&self.handle);
                if let Err(e) = self.coordinator.send(self.user(), &request, origin).await {
                    debug!(user = %self.user(), error = %e, "Send failed");
                    self.reject(e.client_message());
                }
            }
            ClientEvent::Typing(payload) => {
                self.coordinator
                    .typing(self.user(), payload.receiver_id.as_deref(), true);
            }
            ClientEvent::StopTyping(payload) => {
                self.coordinator
                    .typing(self.user(), payload.receiver_id.as_deref(), false);
            }
            ClientEvent::MarkAsRead(payload) => {
                match self
                    .coordinator
                    .mark_as_read(self.user(), payload.partner_id.as_deref())
                    .await
                {
                    Ok(receipt) => debug!(
                        user = %self.user(),
                        updated = receipt.updated,
                        notified = ?receipt.notified,
                        "Read receipt handled"
                    ),
                    Err(e) => {
                        debug!(user = %self.user(), error = %e, "Mark as read failed");
                        self.reject(e.client_message());
                    }
                }
            }
            ClientEvent::GoOnline => self.announce_online(),
        }
    }

    /// Disconnect cleanup. Runs once no matter how often it is called.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        if self
            .presence()
            .unregister(self.user(), self.connection_id())
        {
            let event = ServerEvent::UserOffline {
                user_id: self.user().clone(),
            };
            self.presence().broadcast_except(self.user(), &event);
            info!(user = %self.user(), connection = %self.connection_id(), "User disconnected");
        } else {
            // a newer connection for this user replaced us
            debug!(
                user = %self.user(),
                connection = %self.connection_id(),
                "Replaced session closed"
            );
        }
    }
}

impl Drop for ConnectionSession {
    fn drop(&mut self) {
        self.close();
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SocketParams {
    token: Option<String>,
}

/// `GET /socket`. The credential is checked before the upgrade, so a
/// rejected client gets an HTTP error and no session is ever created.
pub async fn socket_handler(
    State(state): State<AppState>,
    Query(params): Query<SocketParams>,
    headers: HeaderMap,
    ws: Option<WebSocketUpgrade>,
) -> Result<Response, ServerError> {
    let identity =
        authenticate_connection(state.verifier.as_ref(), params.token.as_deref(), &headers)
            .map_err(|e| {
                info!(error = %e, "Rejected live connection");
                e
            })?;

    let Some(ws) = ws else {
        return Err(ServerError::BadRequest("expected a WebSocket upgrade".into()));
    };

    Ok(ws
        .max_message_size(MAX_FRAME_SIZE)
        .on_upgrade(move |socket| run_connection(socket, state, identity)))
}

async fn run_connection(socket: WebSocket, state: AppState, identity: Identity) {
    let (session, mut outbound) = ConnectionSession::open(
        identity,
        state.coordinator.clone(),
        state.send_limiter.clone(),
        state.config.outbound_buffer,
    );
    let connection = session.connection_id();
    let ping_every = state.config.ping_interval;

    let (mut sink, stream) = socket.split();

    let writer = tokio::spawn(async move {
        let mut ping = tokio::time::interval_at(Instant::now() + ping_every, ping_every);
        loop {
            let frame = tokio::select! {
                event = outbound.recv() => {
                    let Some(event) = event else { break };
                    match event.to_json() {
                        Ok(text) => WsMessage::Text(text),
                        Err(e) => {
                            error!(connection = %connection, event = event.name(), error = %e, "Failed to encode event");
                            continue;
                        }
                    }
                }
                _ = ping.tick() => WsMessage::Ping(Vec::new()),
            };
            if let Err(e) = sink.send(frame).await {
                debug!(connection = %connection, error = %e, "Socket write failed");
                break;
            }
        }
        let _ = sink.close().await;
    });

    let reason = read_frames(&session, stream, state.config.idle_timeout).await;
    debug!(connection = %connection, ?reason, "Reader loop ended");

    session.close();
    writer.abort();
}

/// Why a connection's reader loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disconnect {
    Closed,
    Failed,
    Idle,
}

/// Feed inbound frames to `session` until the peer leaves, the socket
/// fails, or nothing arrives for `idle_timeout`. Any frame, pongs included,
/// restarts the idle timer.
async fn read_frames<S>(session: &ConnectionSession, mut stream: S, idle_timeout: Duration) -> Disconnect
where
    S: Stream<Item = Result<WsMessage, axum::Error>> + Unpin,
{
    let connection = session.connection_id();
    loop {
        let frame = match tokio::time::timeout(idle_timeout, stream.next()).await {
            Ok(Some(frame)) => frame,
            Ok(None) => return Disconnect::Closed,
            Err(_) => {
                info!(user = %session.user(), connection = %connection, ?idle_timeout, "Closing idle connection");
                return Disconnect::Idle;
            }
        };

        match frame {
            Ok(WsMessage::Text(text)) => session.handle_frame(&text).await,
            Ok(WsMessage::Binary(_)) => session.reject("Binary frames are not supported"),
            Ok(WsMessage::Close(_)) => {
                debug!(connection = %connection, "Client sent close frame");
                return Disconnect::Closed;
            }
            // pings are answered by axum
            Ok(_) => {}
            Err(e) => {
                debug!(connection = %connection, error = %e, "Socket read failed");
                return Disconnect::Failed;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::http::{header, HeaderValue};
    use hirewire_shared::UserKind;

    use super::*;
    use crate::auth::test_support::{token, SECRET};
    use crate::auth::JwtVerifier;
    use crate::store::test_support::{memory_store, FailingStore};
    use crate::store::MessageStore;

    /// Accepts any token and treats it as the user id.
    struct StaticVerifier;

    impl CredentialVerifier for StaticVerifier {
        fn verify(&self, token: &str) -> Result<Identity, AuthError> {
            if token == "bad" {
                return Err(AuthError::Invalid);
            }
            Ok(Identity {
                user_id: UserId::new(token),
                kind: UserKind::Jobseeker,
            })
        }
    }

    fn identity(id: &str, kind: UserKind) -> Identity {
        Identity {
            user_id: UserId::new(id),
            kind,
        }
    }

    fn coordinator_with(store: Arc<dyn MessageStore>) -> Arc<DeliveryCoordinator> {
        Arc::new(DeliveryCoordinator::new(
            store,
            Arc::new(PresenceRegistry::new()),
        ))
    }

    fn connect(
        coordinator: &Arc<DeliveryCoordinator>,
        id: &str,
        kind: UserKind,
    ) -> (ConnectionSession, mpsc::Receiver<ServerEvent>) {
        ConnectionSession::open(
            identity(id, kind),
            coordinator.clone(),
            RateLimiter::new(10.0, 30.0),
            16,
        )
    }

    fn drain(rx: &mut mpsc::Receiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn handshake_prefers_query_token() {
        let verifier = StaticVerifier;
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer header-user"));

        let from_query = authenticate_connection(&verifier, Some("query-user"), &headers).unwrap();
        assert_eq!(from_query.user_id, UserId::new("query-user"));

        let from_header = authenticate_connection(&verifier, Some("  "), &headers).unwrap();
        assert_eq!(from_header.user_id, UserId::new("header-user"));
    }

    #[test]
    fn handshake_rejects_missing_and_bad_tokens() {
        let verifier = StaticVerifier;
        assert_eq!(
            authenticate_connection(&verifier, None, &HeaderMap::new()),
            Err(AuthError::MissingToken)
        );
        assert_eq!(
            authenticate_connection(&verifier, Some("bad"), &HeaderMap::new()),
            Err(AuthError::Invalid)
        );
    }

    #[test]
    fn handshake_with_real_jwt() {
        let verifier = JwtVerifier::new(SECRET);
        let jwt = token("emp-1", "Employeer");
        let identity = authenticate_connection(&verifier, Some(jwt.as_str()), &HeaderMap::new()).unwrap();
        assert_eq!(identity.user_id, UserId::new("emp-1"));
        assert_eq!(identity.kind, UserKind::Employer);
    }

    #[tokio::test]
    async fn connect_and_disconnect_broadcast_presence() {
        let coordinator = coordinator_with(Arc::new(memory_store()));
        let (_b, mut rx_b) = connect(&coordinator, "b", UserKind::Employer);
        let (a, mut rx_a) = connect(&coordinator, "a", UserKind::Jobseeker);

        assert!(coordinator.presence().is_online(&UserId::new("a")));
        assert_eq!(
            drain(&mut rx_b),
            vec![ServerEvent::UserOnline { user_id: UserId::new("a") }]
        );
        assert!(drain(&mut rx_a).is_empty());

        a.close();
        a.close();
        drop(a);

        assert!(!coordinator.presence().is_online(&UserId::new("a")));
        assert_eq!(
            drain(&mut rx_b),
            vec![ServerEvent::UserOffline { user_id: UserId::new("a") }]
        );
    }

    #[tokio::test]
    async fn replaced_session_close_keeps_successor_online() {
        let coordinator = coordinator_with(Arc::new(memory_store()));
        let (_observer, mut rx_obs) = connect(&coordinator, "obs", UserKind::Employer);
        let (first, _rx1) = connect(&coordinator, "a", UserKind::Jobseeker);
        let (second, _rx2) = connect(&coordinator, "a", UserKind::Jobseeker);
        drain(&mut rx_obs);

        first.close();
        let online = coordinator.presence().lookup(&UserId::new("a")).unwrap();
        assert_eq!(online.connection_id, second.connection_id());
        assert!(drain(&mut rx_obs).is_empty());
    }

    #[tokio::test]
    async fn send_over_live_connection() {
        let coordinator = coordinator_with(Arc::new(memory_store()));
        let (a, mut rx_a) = connect(&coordinator, "a", UserKind::Jobseeker);
        let (_b, mut rx_b) = connect(&coordinator, "b", UserKind::Employer);
        drain(&mut rx_a);

        a.handle_frame(r#"{"event":"sendMessage","data":{"receiverId":"b","body":"Hi"}}"#)
            .await;

        let acked = drain(&mut rx_a);
        let pushed = drain(&mut rx_b);
        let [ServerEvent::MessageSent { success: true, message: sent }] = acked.as_slice() else {
            panic!("unexpected sender events: {acked:?}");
        };
        let [ServerEvent::NewMessage { message: received, sender_id }] = pushed.as_slice() else {
            panic!("unexpected receiver events: {pushed:?}");
        };
        assert_eq!(sent.id, received.id);
        assert_eq!(received.body, "Hi");
        assert_eq!(sender_id, &UserId::new("a"));
    }

    #[tokio::test]
    async fn failures_go_to_originating_connection_only() {
        let coordinator = coordinator_with(Arc::new(memory_store()));
        let (a, mut rx_a) = connect(&coordinator, "a", UserKind::Jobseeker);
        let (_b, mut rx_b) = connect(&coordinator, "b", UserKind::Employer);
        drain(&mut rx_a);

        a.handle(ClientEvent::SendMessage(Default::default())).await;
        a.handle_frame("not json").await;
        a.handle_frame(r#"{"event":"selfDestruct","data":{}}"#).await;

        let events = drain(&mut rx_a);
        assert_eq!(events.len(), 3);
        assert!(events
            .iter()
            .all(|e| matches!(e, ServerEvent::MessageError { success: false, .. })));
        assert_eq!(events[0], ServerEvent::error("Receiver ID is required"));
        assert!(drain(&mut rx_b).is_empty());
    }

    #[tokio::test]
    async fn persistence_failure_reported_as_message_error() {
        let coordinator = coordinator_with(Arc::new(FailingStore));
        let (a, mut rx_a) = connect(&coordinator, "a", UserKind::Jobseeker);
        let (_b, mut rx_b) = connect(&coordinator, "b", UserKind::Employer);
        drain(&mut rx_a);

        a.handle_frame(r#"{"event":"sendMessage","data":{"receiverId":"b","body":"Hi"}}"#)
            .await;

        a.handle_frame(r#"{"event":"markAsRead","data":{"partnerId":"b"}}"#)
            .await;

        assert_eq!(
            drain(&mut rx_a),
            vec![
                ServerEvent::error("Message store unavailable"),
                ServerEvent::error("Message store unavailable"),
            ]
        );
        assert!(drain(&mut rx_b).is_empty());
    }

    #[tokio::test]
    async fn typing_read_and_go_online() {
        let coordinator = coordinator_with(Arc::new(memory_store()));
        let (a, mut rx_a) = connect(&coordinator, "a", UserKind::Jobseeker);
        let (b, mut rx_b) = connect(&coordinator, "b", UserKind::Employer);
        drain(&mut rx_a);
        drain(&mut rx_b);

        a.handle_frame(r#"{"event":"typing","data":{"receiverId":"b"}}"#).await;
        a.handle_frame(r#"{"event":"stopTyping","data":{"receiverId":"b"}}"#).await;
        assert_eq!(
            drain(&mut rx_b),
            vec![
                ServerEvent::UserTyping { sender_id: UserId::new("a") },
                ServerEvent::UserStoppedTyping { sender_id: UserId::new("a") },
            ]
        );

        a.handle_frame(r#"{"event":"sendMessage","data":{"receiverId":"b","body":"ping"}}"#)
            .await;
        drain(&mut rx_a);
        drain(&mut rx_b);

        b.handle_frame(r#"{"event":"markAsRead","data":{"partnerId":"a"}}"#).await;
        assert_eq!(
            drain(&mut rx_a),
            vec![ServerEvent::MessagesRead { read_by: UserId::new("b") }]
        );

        b.handle_frame(r#"{"event":"goOnline"}"#).await;
        assert_eq!(
            drain(&mut rx_a),
            vec![ServerEvent::UserOnline { user_id: UserId::new("b") }]
        );
        assert!(drain(&mut rx_b).is_empty());
    }

    #[tokio::test]
    async fn send_rate_limit_rejects_burst() {
        let coordinator = coordinator_with(Arc::new(memory_store()));
        let (a, mut rx_a) = ConnectionSession::open(
            identity("a", UserKind::Jobseeker),
            coordinator.clone(),
            RateLimiter::new(0.001, 2.0),
            16,
        );

        for _ in 0..3 {
            a.handle_frame(r#"{"event":"sendMessage","data":{"receiverId":"b","body":"x"}}"#)
                .await;
        }
        let events = drain(&mut rx_a);
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], ServerEvent::MessageSent { .. }));
        assert!(matches!(events[1], ServerEvent::MessageSent { .. }));
        assert_eq!(events[2], ServerEvent::error("Too many messages, slow down"));
    }

    fn text(frame: &str) -> Result<WsMessage, axum::Error> {
        Ok(WsMessage::Text(frame.to_string()))
    }

    #[tokio::test]
    async fn idle_connection_is_dropped_and_goes_offline() {
        let coordinator = coordinator_with(Arc::new(memory_store()));
        let (a, _rx_a) = connect(&coordinator, "a", UserKind::Jobseeker);
        let (_b, mut rx_b) = connect(&coordinator, "b", UserKind::Employer);
        drain(&mut rx_b);

        // one frame, then the peer goes silent without closing
        let frames = futures::stream::iter(vec![text(
            r#"{"event":"typing","data":{"receiverId":"b"}}"#,
        )])
        .chain(futures::stream::pending());

        let reason = read_frames(&a, frames, Duration::from_millis(50)).await;
        assert_eq!(reason, Disconnect::Idle);
        assert_eq!(
            drain(&mut rx_b),
            vec![ServerEvent::UserTyping { sender_id: UserId::new("a") }]
        );

        a.close();
        assert!(!coordinator.presence().is_online(&UserId::new("a")));
        assert_eq!(
            drain(&mut rx_b),
            vec![ServerEvent::UserOffline { user_id: UserId::new("a") }]
        );
    }

    #[tokio::test]
    async fn pongs_keep_connection_alive_until_close() {
        let coordinator = coordinator_with(Arc::new(memory_store()));
        let (a, mut rx_a) = connect(&coordinator, "a", UserKind::Jobseeker);
        drain(&mut rx_a);

        let frames = futures::stream::iter(vec![
            Ok(WsMessage::Pong(Vec::new())),
            Ok(WsMessage::Binary(vec![1, 2, 3])),
            Ok(WsMessage::Close(None)),
        ])
        .chain(futures::stream::pending());

        let reason = read_frames(&a, frames, Duration::from_secs(5)).await;
        assert_eq!(reason, Disconnect::Closed);
        assert_eq!(
            drain(&mut rx_a),
            vec![ServerEvent::error("Binary frames are not supported")]
        );
        assert!(coordinator.presence().is_online(&UserId::new("a")));
    }
}
