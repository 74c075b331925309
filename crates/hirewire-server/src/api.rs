use std::net::IpAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, HeaderValue, Method, StatusCode},
    middleware,
    routing::{get, post, put},
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use hirewire_shared::protocol::SendMessagePayload;
use hirewire_shared::{Message, UserId, ValidationError};
use hirewire_store::Contact;

use crate::aggregator::{Conversation, ConversationAggregator};
use crate::auth::{AuthUser, CredentialVerifier};
use crate::config::ServerConfig;
use crate::coordinator::{DeliveryCoordinator, Origin};
use crate::error::ServerError;
use crate::gateway::socket_handler;
use crate::rate_limit::{rate_limit_middleware, RateLimiter};
use crate::store::UserDirectory;

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<DeliveryCoordinator>,
    pub aggregator: Arc<ConversationAggregator>,
    pub users: Arc<dyn UserDirectory>,
    pub verifier: Arc<dyn CredentialVerifier>,
    pub rate_limiter: RateLimiter<IpAddr>,
    pub send_limiter: RateLimiter<UserId>,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let origins: Vec<HeaderValue> = state
        .config
        .allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring unparseable CORS origin");
                None
            }
        })
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true);

    let messages = Router::new()
        .route("/conversations", get(list_conversations))
        .route("/conversation/:partner_id", get(get_conversation))
        .route("/send", post(send_message))
        .route("/read/:partner_id", put(mark_as_read))
        .route("/users", get(connectable_users))
        .route("/online", get(online_users));

    Router::new()
        .route("/health", get(health_check))
        .route("/socket", get(socket_handler))
        .nest("/api/v1/messages", messages)
        .layer(middleware::from_fn_with_state(
            state.rate_limiter.clone(),
            rate_limit_middleware,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    online: usize,
}

#[derive(Serialize)]
struct ConversationsResponse {
    conversations: Vec<Conversation>,
}

#[derive(Serialize)]
struct MessagesResponse {
    messages: Vec<Message>,
}

#[derive(Serialize)]
struct SentResponse {
    message: Message,
}

#[derive(Serialize)]
struct AckResponse {
    message: &'static str,
}

#[derive(Serialize)]
struct UsersResponse {
    users: Vec<Contact>,
}

#[derive(Serialize)]
struct OnlineResponse {
    online: Vec<UserId>,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        online: state.coordinator.presence().online_count(),
    })
}

async fn list_conversations(
    State(state): State<AppState>,
    AuthUser(me): AuthUser,
) -> Result<Json<ConversationsResponse>, ServerError> {
    let conversations = state.aggregator.list_conversations(&me.user_id).await?;
    Ok(Json(ConversationsResponse { conversations }))
}

async fn get_conversation(
    State(state): State<AppState>,
    AuthUser(me): AuthUser,
    Path(partner_id): Path<String>,
) -> Result<Json<MessagesResponse>, ServerError> {
    let partner =
        UserId::parse_optional(Some(partner_id.as_str())).ok_or(ValidationError::MissingPartner)?;
    let messages = state.aggregator.get_history(&me.user_id, &partner).await?;
    Ok(Json(MessagesResponse { messages }))
}

async fn send_message(
    State(state): State<AppState>,
    AuthUser(me): AuthUser,
    Json(request): Json<SendMessagePayload>,
) -> Result<(StatusCode, Json<SentResponse>), ServerError> {
    let receipt = state
        .coordinator
        .send(&me.user_id, &request, Origin::Rest)
        .await?;
    info!(
        id = %receipt.message.id,
        delivered = receipt.delivery.is_delivered(),
        "Message sent via REST"
    );
    Ok((
        StatusCode::CREATED,
        Json(SentResponse {
            message: receipt.message,
        }),
    ))
}

async fn mark_as_read(
    State(state): State<AppState>,
    AuthUser(me): AuthUser,
    Path(partner_id): Path<String>,
) -> Result<Json<AckResponse>, ServerError> {
    let receipt = state
        .coordinator
        .mark_as_read(&me.user_id, Some(partner_id.as_str()))
        .await?;
    info!(
        reader = %me.user_id,
        updated = receipt.updated,
        notified = receipt.notified.is_delivered(),
        "Read receipt via REST"
    );
    Ok(Json(AckResponse {
        message: "Messages marked as read",
    }))
}

async fn connectable_users(
    State(state): State<AppState>,
    AuthUser(me): AuthUser,
) -> Result<Json<UsersResponse>, ServerError> {
    let users = state.users.connectable(&me.user_id, me.kind).await?;
    Ok(Json(UsersResponse { users }))
}

async fn online_users(
    State(state): State<AppState>,
    AuthUser(_me): AuthUser,
) -> Json<OnlineResponse> {
    let online = state.coordinator.presence().list_online().into_iter().collect();
    Json(OnlineResponse { online })
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}
