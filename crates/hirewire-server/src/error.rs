use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use hirewire_shared::ValidationError;

use crate::auth::AuthError;
use crate::store::StoreFailure;

/// Failures of a messaging operation, as reported to the originating
/// connection or request. An offline receiver is not among them.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Authentication error: {0}")]
    Authentication(#[from] AuthError),

    #[error("{0}")]
    Validation(#[from] ValidationError),

    #[error("Message store unavailable: {0}")]
    Persistence(#[from] StoreFailure),
}

impl ChatError {
    /// Text safe to show the client. Store details stay in the logs.
    pub fn client_message(&self) -> String {
        match self {
            ChatError::Persistence(_) => "Message store unavailable".to_string(),
            other => other.to_string(),
        }
    }
}

/// Errors returned by HTTP handlers.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Chat(#[from] ChatError),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Too many requests")]
    RateLimited,
}

impl From<AuthError> for ServerError {
    fn from(e: AuthError) -> Self {
        ServerError::Chat(ChatError::Authentication(e))
    }
}

impl From<ValidationError> for ServerError {
    fn from(e: ValidationError) -> Self {
        ServerError::Chat(ChatError::Validation(e))
    }
}

impl From<StoreFailure> for ServerError {
    fn from(e: StoreFailure) -> Self {
        ServerError::Chat(ChatError::Persistence(e))
    }
}

impl ServerError {
    fn status_and_message(&self) -> (StatusCode, String) {
        match self {
            ServerError::Chat(ChatError::Authentication(e)) => {
                let status = match e {
                    AuthError::MissingToken | AuthError::MalformedHeader => {
                        StatusCode::UNAUTHORIZED
                    }
                    AuthError::Expired | AuthError::Invalid => StatusCode::FORBIDDEN,
                };
                (status, format!("Authentication error: {e}"))
            }
            ServerError::Chat(ChatError::Validation(e)) => (StatusCode::BAD_REQUEST, e.to_string()),
            ServerError::Chat(e @ ChatError::Persistence(_)) => {
                (StatusCode::SERVICE_UNAVAILABLE, e.client_message())
            }
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::RateLimited => (StatusCode::TOO_MANY_REQUESTS, self.to_string()),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = self.status_and_message();

        if status.is_server_error() {
            tracing::error!(error = %self, status = %status, "Request failed");
        }

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_taxonomy_to_status() {
        let cases = [
            (ServerError::from(AuthError::MissingToken), StatusCode::UNAUTHORIZED),
            (ServerError::from(AuthError::Expired), StatusCode::FORBIDDEN),
            (
                ServerError::from(ValidationError::EmptyMessage),
                StatusCode::BAD_REQUEST,
            ),
            (
                ServerError::from(StoreFailure::Unavailable("disk".into())),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (ServerError::RateLimited, StatusCode::TOO_MANY_REQUESTS),
        ];
        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }

    #[test]
    fn store_details_are_not_leaked() {
        let (_, message) =
            ServerError::from(StoreFailure::Unavailable("lock poisoned".into())).status_and_message();
        assert!(!message.contains("poisoned"));
    }

    #[test]
    fn client_message_hides_store_failure() {
        let err = ChatError::from(StoreFailure::Unavailable("lock poisoned".into()));
        assert_eq!(err.client_message(), "Message store unavailable");

        let err = ChatError::from(ValidationError::MissingReceiver);
        assert_eq!(err.client_message(), "Receiver ID is required");
    }
}
