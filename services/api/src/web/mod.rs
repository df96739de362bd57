//! services/api/src/web/mod.rs
//!
//! Axum handlers for the HTTP/JSON API, plus the shared response plumbing
//! and the master OpenAPI definition.

pub mod bookmarks;
pub mod chat;
pub mod chats;
pub mod history;
pub mod state;
pub mod turn_task;
pub mod uploads;
pub mod voice;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use serde_json::json;
use tracing::error;
use tutor_core::ports::PortError;
use utoipa::OpenApi;

/// Fallback identity used when the caller does not name a user.
pub const DEMO_USER_ID: &str = "demoUser";

/// User identity is passed as a query parameter; server-side authentication is
/// delegated to the external identity provider.
#[derive(Debug, Default, Deserialize)]
pub struct UserQuery {
    pub user_uid: Option<String>,
}

impl UserQuery {
    pub fn user_id(&self) -> String {
        self.user_uid
            .as_deref()
            .filter(|uid| !uid.is_empty())
            .unwrap_or(DEMO_USER_ID)
            .to_string()
    }
}

//=========================================================================================
// Uniform JSON error envelope
//=========================================================================================

/// A request failure carrying the status and the client-facing message.
/// Renders as `{"error": "..."}` on every path.
#[derive(Debug)]
pub struct Failure {
    status: StatusCode,
    message: String,
}

pub type WebResult<T> = Result<T, Failure>;

impl Failure {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn payload_too_large(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::PAYLOAD_TOO_LARGE,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl IntoResponse for Failure {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<PortError> for Failure {
    fn from(e: PortError) -> Self {
        match e {
            PortError::NotFound(message) => Self {
                status: StatusCode::NOT_FOUND,
                message,
            },
            PortError::Unavailable(detail) => {
                error!("Backing store unavailable: {}", detail);
                Self {
                    status: StatusCode::SERVICE_UNAVAILABLE,
                    message: "Service temporarily unavailable".to_string(),
                }
            }
            PortError::Unexpected(detail) => {
                // Logged here once; the caller only sees a generic message.
                error!("Unexpected port error: {}", detail);
                Self {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    message: "Internal server error".to_string(),
                }
            }
        }
    }
}

//=========================================================================================
// Service-level Handlers
//=========================================================================================

/// Health check endpoint for monitoring.
pub async fn health_handler(
    axum::extract::State(state): axum::extract::State<std::sync::Arc<state::AppState>>,
) -> Json<serde_json::Value> {
    let store_status = if state.config.database_url.is_some() {
        "connected"
    } else {
        "memory"
    };
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now(),
        "service": "AI Tutor API",
        "store": store_status,
    }))
}

/// Authentication is handled by the external identity provider; this endpoint
/// only exists for the frontend's startup probe.
pub async fn auth_check_handler() -> Json<serde_json::Value> {
    Json(json!({ "authenticated": true }))
}

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        chat::chat_handler,
        chats::list_chats_handler,
        chats::create_chat_handler,
        chats::get_chat_handler,
        chats::delete_chat_handler,
        uploads::upload_handler,
    ),
    components(schemas(
        chat::ChatTurnBody,
        chat::AttachedFileBody,
        chat::ChatTurnResponse,
        chats::CreateChatBody,
    )),
    tags(
        (name = "AI Tutor API", description = "API endpoints for the AI-assisted tutoring backend.")
    )
)]
pub struct ApiDoc;
