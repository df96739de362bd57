//! services/api/src/web/chats.rs
//!
//! Chat management: listing, creation, retrieval, renaming, sharing and the
//! cascading delete (bookmarks, then messages, then the chat itself).

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::http::HeaderMap;
use axum::response::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};
use tutor_core::ports::{ChatStore, PortError, PortResult};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::web::state::AppState;
use crate::web::{Failure, UserQuery, WebResult};

//=========================================================================================
// Cascade Delete
//=========================================================================================

#[derive(Debug)]
pub(crate) struct CascadeOutcome {
    pub bookmarks_deleted: u64,
    pub messages_deleted: u64,
}

/// Deletes a chat and everything under it, in an order that avoids orphaned
/// bookmarks pointing at already-deleted messages: bookmarks first, then
/// messages, then the chat document. Sub-deletions are best-effort; a failed
/// step is logged and the cascade continues. The chat's absence is verified
/// before success is reported.
pub(crate) async fn delete_chat_cascade(
    store: &dyn ChatStore,
    user_id: &str,
    chat_id: Uuid,
) -> PortResult<CascadeOutcome> {
    if !store.chat_exists(user_id, chat_id).await? {
        return Err(PortError::NotFound(format!("Chat {} not found", chat_id)));
    }

    let bookmarks_deleted = match store.delete_chat_bookmarks(user_id, chat_id).await {
        Ok(count) => count,
        Err(e) => {
            warn!("Failed to delete bookmarks for chat {}: {}", chat_id, e);
            0
        }
    };

    let messages_deleted = match store.delete_chat_messages(user_id, chat_id).await {
        Ok(count) => count,
        Err(e) => {
            warn!("Failed to delete messages for chat {}: {}", chat_id, e);
            0
        }
    };

    store.delete_chat_record(user_id, chat_id).await?;

    if store.chat_exists(user_id, chat_id).await? {
        return Err(PortError::Unexpected(format!(
            "Chat {} still exists after deletion attempt",
            chat_id
        )));
    }

    info!(
        "Deleted chat {}, {} messages, and {} bookmarks for user {}",
        chat_id, messages_deleted, bookmarks_deleted, user_id
    );
    Ok(CascadeOutcome {
        bookmarks_deleted,
        messages_deleted,
    })
}

//=========================================================================================
// Handlers
//=========================================================================================

#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateChatBody {
    pub chat_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameChatBody {
    #[serde(default)]
    pub new_name: String,
}

/// List all chats for the user, most recently updated first.
#[utoipa::path(
    get,
    path = "/api/chats",
    params(("user_uid" = Option<String>, Query, description = "User identifier")),
    responses((status = 200, description = "The user's chats"))
)]
pub async fn list_chats_handler(
    State(state): State<Arc<AppState>>,
    Query(user): Query<UserQuery>,
) -> WebResult<Json<Value>> {
    let chats = state.store.list_chats(&user.user_id()).await?;
    Ok(Json(json!({
        "chats": chats,
        "total": chats.len(),
    })))
}

/// Create a new chat.
#[utoipa::path(
    post,
    path = "/api/chats",
    request_body = CreateChatBody,
    params(("user_uid" = Option<String>, Query, description = "User identifier")),
    responses((status = 200, description = "Chat created"))
)]
pub async fn create_chat_handler(
    State(state): State<Arc<AppState>>,
    Query(user): Query<UserQuery>,
    body: Option<Json<CreateChatBody>>,
) -> WebResult<Json<Value>> {
    let chat_name = body
        .and_then(|Json(b)| b.chat_name)
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| "New Chat".to_string());

    let chat = state.store.create_chat(&user.user_id(), &chat_name).await?;
    info!("Created new chat for user {}: {}", user.user_id(), chat.id);

    Ok(Json(json!({
        "success": true,
        "chat_id": chat.id,
        "message": "Chat created successfully",
    })))
}

/// Fetch one chat together with its full message history.
#[utoipa::path(
    get,
    path = "/api/chats/{chat_id}",
    params(
        ("chat_id" = Uuid, Path, description = "Chat identifier"),
        ("user_uid" = Option<String>, Query, description = "User identifier")
    ),
    responses(
        (status = 200, description = "The chat and its messages"),
        (status = 404, description = "Chat not found")
    )
)]
pub async fn get_chat_handler(
    State(state): State<Arc<AppState>>,
    Query(user): Query<UserQuery>,
    Path(chat_id): Path<Uuid>,
) -> WebResult<Json<Value>> {
    let user_id = user.user_id();
    let chat = state.store.get_chat(&user_id, chat_id).await?;
    let messages = state.store.list_messages(&user_id, chat_id).await?;

    Ok(Json(json!({
        "success": true,
        "chat": chat,
        "messages": messages,
    })))
}

/// Rename a chat. Blank names are rejected.
pub async fn rename_chat_handler(
    State(state): State<Arc<AppState>>,
    Query(user): Query<UserQuery>,
    Path(chat_id): Path<Uuid>,
    Json(body): Json<RenameChatBody>,
) -> WebResult<Json<Value>> {
    let new_name = body.new_name.trim().to_string();
    if new_name.is_empty() {
        return Err(Failure::bad_request("New name is required"));
    }

    state
        .store
        .rename_chat(&user.user_id(), chat_id, &new_name)
        .await?;
    info!("Renamed chat {} to '{}'", chat_id, new_name);

    Ok(Json(json!({
        "success": true,
        "message": "Chat renamed successfully",
    })))
}

/// Delete a chat, cascading to its messages and bookmarks.
#[utoipa::path(
    delete,
    path = "/api/chats/{chat_id}",
    params(
        ("chat_id" = Uuid, Path, description = "Chat identifier"),
        ("user_uid" = Option<String>, Query, description = "User identifier")
    ),
    responses(
        (status = 200, description = "Chat deleted"),
        (status = 404, description = "Chat not found")
    )
)]
pub async fn delete_chat_handler(
    State(state): State<Arc<AppState>>,
    Query(user): Query<UserQuery>,
    Path(chat_id): Path<Uuid>,
) -> WebResult<Json<Value>> {
    delete_chat_cascade(state.store.as_ref(), &user.user_id(), chat_id).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Chat deleted successfully",
    })))
}

/// Produce a shareable URL for a chat. No access control is attached to the
/// link; serving it is the frontend's concern.
pub async fn share_chat_handler(
    State(state): State<Arc<AppState>>,
    Query(user): Query<UserQuery>,
    Path(chat_id): Path<Uuid>,
    headers: HeaderMap,
) -> WebResult<Json<Value>> {
    // 404 for chats that do not exist.
    state.store.get_chat(&user.user_id(), chat_id).await?;

    let base_url = match &state.config.public_base_url {
        Some(base) => base.trim_end_matches('/').to_string(),
        None => {
            let host = headers
                .get(header::HOST)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("localhost");
            format!("http://{}", host)
        }
    };
    let share_link = format!("{}/chat/share/{}", base_url, chat_id);
    info!("Generated share link for chat {}: {}", chat_id, share_link);

    Ok(Json(json!({
        "success": true,
        "shareLink": share_link,
        "message": "Share link generated successfully",
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::web::turn_task::tests::test_state;
    use tutor_core::domain::{BookmarkDraft, MessageDraft, Sender};

    #[tokio::test]
    async fn cascade_delete_leaves_nothing_behind() {
        let state = test_state();
        let store = state.store.as_ref();
        let chat = store.create_chat("u1", "Doomed").await.unwrap();
        let msg = store
            .append_message("u1", chat.id, MessageDraft::text("q", Sender::User, ""))
            .await
            .unwrap();
        store
            .add_bookmark(
                "u1",
                chat.id,
                BookmarkDraft {
                    linked_message_id: msg.id,
                    snippet: "q".to_string(),
                    kind: Sender::User,
                },
            )
            .await
            .unwrap();

        let outcome = delete_chat_cascade(store, "u1", chat.id).await.unwrap();
        assert_eq!(outcome.messages_deleted, 1);
        assert_eq!(outcome.bookmarks_deleted, 1);

        assert!(!store.chat_exists("u1", chat.id).await.unwrap());
        assert!(matches!(
            store.list_messages("u1", chat.id).await,
            Err(PortError::NotFound(_))
        ));
        assert_eq!(store.find_message_chat("u1", msg.id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn cascade_delete_of_missing_chat_is_not_found() {
        let state = test_state();
        let err = delete_chat_cascade(state.store.as_ref(), "u1", Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::NotFound(_)));
    }

    #[tokio::test]
    async fn rename_rejects_blank_names() {
        let state = Arc::new(test_state());
        let chat = state.store.create_chat("u1", "Keep").await.unwrap();

        let err = rename_chat_handler(
            State(state.clone()),
            Query(UserQuery {
                user_uid: Some("u1".to_string()),
            }),
            Path(chat.id),
            Json(RenameChatBody {
                new_name: "  ".to_string(),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);

        let unchanged = state.store.get_chat("u1", chat.id).await.unwrap();
        assert_eq!(unchanged.chat_name, "Keep");
    }
}
