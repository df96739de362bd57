//! services/api/src/web/bookmarks.rs
//!
//! Bookmark management. A bookmark lives under its chat; the linked message's
//! `bookmarked` flag is kept in sync on every create and delete. The flag
//! update and the bookmark write are two separate store writes, not a
//! transaction.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};
use tutor_core::domain::{Bookmark, BookmarkDraft, Sender};
use tutor_core::ports::{ChatStore, PortResult};
use uuid::Uuid;

use crate::web::state::AppState;
use crate::web::{Failure, UserQuery, WebResult};

//=========================================================================================
// Wire Shapes
//=========================================================================================

/// Bookmark as the frontend expects it (`timestamp` rather than `createdAt`).
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookmarkView {
    pub id: Uuid,
    pub linked_message_id: Uuid,
    pub snippet: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: Sender,
    pub chat_id: Uuid,
}

impl From<Bookmark> for BookmarkView {
    fn from(b: Bookmark) -> Self {
        Self {
            id: b.id,
            linked_message_id: b.linked_message_id,
            snippet: b.snippet,
            timestamp: b.created_at,
            kind: b.kind,
            chat_id: b.chat_id,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookmarkFilter {
    #[serde(rename = "user_uid")]
    pub user_uid: Option<String>,
    pub limit: Option<usize>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub chat_id: Option<Uuid>,
    pub q: Option<String>,
}

impl BookmarkFilter {
    fn user_id(&self) -> String {
        UserQuery {
            user_uid: self.user_uid.clone(),
        }
        .user_id()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBookmarkBody {
    pub linked_message_id: Option<Uuid>,
    #[serde(default)]
    pub snippet: String,
    #[serde(rename = "type", default = "default_kind")]
    pub kind: String,
    pub chat_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct ToggleBookmarkBody {
    #[serde(default)]
    pub bookmarked: bool,
    #[serde(default)]
    pub snippet: String,
    #[serde(rename = "type", default = "default_kind")]
    pub kind: String,
}

fn default_kind() -> String {
    "user".to_string()
}

fn parse_kind(value: &str) -> WebResult<Sender> {
    Sender::parse(&value.to_lowercase())
        .ok_or_else(|| Failure::bad_request("type must be either \"user\" or \"tutor\""))
}

//=========================================================================================
// Shared Lookups
//=========================================================================================

/// All of the user's bookmarks across chats, newest first. O(chats) scans.
async fn all_bookmarks(store: &dyn ChatStore, user_id: &str) -> PortResult<Vec<Bookmark>> {
    let mut bookmarks = Vec::new();
    for chat in store.list_chats(user_id).await? {
        bookmarks.extend(store.list_chat_bookmarks(user_id, chat.id).await?);
    }
    bookmarks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(bookmarks)
}

/// Flips the linked message's `bookmarked` flag, wherever the message lives.
async fn sync_message_flag(store: &dyn ChatStore, user_id: &str, message_id: Uuid, value: bool) {
    match store.find_message_chat(user_id, message_id).await {
        Ok(Some(chat_id)) => {
            if let Err(e) = store
                .set_message_bookmarked(user_id, chat_id, message_id, value)
                .await
            {
                warn!("Failed to update bookmark flag on message {}: {}", message_id, e);
            }
        }
        Ok(None) => warn!("Message {} not found in any chat for user {}", message_id, user_id),
        Err(e) => warn!("Failed to locate message {}: {}", message_id, e),
    }
}

//=========================================================================================
// Handlers
//=========================================================================================

/// List bookmarks, optionally filtered by chat, type and limit.
pub async fn list_bookmarks_handler(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<BookmarkFilter>,
) -> WebResult<Json<Value>> {
    let user_id = filter.user_id();
    let mut bookmarks = match filter.chat_id {
        Some(chat_id) => state.store.list_chat_bookmarks(&user_id, chat_id).await?,
        None => all_bookmarks(state.store.as_ref(), &user_id).await?,
    };

    if let Some(kind) = filter.kind.as_deref().filter(|k| *k != "all") {
        let kind = parse_kind(kind)?;
        bookmarks.retain(|b| b.kind == kind);
    }
    if let Some(limit) = filter.limit.filter(|l| *l > 0) {
        bookmarks.truncate(limit);
    }

    let views: Vec<BookmarkView> = bookmarks.into_iter().map(BookmarkView::from).collect();
    Ok(Json(json!({
        "bookmarks": views,
        "total": views.len(),
    })))
}

/// Create a bookmark under an existing chat and mark its message.
pub async fn create_bookmark_handler(
    State(state): State<Arc<AppState>>,
    Query(user): Query<UserQuery>,
    Json(body): Json<CreateBookmarkBody>,
) -> WebResult<Json<Value>> {
    let Some(linked_message_id) = body.linked_message_id else {
        return Err(Failure::bad_request("linkedMessageId is required"));
    };
    let snippet = body.snippet.trim().to_string();
    if snippet.is_empty() {
        return Err(Failure::bad_request("snippet is required"));
    }
    let Some(chat_id) = body.chat_id else {
        return Err(Failure::bad_request("chatId is required"));
    };
    let kind = parse_kind(&body.kind)?;

    let user_id = user.user_id();
    if !state.store.chat_exists(&user_id, chat_id).await? {
        return Err(Failure::not_found(format!("Chat {} not found", chat_id)));
    }

    let bookmark = state
        .store
        .add_bookmark(
            &user_id,
            chat_id,
            BookmarkDraft {
                linked_message_id,
                snippet,
                kind,
            },
        )
        .await?;

    sync_message_flag(state.store.as_ref(), &user_id, linked_message_id, true).await;
    info!("Created bookmark {} for user {}", bookmark.id, user_id);

    Ok(Json(json!({
        "success": true,
        "bookmark_id": bookmark.id,
        "message": "Bookmark created successfully",
    })))
}

/// Delete a bookmark by id, then clear the linked message's flag. When no
/// `chatId` is supplied the owning chat is located with a linear scan.
pub async fn delete_bookmark_handler(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<BookmarkFilter>,
    Path(bookmark_id): Path<Uuid>,
) -> WebResult<Json<Value>> {
    let user_id = filter.user_id();
    let candidates = match filter.chat_id {
        Some(chat_id) => state.store.list_chat_bookmarks(&user_id, chat_id).await?,
        None => all_bookmarks(state.store.as_ref(), &user_id).await?,
    };
    let bookmark = candidates
        .into_iter()
        .find(|b| b.id == bookmark_id)
        .ok_or_else(|| Failure::not_found(format!("Bookmark {} not found", bookmark_id)))?;

    state
        .store
        .delete_bookmark(&user_id, bookmark.chat_id, bookmark_id)
        .await?;
    sync_message_flag(
        state.store.as_ref(),
        &user_id,
        bookmark.linked_message_id,
        false,
    )
    .await;
    info!("Deleted bookmark {} for user {}", bookmark_id, user_id);

    Ok(Json(json!({
        "success": true,
        "message": "Bookmark deleted successfully",
    })))
}

/// Toggle a message's bookmark: create one (snippet required) or delete the
/// one pointing at it.
pub async fn toggle_message_bookmark_handler(
    State(state): State<Arc<AppState>>,
    Query(user): Query<UserQuery>,
    Path(message_id): Path<Uuid>,
    Json(body): Json<ToggleBookmarkBody>,
) -> WebResult<Json<Value>> {
    let snippet = body.snippet.trim().to_string();
    if body.bookmarked && snippet.is_empty() {
        return Err(Failure::bad_request(
            "snippet is required when creating a bookmark",
        ));
    }
    let kind = parse_kind(&body.kind)?;

    let user_id = user.user_id();
    let chat_id = state
        .store
        .find_message_chat(&user_id, message_id)
        .await?
        .ok_or_else(|| Failure::not_found(format!("Message {} not found", message_id)))?;

    state
        .store
        .set_message_bookmarked(&user_id, chat_id, message_id, body.bookmarked)
        .await?;

    if body.bookmarked {
        let bookmark = state
            .store
            .add_bookmark(
                &user_id,
                chat_id,
                BookmarkDraft {
                    linked_message_id: message_id,
                    snippet,
                    kind,
                },
            )
            .await?;
        info!("Created bookmark {} for message {}", bookmark.id, message_id);
    } else {
        let existing = all_bookmarks(state.store.as_ref(), &user_id)
            .await?
            .into_iter()
            .find(|b| b.linked_message_id == message_id);
        if let Some(bookmark) = existing {
            state
                .store
                .delete_bookmark(&user_id, bookmark.chat_id, bookmark.id)
                .await?;
            info!("Deleted bookmark for message {}", message_id);
        }
    }

    Ok(Json(json!({
        "success": true,
        "bookmarked": body.bookmarked,
        "message": "Bookmark status updated successfully",
    })))
}

/// Search bookmarks by snippet content (case-insensitive substring).
pub async fn search_bookmarks_handler(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<BookmarkFilter>,
) -> WebResult<Json<Value>> {
    let query = filter
        .q
        .as_deref()
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .ok_or_else(|| Failure::bad_request("Search query is required"))?
        .to_lowercase();

    let user_id = filter.user_id();
    let mut bookmarks = all_bookmarks(state.store.as_ref(), &user_id).await?;
    if let Some(kind) = filter.kind.as_deref().filter(|k| *k != "all") {
        let kind = parse_kind(kind)?;
        bookmarks.retain(|b| b.kind == kind);
    }
    bookmarks.retain(|b| b.snippet.to_lowercase().contains(&query));
    if let Some(limit) = filter.limit.filter(|l| *l > 0) {
        bookmarks.truncate(limit);
    }

    let views: Vec<BookmarkView> = bookmarks.into_iter().map(BookmarkView::from).collect();
    Ok(Json(json!({
        "bookmarks": views,
        "total": views.len(),
        "query": query,
    })))
}

/// Delete every bookmark the user has, across all chats.
pub async fn clear_bookmarks_handler(
    State(state): State<Arc<AppState>>,
    Query(user): Query<UserQuery>,
) -> WebResult<Json<Value>> {
    let user_id = user.user_id();
    let mut deleted = 0u64;
    for chat in state.store.list_chats(&user_id).await? {
        match state.store.delete_chat_bookmarks(&user_id, chat.id).await {
            Ok(count) => deleted += count,
            Err(e) => warn!("Failed to clear bookmarks for chat {}: {}", chat.id, e),
        }
    }
    info!("Cleared {} bookmarks for user {}", deleted, user_id);

    Ok(Json(json!({
        "success": true,
        "message": "All bookmarks cleared successfully",
        "deleted_count": deleted,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::web::turn_task::tests::test_state;
    use tutor_core::domain::MessageDraft;

    async fn seeded_state() -> (Arc<AppState>, Uuid, Uuid) {
        let state = Arc::new(test_state());
        let chat = state.store.create_chat("u1", "Chat").await.unwrap();
        let msg = state
            .store
            .append_message(
                "u1",
                chat.id,
                MessageDraft::text("bookmark me", Sender::Tutor, ""),
            )
            .await
            .unwrap();
        (state, chat.id, msg.id)
    }

    fn as_user(uid: &str) -> Query<UserQuery> {
        Query(UserQuery {
            user_uid: Some(uid.to_string()),
        })
    }

    #[tokio::test]
    async fn create_then_delete_keeps_message_flag_in_sync() {
        let (state, chat_id, message_id) = seeded_state().await;

        let created = create_bookmark_handler(
            State(state.clone()),
            as_user("u1"),
            Json(CreateBookmarkBody {
                linked_message_id: Some(message_id),
                snippet: "bookmark me".to_string(),
                kind: "tutor".to_string(),
                chat_id: Some(chat_id),
            }),
        )
        .await
        .unwrap();
        let bookmark_id: Uuid =
            serde_json::from_value(created.0["bookmark_id"].clone()).unwrap();

        let messages = state.store.list_messages("u1", chat_id).await.unwrap();
        assert!(messages[0].bookmarked);

        delete_bookmark_handler(
            State(state.clone()),
            Query(BookmarkFilter {
                user_uid: Some("u1".to_string()),
                ..Default::default()
            }),
            Path(bookmark_id),
        )
        .await
        .unwrap();

        let messages = state.store.list_messages("u1", chat_id).await.unwrap();
        assert!(!messages[0].bookmarked);
        assert!(state
            .store
            .list_chat_bookmarks("u1", chat_id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn create_requires_existing_chat() {
        let (state, _, message_id) = seeded_state().await;
        let err = create_bookmark_handler(
            State(state),
            as_user("u1"),
            Json(CreateBookmarkBody {
                linked_message_id: Some(message_id),
                snippet: "s".to_string(),
                kind: "user".to_string(),
                chat_id: Some(Uuid::new_v4()),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn toggle_on_and_off_round_trips() {
        let (state, chat_id, message_id) = seeded_state().await;

        toggle_message_bookmark_handler(
            State(state.clone()),
            as_user("u1"),
            Path(message_id),
            Json(ToggleBookmarkBody {
                bookmarked: true,
                snippet: "saved".to_string(),
                kind: "tutor".to_string(),
            }),
        )
        .await
        .unwrap();

        let messages = state.store.list_messages("u1", chat_id).await.unwrap();
        assert!(messages[0].bookmarked);
        assert_eq!(
            state
                .store
                .list_chat_bookmarks("u1", chat_id)
                .await
                .unwrap()
                .len(),
            1
        );

        toggle_message_bookmark_handler(
            State(state.clone()),
            as_user("u1"),
            Path(message_id),
            Json(ToggleBookmarkBody {
                bookmarked: false,
                snippet: String::new(),
                kind: "tutor".to_string(),
            }),
        )
        .await
        .unwrap();

        let messages = state.store.list_messages("u1", chat_id).await.unwrap();
        assert!(!messages[0].bookmarked);
        assert!(state
            .store
            .list_chat_bookmarks("u1", chat_id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn toggle_on_requires_snippet() {
        let (state, _, message_id) = seeded_state().await;
        let err = toggle_message_bookmark_handler(
            State(state),
            as_user("u1"),
            Path(message_id),
            Json(ToggleBookmarkBody {
                bookmarked: true,
                snippet: "  ".to_string(),
                kind: "user".to_string(),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn search_filters_by_snippet_substring() {
        let (state, chat_id, message_id) = seeded_state().await;
        state
            .store
            .add_bookmark(
                "u1",
                chat_id,
                BookmarkDraft {
                    linked_message_id: message_id,
                    snippet: "Consideration must move from the promisee".to_string(),
                    kind: Sender::Tutor,
                },
            )
            .await
            .unwrap();

        let found = search_bookmarks_handler(
            State(state.clone()),
            Query(BookmarkFilter {
                user_uid: Some("u1".to_string()),
                q: Some("consideration".to_string()),
                ..Default::default()
            }),
        )
        .await
        .unwrap();
        assert_eq!(found.0["total"], 1);

        let missed = search_bookmarks_handler(
            State(state),
            Query(BookmarkFilter {
                user_uid: Some("u1".to_string()),
                q: Some("estoppel".to_string()),
                ..Default::default()
            }),
        )
        .await
        .unwrap();
        assert_eq!(missed.0["total"], 0);
    }
}
