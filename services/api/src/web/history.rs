//! services/api/src/web/history.rs
//!
//! The flattened conversation log: listing with filters, export as
//! json/csv/txt, bulk clearing, and the client-supplied structured history
//! entries.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};
use tutor_core::domain::{HistoryEntry, Sender};
use tutor_core::ports::{ChatStore, PortResult};
use uuid::Uuid;

use crate::web::state::AppState;
use crate::web::{Failure, UserQuery, WebResult};

//=========================================================================================
// Turn Pairs
//=========================================================================================

/// One user/tutor exchange, flattened out of the chat tree.
#[derive(Debug, Clone, Serialize)]
pub struct TurnPair {
    pub user_message: String,
    pub ai_reply: String,
    pub chapter: String,
    pub timestamp: DateTime<Utc>,
    pub message_id: Uuid,
}

/// Folds every chat's messages (oldest first, across all chats) into
/// user/tutor pairs; a tutor message fills the reply slot of the preceding
/// user message.
async fn collect_turn_pairs(store: &dyn ChatStore, user_id: &str) -> PortResult<Vec<TurnPair>> {
    let mut messages = Vec::new();
    for chat in store.list_chats(user_id).await? {
        messages.extend(store.list_messages(user_id, chat.id).await?);
    }
    messages.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));

    let mut pairs: Vec<TurnPair> = Vec::new();
    for message in messages {
        match message.sender {
            Sender::User => pairs.push(TurnPair {
                user_message: message.message,
                ai_reply: String::new(),
                chapter: message.chapter,
                timestamp: message.timestamp,
                message_id: message.id,
            }),
            Sender::Tutor => {
                if let Some(last) = pairs.last_mut() {
                    last.ai_reply = message.message;
                    last.timestamp = message.timestamp;
                }
            }
        }
    }
    Ok(pairs)
}

//=========================================================================================
// Filters
//=========================================================================================

#[derive(Debug, Default, Deserialize)]
pub struct HistoryFilter {
    pub user_uid: Option<String>,
    pub limit: Option<usize>,
    pub chapter: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub format: Option<String>,
}

impl HistoryFilter {
    fn user_id(&self) -> String {
        UserQuery {
            user_uid: self.user_uid.clone(),
        }
        .user_id()
    }
}

/// Accepts both offset-carrying RFC 3339 stamps and naive ISO timestamps.
fn parse_iso(value: &str, field: &str) -> WebResult<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|_| {
            Failure::bad_request(format!(
                "Invalid {} format. Use ISO format (YYYY-MM-DDTHH:MM:SS)",
                field
            ))
        })
}

fn apply_filters(mut pairs: Vec<TurnPair>, filter: &HistoryFilter) -> WebResult<Vec<TurnPair>> {
    if let Some(chapter) = filter.chapter.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
        pairs.retain(|p| p.chapter.eq_ignore_ascii_case(chapter));
    }
    if let Some(start) = filter.start_date.as_deref().map(str::trim).filter(|d| !d.is_empty()) {
        let start = parse_iso(start, "start_date")?;
        pairs.retain(|p| p.timestamp >= start);
    }
    if let Some(end) = filter.end_date.as_deref().map(str::trim).filter(|d| !d.is_empty()) {
        let end = parse_iso(end, "end_date")?;
        pairs.retain(|p| p.timestamp <= end);
    }
    if let Some(limit) = filter.limit.filter(|l| *l > 0) {
        if pairs.len() > limit {
            pairs = pairs.split_off(pairs.len() - limit);
        }
    }
    Ok(pairs)
}

fn filters_applied(filter: &HistoryFilter) -> Value {
    json!({
        "chapter": filter.chapter.as_deref().filter(|c| !c.is_empty()),
        "start_date": filter.start_date.as_deref().filter(|d| !d.is_empty()),
        "end_date": filter.end_date.as_deref().filter(|d| !d.is_empty()),
        "limit": filter.limit,
    })
}

//=========================================================================================
// Handlers
//=========================================================================================

/// List the flattened conversation history with optional filters.
pub async fn list_history_handler(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<HistoryFilter>,
) -> WebResult<Json<Value>> {
    let pairs = collect_turn_pairs(state.store.as_ref(), &filter.user_id()).await?;
    let filtered = apply_filters(pairs, &filter)?;
    info!("Retrieved chat history: {} entries", filtered.len());

    Ok(Json(json!({
        "history": filtered,
        "total_entries": filtered.len(),
        "filtered_entries": filtered.len(),
        "filters_applied": filters_applied(&filter),
    })))
}

/// Export the conversation history as json, csv, or txt. The csv and txt
/// variants are returned as attachments.
pub async fn export_history_handler(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<HistoryFilter>,
) -> WebResult<Response> {
    let format = filter
        .format
        .as_deref()
        .unwrap_or("json")
        .to_lowercase();

    let pairs = collect_turn_pairs(state.store.as_ref(), &filter.user_id()).await?;
    let pairs = apply_filters(pairs, &filter)?;
    let stamp = Utc::now().format("%Y%m%d");

    match format.as_str() {
        "json" => Ok(Json(json!({
            "export_format": "json",
            "export_date": Utc::now(),
            "total_entries": pairs.len(),
            "filters_applied": filters_applied(&filter),
            "history": pairs,
        }))
        .into_response()),
        "csv" => {
            let mut writer = csv::Writer::from_writer(Vec::new());
            writer
                .write_record(["Timestamp", "Chapter", "User Message", "AI Reply"])
                .map_err(|e| Failure::internal(format!("Failed to build export: {}", e)))?;
            for pair in &pairs {
                writer
                    .write_record([
                        pair.timestamp.to_rfc3339().as_str(),
                        pair.chapter.as_str(),
                        pair.user_message.as_str(),
                        pair.ai_reply.as_str(),
                    ])
                    .map_err(|e| Failure::internal(format!("Failed to build export: {}", e)))?;
            }
            let bytes = writer
                .into_inner()
                .map_err(|e| Failure::internal(format!("Failed to build export: {}", e)))?;

            Ok((
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, "text/csv".to_string()),
                    (
                        header::CONTENT_DISPOSITION,
                        format!("attachment; filename=chat_history_{}.csv", stamp),
                    ),
                ],
                bytes,
            )
                .into_response())
        }
        "txt" => {
            let mut lines = vec![
                "AI Tutor - Chat History Export".to_string(),
                format!("Export Date: {}", Utc::now().format("%Y-%m-%d %H:%M:%S")),
                format!("Total Entries: {}", pairs.len()),
                "=".repeat(80),
                String::new(),
            ];
            for (i, pair) in pairs.iter().enumerate() {
                lines.push(format!("Entry {}:", i + 1));
                lines.push(format!("Timestamp: {}", pair.timestamp.to_rfc3339()));
                lines.push(format!("Chapter: {}", pair.chapter));
                lines.push(format!("User: {}", pair.user_message));
                lines.push(format!("AI Tutor: {}", pair.ai_reply));
                lines.push("-".repeat(40));
                lines.push(String::new());
            }

            Ok((
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, "text/plain".to_string()),
                    (
                        header::CONTENT_DISPOSITION,
                        format!("attachment; filename=chat_history_{}.txt", stamp),
                    ),
                ],
                lines.join("\n"),
            )
                .into_response())
        }
        _ => Err(Failure::bad_request(
            "Unsupported export format. Use: json, csv, or txt",
        )),
    }
}

/// Clear every chat's messages and bookmarks for the user. The chats
/// themselves survive; only their contents are removed.
pub async fn clear_history_handler(
    State(state): State<Arc<AppState>>,
    Query(user): Query<UserQuery>,
) -> WebResult<Json<Value>> {
    let user_id = user.user_id();
    let mut messages_cleared = true;
    let mut bookmarks_cleared = true;

    for chat in state.store.list_chats(&user_id).await? {
        if let Err(e) = state.store.delete_chat_messages(&user_id, chat.id).await {
            warn!("Failed to clear messages for chat {}: {}", chat.id, e);
            messages_cleared = false;
        }
        if let Err(e) = state.store.delete_chat_bookmarks(&user_id, chat.id).await {
            warn!("Failed to clear bookmarks for chat {}: {}", chat.id, e);
            bookmarks_cleared = false;
        }
    }
    info!("Chat history cleared for user {}", user_id);

    Ok(Json(json!({
        "success": true,
        "message": "Chat history and bookmarks cleared successfully",
        "messages_cleared": messages_cleared,
        "bookmarks_cleared": bookmarks_cleared,
    })))
}

/// Clear one chat's messages and bookmarks without deleting the chat itself.
pub async fn clear_chat_handler(
    State(state): State<Arc<AppState>>,
    Query(user): Query<UserQuery>,
    Path(chat_id): Path<Uuid>,
) -> WebResult<Json<Value>> {
    let user_id = user.user_id();
    let messages_cleared = match state.store.delete_chat_messages(&user_id, chat_id).await {
        Ok(_) => true,
        Err(e) => {
            warn!("Failed to clear messages for chat {}: {}", chat_id, e);
            false
        }
    };
    let bookmarks_cleared = match state.store.delete_chat_bookmarks(&user_id, chat_id).await {
        Ok(_) => true,
        Err(e) => {
            warn!("Failed to clear bookmarks for chat {}: {}", chat_id, e);
            false
        }
    };

    Ok(Json(json!({
        "success": true,
        "message": "Chat messages and bookmarks cleared successfully",
        "chat_id": chat_id,
        "messages_cleared": messages_cleared,
        "bookmarks_cleared": bookmarks_cleared,
    })))
}

/// List the client-supplied structured history entries, newest first.
pub async fn list_entries_handler(
    State(state): State<Arc<AppState>>,
    Query(user): Query<UserQuery>,
) -> WebResult<Json<Value>> {
    let entries = state.store.list_history_entries(&user.user_id()).await?;
    Ok(Json(json!({
        "entries": entries,
        "total": entries.len(),
    })))
}

/// Save one structured history entry; id and time come from the client.
pub async fn save_entry_handler(
    State(state): State<Arc<AppState>>,
    Query(user): Query<UserQuery>,
    Json(data): Json<Value>,
) -> WebResult<Json<Value>> {
    let mut fields = Vec::new();
    for field in ["id", "time", "chapter", "user", "aiTutor"] {
        let value = data
            .get(field)
            .and_then(|v| v.as_str())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| Failure::bad_request(format!("{} is required", field)))?;
        fields.push(value.to_string());
    }
    let [id, time, chapter, user_message, ai_tutor]: [String; 5] = fields
        .try_into()
        .map_err(|_| Failure::internal("Internal server error"))?;

    let entry = HistoryEntry {
        id: id.clone(),
        time,
        chapter,
        user: user_message,
        ai_tutor,
    };
    state
        .store
        .save_history_entry(&user.user_id(), entry)
        .await?;
    info!("Saved structured history entry {}", id);

    Ok(Json(json!({
        "success": true,
        "entry_id": id,
        "message": "Entry saved successfully",
    })))
}

/// Clear all structured history entries.
pub async fn clear_entries_handler(
    State(state): State<Arc<AppState>>,
    Query(user): Query<UserQuery>,
) -> WebResult<Json<Value>> {
    let deleted = state.store.clear_history_entries(&user.user_id()).await?;
    info!("Deleted {} structured history entries", deleted);
    Ok(Json(json!({
        "success": true,
        "message": "All history entries cleared successfully",
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::web::turn_task::tests::test_state;
    use tutor_core::domain::MessageDraft;

    async fn seeded(state: &AppState) -> Uuid {
        let chat = state.store.create_chat("u1", "Chat").await.unwrap();
        for (sender, text, chapter) in [
            (Sender::User, "What is a contract?", "INDIAN CONTRACT ACT"),
            (Sender::Tutor, "An enforceable agreement.", "INDIAN CONTRACT ACT"),
            (Sender::User, "What is winding up?", "WINDING UP"),
            (Sender::Tutor, "Closing down a company.", "WINDING UP"),
        ] {
            state
                .store
                .append_message("u1", chat.id, MessageDraft::text(text, sender, chapter))
                .await
                .unwrap();
        }
        chat.id
    }

    fn as_filter(uid: &str) -> HistoryFilter {
        HistoryFilter {
            user_uid: Some(uid.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn pairs_fold_user_and_tutor_messages() {
        let state = test_state();
        seeded(&state).await;

        let pairs = collect_turn_pairs(state.store.as_ref(), "u1").await.unwrap();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].user_message, "What is a contract?");
        assert_eq!(pairs[0].ai_reply, "An enforceable agreement.");
        assert_eq!(pairs[1].chapter, "WINDING UP");
    }

    #[tokio::test]
    async fn chapter_filter_is_case_insensitive() {
        let state = Arc::new(test_state());
        seeded(&state).await;

        let mut filter = as_filter("u1");
        filter.chapter = Some("winding up".to_string());
        let listed = list_history_handler(State(state), Query(filter)).await.unwrap();
        assert_eq!(listed.0["total_entries"], 1);
    }

    #[tokio::test]
    async fn invalid_date_filter_is_rejected() {
        let state = Arc::new(test_state());
        let mut filter = as_filter("u1");
        filter.start_date = Some("yesterday".to_string());
        let err = list_history_handler(State(state), Query(filter))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn csv_export_is_an_attachment() {
        let state = Arc::new(test_state());
        seeded(&state).await;

        let mut filter = as_filter("u1");
        filter.format = Some("csv".to_string());
        let response = export_history_handler(State(state), Query(filter))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/csv"
        );
        let disposition = response
            .headers()
            .get(header::CONTENT_DISPOSITION)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(disposition.starts_with("attachment; filename=chat_history_"));

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.starts_with("Timestamp,Chapter,User Message,AI Reply"));
        assert!(text.contains("What is a contract?"));
    }

    #[tokio::test]
    async fn unsupported_export_format_is_rejected() {
        let state = Arc::new(test_state());
        let mut filter = as_filter("u1");
        filter.format = Some("xml".to_string());
        let err = export_history_handler(State(state), Query(filter))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn clear_history_empties_every_chat_but_keeps_them() {
        let state = Arc::new(test_state());
        let chat_id = seeded(&state).await;

        clear_history_handler(
            State(state.clone()),
            Query(UserQuery {
                user_uid: Some("u1".to_string()),
            }),
        )
        .await
        .unwrap();

        assert!(state.store.list_messages("u1", chat_id).await.unwrap().is_empty());
        assert!(state.store.chat_exists("u1", chat_id).await.unwrap());
    }

    #[tokio::test]
    async fn structured_entries_round_trip_and_clear() {
        let state = Arc::new(test_state());
        let user = || Query(UserQuery {
            user_uid: Some("u1".to_string()),
        });

        save_entry_handler(
            State(state.clone()),
            user(),
            Json(json!({
                "id": "entry-1",
                "time": "2025-08-19T12:10:03.502000",
                "chapter": "WINDING UP",
                "user": "What are the modes of winding up?",
                "aiTutor": "Voluntary and compulsory.",
            })),
        )
        .await
        .unwrap();

        let listed = list_entries_handler(State(state.clone()), user()).await.unwrap();
        assert_eq!(listed.0["total"], 1);

        let err = save_entry_handler(
            State(state.clone()),
            user(),
            Json(json!({ "id": "entry-2", "time": "t", "chapter": "c", "user": "u" })),
        )
        .await
        .unwrap_err();
        assert_eq!(err.message(), "aiTutor is required");

        clear_entries_handler(State(state.clone()), user()).await.unwrap();
        let listed = list_entries_handler(State(state), user()).await.unwrap();
        assert_eq!(listed.0["total"], 0);
    }
}
