//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `ChatStore` port from the `core` crate. It handles all interactions
//! with the PostgreSQL database using `sqlx`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use tutor_core::domain::{
    Bookmark, BookmarkDraft, Chat, ChatMessage, FileAttachment, HistoryEntry, MessageDraft,
    Sender, StructuredFileContent, Upload, UploadDraft,
};
use tutor_core::ports::{ChatStore, PortError, PortResult};
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `ChatStore` port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

/// Maps the library error onto the port taxonomy: connectivity problems are
/// `Unavailable`, a missing row is `NotFound`, everything else `Unexpected`.
fn map_db_err(e: sqlx::Error) -> PortError {
    match e {
        sqlx::Error::RowNotFound => PortError::NotFound("row not found".to_string()),
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            PortError::Unavailable(e.to_string())
        }
        _ => PortError::Unexpected(e.to_string()),
    }
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct ChatRecord {
    id: Uuid,
    chat_name: String,
    created_at: DateTime<Utc>,
    last_updated: DateTime<Utc>,
}
impl ChatRecord {
    fn to_domain(self) -> Chat {
        Chat {
            id: self.id,
            chat_name: self.chat_name,
            created_at: self.created_at,
            last_updated: self.last_updated,
        }
    }
}

#[derive(FromRow)]
struct MessageRecord {
    id: Uuid,
    chat_id: Uuid,
    message: String,
    sender: String,
    chapter: String,
    bookmarked: bool,
    created_at: DateTime<Utc>,
    edited_at: Option<DateTime<Utc>>,
    replies_to: Option<Uuid>,
    file_attachments: Json<Vec<FileAttachment>>,
    structured_file_content: Json<Vec<StructuredFileContent>>,
}
impl MessageRecord {
    fn to_domain(self) -> PortResult<ChatMessage> {
        let sender = Sender::parse(&self.sender).ok_or_else(|| {
            PortError::Unexpected(format!("Unknown sender '{}' in message row", self.sender))
        })?;
        Ok(ChatMessage {
            id: self.id,
            chat_id: self.chat_id,
            message: self.message,
            sender,
            chapter: self.chapter,
            bookmarked: self.bookmarked,
            timestamp: self.created_at,
            edited_at: self.edited_at,
            replies_to: self.replies_to,
            file_attachments: self.file_attachments.0,
            structured_file_content: self.structured_file_content.0,
        })
    }
}

#[derive(FromRow)]
struct BookmarkRecord {
    id: Uuid,
    chat_id: Uuid,
    linked_message_id: Uuid,
    snippet: String,
    kind: String,
    created_at: DateTime<Utc>,
}
impl BookmarkRecord {
    fn to_domain(self) -> PortResult<Bookmark> {
        let kind = Sender::parse(&self.kind).ok_or_else(|| {
            PortError::Unexpected(format!("Unknown bookmark kind '{}' in row", self.kind))
        })?;
        Ok(Bookmark {
            id: self.id,
            chat_id: self.chat_id,
            linked_message_id: self.linked_message_id,
            snippet: self.snippet,
            kind,
            created_at: self.created_at,
        })
    }
}

#[derive(FromRow)]
struct UploadRecord {
    id: Uuid,
    file_name: String,
    file_type: String,
    file_size: i64,
    extracted_text: String,
    chapter: Option<String>,
    file_url: String,
    uploaded_at: DateTime<Utc>,
}
impl UploadRecord {
    fn to_domain(self) -> Upload {
        Upload {
            id: self.id,
            file_name: self.file_name,
            file_type: self.file_type,
            file_size: self.file_size,
            extracted_text: self.extracted_text,
            chapter: self.chapter,
            uploaded_at: self.uploaded_at,
            file_url: self.file_url,
        }
    }
}

#[derive(FromRow)]
struct HistoryEntryRecord {
    id: String,
    time: String,
    chapter: String,
    user_message: String,
    ai_tutor: String,
}
impl HistoryEntryRecord {
    fn to_domain(self) -> HistoryEntry {
        HistoryEntry {
            id: self.id,
            time: self.time,
            chapter: self.chapter,
            user: self.user_message,
            ai_tutor: self.ai_tutor,
        }
    }
}

//=========================================================================================
// `ChatStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl ChatStore for DbAdapter {
    async fn create_chat(&self, user_id: &str, chat_name: &str) -> PortResult<Chat> {
        let now = Utc::now();
        let record = sqlx::query_as::<_, ChatRecord>(
            "INSERT INTO chats (id, user_id, chat_name, created_at, last_updated) \
             VALUES ($1, $2, $3, $4, $4) \
             RETURNING id, chat_name, created_at, last_updated",
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(chat_name)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(map_db_err)?;
        Ok(record.to_domain())
    }

    async fn get_chat(&self, user_id: &str, chat_id: Uuid) -> PortResult<Chat> {
        let record = sqlx::query_as::<_, ChatRecord>(
            "SELECT id, chat_name, created_at, last_updated FROM chats \
             WHERE user_id = $1 AND id = $2",
        )
        .bind(user_id)
        .bind(chat_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => PortError::NotFound(format!("Chat {} not found", chat_id)),
            other => map_db_err(other),
        })?;
        Ok(record.to_domain())
    }

    async fn list_chats(&self, user_id: &str) -> PortResult<Vec<Chat>> {
        let records = sqlx::query_as::<_, ChatRecord>(
            "SELECT id, chat_name, created_at, last_updated FROM chats \
             WHERE user_id = $1 ORDER BY last_updated DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_err)?;
        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }

    async fn chat_exists(&self, user_id: &str, chat_id: Uuid) -> PortResult<bool> {
        let row: Option<(Uuid,)> =
            sqlx::query_as("SELECT id FROM chats WHERE user_id = $1 AND id = $2")
                .bind(user_id)
                .bind(chat_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_db_err)?;
        Ok(row.is_some())
    }

    async fn rename_chat(&self, user_id: &str, chat_id: Uuid, new_name: &str) -> PortResult<()> {
        let result = sqlx::query(
            "UPDATE chats SET chat_name = $3, last_updated = $4 WHERE user_id = $1 AND id = $2",
        )
        .bind(user_id)
        .bind(chat_id)
        .bind(new_name)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(map_db_err)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Chat {} not found", chat_id)));
        }
        Ok(())
    }

    async fn touch_chat(&self, user_id: &str, chat_id: Uuid) -> PortResult<()> {
        let result =
            sqlx::query("UPDATE chats SET last_updated = $3 WHERE user_id = $1 AND id = $2")
                .bind(user_id)
                .bind(chat_id)
                .bind(Utc::now())
                .execute(&self.pool)
                .await
                .map_err(map_db_err)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Chat {} not found", chat_id)));
        }
        Ok(())
    }

    async fn delete_chat_record(&self, user_id: &str, chat_id: Uuid) -> PortResult<()> {
        sqlx::query("DELETE FROM chats WHERE user_id = $1 AND id = $2")
            .bind(user_id)
            .bind(chat_id)
            .execute(&self.pool)
            .await
            .map_err(map_db_err)?;
        Ok(())
    }

    async fn append_message(
        &self,
        user_id: &str,
        chat_id: Uuid,
        draft: MessageDraft,
    ) -> PortResult<ChatMessage> {
        let record = sqlx::query_as::<_, MessageRecord>(
            "INSERT INTO messages (id, user_id, chat_id, message, sender, chapter, bookmarked, \
                                   created_at, replies_to, file_attachments, structured_file_content) \
             VALUES ($1, $2, $3, $4, $5, $6, FALSE, $7, $8, $9, $10) \
             RETURNING id, chat_id, message, sender, chapter, bookmarked, created_at, edited_at, \
                       replies_to, file_attachments, structured_file_content",
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(chat_id)
        .bind(&draft.message)
        .bind(draft.sender.as_str())
        .bind(&draft.chapter)
        .bind(Utc::now())
        .bind(draft.replies_to)
        .bind(Json(&draft.file_attachments))
        .bind(Json(&draft.structured_file_content))
        .fetch_one(&self.pool)
        .await
        .map_err(map_db_err)?;
        record.to_domain()
    }

    async fn list_messages(&self, user_id: &str, chat_id: Uuid) -> PortResult<Vec<ChatMessage>> {
        let records = sqlx::query_as::<_, MessageRecord>(
            "SELECT id, chat_id, message, sender, chapter, bookmarked, created_at, edited_at, \
                    replies_to, file_attachments, structured_file_content \
             FROM messages WHERE user_id = $1 AND chat_id = $2 ORDER BY created_at ASC",
        )
        .bind(user_id)
        .bind(chat_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_err)?;
        records.into_iter().map(|r| r.to_domain()).collect()
    }

    async fn update_message_text(
        &self,
        user_id: &str,
        chat_id: Uuid,
        message_id: Uuid,
        new_text: &str,
    ) -> PortResult<()> {
        let result = sqlx::query(
            "UPDATE messages SET message = $4, edited_at = $5 \
             WHERE user_id = $1 AND chat_id = $2 AND id = $3",
        )
        .bind(user_id)
        .bind(chat_id)
        .bind(message_id)
        .bind(new_text)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(map_db_err)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!(
                "Message {} not found",
                message_id
            )));
        }
        Ok(())
    }

    async fn delete_message(
        &self,
        user_id: &str,
        chat_id: Uuid,
        message_id: Uuid,
    ) -> PortResult<()> {
        let result =
            sqlx::query("DELETE FROM messages WHERE user_id = $1 AND chat_id = $2 AND id = $3")
                .bind(user_id)
                .bind(chat_id)
                .bind(message_id)
                .execute(&self.pool)
                .await
                .map_err(map_db_err)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!(
                "Message {} not found",
                message_id
            )));
        }
        Ok(())
    }

    async fn set_message_bookmarked(
        &self,
        user_id: &str,
        chat_id: Uuid,
        message_id: Uuid,
        bookmarked: bool,
    ) -> PortResult<()> {
        let result = sqlx::query(
            "UPDATE messages SET bookmarked = $4 WHERE user_id = $1 AND chat_id = $2 AND id = $3",
        )
        .bind(user_id)
        .bind(chat_id)
        .bind(message_id)
        .bind(bookmarked)
        .execute(&self.pool)
        .await
        .map_err(map_db_err)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!(
                "Message {} not found",
                message_id
            )));
        }
        Ok(())
    }

    async fn find_message_chat(&self, user_id: &str, message_id: Uuid) -> PortResult<Option<Uuid>> {
        let row: Option<(Uuid,)> =
            sqlx::query_as("SELECT chat_id FROM messages WHERE user_id = $1 AND id = $2")
                .bind(user_id)
                .bind(message_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_db_err)?;
        Ok(row.map(|(chat_id,)| chat_id))
    }

    async fn delete_chat_messages(&self, user_id: &str, chat_id: Uuid) -> PortResult<u64> {
        let result = sqlx::query("DELETE FROM messages WHERE user_id = $1 AND chat_id = $2")
            .bind(user_id)
            .bind(chat_id)
            .execute(&self.pool)
            .await
            .map_err(map_db_err)?;
        Ok(result.rows_affected())
    }

    async fn add_bookmark(
        &self,
        user_id: &str,
        chat_id: Uuid,
        draft: BookmarkDraft,
    ) -> PortResult<Bookmark> {
        let record = sqlx::query_as::<_, BookmarkRecord>(
            "INSERT INTO bookmarks (id, user_id, chat_id, linked_message_id, snippet, kind, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING id, chat_id, linked_message_id, snippet, kind, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(chat_id)
        .bind(draft.linked_message_id)
        .bind(&draft.snippet)
        .bind(draft.kind.as_str())
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(map_db_err)?;
        record.to_domain()
    }

    async fn list_chat_bookmarks(&self, user_id: &str, chat_id: Uuid) -> PortResult<Vec<Bookmark>> {
        let records = sqlx::query_as::<_, BookmarkRecord>(
            "SELECT id, chat_id, linked_message_id, snippet, kind, created_at \
             FROM bookmarks WHERE user_id = $1 AND chat_id = $2 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .bind(chat_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_err)?;
        records.into_iter().map(|r| r.to_domain()).collect()
    }

    async fn delete_bookmark(
        &self,
        user_id: &str,
        chat_id: Uuid,
        bookmark_id: Uuid,
    ) -> PortResult<()> {
        let result =
            sqlx::query("DELETE FROM bookmarks WHERE user_id = $1 AND chat_id = $2 AND id = $3")
                .bind(user_id)
                .bind(chat_id)
                .bind(bookmark_id)
                .execute(&self.pool)
                .await
                .map_err(map_db_err)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!(
                "Bookmark {} not found",
                bookmark_id
            )));
        }
        Ok(())
    }

    async fn delete_chat_bookmarks(&self, user_id: &str, chat_id: Uuid) -> PortResult<u64> {
        let result = sqlx::query("DELETE FROM bookmarks WHERE user_id = $1 AND chat_id = $2")
            .bind(user_id)
            .bind(chat_id)
            .execute(&self.pool)
            .await
            .map_err(map_db_err)?;
        Ok(result.rows_affected())
    }

    async fn save_upload(&self, user_id: &str, draft: UploadDraft) -> PortResult<Upload> {
        let id = Uuid::new_v4();
        let record = sqlx::query_as::<_, UploadRecord>(
            "INSERT INTO uploads (id, user_id, file_name, file_type, file_size, extracted_text, \
                                  chapter, file_url, uploaded_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             RETURNING id, file_name, file_type, file_size, extracted_text, chapter, file_url, uploaded_at",
        )
        .bind(id)
        .bind(user_id)
        .bind(&draft.file_name)
        .bind(&draft.file_type)
        .bind(draft.file_size)
        .bind(&draft.extracted_text)
        .bind(&draft.chapter)
        .bind(format!("/api/files/{}", id))
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(map_db_err)?;
        Ok(record.to_domain())
    }

    async fn list_uploads(&self, user_id: &str) -> PortResult<Vec<Upload>> {
        let records = sqlx::query_as::<_, UploadRecord>(
            "SELECT id, file_name, file_type, file_size, extracted_text, chapter, file_url, uploaded_at \
             FROM uploads WHERE user_id = $1 ORDER BY uploaded_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_err)?;
        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }

    async fn get_upload(&self, user_id: &str, upload_id: Uuid) -> PortResult<Upload> {
        let record = sqlx::query_as::<_, UploadRecord>(
            "SELECT id, file_name, file_type, file_size, extracted_text, chapter, file_url, uploaded_at \
             FROM uploads WHERE user_id = $1 AND id = $2",
        )
        .bind(user_id)
        .bind(upload_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => {
                PortError::NotFound(format!("Upload {} not found", upload_id))
            }
            other => map_db_err(other),
        })?;
        Ok(record.to_domain())
    }

    async fn delete_upload(&self, user_id: &str, upload_id: Uuid) -> PortResult<()> {
        let result = sqlx::query("DELETE FROM uploads WHERE user_id = $1 AND id = $2")
            .bind(user_id)
            .bind(upload_id)
            .execute(&self.pool)
            .await
            .map_err(map_db_err)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!(
                "Upload {} not found",
                upload_id
            )));
        }
        Ok(())
    }

    async fn put_context_entry(&self, user_id: &str, name: &str, text: &str) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO context_entries (user_id, name, text, stored_at) VALUES ($1, $2, $3, $4) \
             ON CONFLICT (user_id, name) DO UPDATE SET text = $3, stored_at = $4",
        )
        .bind(user_id)
        .bind(name)
        .bind(text)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(map_db_err)?;
        Ok(())
    }

    async fn list_context_entries(&self, user_id: &str) -> PortResult<Vec<(String, String)>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT name, text FROM context_entries WHERE user_id = $1 ORDER BY stored_at ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_err)?;
        Ok(rows)
    }

    async fn set_latest_document_text(&self, user_id: &str, text: &str) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO user_state (user_id, latest_document_text) VALUES ($1, $2) \
             ON CONFLICT (user_id) DO UPDATE SET latest_document_text = $2",
        )
        .bind(user_id)
        .bind(text)
        .execute(&self.pool)
        .await
        .map_err(map_db_err)?;
        Ok(())
    }

    async fn latest_document_text(&self, user_id: &str) -> PortResult<Option<String>> {
        let row: Option<(Option<String>,)> =
            sqlx::query_as("SELECT latest_document_text FROM user_state WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_db_err)?;
        Ok(row.and_then(|(text,)| text))
    }

    async fn set_active_chapter(&self, user_id: &str, chapter: &str) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO user_state (user_id, active_chapter) VALUES ($1, $2) \
             ON CONFLICT (user_id) DO UPDATE SET active_chapter = $2",
        )
        .bind(user_id)
        .bind(chapter)
        .execute(&self.pool)
        .await
        .map_err(map_db_err)?;
        Ok(())
    }

    async fn active_chapter(&self, user_id: &str) -> PortResult<Option<String>> {
        let row: Option<(Option<String>,)> =
            sqlx::query_as("SELECT active_chapter FROM user_state WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_db_err)?;
        Ok(row.and_then(|(chapter,)| chapter))
    }

    async fn save_history_entry(&self, user_id: &str, entry: HistoryEntry) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO history_entries (user_id, id, time, chapter, user_message, ai_tutor, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (user_id, id) DO UPDATE \
             SET time = $3, chapter = $4, user_message = $5, ai_tutor = $6",
        )
        .bind(user_id)
        .bind(&entry.id)
        .bind(&entry.time)
        .bind(&entry.chapter)
        .bind(&entry.user)
        .bind(&entry.ai_tutor)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(map_db_err)?;
        Ok(())
    }

    async fn list_history_entries(&self, user_id: &str) -> PortResult<Vec<HistoryEntry>> {
        let records = sqlx::query_as::<_, HistoryEntryRecord>(
            "SELECT id, time, chapter, user_message, ai_tutor FROM history_entries \
             WHERE user_id = $1 ORDER BY time DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_err)?;
        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }

    async fn clear_history_entries(&self, user_id: &str) -> PortResult<u64> {
        let result = sqlx::query("DELETE FROM history_entries WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(map_db_err)?;
        Ok(result.rows_affected())
    }
}
