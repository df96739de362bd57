//! crates/tutor_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the
//! core to be independent of specific external implementations like databases
//! or hosted AI APIs.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::{
    Bookmark, BookmarkDraft, Chat, ChatMessage, HistoryEntry, MessageDraft, Upload, UploadDraft,
};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Backing service unavailable: {0}")]
    Unavailable(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

/// Persistence boundary for the hierarchical conversation data:
/// user -> chats -> {messages, bookmarks}, plus per-user uploads, context
/// entries and structured history records.
///
/// Every write here is individually atomic; multi-document sequences (cascade
/// deletes, bookmark-flag sync, auto-rename) are orchestrated by the callers
/// and are deliberately NOT transactional across documents.
#[async_trait]
pub trait ChatStore: Send + Sync {
    // --- Chat Management ---
    async fn create_chat(&self, user_id: &str, chat_name: &str) -> PortResult<Chat>;

    async fn get_chat(&self, user_id: &str, chat_id: Uuid) -> PortResult<Chat>;

    /// All chats for the user, most recently updated first.
    async fn list_chats(&self, user_id: &str) -> PortResult<Vec<Chat>>;

    async fn chat_exists(&self, user_id: &str, chat_id: Uuid) -> PortResult<bool>;

    async fn rename_chat(&self, user_id: &str, chat_id: Uuid, new_name: &str) -> PortResult<()>;

    /// Refreshes the chat's `last_updated` timestamp to now.
    async fn touch_chat(&self, user_id: &str, chat_id: Uuid) -> PortResult<()>;

    /// Deletes only the chat document. Callers cascade messages/bookmarks first.
    async fn delete_chat_record(&self, user_id: &str, chat_id: Uuid) -> PortResult<()>;

    // --- Messages ---
    /// Inserts a message with a server-assigned id and timestamp.
    async fn append_message(
        &self,
        user_id: &str,
        chat_id: Uuid,
        draft: MessageDraft,
    ) -> PortResult<ChatMessage>;

    /// Messages of one chat, oldest first.
    async fn list_messages(&self, user_id: &str, chat_id: Uuid) -> PortResult<Vec<ChatMessage>>;

    /// Replaces a message's text and stamps `edited_at`.
    async fn update_message_text(
        &self,
        user_id: &str,
        chat_id: Uuid,
        message_id: Uuid,
        new_text: &str,
    ) -> PortResult<()>;

    async fn delete_message(&self, user_id: &str, chat_id: Uuid, message_id: Uuid)
        -> PortResult<()>;

    async fn set_message_bookmarked(
        &self,
        user_id: &str,
        chat_id: Uuid,
        message_id: Uuid,
        bookmarked: bool,
    ) -> PortResult<()>;

    /// Linear scan across the user's chats for the one holding `message_id`.
    async fn find_message_chat(&self, user_id: &str, message_id: Uuid) -> PortResult<Option<Uuid>>;

    /// Bulk-deletes a chat's messages, returning how many went away.
    async fn delete_chat_messages(&self, user_id: &str, chat_id: Uuid) -> PortResult<u64>;

    // --- Bookmarks ---
    async fn add_bookmark(
        &self,
        user_id: &str,
        chat_id: Uuid,
        draft: BookmarkDraft,
    ) -> PortResult<Bookmark>;

    /// Bookmarks of one chat, newest first.
    async fn list_chat_bookmarks(&self, user_id: &str, chat_id: Uuid) -> PortResult<Vec<Bookmark>>;

    async fn delete_bookmark(
        &self,
        user_id: &str,
        chat_id: Uuid,
        bookmark_id: Uuid,
    ) -> PortResult<()>;

    async fn delete_chat_bookmarks(&self, user_id: &str, chat_id: Uuid) -> PortResult<u64>;

    // --- Uploads ---
    async fn save_upload(&self, user_id: &str, draft: UploadDraft) -> PortResult<Upload>;

    /// Uploads for the user, newest first.
    async fn list_uploads(&self, user_id: &str) -> PortResult<Vec<Upload>>;

    async fn get_upload(&self, user_id: &str, upload_id: Uuid) -> PortResult<Upload>;

    async fn delete_upload(&self, user_id: &str, upload_id: Uuid) -> PortResult<()>;

    // --- Context Entries (extracted document / chapter text) ---
    /// Stores or replaces the full extracted text under a name (a filename or
    /// a chapter title), for later prompt augmentation.
    async fn put_context_entry(&self, user_id: &str, name: &str, text: &str) -> PortResult<()>;

    async fn list_context_entries(&self, user_id: &str) -> PortResult<Vec<(String, String)>>;

    /// The most recently extracted document text for the user, if any.
    async fn set_latest_document_text(&self, user_id: &str, text: &str) -> PortResult<()>;

    async fn latest_document_text(&self, user_id: &str) -> PortResult<Option<String>>;

    async fn set_active_chapter(&self, user_id: &str, chapter: &str) -> PortResult<()>;

    async fn active_chapter(&self, user_id: &str) -> PortResult<Option<String>>;

    // --- Structured History Entries ---
    async fn save_history_entry(&self, user_id: &str, entry: HistoryEntry) -> PortResult<()>;

    /// Entries newest first (by their client-supplied `time`).
    async fn list_history_entries(&self, user_id: &str) -> PortResult<Vec<HistoryEntry>>;

    async fn clear_history_entries(&self, user_id: &str) -> PortResult<u64>;
}

/// The single call/response boundary to the hosted generation model.
#[async_trait]
pub trait TutorService: Send + Sync {
    /// Produces a tutor reply for an already-assembled prompt.
    async fn generate_reply(&self, system_instruction: &str, prompt: &str) -> PortResult<String>;
}

/// How aggressively the recognizer should hunt for text on a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OcrMode {
    /// Read the page as a coherent block of text, in reading order.
    Document,
    /// Pick up every visible fragment, including scattered labels and captions.
    Fragments,
}

/// Text recognition over a single page/image, consumed as a black box.
#[async_trait]
pub trait OcrService: Send + Sync {
    async fn recognize(&self, image: &[u8], mime_type: &str, mode: OcrMode) -> PortResult<String>;
}
