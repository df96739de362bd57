//! crates/tutor_core/src/domain.rs
//!
//! Defines the core data structures for the application.
//! These structs are independent of any database; serde derives carry the
//! camelCase wire names the frontend expects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who authored a message (and, by extension, what kind of bookmark points at it).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Tutor,
}

impl Sender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sender::User => "user",
            Sender::Tutor => "tutor",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "user" => Some(Sender::User),
            "tutor" => Some(Sender::Tutor),
            _ => None,
        }
    }
}

/// A named, ordered conversation thread owned by one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: Uuid,
    pub chat_name: String,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

/// A denormalized reference to an upload, carried on the user message that
/// attached it. `upload_id` is a weak reference: deleting the upload does not
/// retract the attachment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileAttachment {
    pub upload_id: Option<Uuid>,
    pub file_name: String,
    pub mime_type: Option<String>,
    pub size: Option<i64>,
    pub download_route: Option<String>,
    pub extracted_text: Option<String>,
}

/// The full text of a file that was inlined into a prompt, persisted with the
/// tutor message so the exchange can be re-rendered later.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredFileContent {
    pub filename: String,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// One message inside a chat. Ordering is by server-assigned `timestamp`
/// ascending; a tutor message records the user message it answers in
/// `replies_to`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub message: String,
    pub sender: Sender,
    pub chapter: String,
    pub bookmarked: bool,
    pub timestamp: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
    pub replies_to: Option<Uuid>,
    pub file_attachments: Vec<FileAttachment>,
    pub structured_file_content: Vec<StructuredFileContent>,
}

/// The caller-supplied part of a message; ids and timestamps are assigned by
/// the store on insert.
#[derive(Debug, Clone)]
pub struct MessageDraft {
    pub message: String,
    pub sender: Sender,
    pub chapter: String,
    pub replies_to: Option<Uuid>,
    pub file_attachments: Vec<FileAttachment>,
    pub structured_file_content: Vec<StructuredFileContent>,
}

impl MessageDraft {
    /// A plain text message with no attachments.
    pub fn text(message: impl Into<String>, sender: Sender, chapter: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            sender,
            chapter: chapter.into(),
            replies_to: None,
            file_attachments: Vec::new(),
            structured_file_content: Vec::new(),
        }
    }
}

/// A saved reference to a specific message with a snippet of its content.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bookmark {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub linked_message_id: Uuid,
    pub snippet: String,
    #[serde(rename = "type")]
    pub kind: Sender,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct BookmarkDraft {
    pub linked_message_id: Uuid,
    pub snippet: String,
    pub kind: Sender,
}

/// A stored file plus its extracted text and metadata. `extracted_text` is the
/// truncated indexed copy; the full text lives in the user's context entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Upload {
    pub id: Uuid,
    pub file_name: String,
    pub file_type: String,
    pub file_size: i64,
    pub extracted_text: String,
    pub chapter: Option<String>,
    pub uploaded_at: DateTime<Utc>,
    pub file_url: String,
}

#[derive(Debug, Clone)]
pub struct UploadDraft {
    pub file_name: String,
    pub file_type: String,
    pub file_size: i64,
    pub extracted_text: String,
    pub chapter: Option<String>,
}

/// A flattened, denormalized record of one question/answer pair, independent
/// of the chat tree. Both id and time are supplied by the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: String,
    pub time: String,
    pub chapter: String,
    pub user: String,
    pub ai_tutor: String,
}
