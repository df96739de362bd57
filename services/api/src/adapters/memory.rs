//! services/api/src/adapters/memory.rs
//!
//! An in-process implementation of the `ChatStore` port. Used when no
//! `DATABASE_URL` is configured (the service then runs without durable
//! persistence, matching the degraded mode described in the configuration
//! docs) and by the test suites.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use tutor_core::domain::{
    Bookmark, BookmarkDraft, Chat, ChatMessage, HistoryEntry, MessageDraft, Upload, UploadDraft,
};
use tutor_core::ports::{ChatStore, PortError, PortResult};
use uuid::Uuid;

struct ChatSpace {
    chat: Chat,
    messages: Vec<ChatMessage>,
    bookmarks: Vec<Bookmark>,
}

#[derive(Default)]
struct UserSpace {
    chats: HashMap<Uuid, ChatSpace>,
    uploads: Vec<Upload>,
    context_entries: Vec<(String, String)>,
    latest_document_text: Option<String>,
    active_chapter: Option<String>,
    history_entries: Vec<HistoryEntry>,
}

/// A `ChatStore` holding everything in a process-wide map. Non-durable.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<HashMap<String, UserSpace>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> PortResult<MutexGuard<'_, HashMap<String, UserSpace>>> {
        self.inner
            .lock()
            .map_err(|_| PortError::Unexpected("memory store lock poisoned".to_string()))
    }
}

fn chat_space<'a>(
    spaces: &'a mut HashMap<String, UserSpace>,
    user_id: &str,
    chat_id: Uuid,
) -> PortResult<&'a mut ChatSpace> {
    spaces
        .entry(user_id.to_string())
        .or_default()
        .chats
        .get_mut(&chat_id)
        .ok_or_else(|| PortError::NotFound(format!("Chat {} not found", chat_id)))
}

#[async_trait]
impl ChatStore for MemoryStore {
    async fn create_chat(&self, user_id: &str, chat_name: &str) -> PortResult<Chat> {
        let mut spaces = self.guard()?;
        let now = Utc::now();
        let chat = Chat {
            id: Uuid::new_v4(),
            chat_name: chat_name.to_string(),
            created_at: now,
            last_updated: now,
        };
        spaces.entry(user_id.to_string()).or_default().chats.insert(
            chat.id,
            ChatSpace {
                chat: chat.clone(),
                messages: Vec::new(),
                bookmarks: Vec::new(),
            },
        );
        Ok(chat)
    }

    async fn get_chat(&self, user_id: &str, chat_id: Uuid) -> PortResult<Chat> {
        let mut spaces = self.guard()?;
        Ok(chat_space(&mut spaces, user_id, chat_id)?.chat.clone())
    }

    async fn list_chats(&self, user_id: &str) -> PortResult<Vec<Chat>> {
        let spaces = self.guard()?;
        let mut chats: Vec<Chat> = spaces
            .get(user_id)
            .map(|space| space.chats.values().map(|c| c.chat.clone()).collect())
            .unwrap_or_default();
        chats.sort_by(|a, b| b.last_updated.cmp(&a.last_updated));
        Ok(chats)
    }

    async fn chat_exists(&self, user_id: &str, chat_id: Uuid) -> PortResult<bool> {
        let spaces = self.guard()?;
        Ok(spaces
            .get(user_id)
            .map(|space| space.chats.contains_key(&chat_id))
            .unwrap_or(false))
    }

    async fn rename_chat(&self, user_id: &str, chat_id: Uuid, new_name: &str) -> PortResult<()> {
        let mut spaces = self.guard()?;
        let space = chat_space(&mut spaces, user_id, chat_id)?;
        space.chat.chat_name = new_name.to_string();
        space.chat.last_updated = Utc::now();
        Ok(())
    }

    async fn touch_chat(&self, user_id: &str, chat_id: Uuid) -> PortResult<()> {
        let mut spaces = self.guard()?;
        chat_space(&mut spaces, user_id, chat_id)?.chat.last_updated = Utc::now();
        Ok(())
    }

    async fn delete_chat_record(&self, user_id: &str, chat_id: Uuid) -> PortResult<()> {
        let mut spaces = self.guard()?;
        spaces
            .entry(user_id.to_string())
            .or_default()
            .chats
            .remove(&chat_id);
        Ok(())
    }

    async fn append_message(
        &self,
        user_id: &str,
        chat_id: Uuid,
        draft: MessageDraft,
    ) -> PortResult<ChatMessage> {
        let mut spaces = self.guard()?;
        let space = chat_space(&mut spaces, user_id, chat_id)?;
        let message = ChatMessage {
            id: Uuid::new_v4(),
            chat_id,
            message: draft.message,
            sender: draft.sender,
            chapter: draft.chapter,
            bookmarked: false,
            timestamp: Utc::now(),
            edited_at: None,
            replies_to: draft.replies_to,
            file_attachments: draft.file_attachments,
            structured_file_content: draft.structured_file_content,
        };
        space.messages.push(message.clone());
        Ok(message)
    }

    async fn list_messages(&self, user_id: &str, chat_id: Uuid) -> PortResult<Vec<ChatMessage>> {
        let mut spaces = self.guard()?;
        let space = chat_space(&mut spaces, user_id, chat_id)?;
        let mut messages = space.messages.clone();
        messages.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(messages)
    }

    async fn update_message_text(
        &self,
        user_id: &str,
        chat_id: Uuid,
        message_id: Uuid,
        new_text: &str,
    ) -> PortResult<()> {
        let mut spaces = self.guard()?;
        let space = chat_space(&mut spaces, user_id, chat_id)?;
        let message = space
            .messages
            .iter_mut()
            .find(|m| m.id == message_id)
            .ok_or_else(|| PortError::NotFound(format!("Message {} not found", message_id)))?;
        message.message = new_text.to_string();
        message.edited_at = Some(Utc::now());
        Ok(())
    }

    async fn delete_message(
        &self,
        user_id: &str,
        chat_id: Uuid,
        message_id: Uuid,
    ) -> PortResult<()> {
        let mut spaces = self.guard()?;
        let space = chat_space(&mut spaces, user_id, chat_id)?;
        let before = space.messages.len();
        space.messages.retain(|m| m.id != message_id);
        if space.messages.len() == before {
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
        let mut spaces = self.guard()?;
        let space = chat_space(&mut spaces, user_id, chat_id)?;
        let message = space
            .messages
            .iter_mut()
            .find(|m| m.id == message_id)
            .ok_or_else(|| PortError::NotFound(format!("Message {} not found", message_id)))?;
        message.bookmarked = bookmarked;
        Ok(())
    }

    async fn find_message_chat(&self, user_id: &str, message_id: Uuid) -> PortResult<Option<Uuid>> {
        let spaces = self.guard()?;
        let Some(space) = spaces.get(user_id) else {
            return Ok(None);
        };
        for (chat_id, chat) in &space.chats {
            if chat.messages.iter().any(|m| m.id == message_id) {
                return Ok(Some(*chat_id));
            }
        }
        Ok(None)
    }

    async fn delete_chat_messages(&self, user_id: &str, chat_id: Uuid) -> PortResult<u64> {
        let mut spaces = self.guard()?;
        let space = chat_space(&mut spaces, user_id, chat_id)?;
        let deleted = space.messages.len() as u64;
        space.messages.clear();
        Ok(deleted)
    }

    async fn add_bookmark(
        &self,
        user_id: &str,
        chat_id: Uuid,
        draft: BookmarkDraft,
    ) -> PortResult<Bookmark> {
        let mut spaces = self.guard()?;
        let space = chat_space(&mut spaces, user_id, chat_id)?;
        let bookmark = Bookmark {
            id: Uuid::new_v4(),
            chat_id,
            linked_message_id: draft.linked_message_id,
            snippet: draft.snippet,
            kind: draft.kind,
            created_at: Utc::now(),
        };
        space.bookmarks.push(bookmark.clone());
        Ok(bookmark)
    }

    async fn list_chat_bookmarks(&self, user_id: &str, chat_id: Uuid) -> PortResult<Vec<Bookmark>> {
        let mut spaces = self.guard()?;
        let space = chat_space(&mut spaces, user_id, chat_id)?;
        let mut bookmarks = space.bookmarks.clone();
        bookmarks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(bookmarks)
    }

    async fn delete_bookmark(
        &self,
        user_id: &str,
        chat_id: Uuid,
        bookmark_id: Uuid,
    ) -> PortResult<()> {
        let mut spaces = self.guard()?;
        let space = chat_space(&mut spaces, user_id, chat_id)?;
        let before = space.bookmarks.len();
        space.bookmarks.retain(|b| b.id != bookmark_id);
        if space.bookmarks.len() == before {
            return Err(PortError::NotFound(format!(
                "Bookmark {} not found",
                bookmark_id
            )));
        }
        Ok(())
    }

    async fn delete_chat_bookmarks(&self, user_id: &str, chat_id: Uuid) -> PortResult<u64> {
        let mut spaces = self.guard()?;
        let space = chat_space(&mut spaces, user_id, chat_id)?;
        let deleted = space.bookmarks.len() as u64;
        space.bookmarks.clear();
        Ok(deleted)
    }

    async fn save_upload(&self, user_id: &str, draft: UploadDraft) -> PortResult<Upload> {
        let mut spaces = self.guard()?;
        let id = Uuid::new_v4();
        let upload = Upload {
            id,
            file_name: draft.file_name,
            file_type: draft.file_type,
            file_size: draft.file_size,
            extracted_text: draft.extracted_text,
            chapter: draft.chapter,
            uploaded_at: Utc::now(),
            file_url: format!("/api/files/{}", id),
        };
        spaces
            .entry(user_id.to_string())
            .or_default()
            .uploads
            .push(upload.clone());
        Ok(upload)
    }

    async fn list_uploads(&self, user_id: &str) -> PortResult<Vec<Upload>> {
        let spaces = self.guard()?;
        let mut uploads = spaces
            .get(user_id)
            .map(|space| space.uploads.clone())
            .unwrap_or_default();
        uploads.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
        Ok(uploads)
    }

    async fn get_upload(&self, user_id: &str, upload_id: Uuid) -> PortResult<Upload> {
        let spaces = self.guard()?;
        spaces
            .get(user_id)
            .and_then(|space| space.uploads.iter().find(|u| u.id == upload_id))
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Upload {} not found", upload_id)))
    }

    async fn delete_upload(&self, user_id: &str, upload_id: Uuid) -> PortResult<()> {
        let mut spaces = self.guard()?;
        let space = spaces.entry(user_id.to_string()).or_default();
        let before = space.uploads.len();
        space.uploads.retain(|u| u.id != upload_id);
        if space.uploads.len() == before {
            return Err(PortError::NotFound(format!(
                "Upload {} not found",
                upload_id
            )));
        }
        Ok(())
    }

    async fn put_context_entry(&self, user_id: &str, name: &str, text: &str) -> PortResult<()> {
        let mut spaces = self.guard()?;
        let entries = &mut spaces.entry(user_id.to_string()).or_default().context_entries;
        if let Some(entry) = entries.iter_mut().find(|(n, _)| n == name) {
            entry.1 = text.to_string();
        } else {
            entries.push((name.to_string(), text.to_string()));
        }
        Ok(())
    }

    async fn list_context_entries(&self, user_id: &str) -> PortResult<Vec<(String, String)>> {
        let spaces = self.guard()?;
        Ok(spaces
            .get(user_id)
            .map(|space| space.context_entries.clone())
            .unwrap_or_default())
    }

    async fn set_latest_document_text(&self, user_id: &str, text: &str) -> PortResult<()> {
        let mut spaces = self.guard()?;
        spaces.entry(user_id.to_string()).or_default().latest_document_text = Some(text.to_string());
        Ok(())
    }

    async fn latest_document_text(&self, user_id: &str) -> PortResult<Option<String>> {
        let spaces = self.guard()?;
        Ok(spaces
            .get(user_id)
            .and_then(|space| space.latest_document_text.clone()))
    }

    async fn set_active_chapter(&self, user_id: &str, chapter: &str) -> PortResult<()> {
        let mut spaces = self.guard()?;
        spaces.entry(user_id.to_string()).or_default().active_chapter = Some(chapter.to_string());
        Ok(())
    }

    async fn active_chapter(&self, user_id: &str) -> PortResult<Option<String>> {
        let spaces = self.guard()?;
        Ok(spaces
            .get(user_id)
            .and_then(|space| space.active_chapter.clone()))
    }

    async fn save_history_entry(&self, user_id: &str, entry: HistoryEntry) -> PortResult<()> {
        let mut spaces = self.guard()?;
        let entries = &mut spaces.entry(user_id.to_string()).or_default().history_entries;
        // Same-id saves replace the stored entry (upsert semantics).
        entries.retain(|e| e.id != entry.id);
        entries.push(entry);
        Ok(())
    }

    async fn list_history_entries(&self, user_id: &str) -> PortResult<Vec<HistoryEntry>> {
        let spaces = self.guard()?;
        let mut entries = spaces
            .get(user_id)
            .map(|space| space.history_entries.clone())
            .unwrap_or_default();
        entries.sort_by(|a, b| b.time.cmp(&a.time));
        Ok(entries)
    }

    async fn clear_history_entries(&self, user_id: &str) -> PortResult<u64> {
        let mut spaces = self.guard()?;
        let entries = &mut spaces.entry(user_id.to_string()).or_default().history_entries;
        let deleted = entries.len() as u64;
        entries.clear();
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tutor_core::domain::Sender;

    #[tokio::test]
    async fn chats_list_most_recent_first() {
        let store = MemoryStore::new();
        let first = store.create_chat("u1", "First").await.unwrap();
        let second = store.create_chat("u1", "Second").await.unwrap();
        store.touch_chat("u1", first.id).await.unwrap();

        let chats = store.list_chats("u1").await.unwrap();
        assert_eq!(chats.len(), 2);
        assert_eq!(chats[0].id, first.id);
        assert_eq!(chats[1].id, second.id);
    }

    #[tokio::test]
    async fn messages_keep_insertion_order() {
        let store = MemoryStore::new();
        let chat = store.create_chat("u1", "New Chat").await.unwrap();
        store
            .append_message("u1", chat.id, MessageDraft::text("q", Sender::User, ""))
            .await
            .unwrap();
        store
            .append_message("u1", chat.id, MessageDraft::text("a", Sender::Tutor, ""))
            .await
            .unwrap();

        let messages = store.list_messages("u1", chat.id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].sender, Sender::User);
        assert_eq!(messages[1].sender, Sender::Tutor);
    }

    #[tokio::test]
    async fn find_message_chat_scans_across_chats() {
        let store = MemoryStore::new();
        let a = store.create_chat("u1", "A").await.unwrap();
        let b = store.create_chat("u1", "B").await.unwrap();
        let msg = store
            .append_message("u1", b.id, MessageDraft::text("hi", Sender::User, ""))
            .await
            .unwrap();

        assert_eq!(
            store.find_message_chat("u1", msg.id).await.unwrap(),
            Some(b.id)
        );
        assert_eq!(
            store.find_message_chat("u1", Uuid::new_v4()).await.unwrap(),
            None
        );
        let _ = a;
    }

    #[tokio::test]
    async fn users_are_isolated() {
        let store = MemoryStore::new();
        store.create_chat("alice", "Hers").await.unwrap();
        assert!(store.list_chats("bob").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn context_entries_replace_by_name() {
        let store = MemoryStore::new();
        store.put_context_entry("u1", "notes.pdf", "v1").await.unwrap();
        store.put_context_entry("u1", "notes.pdf", "v2").await.unwrap();

        let entries = store.list_context_entries("u1").await.unwrap();
        assert_eq!(entries, vec![("notes.pdf".to_string(), "v2".to_string())]);
    }
}
