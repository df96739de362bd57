//! services/api/src/web/turn_task.rs
//!
//! The worker logic for a single chat turn: assemble the context, call the
//! generation service, persist both messages, refresh the chat metadata and
//! auto-rename the chat after its first exchange. Also hosts the
//! edit-and-regenerate flow, which swaps a user message and its reply.

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use tutor_core::domain::{FileAttachment, MessageDraft, Sender, StructuredFileContent};
use tutor_core::ports::PortResult;
use tutor_core::prompt::{
    self, AttachedFileRef, DOCUMENT_CONTEXT_LIMIT, FRESH_RESPONSE_INSTRUCTION,
};
use uuid::Uuid;

use crate::web::state::AppState;

/// Messages in a chat right after its first exchange is stored.
const FIRST_EXCHANGE_COUNT: usize = 2;
/// How many leading words of the opening message become the chat name.
const NAME_WORD_COUNT: usize = 4;

pub struct TurnRequest {
    pub user_id: String,
    pub chat_id: Option<Uuid>,
    pub message: String,
    pub chapter: String,
    pub attached_files: Vec<AttachedFileRef>,
}

pub struct TurnOutcome {
    pub chat_id: Uuid,
    pub reply: String,
    pub chapter: String,
    pub user_message_id: Uuid,
    pub tutor_message_id: Uuid,
    pub structured_file_content: Vec<StructuredFileContent>,
    pub chat_renamed: bool,
    pub new_chat_name: Option<String>,
    pub timestamp: DateTime<Utc>,
}

pub struct RegenerateOutcome {
    pub reply: String,
    pub tutor_message_id: Uuid,
    pub timestamp: DateTime<Utc>,
}

/// Runs one full chat turn. Creates the chat first when the caller did not
/// name one.
pub async fn process_turn(state: &AppState, request: TurnRequest) -> PortResult<TurnOutcome> {
    let user_id = &request.user_id;

    let chat_id = match request.chat_id {
        Some(chat_id) => chat_id,
        None => state.store.create_chat(user_id, "New Chat").await?.id,
    };

    let context_entries = state.store.list_context_entries(user_id).await?;
    let latest_document = state.store.latest_document_text(user_id).await?;

    let augmentation = prompt::augment_user_message(
        &request.message,
        &request.attached_files,
        &context_entries,
        latest_document.as_deref(),
        DOCUMENT_CONTEXT_LIMIT,
    );

    let chapter_notes = context_entries
        .iter()
        .find(|(name, _)| *name == request.chapter)
        .map(|(_, text)| text.as_str());
    let mut system_instruction = prompt::system_instruction(
        &augmentation.augmented_prompt,
        !request.attached_files.is_empty(),
        chapter_notes,
    );
    if !request.chapter.is_empty() {
        system_instruction.push_str(&format!("\n\nChapter: {}", request.chapter));
    }

    let prior_messages = state.store.list_messages(user_id, chat_id).await?;
    let history_lines = prompt::linearize_history(&prior_messages);
    let conversation = prompt::conversation_prompt(&history_lines, &augmentation.augmented_prompt);

    info!("Prompt length: {}", conversation.len());
    let reply = state
        .tutor
        .generate_reply(&system_instruction, &conversation)
        .await?;

    // The stored user message keeps its original text; inlined context stays
    // out of the transcript.
    let file_attachments = if request.attached_files.is_empty() {
        Vec::new()
    } else {
        enrich_attachments(state, user_id, &request.attached_files).await?
    };

    let user_message = state
        .store
        .append_message(
            user_id,
            chat_id,
            MessageDraft {
                message: request.message.clone(),
                sender: Sender::User,
                chapter: request.chapter.clone(),
                replies_to: None,
                file_attachments,
                structured_file_content: Vec::new(),
            },
        )
        .await?;

    let tutor_message = state
        .store
        .append_message(
            user_id,
            chat_id,
            MessageDraft {
                message: reply.clone(),
                sender: Sender::Tutor,
                chapter: request.chapter.clone(),
                replies_to: Some(user_message.id),
                file_attachments: Vec::new(),
                structured_file_content: augmentation.structured_file_content.clone(),
            },
        )
        .await?;

    state.store.touch_chat(user_id, chat_id).await?;

    // Auto-rename exactly once, when the first exchange lands.
    let mut chat_renamed = false;
    let mut new_chat_name = None;
    let stored = state.store.list_messages(user_id, chat_id).await?;
    if stored.len() == FIRST_EXCHANGE_COUNT {
        if let Some(name) = derive_chat_name(&request.message) {
            match state.store.rename_chat(user_id, chat_id, &name).await {
                Ok(()) => {
                    chat_renamed = true;
                    new_chat_name = Some(name);
                }
                Err(e) => warn!("Auto-rename failed for chat {}: {}", chat_id, e),
            }
        }
    }

    Ok(TurnOutcome {
        chat_id,
        reply,
        chapter: request.chapter,
        user_message_id: user_message.id,
        tutor_message_id: tutor_message.id,
        structured_file_content: augmentation.structured_file_content,
        chat_renamed,
        new_chat_name,
        timestamp: tutor_message.timestamp,
    })
}

/// Replaces an edited user message's reply: updates the text, deletes the old
/// reply (located via its `replies_to` link), and regenerates with the
/// reduced-context policy.
pub async fn regenerate_turn(
    state: &AppState,
    user_id: &str,
    chat_id: Uuid,
    user_message_id: Uuid,
    new_message: &str,
) -> PortResult<RegenerateOutcome> {
    state
        .store
        .update_message_text(user_id, chat_id, user_message_id, new_message)
        .await?;

    let messages = state.store.list_messages(user_id, chat_id).await?;
    let old_reply = messages
        .iter()
        .find(|m| m.sender == Sender::Tutor && m.replies_to == Some(user_message_id));
    match old_reply {
        Some(reply) => {
            if let Err(e) = state.store.delete_message(user_id, chat_id, reply.id).await {
                warn!(
                    "Could not delete old assistant message for user message {}: {}",
                    user_message_id, e
                );
            }
        }
        None => info!(
            "No assistant message found after user message {}",
            user_message_id
        ),
    }

    let context_entries = state.store.list_context_entries(user_id).await?;
    let latest_document = state.store.latest_document_text(user_id).await?;
    let regeneration =
        prompt::regeneration_context(new_message, &context_entries, latest_document.as_deref());

    let (system_instruction, full_prompt) = match regeneration {
        Some(context) => {
            let full_prompt = format!("{}{}", new_message, context);
            (prompt::system_instruction(&full_prompt, true, None), full_prompt)
        }
        None => (
            FRESH_RESPONSE_INSTRUCTION.to_string(),
            new_message.to_string(),
        ),
    };

    let remaining = state.store.list_messages(user_id, chat_id).await?;
    let history_lines = prompt::linearize_history(&remaining);
    let conversation = prompt::conversation_prompt(&history_lines, &full_prompt);

    let reply = state
        .tutor
        .generate_reply(&system_instruction, &conversation)
        .await?;

    let tutor_message = state
        .store
        .append_message(
            user_id,
            chat_id,
            MessageDraft {
                message: reply.clone(),
                sender: Sender::Tutor,
                chapter: String::new(),
                replies_to: Some(user_message_id),
                file_attachments: Vec::new(),
                structured_file_content: Vec::new(),
            },
        )
        .await?;

    state.store.touch_chat(user_id, chat_id).await?;

    Ok(RegenerateOutcome {
        reply,
        tutor_message_id: tutor_message.id,
        timestamp: tutor_message.timestamp,
    })
}

/// Replaces caller-supplied attachment stubs with the matching upload's
/// metadata (matched by file name); unmatched names are kept as-is.
async fn enrich_attachments(
    state: &AppState,
    user_id: &str,
    attached_files: &[AttachedFileRef],
) -> PortResult<Vec<FileAttachment>> {
    let uploads = state.store.list_uploads(user_id).await?;
    let mut enriched = Vec::with_capacity(attached_files.len());
    for file in attached_files {
        match uploads.iter().find(|u| u.file_name == file.name) {
            Some(upload) => enriched.push(FileAttachment {
                upload_id: Some(upload.id),
                file_name: upload.file_name.clone(),
                mime_type: Some(upload.file_type.clone()),
                size: Some(upload.file_size),
                download_route: Some(format!("/api/files/{}", upload.id)),
                extracted_text: Some(upload.extracted_text.clone()),
            }),
            None => {
                warn!("No matching upload found for file: {}", file.name);
                enriched.push(FileAttachment {
                    upload_id: None,
                    file_name: file.name.clone(),
                    mime_type: None,
                    size: None,
                    download_route: None,
                    extracted_text: None,
                });
            }
        }
    }
    Ok(enriched)
}

/// Derives a chat name from the opening message: its first four
/// whitespace-separated words, title-cased. Empty input yields `None`.
fn derive_chat_name(message: &str) -> Option<String> {
    let words: Vec<String> = message
        .split_whitespace()
        .take(NAME_WORD_COUNT)
        .map(title_case_word)
        .collect();
    if words.is_empty() {
        None
    } else {
        Some(words.join(" "))
    }
}

fn title_case_word(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
        None => String::new(),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::adapters::MemoryStore;
    use crate::config::Config;
    use crate::files::FileVault;
    use crate::web::state::AppState;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};
    use tutor_core::ports::{OcrMode, OcrService, PortError, TutorService};

    /// A `TutorService` double that returns a fixed reply and records every
    /// (system instruction, prompt) pair it was called with.
    pub(crate) struct RecordingTutor {
        pub reply: String,
        pub calls: Mutex<Vec<(String, String)>>,
    }

    impl RecordingTutor {
        pub fn replying(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl TutorService for RecordingTutor {
        async fn generate_reply(&self, system: &str, prompt: &str) -> PortResult<String> {
            self.calls
                .lock()
                .map_err(|_| PortError::Unexpected("lock poisoned".into()))?
                .push((system.to_string(), prompt.to_string()));
            Ok(self.reply.clone())
        }
    }

    pub(crate) struct NoopOcr;

    #[async_trait]
    impl OcrService for NoopOcr {
        async fn recognize(&self, _: &[u8], _: &str, _: OcrMode) -> PortResult<String> {
            Ok(String::new())
        }
    }

    pub(crate) fn test_state_with(tutor: Arc<RecordingTutor>) -> AppState {
        let config = Config {
            bind_address: "127.0.0.1:0".parse().unwrap(),
            database_url: None,
            log_level: tracing::Level::INFO,
            uploads_dir: std::env::temp_dir().join(format!("tutor-test-{}", Uuid::new_v4())),
            openai_api_key: None,
            tutor_model: "test-model".to_string(),
            ocr_model: "test-model".to_string(),
            public_base_url: None,
        };
        AppState {
            store: Arc::new(MemoryStore::new()),
            tutor,
            ocr: Arc::new(NoopOcr),
            vault: FileVault::new(config.uploads_dir.clone()),
            config: Arc::new(config),
        }
    }

    pub(crate) fn test_state() -> AppState {
        test_state_with(Arc::new(RecordingTutor::replying("A contract needs offer and acceptance.")))
    }

    fn turn(message: &str, chat_id: Option<Uuid>) -> TurnRequest {
        TurnRequest {
            user_id: "student".to_string(),
            chat_id,
            message: message.to_string(),
            chapter: String::new(),
            attached_files: Vec::new(),
        }
    }

    #[tokio::test]
    async fn first_turn_creates_chat_and_renames_it_once() {
        let tutor = Arc::new(RecordingTutor::replying("An offer becomes binding on acceptance."));
        let state = test_state_with(tutor);

        let first = process_turn(&state, turn("Explain offer and acceptance", None))
            .await
            .unwrap();
        assert!(!first.reply.is_empty());
        assert!(first.chat_renamed);
        assert_eq!(first.new_chat_name.as_deref(), Some("Explain Offer And Acceptance"));

        let messages = state
            .store
            .list_messages("student", first.chat_id)
            .await
            .unwrap();
        assert_eq!(messages.len(), 2);

        // Second exchange: no further renames, count grows to 4.
        let second = process_turn(&state, turn("And what about consideration?", Some(first.chat_id)))
            .await
            .unwrap();
        assert!(!second.chat_renamed);
        let messages = state
            .store
            .list_messages("student", first.chat_id)
            .await
            .unwrap();
        assert_eq!(messages.len(), 4);

        let chat = state.store.get_chat("student", first.chat_id).await.unwrap();
        assert_eq!(chat.chat_name, "Explain Offer And Acceptance");
    }

    #[tokio::test]
    async fn tutor_message_links_back_to_user_message() {
        let state = test_state();
        let outcome = process_turn(&state, turn("What is consideration?", None))
            .await
            .unwrap();

        let messages = state
            .store
            .list_messages("student", outcome.chat_id)
            .await
            .unwrap();
        assert_eq!(messages[0].sender, Sender::User);
        assert_eq!(messages[1].sender, Sender::Tutor);
        assert_eq!(messages[1].replies_to, Some(messages[0].id));
    }

    #[tokio::test]
    async fn stored_document_text_stays_out_without_trigger_keywords() {
        let tutor = Arc::new(RecordingTutor::replying("ok"));
        let state = test_state_with(tutor.clone());
        state
            .store
            .set_latest_document_text("student", "previously extracted syllabus text")
            .await
            .unwrap();

        process_turn(&state, turn("What is consideration?", None))
            .await
            .unwrap();

        let calls = tutor.calls.lock().unwrap();
        let (_, prompt) = &calls[0];
        assert_eq!(prompt, "User: What is consideration?\nAI:");
    }

    #[tokio::test]
    async fn prior_turns_are_replayed_into_the_prompt() {
        let tutor = Arc::new(RecordingTutor::replying("reply"));
        let state = test_state_with(tutor.clone());

        let first = process_turn(&state, turn("First question", None)).await.unwrap();
        process_turn(&state, turn("Second question", Some(first.chat_id)))
            .await
            .unwrap();

        let calls = tutor.calls.lock().unwrap();
        let (_, prompt) = &calls[1];
        assert!(prompt.starts_with("Previous conversation:\nUser: First question\nAI: reply"));
        assert!(prompt.ends_with("User: Second question\nAI:"));
    }

    #[tokio::test]
    async fn regenerate_swaps_exactly_one_reply() {
        let state = test_state();
        let outcome = process_turn(&state, turn("Explain breach of contract", None))
            .await
            .unwrap();

        let regenerated = regenerate_turn(
            &state,
            "student",
            outcome.chat_id,
            outcome.user_message_id,
            "Explain remedies for breach instead",
        )
        .await
        .unwrap();

        let messages = state
            .store
            .list_messages("student", outcome.chat_id)
            .await
            .unwrap();
        // Total count unchanged: the edited user message plus one fresh reply.
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].message, "Explain remedies for breach instead");
        assert!(messages[0].edited_at.is_some());
        assert_eq!(messages[1].id, regenerated.tutor_message_id);
        assert_eq!(messages[1].replies_to, Some(outcome.user_message_id));
        assert_ne!(messages[1].id, outcome.tutor_message_id);
    }

    #[tokio::test]
    async fn regenerate_without_context_uses_fresh_instruction() {
        let tutor = Arc::new(RecordingTutor::replying("fresh"));
        let state = test_state_with(tutor.clone());
        state
            .store
            .set_latest_document_text("student", "stale syllabus")
            .await
            .unwrap();

        let outcome = process_turn(&state, turn("Define a tort", None)).await.unwrap();
        regenerate_turn(
            &state,
            "student",
            outcome.chat_id,
            outcome.user_message_id,
            "Define negligence",
        )
        .await
        .unwrap();

        let calls = tutor.calls.lock().unwrap();
        let (system, prompt) = &calls[1];
        assert_eq!(system, FRESH_RESPONSE_INSTRUCTION);
        assert!(!prompt.contains("stale syllabus"));
    }

    #[test]
    fn chat_name_derivation() {
        assert_eq!(
            derive_chat_name("what are the essential elements of a contract"),
            Some("What Are The Essential".to_string())
        );
        assert_eq!(derive_chat_name("IPR"), Some("Ipr".to_string()));
        assert_eq!(derive_chat_name("   "), None);
    }
}
