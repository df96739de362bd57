//! crates/tutor_core/src/prompt.rs
//!
//! Context assembly for the generation prompt: decides which auxiliary text
//! (attached file content, previously extracted document text, chapter notes,
//! prior turns) gets inlined, and selects the system instruction.
//!
//! Everything here is pure: callers read session/store state and pass it in.

use regex::Regex;

use crate::domain::{ChatMessage, Sender, StructuredFileContent};

/// Words that make a message count as referencing uploaded files.
pub const FILE_REFERENCE_KEYWORDS: &[&str] = &[
    "pdf", "document", "file", "uploaded", "attached", "content", "text", "syllabus",
];

/// Words that make a message count as referencing chapter material.
pub const CHAPTER_REFERENCE_KEYWORDS: &[&str] = &["chapter", "section", "topic"];

const ESSAY_TRIGGERS: &[&str] = &["essay", "structured", "report"];
const DETAIL_TRIGGERS: &[&str] = &["elaborate", "explain", "detailed", "expand"];

/// How much of a stored document/chapter text is inlined into a fresh turn.
pub const DOCUMENT_CONTEXT_LIMIT: usize = 4000;
/// Reduced inline budget used during edit-and-regenerate.
pub const REGENERATE_CONTEXT_LIMIT: usize = 2000;
/// How many prior messages are replayed into the prompt.
pub const HISTORY_WINDOW: usize = 20;

/// System instruction used by edit-and-regenerate when no context keys match.
pub const FRESH_RESPONSE_INSTRUCTION: &str = "You are a helpful AI tutor for Business Law. \
Provide clear, accurate, and helpful responses to the user's questions. \
Focus on the specific question asked without referencing external documents unless explicitly mentioned. \
Give fresh, original responses based on your knowledge.";

/// An attachment reference as sent by the client: a name and a loose type tag.
#[derive(Debug, Clone)]
pub struct AttachedFileRef {
    pub name: String,
    pub kind: String,
}

/// The result of augmenting one user message.
#[derive(Debug, Clone)]
pub struct Augmentation {
    pub augmented_prompt: String,
    pub structured_file_content: Vec<StructuredFileContent>,
}

fn mentions_any(message_lower: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|k| message_lower.contains(k))
}

/// Truncates to at most `limit` characters (not bytes), keeping char boundaries.
pub fn truncate_chars(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Builds the augmented prompt for a fresh turn.
///
/// Attached files whose names have stored content are inlined as delimited
/// blocks. Stored document text is inlined only when files are attached or the
/// message references files; stored chapter texts are inlined only when the
/// message references chapters AND names the entry. Without those triggers the
/// prompt is exactly the raw message, even if uploads exist.
pub fn augment_user_message(
    user_message: &str,
    attached_files: &[AttachedFileRef],
    context_entries: &[(String, String)],
    latest_document_text: Option<&str>,
    limit: usize,
) -> Augmentation {
    let message_lower = user_message.to_lowercase();
    let mut structured_file_content = Vec::new();

    let mut file_context = String::new();
    if !attached_files.is_empty() {
        file_context.push_str("\n\n=== ATTACHED FILES CONTENT ===\n");
        for file in attached_files {
            if let Some((name, content)) =
                context_entries.iter().find(|(name, _)| *name == file.name)
            {
                file_context.push_str(&format!(
                    "\nFILE: {}\nCONTENT:\n{}\nEND OF FILE\n",
                    name, content
                ));
                structured_file_content.push(StructuredFileContent {
                    filename: name.clone(),
                    content: content.clone(),
                    kind: file.kind.clone(),
                });
            }
        }
        file_context.push_str("\n=== END OF ATTACHED FILES ===\n");
    }

    let mut global_context = String::new();
    let has_file_references = mentions_any(&message_lower, FILE_REFERENCE_KEYWORDS);
    if !attached_files.is_empty() || has_file_references {
        if let Some(text) = latest_document_text.filter(|t| !t.is_empty()) {
            global_context.push_str("\n\n=== PDF CONTEXT ===\n");
            global_context.push_str(truncate_chars(text, limit));
            global_context.push_str("\n=== END OF PDF CONTEXT ===\n");
        }
    }

    if mentions_any(&message_lower, CHAPTER_REFERENCE_KEYWORDS) {
        for (name, content) in context_entries {
            if message_lower.contains(&name.to_lowercase()) {
                global_context.push_str(&format!("\n\n=== CHAPTER: {} ===\n", name));
                global_context.push_str(truncate_chars(content, limit));
                global_context.push_str(&format!("\n=== END OF CHAPTER: {} ===\n", name));
            }
        }
    }

    let mut augmented_prompt = user_message.to_string();
    if !structured_file_content.is_empty() {
        augmented_prompt.push_str(&file_context);
    }
    if !global_context.is_empty() {
        augmented_prompt.push_str("\n\n");
        augmented_prompt.push_str(&global_context);
    }

    Augmentation {
        augmented_prompt,
        structured_file_content,
    }
}

/// Builds the reduced context for edit-and-regenerate.
///
/// Returns `None` when neither the file-keyword gate nor the chapter scan
/// matches, which tells the caller to regenerate from a clean instruction
/// instead of re-attaching stale document text.
pub fn regeneration_context(
    new_message: &str,
    context_entries: &[(String, String)],
    latest_document_text: Option<&str>,
) -> Option<String> {
    let message_lower = new_message.to_lowercase();
    let mut context = String::new();

    if mentions_any(&message_lower, FILE_REFERENCE_KEYWORDS) {
        if let Some(text) = latest_document_text.filter(|t| !t.is_empty()) {
            context.push_str("\n\n=== PDF CONTEXT ===\n");
            context.push_str(truncate_chars(text, REGENERATE_CONTEXT_LIMIT));
            context.push_str("\n=== END OF PDF CONTEXT ===\n");
        }
    }

    for (name, content) in context_entries {
        if message_lower.contains(&name.to_lowercase()) {
            context.push_str(&format!("\n\n=== CHAPTER: {} ===\n", name));
            context.push_str(truncate_chars(content, REGENERATE_CONTEXT_LIMIT));
            context.push_str(&format!("\n=== END OF CHAPTER: {} ===\n", name));
        }
    }

    if context.is_empty() {
        None
    } else {
        Some(context)
    }
}

/// Selects the persona template for a turn and appends chapter notes.
///
/// `message_text` is the full (already augmented) prompt, since trigger words
/// inside attached content are allowed to switch the persona too.
pub fn system_instruction(
    message_text: &str,
    has_attached_files: bool,
    chapter_notes: Option<&str>,
) -> String {
    let mut base = String::from(
        "You are a professional Business Law tutor. \
         By default, give concise, student-friendly answers in 2-3 sentences. \
         Use simple language and clear examples.",
    );

    if has_attached_files {
        base.push_str(
            "\n\nIMPORTANT: The user has attached files. Read and analyze them carefully. \
             Reference specific content from the files when answering.",
        );
    }

    let msg_lower = message_text.to_lowercase();
    let word_limit = Regex::new(r"(\d+)\s*words?")
        .unwrap()
        .captures(&msg_lower)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<u32>().ok());

    if mentions_any(&msg_lower, ESSAY_TRIGGERS) {
        base = String::from(
            "You are a professional Business Law tutor. \
             Write a well-structured essay with: Introduction, Key Points, \
             Analysis with examples, and Conclusion.",
        );
    } else if mentions_any(&msg_lower, DETAIL_TRIGGERS) {
        base = String::from(
            "You are a professional Business Law tutor. \
             Give a detailed, clear explanation with examples.",
        );
    }

    if let Some(limit) = word_limit {
        base.push_str(&format!(" Ensure the response is around {} words.", limit));
    }

    if let Some(notes) = chapter_notes {
        return format!("{}\n\nChapter context:\n{}", base, notes);
    }

    base
}

/// Linearizes the most recent prior messages as alternating `User:`/`AI:` lines.
pub fn linearize_history(messages: &[ChatMessage]) -> Vec<String> {
    let start = messages.len().saturating_sub(HISTORY_WINDOW);
    messages[start..]
        .iter()
        .map(|msg| match msg.sender {
            Sender::User => format!("User: {}", msg.message),
            Sender::Tutor => format!("AI: {}", msg.message),
        })
        .collect()
}

/// Composes the final prompt: replayed conversation, then the new user turn.
pub fn conversation_prompt(history_lines: &[String], user_prompt: &str) -> String {
    let mut prompt = String::new();
    if !history_lines.is_empty() {
        prompt.push_str("Previous conversation:\n");
        prompt.push_str(&history_lines.join("\n"));
        prompt.push_str("\n\n");
    }
    prompt.push_str(&format!("User: {}\nAI:", user_prompt));
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn message(sender: Sender, text: &str) -> ChatMessage {
        ChatMessage {
            id: Uuid::new_v4(),
            chat_id: Uuid::new_v4(),
            message: text.to_string(),
            sender,
            chapter: String::new(),
            bookmarked: false,
            timestamp: Utc::now(),
            edited_at: None,
            replies_to: None,
            file_attachments: Vec::new(),
            structured_file_content: Vec::new(),
        }
    }

    #[test]
    fn no_triggers_yields_raw_message() {
        let entries = vec![("notes.pdf".to_string(), "stored text".to_string())];
        let result = augment_user_message(
            "What is consideration?",
            &[],
            &entries,
            Some("a previously uploaded syllabus"),
            DOCUMENT_CONTEXT_LIMIT,
        );
        assert_eq!(result.augmented_prompt, "What is consideration?");
        assert!(result.structured_file_content.is_empty());
    }

    #[test]
    fn attached_file_with_stored_content_is_inlined() {
        let entries = vec![("contract.pdf".to_string(), "Offer and acceptance.".to_string())];
        let attached = vec![AttachedFileRef {
            name: "contract.pdf".to_string(),
            kind: "pdf".to_string(),
        }];
        let result = augment_user_message(
            "Summarize this",
            &attached,
            &entries,
            None,
            DOCUMENT_CONTEXT_LIMIT,
        );
        assert!(result.augmented_prompt.contains("FILE: contract.pdf"));
        assert!(result.augmented_prompt.contains("Offer and acceptance."));
        assert_eq!(result.structured_file_content.len(), 1);
        assert_eq!(result.structured_file_content[0].kind, "pdf");
    }

    #[test]
    fn attached_file_without_stored_content_is_skipped() {
        let attached = vec![AttachedFileRef {
            name: "missing.pdf".to_string(),
            kind: "pdf".to_string(),
        }];
        let result =
            augment_user_message("Summarize this", &attached, &[], None, DOCUMENT_CONTEXT_LIMIT);
        assert!(result.structured_file_content.is_empty());
        assert!(!result.augmented_prompt.contains("ATTACHED FILES"));
    }

    #[test]
    fn file_keyword_pulls_in_latest_document() {
        let result = augment_user_message(
            "What does the uploaded pdf say?",
            &[],
            &[],
            Some("The syllabus covers five chapters."),
            DOCUMENT_CONTEXT_LIMIT,
        );
        assert!(result.augmented_prompt.contains("=== PDF CONTEXT ==="));
        assert!(result
            .augmented_prompt
            .contains("The syllabus covers five chapters."));
    }

    #[test]
    fn chapter_scan_requires_keyword_and_name_match() {
        let entries = vec![
            ("Winding Up".to_string(), "Modes of winding up.".to_string()),
            ("Contracts".to_string(), "Essentials of contracts.".to_string()),
        ];
        let result = augment_user_message(
            "Tell me about the chapter on winding up",
            &[],
            &entries,
            None,
            DOCUMENT_CONTEXT_LIMIT,
        );
        assert!(result.augmented_prompt.contains("=== CHAPTER: Winding Up ==="));
        assert!(!result.augmented_prompt.contains("Essentials of contracts."));

        // Same entry names without a chapter keyword: nothing is inlined.
        let quiet = augment_user_message(
            "Explain winding up briefly",
            &[],
            &entries,
            None,
            DOCUMENT_CONTEXT_LIMIT,
        );
        assert!(!quiet.augmented_prompt.contains("=== CHAPTER"));
    }

    #[test]
    fn inlined_document_text_is_capped() {
        let long_text = "x".repeat(DOCUMENT_CONTEXT_LIMIT + 500);
        let result = augment_user_message(
            "summarize the document",
            &[],
            &[],
            Some(&long_text),
            DOCUMENT_CONTEXT_LIMIT,
        );
        let inlined: String = result
            .augmented_prompt
            .chars()
            .filter(|c| *c == 'x')
            .collect();
        assert_eq!(inlined.len(), DOCUMENT_CONTEXT_LIMIT);
    }

    #[test]
    fn regeneration_context_is_none_without_triggers() {
        let entries = vec![("Contracts".to_string(), "Essentials.".to_string())];
        assert!(regeneration_context("What is a tort?", &entries, Some("doc")).is_none());
        // A matching entry name alone is enough for the regenerate scan.
        assert!(regeneration_context("More on contracts please", &entries, None).is_some());
    }

    #[test]
    fn persona_selection_follows_triggers() {
        let concise = system_instruction("What is consideration?", false, None);
        assert!(concise.contains("2-3 sentences"));

        let essay = system_instruction("Write an essay on IPR", false, None);
        assert!(essay.contains("well-structured essay"));

        let detailed = system_instruction("Please elaborate on quorum", false, None);
        assert!(detailed.contains("detailed, clear explanation"));
    }

    #[test]
    fn essay_trigger_overrides_attachment_addendum() {
        let instruction = system_instruction("Write an essay on IPR", true, None);
        assert!(!instruction.contains("attached files"));
    }

    #[test]
    fn word_target_is_appended() {
        let instruction = system_instruction("Explain offer in 200 words", false, None);
        assert!(instruction.contains("around 200 words"));
    }

    #[test]
    fn chapter_notes_are_appended() {
        let instruction = system_instruction("What is a contract?", false, Some("Key sections."));
        assert!(instruction.ends_with("Chapter context:\nKey sections."));
    }

    #[test]
    fn history_is_windowed_and_linearized() {
        let mut messages = Vec::new();
        for i in 0..15 {
            messages.push(message(Sender::User, &format!("q{}", i)));
            messages.push(message(Sender::Tutor, &format!("a{}", i)));
        }
        let lines = linearize_history(&messages);
        assert_eq!(lines.len(), HISTORY_WINDOW);
        assert_eq!(lines[0], "User: q5");
        assert_eq!(lines[19], "AI: a14");
    }

    #[test]
    fn conversation_prompt_shapes_turn() {
        let lines = vec!["User: hi".to_string(), "AI: hello".to_string()];
        let prompt = conversation_prompt(&lines, "next question");
        assert!(prompt.starts_with("Previous conversation:\nUser: hi\nAI: hello\n\n"));
        assert!(prompt.ends_with("User: next question\nAI:"));

        let bare = conversation_prompt(&[], "solo");
        assert_eq!(bare, "User: solo\nAI:");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("ab", 10), "ab");
    }
}
