//! services/api/src/web/chat.rs
//!
//! Handlers for submitting chat turns, the edit-and-regenerate flow, and the
//! chapter catalogue with its suggested questions.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;
use tutor_core::domain::StructuredFileContent;
use tutor_core::prompt::AttachedFileRef;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::web::state::AppState;
use crate::web::turn_task::{self, TurnRequest};
use crate::web::{Failure, UserQuery, WebResult};

/// The fixed chapter catalogue shown in the sidebar.
pub const BUSINESS_LAW_CHAPTERS: &[&str] = &[
    "INDIAN CONTRACT ACT",
    "SALE OF GOODS ACT AND CONSUMER PROTECTION ACT",
    "INTELLECTUAL PROPERTY RIGHTS",
    "MANAGEMENT OF COMPANIES AND MEETINGS",
    "WINDING UP",
];

/// Suggestions shown when no chapter is selected.
const DEFAULT_SUGGESTIONS: &[&str] = &[
    "What is business law and why is it important?",
    "What are the essential elements of a valid contract?",
    "What are the different types of contracts?",
    "What is the Sale of Goods Act?",
    "What are intellectual property rights?",
    "How are companies managed and wound up?",
];

fn chapter_questions(chapter: &str) -> Option<&'static [&'static str]> {
    match chapter {
        "INDIAN CONTRACT ACT" => Some(&[
            "What are the essential elements of a valid contract?",
            "What is the difference between agreement and contract?",
            "How does offer and acceptance work in contract formation?",
            "What is consideration and why is it important?",
            "What are the different types of contracts?",
            "What are the modes of discharge of a contract?",
            "What happens when a contract is breached?",
            "What remedies are available for breach of contract?",
        ]),
        "SALE OF GOODS ACT AND CONSUMER PROTECTION ACT" => Some(&[
            "What are the essentials of a valid sale contract?",
            "What's the difference between sale and agreement to sell?",
            "What are conditions and warranties in sale of goods?",
            "What is caveat emptor and its exceptions?",
            "What are the rights of an unpaid seller?",
            "Who is a consumer under Consumer Protection Act?",
            "What are consumer dispute redressal agencies?",
            "What are the rights of consumers under the law?",
        ]),
        "INTELLECTUAL PROPERTY RIGHTS" => Some(&[
            "What is a trademark and how is it registered?",
            "What are the different types of patents?",
            "What rights does a patentee have?",
            "What is copyright and how long does it last?",
            "What constitutes copyright infringement?",
            "What are trade secrets and how are they protected?",
            "What are geographical indications?",
            "How can intellectual property rights be transferred?",
        ]),
        "MANAGEMENT OF COMPANIES AND MEETINGS" => Some(&[
            "What are the qualifications and disqualifications of directors?",
            "What are the duties and liabilities of directors?",
            "How are directors appointed and removed?",
            "What is corporate governance?",
            "What is corporate social responsibility?",
            "What are the different types of company meetings?",
            "What is the importance of quorum in meetings?",
            "What are the different types of resolutions?",
        ]),
        "WINDING UP" => Some(&[
            "What are the different modes of winding up?",
            "What is voluntary winding up?",
            "What is compulsory winding up?",
            "What are the consequences of winding up?",
            "How is a company removed from Registrar of Companies?",
            "What is the Insolvency and Bankruptcy Code 2016?",
            "What happens to company assets during winding up?",
            "What are the rights of creditors during winding up?",
        ]),
        _ => None,
    }
}

//=========================================================================================
// Request / Response Payloads
//=========================================================================================

fn default_attachment_kind() -> String {
    "text".to_string()
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AttachedFileBody {
    pub name: String,
    #[serde(rename = "type", default = "default_attachment_kind")]
    pub kind: String,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChatTurnBody {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub chapter: String,
    #[serde(default)]
    pub chat_id: Option<Uuid>,
    #[serde(default)]
    pub attached_files: Vec<AttachedFileBody>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChatTurnResponse {
    pub reply: String,
    pub timestamp: DateTime<Utc>,
    pub chapter: String,
    pub chat_id: Uuid,
    pub user_message_id: Uuid,
    pub ai_message_id: Uuid,
    #[schema(value_type = Vec<Object>)]
    pub structured_file_content: Vec<StructuredFileContent>,
    pub chat_renamed: bool,
    pub new_chat_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditRegenerateBody {
    pub user_message_id: Option<Uuid>,
    #[serde(default)]
    pub new_message: String,
    pub chat_id: Option<Uuid>,
}

//=========================================================================================
// Handlers
//=========================================================================================

/// Submit a user turn and receive the tutor's reply.
///
/// Creates a new chat when `chatId` is absent; the response then carries the
/// generated id.
#[utoipa::path(
    post,
    path = "/api/chat",
    request_body = ChatTurnBody,
    params(("user_uid" = Option<String>, Query, description = "User identifier")),
    responses(
        (status = 200, description = "Tutor reply generated", body = ChatTurnResponse),
        (status = 400, description = "Message is required"),
        (status = 500, description = "Generation or persistence failed")
    )
)]
pub async fn chat_handler(
    State(state): State<Arc<AppState>>,
    Query(user): Query<UserQuery>,
    Json(body): Json<ChatTurnBody>,
) -> WebResult<Json<ChatTurnResponse>> {
    let message = body.message.trim().to_string();
    if message.is_empty() {
        return Err(Failure::bad_request("Message is required"));
    }

    let request = TurnRequest {
        user_id: user.user_id(),
        chat_id: body.chat_id,
        message,
        chapter: body.chapter.trim().to_string(),
        attached_files: body
            .attached_files
            .into_iter()
            .map(|f| AttachedFileRef {
                name: f.name,
                kind: f.kind,
            })
            .collect(),
    };

    let outcome = turn_task::process_turn(&state, request).await?;

    Ok(Json(ChatTurnResponse {
        reply: outcome.reply,
        timestamp: outcome.timestamp,
        chapter: outcome.chapter,
        chat_id: outcome.chat_id,
        user_message_id: outcome.user_message_id,
        ai_message_id: outcome.tutor_message_id,
        structured_file_content: outcome.structured_file_content,
        chat_renamed: outcome.chat_renamed,
        new_chat_name: outcome.new_chat_name,
    }))
}

/// Replace a prior user turn, drop its old reply and generate a fresh one.
pub async fn edit_regenerate_handler(
    State(state): State<Arc<AppState>>,
    Query(user): Query<UserQuery>,
    Json(body): Json<EditRegenerateBody>,
) -> WebResult<Json<Value>> {
    let new_message = body.new_message.trim().to_string();
    let (Some(user_message_id), Some(chat_id)) = (body.user_message_id, body.chat_id) else {
        return Err(Failure::bad_request("Missing required parameters"));
    };
    if new_message.is_empty() {
        return Err(Failure::bad_request("Missing required parameters"));
    }

    let outcome = turn_task::regenerate_turn(
        &state,
        &user.user_id(),
        chat_id,
        user_message_id,
        &new_message,
    )
    .await?;

    Ok(Json(json!({
        "reply": outcome.reply,
        "timestamp": outcome.timestamp,
        "aiMessageId": outcome.tutor_message_id,
        "success": true,
    })))
}

/// List the chapter catalogue and the user's active chapter.
pub async fn list_chapters_handler(
    State(state): State<Arc<AppState>>,
    Query(user): Query<UserQuery>,
) -> WebResult<Json<Value>> {
    let active = state
        .store
        .active_chapter(&user.user_id())
        .await?
        .unwrap_or_default();
    Ok(Json(json!({
        "chapters": BUSINESS_LAW_CHAPTERS,
        "activeChapter": active,
    })))
}

/// Set the active chapter and return its suggested questions.
pub async fn set_active_chapter_handler(
    State(state): State<Arc<AppState>>,
    Query(user): Query<UserQuery>,
    Path(chapter_name): Path<String>,
) -> WebResult<Json<Value>> {
    state
        .store
        .set_active_chapter(&user.user_id(), &chapter_name)
        .await?;
    info!("Active chapter set to '{}'", chapter_name);

    let suggested = chapter_questions(&chapter_name).unwrap_or(DEFAULT_SUGGESTIONS);
    Ok(Json(json!({
        "success": true,
        "activeChapter": chapter_name,
        "suggestedQuestions": suggested,
    })))
}
