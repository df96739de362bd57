//! services/api/src/web/uploads.rs
//!
//! File uploads: text extraction, metadata persistence, on-disk blob storage,
//! serving by stable id, and deletion.

use std::sync::Arc;

use axum::extract::{Multipart, Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Json, Response};
use serde_json::{json, Value};
use tracing::{error, info};
use tutor_core::domain::UploadDraft;
use tutor_core::prompt::truncate_chars;
use uuid::Uuid;

use crate::config::MAX_UPLOAD_BYTES;
use crate::extract::{self, FileKind};
use crate::web::state::AppState;
use crate::web::{Failure, UserQuery, WebResult};

/// Characters of extracted text kept on the indexed upload record; the full
/// text is cached as a context entry for prompt augmentation.
const INDEXED_TEXT_CHARS: usize = 1000;

/// Strips any path components a client smuggled into the file name.
fn sanitize_filename(name: &str) -> String {
    name.rsplit(['/', '\\'])
        .next()
        .unwrap_or(name)
        .trim()
        .to_string()
}

//=========================================================================================
// Handlers
//=========================================================================================

/// Upload a document or image, extract its text and store both.
#[utoipa::path(
    post,
    path = "/api/upload",
    request_body(content_type = "multipart/form-data", description = "The file to upload plus an optional chapter field."),
    params(("user_uid" = Option<String>, Query, description = "User identifier")),
    responses(
        (status = 200, description = "File stored with best-effort extracted text"),
        (status = 400, description = "Missing file or unsupported type"),
        (status = 413, description = "File exceeds the 16MB limit")
    )
)]
pub async fn upload_handler(
    State(state): State<Arc<AppState>>,
    Query(user): Query<UserQuery>,
    mut multipart: Multipart,
) -> WebResult<Json<Value>> {
    let mut file: Option<(String, Option<String>, Vec<u8>)> = None;
    let mut chapter = String::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Failure::bad_request(format!("Failed to read multipart data: {}", e)))?
    {
        match field.name() {
            Some("file") => {
                let file_name = sanitize_filename(field.file_name().unwrap_or_default());
                let content_type = field.content_type().map(|c| c.to_string());
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| Failure::bad_request(format!("Failed to read file bytes: {}", e)))?;
                file = Some((file_name, content_type, bytes.to_vec()));
            }
            Some("chapter") => {
                chapter = field
                    .text()
                    .await
                    .map_err(|e| Failure::bad_request(format!("Failed to read chapter field: {}", e)))?
                    .trim()
                    .to_string();
            }
            _ => {}
        }
    }

    let Some((file_name, content_type, bytes)) = file else {
        return Err(Failure::bad_request("No file provided"));
    };
    if file_name.is_empty() {
        return Err(Failure::bad_request("No file selected"));
    }
    if bytes.len() > MAX_UPLOAD_BYTES {
        return Err(Failure::payload_too_large(format!(
            "File too large. Max size is {}MB",
            MAX_UPLOAD_BYTES / (1024 * 1024)
        )));
    }
    let Some(kind) = extract::classify_extension(&file_name) else {
        return Err(Failure::bad_request("Unsupported file type"));
    };

    info!("Extracting text from upload: {}", file_name);
    let extracted_text =
        extract::extract_text(&bytes, kind, &file_name, state.ocr.as_ref()).await;

    // Cache the full text for prompt augmentation, keyed by file name and,
    // when given, by chapter.
    let user_id = user.user_id();
    state
        .store
        .put_context_entry(&user_id, &file_name, &extracted_text)
        .await?;
    state
        .store
        .set_latest_document_text(&user_id, &extracted_text)
        .await?;
    if !chapter.is_empty() {
        state
            .store
            .put_context_entry(&user_id, &chapter, &extracted_text)
            .await?;
    }

    let indexed_text = if extracted_text.chars().count() > INDEXED_TEXT_CHARS {
        format!("{}...", truncate_chars(&extracted_text, INDEXED_TEXT_CHARS))
    } else {
        extracted_text.clone()
    };

    let extension = extract::file_extension(&file_name).unwrap_or_default();
    let upload = state
        .store
        .save_upload(
            &user_id,
            UploadDraft {
                file_name: file_name.clone(),
                file_type: content_type.unwrap_or_else(|| format!("application/{}", extension)),
                file_size: bytes.len() as i64,
                extracted_text: indexed_text,
                chapter: (!chapter.is_empty()).then(|| chapter.clone()),
            },
        )
        .await?;

    if let Err(e) = state.vault.store(upload.id, &file_name, &bytes).await {
        error!("Failed to save file to disk for upload {}: {}", upload.id, e);
    }

    Ok(Json(json!({
        "success": true,
        "filename": file_name,
        "chapter": (!chapter.is_empty()).then_some(chapter),
        "content_length": extracted_text.chars().count(),
        "upload_id": upload.id,
        "file_type": match kind {
            FileKind::Pdf => "pdf",
            FileKind::Image => "image",
        },
        "file_size": bytes.len(),
    })))
}

/// List the user's uploads, newest first.
pub async fn list_uploads_handler(
    State(state): State<Arc<AppState>>,
    Query(user): Query<UserQuery>,
) -> WebResult<Json<Value>> {
    let uploads = state.store.list_uploads(&user.user_id()).await?;
    Ok(Json(json!({
        "uploads": uploads,
        "total": uploads.len(),
    })))
}

/// Stream a stored file back by its stable id.
pub async fn serve_file_handler(
    State(state): State<Arc<AppState>>,
    Query(user): Query<UserQuery>,
    Path(upload_id): Path<Uuid>,
) -> WebResult<Response> {
    let upload = state.store.get_upload(&user.user_id(), upload_id).await?;

    let bytes = match state.vault.read(upload_id, &upload.file_name).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Failure::not_found("File not found on disk"));
        }
        Err(e) => {
            error!("Failed to read blob for upload {}: {}", upload_id, e);
            return Err(Failure::internal("Failed to serve file"));
        }
    };

    Ok((
        [
            (header::CONTENT_TYPE, upload.file_type.clone()),
            (
                header::CONTENT_DISPOSITION,
                format!("inline; filename=\"{}\"", upload.file_name),
            ),
        ],
        bytes,
    )
        .into_response())
}

/// Delete an upload's metadata and blob. An already-missing blob is fine.
pub async fn delete_upload_handler(
    State(state): State<Arc<AppState>>,
    Query(user): Query<UserQuery>,
    Path(upload_id): Path<Uuid>,
) -> WebResult<Json<Value>> {
    let user_id = user.user_id();
    let upload = state.store.get_upload(&user_id, upload_id).await?;
    state.store.delete_upload(&user_id, upload_id).await?;

    if let Err(e) = state.vault.remove(upload_id, &upload.file_name).await {
        error!("Failed to delete blob for upload {}: {}", upload_id, e);
    }
    info!("Deleted upload {} for user {}", upload_id, user_id);

    Ok(Json(json!({ "success": true })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::web::turn_task::tests::test_state;

    async fn stored_upload(state: &AppState, payload: &[u8]) -> Uuid {
        let upload = state
            .store
            .save_upload(
                "u1",
                UploadDraft {
                    file_name: "contract.pdf".to_string(),
                    file_type: "application/pdf".to_string(),
                    file_size: payload.len() as i64,
                    extracted_text: "text".to_string(),
                    chapter: None,
                },
            )
            .await
            .unwrap();
        state.vault.ensure_root().await.unwrap();
        state
            .vault
            .store(upload.id, "contract.pdf", payload)
            .await
            .unwrap();
        upload.id
    }

    fn as_user(uid: &str) -> Query<UserQuery> {
        Query(UserQuery {
            user_uid: Some(uid.to_string()),
        })
    }

    #[tokio::test]
    async fn serve_returns_identical_bytes_and_filename() {
        let state = Arc::new(test_state());
        let payload = b"%PDF-1.4 original bytes";
        let upload_id = stored_upload(&state, payload).await;

        let response = serve_file_handler(State(state), as_user("u1"), Path(upload_id))
            .await
            .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_DISPOSITION).unwrap(),
            "inline; filename=\"contract.pdf\""
        );

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], payload);
    }

    #[tokio::test]
    async fn serve_unknown_id_is_not_found() {
        let state = Arc::new(test_state());
        let err = serve_file_handler(State(state), as_user("u1"), Path(Uuid::new_v4()))
            .await
            .unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn delete_removes_metadata_and_tolerates_missing_blob() {
        let state = Arc::new(test_state());
        let upload_id = stored_upload(&state, b"bytes").await;
        // Blob already gone: deletion still succeeds.
        state.vault.remove(upload_id, "contract.pdf").await.unwrap();

        delete_upload_handler(State(state.clone()), as_user("u1"), Path(upload_id))
            .await
            .unwrap();
        assert!(state.store.list_uploads("u1").await.unwrap().is_empty());
    }

    #[test]
    fn filenames_are_sanitized() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\temp\\scan.png"), "scan.png");
        assert_eq!(sanitize_filename("notes.pdf"), "notes.pdf");
    }
}
