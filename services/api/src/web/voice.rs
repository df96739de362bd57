//! services/api/src/web/voice.rs
//!
//! Audio upload endpoint. Transcription is intentionally disabled in this
//! deployment; the route validates the upload and returns a fixed
//! unavailable-message response.

use axum::extract::Multipart;
use axum::response::Json;
use chrono::Utc;
use serde_json::{json, Value};
use tracing::info;

use crate::config::MAX_AUDIO_BYTES;
use crate::extract::file_extension;
use crate::web::{Failure, WebResult};

const ALLOWED_AUDIO_EXTENSIONS: &[&str] = &["mp3", "mp4", "mpeg", "mpga", "m4a", "wav", "webm"];

const TRANSCRIPTION_UNAVAILABLE: &str =
    "Audio transcription is currently unavailable. Please type your question instead.";

fn allowed_audio_file(filename: &str) -> bool {
    file_extension(filename)
        .map(|ext| ALLOWED_AUDIO_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Accept an audio upload and report that transcription is unavailable.
pub async fn transcribe_handler(mut multipart: Multipart) -> WebResult<Json<Value>> {
    let mut audio: Option<(String, usize)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Failure::bad_request(format!("Failed to read multipart data: {}", e)))?
    {
        if field.name() == Some("audio") {
            let filename = field.file_name().unwrap_or_default().to_string();
            let bytes = field
                .bytes()
                .await
                .map_err(|e| Failure::bad_request(format!("Failed to read audio bytes: {}", e)))?;
            audio = Some((filename, bytes.len()));
        }
    }

    let Some((filename, file_size)) = audio else {
        return Err(Failure::bad_request("No audio file provided"));
    };
    if filename.is_empty() {
        return Err(Failure::bad_request("No audio file selected"));
    }
    if !allowed_audio_file(&filename) {
        return Err(Failure::bad_request(format!(
            "Unsupported audio format. Supported formats: {}",
            ALLOWED_AUDIO_EXTENSIONS.join(", ")
        )));
    }
    if file_size > MAX_AUDIO_BYTES {
        return Err(Failure::payload_too_large(format!(
            "Audio file too large. Maximum size is {}MB",
            MAX_AUDIO_BYTES / (1024 * 1024)
        )));
    }

    info!("Audio transcription requested for file: {}", filename);

    Ok(Json(json!({
        "success": false,
        "transcription": TRANSCRIPTION_UNAVAILABLE,
        "filename": filename,
        "file_size": file_size,
        "timestamp": Utc::now(),
    })))
}

/// Report whether the transcription service is available.
pub async fn status_handler() -> Json<Value> {
    Json(json!({
        "available": false,
        "message": "Audio transcription is currently unavailable",
        "supported_formats": ALLOWED_AUDIO_EXTENSIONS,
        "max_file_size_mb": MAX_AUDIO_BYTES / (1024 * 1024),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_extension_allowlist() {
        assert!(allowed_audio_file("question.wav"));
        assert!(allowed_audio_file("memo.M4A"));
        assert!(!allowed_audio_file("notes.pdf"));
        assert!(!allowed_audio_file("no-extension"));
    }
}
