//! services/api/src/adapters/ocr_llm.rs
//!
//! This module contains the adapter for text recognition over page images.
//! It implements the `OcrService` port from the `core` crate by sending the
//! image to a vision-capable chat model as a base64 `data:` URL.

use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessageContentPartImageArgs,
        ChatCompletionRequestMessageContentPartTextArgs, ChatCompletionRequestUserMessageArgs,
        ChatCompletionRequestUserMessageContentPart, CreateChatCompletionRequestArgs, ImageDetail,
        ImageUrlArgs,
    },
    error::OpenAIError,
    Client,
};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use tutor_core::ports::{OcrMode, OcrService, PortError, PortResult};

const DOCUMENT_INSTRUCTION: &str = "Transcribe all text visible in this image, in natural \
reading order. Output only the transcribed text, with no commentary. If the image contains \
no readable text, output nothing.";

const FRAGMENTS_INSTRUCTION: &str = "Transcribe every fragment of text visible in this image, \
including scattered labels, captions, stamps and handwriting. Output only the transcribed \
text, one fragment per line, with no commentary. If the image contains no readable text, \
output nothing.";

const MAX_PAGE_TOKENS: u32 = 4096;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `OcrService` using a vision-capable LLM.
#[derive(Clone)]
pub struct OpenAiOcrAdapter {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiOcrAdapter {
    /// Creates a new `OpenAiOcrAdapter`.
    pub fn new(client: Client<OpenAIConfig>, model: String) -> Self {
        Self { client, model }
    }
}

//=========================================================================================
// `OcrService` Trait Implementation
//=========================================================================================

#[async_trait]
impl OcrService for OpenAiOcrAdapter {
    async fn recognize(&self, image: &[u8], mime_type: &str, mode: OcrMode) -> PortResult<String> {
        let instruction = match mode {
            OcrMode::Document => DOCUMENT_INSTRUCTION,
            OcrMode::Fragments => FRAGMENTS_INSTRUCTION,
        };

        let data_url = format!(
            "data:{};base64,{}",
            mime_type,
            general_purpose::STANDARD.encode(image)
        );

        let parts: Vec<ChatCompletionRequestUserMessageContentPart> = vec![
            ChatCompletionRequestMessageContentPartTextArgs::default()
                .text(instruction)
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
            ChatCompletionRequestMessageContentPartImageArgs::default()
                .image_url(
                    ImageUrlArgs::default()
                        .url(data_url)
                        .detail(ImageDetail::High)
                        .build()
                        .map_err(|e| PortError::Unexpected(e.to_string()))?,
                )
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
        ];

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(vec![ChatCompletionRequestUserMessageArgs::default()
                .content(parts)
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into()])
            .max_tokens(MAX_PAGE_TOKENS)
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e: OpenAIError| PortError::Unexpected(e.to_string()))?;

        let text = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .unwrap_or_default();

        Ok(text.trim().to_string())
    }
}
