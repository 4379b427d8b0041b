//! services/chat/src/adapters/tts.rs
//!
//! This module contains the adapter for the Text-to-Speech service.
//! It implements the `SpeechSynthesisService` port from the `core` crate.
//! Each persona carries its own voice identity; the dispatch pipeline is
//! responsible for the single retry with the default voice on failure.

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::audio::{CreateSpeechRequest, SpeechModel, Voice},
    Client,
};
use async_trait::async_trait;
use carechat_core::ports::{PortError, PortResult, SpeechSynthesisService};

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements the `SpeechSynthesisService` port using the
/// OpenAI TTS API.
#[derive(Clone)]
pub struct OpenAiTtsAdapter {
    client: Client<OpenAIConfig>,
    model: SpeechModel,
}

impl OpenAiTtsAdapter {
    /// Creates a new `OpenAiTtsAdapter`.
    pub fn new(client: Client<OpenAIConfig>, model: SpeechModel) -> Self {
        Self { client, model }
    }

    /// Maps a persona voice identity to a provider voice. Unknown
    /// identities fall back to the default voice.
    fn map_voice(voice: &str) -> Voice {
        match voice.to_lowercase().as_str() {
            "alloy" => Voice::Alloy,
            "echo" => Voice::Echo,
            "fable" => Voice::Fable,
            "onyx" => Voice::Onyx,
            "nova" => Voice::Nova,
            "shimmer" => Voice::Shimmer,
            _ => Voice::Alloy,
        }
    }
}

//=========================================================================================
// `SpeechSynthesisService` Trait Implementation
//=========================================================================================

#[async_trait]
impl SpeechSynthesisService for OpenAiTtsAdapter {
    /// Generates a vector of audio data (`Vec<u8>`) from the given text.
    async fn synthesize(&self, text: &str, voice: &str) -> PortResult<Vec<u8>> {
        if text.is_empty() {
            return Err(PortError::Unexpected(
                "No text provided for audio generation".to_string(),
            ));
        }

        let request = CreateSpeechRequest {
            model: self.model.clone(),
            input: text.to_string(),
            voice: Self::map_voice(voice),
            ..Default::default()
        };

        // Call the API and manually map the error, which respects the orphan rule.
        let response = self
            .client
            .audio()
            .speech()
            .create(request)
            .await
            .map_err(|e: OpenAIError| PortError::Unexpected(e.to_string()))?;

        Ok(response.bytes.to_vec())
    }
}
