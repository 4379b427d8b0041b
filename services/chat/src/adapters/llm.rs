//! services/chat/src/adapters/llm.rs
//!
//! This module contains the adapter for the chat language model.
//! It implements the `LanguageModelService` port from the `core` crate.

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs, ResponseFormat,
    },
    Client,
};
use async_trait::async_trait;
use carechat_core::ports::{ChatTurn, LanguageModelService, PortError, PortResult};
use futures::StreamExt;
use serde_json::Value;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `LanguageModelService` using an
/// OpenAI-compatible chat completion API.
#[derive(Clone)]
pub struct OpenAiChatAdapter {
    client: Client<OpenAIConfig>,
    model: String,
    json_model: String,
}

impl OpenAiChatAdapter {
    /// Creates a new `OpenAiChatAdapter`.
    pub fn new(client: Client<OpenAIConfig>, model: String, json_model: String) -> Self {
        Self {
            client,
            model,
            json_model,
        }
    }

    fn build_messages(
        system_prompt: &str,
        prior_turns: &[ChatTurn],
        user_turn: &str,
    ) -> PortResult<Vec<ChatCompletionRequestMessage>> {
        let mut messages: Vec<ChatCompletionRequestMessage> = Vec::with_capacity(prior_turns.len() + 2);

        messages.push(
            ChatCompletionRequestSystemMessageArgs::default()
                .content(system_prompt)
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
        );

        for turn in prior_turns {
            let message = if turn.from_user {
                ChatCompletionRequestUserMessageArgs::default()
                    .content(turn.text.clone())
                    .build()
                    .map_err(|e| PortError::Unexpected(e.to_string()))?
                    .into()
            } else {
                ChatCompletionRequestAssistantMessageArgs::default()
                    .content(turn.text.clone())
                    .build()
                    .map_err(|e| PortError::Unexpected(e.to_string()))?
                    .into()
            };
            messages.push(message);
        }

        messages.push(
            ChatCompletionRequestUserMessageArgs::default()
                .content(user_turn)
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
        );

        Ok(messages)
    }
}

//=========================================================================================
// `LanguageModelService` Trait Implementation
//=========================================================================================

#[async_trait]
impl LanguageModelService for OpenAiChatAdapter {
    async fn complete(
        &self,
        system_prompt: &str,
        prior_turns: &[ChatTurn],
        user_turn: &str,
    ) -> PortResult<String> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(Self::build_messages(system_prompt, prior_turns, user_turn)?)
            .max_tokens(150u32)
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e: OpenAIError| PortError::Unexpected(e.to_string()))?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| PortError::Unexpected("No valid response from AI".to_string()))
    }

    async fn complete_streaming(
        &self,
        system_prompt: &str,
        prior_turns: &[ChatTurn],
        user_turn: &str,
        mut on_chunk: Box<dyn for<'a> FnMut(&'a str) + Send>,
    ) -> PortResult<String> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(Self::build_messages(system_prompt, prior_turns, user_turn)?)
            .stream(true)
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let mut stream = self
            .client
            .chat()
            .create_stream(request)
            .await
            .map_err(|e: OpenAIError| PortError::Unexpected(e.to_string()))?;

        let mut full_text = String::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e: OpenAIError| PortError::Unexpected(e.to_string()))?;
            for choice in chunk.choices {
                if let Some(delta) = choice.delta.content {
                    on_chunk(&delta);
                    full_text.push_str(&delta);
                }
            }
        }

        Ok(full_text)
    }

    async fn complete_json(
        &self,
        system_prompt: &str,
        prior_turns: &[ChatTurn],
        user_turn: &str,
    ) -> PortResult<Value> {
        let system_prompt = format!("{system_prompt} Always respond in valid JSON format.");
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.json_model)
            .messages(Self::build_messages(&system_prompt, prior_turns, user_turn)?)
            .response_format(ResponseFormat::JsonObject)
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e: OpenAIError| PortError::Unexpected(e.to_string()))?;

        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| PortError::Unexpected("No valid response from AI".to_string()))?;

        serde_json::from_str(&content)
            .map_err(|e| PortError::Unexpected(format!("AI returned invalid JSON: {e}")))
    }
}
