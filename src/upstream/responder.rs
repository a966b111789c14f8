//! Reply generation via a chat-completion API

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::Responder;
use crate::conversation::{Role, Turn};
use crate::{Error, Result};

const COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Fixed system preamble for every reply
pub const SYSTEM_PREAMBLE: &str = "You are a helpful voice assistant. Keep replies short and \
     conversational; they will be read aloud to the user.";

/// Canned reply used when no responder is configured or a reply must be
/// substituted
pub const FALLBACK_REPLY: &str =
    "I'm sorry, I'm having trouble thinking of a response right now.";

const MAX_REPLY_TOKENS: u32 = 256;

/// Input to one reply generation
#[derive(Debug, Clone)]
pub struct Prompt {
    /// Recent conversation window, oldest first
    pub history: Vec<Turn>,
    /// The user text being answered
    pub user_text: String,
}

#[derive(Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

/// Chat-completion reply backend
pub struct ChatResponder {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl ChatResponder {
    /// Create the backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the API key is missing.
    pub fn new(api_key: String, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "OpenAI API key required for reply generation".to_string(),
            ));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
        })
    }

    fn build_messages(prompt: &Prompt) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(prompt.history.len() + 2);
        messages.push(ChatMessage {
            role: "system",
            content: SYSTEM_PREAMBLE.to_string(),
        });
        for turn in &prompt.history {
            messages.push(ChatMessage {
                role: match turn.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                },
                content: turn.content.clone(),
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: prompt.user_text.clone(),
        });
        messages
    }
}

#[async_trait]
impl Responder for ChatResponder {
    async fn respond(&self, prompt: &Prompt) -> Result<String> {
        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages: Self::build_messages(prompt),
            max_tokens: Some(MAX_REPLY_TOKENS),
        };

        tracing::debug!(
            model = %self.model,
            history_turns = prompt.history.len(),
            "requesting reply"
        );

        let response = self
            .client
            .post(COMPLETIONS_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "reply request failed");
            return Err(Error::Responder(format!("completion error {status}: {body}")));
        }

        let completion: ChatCompletionResponse = response.json().await?;
        let text = completion
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| Error::Responder("completion returned no content".to_string()))?;

        tracing::info!(chars = text.len(), "reply generated");
        Ok(text)
    }
}
