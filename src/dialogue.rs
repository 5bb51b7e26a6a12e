//! Dialogue engine adapter
//!
//! Turns recognized user text into the companion's reply. The built-in
//! [`ChatDialogue`] talks to an OpenAI-compatible chat completions endpoint
//! with a personality prompt and a short rolling history.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::DialogueConfig;
use crate::{Error, Result};

/// Exchanges (user + assistant message pairs) sent with each request
const HISTORY_EXCHANGES: usize = 6;

/// Reply from the dialogue engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialogueReply {
    pub reply_text: String,
    /// Emotion label suggested by the engine, if it gives one
    pub emotion_label: Option<String>,
}

impl DialogueReply {
    /// Reply without an emotion label
    #[must_use]
    pub fn text(reply_text: impl Into<String>) -> Self {
        Self {
            reply_text: reply_text.into(),
            emotion_label: None,
        }
    }

    /// Interpret model output
    ///
    /// A JSON object `{"reply": "...", "emotion": "happy"}` yields a labelled
    /// reply; anything else is taken as plain reply text.
    #[must_use]
    pub fn parse(content: &str) -> Self {
        #[derive(Deserialize)]
        struct Structured {
            reply: String,
            #[serde(default)]
            emotion: Option<String>,
        }

        let content = content.trim();
        if content.starts_with('{')
            && let Ok(structured) = serde_json::from_str::<Structured>(content)
            && !structured.reply.trim().is_empty()
        {
            return Self {
                reply_text: structured.reply.trim().to_string(),
                emotion_label: structured
                    .emotion
                    .map(|e| e.trim().to_lowercase())
                    .filter(|e| !e.is_empty()),
            };
        }

        Self::text(content)
    }
}

/// Something that produces a reply for user text
#[async_trait]
pub trait DialogueEngine: Send + Sync {
    /// Produce a reply
    ///
    /// # Errors
    ///
    /// Returns error on network, quota, or response failures
    async fn process(&self, text: &str) -> Result<DialogueReply>;
}

#[derive(Debug, Clone, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

impl ChatMessage {
    fn new(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: content.to_string(),
        }
    }
}

/// OpenAI-compatible chat completions dialogue
pub struct ChatDialogue {
    client: reqwest::Client,
    api_key: String,
    config: DialogueConfig,
    history: Mutex<VecDeque<ChatMessage>>,
}

impl ChatDialogue {
    /// Create a chat dialogue engine
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing or the HTTP client cannot be built
    pub fn new(api_key: String, config: DialogueConfig) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config("API key required for dialogue".to_string()));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_s))
            .build()?;

        Ok(Self {
            client,
            api_key,
            config,
            history: Mutex::new(VecDeque::with_capacity(HISTORY_EXCHANGES * 2)),
        })
    }

    fn messages_for(&self, text: &str) -> Vec<ChatMessage> {
        let history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::new("system", &self.config.system_prompt));
        messages.extend(history.iter().cloned());
        messages.push(ChatMessage::new("user", text));
        messages
    }

    fn remember(&self, user: &str, assistant: &str) {
        let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        history.push_back(ChatMessage::new("user", user));
        history.push_back(ChatMessage::new("assistant", assistant));
        while history.len() > HISTORY_EXCHANGES * 2 {
            history.pop_front();
        }
    }
}

#[async_trait]
impl DialogueEngine for ChatDialogue {
    async fn process(&self, text: &str) -> Result<DialogueReply> {
        #[derive(Serialize)]
        struct ChatRequest {
            model: String,
            messages: Vec<ChatMessage>,
            max_tokens: u32,
        }

        #[derive(Deserialize)]
        struct ChatResponse {
            choices: Vec<Choice>,
        }

        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMessage,
        }

        #[derive(Deserialize)]
        struct ChoiceMessage {
            content: Option<String>,
        }

        let request = ChatRequest {
            model: self.config.model.clone(),
            messages: self.messages_for(text),
            max_tokens: self.config.max_tokens,
        };

        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Dialogue(format!("chat request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Dialogue(format!("chat API error {status}: {body}")));
        }

        let chat_response: ChatResponse = response.json().await?;
        let content = chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .unwrap_or_default();

        if content.is_empty() {
            return Err(Error::Dialogue("empty reply".to_string()));
        }

        let reply = DialogueReply::parse(&content);
        self.remember(text, &reply.reply_text);
        tracing::debug!(
            model = %self.config.model,
            reply_len = reply.reply_text.len(),
            emotion = ?reply.emotion_label,
            "dialogue reply"
        );

        Ok(reply)
    }
}
