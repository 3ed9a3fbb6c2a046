//! Ollama chat backend over the local HTTP API.

use super::{BackendError, DialogueBackend};
use crate::history::{ChatRole, ConversationHistory};
use crate::log_debug;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const READY_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    stream: bool,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: WireReply,
}

#[derive(Deserialize)]
struct WireReply {
    content: String,
}

pub struct OllamaBackend {
    client: reqwest::blocking::Client,
    base_url: String,
    model: String,
}

impl OllamaBackend {
    pub fn new(base_url: &str, model: &str, timeout: Duration) -> Result<Self, BackendError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| BackendError::Unavailable(format!("HTTP client setup: {err}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

fn wire_role(role: ChatRole) -> &'static str {
    match role {
        ChatRole::User => "user",
        ChatRole::Assistant => "assistant",
    }
}

fn build_messages<'a>(
    system_prompt: &'a str,
    history: &'a ConversationHistory,
    user_text: &'a str,
) -> Vec<WireMessage<'a>> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    if !system_prompt.is_empty() {
        messages.push(WireMessage {
            role: "system",
            content: system_prompt,
        });
    }
    for turn in history.turns() {
        messages.push(WireMessage {
            role: wire_role(turn.role),
            content: &turn.text,
        });
    }
    messages.push(WireMessage {
        role: "user",
        content: user_text,
    });
    messages
}

impl DialogueBackend for OllamaBackend {
    fn name(&self) -> &str {
        "ollama"
    }

    fn check_ready(&self) -> Result<(), BackendError> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .client
            .get(&url)
            .timeout(READY_TIMEOUT)
            .send()
            .map_err(|err| BackendError::Unavailable(format!("cannot reach {url}: {err}")))?;
        if !response.status().is_success() {
            return Err(BackendError::Unavailable(format!(
                "{url} returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    fn chat(
        &self,
        system_prompt: &str,
        history: &ConversationHistory,
        user_text: &str,
    ) -> Result<String, BackendError> {
        let request = ChatRequest {
            model: &self.model,
            messages: build_messages(system_prompt, history, user_text),
            stream: false,
        };
        let url = format!("{}/api/chat", self.base_url);
        log_debug(&format!(
            "ollama chat: model={} messages={}",
            self.model,
            request.messages.len()
        ));

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .map_err(|err| BackendError::Unavailable(format!("chat request failed: {err}")))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(BackendError::Response(format!(
                "{url} returned {status}: {}",
                body.chars().take(200).collect::<String>()
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .map_err(|err| BackendError::Response(format!("malformed chat response: {err}")))?;
        let reply = parsed.message.content.trim().to_string();
        if reply.is_empty() {
            return Err(BackendError::Response("empty reply from model".to_string()));
        }
        Ok(reply)
    }
}
