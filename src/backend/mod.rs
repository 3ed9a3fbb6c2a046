//! Dialogue backend interface.
//!
//! The turn controller talks to whatever produces replies through
//! `DialogueBackend`, so tests can swap in a scripted backend and the real
//! binary wires up the Ollama HTTP client.

mod ollama;

pub use ollama::OllamaBackend;

use crate::history::ConversationHistory;
use std::fmt;

/// Why a chat call failed. `Unavailable` covers the service being down or
/// unreachable; `Response` covers a reachable service returning garbage.
#[derive(Debug)]
pub enum BackendError {
    Unavailable(String),
    Response(String),
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::Unavailable(msg) => write!(f, "backend unavailable: {msg}"),
            BackendError::Response(msg) => write!(f, "backend response error: {msg}"),
        }
    }
}

impl std::error::Error for BackendError {}

/// A reply producer for the conversation loop.
pub trait DialogueBackend: Send + Sync {
    /// Internal identifier for this backend (e.g. "ollama").
    fn name(&self) -> &str;

    /// Startup probe. An error here is fatal at launch.
    fn check_ready(&self) -> Result<(), BackendError>;

    /// Produce a reply to `user_text` given the system prompt and the
    /// conversation so far. `history` does not yet contain `user_text`.
    fn chat(
        &self,
        system_prompt: &str,
        history: &ConversationHistory,
        user_text: &str,
    ) -> Result<String, BackendError>;
}
