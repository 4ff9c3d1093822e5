//! Model provider abstraction.
//!
//! A [`CompletionProvider`] turns one [`ChatRequest`] into a
//! [`FragmentStream`]: a finite, forward-only sequence of text fragments
//! whose concatenation is the full reply. The stream ends with `None` on
//! success or with a single [`CompletionError`] item on failure.
//!
//! # Implementations
//!
//! | Provider | Purpose |
//! |----------|---------|
//! | [`GeminiProvider`] | Google Gemini `streamGenerateContent` over SSE |
//! | [`ScriptedProvider`] | Deterministic replies for tests |
//!
//! Callers normally do not use providers directly; they go through
//! [`CompletionSession`](crate::session::CompletionSession), which checks
//! the credential and fuses the stream.

pub mod gemini;
pub mod scripted;
pub mod sse;

use std::fmt;

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::error::CompletionError;
use crate::models::Turn;

pub use gemini::GeminiProvider;
pub use scripted::ScriptedProvider;

/// Incremental reply text, one item per fragment.
pub type FragmentStream = BoxStream<'static, Result<String, CompletionError>>;

/// Everything a provider needs for one streamed completion.
#[derive(Clone, PartialEq)]
pub struct ChatRequest {
    pub api_key: String,
    pub model: String,
    pub system_instruction: String,
    pub temperature: f32,
    /// Prior turns, oldest first. Roles map 1:1 onto provider messages.
    pub history: Vec<Turn>,
    /// The new user message.
    pub message: String,
}

impl fmt::Debug for ChatRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatRequest")
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("system_instruction", &self.system_instruction)
            .field("temperature", &self.temperature)
            .field("history", &self.history)
            .field("message", &self.message)
            .finish()
    }
}

/// A streaming text-completion backend.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Short identifier used in logs (e.g. `"gemini"`).
    fn name(&self) -> &str;

    /// Open a streamed completion. Errors returned here happen before any
    /// fragment is produced; errors after that arrive as stream items.
    async fn stream_chat(&self, request: ChatRequest) -> Result<FragmentStream, CompletionError>;
}
