//! Google Gemini streaming provider.
//!
//! Calls `POST {base_url}/{model}:streamGenerateContent?alt=sse` with the
//! whole conversation in `contents`, the agent's system instruction, and its
//! temperature. The response is a server-sent event stream where every
//! `data:` frame is a `GenerateContentResponse`; the text parts of the first
//! candidate in each frame become one fragment.
//!
//! # Failure mapping
//!
//! | Situation | Result |
//! |-----------|--------|
//! | connection failure | `Err` from `stream_chat` |
//! | non-2xx status | `Err` from `stream_chat`, message taken from the `{error}` body |
//! | `{error}` frame mid-stream | error item, then end of stream |
//! | prompt blocked | error item naming the block reason |
//! | body read failure mid-stream | error item, then end of stream |
//!
//! No retry and no timeout is applied; the caller sees the first failure.

use std::collections::VecDeque;
use std::fmt::Display;

use async_trait::async_trait;
use futures_util::{stream, Stream, StreamExt};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::CompletionError;
use crate::models::Turn;

use super::sse::SseParser;
use super::{ChatRequest, CompletionProvider, FragmentStream};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Provider that talks to the Gemini REST API.
#[derive(Clone)]
pub struct GeminiProvider {
    client: Client,
    base_url: String,
}

impl GeminiProvider {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn stream_url(&self, model: &str) -> String {
        format!("{}/{}:streamGenerateContent?alt=sse", self.base_url, model)
    }
}

impl Default for GeminiProvider {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

#[async_trait]
impl CompletionProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn stream_chat(&self, request: ChatRequest) -> Result<FragmentStream, CompletionError> {
        let body = GenerateContentRequest::from_chat(&request);
        debug!(
            model = %request.model,
            history_len = request.history.len(),
            message_len = request.message.len(),
            "opening gemini stream"
        );

        let response = self
            .client
            .post(self.stream_url(&request.model))
            .header("x-goog-api-key", &request.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| {
                CompletionError::provider(format!("Failed to connect to Gemini API: {err}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read Gemini error body".to_string());
            return Err(CompletionError::Provider(map_http_error(status, &body_text)));
        }

        Ok(decode_fragments(response.bytes_stream()))
    }
}

// ============ Request ============

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<SystemInstruction<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'a str,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct SystemInstruction<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
}

impl<'a> GenerateContentRequest<'a> {
    pub(crate) fn from_chat(request: &'a ChatRequest) -> Self {
        let mut contents: Vec<Content<'a>> = request.history.iter().map(Content::from_turn).collect();
        contents.push(Content {
            role: "user",
            parts: vec![Part {
                text: &request.message,
            }],
        });

        let system_instruction = if request.system_instruction.trim().is_empty() {
            None
        } else {
            Some(SystemInstruction {
                parts: vec![Part {
                    text: &request.system_instruction,
                }],
            })
        };

        Self {
            contents,
            system_instruction,
            generation_config: GenerationConfig {
                temperature: request.temperature,
            },
        }
    }
}

impl<'a> Content<'a> {
    fn from_turn(turn: &'a Turn) -> Self {
        Self {
            role: turn.role.as_str(),
            parts: vec![Part {
                text: &turn.content,
            }],
        }
    }
}

// ============ Response ============

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    candidates: Option<Vec<Candidate>>,
    prompt_feedback: Option<PromptFeedback>,
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<ContentResponse>,
}

#[derive(Debug, Deserialize)]
struct ContentResponse {
    #[serde(default)]
    parts: Vec<PartResponse>,
}

#[derive(Debug, Deserialize)]
struct PartResponse {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorWrapper {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
    status: Option<String>,
}

impl ErrorBody {
    fn describe(self, fallback: &str) -> String {
        let status_text = self.status.unwrap_or_default();
        let message = self.message.unwrap_or_else(|| fallback.to_string());
        if status_text.is_empty() {
            message
        } else {
            format!("{status_text}: {message}")
        }
    }
}

fn map_http_error(status: StatusCode, body: &str) -> String {
    serde_json::from_str::<ErrorWrapper>(body)
        .map(|wrapper| wrapper.error.describe(body))
        .unwrap_or_else(|_| {
            if body.trim().is_empty() {
                format!("Gemini API returned {status}")
            } else {
                format!("Gemini API returned {status}: {}", body.trim())
            }
        })
}

/// Decode one SSE `data` payload into fragment text.
///
/// `Ok(None)` means the frame carried no text (e.g. a usage-only frame).
fn decode_payload(payload: &str) -> Result<Option<String>, CompletionError> {
    let response: GenerateContentResponse = serde_json::from_str(payload).map_err(|err| {
        CompletionError::provider(format!("Failed to parse Gemini stream frame: {err}"))
    })?;

    if let Some(error) = response.error {
        return Err(CompletionError::Provider(error.describe("Gemini stream failed")));
    }

    let text: String = response
        .candidates
        .unwrap_or_default()
        .into_iter()
        .next()
        .and_then(|candidate| candidate.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|part| part.text)
                .collect()
        })
        .unwrap_or_default();

    if !text.is_empty() {
        return Ok(Some(text));
    }

    if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(CompletionError::provider(format!(
            "Gemini blocked the prompt: {reason}"
        )));
    }

    Ok(None)
}

struct DecodeState<S> {
    bytes: std::pin::Pin<Box<S>>,
    parser: SseParser,
    pending: VecDeque<Result<String, CompletionError>>,
    finished: bool,
}

/// Turn a raw SSE byte stream into a [`FragmentStream`].
///
/// The returned stream ends right after the first error item.
pub(crate) fn decode_fragments<S, B, E>(bytes: S) -> FragmentStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let state = DecodeState {
        bytes: Box::pin(bytes),
        parser: SseParser::default(),
        pending: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                if item.is_err() {
                    state.finished = true;
                    state.pending.clear();
                }
                return Some((item, state));
            }
            if state.finished {
                return None;
            }
            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    let payloads = state.parser.feed(chunk.as_ref());
                    queue_payloads(&mut state.pending, payloads);
                }
                Some(Err(err)) => {
                    state.pending.push_back(Err(CompletionError::provider(format!(
                        "Gemini stream interrupted: {err}"
                    ))));
                }
                None => {
                    queue_payloads(&mut state.pending, state.parser.finish());
                    state.finished = true;
                }
            }
        }
    })
    .boxed()
}

/// Decode `payloads` in order, stopping after the first error.
fn queue_payloads(
    pending: &mut VecDeque<Result<String, CompletionError>>,
    payloads: impl IntoIterator<Item = String>,
) {
    for payload in payloads {
        match decode_payload(&payload) {
            Ok(Some(text)) => pending.push_back(Ok(text)),
            Ok(None) => {}
            Err(err) => {
                pending.push_back(Err(err));
                break;
            }
        }
    }
}
