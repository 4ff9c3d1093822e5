//! Deterministic [`CompletionProvider`] for tests.
//!
//! Replays a fixed list of fragments on every call, optionally followed by
//! a failure, and records each [`ChatRequest`] it receives so tests can
//! assert on history mapping and call counts.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use tokio::sync::Notify;

use crate::error::CompletionError;

use super::{ChatRequest, CompletionProvider, FragmentStream};

#[derive(Default)]
pub struct ScriptedProvider {
    fragments: Vec<String>,
    stream_failure: Option<String>,
    open_failure: Option<CompletionError>,
    gate: Option<Arc<Notify>>,
    calls: Mutex<Vec<ChatRequest>>,
}

impl ScriptedProvider {
    /// Reply with `fragments`, then end normally.
    pub fn new<I, T>(fragments: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            fragments: fragments.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Fail with `message` after all fragments have been yielded.
    pub fn failing_after(mut self, message: impl Into<String>) -> Self {
        self.stream_failure = Some(message.into());
        self
    }

    /// Fail before producing any fragment, as a refused connection would.
    pub fn rejecting(error: CompletionError) -> Self {
        Self {
            open_failure: Some(error),
            ..Self::default()
        }
    }

    /// Hold every call until `gate` is notified.
    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn calls(&self) -> Vec<ChatRequest> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn stream_chat(&self, request: ChatRequest) -> Result<FragmentStream, CompletionError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);

        if let Some(gate) = &self.gate {
            gate.notified().await;
        }

        if let Some(error) = &self.open_failure {
            return Err(error.clone());
        }

        let mut items: Vec<Result<String, CompletionError>> =
            self.fragments.iter().cloned().map(Ok).collect();
        if let Some(message) = &self.stream_failure {
            items.push(Err(CompletionError::Provider(message.clone())));
        }
        Ok(stream::iter(items).boxed())
    }
}
