//! Completion sessions: one streamed reply for one user message.
//!
//! A [`CompletionSession`] binds a provider, a credential, the prior
//! conversation, the new message, and an [`AgentConfig`] into a lazy,
//! forward-only sequence of text fragments.
//!
//! ```text
//! open() ──▶ credential check ──▶ (first poll) provider.stream_chat()
//!                 │                           │
//!                 ▼                           ▼
//!        MissingCredential          "Hi" ─▶ " there" ─▶ … ─▶ None
//!                                              │
//!                                              ▼
//!                                     Provider(msg) ─▶ None
//! ```
//!
//! The credential is checked synchronously in [`CompletionSession::open`],
//! so a missing key never reaches the network. The provider call itself is
//! deferred until the first fragment is requested. Once the sequence has
//! ended, by exhaustion or by error, it keeps returning `None`; a second
//! reply needs a new session.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::{stream, Stream, StreamExt};
use tracing::{debug, warn};

use crate::credential::CredentialSource;
use crate::error::CompletionError;
use crate::models::{AgentConfig, Turn};
use crate::provider::{ChatRequest, CompletionProvider, FragmentStream};

pub struct CompletionSession {
    fragments: FragmentStream,
    finished: bool,
    yielded: usize,
}

impl CompletionSession {
    /// Prepare a session.
    ///
    /// `history` is sent exactly in the given order; ephemeral turns are the
    /// caller's business and are not filtered here.
    ///
    /// # Errors
    ///
    /// [`CompletionError::MissingCredential`] when `credentials` yields no
    /// usable key. The provider is not called in that case.
    pub fn open(
        provider: Arc<dyn CompletionProvider>,
        credentials: &CredentialSource,
        history: &[Turn],
        message: &str,
        agent: &AgentConfig,
    ) -> Result<Self, CompletionError> {
        let api_key = credentials
            .read()
            .ok_or_else(|| CompletionError::MissingCredential {
                var: credentials.describe().to_string(),
            })?;

        let request = ChatRequest {
            api_key,
            model: agent.effective_model().to_string(),
            system_instruction: agent.system_instruction.clone(),
            temperature: agent.temperature,
            history: history.to_vec(),
            message: message.to_string(),
        };

        debug!(
            provider = provider.name(),
            model = %request.model,
            history_len = request.history.len(),
            "opening completion session"
        );

        let fragments = stream::once(async move { provider.stream_chat(request).await })
            .flat_map(|opened| match opened {
                Ok(fragments) => fragments,
                Err(err) => stream::once(async move { Err(err) }).boxed(),
            })
            .boxed();

        Ok(Self {
            fragments,
            finished: false,
            yielded: 0,
        })
    }

    /// Next fragment, the terminal error, or `None` once the reply is over.
    pub async fn next_fragment(&mut self) -> Option<Result<String, CompletionError>> {
        self.next().await
    }

    /// Number of fragments yielded so far.
    pub fn fragments_yielded(&self) -> usize {
        self.yielded
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl Stream for CompletionSession {
    type Item = Result<String, CompletionError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }
        match self.fragments.poll_next_unpin(cx) {
            Poll::Ready(Some(Ok(fragment))) => {
                self.yielded += 1;
                Poll::Ready(Some(Ok(fragment)))
            }
            Poll::Ready(Some(Err(err))) => {
                warn!(fragments = self.yielded, error = %err, "completion session failed");
                self.finished = true;
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                debug!(fragments = self.yielded, "completion session finished");
                self.finished = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ScriptedProvider;

    fn key() -> CredentialSource {
        CredentialSource::Fixed(Some("test-key".into()))
    }

    #[tokio::test]
    async fn missing_credential_fails_before_any_provider_call() {
        let provider = Arc::new(ScriptedProvider::new(["never"]));
        for source in [
            CredentialSource::Fixed(None),
            CredentialSource::Fixed(Some(String::new())),
            CredentialSource::Fixed(Some("undefined".into())),
        ] {
            let err = CompletionSession::open(
                provider.clone(),
                &source,
                &[],
                "Hello",
                &AgentConfig::default(),
            )
            .err()
            .unwrap();
            assert!(matches!(err, CompletionError::MissingCredential { .. }));
        }
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn provider_is_called_lazily() {
        let provider = Arc::new(ScriptedProvider::new(["a"]));
        let mut session = CompletionSession::open(
            provider.clone(),
            &key(),
            &[],
            "Hello",
            &AgentConfig::default(),
        )
        .unwrap();
        assert_eq!(provider.call_count(), 0);

        assert_eq!(session.next_fragment().await, Some(Ok("a".to_string())));
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn fragments_concatenate_to_the_reply() {
        let provider = Arc::new(ScriptedProvider::new(["Hi", " there", "!"]));
        let session =
            CompletionSession::open(provider, &key(), &[], "Hello", &AgentConfig::default())
                .unwrap();
        let reply: Vec<String> = session.map(|item| item.unwrap()).collect().await;
        assert_eq!(reply.concat(), "Hi there!");
    }

    #[tokio::test]
    async fn request_carries_history_and_agent_settings() {
        let provider = Arc::new(ScriptedProvider::new(Vec::<String>::new()));
        let history = vec![Turn::user("first"), Turn::model("reply")];
        let agent = AgentConfig {
            model: String::new(),
            ..AgentConfig::default().with_temperature(0.1)
        };
        let mut session =
            CompletionSession::open(provider.clone(), &key(), &history, "second", &agent).unwrap();
        assert_eq!(session.next_fragment().await, None);

        let calls = provider.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].history, history);
        assert_eq!(calls[0].message, "second");
        assert_eq!(calls[0].model, crate::models::DEFAULT_MODEL);
        assert_eq!(calls[0].temperature, 0.1);
        assert_eq!(calls[0].api_key, "test-key");
    }

    #[tokio::test]
    async fn session_is_fused_after_failure() {
        let provider = Arc::new(ScriptedProvider::new(["par", "tial"]).failing_after("boom"));
        let mut session =
            CompletionSession::open(provider, &key(), &[], "Hello", &AgentConfig::default())
                .unwrap();

        assert_eq!(session.next_fragment().await, Some(Ok("par".to_string())));
        assert_eq!(session.next_fragment().await, Some(Ok("tial".to_string())));
        assert_eq!(
            session.next_fragment().await,
            Some(Err(CompletionError::provider("boom")))
        );
        assert_eq!(session.next_fragment().await, None);
        assert_eq!(session.next_fragment().await, None);
        assert_eq!(session.fragments_yielded(), 2);
        assert!(session.is_finished());
    }

    #[tokio::test]
    async fn open_failure_surfaces_as_single_error() {
        let provider = Arc::new(ScriptedProvider::rejecting(CompletionError::provider(
            "connection refused",
        )));
        let session =
            CompletionSession::open(provider, &key(), &[], "Hello", &AgentConfig::default())
                .unwrap();
        let items: Vec<_> = session.collect().await;
        assert_eq!(
            items,
            vec![Err(CompletionError::provider("connection refused"))]
        );
    }
}
